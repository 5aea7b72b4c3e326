// Catalog access: the query capability the analyzers depend on
pub mod sqlite;
#[cfg(test)]
pub mod memory;

use crate::document::Node;
use crate::model::{BrandIdentity, ReferenceTable, StorageError};
use futures::stream::BoxStream;

pub use sqlite::SqliteStorage;

/// Stream of catalog documents for one query.
///
/// Dropping the stream releases the underlying cursor. An item of
/// `Err(StorageError::Decode(_))` concerns a single document; any other
/// error means the stream itself failed.
pub type DocumentStream = BoxStream<'static, Result<Node, StorageError>>;

/// Read access to the vehicle catalog.
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    /// All documents of a period, optionally narrowed to one brand.
    async fn find(&self, period: i32, brand: Option<i32>) -> Result<DocumentStream, StorageError>;

    async fn find_one(&self, period: i32, brand: i32) -> Result<Option<Node>, StorageError>;

    /// First document of the period containing the given model code.
    async fn find_by_model(&self, period: i32, model: i32) -> Result<Option<Node>, StorageError>;

    async fn brands(&self, period: i32) -> Result<Vec<BrandIdentity>, StorageError>;

    async fn reference_label(&self, period: i32) -> Result<Option<String>, StorageError>;

    /// Reference tables, newest first.
    async fn reference_tables(&self) -> Result<Vec<ReferenceTable>, StorageError>;

    async fn has_vehicles(&self, period: i32) -> Result<bool, StorageError>;
}
