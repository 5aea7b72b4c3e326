use crate::model::{FipeModel, FipeOption, FipePrice, FipeReferenceTable, ImportError};
use crate::normalizer::YearCode;

/// Upstream price catalog the importer pulls from.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    /// Published reference tables, newest first.
    async fn reference_tables(&self) -> Result<Vec<FipeReferenceTable>, ImportError>;
    async fn brands(&self, table: i32) -> Result<Vec<FipeOption>, ImportError>;
    async fn models(&self, table: i32, brand: i32) -> Result<Vec<FipeModel>, ImportError>;
    async fn years(
        &self,
        table: i32,
        brand: i32,
        model: i32,
    ) -> Result<Vec<FipeOption>, ImportError>;
    async fn price(
        &self,
        table: i32,
        brand: i32,
        model: i32,
        year: &YearCode,
    ) -> Result<FipePrice, ImportError>;
}
