// In-memory catalog with fault injection for tests
use crate::document::Node;
use crate::model::{BrandIdentity, ReferenceTable, StorageError};
use crate::storage::{Catalog, DocumentStream};
use futures::StreamExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MemoryCatalog {
    documents: BTreeMap<i32, Vec<Value>>,
    labels: BTreeMap<i32, String>,
    failing_queries: HashSet<i32>,
    failing_streams: HashSet<i32>,
    slow_periods: BTreeMap<i32, Duration>,
    undecodable: BTreeMap<i32, Vec<usize>>,
    /// Number of streams that were dropped or ran to completion.
    pub closed_streams: Arc<AtomicUsize>,
}

/// Bumps the close counter when a stream is released.
struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, period: i32, document: Value) -> Self {
        self.documents.entry(period).or_default().push(document);
        self
    }

    pub fn with_label(mut self, period: i32, label: &str) -> Self {
        self.labels.insert(period, label.to_string());
        self
    }

    /// `find` fails outright for this period.
    pub fn failing_query(mut self, period: i32) -> Self {
        self.failing_queries.insert(period);
        self
    }

    /// The stream yields its documents, then a stream error.
    pub fn failing_stream(mut self, period: i32) -> Self {
        self.failing_streams.insert(period);
        self
    }

    /// An undecodable row follows the documents added so far.
    pub fn with_undecodable(mut self, period: i32) -> Self {
        let position = self.documents.get(&period).map_or(0, Vec::len);
        self.undecodable.entry(period).or_default().push(position);
        self
    }

    /// Each document of the period is delayed by `delay`.
    pub fn slow(mut self, period: i32, delay: Duration) -> Self {
        self.slow_periods.insert(period, delay);
        self
    }

    fn matching(&self, period: i32, brand: Option<i32>) -> Vec<Value> {
        self.documents
            .get(&period)
            .map(|docs| {
                docs.iter()
                    .filter(|d| match brand {
                        Some(code) => {
                            d.get("brandCode").and_then(Value::as_i64) == Some(code as i64)
                        }
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Catalog for MemoryCatalog {
    async fn find(&self, period: i32, brand: Option<i32>) -> Result<DocumentStream, StorageError> {
        if self.failing_queries.contains(&period) {
            return Err(StorageError::Worker(format!("query for period {} refused", period)));
        }
        let mut items: Vec<Result<Node, StorageError>> =
            self.matching(period, brand).into_iter().map(|v| Ok(Node::from(v))).collect();
        for position in self.undecodable.get(&period).into_iter().flatten().rev() {
            let at = (*position).min(items.len());
            let reason = format!("row {} of period {}", position, period);
            items.insert(at, Err(StorageError::Decode(reason)));
        }
        if self.failing_streams.contains(&period) {
            items.push(Err(StorageError::Worker(format!("cursor for period {} lost", period))));
        }
        let delay = self.slow_periods.get(&period).copied();
        let guard = CloseGuard(self.closed_streams.clone());

        let stream = futures::stream::iter(items).then(move |item| {
            let _held = &guard;
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            }
        });
        Ok(stream.boxed())
    }

    async fn find_one(&self, period: i32, brand: i32) -> Result<Option<Node>, StorageError> {
        Ok(self.matching(period, Some(brand)).into_iter().next().map(Node::from))
    }

    async fn find_by_model(&self, period: i32, model: i32) -> Result<Option<Node>, StorageError> {
        let found = self.matching(period, None).into_iter().find(|doc| {
            doc.get("models")
                .and_then(Value::as_array)
                .is_some_and(|models| {
                    models
                        .iter()
                        .any(|m| m.get("modelCode").and_then(Value::as_i64) == Some(model as i64))
                })
        });
        Ok(found.map(Node::from))
    }

    async fn brands(&self, period: i32) -> Result<Vec<BrandIdentity>, StorageError> {
        let mut brands: Vec<BrandIdentity> = self
            .matching(period, None)
            .iter()
            .filter_map(|d| {
                Some(BrandIdentity {
                    code: i32::try_from(d.get("brandCode")?.as_i64()?).ok()?,
                    name: d.get("brandName")?.as_str()?.to_string(),
                })
            })
            .collect();
        brands.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(brands)
    }

    async fn reference_label(&self, period: i32) -> Result<Option<String>, StorageError> {
        if self.failing_queries.contains(&period) {
            return Err(StorageError::Worker(format!("label for period {} refused", period)));
        }
        Ok(self.labels.get(&period).cloned())
    }

    async fn reference_tables(&self) -> Result<Vec<ReferenceTable>, StorageError> {
        Ok(self
            .labels
            .iter()
            .rev()
            .map(|(code, label)| ReferenceTable {
                code: *code,
                label: label.clone(),
            })
            .collect())
    }

    async fn has_vehicles(&self, period: i32) -> Result<bool, StorageError> {
        if self.failing_queries.contains(&period) {
            let reason = format!("vehicle check for period {} refused", period);
            return Err(StorageError::Worker(reason));
        }
        Ok(self.documents.get(&period).is_some_and(|docs| !docs.is_empty()))
    }
}
