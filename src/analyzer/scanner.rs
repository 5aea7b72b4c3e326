use crate::analyzer::accumulator;
use crate::model::{BrandIdentity, BrandPeriodStats, Period, ScanError, StorageError};
use crate::storage::Catalog;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything collected while scanning one period.
#[derive(Debug, Default)]
pub struct PeriodScan {
    pub stats: HashMap<i32, BrandPeriodStats>,
    pub brands: HashMap<i32, BrandIdentity>,
    pub documents: usize,
}

impl PeriodScan {
    pub fn finalize(&mut self) {
        for stats in self.stats.values_mut() {
            stats.finalize();
        }
    }
}

/// Runs a catalog query for one period and folds every matching document.
pub struct PeriodScanner {
    catalog: Arc<dyn Catalog>,
}

impl PeriodScanner {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    #[cfg(test)]
    pub async fn scan(&self, period: &Period, brand: Option<i32>) -> Result<PeriodScan, ScanError> {
        let mut scan = PeriodScan::default();
        self.scan_into(period, brand, &mut scan).await?;
        Ok(scan)
    }

    /// Scans into `scan`, which keeps whatever was collected even when the
    /// query or the stream fails part way. Statistics are finalized on
    /// every return path.
    pub async fn scan_into(
        &self,
        period: &Period,
        brand: Option<i32>,
        scan: &mut PeriodScan,
    ) -> Result<(), ScanError> {
        match brand {
            Some(code) => info!("Period {}: scanning brand {}", period.id, code),
            None => info!("Period {}: scanning all brands", period.id),
        }

        let result = self.consume(period, brand, scan).await;
        scan.finalize();

        info!(
            "Period {}: processed {} documents, {} brands",
            period.id,
            scan.documents,
            scan.stats.len()
        );
        result
    }

    async fn consume(
        &self,
        period: &Period,
        brand: Option<i32>,
        scan: &mut PeriodScan,
    ) -> Result<(), ScanError> {
        let mut documents = self
            .catalog
            .find(period.id, brand)
            .await
            .map_err(|source| ScanError::Query {
                period: period.id,
                source,
            })?;

        while let Some(item) = documents.next().await {
            let document = match item {
                Ok(document) => document,
                Err(StorageError::Decode(reason)) => {
                    warn!("Period {}: skipping undecodable document: {}", period.id, reason);
                    continue;
                }
                Err(source) => {
                    return Err(ScanError::Stream {
                        period: period.id,
                        source,
                    });
                }
            };

            let (Some(code), Some(name)) =
                (document.get_i32("brandCode"), document.get_str("brandName"))
            else {
                debug!("Period {}: document without brand identity skipped", period.id);
                continue;
            };

            scan.documents += 1;
            scan.brands.entry(code).or_insert_with(|| BrandIdentity {
                name: name.to_string(),
                code,
            });
            let stats = scan
                .stats
                .entry(code)
                .or_insert_with(|| BrandPeriodStats::seeded(period));
            accumulator::fold(stats, &document);
        }
        Ok(())
    }
}
