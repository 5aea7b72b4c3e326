use crate::analyzer::scanner::{PeriodScan, PeriodScanner};
use crate::model::{
    BrandIdentity, BrandPeriodStats, DashboardEntry, DashboardError, PercentageDiffs, Period,
    ScanError,
};
use crate::storage::Catalog;
use crate::utils::{parse_code, percentage_diff};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{info, warn};

/// A validated comparison request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardQuery {
    period1: i32,
    period2: i32,
    brand: Option<i32>,
}

impl DashboardQuery {
    pub fn new(period1: i32, period2: i32, brand: Option<i32>) -> Result<Self, DashboardError> {
        if period1 == period2 {
            return Err(DashboardError::Validation(
                "comparison periods must differ".to_string(),
            ));
        }
        Ok(Self {
            period1,
            period2,
            brand,
        })
    }

    /// Builds a query from raw request parameters. An empty brand means no filter.
    pub fn parse(
        period1: Option<&str>,
        period2: Option<&str>,
        brand: Option<&str>,
    ) -> Result<Self, DashboardError> {
        let period1 = parse_code("period1", period1).map_err(DashboardError::Validation)?;
        let period2 = parse_code("period2", period2).map_err(DashboardError::Validation)?;
        let brand = match brand.map(str::trim).filter(|b| !b.is_empty()) {
            Some(raw) => Some(parse_code("brand", Some(raw)).map_err(DashboardError::Validation)?),
            None => None,
        };
        Self::new(period1, period2, brand)
    }

    #[cfg(test)]
    pub fn brand(&self) -> Option<i32> {
        self.brand
    }
}

/// Compares two catalog periods brand by brand.
pub struct DashboardAggregator {
    catalog: Arc<dyn Catalog>,
    scanner: PeriodScanner,
    lookup_timeout: Duration,
    compare_timeout: Duration,
}

impl DashboardAggregator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        lookup_timeout: Duration,
        compare_timeout: Duration,
    ) -> Self {
        Self {
            scanner: PeriodScanner::new(catalog.clone()),
            catalog,
            lookup_timeout,
            compare_timeout,
        }
    }

    /// Human-readable label of a period, `"Table <id>"` when none is on record.
    pub async fn label_for(&self, period: i32) -> String {
        let fallback = || format!("Table {}", period);
        match timeout(self.lookup_timeout, self.catalog.reference_label(period)).await {
            Ok(Ok(Some(label))) => label,
            Ok(Ok(None)) => fallback(),
            Ok(Err(e)) => {
                warn!("Label lookup for period {} failed: {}", period, e);
                fallback()
            }
            Err(_) => {
                warn!("Label lookup for period {} timed out", period);
                fallback()
            }
        }
    }

    /// Scans both periods concurrently and merges them into one entry per brand.
    ///
    /// A failed or timed-out scan only loses that period's data. Dropping the
    /// returned future cancels both scans and releases their cursors.
    pub async fn compare(
        &self,
        query: &DashboardQuery,
    ) -> Result<Vec<DashboardEntry>, DashboardError> {
        match query.brand {
            Some(code) => info!(
                "Comparing periods {} and {} for brand {}",
                query.period1, query.period2, code
            ),
            None => info!("Comparing periods {} and {} (all brands)", query.period1, query.period2),
        }
        let deadline = Instant::now() + self.compare_timeout;

        let (label1, label2) = tokio::join!(
            self.label_for(query.period1),
            self.label_for(query.period2)
        );
        let period1 = Period {
            id: query.period1,
            label: label1,
        };
        let period2 = Period {
            id: query.period2,
            label: label2,
        };

        let mut scan1 = PeriodScan::default();
        let mut scan2 = PeriodScan::default();
        let (result1, result2) = tokio::join!(
            self.bounded_scan(deadline, &period1, query.brand, &mut scan1),
            self.bounded_scan(deadline, &period2, query.brand, &mut scan2),
        );

        let failed1 = log_scan_failure(result1);
        let failed2 = log_scan_failure(result2);
        if failed1 && failed2 && scan1.brands.is_empty() && scan2.brands.is_empty() {
            return Err(DashboardError::Unavailable {
                period1: period1.id,
                period2: period2.id,
            });
        }

        let entries = merge(query.brand, &period1, &period2, scan1, scan2)?;
        info!(
            "Comparison of periods {} and {} produced {} entries",
            period1.id,
            period2.id,
            entries.len()
        );
        Ok(entries)
    }

    async fn bounded_scan(
        &self,
        deadline: Instant,
        period: &Period,
        brand: Option<i32>,
        scan: &mut PeriodScan,
    ) -> Result<(), ScanError> {
        let result = match timeout_at(deadline, self.scanner.scan_into(period, brand, scan)).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::Timeout { period: period.id }),
        };
        // A timed-out scan stops before finalizing.
        scan.finalize();
        result
    }
}

fn log_scan_failure(result: Result<(), ScanError>) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            warn!("Continuing with partial data: {}", e);
            true
        }
    }
}

/// Joins two period scans by brand code, filling gaps with placeholders.
fn merge(
    brand: Option<i32>,
    period1: &Period,
    period2: &Period,
    mut scan1: PeriodScan,
    mut scan2: PeriodScan,
) -> Result<Vec<DashboardEntry>, DashboardError> {
    let mut identities: BTreeMap<i32, BrandIdentity> = scan1.brands.drain().collect();
    for (code, identity) in scan2.brands.drain() {
        identities.entry(code).or_insert(identity);
    }

    if let Some(code) = brand {
        identities.retain(|c, _| *c == code);
        if identities.is_empty() {
            info!("Brand {} not found in either period", code);
            return Err(DashboardError::NotFound(code));
        }
    }

    let mut entries: Vec<DashboardEntry> = identities
        .into_values()
        .map(|identity| {
            let stats1 = scan1
                .stats
                .remove(&identity.code)
                .unwrap_or_else(|| BrandPeriodStats::placeholder(period1));
            let stats2 = scan2
                .stats
                .remove(&identity.code)
                .unwrap_or_else(|| BrandPeriodStats::placeholder(period2));
            let diffs = PercentageDiffs {
                average_price: percentage_diff(stats1.average_new_price, stats2.average_new_price),
                model_count: percentage_diff(
                    stats1.total_models_with_new_pricing as f64,
                    stats2.total_models_with_new_pricing as f64,
                ),
            };
            DashboardEntry {
                brand_name: identity.name,
                brand_code: identity.code,
                period1: stats1,
                period2: stats2,
                diffs,
            }
        })
        .collect();

    if brand.is_none() {
        entries.sort_by(|a, b| a.brand_name.cmp(&b.brand_name));
    }
    Ok(entries)
}
