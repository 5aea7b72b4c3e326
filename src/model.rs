// Core structs: catalog statistics, dashboard rows, error types
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Year code the catalog uses for current model-year ("0 km") pricing.
pub const NEW_MODEL_YEAR: i32 = 32000;

/// Placeholder shown wherever a value could not be computed.
pub const NOT_AVAILABLE: &str = "N/A";

/// A reference table (monthly catalog snapshot).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceTable {
    pub code: i32,
    pub label: String,
}

/// Period being compared: id plus its human-readable label.
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub id: i32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandIdentity {
    pub name: String,
    pub code: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInfo {
    pub model_name: String,
    #[serde(skip)]
    pub value: f64,
    pub formatted_value: String,
}

impl PriceInfo {
    pub fn new(model_name: &str, value: f64) -> Self {
        Self {
            model_name: model_name.to_string(),
            value,
            formatted_value: crate::utils::format_price(value),
        }
    }

    /// Running-extremum seed: any real price supersedes it.
    pub fn sentinel(value: f64) -> Self {
        Self {
            model_name: String::new(),
            value,
            formatted_value: NOT_AVAILABLE.to_string(),
        }
    }

    pub fn not_available() -> Self {
        Self {
            model_name: NOT_AVAILABLE.to_string(),
            value: f64::NAN,
            formatted_value: NOT_AVAILABLE.to_string(),
        }
    }

    #[cfg(test)]
    pub fn is_available(&self) -> bool {
        self.value.is_finite()
    }
}

/// Statistics of one brand within one period.
///
/// Filled by the accumulator while a period is scanned and read-only once
/// [`BrandPeriodStats::finalize`] has run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandPeriodStats {
    pub period_label: String,
    #[serde(skip)]
    pub period_id: i32,
    pub cheapest_new: PriceInfo,
    pub priciest_new: PriceInfo,
    #[serde(skip)]
    pub average_new_price: f64,
    pub average_new_price_fmt: String,
    pub total_models_with_new_pricing: usize,
    pub total_new_vehicles_priced: usize,
    #[serde(skip)]
    pub(crate) new_price_sum: f64,
    #[serde(skip)]
    pub(crate) distinct_model_codes: HashSet<i32>,
}

impl BrandPeriodStats {
    /// Fresh accumulator seeded with +inf/-inf extrema.
    pub fn seeded(period: &Period) -> Self {
        Self {
            period_label: period.label.clone(),
            period_id: period.id,
            cheapest_new: PriceInfo::sentinel(f64::INFINITY),
            priciest_new: PriceInfo::sentinel(f64::NEG_INFINITY),
            average_new_price: f64::NAN,
            average_new_price_fmt: NOT_AVAILABLE.to_string(),
            total_models_with_new_pricing: 0,
            total_new_vehicles_priced: 0,
            new_price_sum: 0.0,
            distinct_model_codes: HashSet::new(),
        }
    }

    /// Stand-in for a brand that has no data in the period.
    pub fn placeholder(period: &Period) -> Self {
        let mut stats = Self::seeded(period);
        stats.finalize();
        stats
    }

    /// Computes the average and replaces unused sentinels. Safe to call twice.
    pub fn finalize(&mut self) {
        if self.total_new_vehicles_priced > 0 {
            self.average_new_price = self.new_price_sum / self.total_new_vehicles_priced as f64;
        } else {
            self.average_new_price = f64::NAN;
            self.cheapest_new = PriceInfo::not_available();
            self.priciest_new = PriceInfo::not_available();
        }
        self.average_new_price_fmt = crate::utils::format_price(self.average_new_price);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentageDiffs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_count: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardEntry {
    pub brand_name: String,
    pub brand_code: i32,
    pub period1: BrandPeriodStats,
    pub period2: BrandPeriodStats,
    pub diffs: PercentageDiffs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub model_code: i32,
    pub model_name: String,
}

/// One priced year entry of a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleYear {
    pub model: String,
    pub year_code: String,
    pub year: i32,
    pub price: String,
    pub month_reference: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearComparison {
    pub year_code: String,
    pub year: i32,
    pub price1: Option<String>,
    pub price2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelComparison {
    pub model_code: i32,
    pub model_name: String,
    pub period1: i32,
    pub period2: i32,
    pub years: Vec<YearComparison>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewModelListing {
    pub brand_name: String,
    pub brand_code: i32,
    pub model_code: i32,
    pub model_name: String,
    #[serde(skip)]
    pub value: f64,
    pub price: String,
}

// FIPE price service payloads

#[derive(Debug, Clone, Deserialize)]
pub struct FipeReferenceTable {
    #[serde(rename = "Codigo")]
    pub code: i32,
    #[serde(rename = "Mes")]
    pub month: String,
}

/// A `Label`/`Value` option as returned by the brand and year endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct FipeOption {
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FipeModel {
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(rename = "Value")]
    pub value: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FipeModels {
    #[serde(rename = "Modelos")]
    pub models: Vec<FipeModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FipePrice {
    #[serde(rename = "Valor")]
    pub value: String,
    #[serde(rename = "MesReferencia", default)]
    pub month_reference: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("empty price")]
    Empty,
    #[error("invalid price '{0}'")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("undecodable document: {0}")]
    Decode(String),
    #[error("storage worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("malformed config {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("query for period {period} failed: {source}")]
    Query { period: i32, source: StorageError },
    #[error("result stream for period {period} failed: {source}")]
    Stream { period: i32, source: StorageError },
    #[error("scan of period {period} timed out")]
    Timeout { period: i32 },
}

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("brand {0} not found in either period")]
    NotFound(i32),
    #[error("no data available for periods {period1} and {period2}")]
    Unavailable { period1: i32, period2: i32 },
}

#[derive(Debug, thiserror::Error)]
pub enum BrowseError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("lookup timed out")]
    Timeout,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("all {attempts} attempts to {endpoint} failed")]
    Exhausted { endpoint: String, attempts: u32 },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no reference table returned")]
    Empty,
}
