// Analyzer module: per-brand accumulation, period scans and the dual-period dashboard.

pub mod accumulator;
pub mod dashboard;
pub mod scanner;

pub use dashboard::{DashboardAggregator, DashboardQuery};
