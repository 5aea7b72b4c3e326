use crate::importer::PriceSource;
use crate::model::{FipeModel, FipeReferenceTable, ImportError};
use crate::normalizer::normalize_years;
use crate::storage::SqliteStorage;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::{info, warn};

/// Counters reported at the end of an import run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub reference_table: i32,
    pub brands_created: usize,
    pub brands_completed: usize,
    pub brands_skipped: usize,
    pub brands_failed: usize,
    pub models_imported: usize,
    pub models_failed: usize,
}

enum BrandOutcome {
    Created,
    Completed,
    Skipped,
}

/// Backfills the latest reference table from a price source into SQLite.
pub struct CatalogLoader<S: PriceSource> {
    source: S,
    storage: SqliteStorage,
}

impl<S: PriceSource> CatalogLoader<S> {
    pub fn new(source: S, storage: SqliteStorage) -> Self {
        Self { source, storage }
    }

    /// Imports every brand of the newest reference table. Only failing to
    /// obtain the table or its brand list aborts the run.
    pub async fn run(&self) -> Result<ImportSummary, ImportError> {
        let table = self.latest_table().await?;
        let mut summary = ImportSummary {
            reference_table: table.code,
            ..ImportSummary::default()
        };

        let brands = self.source.brands(table.code).await?;
        info!("Reference table {}: {} brands to check", table.code, brands.len());

        for brand in brands {
            let Ok(code) = brand.value.trim().parse::<i32>() else {
                warn!("Brand {} has non-numeric code '{}'", brand.label, brand.value);
                summary.brands_failed += 1;
                continue;
            };
            match self.import_brand(table.code, code, &brand.label, &mut summary).await {
                Ok(BrandOutcome::Created) => summary.brands_created += 1,
                Ok(BrandOutcome::Completed) => summary.brands_completed += 1,
                Ok(BrandOutcome::Skipped) => summary.brands_skipped += 1,
                Err(e) => {
                    warn!("Brand {} ({}) failed: {}", brand.label, code, e);
                    summary.brands_failed += 1;
                }
            }
        }

        info!(
            "Import of table {} finished: {} models imported, {} brands skipped",
            table.code, summary.models_imported, summary.brands_skipped
        );
        Ok(summary)
    }

    async fn latest_table(&self) -> Result<FipeReferenceTable, ImportError> {
        let table = self
            .source
            .reference_tables()
            .await?
            .into_iter()
            .next()
            .ok_or(ImportError::Empty)?;
        self.storage.upsert_reference_table(table.code, table.month.trim()).await?;
        info!("Latest reference table: {} ({})", table.code, table.month.trim());
        Ok(table)
    }

    async fn import_brand(
        &self,
        table: i32,
        code: i32,
        name: &str,
        summary: &mut ImportSummary,
    ) -> Result<BrandOutcome, ImportError> {
        let models = self.source.models(table, code).await?;

        match self.storage.stored_model_codes(table, code).await? {
            None => {
                info!("Brand {} ({}) not stored, importing {} models", name, code, models.len());
                self.storage.upsert_brand(table, code, name).await?;
                self.import_models(table, code, &models, &HashSet::new(), summary).await;
                Ok(BrandOutcome::Created)
            }
            Some(stored) if stored.len() >= models.len() => {
                info!("Brand {} ({}) already has all {} models", name, code, models.len());
                Ok(BrandOutcome::Skipped)
            }
            Some(stored) => {
                info!(
                    "Brand {} ({}) incomplete: {} of {} models stored",
                    name,
                    code,
                    stored.len(),
                    models.len()
                );
                let existing: HashSet<i32> = stored.into_iter().collect();
                self.import_models(table, code, &models, &existing, summary).await;
                Ok(BrandOutcome::Completed)
            }
        }
    }

    async fn import_models(
        &self,
        table: i32,
        brand: i32,
        models: &[FipeModel],
        existing: &HashSet<i32>,
        summary: &mut ImportSummary,
    ) {
        for model in models.iter().filter(|m| !existing.contains(&m.value)) {
            match self.import_model(table, brand, model).await {
                Ok(()) => summary.models_imported += 1,
                Err(e) => {
                    warn!("Model {} ({}) skipped: {}", model.label, model.value, e);
                    summary.models_failed += 1;
                }
            }
        }
    }

    async fn import_model(
        &self,
        table: i32,
        brand: i32,
        model: &FipeModel,
    ) -> Result<(), ImportError> {
        let options = self.source.years(table, brand, model.value).await?;
        let years = normalize_years(options.iter().map(|o| o.value.as_str()));

        let mut entries: Vec<Value> = Vec::with_capacity(years.len());
        for year in &years {
            match self.source.price(table, brand, model.value, year).await {
                Ok(price) => entries.push(json!({
                    "yearCode": year.code,
                    "year": year.year,
                    "price": price.value,
                    "monthReference": price.month_reference,
                })),
                Err(e) => warn!("No price for {} year {}: {}", model.label, year.code, e),
            }
        }

        let document = json!({
            "modelCode": model.value,
            "modelName": model.label,
            "years": entries,
        });
        if !self.storage.push_model(table, brand, &document).await? {
            warn!("Brand {} vanished before model {} was stored", brand, model.value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FipeModel, FipeOption, FipePrice};
    use crate::normalizer::YearCode;
    use crate::storage::Catalog;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        tables: Vec<(i32, &'static str)>,
        brands: Vec<(&'static str, &'static str)>,
        models: HashMap<i32, Vec<(i32, &'static str)>>,
        failing_brands: HashSet<i32>,
        missing_prices: HashSet<&'static str>,
        year_requests: Arc<AtomicUsize>,
    }

    impl FakeSource {
        fn catalog() -> Self {
            let mut models = HashMap::new();
            models.insert(10, vec![(100, "Roadster"), (101, "Van")]);
            models.insert(20, vec![(200, "Spark")]);
            Self {
                tables: vec![(1002, "fevereiro/2024 "), (1001, "janeiro/2024 ")],
                brands: vec![("Acme", "10"), ("Bolt", "20")],
                models,
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl PriceSource for FakeSource {
        async fn reference_tables(&self) -> Result<Vec<FipeReferenceTable>, ImportError> {
            Ok(self
                .tables
                .iter()
                .map(|(code, month)| FipeReferenceTable {
                    code: *code,
                    month: month.to_string(),
                })
                .collect())
        }

        async fn brands(&self, _table: i32) -> Result<Vec<FipeOption>, ImportError> {
            Ok(self
                .brands
                .iter()
                .map(|(label, value)| FipeOption {
                    label: label.to_string(),
                    value: value.to_string(),
                })
                .collect())
        }

        async fn models(&self, _table: i32, brand: i32) -> Result<Vec<FipeModel>, ImportError> {
            if self.failing_brands.contains(&brand) {
                return Err(ImportError::Exhausted {
                    endpoint: "ConsultarModelos".into(),
                    attempts: 5,
                });
            }
            Ok(self
                .models
                .get(&brand)
                .map(|models| {
                    models
                        .iter()
                        .map(|(value, label)| FipeModel {
                            label: label.to_string(),
                            value: *value,
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn years(
            &self,
            _table: i32,
            _brand: i32,
            _model: i32,
        ) -> Result<Vec<FipeOption>, ImportError> {
            self.year_requests.fetch_add(1, Ordering::SeqCst);
            Ok(["32000-1", "2020-1", "?"]
                .iter()
                .map(|code| FipeOption {
                    label: code.to_string(),
                    value: code.to_string(),
                })
                .collect())
        }

        async fn price(
            &self,
            _table: i32,
            _brand: i32,
            model: i32,
            year: &YearCode,
        ) -> Result<FipePrice, ImportError> {
            if self.missing_prices.contains(year.code.as_str()) {
                return Err(ImportError::Status(reqwest::StatusCode::NOT_FOUND));
            }
            let value = if year.year == 32000 { model * 1000 } else { model * 500 };
            Ok(FipePrice {
                value: crate::utils::format_price(value as f64),
                month_reference: "fevereiro de 2024".into(),
            })
        }
    }

    fn temp_storage() -> (SqliteStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("catalog.db")).unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn imports_latest_table_from_scratch() {
        let (storage, _dir) = temp_storage();
        let loader = CatalogLoader::new(FakeSource::catalog(), storage.clone());

        let summary = loader.run().await.unwrap();
        assert_eq!(summary.reference_table, 1002);
        assert_eq!(summary.brands_created, 2);
        assert_eq!(summary.models_imported, 3);

        assert_eq!(storage.reference_label(1002).await.unwrap().as_deref(), Some("fevereiro/2024"));
        let acme = storage.find_one(1002, 10).await.unwrap().unwrap();
        let models = acme.get_list("models").unwrap();
        assert_eq!(models.len(), 2);

        let years = models[0].get_list("years").unwrap();
        assert_eq!(years.len(), 2);
        assert_eq!(years[0].get_str("yearCode"), Some("32000-1"));
        assert_eq!(years[0].get_i32("year"), Some(32000));
        assert_eq!(years[0].get_str("price"), Some("R$ 100.000,00"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn storage_writes_leave_the_runtime_thread_free() {
        let (storage, _dir) = temp_storage();
        let loader = CatalogLoader::new(FakeSource::catalog(), storage.clone());

        // On a single-threaded runtime a ticking task only advances while
        // the import yields, which it does around every write.
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };
        let summary = loader.run().await.unwrap();
        ticker.abort();

        assert_eq!(summary.models_imported, 3);
        assert!(ticks.load(Ordering::SeqCst) > 0);
        assert_eq!(storage.stored_model_codes(1002, 20).await.unwrap(), Some(vec![200]));
    }

    #[tokio::test]
    async fn complete_brands_are_skipped_on_rerun() {
        let (storage, _dir) = temp_storage();
        let source = FakeSource::catalog();
        let requests = source.year_requests.clone();
        let loader = CatalogLoader::new(source, storage);

        loader.run().await.unwrap();
        let before = requests.load(Ordering::SeqCst);

        let summary = loader.run().await.unwrap();
        assert_eq!(summary.brands_skipped, 2);
        assert_eq!(summary.models_imported, 0);
        assert_eq!(requests.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn incomplete_brand_gets_only_missing_models() {
        let (storage, _dir) = temp_storage();
        storage.upsert_brand(1002, 10, "Acme").await.unwrap();
        let roadster = json!({"modelCode": 100, "modelName": "Roadster", "years": []});
        storage.push_model(1002, 10, &roadster).await.unwrap();

        let source = FakeSource::catalog();
        let requests = source.year_requests.clone();
        let summary = CatalogLoader::new(source, storage.clone()).run().await.unwrap();

        assert_eq!(summary.brands_completed, 1);
        assert_eq!(summary.brands_created, 1);
        assert_eq!(summary.models_imported, 2);
        assert_eq!(requests.load(Ordering::SeqCst), 2);
        assert_eq!(storage.stored_model_codes(1002, 10).await.unwrap(), Some(vec![100, 101]));
    }

    #[tokio::test]
    async fn failing_brands_and_prices_are_skipped() {
        let (storage, _dir) = temp_storage();
        let mut source = FakeSource::catalog();
        source.brands.push(("Broken", "n/a"));
        source.failing_brands.insert(20);
        source.missing_prices.insert("2020-1");

        let summary = CatalogLoader::new(source, storage.clone()).run().await.unwrap();
        assert_eq!(summary.brands_created, 1);
        assert_eq!(summary.brands_failed, 2);
        assert!(storage.find_one(1002, 20).await.unwrap().is_none());

        let acme = storage.find_one(1002, 10).await.unwrap().unwrap();
        let years = acme.get_list("models").unwrap()[0].get_list("years").unwrap();
        assert_eq!(years.len(), 1);
    }

    #[tokio::test]
    async fn missing_reference_table_aborts() {
        let (storage, _dir) = temp_storage();
        let source = FakeSource {
            tables: Vec::new(),
            ..FakeSource::catalog()
        };

        let err = CatalogLoader::new(source, storage).run().await.unwrap_err();
        assert!(matches!(err, ImportError::Empty));
    }
}
