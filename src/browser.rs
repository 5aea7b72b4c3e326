// Catalog browsing: tables, brands, models, vehicles and listings
use crate::document::Node;
use crate::model::{
    BrandIdentity, BrowseError, ModelComparison, ModelSummary, NEW_MODEL_YEAR, NewModelListing,
    ReferenceTable, StorageError, VehicleYear, YearComparison,
};
use crate::storage::Catalog;
use crate::utils::{format_price, parse_price, percentage_diff};
use futures::StreamExt;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct CatalogBrowser {
    catalog: Arc<dyn Catalog>,
    lookup_timeout: Duration,
}

impl CatalogBrowser {
    pub fn new(catalog: Arc<dyn Catalog>, lookup_timeout: Duration) -> Self {
        Self {
            catalog,
            lookup_timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, BrowseError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match timeout(self.lookup_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BrowseError::Timeout),
        }
    }

    pub async fn reference_tables(&self) -> Result<Vec<ReferenceTable>, BrowseError> {
        self.bounded(self.catalog.reference_tables()).await
    }

    /// Reference tables that have at least one catalog document, checked concurrently.
    pub async fn reference_tables_with_vehicles(&self) -> Result<Vec<ReferenceTable>, BrowseError> {
        let tables = self.reference_tables().await?;
        let checks = tables.iter().map(|table| self.bounded(self.catalog.has_vehicles(table.code)));
        let results = join_all(checks).await;

        let mut kept = Vec::new();
        for (table, result) in tables.into_iter().zip(results) {
            match result {
                Ok(true) => kept.push(table),
                Ok(false) => debug!("Reference table {} has no vehicles", table.code),
                Err(e) => warn!("Vehicle check for table {} failed: {}", table.code, e),
            }
        }
        Ok(kept)
    }

    pub async fn brands(&self, period: i32) -> Result<Vec<BrandIdentity>, BrowseError> {
        self.bounded(self.catalog.brands(period)).await
    }

    pub async fn models(&self, brand: i32, period: i32) -> Result<Vec<ModelSummary>, BrowseError> {
        let document = self
            .bounded(self.catalog.find_one(period, brand))
            .await?
            .ok_or_else(|| {
                BrowseError::NotFound(format!("brand {} not found in period {}", brand, period))
            })?;
        let models = document
            .get_list("models")
            .ok_or_else(|| BrowseError::NotFound(format!("brand {} has no models", brand)))?;

        Ok(models
            .iter()
            .filter_map(|model| {
                Some(ModelSummary {
                    model_code: model.get_i32("modelCode")?,
                    model_name: model.get_str("modelName")?.to_string(),
                })
            })
            .collect())
    }

    /// Priced year entries of a model in one period.
    pub async fn vehicles(&self, model: i32, period: i32) -> Result<Vec<VehicleYear>, BrowseError> {
        let document = self
            .bounded(self.catalog.find_by_model(period, model))
            .await?
            .ok_or_else(|| {
                BrowseError::NotFound(format!("model {} not found in period {}", model, period))
            })?;

        let years = model_years(&document, model);
        if years.is_empty() {
            return Err(BrowseError::NotFound(format!(
                "no years for model {} in period {}",
                model, period
            )));
        }
        Ok(years)
    }

    /// Pairs a model's year entries across two periods by year code.
    pub async fn compare_model(
        &self,
        model: i32,
        period1: i32,
        period2: i32,
    ) -> Result<ModelComparison, BrowseError> {
        let (first, second) = tokio::join!(
            self.vehicles(model, period1),
            self.vehicles(model, period2)
        );
        let (first, second) = match (first, second) {
            (Err(BrowseError::NotFound(_)), Err(BrowseError::NotFound(_))) => {
                return Err(BrowseError::NotFound(format!(
                    "model {} not found in periods {} and {}",
                    model, period1, period2
                )));
            }
            (first, second) => (or_empty(first)?, or_empty(second)?),
        };

        let model_name = first
            .first()
            .or_else(|| second.first())
            .map(|v| v.model.clone())
            .unwrap_or_default();

        let mut years: Vec<YearComparison> = first
            .iter()
            .map(|v| YearComparison {
                year_code: v.year_code.clone(),
                year: v.year,
                price1: Some(v.price.clone()),
                price2: None,
                diff: None,
            })
            .collect();
        for v in second {
            match years.iter_mut().find(|y| y.year_code == v.year_code) {
                Some(pair) => pair.price2 = Some(v.price),
                None => years.push(YearComparison {
                    year_code: v.year_code,
                    year: v.year,
                    price1: None,
                    price2: Some(v.price),
                    diff: None,
                }),
            }
        }
        for pair in &mut years {
            if let (Some(p1), Some(p2)) = (&pair.price1, &pair.price2) {
                if let (Ok(v1), Ok(v2)) = (parse_price(p1), parse_price(p2)) {
                    pair.diff = percentage_diff(v1, v2);
                }
            }
        }

        Ok(ModelComparison {
            model_code: model,
            model_name,
            period1,
            period2,
            years,
        })
    }

    /// Models with a priced new-model entry, by brand name then price.
    pub async fn new_models(
        &self,
        period: i32,
        brand: Option<i32>,
    ) -> Result<Vec<NewModelListing>, BrowseError> {
        let collected = timeout(self.lookup_timeout, self.collect_new_models(period, brand)).await;
        let mut listings = match collected {
            Ok(result) => result?,
            Err(_) => return Err(BrowseError::Timeout),
        };
        listings.sort_by(|a, b| {
            a.brand_name
                .cmp(&b.brand_name)
                .then(a.value.total_cmp(&b.value))
        });
        Ok(listings)
    }

    async fn collect_new_models(
        &self,
        period: i32,
        brand: Option<i32>,
    ) -> Result<Vec<NewModelListing>, BrowseError> {
        let mut documents = self.catalog.find(period, brand).await?;
        let mut listings = Vec::new();

        while let Some(item) = documents.next().await {
            let document = match item {
                Ok(document) => document,
                Err(StorageError::Decode(reason)) => {
                    warn!("Period {}: skipping undecodable document: {}", period, reason);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let (Some(brand_code), Some(brand_name)) =
                (document.get_i32("brandCode"), document.get_str("brandName"))
            else {
                continue;
            };
            for model in document.get_list("models").unwrap_or_default() {
                let (Some(model_code), Some(model_name)) =
                    (model.get_i32("modelCode"), model.get_str("modelName"))
                else {
                    continue;
                };
                let price = model
                    .get_list("years")
                    .unwrap_or_default()
                    .iter()
                    .filter(|entry| entry.get_i32("year") == Some(NEW_MODEL_YEAR))
                    .find_map(|entry| entry.get_str("price").and_then(|p| parse_price(p).ok()));
                if let Some(value) = price {
                    listings.push(NewModelListing {
                        brand_name: brand_name.to_string(),
                        brand_code,
                        model_code,
                        model_name: model_name.to_string(),
                        value,
                        price: format_price(value),
                    });
                }
            }
        }
        Ok(listings)
    }
}

fn or_empty(
    result: Result<Vec<VehicleYear>, BrowseError>,
) -> Result<Vec<VehicleYear>, BrowseError> {
    match result {
        Err(BrowseError::NotFound(_)) => Ok(Vec::new()),
        other => other,
    }
}

fn model_years(document: &Node, model: i32) -> Vec<VehicleYear> {
    let Some(entry) = document
        .get_list("models")
        .unwrap_or_default()
        .iter()
        .find(|m| m.get_i32("modelCode") == Some(model))
    else {
        return Vec::new();
    };
    let Some(years) = entry.get_list("years") else {
        debug!("Model {} has no year list", model);
        return Vec::new();
    };
    let model_name = entry.get_str("modelName").unwrap_or_default();

    years
        .iter()
        .filter_map(|year| {
            Some(VehicleYear {
                model: model_name.to_string(),
                year_code: year.get_str("yearCode").unwrap_or_default().to_string(),
                year: year.get_i32("year")?,
                price: year.get_str("price")?.to_string(),
                month_reference: year.get_str("monthReference").unwrap_or_default().to_string(),
            })
        })
        .collect()
}
