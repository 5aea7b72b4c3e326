use crate::config::ImportConfig;
use crate::importer::PriceSource;
use crate::model::{FipeModel, FipeModels, FipeOption, FipePrice, FipeReferenceTable, ImportError};
use crate::normalizer::YearCode;
use rand::Rng;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const MAX_JITTER_MILLIS: u64 = 250;

/// HTTP client for the FIPE price service.
pub struct FipeClient {
    client: Client,
    base_url: String,
    vehicle_type: i32,
    max_retries: u32,
    backoff: Duration,
}

impl FipeClient {
    pub fn new(config: &ImportConfig) -> Result<Self, ImportError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) FipeDashboard/0.1")
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            vehicle_type: config.vehicle_type,
            // At least one request is always sent.
            max_retries: config.max_retries.max(1),
            backoff: Duration::from_millis(config.backoff_millis),
        })
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Linear backoff for the given attempt, plus jitter.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let jitter = if self.backoff.is_zero() {
            0
        } else {
            rand::rng().random_range(0..=MAX_JITTER_MILLIS)
        };
        self.backoff * attempt + Duration::from_millis(jitter)
    }

    fn base_payload(&self, table: i32) -> serde_json::Map<String, Value> {
        let mut payload = serde_json::Map::new();
        payload.insert("codigoTabelaReferencia".into(), json!(table));
        payload.insert("codigoTipoVeiculo".into(), json!(self.vehicle_type));
        payload
    }

    async fn send(&self, url: &str, payload: &Value) -> Result<String, ImportError> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::Status(status));
        }
        Ok(response.text().await?)
    }

    /// POSTs `payload` to `endpoint`, retrying transport errors and bad statuses.
    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: Value,
    ) -> Result<T, ImportError> {
        let url = self.build_url(endpoint);

        for attempt in 1..=self.max_retries {
            match self.send(&url, &payload).await {
                Ok(body) => {
                    debug!("{}: attempt {} succeeded", endpoint, attempt);
                    return Ok(serde_json::from_str(&body)?);
                }
                Err(e) => warn!(
                    "{}: attempt {}/{} failed: {}",
                    endpoint, attempt, self.max_retries, e
                ),
            }
            if attempt < self.max_retries {
                sleep(self.retry_delay(attempt)).await;
            }
        }

        Err(ImportError::Exhausted {
            endpoint: endpoint.to_string(),
            attempts: self.max_retries,
        })
    }
}

#[async_trait::async_trait]
impl PriceSource for FipeClient {
    async fn reference_tables(&self) -> Result<Vec<FipeReferenceTable>, ImportError> {
        self.post("ConsultarTabelaDeReferencia", json!({})).await
    }

    async fn brands(&self, table: i32) -> Result<Vec<FipeOption>, ImportError> {
        self.post("ConsultarMarcas", Value::Object(self.base_payload(table))).await
    }

    async fn models(&self, table: i32, brand: i32) -> Result<Vec<FipeModel>, ImportError> {
        let mut payload = self.base_payload(table);
        payload.insert("codigoMarca".into(), json!(brand));
        let models: FipeModels = self.post("ConsultarModelos", Value::Object(payload)).await?;
        Ok(models.models)
    }

    async fn years(
        &self,
        table: i32,
        brand: i32,
        model: i32,
    ) -> Result<Vec<FipeOption>, ImportError> {
        let mut payload = self.base_payload(table);
        payload.insert("codigoMarca".into(), json!(brand));
        payload.insert("codigoModelo".into(), json!(model));
        self.post("ConsultarAnoModelo", Value::Object(payload)).await
    }

    async fn price(
        &self,
        table: i32,
        brand: i32,
        model: i32,
        year: &YearCode,
    ) -> Result<FipePrice, ImportError> {
        let mut payload = self.base_payload(table);
        payload.insert("codigoMarca".into(), json!(brand));
        payload.insert("codigoModelo".into(), json!(model));
        payload.insert("anoModelo".into(), json!(year.model_year()));
        payload.insert("codigoTipoCombustivel".into(), json!(year.fuel));
        payload.insert("ano".into(), json!(year.code));
        payload.insert("tipoConsulta".into(), json!("tradicional"));
        self.post("ConsultarValorComTodosParametros", Value::Object(payload)).await
    }
}
