mod analyzer;
mod browser;
mod cli;
mod config;
mod document;
mod importer;
mod model;
mod normalizer;
mod storage;
mod utils;

use analyzer::{DashboardAggregator, DashboardQuery};
use browser::CatalogBrowser;
use clap::Parser;
use cli::{Args, Command};
use config::{AppConfig, load_config};
use importer::{CatalogLoader, FipeClient};
use model::BrowseError;
use serde::Serialize;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use storage::{Catalog, SqliteStorage};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Config load error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &AppConfig) -> Result<(), Box<dyn Error>> {
    let storage = SqliteStorage::new(&config.database_path)?;
    info!("Using catalog database {}", config.database_path);
    let catalog: Arc<dyn Catalog> = Arc::new(storage.clone());
    let browser = CatalogBrowser::new(catalog.clone(), config.lookup_timeout());

    match command {
        Command::Dashboard {
            period1,
            period2,
            brand,
        } => {
            let query =
                DashboardQuery::parse(period1.as_deref(), period2.as_deref(), brand.as_deref())?;
            let aggregator = DashboardAggregator::new(
                catalog,
                config.lookup_timeout(),
                config.dashboard_timeout(),
            );
            print_json(&aggregator.compare(&query).await?)
        }
        Command::Tables { with_vehicles } => {
            let tables = if with_vehicles {
                browser.reference_tables_with_vehicles().await?
            } else {
                browser.reference_tables().await?
            };
            print_json(&tables)
        }
        Command::Brands { period } => print_json(&browser.brands(code("period", &period)?).await?),
        Command::Models { brand, period } => {
            print_json(&browser.models(code("brand", &brand)?, code("period", &period)?).await?)
        }
        Command::Vehicles { model, period } => {
            print_json(&browser.vehicles(code("model", &model)?, code("period", &period)?).await?)
        }
        Command::CompareModel {
            model,
            period1,
            period2,
        } => {
            let (model, period1, period2) = (
                code("model", &model)?,
                code("period1", &period1)?,
                code("period2", &period2)?,
            );
            print_json(&browser.compare_model(model, period1, period2).await?)
        }
        Command::NewModels { period, brand } => {
            let brand = match brand.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
                Some(raw) => Some(code("brand", raw)?),
                None => None,
            };
            print_json(&browser.new_models(code("period", &period)?, brand).await?)
        }
        Command::Import => {
            let client = FipeClient::new(&config.import)?;
            let summary = CatalogLoader::new(client, storage).run().await?;
            print_json(&summary)
        }
    }
}

fn code(name: &str, raw: &str) -> Result<i32, BrowseError> {
    utils::parse_code(name, Some(raw)).map_err(BrowseError::Validation)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
