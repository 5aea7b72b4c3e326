use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "FIPE price catalog comparisons", long_about = None)]
pub struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Per-brand statistics of two reference tables and their differences
    Dashboard {
        #[arg(long)]
        period1: Option<String>,
        #[arg(long)]
        period2: Option<String>,
        /// Restrict the comparison to one brand code
        #[arg(long)]
        brand: Option<String>,
    },
    /// Reference tables, newest first
    Tables {
        /// Only tables that have catalog data
        #[arg(long)]
        with_vehicles: bool,
    },
    /// Brands of a reference table
    Brands {
        #[arg(long)]
        period: String,
    },
    /// Models of a brand
    Models {
        #[arg(long)]
        brand: String,
        #[arg(long)]
        period: String,
    },
    /// Priced years of a model
    Vehicles {
        #[arg(long)]
        model: String,
        #[arg(long)]
        period: String,
    },
    /// Year-by-year prices of a model in two reference tables
    CompareModel {
        #[arg(long)]
        model: String,
        #[arg(long)]
        period1: String,
        #[arg(long)]
        period2: String,
    },
    /// Models with new-model pricing, by brand then price
    NewModels {
        #[arg(long)]
        period: String,
        #[arg(long)]
        brand: Option<String>,
    },
    /// Import the latest reference table from the FIPE service
    Import,
}
