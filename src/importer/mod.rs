// Importer: pulls reference tables, brands, models and prices from the FIPE service.

pub mod client;
pub mod loader;
pub mod traits;

pub use client::FipeClient;
pub use loader::CatalogLoader;
pub use traits::PriceSource;
