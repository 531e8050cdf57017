//! Storefront client: sessions, product catalog and image uploads against a
//! Supabase-style backend, plus small presentation helpers.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use storefront::{BackendConfig, ClientProvider, Storefront, models::product::ProductFilters};
//!
//! let config = BackendConfig::new("https://project.supabase.co", "public-anon-key");
//! let provider = ClientProvider::new(config.clone());
//! let shop = Storefront::new(provider.initialize().await?, &config);
//!
//! let page = shop.catalog.list_public_products(&ProductFilters::default()).await?;
//! println!("{} products", page.total_count);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod ui;

pub use config::BackendConfig;
pub use errors::{
    AuthError, BackendError, CatalogError, ConfigError, ProviderError, UploadError,
    ValidationError,
};
pub use services::{
    Storefront,
    client_provider::{BackendHandle, ClientProvider},
};
