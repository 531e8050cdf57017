use clap::Args;
use reqwest::Url;
use std::env;

use crate::errors::ConfigError;

pub const DEFAULT_PRODUCTS_TABLE: &str = "products";
pub const DEFAULT_ROLES_TABLE: &str = "user_roles";
pub const DEFAULT_BUCKET: &str = "products";

/// Path on the storefront site the password-reset mail links back to.
const RESET_REDIRECT_PATH: &str = "/admin/login.html";

/// Connection settings for the remote backend.
///
/// Only `url` and `anon_key` are required; everything else has a default that
/// matches the storefront schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub products_table: String,
    pub roles_table: String,
    pub bucket: String,
    /// Origin of the storefront site, e.g. `https://shop.example.com`.
    pub site_origin: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Backend endpoint (overrides SUPABASE_URL)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Public API key (overrides SUPABASE_ANON_KEY)
    #[arg(long, global = true)]
    pub anon_key: Option<String>,

    /// Storage bucket for product images (overrides STOREFRONT_BUCKET)
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Site origin used for password reset links (overrides STOREFRONT_SITE_ORIGIN)
    #[arg(long, global = true)]
    pub site_origin: Option<String>,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            products_table: DEFAULT_PRODUCTS_TABLE.into(),
            roles_table: DEFAULT_ROLES_TABLE.into(),
            bucket: DEFAULT_BUCKET.into(),
            site_origin: None,
        }
    }

    pub fn with_site_origin(mut self, origin: impl Into<String>) -> Self {
        self.site_origin = Some(origin.into());
        self
    }

    /// Merge parsed CLI flags over the environment.
    ///
    /// Missing values are left empty so that `validate` reports them.
    pub fn from_env_and_args(args: ConfigArgs) -> Self {
        let env_url = env::var("SUPABASE_URL").unwrap_or_default();
        let env_key = env::var("SUPABASE_ANON_KEY").unwrap_or_default();
        let env_bucket = env::var("STOREFRONT_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.into());
        let env_origin = env::var("STOREFRONT_SITE_ORIGIN").ok();

        let mut cfg = Self::new(
            args.url.unwrap_or(env_url),
            args.anon_key.unwrap_or(env_key),
        );
        cfg.bucket = args.bucket.unwrap_or(env_bucket);
        cfg.site_origin = args.site_origin.or(env_origin);
        cfg
    }

    /// Check the two required values before anything talks to the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::MissingAnonKey);
        }
        let parsed = Url::parse(self.url.trim()).map_err(|err| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme `{}`", parsed.scheme()),
            });
        }
        Ok(())
    }

    /// Endpoint without a trailing slash, ready for path concatenation.
    pub fn base_url(&self) -> &str {
        self.url.trim().trim_end_matches('/')
    }

    /// Password-reset landing page. Always on the configured site origin.
    pub fn reset_redirect(&self) -> Option<String> {
        self.site_origin
            .as_deref()
            .map(|origin| format!("{}{}", origin.trim_end_matches('/'), RESET_REDIRECT_PATH))
    }
}
