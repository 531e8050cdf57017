//! One backend handle per provider, built on first use.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::{
    backend::{Backend, BackendResult, http::HttpBackend},
    config::BackendConfig,
    errors::ProviderError,
};

/// Shared, read-only handle to the remote backend.
pub type BackendHandle = Arc<dyn Backend>;

type Connector = Box<dyn Fn(&BackendConfig) -> BackendResult<BackendHandle> + Send + Sync>;

/// Builds the backend handle exactly once and hands out clones of it.
///
/// Concurrent first calls to [`initialize`](Self::initialize) race on a
/// one-time cell; only one of them runs the connector.
pub struct ClientProvider {
    config: BackendConfig,
    connector: Connector,
    handle: OnceCell<BackendHandle>,
}

impl ClientProvider {
    /// Provider that connects over HTTP.
    pub fn new(config: BackendConfig) -> Self {
        Self::with_connector(config, |cfg| {
            Ok(Arc::new(HttpBackend::new(cfg)?) as BackendHandle)
        })
    }

    /// Provider with a custom way of building the backend.
    pub fn with_connector<F>(config: BackendConfig, connector: F) -> Self
    where
        F: Fn(&BackendConfig) -> BackendResult<BackendHandle> + Send + Sync + 'static,
    {
        Self {
            config,
            connector: Box::new(connector),
            handle: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Validate the configuration and build the handle, or return the one
    /// built earlier.
    pub async fn initialize(&self) -> Result<BackendHandle, ProviderError> {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                self.config.validate()?;
                let handle = (self.connector)(&self.config)?;
                info!(url = %self.config.base_url(), "backend client initialized");
                Ok::<_, ProviderError>(handle)
            })
            .await?;
        Ok(handle.clone())
    }

    /// The handle built by a successful [`initialize`](Self::initialize).
    pub fn handle(&self) -> Result<BackendHandle, ProviderError> {
        self.handle.get().cloned().ok_or(ProviderError::Uninitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::memory::MemoryBackend, errors::ConfigError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_provider(config: BackendConfig) -> (ClientProvider, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let provider = ClientProvider::with_connector(config, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryBackend::new()) as BackendHandle)
        });
        (provider, calls)
    }

    #[tokio::test]
    async fn initialize_is_memoized() {
        let (provider, calls) =
            counting_provider(BackendConfig::new("https://x.example.com", "anon"));

        let first = provider.initialize().await.unwrap();
        let second = provider.initialize().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &provider.handle().unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_initialization_connects_once() {
        let (provider, calls) =
            counting_provider(BackendConfig::new("https://x.example.com", "anon"));

        let (a, b) = tokio::join!(provider.initialize(), provider.initialize());

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_config_fails_before_connecting() {
        let (provider, calls) = counting_provider(BackendConfig::new("", "anon"));
        let err = provider.initialize().await.err().unwrap();
        assert!(matches!(err, ProviderError::Config(ConfigError::MissingUrl)));

        let (provider, calls_b) =
            counting_provider(BackendConfig::new("https://x.example.com", " "));
        let err = provider.initialize().await.err().unwrap();
        assert!(matches!(err, ProviderError::Config(ConfigError::MissingAnonKey)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(calls_b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_before_initialize_is_an_error() {
        let (provider, _) = counting_provider(BackendConfig::new("https://x.example.com", "anon"));
        assert!(matches!(provider.handle(), Err(ProviderError::Uninitialized)));
    }

    #[tokio::test]
    async fn http_provider_builds_without_network() {
        let provider = ClientProvider::new(BackendConfig::new("https://x.example.com", "anon"));
        assert!(provider.initialize().await.is_ok());
    }
}
