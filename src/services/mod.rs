//! Facades over the backend handle.
//!
//! Each service owns a clone of the same [`BackendHandle`] and nothing else;
//! no service calls another.

pub mod auth_service;
pub mod catalog_service;
pub mod client_provider;
pub mod storage_service;

use crate::config::BackendConfig;
use auth_service::SessionService;
use catalog_service::CatalogService;
use client_provider::BackendHandle;
use storage_service::StorageService;

/// All facades wired to one backend handle.
#[derive(Clone)]
pub struct Storefront {
    pub auth: SessionService,
    pub catalog: CatalogService,
    pub storage: StorageService,
}

impl Storefront {
    pub fn new(handle: BackendHandle, config: &BackendConfig) -> Self {
        Self {
            auth: SessionService::new(handle.clone(), config),
            catalog: CatalogService::new(handle.clone(), config),
            storage: StorageService::new(handle, config),
        }
    }
}
