//! Adapter registry
//!
//! Lookup table from source-type tag to adapter implementation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;
use crate::error::SyncError;
use crate::models::SourceType;
use crate::service_account::AccessTokenProvider;

use super::{FacebookAdsAdapter, GoogleAdsAdapter, GoogleSheetsAdapter, SourceAdapter};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("unsupported source '{source_type}': no adapter is registered")]
    Unsupported { source_type: String },
}

impl From<RegistryError> for SyncError {
    fn from(err: RegistryError) -> Self {
        SyncError::configuration(err.to_string())
    }
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every adapter the configuration can support. The spreadsheet adapter needs the
    /// service identity and is skipped without one.
    pub fn from_config(
        config: &AppConfig,
        service_identity: Option<Arc<dyn AccessTokenProvider>>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FacebookAdsAdapter::new(
            &config.providers.facebook_graph_base,
            &config.providers.facebook_graph_version,
        )));

        match config.providers.google_ads_developer_token.clone() {
            Some(token) => registry.register(Arc::new(GoogleAdsAdapter::new(
                &config.providers.google_ads_api_base,
                &config.providers.google_ads_api_version,
                token,
            ))),
            None => warn!("Google Ads adapter not registered: missing developer token"),
        }

        match service_identity {
            Some(tokens) => registry.register(Arc::new(GoogleSheetsAdapter::new(
                &config.providers.sheets_api_base,
                &config.providers.drive_api_base,
                tokens,
            ))),
            None => warn!("Google Sheets adapter not registered: no service identity"),
        }

        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source_type(), adapter);
    }

    pub fn get(&self, source_type: SourceType) -> Result<Arc<dyn SourceAdapter>, RegistryError> {
        self.adapters
            .get(&source_type)
            .cloned()
            .ok_or_else(|| RegistryError::Unsupported {
                source_type: source_type.to_string(),
            })
    }

    /// Registered source types, sorted by tag.
    pub fn source_types(&self) -> Vec<SourceType> {
        let mut types: Vec<_> = self.adapters.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}
