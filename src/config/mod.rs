//! Configuration loading for the sync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `ADSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "ADSYNC_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `ADSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default = "OAuthClientConfig::google")]
    pub google_oauth: OAuthClientConfig,
    #[serde(default = "OAuthClientConfig::facebook")]
    pub facebook_oauth: OAuthClientConfig,
    #[serde(default)]
    pub providers: ProviderApiConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub service_account: ServiceAccountConfig,
}

/// Schedule matcher and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// Offset of the wall clock that connection schedules are written in.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Per-attempt limits for the sync executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    #[serde(default = "default_max_run_seconds")]
    pub max_run_seconds: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

/// OAuth client used to refresh delegated credentials for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OAuthClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub token_url: String,
}

/// Base URLs and versions of the upstream reporting APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ProviderApiConfig {
    pub facebook_graph_base: String,
    pub facebook_graph_version: String,
    pub google_ads_api_base: String,
    pub google_ads_api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_ads_developer_token: Option<String>,
    pub sheets_api_base: String,
    pub drive_api_base: String,
}

/// BigQuery project and load-job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WarehouseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub api_base: String,
    pub upload_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub poll_interval_ms: u64,
    pub job_deadline_seconds: u64,
}

/// Service identity used for the warehouse and spreadsheet APIs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ServiceAccountConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// Fixed bearer token; only honoured for local and test profiles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            scheduler: SchedulerConfig::default(),
            sync: SyncConfig::default(),
            google_oauth: OAuthClientConfig::google(),
            facebook_oauth: OAuthClientConfig::facebook(),
            providers: ProviderApiConfig::default(),
            warehouse: WarehouseConfig::default(),
            service_account: ServiceAccountConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_tick_interval_seconds(),
            utc_offset_minutes: 0,
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_run_seconds: default_max_run_seconds(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl OAuthClientConfig {
    pub fn google() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }

    pub fn facebook() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: "https://graph.facebook.com/v19.0/oauth/access_token".to_string(),
        }
    }
}

impl Default for ProviderApiConfig {
    fn default() -> Self {
        Self {
            facebook_graph_base: "https://graph.facebook.com".to_string(),
            facebook_graph_version: "v19.0".to_string(),
            google_ads_api_base: "https://googleads.googleapis.com".to_string(),
            google_ads_api_version: "v17".to_string(),
            google_ads_developer_token: None,
            sheets_api_base: "https://sheets.googleapis.com".to_string(),
            drive_api_base: "https://www.googleapis.com".to_string(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            api_base: "https://bigquery.googleapis.com".to_string(),
            upload_base: "https://bigquery.googleapis.com/upload".to_string(),
            location: None,
            poll_interval_ms: 1_000,
            job_deadline_seconds: 600,
        }
    }
}

impl SchedulerConfig {
    /// Validate matcher tick and worker pool bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 10 || self.tick_interval_seconds > 300 {
            return Err(ConfigError::InvalidSchedulerTickInterval {
                value: self.tick_interval_seconds,
            });
        }
        if !(-720..=840).contains(&self.utc_offset_minutes) {
            return Err(ConfigError::InvalidUtcOffset {
                value: self.utc_offset_minutes,
            });
        }
        if self.workers == 0 || self.workers > 64 {
            return Err(ConfigError::InvalidWorkerCount {
                value: self.workers,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        Ok(())
    }
}

impl SyncConfig {
    /// Validate attempt ceiling and retry policy bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_run_seconds < 60 || self.max_run_seconds > 21_600 {
            return Err(ConfigError::InvalidMaxRunSeconds {
                value: self.max_run_seconds,
            });
        }
        if self.retry_max_attempts == 0 || self.retry_max_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts {
                value: self.retry_max_attempts,
            });
        }
        if self.retry_base_delay_ms > 300_000 {
            return Err(ConfigError::InvalidRetryBaseDelay {
                value: self.retry_base_delay_ms,
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(REDACTED.as_bytes().to_vec());
        }
        for oauth in [&mut config.google_oauth, &mut config.facebook_oauth] {
            if oauth.client_secret.is_some() {
                oauth.client_secret = Some(REDACTED.to_string());
            }
        }
        if config.providers.google_ads_developer_token.is_some() {
            config.providers.google_ads_developer_token = Some(REDACTED.to_string());
        }
        if config.service_account.static_token.is_some() {
            config.service_account.static_token = Some(REDACTED.to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    fn endpoints(&self) -> [(&'static str, &str); 8] {
        [
            ("GOOGLE_TOKEN_URL", self.google_oauth.token_url.as_str()),
            ("FACEBOOK_TOKEN_URL", self.facebook_oauth.token_url.as_str()),
            ("FACEBOOK_GRAPH_BASE", self.providers.facebook_graph_base.as_str()),
            ("GOOGLE_ADS_API_BASE", self.providers.google_ads_api_base.as_str()),
            ("SHEETS_API_BASE", self.providers.sheets_api_base.as_str()),
            ("DRIVE_API_BASE", self.providers.drive_api_base.as_str()),
            ("WAREHOUSE_API_BASE", self.warehouse.api_base.as_str()),
            ("WAREHOUSE_UPLOAD_BASE", self.warehouse.upload_base.as_str()),
        ]
    }

    /// True for profiles that may run without real upstream credentials.
    pub fn is_local_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if !self.is_local_profile() {
            if self.warehouse.project_id.is_none() {
                return Err(ConfigError::MissingWarehouseProject);
            }
            if self.service_account.key_path.is_none() {
                return Err(ConfigError::MissingServiceIdentity);
            }
        }

        if self.warehouse.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        for (key, value) in self.endpoints() {
            validate_endpoint(key, value)?;
        }

        self.scheduler.validate()?;
        self.sync.validate()?;

        Ok(())
    }
}

fn validate_endpoint(key: &'static str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        _ => Err(ConfigError::InvalidEndpoint {
            key,
            value: value.to_string(),
        }),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://adsync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_tick_interval_seconds() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_run_seconds() -> u64 {
    1_800
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    5_000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for ADSYNC_{key}")]
    InvalidValue { key: String, value: String },
    #[error("crypto key is missing; set ADSYNC_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("warehouse project is missing; set ADSYNC_WAREHOUSE_PROJECT_ID")]
    MissingWarehouseProject,
    #[error("service identity is missing; set ADSYNC_SERVICE_ACCOUNT_KEY_PATH")]
    MissingServiceIdentity,
    #[error("ADSYNC_{key} must be an absolute http(s) URL, got '{value}'")]
    InvalidEndpoint { key: &'static str, value: String },
    #[error("warehouse job poll interval must be positive")]
    InvalidPollInterval,
    #[error("scheduler tick interval must be between 10 and 300 seconds, got {value}")]
    InvalidSchedulerTickInterval { value: u64 },
    #[error("scheduler UTC offset must be between -720 and 840 minutes, got {value}")]
    InvalidUtcOffset { value: i32 },
    #[error("worker count must be between 1 and 64, got {value}")]
    InvalidWorkerCount { value: usize },
    #[error("dispatch queue capacity must be positive")]
    InvalidQueueCapacity,
    #[error("sync attempt ceiling must be between 60 and 21600 seconds, got {value}")]
    InvalidMaxRunSeconds { value: u64 },
    #[error("retry attempts must be between 1 and 10, got {value}")]
    InvalidRetryAttempts { value: u32 },
    #[error("retry base delay must not exceed 300000 ms, got {value}")]
    InvalidRetryBaseDelay { value: u64 },
}

/// Loads configuration using layered `.env` files and `ADSYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`, then the process
    /// environment, and validates the result.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let defaults = AppConfig::default();

        let crypto_key = match take(&mut layered, "CRYPTO_KEY") {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(key_str.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let scheduler = SchedulerConfig {
            tick_interval_seconds: take_parsed(
                &mut layered,
                "SCHEDULER_TICK_INTERVAL_SECONDS",
                defaults.scheduler.tick_interval_seconds,
            )?,
            utc_offset_minutes: take_parsed(
                &mut layered,
                "SCHEDULER_UTC_OFFSET_MINUTES",
                defaults.scheduler.utc_offset_minutes,
            )?,
            workers: take_parsed(&mut layered, "SCHEDULER_WORKERS", defaults.scheduler.workers)?,
            queue_capacity: take_parsed(
                &mut layered,
                "SCHEDULER_QUEUE_CAPACITY",
                defaults.scheduler.queue_capacity,
            )?,
        };

        let sync = SyncConfig {
            max_run_seconds: take_parsed(
                &mut layered,
                "SYNC_MAX_RUN_SECONDS",
                defaults.sync.max_run_seconds,
            )?,
            retry_max_attempts: take_parsed(
                &mut layered,
                "SYNC_RETRY_MAX_ATTEMPTS",
                defaults.sync.retry_max_attempts,
            )?,
            retry_base_delay_ms: take_parsed(
                &mut layered,
                "SYNC_RETRY_BASE_DELAY_MS",
                defaults.sync.retry_base_delay_ms,
            )?,
        };

        let google_oauth = OAuthClientConfig {
            client_id: take(&mut layered, "GOOGLE_CLIENT_ID"),
            client_secret: take(&mut layered, "GOOGLE_CLIENT_SECRET"),
            token_url: take_or(&mut layered, "GOOGLE_TOKEN_URL", defaults.google_oauth.token_url),
        };
        let facebook_oauth = OAuthClientConfig {
            client_id: take(&mut layered, "FACEBOOK_APP_ID"),
            client_secret: take(&mut layered, "FACEBOOK_APP_SECRET"),
            token_url: take_or(
                &mut layered,
                "FACEBOOK_TOKEN_URL",
                defaults.facebook_oauth.token_url,
            ),
        };

        let provider_defaults = defaults.providers;
        let providers = ProviderApiConfig {
            facebook_graph_base: take_or(
                &mut layered,
                "FACEBOOK_GRAPH_BASE",
                provider_defaults.facebook_graph_base,
            ),
            facebook_graph_version: take_or(
                &mut layered,
                "FACEBOOK_GRAPH_VERSION",
                provider_defaults.facebook_graph_version,
            ),
            google_ads_api_base: take_or(
                &mut layered,
                "GOOGLE_ADS_API_BASE",
                provider_defaults.google_ads_api_base,
            ),
            google_ads_api_version: take_or(
                &mut layered,
                "GOOGLE_ADS_API_VERSION",
                provider_defaults.google_ads_api_version,
            ),
            google_ads_developer_token: take(&mut layered, "GOOGLE_ADS_DEVELOPER_TOKEN"),
            sheets_api_base: take_or(
                &mut layered,
                "SHEETS_API_BASE",
                provider_defaults.sheets_api_base,
            ),
            drive_api_base: take_or(&mut layered, "DRIVE_API_BASE", provider_defaults.drive_api_base),
        };

        let warehouse_defaults = defaults.warehouse;
        let warehouse = WarehouseConfig {
            project_id: take(&mut layered, "WAREHOUSE_PROJECT_ID"),
            api_base: take_or(&mut layered, "WAREHOUSE_API_BASE", warehouse_defaults.api_base),
            upload_base: take_or(
                &mut layered,
                "WAREHOUSE_UPLOAD_BASE",
                warehouse_defaults.upload_base,
            ),
            location: take(&mut layered, "WAREHOUSE_LOCATION"),
            poll_interval_ms: take_parsed(
                &mut layered,
                "WAREHOUSE_POLL_INTERVAL_MS",
                warehouse_defaults.poll_interval_ms,
            )?,
            job_deadline_seconds: take_parsed(
                &mut layered,
                "WAREHOUSE_JOB_DEADLINE_SECONDS",
                warehouse_defaults.job_deadline_seconds,
            )?,
        };

        let service_account = ServiceAccountConfig {
            key_path: take(&mut layered, "SERVICE_ACCOUNT_KEY_PATH").map(PathBuf::from),
            static_token: take(&mut layered, "SERVICE_ACCOUNT_STATIC_TOKEN"),
            email: take(&mut layered, "SERVICE_ACCOUNT_EMAIL"),
        };

        let config = AppConfig {
            profile: take(&mut layered, "PROFILE").unwrap_or(profile_hint),
            log_level: take_or(&mut layered, "LOG_LEVEL", defaults.log_level),
            log_format: take_or(&mut layered, "LOG_FORMAT", defaults.log_format),
            database_url: take_or(&mut layered, "DATABASE_URL", defaults.database_url),
            db_max_connections: take_parsed(
                &mut layered,
                "DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            db_acquire_timeout_ms: take_parsed(
                &mut layered,
                "DB_ACQUIRE_TIMEOUT_MS",
                defaults.db_acquire_timeout_ms,
            )?,
            crypto_key,
            scheduler,
            sync,
            google_oauth,
            facebook_oauth,
            providers,
            warehouse,
            service_account,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a key, treating blank values as unset.
fn take(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_or(layered: &mut BTreeMap<String, String>, key: &str, default: String) -> String {
    take(layered, key).unwrap_or(default)
}

fn take_parsed<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match take(layered, key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            crypto_key: Some(vec![7u8; 32]),
            ..AppConfig::default()
        }
    }

    #[test]
    fn defaults_validate_for_local_profile() {
        valid_config().validate().expect("defaults are valid");
    }

    #[test]
    fn missing_crypto_key_is_rejected() {
        let config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCryptoKey)
        ));
    }

    #[test]
    fn production_profile_requires_warehouse_and_identity() {
        let mut config = valid_config();
        config.profile = "prod".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingWarehouseProject)
        ));

        config.warehouse.project_id = Some("analytics".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingServiceIdentity)
        ));

        config.service_account.key_path = Some(PathBuf::from("/etc/adsync/sa.json"));
        config.validate().expect("prod config is valid");
    }

    #[test]
    fn endpoints_must_be_http_urls() {
        let mut config = valid_config();
        config.providers.sheets_api_base = "sheets.googleapis.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint { key: "SHEETS_API_BASE", .. })
        ));

        config.providers.sheets_api_base = "http://127.0.0.1:8080".to_string();
        config.validate().expect("local mock endpoint is accepted");
    }

    #[test]
    fn scheduler_bounds_are_enforced() {
        let mut config = valid_config();
        config.scheduler.workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkerCount { value: 0 })
        ));

        let mut config = valid_config();
        config.scheduler.utc_offset_minutes = 900;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUtcOffset { value: 900 })
        ));
    }

    #[test]
    fn retry_attempts_must_be_positive() {
        let mut config = valid_config();
        config.sync.retry_max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryAttempts { value: 0 })
        ));
    }

    #[test]
    fn redacted_json_masks_secrets() {
        let mut config = valid_config();
        config.google_oauth.client_secret = Some("shh".to_string());
        config.providers.google_ads_developer_token = Some("dev-token".to_string());

        let rendered = config.redacted_json().unwrap();
        assert!(!rendered.contains("shh"));
        assert!(!rendered.contains("dev-token"));
        assert!(rendered.contains(REDACTED));
    }
}
