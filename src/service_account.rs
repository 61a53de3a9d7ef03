//! Service identity tokens for the warehouse and spreadsheet APIs.
//!
//! Unlike delegated credentials these belong to the service itself: a service-account key signs a
//! JWT bearer assertion that the token endpoint exchanges for a short-lived access token.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::SyncError;

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECONDS: i64 = 3_600;
const EXPIRY_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Error)]
pub enum ServiceAccountError {
    #[error("failed to read service account key {path}: {source}")]
    ReadKey {
        path: String,
        source: std::io::Error,
    },
    #[error("service account key is not valid JSON: {0}")]
    ParseKey(#[from] serde_json::Error),
    #[error("service account private key is invalid: {0}")]
    InvalidPrivateKey(jsonwebtoken::errors::Error),
    #[error("failed to sign token assertion: {0}")]
    Sign(jsonwebtoken::errors::Error),
    #[error("token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("no service identity is configured")]
    NotConfigured,
}

impl From<ServiceAccountError> for SyncError {
    fn from(err: ServiceAccountError) -> Self {
        match err {
            ServiceAccountError::Http(_) => SyncError::transient(err.to_string()),
            ServiceAccountError::TokenEndpoint { status, .. } if status >= 500 => {
                SyncError::transient(err.to_string())
            }
            _ => SyncError::unauthorized(format!("service identity: {err}")),
        }
    }
}

/// Supplies bearer tokens for the service identity.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, ServiceAccountError>;

    /// Email of the service identity, used for sheet permission checks.
    fn service_email(&self) -> Option<&str>;
}

/// The subset of a Google service-account JSON key used here.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, ServiceAccountError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ServiceAccountError::ReadKey {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges signed assertions for access tokens and caches them until shortly before expiry.
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scopes: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(key: ServiceAccountKey, scopes: &[&str]) -> Result<Self, ServiceAccountError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(ServiceAccountError::InvalidPrivateKey)?;
        Ok(Self {
            key,
            encoding_key,
            scopes: scopes.join(" "),
            http: reqwest::Client::new(),
            cached: Mutex::new(None),
        })
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, ServiceAccountError> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scopes,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_TTL_SECONDS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(ServiceAccountError::Sign)
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, ServiceAccountError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(EXPIRY_LEEWAY_SECONDS) > now {
                return Ok(token.token.clone());
            }
        }

        let assertion = self.sign_assertion(now)?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceAccountError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenEndpointResponse = response.json().await?;
        let expires_at = now + Duration::seconds(parsed.expires_in.unwrap_or(ASSERTION_TTL_SECONDS));
        *cached = Some(CachedToken {
            token: parsed.access_token.clone(),
            expires_at,
        });
        tracing::debug!(service_email = %self.key.client_email, "Service identity token issued");

        Ok(parsed.access_token)
    }

    fn service_email(&self) -> Option<&str> {
        Some(&self.key.client_email)
    }
}

/// Fixed token for local runs and tests.
pub struct StaticTokenProvider {
    token: String,
    email: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, email: Option<String>) -> Self {
        Self {
            token: token.into(),
            email,
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, ServiceAccountError> {
        Ok(self.token.clone())
    }

    fn service_email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

/// Picks the service identity: a key file if configured, otherwise a static token on local
/// profiles.
pub fn provider_from_config(
    config: &AppConfig,
) -> Result<Arc<dyn AccessTokenProvider>, ServiceAccountError> {
    if let Some(path) = config.service_account.key_path.as_deref() {
        let key = ServiceAccountKey::from_file(path)?;
        let source = ServiceAccountTokenSource::new(
            key,
            &[BIGQUERY_SCOPE, SPREADSHEETS_SCOPE, DRIVE_READONLY_SCOPE],
        )?;
        return Ok(Arc::new(source));
    }

    match config.service_account.static_token.as_deref() {
        Some(token) if config.is_local_profile() => Ok(Arc::new(StaticTokenProvider::new(
            token,
            config.service_account.email.clone(),
        ))),
        _ => Err(ServiceAccountError::NotConfigured),
    }
}
