//! # Credential Store
//!
//! `get` and `refresh` for delegated-authorization credentials. Refreshes go through the
//! provider's OAuth token endpoint and are persisted in place; a failed refresh leaves the stored
//! credential untouched.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, RefreshToken, RequestTokenError, TokenResponse, TokenUrl};
use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::{AppConfig, OAuthClientConfig};
use crate::crypto::{CryptoError, CryptoKey, open_token, seal_token};
use crate::error::SyncError;
use crate::models::credential::Model as CredentialModel;
use crate::repositories::credential::{CredentialRepository, SealedTokens};

/// Decrypted credential for one linked identity.
#[derive(Clone)]
pub struct Credential {
    pub identity: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("provider", &self.provider)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// A token whose expiry is at or before `now` must be refreshed before use.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential is linked for identity '{identity}'")]
    NotFound { identity: String },
    #[error("credential for '{identity}' has no refresh token; re-authorization is required")]
    NoRefreshToken { identity: String },
    #[error("provider rejected the refresh for '{identity}': {reason}")]
    Rejected { identity: String, reason: String },
    #[error("refresh for '{identity}' failed temporarily: {reason}")]
    Transient { identity: String, reason: String },
    #[error("no OAuth client is configured for provider '{provider}'")]
    ProviderNotConfigured { provider: String },
    #[error("credential token could not be decrypted: {0}")]
    Crypto(#[from] CryptoError),
    #[error("credential storage failed: {0}")]
    Database(#[from] DbErr),
}

impl CredentialError {
    /// Transient failures may succeed on the next scheduled attempt without user action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CredentialError::Transient { .. } | CredentialError::Database(_)
        )
    }
}

impl From<CredentialError> for SyncError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Transient { .. } => SyncError::transient(format!(
                "{err}; the next scheduled run will retry"
            )),
            CredentialError::Database(_) => SyncError::internal(err.to_string()),
            _ => SyncError::unauthorized(err.to_string()),
        }
    }
}

pub struct CredentialStore {
    repo: CredentialRepository,
    key: CryptoKey,
    clients: HashMap<String, OAuthClientConfig>,
    http: reqwest::Client,
    /// Serializes refreshes per identity so concurrent syncs sharing a credential refresh once.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CredentialStore {
    pub fn new(
        db: DatabaseConnection,
        key: CryptoKey,
        clients: HashMap<String, OAuthClientConfig>,
    ) -> Result<Self, reqwest::Error> {
        // Token endpoints must not redirect (RFC 6749 section 3.2).
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            repo: CredentialRepository::new(db),
            key,
            clients,
            http,
            refresh_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Builds a store with the `google` and `facebook` OAuth clients from configuration.
    pub fn from_config(
        db: DatabaseConnection,
        key: CryptoKey,
        config: &AppConfig,
    ) -> Result<Self, reqwest::Error> {
        let clients = HashMap::from([
            ("google".to_string(), config.google_oauth.clone()),
            ("facebook".to_string(), config.facebook_oauth.clone()),
        ]);
        Self::new(db, key, clients)
    }

    /// Loads and decrypts the credential for `identity`.
    pub async fn get(&self, identity: &str) -> Result<Credential, CredentialError> {
        let model = self
            .repo
            .find_by_identity(identity)
            .await?
            .ok_or_else(|| CredentialError::NotFound {
                identity: identity.to_string(),
            })?;
        self.decrypt(&model)
    }

    /// Stores a credential obtained by the authorization handshake.
    pub async fn store(
        &self,
        identity: &str,
        provider: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Credential, CredentialError> {
        let tokens = SealedTokens {
            access_token: seal_token(&self.key, identity, provider, access_token)?,
            refresh_token: refresh_token
                .map(|token| seal_token(&self.key, identity, provider, token))
                .transpose()?,
            expires_at,
        };
        let model = self.repo.upsert(identity, provider, tokens, None).await?;
        self.decrypt(&model)
    }

    /// Returns a usable credential, refreshing it first if it has expired.
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn get_fresh(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Credential, CredentialError> {
        let credential = self.get(identity).await?;
        if !credential.is_expired(now) {
            return Ok(credential);
        }

        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let result = {
            let _guard = lock.lock().await;
            // Another sync may have refreshed while we waited.
            match self.get(identity).await {
                Ok(current) if !current.is_expired(now) => Ok(current),
                Ok(current) => self.refresh(&current).await,
                Err(err) => Err(err),
            }
        };

        let mut locks = self.refresh_locks.lock().await;
        // Only the map and this call still hold the lock: nobody is waiting on it.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(identity);
        }
        result
    }

    /// Identities with a refresh in progress or waiting on one.
    pub async fn refreshes_in_flight(&self) -> usize {
        self.refresh_locks.lock().await.len()
    }

    /// Exchanges the refresh token for a new access token and persists the result.
    #[instrument(skip(self, credential), fields(identity = %credential.identity, provider = %credential.provider))]
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError> {
        let identity = credential.identity.clone();
        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            counter!("credential_refresh_total", "outcome" => "no_refresh_token").increment(1);
            return Err(CredentialError::NoRefreshToken { identity });
        };

        let client_config = self.clients.get(&credential.provider).ok_or_else(|| {
            CredentialError::ProviderNotConfigured {
                provider: credential.provider.clone(),
            }
        })?;
        let client_id = client_config.client_id.clone().ok_or_else(|| {
            CredentialError::ProviderNotConfigured {
                provider: credential.provider.clone(),
            }
        })?;
        let token_url = TokenUrl::new(client_config.token_url.clone()).map_err(|e| {
            CredentialError::Rejected {
                identity: identity.clone(),
                reason: format!("invalid token URL: {e}"),
            }
        })?;

        let mut client = BasicClient::new(ClientId::new(client_id)).set_token_uri(token_url);
        if let Some(secret) = client_config.client_secret.clone() {
            client = client.set_client_secret(ClientSecret::new(secret));
        }

        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await;

        let token = match response {
            Ok(token) => token,
            Err(err) => {
                let classified = classify_refresh_error(&identity, err);
                let outcome = if classified.is_transient() {
                    "transient"
                } else {
                    "rejected"
                };
                counter!("credential_refresh_total", "outcome" => outcome).increment(1);
                warn!(error = %classified, "Credential refresh failed");
                return Err(classified);
            }
        };

        let expires_at = token
            .expires_in()
            .and_then(|ttl| Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);
        let access_token = token.access_token().secret().to_string();
        let rotated_refresh = token.refresh_token().map(|t| t.secret().to_string());

        let tokens = SealedTokens {
            access_token: seal_token(&self.key, &identity, &credential.provider, &access_token)?,
            refresh_token: rotated_refresh
                .as_deref()
                .map(|t| seal_token(&self.key, &identity, &credential.provider, t))
                .transpose()?,
            expires_at,
        };

        let existing = self
            .repo
            .find_by_identity(&identity)
            .await?
            .ok_or_else(|| CredentialError::NotFound {
                identity: identity.clone(),
            })?;
        self.repo.update_tokens(existing, tokens).await?;

        counter!("credential_refresh_total", "outcome" => "refreshed").increment(1);
        info!(expires_at = ?expires_at, "Credential refreshed");

        Ok(Credential {
            identity,
            provider: credential.provider.clone(),
            access_token,
            refresh_token: rotated_refresh.or_else(|| credential.refresh_token.clone()),
            expires_at,
        })
    }

    fn decrypt(&self, model: &CredentialModel) -> Result<Credential, CredentialError> {
        let access_token = open_token(
            &self.key,
            &model.identity,
            &model.provider,
            &model.access_token_ciphertext,
        )?;
        let refresh_token = model
            .refresh_token_ciphertext
            .as_deref()
            .map(|sealed| open_token(&self.key, &model.identity, &model.provider, sealed))
            .transpose()?;

        Ok(Credential {
            identity: model.identity.clone(),
            provider: model.provider.clone(),
            access_token,
            refresh_token,
            expires_at: model.expires_at.map(|t| t.with_timezone(&Utc)),
        })
    }
}

fn classify_refresh_error<RE, T>(
    identity: &str,
    err: RequestTokenError<RE, T>,
) -> CredentialError
where
    RE: std::error::Error + 'static,
    T: oauth2::ErrorResponse + 'static,
{
    let identity = identity.to_string();
    match err {
        RequestTokenError::ServerResponse(response) => {
            let description = serde_json::to_value(&response)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_else(|| "unknown_error".to_string());
            if is_permanent_oauth_error(&description) {
                CredentialError::Rejected {
                    identity,
                    reason: description,
                }
            } else {
                CredentialError::Transient {
                    identity,
                    reason: description,
                }
            }
        }
        RequestTokenError::Request(e) => CredentialError::Transient {
            identity,
            reason: format!("token endpoint unreachable: {e}"),
        },
        RequestTokenError::Parse(e, _) => CredentialError::Transient {
            identity,
            reason: format!("unexpected token endpoint response: {e}"),
        },
        RequestTokenError::Other(message) => CredentialError::Transient {
            identity,
            reason: message,
        },
    }
}

/// OAuth error codes that will not succeed on retry without re-authorization.
fn is_permanent_oauth_error(code: &str) -> bool {
    matches!(
        code,
        "invalid_grant"
            | "invalid_client"
            | "unauthorized_client"
            | "invalid_request"
            | "invalid_scope"
            | "unsupported_grant_type"
    )
}
