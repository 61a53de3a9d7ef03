//! # Credential Repository
//!
//! Persistence for delegated-authorization credentials. Token columns are opaque sealed bytes;
//! encryption happens in [`crate::credential_store`].

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::credential::{ActiveModel, Column, Entity, Model};

/// Sealed token material for one credential row.
#[derive(Debug, Clone)]
pub struct SealedTokens {
    pub access_token: Vec<u8>,
    pub refresh_token: Option<Vec<u8>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct CredentialRepository {
    db: DatabaseConnection,
}

impl CredentialRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_identity(&self, identity: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::Identity.eq(identity))
            .one(&self.db)
            .await
    }

    /// Inserts or replaces the credential for `identity`.
    pub async fn upsert(
        &self,
        identity: &str,
        provider: &str,
        tokens: SealedTokens,
        scopes: Option<JsonValue>,
    ) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();

        match self.find_by_identity(identity).await? {
            Some(existing) => {
                let mut active = existing.into_active_model();
                active.provider = Set(provider.to_string());
                active.access_token_ciphertext = Set(tokens.access_token);
                active.refresh_token_ciphertext = Set(tokens.refresh_token);
                active.expires_at = Set(tokens.expires_at.map(|t| t.fixed_offset()));
                active.scopes = Set(scopes);
                active.updated_at = Set(now);
                active.update(&self.db).await
            }
            None => {
                ActiveModel {
                    id: Set(Uuid::new_v4()),
                    identity: Set(identity.to_string()),
                    provider: Set(provider.to_string()),
                    access_token_ciphertext: Set(tokens.access_token),
                    refresh_token_ciphertext: Set(tokens.refresh_token),
                    expires_at: Set(tokens.expires_at.map(|t| t.fixed_offset())),
                    scopes: Set(scopes),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&self.db)
                .await
            }
        }
    }

    /// Replaces tokens after a refresh. A `None` refresh token keeps the stored one.
    pub async fn update_tokens(&self, existing: Model, tokens: SealedTokens) -> Result<Model, DbErr> {
        let mut active = existing.into_active_model();
        active.access_token_ciphertext = Set(tokens.access_token);
        if let Some(refresh) = tokens.refresh_token {
            active.refresh_token_ciphertext = Set(Some(refresh));
        }
        active.expires_at = Set(tokens.expires_at.map(|t| t.fixed_offset()));
        active.updated_at = Set(Utc::now().fixed_offset());

        active.update(&self.db).await.map_err(|e| {
            tracing::error!("Failed to persist refreshed credential: {}", e);
            e
        })
    }
}
