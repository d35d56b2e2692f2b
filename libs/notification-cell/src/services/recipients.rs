use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::error::NotificationError;

/// Resolves an owner id to the address notifications go to.
///
/// `Ok(None)` means the owner has no usable address, which is a permanent
/// delivery failure. `Err` means the lookup itself failed and may be retried.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn resolve(&self, owner_id: Uuid) -> Result<Option<String>, NotificationError>;
}

#[derive(Default)]
pub struct StaticRecipientDirectory {
    addresses: RwLock<HashMap<Uuid, String>>,
}

impl StaticRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, owner_id: Uuid, address: impl Into<String>) -> Self {
        self.addresses.get_mut().insert(owner_id, address.into());
        self
    }

    pub async fn insert(&self, owner_id: Uuid, address: impl Into<String>) {
        self.addresses.write().await.insert(owner_id, address.into());
    }
}

#[async_trait]
impl RecipientDirectory for StaticRecipientDirectory {
    async fn resolve(&self, owner_id: Uuid) -> Result<Option<String>, NotificationError> {
        Ok(self.addresses.read().await.get(&owner_id).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct ProfileEmail {
    email: Option<String>,
}

/// Looks up `profiles.email` through PostgREST.
pub struct SupabaseRecipientDirectory {
    supabase: Arc<SupabaseClient>,
    service_key: String,
}

impl SupabaseRecipientDirectory {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(
            Arc::new(SupabaseClient::new(config)),
            config.supabase_service_role_key.clone(),
        )
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, service_key: String) -> Self {
        Self { supabase, service_key }
    }
}

#[async_trait]
impl RecipientDirectory for SupabaseRecipientDirectory {
    async fn resolve(&self, owner_id: Uuid) -> Result<Option<String>, NotificationError> {
        let path = format!("/rest/v1/profiles?id=eq.{}&select=email", owner_id);
        let rows: Vec<ProfileEmail> = self.supabase
            .request(Method::GET, &path, Some(&self.service_key), None)
            .await?;

        let email = rows
            .into_iter()
            .next()
            .and_then(|row| row.email)
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty());

        if email.is_none() {
            debug!("No email on file for owner {}", owner_id);
        }
        Ok(email)
    }
}
