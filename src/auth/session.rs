// Signed-in user state, restored from the stored token at start-up.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::client::ApiClient;
use crate::bootstrap::sequencer::SessionRestorer;

pub const CURRENT_USER_ENDPOINT: &str = "/auth/me";

/// Holds the current user as last returned by the server.
pub struct UserSession {
    client: Arc<ApiClient>,
    endpoint: String,
    user: RwLock<Option<Value>>,
}

impl UserSession {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self::with_endpoint(client, CURRENT_USER_ENDPOINT)
    }

    pub fn with_endpoint(client: Arc<ApiClient>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            user: RwLock::new(None),
        }
    }

    pub fn user(&self) -> Option<Value> {
        self.user.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.read().is_some()
    }

    /// Forget the user and the stored token.
    pub fn sign_out(&self) -> Result<()> {
        *self.user.write() = None;
        self.client.tokens().clear_token()?;
        self.client.clear_cache();
        Ok(())
    }
}

#[async_trait]
impl SessionRestorer for UserSession {
    async fn fetch_current_user(&self) -> Result<()> {
        match self.client.get_fresh::<Value>(&self.endpoint).await {
            Ok(user) => {
                debug!("current user restored");
                *self.user.write() = Some(user);
                Ok(())
            }
            Err(e) => {
                warn!("fetch current user failed: {}", e);
                *self.user.write() = None;
                Err(e.into())
            }
        }
    }
}
