//! ============================================================================
//! Secrets Client — Signed login, placeholder dereferencing
//! ============================================================================
//! The node proves key ownership by signing a timestamped message, trades it
//! for a short-lived bearer token, and resolves secret placeholders from the
//! service. Secret values never reach the logs.
//! ============================================================================

use serde::Serialize;
use serde_json::Value as Json;
use solana_sdk::signature::{Keypair, Signer};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{NodeError, Result};
use crate::keys;

/// Prefix of the message signed during login.
pub const SECRET_MESSAGE_PREFIX: &str = "nosana_secret_";

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub address: String,
    pub signature: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
}

/// Build the login form: `signature = sign("nosana_secret_" ‖ timestamp)`.
pub fn login_request(signer: &Keypair, timestamp: i64, job: Option<&str>) -> LoginRequest {
    let message = format!("{SECRET_MESSAGE_PREFIX}{timestamp}");
    LoginRequest {
        address: signer.pubkey().to_string(),
        signature: keys::sign_message(signer, message.as_bytes()),
        timestamp,
        job: job.map(str::to_string),
    }
}

pub struct SecretsClient {
    http: reqwest::Client,
    endpoint: String,
    token: RwLock<Option<String>>,
}

impl SecretsClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("nosana-node/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            endpoint: endpoint.into(),
            token: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint.trim_end_matches('/'))
    }

    /// Exchange a signed timestamp for a bearer token. Scoping to a job
    /// address grants access to that job's secrets.
    pub async fn login(&self, signer: &Keypair, job: Option<&str>) -> Result<()> {
        let request = login_request(signer, chrono::Utc::now().timestamp(), job);
        debug!(address = %request.address, "secrets login");

        let response = self
            .http
            .post(self.url("/login"))
            .form(&request)
            .send()
            .await
            .map_err(|e| NodeError::Secrets(format!("login: {e}")))?;
        if !response.status().is_success() {
            return Err(NodeError::Secrets(format!(
                "login rejected with status {}",
                response.status()
            )));
        }

        let body: Json = response
            .json()
            .await
            .map_err(|e| NodeError::Secrets(format!("login: {e}")))?;
        let token = body
            .get("token")
            .and_then(Json::as_str)
            .ok_or_else(|| NodeError::Secrets("login: response has no token".into()))?;

        *self.token.write().await = Some(token.to_string());
        info!("secrets login ok");
        Ok(())
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Fetch the full secrets map with the current token.
    async fn fetch_all(&self) -> Result<HashMap<String, Json>> {
        let token = self
            .token
            .read()
            .await
            .clone()
            .ok_or_else(|| NodeError::Secrets("not logged in".into()))?;

        let response = self
            .http
            .get(self.url("/secrets"))
            .header("Authorization", token)
            .send()
            .await
            .map_err(|e| NodeError::Secrets(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NodeError::Secrets(format!(
                "read rejected with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| NodeError::Secrets(e.to_string()))
    }

    /// Resolve one secret. The error names the key, never the value.
    pub async fn get(&self, key: &str) -> Result<Json> {
        let mut secrets = self.fetch_all().await?;
        secrets
            .remove(key)
            .ok_or_else(|| NodeError::SecretMissing(key.to_string()))
    }
}
