//! Security gateway client — credential issuance and identity lookup
//!
//! Thin wrapper over the engine's `/provider/<prefix>/<version>/auth` and
//! `/s2skey` endpoints. Every failure is reported as `SecurityGateway`
//! naming the operation and the provider.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::engine::EngineClient;
use crate::error::{ProviderError, Result};
use crate::types::{CreateKeyRequest, S2sKey, UserInfo};

/// Credential API scoped to one provider, authenticated with one key
#[derive(Debug, Clone)]
pub struct SecurityApi {
    client: EngineClient,
    prefix: String,
    version: String,
}

impl SecurityApi {
    pub fn new(client: EngineClient, prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    /// Key this API authenticates with
    pub fn key(&self) -> &str {
        self.client.s2s_key()
    }

    /// Who the authenticating key belongs to
    pub async fn user_info(&self) -> Result<UserInfo> {
        self.call("get user info", Method::GET, "auth/user_info", None)
            .await
    }

    pub async fn list_keys(&self) -> Result<Vec<S2sKey>> {
        self.call("list keys", Method::GET, "s2skey", None).await
    }

    pub async fn create_key(&self, request: &CreateKeyRequest) -> Result<S2sKey> {
        let body = serde_json::to_value(request)?;
        self.call("create key", Method::POST, "s2skey", Some(body))
            .await
    }

    pub async fn deactivate_key(&self, key: &str) -> Result<()> {
        let body = json!({ "key": key, "active": false });
        self.send("deactivate key", Method::PUT, "s2skey", Some(body))
            .await?;
        tracing::info!(provider = %self.prefix, "S2S key deactivated");
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let response = self.send(operation, method, path, body).await?;
        response
            .json()
            .await
            .map_err(|e| self.failure(operation, e.to_string(), None))
    }

    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let path = format!("/provider/{}/{}/{}", self.prefix, self.version, path);
        let mut request = self.client.request(method, &path);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.failure(operation, e.to_string(), None))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.failure(operation, text, Some(status.as_u16())));
        }
        Ok(response)
    }

    fn failure(&self, operation: &str, cause: String, status: Option<u16>) -> ProviderError {
        tracing::warn!(
            provider = %self.prefix,
            operation,
            status,
            cause = %cause,
            "Security API call failed"
        );
        ProviderError::SecurityGateway {
            message: format!(
                "Cannot {} for provider {}/{}: {}",
                operation, self.prefix, self.version, cause
            ),
            status,
        }
    }
}
