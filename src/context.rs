//! Per-call context handed to procedure handlers

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use serde_json::Value;

use crate::engine::EngineClient;
use crate::error::{InvocationError, Result};
use crate::provider::ProviderRuntime;
use crate::security::SecurityApi;
use crate::store::EntityStore;
use crate::trace::TraceContext;
use crate::types::{Action, Document, Entity, Metadata};

/// Provider identity, inbound headers and outbound accessors for one callback.
///
/// Outbound calls made through the context carry the call's child
/// `traceparent`.
#[derive(Clone)]
pub struct ProceduralCtx {
    runtime: Arc<ProviderRuntime>,
    engine: EngineClient,
    headers: HeaderMap,
    trace: TraceContext,
    operation: String,
}

/// Context passed to intentful handlers
pub type IntentfulCtx = ProceduralCtx;

impl ProceduralCtx {
    pub(crate) fn new(
        runtime: Arc<ProviderRuntime>,
        engine: EngineClient,
        headers: HeaderMap,
        trace: TraceContext,
        operation: String,
    ) -> Self {
        Self {
            runtime,
            engine,
            headers,
            trace,
            operation,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.runtime.prefix
    }

    pub fn version(&self) -> &str {
        &self.runtime.version
    }

    /// Headers of the inbound callback
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Trace context of this call (child of the inbound one)
    pub fn trace_context(&self) -> &TraceContext {
        &self.trace
    }

    /// Operation name, e.g. `moveX_Location_procedure`
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Bearer token the engine forwarded for the invoking user
    pub fn invoking_token(&self) -> Result<String> {
        let value = self
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                InvocationError::unauthorized("No invoking user token in procedure context")
            })?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| InvocationError::unauthorized("Authorization header is not a bearer token"))?;
        Ok(token.to_string())
    }

    /// Engine URL of an entity
    pub fn url_for(&self, entity: &Entity) -> String {
        format!(
            "{}/services/{}/{}/{}/{}",
            self.engine.base_url(),
            self.prefix(),
            self.version(),
            entity.metadata.kind,
            entity.metadata.uuid
        )
    }

    /// Entity store of this provider
    pub fn entity_store(&self) -> Arc<dyn EntityStore> {
        self.runtime.entity_store(&self.engine)
    }

    /// Merge `status` into the stored status of an entity
    pub async fn update_status(&self, metadata: &Metadata, status: Document) -> Result<()> {
        self.entity_store().update_status(metadata, status).await
    }

    /// Ask the engine whether every `(action, entity)` pair is allowed.
    ///
    /// Checks on behalf of `user_token`, or the invoking user when `None`.
    /// Any failure, including a missing token, answers `false`.
    pub async fn check_permission(
        &self,
        checks: &[(Action, Entity)],
        user_token: Option<&str>,
    ) -> bool {
        let token = match user_token {
            Some(token) => token.to_string(),
            None => match self.invoking_token() {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(error = %e, "Permission check without user token");
                    return false;
                }
            },
        };

        let body = Value::Array(
            checks
                .iter()
                .map(|(action, entity)| serde_json::json!([action, entity]))
                .collect(),
        );
        match self
            .engine
            .with_key(token)
            .check_permission(self.prefix(), self.version(), &body)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(error = %e, operation = %self.operation, "Permission check failed");
                false
            }
        }
    }

    /// Credential API authenticated as the provider
    pub fn provider_security_api(&self) -> SecurityApi {
        SecurityApi::new(self.engine.clone(), self.prefix(), self.version())
    }

    /// Credential API authenticated as the holder of `key`
    pub fn user_security_api(&self, key: impl Into<String>) -> SecurityApi {
        SecurityApi::new(self.engine.with_key(key), self.prefix(), self.version())
    }
}

impl std::fmt::Debug for ProceduralCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProceduralCtx")
            .field("prefix", &self.prefix())
            .field("version", &self.version())
            .field("operation", &self.operation)
            .field("trace", &self.trace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::store::MemoryEntityStore;
    use axum::http::HeaderValue;
    use std::time::Duration;

    fn ctx(headers: HeaderMap) -> ProceduralCtx {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
        let runtime = Arc::new(ProviderRuntime::new("location_provider", "0.1.0", Some(store)));
        let engine =
            EngineClient::new("http://127.0.0.1:1", "provider-key", Duration::from_secs(1)).unwrap();
        ProceduralCtx::new(
            runtime,
            engine,
            headers,
            TraceContext::root(),
            "moveX_Location_procedure".to_string(),
        )
    }

    #[test]
    fn test_identity_accessors() {
        let ctx = ctx(HeaderMap::new());
        assert_eq!(ctx.prefix(), "location_provider");
        assert_eq!(ctx.version(), "0.1.0");
        assert_eq!(ctx.operation(), "moveX_Location_procedure");
    }

    #[test]
    fn test_invoking_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer user-token"));
        assert_eq!(ctx(headers).invoking_token().unwrap(), "user-token");

        let err = ctx(HeaderMap::new()).invoking_token().unwrap_err();
        match err {
            ProviderError::Invocation(e) => assert_eq!(e.status_code, 401),
            other => panic!("unexpected error: {other}"),
        }

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(ctx(headers).invoking_token().is_err());
    }

    #[test]
    fn test_url_for() {
        let mut entity = Entity::default();
        entity.metadata.kind = "Location".to_string();
        entity.metadata.uuid = "u-1".to_string();
        assert_eq!(
            ctx(HeaderMap::new()).url_for(&entity),
            "http://127.0.0.1:1/services/location_provider/0.1.0/Location/u-1"
        );
    }

    #[tokio::test]
    async fn test_update_status_through_store() {
        let ctx = ctx(HeaderMap::new());
        let store = ctx.entity_store();
        let entity = store.create("Location", Document::new(), Document::new()).await.unwrap();

        let mut status = Document::new();
        status.insert("x".to_string(), Value::from(3));
        ctx.update_status(&entity.metadata, status).await.unwrap();

        let current = store.get(&entity.metadata.reference()).await.unwrap();
        assert_eq!(current.status["x"], 3);
    }

    #[tokio::test]
    async fn test_check_permission_fails_closed() {
        let ctx = ctx(HeaderMap::new());
        assert!(!ctx.check_permission(&[(Action::Read, Entity::default())], None).await);
        assert!(
            !ctx.check_permission(&[(Action::Read, Entity::default())], Some("token"))
                .await
        );
    }

    #[test]
    fn test_security_apis_use_expected_keys() {
        let ctx = ctx(HeaderMap::new());
        assert_eq!(ctx.provider_security_api().key(), "provider-key");
        assert_eq!(ctx.user_security_api("user-key").key(), "user-key");
    }
}
