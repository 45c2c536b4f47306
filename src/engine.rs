//! HTTP client for the orchestration engine
//!
//! Covers provider registration, status patching, entity CRUD under
//! `/services/<prefix>/<version>/<kind>` and permission checks. Every request
//! carries the bearer credential and, when set, the caller's `traceparent`.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};

use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};
use crate::trace::TraceContext;
use crate::types::{Document, Entity, EntityReference, Metadata, ProviderDescriptor};

/// Authenticated client for engine endpoints
#[derive(Debug, Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    base_url: String,
    s2s_key: String,
    trace: Option<TraceContext>,
}

impl EngineClient {
    pub fn new(base_url: &str, s2s_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("a3s-provider/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            s2s_key: s2s_key.into(),
            trace: None,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(
            config.engine_base_url(),
            config.s2s_key.clone(),
            config.request_timeout(),
        )
    }

    /// Same connection pool, requests tagged with `trace`
    pub fn with_trace(&self, trace: TraceContext) -> Self {
        Self {
            trace: Some(trace),
            ..self.clone()
        }
    }

    /// Same connection pool, authenticated with another credential
    pub fn with_key(&self, s2s_key: impl Into<String>) -> Self {
        Self {
            s2s_key: s2s_key.into(),
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn s2s_key(&self) -> &str {
        &self.s2s_key
    }

    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// `POST /provider`
    pub async fn register_provider(&self, descriptor: &ProviderDescriptor) -> Result<()> {
        let response = self
            .request(Method::POST, "/provider")
            .json(descriptor)
            .send()
            .await?;
        check(response, &descriptor.prefix).await?;
        Ok(())
    }

    /// `PATCH /provider/<prefix>/<version>/update_status`
    pub async fn update_status(
        &self,
        prefix: &str,
        version: &str,
        metadata: &Metadata,
        status: &Document,
    ) -> Result<()> {
        let path = format!("/provider/{}/{}/update_status", prefix, version);
        let response = self
            .request(Method::PATCH, &path)
            .json(&json!({ "metadata": metadata, "status": status }))
            .send()
            .await?;
        check(response, &metadata.uuid).await?;
        Ok(())
    }

    pub async fn create_entity(
        &self,
        prefix: &str,
        version: &str,
        kind: &str,
        spec: &Document,
        extension: &Document,
    ) -> Result<Entity> {
        let mut body = json!({ "spec": spec });
        if !extension.is_empty() {
            body["metadata"] = json!({ "extension": extension });
        }
        let path = services_path(prefix, version, kind, None);
        let response = self.request(Method::POST, &path).json(&body).send().await?;
        let response = check(response, kind).await?;
        let mut entity: Entity = response.json().await?;
        if entity.metadata.kind.is_empty() {
            entity.metadata.kind = kind.to_string();
        }
        Ok(entity)
    }

    pub async fn get_entity(
        &self,
        prefix: &str,
        version: &str,
        entity: &EntityReference,
    ) -> Result<Entity> {
        let path = services_path(prefix, version, &entity.kind, Some(&entity.uuid));
        let response = self.request(Method::GET, &path).send().await?;
        let response = check(response, &entity.uuid).await?;
        Ok(response.json().await?)
    }

    /// Replace the spec; `metadata.spec_version` must match the stored one
    pub async fn update_entity(
        &self,
        prefix: &str,
        version: &str,
        metadata: &Metadata,
        spec: &Document,
    ) -> Result<()> {
        let path = services_path(prefix, version, &metadata.kind, Some(&metadata.uuid));
        let body = json!({
            "metadata": {
                "spec_version": metadata.spec_version,
                "extension": metadata.extension,
            },
            "spec": spec,
        });
        let response = self.request(Method::PUT, &path).json(&body).send().await?;
        check(response, &metadata.uuid).await?;
        Ok(())
    }

    pub async fn delete_entity(
        &self,
        prefix: &str,
        version: &str,
        entity: &EntityReference,
    ) -> Result<()> {
        let path = services_path(prefix, version, &entity.kind, Some(&entity.uuid));
        let response = self.request(Method::DELETE, &path).send().await?;
        check(response, &entity.uuid).await?;
        Ok(())
    }

    /// `POST /services/<prefix>/<version>/check_permission`; true iff the engine answers `Ok`
    pub async fn check_permission(&self, prefix: &str, version: &str, body: &Value) -> Result<bool> {
        let path = format!("/services/{}/{}/check_permission", prefix, version);
        let response = self.request(Method::POST, &path).json(body).send().await?;
        let response = check(response, prefix).await?;
        let answer: Value = response.json().await?;
        Ok(answer.get("success").and_then(Value::as_str) == Some("Ok"))
    }

    /// Authenticated request builder rooted at the engine URL
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.s2s_key);
        if let Some(trace) = &self.trace {
            let mut headers = reqwest::header::HeaderMap::new();
            trace.inject(&mut headers);
            builder = builder.headers(headers);
        }
        builder
    }
}

fn services_path(prefix: &str, version: &str, kind: &str, uuid: Option<&str>) -> String {
    match uuid {
        Some(uuid) => format!("/services/{}/{}/{}/{}", prefix, version, kind, uuid),
        None => format!("/services/{}/{}/{}", prefix, version, kind),
    }
}

/// Map non-success answers onto the error taxonomy
pub(crate) async fn check(response: Response, subject: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound(subject.to_string()),
        StatusCode::CONFLICT => ProviderError::VersionConflict {
            uuid: subject.to_string(),
            message,
        },
        _ => ProviderError::Engine {
            status: status.as_u16(),
            message,
        },
    })
}
