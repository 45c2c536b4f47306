//! Fake orchestration engine for integration tests
//!
//! Serves the engine endpoints a provider calls, backed by a
//! `MemoryEntityStore`, and records what it was sent.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use a3s_provider::{
    Document, EntityReference, EntityStore, MemoryEntityStore, Metadata, ProviderError,
};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Bearer token the fake engine accepts for permission checks
pub const ALLOWED_TOKEN: &str = "allowed-token";

#[derive(Clone, Default)]
pub struct FakeEngine {
    pub store: MemoryEntityStore,
    pub registrations: Arc<Mutex<Vec<Value>>>,
    pub traceparents: Arc<Mutex<Vec<String>>>,
    pub authorizations: Arc<Mutex<Vec<String>>>,
}

impl FakeEngine {
    pub fn registrations(&self) -> Vec<Value> {
        self.registrations.lock().unwrap().clone()
    }

    pub fn traceparents(&self) -> Vec<String> {
        self.traceparents.lock().unwrap().clone()
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.authorizations.lock().unwrap().clone()
    }

    fn record(&self, headers: &HeaderMap) {
        if let Some(v) = headers.get("traceparent").and_then(|v| v.to_str().ok()) {
            self.traceparents.lock().unwrap().push(v.to_string());
        }
        if let Some(v) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            self.authorizations.lock().unwrap().push(v.to_string());
        }
    }
}

/// Spin up the fake engine on an OS-assigned port, returning its base URL.
pub async fn spawn_engine() -> (String, FakeEngine) {
    let engine = FakeEngine::default();
    let app = Router::new()
        .route("/provider", post(register_provider))
        .route("/provider/:prefix/:version/update_status", patch(update_status))
        .route("/provider/:prefix/:version/auth/user_info", get(user_info))
        .route("/services/:prefix/:version/check_permission", post(check_permission))
        .route("/services/:prefix/:version/:kind", post(create_entity))
        .route(
            "/services/:prefix/:version/:kind/:uuid",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .with_state(engine.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://127.0.0.1:{}", port), engine)
}

/// Port that was free a moment ago
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn store_error(err: ProviderError) -> Response {
    let status = match err {
        ProviderError::NotFound(_) => StatusCode::NOT_FOUND,
        ProviderError::VersionConflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

fn document(value: &Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

async fn register_provider(
    State(engine): State<FakeEngine>,
    headers: HeaderMap,
    Json(descriptor): Json<Value>,
) -> Json<Value> {
    engine.record(&headers);
    engine.registrations.lock().unwrap().push(descriptor);
    Json(json!({}))
}

async fn update_status(
    State(engine): State<FakeEngine>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    engine.record(&headers);
    let metadata: Metadata = match serde_json::from_value(body["metadata"].clone()) {
        Ok(m) => m,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match engine.store.update_status(&metadata, document(&body["status"])).await {
        Ok(()) => Json(json!({})).into_response(),
        Err(e) => store_error(e),
    }
}

async fn user_info(State(engine): State<FakeEngine>, headers: HeaderMap) -> Json<Value> {
    engine.record(&headers);
    Json(json!({"owner": "tester", "tenant": "acme"}))
}

async fn check_permission(
    State(engine): State<FakeEngine>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Response {
    engine.record(&headers);
    let expected = format!("Bearer {}", ALLOWED_TOKEN);
    let allowed = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if allowed {
        Json(json!({"success": "Ok"})).into_response()
    } else {
        (StatusCode::FORBIDDEN, "Forbidden").into_response()
    }
}

async fn create_entity(
    State(engine): State<FakeEngine>,
    Path((_prefix, _version, kind)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    engine.record(&headers);
    let extension = document(&body["metadata"]["extension"]);
    match engine.store.create(&kind, document(&body["spec"]), extension).await {
        Ok(entity) => Json(entity).into_response(),
        Err(e) => store_error(e),
    }
}

async fn get_entity(
    State(engine): State<FakeEngine>,
    Path((_prefix, _version, kind, uuid)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Response {
    engine.record(&headers);
    match engine.store.get(&EntityReference { uuid, kind }).await {
        Ok(entity) => Json(entity).into_response(),
        Err(e) => store_error(e),
    }
}

async fn update_entity(
    State(engine): State<FakeEngine>,
    Path((_prefix, _version, kind, uuid)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    engine.record(&headers);
    let metadata = Metadata {
        uuid,
        kind,
        spec_version: body["metadata"]["spec_version"].as_u64().unwrap_or_default(),
        ..Metadata::default()
    };
    match engine.store.update_spec(&metadata, document(&body["spec"])).await {
        Ok(()) => Json(json!({})).into_response(),
        Err(e) => store_error(e),
    }
}

async fn delete_entity(
    State(engine): State<FakeEngine>,
    Path((_prefix, _version, kind, uuid)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Response {
    engine.record(&headers);
    match engine.store.delete(&EntityReference { uuid, kind }).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(e),
    }
}
