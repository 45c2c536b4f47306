//! Background task lifecycle
//!
//! A background task is an entity of its own `differ` kind. `spec.state`
//! says whether the task should run, `status.state` whether it does, and
//! `status.provider_fields` carries the caller's payload. The engine drives
//! the task by polling the kind's `state` signature.
//!
//! The task keeps only the identity of its entity. Every transition
//! re-fetches the entity first, so writes always present the current
//! `spec_version`; concurrent transitions on the same task surface the
//! store's `VersionConflict` instead of overwriting each other.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};

use crate::context::IntentfulCtx;
use crate::error::{ProviderError, Result};
use crate::store::EntityStore;
use crate::types::{
    Document, Entity, EntityReference, ENTITY_BEHAVIOUR_MARKER, FIELD_VISIBILITY_MARKER,
    STATUS_ONLY,
};

pub const RUNNING_SPEC_STATE: &str = "Should Run";
pub const RUNNING_STATUS_STATE: &str = "Running";
pub const IDLE_SPEC_STATE: &str = "Idle";
pub const IDLE_STATUS_STATE: &str = "Idle";

/// Reserved field holding the task state
const STATE_FIELD: &str = "state";

/// Status field holding the caller's payload
const PROVIDER_FIELDS: &str = "provider_fields";

/// Observable state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Idle,
}

impl TaskState {
    pub fn spec_state(self) -> &'static str {
        match self {
            Self::Running => RUNNING_SPEC_STATE,
            Self::Idle => IDLE_SPEC_STATE,
        }
    }

    pub fn status_state(self) -> &'static str {
        match self {
            Self::Running => RUNNING_STATUS_STATE,
            Self::Idle => IDLE_STATUS_STATE,
        }
    }

    /// Read the state off a task entity; `None` for half-transitioned entities
    pub fn of(entity: &Entity) -> Option<Self> {
        let spec = entity.spec.get(STATE_FIELD).and_then(Value::as_str);
        let status = entity.status.get(STATE_FIELD).and_then(Value::as_str);
        match (spec, status) {
            (Some(RUNNING_SPEC_STATE), Some(RUNNING_STATUS_STATE)) => Some(Self::Running),
            (Some(IDLE_SPEC_STATE), Some(IDLE_STATUS_STATE)) => Some(Self::Idle),
            _ => None,
        }
    }
}

/// Handle on one background task
pub struct BackgroundTask {
    name: String,
    store: Arc<dyn EntityStore>,
    metadata_extension: Document,
    task_entity: Option<EntityReference>,
}

impl BackgroundTask {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn EntityStore>,
        metadata_extension: Document,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            metadata_extension,
            task_entity: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a backing entity is known
    pub fn is_started(&self) -> bool {
        self.task_entity.is_some()
    }

    /// Identity of the backing entity
    pub fn entity_reference(&self) -> Option<&EntityReference> {
        self.task_entity.as_ref()
    }

    /// Current backing entity, fetched from the store
    pub async fn entity(&self) -> Result<Entity> {
        let reference = self.reference("read")?;
        self.store.get(reference).await
    }

    /// Create the task entity on first use, then move it to Running
    pub async fn start(&mut self) -> Result<()> {
        let entity = match self.task_entity.clone() {
            Some(reference) => {
                let entity = self.store.get(&reference).await?;
                self.store
                    .update_spec(&entity.metadata, state_doc(RUNNING_SPEC_STATE))
                    .await?;
                entity
            }
            None => {
                let entity = self
                    .store
                    .create(
                        &self.name,
                        state_doc(RUNNING_SPEC_STATE),
                        self.metadata_extension.clone(),
                    )
                    .await?;
                self.task_entity = Some(entity.metadata.reference());
                entity
            }
        };
        self.store
            .update_status(&entity.metadata, state_doc(RUNNING_STATUS_STATE))
            .await?;
        tracing::info!(task = %self.name, uuid = %entity.metadata.uuid, "Background task started");
        Ok(())
    }

    /// Move the task to Idle; the entity is kept
    pub async fn stop(&mut self) -> Result<()> {
        let reference = self.reference("stop")?;
        let entity = self.store.get(reference).await?;
        self.store
            .update_spec(&entity.metadata, state_doc(IDLE_SPEC_STATE))
            .await?;
        self.store
            .update_status(&entity.metadata, state_doc(IDLE_STATUS_STATE))
            .await?;
        tracing::info!(task = %self.name, uuid = %entity.metadata.uuid, "Background task stopped");
        Ok(())
    }

    /// Delete the task entity and forget it
    pub async fn kill(&mut self) -> Result<()> {
        let reference = self.reference("kill")?;
        let entity = self.store.get(reference).await?;
        self.store.delete(&entity.metadata.reference()).await?;
        self.task_entity = None;
        tracing::info!(task = %self.name, uuid = %entity.metadata.uuid, "Background task killed");
        Ok(())
    }

    /// Publish `provider_fields` through the task's status
    pub async fn update(&self, provider_fields: Value) -> Result<()> {
        let reference = self.reference("update")?;
        let entity = self.store.get(reference).await?;
        let mut status = Document::new();
        status.insert(PROVIDER_FIELDS.to_string(), provider_fields);
        self.store.update_status(&entity.metadata, status).await
    }

    fn reference(&self, operation: &'static str) -> Result<&EntityReference> {
        self.task_entity.as_ref().ok_or_else(|| ProviderError::NoTask {
            operation,
            task: self.name.clone(),
        })
    }
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("name", &self.name)
            .field("store", &self.store.name())
            .field("task_entity", &self.task_entity)
            .finish()
    }
}

fn state_doc(state: &str) -> Document {
    let mut doc = Document::new();
    doc.insert(STATE_FIELD.to_string(), Value::String(state.to_string()));
    doc
}

/// Kind description of a task named `name`, optionally with a
/// `provider_fields` schema (already marked status-only)
pub fn task_schema(name: &str, provider_fields: Option<Value>) -> Value {
    let mut properties = Map::new();
    properties.insert(STATE_FIELD.to_string(), json!({"type": "string"}));
    if let Some(fields) = provider_fields {
        properties.insert(PROVIDER_FIELDS.to_string(), fields);
    }
    json!({
        name: {
            "type": "object",
            ENTITY_BEHAVIOUR_MARKER: "differ",
            "properties": properties,
        }
    })
}

/// Mark every field of `schema` status-only, except the reserved `state`.
///
/// Accepts either an object schema (`{type, properties}`) or a bare property
/// map. Typed properties get the marker; object-typed ones are walked into.
/// Returns a new tree; the input is left alone.
pub fn modify_task_schema(schema: &Value) -> Value {
    let mut schema = schema.clone();
    let Some(root) = schema.as_object_mut() else {
        return schema;
    };
    if root.contains_key("type") && root.contains_key("properties") {
        if let Some(properties) = root.get_mut("properties").and_then(Value::as_object_mut) {
            mark_status_only(properties);
        }
    } else {
        // bare property map
        mark_status_only(root);
    }
    schema
}

fn mark_status_only(properties: &mut Map<String, Value>) {
    for (name, property) in properties.iter_mut() {
        if name == STATE_FIELD {
            continue;
        }
        let Some(field) = property.as_object_mut() else {
            continue;
        };
        if field.contains_key("type") {
            field.insert(
                FIELD_VISIBILITY_MARKER.to_string(),
                Value::String(STATUS_ONLY.to_string()),
            );
        }
        if field.get("type").and_then(Value::as_str) == Some("object") {
            if let Some(nested) = field.get_mut("properties").and_then(Value::as_object_mut) {
                mark_status_only(nested);
            }
        }
    }
}

/// `state` signature handler: runs `callback` on `status.provider_fields`
/// and asks to be polled again after `interval`
pub fn state_observer<F, Fut>(
    callback: F,
    interval: Duration,
) -> impl Fn(IntentfulCtx, Entity, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static
where
    F: Fn(IntentfulCtx, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let delay_secs = interval.as_secs();
    move |ctx: IntentfulCtx, entity: Entity, _diff: Value| {
        let fields = entity
            .status
            .get(PROVIDER_FIELDS)
            .cloned()
            .unwrap_or(Value::Null);
        let run = callback(ctx, fields);
        async move {
            run.await?;
            Ok(json!({ "delay_secs": delay_secs }))
        }
        .boxed()
    }
}
