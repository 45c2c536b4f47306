//! Background task lifecycle tests
//!
//! Drives `BackgroundTask` directly over a `MemoryEntityStore`: state
//! transitions, missing-task errors, re-fetch before write, and the
//! status-only task schema.

use std::sync::Arc;

use a3s_provider::task::{
    IDLE_SPEC_STATE, IDLE_STATUS_STATE, RUNNING_SPEC_STATE, RUNNING_STATUS_STATE,
};
use a3s_provider::{
    modify_task_schema, BackgroundTask, Document, EntityStore, MemoryEntityStore, ProviderError,
    TaskState,
};
use serde_json::json;

fn task(store: &MemoryEntityStore) -> BackgroundTask {
    BackgroundTask::new("heartbeat", Arc::new(store.clone()), Document::new())
}

fn is_no_task(err: ProviderError) -> bool {
    matches!(err, ProviderError::NoTask { .. })
}

// ─── Missing task ────────────────────────────────────────────────

#[tokio::test]
async fn test_operations_before_start_fail_with_no_task() {
    let store = MemoryEntityStore::new();
    let mut task = task(&store);

    assert!(is_no_task(task.stop().await.unwrap_err()));
    assert!(is_no_task(task.kill().await.unwrap_err()));
    assert!(is_no_task(task.update(json!({"beats": 1})).await.unwrap_err()));
    assert!(is_no_task(task.entity().await.unwrap_err()));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_no_task_error_names_operation_and_task() {
    let mut task = task(&MemoryEntityStore::new());
    let err = task.kill().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Attempting to kill missing background task (heartbeat)"
    );
}

// ─── Transitions ─────────────────────────────────────────────────

#[tokio::test]
async fn test_start_creates_running_entity() {
    let store = MemoryEntityStore::new();
    let mut task = task(&store);

    task.start().await.unwrap();
    assert!(task.is_started());

    let entity = task.entity().await.unwrap();
    assert_eq!(entity.metadata.kind, "heartbeat");
    assert_eq!(entity.spec["state"], RUNNING_SPEC_STATE);
    assert_eq!(entity.status["state"], RUNNING_STATUS_STATE);
    assert_eq!(TaskState::of(&entity), Some(TaskState::Running));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_stop_then_start_reuses_entity() {
    let store = MemoryEntityStore::new();
    let mut task = task(&store);

    task.start().await.unwrap();
    let first = task.entity_reference().cloned().unwrap();

    task.stop().await.unwrap();
    let entity = task.entity().await.unwrap();
    assert_eq!(entity.spec["state"], IDLE_SPEC_STATE);
    assert_eq!(entity.status["state"], IDLE_STATUS_STATE);

    task.start().await.unwrap();
    assert_eq!(task.entity_reference(), Some(&first));
    let entity = task.entity().await.unwrap();
    assert_eq!(TaskState::of(&entity), Some(TaskState::Running));
    // created at 1, bumped by stop and by the restart
    assert_eq!(entity.metadata.spec_version, 3);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_kill_removes_entity_and_reference() {
    let store = MemoryEntityStore::new();
    let mut task = task(&store);

    task.start().await.unwrap();
    let reference = task.entity_reference().cloned().unwrap();
    task.kill().await.unwrap();

    assert!(!task.is_started());
    assert!(store.get(&reference).await.is_err());
    assert!(is_no_task(task.stop().await.unwrap_err()));

    task.start().await.unwrap();
    assert_ne!(task.entity_reference(), Some(&reference));
}

#[tokio::test]
async fn test_update_patches_provider_fields_only() {
    let store = MemoryEntityStore::new();
    let mut task = task(&store);
    task.start().await.unwrap();

    task.update(json!({"beats": 4, "last": "ok"})).await.unwrap();
    let entity = task.entity().await.unwrap();
    assert_eq!(entity.status["provider_fields"], json!({"beats": 4, "last": "ok"}));
    assert_eq!(entity.status["state"], RUNNING_STATUS_STATE);
    assert_eq!(entity.spec["state"], RUNNING_SPEC_STATE);
}

#[tokio::test]
async fn test_metadata_extension_is_stored() {
    let store = MemoryEntityStore::new();
    let mut extension = Document::new();
    extension.insert("owner".to_string(), json!("ops"));
    let mut task = BackgroundTask::new("heartbeat", Arc::new(store.clone()), extension);

    task.start().await.unwrap();
    let entity = task.entity().await.unwrap();
    assert_eq!(entity.metadata.extension["owner"], "ops");
}

// ─── Concurrency ─────────────────────────────────────────────────

#[tokio::test]
async fn test_transitions_refetch_before_writing() {
    let store = MemoryEntityStore::new();
    let mut task = task(&store);
    task.start().await.unwrap();

    // someone else moves the spec forward behind the task's back
    let entity = task.entity().await.unwrap();
    let mut spec = entity.spec.clone();
    spec.insert("note".to_string(), json!("external"));
    store.update_spec(&entity.metadata, spec).await.unwrap();

    // the task still succeeds because it never writes from a cached version
    task.stop().await.unwrap();
    let current = task.entity().await.unwrap();
    assert_eq!(TaskState::of(&current), Some(TaskState::Idle));
}

#[tokio::test]
async fn test_stale_writer_gets_version_conflict() {
    let store = MemoryEntityStore::new();
    let mut task = task(&store);
    task.start().await.unwrap();

    let stale = task.entity().await.unwrap();
    task.stop().await.unwrap();

    let err = store
        .update_spec(&stale.metadata, stale.spec.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::VersionConflict { .. }));

    let current = task.entity().await.unwrap();
    assert_eq!(current.spec["state"], IDLE_SPEC_STATE);
}

// ─── Task schema ─────────────────────────────────────────────────

#[test]
fn test_modify_task_schema_scenario() {
    let schema = json!({"type": "object", "properties": {"count": {"type": "integer"}}});
    let modified = modify_task_schema(&schema);
    assert_eq!(
        modified,
        json!({
            "type": "object",
            "properties": {"count": {"type": "integer", "x-papiea": "status-only"}}
        })
    );
}

#[test]
fn test_modify_task_schema_leaves_state_untouched() {
    let schema = json!({
        "type": "object",
        "properties": {
            "state": {"type": "string"},
            "count": {"type": "integer"}
        }
    });
    let modified = modify_task_schema(&schema);
    assert_eq!(modified["properties"]["state"], json!({"type": "string"}));
    assert_eq!(modified["properties"]["count"]["x-papiea"], "status-only");
}

#[test]
fn test_modify_task_schema_bare_property_map() {
    let schema = json!({
        "count": {"type": "integer"},
        "state": {"type": "string"},
        "progress": {"type": "object", "properties": {"done": {"type": "integer"}}}
    });
    let modified = modify_task_schema(&schema);
    assert_eq!(
        modified,
        json!({
            "count": {"type": "integer", "x-papiea": "status-only"},
            "state": {"type": "string"},
            "progress": {
                "type": "object",
                "x-papiea": "status-only",
                "properties": {"done": {"type": "integer", "x-papiea": "status-only"}}
            }
        })
    );
}
