//! Entity store seam — where background-task entities and handler-side
//! entity operations are persisted
//!
//! The engine owns entities of record; `EngineEntityStore` talks to it over
//! HTTP. `MemoryEntityStore` enforces the same optimistic-concurrency rules
//! in-process and backs tests and offline runs.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Document, Entity, EntityReference, Metadata};

pub mod engine;
pub mod memory;

pub use engine::EngineEntityStore;
pub use memory::MemoryEntityStore;

/// CRUD over `{metadata, spec, status}` entities
///
/// Writes carry the caller's last-seen `Metadata`; a write against a stale
/// `spec_version` fails with `VersionConflict` instead of overwriting.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Create an entity of `kind` with an initial spec and metadata extension
    async fn create(&self, kind: &str, spec: Document, extension: Document) -> Result<Entity>;

    /// Fetch the current state of an entity
    async fn get(&self, entity: &EntityReference) -> Result<Entity>;

    /// Replace the spec, bumping `spec_version`
    async fn update_spec(&self, metadata: &Metadata, spec: Document) -> Result<()>;

    /// Merge top-level `status` keys into the stored status
    async fn update_status(&self, metadata: &Metadata, status: Document) -> Result<()>;

    async fn delete(&self, entity: &EntityReference) -> Result<()>;

    /// Store name (e.g., "engine", "memory")
    fn name(&self) -> &str;
}
