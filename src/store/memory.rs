//! In-memory entity store
//!
//! Mirrors the engine's versioning rules: `spec_version` starts at 1, every
//! spec write must present the current version and bumps it, status merges
//! are unversioned.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::EntityStore;
use crate::error::{ProviderError, Result};
use crate::types::{Document, Entity, EntityReference, Metadata};

/// Entity store held in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryEntityStore {
    entities: Arc<RwLock<HashMap<String, Entity>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    /// All entities of one kind
    pub async fn list(&self, kind: &str) -> Vec<Entity> {
        self.entities
            .read()
            .await
            .values()
            .filter(|e| e.metadata.kind == kind)
            .cloned()
            .collect()
    }
}

fn lookup<'a>(
    entities: &'a mut HashMap<String, Entity>,
    entity: &EntityReference,
) -> Result<&'a mut Entity> {
    entities
        .get_mut(&entity.uuid)
        .filter(|e| e.metadata.kind == entity.kind)
        .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", entity.kind, entity.uuid)))
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn create(&self, kind: &str, spec: Document, extension: Document) -> Result<Entity> {
        let entity = Entity {
            metadata: Metadata {
                uuid: uuid::Uuid::new_v4().to_string(),
                kind: kind.to_string(),
                spec_version: 1,
                created_at: Some(chrono::Utc::now()),
                deleted_at: None,
                extension,
            },
            spec,
            status: Document::new(),
        };
        self.entities
            .write()
            .await
            .insert(entity.metadata.uuid.clone(), entity.clone());
        tracing::debug!(kind = %kind, uuid = %entity.metadata.uuid, "Entity created in memory");
        Ok(entity)
    }

    async fn get(&self, entity: &EntityReference) -> Result<Entity> {
        self.entities
            .read()
            .await
            .get(&entity.uuid)
            .filter(|e| e.metadata.kind == entity.kind)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", entity.kind, entity.uuid)))
    }

    async fn update_spec(&self, metadata: &Metadata, spec: Document) -> Result<()> {
        let mut entities = self.entities.write().await;
        let stored = lookup(&mut entities, &metadata.reference())?;
        if stored.metadata.spec_version != metadata.spec_version {
            return Err(ProviderError::VersionConflict {
                uuid: metadata.uuid.clone(),
                message: format!(
                    "expected spec_version {}, found {}",
                    metadata.spec_version, stored.metadata.spec_version
                ),
            });
        }
        stored.spec = spec;
        stored.metadata.spec_version += 1;
        Ok(())
    }

    async fn update_status(&self, metadata: &Metadata, status: Document) -> Result<()> {
        let mut entities = self.entities.write().await;
        let stored = lookup(&mut entities, &metadata.reference())?;
        stored.status.extend(status);
        Ok(())
    }

    async fn delete(&self, entity: &EntityReference) -> Result<()> {
        let mut entities = self.entities.write().await;
        lookup(&mut entities, entity)?;
        entities.remove(&entity.uuid);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
