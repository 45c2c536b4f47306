//! Entity store backed by the engine's `/services` API

use async_trait::async_trait;

use super::EntityStore;
use crate::engine::EngineClient;
use crate::error::Result;
use crate::types::{Document, Entity, EntityReference, Metadata};

/// Entities of one provider, reached through the engine
#[derive(Debug, Clone)]
pub struct EngineEntityStore {
    client: EngineClient,
    prefix: String,
    version: String,
}

impl EngineEntityStore {
    pub fn new(client: EngineClient, prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            version: version.into(),
        }
    }
}

#[async_trait]
impl EntityStore for EngineEntityStore {
    async fn create(&self, kind: &str, spec: Document, extension: Document) -> Result<Entity> {
        let entity = self
            .client
            .create_entity(&self.prefix, &self.version, kind, &spec, &extension)
            .await?;
        tracing::debug!(kind = %kind, uuid = %entity.metadata.uuid, "Entity created");
        Ok(entity)
    }

    async fn get(&self, entity: &EntityReference) -> Result<Entity> {
        self.client
            .get_entity(&self.prefix, &self.version, entity)
            .await
    }

    async fn update_spec(&self, metadata: &Metadata, spec: Document) -> Result<()> {
        self.client
            .update_entity(&self.prefix, &self.version, metadata, &spec)
            .await
    }

    async fn update_status(&self, metadata: &Metadata, status: Document) -> Result<()> {
        self.client
            .update_status(&self.prefix, &self.version, metadata, &status)
            .await
    }

    async fn delete(&self, entity: &EntityReference) -> Result<()> {
        self.client
            .delete_entity(&self.prefix, &self.version, entity)
            .await?;
        tracing::debug!(kind = %entity.kind, uuid = %entity.uuid, "Entity deleted");
        Ok(())
    }

    fn name(&self) -> &str {
        "engine"
    }
}
