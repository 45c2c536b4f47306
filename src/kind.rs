//! Kind builder — attaches procedures and intentful hooks to one kind
//!
//! Every attachment validates first, then records its signature, then wires
//! the route; a rejected attachment leaves neither behind.

use std::future::Future;

use serde::Serialize;
use serde_json::Value;

use crate::context::{IntentfulCtx, ProceduralCtx};
use crate::dispatch::ProcedureHandler;
use crate::error::{InvocationError, ProviderError, Result};
use crate::provider::ProviderBuilder;
use crate::types::{ConstructorResult, Entity, KindDescriptor, ProcedureDescription};

/// Builder for the procedures of one kind
pub struct KindBuilder<'a> {
    provider: &'a mut ProviderBuilder,
    kind: String,
}

impl<'a> KindBuilder<'a> {
    pub(crate) fn new(provider: &'a mut ProviderBuilder, kind: String) -> Self {
        Self { provider, kind }
    }

    pub fn name(&self) -> &str {
        &self.kind
    }

    /// Current state of the kind's descriptor
    pub fn descriptor(&self) -> Option<&KindDescriptor> {
        self.provider.registry.kind(&self.kind)
    }

    /// Procedure invoked on one entity: handler gets `(ctx, entity, input)`
    pub fn entity_procedure<F, Fut, R>(
        &mut self,
        name: &str,
        description: ProcedureDescription,
        handler: F,
    ) -> Result<&mut Self>
    where
        F: Fn(ProceduralCtx, Entity, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize,
    {
        let signature = self
            .provider
            .registry
            .signature(name, Some(self.kind.as_str()), &description)?;
        self.provider
            .registry
            .insert_entity_procedure(&self.kind, signature)?;
        self.provider
            .wire(name, Some(self.kind.as_str()), ProcedureHandler::with_entity(handler));
        tracing::debug!(kind = %self.kind, procedure = %name, "Entity procedure registered");
        Ok(self)
    }

    /// Procedure invoked on the kind as a whole: handler gets `(ctx, input)`
    pub fn kind_procedure<F, Fut, R>(
        &mut self,
        name: &str,
        description: ProcedureDescription,
        handler: F,
    ) -> Result<&mut Self>
    where
        F: Fn(ProceduralCtx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize,
    {
        let signature = self
            .provider
            .registry
            .signature(name, Some(self.kind.as_str()), &description)?;
        self.provider
            .registry
            .insert_kind_procedure(&self.kind, signature)?;
        self.provider
            .wire(name, Some(self.kind.as_str()), ProcedureHandler::input_only(handler));
        tracing::debug!(kind = %self.kind, procedure = %name, "Kind procedure registered");
        Ok(self)
    }

    /// Intentful hook on `signature`; the handler answers `{delay_secs}` or null
    pub fn on<F, Fut, R>(&mut self, signature: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(IntentfulCtx, Entity, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize,
    {
        let intentful = self
            .provider
            .registry
            .intentful_signature(signature, &self.kind)?;
        self.provider.registry.insert_intentful(&self.kind, intentful)?;
        self.provider
            .wire(signature, Some(self.kind.as_str()), ProcedureHandler::with_entity(handler));
        tracing::debug!(kind = %self.kind, signature = %signature, "Intentful handler registered");
        Ok(self)
    }

    /// Constructor called by the engine when an entity of this kind is
    /// created. Without an input schema, the kind's structure is used.
    pub fn on_create<F, Fut>(
        &mut self,
        mut description: ProcedureDescription,
        handler: F,
    ) -> Result<&mut Self>
    where
        F: Fn(ProceduralCtx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConstructorResult>> + Send + 'static,
    {
        if description.input_schema.is_none() {
            let structure = self
                .descriptor()
                .map(|k| k.kind_structure.clone())
                .ok_or_else(|| ProviderError::Schema(format!("unknown kind: {}", self.kind)))?;
            description.input_schema = Some(structure);
            tracing::info!(
                kind = %self.kind,
                "Constructor input schema defaults to the kind structure"
            );
        }
        let name = format!("__{}_create", self.kind);
        self.kind_procedure(&name, description, handler)
    }

    /// Destructor called by the engine before an entity of this kind is deleted
    pub fn on_delete<F, Fut, R>(&mut self, handler: F) -> Result<&mut Self>
    where
        F: Fn(ProceduralCtx, Entity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + 'static,
    {
        let name = format!("__{}_delete", self.kind);
        let handler = std::sync::Arc::new(handler);
        self.kind_procedure(&name, ProcedureDescription::new(), move |ctx, input| {
            let handler = std::sync::Arc::clone(&handler);
            async move {
                let entity: Entity = serde_json::from_value(input).map_err(|e| {
                    InvocationError::bad_request(format!("Destructor input is not an entity: {}", e))
                })?;
                handler(ctx, entity).await
            }
        })
    }

    /// Backoff exponent the engine applies between diff retries
    pub fn diff_retry_exponent(&mut self, exponent: Option<u32>) -> &mut Self {
        if let Some(kind) = self.provider.registry.kind_mut(&self.kind) {
            kind.diff_retry_exponent = exponent;
        }
        self
    }
}

impl std::fmt::Debug for KindBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindBuilder").field("kind", &self.kind).finish()
    }
}
