//! Provider builder — assembles the kind/procedure catalogue, registers it
//! with the engine and serves the callbacks
//!
//! The builder is plain mutable state until [`ProviderBuilder::finalize`]
//! validates it into an immutable [`ProviderDescriptor`]. Routes wired while
//! building resolve the provider identity lazily, from the runtime installed
//! by [`ProviderBuilder::register`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::ProviderConfig;
use crate::context::ProceduralCtx;
use crate::dispatch::{Dispatcher, ProcedureHandler};
use crate::engine::EngineClient;
use crate::error::{ProviderError, Result};
use crate::kind::KindBuilder;
use crate::registry::{route_path, CallbackUrls, ProcedureRegistry};
use crate::server::CallbackServer;
use crate::store::{EngineEntityStore, EntityStore};
use crate::task::{modify_task_schema, state_observer, task_schema, BackgroundTask};
use crate::types::{
    Document, Entity, EntityReference, KindDescriptor, Metadata, ProcedureDescription,
    ProviderDescriptor, SecurityConfig,
};

/// Identity of a registered provider
pub(crate) struct ProviderRuntime {
    pub(crate) prefix: String,
    pub(crate) version: String,
    store: Option<Arc<dyn EntityStore>>,
}

impl ProviderRuntime {
    pub(crate) fn new(
        prefix: impl Into<String>,
        version: impl Into<String>,
        store: Option<Arc<dyn EntityStore>>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
            store,
        }
    }

    /// Configured store, or the engine's `/services` API through `engine`
    pub(crate) fn entity_store(&self, engine: &EngineClient) -> Arc<dyn EntityStore> {
        match &self.store {
            Some(store) => Arc::clone(store),
            None => Arc::new(EngineEntityStore::new(
                engine.clone(),
                self.prefix.clone(),
                self.version.clone(),
            )),
        }
    }
}

/// State shared between the builder and the routes it wires
pub(crate) struct ProviderShared {
    pub(crate) engine: EngineClient,
    runtime: OnceLock<Arc<ProviderRuntime>>,
}

impl ProviderShared {
    pub(crate) fn runtime(&self) -> Result<Arc<ProviderRuntime>> {
        self.runtime.get().cloned().ok_or(ProviderError::NotRegistered)
    }
}

/// Entity store resolved at call time from the registered runtime
struct RegisteredStore {
    shared: Arc<ProviderShared>,
}

impl RegisteredStore {
    fn resolve(&self) -> Result<Arc<dyn EntityStore>> {
        Ok(self.shared.runtime()?.entity_store(&self.shared.engine))
    }
}

#[async_trait]
impl EntityStore for RegisteredStore {
    async fn create(&self, kind: &str, spec: Document, extension: Document) -> Result<Entity> {
        self.resolve()?.create(kind, spec, extension).await
    }

    async fn get(&self, entity: &EntityReference) -> Result<Entity> {
        self.resolve()?.get(entity).await
    }

    async fn update_spec(&self, metadata: &Metadata, spec: Document) -> Result<()> {
        self.resolve()?.update_spec(metadata, spec).await
    }

    async fn update_status(&self, metadata: &Metadata, status: Document) -> Result<()> {
        self.resolve()?.update_status(metadata, status).await
    }

    async fn delete(&self, entity: &EntityReference) -> Result<()> {
        self.resolve()?.delete(entity).await
    }

    fn name(&self) -> &str {
        "registered"
    }
}

/// Fluent assembly of a provider
pub struct ProviderBuilder {
    config: ProviderConfig,
    prefix: Option<String>,
    version: Option<String>,
    metadata_extension: Option<Value>,
    security: Option<SecurityConfig>,
    pub(crate) registry: ProcedureRegistry,
    server: CallbackServer,
    shared: Arc<ProviderShared>,
    store: Option<Arc<dyn EntityStore>>,
}

impl ProviderBuilder {
    /// Create a builder; the health check route is registered right away
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let engine = EngineClient::from_config(&config)?;
        let registry = ProcedureRegistry::new(CallbackUrls::new(
            config.public_host.clone(),
            config.public_port,
        ));
        let mut server = CallbackServer::new(&config);
        server.register_health_check();

        Ok(Self {
            config,
            prefix: None,
            version: None,
            metadata_extension: None,
            security: None,
            registry,
            server,
            shared: Arc::new(ProviderShared {
                engine,
                runtime: OnceLock::new(),
            }),
            store: None,
        })
    }

    pub fn prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn version(&mut self, version: impl Into<String>) -> &mut Self {
        self.version = Some(version.into());
        self
    }

    /// Schema of the metadata extension every entity of this provider carries
    pub fn metadata_extension(&mut self, schema: Value) -> &mut Self {
        self.metadata_extension = Some(schema);
        self
    }

    pub fn secure_with(
        &mut self,
        oauth2: Value,
        policy_model: impl Into<String>,
        policy_rules: impl Into<String>,
    ) -> &mut Self {
        self.security = Some(SecurityConfig {
            oauth2,
            policy_model: policy_model.into(),
            policy_rules: policy_rules.into(),
        });
        self
    }

    /// Persist entities somewhere other than the engine's `/services` API
    pub fn with_entity_store(&mut self, store: Arc<dyn EntityStore>) -> &mut Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcedureRegistry {
        &self.registry
    }

    pub fn server(&self) -> &CallbackServer {
        &self.server
    }

    /// Declare a kind from a `{<KindName>: <schema>}` description
    pub fn new_kind(&mut self, schema: &Value) -> Result<KindBuilder<'_>> {
        let kind = KindDescriptor::from_schema(schema)?;
        let name = kind.name.clone();
        if !self.registry.add_kind(kind) {
            return Err(ProviderError::Schema(format!("kind already declared: {}", name)));
        }
        tracing::info!(kind = %name, "Kind declared");
        Ok(KindBuilder::new(self, name))
    }

    /// Add a prebuilt kind; `None` if one with that name exists
    pub fn add_kind(&mut self, kind: KindDescriptor) -> Option<KindBuilder<'_>> {
        let name = kind.name.clone();
        if self.registry.add_kind(kind) {
            Some(KindBuilder::new(self, name))
        } else {
            None
        }
    }

    /// Drop a kind from the catalogue. Routes already wired stay served.
    pub fn remove_kind(&mut self, name: &str) -> bool {
        self.registry.remove_kind(name)
    }

    /// Reopen the builder of a declared kind
    pub fn kind(&mut self, name: &str) -> Option<KindBuilder<'_>> {
        self.registry.kind(name)?;
        Some(KindBuilder::new(self, name.to_string()))
    }

    /// Register a procedure that belongs to no kind, served on `POST /<name>`
    pub fn provider_procedure<F, Fut, R>(
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
        let signature = self.registry.signature(name, None, &description)?;
        self.registry.insert_provider_procedure(signature);
        self.wire(name, None, ProcedureHandler::input_only(handler));
        Ok(self)
    }

    /// Model a long-running task as a `differ` kind named `name`.
    ///
    /// The engine polls the task's `state` signature; `callback` receives
    /// `status.provider_fields` and the engine is told to come back after
    /// `interval`.
    pub fn background_task<F, Fut>(
        &mut self,
        name: &str,
        interval: Duration,
        callback: F,
        metadata_extension: Option<Document>,
        fields_schema: Option<Value>,
    ) -> Result<BackgroundTask>
    where
        F: Fn(ProceduralCtx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.declares_extension() && metadata_extension.is_none() {
            return Err(ProviderError::MissingMetadataExtension {
                task: name.to_string(),
            });
        }

        let fields = fields_schema.as_ref().map(modify_task_schema);
        let schema = task_schema(name, fields);
        self.new_kind(&schema)?
            .on("state", state_observer(callback, interval))?;

        let store = Arc::new(RegisteredStore {
            shared: Arc::clone(&self.shared),
        });
        Ok(BackgroundTask::new(
            name,
            store,
            metadata_extension.unwrap_or_default(),
        ))
    }

    fn declares_extension(&self) -> bool {
        match &self.metadata_extension {
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    /// Validate the builder into the descriptor posted to the engine.
    ///
    /// Missing fields are reported in order: prefix, version, kind.
    pub fn finalize(&self) -> Result<ProviderDescriptor> {
        let prefix = self
            .prefix
            .clone()
            .ok_or(ProviderError::MalformedDescriptor("prefix"))?;
        let version = self
            .version
            .clone()
            .ok_or(ProviderError::MalformedDescriptor("version"))?;
        if self.registry.kinds().is_empty() {
            return Err(ProviderError::MalformedDescriptor("kind"));
        }

        let security = self.security.clone();
        Ok(ProviderDescriptor {
            prefix,
            version,
            kinds: self.registry.kinds().to_vec(),
            procedures: self.registry.procedures().clone(),
            extension_structure: self.metadata_extension.clone().unwrap_or_else(|| json!({})),
            allow_extra_props: self.config.allow_extra_props,
            policy: security.as_ref().map(|s| s.policy_rules.clone()),
            oauth2: security.as_ref().map(|s| s.oauth2.clone()),
            auth_model: security.map(|s| s.policy_model),
        })
    }

    /// Post the descriptor to the engine, then start serving callbacks.
    ///
    /// Not idempotent: a second call posts the descriptor again.
    pub async fn register(&mut self) -> Result<ProviderDescriptor> {
        let descriptor = self.finalize()?;
        self.shared.engine.register_provider(&descriptor).await?;

        // installed only once the engine accepted the descriptor, so a failed
        // attempt can be retried under a corrected identity
        let runtime = ProviderRuntime::new(
            descriptor.prefix.clone(),
            descriptor.version.clone(),
            self.store.clone(),
        );
        if self.shared.runtime.set(Arc::new(runtime)).is_err() {
            tracing::warn!(
                prefix = %descriptor.prefix,
                "Provider registered again, callbacks keep the first registration's identity"
            );
        }

        let addr = self.server.start().await?;

        tracing::info!(
            prefix = %descriptor.prefix,
            version = %descriptor.version,
            kinds = descriptor.kinds.len(),
            procedures = descriptor.procedures.len(),
            addr = ?addr,
            "Provider registered"
        );
        Ok(descriptor)
    }

    /// Address the callback server is bound to, once registered
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// Stop serving callbacks. Safe to call repeatedly or before `register`.
    pub async fn close(&mut self) {
        self.server.close().await;
    }

    /// Bind `handler` to the procedure's route
    pub(crate) fn wire(&mut self, name: &str, kind: Option<&str>, handler: ProcedureHandler) {
        let route = Dispatcher::new(Arc::clone(&self.shared), name, kind, handler).into_route();
        self.server.register_route(route_path(name, kind), route);
    }
}

impl std::fmt::Debug for ProviderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBuilder")
            .field("prefix", &self.prefix)
            .field("version", &self.version)
            .field("kinds", &self.registry.kinds().len())
            .field("procedures", &self.registry.procedures().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEntityStore;
    use crate::types::IntentfulBehaviour;

    fn builder() -> ProviderBuilder {
        ProviderBuilder::new(ProviderConfig::default().with_public_address("127.0.0.1", 9005))
            .unwrap()
    }

    fn location() -> Value {
        json!({"Location": {"type": "object", "x-papiea-entity": "spec-only"}})
    }

    #[test]
    fn test_health_check_registered_on_creation() {
        let provider = builder();
        assert!(provider.server().should_run());
    }

    #[test]
    fn test_finalize_reports_first_missing_field() {
        let mut provider = builder();
        let err = provider.finalize().unwrap_err();
        assert_eq!(err.to_string(), "Malformed provider description. Missing: prefix");

        provider.new_kind(&location()).unwrap();
        provider.version("0.1.0");
        let err = provider.finalize().unwrap_err();
        assert!(matches!(err, ProviderError::MalformedDescriptor("prefix")));

        let mut provider = builder();
        provider.prefix("location_provider");
        provider.new_kind(&location()).unwrap();
        assert!(matches!(
            provider.finalize().unwrap_err(),
            ProviderError::MalformedDescriptor("version")
        ));

        let mut provider = builder();
        provider.prefix("location_provider").version("0.1.0");
        assert!(matches!(
            provider.finalize().unwrap_err(),
            ProviderError::MalformedDescriptor("kind")
        ));
    }

    #[test]
    fn test_finalize_builds_descriptor() {
        let mut provider = builder();
        provider
            .prefix("location_provider")
            .version("0.1.0")
            .metadata_extension(json!({"owner": {"type": "string"}}))
            .secure_with(json!({"provider": "keycloak"}), "[model]", "p, admin, *");
        provider.new_kind(&location()).unwrap();

        let descriptor = provider.finalize().unwrap();
        assert_eq!(descriptor.prefix, "location_provider");
        assert_eq!(descriptor.kinds.len(), 1);
        assert_eq!(descriptor.extension_structure["owner"]["type"], "string");
        assert_eq!(descriptor.auth_model.as_deref(), Some("[model]"));
        assert_eq!(descriptor.policy.as_deref(), Some("p, admin, *"));
        assert!(!descriptor.allow_extra_props);
    }

    #[test]
    fn test_duplicate_kind_is_rejected() {
        let mut provider = builder();
        provider.new_kind(&location()).unwrap();
        assert!(provider.new_kind(&location()).is_err());
        let kind = KindDescriptor::from_schema(&location()).unwrap();
        assert!(provider.add_kind(kind).is_none());
        assert!(provider.kind("Location").is_some());
        assert!(provider.kind("Route").is_none());
        assert!(provider.remove_kind("Location"));
        assert!(provider.kind("Location").is_none());
    }

    #[test]
    fn test_provider_procedure_routes_without_kind() {
        let mut provider = builder();
        provider
            .provider_procedure("computeSum", ProcedureDescription::new(), |_ctx, input| async move {
                Ok(input)
            })
            .unwrap();
        assert!(provider.server().has_route("/computeSum"));
        assert_eq!(
            provider.registry().procedures()["computeSum"].procedure_callback,
            "http://127.0.0.1:9005/computeSum"
        );

        let err = provider
            .provider_procedure("healthcheck", ProcedureDescription::new(), |_ctx, input| async move {
                Ok(input)
            })
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidName { .. }));
    }

    #[test]
    fn test_background_task_declares_differ_kind() {
        let mut provider = builder();
        let task = provider
            .background_task(
                "heartbeat",
                Duration::from_secs(5),
                |_ctx, _fields| async move { Ok(()) },
                None,
                Some(json!({"type": "object", "properties": {"beats": {"type": "integer"}}})),
            )
            .unwrap();
        assert_eq!(task.name(), "heartbeat");

        let kind = provider.registry().kind("heartbeat").unwrap();
        assert_eq!(kind.intentful_behaviour, IntentfulBehaviour::Differ);
        assert_eq!(kind.intentful_signatures[0].signature, "state");
        assert!(provider.server().has_route("/heartbeat/state"));
        assert_eq!(
            kind.kind_structure["heartbeat"]["properties"]["provider_fields"]["properties"]["beats"]
                ["x-papiea"],
            "status-only"
        );
    }

    #[test]
    fn test_background_task_requires_declared_extension() {
        let mut provider = builder();
        provider.metadata_extension(json!({"owner": {"type": "string"}}));
        let err = provider
            .background_task(
                "heartbeat",
                Duration::from_secs(5),
                |_ctx, _fields| async move { Ok(()) },
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingMetadataExtension { .. }));
        assert!(provider.registry().kind("heartbeat").is_none());
    }

    #[tokio::test]
    async fn test_task_store_needs_registration() {
        let mut provider = builder();
        provider.with_entity_store(Arc::new(MemoryEntityStore::new()));
        let mut task = provider
            .background_task(
                "heartbeat",
                Duration::from_secs(5),
                |_ctx, _fields| async move { Ok(()) },
                None,
                None,
            )
            .unwrap();
        assert!(matches!(task.start().await.unwrap_err(), ProviderError::NotRegistered));
    }

    #[tokio::test]
    async fn test_close_before_register_is_noop() {
        let mut provider = builder();
        provider.close().await;
        provider.close().await;
        assert!(provider.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_failed_registration_leaves_identity_unset() {
        let dead_engine = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}", listener.local_addr().unwrap())
        };
        let config = ProviderConfig::new(dead_engine, "key").with_public_address("127.0.0.1", 0);
        let mut provider = ProviderBuilder::new(config).unwrap();
        provider.new_kind(&location()).unwrap();
        provider.prefix("wrong_prefix").version("0.1.0");

        let err = provider.register().await.unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
        assert!(matches!(provider.shared.runtime(), Err(ProviderError::NotRegistered)));
        assert!(provider.local_addr().is_none());
    }
}
