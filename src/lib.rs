//! # a3s-provider
//!
//! Provider registration and procedure dispatch for an intent-based
//! orchestration engine.
//!
//! ## Overview
//!
//! A provider describes typed resource kinds, attaches HTTP-callable
//! procedures to them, registers the resulting descriptor with the engine
//! and serves the callbacks the engine makes into it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_provider::{ProcedureDescription, ProviderBuilder, ProviderConfig};
//!
//! # async fn example() -> a3s_provider::Result<()> {
//! let config = ProviderConfig::new("http://127.0.0.1:3000", "provider-s2s-key")
//!     .with_public_address("127.0.0.1", 9005);
//! let mut provider = ProviderBuilder::new(config)?;
//! provider.prefix("location_provider").version("0.1.0");
//!
//! provider
//!     .new_kind(&serde_json::json!({
//!         "Location": {
//!             "type": "object",
//!             "x-papiea-entity": "spec-only",
//!             "properties": {"x": {"type": "number"}, "y": {"type": "number"}}
//!         }
//!     }))?
//!     .entity_procedure(
//!         "moveX",
//!         ProcedureDescription::new().input(serde_json::json!({"type": "number"})),
//!         |_ctx, entity, input| async move {
//!             let x = entity.spec["x"].as_i64().unwrap_or(0);
//!             Ok(x + input.as_i64().unwrap_or(0))
//!         },
//!     )?;
//!
//! provider.register().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **CallbackServer** — axum listener mapping POST routes to handlers, plus `/healthcheck`
//! - **ProcedureRegistry** — kind and procedure signatures advertised to the engine
//! - **ProviderBuilder** / **KindBuilder** — fluent assembly; each attachment records a
//!   signature and wires a route
//! - **BackgroundTask** — long-running task modelled as an entity with Running/Idle states
//! - **EntityStore** trait — entity persistence seam (engine-backed or in-memory)
//! - **SecurityApi** — credential and identity lookups against the engine

pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod kind;
pub mod provider;
pub mod registry;
pub mod security;
pub mod server;
pub mod store;
pub mod task;
pub mod trace;
pub mod types;

// Re-export core types
pub use config::ProviderConfig;
pub use context::{IntentfulCtx, ProceduralCtx};
pub use dispatch::ProcedureHandler;
pub use engine::EngineClient;
pub use error::{InvocationError, ProviderError, Result};
pub use kind::KindBuilder;
pub use provider::ProviderBuilder;
pub use registry::{CallbackUrls, ProcedureRegistry};
pub use security::SecurityApi;
pub use server::CallbackServer;
pub use store::{EngineEntityStore, EntityStore, MemoryEntityStore};
pub use task::{modify_task_schema, BackgroundTask, TaskState};
pub use trace::TraceContext;
pub use types::{
    Action, ConstructorResult, CreateKeyRequest, Document, Entity, EntityReference,
    IntentfulBehaviour, IntentfulSignature, KindDescriptor, Metadata, ProcedureDescription,
    ProcedureSignature, ProviderDescriptor, S2sKey,
};
