//! Core data model shared with the orchestration engine
//!
//! Field names follow the engine's JSON wire format (snake_case, with the
//! two camelCase exceptions on the provider descriptor).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Schema marker naming a kind's intentful behaviour
pub const ENTITY_BEHAVIOUR_MARKER: &str = "x-papiea-entity";

/// Schema marker restricting which half of an entity a field belongs to
pub const FIELD_VISIBILITY_MARKER: &str = "x-papiea";

/// Value of [`FIELD_VISIBILITY_MARKER`] for fields only observable through status
pub const STATUS_ONLY: &str = "status-only";

/// Schema-less key/value half of an entity (spec or status)
pub type Document = Map<String, Value>;

/// Declared error catalogue: HTTP status code (as a string) → error schema
pub type ErrorSchemas = BTreeMap<String, Value>;

/// Structured user record returned by the security gateway
pub type UserInfo = Map<String, Value>;

/// Identity of an entity in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    pub uuid: String,
    pub kind: String,
}

/// Entity metadata maintained by the external store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub uuid: String,

    #[serde(default)]
    pub kind: String,

    /// Optimistic-concurrency counter, bumped by the store on every spec write
    #[serde(default)]
    pub spec_version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub extension: Document,
}

impl Metadata {
    /// Identity portion of this metadata
    pub fn reference(&self) -> EntityReference {
        EntityReference {
            uuid: self.uuid.clone(),
            kind: self.kind.clone(),
        }
    }
}

/// `{metadata, spec, status}` triple exchanged with the store and handlers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub spec: Document,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub status: Document,
}

/// Inbound callback body sent by the engine
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackRequest {
    #[serde(default)]
    pub metadata: Option<Metadata>,

    #[serde(default)]
    pub spec: Option<Value>,

    #[serde(default)]
    pub status: Option<Value>,

    /// Procedure argument
    #[serde(default)]
    pub input: Value,
}

impl CallbackRequest {
    /// Reconstruct the target entity; non-object halves become empty documents
    pub fn entity(&self) -> Entity {
        Entity {
            metadata: self.metadata.clone().unwrap_or_default(),
            spec: as_document(self.spec.as_ref()),
            status: as_document(self.status.as_ref()),
        }
    }
}

fn as_document(value: Option<&Value>) -> Document {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Document::new(),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Document, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Document>::deserialize(deserializer)?.unwrap_or_default())
}

/// How the engine reconciles a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentfulBehaviour {
    #[serde(rename = "spec-only")]
    SpecOnly,
    #[serde(rename = "basic")]
    Basic,
    #[serde(rename = "differ")]
    Differ,
}

impl IntentfulBehaviour {
    /// Parse a schema marker value
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "spec-only" => Some(Self::SpecOnly),
            "basic" => Some(Self::Basic),
            "differ" => Some(Self::Differ),
            _ => None,
        }
    }
}

/// Whether the engine pauses intentful work while a procedure runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[default]
    Basic,
    /// Declared by the engine protocol; never produced by this crate
    HaltIntentful,
}

/// Caller-facing description of a procedure being registered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureDescription {
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub errors_schemas: ErrorSchemas,
    pub description: Option<String>,
}

impl ProcedureDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn output(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Declare an error the procedure may answer with
    pub fn error(mut self, code: impl Into<String>, schema: Value) -> Self {
        self.errors_schemas.insert(code.into(), schema);
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// Registered procedure as advertised to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureSignature {
    pub name: String,

    /// Input schema
    pub argument: Value,

    /// Output schema
    pub result: Value,

    pub execution_strategy: ExecutionStrategy,

    /// URL the engine POSTs to for this procedure
    pub procedure_callback: String,

    /// Provider base URL, used by the engine for discovery and health checks
    pub base_callback: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors_schemas: ErrorSchemas,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// State-observer hook invoked by the engine's reconciliation loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentfulSignature {
    /// Field-path signature the hook observes
    pub signature: String,

    #[serde(flatten)]
    pub procedure: ProcedureSignature,
}

/// A resource kind and everything registered against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindDescriptor {
    pub name: String,
    pub name_plural: String,
    pub kind_structure: Value,
    pub intentful_behaviour: IntentfulBehaviour,
    pub intentful_signatures: Vec<IntentfulSignature>,
    pub dependency_tree: BTreeMap<String, Vec<String>>,
    pub kind_procedures: BTreeMap<String, ProcedureSignature>,
    pub entity_procedures: BTreeMap<String, ProcedureSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_retry_exponent: Option<u32>,
}

/// OAuth configuration plus policy model and initial rules
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityConfig {
    pub oauth2: Value,
    pub policy_model: String,
    pub policy_rules: String,
}

/// Immutable provider description posted to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub prefix: String,
    pub version: String,
    pub kinds: Vec<KindDescriptor>,
    pub procedures: BTreeMap<String, ProcedureSignature>,
    pub extension_structure: Value,

    #[serde(rename = "allowExtraProps")]
    pub allow_extra_props: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<Value>,

    #[serde(rename = "authModel", default, skip_serializing_if = "Option::is_none")]
    pub auth_model: Option<String>,
}

/// Result of an entity constructor (`on_create`) handler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstructorResult {
    pub spec: Document,
    pub status: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Service-to-service credential record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S2sKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub owner: String,
    pub provider_prefix: String,
    pub key: String,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub user_info: UserInfo,
}

/// Request body for creating a credential
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateKeyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
}

/// Action checked against the engine's policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    #[serde(rename = "write")]
    Update,
    Create,
    Delete,
    RegisterProvider,
    UnregisterProvider,
    ReadProvider,
    UpdateAuth,
    #[serde(rename = "create_key")]
    CreateS2sKey,
    #[serde(rename = "read_key")]
    ReadS2sKey,
    #[serde(rename = "inactive_key")]
    InactivateS2sKey,
    UpdateStatus,
}
