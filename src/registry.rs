//! Procedure registry — the provider's kind and procedure catalogue
//!
//! Signatures are keyed by provider (provider-level procedures) and by kind
//! (kind-level, entity-level and intentful). The registry is only mutated
//! while the provider is being built; after registration it is read-only.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::{ProviderError, Result};
use crate::types::{
    ErrorSchemas, ExecutionStrategy, IntentfulBehaviour, IntentfulSignature, KindDescriptor,
    ProcedureDescription, ProcedureSignature, ENTITY_BEHAVIOUR_MARKER,
};

/// Computes the callback URLs advertised to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    host: String,
    port: u16,
}

impl CallbackUrls {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `http://<host>:<port>`
    pub fn base(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `http://<host>:<port>/<kind>/<procedure>`, kind-less for provider procedures
    pub fn procedure(&self, procedure: &str, kind: Option<&str>) -> String {
        format!("{}{}", self.base(), route_path(procedure, kind))
    }
}

/// Route path a procedure is served on
pub fn route_path(procedure: &str, kind: Option<&str>) -> String {
    match kind {
        Some(kind) => format!("/{}/{}", kind, procedure),
        None => format!("/{}", procedure),
    }
}

/// Reject declared error codes outside the HTTP error range (400-599)
pub fn validate_error_codes(procedure: &str, schemas: &ErrorSchemas) -> Result<()> {
    for code in schemas.keys() {
        let recognized = code
            .parse::<u16>()
            .map(|c| (400..=599).contains(&c))
            .unwrap_or(false);
        if !recognized {
            return Err(ProviderError::InvalidErrorCode {
                procedure: procedure.to_string(),
                code: code.clone(),
            });
        }
    }
    Ok(())
}

/// Names end up as path segments, so they must be routable verbatim
pub fn validate_procedure_name(name: &str, kind: Option<&str>) -> Result<()> {
    let invalid = |reason: &str| ProviderError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if name
        .chars()
        .any(|c| matches!(c, '/' | ':' | '*' | '{' | '}') || c.is_whitespace())
    {
        return Err(invalid("name contains characters that cannot be routed"));
    }
    if kind.is_none() && name == "healthcheck" {
        return Err(invalid("name is reserved for the health check"));
    }
    Ok(())
}

/// English plural used for kind routing
pub fn pluralize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{}es", name);
    }
    if lower.ends_with('y') {
        let before = lower.chars().rev().nth(1);
        if before.is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{}ies", &name[..name.len() - 1]);
        }
    }
    format!("{}s", name)
}

impl KindDescriptor {
    /// Build a kind from a `{<KindName>: <schema>}` description.
    ///
    /// Every top-level entry must carry the entity-behaviour marker, but only
    /// the first one produces the descriptor; later entries are ignored.
    pub fn from_schema(description: &Value) -> Result<Self> {
        let entries = description.as_object().ok_or_else(|| {
            ProviderError::Schema("kind description must be a JSON object".to_string())
        })?;
        if entries.is_empty() {
            return Err(ProviderError::EmptyKind);
        }

        for (name, schema) in entries {
            if name.is_empty() {
                return Err(ProviderError::Schema("kind name cannot be empty".to_string()));
            }
            if schema.get(ENTITY_BEHAVIOUR_MARKER).is_none() {
                return Err(ProviderError::Schema(format!(
                    "missing {} marker in entity description for: {}",
                    ENTITY_BEHAVIOUR_MARKER, name
                )));
            }
        }

        let (name, schema) = entries
            .iter()
            .next()
            .ok_or(ProviderError::EmptyKind)?;
        let marker = schema[ENTITY_BEHAVIOUR_MARKER].as_str().unwrap_or_default();
        let behaviour = IntentfulBehaviour::from_marker(marker).ok_or_else(|| {
            ProviderError::Schema(format!(
                "unrecognized {} marker '{}' for: {}",
                ENTITY_BEHAVIOUR_MARKER, marker, name
            ))
        })?;

        if entries.len() > 1 {
            tracing::warn!(
                kind = %name,
                ignored = entries.len() - 1,
                "Kind description has several top-level entries, only the first is registered"
            );
        }

        Ok(Self {
            name: name.clone(),
            name_plural: pluralize(name),
            kind_structure: description.clone(),
            intentful_behaviour: behaviour,
            intentful_signatures: Vec::new(),
            dependency_tree: BTreeMap::new(),
            kind_procedures: BTreeMap::new(),
            entity_procedures: BTreeMap::new(),
            diff_retry_exponent: None,
        })
    }
}

/// In-memory catalogue of kinds and procedure signatures
#[derive(Debug, Clone)]
pub struct ProcedureRegistry {
    urls: CallbackUrls,
    kinds: Vec<KindDescriptor>,
    procedures: BTreeMap<String, ProcedureSignature>,
}

impl ProcedureRegistry {
    pub fn new(urls: CallbackUrls) -> Self {
        Self {
            urls,
            kinds: Vec::new(),
            procedures: BTreeMap::new(),
        }
    }

    pub fn urls(&self) -> &CallbackUrls {
        &self.urls
    }

    /// Append a kind; returns false if one with the same name exists
    pub fn add_kind(&mut self, kind: KindDescriptor) -> bool {
        if self.kind(&kind.name).is_some() {
            return false;
        }
        tracing::debug!(kind = %kind.name, "Kind added");
        self.kinds.push(kind);
        true
    }

    pub fn remove_kind(&mut self, name: &str) -> bool {
        let before = self.kinds.len();
        self.kinds.retain(|k| k.name != name);
        before != self.kinds.len()
    }

    pub fn kind(&self, name: &str) -> Option<&KindDescriptor> {
        self.kinds.iter().find(|k| k.name == name)
    }

    pub fn kind_mut(&mut self, name: &str) -> Option<&mut KindDescriptor> {
        self.kinds.iter_mut().find(|k| k.name == name)
    }

    pub fn kinds(&self) -> &[KindDescriptor] {
        &self.kinds
    }

    /// Provider-level procedures
    pub fn procedures(&self) -> &BTreeMap<String, ProcedureSignature> {
        &self.procedures
    }

    /// Validate a description and synthesize its signature; records nothing
    pub fn signature(
        &self,
        name: &str,
        kind: Option<&str>,
        description: &ProcedureDescription,
    ) -> Result<ProcedureSignature> {
        validate_procedure_name(name, kind)?;
        validate_error_codes(name, &description.errors_schemas)?;
        Ok(ProcedureSignature {
            name: name.to_string(),
            argument: description.input_schema.clone().unwrap_or_else(|| json!({})),
            result: description.output_schema.clone().unwrap_or_else(|| json!({})),
            execution_strategy: ExecutionStrategy::Basic,
            procedure_callback: self.urls.procedure(name, kind),
            base_callback: self.urls.base(),
            errors_schemas: description.errors_schemas.clone(),
            description: description.description.clone(),
        })
    }

    /// Synthesize an intentful signature with the fixed reconciliation contract
    pub fn intentful_signature(&self, signature: &str, kind: &str) -> Result<IntentfulSignature> {
        validate_procedure_name(signature, Some(kind))?;
        Ok(IntentfulSignature {
            signature: signature.to_string(),
            procedure: ProcedureSignature {
                name: signature.to_string(),
                argument: json!({
                    "IntentfulInput": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "keys": {"type": "object"},
                                "key": {"type": "string"},
                                "spec-val": {"type": "array"},
                                "status-val": {"type": "array"}
                            }
                        }
                    }
                }),
                result: json!({
                    "IntentfulOutput": {
                        "type": "object",
                        "properties": {
                            "delay_secs": {"type": "integer"}
                        },
                        "description": "Amount of seconds to wait before this entity will be checked again by the intent engine"
                    }
                }),
                execution_strategy: ExecutionStrategy::Basic,
                procedure_callback: self.urls.procedure(signature, Some(kind)),
                base_callback: self.urls.base(),
                errors_schemas: ErrorSchemas::new(),
                description: None,
            },
        })
    }

    pub fn insert_provider_procedure(&mut self, signature: ProcedureSignature) {
        self.procedures.insert(signature.name.clone(), signature);
    }

    pub fn insert_kind_procedure(&mut self, kind: &str, signature: ProcedureSignature) -> Result<()> {
        self.require_kind(kind)?
            .kind_procedures
            .insert(signature.name.clone(), signature);
        Ok(())
    }

    pub fn insert_entity_procedure(
        &mut self,
        kind: &str,
        signature: ProcedureSignature,
    ) -> Result<()> {
        self.require_kind(kind)?
            .entity_procedures
            .insert(signature.name.clone(), signature);
        Ok(())
    }

    pub fn insert_intentful(&mut self, kind: &str, signature: IntentfulSignature) -> Result<()> {
        let kind = self.require_kind(kind)?;
        kind.intentful_signatures
            .retain(|s| s.signature != signature.signature);
        kind.intentful_signatures.push(signature);
        Ok(())
    }

    /// Find a signature by scope and name
    pub fn lookup(&self, kind: Option<&str>, name: &str) -> Option<&ProcedureSignature> {
        match kind {
            None => self.procedures.get(name),
            Some(kind) => {
                let kind = self.kind(kind)?;
                kind.entity_procedures
                    .get(name)
                    .or_else(|| kind.kind_procedures.get(name))
                    .or_else(|| {
                        kind.intentful_signatures
                            .iter()
                            .find(|s| s.procedure.name == name)
                            .map(|s| &s.procedure)
                    })
            }
        }
    }

    fn require_kind(&mut self, kind: &str) -> Result<&mut KindDescriptor> {
        self.kind_mut(kind)
            .ok_or_else(|| ProviderError::Schema(format!("unknown kind: {}", kind)))
    }
}
