//! [`OperationRegistry`] – fixed name → operation lookup table.
//!
//! Built once at startup through [`RegistryBuilder`] and read-only after
//! that. Each [`OperationDescriptor`] carries its parameter schema as a set
//! of typed defaults ([`PolicyParams`]); raw request parameters are
//! validated into that struct before a runner ever sees them.
//!
//! # Parameter schema
//!
//! | Parameter | Type | Constraint |
//! |---|---|---|
//! | `model_id` | string | empty means "use the default" |
//! | `num_episodes` | integer | ≥ 1 |
//! | `episode_time_s` | number | > 0, finite |
//! | `task_description` | string | empty means "use the default" |
//!
//! Keys outside this table are rejected.

use std::collections::BTreeMap;
use std::sync::Arc;

use armgate_types::{GateError, OperationParams, ParamValue};
use serde_json::{Value, json};

use crate::runner::OperationRunner;

/// Fully resolved, validated parameters handed to a runner.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyParams {
    pub model_id: String,
    pub num_episodes: u32,
    pub episode_time_s: f64,
    pub task_description: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Static definition of one operation in the built-in catalog.
#[derive(Debug, Clone, Copy)]
pub struct OperationSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub model_id: &'static str,
    pub task_description: &'static str,
    pub episode_time_s: f64,
    /// Result string reported when the run finishes cleanly.
    pub completion: &'static str,
}

impl OperationSpec {
    pub fn defaults(&self) -> PolicyParams {
        PolicyParams {
            model_id: self.model_id.to_string(),
            num_episodes: 1,
            episode_time_s: self.episode_time_s,
            task_description: self.task_description.to_string(),
        }
    }
}

/// The three-step carrot slicing workflow run by the arm.
pub const SLICING_WORKFLOW: [OperationSpec; 3] = [
    OperationSpec {
        name: "run_pick_and_place",
        description: "Run the pick and place policy: move a carrot from the plate to the \
                      cutting board. Usually the first step of the slicing workflow.",
        model_id: "sangam-101/act_so101_pick_and_place_carrot_policy",
        task_description: "Pick carrot from plate and place on cutting board",
        episode_time_s: 25.0,
        completion: "COMPLETED: Pick and place finished.",
    },
    OperationSpec {
        name: "run_use_slicer",
        description: "Run the slicer policy: pick the slicer from its stand, slice the carrot \
                      on the cutting board and return the tool. Second step.",
        model_id: "sangam-101/smolvla_so101_slicer_to_slice_carrot",
        task_description: "pick slicer from stand, slice carrot and return it",
        episode_time_s: 35.0,
        completion: "COMPLETED: Slicing finished.",
    },
    OperationSpec {
        name: "run_transfer_slices",
        description: "Run the transfer policy: move sliced carrot pieces from the cutting \
                      board to the pile plate. Third step.",
        model_id: "sangam-101/act_so101_transfer_slices_policy",
        task_description: "Move carrot slices from cutting board to pile plate",
        episode_time_s: 25.0,
        completion: "COMPLETED: Transfer finished.",
    },
];

// ─────────────────────────────────────────────────────────────────────────────
// OperationDescriptor
// ─────────────────────────────────────────────────────────────────────────────

/// A registry entry: name, schema defaults and the runner that executes it.
#[derive(Clone)]
pub struct OperationDescriptor {
    name: String,
    description: String,
    defaults: PolicyParams,
    runner: Arc<dyn OperationRunner>,
}

impl OperationDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        defaults: PolicyParams,
        runner: Arc<dyn OperationRunner>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            defaults,
            runner,
        }
    }

    /// Build a descriptor from a catalog entry.
    pub fn from_spec(spec: &OperationSpec, runner: Arc<dyn OperationRunner>) -> Self {
        Self::new(spec.name, spec.description, spec.defaults(), runner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn defaults(&self) -> &PolicyParams {
        &self.defaults
    }

    pub(crate) fn runner(&self) -> Arc<dyn OperationRunner> {
        Arc::clone(&self.runner)
    }

    /// Validate `raw` against the schema and fill in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidParameters`] for unknown keys, wrong
    /// types, or out-of-range values.
    pub fn resolve_params(&self, raw: &OperationParams) -> Result<PolicyParams, GateError> {
        let mut params = self.defaults.clone();
        for (key, value) in raw {
            match key.as_str() {
                "model_id" => {
                    let s = self.expect_str(key, value)?;
                    if !s.is_empty() {
                        params.model_id = s.to_string();
                    }
                }
                "task_description" => {
                    let s = self.expect_str(key, value)?;
                    if !s.is_empty() {
                        params.task_description = s.to_string();
                    }
                }
                "num_episodes" => {
                    let n = self.expect_integer(key, value)?;
                    params.num_episodes = u32::try_from(n)
                        .ok()
                        .filter(|n| *n >= 1)
                        .ok_or_else(|| self.invalid(format!("num_episodes must be >= 1, got {n}")))?;
                }
                "episode_time_s" => {
                    let t = self.expect_number(key, value)?;
                    if !(t.is_finite() && t > 0.0) {
                        return Err(self.invalid(format!("episode_time_s must be > 0, got {t}")));
                    }
                    params.episode_time_s = t;
                }
                other => return Err(self.invalid(format!("unknown parameter '{other}'"))),
            }
        }
        Ok(params)
    }

    /// JSON-Schema object describing the accepted parameters, with this
    /// operation's defaults filled in.
    pub fn parameter_schema(&self) -> Value {
        let d = &self.defaults;
        json!({
            "type": "object",
            "properties": {
                "model_id": {
                    "type": "string",
                    "default": d.model_id,
                    "description": "Policy checkpoint to load",
                },
                "num_episodes": {
                    "type": "integer",
                    "minimum": 1,
                    "default": d.num_episodes,
                    "description": "Number of times to run the policy",
                },
                "episode_time_s": {
                    "type": "number",
                    "exclusiveMinimum": 0,
                    "default": d.episode_time_s,
                    "description": "Maximum time per episode in seconds",
                },
                "task_description": {
                    "type": "string",
                    "default": d.task_description,
                    "description": "Optional custom task description",
                },
            },
            "required": [],
        })
    }

    fn invalid(&self, reason: String) -> GateError {
        GateError::InvalidParameters {
            operation: self.name.clone(),
            reason,
        }
    }

    fn mismatch(&self, key: &str, expected: &str, value: &ParamValue) -> GateError {
        self.invalid(format!(
            "{key} must be {expected}, got {}",
            value.type_name()
        ))
    }

    fn expect_str<'a>(&self, key: &str, value: &'a ParamValue) -> Result<&'a str, GateError> {
        match value {
            ParamValue::Str(s) => Ok(s.as_str()),
            other => Err(self.mismatch(key, "a string", other)),
        }
    }

    // Agents frequently send `2.0` for an integer field; accept integral floats.
    fn expect_integer(&self, key: &str, value: &ParamValue) -> Result<i64, GateError> {
        match value {
            ParamValue::Int(n) => Ok(*n),
            ParamValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(*f as i64),
            other => Err(self.mismatch(key, "an integer", other)),
        }
    }

    fn expect_number(&self, key: &str, value: &ParamValue) -> Result<f64, GateError> {
        match value {
            ParamValue::Int(n) => Ok(*n as f64),
            ParamValue::Float(f) => Ok(*f),
            other => Err(self.mismatch(key, "a number", other)),
        }
    }
}

impl std::fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OperationRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only lookup table from operation name to [`OperationDescriptor`].
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<String, OperationDescriptor>,
}

impl OperationRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry holding the [`SLICING_WORKFLOW`] operations, each bound to
    /// the runner `runner_for` returns for it.
    pub fn slicing_workflow(
        mut runner_for: impl FnMut(&OperationSpec) -> Arc<dyn OperationRunner>,
    ) -> Result<Self, GateError> {
        SLICING_WORKFLOW
            .iter()
            .fold(Self::builder(), |b, spec| {
                b.register(OperationDescriptor::from_spec(spec, runner_for(spec)))
            })
            .build()
    }

    /// Pure lookup. `None` means the name is unknown.
    pub fn resolve(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name)
    }

    /// Descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.operations.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Collects descriptors; [`RegistryBuilder::build`] rejects duplicate names.
#[derive(Default)]
pub struct RegistryBuilder {
    descriptors: Vec<OperationDescriptor>,
}

impl RegistryBuilder {
    pub fn register(mut self, descriptor: OperationDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// # Errors
    ///
    /// Returns [`GateError::DuplicateOperation`] if two descriptors share a
    /// name.
    pub fn build(self) -> Result<OperationRegistry, GateError> {
        let mut operations = BTreeMap::new();
        for descriptor in self.descriptors {
            let name = descriptor.name().to_string();
            if operations.insert(name.clone(), descriptor).is_some() {
                return Err(GateError::DuplicateOperation(name));
            }
        }
        Ok(OperationRegistry { operations })
    }
}
