//! Pipeline definitions: the immutable plan a run executes
//!
//! A [`PipelineDefinition`] is authored externally (UI, API, YAML file) and
//! is read-only for the duration of a run. It carries an ordered list of
//! typed [`StepDefinition`]s, optional [`Edge`]s forming a DAG, and a
//! [`PipelineContext`] with run-level knobs. When `edges` is empty the steps
//! execute as a linear chain in declaration order.
//!
//! Step `config` is opaque to the orchestrator - it is handed verbatim to the
//! external executor selected by `adapter_code`. The engine itself only
//! parses the slices it owns: the gate policy ([`GateStepConfig`]) and the
//! parallelism/idempotency knobs in the context.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Default bound for concurrently executing steps
pub const DEFAULT_MAX_CONCURRENT_STEPS: usize = 4;

/// Kind of a pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Trigger,
    Extract,
    Transform,
    Validate,
    Enrich,
    Route,
    Load,
    Export,
    Feed,
    Sink,
    Gate,
    /// Forward compatibility: kinds this engine version does not know are
    /// dispatched as skipped with an `unhandled` flag.
    #[serde(other)]
    Unknown,
}

impl StepKind {
    /// Terminal kinds consume records without producing successors' input
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepKind::Load | StepKind::Export | StepKind::Feed | StepKind::Sink
        )
    }

    /// Wire name (matches the serialized form)
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Trigger => "TRIGGER",
            StepKind::Extract => "EXTRACT",
            StepKind::Transform => "TRANSFORM",
            StepKind::Validate => "VALIDATE",
            StepKind::Enrich => "ENRICH",
            StepKind::Route => "ROUTE",
            StepKind::Load => "LOAD",
            StepKind::Export => "EXPORT",
            StepKind::Feed => "FEED",
            StepKind::Sink => "SINK",
            StepKind::Gate => "GATE",
            StepKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, kind-specific step configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepConfig(pub serde_json::Map<String, Value>);

impl StepConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a raw config field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a config field (builder-style use in tests and authoring code)
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// The adapter selecting the concrete executor implementation
    pub fn adapter_code(&self) -> Option<&str> {
        self.0.get("adapterCode").and_then(Value::as_str)
    }

    /// Read a string field
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Read a numeric field
    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// Read a float field
    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }
}

/// Gate approval policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateApprovalType {
    #[default]
    Manual,
    Threshold,
    Timeout,
}

impl GateApprovalType {
    pub fn as_str(self) -> &'static str {
        match self {
            GateApprovalType::Manual => "MANUAL",
            GateApprovalType::Threshold => "THRESHOLD",
            GateApprovalType::Timeout => "TIMEOUT",
        }
    }
}

/// Parsed configuration of a GATE step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateStepConfig {
    pub approval_type: GateApprovalType,
    pub timeout_seconds: Option<u64>,
    pub error_threshold_percent: Option<f64>,
    pub notify_webhook: Option<String>,
    pub notify_email: Option<String>,
    pub preview_count: Option<usize>,
}

impl Default for GateStepConfig {
    fn default() -> Self {
        Self {
            approval_type: GateApprovalType::Manual,
            timeout_seconds: None,
            error_threshold_percent: None,
            notify_webhook: None,
            notify_email: None,
            preview_count: None,
        }
    }
}

impl GateStepConfig {
    /// Number of pending records surfaced as a preview (default 10)
    pub fn preview_count(&self) -> usize {
        self.preview_count.unwrap_or(10)
    }
}

/// One node in the pipeline graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Unique key within the pipeline
    pub key: String,
    #[serde(rename = "type")]
    pub step_type: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub config: StepConfig,
}

impl StepDefinition {
    pub fn new(key: impl Into<String>, step_type: StepKind) -> Self {
        Self {
            key: key.into(),
            step_type,
            name: None,
            config: StepConfig::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    /// Parse this step's gate policy; errors on a malformed config
    pub fn gate_config(&self) -> Result<GateStepConfig> {
        if self.config.0.is_empty() {
            return Ok(GateStepConfig::default());
        }
        serde_json::from_value(Value::Object(self.config.0.clone())).map_err(|e| {
            PipelineError::DefinitionInvalid(format!(
                "gate step '{}' has malformed config: {e}",
                self.key
            ))
        })
    }
}

/// Directed dependency between two steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    /// Selects one branch of a ROUTE predecessor; absent means all branches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: None,
            from: from.into(),
            to: to.into(),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Step-error policy in bounded-parallel mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorPolicy {
    /// First step error aborts the run once in-flight steps drain
    #[default]
    FailFast,
    /// Step errors are recorded; independent branches keep going
    BestEffort,
}

/// Parallel execution knobs carried in the pipeline context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParallelExecution {
    pub enabled: bool,
    pub max_concurrent_steps: usize,
    pub error_policy: ErrorPolicy,
}

impl Default for ParallelExecution {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent_steps: DEFAULT_MAX_CONCURRENT_STEPS,
            error_policy: ErrorPolicy::FailFast,
        }
    }
}

/// Run-level variables and knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineContext {
    /// Free-form variables surfaced to executors
    pub variables: serde_json::Map<String, Value>,
    pub parallel_execution: Option<ParallelExecution>,
    /// Field whose value fingerprints a record for same-run deduplication
    /// immediately before LOAD
    pub idempotency_key: Option<String>,
}

/// Trigger wiring for consumer-driven pipelines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerDefinition {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

/// Immutable plan for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    /// Positive, monotonically assigned by the authoring layer
    pub version: u32,
    pub steps: Vec<StepDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub context: PipelineContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerDefinition>,
}

impl PipelineDefinition {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            steps: Vec::new(),
            edges: Vec::new(),
            context: PipelineContext::default(),
            capabilities: None,
            depends_on: Vec::new(),
            trigger: None,
        }
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_context(mut self, context: PipelineContext) -> Self {
        self.context = context;
        self
    }

    /// Parse a canonical JSON definition and validate it
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let definition: PipelineDefinition = serde_json::from_str(raw)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Parse a canonical YAML definition and validate it
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let definition: PipelineDefinition = serde_yaml::from_str(raw)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Look up a step by key
    pub fn step(&self, key: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.key == key)
    }

    /// Linear execution applies iff no edges are present
    pub fn is_linear(&self) -> bool {
        self.edges.is_empty()
    }

    /// Effective parallelism settings; `None` means sequential
    pub fn parallelism(&self) -> Option<&ParallelExecution> {
        self.context
            .parallel_execution
            .as_ref()
            .filter(|parallel| parallel.enabled)
    }

    /// Structural validation: positive version, unique step keys, edge
    /// endpoints that exist. Acyclicity is enforced by the topology builder.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(PipelineError::DefinitionInvalid(
                "version must be a positive integer".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(PipelineError::DefinitionInvalid(
                "pipeline has no steps".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.key.is_empty() {
                return Err(PipelineError::DefinitionInvalid(
                    "step key must not be empty".to_string(),
                ));
            }
            if !seen.insert(step.key.as_str()) {
                return Err(PipelineError::DefinitionInvalid(format!(
                    "duplicate step key '{}'",
                    step.key
                )));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(PipelineError::DefinitionInvalid(format!(
                        "edge references unknown step '{endpoint}'"
                    )));
                }
            }
            if edge.from == edge.to {
                return Err(PipelineError::DefinitionInvalid(format!(
                    "self-edge on step '{}'",
                    edge.from
                )));
            }
        }

        Ok(())
    }
}
