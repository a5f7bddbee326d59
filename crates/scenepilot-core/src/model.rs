use crate::{ActionError, CodeFragment, ErrorKind, StatusError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

// =============================================================================
// Validation types
// =============================================================================

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// How strictly blocking patterns are treated during validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Blocking patterns invalidate the fragment.
    Strict,
    /// Blocking patterns and cautionary patterns are reported as warnings.
    #[default]
    Moderate,
    /// Only blocking patterns are reported, as warnings.
    Permissive,
}

impl FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(ValidationLevel::Strict),
            "moderate" => Ok(ValidationLevel::Moderate),
            "permissive" => Ok(ValidationLevel::Permissive),
            other => Err(format!("Unknown validation level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub risk_level: RiskLevel,
}

impl ValidationResult {
    /// A failed result carrying a single error at high risk.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![error.into()],
            warnings: Vec::new(),
            suggestions: Vec::new(),
            risk_level: RiskLevel::High,
        }
    }

    /// One-line summary for confirmation prompts and previews.
    pub fn summary(&self) -> String {
        let verdict = if self.is_valid { "valid" } else { "invalid" };
        format!(
            "{} (risk {}, {} error(s), {} warning(s), {} suggestion(s))",
            verdict,
            self.risk_level.as_str(),
            self.errors.len(),
            self.warnings.len(),
            self.suggestions.len()
        )
    }
}

// =============================================================================
// Generated scripts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    NodeCreation,
    NodeModification,
    ConnectionSetup,
    ParameterAdjustment,
    WorkflowAutomation,
    Utility,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::NodeCreation => "node_creation",
            ScriptType::NodeModification => "node_modification",
            ScriptType::ConnectionSetup => "connection_setup",
            ScriptType::ParameterAdjustment => "parameter_adjustment",
            ScriptType::WorkflowAutomation => "workflow_automation",
            ScriptType::Utility => "utility",
        }
    }
}

/// A script ready for the applier, with its validation and advisory undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedScript {
    pub script_type: ScriptType,
    pub code: CodeFragment,
    pub description: String,
    pub validation: ValidationResult,
    /// Rough execution estimate in seconds.
    pub estimated_cost: f64,
    /// Entities that must exist for the script to do anything.
    pub dependencies: Vec<String>,
    /// Best-effort inverse. Not guaranteed if later actions built on the result.
    pub undo_code: Option<CodeFragment>,
}

// =============================================================================
// Attribute values
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<f64>),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(v: Vec<f64>) -> Self {
        AttrValue::List(v)
    }
}

impl FromStr for AttrValue {
    type Err = std::convert::Infallible;

    /// Loose parse for command-line `name=value` pairs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = match trimmed {
            "true" | "True" => AttrValue::Bool(true),
            "false" | "False" => AttrValue::Bool(false),
            _ => {
                if let Ok(i) = trimmed.parse::<i64>() {
                    AttrValue::Int(i)
                } else if let Ok(f) = trimmed.parse::<f64>() {
                    AttrValue::Float(f)
                } else if let Some(list) = parse_number_list(trimmed) {
                    AttrValue::List(list)
                } else {
                    AttrValue::Text(trimmed.to_string())
                }
            }
        };
        Ok(value)
    }
}

fn parse_number_list(s: &str) -> Option<Vec<f64>> {
    let inner = s.strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner.split(',').map(|p| p.trim().parse::<f64>().ok()).collect()
}

// =============================================================================
// Snapshots
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub class: String,
    pub selected: bool,
    pub position: (i32, i32),
    pub attributes: BTreeMap<String, AttrValue>,
}

/// A directed edge: `source` feeds input `input` of `target`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub target: String,
    pub input: usize,
    pub source: String,
}

/// Best-effort capture of host state taken right before an apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSnapshot {
    pub timestamp: u64,
    pub selected_entity_ids: Vec<String>,
    pub entity_states: BTreeMap<String, EntityState>,
    pub connectivity: Vec<Connection>,
    pub host_dirty_flag: bool,
}

// =============================================================================
// Applied actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Success,
    Failed,
    RolledBack,
}

impl ActionStatus {
    pub fn allowed_transitions(self) -> &'static [ActionStatus] {
        use ActionStatus::*;
        match self {
            Pending => &[Executing, Failed],
            Executing => &[Success, Failed],
            Success => &[RolledBack],
            Failed => &[],
            RolledBack => &[],
        }
    }

    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Executing => "executing",
            ActionStatus::Success => "success",
            ActionStatus::Failed => "failed",
            ActionStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ScriptExecution,
    ParameterChange,
    NodeCreation,
    ConnectionChange,
    WorkflowApplication,
    Batch,
}

impl From<ScriptType> for ActionKind {
    fn from(script_type: ScriptType) -> Self {
        match script_type {
            ScriptType::NodeCreation => ActionKind::NodeCreation,
            ScriptType::ConnectionSetup => ActionKind::ConnectionChange,
            ScriptType::ParameterAdjustment => ActionKind::ParameterChange,
            ScriptType::WorkflowAutomation => ActionKind::WorkflowApplication,
            ScriptType::NodeModification | ScriptType::Utility => ActionKind::ScriptExecution,
        }
    }
}

/// Record of one apply, mutated in place through its status transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedAction {
    pub id: Uuid,
    pub action_type: ActionKind,
    pub description: String,
    pub timestamp: u64,
    pub status: ActionStatus,
    pub script: Option<GeneratedScript>,
    pub pre_snapshot: Option<ActionSnapshot>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Text printed by the script while it ran.
    pub output: Option<String>,
    pub user_confirmed: bool,
    /// Sub-applies grouped under a batch entry, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AppliedAction>,
}

impl AppliedAction {
    pub fn pending(
        action_type: ActionKind,
        description: impl Into<String>,
        script: Option<GeneratedScript>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_type,
            description: description.into(),
            timestamp: now_millis(),
            status: ActionStatus::Pending,
            script,
            pre_snapshot: None,
            duration_ms: 0,
            error: None,
            error_kind: None,
            output: None,
            user_confirmed: false,
            children: Vec::new(),
        }
    }

    pub fn for_script(script: GeneratedScript) -> Self {
        let description = script.description.clone();
        Self::pending(script.script_type.into(), description, Some(script))
    }

    pub fn transition(&mut self, to: ActionStatus) -> Result<(), StatusError> {
        if !self.status.can_transition_to(to) {
            return Err(StatusError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Move to `Failed` and record the error text and kind.
    pub fn fail(&mut self, error: &ActionError) -> Result<(), StatusError> {
        self.transition(ActionStatus::Failed)?;
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
        Ok(())
    }

    pub fn is_undoable(&self) -> bool {
        self.status == ActionStatus::Success
    }

    pub fn undo_code(&self) -> Option<&CodeFragment> {
        self.script.as_ref().and_then(|s| s.undo_code.as_ref())
    }
}
