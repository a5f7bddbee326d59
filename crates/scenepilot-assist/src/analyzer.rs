use regex::Regex;
use scenepilot_core::safety::{self, Classification, SafetyLevel};
use scenepilot_core::script::Program;
use scenepilot_core::syntax;
use scenepilot_core::{
    CodeFragment, GeneratedScript, ScriptType, ScriptValidator, ValidationLevel, ValidationResult,
};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::operations::{Runtime, detect_operations};
use crate::parse;

static NODE_LOOKUP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"nuke\.toNode\(\s*["']([^"']+)["']\s*\)"#).ok());

/// What kind of change a response proposes, by keyword precedence.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    #[default]
    Unknown,
    ScriptExecution,
    RenderOperation,
    Connection,
    NodeModification,
    NodeCreation,
}

impl ActionType {
    /// Classify one block. Ordering of the enum encodes precedence.
    pub fn classify(code: &str) -> Self {
        if code.contains("createNode") {
            ActionType::NodeCreation
        } else if code.contains("delete") || code.contains(".setValue") {
            ActionType::NodeModification
        } else if code.contains("setInput") {
            ActionType::Connection
        } else if code.contains("render") || code.contains("execute") {
            ActionType::RenderOperation
        } else {
            ActionType::ScriptExecution
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Unknown => "unknown",
            ActionType::ScriptExecution => "script_execution",
            ActionType::RenderOperation => "render_operation",
            ActionType::Connection => "connection",
            ActionType::NodeModification => "node_modification",
            ActionType::NodeCreation => "node_creation",
        }
    }

    pub fn script_type(&self) -> ScriptType {
        match self {
            ActionType::NodeCreation => ScriptType::NodeCreation,
            ActionType::NodeModification => ScriptType::NodeModification,
            ActionType::Connection => ScriptType::ConnectionSetup,
            ActionType::RenderOperation | ActionType::ScriptExecution | ActionType::Unknown => {
                ScriptType::Utility
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzerConfig {
    pub validation_level: ValidationLevel,
}

/// One extracted code block and everything learned about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzedBlock {
    pub fragment: CodeFragment,
    pub validation: ValidationResult,
    pub classification: Classification,
    pub safety_level: SafetyLevel,
    pub action_type: ActionType,
    pub operations: Vec<&'static str>,
    pub runtime: Runtime,
    /// Parses into the supported instruction set, so it can actually run.
    pub interpretable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionAnalysis {
    pub blocks: Vec<AnalyzedBlock>,
    pub action_type: ActionType,
    pub safety_level: SafetyLevel,
    pub affects_host_state: bool,
    pub requires_confirmation: bool,
    pub estimated_runtime: Runtime,
    pub operations: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub description: String,
}

impl ActionAnalysis {
    pub fn is_blocked(&self) -> bool {
        self.safety_level == SafetyLevel::Blocked
    }

    /// Turn every block into a script the applier can take.
    pub fn scripts(&self) -> Vec<GeneratedScript> {
        let total = self.blocks.len();
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let description = if total == 1 {
                    self.description.clone()
                } else {
                    format!("{} (block {}/{})", self.description, i + 1, total)
                };
                GeneratedScript {
                    script_type: block.action_type.script_type(),
                    code: block.fragment.clone(),
                    description,
                    validation: block.validation.clone(),
                    estimated_cost: block.runtime.seconds(),
                    dependencies: lookups(block.fragment.text()),
                    undo_code: None,
                }
            })
            .collect()
    }
}

/// Summary shown before a fragment is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionPreview {
    pub description: String,
    pub operations: Vec<String>,
    pub safety_level: SafetyLevel,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub suggestions: Vec<String>,
    pub affects_host_state: bool,
    pub estimated_runtime: Runtime,
    pub validation_summary: String,
    pub interpretable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunReport {
    pub passed: bool,
    pub steps: Vec<String>,
}

/// Node names a fragment looks up, in first-seen order.
fn lookups(code: &str) -> Vec<String> {
    let Some(re) = NODE_LOOKUP.as_ref() else {
        return Vec::new();
    };
    let mut names: Vec<String> = Vec::new();
    for caps in re.captures_iter(code) {
        if let Some(name) = caps.get(1).map(|m| m.as_str().to_string())
            && !names.contains(&name)
        {
            names.push(name);
        }
    }
    names
}

pub struct ActionAnalyzer {
    validator: ScriptValidator,
}

impl Default for ActionAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl ActionAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            validator: ScriptValidator::new(config.validation_level),
        }
    }

    /// Analyze an assistant response. `None` when it holds nothing actionable.
    pub fn analyze(&self, response: &str) -> Option<ActionAnalysis> {
        let codes = parse::extract_code_blocks(response);
        if codes.is_empty() {
            debug!("No actionable code in response");
            return None;
        }

        let blocks: Vec<AnalyzedBlock> = codes
            .into_iter()
            .map(|code| self.analyze_block(CodeFragment::from_response(code)))
            .collect();
        let description = parse::describe_response(response, blocks.len());
        let analysis = aggregate(blocks, description);

        info!(
            blocks = analysis.blocks.len(),
            action_type = ?analysis.action_type,
            safety = analysis.safety_level.as_str(),
            requires_confirmation = analysis.requires_confirmation,
            "Detected actionable content"
        );
        Some(analysis)
    }

    pub fn analyze_block(&self, fragment: CodeFragment) -> AnalyzedBlock {
        let code = fragment.text();
        let validation = self.validator.validate(&fragment);
        let classification = safety::classify(&fragment);
        let safety_level = if validation.is_valid {
            classification.level
        } else {
            SafetyLevel::Blocked
        };
        let interpretable = validation.is_valid && Program::parse(code).is_ok();

        AnalyzedBlock {
            validation,
            safety_level,
            action_type: ActionType::classify(code),
            operations: detect_operations(code),
            runtime: Runtime::estimate(code),
            interpretable,
            classification,
            fragment,
        }
    }

    pub fn preview(&self, fragment: &CodeFragment) -> ActionPreview {
        let block = self.analyze_block(fragment.clone());
        let description = if block.operations.is_empty() {
            "Execute 1 code block(s)".to_string()
        } else {
            block.operations.join(", ")
        };
        ActionPreview {
            description,
            operations: block.operations.iter().map(|s| s.to_string()).collect(),
            safety_level: block.safety_level,
            warnings: block.validation.warnings.clone(),
            errors: block.validation.errors.clone(),
            suggestions: block.validation.suggestions.clone(),
            affects_host_state: !block.operations.is_empty(),
            estimated_runtime: block.runtime,
            validation_summary: block.validation.summary(),
            interpretable: block.interpretable,
        }
    }

    /// Walk through what applying `fragment` would do, without a host.
    pub fn dry_run(&self, fragment: &CodeFragment) -> DryRunReport {
        let mut steps = vec!["Performing dry run...".to_string()];

        if let Err(e) = syntax::check(fragment.text()) {
            steps.push(format!("✗ Syntax error: {}", e));
            return DryRunReport {
                passed: false,
                steps,
            };
        }
        steps.push("✓ Syntax check passed".to_string());

        let validation = self.validator.validate(fragment);
        for warning in &validation.warnings {
            steps.push(format!("⚠ {}", warning));
        }
        if !validation.is_valid {
            for error in &validation.errors {
                steps.push(format!("✗ {}", error));
            }
            return DryRunReport {
                passed: false,
                steps,
            };
        }

        let program = match Program::parse(fragment.text()) {
            Ok(program) => program,
            Err(e) => {
                steps.push(format!("✗ Cannot be interpreted: {}", e));
                return DryRunReport {
                    passed: false,
                    steps,
                };
            }
        };
        steps.push("✓ Fragment uses the supported instruction set".to_string());

        let operations = detect_operations(fragment.text());
        if !operations.is_empty() {
            steps.push("Operations that would be performed:".to_string());
            steps.extend(operations.iter().map(|op| format!("  • {}", op)));
        }
        steps.push("Steps:".to_string());
        steps.extend(
            program
                .steps()
                .iter()
                .enumerate()
                .map(|(i, step)| format!("  {}. {}", i + 1, step.describe())),
        );
        steps.push("Dry run completed successfully".to_string());
        DryRunReport {
            passed: true,
            steps,
        }
    }
}

fn aggregate(blocks: Vec<AnalyzedBlock>, description: String) -> ActionAnalysis {
    let action_type = blocks
        .iter()
        .map(|b| b.action_type)
        .max()
        .unwrap_or_default();
    let safety_level = blocks
        .iter()
        .map(|b| b.safety_level)
        .max()
        .unwrap_or_default();
    let estimated_runtime = blocks.iter().map(|b| b.runtime).max().unwrap_or_default();

    let mut operations: Vec<String> = Vec::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    for block in &blocks {
        for op in &block.operations {
            if !operations.iter().any(|o| o == op) {
                operations.push(op.to_string());
            }
        }
        warnings.extend(block.validation.warnings.iter().cloned());
        errors.extend(block.validation.errors.iter().cloned());
    }
    let affects_host_state = !operations.is_empty();

    let requires_confirmation = safety_level != SafetyLevel::Blocked
        && (matches!(safety_level, SafetyLevel::Caution | SafetyLevel::Dangerous)
            || affects_host_state
            || estimated_runtime != Runtime::Quick);

    ActionAnalysis {
        blocks,
        action_type,
        safety_level,
        affects_host_state,
        requires_confirmation,
        estimated_runtime,
        operations,
        warnings,
        errors,
        description,
    }
}
