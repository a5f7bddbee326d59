//! Parameterised script templates with best-effort inverse scripts.

use crate::catalog::{AttributeCatalog, CatalogError, is_identifier};
use crate::script::{Instruction, MAX_INPUTS, Program};
use crate::{
    ActionSnapshot, AttrValue, CodeFragment, GeneratedScript, ScriptType, ScriptValidator,
    ValidationLevel, ValidationResult,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Error)]
enum GenerateError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("{0}")]
    Invalid(String),
}

/// `source` feeds input `input` of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub source: String,
    pub target: String,
    pub input: usize,
}

impl ConnectionSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>, input: usize) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            input,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    BasicComp,
    KeyingSetup,
    ColorCorrection,
    /// Remove unused nodes and redundant Dots. Planned against a scene view.
    CleanupNodes,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 4] = [
        WorkflowKind::BasicComp,
        WorkflowKind::KeyingSetup,
        WorkflowKind::ColorCorrection,
        WorkflowKind::CleanupNodes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::BasicComp => "basic_comp",
            WorkflowKind::KeyingSetup => "keying_setup",
            WorkflowKind::ColorCorrection => "color_correction",
            WorkflowKind::CleanupNodes => "cleanup_nodes",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown workflow type: {}", s))
    }
}

/// Inputs shared by the workflow templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Existing node to build on instead of creating a fresh Read.
    pub input_node: Option<String>,
    /// Top-left position of the layout.
    pub origin: (i64, i64),
    /// Current graph, required by [`WorkflowKind::CleanupNodes`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<ActionSnapshot>,
}

/// Unique node name of the form `<prefix>_<8 hex>`.
pub fn unique_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &id[..8])
}

/// Accumulates instructions and remembers which nodes the forward script
/// creates, so the inverse can delete them.
#[derive(Default)]
struct Builder {
    program: Program,
    created: Vec<String>,
}

impl Builder {
    fn create(
        &mut self,
        var: &str,
        class: &str,
        name: String,
        position: Option<(i64, i64)>,
        attrs: &[(&str, AttrValue)],
    ) {
        self.program.push(Instruction::Create {
            var: Some(var.to_string()),
            class: class.to_string(),
        });
        self.program.push(Instruction::SetName {
            var: var.to_string(),
            name: name.clone(),
        });
        if let Some((x, y)) = position {
            self.program.push(Instruction::SetPosition {
                var: var.to_string(),
                x,
                y,
            });
        }
        for (attr, value) in attrs {
            self.program.push(Instruction::SetAttr {
                var: var.to_string(),
                attr: attr.to_string(),
                value: value.clone(),
            });
        }
        self.created.push(name);
    }

    fn connect(&mut self, target: &str, input: usize, source: &str) {
        self.program.push(Instruction::Connect {
            target: target.to_string(),
            input,
            source: Some(source.to_string()),
        });
    }

    /// Bind `var` to the caller's input node, or create a fresh Read in its
    /// place. Returns true when the node was looked up.
    fn source(
        &mut self,
        input_node: Option<&str>,
        var: &str,
        label: &str,
        position: Option<(i64, i64)>,
    ) -> bool {
        match input_node {
            Some(name) => {
                self.program.push(Instruction::Lookup {
                    var: var.to_string(),
                    name: name.to_string(),
                });
                true
            }
            None => {
                self.create(var, "Read", unique_name(label), position, &[]);
                false
            }
        }
    }

    fn guarded_connect(&mut self, var: &str, target: &str, input: usize) {
        self.program.push(Instruction::Guard {
            var: var.to_string(),
            body: vec![Instruction::Connect {
                target: target.to_string(),
                input,
                source: Some(var.to_string()),
            }],
        });
    }

    /// Delete everything this builder created, newest first.
    fn undo_deletes(&self) -> Program {
        let mut undo = Program::default();
        for (i, name) in self.created.iter().enumerate().rev() {
            let var = format!("node_{}", i);
            undo.push(Instruction::Lookup {
                var: var.clone(),
                name: name.clone(),
            });
            undo.push(Instruction::Guard {
                var: var.clone(),
                body: vec![Instruction::Delete { var }],
            });
        }
        undo
    }
}

fn set_attrs<'a>(values: impl Iterator<Item = (&'a String, &'a AttrValue)>) -> Vec<Instruction> {
    values
        .map(|(attr, value)| Instruction::SetAttr {
            var: "node".into(),
            attr: attr.clone(),
            value: value.clone(),
        })
        .collect()
}

/// Classes that are kept even with nothing downstream.
const CLEANUP_KEEP: [&str; 2] = ["Viewer", "Write"];
/// Dots closer than this horizontally to their output are redundant.
const DOT_SLACK: i32 = 50;

/// Delete leaf nodes and collapse Dots that only pass a straight wire
/// through. Planned once against `scene`; every step is guarded so nodes
/// that vanished since are skipped.
fn cleanup_draft(scene: &ActionSnapshot) -> Draft {
    let nodes = &scene.entity_states;
    let has_output: BTreeSet<&str> = scene
        .connectivity
        .iter()
        .map(|c| c.source.as_str())
        .collect();

    let unused: BTreeSet<&str> = nodes
        .iter()
        .filter(|(name, state)| {
            is_identifier(name)
                && !has_output.contains(name.as_str())
                && !CLEANUP_KEEP.contains(&state.class.as_str())
        })
        .map(|(name, _)| name.as_str())
        .collect();

    let mut program = Program::default();
    for (i, name) in unused.iter().enumerate() {
        let var = format!("node_{}", i);
        program.push(Instruction::Lookup {
            var: var.clone(),
            name: name.to_string(),
        });
        program.push(Instruction::Guard {
            var: var.clone(),
            body: vec![Instruction::Delete { var }],
        });
    }

    let mut dots = 0;
    for (name, state) in nodes {
        if state.class != "Dot" || unused.contains(name.as_str()) || !is_identifier(name) {
            continue;
        }
        let Some(feed) = scene
            .connectivity
            .iter()
            .find(|c| c.target == *name && c.input == 0)
        else {
            continue;
        };
        let outgoing: Vec<_> = scene
            .connectivity
            .iter()
            .filter(|c| c.source == *name)
            .collect();
        let [out] = outgoing.as_slice() else {
            continue;
        };
        let (Some(input), Some(output)) = (nodes.get(&feed.source), nodes.get(&out.target)) else {
            continue;
        };
        // A chain of Dots collapses one link per pass.
        if input.class == "Dot" || output.class == "Dot" {
            continue;
        }
        if !is_identifier(&feed.source) || !is_identifier(&out.target) || out.input >= MAX_INPUTS {
            continue;
        }
        if (input.position.0 - output.position.0).abs() >= DOT_SLACK {
            continue;
        }

        let dot = format!("dot_{}", dots);
        let dot_in = format!("{}_in", dot);
        let dot_out = format!("{}_out", dot);
        program.push(Instruction::Lookup {
            var: dot.clone(),
            name: name.clone(),
        });
        program.push(Instruction::Lookup {
            var: dot_in.clone(),
            name: feed.source.clone(),
        });
        program.push(Instruction::Lookup {
            var: dot_out.clone(),
            name: out.target.clone(),
        });
        program.push(Instruction::Guard {
            var: dot_out.clone(),
            body: vec![Instruction::Guard {
                var: dot_in.clone(),
                body: vec![Instruction::Connect {
                    target: dot_out,
                    input: out.input,
                    source: Some(dot_in),
                }],
            }],
        });
        program.push(Instruction::Guard {
            var: dot.clone(),
            body: vec![Instruction::Delete { var: dot }],
        });
        dots += 1;
    }

    program.push(Instruction::Print {
        text: format!(
            "Cleanup complete. Removed {} unused nodes and {} redundant Dots.",
            unused.len(),
            dots
        ),
    });
    Draft {
        template: format!("workflow:{}", WorkflowKind::CleanupNodes),
        script_type: ScriptType::Utility,
        program,
        description: "Clean up unused nodes and optimize node graph".into(),
        estimated_cost: 1.0,
        dependencies: Vec::new(),
        undo: None,
    }
}

struct Draft {
    template: String,
    script_type: ScriptType,
    program: Program,
    description: String,
    estimated_cost: f64,
    dependencies: Vec<String>,
    undo: Option<Program>,
}

/// Produces validated scripts for common graph operations.
#[derive(Debug, Clone)]
pub struct ScriptGenerator {
    catalog: AttributeCatalog,
    validator: ScriptValidator,
}

impl Default for ScriptGenerator {
    fn default() -> Self {
        Self::new(ValidationLevel::Strict)
    }
}

impl ScriptGenerator {
    pub fn new(level: ValidationLevel) -> Self {
        Self {
            catalog: AttributeCatalog::builtin(),
            validator: ScriptValidator::new(level),
        }
    }

    pub fn with_catalog(mut self, catalog: AttributeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &AttributeCatalog {
        &self.catalog
    }

    // =========================================================================
    // Templates
    // =========================================================================

    pub fn node_creation(
        &self,
        class: &str,
        attrs: &BTreeMap<String, AttrValue>,
        position: Option<(i64, i64)>,
        name: Option<&str>,
    ) -> GeneratedScript {
        let draft = self.node_creation_draft(class, attrs, position, name);
        self.finish(draft)
    }

    fn node_creation_draft(
        &self,
        class: &str,
        attrs: &BTreeMap<String, AttrValue>,
        position: Option<(i64, i64)>,
        name: Option<&str>,
    ) -> Result<Draft, GenerateError> {
        self.catalog.check(class, attrs)?;
        let name = match name {
            Some(name) => {
                AttributeCatalog::check_identifier("node name", name)?;
                name.to_string()
            }
            None => unique_name(class),
        };

        let attr_list: Vec<(&str, AttrValue)> = attrs
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        let mut builder = Builder::default();
        builder.create("node", class, name.clone(), position, &attr_list);

        // Unguarded on purpose: a missing node makes the undo fail over to the snapshot.
        let undo = Program::new(vec![
            Instruction::Lookup {
                var: "node".into(),
                name: name.clone(),
            },
            Instruction::Delete { var: "node".into() },
        ]);

        Ok(Draft {
            template: "node_creation".into(),
            script_type: ScriptType::NodeCreation,
            program: builder.program,
            description: format!("Create {} node '{}'", class, name),
            estimated_cost: 0.1,
            dependencies: Vec::new(),
            undo: Some(undo),
        })
    }

    pub fn connection(&self, connections: &[ConnectionSpec]) -> GeneratedScript {
        let draft = self.connection_draft(connections);
        self.finish(draft)
    }

    fn connection_draft(&self, connections: &[ConnectionSpec]) -> Result<Draft, GenerateError> {
        if connections.is_empty() {
            return Err(GenerateError::Invalid("No connections given".into()));
        }

        let mut program = Program::default();
        let mut undo = Program::default();
        let mut dependencies = Vec::new();
        for (i, spec) in connections.iter().enumerate() {
            AttributeCatalog::check_identifier("node name", &spec.source)?;
            AttributeCatalog::check_identifier("node name", &spec.target)?;

            let source = format!("source_{}", i);
            let target = format!("target_{}", i);
            program.push(Instruction::Lookup {
                var: source.clone(),
                name: spec.source.clone(),
            });
            program.push(Instruction::Lookup {
                var: target.clone(),
                name: spec.target.clone(),
            });
            program.push(Instruction::Guard {
                var: source.clone(),
                body: vec![Instruction::Guard {
                    var: target.clone(),
                    body: vec![Instruction::Connect {
                        target: target.clone(),
                        input: spec.input,
                        source: Some(source),
                    }],
                }],
            });

            undo.push(Instruction::Lookup {
                var: target.clone(),
                name: spec.target.clone(),
            });
            undo.push(Instruction::Guard {
                var: target.clone(),
                body: vec![Instruction::Connect {
                    target,
                    input: spec.input,
                    source: None,
                }],
            });

            for name in [&spec.source, &spec.target] {
                if !dependencies.contains(name) {
                    dependencies.push(name.clone());
                }
            }
        }

        Ok(Draft {
            template: "connection".into(),
            script_type: ScriptType::ConnectionSetup,
            program,
            description: format!("Create {} node connection(s)", connections.len()),
            estimated_cost: 0.05 * connections.len() as f64,
            dependencies,
            undo: Some(undo),
        })
    }

    /// Adjust attributes of an existing node. With `originals`, the undo
    /// script restores those values.
    pub fn parameter_adjustment(
        &self,
        name: &str,
        class: &str,
        attrs: &BTreeMap<String, AttrValue>,
        originals: Option<&BTreeMap<String, AttrValue>>,
    ) -> GeneratedScript {
        let draft = self.parameter_draft(name, class, attrs, originals);
        self.finish(draft)
    }

    fn parameter_draft(
        &self,
        name: &str,
        class: &str,
        attrs: &BTreeMap<String, AttrValue>,
        originals: Option<&BTreeMap<String, AttrValue>>,
    ) -> Result<Draft, GenerateError> {
        AttributeCatalog::check_identifier("node name", name)?;
        self.catalog.check(class, attrs)?;
        if attrs.is_empty() {
            return Err(GenerateError::Invalid(format!(
                "No attributes given for {}",
                name
            )));
        }

        let mut body = set_attrs(attrs.iter());
        body.push(Instruction::Print {
            text: format!("Parameters updated for {}", name),
        });
        let program = Program::new(vec![
            Instruction::Lookup {
                var: "node".into(),
                name: name.to_string(),
            },
            Instruction::Guard {
                var: "node".into(),
                body,
            },
        ]);

        let undo = originals.and_then(|originals| {
            let restores =
                set_attrs(attrs.keys().filter_map(|attr| originals.get_key_value(attr)));
            (!restores.is_empty()).then(|| {
                Program::new(vec![
                    Instruction::Lookup {
                        var: "node".into(),
                        name: name.to_string(),
                    },
                    Instruction::Guard {
                        var: "node".into(),
                        body: restores,
                    },
                ])
            })
        });

        Ok(Draft {
            template: "parameter_adjustment".into(),
            script_type: ScriptType::ParameterAdjustment,
            program,
            description: format!("Adjust parameters for {}", name),
            estimated_cost: 0.05,
            dependencies: vec![name.to_string()],
            undo,
        })
    }

    pub fn workflow(&self, kind: WorkflowKind, ctx: &WorkflowContext) -> GeneratedScript {
        let draft = self.workflow_draft(kind, ctx);
        self.finish(draft)
    }

    /// Workflow by name. Unknown names yield an error script.
    pub fn workflow_named(&self, kind: &str, ctx: &WorkflowContext) -> GeneratedScript {
        match kind.parse::<WorkflowKind>() {
            Ok(kind) => self.workflow(kind, ctx),
            Err(e) => {
                error!("Error generating workflow script: {}", e);
                Self::error_script(&e)
            }
        }
    }

    fn workflow_draft(
        &self,
        kind: WorkflowKind,
        ctx: &WorkflowContext,
    ) -> Result<Draft, GenerateError> {
        if let Some(input) = &ctx.input_node {
            AttributeCatalog::check_identifier("node name", input)?;
        }
        let (ox, oy) = ctx.origin;
        let at = |dx: i64, dy: i64| match (ox.checked_add(dx), oy.checked_add(dy)) {
            (Some(x), Some(y)) => Ok(Some((x, y))),
            _ => Err(GenerateError::Invalid("layout origin out of range".into())),
        };
        let mut b = Builder::default();

        let input = ctx.input_node.as_deref();
        let (description, cost) = match kind {
            WorkflowKind::BasicComp => {
                let looked_up = b.source(input, "bg", "Background", at(0, 0)?);
                b.create("fg", "Read", unique_name("Foreground"), at(200, 0)?, &[]);
                b.create("merge", "Merge2", unique_name("Merge"), at(100, 100)?, &[]);
                if looked_up {
                    b.guarded_connect("bg", "merge", 0);
                } else {
                    b.connect("merge", 0, "bg");
                }
                b.connect("merge", 1, "fg");
                b.create("viewer", "Viewer", unique_name("Viewer"), at(100, 200)?, &[]);
                b.connect("viewer", 0, "merge");
                (
                    "Basic compositing workflow with background, foreground, and merge",
                    0.5,
                )
            }
            WorkflowKind::KeyingSetup => {
                let looked_up = b.source(input, "source", "Source_Plate", at(0, 0)?);
                b.create("keyer", "Keyer", unique_name("Keyer"), at(0, 100)?, &[]);
                b.create(
                    "erode",
                    "FilterErode",
                    unique_name("Erode"),
                    at(0, 200)?,
                    &[("size", AttrValue::Float(-0.5))],
                );
                b.connect("erode", 0, "keyer");
                b.create(
                    "blur",
                    "Blur",
                    unique_name("Edge_Blur"),
                    at(0, 300)?,
                    &[("size", AttrValue::Float(1.0))],
                );
                b.connect("blur", 0, "erode");
                b.create("premult", "Premult", unique_name("Premult"), at(0, 400)?, &[]);
                b.connect("premult", 1, "blur");
                if looked_up {
                    b.guarded_connect("source", "keyer", 0);
                    b.guarded_connect("source", "premult", 0);
                } else {
                    b.connect("keyer", 0, "source");
                    b.connect("premult", 0, "source");
                }
                (
                    "Keying workflow with edge cleanup and premultiplication",
                    0.8,
                )
            }
            WorkflowKind::ColorCorrection => {
                let looked_up = b.source(input, "input_node", "Source", at(0, 0)?);
                b.create("grade", "Grade", unique_name("Primary_Grade"), at(0, 100)?, &[]);
                b.create(
                    "cc",
                    "ColorCorrect",
                    unique_name("Secondary_CC"),
                    at(0, 200)?,
                    &[],
                );
                b.connect("cc", 0, "grade");
                b.create("gamma", "Gamma", unique_name("Final_Gamma"), at(0, 300)?, &[]);
                b.connect("gamma", 0, "cc");
                if looked_up {
                    b.guarded_connect("input_node", "grade", 0);
                } else {
                    b.connect("grade", 0, "input_node");
                }
                (
                    "Color correction workflow with primary, secondary, and final adjustments",
                    0.3,
                )
            }
            WorkflowKind::CleanupNodes => {
                let scene = ctx.scene.as_ref().ok_or_else(|| {
                    GenerateError::Invalid("cleanup_nodes needs a view of the current scene".into())
                })?;
                return Ok(cleanup_draft(scene));
            }
        };

        let undo = b.undo_deletes();
        Ok(Draft {
            template: format!("workflow:{}", kind),
            script_type: ScriptType::WorkflowAutomation,
            program: b.program,
            description: description.to_string(),
            estimated_cost: cost,
            dependencies: ctx.input_node.iter().cloned().collect(),
            undo: Some(undo),
        })
    }

    // =========================================================================
    // Output
    // =========================================================================

    fn finish(&self, draft: Result<Draft, GenerateError>) -> GeneratedScript {
        let draft = match draft {
            Ok(draft) => draft,
            Err(e) => {
                error!("Error generating script: {}", e);
                return Self::error_script(&e.to_string());
            }
        };

        let code = CodeFragment::from_template(&draft.template, draft.program.render());
        let validation = self.validator.validate(&code);
        if !validation.is_valid {
            let reason = format!(
                "Generated script failed validation: {}",
                validation.errors.join("; ")
            );
            error!("{}", reason);
            return Self::error_script(&reason);
        }

        let undo_template = format!("{}:undo", draft.template);
        let undo_code = draft
            .undo
            .map(|p| CodeFragment::from_template(&undo_template, p.render()));

        debug!(
            template = %draft.template,
            risk = validation.risk_level.as_str(),
            "Generated script"
        );
        GeneratedScript {
            script_type: draft.script_type,
            code,
            description: draft.description,
            validation,
            estimated_cost: draft.estimated_cost,
            dependencies: draft.dependencies,
            undo_code,
        }
    }

    /// Inert script that reports why generation failed. Never applicable.
    pub fn error_script(message: &str) -> GeneratedScript {
        let program = Program::new(vec![Instruction::Print {
            text: format!("Script generation failed: {}", message),
        }]);
        GeneratedScript {
            script_type: ScriptType::Utility,
            code: CodeFragment::from_template("error", program.render()),
            description: format!("Error: {}", message),
            validation: ValidationResult::rejected(message),
            estimated_cost: 0.0,
            dependencies: Vec::new(),
            undo_code: None,
        }
    }
}
