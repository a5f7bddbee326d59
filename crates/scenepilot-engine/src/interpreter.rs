//! Interprets instruction programs against a [`HostGraph`].

use std::collections::HashMap;

use scenepilot_core::AttrValue;
use scenepilot_core::script::{Instruction, MAX_INPUTS, Program};
use tracing::debug;

use crate::host::{HostError, HostGraph};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Printed lines, newline separated.
    pub output: String,
    /// Instructions that ran, guard bodies included.
    pub steps: usize,
}

/// Variable bindings. `None` means the name is bound but refers to no node,
/// as after a failed `toNode` lookup or a delete.
type Bindings = HashMap<String, Option<String>>;

pub fn execute<H: HostGraph + ?Sized>(
    program: &Program,
    host: &H,
) -> Result<ExecutionReport, HostError> {
    let mut vars = Bindings::new();
    let mut report = ExecutionReport::default();
    run_block(&program.instructions, host, &mut vars, &mut report)?;
    debug!(steps = report.steps, "Program finished");
    Ok(report)
}

fn run_block<H: HostGraph + ?Sized>(
    block: &[Instruction],
    host: &H,
    vars: &mut Bindings,
    report: &mut ExecutionReport,
) -> Result<(), HostError> {
    for instruction in block {
        report.steps += 1;
        match instruction {
            Instruction::ImportHost => {}
            Instruction::Create { var, class } => {
                let id = host.create_entity(class)?;
                if let Some(var) = var {
                    vars.insert(var.clone(), Some(id));
                }
            }
            Instruction::Lookup { var, name } => {
                let found = host.entity_by_id(name)?.map(|entity| entity.id);
                vars.insert(var.clone(), found);
            }
            Instruction::SetName { var, name } => {
                let id = resolve(vars, var)?;
                host.rename_entity(&id, name)?;
                vars.insert(var.clone(), Some(name.clone()));
            }
            Instruction::SetPosition { var, x, y } => {
                let id = resolve(vars, var)?;
                host.set_attribute(&id, "xpos", AttrValue::Int(*x))?;
                host.set_attribute(&id, "ypos", AttrValue::Int(*y))?;
            }
            Instruction::SetAttr { var, attr, value } => {
                let id = resolve(vars, var)?;
                host.set_attribute(&id, attr, value.clone())?;
            }
            Instruction::Connect {
                target,
                input,
                source,
            } => {
                if *input >= MAX_INPUTS {
                    return Err(HostError::Runtime(format!(
                        "input index {} out of range (max {})",
                        input,
                        MAX_INPUTS - 1
                    )));
                }
                let target = resolve(vars, target)?;
                let source = source.as_ref().map(|s| resolve(vars, s)).transpose()?;
                host.connect(&target, *input, source.as_deref())?;
            }
            Instruction::Delete { var } => {
                let id = resolve(vars, var)?;
                host.delete_entity(&id)?;
                // Any other name still bound to this node now dangles too.
                for bound in vars.values_mut() {
                    if bound.as_deref() == Some(id.as_str()) {
                        *bound = None;
                    }
                }
            }
            Instruction::ClearSelection => host.select(&[])?,
            Instruction::Print { text } => {
                if !report.output.is_empty() {
                    report.output.push('\n');
                }
                report.output.push_str(text);
            }
            Instruction::Guard { var, body } => {
                let bound = vars
                    .get(var)
                    .ok_or_else(|| undefined(var))?
                    .is_some();
                if bound {
                    run_block(body, host, vars, report)?;
                }
            }
        }
    }
    Ok(())
}

fn resolve(vars: &Bindings, var: &str) -> Result<String, HostError> {
    match vars.get(var) {
        Some(Some(id)) => Ok(id.clone()),
        Some(None) => Err(HostError::Runtime(format!(
            "'{}' does not refer to an existing node",
            var
        ))),
        None => Err(undefined(var)),
    }
}

fn undefined(var: &str) -> HostError {
    HostError::Runtime(format!("name '{}' is not defined", var))
}
