//! The capability interface to the externally owned scene graph.

use scenepilot_core::script::Program;
use scenepilot_core::{AttrValue, CodeFragment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::interpreter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Node not found: {0}")]
    NotFound(String),
    #[error("Name already in use: {0}")]
    NameInUse(String),
    #[error("Script rejected: {0}")]
    Script(String),
    #[error("{0}")]
    Runtime(String),
}

/// Cheap listing entry returned by [`HostGraph::enumerate_entities`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHandle {
    pub id: String,
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub class: String,
    pub selected: bool,
    pub position: (i32, i32),
    pub attributes: BTreeMap<String, AttrValue>,
    /// Source id per input slot.
    pub inputs: Vec<Option<String>>,
}

/// Narrow, fallible access to the host scene graph.
///
/// Entities are addressed by their node name. Implementations are usually not
/// safe to call from arbitrary threads; the applier routes every call through
/// the owning context.
pub trait HostGraph: Send + Sync {
    fn enumerate_entities(&self) -> Result<Vec<EntityHandle>, HostError>;
    fn entity_by_id(&self, id: &str) -> Result<Option<Entity>, HostError>;
    fn selected_entities(&self) -> Result<Vec<String>, HostError>;
    /// Replace the selection. Empty clears it.
    fn select(&self, ids: &[String]) -> Result<(), HostError>;

    fn create_entity(&self, class: &str) -> Result<String, HostError>;
    fn delete_entity(&self, id: &str) -> Result<(), HostError>;
    fn rename_entity(&self, id: &str, new_name: &str) -> Result<(), HostError>;
    fn set_attribute(&self, id: &str, name: &str, value: AttrValue) -> Result<(), HostError>;
    fn get_attribute(&self, id: &str, name: &str) -> Result<Option<AttrValue>, HostError>;
    /// Connect `source` (or nothing) into input `input` of `target`.
    fn connect(&self, target: &str, input: usize, source: Option<&str>) -> Result<(), HostError>;

    /// Whether the host document has unsaved changes.
    fn is_modified(&self) -> Result<bool, HostError>;

    /// Run a fragment and return its printed output. Must only be called on
    /// the owning context.
    fn run_on_owning_context(&self, fragment: &CodeFragment) -> Result<String, HostError> {
        let program =
            Program::parse(fragment.text()).map_err(|e| HostError::Script(e.to_string()))?;
        let report = interpreter::execute(&program, self)?;
        Ok(report.output)
    }
}
