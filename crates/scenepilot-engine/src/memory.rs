//! In-memory scene graph with JSON scene files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::thread::{self, ThreadId};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use scenepilot_core::script::{MAX_INPUTS, Program};
use scenepilot_core::{AttrValue, CodeFragment};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::host::{Entity, EntityHandle, HostError, HostGraph};
use crate::interpreter;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    pub class: String,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub xpos: i32,
    #[serde(default)]
    pub ypos: i32,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub inputs: Vec<Option<String>>,
}

/// On-disk scene layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub nodes: BTreeMap<String, SceneNode>,
    #[serde(default)]
    pub modified: bool,
}

#[derive(Default)]
struct Diagnostics {
    run_delay: Option<Duration>,
    last_run_thread: Option<ThreadId>,
    runs: usize,
    unreadable: BTreeSet<String>,
}

/// A [`HostGraph`] backed by plain data, used by the CLI and tests.
#[derive(Default)]
pub struct MemoryHost {
    scene: Mutex<Scene>,
    diagnostics: Mutex<Diagnostics>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scene(scene: Scene) -> Self {
        Self {
            scene: Mutex::new(scene),
            diagnostics: Mutex::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let scene: Scene = serde_json::from_str(json).context("Failed to parse scene JSON")?;
        Ok(Self::from_scene(scene))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scene file: {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid scene file: {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&*self.scene.lock()).context("Failed to serialize scene")
    }

    /// Write the scene and clear the modified flag.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write scene file: {}", path.display()))?;
        self.scene.lock().modified = false;
        debug!(path = %path.display(), "Saved scene");
        Ok(())
    }

    pub fn scene(&self) -> Scene {
        self.scene.lock().clone()
    }

    /// Add a node directly, bypassing the modified flag.
    pub fn insert_entity(&self, name: &str, class: &str) {
        self.scene.lock().nodes.insert(
            name.to_string(),
            SceneNode {
                class: class.to_string(),
                ..SceneNode::default()
            },
        );
    }

    pub fn node_names(&self) -> Vec<String> {
        self.scene.lock().nodes.keys().cloned().collect()
    }

    /// Delay every script run, to simulate slow host work.
    pub fn set_run_delay(&self, delay: Option<Duration>) {
        self.diagnostics.lock().run_delay = delay;
    }

    /// Make reads of `id` fail, as a host does for a node torn down mid-call.
    pub fn set_unreadable(&self, id: &str) {
        self.diagnostics.lock().unreadable.insert(id.to_string());
    }

    /// Thread that ran the most recent script.
    pub fn last_run_thread(&self) -> Option<ThreadId> {
        self.diagnostics.lock().last_run_thread
    }

    pub fn run_count(&self) -> usize {
        self.diagnostics.lock().runs
    }

    fn with_node<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut SceneNode) -> T,
    ) -> Result<T, HostError> {
        let mut scene = self.scene.lock();
        let node = scene
            .nodes
            .get_mut(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        let out = f(node);
        scene.modified = true;
        Ok(out)
    }
}

fn next_free_name(nodes: &BTreeMap<String, SceneNode>, class: &str) -> String {
    (1usize..)
        .map(|n| format!("{}{}", class, n))
        .find(|candidate| !nodes.contains_key(candidate))
        .unwrap_or_else(|| format!("{}_{}", class, nodes.len()))
}

fn coordinate(value: &AttrValue, name: &str) -> Result<i32, HostError> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i32)
        .ok_or_else(|| HostError::Runtime(format!("{} expects a number", name)))
}

impl HostGraph for MemoryHost {
    fn enumerate_entities(&self) -> Result<Vec<EntityHandle>, HostError> {
        Ok(self
            .scene
            .lock()
            .nodes
            .iter()
            .map(|(id, node)| EntityHandle {
                id: id.clone(),
                class: node.class.clone(),
            })
            .collect())
    }

    fn entity_by_id(&self, id: &str) -> Result<Option<Entity>, HostError> {
        if self.diagnostics.lock().unreadable.contains(id) {
            return Err(HostError::Runtime(format!("node {} cannot be read", id)));
        }
        Ok(self.scene.lock().nodes.get(id).map(|node| Entity {
            id: id.to_string(),
            class: node.class.clone(),
            selected: node.selected,
            position: (node.xpos, node.ypos),
            attributes: node.attributes.clone(),
            inputs: node.inputs.clone(),
        }))
    }

    fn selected_entities(&self) -> Result<Vec<String>, HostError> {
        Ok(self
            .scene
            .lock()
            .nodes
            .iter()
            .filter(|(_, node)| node.selected)
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn select(&self, ids: &[String]) -> Result<(), HostError> {
        let mut scene = self.scene.lock();
        if let Some(missing) = ids.iter().find(|id| !scene.nodes.contains_key(*id)) {
            return Err(HostError::NotFound(missing.clone()));
        }
        for (id, node) in scene.nodes.iter_mut() {
            node.selected = ids.contains(id);
        }
        Ok(())
    }

    fn create_entity(&self, class: &str) -> Result<String, HostError> {
        if class.trim().is_empty() {
            return Err(HostError::Runtime("node class must not be empty".into()));
        }
        let mut scene = self.scene.lock();
        let name = next_free_name(&scene.nodes, class);
        // New nodes become the only selection, as in the host UI.
        for node in scene.nodes.values_mut() {
            node.selected = false;
        }
        scene.nodes.insert(
            name.clone(),
            SceneNode {
                class: class.to_string(),
                selected: true,
                ..SceneNode::default()
            },
        );
        scene.modified = true;
        debug!(node = %name, class, "Created node");
        Ok(name)
    }

    fn delete_entity(&self, id: &str) -> Result<(), HostError> {
        let mut scene = self.scene.lock();
        if scene.nodes.remove(id).is_none() {
            return Err(HostError::NotFound(id.to_string()));
        }
        for node in scene.nodes.values_mut() {
            for input in node.inputs.iter_mut() {
                if input.as_deref() == Some(id) {
                    *input = None;
                }
            }
            trim_inputs(&mut node.inputs);
        }
        scene.modified = true;
        debug!(node = %id, "Deleted node");
        Ok(())
    }

    fn rename_entity(&self, id: &str, new_name: &str) -> Result<(), HostError> {
        if id == new_name {
            return Ok(());
        }
        let mut scene = self.scene.lock();
        if scene.nodes.contains_key(new_name) {
            return Err(HostError::NameInUse(new_name.to_string()));
        }
        let node = scene
            .nodes
            .remove(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        scene.nodes.insert(new_name.to_string(), node);
        for node in scene.nodes.values_mut() {
            for input in node.inputs.iter_mut() {
                if input.as_deref() == Some(id) {
                    *input = Some(new_name.to_string());
                }
            }
        }
        scene.modified = true;
        Ok(())
    }

    fn set_attribute(&self, id: &str, name: &str, value: AttrValue) -> Result<(), HostError> {
        match name {
            "xpos" => {
                let x = coordinate(&value, name)?;
                self.with_node(id, |node| node.xpos = x)
            }
            "ypos" => {
                let y = coordinate(&value, name)?;
                self.with_node(id, |node| node.ypos = y)
            }
            "selected" => {
                let selected = value
                    .as_bool()
                    .ok_or_else(|| HostError::Runtime("selected expects a boolean".into()))?;
                self.with_node(id, |node| node.selected = selected)
            }
            _ => self.with_node(id, |node| {
                node.attributes.insert(name.to_string(), value);
            }),
        }
    }

    fn get_attribute(&self, id: &str, name: &str) -> Result<Option<AttrValue>, HostError> {
        let scene = self.scene.lock();
        let node = scene
            .nodes
            .get(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        Ok(match name {
            "xpos" => Some(AttrValue::Int(node.xpos.into())),
            "ypos" => Some(AttrValue::Int(node.ypos.into())),
            "selected" => Some(AttrValue::Bool(node.selected)),
            _ => node.attributes.get(name).cloned(),
        })
    }

    fn connect(&self, target: &str, input: usize, source: Option<&str>) -> Result<(), HostError> {
        let mut scene = self.scene.lock();
        if let Some(source) = source
            && !scene.nodes.contains_key(source)
        {
            return Err(HostError::NotFound(source.to_string()));
        }
        if input >= MAX_INPUTS {
            return Err(HostError::Runtime(format!(
                "input index {} out of range (max {})",
                input,
                MAX_INPUTS - 1
            )));
        }
        if source == Some(target) {
            return Err(HostError::Runtime(format!(
                "cannot connect {} to itself",
                target
            )));
        }
        let node = scene
            .nodes
            .get_mut(target)
            .ok_or_else(|| HostError::NotFound(target.to_string()))?;
        if node.inputs.len() <= input {
            node.inputs.resize(input + 1, None);
        }
        node.inputs[input] = source.map(str::to_string);
        trim_inputs(&mut node.inputs);
        scene.modified = true;
        Ok(())
    }

    fn is_modified(&self) -> Result<bool, HostError> {
        Ok(self.scene.lock().modified)
    }

    fn run_on_owning_context(&self, fragment: &CodeFragment) -> Result<String, HostError> {
        let delay = {
            let mut diagnostics = self.diagnostics.lock();
            diagnostics.last_run_thread = Some(thread::current().id());
            diagnostics.runs += 1;
            diagnostics.run_delay
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        let program =
            Program::parse(fragment.text()).map_err(|e| HostError::Script(e.to_string()))?;
        interpreter::execute(&program, self).map(|report| report.output)
    }
}

fn trim_inputs(inputs: &mut Vec<Option<String>>) {
    while inputs.last().is_some_and(Option::is_none) {
        inputs.pop();
    }
}
