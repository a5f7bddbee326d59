//! Best-effort capture and restore of host state around an apply.

use std::collections::BTreeSet;
use std::sync::Arc;

use scenepilot_core::{ActionSnapshot, Connection, EntityState, now_millis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::host::{HostError, HostGraph};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("Failed to enumerate nodes: {0}")]
    Enumerate(HostError),
    #[error("Failed to read host state: {0}")]
    Host(HostError),
}

/// Cosmetic and documentation attributes left out of captures.
pub const DEFAULT_EXCLUDED_ATTRIBUTES: &[&str] = &[
    "label",
    "note_font",
    "note_font_size",
    "note_font_color",
    "tile_color",
    "gl_color",
    "hide_input",
    "postage_stamp",
    "help",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub excluded_attributes: Vec<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            excluded_attributes: DEFAULT_EXCLUDED_ATTRIBUTES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Differences between a snapshot and a later state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// `(node, attribute)` pairs whose value differs or exists on one side only.
    pub changed_attributes: Vec<(String, String)>,
    pub connections_added: Vec<Connection>,
    pub connections_removed: Vec<Connection>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed_attributes.is_empty()
            && self.connections_added.is_empty()
            && self.connections_removed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} removed, {} attribute change(s), {} connection change(s)",
            self.added.len(),
            self.removed.len(),
            self.changed_attributes.len(),
            self.connections_added.len() + self.connections_removed.len()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub reselected: Vec<String>,
    /// Selected ids that no longer exist.
    pub missing: Vec<String>,
    /// What the selection restore could not put back.
    pub unrestored: SnapshotDiff,
}

/// Captures host state through the capability interface. Must run on the
/// owning context, like every other host call.
#[derive(Clone)]
pub struct SnapshotEngine {
    host: Arc<dyn HostGraph>,
    config: SnapshotConfig,
}

impl SnapshotEngine {
    pub fn new(host: Arc<dyn HostGraph>, config: SnapshotConfig) -> Self {
        Self { host, config }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Entities that vanish or fail to read are skipped.
    pub fn capture(&self) -> Result<ActionSnapshot, SnapshotError> {
        let handles = self
            .host
            .enumerate_entities()
            .map_err(SnapshotError::Enumerate)?;

        let mut snapshot = ActionSnapshot {
            timestamp: now_millis(),
            ..ActionSnapshot::default()
        };
        for handle in handles {
            let entity = match self.host.entity_by_id(&handle.id) {
                Ok(Some(entity)) => entity,
                Ok(None) => {
                    debug!(node = %handle.id, "Node vanished during capture");
                    continue;
                }
                Err(e) => {
                    warn!(node = %handle.id, error = %e, "Skipping unreadable node in capture");
                    continue;
                }
            };

            if entity.selected {
                snapshot.selected_entity_ids.push(entity.id.clone());
            }
            for (input, source) in entity.inputs.iter().enumerate() {
                if let Some(source) = source {
                    snapshot.connectivity.push(Connection {
                        target: entity.id.clone(),
                        input,
                        source: source.clone(),
                    });
                }
            }
            let attributes = entity
                .attributes
                .into_iter()
                .filter(|(name, _)| !self.config.excluded_attributes.contains(name))
                .collect();
            snapshot.entity_states.insert(
                entity.id,
                EntityState {
                    class: entity.class,
                    selected: entity.selected,
                    position: entity.position,
                    attributes,
                },
            );
        }
        snapshot.connectivity.sort();
        snapshot.host_dirty_flag = self.host.is_modified().map_err(SnapshotError::Host)?;

        debug!(
            nodes = snapshot.entity_states.len(),
            connections = snapshot.connectivity.len(),
            "Captured snapshot"
        );
        Ok(snapshot)
    }

    /// Restore the selection. Attributes and connectivity are not replayed;
    /// the returned report says what differs.
    pub fn restore(&self, snapshot: &ActionSnapshot) -> Result<RestoreReport, SnapshotError> {
        let current = self.capture()?;
        let (reselected, missing): (Vec<String>, Vec<String>) = snapshot
            .selected_entity_ids
            .iter()
            .cloned()
            .partition(|id| current.entity_states.contains_key(id));

        self.host.select(&[]).map_err(SnapshotError::Host)?;
        if !reselected.is_empty() {
            self.host.select(&reselected).map_err(SnapshotError::Host)?;
        }

        let unrestored = diff(snapshot, &current);
        if unrestored.is_empty() {
            info!(reselected = reselected.len(), "Restored snapshot selection");
        } else {
            warn!(
                reselected = reselected.len(),
                unrestored = %unrestored.summary(),
                "Restored selection only; remaining differences were not rolled back"
            );
        }
        Ok(RestoreReport {
            reselected,
            missing,
            unrestored,
        })
    }
}

/// Compare `before` with `after`. Selection is not part of the diff.
pub fn diff(before: &ActionSnapshot, after: &ActionSnapshot) -> SnapshotDiff {
    let mut out = SnapshotDiff::default();
    for (id, state) in &before.entity_states {
        match after.entity_states.get(id) {
            None => out.removed.push(id.clone()),
            Some(now) => {
                let names: BTreeSet<&String> = state
                    .attributes
                    .keys()
                    .chain(now.attributes.keys())
                    .collect();
                for name in names {
                    if state.attributes.get(name) != now.attributes.get(name) {
                        out.changed_attributes.push((id.clone(), name.clone()));
                    }
                }
                if state.position != now.position {
                    out.changed_attributes.push((id.clone(), "position".into()));
                }
            }
        }
    }
    out.added = after
        .entity_states
        .keys()
        .filter(|id| !before.entity_states.contains_key(*id))
        .cloned()
        .collect();

    let was: BTreeSet<&Connection> = before.connectivity.iter().collect();
    let now: BTreeSet<&Connection> = after.connectivity.iter().collect();
    out.connections_added = now.difference(&was).map(|c| (*c).clone()).collect();
    out.connections_removed = was.difference(&now).map(|c| (*c).clone()).collect();
    out
}
