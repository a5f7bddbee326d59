use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ActionKind, ActionStatus, AppliedAction, ScriptType};

pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Bounded, insertion-ordered log of applied actions. Oldest entries are
/// evicted first.
#[derive(Debug, Clone)]
pub struct ActionHistory {
    entries: VecDeque<AppliedAction>,
    max_len: usize,
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl ActionHistory {
    /// A maximum of zero is treated as one.
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            entries: VecDeque::with_capacity(max_len.min(256)),
            max_len,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Append an action, returning whatever was evicted to stay in bounds.
    pub fn add(&mut self, action: AppliedAction) -> Vec<AppliedAction> {
        self.entries.push_back(action);
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_len {
            if let Some(oldest) = self.entries.pop_front() {
                tracing::debug!(id = %oldest.id, "Evicted action from history");
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn get(&self, id: Uuid) -> Option<&AppliedAction> {
        self.entries.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut AppliedAction> {
        self.entries.iter_mut().find(|a| a.id == id)
    }

    /// Most recent entry with the given status.
    pub fn latest_with_status(&self, status: ActionStatus) -> Option<&AppliedAction> {
        self.entries.iter().rev().find(|a| a.status == status)
    }

    /// Up to `limit` most recent entries, oldest first. `None` returns all.
    pub fn recent(&self, limit: Option<usize>) -> Vec<AppliedAction> {
        let skip = limit
            .map(|l| self.entries.len().saturating_sub(l))
            .unwrap_or(0);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppliedAction> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Not recoverable.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn export(&self, path: &Path) -> Result<()> {
        let records: Vec<ExportedAction> = self.entries.iter().map(ExportedAction::from).collect();
        let json = serde_json::to_string_pretty(&records).context("Failed to serialize history")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write history: {}", path.display()))?;
        tracing::info!(path = %path.display(), count = records.len(), "Exported action history");
        Ok(())
    }
}

/// Read back a file written by [`ActionHistory::export`].
pub fn load_export(path: &Path) -> Result<Vec<ExportedAction>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse history: {}", path.display()))
}

// =============================================================================
// Export records
// =============================================================================

/// Portable form of an [`AppliedAction`]. Snapshots are reduced to a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedAction {
    pub id: Uuid,
    pub action_type: ActionKind,
    pub description: String,
    pub timestamp: u64,
    pub status: ActionStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub user_confirmed: bool,
    pub had_snapshot: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExportedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ExportedScript>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedScript {
    pub script_type: ScriptType,
    pub description: String,
    pub code: String,
    pub undo_code: Option<String>,
}

impl From<&AppliedAction> for ExportedAction {
    fn from(action: &AppliedAction) -> Self {
        Self {
            id: action.id,
            action_type: action.action_type,
            description: action.description.clone(),
            timestamp: action.timestamp,
            status: action.status,
            duration_ms: action.duration_ms,
            error: action.error.clone(),
            user_confirmed: action.user_confirmed,
            had_snapshot: action.pre_snapshot.is_some(),
            children: action.children.iter().map(ExportedAction::from).collect(),
            script: action.script.as_ref().map(|s| ExportedScript {
                script_type: s.script_type,
                description: s.description.clone(),
                code: s.code.text().to_string(),
                undo_code: s.undo_code.as_ref().map(|u| u.text().to_string()),
            }),
        }
    }
}
