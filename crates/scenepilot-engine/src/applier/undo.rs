use scenepilot_core::{ActionKind, ActionStatus, AppliedAction, CodeFragment, GeneratedScript};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{ActionApplier, advance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoMethod {
    UndoScript,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoOutcome {
    RolledBack { id: Uuid, method: UndoMethod },
    NotFound,
    NotUndoable(ActionStatus),
    Unavailable(String),
    Busy,
}

impl UndoOutcome {
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, UndoOutcome::RolledBack { .. })
    }
}

impl ActionApplier {
    /// Undo the most recent successful action.
    pub fn undo_last(&self) -> UndoOutcome {
        let Some(_slot) = self.slot.acquire(self.config.overlap_policy) else {
            return UndoOutcome::Busy;
        };
        let target = self
            .history
            .lock()
            .latest_with_status(ActionStatus::Success)
            .cloned();
        match target {
            Some(action) => self.undo_locked(action),
            None => UndoOutcome::NotFound,
        }
    }

    pub fn undo_by_id(&self, id: Uuid) -> UndoOutcome {
        let Some(_slot) = self.slot.acquire(self.config.overlap_policy) else {
            return UndoOutcome::Busy;
        };
        let target = self.history.lock().get(id).cloned();
        match target {
            None => UndoOutcome::NotFound,
            Some(action) if !action.is_undoable() => UndoOutcome::NotUndoable(action.status),
            Some(action) => self.undo_locked(action),
        }
    }

    fn undo_locked(&self, action: AppliedAction) -> UndoOutcome {
        info!(id = %action.id, "Undoing action: {}", action.description);

        let scripted = if action.action_type == ActionKind::Batch {
            self.undo_children(&action)
        } else {
            match action.undo_code() {
                Some(code) => self.run_undo(action.id, code),
                None => Err("no undo script recorded".to_string()),
            }
        };

        let method = match scripted {
            Ok(()) => UndoMethod::UndoScript,
            Err(reason) => {
                let Some(snapshot) = action.pre_snapshot.as_ref() else {
                    warn!(id = %action.id, "Undo unavailable: {}", reason);
                    return UndoOutcome::Unavailable(format!(
                        "{}; no snapshot to fall back on",
                        reason
                    ));
                };
                warn!(id = %action.id, "Undo script unusable ({}); restoring snapshot", reason);
                if let Err(e) = self.restore_snapshot(snapshot) {
                    warn!(id = %action.id, error = %e, "Snapshot restore failed");
                    return UndoOutcome::Unavailable(format!("{}; {}", reason, e));
                }
                UndoMethod::Snapshot
            }
        };

        let mut history = self.history.lock();
        match history.get_mut(action.id) {
            Some(entry) => {
                advance(entry, ActionStatus::RolledBack);
                for child in entry.children.iter_mut() {
                    if child.status == ActionStatus::Success {
                        advance(child, ActionStatus::RolledBack);
                    }
                }
            }
            None => warn!(id = %action.id, "Undone action was evicted from history"),
        }
        info!(id = %action.id, ?method, "Action rolled back");
        UndoOutcome::RolledBack {
            id: action.id,
            method,
        }
    }

    /// Children's undo scripts in reverse order. Any gap or failure hands
    /// the whole batch over to the snapshot.
    fn undo_children(&self, batch: &AppliedAction) -> Result<(), String> {
        let succeeded: Vec<&AppliedAction> = batch
            .children
            .iter()
            .rev()
            .filter(|child| child.status == ActionStatus::Success)
            .collect();
        if succeeded.is_empty() {
            return Err("batch has no successful steps to undo".into());
        }
        for child in succeeded {
            let code = child
                .undo_code()
                .ok_or_else(|| format!("step '{}' has no undo script", child.description))?;
            self.run_undo(child.id, code)
                .map_err(|e| format!("step '{}': {}", child.description, e))?;
        }
        Ok(())
    }

    pub(super) fn run_undo(&self, id: Uuid, code: &CodeFragment) -> Result<(), String> {
        let script = GeneratedScript {
            script_type: scenepilot_core::ScriptType::Utility,
            code: code.clone(),
            description: "undo".into(),
            validation: self.validator.validate(code),
            estimated_cost: 0.0,
            dependencies: Vec::new(),
            undo_code: None,
        };
        self.check(&script).map_err(|e| e.to_string())?;
        self.run_fragment(id, &script)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
