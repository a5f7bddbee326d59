use std::fmt;
use std::time::Instant;

use scenepilot_core::{
    ActionError, ActionKind, ActionStatus, AppliedAction, GeneratedScript,
};
use thiserror::Error;
use tracing::{info, warn};

use super::{ActionApplier, ApplyMode, advance, fail};

/// A batch step that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Batch step '{description}' failed: {error}")]
pub struct BatchStepError {
    pub description: String,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum BatchError<E> {
    #[error("another action is already executing")]
    Busy,
    #[error("Batch failed: {error}")]
    Aborted {
        /// The failed aggregate entry, as recorded in history.
        record: Box<AppliedAction>,
        error: E,
        /// Whether the pre-batch snapshot was restored.
        restored: bool,
    },
}

#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub record: AppliedAction,
    pub value: T,
}

/// Handle passed to the batch closure. Applies made through it share the
/// batch's slot and snapshot and are grouped under one history entry.
pub struct BatchScope<'a> {
    applier: &'a ActionApplier,
    children: Vec<AppliedAction>,
}

impl BatchScope<'_> {
    pub fn apply(
        &mut self,
        script: GeneratedScript,
        require_confirmation: Option<bool>,
    ) -> AppliedAction {
        let action =
            self.applier
                .apply_locked(script, require_confirmation, ApplyMode::BATCH_CHILD);
        self.children.push(action.clone());
        action
    }

    /// Like [`BatchScope::apply`], but a non-successful step is an error.
    pub fn try_apply(
        &mut self,
        script: GeneratedScript,
        require_confirmation: Option<bool>,
    ) -> Result<AppliedAction, BatchStepError> {
        let action = self.apply(script, require_confirmation);
        if action.status == ActionStatus::Success {
            Ok(action)
        } else {
            Err(BatchStepError {
                description: action.description.clone(),
                error: action.error.clone().unwrap_or_default(),
            })
        }
    }

    pub fn children(&self) -> &[AppliedAction] {
        &self.children
    }
}

impl ActionApplier {
    /// Run `f` as one undoable unit. Exactly one history entry is recorded,
    /// whether `f` succeeds or fails; on failure the pre-batch snapshot is
    /// restored on a best-effort basis.
    pub fn batch<T, E, F>(&self, description: &str, f: F) -> Result<BatchOutcome<T>, BatchError<E>>
    where
        E: fmt::Display,
        F: FnOnce(&mut BatchScope<'_>) -> Result<T, E>,
    {
        let Some(_slot) = self.slot.acquire(self.config.overlap_policy) else {
            warn!("Rejected overlapping batch: {}", description);
            return Err(BatchError::Busy);
        };

        let mut record = AppliedAction::pending(ActionKind::Batch, description, None);
        info!(id = %record.id, "Starting batch: {}", description);
        if self.config.auto_snapshot {
            record.pre_snapshot = self.capture_snapshot();
        }
        advance(&mut record, ActionStatus::Executing);

        let started = Instant::now();
        let mut scope = BatchScope {
            applier: self,
            children: Vec::new(),
        };
        let result = f(&mut scope);
        record.children = scope.children;
        record.duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                advance(&mut record, ActionStatus::Success);
                info!(id = %record.id, steps = record.children.len(), "Batch succeeded");
                self.record(&record);
                Ok(BatchOutcome { record, value })
            }
            Err(error) => {
                self.unwind_children(&mut record);
                let restored = match record.pre_snapshot.as_ref() {
                    Some(snapshot) => match self.restore_snapshot(snapshot) {
                        Ok(_) => true,
                        Err(e) => {
                            warn!(id = %record.id, error = %e, "Batch snapshot restore failed");
                            false
                        }
                    },
                    None => false,
                };
                fail(&mut record, ActionError::Execution(error.to_string()));
                self.record(&record);
                Err(BatchError::Aborted {
                    record: Box::new(record),
                    error,
                    restored,
                })
            }
        }
    }

    /// Undo the steps that succeeded before the failure, newest first.
    /// Stops at the first step without a usable undo script; what is left
    /// is covered only by the snapshot.
    fn unwind_children(&self, record: &mut AppliedAction) {
        for i in (0..record.children.len()).rev() {
            let child = &record.children[i];
            if child.status != ActionStatus::Success {
                continue;
            }
            let Some(code) = child.undo_code().cloned() else {
                warn!(id = %record.id, "Batch step '{}' has no undo script", child.description);
                return;
            };
            let child_id = child.id;
            if let Err(e) = self.run_undo(child_id, &code) {
                warn!(id = %record.id, error = %e, "Could not unwind batch step");
                return;
            }
            advance(&mut record.children[i], ActionStatus::RolledBack);
        }
    }
}
