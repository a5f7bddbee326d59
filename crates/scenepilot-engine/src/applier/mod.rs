mod batch;
mod undo;

#[cfg(test)]
mod tests;

pub use batch::{BatchError, BatchOutcome, BatchScope, BatchStepError};
pub use undo::{UndoMethod, UndoOutcome};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use scenepilot_core::generator::{ScriptGenerator, WorkflowContext, WorkflowKind};
use scenepilot_core::history::ActionHistory;
use scenepilot_core::script::{Program, ScriptError};
use scenepilot_core::{
    ActionError, ActionKind, ActionSnapshot, ActionStatus, AppliedAction, AttrValue,
    GeneratedScript, ScriptValidator, ValidationLevel, syntax,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::confirm::{Confirm, ConfirmationRequest};
use crate::host::{HostError, HostGraph};
use crate::scheduler::{ContextHandle, ScheduleError};
use crate::snapshot::{RestoreReport, SnapshotConfig, SnapshotEngine};

const BUSY_MESSAGE: &str = "another action is already executing";

/// What happens when an apply, batch or undo starts while another runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Return immediately with a failed record, `Busy` batch or `Busy` undo.
    #[default]
    Reject,
    /// Block until the running action finishes.
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplierConfig {
    pub validation_level: ValidationLevel,
    pub require_confirmation: bool,
    pub auto_snapshot: bool,
    pub max_execution_time_ms: u64,
    pub max_history: usize,
    pub overlap_policy: OverlapPolicy,
    pub snapshot: SnapshotConfig,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            validation_level: ValidationLevel::Moderate,
            require_confirmation: true,
            auto_snapshot: true,
            max_execution_time_ms: 30_000,
            max_history: scenepilot_core::history::DEFAULT_MAX_HISTORY,
            overlap_policy: OverlapPolicy::Reject,
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl ApplierConfig {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }
}

// =============================================================================
// Execution slot
// =============================================================================

/// At most one apply, batch or undo holds the slot at a time.
#[derive(Default)]
struct ExecutionSlot {
    busy: Mutex<bool>,
    freed: Condvar,
}

struct SlotGuard<'a> {
    slot: &'a ExecutionSlot,
}

impl ExecutionSlot {
    fn acquire(&self, policy: OverlapPolicy) -> Option<SlotGuard<'_>> {
        let mut busy = self.busy.lock();
        match policy {
            OverlapPolicy::Reject if *busy => return None,
            OverlapPolicy::Reject => {}
            OverlapPolicy::Queue => {
                while *busy {
                    self.freed.wait(&mut busy);
                }
            }
        }
        *busy = true;
        Some(SlotGuard { slot: self })
    }

    fn is_busy(&self) -> bool {
        *self.busy.lock()
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        *self.slot.busy.lock() = false;
        self.slot.freed.notify_one();
    }
}

/// How a locked apply interacts with snapshots and history.
#[derive(Debug, Clone, Copy)]
struct ApplyMode {
    snapshot: bool,
    record: bool,
}

impl ApplyMode {
    const STANDALONE: Self = Self {
        snapshot: true,
        record: true,
    };
    const BATCH_CHILD: Self = Self {
        snapshot: false,
        record: false,
    };
}

// =============================================================================
// Applier
// =============================================================================

/// Applies generated scripts to the host with validation, confirmation,
/// snapshots and history.
pub struct ActionApplier {
    host: Arc<dyn HostGraph>,
    context: ContextHandle,
    confirm: Arc<dyn Confirm>,
    config: ApplierConfig,
    validator: ScriptValidator,
    generator: ScriptGenerator,
    snapshots: SnapshotEngine,
    slot: ExecutionSlot,
    history: Mutex<ActionHistory>,
    current: Mutex<Option<Uuid>>,
    cancel: AtomicBool,
}

impl ActionApplier {
    pub fn new(
        host: Arc<dyn HostGraph>,
        context: ContextHandle,
        confirm: Arc<dyn Confirm>,
        config: ApplierConfig,
    ) -> Self {
        let snapshots = SnapshotEngine::new(host.clone(), config.snapshot.clone());
        Self {
            host,
            context,
            confirm,
            validator: ScriptValidator::new(config.validation_level),
            generator: ScriptGenerator::new(config.validation_level),
            snapshots,
            slot: ExecutionSlot::default(),
            history: Mutex::new(ActionHistory::new(config.max_history)),
            current: Mutex::new(None),
            cancel: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &ApplierConfig {
        &self.config
    }

    pub fn generator(&self) -> &ScriptGenerator {
        &self.generator
    }

    /// Whether an action currently holds the execution slot.
    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Apply a script. Every outcome, including denial and failure, comes
    /// back as a record; nothing is propagated.
    pub fn apply(
        &self,
        script: GeneratedScript,
        require_confirmation: Option<bool>,
    ) -> AppliedAction {
        let Some(_slot) = self.slot.acquire(self.config.overlap_policy) else {
            return busy_record(AppliedAction::for_script(script));
        };
        self.apply_locked(script, require_confirmation, ApplyMode::STANDALONE)
    }

    /// Set attributes on an existing node. The undo script restores the
    /// values read just before the change.
    pub fn apply_parameter_changes(
        &self,
        name: &str,
        attrs: &BTreeMap<String, AttrValue>,
        require_confirmation: Option<bool>,
    ) -> AppliedAction {
        let description = format!("Adjust parameters for {}", name);
        let Some(_slot) = self.slot.acquire(self.config.overlap_policy) else {
            return busy_record(AppliedAction::pending(
                ActionKind::ParameterChange,
                description,
                None,
            ));
        };

        let (class, originals) = match self.read_originals(name, attrs) {
            Ok(found) => found,
            Err(e) => {
                let mut action =
                    AppliedAction::pending(ActionKind::ParameterChange, description, None);
                fail(&mut action, e);
                self.record(&action);
                return action;
            }
        };
        let script = self
            .generator
            .parameter_adjustment(name, &class, attrs, Some(&originals));
        self.apply_locked(script, require_confirmation, ApplyMode::STANDALONE)
    }

    /// Build and apply a workflow. Cleanup is planned against a fresh
    /// capture of the scene when the caller supplies none.
    pub fn apply_workflow(
        &self,
        kind: WorkflowKind,
        ctx: &WorkflowContext,
        require_confirmation: Option<bool>,
    ) -> AppliedAction {
        let description = format!("Apply {} workflow", kind);
        let Some(_slot) = self.slot.acquire(self.config.overlap_policy) else {
            return busy_record(AppliedAction::pending(
                ActionKind::WorkflowApplication,
                description,
                None,
            ));
        };

        let script = if kind == WorkflowKind::CleanupNodes && ctx.scene.is_none() {
            let Some(scene) = self.capture_snapshot() else {
                let mut action =
                    AppliedAction::pending(ActionKind::WorkflowApplication, description, None);
                fail(
                    &mut action,
                    ActionError::Snapshot("could not read the scene to plan a cleanup".into()),
                );
                self.record(&action);
                return action;
            };
            let planned = WorkflowContext {
                scene: Some(scene),
                ..ctx.clone()
            };
            self.generator.workflow(kind, &planned)
        } else {
            self.generator.workflow(kind, ctx)
        };
        self.apply_locked(script, require_confirmation, ApplyMode::STANDALONE)
    }

    /// Stop waiting for the in-flight action. Returns its id, if any.
    pub fn cancel_current(&self) -> Option<Uuid> {
        let current = *self.current.lock();
        if let Some(id) = current {
            warn!(%id, "Cancelling in-flight action; host-side effects may still complete");
            self.cancel.store(true, Ordering::SeqCst);
        }
        current
    }

    /// Up to `limit` most recent actions, oldest first.
    pub fn history(&self, limit: Option<usize>) -> Vec<AppliedAction> {
        self.history.lock().recent(limit)
    }

    pub fn find(&self, id: Uuid) -> Option<AppliedAction> {
        self.history.lock().get(id).cloned()
    }

    pub fn clear_history(&self) {
        let mut history = self.history.lock();
        info!(entries = history.len(), "Clearing action history");
        history.clear();
    }

    pub fn export_history(&self, path: &Path) -> anyhow::Result<()> {
        let history = self.history.lock().clone();
        history.export(path)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn apply_locked(
        &self,
        script: GeneratedScript,
        require_confirmation: Option<bool>,
        mode: ApplyMode,
    ) -> AppliedAction {
        let mut action = AppliedAction::for_script(script.clone());
        info!(id = %action.id, kind = ?action.action_type, "Applying action: {}", action.description);

        if let Err(e) = self.check(&script) {
            fail(&mut action, e);
            self.record_if(mode, &action);
            return action;
        }

        let needs_confirmation = require_confirmation.unwrap_or(self.config.require_confirmation);
        if needs_confirmation {
            let request = ConfirmationRequest::for_script(&script);
            if !self.confirm.confirm(&request) {
                fail(
                    &mut action,
                    ActionError::PolicyViolation("User cancelled action".into()),
                );
                self.record_if(mode, &action);
                return action;
            }
            action.user_confirmed = true;
        }

        if mode.snapshot && self.config.auto_snapshot {
            action.pre_snapshot = self.capture_snapshot();
        }

        advance(&mut action, ActionStatus::Executing);
        let started = Instant::now();
        let result = self.run_fragment(action.id, &script);
        action.duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                if !output.is_empty() {
                    action.output = Some(output);
                }
                advance(&mut action, ActionStatus::Success);
                info!(id = %action.id, duration_ms = action.duration_ms, "Action succeeded");
            }
            Err(e) => fail(&mut action, e),
        }

        self.record_if(mode, &action);
        action
    }

    /// Resolve syntax and policy before anything reaches the host.
    fn check(&self, script: &GeneratedScript) -> Result<(), ActionError> {
        let text = script.code.text();
        if script.code.is_empty() {
            return Err(ActionError::PolicyViolation("Script is empty".into()));
        }
        syntax::check(text)?;
        if !script.validation.is_valid {
            return Err(validation_failure(&script.validation.errors));
        }
        let validation = self.validator.validate(&script.code);
        if !validation.is_valid {
            return Err(validation_failure(&validation.errors));
        }
        match Program::parse(text) {
            Ok(_) => Ok(()),
            Err(ScriptError::Syntax(e)) => Err(ActionError::Syntax(e)),
            Err(e @ ScriptError::Unsupported { .. }) => {
                Err(ActionError::PolicyViolation(e.to_string()))
            }
        }
    }

    /// Run a fragment on the owning context within the time limit.
    fn run_fragment(&self, id: Uuid, script: &GeneratedScript) -> Result<String, ActionError> {
        self.cancel.store(false, Ordering::SeqCst);
        *self.current.lock() = Some(id);

        let host = self.host.clone();
        let code = script.code.clone();
        let result = self.context.run_cancellable(
            move || host.run_on_owning_context(&code),
            Some(self.config.max_execution_time()),
            &self.cancel,
        );
        *self.current.lock() = None;

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ActionError::Execution(e.to_string())),
            Err(e @ (ScheduleError::Timeout(_) | ScheduleError::Cancelled)) => {
                warn!(
                    %id,
                    error = %e,
                    "Stopped waiting for action; host-side effects may already have happened"
                );
                Err(ActionError::Execution(e.to_string()))
            }
            Err(e) => Err(ActionError::Execution(e.to_string())),
        }
    }

    /// Failures degrade to no snapshot.
    fn capture_snapshot(&self) -> Option<ActionSnapshot> {
        let engine = self.snapshots.clone();
        match self
            .context
            .run(move || engine.capture(), Some(self.config.max_execution_time()))
        {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(e)) => {
                warn!(error = %e, "Snapshot capture failed; continuing without snapshot");
                None
            }
            Err(e) => {
                warn!(error = %e, "Snapshot capture failed; continuing without snapshot");
                None
            }
        }
    }

    fn restore_snapshot(&self, snapshot: &ActionSnapshot) -> Result<RestoreReport, ActionError> {
        let engine = self.snapshots.clone();
        let snapshot = snapshot.clone();
        self.context
            .run(
                move || engine.restore(&snapshot),
                Some(self.config.max_execution_time()),
            )
            .map_err(|e| ActionError::Snapshot(e.to_string()))?
            .map_err(|e| ActionError::Snapshot(e.to_string()))
    }

    fn read_originals(
        &self,
        name: &str,
        attrs: &BTreeMap<String, AttrValue>,
    ) -> Result<(String, BTreeMap<String, AttrValue>), ActionError> {
        let host = self.host.clone();
        let name = name.to_string();
        let keys: Vec<String> = attrs.keys().cloned().collect();
        self.context
            .run(
                move || -> Result<_, HostError> {
                    let entity = host
                        .entity_by_id(&name)?
                        .ok_or_else(|| HostError::NotFound(name.clone()))?;
                    let mut originals = BTreeMap::new();
                    for key in keys {
                        if let Some(value) = host.get_attribute(&name, &key)? {
                            originals.insert(key, value);
                        }
                    }
                    Ok((entity.class, originals))
                },
                Some(self.config.max_execution_time()),
            )
            .map_err(|e| ActionError::Execution(e.to_string()))?
            .map_err(|e| ActionError::Execution(e.to_string()))
    }

    fn record(&self, action: &AppliedAction) {
        let evicted = self.history.lock().add(action.clone());
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "History trimmed");
        }
    }

    fn record_if(&self, mode: ApplyMode, action: &AppliedAction) {
        if mode.record {
            self.record(action);
        }
    }
}

fn validation_failure(errors: &[String]) -> ActionError {
    ActionError::PolicyViolation(format!("Script validation failed: {}", errors.join("; ")))
}

fn busy_record(mut action: AppliedAction) -> AppliedAction {
    warn!(id = %action.id, "Rejected overlapping action");
    fail(&mut action, ActionError::PolicyViolation(BUSY_MESSAGE.into()));
    action
}

fn advance(action: &mut AppliedAction, to: ActionStatus) {
    if let Err(e) = action.transition(to) {
        error!(id = %action.id, error = %e, "Refused status change");
    }
}

fn fail(action: &mut AppliedAction, err: ActionError) {
    warn!(id = %action.id, kind = err.kind().as_str(), "Action failed: {}", err);
    if let Err(e) = action.fail(&err) {
        error!(id = %action.id, error = %e, "Refused status change");
    }
}
