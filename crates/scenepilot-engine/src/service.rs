//! Async facade over [`ActionApplier`] for UI collaborators.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use scenepilot_assist::{ActionAnalysis, ActionAnalyzer, ActionPreview, AnalyzerConfig};
use scenepilot_core::generator::{WorkflowContext, WorkflowKind};
use scenepilot_core::{AppliedAction, AttrValue, CodeFragment, GeneratedScript};
use uuid::Uuid;

use crate::applier::{ActionApplier, UndoOutcome};

/// Cloneable handle; blocking applier calls run on tokio's blocking pool.
#[derive(Clone)]
pub struct ActionService {
    applier: Arc<ActionApplier>,
    analyzer: Arc<ActionAnalyzer>,
}

impl ActionService {
    pub fn new(applier: Arc<ActionApplier>) -> Self {
        let analyzer = ActionAnalyzer::new(AnalyzerConfig {
            validation_level: applier.config().validation_level,
        });
        Self {
            applier,
            analyzer: Arc::new(analyzer),
        }
    }

    pub fn applier(&self) -> &Arc<ActionApplier> {
        &self.applier
    }

    pub fn analyze(&self, response: &str) -> Option<ActionAnalysis> {
        self.analyzer.analyze(response)
    }

    pub fn preview(&self, fragment: &CodeFragment) -> ActionPreview {
        self.analyzer.preview(fragment)
    }

    pub async fn apply(
        &self,
        script: GeneratedScript,
        require_confirmation: Option<bool>,
    ) -> Result<AppliedAction> {
        let applier = self.applier.clone();
        tokio::task::spawn_blocking(move || applier.apply(script, require_confirmation))
            .await
            .context("Apply task failed")
    }

    pub async fn apply_parameter_changes(
        &self,
        name: String,
        attrs: BTreeMap<String, AttrValue>,
        require_confirmation: Option<bool>,
    ) -> Result<AppliedAction> {
        let applier = self.applier.clone();
        tokio::task::spawn_blocking(move || {
            applier.apply_parameter_changes(&name, &attrs, require_confirmation)
        })
        .await
        .context("Parameter change task failed")
    }

    pub async fn apply_workflow(
        &self,
        kind: WorkflowKind,
        ctx: WorkflowContext,
        require_confirmation: Option<bool>,
    ) -> Result<AppliedAction> {
        let applier = self.applier.clone();
        tokio::task::spawn_blocking(move || applier.apply_workflow(kind, &ctx, require_confirmation))
            .await
            .context("Workflow task failed")
    }

    pub async fn undo_last(&self) -> Result<UndoOutcome> {
        let applier = self.applier.clone();
        tokio::task::spawn_blocking(move || applier.undo_last())
            .await
            .context("Undo task failed")
    }

    pub async fn undo_by_id(&self, id: Uuid) -> Result<UndoOutcome> {
        let applier = self.applier.clone();
        tokio::task::spawn_blocking(move || applier.undo_by_id(id))
            .await
            .context("Undo task failed")
    }

    pub fn cancel_current(&self) -> Option<Uuid> {
        self.applier.cancel_current()
    }

    pub fn history(&self, limit: Option<usize>) -> Vec<AppliedAction> {
        self.applier.history(limit)
    }

    pub async fn export_history(&self, path: PathBuf) -> Result<()> {
        let applier = self.applier.clone();
        tokio::task::spawn_blocking(move || applier.export_history(&path))
            .await
            .context("Export task failed")?
    }
}
