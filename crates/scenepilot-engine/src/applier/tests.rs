use super::*;
use crate::confirm::{AutoApprove, AutoDeny};
use crate::memory::MemoryHost;
use crate::scheduler::OwningContext;
use scenepilot_core::{CodeFragment, ErrorKind, ScriptType};
use std::thread;

/// Owning context, host and applier wired together.
struct Harness {
    ctx: Option<OwningContext>,
    host: Arc<MemoryHost>,
    applier: ActionApplier,
}

impl Harness {
    fn new(config: ApplierConfig) -> Self {
        Self::with_confirm(config, Arc::new(AutoApprove))
    }

    fn with_confirm(config: ApplierConfig, confirm: Arc<dyn Confirm>) -> Self {
        let ctx = OwningContext::start("applier-test").unwrap();
        let host = Arc::new(MemoryHost::new());
        let applier = ActionApplier::new(host.clone(), ctx.handle(), confirm, config);
        Self {
            ctx: Some(ctx),
            host,
            applier,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.shutdown();
        }
    }
}

fn create(applier: &ActionApplier, class: &str, name: &str) -> GeneratedScript {
    applier
        .generator()
        .node_creation(class, &BTreeMap::new(), None, Some(name))
}

/// A hand-written script validated the way the analyzer would.
fn manual(code: &str) -> GeneratedScript {
    let fragment = CodeFragment::manual(code);
    GeneratedScript {
        script_type: ScriptType::Utility,
        validation: ScriptValidator::new(ValidationLevel::Moderate).validate(&fragment),
        code: fragment,
        description: "manual script".into(),
        estimated_cost: 0.0,
        dependencies: Vec::new(),
        undo_code: None,
    }
}

// ── Apply ───────────────────────────────────────────────────────

#[test]
fn test_apply_success_records_history() {
    let h = Harness::new(ApplierConfig::default());
    let attrs = BTreeMap::from([("size".to_string(), AttrValue::Int(10))]);
    let script = h
        .applier
        .generator()
        .node_creation("Blur", &attrs, Some((100, 50)), None);
    assert!(script.validation.is_valid);

    let action = h.applier.apply(script, None);
    assert_eq!(action.status, ActionStatus::Success, "{:?}", action.error);
    assert!(action.user_confirmed);
    assert!(action.pre_snapshot.is_some());
    assert_eq!(action.action_type, ActionKind::NodeCreation);

    let names = h.host.node_names();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("Blur_"));
    assert_eq!(
        h.host.get_attribute(&names[0], "size").unwrap(),
        Some(AttrValue::Int(10))
    );
    assert_eq!(h.applier.history(None), vec![action]);
}

#[test]
fn test_invalid_script_fails_before_snapshot() {
    let h = Harness::new(ApplierConfig::default());
    let action = h
        .applier
        .apply(ScriptGenerator::error_script("bad input"), None);
    assert_eq!(action.status, ActionStatus::Failed);
    assert_eq!(action.error_kind, Some(ErrorKind::PolicyViolation));
    assert!(action.pre_snapshot.is_none());
    assert_eq!(h.host.run_count(), 0);
    assert_eq!(h.applier.history(None).len(), 1);
}

#[test]
fn test_strict_applier_revalidates() {
    let h = Harness::new(ApplierConfig {
        validation_level: ValidationLevel::Strict,
        ..ApplierConfig::default()
    });
    let script = manual("import os\nos.system('rm -rf /tmp/cache')");
    assert!(script.validation.is_valid);

    let action = h.applier.apply(script, Some(false));
    assert_eq!(action.status, ActionStatus::Failed);
    assert_eq!(action.error_kind, Some(ErrorKind::PolicyViolation));
    assert!(
        action
            .error
            .as_deref()
            .unwrap()
            .contains("Dangerous operation not allowed")
    );
    assert_eq!(h.host.run_count(), 0);
}

#[test]
fn test_syntax_error_is_classified() {
    let h = Harness::new(ApplierConfig::default());
    let mut script = manual("nuke.createNode('Blur')");
    script.code = CodeFragment::manual("nuke.createNode('Blur'");
    let action = h.applier.apply(script, Some(false));
    assert_eq!(action.error_kind, Some(ErrorKind::Syntax));
    assert!(action.error.as_deref().unwrap().starts_with("Syntax error:"));
}

#[test]
fn test_unsupported_statement_never_reaches_host() {
    let h = Harness::new(ApplierConfig::default());
    h.host.insert_entity("Read1", "Read");
    let action = h
        .applier
        .apply(manual("for n in nuke.allNodes():\n    nuke.delete(n)"), Some(false));
    assert_eq!(action.status, ActionStatus::Failed);
    assert!(
        action
            .error
            .as_deref()
            .unwrap()
            .contains("unsupported statement")
    );
    assert_eq!(h.host.run_count(), 0);
    assert_eq!(h.host.node_names(), vec!["Read1"]);
}

#[test]
fn test_huge_input_index_is_rejected_not_run() {
    let h = Harness::new(ApplierConfig::default());
    h.host.insert_entity("Read1", "Read");
    h.host.insert_entity("Grade1", "Grade");
    let script = manual(
        "g = nuke.toNode('Grade1')\nr = nuke.toNode('Read1')\nif g:\n    g.setInput(100000000000, r)",
    );
    assert!(script.validation.is_valid);

    let action = h.applier.apply(script, Some(false));
    assert_eq!(action.status, ActionStatus::Failed);
    assert!(action.error.as_deref().unwrap().contains("unsupported statement"));
    assert_eq!(h.host.run_count(), 0);
}

#[test]
fn test_denied_confirmation_is_recorded() {
    let h = Harness::with_confirm(ApplierConfig::default(), Arc::new(AutoDeny));
    let script = create(&h.applier, "Grade", "Grade_main");
    let action = h.applier.apply(script, None);
    assert_eq!(action.status, ActionStatus::Failed);
    assert_eq!(action.error.as_deref(), Some("User cancelled action"));
    assert!(!action.user_confirmed);
    assert!(h.host.node_names().is_empty());
    assert_eq!(h.applier.history(None).len(), 1);
}

#[test]
fn test_confirmation_can_be_skipped_per_call() {
    let h = Harness::with_confirm(ApplierConfig::default(), Arc::new(AutoDeny));
    let action = h
        .applier
        .apply(create(&h.applier, "Grade", "Grade_main"), Some(false));
    assert_eq!(action.status, ActionStatus::Success);
    assert!(!action.user_confirmed);
}

#[test]
fn test_confirmation_sees_the_script() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let confirm = move |request: &ConfirmationRequest| {
        log.lock().push(request.message());
        true
    };
    let h = Harness::with_confirm(ApplierConfig::default(), Arc::new(confirm));
    h.applier
        .apply(create(&h.applier, "Blur", "Blur_soft"), None);
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with("Apply action: Create Blur node 'Blur_soft'"));
    assert!(seen[0].contains("nuke.createNode('Blur')"));
}

#[test]
fn test_execution_error_is_recorded_not_raised() {
    let h = Harness::new(ApplierConfig::default());
    let action = h
        .applier
        .apply(manual("n = nuke.toNode('Missing')\nnuke.delete(n)"), Some(false));
    assert_eq!(action.status, ActionStatus::Failed);
    assert_eq!(action.error_kind, Some(ErrorKind::Execution));
    assert!(
        action
            .error
            .as_deref()
            .unwrap()
            .contains("does not refer to an existing node")
    );
    assert!(action.pre_snapshot.is_some());
}

#[test]
fn test_output_is_captured() {
    let h = Harness::new(ApplierConfig::default());
    let action = h.applier.apply(manual("print('hello')"), Some(false));
    assert_eq!(action.output.as_deref(), Some("hello"));
}

#[test]
fn test_snapshot_can_be_disabled() {
    let h = Harness::new(ApplierConfig {
        auto_snapshot: false,
        ..ApplierConfig::default()
    });
    let action = h
        .applier
        .apply(create(&h.applier, "Blur", "Blur_a"), Some(false));
    assert_eq!(action.status, ActionStatus::Success);
    assert!(action.pre_snapshot.is_none());
}

#[test]
fn test_history_is_bounded() {
    let h = Harness::new(ApplierConfig {
        max_history: 3,
        ..ApplierConfig::default()
    });
    let mut ids = Vec::new();
    for i in 0..5 {
        let action = h
            .applier
            .apply(create(&h.applier, "Dot", &format!("Dot_{}", i)), Some(false));
        ids.push(action.id);
    }
    let history = h.applier.history(None);
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].id, ids[2]);
    assert!(h.applier.find(ids[0]).is_none());
    assert_eq!(h.applier.history(Some(1))[0].id, ids[4]);

    h.applier.clear_history();
    assert!(h.applier.history(None).is_empty());
}

#[test]
fn test_cancel_current_abandons_the_wait() {
    let h = Harness::new(ApplierConfig::default());
    h.host.set_run_delay(Some(Duration::from_millis(300)));
    assert!(h.applier.cancel_current().is_none());

    thread::scope(|s| {
        let running = s.spawn(|| h.applier.apply(manual("print('slow')"), Some(false)));
        let deadline = Instant::now() + Duration::from_secs(2);
        let cancelled = loop {
            if let Some(id) = h.applier.cancel_current() {
                break id;
            }
            assert!(Instant::now() < deadline, "action never started");
            thread::sleep(Duration::from_millis(5));
        };
        let action = running.join().unwrap();
        assert_eq!(action.id, cancelled);
        assert_eq!(action.status, ActionStatus::Failed);
        assert!(action.error.as_deref().unwrap().contains("cancelled"));
    });
}

// ── Parameter changes and workflows ─────────────────────────────

#[test]
fn test_parameter_changes_undo_to_original_values() {
    let h = Harness::new(ApplierConfig::default());
    h.host.insert_entity("Blur1", "Blur");
    h.host
        .set_attribute("Blur1", "size", AttrValue::Int(5))
        .unwrap();

    let attrs = BTreeMap::from([("size".to_string(), AttrValue::Int(12))]);
    let action = h.applier.apply_parameter_changes("Blur1", &attrs, None);
    assert_eq!(action.status, ActionStatus::Success, "{:?}", action.error);
    assert_eq!(action.action_type, ActionKind::ParameterChange);
    assert_eq!(action.output.as_deref(), Some("Parameters updated for Blur1"));
    assert_eq!(
        h.host.get_attribute("Blur1", "size").unwrap(),
        Some(AttrValue::Int(12))
    );

    let outcome = h.applier.undo_last();
    assert_eq!(
        outcome,
        UndoOutcome::RolledBack {
            id: action.id,
            method: UndoMethod::UndoScript
        }
    );
    assert_eq!(
        h.host.get_attribute("Blur1", "size").unwrap(),
        Some(AttrValue::Int(5))
    );
}

#[test]
fn test_parameter_changes_on_missing_node() {
    let h = Harness::new(ApplierConfig::default());
    let attrs = BTreeMap::from([("size".to_string(), AttrValue::Int(12))]);
    let action = h.applier.apply_parameter_changes("Ghost", &attrs, None);
    assert_eq!(action.status, ActionStatus::Failed);
    assert_eq!(action.error_kind, Some(ErrorKind::Execution));
    assert!(action.error.as_deref().unwrap().contains("Node not found: Ghost"));
    assert_eq!(h.applier.history(None).len(), 1);
}

#[test]
fn test_workflow_apply_and_undo() {
    let h = Harness::new(ApplierConfig::default());
    let action = h.applier.apply_workflow(
        WorkflowKind::BasicComp,
        &WorkflowContext::default(),
        Some(false),
    );
    assert_eq!(action.status, ActionStatus::Success, "{:?}", action.error);
    assert_eq!(action.action_type, ActionKind::WorkflowApplication);
    assert_eq!(h.host.node_names().len(), 4);

    assert!(h.applier.undo_last().is_rolled_back());
    assert!(h.host.node_names().is_empty());
}

#[test]
fn test_cleanup_workflow_plans_against_live_scene() {
    let h = Harness::new(ApplierConfig::default());
    for (name, class) in [("Read1", "Read"), ("Dot1", "Dot"), ("Viewer1", "Viewer"), ("Blur1", "Blur")] {
        h.host.insert_entity(name, class);
    }
    let wiring = manual(
        "r = nuke.toNode('Read1')\nd = nuke.toNode('Dot1')\nv = nuke.toNode('Viewer1')\nd.setInput(0, r)\nv.setInput(0, d)\n",
    );
    assert_eq!(h.applier.apply(wiring, Some(false)).status, ActionStatus::Success);

    let action = h.applier.apply_workflow(
        WorkflowKind::CleanupNodes,
        &WorkflowContext::default(),
        Some(false),
    );
    assert_eq!(action.status, ActionStatus::Success, "{:?}", action.error);
    assert!(action.undo_code().is_none());
    assert_eq!(h.host.node_names(), vec!["Read1", "Viewer1"]);
    let viewer = &h.host.scene().nodes["Viewer1"];
    assert_eq!(viewer.inputs.first(), Some(&Some("Read1".to_string())));
}

// ── Undo ────────────────────────────────────────────────────────

#[test]
fn test_undo_targets() {
    let h = Harness::new(ApplierConfig::default());
    assert_eq!(h.applier.undo_last(), UndoOutcome::NotFound);
    assert_eq!(h.applier.undo_by_id(Uuid::new_v4()), UndoOutcome::NotFound);

    let failed = h
        .applier
        .apply(ScriptGenerator::error_script("nope"), None);
    assert_eq!(
        h.applier.undo_by_id(failed.id),
        UndoOutcome::NotUndoable(ActionStatus::Failed)
    );
    assert_eq!(h.applier.undo_last(), UndoOutcome::NotFound);

    let ok = h
        .applier
        .apply(create(&h.applier, "Blur", "Blur_x"), Some(false));
    assert!(h.applier.undo_by_id(ok.id).is_rolled_back());
    assert_eq!(
        h.applier.undo_by_id(ok.id),
        UndoOutcome::NotUndoable(ActionStatus::RolledBack)
    );
    assert_eq!(
        h.applier.find(ok.id).unwrap().status,
        ActionStatus::RolledBack
    );
}

#[test]
fn test_undo_without_script_restores_snapshot() {
    let h = Harness::new(ApplierConfig::default());
    h.host.insert_entity("Read1", "Read");
    h.host.select(&["Read1".to_string()]).unwrap();

    let action = h
        .applier
        .apply(manual("g = nuke.createNode('Grade')"), Some(false));
    assert_eq!(action.status, ActionStatus::Success);
    assert_eq!(h.host.selected_entities().unwrap(), vec!["Grade1"]);

    assert_eq!(
        h.applier.undo_last(),
        UndoOutcome::RolledBack {
            id: action.id,
            method: UndoMethod::Snapshot
        }
    );
    assert_eq!(h.host.selected_entities().unwrap(), vec!["Read1"]);
}

#[test]
fn test_undo_unavailable_without_script_or_snapshot() {
    let h = Harness::new(ApplierConfig {
        auto_snapshot: false,
        ..ApplierConfig::default()
    });
    let action = h
        .applier
        .apply(manual("nuke.createNode('Grade')"), Some(false));
    match h.applier.undo_by_id(action.id) {
        UndoOutcome::Unavailable(reason) => assert!(reason.contains("no undo script")),
        other => panic!("expected Unavailable, got {:?}", other),
    }
    assert_eq!(
        h.applier.find(action.id).unwrap().status,
        ActionStatus::Success
    );
}

// ── Batch ───────────────────────────────────────────────────────

#[test]
fn test_batch_groups_children_under_one_entry() {
    let h = Harness::new(ApplierConfig::default());
    let outcome = h
        .applier
        .batch("Build blur chain", |scope| {
            scope.try_apply(create(&h.applier, "Blur", "Blur_a"), Some(false))?;
            scope.try_apply(create(&h.applier, "Blur", "Blur_b"), Some(false))?;
            Ok::<_, BatchStepError>(scope.children().len())
        })
        .unwrap();
    assert_eq!(outcome.value, 2);
    assert_eq!(outcome.record.status, ActionStatus::Success);
    assert_eq!(outcome.record.action_type, ActionKind::Batch);
    assert!(outcome.record.pre_snapshot.is_some());
    assert!(outcome.record.children.iter().all(|c| c.pre_snapshot.is_none()));

    let history = h.applier.history(None);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].children.len(), 2);

    assert_eq!(
        h.applier.undo_last(),
        UndoOutcome::RolledBack {
            id: outcome.record.id,
            method: UndoMethod::UndoScript
        }
    );
    assert!(h.host.node_names().is_empty());
    let undone = h.applier.find(outcome.record.id).unwrap();
    assert!(
        undone
            .children
            .iter()
            .all(|c| c.status == ActionStatus::RolledBack)
    );
}

#[test]
fn test_batch_failure_restores_and_records_once() {
    let h = Harness::new(ApplierConfig::default());
    let err = h
        .applier
        .batch("Half a setup", |scope| {
            scope.try_apply(create(&h.applier, "Grade", "Grade_a"), Some(false))?;
            scope.try_apply(manual("n = nuke.toNode('Missing')\nnuke.delete(n)"), Some(false))?;
            Ok::<_, BatchStepError>(())
        })
        .unwrap_err();

    match err {
        BatchError::Aborted {
            record,
            error,
            restored,
        } => {
            assert!(restored);
            assert_eq!(record.status, ActionStatus::Failed);
            assert_eq!(record.children.len(), 2);
            assert_eq!(record.children[0].status, ActionStatus::RolledBack);
            assert_eq!(record.children[1].status, ActionStatus::Failed);
            assert_eq!(error.description, "manual script");
        }
        BatchError::Busy => panic!("unexpected busy"),
    }
    // The completed step was undone by its own script.
    assert!(h.host.node_names().is_empty());
    let history = h.applier.history(None);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ActionStatus::Failed);
}

#[test]
fn test_batch_failure_stops_unwinding_at_step_without_undo() {
    let h = Harness::new(ApplierConfig::default());
    let err = h
        .applier
        .batch("Mixed steps", |scope| {
            scope.try_apply(create(&h.applier, "Blur", "Blur_a"), Some(false))?;
            scope.try_apply(manual("nuke.createNode('Grade')"), Some(false))?;
            Err::<(), _>(BatchStepError {
                description: "layout".into(),
                error: "rejected".into(),
            })
        })
        .unwrap_err();

    let BatchError::Aborted { record, .. } = err else {
        panic!("expected an aborted batch");
    };
    // The hand-written step has no undo script, so neither step is unwound.
    assert!(
        record
            .children
            .iter()
            .all(|c| c.status == ActionStatus::Success)
    );
    assert_eq!(h.host.node_names(), vec!["Blur_a", "Grade1"]);
}

#[test]
fn test_slot_is_released_after_each_call() {
    let h = Harness::new(ApplierConfig::default());
    h.applier
        .apply(create(&h.applier, "Blur", "Blur_a"), Some(false));
    assert!(!h.applier.is_busy());
    let _ = h.applier.batch("empty", |_| Err::<(), _>("stop"));
    assert!(!h.applier.is_busy());
    h.applier.undo_last();
    assert!(!h.applier.is_busy());
}
