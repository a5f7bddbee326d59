//! End-to-end pipeline scenarios against the in-memory host.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use scenepilot_assist::ActionAnalyzer;
use scenepilot_core::generator::ScriptGenerator;
use scenepilot_core::{
    ActionStatus, AttrValue, GeneratedScript, RiskLevel, ScriptValidator, ValidationLevel,
};
use scenepilot_engine::{
    ActionApplier, ApplierConfig, AutoApprove, BatchError, BatchStepError, HostGraph, MemoryHost,
    OverlapPolicy, OwningContext, UndoMethod, UndoOutcome,
};

fn setup(config: ApplierConfig) -> (OwningContext, Arc<MemoryHost>, ActionApplier) {
    let ctx = OwningContext::start("pipeline").unwrap();
    let host = Arc::new(MemoryHost::new());
    let applier = ActionApplier::new(host.clone(), ctx.handle(), Arc::new(AutoApprove), config);
    (ctx, host, applier)
}

fn create(applier: &ActionApplier, name: &str) -> GeneratedScript {
    applier
        .generator()
        .node_creation("Blur", &BTreeMap::new(), None, Some(name))
}

/// Block until `applier` holds its execution slot.
fn wait_until_busy(applier: &ActionApplier) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !applier.is_busy() {
        assert!(Instant::now() < deadline, "applier never became busy");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_create_with_size_is_valid_and_low_risk() {
    let generator = ScriptGenerator::default();
    let attrs = BTreeMap::from([("size".to_string(), AttrValue::Int(10))]);
    let script = generator.node_creation("Blur", &attrs, None, None);
    assert!(script.validation.is_valid);
    assert_eq!(script.validation.risk_level, RiskLevel::Low);

    let revalidated = ScriptValidator::new(ValidationLevel::Strict).validate(&script.code);
    assert_eq!(revalidated, script.validation);
}

#[test]
fn test_process_spawn_is_rejected_under_strict() {
    let result = ScriptValidator::new(ValidationLevel::Strict)
        .validate_text("import subprocess\nsubprocess.call(['ls'])");
    assert!(!result.is_valid);
    assert_eq!(result.risk_level, RiskLevel::High);
    assert!(!result.errors.is_empty());
}

#[test]
fn test_n_applies_then_n_undos() {
    let (ctx, host, applier) = setup(ApplierConfig::default());
    let n = 4;
    for i in 0..n {
        let action = applier.apply(create(&applier, &format!("Blur_{}", i)), Some(false));
        assert_eq!(action.status, ActionStatus::Success);
    }
    assert_eq!(host.node_names().len(), n);

    for remaining in (0..n).rev() {
        let before = applier
            .history(None)
            .iter()
            .filter(|a| a.status == ActionStatus::Success)
            .count();
        assert!(applier.undo_last().is_rolled_back());
        let after = applier
            .history(None)
            .iter()
            .filter(|a| a.status == ActionStatus::Success)
            .count();
        assert_eq!(before - after, 1);
        assert_eq!(host.node_names().len(), remaining);
    }
    assert!(
        applier
            .history(None)
            .iter()
            .all(|a| a.status == ActionStatus::RolledBack)
    );
    assert_eq!(applier.undo_last(), UndoOutcome::NotFound);
    ctx.shutdown();
}

#[test]
fn test_batch_failing_after_three_steps_records_one_entry() {
    let (ctx, host, applier) = setup(ApplierConfig::default());
    host.insert_entity("Read1", "Read");
    host.select(&["Read1".to_string()]).unwrap();

    let result = applier.batch("Three then fail", |scope| {
        for i in 0..3 {
            scope.try_apply(create(&applier, &format!("Step_{}", i)), Some(false))?;
        }
        Err::<(), _>(BatchStepError {
            description: "final check".into(),
            error: "layout rejected".into(),
        })
    });
    let Err(BatchError::Aborted {
        record, restored, ..
    }) = result
    else {
        panic!("expected an aborted batch");
    };
    assert!(restored);
    assert_eq!(record.children.len(), 3);
    assert!(record.error.as_deref().unwrap().contains("layout rejected"));
    assert_eq!(applier.history(None).len(), 1);
    // Restore puts the selection back.
    assert_eq!(host.selected_entities().unwrap(), vec!["Read1"]);
    ctx.shutdown();
}

#[test]
fn test_undo_after_out_of_band_delete_uses_snapshot() {
    let (ctx, host, applier) = setup(ApplierConfig::default());
    let action = applier.apply(create(&applier, "Blur_gone"), Some(false));
    assert_eq!(action.status, ActionStatus::Success);

    host.delete_entity("Blur_gone").unwrap();
    assert_eq!(
        applier.undo_last(),
        UndoOutcome::RolledBack {
            id: action.id,
            method: UndoMethod::Snapshot
        }
    );
    assert_eq!(
        applier.find(action.id).unwrap().status,
        ActionStatus::RolledBack
    );
    ctx.shutdown();
}

#[test]
fn test_reject_policy_fails_overlapping_apply() {
    let (ctx, host, applier) = setup(ApplierConfig::default());
    host.set_run_delay(Some(Duration::from_millis(300)));

    thread::scope(|s| {
        let first = s.spawn(|| applier.apply(create(&applier, "Blur_first"), Some(false)));
        wait_until_busy(&applier);

        let second = applier.apply(create(&applier, "Blur_second"), Some(false));
        assert_eq!(second.status, ActionStatus::Failed);
        assert_eq!(
            second.error.as_deref(),
            Some("another action is already executing")
        );
        assert_eq!(applier.undo_last(), UndoOutcome::Busy);
        assert!(matches!(
            applier.batch("blocked", |_| Ok::<_, BatchStepError>(())),
            Err(BatchError::Busy)
        ));

        assert_eq!(first.join().unwrap().status, ActionStatus::Success);
    });

    let history = applier.history(None);
    assert_eq!(history.len(), 1);
    assert_eq!(host.node_names(), vec!["Blur_first"]);
    ctx.shutdown();
}

#[test]
fn test_queue_policy_serialises_applies() {
    let (ctx, host, applier) = setup(ApplierConfig {
        overlap_policy: OverlapPolicy::Queue,
        ..ApplierConfig::default()
    });
    host.set_run_delay(Some(Duration::from_millis(100)));

    thread::scope(|s| {
        let first = s.spawn(|| applier.apply(create(&applier, "Blur_first"), Some(false)));
        wait_until_busy(&applier);
        let second = applier.apply(create(&applier, "Blur_second"), Some(false));
        let first = first.join().unwrap();
        assert_eq!(first.status, ActionStatus::Success);
        assert_eq!(second.status, ActionStatus::Success);
    });

    let history = applier.history(None);
    assert_eq!(history.len(), 2);
    assert_eq!(host.node_names(), vec!["Blur_first", "Blur_second"]);
    ctx.shutdown();
}

#[test]
fn test_timeout_marks_action_failed() {
    let (ctx, host, applier) = setup(ApplierConfig {
        max_execution_time_ms: 50,
        ..ApplierConfig::default()
    });
    host.set_run_delay(Some(Duration::from_millis(400)));

    let action = applier.apply(create(&applier, "Blur_slow"), Some(false));
    assert_eq!(action.status, ActionStatus::Failed);
    assert!(action.error.as_deref().unwrap().contains("timed out"));

    // The abandoned job still completes on the owning thread.
    host.set_run_delay(None);
    ctx.shutdown();
    assert_eq!(host.node_names(), vec!["Blur_slow"]);
}

#[test]
fn test_execution_happens_on_owning_thread() {
    let (ctx, host, applier) = setup(ApplierConfig::default());
    let action = applier.apply(create(&applier, "Blur_where"), Some(false));
    assert_eq!(action.status, ActionStatus::Success);
    assert_eq!(host.last_run_thread(), Some(ctx.thread_id()));
    assert_ne!(host.last_run_thread(), Some(thread::current().id()));
    ctx.shutdown();
}

#[test]
fn test_analyzed_response_applies_end_to_end() {
    let (ctx, host, applier) = setup(ApplierConfig::default());
    host.insert_entity("Read1", "Read");

    let response = "Add a grade under the plate.\n```python\nr = nuke.toNode('Read1')\ng = nuke.createNode('Grade')\ng['white'].setValue(1.2)\nif r:\n    g.setInput(0, r)\n```";
    let analysis = ActionAnalyzer::default().analyze(response).unwrap();
    assert!(analysis.requires_confirmation);
    let scripts = analysis.scripts();
    assert_eq!(scripts.len(), 1);

    let action = applier.apply(scripts[0].clone(), None);
    assert_eq!(action.status, ActionStatus::Success, "{:?}", action.error);
    let grade = host.entity_by_id("Grade1").unwrap().unwrap();
    assert_eq!(grade.inputs, vec![Some("Read1".to_string())]);
    assert_eq!(grade.attributes["white"], AttrValue::Float(1.2));
    ctx.shutdown();
}
