use crate::parse::{dedent, describe_response, extract_code_blocks, truncate};
use crate::*;
use scenepilot_core::safety::SafetyLevel;
use scenepilot_core::{CodeFragment, ScriptType, ValidationLevel};

fn analyzer(level: ValidationLevel) -> ActionAnalyzer {
    ActionAnalyzer::new(AnalyzerConfig {
        validation_level: level,
    })
}

// ── Extraction ──────────────────────────────────────────────────

#[test]
fn test_extract_fenced_python_blocks() {
    let text = "Here you go:\n```python\nblur = nuke.createNode('Blur')\n```\nAnd:\n```\nnuke.selectNone()\n```";
    let blocks = extract_code_blocks(text);
    assert_eq!(
        blocks,
        vec!["blur = nuke.createNode('Blur')", "nuke.selectNone()"]
    );
}

#[test]
fn test_extract_skips_other_languages_and_non_host_code() {
    let text = "```bash\nnuke.createNode('Blur')\n```\n```python\nprint('hello')\n```";
    assert!(extract_code_blocks(text).is_empty());
}

#[test]
fn test_extract_falls_back_to_inline_runs() {
    let text = "Try this:\n  nuke.createNode('Grade')\n  nuke.selectNone()\nthen review.\nnuke.delete(n)";
    let blocks = extract_code_blocks(text);
    assert_eq!(
        blocks,
        vec!["nuke.createNode('Grade')\nnuke.selectNone()", "nuke.delete(n)"]
    );
}

#[test]
fn test_inline_runs_ignore_one_line_fences() {
    let text = "```nuke.createNode('Blur')``` is the short form.\nnuke.createNode('Grade')\nnuke.delete(n)";
    assert_eq!(
        extract_code_blocks(text),
        vec!["nuke.createNode('Grade')\nnuke.delete(n)"]
    );
    assert_eq!(
        describe_response("```x``` inline.\nThe plate gets a soft blur.", 1),
        "The plate gets a soft blur."
    );
}

#[test]
fn test_dedent_keeps_relative_indentation() {
    let code = "\n    r = nuke.toNode('Read1')\n    if r:\n        r['first'].setValue(1)\n";
    assert_eq!(
        dedent(code),
        "r = nuke.toNode('Read1')\nif r:\n    r['first'].setValue(1)"
    );
}

#[test]
fn test_describe_response_uses_prose_outside_fences() {
    let text = "# Heading\nThis creates a soft blur on the plate.\n```python\n# a long comment inside the fence\nnuke.createNode('Blur')\n```\nShort.\nIt also keeps the default filter.";
    assert_eq!(
        describe_response(text, 1),
        "This creates a soft blur on the plate. It also keeps the default filter."
    );
    assert_eq!(describe_response("```\nx\n```", 2), "Execute 2 code block(s)");
}

#[test]
fn test_truncate() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
}

// ── Operations ──────────────────────────────────────────────────

#[test]
fn test_detect_operations_both_knob_forms() {
    let ops = detect_operations("n.knob('size').setValue(2)\nm['mix'].setValue(1)\nm.setInput(0, n)");
    assert_eq!(ops, vec!["Connects nodes", "Sets knob values"]);
}

#[test]
fn test_runtime_estimate() {
    assert_eq!(Runtime::estimate("nuke.createNode('Blur')"), Runtime::Quick);
    assert_eq!(
        Runtime::estimate("for n in nuke.allNodes():\n    pass"),
        Runtime::Medium
    );
    assert_eq!(Runtime::estimate("nuke.execute('Write1', 1, 10)"), Runtime::Long);
}

// ── Analysis ────────────────────────────────────────────────────

#[test]
fn test_analyze_returns_none_without_code() {
    assert!(
        ActionAnalyzer::default()
            .analyze("Nuke is a compositing application.")
            .is_none()
    );
}

#[test]
fn test_analyze_creation_requires_confirmation() {
    let text = "This adds a blur node to soften the plate.\n```python\nblur = nuke.createNode('Blur')\nblur['size'].setValue(10)\n```";
    let analysis = ActionAnalyzer::default().analyze(text).unwrap();
    assert_eq!(analysis.action_type, ActionType::NodeCreation);
    assert_eq!(analysis.safety_level, SafetyLevel::Safe);
    assert!(analysis.affects_host_state);
    assert!(analysis.requires_confirmation);
    assert_eq!(analysis.description, "This adds a blur node to soften the plate.");
    assert!(analysis.blocks[0].interpretable);
    assert!(analysis.operations.contains(&"Creates new nodes".to_string()));
}

#[test]
fn test_action_type_precedence_across_blocks() {
    let text = "```\nnuke.render('Write1', 1, 1)\n```\n```\na = nuke.toNode('A')\nb = nuke.toNode('B')\nb.setInput(0, a)\n```\n```\nnuke.createNode('Dot')\n```";
    let analysis = ActionAnalyzer::default().analyze(text).unwrap();
    assert_eq!(analysis.blocks.len(), 3);
    assert_eq!(analysis.blocks[0].action_type, ActionType::RenderOperation);
    assert_eq!(analysis.blocks[1].action_type, ActionType::Connection);
    assert_eq!(analysis.action_type, ActionType::NodeCreation);
    assert_eq!(analysis.estimated_runtime, Runtime::Long);
    assert_eq!(analysis.safety_level, SafetyLevel::Caution);
}

#[test]
fn test_blocking_pattern_depends_on_level() {
    let text = "```python\nimport nuke\nimport os\nos.system('rm -rf /tmp/cache')\n```";

    let strict = analyzer(ValidationLevel::Strict).analyze(text).unwrap();
    assert_eq!(strict.safety_level, SafetyLevel::Blocked);
    assert!(strict.is_blocked());
    assert!(!strict.requires_confirmation);
    assert!(!strict.errors.is_empty());

    let moderate = analyzer(ValidationLevel::Moderate).analyze(text).unwrap();
    assert_eq!(moderate.safety_level, SafetyLevel::Dangerous);
    assert!(moderate.requires_confirmation);
    assert!(!moderate.blocks[0].interpretable);
}

#[test]
fn test_syntax_error_blocks_analysis() {
    let text = "```python\nnuke.createNode('Blur'\n```";
    let analysis = ActionAnalyzer::default().analyze(text).unwrap();
    assert!(analysis.is_blocked());
    assert!(analysis.errors[0].starts_with("Syntax error:"));
}

#[test]
fn test_scripts_from_analysis() {
    let text = "Connect the plate into the grade node.\n```python\nr = nuke.toNode('Read1')\ng = nuke.toNode('Grade1')\nif r:\n    g.setInput(0, r)\n```";
    let analysis = ActionAnalyzer::default().analyze(text).unwrap();
    let scripts = analysis.scripts();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].script_type, ScriptType::ConnectionSetup);
    assert_eq!(scripts[0].dependencies, vec!["Read1", "Grade1"]);
    assert!(scripts[0].undo_code.is_none());
    assert!(scripts[0].validation.is_valid);
}

// ── Preview and dry run ─────────────────────────────────────────

#[test]
fn test_preview_summarises_fragment() {
    let fragment = CodeFragment::manual("for n in nuke.allNodes():\n    nuke.delete(n)");
    let preview = ActionAnalyzer::default().preview(&fragment);
    assert_eq!(preview.safety_level, SafetyLevel::Caution);
    assert_eq!(preview.estimated_runtime, Runtime::Medium);
    assert!(preview.affects_host_state);
    assert!(!preview.interpretable);
    assert_eq!(preview.warnings.len(), 2);
    assert!(preview.validation_summary.starts_with("valid"));
}

#[test]
fn test_dry_run_lists_steps() {
    let fragment = CodeFragment::manual("g = nuke.createNode('Grade')\ng['white'].setValue(1.5)");
    let report = ActionAnalyzer::default().dry_run(&fragment);
    assert!(report.passed, "{:?}", report.steps);
    assert!(report.steps.contains(&"✓ Syntax check passed".to_string()));
    assert!(report.steps.contains(&"  • Creates new nodes".to_string()));
    assert!(report.steps.contains(&"  1. create a Grade node".to_string()));
    assert_eq!(report.steps.last().unwrap(), "Dry run completed successfully");
}

#[test]
fn test_dry_run_stops_at_uninterpretable_code() {
    let fragment = CodeFragment::manual("for n in nuke.allNodes():\n    n.setSelected(True)");
    let report = ActionAnalyzer::default().dry_run(&fragment);
    assert!(!report.passed);
    assert!(report.steps.last().unwrap().starts_with("✗ Cannot be interpreted"));

    let broken = ActionAnalyzer::default().dry_run(&CodeFragment::manual("x = ("));
    assert!(!broken.passed);
    assert!(broken.steps[1].starts_with("✗ Syntax error"));
}
