use super::*;
use scenepilot_core::ValidationLevel;
use scenepilot_engine::Scene;
use std::path::Path;

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn run<F>(f: F) -> (Result<()>, String)
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let mut buf: Vec<u8> = Vec::new();
    let result = f(&mut buf);
    (result, String::from_utf8(buf).unwrap())
}

fn empty_scene(dir: &Path) -> PathBuf {
    write_file(dir, "scene.json", r#"{"nodes": {}}"#)
}

fn load_scene(path: &Path) -> Scene {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn options(file: PathBuf, scene: PathBuf) -> ApplyOptions {
    ApplyOptions {
        file,
        scene,
        script: false,
        yes: true,
        save: true,
        history_out: None,
        undo: false,
    }
}

const GRADE_RESPONSE: &str =
    "Add a grade.\n```python\ng = nuke.createNode('Grade')\ng['white'].setValue(1.5)\n```";

// ── Argument parsing ────────────────────────────────────────────

#[test]
fn test_parse_attr() {
    assert_eq!(
        parse_attr("size=10").unwrap(),
        ("size".to_string(), AttrValue::Int(10))
    );
    assert_eq!(
        parse_attr(" mix = 0.5").unwrap(),
        ("mix".to_string(), AttrValue::Float(0.5))
    );
    assert!(parse_attr("size").unwrap_err().contains("expected name=value"));
    assert!(parse_attr("=3").unwrap_err().contains("missing attribute name"));
}

#[test]
fn test_parse_position() {
    assert_eq!(parse_position("-10, 20").unwrap(), (-10, 20));
    assert!(parse_position("10").is_err());
    assert!(parse_position("a,2").unwrap_err().contains("invalid x"));
}

// ── analyze ─────────────────────────────────────────────────────

#[test]
fn test_analyze_prints_summary() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "response.md", GRADE_RESPONSE);
    let (result, output) = run(|out| analyze(&PilotConfig::default(), &file, false, out));
    result.unwrap();
    assert!(output.contains("Action: node_creation"), "{}", output);
    assert!(output.contains("Code blocks: 1"));
    assert!(output.contains("Requires confirmation: yes"));
}

#[test]
fn test_analyze_without_code() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "response.md", "Just use a Grade node.");
    let (result, output) = run(|out| analyze(&PilotConfig::default(), &file, false, out));
    result.unwrap();
    assert_eq!(output.trim(), "No actionable code found");
}

#[test]
fn test_analyze_json() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "response.md", GRADE_RESPONSE);
    let (result, output) = run(|out| analyze(&PilotConfig::default(), &file, true, out));
    result.unwrap();
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["blocks"].as_array().unwrap().len(), 1);
    assert_eq!(value["action_type"], "node_creation");
}

// ── preview ─────────────────────────────────────────────────────

#[test]
fn test_dry_run_failure_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "script.py", "x = (1,\n");
    let (result, output) = run(|out| preview(&PilotConfig::default(), &file, true, out));
    assert!(result.is_err());
    assert!(output.contains("Syntax error"), "{}", output);
}

// ── generate ────────────────────────────────────────────────────

#[test]
fn test_generate_create_prints_script_and_undo() {
    let request = GenerateRequest::Create {
        class: "Blur".into(),
        name: Some("Blur_soft".into()),
        attrs: vec![("size".into(), AttrValue::Int(10))],
        position: Some((100, 200)),
    };
    let (result, output) = run(|out| generate(&PilotConfig::default(), request, false, out));
    result.unwrap();
    assert!(output.contains("# Create Blur node 'Blur_soft'"), "{}", output);
    assert!(output.contains("createNode('Blur')"));
    assert!(output.contains("setXYpos(100, 200)"));
    assert!(output.contains("# undo:"));
}

#[test]
fn test_generate_unknown_workflow_fails() {
    let request = GenerateRequest::Workflow {
        kind: "matte_painting".into(),
        input_node: None,
        origin: (0, 0),
    };
    let (result, output) = run(|out| generate(&PilotConfig::default(), request, false, out));
    assert!(result.is_err());
    assert!(output.contains("Unknown workflow type"), "{}", output);
}

#[test]
fn test_generate_workflow_json() {
    let request = GenerateRequest::Workflow {
        kind: "basic_comp".into(),
        input_node: None,
        origin: (0, 0),
    };
    let (result, output) = run(|out| generate(&PilotConfig::default(), request, true, out));
    result.unwrap();
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["validation"]["is_valid"], true);
}

// ── apply ───────────────────────────────────────────────────────

#[test]
fn test_apply_saves_scene_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "response.md", GRADE_RESPONSE);
    let scene = empty_scene(dir.path());
    let history_path = dir.path().join("history.json");
    let opts = ApplyOptions {
        history_out: Some(history_path.clone()),
        ..options(file, scene.clone())
    };

    let (result, output) = run(|out| apply(&PilotConfig::default(), &opts, out));
    result.unwrap();
    assert!(output.starts_with("success"), "{}", output);

    let saved = load_scene(&scene);
    assert_eq!(saved.nodes["Grade1"].attributes["white"], AttrValue::Float(1.5));
    assert!(!saved.modified);

    let (result, printed) = run(|out| history(&history_path, out));
    result.unwrap();
    assert!(printed.contains("success"));
    assert!(printed.contains("[snapshot]"));
}

#[test]
fn test_undo_of_file_script_falls_back_to_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_file(
        dir.path(),
        "script.py",
        "b = nuke.createNode('Blur')\nb.setName('Blur_tmp')\n",
    );
    let scene = empty_scene(dir.path());
    let opts = ApplyOptions {
        script: true,
        undo: true,
        ..options(script, scene.clone())
    };

    let (result, output) = run(|out| apply(&PilotConfig::default(), &opts, out));
    result.unwrap();
    // Scripts read from disk carry no undo code, and a snapshot restore only resets selection.
    assert!(output.contains("undo: RolledBack"), "{}", output);
    assert!(output.contains("method: Snapshot"), "{}", output);
    assert!(load_scene(&scene).nodes.contains_key("Blur_tmp"));
}

#[test]
fn test_apply_multiple_blocks_as_batch() {
    let dir = tempfile::tempdir().unwrap();
    let response = "Two steps.\n```python\nnuke.createNode('Blur')\n```\nthen\n```python\nnuke.createNode('Grade')\n```";
    let file = write_file(dir.path(), "response.md", response);
    let scene = empty_scene(dir.path());

    let opts = options(file, scene.clone());
    let (result, output) = run(|out| apply(&PilotConfig::default(), &opts, out));
    result.unwrap();
    assert!(output.contains("Apply 2 code blocks"), "{}", output);
    let names: Vec<String> = load_scene(&scene).nodes.into_keys().collect();
    assert_eq!(names, vec!["Blur1", "Grade1"]);
}

#[test]
fn test_apply_blocked_response_under_strict() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(
        dir.path(),
        "response.md",
        "```python\nimport os\nos.system('ls')\nnuke.createNode('Blur')\n```",
    );
    let scene = empty_scene(dir.path());
    let mut config = PilotConfig::default();
    config.validation.level = ValidationLevel::Strict;

    let (result, _) = run(|out| apply(&config, &options(file, scene.clone()), out));
    let err = result.unwrap_err();
    assert!(err.to_string().contains("blocked"), "{}", err);
    assert!(load_scene(&scene).nodes.is_empty());
}

#[test]
fn test_apply_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_file(
        dir.path(),
        "script.py",
        "n = nuke.toNode('Missing')\nn['size'].setValue(3)\n",
    );
    let scene = empty_scene(dir.path());
    let opts = ApplyOptions {
        script: true,
        save: false,
        ..options(script, scene)
    };

    let (result, output) = run(|out| apply(&PilotConfig::default(), &opts, out));
    assert!(result.unwrap_err().to_string().contains("Action failed"));
    assert!(output.starts_with("failed"), "{}", output);
}

// ── history ─────────────────────────────────────────────────────

#[test]
fn test_history_of_empty_export() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "history.json", "[]");
    let (result, output) = run(|out| history(&file, out));
    result.unwrap();
    assert_eq!(output.trim(), "No actions recorded");
}
