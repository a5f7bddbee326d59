use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use scenepilot_assist::{ActionAnalysis, ActionAnalyzer, ActionType, AnalyzerConfig};
use scenepilot_core::generator::{ConnectionSpec, ScriptGenerator, WorkflowContext};
use scenepilot_core::history::{ExportedAction, load_export};
use scenepilot_core::{
    ActionStatus, AppliedAction, AttrValue, CodeFragment, GeneratedScript, ScriptValidator,
};
use scenepilot_engine::{
    ActionApplier, AutoApprove, BatchError, BatchStepError, Confirm, ConfirmationRequest,
    MemoryHost, OwningContext,
};
use tracing::info;

use crate::config::PilotConfig;

/// Asks on stderr and reads the answer from stdin.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, request: &ConfirmationRequest) -> bool {
        eprintln!("{}", request.message());
        eprint!("Proceed? [y/N] ");
        let _ = io::stderr().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// `name=value` from the command line.
pub fn parse_attr(s: &str) -> Result<(String, AttrValue), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing attribute name in '{}'", s));
    }
    let value = value
        .parse::<AttrValue>()
        .map_err(|e| format!("invalid value in '{}': {}", s, e))?;
    Ok((name.to_string(), value))
}

/// `x,y` from the command line.
pub fn parse_position(s: &str) -> Result<(i64, i64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y, got '{}'", s))?;
    let x = x.trim().parse().map_err(|_| format!("invalid x in '{}'", s))?;
    let y = y.trim().parse().map_err(|_| format!("invalid y in '{}'", s))?;
    Ok((x, y))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn analyzer(config: &PilotConfig) -> ActionAnalyzer {
    ActionAnalyzer::new(AnalyzerConfig {
        validation_level: config.validation.level,
    })
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn write_list(out: &mut dyn Write, title: &str, marker: &str, items: &[String]) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(out, "{}:", title)?;
    for item in items {
        writeln!(out, "  {} {}", marker, item)?;
    }
    Ok(())
}

// ── analyze ─────────────────────────────────────────────────────

pub fn analyze(config: &PilotConfig, path: &Path, json: bool, out: &mut dyn Write) -> Result<()> {
    let text = read_text(path)?;
    let Some(analysis) = analyzer(config).analyze(&text) else {
        writeln!(out, "No actionable code found")?;
        return Ok(());
    };
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&analysis)?)?;
        return Ok(());
    }
    write_analysis(out, &analysis)
}

fn write_analysis(out: &mut dyn Write, analysis: &ActionAnalysis) -> Result<()> {
    writeln!(out, "Description: {}", analysis.description)?;
    writeln!(
        out,
        "Action: {} (safety {})",
        analysis.action_type.as_str(),
        analysis.safety_level.as_str()
    )?;
    writeln!(out, "Code blocks: {}", analysis.blocks.len())?;
    writeln!(out, "Affects scene: {}", yes_no(analysis.affects_host_state))?;
    writeln!(
        out,
        "Requires confirmation: {}",
        yes_no(analysis.requires_confirmation)
    )?;
    writeln!(out, "Estimated runtime: {}", analysis.estimated_runtime.as_str())?;
    write_list(out, "Operations", "•", &analysis.operations)?;
    write_list(out, "Warnings", "⚠", &analysis.warnings)?;
    write_list(out, "Errors", "✗", &analysis.errors)?;
    Ok(())
}

// ── preview ─────────────────────────────────────────────────────

pub fn preview(config: &PilotConfig, path: &Path, dry_run: bool, out: &mut dyn Write) -> Result<()> {
    let fragment = CodeFragment::manual(read_text(path)?);
    let analyzer = analyzer(config);
    if dry_run {
        let report = analyzer.dry_run(&fragment);
        for step in &report.steps {
            writeln!(out, "{}", step)?;
        }
        if !report.passed {
            bail!("Dry run failed");
        }
        return Ok(());
    }

    let preview = analyzer.preview(&fragment);
    writeln!(out, "Description: {}", preview.description)?;
    writeln!(out, "Safety: {}", preview.safety_level.as_str())?;
    writeln!(out, "Validation: {}", preview.validation_summary)?;
    writeln!(out, "Affects scene: {}", yes_no(preview.affects_host_state))?;
    writeln!(out, "Interpretable: {}", yes_no(preview.interpretable))?;
    writeln!(out, "Estimated runtime: {}", preview.estimated_runtime.as_str())?;
    write_list(out, "Operations", "•", &preview.operations)?;
    write_list(out, "Warnings", "⚠", &preview.warnings)?;
    write_list(out, "Errors", "✗", &preview.errors)?;
    write_list(out, "Suggestions", "→", &preview.suggestions)?;
    Ok(())
}

// ── generate ────────────────────────────────────────────────────

pub enum GenerateRequest {
    Create {
        class: String,
        name: Option<String>,
        attrs: Vec<(String, AttrValue)>,
        position: Option<(i64, i64)>,
    },
    Connect {
        source: String,
        target: String,
        input: usize,
    },
    Workflow {
        kind: String,
        input_node: Option<String>,
        origin: (i64, i64),
    },
}

pub fn generate(
    config: &PilotConfig,
    request: GenerateRequest,
    json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let generator = ScriptGenerator::new(config.validation.level);
    let script = match request {
        GenerateRequest::Create {
            class,
            name,
            attrs,
            position,
        } => {
            let attrs: BTreeMap<String, AttrValue> = attrs.into_iter().collect();
            generator.node_creation(&class, &attrs, position, name.as_deref())
        }
        GenerateRequest::Connect {
            source,
            target,
            input,
        } => generator.connection(&[ConnectionSpec::new(source, target, input)]),
        GenerateRequest::Workflow {
            kind,
            input_node,
            origin,
        } => generator.workflow_named(
            &kind,
            &WorkflowContext {
                input_node,
                origin,
                ..Default::default()
            },
        ),
    };

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&script)?)?;
    } else {
        write_script(out, &script)?;
    }
    if !script.validation.is_valid {
        bail!("{}", script.description);
    }
    Ok(())
}

fn write_script(out: &mut dyn Write, script: &GeneratedScript) -> Result<()> {
    writeln!(out, "# {}", script.description)?;
    writeln!(out, "# type: {}", script.script_type.as_str())?;
    writeln!(out, "# validation: {}", script.validation.summary())?;
    write!(out, "{}", script.code.text())?;
    if let Some(undo) = &script.undo_code {
        writeln!(out, "\n# undo:")?;
        write!(out, "{}", undo.text())?;
    }
    Ok(())
}

// ── apply ───────────────────────────────────────────────────────

pub struct ApplyOptions {
    pub file: PathBuf,
    pub scene: PathBuf,
    /// Treat the file as a script instead of an assistant response.
    pub script: bool,
    pub yes: bool,
    pub save: bool,
    pub history_out: Option<PathBuf>,
    pub undo: bool,
}

pub fn apply(config: &PilotConfig, opts: &ApplyOptions, out: &mut dyn Write) -> Result<()> {
    let text = read_text(&opts.file)?;
    let scripts = if opts.script {
        vec![script_from_file(config, &opts.file, text)]
    } else {
        let analysis = analyzer(config)
            .analyze(&text)
            .context("No actionable code found in response")?;
        if analysis.is_blocked() {
            bail!("Response is blocked: {}", analysis.errors.join("; "));
        }
        analysis.scripts()
    };

    let host = Arc::new(MemoryHost::load(&opts.scene)?);
    let ctx = OwningContext::start("scenepilot-host").context("Failed to start owning context")?;
    let confirm: Arc<dyn Confirm> = if opts.yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(StdinConfirm)
    };
    let applier = ActionApplier::new(host.clone(), ctx.handle(), confirm, config.applier_config());

    let action = apply_all(&applier, scripts)?;
    write_action(out, &action, 0)?;
    let succeeded = action.status == ActionStatus::Success;

    if opts.undo && succeeded {
        let outcome = applier.undo_last();
        writeln!(out, "undo: {:?}", outcome)?;
    }
    if opts.save {
        host.save(&opts.scene)?;
        info!(scene = %opts.scene.display(), "Saved scene");
    }
    if let Some(path) = &opts.history_out {
        applier.export_history(path)?;
        writeln!(out, "history written to {}", path.display())?;
    }
    drop(applier);
    ctx.shutdown();

    if !succeeded {
        bail!(
            "Action failed: {}",
            action.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn script_from_file(config: &PilotConfig, path: &Path, text: String) -> GeneratedScript {
    let fragment = CodeFragment::manual(text);
    let validation = ScriptValidator::new(config.validation.level).validate(&fragment);
    let script_type = ActionType::classify(fragment.text()).script_type();
    GeneratedScript {
        script_type,
        description: format!("Run {}", path.display()),
        code: fragment,
        validation,
        estimated_cost: 0.0,
        dependencies: Vec::new(),
        undo_code: None,
    }
}

/// One script applies directly; several apply as a batch.
fn apply_all(applier: &ActionApplier, mut scripts: Vec<GeneratedScript>) -> Result<AppliedAction> {
    if scripts.len() <= 1 {
        let script = scripts.pop().context("No scripts to apply")?;
        return Ok(applier.apply(script, None));
    }
    let description = format!("Apply {} code blocks", scripts.len());
    match applier.batch(&description, |scope| {
        for script in scripts {
            scope.try_apply(script, None)?;
        }
        Ok::<_, BatchStepError>(())
    }) {
        Ok(outcome) => Ok(outcome.record),
        Err(BatchError::Aborted { record, .. }) => Ok(*record),
        Err(BatchError::Busy) => bail!("another action is already executing"),
    }
}

fn write_action(out: &mut dyn Write, action: &AppliedAction, depth: usize) -> Result<()> {
    let pad = "  ".repeat(depth);
    writeln!(
        out,
        "{}{} {} ({} ms) {}",
        pad, action.status, action.id, action.duration_ms, action.description
    )?;
    if let Some(error) = &action.error {
        writeln!(out, "{}  error: {}", pad, error)?;
    }
    if let Some(output) = &action.output {
        for line in output.lines() {
            writeln!(out, "{}  | {}", pad, line)?;
        }
    }
    for child in &action.children {
        write_action(out, child, depth + 1)?;
    }
    Ok(())
}

// ── history ─────────────────────────────────────────────────────

pub fn history(path: &Path, out: &mut dyn Write) -> Result<()> {
    let entries = load_export(path)?;
    if entries.is_empty() {
        writeln!(out, "No actions recorded")?;
    }
    for entry in &entries {
        write_exported(out, entry, 0)?;
    }
    Ok(())
}

fn write_exported(out: &mut dyn Write, entry: &ExportedAction, depth: usize) -> Result<()> {
    let pad = "  ".repeat(depth);
    writeln!(
        out,
        "{}{} {:<12} {} {}{}",
        pad,
        entry.timestamp,
        entry.status.as_str(),
        entry.id,
        entry.description,
        if entry.had_snapshot { " [snapshot]" } else { "" }
    )?;
    if let Some(error) = &entry.error {
        writeln!(out, "{}  error: {}", pad, error)?;
    }
    for child in &entry.children {
        write_exported(out, child, depth + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
