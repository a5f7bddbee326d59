mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{ApplyOptions, GenerateRequest, parse_attr, parse_position};
use config::{LoggingSection, PilotConfig};
use scenepilot_core::AttrValue;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// ── CLI ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "scenepilot",
    about = "Analyze, generate and apply assistant actions on a scene graph"
)]
struct Cli {
    /// Path to config file (defaults to ./scenepilot.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the validation level (strict, moderate, permissive)
    #[arg(long, global = true)]
    level: Option<scenepilot_core::ValidationLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze an assistant response for executable actions
    Analyze {
        file: PathBuf,
        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// Preview what a script would do
    Preview {
        file: PathBuf,
        /// Step-by-step dry run instead of a summary
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate a script from a template
    Generate {
        #[command(subcommand)]
        template: Template,
        /// Print the generated script as JSON
        #[arg(long, global = true)]
        json: bool,
    },
    /// Apply a response (or script) to a scene file
    Apply {
        file: PathBuf,
        /// Scene JSON file to apply against
        #[arg(long)]
        scene: PathBuf,
        /// Treat FILE as a script rather than an assistant response
        #[arg(long)]
        script: bool,
        /// Approve confirmation prompts
        #[arg(long, short = 'y')]
        yes: bool,
        /// Write the scene back after applying
        #[arg(long)]
        save: bool,
        /// Export the action history to this path
        #[arg(long)]
        history_out: Option<PathBuf>,
        /// Undo the action right after applying it
        #[arg(long)]
        undo: bool,
    },
    /// Print an exported history file
    History { file: PathBuf },
}

#[derive(Subcommand)]
enum Template {
    /// Create a node
    Create {
        class: String,
        #[arg(long)]
        name: Option<String>,
        /// Attribute as name=value (repeatable)
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, AttrValue)>,
        /// Position as x,y
        #[arg(long, value_parser = parse_position, allow_hyphen_values = true)]
        pos: Option<(i64, i64)>,
    },
    /// Connect SOURCE into an input of TARGET
    Connect {
        source: String,
        target: String,
        #[arg(long, default_value_t = 0)]
        input: usize,
    },
    /// Build a workflow (basic_comp, keying_setup, color_correction). cleanup_nodes needs a live scene
    Workflow {
        kind: String,
        /// Existing node to build on
        #[arg(long)]
        input_node: Option<String>,
        /// Layout origin as x,y
        #[arg(long, value_parser = parse_position, allow_hyphen_values = true)]
        origin: Option<(i64, i64)>,
    },
}

// ── Logging ─────────────────────────────────────────────────────

/// Console on stderr, plus daily-rotated JSON files when a directory is set.
fn init_tracing(logging: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file, guard) = match &logging.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix("scenepilot")
                .filename_suffix("txt")
                .build(dir)
                .context("Failed to create log file appender")?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(&logging.file_level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Ok(guard)
}

// ── Main ────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = PilotConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.level {
        config.validation.level = level;
    }
    let _guard = init_tracing(&config.logging)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::Analyze { file, json } => commands::analyze(&config, &file, json, &mut out),
        Command::Preview { file, dry_run } => commands::preview(&config, &file, dry_run, &mut out),
        Command::Generate { template, json } => {
            let request = match template {
                Template::Create {
                    class,
                    name,
                    attrs,
                    pos,
                } => GenerateRequest::Create {
                    class,
                    name,
                    attrs,
                    position: pos,
                },
                Template::Connect {
                    source,
                    target,
                    input,
                } => GenerateRequest::Connect {
                    source,
                    target,
                    input,
                },
                Template::Workflow {
                    kind,
                    input_node,
                    origin,
                } => GenerateRequest::Workflow {
                    kind,
                    input_node,
                    origin: origin.unwrap_or((0, 0)),
                },
            };
            commands::generate(&config, request, json, &mut out)
        }
        Command::Apply {
            file,
            scene,
            script,
            yes,
            save,
            history_out,
            undo,
        } => {
            let opts = ApplyOptions {
                file,
                scene,
                script,
                yes,
                save,
                history_out,
                undo,
            };
            commands::apply(&config, &opts, &mut out)
        }
        Command::History { file } => commands::history(&file, &mut out),
    }
}
