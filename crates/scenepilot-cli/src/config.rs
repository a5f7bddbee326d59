use anyhow::{Context, Result, ensure};
use scenepilot_core::ValidationLevel;
use scenepilot_engine::{ApplierConfig, OverlapPolicy, SnapshotConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "scenepilot.toml";

// ── Config types ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub validation: ValidationSection,
    pub applier: ApplierSection,
    pub snapshot: SnapshotConfig,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub level: ValidationLevel,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApplierSection {
    pub require_confirmation: bool,
    pub auto_snapshot: bool,
    pub max_execution_time_ms: u64,
    pub max_history: usize,
    pub overlap_policy: OverlapPolicy,
}

impl Default for ApplierSection {
    fn default() -> Self {
        let defaults = ApplierConfig::default();
        Self {
            require_confirmation: defaults.require_confirmation,
            auto_snapshot: defaults.auto_snapshot,
            max_execution_time_ms: defaults.max_execution_time_ms,
            max_history: defaults.max_history,
            overlap_policy: defaults.overlap_policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Console filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rotated JSON logs. Unset disables file logging.
    pub directory: Option<PathBuf>,
    pub file_level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            directory: None,
            file_level: "debug".into(),
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────

impl PilotConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml_edit::de::from_str(content).context("Failed to parse config")?;
        ensure!(
            config.applier.max_execution_time_ms > 0,
            "applier.max_execution_time_ms must be greater than zero"
        );
        Ok(config)
    }

    /// Read `path`, or the default file if present, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn applier_config(&self) -> ApplierConfig {
        ApplierConfig {
            validation_level: self.validation.level,
            require_confirmation: self.applier.require_confirmation,
            auto_snapshot: self.applier.auto_snapshot,
            max_execution_time_ms: self.applier.max_execution_time_ms,
            max_history: self.applier.max_history,
            overlap_policy: self.applier.overlap_policy,
            snapshot: self.snapshot.clone(),
        }
    }
}
