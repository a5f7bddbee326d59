//! Pattern-based risk classification of host script text.

use crate::CodeFragment;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Caution,
    Blocking,
}

/// Overall safety tier, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    #[default]
    Safe,
    Caution,
    Dangerous,
    Blocked,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Safe => "safe",
            SafetyLevel::Caution => "caution",
            SafetyLevel::Dangerous => "dangerous",
            SafetyLevel::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SafetyMatch {
    pub severity: Severity,
    pub pattern_id: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Sorted by severity (blocking first), then pattern id.
    pub matches: Vec<SafetyMatch>,
    pub level: SafetyLevel,
}

impl Classification {
    pub fn blocking(&self) -> impl Iterator<Item = &SafetyMatch> {
        self.matches
            .iter()
            .filter(|m| m.severity == Severity::Blocking)
    }

    pub fn cautions(&self) -> impl Iterator<Item = &SafetyMatch> {
        self.matches
            .iter()
            .filter(|m| m.severity == Severity::Caution)
    }

    pub fn has_blocking(&self) -> bool {
        self.blocking().next().is_some()
    }
}

struct Pattern {
    id: &'static str,
    severity: Severity,
    regex: Regex,
}

const BLOCKING: &[(&str, &str)] = &[
    ("os-system", r"os\.system\s*\("),
    ("subprocess", r"subprocess\."),
    ("eval", r"\beval\s*\("),
    ("exec", r"\bexec\s*\("),
    ("compile", r"\bcompile\s*\("),
    ("dynamic-import", r"__import__\s*\("),
    ("file-write", r#"open\([^)]*["'][wa]\+?b?["']"#),
    ("script-save", r"nuke\.scriptSave\s*\("),
    ("script-save-as", r"nuke\.scriptSaveAs\s*\("),
    ("script-clear", r"nuke\.scriptClear\s*\("),
    ("script-close", r"nuke\.scriptClose\s*\("),
    ("script-open", r"nuke\.scriptOpen\s*\("),
    ("import-os", r"\bimport\s+os\b|\bfrom\s+os\s+import\b"),
    (
        "import-subprocess",
        r"\bimport\s+subprocess\b|\bfrom\s+subprocess\s+import\b",
    ),
];

const CAUTIONARY: &[(&str, &str)] = &[
    ("render", r"nuke\.render\s*\("),
    ("execute", r"nuke\.execute\s*\("),
    ("delete", r"nuke\.delete\s*\("),
    ("select-all", r"nuke\.selectAll\s*\(\s*\)"),
    ("remove-knob", r"\.removeKnob\s*\("),
    ("host-undo", r"nuke\.undo\s*\("),
    ("bulk-iteration", r"for\s.*nuke\.allNodes\s*\(\s*\)"),
    ("host-loop", r"while\s.*nuke\."),
];

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    let blocking = BLOCKING.iter().map(|&p| (p, Severity::Blocking));
    let caution = CAUTIONARY.iter().map(|&p| (p, Severity::Caution));
    blocking
        .chain(caution)
        .filter_map(|((id, src), severity)| {
            match Regex::new(&format!("(?i){}", src)) {
                Ok(regex) => Some(Pattern {
                    id,
                    severity,
                    regex,
                }),
                Err(e) => {
                    tracing::error!("Invalid safety pattern {}: {}", id, e);
                    None
                }
            }
        })
        .collect()
});

/// Classify a fragment against the blocking and cautionary pattern sets.
pub fn classify(fragment: &CodeFragment) -> Classification {
    classify_text(fragment.text())
}

pub fn classify_text(text: &str) -> Classification {
    let mut matches: Vec<SafetyMatch> = PATTERNS
        .iter()
        .filter(|p| p.regex.is_match(text))
        .map(|p| SafetyMatch {
            severity: p.severity,
            pattern_id: p.id,
        })
        .collect();
    matches.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.pattern_id.cmp(b.pattern_id)));

    let level = match matches.iter().map(|m| m.severity).max() {
        Some(Severity::Blocking) => SafetyLevel::Dangerous,
        Some(Severity::Caution) => SafetyLevel::Caution,
        None => SafetyLevel::Safe,
    };

    Classification { matches, level }
}

/// Human-readable label for a pattern id.
pub fn describe(pattern_id: &str) -> &'static str {
    match pattern_id {
        "os-system" => "shell command via os.system",
        "subprocess" => "process spawn via subprocess",
        "eval" => "dynamic evaluation via eval",
        "exec" => "dynamic execution via exec",
        "compile" => "dynamic compilation via compile",
        "dynamic-import" => "dynamic import via __import__",
        "file-write" => "file opened for writing",
        "script-save" => "saves the host script",
        "script-save-as" => "saves the host script under a new name",
        "script-clear" => "clears the host script",
        "script-close" => "closes the host script",
        "script-open" => "opens another host script",
        "import-os" => "imports the os module",
        "import-subprocess" => "imports the subprocess module",
        "render" => "starts a render",
        "execute" => "executes nodes",
        "delete" => "deletes nodes",
        "select-all" => "selects every node",
        "remove-knob" => "removes knobs",
        "host-undo" => "drives the host undo stack",
        "bulk-iteration" => "iterates over every node",
        "host-loop" => "loops over host calls",
        _ => "unknown pattern",
    }
}
