//! Host operation detection and runtime estimates.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const OPERATIONS: &[(&str, &str)] = &[
    (r"nuke\.createNode\s*\(", "Creates new nodes"),
    (r"nuke\.delete\s*\(", "Deletes nodes"),
    (r"\.setInput\s*\(", "Connects nodes"),
    (
        r#"(?:\.knob\(\s*["'][^"']*["']\s*\)|\[\s*["'][^"']*["']\s*\])\.setValue\s*\("#,
        "Sets knob values",
    ),
    (r"nuke\.selectAll\s*\(\s*\)", "Selects all nodes"),
    (r"nuke\.selectedNodes\s*\(\s*\)", "Works with selected nodes"),
    (r"nuke\.allNodes\s*\(\s*\)", "Works with all nodes"),
    (r"nuke\.render\s*\(", "Renders output"),
    (r"nuke\.execute\s*\(", "Executes nodes"),
    (r"\.setXYpos\s*\(", "Positions nodes"),
    (r"\.setName\s*\(", "Renames nodes"),
    (r"\.addKnob\s*\(", "Adds knobs to nodes"),
    (r"\.removeKnob\s*\(", "Removes knobs from nodes"),
];

static TABLE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    OPERATIONS
        .iter()
        .filter_map(|(pattern, description)| {
            Regex::new(&format!("(?i){}", pattern))
                .ok()
                .map(|re| (re, *description))
        })
        .collect()
});

static LONG_RUNNING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:render|execute)\s*\(").ok());
static ITERATIVE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:for|while)\s|allNodes\s*\(").ok());

/// Host operations a fragment performs, in table order.
pub fn detect_operations(code: &str) -> Vec<&'static str> {
    TABLE
        .iter()
        .filter(|(re, _)| re.is_match(code))
        .map(|(_, description)| *description)
        .collect()
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Runtime {
    #[default]
    Quick,
    Medium,
    Long,
}

impl Runtime {
    pub fn estimate(code: &str) -> Self {
        let matches = |re: &LazyLock<Option<Regex>>| re.as_ref().is_some_and(|re| re.is_match(code));
        if matches(&LONG_RUNNING) {
            Runtime::Long
        } else if matches(&ITERATIVE) {
            Runtime::Medium
        } else {
            Runtime::Quick
        }
    }

    /// Rough cost in seconds, used as a script's estimated cost.
    pub fn seconds(&self) -> f64 {
        match self {
            Runtime::Quick => 0.1,
            Runtime::Medium => 1.0,
            Runtime::Long => 10.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Quick => "Quick",
            Runtime::Medium => "Medium",
            Runtime::Long => "Long",
        }
    }
}
