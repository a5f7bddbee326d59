use crate::safety::{self, Classification};
use crate::syntax;
use crate::{CodeFragment, RiskLevel, ValidationLevel, ValidationResult};
use regex::Regex;
use std::sync::LazyLock;

static ABSOLUTE_PATH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"["'](?:[A-Za-z]:[\\/]|/(?:Users|home|mnt|Volumes|tmp)/)"#).ok()
});
static NODE_LOOKUP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"nuke\.toNode\s*\(").ok());
static EXISTENCE_CHECK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*if\s").ok());
static ALL_NODES: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"nuke\.allNodes\s*\(").ok());

fn matches(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

fn count(re: &LazyLock<Option<Regex>>, text: &str) -> usize {
    re.as_ref().map(|re| re.find_iter(text).count()).unwrap_or(0)
}

/// Validates host script fragments: syntax, safety patterns, then heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptValidator {
    level: ValidationLevel,
}

impl ScriptValidator {
    pub fn new(level: ValidationLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> ValidationLevel {
        self.level
    }

    pub fn validate(&self, fragment: &CodeFragment) -> ValidationResult {
        self.validate_text(fragment.text())
    }

    pub fn validate_text(&self, text: &str) -> ValidationResult {
        if let Err(e) = syntax::check(text) {
            return ValidationResult::rejected(format!("Syntax error: {}", e));
        }

        let mut result = ValidationResult {
            is_valid: true,
            ..ValidationResult::default()
        };

        let classification = safety::classify_text(text);
        self.apply_classification(&classification, &mut result);
        suggest(text, &mut result);

        tracing::debug!(
            level = ?self.level,
            valid = result.is_valid,
            risk = result.risk_level.as_str(),
            "Validated fragment"
        );
        result
    }

    fn apply_classification(&self, classification: &Classification, result: &mut ValidationResult) {
        for m in classification.blocking() {
            let message = format!(
                "Dangerous operation not allowed: {} ({})",
                m.pattern_id,
                safety::describe(m.pattern_id)
            );
            if self.level == ValidationLevel::Strict {
                result.errors.push(message);
                result.is_valid = false;
                result.risk_level = RiskLevel::High;
            } else {
                result.warnings.push(message);
                result.risk_level = result.risk_level.max(RiskLevel::Medium);
            }
        }

        if self.level == ValidationLevel::Permissive {
            return;
        }
        for m in classification.cautions() {
            result.warnings.push(format!(
                "Potentially risky operation: {} ({})",
                m.pattern_id,
                safety::describe(m.pattern_id)
            ));
            result.risk_level = result.risk_level.max(RiskLevel::Medium);
        }
    }
}

fn suggest(text: &str, result: &mut ValidationResult) {
    if matches(&ABSOLUTE_PATH, text) {
        result
            .suggestions
            .push("Consider using relative paths or project variables instead of hardcoded paths".into());
    }
    if matches(&NODE_LOOKUP, text) && !matches(&EXISTENCE_CHECK, text) {
        result
            .suggestions
            .push("Check that looked-up nodes exist before using them".into());
    }
    if count(&ALL_NODES, text) > 1 {
        result
            .suggestions
            .push("Cache the result of nuke.allNodes() instead of calling it repeatedly".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(level: ValidationLevel, text: &str) -> ValidationResult {
        ScriptValidator::new(level).validate(&CodeFragment::manual(text))
    }

    #[test]
    fn clean_fragment_is_valid_and_low_risk() {
        let r = validate(
            ValidationLevel::Strict,
            "blur = nuke.createNode('Blur')\nblur['size'].setValue(10)",
        );
        assert!(r.is_valid);
        assert_eq!(r.risk_level, RiskLevel::Low);
        assert!(r.errors.is_empty() && r.warnings.is_empty());
    }

    #[test]
    fn syntax_failure_is_fatal() {
        let r = validate(ValidationLevel::Permissive, "nuke.createNode('Blur'");
        assert!(!r.is_valid);
        assert_eq!(r.risk_level, RiskLevel::High);
        assert_eq!(r.errors.len(), 1);
        assert!(r.errors[0].starts_with("Syntax error: line 1, column 16:"));
    }

    #[test]
    fn process_spawn_is_invalid_under_strict() {
        let r = validate(
            ValidationLevel::Strict,
            "import subprocess\nsubprocess.call(['ls'])",
        );
        assert!(!r.is_valid);
        assert_eq!(r.risk_level, RiskLevel::High);
        assert!(!r.errors.is_empty());
    }

    #[test]
    fn blocking_is_a_warning_outside_strict() {
        for level in [ValidationLevel::Moderate, ValidationLevel::Permissive] {
            let r = validate(level, "import os\nos.system('ls')");
            assert!(r.is_valid);
            assert_eq!(r.risk_level, RiskLevel::Medium);
            assert_eq!(r.warnings.len(), 2);
        }
    }

    #[test]
    fn cautions_are_skipped_by_permissive() {
        let text = "for n in nuke.allNodes():\n    nuke.delete(n)";
        let moderate = validate(ValidationLevel::Moderate, text);
        assert_eq!(moderate.risk_level, RiskLevel::Medium);
        assert_eq!(moderate.warnings.len(), 2);

        let permissive = validate(ValidationLevel::Permissive, text);
        assert!(permissive.warnings.is_empty());
        assert_eq!(permissive.risk_level, RiskLevel::Low);
    }

    #[test]
    fn heuristics_only_suggest() {
        let text = "r = nuke.toNode('Read1')\nr['file'].setValue('/Users/me/plate.exr')\na = nuke.allNodes()\nb = nuke.allNodes()";
        let r = validate(ValidationLevel::Strict, text);
        assert!(r.is_valid);
        assert_eq!(r.suggestions.len(), 3);

        let guarded = validate(
            ValidationLevel::Strict,
            "r = nuke.toNode('Read1')\nif r:\n    r['first'].setValue(1)",
        );
        assert!(guarded.suggestions.is_empty());
    }
}
