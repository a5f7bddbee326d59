use scenepilot_core::{GeneratedScript, RiskLevel};

/// What the user is asked before a script runs.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub description: String,
    pub risk_level: RiskLevel,
    pub warnings: Vec<String>,
    pub validation_summary: String,
    pub code_preview: String,
}

impl ConfirmationRequest {
    pub fn for_script(script: &GeneratedScript) -> Self {
        Self {
            description: script.description.clone(),
            risk_level: script.validation.risk_level,
            warnings: script.validation.warnings.clone(),
            validation_summary: script.validation.summary(),
            code_preview: script.code.preview(400),
        }
    }

    pub fn message(&self) -> String {
        let mut lines = vec![
            format!("Apply action: {}", self.description),
            format!("Validation: {}", self.validation_summary),
        ];
        for warning in &self.warnings {
            lines.push(format!("  ⚠ {}", warning));
        }
        lines.push(String::new());
        lines.push(self.code_preview.clone());
        lines.join("\n")
    }
}

/// Asks the user whether to proceed. Called off the owning context.
pub trait Confirm: Send + Sync {
    fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&ConfirmationRequest) -> bool + Send + Sync,
{
    fn confirm(&self, request: &ConfirmationRequest) -> bool {
        self(request)
    }
}

pub struct AutoApprove;

impl Confirm for AutoApprove {
    fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        true
    }
}

pub struct AutoDeny;

impl Confirm for AutoDeny {
    fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        false
    }
}
