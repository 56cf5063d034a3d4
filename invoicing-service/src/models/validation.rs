//! Validation checklist returned by the validate operation.

use serde::{Deserialize, Serialize};

/// One named check with its outcome and remediation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl ValidationCheck {
    pub fn new(name: &str, passed: bool, ok: &str, failed: &str) -> Self {
        Self {
            name: name.to_string(),
            passed,
            message: if passed { ok } else { failed }.to_string(),
        }
    }
}

/// Full checklist; `valid` is true only when every check passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    pub fn from_checks(checks: Vec<ValidationCheck>) -> Self {
        Self {
            valid: checks.iter().all(|c| c.passed),
            checks,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}
