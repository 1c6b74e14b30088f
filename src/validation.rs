//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations for a submission.
//! The screener decides whether the row may be issued a ticket.

use serde::{Deserialize, Serialize};

use crate::submission::Submission;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub eligible: bool,
    pub violations: Vec<ValidationViolation>,
}

impl ScreeningResult {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validation rule trait - produces violations
pub trait SubmissionRule {
    fn name(&self) -> &'static str;
    fn check(&self, submission: &Submission) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

/// Name, email and timestamp must all be present.
pub struct RequiredFieldsRule;

impl SubmissionRule for RequiredFieldsRule {
    fn name(&self) -> &'static str { "required_fields" }

    fn check(&self, submission: &Submission) -> Vec<ValidationViolation> {
        [
            ("timestamp", submission.timestamp.as_str()),
            ("email", submission.email.as_str()),
            ("name", submission.display_name.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Error,
            message: format!("{} is empty", field),
            field: Some(field.to_string()),
        })
        .collect()
    }
}

/// Flags addresses that cannot be mailed. Does not block issuance.
pub struct EmailShapeRule;

impl SubmissionRule for EmailShapeRule {
    fn name(&self) -> &'static str { "email_shape" }

    fn check(&self, submission: &Submission) -> Vec<ValidationViolation> {
        let email = submission.email.trim();
        if email.is_empty() {
            return vec![];
        }
        let plausible = email
            .split_once('@')
            .map_or(false, |(local, domain)| !local.is_empty() && domain.contains('.'));
        if plausible {
            vec![]
        } else {
            vec![ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Warning,
                message: format!("'{}' does not look like an email address", email),
                field: Some("email".to_string()),
            }]
        }
    }
}

/// Screener orchestrates rules and applies policy
pub struct Screener {
    rules: Vec<Box<dyn SubmissionRule + Send + Sync>>,
}

impl std::fmt::Debug for Screener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("Screener").field("rules", &names).finish()
    }
}

impl Screener {
    pub fn new() -> Self {
        Self {
            rules: vec![Box::new(RequiredFieldsRule), Box::new(EmailShapeRule)],
        }
    }

    pub fn screen(&self, submission: &Submission) -> ScreeningResult {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(submission))
            .collect();

        // Warnings never block
        let eligible = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        ScreeningResult { eligible, violations }
    }
}

impl Default for Screener {
    fn default() -> Self {
        Self::new()
    }
}
