use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::profile::Profile;
use crate::codes::Concept;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EInvoiceError>;

/// Errors that abort a generation or import pass.
///
/// Validator findings are never reported through this type; they come back
/// as [`Violation`] data. Approximated tax bases are flagged with an
/// [`ApproximationWarning`] on the affected row instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EInvoiceError {
    /// A field the selected profile needs is absent from the source data.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// A field is present but its value cannot be used.
    #[error("invalid value for {field}: {message}")]
    InvalidField { field: String, message: String },

    /// A tax/charge row uses a calculation the e-invoice cannot express.
    #[error("tax row #{row}: charge type '{charge_type}' is not supported in e-invoices")]
    UnsupportedChargeType { row: usize, charge_type: String },

    /// The invoice uses something the selected profile does not allow, or
    /// lacks an element the profile mandates.
    #[error("profile {profile}: {message}")]
    ProfileConstraintViolation { profile: Profile, message: String },

    /// The document declares a guideline identifier this crate does not handle.
    #[error("unsupported profile identifier: {0}")]
    UnsupportedProfile(String),

    /// A PDF was given but carries no embedded e-invoice XML.
    #[error("no machine-readable e-invoice data was found in the document")]
    NoEinvoiceData,

    /// The input is neither XML nor PDF.
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// Every candidate in a code list lookup came up empty and no default applies.
    #[error("no {concept} code found for [{candidates}]")]
    ResolutionFailure { concept: Concept, candidates: String },

    /// XML generation or parsing error.
    #[error("XML error: {0}")]
    Xml(String),

    /// PDF loading, embedding or extraction error.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// The external rule engine failed or timed out.
    #[error("rule engine error: {0}")]
    RuleEngine(String),

    /// A registered generation hook rejected the document.
    #[error("generation hook failed: {0}")]
    Hook(String),

    /// Settings could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl EInvoiceError {
    pub(crate) fn missing(field: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn profile(profile: Profile, message: impl Into<String>) -> Self {
        Self::ProfileConstraintViolation {
            profile,
            message: message.into(),
        }
    }
}

/// Severity of a validator finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

/// A single finding reported by invariant checks or the rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Business rule identifier if known (e.g. "BR-DE-15").
    pub rule_id: Option<String>,
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Field path or XPath of the offending element.
    pub location: Option<String>,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(rule) = &self.rule_id {
            write!(f, "[{rule}] ")?;
        }
        if let Some(location) = &self.location {
            write!(f, "{location}: ")?;
        }
        f.write_str(&self.message)
    }
}

impl Violation {
    /// Create an error-level finding.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            rule_id: None,
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    /// Create a warning-level finding.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule_id = Some(rule.into());
        self
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Non-fatal marker attached to a tax summary row whose basis amount was
/// not known exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproximationWarning {
    pub message: String,
    /// `basis * rate / 100` for the row as emitted.
    pub expected_amount: Decimal,
    /// Absolute difference between the expected and the calculated amount.
    pub deviation: Decimal,
}

impl std::fmt::Display for ApproximationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (deviation {})", self.message, self.deviation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_display_includes_rule_and_location() {
        let v = Violation::error("Buyer reference missing")
            .with_rule("BR-DE-15")
            .at("/rsm:CrossIndustryInvoice");
        assert_eq!(
            v.to_string(),
            "[BR-DE-15] /rsm:CrossIndustryInvoice: Buyer reference missing"
        );
        assert!(v.is_error());
        assert!(!Violation::warning("x").is_error());
    }

    #[test]
    fn profile_violation_names_profile() {
        let e = EInvoiceError::profile(Profile::Basic, "flat charges are not allowed");
        assert_eq!(e.to_string(), "profile BASIC: flat charges are not allowed");
    }
}
