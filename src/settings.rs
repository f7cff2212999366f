//! Validation policy and numeric knobs.
//!
//! Settings come from an optional file plus environment variables prefixed
//! with `ERECHNUNG`, nested keys separated by `__`:
//!
//! ```text
//! ERECHNUNG__VALIDATE_ON_SAVE=false
//! ERECHNUNG__ERROR_ACTION_ON_SUBMIT=block
//! ```

use config::{Config, Environment, File, Source};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::core::{Result, Violation};

/// When validation runs, relative to the ERP document lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Save,
    Submit,
}

/// What the caller does when validation reports errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    #[default]
    None,
    Warn,
    Block,
}

/// Outcome of applying the policy to a set of findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Ignore,
    Warn,
    Block,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub validate_on_save: bool,
    pub validate_on_submit: bool,
    pub error_action_on_save: FailureAction,
    pub error_action_on_submit: FailureAction,
    /// Maximum deviation between `basis * rate / 100` and the calculated
    /// tax amount before a row is flagged.
    pub approximation_tolerance: Decimal,
    /// Decimal places approximated basis amounts are rounded to.
    pub basis_rounding_scale: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            validate_on_save: true,
            validate_on_submit: true,
            error_action_on_save: FailureAction::None,
            error_action_on_submit: FailureAction::None,
            approximation_tolerance: dec!(0.01),
            basis_rounding_scale: 2,
        }
    }
}

impl Settings {
    /// Load from an optional file (any format `config` understands) and the
    /// `ERECHNUNG__*` environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let cfg = builder
            .add_source(Environment::with_prefix("ERECHNUNG").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Load from a single source, e.g. an in-memory file in tests.
    pub fn from_source<S>(source: S) -> Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let cfg = Config::builder().add_source(source).build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn should_validate(&self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Save => self.validate_on_save,
            Trigger::Submit => self.validate_on_submit,
        }
    }

    /// The configured action; `None` when the trigger does not validate.
    pub fn action_for(&self, trigger: Trigger) -> FailureAction {
        if !self.should_validate(trigger) {
            return FailureAction::None;
        }
        match trigger {
            Trigger::Save => self.error_action_on_save,
            Trigger::Submit => self.error_action_on_submit,
        }
    }

    /// Map validator findings to a decision. Only error-level findings count.
    pub fn decide(&self, trigger: Trigger, violations: &[Violation]) -> PolicyDecision {
        if !violations.iter().any(Violation::is_error) {
            return PolicyDecision::Ignore;
        }
        match self.action_for(trigger) {
            FailureAction::None => PolicyDecision::Ignore,
            FailureAction::Warn => PolicyDecision::Warn,
            FailureAction::Block => PolicyDecision::Block,
        }
    }
}
