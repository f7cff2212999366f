//! Schematron validation of generated CII documents.
//!
//! The transform engine is not part of this crate. A [`RuleEngine`] takes the
//! XML and a stylesheet file name (see [`Profile::ruleset_files`]) and returns
//! the SVRL report; [`Validator`] runs every ruleset of the profile and turns
//! the reports into [`Violation`]s.
//!
//! ```
//! use erechnung::core::*;
//! use erechnung::validate::Validator;
//!
//! let validator = Validator::from_fn(|_xml, _ruleset, _deadline| {
//!     Ok(r#"<svrl:schematron-output xmlns:svrl="http://purl.oclc.org/dsdl/svrl">
//!         <svrl:failed-assert id="BR-DE-15" flag="fatal" location="/rsm:CrossIndustryInvoice">
//!           <svrl:text>Buyer reference missing</svrl:text>
//!         </svrl:failed-assert>
//!     </svrl:schematron-output>"#.to_string())
//! });
//!
//! let report = validator.validate("<xml/>", Profile::En16931, None).unwrap();
//! assert!(!report.is_valid());
//! assert_eq!(report.errors().next().unwrap().rule_id.as_deref(), Some("BR-DE-15"));
//! ```

use std::sync::Arc;
use std::time::Instant;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::*;

/// Executes a schematron stylesheet against a document.
///
/// Implementations may block. They should give up once `deadline` has
/// passed and report failures as [`EInvoiceError::RuleEngine`].
pub trait RuleEngine: Send + Sync {
    /// Run `ruleset` over `xml` and return the SVRL output.
    fn evaluate(&self, xml: &str, ruleset: &str, deadline: Option<Instant>) -> Result<String>;
}

impl<F> RuleEngine for F
where
    F: Fn(&str, &str, Option<Instant>) -> Result<String> + Send + Sync,
{
    fn evaluate(&self, xml: &str, ruleset: &str, deadline: Option<Instant>) -> Result<String> {
        self(xml, ruleset, deadline)
    }
}

/// Outcome of validating one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub profile: Profile,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// No error-level violations. Warnings do not count.
    pub fn is_valid(&self) -> bool {
        !self.violations.iter().any(Violation::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Warning)
    }
}

/// Selects the rulesets for a profile and normalizes the engine's output.
#[derive(Clone)]
pub struct Validator {
    engine: Arc<dyn RuleEngine>,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator").finish_non_exhaustive()
    }
}

impl Validator {
    pub fn new(engine: impl RuleEngine + 'static) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn with_engine(engine: Arc<dyn RuleEngine>) -> Self {
        Self { engine }
    }

    /// Wrap a closure as the engine.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, &str, Option<Instant>) -> Result<String> + Send + Sync + 'static,
    {
        Self::new(f)
    }

    /// Validate `xml` against every ruleset of `profile`, in order.
    ///
    /// Engine failures are returned as errors; findings never are. The
    /// deadline is checked before each ruleset and passed to the engine.
    pub fn validate(
        &self,
        xml: &str,
        profile: Profile,
        deadline: Option<Instant>,
    ) -> Result<ValidationReport> {
        let mut violations: Vec<Violation> = Vec::new();

        for ruleset in profile.ruleset_files() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(EInvoiceError::RuleEngine(format!(
                    "deadline passed before running {ruleset}"
                )));
            }
            let svrl = self.engine.evaluate(xml, ruleset, deadline)?;
            let found = parse_svrl(&svrl)?;
            debug!(ruleset, findings = found.len(), "ruleset evaluated");
            // XRechnung and EN 16931 rulesets overlap.
            for v in found {
                if !violations.contains(&v) {
                    violations.push(v);
                }
            }
        }

        let report = ValidationReport {
            profile,
            violations,
        };
        info!(
            %profile,
            errors = report.errors().count(),
            warnings = report.warnings().count(),
            "validation finished"
        );
        Ok(report)
    }
}

/// Turn an SVRL report into violations.
///
/// `failed-assert` becomes an error and `successful-report` a warning,
/// unless the rule's `flag` (or `role`) says otherwise.
pub fn parse_svrl(svrl: &str) -> Result<Vec<Violation>> {
    let mut reader = Reader::from_str(svrl);
    reader.config_mut().trim_text(true);

    let mut violations = Vec::new();
    let mut current: Option<Violation> = None;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"failed-assert" => current = Some(finding(&e, Severity::Error)?),
                b"successful-report" => current = Some(finding(&e, Severity::Warning)?),
                b"text" if current.is_some() => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"failed-assert" => violations.push(finding(&e, Severity::Error)?),
                b"successful-report" => violations.push(finding(&e, Severity::Warning)?),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let text = e.unescape().map_err(svrl_error)?;
                if let Some(v) = current.as_mut() {
                    if !v.message.is_empty() {
                        v.message.push(' ');
                    }
                    v.message
                        .push_str(&text.split_whitespace().collect::<Vec<_>>().join(" "));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"text" => in_text = false,
                b"failed-assert" | b"successful-report" => {
                    if let Some(v) = current.take() {
                        violations.push(v);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(svrl_error(e)),
            _ => {}
        }
    }

    Ok(violations)
}

fn finding(e: &BytesStart<'_>, default: Severity) -> Result<Violation> {
    let mut v = Violation {
        rule_id: None,
        severity: default,
        message: String::new(),
        location: None,
    };
    for attr in e.attributes() {
        let attr = attr.map_err(svrl_error)?;
        let value = attr.unescape_value().map_err(svrl_error)?.into_owned();
        match attr.key.local_name().as_ref() {
            b"id" => v.rule_id = Some(value),
            b"location" => v.location = Some(value),
            b"flag" | b"role" => {
                if let Some(severity) = severity_of(&value) {
                    v.severity = severity;
                }
            }
            _ => {}
        }
    }
    Ok(v)
}

fn severity_of(flag: &str) -> Option<Severity> {
    match flag.trim().to_ascii_lowercase().as_str() {
        "fatal" | "error" => Some(Severity::Error),
        "warning" | "warn" => Some(Severity::Warning),
        "information" | "info" => Some(Severity::Info),
        _ => None,
    }
}

fn svrl_error(e: impl std::fmt::Display) -> EInvoiceError {
    EInvoiceError::RuleEngine(format!("unreadable SVRL report: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    const SVRL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<svrl:schematron-output xmlns:svrl="http://purl.oclc.org/dsdl/svrl">
  <svrl:fired-rule context="/rsm:CrossIndustryInvoice"/>
  <svrl:failed-assert test="ram:BuyerReference" id="BR-DE-15" flag="fatal"
      location="/*:CrossIndustryInvoice[1]">
    <svrl:text>[BR-DE-15] Das Element "Buyer reference"
        (BT-10) muss übermittelt werden.</svrl:text>
  </svrl:failed-assert>
  <svrl:successful-report test="true()" id="BR-DE-TMP-32" location="/*:CrossIndustryInvoice[1]">
    <svrl:text>Skonto text should be well formed.</svrl:text>
  </svrl:successful-report>
  <svrl:failed-assert test="x" id="PEPPOL-EN16931-R002" flag="warning" location="/x">
    <svrl:text>Only one note allowed.</svrl:text>
  </svrl:failed-assert>
</svrl:schematron-output>"#;

    #[test]
    fn svrl_findings_are_normalized() {
        let found = parse_svrl(SVRL).unwrap();
        assert_eq!(found.len(), 3);

        assert_eq!(found[0].severity, Severity::Error);
        assert_eq!(found[0].rule_id.as_deref(), Some("BR-DE-15"));
        assert_eq!(
            found[0].message,
            "[BR-DE-15] Das Element \"Buyer reference\" (BT-10) muss übermittelt werden."
        );
        assert_eq!(found[0].location.as_deref(), Some("/*:CrossIndustryInvoice[1]"));

        assert_eq!(found[1].severity, Severity::Warning);
        assert_eq!(found[2].severity, Severity::Warning);
    }

    #[test]
    fn empty_report_is_valid() {
        let report = ValidationReport {
            profile: Profile::Basic,
            violations: parse_svrl("<svrl:schematron-output xmlns:svrl=\"x\"/>").unwrap(),
        };
        assert!(report.is_valid());
    }

    #[test]
    fn xrechnung_runs_both_rulesets() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let validator = Validator::from_fn(move |_, ruleset, _| {
            log.lock().unwrap().push(ruleset.to_string());
            Ok(SVRL.to_string())
        });

        let report = validator.validate("<x/>", Profile::XRechnung, None).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "XRechnung-CII-validation.xsl",
                "EN16931-CII-validation-preprocessed.xsl"
            ]
        );
        // identical findings from both rulesets are reported once
        assert_eq!(report.violations.len(), 3);
        assert!(!report.is_valid());
    }

    #[test]
    fn engine_failure_is_an_error() {
        let validator = Validator::from_fn(|_, _, _| {
            Err(EInvoiceError::RuleEngine("stylesheet not found".into()))
        });
        let err = validator.validate("<x/>", Profile::Basic, None).unwrap_err();
        assert!(matches!(err, EInvoiceError::RuleEngine(_)));
    }

    #[test]
    fn expired_deadline_stops_before_evaluation() {
        let validator = Validator::from_fn(|_, _, _| {
            panic!("engine must not run")
        });
        let past = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        let err = validator
            .validate("<x/>", Profile::En16931, Some(past))
            .unwrap_err();
        assert!(matches!(err, EInvoiceError::RuleEngine(_)));
    }
}
