//! Generation and import orchestration.
//!
//! Export runs `before_generation` hooks, the projection, sign
//! normalization, tax aggregation and `after_generation` hooks, then writes
//! the CII XML. Import sniffs the input, extracts embedded XML from PDFs,
//! parses, validates and reconciles the result.
//!
//! ```no_run
//! use std::sync::Arc;
//! use erechnung::codes::CodeListResolver;
//! use erechnung::core::Profile;
//! use erechnung::erp::ErpInvoice;
//! use erechnung::pipeline::Generator;
//! use erechnung::settings::Settings;
//!
//! # fn load_invoice() -> ErpInvoice { unimplemented!() }
//! let generator = Generator::new(Arc::new(CodeListResolver::new()), Settings::load(None)?);
//! let generated = generator.generate(&load_invoice(), Profile::XRechnung)?;
//! std::fs::write("invoice.xml", &generated.xml)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::cii;
use crate::codes::CodeListResolver;
use crate::core::*;
use crate::erp::{self, ErpInvoice};
use crate::normalize::normalize;
use crate::reconcile::{ItemCatalog, PurchaseOrder, ReconcileContext, ReconciledImport, reconcile};
use crate::settings::{PolicyDecision, Settings, Trigger};
use crate::tax::{self, TaxContext};
use crate::validate::{ValidationReport, Validator};

#[cfg(feature = "zugferd")]
use crate::zugferd::{self, PdfAConverter};

/// Extension points around generation.
///
/// Hooks run synchronously in registration order, once per generation pass.
/// Validation generates too, so hooks must tolerate running repeatedly for
/// the same invoice. Failures should be reported as [`EInvoiceError::Hook`].
pub trait GenerationHook: Send + Sync {
    /// Adjust the ERP invoice before anything is projected.
    fn before_generation(&self, _invoice: &mut ErpInvoice) -> Result<()> {
        Ok(())
    }

    /// Adjust the finished e-invoice model before it is written as XML.
    fn after_generation(&self, _source: &ErpInvoice, _einvoice: &mut Invoice) -> Result<()> {
        Ok(())
    }
}

/// Output of one generation pass.
#[derive(Debug, Clone)]
pub struct Generated {
    pub profile: Profile,
    pub invoice: Invoice,
    pub xml: String,
    /// Data the e-invoice could not carry.
    pub notices: Vec<Violation>,
}

/// Validation result together with the configured policy decision.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub violations: Vec<Violation>,
    pub decision: PolicyDecision,
}

impl ValidationOutcome {
    pub fn is_correct(&self) -> bool {
        !self.violations.iter().any(Violation::is_error)
    }
}

/// Detected kind of an incoming file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Pdf,
    Xml,
}

/// Result of importing a received e-invoice.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub profile: Profile,
    pub xml: String,
    pub reconciled: ReconciledImport,
    /// `None` when no rule engine is configured or it failed.
    pub report: Option<ValidationReport>,
}

impl ImportOutcome {
    pub fn invoice(&self) -> &Invoice {
        &self.reconciled.invoice
    }

    /// Validated without errors. Unvalidated imports are not correct.
    pub fn is_correct(&self) -> bool {
        self.report.as_ref().is_some_and(ValidationReport::is_valid)
    }
}

/// Converts ERP invoices to e-invoices and back.
pub struct Generator {
    resolver: Arc<CodeListResolver>,
    settings: Settings,
    hooks: Vec<Arc<dyn GenerationHook>>,
    validator: Option<Validator>,
    #[cfg(feature = "zugferd")]
    pdfa: Option<Arc<dyn PdfAConverter>>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("settings", &self.settings)
            .field("hooks", &self.hooks.len())
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl Generator {
    pub fn new(resolver: Arc<CodeListResolver>, settings: Settings) -> Self {
        Self {
            resolver,
            settings,
            hooks: Vec::new(),
            validator: None,
            #[cfg(feature = "zugferd")]
            pdfa: None,
        }
    }

    pub fn with_hook(mut self, hook: impl GenerationHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    #[cfg(feature = "zugferd")]
    pub fn with_pdfa_converter(mut self, converter: impl PdfAConverter + 'static) -> Self {
        self.pdfa = Some(Arc::new(converter));
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> &CodeListResolver {
        &self.resolver
    }

    /// Run one generation pass and write the XML.
    ///
    /// Any error aborts the pass; no partial document is returned.
    #[instrument(skip_all, fields(invoice = %erp_invoice.name, profile = %profile))]
    pub fn generate(&self, erp_invoice: &ErpInvoice, profile: Profile) -> Result<Generated> {
        let mut source = erp_invoice.clone();
        for hook in &self.hooks {
            hook.before_generation(&mut source)?;
        }

        let erp::Projection {
            mut invoice,
            notices,
        } = erp::project(&source, profile, &self.resolver)?;

        normalize(&mut invoice.lines);

        let ctx = TaxContext::for_invoice(&source, profile, &self.resolver, &self.settings);
        let taxes = tax::aggregate(&source.taxes, &invoice.lines, &ctx)?;
        for row in taxes.summary.iter().filter(|r| r.warning.is_some()) {
            warn!(
                category = ?row.category,
                rate = %row.rate,
                basis = %row.basis_amount,
                source = ?row.basis_source,
                "tax basis amount is not exact"
            );
        }
        invoice.tax_summary = taxes.summary;
        invoice.service_charges = taxes.service_charges;

        for hook in &self.hooks {
            hook.after_generation(&source, &mut invoice)?;
        }

        let xml = cii::to_cii_xml(&invoice, profile)?;
        info!(
            lines = invoice.lines.len(),
            notices = notices.len(),
            bytes = xml.len(),
            "e-invoice generated"
        );

        Ok(Generated {
            profile,
            invoice,
            xml,
            notices,
        })
    }

    /// Dry-run generation plus rule validation for `trigger`.
    ///
    /// Returns `Ok(None)` when the trigger does not validate. A failed
    /// generation is reported as an error-level finding, not as `Err`;
    /// rule engine failures are returned as `Err`.
    #[instrument(skip_all, fields(invoice = %erp_invoice.name, profile = %profile, trigger = ?trigger))]
    pub fn validate_einvoice(
        &self,
        erp_invoice: &ErpInvoice,
        profile: Profile,
        trigger: Trigger,
        deadline: Option<Instant>,
    ) -> Result<Option<ValidationOutcome>> {
        if !self.settings.should_validate(trigger) {
            return Ok(None);
        }

        let violations = match self.generate(erp_invoice, profile) {
            Ok(generated) => self.validator()?.validate(&generated.xml, profile, deadline)?.violations,
            Err(e) => {
                warn!(error = %e, "e-invoice could not be generated");
                vec![Violation::error(format!("Cannot create e-invoice: {e}")).at("generation")]
            }
        };

        let decision = self.settings.decide(trigger, &violations);
        info!(findings = violations.len(), ?decision, "e-invoice validated");
        Ok(Some(ValidationOutcome {
            violations,
            decision,
        }))
    }

    /// Generate the XML and attach it to `pdf`.
    ///
    /// The PDF is converted to PDF/A-3 first when a converter is configured.
    /// XRechnung invoices are not embedded; the PDF is returned without XML.
    #[cfg(feature = "zugferd")]
    #[instrument(skip_all, fields(invoice = %erp_invoice.name, profile = %profile))]
    pub fn attach_xml_to_pdf(
        &self,
        erp_invoice: &ErpInvoice,
        profile: Profile,
        pdf: &[u8],
    ) -> Result<Vec<u8>> {
        let generated = self.generate(erp_invoice, profile)?;
        zugferd::attach_xml_to_pdf(pdf, &generated.xml, profile, self.pdfa.as_deref())
    }

    /// Read a received XML or hybrid PDF invoice.
    ///
    /// Without an explicit `purchase_order`, the order named in the
    /// invoice's buyer order reference is taken from `catalog`. Rule
    /// validation failures are logged and leave the report empty; they do
    /// not abort the import.
    #[instrument(skip_all, fields(bytes = input.len()))]
    pub fn import(
        &self,
        input: &[u8],
        catalog: &ItemCatalog,
        purchase_order: Option<&PurchaseOrder>,
        deadline: Option<Instant>,
    ) -> Result<ImportOutcome> {
        let xml = match sniff(input)? {
            InputFormat::Xml => decode_xml(input)?,
            InputFormat::Pdf => extract_pdf(input)?,
        };

        let (profile, invoice) = cii::from_cii_xml(&xml)?;

        let report = match &self.validator {
            Some(v) => match v.validate(&xml, profile, deadline) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "could not validate received e-invoice");
                    None
                }
            },
            None => None,
        };

        let ctx = ReconcileContext {
            catalog,
            resolver: &self.resolver,
            purchase_order,
        };
        let reconciled = reconcile(invoice, &ctx);

        info!(
            %profile,
            invoice = %reconciled.invoice.number,
            status = ?reconciled.status,
            "e-invoice imported"
        );
        Ok(ImportOutcome {
            profile,
            xml,
            reconciled,
            report,
        })
    }

    fn validator(&self) -> Result<&Validator> {
        self.validator
            .as_ref()
            .ok_or_else(|| EInvoiceError::RuleEngine("no rule engine configured".into()))
    }
}

/// Tell PDF from XML by content, not by file name.
pub fn sniff(input: &[u8]) -> Result<InputFormat> {
    if input.starts_with(b"%PDF") {
        return Ok(InputFormat::Pdf);
    }
    let body = input.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(input);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'<') => Ok(InputFormat::Xml),
        _ => Err(EInvoiceError::UnsupportedFormat(
            "input is neither PDF nor XML".into(),
        )),
    }
}

fn decode_xml(input: &[u8]) -> Result<String> {
    let body = input.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(input);
    String::from_utf8(body.to_vec()).map_err(|e| EInvoiceError::Xml(format!("input is not UTF-8: {e}")))
}

#[cfg(feature = "zugferd")]
fn extract_pdf(input: &[u8]) -> Result<String> {
    zugferd::extract_from_pdf(input)
}

#[cfg(not(feature = "zugferd"))]
fn extract_pdf(_input: &[u8]) -> Result<String> {
    Err(EInvoiceError::UnsupportedFormat(
        "PDF input needs the `zugferd` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erp::fixtures::*;
    use std::sync::Mutex;

    fn generator() -> Generator {
        Generator::new(Arc::new(resolver()), Settings::default())
    }

    struct Recorder(Arc<Mutex<Vec<&'static str>>>);

    impl GenerationHook for Recorder {
        fn before_generation(&self, invoice: &mut ErpInvoice) -> Result<()> {
            self.0.lock().unwrap().push("before");
            invoice.buyer_reference = Some("04011000-1234512345-06".into());
            Ok(())
        }

        fn after_generation(&self, _: &ErpInvoice, einvoice: &mut Invoice) -> Result<()> {
            self.0.lock().unwrap().push("after");
            einvoice.notes.push(Note {
                subject_code: None,
                content: "Added by hook".into(),
            });
            Ok(())
        }
    }

    #[test]
    fn sniffing() {
        assert_eq!(sniff(b"%PDF-1.7\n...").unwrap(), InputFormat::Pdf);
        assert_eq!(sniff(b"\xEF\xBB\xBF  \n<?xml version=\"1.0\"?>").unwrap(), InputFormat::Xml);
        assert!(matches!(
            sniff(b"PK\x03\x04"),
            Err(EInvoiceError::UnsupportedFormat(_))
        ));
        assert!(matches!(sniff(b""), Err(EInvoiceError::UnsupportedFormat(_))));
    }

    #[test]
    fn hooks_run_in_order_and_mutate() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let generator = generator().with_hook(Recorder(Arc::clone(&calls)));

        let mut erp = erp_invoice();
        erp.buyer_reference = None;
        let generated = generator.generate(&erp, Profile::En16931).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["before", "after"]);
        assert_eq!(
            generated.invoice.buyer_reference.as_deref(),
            Some("04011000-1234512345-06")
        );
        assert!(generated.xml.contains("Added by hook"));
    }

    #[test]
    fn failing_hook_aborts_generation() {
        struct Reject;
        impl GenerationHook for Reject {
            fn before_generation(&self, _: &mut ErpInvoice) -> Result<()> {
                Err(EInvoiceError::Hook("invoice is locked".into()))
            }
        }

        let err = generator()
            .with_hook(Reject)
            .generate(&erp_invoice(), Profile::Basic)
            .unwrap_err();
        assert!(matches!(err, EInvoiceError::Hook(_)));
    }

    #[test]
    fn generation_failure_is_a_finding() {
        let generator = generator().with_validator(Validator::from_fn(|_, _, _| {
            Ok("<svrl:schematron-output xmlns:svrl=\"http://purl.oclc.org/dsdl/svrl\"/>".into())
        }));
        let mut erp = erp_invoice();
        erp.items.clear();

        let outcome = generator
            .validate_einvoice(&erp, Profile::En16931, Trigger::Submit, None)
            .unwrap()
            .unwrap();
        assert!(!outcome.is_correct());
        assert!(outcome.violations[0].message.starts_with("Cannot create e-invoice"));
        // default action is none
        assert_eq!(outcome.decision, PolicyDecision::Ignore);
    }

    #[test]
    fn disabled_trigger_skips_validation() {
        let settings = Settings {
            validate_on_save: false,
            ..Settings::default()
        };
        let generator = Generator::new(Arc::new(resolver()), settings);
        let outcome = generator
            .validate_einvoice(&erp_invoice(), Profile::En16931, Trigger::Save, None)
            .unwrap();
        assert!(outcome.is_none());
    }
}
