use std::sync::Arc;

use erechnung::codes::{CodeList, CodeListResolver, EntityRef};
use erechnung::core::Profile;
use erechnung::erp::ErpInvoice;
use erechnung::pipeline::Generator;
use erechnung::settings::{FailureAction, Settings, Trigger};
use erechnung::validate::Validator;
use tracing_subscriber::EnvFilter;

/// Stands in for an XSLT processor running the KoSIT stylesheets.
fn fake_engine(xml: &str, ruleset: &str) -> String {
    let mut svrl =
        String::from(r#"<svrl:schematron-output xmlns:svrl="http://purl.oclc.org/dsdl/svrl">"#);
    if !xml.contains("<ram:DueDateDateTime>") {
        svrl.push_str(
            r#"<svrl:failed-assert id="BR-CO-25" flag="fatal" location="/rsm:CrossIndustryInvoice">
                 <svrl:text>Payment due date or payment terms must be provided.</svrl:text>
               </svrl:failed-assert>"#,
        );
    }
    svrl.push_str(&format!(
        r#"<svrl:successful-report id="INFO-1" role="information" location="/rsm:CrossIndustryInvoice">
             <svrl:text>{ruleset} applied.</svrl:text>
           </svrl:successful-report>"#
    ));
    svrl.push_str("</svrl:schematron-output>");
    svrl
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let resolver = CodeListResolver::new();
    resolver.insert(CodeList::Rec20, EntityRef::uom("Hour"), "HUR");
    resolver.insert(CodeList::Rec20, EntityRef::uom("Nos"), "H87");

    let settings = Settings {
        error_action_on_submit: FailureAction::Block,
        error_action_on_save: FailureAction::Warn,
        ..Settings::load(None)?
    };
    let generator = Generator::new(Arc::new(resolver), settings).with_validator(
        Validator::from_fn(|xml, ruleset, _deadline| Ok(fake_engine(xml, ruleset))),
    );

    let erp: ErpInvoice = serde_json::from_str(include_str!("data/erp_invoice.json"))?;
    let mut unpaid = erp.clone();
    unpaid.payment_schedule.clear();
    unpaid.due_date = None;
    let mut anonymous = erp.clone();
    anonymous.buyer_reference = None;

    for (label, erp, profile, trigger) in [
        ("complete", &erp, Profile::XRechnung, Trigger::Submit),
        ("no due date", &unpaid, Profile::En16931, Trigger::Save),
        ("no due date", &unpaid, Profile::En16931, Trigger::Submit),
        ("no Leitweg-ID", &anonymous, Profile::XRechnung, Trigger::Submit),
    ] {
        let Some(outcome) = generator.validate_einvoice(erp, profile, trigger, None)? else {
            println!("{label}, {profile} on {trigger:?}: not validated");
            continue;
        };
        println!(
            "{label}, {profile} on {trigger:?}: correct={} decision={:?}",
            outcome.is_correct(),
            outcome.decision
        );
        for v in &outcome.violations {
            println!("  {:?} {v}", v.severity);
        }
    }
    Ok(())
}
