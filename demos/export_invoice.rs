use std::sync::Arc;

use erechnung::codes::{CodeList, CodeListResolver, EntityRef};
use erechnung::core::Profile;
use erechnung::erp::ErpInvoice;
use erechnung::pipeline::Generator;
use erechnung::settings::Settings;
use tracing_subscriber::EnvFilter;

fn resolver() -> CodeListResolver {
    let r = CodeListResolver::new();
    r.insert(CodeList::Rec20, EntityRef::uom("Hour"), "HUR");
    r.insert(CodeList::Rec20, EntityRef::uom("Nos"), "H87");
    r.insert(CodeList::Untdid4461, EntityRef::mode_of_payment("Überweisung"), "58");
    r.insert(CodeList::Eas, EntityRef::address_scheme("Leitweg-ID"), "0204");
    r
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let erp: ErpInvoice = serde_json::from_str(include_str!("data/erp_invoice.json"))?;
    let generator = Generator::new(Arc::new(resolver()), Settings::load(None)?);

    for profile in Profile::ALL {
        match generator.generate(&erp, profile) {
            Ok(generated) => {
                println!("{profile}: {} bytes", generated.xml.len());
                for notice in &generated.notices {
                    println!("  dropped: {notice}");
                }
            }
            Err(e) => println!("{profile}: {e}"),
        }
    }

    // Without a Leitweg-ID the XRechnung export is refused.
    let mut anonymous = erp.clone();
    anonymous.buyer_reference = None;
    if let Err(e) = generator.generate(&anonymous, Profile::XRechnung) {
        println!("\nwithout buyer reference: {e}");
    }

    let generated = generator.generate(&erp, Profile::XRechnung)?;
    println!("\n{}", generated.xml);
    Ok(())
}
