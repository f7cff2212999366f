use std::sync::Arc;

use erechnung::codes::{CodeList, CodeListResolver, EntityRef};
use erechnung::core::Profile;
use erechnung::erp::ErpInvoice;
use erechnung::pipeline::Generator;
use erechnung::reconcile::{CatalogItem, ItemCatalog, KnownSupplier, PurchaseOrder, PurchaseOrderLine};
use erechnung::settings::Settings;
use lopdf::{Document, Object, Stream, dictionary};
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

/// A one-page PDF standing in for the printed invoice.
fn printed_invoice() -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        b"BT /F1 12 Tf 72 770 Td (Rechnung ACC-SINV-2024-00042) Tj ET".to_vec(),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        "Contents" => Object::Reference(content_id),
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => Object::Reference(font_id) } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let resolver = CodeListResolver::new();
    resolver.insert(CodeList::Rec20, EntityRef::uom("Hour"), "HUR");
    resolver.insert(CodeList::Rec20, EntityRef::uom("Nos"), "H87");
    let generator = Generator::new(Arc::new(resolver), Settings::load(None)?);

    // The seller's side: a hybrid ZUGFeRD invoice.
    let erp: ErpInvoice = serde_json::from_str(include_str!("data/erp_invoice.json"))?;
    let hybrid = generator.attach_xml_to_pdf(&erp, Profile::En16931, &printed_invoice()?)?;
    println!("hybrid PDF: {} bytes", hybrid.len());

    // The buyer's side: known supplier, items and the open purchase order.
    let mut catalog = ItemCatalog::new();
    catalog
        .add_supplier(KnownSupplier {
            id: "SUP-0001".into(),
            name: "ACME GmbH".into(),
            tax_id: Some("DE123456789".into()),
        })
        .add_item(CatalogItem {
            code: "BERATUNG".into(),
            stock_uom: Some("Hour".into()),
            purchase_uom: None,
        })
        .add_supplier_part("SUP-0001", "CONS", "BERATUNG");
    let po = PurchaseOrder {
        id: "PO-2024-77".into(),
        lines: vec![PurchaseOrderLine {
            id: "PO-2024-77-1".into(),
            item_code: "BERATUNG".into(),
            uom: Some("Hour".into()),
            unbilled_amount: dec!(1200),
        }],
    };

    let outcome = generator.import(&hybrid, &catalog, Some(&po), None)?;
    let invoice = outcome.invoice();
    println!(
        "{} from {} ({}), {} {}",
        invoice.number,
        invoice.seller.name,
        outcome.profile,
        invoice.totals.grand_total,
        invoice.currency_code
    );
    println!("supplier: {:?}", outcome.reconciled.supplier);
    println!("linkage:  {:?}", outcome.reconciled.status);
    for line in &outcome.reconciled.lines {
        println!(
            "  item={:?} uom={:?} order_line={:?}",
            line.item_code, line.uom, line.order_line
        );
    }
    Ok(())
}
