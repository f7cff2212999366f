#![cfg(feature = "zugferd")]

mod common;

use std::sync::Arc;

use common::*;
use erechnung::cii;
use erechnung::core::*;
use erechnung::pipeline::Generator;
use erechnung::reconcile::ItemCatalog;
use erechnung::settings::Settings;
use erechnung::zugferd::{self, FACTURX_FILENAME};

/// Create a minimal valid PDF in memory using lopdf.
fn minimal_pdf() -> Vec<u8> {
    use lopdf::{Document, Object, Stream, dictionary};

    let mut doc = Document::with_version("1.7");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => Object::Reference(font_id),
        },
    });
    let content = Stream::new(
        dictionary! {},
        b"BT /F1 12 Tf 100 700 Td (Rechnung) Tj ET".to_vec(),
    );
    let content_id = doc.add_object(content);
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        "Contents" => Object::Reference(content_id),
        "Resources" => Object::Reference(resources_id),
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![Object::Reference(page_id)],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut output = Vec::new();
    doc.save_to(&mut output).expect("save minimal PDF");
    output
}

fn generator() -> Generator {
    Generator::new(Arc::new(resolver()), Settings::default())
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w == needle.as_bytes())
}

// ---------------------------------------------------------------------------
// Embedding and extraction
// ---------------------------------------------------------------------------

#[test]
fn embed_then_extract_returns_same_xml() {
    let xml = generator()
        .generate(&erp_invoice(), Profile::En16931)
        .unwrap()
        .xml;

    let pdf = zugferd::embed_in_pdf(&minimal_pdf(), &xml, Profile::En16931).unwrap();
    assert!(pdf.starts_with(b"%PDF"));
    assert!(contains(&pdf, FACTURX_FILENAME));
    assert!(contains(&pdf, "<fx:ConformanceLevel>EN 16931</fx:ConformanceLevel>"));

    let extracted = zugferd::extract_from_pdf(&pdf).unwrap();
    assert_eq!(extracted, xml);
    assert_eq!(cii::detect_profile(&extracted).unwrap(), Profile::En16931);
}

#[test]
fn embedded_pdf_declares_associated_file() {
    let xml = generator()
        .generate(&erp_invoice(), Profile::Extended)
        .unwrap()
        .xml;
    let pdf = zugferd::embed_in_pdf(&minimal_pdf(), &xml, Profile::Extended).unwrap();

    let doc = lopdf::Document::load_mem(&pdf).unwrap();
    let catalog = doc.catalog().unwrap();
    assert!(catalog.get(b"AF").is_ok());
    assert!(catalog.get(b"Metadata").is_ok());
    assert!(contains(&pdf, "<fx:ConformanceLevel>EXTENDED</fx:ConformanceLevel>"));
}

#[test]
fn xrechnung_is_not_embedded() {
    let pdf = minimal_pdf();
    let hybrid = generator()
        .attach_xml_to_pdf(&erp_invoice(), Profile::XRechnung, &pdf)
        .unwrap();
    assert_eq!(hybrid, pdf);

    let err = zugferd::embed_in_pdf(&pdf, "<x/>", Profile::XRechnung).unwrap_err();
    assert!(matches!(
        err,
        EInvoiceError::ProfileConstraintViolation {
            profile: Profile::XRechnung,
            ..
        }
    ));
}

#[test]
fn converter_output_is_embedded() {
    let converted = minimal_pdf();
    let generator = generator().with_pdfa_converter(move |_: &[u8]| -> Result<Vec<u8>> {
        Ok(converted.clone())
    });

    let hybrid = generator
        .attach_xml_to_pdf(&erp_invoice(), Profile::Basic, b"%PDF-1.4 not really a pdf")
        .unwrap();
    let xml = zugferd::extract_from_pdf(&hybrid).unwrap();
    assert_eq!(cii::detect_profile(&xml).unwrap(), Profile::Basic);
    assert!(contains(&hybrid, "<fx:ConformanceLevel>BASIC</fx:ConformanceLevel>"));
}

#[test]
fn converter_failure_falls_back_to_original() {
    let generator = generator().with_pdfa_converter(|_: &[u8]| -> Result<Vec<u8>> {
        Err(EInvoiceError::Pdf("gs: command not found".into()))
    });

    let hybrid = generator
        .attach_xml_to_pdf(&erp_invoice(), Profile::En16931, &minimal_pdf())
        .unwrap();
    assert!(zugferd::extract_from_pdf(&hybrid).is_ok());
}

#[test]
fn plain_pdf_has_no_einvoice_data() {
    let pdf = minimal_pdf();
    assert!(matches!(
        zugferd::extract_from_pdf(&pdf),
        Err(EInvoiceError::NoEinvoiceData)
    ));

    let err = generator()
        .import(&pdf, &ItemCatalog::new(), None, None)
        .unwrap_err();
    assert!(matches!(err, EInvoiceError::NoEinvoiceData));
}

#[test]
fn broken_pdf_is_a_pdf_error() {
    assert!(matches!(
        zugferd::extract_from_pdf(b"%PDF-1.7 truncated"),
        Err(EInvoiceError::Pdf(_))
    ));
}

// ---------------------------------------------------------------------------
// Import of hybrid PDFs
// ---------------------------------------------------------------------------

#[test]
fn hybrid_pdf_imports_like_xml() {
    let generator = generator();
    let erp = erp_invoice();
    let hybrid = generator
        .attach_xml_to_pdf(&erp, Profile::En16931, &minimal_pdf())
        .unwrap();

    let outcome = generator
        .import(&hybrid, &ItemCatalog::new(), None, None)
        .unwrap();
    assert_eq!(outcome.profile, Profile::En16931);
    assert_eq!(outcome.invoice().number, erp.name);
    assert_eq!(outcome.invoice().lines.len(), 2);
    assert!(outcome.report.is_none());
}
