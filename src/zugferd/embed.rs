use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use tracing::{debug, warn};

use super::FACTURX_FILENAME;
use super::xmp;
use crate::core::*;

/// Converts an arbitrary PDF into PDF/A-3.
///
/// The conversion itself (typically Ghostscript) lives outside this crate.
pub trait PdfAConverter: Send + Sync {
    fn convert(&self, pdf: &[u8]) -> Result<Vec<u8>>;
}

impl<F> PdfAConverter for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync,
{
    fn convert(&self, pdf: &[u8]) -> Result<Vec<u8>> {
        self(pdf)
    }
}

/// Produce the hybrid PDF for an invoice.
///
/// The PDF is first passed through `converter` when one is given; a failed
/// conversion is logged and the original bytes are used. Profiles that do
/// not allow embedding (XRechnung) get the PDF back without XML.
pub fn attach_xml_to_pdf(
    pdf_bytes: &[u8],
    xml: &str,
    profile: Profile,
    converter: Option<&dyn PdfAConverter>,
) -> Result<Vec<u8>> {
    let pdf = match converter.map(|c| c.convert(pdf_bytes)) {
        Some(Ok(converted)) => converted,
        Some(Err(e)) => {
            warn!(error = %e, "PDF/A-3 conversion failed, using original PDF");
            pdf_bytes.to_vec()
        }
        None => pdf_bytes.to_vec(),
    };

    if !profile.capabilities().pdf_embedding {
        debug!(%profile, "profile is not embedded into PDF");
        return Ok(pdf);
    }

    embed_in_pdf(&pdf, xml, profile)
}

/// Embed CII XML into a PDF as `factur-x.xml` with PDF/A-3 metadata.
///
/// Fails with [`EInvoiceError::ProfileConstraintViolation`] for profiles that
/// must not be embedded.
pub fn embed_in_pdf(pdf_bytes: &[u8], xml: &str, profile: Profile) -> Result<Vec<u8>> {
    if !profile.capabilities().pdf_embedding {
        return Err(EInvoiceError::profile(
            profile,
            "documents of this profile are not embedded into PDF",
        ));
    }

    let mut doc = Document::load_mem(pdf_bytes)
        .map_err(|e| EInvoiceError::Pdf(format!("failed to load PDF: {e}")))?;

    embed_xml_into_document(&mut doc, xml.as_bytes(), profile)?;

    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| EInvoiceError::Pdf(format!("failed to save PDF: {e}")))?;

    Ok(output)
}

fn embed_xml_into_document(doc: &mut Document, xml_bytes: &[u8], profile: Profile) -> Result<()> {
    let ef_stream = Stream::new(
        dictionary! {
            "Type" => "EmbeddedFile",
            "Subtype" => Object::Name(b"text#2Fxml".to_vec()),
            "Params" => dictionary! {
                "Size" => Object::Integer(xml_bytes.len() as i64),
            },
        },
        xml_bytes.to_vec(),
    );
    let ef_stream_id = doc.add_object(ef_stream);

    let filespec_id = doc.add_object(dictionary! {
        "Type" => "Filespec",
        "F" => Object::string_literal(FACTURX_FILENAME),
        "UF" => Object::string_literal(FACTURX_FILENAME),
        "Desc" => Object::string_literal("Factur-X XML invoice"),
        "AFRelationship" => Object::Name(b"Alternative".to_vec()),
        "EF" => dictionary! {
            "F" => Object::Reference(ef_stream_id),
            "UF" => Object::Reference(ef_stream_id),
        },
    });

    let ef_name_tree_id = doc.add_object(dictionary! {
        "Names" => Object::Array(vec![
            Object::string_literal(FACTURX_FILENAME),
            Object::Reference(filespec_id),
        ]),
    });

    // Other name trees (Dests, JavaScript, ...) survive.
    let mut names = existing_names(doc).unwrap_or_default();
    names.set("EmbeddedFiles", Object::Reference(ef_name_tree_id));
    let names_id = doc.add_object(names);

    let metadata_stream = Stream::new(
        dictionary! {
            "Type" => "Metadata",
            "Subtype" => "XML",
        },
        xmp::build_xmp(profile).into_bytes(),
    )
    .with_compression(false); // PDF/A: XMP stays uncompressed
    let metadata_id = doc.add_object(metadata_stream);

    let catalog = doc
        .catalog_mut()
        .map_err(|e| EInvoiceError::Pdf(format!("failed to get catalog: {e}")))?;

    catalog.set("AF", Object::Array(vec![Object::Reference(filespec_id)]));
    catalog.set("Names", Object::Reference(names_id));
    catalog.set("Metadata", Object::Reference(metadata_id));
    catalog.set(
        "MarkInfo",
        dictionary! { "Marked" => Object::Boolean(true) },
    );

    Ok(())
}

fn existing_names(doc: &Document) -> Option<Dictionary> {
    let names = doc.catalog().ok()?.get(b"Names").ok()?;
    match names {
        Object::Reference(id) => doc.get_dictionary(*id).ok().cloned(),
        Object::Dictionary(d) => Some(d.clone()),
        _ => None,
    }
}
