use lopdf::{Dictionary, Document, Object};
use tracing::debug;

use crate::core::*;

/// Name trees nest through `Kids`; real files stay shallow.
const MAX_NAME_TREE_DEPTH: usize = 8;

/// Extract the embedded e-invoice XML from a PDF.
///
/// Looks for `factur-x.xml`, `zugferd-invoice.xml` or `xrechnung.xml`
/// (case-insensitive) in the EmbeddedFiles name tree, then in the catalog's
/// `AF` array. A readable PDF without such a file yields
/// [`EInvoiceError::NoEinvoiceData`].
pub fn extract_from_pdf(pdf_bytes: &[u8]) -> Result<String> {
    let doc = Document::load_mem(pdf_bytes)
        .map_err(|e| EInvoiceError::Pdf(format!("failed to load PDF: {e}")))?;

    let bytes = match find_via_names(&doc) {
        Some(bytes) => bytes,
        None => {
            debug!("no invoice in EmbeddedFiles name tree, trying AF array");
            find_via_af(&doc).ok_or(EInvoiceError::NoEinvoiceData)?
        }
    };

    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| EInvoiceError::Pdf(format!("embedded XML is not UTF-8: {e}")))
}

fn find_via_names(doc: &Document) -> Option<Vec<u8>> {
    let catalog = doc.catalog().ok()?;
    let names = resolve_dict(doc, catalog.get(b"Names").ok()?)?;
    let tree = resolve_dict(doc, names.get(b"EmbeddedFiles").ok()?)?;
    search_name_tree(doc, tree, 0)
}

fn search_name_tree(doc: &Document, node: &Dictionary, depth: usize) -> Option<Vec<u8>> {
    if depth > MAX_NAME_TREE_DEPTH {
        return None;
    }

    if let Some(Object::Array(entries)) = node.get(b"Names").ok() {
        // [name1, filespec1, name2, filespec2, ...]
        for pair in entries.chunks(2) {
            let [name, spec] = pair else { continue };
            let matches = obj_to_string(name).is_some_and(|n| is_invoice_filename(&n));
            if matches {
                if let Some(bytes) = resolve_dict(doc, spec).and_then(|fs| filespec_content(doc, fs)) {
                    return Some(bytes);
                }
            }
        }
    }

    if let Some(Object::Array(kids)) = node.get(b"Kids").ok() {
        for kid in kids {
            let found = resolve_dict(doc, kid).and_then(|k| search_name_tree(doc, k, depth + 1));
            if found.is_some() {
                return found;
            }
        }
    }

    None
}

fn find_via_af(doc: &Document) -> Option<Vec<u8>> {
    let catalog = doc.catalog().ok()?;
    let af = resolve_obj(doc, catalog.get(b"AF").ok()?)?.as_array().ok()?;

    af.iter()
        .filter_map(|obj| resolve_dict(doc, obj))
        .filter(|fs| {
            fs.get(b"UF")
                .or_else(|_| fs.get(b"F"))
                .ok()
                .and_then(obj_to_string)
                .is_some_and(|n| is_invoice_filename(&n))
        })
        .find_map(|fs| filespec_content(doc, fs))
}

fn filespec_content(doc: &Document, filespec: &Dictionary) -> Option<Vec<u8>> {
    let ef = resolve_dict(doc, filespec.get(b"EF").ok()?)?;
    let file = ef.get(b"F").or_else(|_| ef.get(b"UF")).ok()?;
    let stream = resolve_obj(doc, file)?.as_stream().ok()?;

    // decompressed_content() fails for streams without a Filter
    Some(
        stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone()),
    )
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

fn resolve_obj<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn obj_to_string(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => String::from_utf8(bytes.clone()).ok(),
        _ => None,
    }
}

pub(crate) fn is_invoice_filename(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".xml")
        && ["factur-x", "zugferd", "xrechnung"]
            .iter()
            .any(|marker| lower.contains(marker))
}
