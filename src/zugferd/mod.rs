//! ZUGFeRD / Factur-X hybrid PDFs.
//!
//! Embeds generated CII XML into PDF/A-3 files as `factur-x.xml` and pulls
//! the XML back out of received PDFs.
//!
//! | Profile | Embedded | XMP conformance level |
//! |---------|----------|-----------------------|
//! | BASIC | yes | `BASIC` |
//! | EN16931 | yes | `EN 16931` |
//! | EXTENDED | yes | `EXTENDED` |
//! | XRECHNUNG | no, PDF is returned unchanged | n/a |

mod embed;
mod extract;
mod xmp;

pub use embed::{PdfAConverter, attach_xml_to_pdf, embed_in_pdf};
pub use extract::extract_from_pdf;

/// The embedded XML filename per Factur-X 1.0+.
pub const FACTURX_FILENAME: &str = "factur-x.xml";
