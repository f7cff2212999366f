//! UN/CEFACT Cross Industry Invoice (CII D16B) serialization and parsing.
//!
//! One document shape serves all profiles;
//! [`Profile::capabilities`](crate::core::Profile::capabilities) decides
//! which optional elements are written and which ones are mandatory.
//!
//! ```no_run
//! use erechnung::core::*;
//! use erechnung::cii;
//!
//! let invoice: Invoice = todo!(); // projected from the ERP or built by hand
//! let xml = cii::to_cii_xml(&invoice, Profile::XRechnung).unwrap();
//! let (profile, parsed) = cii::from_cii_xml(&xml).unwrap();
//! assert_eq!(parsed, invoice.restricted_to(profile));
//! ```

mod read;
mod write;
pub(crate) mod xml_utils;

pub use read::{detect_profile, from_cii_xml};
pub use write::to_cii_xml;

/// CII namespace URIs.
pub mod cii_ns {
    pub const RSM: &str = "urn:un:unece:uncefact:data:standard:CrossIndustryInvoice:100";
    pub const RAM: &str =
        "urn:un:unece:uncefact:data:standard:ReusableAggregateBusinessInformationEntity:100";
    pub const QDT: &str = "urn:un:unece:uncefact:data:standard:QualifiedDataType:100";
    pub const UDT: &str = "urn:un:unece:uncefact:data:standard:UnqualifiedDataType:100";
}
