//! CII profiles and their capability table.
//!
//! Every "does profile X carry element Y" decision in the crate goes through
//! [`Profile::capabilities`]. The table is static; profiles are ordered
//! BASIC < EN 16931 < XRECHNUNG < EXTENDED.

use serde::{Deserialize, Serialize};

use super::error::{EInvoiceError, Result};

/// Business process identifier written into every generated document.
pub const BUSINESS_PROCESS_ID: &str = "urn:fdc:peppol.eu:2017:poacc:billing:01:1.0";

const XRECHNUNG_GUIDELINE_PREFIX: &str =
    "urn:cen.eu:en16931:2017#compliant#urn:xeinkauf.de:kosit:xrechnung_";

/// Supported CII profile.
///
/// MINIMUM and BASIC WL have no variant here: they are not tax invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Profile {
    #[serde(rename = "BASIC", alias = "basic")]
    Basic,
    #[serde(rename = "EN16931", alias = "EN 16931", alias = "en16931")]
    En16931,
    #[serde(rename = "XRECHNUNG", alias = "xrechnung")]
    XRechnung,
    #[serde(rename = "EXTENDED", alias = "extended")]
    Extended,
}

/// How a flat ("Actual") document charge is written, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatChargeSyntax {
    /// The profile has no element for it.
    Unsupported,
    /// BG-21 document level charge (`SpecifiedTradeAllowanceCharge`).
    DocumentCharge,
    /// Factur-X EXTENDED `SpecifiedLogisticsServiceCharge`.
    LogisticsServiceCharge,
}

/// Which optional elements a profile carries and which ones it mandates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileCapabilities {
    /// BG-6 / BG-9 trade contacts.
    pub contacts: bool,
    pub contact_phone: bool,
    pub contact_fax: bool,
    /// Seller/buyer item id and item description on lines.
    pub line_product_details: bool,
    /// Delivery note reference on each line.
    pub line_delivery_notes: bool,
    /// BG-24 additional documents with embedded content.
    pub attachments: bool,
    /// Payee account name and BIC next to the IBAN.
    pub payee_account_details: bool,
    /// Issue date on the buyer order reference.
    pub order_issue_date: bool,
    pub seller_order_reference: bool,
    /// Structured `ApplicableTradePaymentDiscountTerms`.
    pub discount_terms: bool,
    /// Early payment discount encoded as `#SKONTO#` text in the term description.
    pub skonto_text: bool,
    pub document_language: bool,
    pub flat_charges: FlatChargeSyntax,
    pub pdf_embedding: bool,
    /// Seller/buyer postal address with country and seller tax registration.
    pub requires_tax_parties: bool,
    /// Buyer reference, electronic addresses, seller contact and payment means.
    pub requires_routing: bool,
}

const BASIC: ProfileCapabilities = ProfileCapabilities {
    contacts: false,
    contact_phone: false,
    contact_fax: false,
    line_product_details: false,
    line_delivery_notes: false,
    attachments: false,
    payee_account_details: false,
    order_issue_date: false,
    seller_order_reference: false,
    discount_terms: false,
    skonto_text: false,
    document_language: false,
    flat_charges: FlatChargeSyntax::Unsupported,
    pdf_embedding: true,
    requires_tax_parties: false,
    requires_routing: false,
};

const EN16931: ProfileCapabilities = ProfileCapabilities {
    contacts: true,
    contact_phone: true,
    attachments: true,
    payee_account_details: true,
    line_product_details: true,
    requires_tax_parties: true,
    ..BASIC
};

const XRECHNUNG: ProfileCapabilities = ProfileCapabilities {
    skonto_text: true,
    flat_charges: FlatChargeSyntax::DocumentCharge,
    pdf_embedding: false,
    requires_routing: true,
    ..EN16931
};

const EXTENDED: ProfileCapabilities = ProfileCapabilities {
    contact_fax: true,
    line_delivery_notes: true,
    order_issue_date: true,
    seller_order_reference: true,
    discount_terms: true,
    document_language: true,
    flat_charges: FlatChargeSyntax::LogisticsServiceCharge,
    ..EN16931
};

impl Profile {
    pub const ALL: [Profile; 4] = [
        Profile::Basic,
        Profile::En16931,
        Profile::XRechnung,
        Profile::Extended,
    ];

    pub fn capabilities(&self) -> &'static ProfileCapabilities {
        match self {
            Self::Basic => &BASIC,
            Self::En16931 => &EN16931,
            Self::XRechnung => &XRECHNUNG,
            Self::Extended => &EXTENDED,
        }
    }

    /// BT-24 guideline identifier written to `GuidelineSpecifiedDocumentContextParameter`.
    pub fn guideline_id(&self) -> &'static str {
        match self {
            Self::Basic => "urn:cen.eu:en16931:2017#compliant#urn:factur-x.eu:1p0:basic",
            Self::En16931 => "urn:cen.eu:en16931:2017",
            Self::XRechnung => {
                "urn:cen.eu:en16931:2017#compliant#urn:xeinkauf.de:kosit:xrechnung_3.0"
            }
            Self::Extended => "urn:cen.eu:en16931:2017#conformant#urn:factur-x.eu:1p0:extended",
        }
    }

    /// Detect the profile from a guideline identifier.
    ///
    /// Any XRechnung version suffix is accepted. MINIMUM, BASIC WL and
    /// unknown identifiers fail with [`EInvoiceError::UnsupportedProfile`].
    pub fn from_guideline_id(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.starts_with(XRECHNUNG_GUIDELINE_PREFIX) {
            return Ok(Self::XRechnung);
        }
        Self::ALL
            .into_iter()
            .find(|p| p.guideline_id() == id)
            .ok_or_else(|| EInvoiceError::UnsupportedProfile(id.to_string()))
    }

    /// Display name, also used as the XMP `ConformanceLevel`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic => "BASIC",
            Self::En16931 => "EN 16931",
            Self::XRechnung => "XRECHNUNG",
            Self::Extended => "EXTENDED",
        }
    }

    /// Schematron stylesheets this profile is checked against, in order.
    pub fn ruleset_files(&self) -> &'static [&'static str] {
        match self {
            Self::Basic => &["Factur-X_1.07.2_BASIC.xsl"],
            Self::En16931 => &["EN16931-CII-validation-preprocessed.xsl"],
            Self::XRechnung => &[
                "XRechnung-CII-validation.xsl",
                "EN16931-CII-validation-preprocessed.xsl",
            ],
            Self::Extended => &["Factur-X_1.07.2_EXTENDED.xsl"],
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Profile {
    type Err = EInvoiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace(' ', "").as_str() {
            "BASIC" => Ok(Self::Basic),
            "EN16931" => Ok(Self::En16931),
            "XRECHNUNG" => Ok(Self::XRechnung),
            "EXTENDED" => Ok(Self::Extended),
            _ => Err(EInvoiceError::UnsupportedProfile(s.to_string())),
        }
    }
}
