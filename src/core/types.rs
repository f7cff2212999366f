use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::error::ApproximationWarning;
use super::profile::Profile;

/// Canonical invoice bridging the ERP model and CII XML.
///
/// Built fresh for every export or import pass and dropped afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// BT-3: Document type (UNTDID 1001).
    pub type_code: InvoiceTypeCode,
    /// BT-1: Invoice number.
    pub number: String,
    /// BT-2: Issue date.
    pub issue_date: NaiveDate,
    /// BT-9: Payment due date.
    pub due_date: Option<NaiveDate>,
    /// BG-14: Billing period.
    pub billing_period: Option<Period>,
    /// BT-72: Actual delivery date.
    pub delivery_date: Option<NaiveDate>,
    /// Document language (EXTENDED only).
    pub language: Option<String>,
    /// BT-5: ISO 4217 currency code.
    pub currency_code: String,
    /// BG-1: Notes with optional UNTDID 4451 subject code.
    pub notes: Vec<Note>,
    /// BT-10: Buyer reference (Leitweg-ID for XRechnung).
    pub buyer_reference: Option<String>,
    /// BT-13: Purchase order reference.
    pub buyer_order: Option<DocumentReference>,
    /// BT-14: Sales order reference.
    pub seller_order: Option<DocumentReference>,
    /// BG-3: Preceding invoice (credit notes and corrections).
    pub preceding_invoice: Option<DocumentReference>,
    /// BG-4
    pub seller: Party,
    /// BG-7
    pub buyer: Party,
    /// BG-13 / BG-15: Deliver-to party.
    pub ship_to: Option<ShipTo>,
    /// BG-25
    pub lines: Vec<LineItem>,
    /// BG-23: VAT breakdown.
    pub tax_summary: Vec<TaxSummary>,
    /// Flat document charges ("Actual" rows).
    pub service_charges: Vec<ServiceCharge>,
    /// BG-16
    pub payment_means: Option<PaymentMeans>,
    /// BT-20 and early payment discount terms.
    pub payment_terms: Vec<PaymentTerm>,
    /// BG-24
    pub attachments: Vec<Attachment>,
    /// BG-22
    pub totals: Totals,
}

/// UNTDID 1001 document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceTypeCode {
    /// 380 — Commercial invoice.
    Invoice,
    /// 381 — Credit note.
    CreditNote,
    /// 384 — Corrected invoice.
    Corrected,
}

impl InvoiceTypeCode {
    pub fn code(&self) -> u16 {
        match self {
            Self::Invoice => 380,
            Self::CreditNote => 381,
            Self::Corrected => 384,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            380 => Some(Self::Invoice),
            381 => Some(Self::CreditNote),
            384 => Some(Self::Corrected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// UNTDID 4451 subject, e.g. "ABC" for conditions of sale, "AAR" for terms of delivery.
    pub subject_code: Option<String>,
    pub content: String,
}

/// Reference to another document by its issuer-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub id: String,
    pub issue_date: Option<NaiveDate>,
}

/// BG-4 / BG-7: Trade party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// BT-29 / BT-46: Party identifier.
    pub id: Option<String>,
    /// BT-27 / BT-44
    pub name: String,
    /// BT-31 / BT-32 / BT-48
    pub tax_registration: Option<TaxRegistration>,
    /// BT-34 / BT-49
    pub electronic_address: Option<ElectronicAddress>,
    /// BG-5 / BG-8
    pub address: Option<Address>,
    /// BG-6 / BG-9
    pub contact: Option<Contact>,
}

/// Tax identifier with its scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRegistration {
    pub scheme: TaxScheme,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxScheme {
    /// VA — VAT identification number.
    Vat,
    /// FC — Local tax number.
    Local,
}

impl TaxScheme {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Vat => "VA",
            Self::Local => "FC",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "VA" => Some(Self::Vat),
            "FC" => Some(Self::Local),
            _ => None,
        }
    }
}

impl TaxRegistration {
    /// Classify a raw tax id: VAT shaped ids get `VA`, anything else `FC`.
    ///
    /// A VAT id is two ASCII letters followed by 2 to 12 characters of
    /// `[0-9A-Za-z+*.]`; spaces inside the number are dropped.
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        match normalize_vat_id(raw) {
            Some(id) => Self {
                scheme: TaxScheme::Vat,
                id,
            },
            None => Self {
                scheme: TaxScheme::Local,
                id: raw.to_string(),
            },
        }
    }
}

fn normalize_vat_id(raw: &str) -> Option<String> {
    let country: String = raw.chars().take(2).collect();
    if country.chars().count() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let number: String = raw.chars().skip(2).filter(|c| *c != ' ').collect();
    let valid = (2..=12).contains(&number.chars().count())
        && number
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '*' | '.'));
    valid.then(|| format!("{}{number}", country.to_ascii_uppercase()))
}

/// BT-34 / BT-49: Electronic address with EAS scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectronicAddress {
    /// EAS code, e.g. "EM" for email, "0204" for Leitweg-ID.
    pub scheme: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line_one: Option<String>,
    pub line_two: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
    /// ISO 3166-1 alpha-2, upper case.
    pub country_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
    pub email: Option<String>,
}

impl Contact {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.department.is_none()
            && self.phone.is_none()
            && self.fax.is_none()
            && self.email.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipTo {
    pub name: String,
    pub address: Option<Address>,
}

/// BG-25: Invoice line.
///
/// After normalization `line_total == quantity * net_price` and at most one
/// of quantity and price is negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// BT-126
    pub id: String,
    /// BT-155
    pub seller_product_id: Option<String>,
    /// BT-156
    pub buyer_product_id: Option<String>,
    /// BT-153
    pub name: String,
    /// BT-154
    pub description: Option<String>,
    /// BT-129
    pub quantity: Decimal,
    /// BT-130: UNECE Rec 20/21 unit code.
    pub unit_code: String,
    /// BT-146: Net price per unit.
    pub net_price: Decimal,
    /// BT-131
    pub line_total: Decimal,
    pub tax: LineTax,
    /// Delivery note the line was shipped with (EXTENDED only).
    pub delivery_note: Option<DocumentReference>,
}

/// BG-30: Line VAT information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineTax {
    pub category: TaxCategory,
    pub rate: Decimal,
    /// VATEX code, present when the rate is zero.
    pub exemption_reason_code: Option<String>,
}

/// UNTDID 5305 tax category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxCategory {
    /// S — Standard rate.
    StandardRate,
    /// Z — Zero rated goods.
    ZeroRated,
    /// E — Exempt from tax.
    Exempt,
    /// AE — VAT reverse charge.
    ReverseCharge,
    /// K — Intra-community supply.
    IntraCommunitySupply,
    /// G — Export outside the EU.
    Export,
    /// O — Services outside scope of tax.
    NotSubjectToVat,
    /// L — Canary Islands general indirect tax.
    CanaryIslands,
    /// M — Ceuta and Melilla tax.
    CeutaMelilla,
}

impl TaxCategory {
    pub fn code(&self) -> &'static str {
        match self {
            Self::StandardRate => "S",
            Self::ZeroRated => "Z",
            Self::Exempt => "E",
            Self::ReverseCharge => "AE",
            Self::IntraCommunitySupply => "K",
            Self::Export => "G",
            Self::NotSubjectToVat => "O",
            Self::CanaryIslands => "L",
            Self::CeutaMelilla => "M",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(Self::StandardRate),
            "Z" => Some(Self::ZeroRated),
            "E" => Some(Self::Exempt),
            "AE" => Some(Self::ReverseCharge),
            "K" => Some(Self::IntraCommunitySupply),
            "G" => Some(Self::Export),
            "O" => Some(Self::NotSubjectToVat),
            "L" => Some(Self::CanaryIslands),
            "M" => Some(Self::CeutaMelilla),
            _ => None,
        }
    }

    /// Categories whose rate must be zero (BR-AE-05, BR-E-05, BR-G-05, BR-IC-05, BR-Z-05).
    pub fn forces_zero_rate(&self) -> bool {
        matches!(
            self,
            Self::ReverseCharge
                | Self::Exempt
                | Self::Export
                | Self::IntraCommunitySupply
                | Self::ZeroRated
        )
    }
}

/// UNTDID 5153 duty/tax/fee type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxTypeCode {
    /// VAT
    Vat,
    /// SUR — additional tax on top of other taxes.
    Surcharge,
}

impl TaxTypeCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Vat => "VAT",
            Self::Surcharge => "SUR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "VAT" => Some(Self::Vat),
            "SUR" => Some(Self::Surcharge),
            _ => None,
        }
    }
}

/// Where a tax summary row's basis amount came from, least certain last.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum BasisSource {
    /// Taken as-is from the source (net total, row net amount, previous row).
    #[default]
    Direct,
    /// Computed as `tax / rate * 100` from a known rate.
    Derived,
    /// Apportioned from the invoice net total; the rate was not known.
    Approximated,
}

/// BG-23: One VAT breakdown row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxSummary {
    pub type_code: TaxTypeCode,
    pub category: TaxCategory,
    pub rate: Decimal,
    pub basis_amount: Decimal,
    pub calculated_amount: Decimal,
    pub exemption_reason_code: Option<String>,
    pub basis_source: BasisSource,
    pub warning: Option<ApproximationWarning>,
}

impl TaxSummary {
    /// `basis * rate / 100`, unrounded.
    pub fn expected_amount(&self) -> Decimal {
        self.basis_amount * self.rate / Decimal::ONE_HUNDRED
    }

    pub fn is_approximate(&self) -> bool {
        self.basis_source == BasisSource::Approximated
    }
}

/// A flat charge on document level with the VAT applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCharge {
    pub description: String,
    pub amount: Decimal,
    pub applied_tax: Option<AppliedTax>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedTax {
    pub category: TaxCategory,
    pub rate: Decimal,
}

/// BG-16: Payment instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMeans {
    /// UNTDID 4461 code.
    pub type_code: String,
    /// BT-84
    pub iban: Option<String>,
    /// BT-85
    pub account_name: Option<String>,
    /// BT-86
    pub bic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTerm {
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    /// Amount due under this term when the schedule has several rows.
    pub partial_amount: Option<Decimal>,
    pub discount: Option<DiscountTerms>,
}

impl PaymentTerm {
    /// A term carrying nothing but a due date.
    pub fn is_bare_due_date(&self) -> bool {
        self.due_date.is_some()
            && self.description.is_none()
            && self.partial_amount.is_none()
            && self.discount.is_none()
    }
}

/// Early payment discount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountTerms {
    pub basis_date: Option<NaiveDate>,
    pub basis_amount: Option<Decimal>,
    pub percent: Option<Decimal>,
    pub amount: Option<Decimal>,
}

/// BG-24: Supporting document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub content: AttachmentContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentContent {
    /// Opaque bytes carried through unchanged.
    Embedded {
        filename: String,
        mime_code: String,
        data: Vec<u8>,
    },
    External {
        uri: String,
    },
}

/// BG-22: Document totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    /// BT-106
    pub line_total: Decimal,
    /// BT-108
    pub charge_total: Decimal,
    /// BT-109
    pub tax_basis_total: Decimal,
    /// BT-110
    pub tax_total: Decimal,
    /// BT-112
    pub grand_total: Decimal,
    /// BT-113
    pub prepaid: Decimal,
    /// BT-115
    pub due_payable: Decimal,
}

/// Fold bare due-date terms into the header due date.
///
/// The first bare term fills an empty due date and disappears; everything
/// else keeps its position. This is the shape a parsed document has.
pub fn fold_due_date(
    due_date: Option<NaiveDate>,
    terms: Vec<PaymentTerm>,
) -> (Option<NaiveDate>, Vec<PaymentTerm>) {
    let mut due = due_date;
    let mut kept = Vec::with_capacity(terms.len());
    for term in terms {
        if due.is_none() && term.is_bare_due_date() {
            due = term.due_date;
        } else {
            kept.push(term);
        }
    }
    (due, kept)
}

impl Invoice {
    /// The invoice as it looks after a round trip through `profile`.
    ///
    /// Fields outside the profile are dropped:
    ///
    /// | Field | Kept in |
    /// |-------|---------|
    /// | party contacts | EN 16931, XRECHNUNG, EXTENDED |
    /// | contact fax | EXTENDED |
    /// | line seller/buyer id, description | EN 16931, XRECHNUNG, EXTENDED |
    /// | line delivery note | EXTENDED |
    /// | attachments | EN 16931, XRECHNUNG, EXTENDED |
    /// | payee account name, BIC | EN 16931, XRECHNUNG, EXTENDED |
    /// | buyer order issue date, seller order | EXTENDED |
    /// | structured discount terms | EXTENDED |
    /// | language | EXTENDED |
    ///
    /// Tax basis provenance and approximation warnings are never written,
    /// and bare due-date payment terms are folded into the due date.
    pub fn restricted_to(&self, profile: Profile) -> Invoice {
        let caps = profile.capabilities();
        let mut inv = self.clone();

        for party in [&mut inv.seller, &mut inv.buyer] {
            if !caps.contacts {
                party.contact = None;
            }
            if let Some(contact) = party.contact.as_mut() {
                if !caps.contact_phone {
                    contact.phone = None;
                }
                if !caps.contact_fax {
                    contact.fax = None;
                }
                if contact.is_empty() {
                    party.contact = None;
                }
            }
        }

        for line in &mut inv.lines {
            if !caps.line_product_details {
                line.seller_product_id = None;
                line.buyer_product_id = None;
                line.description = None;
            }
            if !caps.line_delivery_notes {
                line.delivery_note = None;
            }
        }

        if !caps.attachments {
            inv.attachments.clear();
        }
        if !caps.payee_account_details {
            if let Some(pm) = inv.payment_means.as_mut() {
                pm.account_name = None;
                pm.bic = None;
            }
        }
        if !caps.order_issue_date {
            if let Some(order) = inv.buyer_order.as_mut() {
                order.issue_date = None;
            }
        }
        if !caps.seller_order_reference {
            inv.seller_order = None;
        }
        if !caps.document_language {
            inv.language = None;
        }
        if !caps.discount_terms {
            for term in &mut inv.payment_terms {
                term.discount = None;
            }
        }

        for row in &mut inv.tax_summary {
            row.basis_source = BasisSource::Direct;
            row.warning = None;
        }

        let mut terms: Vec<PaymentTerm> = Vec::with_capacity(inv.payment_terms.len() + 1);
        if let Some(due) = inv.due_date.take() {
            terms.push(bare_term(due));
        }
        terms.append(&mut inv.payment_terms);
        terms.retain(|t| {
            t.due_date.is_some()
                || t.description.is_some()
                || t.partial_amount.is_some()
                || t.discount.is_some()
        });
        let (due, terms) = fold_due_date(None, terms);
        inv.due_date = due;
        inv.payment_terms = terms;

        inv
    }
}

/// Round a monetary amount to `scale` places, halves away from zero.
pub fn round_amount(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

pub(crate) fn bare_term(due: NaiveDate) -> PaymentTerm {
    PaymentTerm {
        description: None,
        due_date: Some(due),
        partial_amount: None,
        discount: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_vat_ids() {
        let t = TaxRegistration::classify("de 123 456 789");
        assert_eq!(t.scheme, TaxScheme::Vat);
        assert_eq!(t.id, "DE123456789");

        let t = TaxRegistration::classify("201/113/40209");
        assert_eq!(t.scheme, TaxScheme::Local);
        assert_eq!(t.id, "201/113/40209");

        let t = TaxRegistration::classify("ATU12345678");
        assert_eq!(t.scheme, TaxScheme::Vat);
    }

    #[test]
    fn zero_rate_categories() {
        for code in ["AE", "E", "G", "K", "Z"] {
            assert!(TaxCategory::from_code(code).unwrap().forces_zero_rate());
        }
        assert!(!TaxCategory::StandardRate.forces_zero_rate());
        assert!(!TaxCategory::NotSubjectToVat.forces_zero_rate());
    }

    #[test]
    fn fold_takes_first_bare_term_only() {
        let d1 = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        let (due, terms) = fold_due_date(None, vec![bare_term(d1), bare_term(d2)]);
        assert_eq!(due, Some(d1));
        assert_eq!(terms, vec![bare_term(d2)]);
    }

    #[test]
    fn fold_keeps_described_terms() {
        let d1 = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let term = PaymentTerm {
            description: Some("30 Tage netto".into()),
            ..bare_term(d1)
        };
        let (due, terms) = fold_due_date(None, vec![term.clone()]);
        assert_eq!(due, None);
        assert_eq!(terms, vec![term]);
    }
}
