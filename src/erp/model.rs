use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A sales invoice as the ERP hands it over, with every linked record the
/// projection needs already loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpInvoice {
    /// Document name, becomes the invoice number.
    pub name: String,
    pub posting_date: NaiveDate,
    /// Used when there is no payment schedule.
    pub due_date: Option<NaiveDate>,
    pub currency: String,
    pub language: Option<String>,

    pub is_return: bool,
    /// The invoice this return credits.
    pub return_against: Option<LinkedDocument>,
    /// The cancelled invoice this one replaces.
    pub amended_from: Option<LinkedDocument>,

    /// Terms and conditions, may contain HTML.
    pub terms: Option<String>,
    pub incoterm: Option<String>,
    pub named_place: Option<String>,

    pub company: Company,
    pub company_tax_id: Option<String>,
    pub company_address: Option<ErpAddress>,
    pub company_contact: Option<ErpContact>,

    pub customer: Customer,
    pub customer_name: String,
    /// Buyer tax id.
    pub tax_id: Option<String>,
    pub customer_address: Option<ErpAddress>,
    pub shipping_address: Option<ErpAddress>,
    pub customer_contact: Option<ErpContact>,
    pub contact_email: Option<String>,

    pub buyer_reference: Option<String>,
    pub po_no: Option<String>,
    pub po_date: Option<NaiveDate>,
    pub embedded_document: Option<EmbeddedDocument>,

    pub items: Vec<ErpItem>,
    pub taxes: Vec<ErpTaxRow>,
    pub tax_category: Option<String>,
    /// Sales taxes and charges template.
    pub taxes_and_charges: Option<String>,

    pub payment_terms_template: Option<String>,
    pub payment_schedule: Vec<PaymentScheduleRow>,

    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,

    pub net_total: Decimal,
    pub grand_total: Decimal,
    pub outstanding_amount: Decimal,
    pub total_advance: Decimal,
    /// Document level discount; not representable in the e-invoice.
    pub discount_amount: Decimal,
}

/// Name and posting date of a referenced ERP document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedDocument {
    pub name: String,
    pub date: Option<NaiveDate>,
}

impl LinkedDocument {
    pub fn new(name: impl Into<String>, date: Option<NaiveDate>) -> Self {
        Self {
            name: name.into(),
            date,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
    pub electronic_address: Option<ErpElectronicAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    /// Customers are named by their customer name, so the id carries no
    /// information for the buyer.
    pub named_by_customer_name: bool,
    /// Our supplier number at this customer, for the invoicing company.
    pub supplier_number: Option<String>,
    pub electronic_address: Option<ErpElectronicAddress>,
}

/// An electronic address whose scheme is an ERP record, resolved to an EAS
/// code through the code list mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpElectronicAddress {
    pub scheme: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpAddress {
    pub title: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub pincode: Option<String>,
    pub city: Option<String>,
    /// ISO 3166-1 alpha-2 of the address country, any case.
    pub country_code: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpContact {
    pub full_name: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddedDocument {
    /// A stored file whose bytes travel inside the XML.
    File {
        name: String,
        file_name: String,
        mime_type: String,
        content: Vec<u8>,
    },
    /// A file hosted elsewhere, referenced by URL.
    Remote { name: String, url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpItem {
    /// 1-based row index.
    pub idx: u32,
    pub item_code: Option<String>,
    pub item_name: String,
    pub customer_item_code: Option<String>,
    /// May contain HTML.
    pub description: Option<String>,
    pub qty: Decimal,
    pub uom: String,
    pub net_rate: Decimal,
    pub net_amount: Decimal,
    pub item_tax_template: Option<ItemTaxTemplate>,
    pub income_account: Option<String>,
    pub sales_order: Option<LinkedDocument>,
    pub delivery_note: Option<LinkedDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTaxTemplate {
    pub name: String,
    pub rates: Vec<ItemTaxRate>,
}

/// Rate an item tax template assigns to one tax account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTaxRate {
    pub account: String,
    pub rate: Decimal,
}

/// How a tax/charge row is calculated in the ERP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeType {
    /// A flat amount.
    Actual,
    OnNetTotal,
    OnPreviousRowAmount,
    OnPreviousRowTotal,
    OnItemQuantity,
}

impl ChargeType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Actual => "Actual",
            Self::OnNetTotal => "On Net Total",
            Self::OnPreviousRowAmount => "On Previous Row Amount",
            Self::OnPreviousRowTotal => "On Previous Row Total",
            Self::OnItemQuantity => "On Item Quantity",
        }
    }

    pub fn is_previous_row(&self) -> bool {
        matches!(self, Self::OnPreviousRowAmount | Self::OnPreviousRowTotal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpTaxRow {
    pub charge_type: ChargeType,
    pub account_head: Option<String>,
    /// Default rate stored on the tax account.
    pub account_tax_rate: Option<Decimal>,
    pub description: String,
    pub rate: Decimal,
    pub tax_amount: Decimal,
    /// Running total after this row.
    pub total: Decimal,
    /// Net amount the row was calculated on, when the ERP records it.
    pub net_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountType {
    Percentage,
    Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentScheduleRow {
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub payment_amount: Decimal,
    pub mode_of_payment: Option<ModeOfPayment>,
    pub discount_type: Option<DiscountType>,
    pub discount: Option<Decimal>,
    pub discount_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeOfPayment {
    pub name: String,
    /// Company bank account behind this mode of payment, if it is a bank
    /// mode with an IBAN.
    pub bank_account: Option<BankAccount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub iban: String,
    pub bic: Option<String>,
}
