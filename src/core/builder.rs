use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::error::{EInvoiceError, Result};
use super::types::*;

/// Builder for canonical invoices that do not come from an ERP aggregate.
///
/// Tax summary rows and totals are computed from the lines unless set
/// explicitly.
///
/// ```
/// use erechnung::core::*;
/// use rust_decimal_macros::dec;
/// use chrono::NaiveDate;
///
/// let invoice = InvoiceBuilder::new("RE-2024-001", NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
///     .seller(PartyBuilder::new("ACME GmbH")
///         .tax_id("DE123456789")
///         .address(AddressBuilder::new("DE").city("Berlin").postcode("10115").build())
///         .build())
///     .buyer(PartyBuilder::new("Kunde AG")
///         .address(AddressBuilder::new("DE").city("München").build())
///         .build())
///     .add_line(LineItemBuilder::new("1", "Beratung", dec!(10), "HUR", dec!(150.00))
///         .tax(TaxCategory::StandardRate, dec!(19))
///         .build())
///     .build()
///     .unwrap();
///
/// assert_eq!(invoice.totals.grand_total, dec!(1785.00));
/// ```
pub struct InvoiceBuilder {
    number: String,
    issue_date: NaiveDate,
    due_date: Option<NaiveDate>,
    type_code: InvoiceTypeCode,
    currency_code: String,
    language: Option<String>,
    notes: Vec<Note>,
    buyer_reference: Option<String>,
    buyer_order: Option<DocumentReference>,
    preceding_invoice: Option<DocumentReference>,
    billing_period: Option<Period>,
    delivery_date: Option<NaiveDate>,
    seller: Option<Party>,
    buyer: Option<Party>,
    ship_to: Option<ShipTo>,
    lines: Vec<LineItem>,
    service_charges: Vec<ServiceCharge>,
    tax_summary: Option<Vec<TaxSummary>>,
    payment_means: Option<PaymentMeans>,
    payment_terms: Vec<PaymentTerm>,
    attachments: Vec<Attachment>,
    prepaid: Decimal,
}

impl InvoiceBuilder {
    pub fn new(number: impl Into<String>, issue_date: NaiveDate) -> Self {
        Self {
            number: number.into(),
            issue_date,
            due_date: None,
            type_code: InvoiceTypeCode::Invoice,
            currency_code: "EUR".to_string(),
            language: None,
            notes: Vec::new(),
            buyer_reference: None,
            buyer_order: None,
            preceding_invoice: None,
            billing_period: None,
            delivery_date: None,
            seller: None,
            buyer: None,
            ship_to: None,
            lines: Vec::new(),
            service_charges: Vec::new(),
            tax_summary: None,
            payment_means: None,
            payment_terms: Vec::new(),
            attachments: Vec::new(),
            prepaid: Decimal::ZERO,
        }
    }

    pub fn due_date(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }

    pub fn type_code(mut self, code: InvoiceTypeCode) -> Self {
        self.type_code = code;
        self
    }

    pub fn currency(mut self, code: impl Into<String>) -> Self {
        self.currency_code = code.into();
        self
    }

    pub fn language(mut self, code: impl Into<String>) -> Self {
        self.language = Some(code.into());
        self
    }

    pub fn note(mut self, subject_code: Option<&str>, content: impl Into<String>) -> Self {
        self.notes.push(Note {
            subject_code: subject_code.map(str::to_string),
            content: content.into(),
        });
        self
    }

    pub fn buyer_reference(mut self, reference: impl Into<String>) -> Self {
        self.buyer_reference = Some(reference.into());
        self
    }

    pub fn buyer_order(mut self, id: impl Into<String>, issue_date: Option<NaiveDate>) -> Self {
        self.buyer_order = Some(DocumentReference {
            id: id.into(),
            issue_date,
        });
        self
    }

    pub fn preceding_invoice(mut self, id: impl Into<String>, issue_date: Option<NaiveDate>) -> Self {
        self.preceding_invoice = Some(DocumentReference {
            id: id.into(),
            issue_date,
        });
        self
    }

    pub fn billing_period(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.billing_period = Some(Period {
            start: Some(start),
            end: Some(end),
        });
        self
    }

    pub fn delivery_date(mut self, date: NaiveDate) -> Self {
        self.delivery_date = Some(date);
        self
    }

    pub fn seller(mut self, party: Party) -> Self {
        self.seller = Some(party);
        self
    }

    pub fn buyer(mut self, party: Party) -> Self {
        self.buyer = Some(party);
        self
    }

    pub fn ship_to(mut self, name: impl Into<String>, address: Option<Address>) -> Self {
        self.ship_to = Some(ShipTo {
            name: name.into(),
            address,
        });
        self
    }

    pub fn add_line(mut self, line: LineItem) -> Self {
        self.lines.push(line);
        self
    }

    pub fn add_service_charge(mut self, charge: ServiceCharge) -> Self {
        self.service_charges.push(charge);
        self
    }

    /// Use these rows instead of computing the VAT breakdown from the lines.
    pub fn tax_summary(mut self, rows: Vec<TaxSummary>) -> Self {
        self.tax_summary = Some(rows);
        self
    }

    pub fn payment_means(mut self, means: PaymentMeans) -> Self {
        self.payment_means = Some(means);
        self
    }

    pub fn add_payment_term(mut self, term: PaymentTerm) -> Self {
        self.payment_terms.push(term);
        self
    }

    pub fn add_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn prepaid(mut self, amount: Decimal) -> Self {
        self.prepaid = amount;
        self
    }

    /// Build the invoice, computing the VAT breakdown and totals.
    pub fn build(self) -> Result<Invoice> {
        let seller = self.seller.ok_or_else(|| EInvoiceError::missing("seller"))?;
        let buyer = self.buyer.ok_or_else(|| EInvoiceError::missing("buyer"))?;

        // Input limits
        if self.lines.len() > 10_000 {
            return Err(EInvoiceError::invalid(
                "lines",
                "invoice cannot have more than 10,000 line items",
            ));
        }
        if self.number.len() > 200 {
            return Err(EInvoiceError::invalid(
                "number",
                "invoice number cannot exceed 200 characters",
            ));
        }

        let tax_summary = match self.tax_summary {
            Some(rows) => rows,
            None => summarize_lines(&self.lines, &self.service_charges),
        };
        let totals = compute_totals(&self.lines, &self.service_charges, &tax_summary, self.prepaid);

        Ok(Invoice {
            type_code: self.type_code,
            number: self.number,
            issue_date: self.issue_date,
            due_date: self.due_date,
            billing_period: self.billing_period,
            delivery_date: self.delivery_date,
            language: self.language,
            currency_code: self.currency_code,
            notes: self.notes,
            buyer_reference: self.buyer_reference,
            buyer_order: self.buyer_order,
            seller_order: None,
            preceding_invoice: self.preceding_invoice,
            seller,
            buyer,
            ship_to: self.ship_to,
            lines: self.lines,
            tax_summary,
            service_charges: self.service_charges,
            payment_means: self.payment_means,
            payment_terms: self.payment_terms,
            attachments: self.attachments,
            totals,
        })
    }
}

/// Group line and charge amounts by (category, rate), first seen first.
fn summarize_lines(lines: &[LineItem], charges: &[ServiceCharge]) -> Vec<TaxSummary> {
    let mut rows: Vec<TaxSummary> = Vec::new();
    let taxed = lines
        .iter()
        .map(|l| (l.tax.category, l.tax.rate, l.line_total, l.tax.exemption_reason_code.clone()))
        .chain(charges.iter().filter_map(|c| {
            c.applied_tax
                .as_ref()
                .map(|t| (t.category, t.rate, c.amount, None))
        }));

    for (category, rate, amount, exemption) in taxed {
        match rows
            .iter_mut()
            .find(|r| r.category == category && r.rate == rate)
        {
            Some(row) => row.basis_amount += amount,
            None => rows.push(TaxSummary {
                type_code: TaxTypeCode::Vat,
                category,
                rate,
                basis_amount: amount,
                calculated_amount: Decimal::ZERO,
                exemption_reason_code: exemption,
                basis_source: BasisSource::Direct,
                warning: None,
            }),
        }
    }

    for row in &mut rows {
        row.basis_amount = round_amount(row.basis_amount, 2);
        row.calculated_amount = round_amount(row.expected_amount(), 2);
    }
    rows
}

fn compute_totals(
    lines: &[LineItem],
    charges: &[ServiceCharge],
    tax_summary: &[TaxSummary],
    prepaid: Decimal,
) -> Totals {
    let line_total: Decimal = lines.iter().map(|l| l.line_total).sum();
    let charge_total: Decimal = charges.iter().map(|c| c.amount).sum();
    let tax_basis_total = line_total + charge_total;
    let tax_total: Decimal = tax_summary.iter().map(|r| r.calculated_amount).sum();
    let grand_total = tax_basis_total + tax_total;

    Totals {
        line_total: round_amount(line_total, 2),
        charge_total: round_amount(charge_total, 2),
        tax_basis_total: round_amount(tax_basis_total, 2),
        tax_total: round_amount(tax_total, 2),
        grand_total: round_amount(grand_total, 2),
        prepaid: round_amount(prepaid, 2),
        due_payable: round_amount(grand_total - prepaid, 2),
    }
}

/// Builder for a seller or buyer.
pub struct PartyBuilder {
    id: Option<String>,
    name: String,
    tax_registration: Option<TaxRegistration>,
    electronic_address: Option<ElectronicAddress>,
    address: Option<Address>,
    contact: Option<Contact>,
}

impl PartyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            tax_registration: None,
            electronic_address: None,
            address: None,
            contact: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// VAT id or local tax number; the scheme is chosen by [`TaxRegistration::classify`].
    pub fn tax_id(mut self, raw: &str) -> Self {
        self.tax_registration = Some(TaxRegistration::classify(raw));
        self
    }

    pub fn electronic_address(
        mut self,
        scheme: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.electronic_address = Some(ElectronicAddress {
            scheme: scheme.into(),
            value: value.into(),
        });
        self
    }

    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn contact(mut self, contact: Contact) -> Self {
        self.contact = Some(contact);
        self
    }

    pub fn build(self) -> Party {
        Party {
            id: self.id,
            name: self.name,
            tax_registration: self.tax_registration,
            electronic_address: self.electronic_address,
            address: self.address,
            contact: self.contact,
        }
    }
}

/// Builder for a postal address.
pub struct AddressBuilder {
    line_one: Option<String>,
    line_two: Option<String>,
    postcode: Option<String>,
    city: Option<String>,
    country_code: String,
}

impl AddressBuilder {
    /// `country_code` is upper-cased.
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            line_one: None,
            line_two: None,
            postcode: None,
            city: None,
            country_code: country_code.into().to_uppercase(),
        }
    }

    pub fn street(mut self, line: impl Into<String>) -> Self {
        self.line_one = Some(line.into());
        self
    }

    pub fn additional(mut self, line: impl Into<String>) -> Self {
        self.line_two = Some(line.into());
        self
    }

    pub fn postcode(mut self, postcode: impl Into<String>) -> Self {
        self.postcode = Some(postcode.into());
        self
    }

    pub fn city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn build(self) -> Address {
        Address {
            line_one: self.line_one,
            line_two: self.line_two,
            postcode: self.postcode,
            city: self.city,
            country_code: self.country_code,
        }
    }
}

/// Builder for an invoice line. The line total is `quantity * net_price`.
pub struct LineItemBuilder {
    id: String,
    name: String,
    quantity: Decimal,
    unit_code: String,
    net_price: Decimal,
    description: Option<String>,
    seller_product_id: Option<String>,
    buyer_product_id: Option<String>,
    tax: LineTax,
    delivery_note: Option<DocumentReference>,
}

impl LineItemBuilder {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        quantity: Decimal,
        unit_code: impl Into<String>,
        net_price: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            quantity,
            unit_code: unit_code.into(),
            net_price,
            description: None,
            seller_product_id: None,
            buyer_product_id: None,
            tax: LineTax {
                category: TaxCategory::StandardRate,
                rate: Decimal::new(19, 0),
                exemption_reason_code: None,
            },
            delivery_note: None,
        }
    }

    pub fn tax(mut self, category: TaxCategory, rate: Decimal) -> Self {
        self.tax.category = category;
        self.tax.rate = rate;
        self
    }

    pub fn exemption_reason(mut self, code: impl Into<String>) -> Self {
        self.tax.exemption_reason_code = Some(code.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn seller_product_id(mut self, id: impl Into<String>) -> Self {
        self.seller_product_id = Some(id.into());
        self
    }

    pub fn buyer_product_id(mut self, id: impl Into<String>) -> Self {
        self.buyer_product_id = Some(id.into());
        self
    }

    pub fn delivery_note(mut self, id: impl Into<String>, date: Option<NaiveDate>) -> Self {
        self.delivery_note = Some(DocumentReference {
            id: id.into(),
            issue_date: date,
        });
        self
    }

    pub fn build(self) -> LineItem {
        LineItem {
            line_total: self.quantity * self.net_price,
            id: self.id,
            seller_product_id: self.seller_product_id,
            buyer_product_id: self.buyer_product_id,
            name: self.name,
            description: self.description,
            quantity: self.quantity,
            unit_code: self.unit_code,
            net_price: self.net_price,
            tax: self.tax,
            delivery_note: self.delivery_note,
        }
    }
}
