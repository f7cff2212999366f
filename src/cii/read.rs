use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core::*;

/// Read the profile from the guideline identifier (BT-24) without parsing
/// the rest of the document.
pub fn detect_profile(xml: &str) -> Result<Profile> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if path.is_empty() {
                    check_root(&name)?;
                }
                path.push(name);
            }
            Ok(Event::Text(e)) => {
                if is_guideline_id(&path) {
                    let id = e.unescape().map_err(xml_error)?;
                    return Profile::from_guideline_id(&id);
                }
            }
            Ok(Event::End(_)) => {
                // The identifier can only appear inside the context block.
                if path.pop().as_deref() == Some("ExchangedDocumentContext") {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }

    Err(EInvoiceError::missing("GuidelineSpecifiedDocumentContextParameter"))
}

/// Parse a CII document into its profile and canonical invoice.
///
/// Elements are matched by local name, so any namespace prefixes work.
/// Net prices given per basis quantity are converted to unit prices, and a
/// bare due-date payment term becomes the header due date.
pub fn from_cii_xml(xml: &str) -> Result<(Profile, Invoice)> {
    // Text is kept verbatim; only the indentation between elements is
    // dropped.
    let mut reader = Reader::from_str(xml);

    let mut p = CiiParsed::default();
    let mut path: Vec<String> = Vec::new();
    let mut attrs: Vec<(String, String)> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if path.is_empty() {
                    check_root(&name)?;
                    p.root_seen = true;
                }
                attrs = e
                    .attributes()
                    .flatten()
                    .filter_map(|a| {
                        let key = std::str::from_utf8(a.key.local_name().as_ref())
                            .ok()?
                            .to_string();
                        let value = a.unescape_value().ok()?.into_owned();
                        Some((key, value))
                    })
                    .collect();
                path.push(name);
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(xml_error)?;
                if !text.trim().is_empty() {
                    p.handle_text(&path, &text, &attrs);
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                if !text.is_empty() {
                    p.handle_text(&path, &text, &attrs);
                }
            }
            Ok(Event::End(_)) => {
                let ended = path.pop().unwrap_or_default();
                p.handle_end(&path, &ended);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }

    if !p.root_seen {
        return Err(EInvoiceError::Xml("document has no root element".into()));
    }

    let guideline = p
        .guideline_id
        .clone()
        .ok_or_else(|| EInvoiceError::missing("GuidelineSpecifiedDocumentContextParameter"))?;
    let profile = Profile::from_guideline_id(&guideline)?;
    let invoice = p.into_invoice()?;
    debug!(invoice = %invoice.number, %profile, lines = invoice.lines.len(), "parsed CII document");
    Ok((profile, invoice))
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn check_root(name: &str) -> Result<()> {
    if name == "CrossIndustryInvoice" {
        Ok(())
    } else {
        Err(EInvoiceError::UnsupportedFormat(format!(
            "root element <{name}> is not a CII invoice"
        )))
    }
}

fn xml_error(e: impl std::fmt::Display) -> EInvoiceError {
    EInvoiceError::Xml(format!("parse failed: {e}"))
}

fn is_guideline_id(path: &[String]) -> bool {
    path.len() >= 2
        && path[path.len() - 1] == "ID"
        && path[path.len() - 2] == "GuidelineSpecifiedDocumentContextParameter"
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[derive(Default)]
struct CiiParsed {
    root_seen: bool,
    guideline_id: Option<String>,
    number: Option<String>,
    type_code: Option<String>,
    issue_date: Option<String>,
    language: Option<String>,
    notes: Vec<ParsedNote>,
    current_note: Option<ParsedNote>,

    buyer_reference: Option<String>,
    seller: ParsedParty,
    buyer: ParsedParty,
    ship_to: Option<ParsedParty>,
    seller_order: Option<ParsedReference>,
    buyer_order: Option<ParsedReference>,
    preceding: Option<ParsedReference>,
    attachments: Vec<ParsedAttachment>,
    current_attachment: Option<ParsedAttachment>,

    delivery_date: Option<String>,
    period_start: Option<String>,
    period_end: Option<String>,

    currency_code: Option<String>,
    payment_means_code: Option<String>,
    iban: Option<String>,
    account_name: Option<String>,
    bic: Option<String>,

    tax_rows: Vec<ParsedTax>,
    current_tax: Option<ParsedTax>,
    charges: Vec<ParsedCharge>,
    current_charge: Option<ParsedCharge>,
    terms: Vec<ParsedTerm>,
    current_term: Option<ParsedTerm>,

    line_total: Option<String>,
    charge_total: Option<String>,
    tax_basis_total: Option<String>,
    /// `(currencyID, amount)`; a second entry may be in the tax currency.
    tax_totals: Vec<(Option<String>, String)>,
    grand_total: Option<String>,
    prepaid: Option<String>,
    due_payable: Option<String>,

    lines: Vec<ParsedLine>,
    current_line: Option<ParsedLine>,
}

#[derive(Default)]
struct ParsedNote {
    content: Option<String>,
    subject_code: Option<String>,
}

#[derive(Default)]
struct ParsedParty {
    id: Option<String>,
    name: Option<String>,
    /// `(schemeID, id)` in document order.
    tax_registrations: Vec<(Option<String>, String)>,
    endpoint: Option<(Option<String>, String)>,
    contact: Contact,
    line_one: Option<String>,
    line_two: Option<String>,
    postcode: Option<String>,
    city: Option<String>,
    country: Option<String>,
}

#[derive(Default)]
struct ParsedReference {
    id: Option<String>,
    date: Option<String>,
}

#[derive(Default)]
struct ParsedAttachment {
    id: Option<String>,
    uri: Option<String>,
    content: Option<String>,
    mime_code: Option<String>,
    filename: Option<String>,
}

#[derive(Default)]
struct ParsedTax {
    type_code: Option<String>,
    calculated: Option<String>,
    basis: Option<String>,
    category: Option<String>,
    rate: Option<String>,
    exemption_code: Option<String>,
}

#[derive(Default)]
struct ParsedCharge {
    is_charge: Option<String>,
    amount: Option<String>,
    description: Option<String>,
    category: Option<String>,
    rate: Option<String>,
}

#[derive(Default)]
struct ParsedTerm {
    description: Option<String>,
    due_date: Option<String>,
    partial_amount: Option<String>,
    discount: Option<ParsedDiscount>,
}

#[derive(Default)]
struct ParsedDiscount {
    basis_date: Option<String>,
    basis_amount: Option<String>,
    percent: Option<String>,
    amount: Option<String>,
}

#[derive(Default)]
struct ParsedLine {
    id: Option<String>,
    seller_id: Option<String>,
    buyer_id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    quantity: Option<String>,
    unit: Option<String>,
    net_price: Option<String>,
    basis_quantity: Option<String>,
    line_total: Option<String>,
    category: Option<String>,
    rate: Option<String>,
    exemption_code: Option<String>,
    delivery_note: Option<ParsedReference>,
}

impl ParsedParty {
    fn handle_text(
        &mut self,
        party_element: &str,
        leaf: &str,
        parent: &str,
        text: &str,
        attrs: &[(String, String)],
    ) {
        let text = text.to_string();
        match (parent, leaf) {
            (p, "ID") if p == party_element => self.id = Some(text),
            (p, "Name") if p == party_element => self.name = Some(text),
            ("SpecifiedTaxRegistration", "ID") => self
                .tax_registrations
                .push((attr(attrs, "schemeID").map(str::to_string), text)),
            ("URIUniversalCommunication", "URIID") => {
                self.endpoint = Some((attr(attrs, "schemeID").map(str::to_string), text))
            }
            ("DefinedTradeContact", "PersonName") => self.contact.name = Some(text),
            ("DefinedTradeContact", "DepartmentName") => self.contact.department = Some(text),
            ("TelephoneUniversalCommunication", "CompleteNumber") => {
                self.contact.phone = Some(text)
            }
            ("FaxUniversalCommunication", "CompleteNumber") => self.contact.fax = Some(text),
            ("EmailURIUniversalCommunication", "URIID") => self.contact.email = Some(text),
            ("PostalTradeAddress", "LineOne") => self.line_one = Some(text),
            ("PostalTradeAddress", "LineTwo") => self.line_two = Some(text),
            ("PostalTradeAddress", "PostcodeCode") => self.postcode = Some(text),
            ("PostalTradeAddress", "CityName") => self.city = Some(text),
            ("PostalTradeAddress", "CountryID") => self.country = Some(text),
            _ => {}
        }
    }

    fn address(&mut self) -> Option<Address> {
        if self.line_one.is_none()
            && self.line_two.is_none()
            && self.postcode.is_none()
            && self.city.is_none()
            && self.country.is_none()
        {
            return None;
        }
        Some(Address {
            line_one: self.line_one.take(),
            line_two: self.line_two.take(),
            postcode: self.postcode.take(),
            city: self.city.take(),
            country_code: self.country.take().unwrap_or_default(),
        })
    }

    fn into_party(mut self) -> Party {
        let address = self.address();
        // VAT registration wins over a local tax number.
        let tax_registration = self
            .tax_registrations
            .iter()
            .find(|(scheme, _)| scheme.as_deref() == Some("VA"))
            .or_else(|| self.tax_registrations.first())
            .map(|(scheme, id)| match scheme.as_deref().and_then(TaxScheme::from_code) {
                Some(scheme) => TaxRegistration {
                    scheme,
                    id: id.clone(),
                },
                None => TaxRegistration::classify(id),
            });
        Party {
            id: self.id,
            name: self.name.unwrap_or_default(),
            tax_registration,
            electronic_address: self.endpoint.map(|(scheme, value)| ElectronicAddress {
                scheme: scheme.unwrap_or_else(|| "EM".to_string()),
                value,
            }),
            address,
            contact: (!self.contact.is_empty()).then_some(self.contact),
        }
    }
}

impl ParsedReference {
    fn handle_text(&mut self, leaf: &str, parent: &str, text: &str) {
        match (parent, leaf) {
            (_, "IssuerAssignedID") => self.id = Some(text.to_string()),
            ("FormattedIssueDateTime", "DateTimeString") => self.date = Some(text.to_string()),
            _ => {}
        }
    }

    fn into_reference(self) -> Result<Option<DocumentReference>> {
        let Some(id) = self.id else {
            return Ok(None);
        };
        Ok(Some(DocumentReference {
            id,
            issue_date: opt_date(self.date.as_deref(), "FormattedIssueDateTime")?,
        }))
    }
}

impl CiiParsed {
    fn handle_text(&mut self, path: &[String], text: &str, attrs: &[(String, String)]) {
        let leaf = path.last().map(String::as_str).unwrap_or("");
        let parent = if path.len() >= 2 {
            path[path.len() - 2].as_str()
        } else {
            ""
        };
        let within = |name: &str| path.iter().any(|p| p == name);

        if within("IncludedSupplyChainTradeLineItem") {
            let line = self.current_line.get_or_insert_with(Default::default);
            line.handle_text(path, leaf, parent, text, attrs);
            return;
        }

        if within("ExchangedDocumentContext") {
            if is_guideline_id(path) {
                self.guideline_id = Some(text.trim().to_string());
            }
            return;
        }

        if within("ExchangedDocument") {
            match (parent, leaf) {
                ("ExchangedDocument", "ID") => self.number = Some(text.to_string()),
                ("ExchangedDocument", "TypeCode") => self.type_code = Some(text.to_string()),
                ("ExchangedDocument", "LanguageID") => self.language = Some(text.to_string()),
                ("IssueDateTime", "DateTimeString") => self.issue_date = Some(text.to_string()),
                ("IncludedNote", "Content") => {
                    let note = self.current_note.get_or_insert_with(Default::default);
                    note.content = Some(text.to_string());
                }
                ("IncludedNote", "SubjectCode") => {
                    let note = self.current_note.get_or_insert_with(Default::default);
                    note.subject_code = Some(text.to_string());
                }
                _ => {}
            }
            return;
        }

        // Header trade agreement
        if within("SellerTradeParty") {
            self.seller
                .handle_text("SellerTradeParty", leaf, parent, text, attrs);
            return;
        }
        if within("BuyerTradeParty") {
            self.buyer
                .handle_text("BuyerTradeParty", leaf, parent, text, attrs);
            return;
        }
        if within("ShipToTradeParty") {
            self.ship_to
                .get_or_insert_with(Default::default)
                .handle_text("ShipToTradeParty", leaf, parent, text, attrs);
            return;
        }
        if leaf == "BuyerReference" {
            self.buyer_reference = Some(text.to_string());
            return;
        }
        if within("SellerOrderReferencedDocument") {
            self.seller_order
                .get_or_insert_with(Default::default)
                .handle_text(leaf, parent, text);
            return;
        }
        if within("BuyerOrderReferencedDocument") {
            self.buyer_order
                .get_or_insert_with(Default::default)
                .handle_text(leaf, parent, text);
            return;
        }
        if within("InvoiceReferencedDocument") {
            self.preceding
                .get_or_insert_with(Default::default)
                .handle_text(leaf, parent, text);
            return;
        }
        if within("AdditionalReferencedDocument") {
            let att = self.current_attachment.get_or_insert_with(Default::default);
            match leaf {
                "IssuerAssignedID" => att.id = Some(text.to_string()),
                "URIID" => att.uri = Some(text.to_string()),
                "AttachmentBinaryObject" => {
                    att.content = Some(text.to_string());
                    att.mime_code = attr(attrs, "mimeCode").map(str::to_string);
                    att.filename = attr(attrs, "filename").map(str::to_string);
                }
                _ => {}
            }
            return;
        }

        // Header trade delivery
        if within("ActualDeliverySupplyChainEvent") {
            if leaf == "DateTimeString" {
                self.delivery_date = Some(text.to_string());
            }
            return;
        }
        if within("BillingSpecifiedPeriod") {
            match (parent, leaf) {
                ("StartDateTime", "DateTimeString") => self.period_start = Some(text.to_string()),
                ("EndDateTime", "DateTimeString") => self.period_end = Some(text.to_string()),
                _ => {}
            }
            return;
        }

        // Header trade settlement
        if within("SpecifiedTradeSettlementPaymentMeans") {
            match leaf {
                "TypeCode" => self.payment_means_code = Some(text.to_string()),
                "IBANID" if within("PayeePartyCreditorFinancialAccount") => {
                    self.iban = Some(text.to_string())
                }
                "AccountName" => self.account_name = Some(text.to_string()),
                "BICID" => self.bic = Some(text.to_string()),
                _ => {}
            }
            return;
        }
        if within("SpecifiedTradeAllowanceCharge") || within("SpecifiedLogisticsServiceCharge") {
            let charge = self.current_charge.get_or_insert_with(Default::default);
            match (parent, leaf) {
                ("ChargeIndicator", "Indicator") => charge.is_charge = Some(text.to_string()),
                ("SpecifiedTradeAllowanceCharge", "ActualAmount")
                | ("SpecifiedLogisticsServiceCharge", "AppliedAmount") => {
                    charge.amount = Some(text.to_string())
                }
                ("SpecifiedTradeAllowanceCharge", "Reason")
                | ("SpecifiedLogisticsServiceCharge", "Description") => {
                    charge.description = Some(text.to_string())
                }
                (_, "CategoryCode") => charge.category = Some(text.to_string()),
                (_, "RateApplicablePercent") => charge.rate = Some(text.to_string()),
                _ => {}
            }
            return;
        }
        if within("ApplicableTradeTax") {
            let tax = self.current_tax.get_or_insert_with(Default::default);
            match leaf {
                "TypeCode" => tax.type_code = Some(text.to_string()),
                "CalculatedAmount" => tax.calculated = Some(text.to_string()),
                "BasisAmount" => tax.basis = Some(text.to_string()),
                "CategoryCode" => tax.category = Some(text.to_string()),
                "RateApplicablePercent" => tax.rate = Some(text.to_string()),
                "ExemptionReasonCode" => tax.exemption_code = Some(text.to_string()),
                _ => {}
            }
            return;
        }
        if within("SpecifiedTradePaymentTerms") {
            let term = self.current_term.get_or_insert_with(Default::default);
            if within("ApplicableTradePaymentDiscountTerms") {
                let discount = term.discount.get_or_insert_with(Default::default);
                match (parent, leaf) {
                    ("BasisDateTime", "DateTimeString") => {
                        discount.basis_date = Some(text.to_string())
                    }
                    (_, "BasisAmount") => discount.basis_amount = Some(text.to_string()),
                    (_, "CalculationPercent") => discount.percent = Some(text.to_string()),
                    (_, "ActualDiscountAmount") => discount.amount = Some(text.to_string()),
                    _ => {}
                }
            } else {
                match (parent, leaf) {
                    (_, "Description") => term.description = Some(text.to_string()),
                    ("DueDateDateTime", "DateTimeString") => {
                        term.due_date = Some(text.to_string())
                    }
                    (_, "PartialPaymentAmount") => term.partial_amount = Some(text.to_string()),
                    _ => {}
                }
            }
            return;
        }
        if within("SpecifiedTradeSettlementHeaderMonetarySummation") {
            let value = Some(text.to_string());
            match leaf {
                "LineTotalAmount" => self.line_total = value,
                "ChargeTotalAmount" => self.charge_total = value,
                "TaxBasisTotalAmount" => self.tax_basis_total = value,
                "TaxTotalAmount" => self
                    .tax_totals
                    .push((attr(attrs, "currencyID").map(str::to_string), text.to_string())),
                "GrandTotalAmount" => self.grand_total = value,
                "TotalPrepaidAmount" => self.prepaid = value,
                "DuePayableAmount" => self.due_payable = value,
                _ => {}
            }
            return;
        }
        if leaf == "InvoiceCurrencyCode" {
            self.currency_code = Some(text.to_string());
        }
    }

    fn handle_end(&mut self, path: &[String], ended: &str) {
        let in_line = path.iter().any(|p| p == "IncludedSupplyChainTradeLineItem");
        match ended {
            "IncludedSupplyChainTradeLineItem" => {
                if let Some(line) = self.current_line.take() {
                    self.lines.push(line);
                }
            }
            "IncludedNote" if !in_line => {
                if let Some(note) = self.current_note.take() {
                    self.notes.push(note);
                }
            }
            "AdditionalReferencedDocument" if !in_line => {
                if let Some(att) = self.current_attachment.take() {
                    self.attachments.push(att);
                }
            }
            "ApplicableTradeTax" if !in_line => {
                // Applied taxes of charges are read into the charge itself.
                if let Some(tax) = self.current_tax.take() {
                    self.tax_rows.push(tax);
                }
            }
            "SpecifiedTradeAllowanceCharge" | "SpecifiedLogisticsServiceCharge" if !in_line => {
                if let Some(mut charge) = self.current_charge.take() {
                    if ended == "SpecifiedLogisticsServiceCharge" {
                        charge.is_charge = Some("true".into());
                    }
                    self.charges.push(charge);
                }
            }
            "SpecifiedTradePaymentTerms" => {
                if let Some(term) = self.current_term.take() {
                    self.terms.push(term);
                }
            }
            _ => {}
        }
    }

    fn into_invoice(self) -> Result<Invoice> {
        let issue_date = parse_date(
            self.issue_date
                .as_deref()
                .ok_or_else(|| EInvoiceError::missing("IssueDateTime"))?,
            "IssueDateTime",
        )?;

        let type_code = match self.type_code.as_deref() {
            None => InvoiceTypeCode::Invoice,
            Some(code) => code
                .trim()
                .parse::<u16>()
                .ok()
                .and_then(InvoiceTypeCode::from_code)
                .ok_or_else(|| {
                    EInvoiceError::invalid("TypeCode", format!("unsupported document type {code}"))
                })?,
        };

        let currency_code = self
            .currency_code
            .ok_or_else(|| EInvoiceError::missing("InvoiceCurrencyCode"))?;

        let lines = self
            .lines
            .into_iter()
            .map(ParsedLine::into_line)
            .collect::<Result<Vec<_>>>()?;

        let tax_summary = self
            .tax_rows
            .into_iter()
            .map(|row| {
                Ok(TaxSummary {
                    type_code: match row.type_code.as_deref() {
                        Some(code) => TaxTypeCode::from_code(code).ok_or_else(|| {
                            EInvoiceError::invalid("TypeCode", format!("unknown tax type {code}"))
                        })?,
                        None => TaxTypeCode::Vat,
                    },
                    category: category(row.category.as_deref())?,
                    rate: opt_decimal(row.rate.as_deref(), "RateApplicablePercent")?
                        .unwrap_or_default(),
                    basis_amount: opt_decimal(row.basis.as_deref(), "BasisAmount")?
                        .unwrap_or_default(),
                    calculated_amount: opt_decimal(row.calculated.as_deref(), "CalculatedAmount")?
                        .unwrap_or_default(),
                    exemption_reason_code: row.exemption_code,
                    basis_source: BasisSource::Direct,
                    warning: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut service_charges = Vec::new();
        for charge in self.charges {
            if charge.is_charge.as_deref().map(str::trim) != Some("true") {
                warn!(
                    reason = charge.description.as_deref().unwrap_or(""),
                    "document level allowance cannot be represented, skipped"
                );
                continue;
            }
            let applied_tax = match charge.category.as_deref() {
                Some(code) => Some(AppliedTax {
                    category: category(Some(code))?,
                    rate: opt_decimal(charge.rate.as_deref(), "RateApplicablePercent")?
                        .unwrap_or_default(),
                }),
                None => None,
            };
            service_charges.push(ServiceCharge {
                description: charge.description.unwrap_or_default(),
                amount: opt_decimal(charge.amount.as_deref(), "ActualAmount")?.unwrap_or_default(),
                applied_tax,
            });
        }

        let terms = self
            .terms
            .into_iter()
            .map(|t| {
                Ok(PaymentTerm {
                    description: t.description,
                    due_date: opt_date(t.due_date.as_deref(), "DueDateDateTime")?,
                    partial_amount: opt_decimal(
                        t.partial_amount.as_deref(),
                        "PartialPaymentAmount",
                    )?,
                    discount: match t.discount {
                        Some(d) => Some(DiscountTerms {
                            basis_date: opt_date(d.basis_date.as_deref(), "BasisDateTime")?,
                            basis_amount: opt_decimal(d.basis_amount.as_deref(), "BasisAmount")?,
                            percent: opt_decimal(d.percent.as_deref(), "CalculationPercent")?,
                            amount: opt_decimal(d.amount.as_deref(), "ActualDiscountAmount")?,
                        }),
                        None => None,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let (due_date, payment_terms) = fold_due_date(None, terms);

        let payment_means = (self.payment_means_code.is_some() || self.iban.is_some()).then(|| {
            PaymentMeans {
                // 1 = instrument not defined
                type_code: self.payment_means_code.unwrap_or_else(|| "1".to_string()),
                iban: self.iban,
                account_name: self.account_name,
                bic: self.bic,
            }
        });

        let attachments = self
            .attachments
            .into_iter()
            .map(|a| {
                let id = a.id.unwrap_or_default();
                let content = match (a.content, a.uri) {
                    (Some(data), _) => AttachmentContent::Embedded {
                        filename: a.filename.unwrap_or_default(),
                        mime_code: a.mime_code.unwrap_or_default(),
                        data: BASE64.decode(data.trim()).map_err(|e| {
                            EInvoiceError::invalid(
                                "AttachmentBinaryObject",
                                format!("attachment '{id}' is not valid base64: {e}"),
                            )
                        })?,
                    },
                    (None, Some(uri)) => AttachmentContent::External { uri },
                    (None, None) => {
                        return Err(EInvoiceError::invalid(
                            "AdditionalReferencedDocument",
                            format!("attachment '{id}' has neither content nor URI"),
                        ));
                    }
                };
                Ok(Attachment { id, content })
            })
            .collect::<Result<Vec<_>>>()?;

        let billing_period = if self.period_start.is_some() || self.period_end.is_some() {
            Some(Period {
                start: opt_date(self.period_start.as_deref(), "StartDateTime")?,
                end: opt_date(self.period_end.as_deref(), "EndDateTime")?,
            })
        } else {
            None
        };

        let ship_to = self.ship_to.map(|mut party| ShipTo {
            address: party.address(),
            name: party.name.unwrap_or_default(),
        });

        let tax_total = self
            .tax_totals
            .iter()
            .find(|(cur, _)| cur.as_deref().is_none_or(|c| c == currency_code))
            .or_else(|| self.tax_totals.first())
            .map(|(_, amount)| amount.as_str());

        let totals = Totals {
            line_total: opt_decimal(self.line_total.as_deref(), "LineTotalAmount")?
                .unwrap_or_default(),
            charge_total: opt_decimal(self.charge_total.as_deref(), "ChargeTotalAmount")?
                .unwrap_or_default(),
            tax_basis_total: opt_decimal(self.tax_basis_total.as_deref(), "TaxBasisTotalAmount")?
                .unwrap_or_default(),
            tax_total: opt_decimal(tax_total, "TaxTotalAmount")?.unwrap_or_default(),
            grand_total: opt_decimal(self.grand_total.as_deref(), "GrandTotalAmount")?
                .unwrap_or_default(),
            prepaid: opt_decimal(self.prepaid.as_deref(), "TotalPrepaidAmount")?
                .unwrap_or_default(),
            due_payable: opt_decimal(self.due_payable.as_deref(), "DuePayableAmount")?
                .unwrap_or_default(),
        };

        Ok(Invoice {
            type_code,
            number: self.number.unwrap_or_default(),
            issue_date,
            due_date,
            billing_period,
            delivery_date: opt_date(self.delivery_date.as_deref(), "OccurrenceDateTime")?,
            language: self.language,
            currency_code,
            notes: self
                .notes
                .into_iter()
                .map(|n| Note {
                    subject_code: n.subject_code,
                    content: n.content.unwrap_or_default(),
                })
                .collect(),
            buyer_reference: self.buyer_reference,
            buyer_order: self.buyer_order.map(ParsedReference::into_reference).transpose()?.flatten(),
            seller_order: self.seller_order.map(ParsedReference::into_reference).transpose()?.flatten(),
            preceding_invoice: self.preceding.map(ParsedReference::into_reference).transpose()?.flatten(),
            seller: self.seller.into_party(),
            buyer: self.buyer.into_party(),
            ship_to,
            lines,
            tax_summary,
            service_charges,
            payment_means,
            payment_terms,
            attachments,
            totals,
        })
    }
}

impl ParsedLine {
    fn handle_text(
        &mut self,
        path: &[String],
        leaf: &str,
        parent: &str,
        text: &str,
        attrs: &[(String, String)],
    ) {
        let within = |name: &str| path.iter().any(|p| p == name);
        let value = Some(text.to_string());

        if within("DeliveryNoteReferencedDocument") {
            self.delivery_note
                .get_or_insert_with(Default::default)
                .handle_text(leaf, parent, text);
            return;
        }
        if within("ApplicableTradeTax") {
            match leaf {
                "CategoryCode" => self.category = value,
                "RateApplicablePercent" => self.rate = value,
                "ExemptionReasonCode" => self.exemption_code = value,
                _ => {}
            }
            return;
        }

        match (parent, leaf) {
            ("AssociatedDocumentLineDocument", "LineID") => self.id = value,
            ("SpecifiedTradeProduct", "SellerAssignedID") => self.seller_id = value,
            ("SpecifiedTradeProduct", "BuyerAssignedID") => self.buyer_id = value,
            ("SpecifiedTradeProduct", "Name") => self.name = value,
            ("SpecifiedTradeProduct", "Description") => self.description = value,
            ("NetPriceProductTradePrice", "ChargeAmount") => self.net_price = value,
            ("NetPriceProductTradePrice", "BasisQuantity") => self.basis_quantity = value,
            ("SpecifiedLineTradeDelivery", "BilledQuantity") => {
                self.quantity = value;
                self.unit = attr(attrs, "unitCode").map(str::to_string);
            }
            ("SpecifiedTradeSettlementLineMonetarySummation", "LineTotalAmount") => {
                self.line_total = value
            }
            _ => {}
        }
    }

    fn into_line(self) -> Result<LineItem> {
        let quantity = opt_decimal(self.quantity.as_deref(), "BilledQuantity")?
            .ok_or_else(|| EInvoiceError::missing("BilledQuantity"))?;
        let mut net_price =
            opt_decimal(self.net_price.as_deref(), "ChargeAmount")?.unwrap_or_default();
        if let Some(basis) = opt_decimal(self.basis_quantity.as_deref(), "BasisQuantity")? {
            if !basis.is_zero() {
                net_price /= basis;
            }
        }
        let line_total = match opt_decimal(self.line_total.as_deref(), "LineTotalAmount")? {
            Some(total) => total,
            None => quantity * net_price,
        };
        Ok(LineItem {
            id: self.id.unwrap_or_default(),
            seller_product_id: self.seller_id,
            buyer_product_id: self.buyer_id,
            name: self.name.unwrap_or_default(),
            description: self.description,
            quantity,
            // C62 = one (unit)
            unit_code: self.unit.unwrap_or_else(|| "C62".to_string()),
            net_price,
            line_total,
            tax: LineTax {
                category: category(self.category.as_deref())?,
                rate: opt_decimal(self.rate.as_deref(), "RateApplicablePercent")?
                    .unwrap_or_default(),
                exemption_reason_code: self.exemption_code,
            },
            delivery_note: self
                .delivery_note
                .map(ParsedReference::into_reference)
                .transpose()?
                .flatten(),
        })
    }
}

fn category(code: Option<&str>) -> Result<TaxCategory> {
    match code {
        None => Ok(TaxCategory::StandardRate),
        Some(code) => TaxCategory::from_code(code.trim()).ok_or_else(|| {
            EInvoiceError::invalid("CategoryCode", format!("unknown tax category '{code}'"))
        }),
    }
}

fn opt_decimal(value: Option<&str>, field: &str) -> Result<Option<Decimal>> {
    value
        .map(|s| {
            Decimal::from_str(s.trim())
                .map_err(|e| EInvoiceError::invalid(field, format!("'{s}' is not a number: {e}")))
        })
        .transpose()
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y%m%d")
        .map_err(|e| EInvoiceError::invalid(field, format!("'{value}' is not a YYYYMMDD date: {e}")))
}

fn opt_date(value: Option<&str>, field: &str) -> Result<Option<NaiveDate>> {
    value.map(|v| parse_date(v, field)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rsm:CrossIndustryInvoice xmlns:rsm="urn:un:unece:uncefact:data:standard:CrossIndustryInvoice:100"
    xmlns:ram="urn:un:unece:uncefact:data:standard:ReusableAggregateBusinessInformationEntity:100"
    xmlns:udt="urn:un:unece:uncefact:data:standard:UnqualifiedDataType:100">
  <rsm:ExchangedDocumentContext>
    <ram:GuidelineSpecifiedDocumentContextParameter>
      <ram:ID>urn:cen.eu:en16931:2017</ram:ID>
    </ram:GuidelineSpecifiedDocumentContextParameter>
  </rsm:ExchangedDocumentContext>
  <rsm:ExchangedDocument>
    <ram:ID>471102</ram:ID>
    <ram:TypeCode>380</ram:TypeCode>
    <ram:IssueDateTime><udt:DateTimeString format="102">20240305</udt:DateTimeString></ram:IssueDateTime>
  </rsm:ExchangedDocument>
  <rsm:SupplyChainTradeTransaction>
    <ram:IncludedSupplyChainTradeLineItem>
      <ram:AssociatedDocumentLineDocument><ram:LineID>1</ram:LineID></ram:AssociatedDocumentLineDocument>
      <ram:SpecifiedTradeProduct><ram:Name>Trennblätter A4</ram:Name></ram:SpecifiedTradeProduct>
      <ram:SpecifiedLineTradeAgreement>
        <ram:NetPriceProductTradePrice>
          <ram:ChargeAmount>98.00</ram:ChargeAmount>
          <ram:BasisQuantity unitCode="H87">4</ram:BasisQuantity>
        </ram:NetPriceProductTradePrice>
      </ram:SpecifiedLineTradeAgreement>
      <ram:SpecifiedLineTradeDelivery>
        <ram:BilledQuantity unitCode="H87">20.0000</ram:BilledQuantity>
      </ram:SpecifiedLineTradeDelivery>
      <ram:SpecifiedLineTradeSettlement>
        <ram:ApplicableTradeTax>
          <ram:TypeCode>VAT</ram:TypeCode>
          <ram:CategoryCode>S</ram:CategoryCode>
          <ram:RateApplicablePercent>19.00</ram:RateApplicablePercent>
        </ram:ApplicableTradeTax>
        <ram:SpecifiedTradeSettlementLineMonetarySummation>
          <ram:LineTotalAmount>490.00</ram:LineTotalAmount>
        </ram:SpecifiedTradeSettlementLineMonetarySummation>
      </ram:SpecifiedLineTradeSettlement>
    </ram:IncludedSupplyChainTradeLineItem>
    <ram:ApplicableHeaderTradeAgreement>
      <ram:SellerTradeParty>
        <ram:Name>Lieferant GmbH</ram:Name>
        <ram:SpecifiedTaxRegistration><ram:ID schemeID="FC">201/113/40209</ram:ID></ram:SpecifiedTaxRegistration>
        <ram:SpecifiedTaxRegistration><ram:ID schemeID="VA">DE123456789</ram:ID></ram:SpecifiedTaxRegistration>
      </ram:SellerTradeParty>
      <ram:BuyerTradeParty><ram:Name>Kunden AG</ram:Name></ram:BuyerTradeParty>
    </ram:ApplicableHeaderTradeAgreement>
    <ram:ApplicableHeaderTradeDelivery/>
    <ram:ApplicableHeaderTradeSettlement>
      <ram:InvoiceCurrencyCode>EUR</ram:InvoiceCurrencyCode>
      <ram:SpecifiedTradeAllowanceCharge>
        <ram:ChargeIndicator><udt:Indicator>false</udt:Indicator></ram:ChargeIndicator>
        <ram:ActualAmount>5.00</ram:ActualAmount>
        <ram:Reason>Rabatt</ram:Reason>
      </ram:SpecifiedTradeAllowanceCharge>
      <ram:SpecifiedTradePaymentTerms>
        <ram:DueDateDateTime><udt:DateTimeString format="102">20240404</udt:DateTimeString></ram:DueDateDateTime>
      </ram:SpecifiedTradePaymentTerms>
      <ram:SpecifiedTradeSettlementHeaderMonetarySummation>
        <ram:LineTotalAmount>490.00</ram:LineTotalAmount>
        <ram:TaxTotalAmount currencyID="EUR">93.10</ram:TaxTotalAmount>
        <ram:GrandTotalAmount>583.10</ram:GrandTotalAmount>
        <ram:DuePayableAmount>583.10</ram:DuePayableAmount>
      </ram:SpecifiedTradeSettlementHeaderMonetarySummation>
    </ram:ApplicableHeaderTradeSettlement>
  </rsm:SupplyChainTradeTransaction>
</rsm:CrossIndustryInvoice>"#;

    #[test]
    fn parses_minimal_document() {
        let (profile, inv) = from_cii_xml(MINIMAL).unwrap();
        assert_eq!(profile, Profile::En16931);
        assert_eq!(inv.number, "471102");
        assert_eq!(inv.issue_date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(inv.due_date, NaiveDate::from_ymd_opt(2024, 4, 4));
        assert!(inv.payment_terms.is_empty());
        assert_eq!(inv.totals.tax_total, dec!(93.10));
    }

    #[test]
    fn net_price_is_per_unit() {
        let (_, inv) = from_cii_xml(MINIMAL).unwrap();
        let line = &inv.lines[0];
        assert_eq!(line.net_price, dec!(24.50));
        assert_eq!(line.quantity, dec!(20));
        assert_eq!(line.unit_code, "H87");
        assert_eq!(line.line_total, dec!(490));
    }

    #[test]
    fn vat_registration_preferred_over_tax_number() {
        let (_, inv) = from_cii_xml(MINIMAL).unwrap();
        let reg = inv.seller.tax_registration.unwrap();
        assert_eq!(reg.scheme, TaxScheme::Vat);
        assert_eq!(reg.id, "DE123456789");
    }

    #[test]
    fn allowances_are_skipped() {
        let (_, inv) = from_cii_xml(MINIMAL).unwrap();
        assert!(inv.service_charges.is_empty());
    }

    #[test]
    fn detects_profile_only() {
        assert_eq!(detect_profile(MINIMAL).unwrap(), Profile::En16931);
    }

    #[test]
    fn minimum_profile_is_unsupported() {
        let xml = MINIMAL.replace(
            "urn:cen.eu:en16931:2017</ram:ID>",
            "urn:factur-x.eu:1p0:minimum</ram:ID>",
        );
        assert!(matches!(
            from_cii_xml(&xml),
            Err(EInvoiceError::UnsupportedProfile(_))
        ));
    }

    #[test]
    fn ubl_is_rejected() {
        let xml = r#"<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2"></Invoice>"#;
        assert!(matches!(
            from_cii_xml(xml),
            Err(EInvoiceError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            detect_profile(xml),
            Err(EInvoiceError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn malformed_xml_is_an_xml_error() {
        let xml = "<rsm:CrossIndustryInvoice><a></b></rsm:CrossIndustryInvoice>";
        assert!(matches!(from_cii_xml(xml), Err(EInvoiceError::Xml(_))));
    }
}
