use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rust_decimal::Decimal;
use tracing::debug;

use super::cii_ns;
use super::xml_utils::XmlWriter;
use crate::core::*;

/// Serialize `invoice` as a CII document for `profile`.
///
/// Elements the profile does not carry are dropped (see
/// [`Invoice::restricted_to`]). A missing element the profile mandates fails
/// with [`EInvoiceError::ProfileConstraintViolation`] instead of producing a
/// document the validator would reject anyway.
pub fn to_cii_xml(invoice: &Invoice, profile: Profile) -> Result<String> {
    let inv = invoice.restricted_to(profile);
    check_mandatory(&inv, profile)?;

    let caps = profile.capabilities();
    let currency = inv.currency_code.as_str();
    let mut w = XmlWriter::new()?;

    w.start_with_attrs(
        "rsm:CrossIndustryInvoice",
        &[
            ("xmlns:rsm", cii_ns::RSM),
            ("xmlns:ram", cii_ns::RAM),
            ("xmlns:qdt", cii_ns::QDT),
            ("xmlns:udt", cii_ns::UDT),
        ],
    )?;

    w.start("rsm:ExchangedDocumentContext")?;
    w.start("ram:BusinessProcessSpecifiedDocumentContextParameter")?;
    w.text("ram:ID", BUSINESS_PROCESS_ID)?;
    w.end("ram:BusinessProcessSpecifiedDocumentContextParameter")?;
    w.start("ram:GuidelineSpecifiedDocumentContextParameter")?;
    w.text("ram:ID", profile.guideline_id())?;
    w.end("ram:GuidelineSpecifiedDocumentContextParameter")?;
    w.end("rsm:ExchangedDocumentContext")?;

    w.start("rsm:ExchangedDocument")?;
    w.text("ram:ID", &inv.number)?;
    w.text("ram:TypeCode", &inv.type_code.code().to_string())?;
    w.date("ram:IssueDateTime", inv.issue_date)?;
    w.opt_text("ram:LanguageID", inv.language.as_deref())?;
    for note in &inv.notes {
        w.start("ram:IncludedNote")?;
        w.text("ram:Content", &note.content)?;
        w.opt_text("ram:SubjectCode", note.subject_code.as_deref())?;
        w.end("ram:IncludedNote")?;
    }
    w.end("rsm:ExchangedDocument")?;

    w.start("rsm:SupplyChainTradeTransaction")?;
    for line in &inv.lines {
        write_line(&mut w, line)?;
    }

    // BG-1 .. BG-7, BG-24
    w.start("ram:ApplicableHeaderTradeAgreement")?;
    w.opt_text("ram:BuyerReference", inv.buyer_reference.as_deref())?;
    write_party(&mut w, "ram:SellerTradeParty", &inv.seller)?;
    write_party(&mut w, "ram:BuyerTradeParty", &inv.buyer)?;
    if let Some(order) = &inv.seller_order {
        write_reference(&mut w, "ram:SellerOrderReferencedDocument", order)?;
    }
    if let Some(order) = &inv.buyer_order {
        write_reference(&mut w, "ram:BuyerOrderReferencedDocument", order)?;
    }
    for attachment in &inv.attachments {
        write_attachment(&mut w, attachment)?;
    }
    w.end("ram:ApplicableHeaderTradeAgreement")?;

    w.start("ram:ApplicableHeaderTradeDelivery")?;
    if let Some(ship_to) = &inv.ship_to {
        w.start("ram:ShipToTradeParty")?;
        w.text("ram:Name", &ship_to.name)?;
        if let Some(address) = &ship_to.address {
            write_address(&mut w, address)?;
        }
        w.end("ram:ShipToTradeParty")?;
    }
    if let Some(date) = inv.delivery_date {
        w.start("ram:ActualDeliverySupplyChainEvent")?;
        w.date("ram:OccurrenceDateTime", date)?;
        w.end("ram:ActualDeliverySupplyChainEvent")?;
    }
    w.end("ram:ApplicableHeaderTradeDelivery")?;

    w.start("ram:ApplicableHeaderTradeSettlement")?;
    w.text("ram:InvoiceCurrencyCode", currency)?;

    if let Some(pm) = &inv.payment_means {
        w.start("ram:SpecifiedTradeSettlementPaymentMeans")?;
        w.text("ram:TypeCode", &pm.type_code)?;
        if pm.iban.is_some() || pm.account_name.is_some() {
            w.start("ram:PayeePartyCreditorFinancialAccount")?;
            w.opt_text("ram:IBANID", pm.iban.as_deref())?;
            w.opt_text("ram:AccountName", pm.account_name.as_deref())?;
            w.end("ram:PayeePartyCreditorFinancialAccount")?;
        }
        if let Some(bic) = &pm.bic {
            w.start("ram:PayeeSpecifiedCreditorFinancialInstitution")?;
            w.text("ram:BICID", bic)?;
            w.end("ram:PayeeSpecifiedCreditorFinancialInstitution")?;
        }
        w.end("ram:SpecifiedTradeSettlementPaymentMeans")?;
    }

    for row in &inv.tax_summary {
        w.start("ram:ApplicableTradeTax")?;
        w.decimal("ram:CalculatedAmount", row.calculated_amount)?;
        w.text("ram:TypeCode", row.type_code.code())?;
        w.decimal("ram:BasisAmount", row.basis_amount)?;
        w.text("ram:CategoryCode", row.category.code())?;
        w.opt_text("ram:ExemptionReasonCode", row.exemption_reason_code.as_deref())?;
        w.decimal("ram:RateApplicablePercent", row.rate)?;
        w.end("ram:ApplicableTradeTax")?;
    }

    if let Some(period) = &inv.billing_period {
        w.start("ram:BillingSpecifiedPeriod")?;
        if let Some(start) = period.start {
            w.date("ram:StartDateTime", start)?;
        }
        if let Some(end) = period.end {
            w.date("ram:EndDateTime", end)?;
        }
        w.end("ram:BillingSpecifiedPeriod")?;
    }

    match caps.flat_charges {
        FlatChargeSyntax::DocumentCharge => {
            for charge in &inv.service_charges {
                write_document_charge(&mut w, charge)?;
            }
        }
        FlatChargeSyntax::LogisticsServiceCharge => {
            for charge in &inv.service_charges {
                write_logistics_charge(&mut w, charge)?;
            }
        }
        FlatChargeSyntax::Unsupported => {}
    }

    // The header due date goes first as a bare term; see `fold_due_date`.
    if let Some(due) = inv.due_date {
        w.start("ram:SpecifiedTradePaymentTerms")?;
        w.date("ram:DueDateDateTime", due)?;
        w.end("ram:SpecifiedTradePaymentTerms")?;
    }
    for term in &inv.payment_terms {
        write_payment_term(&mut w, term, currency)?;
    }

    let t = &inv.totals;
    w.start("ram:SpecifiedTradeSettlementHeaderMonetarySummation")?;
    w.decimal("ram:LineTotalAmount", t.line_total)?;
    if !t.charge_total.is_zero() {
        w.decimal("ram:ChargeTotalAmount", t.charge_total)?;
    }
    w.decimal("ram:TaxBasisTotalAmount", t.tax_basis_total)?;
    w.amount("ram:TaxTotalAmount", t.tax_total, currency)?;
    w.decimal("ram:GrandTotalAmount", t.grand_total)?;
    if !t.prepaid.is_zero() {
        w.decimal("ram:TotalPrepaidAmount", t.prepaid)?;
    }
    w.decimal("ram:DuePayableAmount", t.due_payable)?;
    w.end("ram:SpecifiedTradeSettlementHeaderMonetarySummation")?;

    if let Some(preceding) = &inv.preceding_invoice {
        write_reference(&mut w, "ram:InvoiceReferencedDocument", preceding)?;
    }

    w.end("ram:ApplicableHeaderTradeSettlement")?;
    w.end("rsm:SupplyChainTradeTransaction")?;
    w.end("rsm:CrossIndustryInvoice")?;

    debug!(invoice = %inv.number, %profile, lines = inv.lines.len(), "serialized CII document");
    w.into_string()
}

/// Reject invoices that lack an element `profile` mandates.
fn check_mandatory(inv: &Invoice, profile: Profile) -> Result<()> {
    let caps = profile.capabilities();
    let fail = |message: &str| Err(EInvoiceError::profile(profile, message));

    if inv.number.trim().is_empty() {
        return fail("invoice number (BT-1) is required");
    }
    if inv.currency_code.trim().is_empty() {
        return fail("invoice currency (BT-5) is required");
    }
    if inv.seller.name.trim().is_empty() {
        return fail("seller name (BT-27) is required");
    }
    if inv.buyer.name.trim().is_empty() {
        return fail("buyer name (BT-44) is required");
    }
    if inv.lines.is_empty() {
        return fail("at least one invoice line (BG-25) is required");
    }
    if !inv.service_charges.is_empty() && caps.flat_charges == FlatChargeSyntax::Unsupported {
        return fail("flat document charges are not supported");
    }
    if caps.flat_charges == FlatChargeSyntax::DocumentCharge
        && inv.service_charges.iter().any(|c| c.applied_tax.is_none())
    {
        return fail("document level charge without VAT category (BR-37)");
    }

    if caps.requires_tax_parties {
        if !has_country(&inv.seller) {
            return fail("seller postal address with country (BG-5) is required");
        }
        if !has_country(&inv.buyer) {
            return fail("buyer postal address with country (BG-8) is required");
        }
        if inv.seller.tax_registration.is_none() {
            return fail("seller VAT identifier or tax number (BT-31/BT-32) is required");
        }
    }

    if caps.requires_routing {
        if is_blank(inv.buyer_reference.as_deref()) {
            return fail("buyer reference (BT-10) is required");
        }
        if inv.seller.electronic_address.is_none() {
            return fail("seller electronic address (BT-34) is required");
        }
        if inv.buyer.electronic_address.is_none() {
            return fail("buyer electronic address (BT-49) is required");
        }
        let contact = inv.seller.contact.clone().unwrap_or_default();
        if is_blank(contact.name.as_deref())
            || is_blank(contact.phone.as_deref())
            || is_blank(contact.email.as_deref())
        {
            return fail("seller contact with name, telephone and email (BG-6) is required");
        }
        if inv.payment_means.is_none() {
            return fail("payment instructions (BG-16) are required");
        }
    }

    Ok(())
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn has_country(party: &Party) -> bool {
    party
        .address
        .as_ref()
        .is_some_and(|a| !a.country_code.trim().is_empty())
}

fn write_line(w: &mut XmlWriter, line: &LineItem) -> Result<()> {
    w.start("ram:IncludedSupplyChainTradeLineItem")?;

    w.start("ram:AssociatedDocumentLineDocument")?;
    w.text("ram:LineID", &line.id)?;
    w.end("ram:AssociatedDocumentLineDocument")?;

    w.start("ram:SpecifiedTradeProduct")?;
    w.opt_text("ram:SellerAssignedID", line.seller_product_id.as_deref())?;
    w.opt_text("ram:BuyerAssignedID", line.buyer_product_id.as_deref())?;
    w.text("ram:Name", &line.name)?;
    w.opt_text("ram:Description", line.description.as_deref())?;
    w.end("ram:SpecifiedTradeProduct")?;

    w.start("ram:SpecifiedLineTradeAgreement")?;
    w.start("ram:NetPriceProductTradePrice")?;
    w.decimal("ram:ChargeAmount", line.net_price)?;
    w.end("ram:NetPriceProductTradePrice")?;
    w.end("ram:SpecifiedLineTradeAgreement")?;

    w.start("ram:SpecifiedLineTradeDelivery")?;
    w.quantity("ram:BilledQuantity", line.quantity, &line.unit_code)?;
    if let Some(note) = &line.delivery_note {
        write_reference(w, "ram:DeliveryNoteReferencedDocument", note)?;
    }
    w.end("ram:SpecifiedLineTradeDelivery")?;

    w.start("ram:SpecifiedLineTradeSettlement")?;
    w.start("ram:ApplicableTradeTax")?;
    w.text("ram:TypeCode", TaxTypeCode::Vat.code())?;
    w.text("ram:CategoryCode", line.tax.category.code())?;
    w.opt_text(
        "ram:ExemptionReasonCode",
        line.tax.exemption_reason_code.as_deref(),
    )?;
    w.decimal("ram:RateApplicablePercent", line.tax.rate)?;
    w.end("ram:ApplicableTradeTax")?;
    w.start("ram:SpecifiedTradeSettlementLineMonetarySummation")?;
    w.decimal("ram:LineTotalAmount", line.line_total)?;
    w.end("ram:SpecifiedTradeSettlementLineMonetarySummation")?;
    w.end("ram:SpecifiedLineTradeSettlement")?;

    w.end("ram:IncludedSupplyChainTradeLineItem")?;
    Ok(())
}

fn write_party(w: &mut XmlWriter, element: &str, party: &Party) -> Result<()> {
    // ID, Name, DefinedTradeContact, PostalTradeAddress,
    // URIUniversalCommunication, SpecifiedTaxRegistration
    w.start(element)?;
    w.opt_text("ram:ID", party.id.as_deref())?;
    w.text("ram:Name", &party.name)?;

    if let Some(contact) = &party.contact {
        w.start("ram:DefinedTradeContact")?;
        w.opt_text("ram:PersonName", contact.name.as_deref())?;
        w.opt_text("ram:DepartmentName", contact.department.as_deref())?;
        if let Some(phone) = &contact.phone {
            w.start("ram:TelephoneUniversalCommunication")?;
            w.text("ram:CompleteNumber", phone)?;
            w.end("ram:TelephoneUniversalCommunication")?;
        }
        if let Some(fax) = &contact.fax {
            w.start("ram:FaxUniversalCommunication")?;
            w.text("ram:CompleteNumber", fax)?;
            w.end("ram:FaxUniversalCommunication")?;
        }
        if let Some(email) = &contact.email {
            w.start("ram:EmailURIUniversalCommunication")?;
            w.text("ram:URIID", email)?;
            w.end("ram:EmailURIUniversalCommunication")?;
        }
        w.end("ram:DefinedTradeContact")?;
    }

    if let Some(address) = &party.address {
        write_address(w, address)?;
    }

    if let Some(ea) = &party.electronic_address {
        w.start("ram:URIUniversalCommunication")?;
        w.text_with_attrs("ram:URIID", &ea.value, &[("schemeID", &ea.scheme)])?;
        w.end("ram:URIUniversalCommunication")?;
    }

    if let Some(reg) = &party.tax_registration {
        w.start("ram:SpecifiedTaxRegistration")?;
        w.text_with_attrs("ram:ID", &reg.id, &[("schemeID", reg.scheme.code())])?;
        w.end("ram:SpecifiedTaxRegistration")?;
    }

    w.end(element)?;
    Ok(())
}

fn write_address(w: &mut XmlWriter, address: &Address) -> Result<()> {
    w.start("ram:PostalTradeAddress")?;
    w.opt_text("ram:PostcodeCode", address.postcode.as_deref())?;
    w.opt_text("ram:LineOne", address.line_one.as_deref())?;
    w.opt_text("ram:LineTwo", address.line_two.as_deref())?;
    w.opt_text("ram:CityName", address.city.as_deref())?;
    w.text("ram:CountryID", &address.country_code)?;
    w.end("ram:PostalTradeAddress")?;
    Ok(())
}

fn write_reference(w: &mut XmlWriter, element: &str, reference: &DocumentReference) -> Result<()> {
    w.start(element)?;
    w.text("ram:IssuerAssignedID", &reference.id)?;
    if let Some(date) = reference.issue_date {
        w.formatted_date("ram:FormattedIssueDateTime", date)?;
    }
    w.end(element)?;
    Ok(())
}

fn write_attachment(w: &mut XmlWriter, attachment: &Attachment) -> Result<()> {
    w.start("ram:AdditionalReferencedDocument")?;
    w.text("ram:IssuerAssignedID", &attachment.id)?;
    match &attachment.content {
        AttachmentContent::External { uri } => {
            w.text("ram:URIID", uri)?;
            w.text("ram:TypeCode", "916")?;
        }
        AttachmentContent::Embedded {
            filename,
            mime_code,
            data,
        } => {
            w.text("ram:TypeCode", "916")?;
            w.text_with_attrs(
                "ram:AttachmentBinaryObject",
                &BASE64.encode(data),
                &[("mimeCode", mime_code), ("filename", filename)],
            )?;
        }
    }
    w.end("ram:AdditionalReferencedDocument")?;
    Ok(())
}

fn write_applied_tax(w: &mut XmlWriter, element: &str, tax: &AppliedTax) -> Result<()> {
    w.start(element)?;
    w.text("ram:TypeCode", TaxTypeCode::Vat.code())?;
    w.text("ram:CategoryCode", tax.category.code())?;
    w.decimal("ram:RateApplicablePercent", tax.rate)?;
    w.end(element)?;
    Ok(())
}

/// BG-21 document level charge.
fn write_document_charge(w: &mut XmlWriter, charge: &ServiceCharge) -> Result<()> {
    w.start("ram:SpecifiedTradeAllowanceCharge")?;
    w.start("ram:ChargeIndicator")?;
    w.text("udt:Indicator", "true")?;
    w.end("ram:ChargeIndicator")?;
    w.decimal("ram:ActualAmount", charge.amount)?;
    w.text("ram:Reason", &charge.description)?;
    if let Some(tax) = &charge.applied_tax {
        write_applied_tax(w, "ram:CategoryTradeTax", tax)?;
    }
    w.end("ram:SpecifiedTradeAllowanceCharge")?;
    Ok(())
}

fn write_logistics_charge(w: &mut XmlWriter, charge: &ServiceCharge) -> Result<()> {
    w.start("ram:SpecifiedLogisticsServiceCharge")?;
    w.text("ram:Description", &charge.description)?;
    w.decimal("ram:AppliedAmount", charge.amount)?;
    if let Some(tax) = &charge.applied_tax {
        write_applied_tax(w, "ram:AppliedTradeTax", tax)?;
    }
    w.end("ram:SpecifiedLogisticsServiceCharge")?;
    Ok(())
}

fn write_payment_term(w: &mut XmlWriter, term: &PaymentTerm, currency: &str) -> Result<()> {
    w.start("ram:SpecifiedTradePaymentTerms")?;
    w.opt_text("ram:Description", term.description.as_deref())?;
    if let Some(due) = term.due_date {
        w.date("ram:DueDateDateTime", due)?;
    }
    if let Some(amount) = term.partial_amount {
        w.amount("ram:PartialPaymentAmount", amount, currency)?;
    }
    if let Some(discount) = &term.discount {
        w.start("ram:ApplicableTradePaymentDiscountTerms")?;
        if let Some(date) = discount.basis_date {
            w.date("ram:BasisDateTime", date)?;
        }
        write_opt_amount(w, "ram:BasisAmount", discount.basis_amount)?;
        if let Some(percent) = discount.percent {
            w.decimal("ram:CalculationPercent", percent)?;
        }
        write_opt_amount(w, "ram:ActualDiscountAmount", discount.amount)?;
        w.end("ram:ApplicableTradePaymentDiscountTerms")?;
    }
    w.end("ram:SpecifiedTradePaymentTerms")?;
    Ok(())
}

fn write_opt_amount(w: &mut XmlWriter, element: &str, value: Option<Decimal>) -> Result<()> {
    if let Some(value) = value {
        w.decimal(element, value)?;
    }
    Ok(())
}
