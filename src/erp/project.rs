use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::model::*;
use super::text::html_to_text;
use crate::codes::{CodeListResolver, Concept, EntityKind, EntityRef};
use crate::core::*;

/// A canonical invoice projected from the ERP, before sign normalization and
/// tax aggregation, plus non-fatal notices about data the e-invoice drops.
#[derive(Debug, Clone)]
pub struct Projection {
    pub invoice: Invoice,
    pub notices: Vec<Violation>,
}

/// Project an ERP invoice aggregate into the canonical model for `profile`.
///
/// The tax summary and service charges are left empty; they are filled by
/// [`crate::tax::aggregate`]. Line signs are taken as stored in the ERP.
pub fn project(
    erp: &ErpInvoice,
    profile: Profile,
    resolver: &CodeListResolver,
) -> Result<Projection> {
    Projector::new(erp, profile, resolver).run()
}

struct Projector<'a> {
    erp: &'a ErpInvoice,
    profile: Profile,
    caps: &'static ProfileCapabilities,
    resolver: &'a CodeListResolver,
    delivery_dates: Vec<NaiveDate>,
    notices: Vec<Violation>,
}

impl<'a> Projector<'a> {
    fn new(erp: &'a ErpInvoice, profile: Profile, resolver: &'a CodeListResolver) -> Self {
        Self {
            erp,
            profile,
            caps: profile.capabilities(),
            resolver,
            delivery_dates: Vec::new(),
            notices: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Projection> {
        self.check_required()?;
        self.check_unsupported();

        let erp = self.erp;
        let (type_code, preceding_invoice) = self.document_type();

        let lines = erp
            .items
            .iter()
            .map(|item| self.line(item))
            .collect::<Result<Vec<_>>>()?;

        let payment_terms = self.payment_terms();
        let due_date = if erp.payment_schedule.is_empty() {
            erp.due_date
        } else {
            None
        };

        let invoice = Invoice {
            type_code,
            number: erp.name.clone(),
            issue_date: erp.posting_date,
            due_date,
            billing_period: (erp.from_date.is_some() || erp.to_date.is_some()).then(|| Period {
                start: erp.from_date,
                end: erp.to_date,
            }),
            delivery_date: Some(self.delivery_date()),
            language: erp.language.clone().filter(|_| self.caps.document_language),
            currency_code: erp.currency.clone(),
            notes: self.notes(),
            buyer_reference: non_blank(&erp.buyer_reference),
            buyer_order: non_blank(&erp.po_no).map(|id| DocumentReference {
                id,
                issue_date: erp.po_date.filter(|_| self.caps.order_issue_date),
            }),
            seller_order: self.seller_order(),
            preceding_invoice,
            seller: self.seller()?,
            buyer: self.buyer()?,
            ship_to: self.ship_to(),
            lines,
            tax_summary: Vec::new(),
            service_charges: Vec::new(),
            payment_means: Some(self.payment_means()?),
            payment_terms,
            attachments: self.attachments(),
            totals: self.totals(),
        };

        debug!(
            invoice = %invoice.number,
            profile = %self.profile,
            lines = invoice.lines.len(),
            "projected ERP invoice"
        );

        Ok(Projection {
            invoice,
            notices: self.notices,
        })
    }

    fn check_required(&self) -> Result<()> {
        let erp = self.erp;
        if erp.name.trim().is_empty() {
            return Err(EInvoiceError::missing("name"));
        }
        if erp.items.is_empty() {
            return Err(EInvoiceError::missing("items"));
        }
        if self.caps.requires_tax_parties {
            if non_blank(&erp.company_tax_id).is_none() {
                return Err(EInvoiceError::missing("company_tax_id"));
            }
            if erp.company_address.is_none() {
                return Err(EInvoiceError::missing("company_address"));
            }
            if erp.customer_address.is_none() {
                return Err(EInvoiceError::missing("customer_address"));
            }
        }
        if self.caps.requires_routing && non_blank(&erp.buyer_reference).is_none() {
            return Err(EInvoiceError::missing("buyer_reference"));
        }
        Ok(())
    }

    /// Data the ERP allows but the e-invoice cannot carry.
    fn check_unsupported(&mut self) {
        let erp = self.erp;

        for (i, row) in erp.payment_schedule.iter().enumerate() {
            if row.discount_date.is_some_and(|d| d < erp.posting_date) {
                self.notices.push(
                    Violation::warning("discount date should be after the posting date")
                        .at(format!("payment_schedule[{i}].discount_date")),
                );
            }
        }

        let modes: BTreeSet<&str> = erp
            .payment_schedule
            .iter()
            .filter_map(|r| r.mode_of_payment.as_ref().map(|m| m.name.as_str()))
            .collect();
        if modes.len() > 1 {
            warn!(invoice = %erp.name, modes = modes.len(), "only one mode of payment is used");
            self.notices.push(
                Violation::warning("only one mode of payment will be considered in the e-invoice")
                    .at("payment_schedule"),
            );
        }

        if !erp.discount_amount.is_zero() {
            warn!(invoice = %erp.name, "document level discount is not supported");
            self.notices.push(
                Violation::warning("a document level discount is not supported in the e-invoice")
                    .at("discount_amount"),
            );
        }
    }

    fn document_type(&self) -> (InvoiceTypeCode, Option<DocumentReference>) {
        let erp = self.erp;
        let reference = |doc: &LinkedDocument| DocumentReference {
            id: doc.name.clone(),
            issue_date: doc.date,
        };
        if erp.is_return {
            (
                InvoiceTypeCode::CreditNote,
                erp.return_against.as_ref().map(reference),
            )
        } else if let Some(amended) = &erp.amended_from {
            (InvoiceTypeCode::Corrected, Some(reference(amended)))
        } else {
            (InvoiceTypeCode::Invoice, None)
        }
    }

    fn notes(&self) -> Vec<Note> {
        let erp = self.erp;
        let mut notes = Vec::new();
        if let Some(terms) = non_blank(&erp.terms) {
            let content = html_to_text(&terms);
            if !content.is_empty() {
                notes.push(Note {
                    subject_code: Some("ABC".into()),
                    content,
                });
            }
        }
        if let Some(incoterm) = non_blank(&erp.incoterm) {
            let place = erp.named_place.as_deref().unwrap_or("");
            notes.push(Note {
                subject_code: Some("AAR".into()),
                content: format!("{incoterm} {place}").trim().to_string(),
            });
        }
        notes
    }

    fn seller(&self) -> Result<Party> {
        let erp = self.erp;
        let company = &erp.company;

        let electronic_address = match &company.electronic_address {
            Some(ea) => Some(self.electronic_address(ea)?),
            None => erp
                .company_contact
                .as_ref()
                .and_then(|c| non_blank(&c.email))
                .or_else(|| non_blank(&company.email))
                .map(email_address),
        };

        Ok(Party {
            id: non_blank(&erp.customer.supplier_number),
            name: company.name.clone(),
            tax_registration: non_blank(&erp.company_tax_id)
                .map(|id| TaxRegistration::classify(&id)),
            electronic_address,
            address: erp.company_address.as_ref().map(address),
            contact: self.caps.contacts.then(|| self.seller_contact()).flatten(),
        })
    }

    fn seller_contact(&self) -> Option<Contact> {
        let company = &self.erp.company;
        let mut contact = Contact::default();
        let mut phone = non_blank(&company.phone);

        if let Some(person) = &self.erp.company_contact {
            contact.name = non_blank(&person.full_name);
            contact.department = non_blank(&person.department);
            contact.email = non_blank(&person.email);
            phone = non_blank(&person.phone).or(phone);
        }
        if self.caps.contact_phone {
            contact.phone = phone;
        }
        if self.caps.contact_fax {
            contact.fax = non_blank(&company.fax);
        }

        (!contact.is_empty()).then_some(contact)
    }

    fn buyer(&self) -> Result<Party> {
        let erp = self.erp;
        let customer = &erp.customer;

        let electronic_address = match &customer.electronic_address {
            Some(ea) => Some(self.electronic_address(ea)?),
            None => non_blank(&erp.contact_email)
                .or_else(|| erp.customer_address.as_ref().and_then(|a| non_blank(&a.email)))
                .map(email_address),
        };

        Ok(Party {
            id: (!customer.named_by_customer_name && !customer.id.is_empty())
                .then(|| customer.id.clone()),
            name: erp.customer_name.clone(),
            tax_registration: non_blank(&erp.tax_id).map(|id| TaxRegistration::classify(&id)),
            electronic_address,
            address: erp.customer_address.as_ref().map(address),
            contact: self.caps.contacts.then(|| self.buyer_contact()).flatten(),
        })
    }

    fn buyer_contact(&self) -> Option<Contact> {
        let person = self.erp.customer_contact.as_ref()?;
        let contact = Contact {
            name: non_blank(&person.full_name),
            department: non_blank(&person.department),
            email: non_blank(&person.email),
            phone: if self.caps.contact_phone {
                non_blank(&person.phone).or_else(|| non_blank(&person.mobile))
            } else {
                None
            },
            fax: None,
        };
        (!contact.is_empty()).then_some(contact)
    }

    fn electronic_address(&self, ea: &ErpElectronicAddress) -> Result<ElectronicAddress> {
        let scheme = self.resolver.require(
            Concept::ElectronicAddressScheme,
            &[EntityRef::address_scheme(ea.scheme.as_str())],
        )?;
        Ok(ElectronicAddress {
            scheme,
            value: ea.address.clone(),
        })
    }

    fn ship_to(&self) -> Option<ShipTo> {
        let shipping = self.erp.shipping_address.as_ref()?;
        Some(ShipTo {
            name: non_blank(&shipping.title).unwrap_or_else(|| self.erp.customer_name.clone()),
            address: Some(address(shipping)),
        })
    }

    /// Tax entity candidates for a line, most specific first.
    fn line_tax_context(&self, item: &ErpItem) -> Vec<EntityRef> {
        [
            EntityRef::maybe(
                EntityKind::ItemTaxTemplate,
                item.item_tax_template.as_ref().map(|t| t.name.as_str()),
            ),
            EntityRef::maybe(EntityKind::Account, item.income_account.as_deref()),
            EntityRef::maybe(EntityKind::TaxCategory, self.erp.tax_category.as_deref()),
            EntityRef::maybe(
                EntityKind::SalesTaxesTemplate,
                self.erp.taxes_and_charges.as_deref(),
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn line(&mut self, item: &ErpItem) -> Result<LineItem> {
        let context = self.line_tax_context(item);
        let category = tax_category(&self.resolver.require(Concept::TaxCategory, &context)?)?;

        let rate = if category.forces_zero_rate() {
            Decimal::ZERO
        } else {
            item_rate(item, &self.erp.taxes).unwrap_or(Decimal::ZERO)
        };
        let exemption_reason_code = if rate.is_zero() {
            Some(
                self.resolver
                    .require(Concept::VatExemptionReason, &context)?
                    .to_uppercase(),
            )
        } else {
            None
        };

        let unit_code = self.resolver.require(
            Concept::UnitOfMeasure,
            &[EntityRef::uom(item.uom.as_str())],
        )?;

        if let Some(date) = item.delivery_note.as_ref().and_then(|d| d.date) {
            self.delivery_dates.push(date);
        }

        let details = self.caps.line_product_details;
        Ok(LineItem {
            id: item.idx.to_string(),
            seller_product_id: non_blank(&item.item_code).filter(|_| details),
            buyer_product_id: non_blank(&item.customer_item_code).filter(|_| details),
            name: item.item_name.clone(),
            description: item
                .description
                .as_deref()
                .map(html_to_text)
                .filter(|d| details && !d.is_empty()),
            quantity: item.qty,
            unit_code,
            net_price: item.net_rate,
            line_total: item.net_amount,
            tax: LineTax {
                category,
                rate,
                exemption_reason_code,
            },
            delivery_note: item
                .delivery_note
                .as_ref()
                .filter(|_| self.caps.line_delivery_notes)
                .map(|d| DocumentReference {
                    id: d.name.clone(),
                    issue_date: d.date,
                }),
        })
    }

    /// A single sales order across all lines becomes the seller order reference.
    fn seller_order(&self) -> Option<DocumentReference> {
        if !self.caps.seller_order_reference {
            return None;
        }
        let mut orders = self.erp.items.iter().filter_map(|i| i.sales_order.as_ref());
        let first = orders.next()?;
        if orders.any(|o| o.name != first.name) {
            return None;
        }
        Some(DocumentReference {
            id: first.name.clone(),
            issue_date: first.date,
        })
    }

    /// Latest delivery note, else the end of the billing period, else the posting date.
    fn delivery_date(&self) -> NaiveDate {
        self.delivery_dates
            .iter()
            .max()
            .copied()
            .or(self.erp.to_date)
            .unwrap_or(self.erp.posting_date)
    }

    fn payment_terms(&self) -> Vec<PaymentTerm> {
        let erp = self.erp;
        let several = erp.payment_schedule.len() > 1;

        erp.payment_schedule
            .iter()
            .map(|row| {
                let mut description = row.description.clone().unwrap_or_default();
                let mut discount = None;

                if let (Some(value), Some(date)) = (row.discount, row.discount_date) {
                    if self.caps.discount_terms {
                        discount = Some(DiscountTerms {
                            basis_date: Some(date),
                            basis_amount: Some(row.payment_amount),
                            percent: (row.discount_type == Some(DiscountType::Percentage))
                                .then_some(value),
                            amount: (row.discount_type == Some(DiscountType::Amount))
                                .then_some(value),
                        });
                    } else if self.caps.skonto_text {
                        // '#' is reserved for the structured skonto segments
                        description = description.replace('#', "//");
                        let days = (date - erp.posting_date).num_days();
                        if row.discount_type == Some(DiscountType::Percentage) && days >= 0 {
                            let basis = (round_amount(row.payment_amount, 2)
                                != round_amount(erp.outstanding_amount, 2))
                            .then_some(row.payment_amount);
                            if !description.is_empty() {
                                description.push('\n');
                            }
                            description.push_str(&skonto_line(days, value, basis));
                            description.push('\n');
                        }
                    }
                }

                PaymentTerm {
                    description: (!description.is_empty()).then_some(description),
                    due_date: row.due_date,
                    partial_amount: several.then_some(row.payment_amount),
                    discount,
                }
            })
            .collect()
    }

    fn payment_means(&self) -> Result<PaymentMeans> {
        let erp = self.erp;
        let mut candidates: Vec<EntityRef> = EntityRef::maybe(
            EntityKind::PaymentTermsTemplate,
            erp.payment_terms_template.as_deref(),
        )
        .into_iter()
        .collect();
        candidates.extend(erp.payment_schedule.iter().filter_map(|row| {
            EntityRef::maybe(
                EntityKind::ModeOfPayment,
                row.mode_of_payment.as_ref().map(|m| m.name.as_str()),
            )
        }));
        let type_code = self.resolver.require(Concept::PaymentMeans, &candidates)?;

        let bank = erp
            .payment_schedule
            .iter()
            .filter_map(|row| row.mode_of_payment.as_ref())
            .find_map(|mode| mode.bank_account.as_ref());

        let details = self.caps.payee_account_details;
        Ok(PaymentMeans {
            type_code,
            iban: bank.map(|b| b.iban.clone()),
            account_name: bank
                .filter(|_| details)
                .map(|_| erp.company.name.clone()),
            bic: bank.filter(|_| details).and_then(|b| b.bic.clone()),
        })
    }

    fn attachments(&self) -> Vec<Attachment> {
        if !self.caps.attachments {
            return Vec::new();
        }
        let Some(doc) = &self.erp.embedded_document else {
            return Vec::new();
        };
        let attachment = match doc {
            EmbeddedDocument::File {
                name,
                file_name,
                mime_type,
                content,
            } => Attachment {
                id: name.clone(),
                content: AttachmentContent::Embedded {
                    filename: file_name.clone(),
                    mime_code: mime_type.clone(),
                    data: content.clone(),
                },
            },
            EmbeddedDocument::Remote { name, url } => Attachment {
                id: name.clone(),
                content: AttachmentContent::External { uri: url.clone() },
            },
        };
        vec![attachment]
    }

    fn totals(&self) -> Totals {
        let erp = self.erp;
        let charge_total: Decimal = erp
            .taxes
            .iter()
            .filter(|t| t.charge_type == ChargeType::Actual)
            .map(|t| t.tax_amount)
            .sum();
        let tax_total: Decimal = erp
            .taxes
            .iter()
            .filter(|t| t.charge_type != ChargeType::Actual)
            .map(|t| t.tax_amount)
            .sum();

        Totals {
            line_total: round_amount(erp.net_total, 2),
            charge_total: round_amount(charge_total, 2),
            tax_basis_total: round_amount(erp.net_total + charge_total, 2),
            tax_total: round_amount(tax_total, 2),
            grand_total: round_amount(erp.grand_total, 2),
            prepaid: if erp.outstanding_amount.is_zero() {
                round_amount(erp.grand_total, 2)
            } else {
                round_amount(erp.total_advance, 2)
            },
            due_payable: round_amount(erp.outstanding_amount, 2),
        }
    }
}

/// Rate for a line: the item tax template's rate for an account that appears
/// in the taxes table, else the rate of the only "on net total" row.
pub(crate) fn item_rate(item: &ErpItem, taxes: &[ErpTaxRow]) -> Option<Decimal> {
    if let Some(template) = &item.item_tax_template {
        let hit = template.rates.iter().find(|r| {
            taxes
                .iter()
                .any(|t| t.account_head.as_deref() == Some(r.account.as_str()))
        });
        if let Some(r) = hit {
            return Some(r.rate);
        }
    }

    let mut on_net = taxes
        .iter()
        .filter(|t| t.charge_type == ChargeType::OnNetTotal)
        .map(|t| t.rate);
    match (on_net.next(), on_net.next()) {
        (Some(rate), None) => Some(rate),
        _ => None,
    }
}

/// Codified early payment discount, as accepted by the German federal
/// invoice portals: `#SKONTO#TAGE=14#PROZENT=2.00#BASISBETRAG=100.00#`.
pub fn skonto_line(days: i64, percent: Decimal, basis_amount: Option<Decimal>) -> String {
    let mut line = format!("#SKONTO#TAGE={days}#PROZENT={:.2}#", round_amount(percent, 2));
    if let Some(basis) = basis_amount.filter(|b| !b.is_zero()) {
        line.push_str(&format!("BASISBETRAG={:.2}#", round_amount(basis, 2)));
    }
    line
}

pub(crate) fn tax_category(code: &str) -> Result<TaxCategory> {
    TaxCategory::from_code(code).ok_or_else(|| {
        EInvoiceError::invalid("tax category", format!("'{code}' is not a UNTDID 5305 code"))
    })
}

fn address(a: &ErpAddress) -> Address {
    Address {
        line_one: non_blank(&a.line1),
        line_two: non_blank(&a.line2),
        postcode: non_blank(&a.pincode),
        city: non_blank(&a.city),
        country_code: a.country_code.trim().to_uppercase(),
    }
}

fn email_address(email: String) -> ElectronicAddress {
    ElectronicAddress {
        scheme: "EM".into(),
        value: email,
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::CodeList;
    use crate::erp::fixtures::*;
    use rust_decimal_macros::dec;

    fn project_as(erp: &ErpInvoice, profile: Profile) -> Invoice {
        project(erp, profile, &resolver()).unwrap().invoice
    }

    #[test]
    fn plain_invoice_header() {
        let inv = project_as(&erp_invoice(), Profile::En16931);
        assert_eq!(inv.type_code, InvoiceTypeCode::Invoice);
        assert_eq!(inv.number, "ACC-SINV-2024-00001");
        assert_eq!(inv.currency_code, "EUR");
        assert_eq!(inv.preceding_invoice, None);
        assert_eq!(inv.seller.name, "ACME GmbH");
        assert_eq!(
            inv.seller.tax_registration,
            Some(TaxRegistration {
                scheme: TaxScheme::Vat,
                id: "DE123456789".into()
            })
        );
        assert_eq!(inv.seller.address.as_ref().unwrap().country_code, "DE");
        assert_eq!(inv.buyer.id.as_deref(), Some("CUST-0001"));
    }

    #[test]
    fn return_becomes_credit_note() {
        let mut erp = erp_invoice();
        erp.is_return = true;
        erp.return_against = Some(LinkedDocument::new("ACC-SINV-2024-00000", Some(date(2024, 5, 1))));
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(inv.type_code, InvoiceTypeCode::CreditNote);
        assert_eq!(inv.preceding_invoice.unwrap().issue_date, Some(date(2024, 5, 1)));
    }

    #[test]
    fn amendment_becomes_corrected_invoice() {
        let mut erp = erp_invoice();
        erp.amended_from = Some(LinkedDocument::new("ACC-SINV-2024-00001", None));
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(inv.type_code, InvoiceTypeCode::Corrected);
    }

    #[test]
    fn notes_from_terms_and_incoterm() {
        let mut erp = erp_invoice();
        erp.terms = Some("<p>Zahlbar innerhalb 14 Tagen</p>".into());
        erp.incoterm = Some("DAP".into());
        erp.named_place = Some("Berlin".into());
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(inv.notes.len(), 2);
        assert_eq!(inv.notes[0].subject_code.as_deref(), Some("ABC"));
        assert_eq!(inv.notes[0].content, "Zahlbar innerhalb 14 Tagen");
        assert_eq!(inv.notes[1].content, "DAP Berlin");
    }

    #[test]
    fn seller_tax_id_required_for_en16931() {
        let mut erp = erp_invoice();
        erp.company_tax_id = None;
        let err = project(&erp, Profile::En16931, &resolver()).unwrap_err();
        assert!(matches!(err, EInvoiceError::MissingRequiredField { ref field } if field == "company_tax_id"));
        assert!(project(&erp, Profile::Basic, &resolver()).is_ok());
    }

    #[test]
    fn buyer_reference_required_for_xrechnung() {
        let mut erp = erp_invoice();
        erp.buyer_reference = None;
        let err = project(&erp, Profile::XRechnung, &resolver()).unwrap_err();
        assert!(matches!(err, EInvoiceError::MissingRequiredField { ref field } if field == "buyer_reference"));
    }

    #[test]
    fn contact_phone_precedence() {
        let mut erp = erp_invoice();
        erp.company.phone = Some("+49 30 000".into());
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(
            inv.seller.contact.as_ref().unwrap().phone.as_deref(),
            Some("+49 30 123456")
        );

        erp.company_contact.as_mut().unwrap().phone = None;
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(
            inv.seller.contact.as_ref().unwrap().phone.as_deref(),
            Some("+49 30 000")
        );
    }

    #[test]
    fn basic_has_no_contacts_or_details() {
        let inv = project_as(&erp_invoice(), Profile::Basic);
        assert!(inv.seller.contact.is_none());
        assert!(inv.buyer.contact.is_none());
        assert!(inv.lines[0].seller_product_id.is_none());
        assert!(inv.lines[0].description.is_none());
    }

    #[test]
    fn fax_only_in_extended() {
        let mut erp = erp_invoice();
        erp.company.fax = Some("+49 30 999".into());
        let en = project_as(&erp, Profile::En16931);
        assert_eq!(en.seller.contact.unwrap().fax, None);
        let ext = project_as(&erp, Profile::Extended);
        assert_eq!(ext.seller.contact.unwrap().fax.as_deref(), Some("+49 30 999"));
    }

    #[test]
    fn electronic_address_fallbacks() {
        let mut erp = erp_invoice();
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(
            inv.seller.electronic_address,
            Some(ElectronicAddress {
                scheme: "EM".into(),
                value: "max@acme.de".into()
            })
        );

        erp.company_contact = None;
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(inv.seller.electronic_address.unwrap().value, "rechnung@acme.de");

        erp.customer.electronic_address = Some(ErpElectronicAddress {
            scheme: "Leitweg-ID".into(),
            address: "991-12345-67".into(),
        });
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(
            inv.buyer.electronic_address,
            Some(ElectronicAddress {
                scheme: "0204".into(),
                value: "991-12345-67".into()
            })
        );
    }

    #[test]
    fn unmapped_address_scheme_fails() {
        let mut erp = erp_invoice();
        erp.company.electronic_address = Some(ErpElectronicAddress {
            scheme: "Unknown".into(),
            address: "x".into(),
        });
        let err = project(&erp, Profile::En16931, &resolver()).unwrap_err();
        assert!(matches!(err, EInvoiceError::ResolutionFailure { .. }));
    }

    #[test]
    fn ship_to_name_falls_back_to_customer_name() {
        let mut erp = erp_invoice();
        erp.shipping_address = Some(ErpAddress {
            country_code: "at".into(),
            city: Some("Wien".into()),
            ..Default::default()
        });
        let inv = project_as(&erp, Profile::En16931);
        let ship_to = inv.ship_to.unwrap();
        assert_eq!(ship_to.name, "Kunde AG");
        assert_eq!(ship_to.address.unwrap().country_code, "AT");
    }

    #[test]
    fn line_tax_resolution() {
        let r = resolver();
        r.insert(
            CodeList::Untdid5305,
            EntityRef::item_tax_template("Reverse Charge"),
            "AE",
        );
        let mut erp = erp_invoice();
        erp.items[0].item_tax_template = Some(ItemTaxTemplate {
            name: "Reverse Charge".into(),
            rates: vec![],
        });
        let inv = project(&erp, Profile::En16931, &r).unwrap().invoice;
        assert_eq!(inv.lines[0].tax.category, TaxCategory::ReverseCharge);
        assert_eq!(inv.lines[0].tax.rate, Decimal::ZERO);
        assert_eq!(inv.lines[0].tax.exemption_reason_code.as_deref(), Some("VATEX-EU-AE"));
        assert_eq!(inv.lines[1].tax.rate, dec!(19));
        assert_eq!(inv.lines[1].tax.exemption_reason_code, None);
    }

    #[test]
    fn item_template_rate_wins_when_account_is_present() {
        let mut erp = erp_invoice();
        erp.items[1].item_tax_template = Some(ItemTaxTemplate {
            name: "Reduced".into(),
            rates: vec![
                ItemTaxRate {
                    account: "Other VAT".into(),
                    rate: dec!(10),
                },
                ItemTaxRate {
                    account: "VAT 19% - AC".into(),
                    rate: dec!(7),
                },
            ],
        });
        assert_eq!(item_rate(&erp.items[1], &erp.taxes), Some(dec!(7)));
        assert_eq!(item_rate(&erp.items[0], &erp.taxes), Some(dec!(19)));
    }

    #[test]
    fn unit_code_resolution() {
        let inv = project_as(&erp_invoice(), Profile::En16931);
        assert_eq!(inv.lines[0].unit_code, "HUR");
        // no mapping for "Nos" and no list default
        assert_eq!(inv.lines[1].unit_code, "C62");
    }

    #[test]
    fn delivery_date_priority() {
        let mut erp = erp_invoice();
        assert_eq!(project_as(&erp, Profile::En16931).delivery_date, Some(erp.posting_date));

        erp.to_date = Some(date(2024, 5, 31));
        assert_eq!(project_as(&erp, Profile::En16931).delivery_date, Some(date(2024, 5, 31)));

        erp.items[0].delivery_note = Some(LinkedDocument::new("DN-1", Some(date(2024, 6, 3))));
        erp.items[1].delivery_note = Some(LinkedDocument::new("DN-2", Some(date(2024, 6, 10))));
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(inv.delivery_date, Some(date(2024, 6, 10)));
        assert!(inv.lines[0].delivery_note.is_none());

        let inv = project_as(&erp, Profile::Extended);
        assert_eq!(inv.lines[1].delivery_note.as_ref().unwrap().id, "DN-2");
    }

    #[test]
    fn single_sales_order_in_extended() {
        let mut erp = erp_invoice();
        for item in &mut erp.items {
            item.sales_order = Some(LinkedDocument::new("SO-1", Some(date(2024, 5, 20))));
        }
        assert_eq!(project_as(&erp, Profile::Extended).seller_order.unwrap().id, "SO-1");
        assert!(project_as(&erp, Profile::En16931).seller_order.is_none());

        erp.items[1].sales_order = Some(LinkedDocument::new("SO-2", None));
        assert!(project_as(&erp, Profile::Extended).seller_order.is_none());
    }

    #[test]
    fn skonto_text_for_xrechnung() {
        let mut erp = erp_invoice();
        erp.payment_schedule = vec![PaymentScheduleRow {
            due_date: Some(date(2024, 7, 15)),
            description: Some("Zahlbar #sofort".into()),
            payment_amount: erp.outstanding_amount,
            mode_of_payment: None,
            discount_type: Some(DiscountType::Percentage),
            discount: Some(dec!(2)),
            discount_date: Some(date(2024, 6, 29)),
        }];
        let inv = project_as(&erp, Profile::XRechnung);
        assert_eq!(
            inv.payment_terms[0].description.as_deref(),
            Some("Zahlbar //sofort\n#SKONTO#TAGE=14#PROZENT=2.00#\n")
        );
        assert!(inv.payment_terms[0].discount.is_none());
        assert!(inv.payment_terms[0].partial_amount.is_none());

        let inv = project_as(&erp, Profile::Extended);
        let discount = inv.payment_terms[0].discount.as_ref().unwrap();
        assert_eq!(discount.percent, Some(dec!(2)));
        assert_eq!(discount.basis_date, Some(date(2024, 6, 29)));
        assert_eq!(inv.payment_terms[0].description.as_deref(), Some("Zahlbar #sofort"));
    }

    #[test]
    fn skonto_basis_amount_when_partial() {
        assert_eq!(
            skonto_line(10, dec!(3), Some(dec!(500))),
            "#SKONTO#TAGE=10#PROZENT=3.00#BASISBETRAG=500.00#"
        );
    }

    #[test]
    fn partial_amounts_with_several_rows() {
        let mut erp = erp_invoice();
        let row = |amount, day| PaymentScheduleRow {
            due_date: Some(date(2024, 7, day)),
            description: None,
            payment_amount: amount,
            mode_of_payment: None,
            discount_type: None,
            discount: None,
            discount_date: None,
        };
        erp.payment_schedule = vec![row(dec!(100), 1), row(dec!(138), 15)];
        let inv = project_as(&erp, Profile::En16931);
        assert_eq!(inv.payment_terms.len(), 2);
        assert_eq!(inv.payment_terms[1].partial_amount, Some(dec!(138)));
        assert_eq!(inv.due_date, None);
    }

    #[test]
    fn payment_means_and_bank() {
        let mut erp = erp_invoice();
        erp.payment_schedule = vec![PaymentScheduleRow {
            due_date: Some(date(2024, 7, 1)),
            description: None,
            payment_amount: erp.outstanding_amount,
            mode_of_payment: Some(ModeOfPayment {
                name: "Überweisung".into(),
                bank_account: Some(BankAccount {
                    iban: "DE02120300000000202051".into(),
                    bic: Some("BYLADEM1001".into()),
                }),
            }),
            discount_type: None,
            discount: None,
            discount_date: None,
        }];
        let pm = project_as(&erp, Profile::En16931).payment_means.unwrap();
        assert_eq!(pm.type_code, "58");
        assert_eq!(pm.iban.as_deref(), Some("DE02120300000000202051"));
        assert_eq!(pm.account_name.as_deref(), Some("ACME GmbH"));
        assert_eq!(pm.bic.as_deref(), Some("BYLADEM1001"));

        let pm = project_as(&erp, Profile::Basic).payment_means.unwrap();
        assert!(pm.bic.is_none() && pm.account_name.is_none());
    }

    #[test]
    fn totals_follow_erp() {
        let mut erp = erp_invoice();
        let t = project_as(&erp, Profile::En16931).totals;
        assert_eq!(t.line_total, dec!(200));
        assert_eq!(t.tax_total, dec!(38));
        assert_eq!(t.grand_total, dec!(238));
        assert_eq!(t.prepaid, Decimal::ZERO);
        assert_eq!(t.due_payable, dec!(238));

        erp.outstanding_amount = Decimal::ZERO;
        let t = project_as(&erp, Profile::En16931).totals;
        assert_eq!(t.prepaid, dec!(238));
    }

    #[test]
    fn notices_for_dropped_data() {
        let mut erp = erp_invoice();
        erp.discount_amount = dec!(5);
        let p = project(&erp, Profile::En16931, &resolver()).unwrap();
        assert_eq!(p.notices.len(), 1);
        assert!(!p.notices[0].is_error());
    }
}
