//! VAT breakdown (BG-23) from the ERP's tax and charge rows.
//!
//! Each ERP row is read according to its charge type:
//!
//! | Charge type | Becomes |
//! |---|---|
//! | Actual | flat service charge, VAT taken from the next row |
//! | On Net Total | VAT row, basis from net total / row net amount / tax ÷ rate |
//! | On Previous Row Amount/Total | VAT (after Actual) or SUR row on the previous row |
//! | On Item Quantity | rejected |
//!
//! Rows whose basis cannot be determined share what is left of the net
//! total. Such rows are tagged [`BasisSource::Approximated`] and carry an
//! [`ApproximationWarning`]; they are never passed off as exact.

use rust_decimal::Decimal;
use tracing::warn;

use crate::codes::{CodeListResolver, Concept, EntityKind, EntityRef};
use crate::core::*;
use crate::erp::{ChargeType, ErpInvoice, ErpTaxRow, tax_category};
use crate::settings::Settings;

/// Document-level inputs for aggregation.
#[derive(Debug, Clone)]
pub struct TaxContext<'a> {
    pub profile: Profile,
    pub net_total: Decimal,
    pub tax_category: Option<&'a str>,
    /// Sales taxes and charges template.
    pub taxes_and_charges: Option<&'a str>,
    pub resolver: &'a CodeListResolver,
    pub tolerance: Decimal,
    pub rounding_scale: u32,
}

impl<'a> TaxContext<'a> {
    pub fn for_invoice(
        erp: &'a ErpInvoice,
        profile: Profile,
        resolver: &'a CodeListResolver,
        settings: &Settings,
    ) -> Self {
        Self {
            profile,
            net_total: erp.net_total,
            tax_category: erp.tax_category.as_deref(),
            taxes_and_charges: erp.taxes_and_charges.as_deref(),
            resolver,
            tolerance: settings.approximation_tolerance,
            rounding_scale: settings.basis_rounding_scale,
        }
    }

    /// Candidates for a row's category: its account, then the document's
    /// tax category and template.
    fn candidates(&self, account: Option<&str>) -> Vec<EntityRef> {
        [
            EntityRef::maybe(EntityKind::Account, account),
            EntityRef::maybe(EntityKind::TaxCategory, self.tax_category),
            EntityRef::maybe(EntityKind::SalesTaxesTemplate, self.taxes_and_charges),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn category(&self, account: Option<&str>) -> Result<TaxCategory> {
        tax_category(
            &self
                .resolver
                .require(Concept::TaxCategory, &self.candidates(account))?,
        )
    }

    fn exemption(&self, account: Option<&str>) -> Result<String> {
        Ok(self
            .resolver
            .require(Concept::VatExemptionReason, &self.candidates(account))?
            .to_uppercase())
    }
}

/// Output of [`aggregate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxAggregation {
    pub summary: Vec<TaxSummary>,
    pub service_charges: Vec<ServiceCharge>,
}

/// Build the VAT breakdown and flat charges from the ERP tax rows.
///
/// Fails with [`EInvoiceError::UnsupportedChargeType`] for "On Item
/// Quantity" rows and previous-row charges without a previous row, and with
/// [`EInvoiceError::ProfileConstraintViolation`] for "Actual" rows under a
/// profile without flat charges.
pub fn aggregate(
    charges: &[ErpTaxRow],
    lines: &[LineItem],
    ctx: &TaxContext<'_>,
) -> Result<TaxAggregation> {
    check_rows(charges, ctx.profile)?;

    let mut out = TaxAggregation::default();
    let mut rows: Vec<TaxSummary> = Vec::with_capacity(charges.len());
    // Summary index and account of each "on net total" row.
    let mut on_net: Vec<(usize, Option<&str>)> = Vec::new();

    for (i, row) in charges.iter().enumerate() {
        match row.charge_type {
            ChargeType::Actual => {
                out.service_charges.push(service_charge(charges, i, ctx)?);
            }
            ChargeType::OnNetTotal => {
                on_net.push((rows.len(), row.account_head.as_deref()));
                rows.push(on_net_total(row, charges.len() == 1, lines, ctx)?);
            }
            ChargeType::OnPreviousRowAmount | ChargeType::OnPreviousRowTotal => {
                let prev = &charges[i - 1];
                let basis = if row.charge_type == ChargeType::OnPreviousRowAmount {
                    prev.tax_amount
                } else {
                    prev.total
                };
                let type_code = if prev.charge_type == ChargeType::Actual {
                    TaxTypeCode::Vat
                } else {
                    TaxTypeCode::Surcharge
                };
                rows.push(summary_row(
                    type_code,
                    ctx.category(row.account_head.as_deref())?,
                    row.rate,
                    Some(basis),
                    row.tax_amount,
                    BasisSource::Direct,
                    row.account_head.as_deref(),
                    ctx,
                )?);
            }
            // rejected by check_rows
            ChargeType::OnItemQuantity => {}
        }
    }

    apportion_unknown_bases(&mut rows, &on_net, ctx)?;

    if rows.is_empty() {
        rows.push(empty_row(ctx)?);
    }

    out.summary = merge(rows);
    for row in &mut out.summary {
        flag_deviation(row, ctx.tolerance);
    }
    Ok(out)
}

fn check_rows(charges: &[ErpTaxRow], profile: Profile) -> Result<()> {
    for (i, row) in charges.iter().enumerate() {
        let unsupported = || EInvoiceError::UnsupportedChargeType {
            row: i + 1,
            charge_type: row.charge_type.label().to_string(),
        };
        match row.charge_type {
            ChargeType::OnItemQuantity => return Err(unsupported()),
            ChargeType::OnPreviousRowAmount | ChargeType::OnPreviousRowTotal if i == 0 => {
                return Err(unsupported());
            }
            ChargeType::Actual
                if profile.capabilities().flat_charges == FlatChargeSyntax::Unsupported =>
            {
                return Err(EInvoiceError::profile(
                    profile,
                    format!(
                        "tax row #{}: the charge type 'Actual' is only supported in EXTENDED and XRECHNUNG",
                        i + 1
                    ),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

/// A flat charge; a following previous-row charge is its VAT.
fn service_charge(charges: &[ErpTaxRow], i: usize, ctx: &TaxContext<'_>) -> Result<ServiceCharge> {
    let row = &charges[i];
    let applied_tax = match charges.get(i + 1) {
        Some(vat) if vat.charge_type.is_previous_row() => Some(AppliedTax {
            category: ctx.category(vat.account_head.as_deref())?,
            rate: vat.rate,
        }),
        _ => None,
    };
    Ok(ServiceCharge {
        description: row.description.clone(),
        amount: row.tax_amount,
        applied_tax,
    })
}

fn on_net_total(
    row: &ErpTaxRow,
    only_row: bool,
    lines: &[LineItem],
    ctx: &TaxContext<'_>,
) -> Result<TaxSummary> {
    let account = row.account_head.as_deref();
    let mut rate = if row.rate.is_zero() {
        row.account_tax_rate.unwrap_or(Decimal::ZERO)
    } else {
        row.rate
    };

    let (basis, source) = if only_row {
        // the single tax applies to everything
        if rate.is_zero() {
            if let [line_rate] = line_rates(lines).as_slice() {
                rate = *line_rate;
            }
        }
        (Some(ctx.net_total), BasisSource::Direct)
    } else if let Some(net) = row.net_amount {
        (Some(net), BasisSource::Direct)
    } else if !rate.is_zero() {
        let derived = row.tax_amount / rate * Decimal::ONE_HUNDRED;
        (
            Some(round_amount(derived, ctx.rounding_scale)),
            BasisSource::Derived,
        )
    } else {
        (None, BasisSource::Approximated)
    };

    summary_row(
        TaxTypeCode::Vat,
        ctx.category(account)?,
        rate,
        basis,
        row.tax_amount,
        source,
        account,
        ctx,
    )
}

#[allow(clippy::too_many_arguments)]
fn summary_row(
    type_code: TaxTypeCode,
    category: TaxCategory,
    rate: Decimal,
    basis: Option<Decimal>,
    calculated: Decimal,
    basis_source: BasisSource,
    account: Option<&str>,
    ctx: &TaxContext<'_>,
) -> Result<TaxSummary> {
    let exemption_reason_code = if rate.is_zero() && basis_source != BasisSource::Approximated {
        Some(ctx.exemption(account)?)
    } else {
        None
    };
    Ok(TaxSummary {
        type_code,
        category,
        rate,
        basis_amount: basis.unwrap_or(Decimal::ZERO),
        calculated_amount: calculated,
        exemption_reason_code,
        basis_source,
        warning: None,
    })
}

/// Distinct rates of lines that are not forced to zero, first seen first.
fn line_rates(lines: &[LineItem]) -> Vec<Decimal> {
    let mut rates: Vec<Decimal> = Vec::new();
    for line in lines {
        if !line.tax.category.forces_zero_rate() && !rates.contains(&line.tax.rate) {
            rates.push(line.tax.rate);
        }
    }
    rates
}

/// Split the part of the net total not covered by known bases across the
/// rows without a basis, weighted by their tax amounts.
///
/// Rows still at a zero rate afterwards are exempt and get the reason code
/// of their account.
fn apportion_unknown_bases(
    rows: &mut [TaxSummary],
    on_net: &[(usize, Option<&str>)],
    ctx: &TaxContext<'_>,
) -> Result<()> {
    let unknown: Vec<(usize, Option<&str>)> = on_net
        .iter()
        .copied()
        .filter(|&(i, _)| rows[i].basis_source == BasisSource::Approximated)
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }

    let known: Decimal = on_net
        .iter()
        .filter(|&&(i, _)| rows[i].basis_source != BasisSource::Approximated)
        .map(|&(i, _)| rows[i].basis_amount)
        .sum();
    let remaining = ctx.net_total - known;
    let weight_total: Decimal = unknown.iter().map(|&(i, _)| rows[i].calculated_amount).sum();
    let count = Decimal::from(unknown.len());

    let mut assigned = Decimal::ZERO;
    for (n, &(i, account)) in unknown.iter().enumerate() {
        let row = &mut rows[i];
        let share = if n + 1 == unknown.len() {
            // the last row takes the rounding remainder
            remaining - assigned
        } else if weight_total.is_zero() {
            round_amount(remaining / count, ctx.rounding_scale)
        } else {
            round_amount(
                remaining * row.calculated_amount / weight_total,
                ctx.rounding_scale,
            )
        };
        assigned += share;

        row.basis_amount = share;
        if row.rate.is_zero() && !share.is_zero() {
            row.rate = round_amount(row.calculated_amount / share * Decimal::ONE_HUNDRED, 2);
        }
        if row.rate.is_zero() && row.exemption_reason_code.is_none() {
            row.exemption_reason_code = Some(ctx.exemption(account)?);
        }

        warn!(
            category = row.category.code(),
            basis = %row.basis_amount,
            rate = %row.rate,
            "tax basis approximated from the net total"
        );
    }
    Ok(())
}

/// The mandatory breakdown row for an invoice without any tax rows.
fn empty_row(ctx: &TaxContext<'_>) -> Result<TaxSummary> {
    Ok(TaxSummary {
        type_code: TaxTypeCode::Vat,
        category: ctx.category(None)?,
        rate: Decimal::ZERO,
        basis_amount: ctx.net_total,
        calculated_amount: Decimal::ZERO,
        exemption_reason_code: Some(ctx.exemption(None)?),
        basis_source: BasisSource::Direct,
        warning: None,
    })
}

/// Merge rows with the same (type, category, rate), keeping first-seen order.
fn merge(rows: Vec<TaxSummary>) -> Vec<TaxSummary> {
    let mut merged: Vec<TaxSummary> = Vec::with_capacity(rows.len());
    for row in rows {
        match merged.iter_mut().find(|m| {
            m.type_code == row.type_code && m.category == row.category && m.rate == row.rate
        }) {
            Some(m) => {
                m.basis_amount += row.basis_amount;
                m.calculated_amount += row.calculated_amount;
                m.basis_source = m.basis_source.max(row.basis_source);
                if m.exemption_reason_code.is_none() {
                    m.exemption_reason_code = row.exemption_reason_code;
                }
            }
            None => merged.push(row),
        }
    }
    merged
}

fn flag_deviation(row: &mut TaxSummary, tolerance: Decimal) {
    let expected = row.expected_amount();
    let deviation = (expected - row.calculated_amount).abs();
    let message = if row.is_approximate() {
        "basis amount apportioned from the invoice net total"
    } else if deviation > tolerance {
        "calculated amount deviates from basis * rate / 100"
    } else {
        return;
    };
    row.warning = Some(ApproximationWarning {
        message: message.to_string(),
        expected_amount: expected,
        deviation,
    });
}
