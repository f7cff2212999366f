use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::error::Violation;
use super::types::*;
use super::units::is_known_unit_code;
use crate::codes::is_known_eas_code;

/// Tolerance for amount comparisons (one cent).
pub const AMOUNT_TOLERANCE: Decimal = dec!(0.01);

/// Check the structural invariants of a canonical invoice.
///
/// This is a local sanity pass, not the schematron validation. Returns all
/// findings; warnings flag data that serializes but will likely be rejected.
pub fn check_invariants(invoice: &Invoice) -> Vec<Violation> {
    let mut out = Vec::new();

    // BR-02
    if invoice.number.trim().is_empty() {
        out.push(
            Violation::error("invoice number must not be empty")
                .with_rule("BR-02")
                .at("number"),
        );
    }

    // BR-05
    let currency = &invoice.currency_code;
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        out.push(
            Violation::error(format!(
                "currency code '{currency}' must be three upper-case letters"
            ))
            .with_rule("BR-05")
            .at("currency_code"),
        );
    }

    // BR-29
    if let Some(Period {
        start: Some(start),
        end: Some(end),
    }) = &invoice.billing_period
    {
        if end < start {
            out.push(
                Violation::error(format!("billing period ends ({end}) before it starts ({start})"))
                    .with_rule("BR-29")
                    .at("billing_period"),
            );
        }
    }

    check_party(&invoice.seller, "seller", "BR-06", &mut out);
    check_party(&invoice.buyer, "buyer", "BR-07", &mut out);

    // BR-16
    if invoice.lines.is_empty() {
        out.push(
            Violation::error("an invoice needs at least one line")
                .with_rule("BR-16")
                .at("lines"),
        );
    }

    for (i, line) in invoice.lines.iter().enumerate() {
        let loc = format!("lines[{i}]");

        // BR-27
        if line.net_price < Decimal::ZERO {
            out.push(
                Violation::error("net price must not be negative")
                    .with_rule("BR-27")
                    .at(format!("{loc}.net_price")),
            );
        }
        if line.quantity < Decimal::ZERO && line.net_price < Decimal::ZERO {
            out.push(
                Violation::error("quantity and price are both negative")
                    .at(format!("{loc}.quantity")),
            );
        }

        let expected = line.quantity * line.net_price;
        if (expected - line.line_total).abs() > AMOUNT_TOLERANCE {
            out.push(
                Violation::error(format!(
                    "line total {} does not match quantity * price = {expected}",
                    line.line_total
                ))
                .at(format!("{loc}.line_total")),
            );
        }

        if !is_known_unit_code(&line.unit_code) {
            out.push(
                Violation::warning(format!("unit code '{}' is not a known code", line.unit_code))
                    .at(format!("{loc}.unit_code")),
            );
        }

        if line.tax.category.forces_zero_rate() && !line.tax.rate.is_zero() {
            out.push(
                Violation::error(format!(
                    "category {} requires a zero rate, got {}",
                    line.tax.category.code(),
                    line.tax.rate
                ))
                .at(format!("{loc}.tax.rate")),
            );
        }
    }

    for (i, row) in invoice.tax_summary.iter().enumerate() {
        let deviation = (row.expected_amount() - row.calculated_amount).abs();
        if deviation > AMOUNT_TOLERANCE {
            out.push(
                Violation::warning(format!(
                    "calculated amount {} deviates from basis * rate by {deviation}",
                    row.calculated_amount
                ))
                .with_rule("BR-CO-17")
                .at(format!("tax_summary[{i}]")),
            );
        }
    }

    out
}

fn check_party(party: &Party, prefix: &str, name_rule: &str, out: &mut Vec<Violation>) {
    if party.name.trim().is_empty() {
        out.push(
            Violation::error(format!("{prefix} name must not be empty"))
                .with_rule(name_rule)
                .at(format!("{prefix}.name")),
        );
    }

    if let Some(address) = &party.address {
        let cc = &address.country_code;
        if cc.len() != 2 || !cc.chars().all(|c| c.is_ascii_uppercase()) {
            out.push(
                Violation::error(format!("country code '{cc}' must be two upper-case letters"))
                    .at(format!("{prefix}.address.country_code")),
            );
        }
    }

    if let Some(ea) = &party.electronic_address {
        if !is_known_eas_code(&ea.scheme) {
            out.push(
                Violation::warning(format!("electronic address scheme '{}' is unknown", ea.scheme))
                    .at(format!("{prefix}.electronic_address.scheme")),
            );
        }
    }
}
