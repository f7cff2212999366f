//! Sign normalization for invoice lines.
//!
//! BR-27 forbids negative net prices, while ERPs store returns and rebates
//! as a positive quantity at a negative rate. Such lines are flipped to a
//! negative quantity at a positive price; the line total stays the same.

use rust_decimal::Decimal;

use crate::core::LineItem;

/// Normalize the signs of all lines in place.
///
/// Idempotent: a normalized line is left untouched.
pub fn normalize(lines: &mut [LineItem]) {
    for line in lines {
        normalize_line(line);
    }
}

/// Normalize a single line.
///
/// * price < 0, quantity > 0: both flip, the quantity carries the sign.
/// * price < 0, quantity < 0: both flip, the product is positive anyway.
/// * price < 0, quantity = 0: only the price flips, the total is zero.
/// * anything else is already valid.
pub fn normalize_line(line: &mut LineItem) {
    if line.net_price < Decimal::ZERO {
        line.net_price = -line.net_price;
        if !line.quantity.is_zero() {
            line.quantity = -line.quantity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LineItemBuilder;
    use rust_decimal_macros::dec;

    fn line(qty: Decimal, price: Decimal) -> LineItem {
        LineItemBuilder::new("1", "x", qty, "C62", price).build()
    }

    #[test]
    fn negative_price_moves_to_quantity() {
        let mut lines = vec![line(dec!(2), dec!(-10))];
        normalize(&mut lines);
        assert_eq!(lines[0].quantity, dec!(-2));
        assert_eq!(lines[0].net_price, dec!(10));
        assert_eq!(lines[0].line_total, dec!(-20));
    }

    #[test]
    fn both_negative_become_positive() {
        let mut l = line(dec!(-3), dec!(-5));
        normalize_line(&mut l);
        assert_eq!((l.quantity, l.net_price), (dec!(3), dec!(5)));
        assert_eq!(l.line_total, dec!(15));
    }

    #[test]
    fn valid_lines_untouched() {
        for (q, p) in [
            (dec!(2), dec!(10)),
            (dec!(-2), dec!(10)),
            (dec!(0), dec!(10)),
            (dec!(4), dec!(0)),
        ] {
            let mut l = line(q, p);
            normalize_line(&mut l);
            assert_eq!((l.quantity, l.net_price), (q, p));
        }
    }

    #[test]
    fn zero_quantity_only_flips_price() {
        let mut l = line(dec!(0), dec!(-10));
        normalize_line(&mut l);
        assert_eq!(l.net_price, dec!(10));
        assert!(!l.quantity.is_sign_negative());
        assert_eq!(l.line_total, Decimal::ZERO);
    }
}
