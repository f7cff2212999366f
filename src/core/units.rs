//! Unit code tables for BT-130.
//!
//! EN 16931 accepts codes from UN/ECE Recommendation 20 (units of measure)
//! and Recommendation 21 (package types, prefixed with `X`). Both tables
//! here are the subsets common in invoicing, not the full lists.

use crate::codes::CodeList;

/// Which recommendation a unit code belongs to, if it is known.
pub fn unit_code_list(code: &str) -> Option<CodeList> {
    if REC20_CODES.binary_search(&code).is_ok() {
        Some(CodeList::Rec20)
    } else if REC21_CODES.binary_search(&code).is_ok() {
        Some(CodeList::Rec21)
    } else {
        None
    }
}

pub fn is_known_unit_code(code: &str) -> bool {
    unit_code_list(code).is_some()
}

/// Sorted for binary search.
static REC20_CODES: &[&str] = &[
    "ANN", // Year
    "C62", // One
    "CMK", // Square centimetre
    "CMT", // Centimetre
    "DAY", // Day
    "DZN", // Dozen
    "E48", // Service unit
    "GRM", // Gram
    "H87", // Piece
    "HUR", // Hour
    "KGM", // Kilogram
    "KMT", // Kilometre
    "KWH", // Kilowatt hour
    "LS",  // Lump sum
    "LTR", // Litre
    "MIN", // Minute
    "MLT", // Millilitre
    "MON", // Month
    "MTK", // Square metre
    "MTQ", // Cubic metre
    "MTR", // Metre
    "NAR", // Number of articles
    "NPR", // Number of pairs
    "P1",  // Percent
    "PR",  // Pair
    "SEC", // Second
    "SET", // Set
    "TNE", // Tonne
    "WEE", // Week
];

/// Sorted for binary search.
static REC21_CODES: &[&str] = &[
    "XBA", // Barrel
    "XBD", // Board
    "XBE", // Bundle
    "XBG", // Bag
    "XBO", // Bottle
    "XBX", // Box
    "XCR", // Crate
    "XCT", // Carton
    "XCX", // Can
    "XPA", // Packet
    "XPK", // Package
    "XPX", // Pallet
    "XRO", // Roll
    "XSA", // Sack
    "XST", // Sheet
    "XTU", // Tube
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recommendations() {
        assert_eq!(unit_code_list("C62"), Some(CodeList::Rec20));
        assert_eq!(unit_code_list("HUR"), Some(CodeList::Rec20));
        assert_eq!(unit_code_list("XBX"), Some(CodeList::Rec21));
        assert_eq!(unit_code_list("PIECE"), None);
        assert!(!is_known_unit_code(""));
    }

    #[test]
    fn tables_are_sorted() {
        for table in [REC20_CODES, REC21_CODES] {
            for window in table.windows(2) {
                assert!(
                    window[0] < window[1],
                    "unit codes not sorted: {} >= {}",
                    window[0],
                    window[1]
                );
            }
        }
    }
}
