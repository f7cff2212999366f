//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use erechnung::codes::{CodeList, CodeListResolver, EntityRef};
use erechnung::erp::ErpInvoice;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A domestic invoice to a public-sector buyer, as the ERP would export it.
pub fn erp_invoice() -> ErpInvoice {
    serde_json::from_str(include_str!("../fixtures/erp_invoice.json")).unwrap()
}

/// Mappings for every record the fixture refers to.
pub fn resolver() -> CodeListResolver {
    let r = CodeListResolver::new();
    r.insert(CodeList::Rec20, EntityRef::uom("Hour"), "HUR");
    r.insert(CodeList::Rec20, EntityRef::uom("Nos"), "H87");
    r.insert(CodeList::Untdid4461, EntityRef::mode_of_payment("Überweisung"), "58");
    r.insert(CodeList::Eas, EntityRef::address_scheme("Leitweg-ID"), "0204");
    r.insert(
        CodeList::Untdid5305,
        EntityRef::sales_taxes_template("Deutschland Inland"),
        "S",
    );
    r
}
