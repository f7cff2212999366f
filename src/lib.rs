//! # erechnung
//!
//! Converts ERP sales invoices into UN/CEFACT Cross Industry Invoice (CII)
//! documents for the BASIC, EN 16931, EXTENDED and XRechnung profiles, embeds
//! them into ZUGFeRD / Factur-X PDFs, and reads received e-invoices back into
//! the same canonical model.
//!
//! All monetary values use [`rust_decimal::Decimal`], never floating point.
//! The canonical types follow the EN 16931 semantic model.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use erechnung::core::*;
//! use rust_decimal_macros::dec;
//!
//! let invoice = InvoiceBuilder::new("RE-2024-001", NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
//!     .seller(PartyBuilder::new("ACME GmbH")
//!         .address(AddressBuilder::new("DE").city("Berlin").postcode("10115").build())
//!         .tax_id("DE123456789")
//!         .build())
//!     .buyer(PartyBuilder::new("Kunde AG")
//!         .address(AddressBuilder::new("DE").city("München").build())
//!         .build())
//!     .add_line(LineItemBuilder::new("1", "Beratung", dec!(10), "HUR", dec!(150))
//!         .tax(TaxCategory::StandardRate, dec!(19))
//!         .build())
//!     .build()
//!     .unwrap();
//!
//! assert!(check_invariants(&invoice).is_empty());
//! assert_eq!(invoice.totals.grand_total, dec!(1785.00));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` (default) | Canonical model, code lists, ERP projection, normalization, tax aggregation, import reconciliation, settings |
//! | `cii` | CII XML writer and reader, schematron validation, generation/import pipeline |
//! | `zugferd` | PDF/A-3 embedding and extraction |
//! | `all` | Everything |

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "core")]
pub mod codes;

#[cfg(feature = "core")]
pub mod erp;

#[cfg(feature = "core")]
pub mod normalize;

#[cfg(feature = "core")]
pub mod reconcile;

#[cfg(feature = "core")]
pub mod settings;

#[cfg(feature = "core")]
pub mod tax;

#[cfg(feature = "cii")]
pub mod cii;

#[cfg(feature = "cii")]
pub mod validate;

#[cfg(feature = "cii")]
pub mod pipeline;

#[cfg(feature = "zugferd")]
pub mod zugferd;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;
