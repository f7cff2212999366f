//! Code list resolution between ERP records and standardized codes.
//!
//! A [`CodeListResolver`] holds a mapping table of
//! `(code list, ERP entity, code)` rows. Forward lookups walk an ordered list
//! of candidate entities, most specific first, and return the first hit:
//!
//! ```
//! use erechnung::codes::*;
//!
//! let resolver = CodeListResolver::new();
//! resolver.insert(CodeList::Untdid5305, EntityRef::tax_category("Inland"), "S");
//! resolver.insert(CodeList::Untdid5305, EntityRef::sales_taxes_template("EU"), "K");
//!
//! let resolution = resolver.resolve(
//!     Concept::TaxCategory,
//!     &[
//!         EntityRef::item_tax_template("Books 7%"),
//!         EntityRef::tax_category("Inland"),
//!         EntityRef::sales_taxes_template("EU"),
//!     ],
//! );
//! assert_eq!(resolution.code(), Some("S"));
//! ```
//!
//! Reads and writes go through an `RwLock`, so a resolver can be shared
//! across worker threads while the table is only updated between batches.

mod eas;

pub use eas::is_known_eas_code;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{EInvoiceError, Result};

/// A standardized code list, identified by its XÖV/KoSIT URN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeList {
    /// UN/ECE Recommendation 20 units of measure.
    Rec20,
    /// UN/ECE Recommendation 21 package codes.
    Rec21,
    /// UNTDID 4461 payment means.
    Untdid4461,
    /// UNTDID 5305 duty/tax/fee category.
    Untdid5305,
    /// VATEX exemption reasons.
    Vatex,
    /// Electronic address schemes.
    Eas,
}

impl CodeList {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Rec20 => "urn:xoev-de:kosit:codeliste:rec20_3",
            Self::Rec21 => "urn:xoev-de:kosit:codeliste:rec21_3",
            Self::Untdid4461 => "urn:xoev-de:xrechnung:codeliste:untdid.4461_3",
            Self::Untdid5305 => "urn:xoev-de:kosit:codeliste:untdid.5305_3",
            Self::Vatex => "urn:xoev-de:kosit:codeliste:vatex_1",
            Self::Eas => "urn:xoev-de:kosit:codeliste:eas_5",
        }
    }
}

/// What is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Concept {
    UnitOfMeasure,
    PaymentMeans,
    TaxCategory,
    VatExemptionReason,
    ElectronicAddressScheme,
}

impl Concept {
    /// Code lists searched for this concept, in order.
    pub fn code_lists(&self) -> &'static [CodeList] {
        match self {
            Self::UnitOfMeasure => &[CodeList::Rec20, CodeList::Rec21],
            Self::PaymentMeans => &[CodeList::Untdid4461],
            Self::TaxCategory => &[CodeList::Untdid5305],
            Self::VatExemptionReason => &[CodeList::Vatex],
            Self::ElectronicAddressScheme => &[CodeList::Eas],
        }
    }

    /// Code used when neither a mapping nor a list default exists.
    pub fn fallback_code(&self) -> Option<&'static str> {
        match self {
            Self::UnitOfMeasure => Some("C62"),
            Self::PaymentMeans => Some("ZZZ"),
            Self::TaxCategory => Some("S"),
            Self::VatExemptionReason => Some("vatex-eu-ae"),
            Self::ElectronicAddressScheme => None,
        }
    }
}

impl std::fmt::Display for Concept {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::UnitOfMeasure => "unit of measure",
            Self::PaymentMeans => "payment means",
            Self::TaxCategory => "tax category",
            Self::VatExemptionReason => "VAT exemption reason",
            Self::ElectronicAddressScheme => "electronic address scheme",
        })
    }
}

/// Kind of ERP record a mapping is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Uom,
    ItemTaxTemplate,
    Account,
    TaxCategory,
    SalesTaxesTemplate,
    PaymentTermsTemplate,
    ModeOfPayment,
    /// A stored electronic address scheme record.
    AddressScheme,
}

/// Reference to one ERP record, e.g. the tax category "Inland".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn uom(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Uom, name)
    }

    pub fn item_tax_template(name: impl Into<String>) -> Self {
        Self::new(EntityKind::ItemTaxTemplate, name)
    }

    pub fn account(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Account, name)
    }

    pub fn tax_category(name: impl Into<String>) -> Self {
        Self::new(EntityKind::TaxCategory, name)
    }

    pub fn sales_taxes_template(name: impl Into<String>) -> Self {
        Self::new(EntityKind::SalesTaxesTemplate, name)
    }

    pub fn payment_terms_template(name: impl Into<String>) -> Self {
        Self::new(EntityKind::PaymentTermsTemplate, name)
    }

    pub fn mode_of_payment(name: impl Into<String>) -> Self {
        Self::new(EntityKind::ModeOfPayment, name)
    }

    pub fn address_scheme(name: impl Into<String>) -> Self {
        Self::new(EntityKind::AddressScheme, name)
    }

    /// Optional ERP link: `None` and blank names are skipped as candidates.
    pub fn maybe(kind: EntityKind, name: Option<&str>) -> Option<Self> {
        name.filter(|n| !n.trim().is_empty())
            .map(|n| Self::new(kind, n))
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} '{}'", self.kind, self.name)
    }
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMapping {
    pub list: CodeList,
    pub entity: EntityRef,
    pub code: String,
}

/// Mapping rows plus per-list default codes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingTable {
    pub mappings: Vec<CodeMapping>,
    pub defaults: HashMap<CodeList, String>,
}

/// Result of a forward lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A candidate entity has a mapping.
    Mapped { code: String, entity: EntityRef },
    /// No candidate matched; the code list's configured default applies.
    ListDefault { code: String, list: CodeList },
    /// Nothing matched and no list default is configured.
    Unresolved,
}

impl Resolution {
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Mapped { code, .. } | Self::ListDefault { code, .. } => Some(code),
            Self::Unresolved => None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped { .. })
    }
}

/// Result of a reverse lookup (code to ERP record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverseResolution {
    /// An existing ERP record maps to the code.
    Existing(EntityRef),
    /// No record maps to the code; the caller may create one under this name.
    Placeholder { code: String },
}

/// Thread-safe code list resolver.
#[derive(Debug, Default)]
pub struct CodeListResolver {
    table: RwLock<MappingTable>,
}

impl CodeListResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: MappingTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    /// Add or replace the mapping for `(list, entity)`. Returns the previous code.
    pub fn insert(
        &self,
        list: CodeList,
        entity: EntityRef,
        code: impl Into<String>,
    ) -> Option<String> {
        let code = code.into();
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(row) = table
            .mappings
            .iter_mut()
            .find(|m| m.list == list && m.entity == entity)
        {
            return Some(std::mem::replace(&mut row.code, code));
        }
        table.mappings.push(CodeMapping { list, entity, code });
        None
    }

    pub fn set_default(&self, list: CodeList, code: impl Into<String>) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.defaults.insert(list, code.into());
    }

    /// Swap in a complete table at once.
    pub fn replace_table(&self, table: MappingTable) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    pub fn snapshot(&self) -> MappingTable {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve `concept` over `candidates`, most specific first.
    ///
    /// Code lists are searched in [`Concept::code_lists`] order; within a
    /// list the first candidate with a mapping wins. Blank candidate names
    /// are skipped.
    pub fn resolve(&self, concept: Concept, candidates: &[EntityRef]) -> Resolution {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);

        for &list in concept.code_lists() {
            for candidate in candidates {
                if candidate.name.trim().is_empty() {
                    continue;
                }
                if let Some(row) = table
                    .mappings
                    .iter()
                    .find(|m| m.list == list && &m.entity == candidate)
                {
                    return Resolution::Mapped {
                        code: row.code.clone(),
                        entity: candidate.clone(),
                    };
                }
            }
        }

        for &list in concept.code_lists() {
            if let Some(code) = table.defaults.get(&list) {
                debug!(%concept, code = %code, "no mapping matched, using code list default");
                return Resolution::ListDefault {
                    code: code.clone(),
                    list,
                };
            }
        }

        Resolution::Unresolved
    }

    /// Resolve or fall back to the concept's built-in code.
    ///
    /// Fails with [`EInvoiceError::ResolutionFailure`] only for concepts
    /// without a built-in fallback.
    pub fn require(&self, concept: Concept, candidates: &[EntityRef]) -> Result<String> {
        if let Some(code) = self.resolve(concept, candidates).code() {
            return Ok(code.to_string());
        }
        match concept.fallback_code() {
            Some(code) => {
                debug!(%concept, code, "no mapping or list default, using built-in fallback");
                Ok(code.to_string())
            }
            None => Err(EInvoiceError::ResolutionFailure {
                concept,
                candidates: candidates
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Find the ERP record of `kind` that maps to `code`.
    ///
    /// Lists are searched in [`Concept::code_lists`] order (Rec 20 before
    /// Rec 21 for units). An existing record always wins over a placeholder.
    pub fn reverse(&self, concept: Concept, kind: EntityKind, code: &str) -> ReverseResolution {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        for &list in concept.code_lists() {
            if let Some(row) = table
                .mappings
                .iter()
                .find(|m| m.list == list && m.entity.kind == kind && m.code == code)
            {
                return ReverseResolution::Existing(row.entity.clone());
            }
        }
        ReverseResolution::Placeholder {
            code: code.to_string(),
        }
    }
}
