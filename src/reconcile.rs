//! Links an imported invoice to the buyer's own records.
//!
//! Received invoices speak the seller's language: seller product ids, UN/ECE
//! unit codes, the seller's tax id. [`reconcile`] maps these onto known
//! suppliers, items, units and purchase order lines. It only ever fills
//! gaps; values already present on a [`ReconciledLine`] are kept, so
//! [`ReconciledImport::refresh`] can be run again after manual edits.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codes::{CodeListResolver, Concept, EntityKind, ReverseResolution};
use crate::core::*;

/// An open purchase order of the buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: String,
    pub lines: Vec<PurchaseOrderLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub id: String,
    pub item_code: String,
    pub uom: Option<String>,
    /// Ordered amount minus what has already been billed.
    pub unbilled_amount: Decimal,
}

/// An item known to the buyer's ERP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub code: String,
    pub stock_uom: Option<String>,
    pub purchase_uom: Option<String>,
}

/// A supplier known to the buyer's ERP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownSupplier {
    pub id: String,
    pub name: String,
    pub tax_id: Option<String>,
}

/// Items, supplier part numbers, suppliers and open purchase orders to
/// match against.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    items: HashMap<String, CatalogItem>,
    /// (supplier, supplier part number) to item code.
    supplier_parts: HashMap<(String, String), String>,
    suppliers: Vec<KnownSupplier>,
    purchase_orders: HashMap<String, PurchaseOrder>,
}

impl ItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, item: CatalogItem) -> &mut Self {
        self.items.insert(item.code.clone(), item);
        self
    }

    pub fn add_supplier_part(
        &mut self,
        supplier: impl Into<String>,
        part_no: impl Into<String>,
        item_code: impl Into<String>,
    ) -> &mut Self {
        self.supplier_parts
            .insert((supplier.into(), part_no.into()), item_code.into());
        self
    }

    pub fn add_supplier(&mut self, supplier: KnownSupplier) -> &mut Self {
        self.suppliers.push(supplier);
        self
    }

    pub fn add_purchase_order(&mut self, order: PurchaseOrder) -> &mut Self {
        self.purchase_orders.insert(order.id.clone(), order);
        self
    }

    pub fn item(&self, code: &str) -> Option<&CatalogItem> {
        self.items.get(code)
    }

    pub fn purchase_order(&self, id: &str) -> Option<&PurchaseOrder> {
        self.purchase_orders.get(id)
    }

    fn item_for_part(&self, supplier: &str, part_no: &str) -> Option<&str> {
        self.supplier_parts
            .get(&(supplier.to_string(), part_no.to_string()))
            .map(String::as_str)
    }

    /// The seller's tax id beats a name match.
    fn find_supplier(&self, seller: &Party) -> Option<&str> {
        let tax_id = seller.tax_registration.as_ref().map(|t| t.id.as_str());
        if let Some(tax_id) = tax_id {
            if let Some(s) = self
                .suppliers
                .iter()
                .find(|s| s.tax_id.as_deref() == Some(tax_id))
            {
                return Some(s.id.as_str());
            }
        }
        self.suppliers
            .iter()
            .find(|s| s.name == seller.name || s.id == seller.name)
            .map(|s| s.id.as_str())
    }
}

/// Lookup sources for one reconciliation run.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext<'a> {
    pub catalog: &'a ItemCatalog,
    pub resolver: &'a CodeListResolver,
    /// The purchase order the invoice bills. When `None`, the buyer order
    /// reference (BT-13) is looked up in the catalog.
    pub purchase_order: Option<&'a PurchaseOrder>,
}

/// Buyer-side assignment for one imported line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledLine {
    pub item_code: Option<String>,
    pub uom: Option<String>,
    /// Unit code no unit record maps to yet.
    pub unknown_unit_code: Option<String>,
    /// Matched purchase order line.
    pub order_line: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkageStatus {
    /// Every line has an item (and an order line when a purchase order is given).
    Full,
    Partial,
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledImport {
    pub invoice: Invoice,
    pub supplier: Option<String>,
    pub purchase_order: Option<String>,
    /// Parallel to `invoice.lines`.
    pub lines: Vec<ReconciledLine>,
    pub status: LinkageStatus,
}

/// Match an imported invoice against the buyer's records.
pub fn reconcile(invoice: Invoice, ctx: &ReconcileContext<'_>) -> ReconciledImport {
    let lines = vec![ReconciledLine::default(); invoice.lines.len()];
    let mut import = ReconciledImport {
        invoice,
        supplier: None,
        purchase_order: None,
        lines,
        status: LinkageStatus::Unmatched,
    };
    import.refresh(ctx);
    import
}

impl ReconciledImport {
    /// Fill whatever is still missing. Existing assignments are kept.
    pub fn refresh(&mut self, ctx: &ReconcileContext<'_>) {
        self.lines
            .resize_with(self.invoice.lines.len(), ReconciledLine::default);

        if self.supplier.is_none() {
            self.supplier = ctx
                .catalog
                .find_supplier(&self.invoice.seller)
                .map(str::to_string);
        }

        for (line, rec) in self.invoice.lines.iter().zip(self.lines.iter_mut()) {
            if rec.item_code.is_none() {
                rec.item_code = guess_item_code(line, self.supplier.as_deref(), ctx.catalog);
            }
            if rec.uom.is_none() {
                guess_uom(line, rec, ctx);
            }
        }

        let order = ctx.purchase_order.or_else(|| {
            let reference = &self.invoice.buyer_order.as_ref()?.id;
            let found = ctx.catalog.purchase_order(reference);
            if found.is_none() {
                debug!(order = %reference, "referenced purchase order is not known");
            }
            found
        });

        match order {
            Some(po) => {
                self.purchase_order = Some(po.id.clone());
                match_order_lines(&self.invoice.lines, &mut self.lines, po);
            }
            None => {
                self.purchase_order = None;
                for rec in &mut self.lines {
                    rec.order_line = None;
                }
            }
        }

        self.status = self.linkage(order.is_some());
        info!(
            invoice = %self.invoice.number,
            supplier = ?self.supplier,
            status = ?self.status,
            "import reconciled"
        );
    }

    fn linkage(&self, with_order: bool) -> LinkageStatus {
        let linked = self
            .lines
            .iter()
            .filter(|r| r.item_code.is_some() && (!with_order || r.order_line.is_some()))
            .count();
        match linked {
            0 => LinkageStatus::Unmatched,
            n if n == self.lines.len() => LinkageStatus::Full,
            _ => LinkageStatus::Partial,
        }
    }
}

fn guess_item_code(line: &LineItem, supplier: Option<&str>, catalog: &ItemCatalog) -> Option<String> {
    if let Some(code) = line.buyer_product_id.as_deref() {
        if catalog.item(code).is_some() {
            return Some(code.to_string());
        }
        debug!(line = %line.id, code, "buyer product id is not a known item");
    }

    let supplier = supplier?;
    let part_no = line.seller_product_id.as_deref()?;
    catalog.item_for_part(supplier, part_no).map(str::to_string)
}

/// Unit code reverse lookup, then the item's purchase or stock unit.
/// The order line unit is applied during order matching.
fn guess_uom(line: &LineItem, rec: &mut ReconciledLine, ctx: &ReconcileContext<'_>) {
    if !line.unit_code.is_empty() {
        match ctx
            .resolver
            .reverse(Concept::UnitOfMeasure, EntityKind::Uom, &line.unit_code)
        {
            ReverseResolution::Existing(entity) => {
                rec.uom = Some(entity.name);
                rec.unknown_unit_code = None;
                return;
            }
            ReverseResolution::Placeholder { code } => {
                debug!(line = %line.id, unit = %code, "no unit maps to the unit code");
                rec.unknown_unit_code = Some(code);
            }
        }
    }

    if let Some(item) = rec.item_code.as_deref().and_then(|c| ctx.catalog.item(c)) {
        rec.uom = item.purchase_uom.clone().or_else(|| item.stock_uom.clone());
    }
}

/// Each order line can absorb invoice lines up to its unbilled amount.
/// Item code matches are tried first, then the line at the same position.
fn match_order_lines(lines: &[LineItem], recs: &mut [ReconciledLine], po: &PurchaseOrder) {
    let mut unbilled: Vec<Decimal> = po.lines.iter().map(|l| l.unbilled_amount).collect();

    // Keep assignments that still point into this order.
    for (line, rec) in lines.iter().zip(recs.iter_mut()) {
        let Some(id) = rec.order_line.as_deref() else {
            continue;
        };
        match po.lines.iter().position(|l| l.id == id) {
            Some(idx) => unbilled[idx] -= line.line_total,
            None => rec.order_line = None,
        }
    }

    for (pos, (line, rec)) in lines.iter().zip(recs.iter_mut()).enumerate() {
        if rec.order_line.is_some() {
            continue;
        }

        let by_item = rec.item_code.as_deref().and_then(|code| {
            po.lines
                .iter()
                .enumerate()
                .position(|(i, l)| l.item_code == code && unbilled[i] >= line.line_total)
        });
        let by_position = || {
            (rec.item_code.is_none()
                && po.lines.get(pos).is_some()
                && unbilled[pos] >= line.line_total)
                .then_some(pos)
        };

        let Some(idx) = by_item.or_else(by_position) else {
            debug!(line = %line.id, order = %po.id, "no open order line matches");
            continue;
        };

        let order_line = &po.lines[idx];
        unbilled[idx] -= line.line_total;
        rec.order_line = Some(order_line.id.clone());
        if rec.item_code.is_none() {
            rec.item_code = Some(order_line.item_code.clone());
        }
        if rec.uom.is_none() {
            rec.uom = order_line.uom.clone();
        }
    }
}
