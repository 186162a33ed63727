//! Derived order aggregates: monetary totals, item reconstruction for legacy
//! orders, and the representative-item projection.

use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::synthetic_asset;
use crate::ledger::{LedgerItem, LedgerMetadata};
use crate::models::AcquisitionMode;
use crate::services::identity::ResolvedItem;

/// Per-order monetary totals. `None` means "no price data": zero and unset
/// are indistinguishable by design, and callers must not treat 0 as a price.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct OrderTotals {
    pub kiosk_total: Option<Decimal>,
    pub plate_total: Option<Decimal>,
    pub total_amount: Option<Decimal>,
}

/// Computes totals from ledger metadata and the order's own quantity.
///
/// The kiosk total multiplies by the order-level quantity, not the sum of
/// item counts. The two normally agree, but when they diverge the order
/// column wins (denormalization tolerance, not a bug to fix here).
pub fn compute_totals(metadata: &LedgerMetadata, order_quantity: i32) -> OrderTotals {
    let kiosk_total = metadata
        .kiosk_unit_price
        .map(|price| price * Decimal::from(order_quantity));
    let plate_total = metadata
        .plate_unit_price
        .zip(metadata.total_plate_count)
        .map(|(price, count)| price * Decimal::from(count));

    let sum = kiosk_total.unwrap_or_default() + plate_total.unwrap_or_default();
    let total_amount = if sum.is_zero() { None } else { Some(sum) };

    OrderTotals {
        kiosk_total: kiosk_total.filter(|v| !v.is_zero()),
        plate_total: plate_total.filter(|v| !v.is_zero()),
        total_amount,
    }
}

/// Rebuilds item-equivalents for legacy orders that carry no structured
/// items: the order's tagged synthetic assets are grouped by branch, group
/// size becomes the kiosk count, and plate counts stay 0 (they are never
/// recoverable from assets). Groups keep first-seen order.
pub fn reconstruct_items(assets: &[synthetic_asset::Model]) -> Vec<LedgerItem> {
    let mut groups: Vec<(Option<Uuid>, i32)> = Vec::new();
    for asset in assets {
        match groups.iter_mut().find(|(branch, _)| *branch == asset.branch_id) {
            Some((_, count)) => *count += 1,
            None => groups.push((asset.branch_id, 1)),
        }
    }
    groups
        .into_iter()
        .map(|(branch_id, kiosk_count)| LedgerItem::with_branch(branch_id, kiosk_count))
        .collect()
}

/// Single-valued projection of a multi-item order, populated from the first
/// item. Exists purely for consumers that predate multi-item orders and
/// expect one corporation/branch/acquisition per order; new consumers should
/// read the item list instead.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct RepresentativeView {
    pub corporation_id: Option<Uuid>,
    pub corporation_name: Option<String>,
    pub branch_id: Option<Uuid>,
    pub branch_name: Option<String>,
    pub brand_name: Option<String>,
    pub address: Option<String>,
    pub acquisition_mode: Option<AcquisitionMode>,
    pub lease_company_id: Option<Uuid>,
}

/// Projects the representative (first) item. Returns the default (all-None)
/// view for orders with no items at all.
pub fn representative(items: &[ResolvedItem]) -> RepresentativeView {
    match items.first() {
        Some(first) => RepresentativeView {
            corporation_id: first.item.corporation_id,
            corporation_name: first.corporation_display_name.clone(),
            branch_id: first.item.branch_id,
            branch_name: first.branch_display_name.clone(),
            brand_name: first.brand_display_name.clone(),
            address: first.item.address.clone(),
            acquisition_mode: first.item.acquisition_mode,
            lease_company_id: first.item.lease_company_id,
        },
        None => RepresentativeView::default(),
    }
}
