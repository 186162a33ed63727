use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{branch, corporation, lease_company},
    errors::ServiceError,
    ledger::LedgerItem,
};

/// A ledger item with its display names filled in.
///
/// Name preference, per reference kind: the live row's localized name, then
/// its generic name, then whatever inline name the ledger carried, then
/// nothing. Dangling ids (row deleted since the ledger was written) fall
/// through to the inline name without erroring.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ResolvedItem {
    #[serde(flatten)]
    pub item: LedgerItem,
    pub corporation_display_name: Option<String>,
    pub branch_display_name: Option<String>,
    pub lease_company_display_name: Option<String>,
    pub brand_display_name: Option<String>,
}

/// Resolves corporation/branch/lease-company display names for ledger items.
#[derive(Clone)]
pub struct IdentityResolver {
    db: Arc<DbPool>,
}

struct NameRow {
    name: String,
    localized_name: Option<String>,
    franchise_name: Option<String>,
}

impl NameRow {
    fn display(&self) -> String {
        self.localized_name
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }
}

impl IdentityResolver {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Resolves display names for a batch of items with one query per
    /// reference table, keyed by the set of distinct ids.
    pub async fn resolve_items(
        &self,
        items: &[LedgerItem],
    ) -> Result<Vec<ResolvedItem>, ServiceError> {
        self.resolve_items_on(&*self.db, items).await
    }

    /// Same as [`resolve_items`](Self::resolve_items) but on an explicit
    /// connection, so callers inside a transaction see their own writes.
    pub async fn resolve_items_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        items: &[LedgerItem],
    ) -> Result<Vec<ResolvedItem>, ServiceError> {
        let corporation_ids = distinct_ids(items.iter().map(|i| i.corporation_id));
        let branch_ids = distinct_ids(items.iter().map(|i| i.branch_id));
        let lease_ids = distinct_ids(items.iter().map(|i| i.lease_company_id));

        let corporations = load_corporations(conn, &corporation_ids).await?;
        let branches = load_branches(conn, &branch_ids).await?;
        let lease_companies = load_lease_companies(conn, &lease_ids).await?;

        Ok(items
            .iter()
            .map(|item| {
                let corporation = item.corporation_id.and_then(|id| corporations.get(&id));
                let branch = item.branch_id.and_then(|id| branches.get(&id));
                let lease = item.lease_company_id.and_then(|id| lease_companies.get(&id));

                let corporation_display_name = corporation
                    .map(NameRow::display)
                    .or_else(|| item.corporation_name.clone());
                let branch_display_name = branch
                    .map(NameRow::display)
                    .or_else(|| item.branch_name.clone());
                let lease_company_display_name = lease.map(NameRow::display);
                // Brand has no reference of its own: inline name first, then
                // the resolved corporation's franchise link.
                let brand_display_name = item
                    .brand_name
                    .clone()
                    .or_else(|| corporation.and_then(|c| c.franchise_name.clone()));

                ResolvedItem {
                    item: item.clone(),
                    corporation_display_name,
                    branch_display_name,
                    lease_company_display_name,
                    brand_display_name,
                }
            })
            .collect())
    }

    /// Resolves a single branch to its display name and owning corporation,
    /// used when reconstructing items from synthetic assets.
    pub async fn resolve_branch<C: ConnectionTrait>(
        &self,
        conn: &C,
        branch_id: Uuid,
    ) -> Result<Option<(branch::Model, Option<corporation::Model>)>, ServiceError> {
        let Some(branch) = branch::Entity::find_by_id(branch_id).one(conn).await? else {
            return Ok(None);
        };
        let corporation = match branch.corporation_id {
            Some(corp_id) => corporation::Entity::find_by_id(corp_id).one(conn).await?,
            None => None,
        };
        Ok(Some((branch, corporation)))
    }
}

fn distinct_ids(ids: impl Iterator<Item = Option<Uuid>>) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = ids.flatten().collect();
    out.sort_unstable();
    out.dedup();
    out
}

async fn load_corporations<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, NameRow>, ServiceError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = corporation::Entity::find()
        .filter(corporation::Column::Id.is_in(ids.to_vec()))
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                row.id,
                NameRow {
                    name: row.name,
                    localized_name: row.localized_name,
                    franchise_name: row.franchise_name,
                },
            )
        })
        .collect())
}

async fn load_branches<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, NameRow>, ServiceError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = branch::Entity::find()
        .filter(branch::Column::Id.is_in(ids.to_vec()))
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                row.id,
                NameRow {
                    name: row.name,
                    localized_name: row.localized_name,
                    franchise_name: None,
                },
            )
        })
        .collect())
}

async fn load_lease_companies<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, NameRow>, ServiceError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = lease_company::Entity::find()
        .filter(lease_company::Column::Id.is_in(ids.to_vec()))
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                row.id,
                NameRow {
                    name: row.name,
                    localized_name: row.localized_name,
                    franchise_name: None,
                },
            )
        })
        .collect())
}
