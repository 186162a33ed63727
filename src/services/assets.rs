use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::synthetic_asset::{self, Entity as AssetEntity},
    errors::ServiceError,
    ledger::LedgerItem,
};

/// Memo tag linking an asset to its order.
pub fn order_tag(process_number: &str) -> String {
    format!("order:{process_number}")
}

/// Builds the temporary placeholder serial for one unit. Deterministic from
/// its inputs so concurrent retries of the same creation cannot mint two
/// different serials for the same unit, and `TMP-`-prefixed so placeholders
/// are never mistaken for real hardware serials.
pub fn placeholder_serial(
    process_number: &str,
    item_index: usize,
    unit_index: i32,
    created_at: DateTime<Utc>,
) -> String {
    format!(
        "TMP-{process_number}-{item_index:02}{unit_index:03}-{}",
        created_at.timestamp_millis()
    )
}

/// Manages the placeholder inventory records generated for an order.
///
/// Creation happens inside the order-creation transaction; deletion inside
/// the order-deletion transaction. Order updates intentionally do not touch
/// existing assets.
#[derive(Clone)]
pub struct SyntheticAssetService {
    db: Arc<DbPool>,
}

impl SyntheticAssetService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Creates one asset per unit: for each item, `kiosk_count` rows tagged
    /// with the order's process number, batch-inserted per item.
    #[instrument(skip(self, conn, items), fields(process_number = %process_number))]
    pub async fn create_for_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        process_number: &str,
        items: &[LedgerItem],
        created_at: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let tag = order_tag(process_number);
        let mut created = 0u64;

        for (item_index, item) in items.iter().enumerate() {
            let batch: Vec<synthetic_asset::ActiveModel> = (0..item.kiosk_count)
                .map(|unit_index| synthetic_asset::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    serial: Set(placeholder_serial(
                        process_number,
                        item_index,
                        unit_index,
                        created_at,
                    )),
                    branch_id: Set(item.branch_id),
                    memo: Set(tag.clone()),
                    created_at: Set(created_at),
                })
                .collect();

            if batch.is_empty() {
                continue;
            }
            created += batch.len() as u64;
            AssetEntity::insert_many(batch).exec(conn).await?;
        }

        info!(process_number, created, "synthetic assets created");
        Ok(created)
    }

    /// All assets tagged to the order, oldest first (creation order, which
    /// reconstruction relies on for stable grouping).
    pub async fn find_for_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        process_number: &str,
    ) -> Result<Vec<synthetic_asset::Model>, ServiceError> {
        use sea_orm::QueryOrder;
        Ok(AssetEntity::find()
            .filter(synthetic_asset::Column::Memo.eq(order_tag(process_number)))
            .order_by_asc(synthetic_asset::Column::Serial)
            .all(conn)
            .await?)
    }

    pub async fn count_for_order(&self, process_number: &str) -> Result<u64, ServiceError> {
        Ok(AssetEntity::find()
            .filter(synthetic_asset::Column::Memo.eq(order_tag(process_number)))
            .count(&*self.db)
            .await?)
    }

    /// Deletes every asset tagged to the order; returns the count removed.
    #[instrument(skip(self, conn), fields(process_number = %process_number))]
    pub async fn delete_for_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        process_number: &str,
    ) -> Result<u64, ServiceError> {
        let result = AssetEntity::delete_many()
            .filter(synthetic_asset::Column::Memo.eq(order_tag(process_number)))
            .exec(conn)
            .await?;
        info!(
            process_number,
            deleted = result.rows_affected,
            "synthetic assets deleted"
        );
        Ok(result.rows_affected)
    }
}
