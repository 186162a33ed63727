use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The `kiosk_assets` table: placeholder inventory records representing
/// ordered-but-not-yet-serialized hardware units.
///
/// There is no foreign key back to the order. The only link is the `memo`
/// tag (`order:{process_number}`), a text convention shared with the
/// hand-maintained parts of the inventory.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "kiosk_assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Temporary placeholder serial (`TMP-...`), globally unique and
    /// visually distinct from real hardware serials.
    #[sea_orm(unique)]
    pub serial: String,

    /// Destination branch, when the originating line item named one.
    pub branch_id: Option<Uuid>,

    /// `order:{process_number}` tag linking the asset to its order.
    pub memo: String,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::branch::Entity",
        from = "Column::BranchId",
        to = "super::branch::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    Branch,
}

impl Related<super::branch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Branch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
