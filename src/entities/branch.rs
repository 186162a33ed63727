use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The `branches` table: a delivery destination belonging to a corporation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "branches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub corporation_id: Option<Uuid>,
    pub name: String,
    /// Preferred over `name` when present.
    pub localized_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::corporation::Entity",
        from = "Column::CorporationId",
        to = "super::corporation::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    Corporation,
    #[sea_orm(has_many = "super::synthetic_asset::Entity")]
    SyntheticAssets,
}

impl Related<super::corporation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Corporation.def()
    }
}

impl Related<super::synthetic_asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyntheticAssets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
