use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{AcquisitionMode, ApprovalStatus, OrderStatus};

/// The `kiosk_orders` table: one row per procurement request.
///
/// The five approval/procurement steps each carry their own nullable
/// completion timestamp and actor. They are deliberately independent of each
/// other and of `current_step`: a later step's fields may be populated while
/// an earlier step is still open, and completing a step does not advance the
/// counter.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "kiosk_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Immutable, date-prefixed sequence (`PO-YYYYMMDD-NNN`), assigned at
    /// creation. Synthetic assets reference the order through this value.
    #[sea_orm(unique)]
    pub process_number: String,

    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    pub requester_name: Option<String>,

    /// Owning partner reference; an order cannot exist without one.
    pub partner_id: Uuid,

    /// Denormalized total unit count; equals the sum of ledger item
    /// kiosk counts after every successful write that carries items.
    pub quantity: i32,

    /// Caller-advanced step counter, 1-5.
    pub current_step: i16,

    pub status: OrderStatus,

    // Step 1: sourcing / acquisition terms.
    pub acquisition_mode: AcquisitionMode,
    pub lease_company_id: Option<Uuid>,
    pub lease_monthly_fee: Option<Decimal>,
    pub lease_period_months: Option<i32>,
    pub step1_completed_at: Option<DateTime<Utc>>,
    pub step1_completed_by: Option<String>,

    // Step 2: internal paperwork.
    pub document_url: Option<String>,
    pub document_number: Option<String>,
    pub step2_completed_at: Option<DateTime<Utc>>,
    pub step2_completed_by: Option<String>,

    // Step 3: approval submission.
    pub approval_request_id: Option<String>,
    pub approval_title: Option<String>,
    pub step3_completed_at: Option<DateTime<Utc>>,
    pub step3_completed_by: Option<String>,

    // Step 4: approval outcome. `approval_date` is server-stamped when the
    // status transitions to Approved.
    pub approval_status: Option<ApprovalStatus>,
    pub approval_date: Option<DateTime<Utc>>,
    pub approval_comment: Option<String>,
    pub step4_completed_at: Option<DateTime<Utc>>,
    pub step4_completed_by: Option<String>,

    // Step 5: vendor dispatch.
    pub vendor_order_sent: bool,
    pub vendor_email: Option<String>,
    pub notify_slack: bool,
    pub notify_email: bool,
    pub step5_completed_at: Option<DateTime<Utc>>,
    pub step5_completed_by: Option<String>,

    /// Opaque dual-format ledger text: line items plus pricing metadata.
    /// Decoded/encoded exclusively through `crate::ledger`.
    #[sea_orm(column_type = "Text")]
    pub ledger: String,

    pub desired_delivery_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,

    /// External calendar event tracking the desired delivery date, when one
    /// was successfully created.
    pub calendar_event_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::partner::Entity",
        from = "Column::PartnerId",
        to = "super::partner::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    Partner,
}

impl Related<super::partner::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Partner.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
