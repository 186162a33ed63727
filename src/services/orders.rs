use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, Model as OrderModel},
        partner::Entity as PartnerEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    ledger::{Ledger, LedgerItem, LedgerMetadata},
    models::{AcquisitionMode, ApprovalStatus, OrderStatus},
    patch::Patch,
    services::{
        aggregates::{self, OrderTotals, RepresentativeView},
        assets::SyntheticAssetService,
        calendar::CalendarSync,
        identity::{IdentityResolver, ResolvedItem},
    },
};

/// One delivery destination in a create/replace payload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemInput {
    pub corporation_id: Option<Uuid>,
    pub corporation_name: Option<String>,
    pub branch_id: Option<Uuid>,
    pub branch_name: Option<String>,
    pub brand_name: Option<String>,
    pub postal_code: Option<String>,
    pub address: Option<String>,
    pub contact_phone: Option<String>,
    /// Overrides the order-level acquisition mode for this destination.
    pub acquisition_mode: Option<AcquisitionMode>,
    pub lease_company_id: Option<Uuid>,
    #[serde(default = "default_kiosk_count")]
    #[validate(range(min = 1, message = "kiosk_count must be at least 1"))]
    pub kiosk_count: i32,
    #[serde(default)]
    #[validate(range(min = 0, message = "plate_count cannot be negative"))]
    pub plate_count: i32,
    pub desired_delivery_date: Option<NaiveDate>,
}

fn default_kiosk_count() -> i32 {
    1
}

impl OrderItemInput {
    /// Converts into the persisted ledger form. The lease-company reference
    /// is only kept when the effective acquisition mode calls for one; under
    /// any other mode a supplied reference is silently dropped.
    fn into_ledger_item(self, order_mode: AcquisitionMode) -> LedgerItem {
        let effective_mode = self.acquisition_mode.unwrap_or(order_mode);
        let lease_company_id = if effective_mode.requires_lease_company() {
            self.lease_company_id
        } else {
            if self.lease_company_id.is_some() {
                debug!(mode = %effective_mode, "dropping lease reference under non-lease mode");
            }
            None
        };

        LedgerItem {
            corporation_id: self.corporation_id,
            corporation_name: self.corporation_name,
            branch_id: self.branch_id,
            branch_name: self.branch_name,
            brand_name: self.brand_name,
            postal_code: self.postal_code,
            address: self.address,
            contact_phone: self.contact_phone,
            acquisition_mode: self.acquisition_mode,
            lease_company_id,
            kiosk_count: self.kiosk_count,
            plate_count: self.plate_count,
            desired_delivery_date: self.desired_delivery_date,
        }
    }
}

/// Creation payload. Accepts either the multi-item form (`items`) or the
/// legacy single-item form (top-level `branch_id`/`kiosk_count`/... fields),
/// which is normalized to a one-item list.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    pub requester_name: Option<String>,
    pub partner_id: Uuid,
    pub acquisition_mode: Option<AcquisitionMode>,
    pub lease_company_id: Option<Uuid>,
    pub lease_monthly_fee: Option<Decimal>,
    pub lease_period_months: Option<i32>,
    pub kiosk_unit_price: Option<Decimal>,
    pub plate_unit_price: Option<Decimal>,
    pub total_plate_count: Option<i32>,
    pub order_request_date: Option<String>,
    #[serde(default)]
    pub tax_included: bool,
    pub notes: Option<String>,
    pub desired_delivery_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<OrderItemInput>,

    // Legacy single-item fields, honored only when `items` is empty.
    pub corporation_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub branch_name: Option<String>,
    pub address: Option<String>,
    pub kiosk_count: Option<i32>,
    pub plate_count: Option<i32>,
}

impl CreateOrderRequest {
    /// Normalizes to a non-empty item list, folding the legacy single-item
    /// fields into one entry when no items array was supplied.
    fn normalized_items(&self) -> Result<Vec<OrderItemInput>, ServiceError> {
        if !self.items.is_empty() {
            return Ok(self.items.clone());
        }

        let has_legacy_fields = self.corporation_id.is_some()
            || self.branch_id.is_some()
            || self.branch_name.is_some()
            || self.address.is_some()
            || self.kiosk_count.is_some();
        if !has_legacy_fields {
            return Err(ServiceError::ValidationError(
                "Order requires at least one delivery item".to_string(),
            ));
        }

        Ok(vec![OrderItemInput {
            corporation_id: self.corporation_id,
            corporation_name: None,
            branch_id: self.branch_id,
            branch_name: self.branch_name.clone(),
            brand_name: None,
            postal_code: None,
            address: self.address.clone(),
            contact_phone: None,
            acquisition_mode: None,
            lease_company_id: None,
            kiosk_count: self.kiosk_count.unwrap_or(1),
            plate_count: self.plate_count.unwrap_or(0),
            desired_delivery_date: None,
        }])
    }
}

/// Partial update payload. `Patch` fields distinguish "absent" (leave
/// unchanged) from explicit `null` (clear); plain `Option` fields cover the
/// non-nullable columns where absent and unchanged coincide.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateOrderRequest {
    pub title: Option<String>,
    pub requester_name: Patch<String>,
    pub status: Option<OrderStatus>,
    pub current_step: Option<i16>,

    // Step 1.
    pub acquisition_mode: Option<AcquisitionMode>,
    pub lease_company_id: Patch<Uuid>,
    pub lease_monthly_fee: Patch<Decimal>,
    pub lease_period_months: Patch<i32>,
    pub step1_completed_at: Patch<DateTime<Utc>>,
    pub step1_completed_by: Patch<String>,

    // Step 2.
    pub document_url: Patch<String>,
    pub document_number: Patch<String>,
    pub step2_completed_at: Patch<DateTime<Utc>>,
    pub step2_completed_by: Patch<String>,

    // Step 3.
    pub approval_request_id: Patch<String>,
    pub approval_title: Patch<String>,
    pub step3_completed_at: Patch<DateTime<Utc>>,
    pub step3_completed_by: Patch<String>,

    // Step 4.
    pub approval_status: Patch<ApprovalStatus>,
    pub approval_date: Patch<DateTime<Utc>>,
    pub approval_comment: Patch<String>,
    pub step4_completed_at: Patch<DateTime<Utc>>,
    pub step4_completed_by: Patch<String>,

    // Step 5.
    pub vendor_order_sent: Option<bool>,
    pub vendor_email: Patch<String>,
    pub notify_slack: Option<bool>,
    pub notify_email: Option<bool>,
    pub step5_completed_at: Patch<DateTime<Utc>>,
    pub step5_completed_by: Patch<String>,

    // Ledger-resident metadata.
    pub notes: Option<String>,
    pub kiosk_unit_price: Patch<Decimal>,
    pub plate_unit_price: Patch<Decimal>,
    pub total_plate_count: Patch<i32>,
    pub order_request_date: Patch<String>,
    pub tax_included: Option<bool>,

    pub desired_delivery_date: Patch<DateTime<Utc>>,
    pub due_date: Patch<DateTime<Utc>>,

    /// Full item-list replacement; per-item edits are not supported.
    pub items: Option<Vec<OrderItemInput>>,
}

/// Denormalized per-order view returned to consumers.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub process_number: String,
    pub title: String,
    pub requester_name: Option<String>,
    pub partner_id: Uuid,
    pub quantity: i32,
    pub current_step: i16,
    pub status: OrderStatus,

    pub acquisition_mode: AcquisitionMode,
    pub lease_company_id: Option<Uuid>,
    pub lease_monthly_fee: Option<Decimal>,
    pub lease_period_months: Option<i32>,
    pub step1_completed_at: Option<DateTime<Utc>>,
    pub step1_completed_by: Option<String>,

    pub document_url: Option<String>,
    pub document_number: Option<String>,
    pub step2_completed_at: Option<DateTime<Utc>>,
    pub step2_completed_by: Option<String>,

    pub approval_request_id: Option<String>,
    pub approval_title: Option<String>,
    pub step3_completed_at: Option<DateTime<Utc>>,
    pub step3_completed_by: Option<String>,

    pub approval_status: Option<ApprovalStatus>,
    pub approval_date: Option<DateTime<Utc>>,
    pub approval_comment: Option<String>,
    pub step4_completed_at: Option<DateTime<Utc>>,
    pub step4_completed_by: Option<String>,

    pub vendor_order_sent: bool,
    pub vendor_email: Option<String>,
    pub notify_slack: bool,
    pub notify_email: bool,
    pub step5_completed_at: Option<DateTime<Utc>>,
    pub step5_completed_by: Option<String>,

    pub notes: String,
    pub kiosk_unit_price: Option<Decimal>,
    pub plate_unit_price: Option<Decimal>,
    pub total_plate_count: Option<i32>,
    pub order_request_date: Option<String>,
    pub tax_included: bool,

    pub totals: OrderTotals,
    /// First-item projection for single-item-era consumers.
    pub representative: RepresentativeView,
    pub items: Vec<ResolvedItem>,
    /// True when the items were rebuilt from synthetic assets because the
    /// ledger carries no structured items (legacy orders).
    pub items_reconstructed: bool,

    pub desired_delivery_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub calendar_event_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Order fulfillment workflow service: owns the 5-step lifecycle, the ledger
/// field, and the synthetic-asset side effects.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<EventSender>,
    assets: SyntheticAssetService,
    identity: IdentityResolver,
    calendar: Arc<dyn CalendarSync>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Option<EventSender>,
        calendar: Arc<dyn CalendarSync>,
    ) -> Self {
        Self {
            assets: SyntheticAssetService::new(db.clone()),
            identity: IdentityResolver::new(db.clone()),
            db,
            event_sender,
            calendar,
        }
    }

    pub fn asset_service(&self) -> &SyntheticAssetService {
        &self.assets
    }

    /// Creates an order: validates the partner and items, assigns the
    /// process number, encodes the ledger, and inserts the order row plus the
    /// full synthetic-asset batch in one transaction. The calendar event is
    /// a post-commit best effort.
    #[instrument(skip(self, request), fields(partner_id = %request.partner_id, title = %request.title))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let item_inputs = request.normalized_items()?;
        for item in &item_inputs {
            item.validate()?;
        }

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        // Reject before any write: the partner must resolve.
        let partner_exists = PartnerEntity::find_by_id(request.partner_id)
            .count(db)
            .await?
            > 0;
        if !partner_exists {
            return Err(ServiceError::NotFound(format!(
                "Partner {} not found",
                request.partner_id
            )));
        }

        // Multi-item payloads must name at least one corporation that
        // actually exists.
        if !request.items.is_empty() {
            self.require_resolvable_corporation(db, &item_inputs)
                .await?;
        }

        let order_mode = request.acquisition_mode.unwrap_or(AcquisitionMode::Purchase);
        let items: Vec<LedgerItem> = item_inputs
            .into_iter()
            .map(|input| input.into_ledger_item(order_mode))
            .collect();
        let quantity: i32 = items.iter().map(|item| item.kiosk_count).sum();

        let metadata = LedgerMetadata {
            kiosk_unit_price: request.kiosk_unit_price,
            plate_unit_price: request.plate_unit_price,
            total_plate_count: request.total_plate_count,
            order_request_date: request.order_request_date.clone(),
            tax_included: request.tax_included,
        };
        let ledger = Ledger::encode(request.notes.as_deref().unwrap_or(""), &metadata, &items);

        let lease_company_id = if order_mode.requires_lease_company() {
            request.lease_company_id
        } else {
            None
        };

        let txn = db.begin().await?;

        let process_number = generate_process_number(&txn, now).await?;

        let active = order::ActiveModel {
            id: Set(order_id),
            process_number: Set(process_number.clone()),
            title: Set(request.title.clone()),
            requester_name: Set(request.requester_name.clone()),
            partner_id: Set(request.partner_id),
            quantity: Set(quantity),
            current_step: Set(1),
            status: Set(OrderStatus::Pending),
            acquisition_mode: Set(order_mode),
            lease_company_id: Set(lease_company_id),
            lease_monthly_fee: Set(request.lease_monthly_fee),
            lease_period_months: Set(request.lease_period_months),
            step1_completed_at: Set(None),
            step1_completed_by: Set(None),
            document_url: Set(None),
            document_number: Set(None),
            step2_completed_at: Set(None),
            step2_completed_by: Set(None),
            approval_request_id: Set(None),
            approval_title: Set(None),
            step3_completed_at: Set(None),
            step3_completed_by: Set(None),
            approval_status: Set(None),
            approval_date: Set(None),
            approval_comment: Set(None),
            step4_completed_at: Set(None),
            step4_completed_by: Set(None),
            vendor_order_sent: Set(false),
            vendor_email: Set(None),
            notify_slack: Set(false),
            notify_email: Set(false),
            step5_completed_at: Set(None),
            step5_completed_by: Set(None),
            ledger: Set(ledger),
            desired_delivery_date: Set(request.desired_delivery_date),
            due_date: Set(request.due_date),
            calendar_event_id: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let order_model = active.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "failed to insert order");
            ServiceError::from(e)
        })?;

        // Asset batch commits or aborts with the order row: a partial batch
        // would leave quantity and asset count disagreeing.
        self.assets
            .create_for_order(&txn, &process_number, &items, now)
            .await?;

        txn.commit().await?;
        info!(order_id = %order_id, process_number = %process_number, quantity, "order created");

        let mut order_model = order_model;
        if let Some(date) = order_model.desired_delivery_date {
            if let Some(event_id) = self
                .calendar_upsert(&calendar_title(&order_model), date)
                .await
            {
                order_model = self
                    .persist_calendar_event_id(order_model, Some(event_id))
                    .await?;
            }
        }

        self.emit(Event::OrderCreated(order_id)).await;
        self.build_response(order_model).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        self.build_response(order).await
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        process_number: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::ProcessNumber.eq(process_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", process_number))
            })?;
        self.build_response(order).await
    }

    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page - 1).await?;

        let mut orders = Vec::with_capacity(models.len());
        for model in models {
            orders.push(self.build_response(model).await?);
        }

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Applies a partial update. Absent fields stay untouched; explicit
    /// nulls clear. Item lists are replaced wholesale; existing synthetic
    /// assets are intentionally left alone.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        request: UpdateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        if let Some(items) = &request.items {
            if items.is_empty() {
                return Err(ServiceError::ValidationError(
                    "Item replacement requires at least one item".to_string(),
                ));
            }
            for item in items {
                item.validate()?;
            }
        }
        if let Some(step) = request.current_step {
            if !(1..=5).contains(&step) {
                return Err(ServiceError::InvalidOperation(format!(
                    "current_step must be between 1 and 5, got {step}"
                )));
            }
        }

        let db = &*self.db;
        let now = Utc::now();
        let txn = db.begin().await?;

        let current = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = current.status;
        if let Some(new_status) = request.status {
            if !current.status.can_transition_to(new_status) {
                return Err(ServiceError::InvalidStatus(format!(
                    "cannot move order from {} to {}",
                    current.status, new_status
                )));
            }
        }

        // Decode the existing ledger before mutating: the legacy shape is
        // upgraded to structured on this save, so its requester name and any
        // unscraped free text must be carried over now or never.
        let decoded = Ledger::decode(Some(&current.ledger));
        let legacy_requester = decoded.requester_name().map(str::to_string);
        let mut metadata = decoded.metadata();
        let mut notes = decoded.residual_notes();
        let mut items: Vec<LedgerItem> = decoded.items().to_vec();

        let order_mode = request.acquisition_mode.unwrap_or(current.acquisition_mode);

        if let Some(new_items) = request.items.clone() {
            items = new_items
                .into_iter()
                .map(|input| input.into_ledger_item(order_mode))
                .collect();
        }
        let quantity = if items.is_empty() {
            current.quantity
        } else {
            items.iter().map(|item| item.kiosk_count).sum()
        };

        if let Some(new_notes) = request.notes.clone() {
            notes = new_notes;
        }
        metadata.kiosk_unit_price = request
            .kiosk_unit_price
            .resolve(metadata.kiosk_unit_price);
        metadata.plate_unit_price = request
            .plate_unit_price
            .resolve(metadata.plate_unit_price);
        metadata.total_plate_count = request
            .total_plate_count
            .resolve(metadata.total_plate_count);
        metadata.order_request_date = request
            .order_request_date
            .resolve(metadata.order_request_date);
        if let Some(tax) = request.tax_included {
            metadata.tax_included = tax;
        }
        let ledger = Ledger::encode(&notes, &metadata, &items);

        let mut active: order::ActiveModel = current.clone().into();

        if let Some(title) = request.title {
            active.title = Set(title);
        }
        let requester = request
            .requester_name
            .resolve(current.requester_name.clone())
            .or(legacy_requester);
        active.requester_name = Set(requester);

        if let Some(status) = request.status {
            active.status = Set(status);
        }
        if let Some(step) = request.current_step {
            active.current_step = Set(step);
        }

        // Step 1: the lease reference only survives under a lease mode.
        active.acquisition_mode = Set(order_mode);
        let lease_company_id = request
            .lease_company_id
            .resolve(current.lease_company_id);
        active.lease_company_id = Set(if order_mode.requires_lease_company() {
            lease_company_id
        } else {
            if lease_company_id.is_some() {
                debug!(order_id = %order_id, "clearing lease reference under non-lease mode");
            }
            None
        });
        active.lease_monthly_fee = Set(request
            .lease_monthly_fee
            .resolve(current.lease_monthly_fee));
        active.lease_period_months = Set(request
            .lease_period_months
            .resolve(current.lease_period_months));
        active.step1_completed_at = Set(request
            .step1_completed_at
            .resolve(current.step1_completed_at));
        active.step1_completed_by = Set(request
            .step1_completed_by
            .resolve(current.step1_completed_by.clone()));

        // Step 2.
        active.document_url = Set(request.document_url.resolve(current.document_url.clone()));
        active.document_number = Set(request
            .document_number
            .resolve(current.document_number.clone()));
        active.step2_completed_at = Set(request
            .step2_completed_at
            .resolve(current.step2_completed_at));
        active.step2_completed_by = Set(request
            .step2_completed_by
            .resolve(current.step2_completed_by.clone()));

        // Step 3.
        active.approval_request_id = Set(request
            .approval_request_id
            .resolve(current.approval_request_id.clone()));
        active.approval_title = Set(request
            .approval_title
            .resolve(current.approval_title.clone()));
        active.step3_completed_at = Set(request
            .step3_completed_at
            .resolve(current.step3_completed_at));
        active.step3_completed_by = Set(request
            .step3_completed_by
            .resolve(current.step3_completed_by.clone()));

        // Step 4. A transition to Approved stamps the approval date
        // server-side; any caller-supplied date in the same request loses.
        let newly_approved = request.approval_status.value() == Some(&ApprovalStatus::Approved);
        let approval_status = request.approval_status.resolve(current.approval_status);
        active.approval_status = Set(approval_status);
        active.approval_date = Set(if newly_approved {
            Some(now)
        } else {
            request.approval_date.resolve(current.approval_date)
        });
        active.approval_comment = Set(request
            .approval_comment
            .resolve(current.approval_comment.clone()));
        active.step4_completed_at = Set(request
            .step4_completed_at
            .resolve(current.step4_completed_at));
        active.step4_completed_by = Set(request
            .step4_completed_by
            .resolve(current.step4_completed_by.clone()));

        // Step 5.
        if let Some(sent) = request.vendor_order_sent {
            active.vendor_order_sent = Set(sent);
        }
        active.vendor_email = Set(request.vendor_email.resolve(current.vendor_email.clone()));
        if let Some(slack) = request.notify_slack {
            active.notify_slack = Set(slack);
        }
        if let Some(email) = request.notify_email {
            active.notify_email = Set(email);
        }
        active.step5_completed_at = Set(request
            .step5_completed_at
            .resolve(current.step5_completed_at));
        active.step5_completed_by = Set(request
            .step5_completed_by
            .resolve(current.step5_completed_by.clone()));

        let new_delivery_date = request
            .desired_delivery_date
            .clone()
            .resolve(current.desired_delivery_date);
        let delivery_date_changed = new_delivery_date != current.desired_delivery_date;
        active.desired_delivery_date = Set(new_delivery_date);
        active.due_date = Set(request.due_date.resolve(current.due_date));

        active.ledger = Set(ledger);
        active.quantity = Set(quantity);
        active.updated_at = Set(Some(now));
        active.version = Set(current.version + 1);

        let updated = active.update(&txn).await?;
        txn.commit().await?;
        info!(order_id = %order_id, version = updated.version, "order updated");

        // Updates never reconcile existing assets; surface divergence in the
        // logs so it stays observable.
        if request.items.is_some() {
            let asset_count = self.assets.count_for_order(&updated.process_number).await?;
            if asset_count != quantity as u64 {
                debug!(
                    order_id = %order_id,
                    declared = quantity,
                    assets = asset_count,
                    "item replacement left synthetic asset count out of sync"
                );
            }
        }

        let updated = if delivery_date_changed {
            self.sync_calendar_after_reschedule(updated).await?
        } else {
            updated
        };

        if let Some(status) = request.status {
            if status != old_status {
                self.emit(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: status.to_string(),
                })
                .await;
            }
        }
        if newly_approved {
            self.emit(Event::OrderApproved(order_id)).await;
        }
        self.emit(Event::OrderUpdated(order_id)).await;

        self.build_response(updated).await
    }

    /// Cancels the order. Legal from any non-terminal state.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let request = UpdateOrderRequest {
            status: Some(OrderStatus::Cancelled),
            approval_comment: match reason {
                Some(reason) => Patch::Value(reason),
                None => Patch::Absent,
            },
            ..UpdateOrderRequest::default()
        };
        self.update_order(order_id, request).await
    }

    /// Deletes the order and every synthetic asset tagged to it in one
    /// transaction, then best-effort removes its calendar event. A repeat
    /// delete is a plain NotFound.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let deleted_assets = self
            .assets
            .delete_for_order(&txn, &order.process_number)
            .await?;
        OrderEntity::delete_by_id(order_id).exec(&txn).await?;
        txn.commit().await?;
        info!(
            order_id = %order_id,
            process_number = %order.process_number,
            deleted_assets,
            "order deleted"
        );

        if let Some(event_id) = &order.calendar_event_id {
            if let Err(e) = self.calendar.delete_event(event_id).await {
                warn!(order_id = %order_id, error = %e, "calendar event delete failed (ignored)");
            }
        }

        self.emit(Event::OrderDeleted(order_id)).await;
        Ok(())
    }

    /// Assembles the denormalized view: decode the ledger, reconstruct items
    /// from assets when none are structured, resolve identities in batch,
    /// then derive totals and the representative projection.
    async fn build_response(&self, model: OrderModel) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let decoded = Ledger::decode(Some(&model.ledger));
        let metadata = decoded.metadata();
        let requester_name = model
            .requester_name
            .clone()
            .or_else(|| decoded.requester_name().map(str::to_string));

        let mut items: Vec<LedgerItem> = decoded.items().to_vec();
        let items_reconstructed = items.is_empty();
        if items_reconstructed {
            let assets = self.assets.find_for_order(db, &model.process_number).await?;
            items = aggregates::reconstruct_items(&assets);
            // Reconstructed items know only their branch; pull the owning
            // corporation so the representative projection stays populated.
            for item in items.iter_mut() {
                if let Some(branch_id) = item.branch_id {
                    if let Some((_, Some(corporation))) =
                        self.identity.resolve_branch(db, branch_id).await?
                    {
                        item.corporation_id = Some(corporation.id);
                    }
                }
            }
        }

        let resolved = self.identity.resolve_items(&items).await?;
        let totals = aggregates::compute_totals(&metadata, model.quantity);
        let representative = aggregates::representative(&resolved);

        Ok(OrderResponse {
            id: model.id,
            process_number: model.process_number,
            title: model.title,
            requester_name,
            partner_id: model.partner_id,
            quantity: model.quantity,
            current_step: model.current_step,
            status: model.status,
            acquisition_mode: model.acquisition_mode,
            lease_company_id: model.lease_company_id,
            lease_monthly_fee: model.lease_monthly_fee,
            lease_period_months: model.lease_period_months,
            step1_completed_at: model.step1_completed_at,
            step1_completed_by: model.step1_completed_by,
            document_url: model.document_url,
            document_number: model.document_number,
            step2_completed_at: model.step2_completed_at,
            step2_completed_by: model.step2_completed_by,
            approval_request_id: model.approval_request_id,
            approval_title: model.approval_title,
            step3_completed_at: model.step3_completed_at,
            step3_completed_by: model.step3_completed_by,
            approval_status: model.approval_status,
            approval_date: model.approval_date,
            approval_comment: model.approval_comment,
            step4_completed_at: model.step4_completed_at,
            step4_completed_by: model.step4_completed_by,
            vendor_order_sent: model.vendor_order_sent,
            vendor_email: model.vendor_email,
            notify_slack: model.notify_slack,
            notify_email: model.notify_email,
            step5_completed_at: model.step5_completed_at,
            step5_completed_by: model.step5_completed_by,
            notes: decoded.notes().to_string(),
            kiosk_unit_price: metadata.kiosk_unit_price,
            plate_unit_price: metadata.plate_unit_price,
            total_plate_count: metadata.total_plate_count,
            order_request_date: metadata.order_request_date,
            tax_included: metadata.tax_included,
            totals,
            representative,
            items: resolved,
            items_reconstructed,
            desired_delivery_date: model.desired_delivery_date,
            due_date: model.due_date,
            calendar_event_id: model.calendar_event_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
            version: model.version,
        })
    }

    async fn require_resolvable_corporation(
        &self,
        db: &DbPool,
        items: &[OrderItemInput],
    ) -> Result<(), ServiceError> {
        use crate::entities::corporation;

        let ids: Vec<Uuid> = items.iter().filter_map(|i| i.corporation_id).collect();
        if !ids.is_empty() {
            let found = corporation::Entity::find()
                .filter(corporation::Column::Id.is_in(ids))
                .count(db)
                .await?;
            if found > 0 {
                return Ok(());
            }
        }
        Err(ServiceError::ValidationError(
            "At least one item must reference an existing corporation".to_string(),
        ))
    }

    /// Best-effort calendar upsert: returns the event id on success, logs
    /// and returns None on failure.
    async fn calendar_upsert(&self, title: &str, date: DateTime<Utc>) -> Option<String> {
        match self.calendar.upsert_event(title, date).await {
            Ok(event_id) => Some(event_id),
            Err(e) => {
                warn!(error = %e, "calendar upsert failed (ignored)");
                None
            }
        }
    }

    /// Re-syncs the calendar after a delivery-date change: reschedule when a
    /// date remains, delete the event when the date was cleared. Never fails
    /// the already-committed order write.
    async fn sync_calendar_after_reschedule(
        &self,
        model: OrderModel,
    ) -> Result<OrderModel, ServiceError> {
        match model.desired_delivery_date {
            Some(date) => {
                match self.calendar_upsert(&calendar_title(&model), date).await {
                    Some(event_id) => {
                        self.persist_calendar_event_id(model, Some(event_id)).await
                    }
                    None => Ok(model),
                }
            }
            None => {
                if let Some(event_id) = &model.calendar_event_id {
                    if let Err(e) = self.calendar.delete_event(event_id).await {
                        warn!(error = %e, "calendar event delete failed (ignored)");
                        return Ok(model);
                    }
                }
                self.persist_calendar_event_id(model, None).await
            }
        }
    }

    async fn persist_calendar_event_id(
        &self,
        model: OrderModel,
        event_id: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        if model.calendar_event_id == event_id {
            return Ok(model);
        }
        let mut active: order::ActiveModel = model.into();
        active.calendar_event_id = Set(event_id);
        Ok(active.update(&*self.db).await?)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send event");
            }
        }
    }
}

/// `[PO-20250301-003] title` — what the external calendar shows.
fn calendar_title(order: &OrderModel) -> String {
    format!("[{}] {}", order.process_number, order.title)
}

/// Next process number for the day: `PO-YYYYMMDD-NNN` with a per-day
/// sequence derived from a prefix count inside the caller's transaction.
async fn generate_process_number<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let prefix = format!("PO-{}", now.format("%Y%m%d"));
    let existing = OrderEntity::find()
        .filter(order::Column::ProcessNumber.starts_with(&prefix))
        .count(conn)
        .await?;
    Ok(format_process_number(&prefix, existing + 1))
}

fn format_process_number(prefix: &str, sequence: u64) -> String {
    format!("{prefix}-{sequence:03}")
}
