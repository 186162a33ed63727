use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::services::orders::{
    CreateOrderRequest, OrderResponse, UpdateOrderRequest,
};
use crate::{errors::ServiceError, ApiResponse, AppState, ListQuery, PaginatedResponse};

// Resolve an order identifier that may be a UUID or a process-number string.
async fn resolve_order(state: &AppState, id: &str) -> Result<OrderResponse, ServiceError> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return state.services.orders.get_order(uuid).await;
    }
    state.services.orders.get_order_by_number(id).await
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let result = state
        .services
        .orders
        .list_orders(query.page, query.limit)
        .await?;

    // per_page comes back already clamped to 1..=100.
    let total_pages = result.total.div_ceil(result.per_page);

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: result.orders,
        total: result.total,
        page: result.page,
        limit: result.per_page,
        total_pages,
    })))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = resolve_order(&state, &id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(process_number): Path<String>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_by_number(&process_number)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state.services.orders.create_order(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

pub async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.update_order(id, payload).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelOrderRequest>>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let reason = payload.and_then(|Json(body)| body.reason);
    let order = state.services.orders.cancel_order(id, reason).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
