use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::*;
use crate::service::InventoryService;

#[derive(Clone)]
pub struct AppState {
    pub service: InventoryService,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub order_id: String,
    pub released: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseBody {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: Option<TransactionType>,
    pub reference: Option<String>,
    pub user_id: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound { .. } | LedgerError::NoPendingReservations(_) => StatusCode::NOT_FOUND,
        LedgerError::InsufficientStock { .. }
        | LedgerError::InsufficientReserved { .. }
        | LedgerError::NegativeStock { .. } => StatusCode::CONFLICT,
        LedgerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        LedgerError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: LedgerError) -> (StatusCode, Json<ErrorResponse>) {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    }
    (status, Json(ErrorResponse { error: err.to_string() }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/inventory/adjust", post(adjust_inventory))
        .route("/inventory/allocate", post(allocate_inventory))
        .route("/inventory/release", post(release_inventory))
        .route("/inventory/levels", get(get_inventory_levels))
        .route("/inventory/levels/:item_id/:warehouse_id", get(get_inventory_level_for_item))
        .route("/inventory/transactions", get(get_inventory_transactions))
        .route("/reservations", post(check_and_reserve_stock))
        .route("/reservations/:order_id", get(get_reservation))
        .route("/reservations/:order_id/release", post(release_reserved_stock))
        .route("/reservations/:order_id/commit", post(commit_reservation))
        .route("/reservations/:order_id/cancel", post(cancel_reservation))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn adjust_inventory(
    State(state): State<AppState>,
    Json(request): Json<AdjustInventoryRequest>,
) -> ApiResult<InventoryLevel> {
    state.service.adjust_inventory(request).await.map(Json).map_err(error_response)
}

pub async fn allocate_inventory(
    State(state): State<AppState>,
    Json(request): Json<AllocateInventoryRequest>,
) -> ApiResult<InventoryLevel> {
    state.service.allocate_inventory(request).await.map(Json).map_err(error_response)
}

pub async fn release_inventory(
    State(state): State<AppState>,
    Json(request): Json<ReleaseInventoryRequest>,
) -> ApiResult<ReleaseResponse> {
    let summary = state
        .service
        .release_inventory(&request.order_id, &request.reason)
        .await
        .map_err(error_response)?;
    Ok(Json(ReleaseResponse {
        order_id: summary.order_id,
        released: summary.settled,
        failed: summary.failed,
        last_error: summary.last_error.map(|e| e.to_string()),
    }))
}

pub async fn get_inventory_levels(
    State(state): State<AppState>,
    Query(filter): Query<LevelFilter>,
) -> ApiResult<Vec<InventoryLevel>> {
    state.service.get_inventory_levels(&filter).await.map(Json).map_err(error_response)
}

pub async fn get_inventory_level_for_item(
    State(state): State<AppState>,
    Path((item_id, warehouse_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<InventoryLevel> {
    state
        .service
        .get_inventory_level_for_item(item_id, warehouse_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn get_inventory_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> ApiResult<TransactionPage> {
    let filter = TransactionFilter {
        item_id: query.item_id,
        warehouse_id: query.warehouse_id,
        kind: query.kind,
        reference: query.reference,
        user_id: query.user_id,
    };
    let page = Page::new(query.page, query.page_size);
    state
        .service
        .get_inventory_transactions(&filter, page)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn check_and_reserve_stock(
    State(state): State<AppState>,
    Json(request): Json<CheckAndReserveRequest>,
) -> ApiResult<ReservationResult> {
    state.service.check_and_reserve(request).await.map(Json).map_err(error_response)
}

pub async fn get_reservation(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<Vec<InventoryReservation>> {
    state.service.get_reservation(&order_id).await.map(Json).map_err(error_response)
}

pub async fn release_reserved_stock(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    body: Option<Json<ReleaseBody>>,
) -> ApiResult<OperationResult> {
    let reason = body.map(|Json(b)| b.reason).unwrap_or_default();
    state
        .service
        .release_reserved_stock(&order_id, &reason)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn commit_reservation(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<OperationResult> {
    state.service.commit_reservation(&order_id).await.map(Json).map_err(error_response)
}

pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<OperationResult> {
    state.service.cancel_reservation(&order_id).await.map(Json).map_err(error_response)
}

pub async fn health_check() -> &'static str {
    "OK"
}
