use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub command_type: CommandType,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    AdjustInventory,
    AllocateInventory,
    ReleaseInventory,
    CheckAndReserveStock,
    ReleaseReservedStock,
    CommitReservation,
    CancelReservation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub id: Uuid,
    pub command_id: Uuid,
    pub correlation_id: Uuid,
    pub status: CommandStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Success,
    Failed,
}

/// Signed stock movement on one (item, warehouse) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustInventoryRequest {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateInventoryRequest {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i64,
    pub order_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInventoryRequest {
    pub order_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitReservationRequest {
    pub order_id: String,
}

/// One requested line of a check-and-reserve call. The item is resolved by
/// `product_id` when present, otherwise by `sku`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductItem {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckAndReserveRequest {
    pub order_id: String,
    pub warehouse_id: Uuid,
    pub items: Vec<ProductItem>,
}

/// Why a single line of a check-and-reserve call was not held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ItemFailure {
    ItemNotFound,
    InsufficientStock { available: i64 },
    InvalidArgument { message: String },
    Unavailable { message: String },
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemFailure::ItemNotFound => write!(f, "Item not found"),
            ItemFailure::InsufficientStock { available } => {
                write!(f, "Insufficient stock ({} available)", available)
            }
            ItemFailure::InvalidArgument { message } => write!(f, "Invalid argument: {}", message),
            ItemFailure::Unavailable { message } => write!(f, "Failed to reserve: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAvailability {
    pub product_id: Option<Uuid>,
    pub sku: Option<String>,
    pub in_stock: bool,
    pub available_quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationResult {
    pub success: bool,
    pub reservation_id: String,
    pub items: Vec<ProductAvailability>,
    pub message: String,
}

/// Outcome of release/commit against an order's pending holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

impl Command {
    pub fn new(correlation_id: Uuid, command_type: CommandType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id,
            command_type,
            payload,
            idempotency_key: format!("{}_{}", correlation_id, Uuid::new_v4()),
            created_at: Utc::now(),
        }
    }
}

impl CommandReply {
    pub fn success(command_id: Uuid, correlation_id: Uuid, result: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            correlation_id,
            status: CommandStatus::Success,
            result,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(command_id: Uuid, correlation_id: Uuid, error: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            correlation_id,
            status: CommandStatus::Failed,
            result: None,
            error: Some(error),
            created_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}
