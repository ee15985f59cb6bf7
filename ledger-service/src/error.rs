//! Error taxonomy of the ledger.

use thiserror::Error;
use uuid::Uuid;

use crate::models::LevelKey;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failure of a ledger, reservation or catalog operation.
///
/// Business errors are returned to the immediate caller and never retried.
/// `LockTimeout` and `Infrastructure` abort the current atomic unit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("insufficient stock: requested {requested} but only {available} available")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("insufficient reserved stock: requested {requested} but only {reserved} reserved")]
    InsufficientReserved { requested: i64, reserved: i64 },

    #[error("adjusting item {item_id} at warehouse {warehouse_id} by {delta} would drive stock below zero")]
    NegativeStock { item_id: Uuid, warehouse_id: Uuid, delta: i64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no pending reservations found for ID: {0}")]
    NoPendingReservations(String),

    #[error("timed out waiting for the lock on {0}")]
    LockTimeout(LevelKey),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn infrastructure(err: impl std::fmt::Display) -> Self {
        Self::Infrastructure(err.to_string())
    }

    pub(crate) fn infrastructure_poison<T>(_: T) -> Self {
        Self::Infrastructure("lock poisoned".to_string())
    }

    /// True for failures caused by the request itself rather than by storage.
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::LockTimeout(_) | Self::Infrastructure(_))
    }
}

#[cfg(feature = "postgres")]
impl From<diesel::result::Error> for LedgerError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Infrastructure(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for LedgerError {
    fn from(err: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        Self::Infrastructure(format!("connection pool: {}", err))
    }
}
