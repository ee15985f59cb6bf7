//! Storage ports of the ledger and their backends.
//!
//! [`LedgerStore`] owns the per-(item, warehouse) counters, [`TransactionLog`]
//! the append-only movement history and [`ReservationStore`] the holds placed
//! against orders. A backend usually implements all three on one struct so
//! that [`LedgerStore::apply`] can commit the counter change, the log entry and
//! the reservation change as one unit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::CommandReply;
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::models::*;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Stored level, or a zero-valued level that is not persisted.
    async fn get_level(&self, key: LevelKey) -> LedgerResult<InventoryLevel>;

    /// Levels matching `filter`, most recently updated first.
    async fn list_levels(&self, filter: &LevelFilter) -> LedgerResult<Vec<InventoryLevel>>;

    /// Runs one write under the row lock for `write.key`.
    ///
    /// The lock is held from the read until the new level, journal entry and
    /// hold effect are stored. Writers to other keys are not blocked.
    async fn apply(&self, write: LedgerWrite) -> LedgerResult<InventoryLevel>;

    async fn adjust(&self, key: LevelKey, delta: i64) -> LedgerResult<InventoryLevel> {
        self.apply(LedgerWrite::new(key, LedgerOp::Adjust(delta))).await
    }

    async fn allocate(&self, key: LevelKey, qty: i64) -> LedgerResult<InventoryLevel> {
        self.apply(LedgerWrite::new(key, LedgerOp::Allocate(qty))).await
    }

    async fn release(&self, key: LevelKey, qty: i64) -> LedgerResult<InventoryLevel> {
        self.apply(LedgerWrite::new(key, LedgerOp::Release(qty))).await
    }

    async fn commit_hold(&self, key: LevelKey, qty: i64) -> LedgerResult<InventoryLevel> {
        self.apply(LedgerWrite::new(key, LedgerOp::CommitHold(qty))).await
    }
}

#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn append(&self, entry: NewTransaction) -> LedgerResult<InventoryTransaction>;

    /// One page of matching entries, newest first, plus the total match count.
    async fn query(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> LedgerResult<(Vec<InventoryTransaction>, u64)>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn create(&self, reservation: NewReservation) -> LedgerResult<InventoryReservation>;

    async fn get(&self, id: Uuid) -> LedgerResult<InventoryReservation>;

    /// Every row of the order, oldest first. Empty when the order is unknown.
    async fn find_by_order_id(&self, order_id: &str) -> LedgerResult<Vec<InventoryReservation>>;

    /// Sets the terminal status of one row. The current status is not checked.
    async fn transition(
        &self,
        id: Uuid,
        status: ReservationStatus,
        completed_at: DateTime<Utc>,
    ) -> LedgerResult<InventoryReservation>;

    /// Pending rows whose `expires_at` is not after `now`, oldest expiry first.
    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> LedgerResult<Vec<InventoryReservation>>;
}

/// Replies already sent for command idempotency keys.
///
/// Lives next to the ledger so a redelivery after a restart still finds the
/// reply of a command whose writes were committed.
#[async_trait]
pub trait ProcessedCommandStore: Send + Sync {
    async fn find_reply(&self, idempotency_key: &str) -> LedgerResult<Option<CommandReply>>;

    /// Keeps the first reply recorded for a key; later ones are ignored.
    async fn record_reply(&self, idempotency_key: &str, reply: &CommandReply) -> LedgerResult<()>;
}
