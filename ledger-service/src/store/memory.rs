use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::CommandReply;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as RowLock;
use uuid::Uuid;

use super::{LedgerStore, ProcessedCommandStore, ReservationStore, TransactionLog};
use crate::error::{LedgerError, LedgerResult};
use crate::models::*;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// In-process backend for tests and single-node dev runs.
///
/// Each (item, warehouse) pair gets its own async mutex, taken for the whole
/// read-compute-write of [`LedgerStore::apply`]. Committed state lives behind
/// plain `RwLock`s that are only ever held for the final, non-blocking update.
#[derive(Debug)]
pub struct MemoryStore {
    row_locks: Mutex<HashMap<LevelKey, Arc<RowLock<()>>>>,
    levels: RwLock<HashMap<LevelKey, InventoryLevel>>,
    transactions: RwLock<Vec<InventoryTransaction>>,
    reservations: RwLock<Vec<InventoryReservation>>,
    processed: RwLock<HashMap<String, CommandReply>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            row_locks: Mutex::new(HashMap::new()),
            levels: RwLock::new(HashMap::new()),
            transactions: RwLock::new(Vec::new()),
            reservations: RwLock::new(Vec::new()),
            processed: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    fn row_lock(&self, key: LevelKey) -> LedgerResult<Arc<RowLock<()>>> {
        let mut locks = self.row_locks.lock().map_err(LedgerError::infrastructure_poison)?;
        Ok(locks.entry(key).or_default().clone())
    }

    /// Checks a hold effect against the current rows without touching them.
    fn stage_hold(
        reservations: &[InventoryReservation],
        effect: HoldEffect,
        now: DateTime<Utc>,
    ) -> LedgerResult<StagedHold> {
        match effect {
            HoldEffect::Create(new) => {
                new.validate()?;
                Ok(StagedHold::Insert(new.into_record(Uuid::new_v4(), now)))
            }
            HoldEffect::Transition { reservation_id, status, completed_at, expected } => {
                let index = reservations
                    .iter()
                    .position(|r| r.id == reservation_id)
                    .ok_or_else(|| LedgerError::not_found("reservation", reservation_id))?;
                let row = &reservations[index];
                if let Some(expected) = expected {
                    if row.status != expected {
                        return Err(LedgerError::NoPendingReservations(row.order_id.clone()));
                    }
                }
                Ok(StagedHold::Update { index, status, completed_at })
            }
        }
    }
}

/// A validated reservation change, applied only once every check of the write passed.
enum StagedHold {
    Insert(InventoryReservation),
    Update { index: usize, status: ReservationStatus, completed_at: DateTime<Utc> },
}

impl StagedHold {
    fn commit(self, reservations: &mut Vec<InventoryReservation>) {
        match self {
            StagedHold::Insert(record) => reservations.push(record),
            StagedHold::Update { index, status, completed_at } => {
                let row = &mut reservations[index];
                row.status = status;
                row.completed_at = Some(completed_at);
            }
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_level(&self, key: LevelKey) -> LedgerResult<InventoryLevel> {
        let levels = self.levels.read().map_err(LedgerError::infrastructure_poison)?;
        Ok(levels.get(&key).cloned().unwrap_or_else(|| InventoryLevel::empty(key)))
    }

    async fn list_levels(&self, filter: &LevelFilter) -> LedgerResult<Vec<InventoryLevel>> {
        let levels = self.levels.read().map_err(LedgerError::infrastructure_poison)?;
        let mut matching: Vec<InventoryLevel> =
            levels.values().filter(|l| filter.matches(l)).cloned().collect();
        matching.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(matching)
    }

    async fn apply(&self, write: LedgerWrite) -> LedgerResult<InventoryLevel> {
        let key = write.key;
        let lock = self.row_lock(key)?;
        let _row = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| LedgerError::LockTimeout(key))?;

        let now = Utc::now();
        let current = self.get_level(key).await?;
        let next = write.op.apply(&current, now)?;
        if let Some(entry) = &write.journal {
            entry.validate()?;
        }

        let mut reservations = self.reservations.write().map_err(LedgerError::infrastructure_poison)?;
        let staged = match write.hold {
            Some(effect) => Some(Self::stage_hold(&reservations, effect, now)?),
            None => None,
        };

        let mut transactions = self.transactions.write().map_err(LedgerError::infrastructure_poison)?;
        let mut levels = self.levels.write().map_err(LedgerError::infrastructure_poison)?;
        if let Some(change) = staged {
            change.commit(&mut reservations);
        }
        if let Some(entry) = write.journal {
            transactions.push(entry.into_record(Uuid::new_v4(), now));
        }
        levels.insert(key, next.clone());
        Ok(next)
    }
}

#[async_trait]
impl TransactionLog for MemoryStore {
    async fn append(&self, entry: NewTransaction) -> LedgerResult<InventoryTransaction> {
        entry.validate()?;
        let record = entry.into_record(Uuid::new_v4(), Utc::now());
        self.transactions.write().map_err(LedgerError::infrastructure_poison)?.push(record.clone());
        Ok(record)
    }

    async fn query(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> LedgerResult<(Vec<InventoryTransaction>, u64)> {
        let transactions = self.transactions.read().map_err(LedgerError::infrastructure_poison)?;
        let matching: Vec<&InventoryTransaction> =
            transactions.iter().rev().filter(|t| filter.matches(t)).collect();
        let total = matching.len() as u64;
        let rows = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .cloned()
            .collect();
        Ok((rows, total))
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn create(&self, reservation: NewReservation) -> LedgerResult<InventoryReservation> {
        reservation.validate()?;
        let record = reservation.into_record(Uuid::new_v4(), Utc::now());
        self.reservations.write().map_err(LedgerError::infrastructure_poison)?.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> LedgerResult<InventoryReservation> {
        let reservations = self.reservations.read().map_err(LedgerError::infrastructure_poison)?;
        reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("reservation", id))
    }

    async fn find_by_order_id(&self, order_id: &str) -> LedgerResult<Vec<InventoryReservation>> {
        let reservations = self.reservations.read().map_err(LedgerError::infrastructure_poison)?;
        Ok(reservations.iter().filter(|r| r.order_id == order_id).cloned().collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        status: ReservationStatus,
        completed_at: DateTime<Utc>,
    ) -> LedgerResult<InventoryReservation> {
        let mut reservations = self.reservations.write().map_err(LedgerError::infrastructure_poison)?;
        let row = reservations
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| LedgerError::not_found("reservation", id))?;
        row.status = status;
        row.completed_at = Some(completed_at);
        Ok(row.clone())
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> LedgerResult<Vec<InventoryReservation>> {
        let reservations = self.reservations.read().map_err(LedgerError::infrastructure_poison)?;
        let mut expired: Vec<InventoryReservation> = reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Pending && r.expires_at <= now)
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }
}

#[async_trait]
impl ProcessedCommandStore for MemoryStore {
    async fn find_reply(&self, idempotency_key: &str) -> LedgerResult<Option<CommandReply>> {
        let processed = self.processed.read().map_err(LedgerError::infrastructure_poison)?;
        Ok(processed.get(idempotency_key).cloned())
    }

    async fn record_reply(&self, idempotency_key: &str, reply: &CommandReply) -> LedgerResult<()> {
        let mut processed = self.processed.write().map_err(LedgerError::infrastructure_poison)?;
        processed.entry(idempotency_key.to_string()).or_insert_with(|| reply.clone());
        Ok(())
    }
}
