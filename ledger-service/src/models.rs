use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Identity of one stock counter row, and the unit of locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelKey {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
}

impl LevelKey {
    pub fn new(item_id: Uuid, warehouse_id: Uuid) -> Self {
        Self { item_id, warehouse_id }
    }
}

impl fmt::Display for LevelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {} at warehouse {}", self.item_id, self.warehouse_id)
    }
}

/// Stock counters of one item at one warehouse.
///
/// `available == quantity - reserved` and all three counters are non-negative
/// for every level produced by [`LedgerOp::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i64,
    pub reserved: i64,
    pub available: i64,
    pub last_updated: DateTime<Utc>,
}

impl InventoryLevel {
    /// Zero-valued level for a pair that has never been adjusted. Not persisted.
    pub fn empty(key: LevelKey) -> Self {
        Self {
            item_id: key.item_id,
            warehouse_id: key.warehouse_id,
            quantity: 0,
            reserved: 0,
            available: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn key(&self) -> LevelKey {
        LevelKey::new(self.item_id, self.warehouse_id)
    }

    pub fn is_consistent(&self) -> bool {
        self.quantity >= 0
            && self.reserved >= 0
            && self.available >= 0
            && self.available == self.quantity - self.reserved
    }
}

/// A mutation of one level's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    /// Signed change of on-hand stock.
    Adjust(i64),
    /// Move units from available to reserved.
    Allocate(i64),
    /// Move units from reserved back to available.
    Release(i64),
    /// Remove held units from on-hand for good.
    CommitHold(i64),
}

fn checked(value: Option<i64>) -> LedgerResult<i64> {
    value.ok_or_else(|| LedgerError::invalid("quantity overflow"))
}

fn positive(qty: i64) -> LedgerResult<i64> {
    if qty <= 0 {
        return Err(LedgerError::invalid(format!("quantity must be positive, got {}", qty)));
    }
    Ok(qty)
}

impl LedgerOp {
    /// Computes the level that results from applying this operation to `level`.
    ///
    /// This is the only place counter arithmetic happens; storage backends call
    /// it while holding the row lock and persist whatever it returns.
    pub fn apply(self, level: &InventoryLevel, now: DateTime<Utc>) -> LedgerResult<InventoryLevel> {
        let mut next = level.clone();
        match self {
            LedgerOp::Adjust(delta) => {
                next.quantity = checked(level.quantity.checked_add(delta))?;
                next.available = checked(level.available.checked_add(delta))?;
                if next.quantity < 0 || next.available < 0 {
                    return Err(LedgerError::NegativeStock {
                        item_id: level.item_id,
                        warehouse_id: level.warehouse_id,
                        delta,
                    });
                }
            }
            LedgerOp::Allocate(qty) => {
                let qty = positive(qty)?;
                if level.available < qty {
                    return Err(LedgerError::InsufficientStock {
                        requested: qty,
                        available: level.available,
                    });
                }
                next.reserved = checked(level.reserved.checked_add(qty))?;
                next.available = level.available - qty;
            }
            LedgerOp::Release(qty) => {
                let qty = positive(qty)?;
                if level.reserved < qty {
                    return Err(LedgerError::InsufficientReserved {
                        requested: qty,
                        reserved: level.reserved,
                    });
                }
                next.reserved = level.reserved - qty;
                next.available = checked(level.available.checked_add(qty))?;
            }
            LedgerOp::CommitHold(qty) => {
                let qty = positive(qty)?;
                if level.reserved < qty {
                    return Err(LedgerError::InsufficientReserved {
                        requested: qty,
                        reserved: level.reserved,
                    });
                }
                if level.quantity < qty {
                    return Err(LedgerError::NegativeStock {
                        item_id: level.item_id,
                        warehouse_id: level.warehouse_id,
                        delta: -qty,
                    });
                }
                next.quantity = level.quantity - qty;
                next.reserved = level.reserved - qty;
            }
        }
        next.last_updated = now;
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Add,
    Remove,
    Allocate,
    Release,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Add => "add",
            TransactionType::Remove => "remove",
            TransactionType::Allocate => "allocate",
            TransactionType::Release => "release",
        }
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(TransactionType::Add),
            "remove" => Ok(TransactionType::Remove),
            "allocate" => Ok(TransactionType::Allocate),
            "release" => Ok(TransactionType::Release),
            other => Err(LedgerError::invalid(format!("unknown transaction type: {}", other))),
        }
    }
}

/// Immutable audit record of one ledger-mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: Uuid,
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub reference: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i64,
    pub kind: TransactionType,
    pub reference: String,
    pub user_id: String,
}

impl NewTransaction {
    pub fn new(
        key: LevelKey,
        quantity: i64,
        kind: TransactionType,
        reference: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            item_id: key.item_id,
            warehouse_id: key.warehouse_id,
            quantity,
            kind,
            reference: reference.into(),
            user_id: user_id.into(),
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.user_id.is_empty() {
            return Err(LedgerError::invalid("transaction user_id is required"));
        }
        Ok(())
    }

    pub fn into_record(self, id: Uuid, timestamp: DateTime<Utc>) -> InventoryTransaction {
        InventoryTransaction {
            id,
            item_id: self.item_id,
            warehouse_id: self.warehouse_id,
            quantity: self.quantity,
            kind: self.kind,
            reference: self.reference,
            user_id: self.user_id,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Committed,
    Cancelled,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Committed => "committed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "committed" => Ok(ReservationStatus::Committed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "released" => Ok(ReservationStatus::Released),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(LedgerError::invalid(format!("unknown reservation status: {}", other))),
        }
    }
}

/// One (order, item) hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReservation {
    pub id: Uuid,
    pub order_id: String,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub sku: String,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl InventoryReservation {
    pub fn key(&self) -> LevelKey {
        LevelKey::new(self.product_id, self.warehouse_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub order_id: String,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub sku: String,
    pub quantity: i64,
    pub expires_at: DateTime<Utc>,
}

impl NewReservation {
    pub fn validate(&self) -> LedgerResult<()> {
        if self.order_id.is_empty() {
            return Err(LedgerError::invalid("reservation order_id is required"));
        }
        if self.quantity <= 0 {
            return Err(LedgerError::invalid("reservation quantity must be positive"));
        }
        Ok(())
    }

    pub fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> InventoryReservation {
        InventoryReservation {
            id,
            order_id: self.order_id,
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            sku: self.sku,
            quantity: self.quantity,
            status: ReservationStatus::Pending,
            created_at,
            completed_at: None,
            expires_at: self.expires_at,
        }
    }
}

/// Reservation-store side effect committed in the same unit as a ledger write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldEffect {
    Create(NewReservation),
    Transition {
        reservation_id: Uuid,
        status: ReservationStatus,
        completed_at: DateTime<Utc>,
        /// When set, the row must still be in this status or the whole write fails.
        expected: Option<ReservationStatus>,
    },
}

/// One atomic unit against a single level: locked read, `op`, upsert, and the
/// optional log entry and reservation change. All of it lands or none of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerWrite {
    pub key: LevelKey,
    pub op: LedgerOp,
    pub journal: Option<NewTransaction>,
    pub hold: Option<HoldEffect>,
}

impl LedgerWrite {
    pub fn new(key: LevelKey, op: LedgerOp) -> Self {
        Self { key, op, journal: None, hold: None }
    }

    pub fn with_journal(mut self, entry: NewTransaction) -> Self {
        self.journal = Some(entry);
        self
    }

    pub fn with_hold(mut self, effect: HoldEffect) -> Self {
        self.hold = Some(effect);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelFilter {
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
}

impl LevelFilter {
    pub fn matches(&self, level: &InventoryLevel) -> bool {
        self.item_id.map_or(true, |id| id == level.item_id)
            && self.warehouse_id.map_or(true, |id| id == level.warehouse_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: Option<TransactionType>,
    pub reference: Option<String>,
    pub user_id: Option<String>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &InventoryTransaction) -> bool {
        self.item_id.map_or(true, |id| id == tx.item_id)
            && self.warehouse_id.map_or(true, |id| id == tx.warehouse_id)
            && self.kind.map_or(true, |kind| kind == tx.kind)
            && self.reference.as_deref().map_or(true, |r| r == tx.reference)
            && self.user_id.as_deref().map_or(true, |u| u == tx.user_id)
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, page_size: DEFAULT_PAGE_SIZE }
    }
}

impl Page {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let page_size = match page_size {
            None | Some(0) => DEFAULT_PAGE_SIZE,
            Some(size) => size.min(MAX_PAGE_SIZE),
        };
        Self { page, page_size }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<InventoryTransaction>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Catalog record of a stock-keeping item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub sku: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
}
