//! Inventory operations and the reservation protocol built on the stores.

use chrono::{DateTime, Duration, Utc};
use shared::{
    AdjustInventoryRequest, AllocateInventoryRequest, CheckAndReserveRequest, ItemFailure,
    OperationResult, ProductAvailability, ProductItem, ReservationResult,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::{LedgerError, LedgerResult};
use crate::models::*;
use crate::store::{LedgerStore, MemoryStore, ReservationStore, TransactionLog};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Lifetime stamped on new holds as `expires_at`.
    pub reservation_ttl: Duration,
    /// User recorded on log entries when the caller does not name one.
    pub system_user: String,
    /// Maximum rows handled by one expiry pass.
    pub expiry_batch: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::hours(24),
            system_user: "system".to_string(),
            expiry_batch: 100,
        }
    }
}

/// How a pending hold is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Release,
    Cancel,
    Commit,
    Expire,
}

impl Settlement {
    fn status(self) -> ReservationStatus {
        match self {
            Settlement::Release => ReservationStatus::Released,
            Settlement::Cancel => ReservationStatus::Cancelled,
            Settlement::Commit => ReservationStatus::Committed,
            Settlement::Expire => ReservationStatus::Expired,
        }
    }

    fn op(self, quantity: i64) -> LedgerOp {
        match self {
            Settlement::Commit => LedgerOp::CommitHold(quantity),
            _ => LedgerOp::Release(quantity),
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Settlement::Release => "Released",
            Settlement::Cancel => "Cancelled",
            Settlement::Commit => "Committed",
            Settlement::Expire => "Expired",
        }
    }
}

/// Per-order result of a release, cancel or commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementSummary {
    pub order_id: String,
    pub settled: usize,
    pub failed: usize,
    pub last_error: Option<LedgerError>,
}

impl SettlementSummary {
    fn into_result(self, verb: &str) -> OperationResult {
        let total = self.settled + self.failed;
        match (self.settled, self.last_error) {
            (0, Some(err)) => OperationResult::failed(err.to_string()),
            (settled, None) => OperationResult::ok(format!(
                "{} {} reservation(s) for order {}",
                verb, settled, self.order_id
            )),
            (settled, Some(err)) => OperationResult::ok(format!(
                "{} {} of {} reservation(s) for order {}; last error: {}",
                verb, settled, total, self.order_id, err
            )),
        }
    }
}

#[derive(Clone)]
pub struct InventoryService {
    ledger: Arc<dyn LedgerStore>,
    log: Arc<dyn TransactionLog>,
    reservations: Arc<dyn ReservationStore>,
    catalog: Arc<dyn Catalog>,
    config: ServiceConfig,
}

impl InventoryService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        log: Arc<dyn TransactionLog>,
        reservations: Arc<dyn ReservationStore>,
        catalog: Arc<dyn Catalog>,
        config: ServiceConfig,
    ) -> Self {
        Self { ledger, log, reservations, catalog, config }
    }

    pub fn in_memory(store: Arc<MemoryStore>, catalog: Arc<dyn Catalog>, config: ServiceConfig) -> Self {
        Self::new(store.clone(), store.clone(), store, catalog, config)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn user_or_system(&self, user_id: Option<String>) -> String {
        user_id.filter(|u| !u.is_empty()).unwrap_or_else(|| self.config.system_user.clone())
    }

    fn report(&self, operation: &str, err: &LedgerError) {
        if err.is_business() {
            warn!("{} rejected: {}", operation, err);
        } else {
            error!("{} failed: {}", operation, err);
        }
    }

    pub async fn get_inventory_level_for_item(
        &self,
        item_id: Uuid,
        warehouse_id: Uuid,
    ) -> LedgerResult<InventoryLevel> {
        self.ledger.get_level(LevelKey::new(item_id, warehouse_id)).await
    }

    pub async fn get_inventory_levels(&self, filter: &LevelFilter) -> LedgerResult<Vec<InventoryLevel>> {
        self.ledger.list_levels(filter).await
    }

    pub async fn get_inventory_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> LedgerResult<TransactionPage> {
        let (transactions, total) = self.log.query(filter, page).await?;
        Ok(TransactionPage {
            transactions,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    /// Every hold recorded for the order, in creation order.
    pub async fn get_reservation(&self, order_id: &str) -> LedgerResult<Vec<InventoryReservation>> {
        let rows = self.reservations.find_by_order_id(order_id).await?;
        if rows.is_empty() {
            return Err(LedgerError::not_found("reservation", order_id));
        }
        Ok(rows)
    }

    /// Adds (`quantity > 0`) or removes (`quantity < 0`) on-hand stock.
    #[instrument(skip(self, req), fields(item_id = %req.item_id, warehouse_id = %req.warehouse_id, delta = req.quantity))]
    pub async fn adjust_inventory(&self, req: AdjustInventoryRequest) -> LedgerResult<InventoryLevel> {
        self.catalog.resolve_item_by_id(req.item_id).await?;
        self.catalog.resolve_warehouse(req.warehouse_id).await?;

        let key = LevelKey::new(req.item_id, req.warehouse_id);
        let delta = req.quantity;
        if delta == 0 {
            return self.ledger.get_level(key).await;
        }
        let (kind, magnitude) = if delta > 0 {
            (TransactionType::Add, delta)
        } else {
            let magnitude = delta
                .checked_neg()
                .ok_or_else(|| LedgerError::invalid("quantity out of range"))?;
            (TransactionType::Remove, magnitude)
        };

        let user = self.user_or_system(req.user_id);
        let write = LedgerWrite::new(key, LedgerOp::Adjust(delta))
            .with_journal(NewTransaction::new(key, magnitude, kind, req.reference, user));
        match self.ledger.apply(write).await {
            Ok(level) => {
                info!(reason = %req.reason, "Adjusted {} by {}, on hand now {}", key, delta, level.quantity);
                Ok(level)
            }
            Err(err) => {
                self.report("adjust", &err);
                Err(err)
            }
        }
    }

    /// Holds `quantity` units of one item for an order.
    #[instrument(skip(self, req), fields(item_id = %req.item_id, warehouse_id = %req.warehouse_id, order_id = %req.order_id))]
    pub async fn allocate_inventory(&self, req: AllocateInventoryRequest) -> LedgerResult<InventoryLevel> {
        if req.order_id.is_empty() {
            return Err(LedgerError::invalid("order_id is required"));
        }
        let item = self.catalog.resolve_item_by_id(req.item_id).await?;
        self.catalog.resolve_warehouse(req.warehouse_id).await?;

        let key = LevelKey::new(req.item_id, req.warehouse_id);
        let user = self.user_or_system(req.user_id);
        let result = self.hold(key, req.quantity, &req.order_id, &item.sku, user).await;
        if let Err(err) = &result {
            self.report("allocate", err);
        }
        result
    }

    async fn hold(
        &self,
        key: LevelKey,
        quantity: i64,
        order_id: &str,
        sku: &str,
        user: String,
    ) -> LedgerResult<InventoryLevel> {
        let expires_at = Utc::now() + self.config.reservation_ttl;
        let write = LedgerWrite::new(key, LedgerOp::Allocate(quantity))
            .with_journal(NewTransaction::new(key, quantity, TransactionType::Allocate, order_id, user))
            .with_hold(HoldEffect::Create(NewReservation {
                order_id: order_id.to_string(),
                product_id: key.item_id,
                warehouse_id: key.warehouse_id,
                sku: sku.to_string(),
                quantity,
                expires_at,
            }));
        let level = self.ledger.apply(write).await?;
        debug!("Held {} of {} for order {}", quantity, key, order_id);
        Ok(level)
    }

    async fn resolve_product(&self, item: &ProductItem) -> Result<CatalogItem, ItemFailure> {
        let product_id = item.product_id.as_deref().filter(|id| !id.is_empty());
        let sku = item.sku.as_deref().filter(|sku| !sku.is_empty());
        if product_id.is_none() && sku.is_none() {
            return Err(ItemFailure::InvalidArgument {
                message: "either product_id or sku must be provided".to_string(),
            });
        }

        let mut outcome = Err(LedgerError::not_found("item", product_id.or(sku).unwrap_or_default()));
        if let Some(raw) = product_id {
            if let Ok(id) = raw.parse::<Uuid>() {
                outcome = self.catalog.resolve_item_by_id(id).await;
            }
        }
        let unresolved = matches!(outcome, Err(LedgerError::NotFound { .. }));
        if let (true, Some(sku)) = (unresolved, sku) {
            outcome = self.catalog.resolve_item_by_sku(sku).await;
        }
        outcome.map_err(|err| match err {
            LedgerError::NotFound { .. } => ItemFailure::ItemNotFound,
            other => ItemFailure::Unavailable { message: other.to_string() },
        })
    }

    /// Checks and holds every line of an order independently.
    ///
    /// Lines that fail do not roll back lines already held in the same call;
    /// callers wanting all-or-nothing must release the order themselves.
    #[instrument(skip(self, req), fields(order_id = %req.order_id, warehouse_id = %req.warehouse_id, lines = req.items.len()))]
    pub async fn check_and_reserve(&self, req: CheckAndReserveRequest) -> LedgerResult<ReservationResult> {
        if req.order_id.is_empty() {
            return Err(LedgerError::invalid("order_id is required"));
        }
        if req.items.is_empty() {
            return Err(LedgerError::invalid("at least one item is required"));
        }
        self.catalog.resolve_warehouse(req.warehouse_id).await?;

        let mut outcomes = Vec::with_capacity(req.items.len());
        for line in &req.items {
            let outcome = self.reserve_line(&req.order_id, req.warehouse_id, line).await;
            if let Some(failure) = &outcome.error {
                warn!(
                    "Could not reserve {:?}/{:?} for order {}: {}",
                    line.product_id, line.sku, req.order_id, failure
                );
            }
            outcomes.push(outcome);
        }

        let success = outcomes.iter().all(|o| o.error.is_none());
        let message = if success {
            "Stock reserved successfully"
        } else {
            "Some items could not be reserved"
        };
        info!("Reservation for order {}: {}", req.order_id, message);
        Ok(ReservationResult {
            success,
            reservation_id: req.order_id,
            items: outcomes,
            message: message.to_string(),
        })
    }

    async fn reserve_line(&self, order_id: &str, warehouse_id: Uuid, line: &ProductItem) -> ProductAvailability {
        let mut outcome = ProductAvailability {
            product_id: None,
            sku: line.sku.clone(),
            in_stock: false,
            available_quantity: 0,
            error: None,
        };

        let item = match self.resolve_product(line).await {
            Ok(item) => item,
            Err(failure) => {
                outcome.error = Some(failure);
                return outcome;
            }
        };
        outcome.product_id = Some(item.id);
        outcome.sku = Some(item.sku.clone());

        if line.quantity <= 0 {
            outcome.error = Some(ItemFailure::InvalidArgument {
                message: format!("quantity must be positive, got {}", line.quantity),
            });
            return outcome;
        }

        let key = LevelKey::new(item.id, warehouse_id);
        let level = match self.ledger.get_level(key).await {
            Ok(level) => level,
            Err(err) => {
                outcome.error = Some(ItemFailure::Unavailable { message: err.to_string() });
                return outcome;
            }
        };
        outcome.available_quantity = level.available;
        if level.available < line.quantity {
            outcome.error = Some(ItemFailure::InsufficientStock { available: level.available });
            return outcome;
        }

        let user = self.config.system_user.clone();
        match self.hold(key, line.quantity, order_id, &item.sku, user).await {
            Ok(level) => {
                outcome.in_stock = true;
                outcome.available_quantity = level.available;
            }
            // Lost a race with another writer between the check and the hold.
            Err(LedgerError::InsufficientStock { available, .. }) => {
                outcome.available_quantity = available;
                outcome.error = Some(ItemFailure::InsufficientStock { available });
            }
            Err(LedgerError::InvalidArgument(message)) => {
                outcome.error = Some(ItemFailure::InvalidArgument { message });
            }
            Err(err) => {
                self.report("reserve", &err);
                outcome.error = Some(ItemFailure::Unavailable { message: err.to_string() });
            }
        }
        outcome
    }

    async fn settle_row(
        &self,
        row: &InventoryReservation,
        settlement: Settlement,
    ) -> LedgerResult<InventoryLevel> {
        let key = row.key();
        let mut write = LedgerWrite::new(key, settlement.op(row.quantity)).with_hold(HoldEffect::Transition {
            reservation_id: row.id,
            status: settlement.status(),
            completed_at: Utc::now(),
            expected: Some(ReservationStatus::Pending),
        });
        // Commit is a state change of an allocation already logged, not a new movement.
        if settlement != Settlement::Commit {
            write = write.with_journal(NewTransaction::new(
                key,
                row.quantity,
                TransactionType::Release,
                row.order_id.clone(),
                self.config.system_user.clone(),
            ));
        }
        self.ledger.apply(write).await
    }

    /// Terminates every pending hold of an order, continuing past failed rows.
    async fn settle_order(&self, order_id: &str, settlement: Settlement) -> LedgerResult<SettlementSummary> {
        if order_id.is_empty() {
            return Err(LedgerError::invalid("order_id is required"));
        }
        let pending: Vec<InventoryReservation> = self
            .reservations
            .find_by_order_id(order_id)
            .await?
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Pending)
            .collect();
        if pending.is_empty() {
            return Err(LedgerError::NoPendingReservations(order_id.to_string()));
        }

        let mut summary = SettlementSummary {
            order_id: order_id.to_string(),
            settled: 0,
            failed: 0,
            last_error: None,
        };
        for row in &pending {
            match self.settle_row(row, settlement).await {
                Ok(level) => {
                    summary.settled += 1;
                    debug!("{} reservation {} ({} of {})", settlement.verb(), row.id, row.quantity, level.key());
                }
                Err(err) => {
                    self.report(settlement.verb(), &err);
                    summary.failed += 1;
                    summary.last_error = Some(err);
                }
            }
        }
        Ok(summary)
    }

    /// Releases the order's pending holds. Errors only when nothing was released.
    #[instrument(skip(self))]
    pub async fn release_inventory(&self, order_id: &str, reason: &str) -> LedgerResult<SettlementSummary> {
        debug!("Releasing order {}: {}", order_id, reason);
        let summary = self.settle_order(order_id, Settlement::Release).await?;
        if summary.settled == 0 {
            if let Some(err) = summary.last_error {
                return Err(err);
            }
        }
        info!("Released {} reservation(s) for order {}", summary.settled, order_id);
        Ok(summary)
    }

    /// Releases the order's pending holds and reports the outcome as a result.
    #[instrument(skip(self))]
    pub async fn release_reserved_stock(&self, order_id: &str, reason: &str) -> LedgerResult<OperationResult> {
        debug!("Releasing order {}: {}", order_id, reason);
        self.settle_as_result(order_id, Settlement::Release).await
    }

    /// Like release, but the holds end up `cancelled`.
    #[instrument(skip(self))]
    pub async fn cancel_reservation(&self, order_id: &str) -> LedgerResult<OperationResult> {
        self.settle_as_result(order_id, Settlement::Cancel).await
    }

    /// Turns the order's pending holds into permanent removals of on-hand stock.
    #[instrument(skip(self))]
    pub async fn commit_reservation(&self, order_id: &str) -> LedgerResult<OperationResult> {
        self.settle_as_result(order_id, Settlement::Commit).await
    }

    async fn settle_as_result(&self, order_id: &str, settlement: Settlement) -> LedgerResult<OperationResult> {
        match self.settle_order(order_id, settlement).await {
            Ok(summary) => {
                let result = summary.into_result(settlement.verb());
                info!("{}", result.message);
                Ok(result)
            }
            Err(err) if err.is_business() => {
                warn!("{} for order {} rejected: {}", settlement.verb(), order_id, err);
                Ok(OperationResult::failed(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Releases pending holds whose `expires_at` has passed and marks them `expired`.
    ///
    /// Returns how many holds were expired. Only the opt-in sweeper calls this.
    pub async fn expire_reservations(&self, now: DateTime<Utc>) -> LedgerResult<usize> {
        let overdue = self.reservations.find_expired(now, self.config.expiry_batch).await?;
        let mut expired = 0;
        for row in &overdue {
            match self.settle_row(row, Settlement::Expire).await {
                Ok(_) => expired += 1,
                Err(err) => self.report("expire", &err),
            }
        }
        if expired > 0 {
            info!("Expired {} overdue reservation(s)", expired);
        }
        Ok(expired)
    }
}
