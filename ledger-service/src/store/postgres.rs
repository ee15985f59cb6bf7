use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::CommandReply;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{LedgerStore, ProcessedCommandStore, ReservationStore, TransactionLog};
use crate::catalog::Catalog;
use crate::error::{LedgerError, LedgerResult};
use crate::models::*;
use crate::schema::*;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = inventory_levels)]
struct LevelRow {
    item_id: Uuid,
    warehouse_id: Uuid,
    quantity: i64,
    reserved: i64,
    available: i64,
    last_updated: DateTime<Utc>,
}

impl From<LevelRow> for InventoryLevel {
    fn from(row: LevelRow) -> Self {
        Self {
            item_id: row.item_id,
            warehouse_id: row.warehouse_id,
            quantity: row.quantity,
            reserved: row.reserved,
            available: row.available,
            last_updated: row.last_updated,
        }
    }
}

impl From<&InventoryLevel> for LevelRow {
    fn from(level: &InventoryLevel) -> Self {
        Self {
            item_id: level.item_id,
            warehouse_id: level.warehouse_id,
            quantity: level.quantity,
            reserved: level.reserved,
            available: level.available,
            last_updated: level.last_updated,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = inventory_transactions)]
struct TransactionRow {
    id: Uuid,
    item_id: Uuid,
    warehouse_id: Uuid,
    quantity: i64,
    kind: String,
    reference: String,
    user_id: String,
    recorded_at: DateTime<Utc>,
}

impl From<InventoryTransaction> for TransactionRow {
    fn from(tx: InventoryTransaction) -> Self {
        Self {
            id: tx.id,
            item_id: tx.item_id,
            warehouse_id: tx.warehouse_id,
            quantity: tx.quantity,
            kind: tx.kind.as_str().to_string(),
            reference: tx.reference,
            user_id: tx.user_id,
            recorded_at: tx.timestamp,
        }
    }
}

impl TryFrom<TransactionRow> for InventoryTransaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            item_id: row.item_id,
            warehouse_id: row.warehouse_id,
            quantity: row.quantity,
            kind: row.kind.parse()?,
            reference: row.reference,
            user_id: row.user_id,
            timestamp: row.recorded_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = inventory_reservations)]
struct ReservationRow {
    id: Uuid,
    order_id: String,
    product_id: Uuid,
    warehouse_id: Uuid,
    sku: String,
    quantity: i64,
    status: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl From<InventoryReservation> for ReservationRow {
    fn from(r: InventoryReservation) -> Self {
        Self {
            id: r.id,
            order_id: r.order_id,
            product_id: r.product_id,
            warehouse_id: r.warehouse_id,
            sku: r.sku,
            quantity: r.quantity,
            status: r.status.as_str().to_string(),
            created_at: r.created_at,
            completed_at: r.completed_at,
            expires_at: r.expires_at,
        }
    }
}

impl TryFrom<ReservationRow> for InventoryReservation {
    type Error = LedgerError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            sku: row.sku,
            quantity: row.quantity,
            status: row.status.parse()?,
            created_at: row.created_at,
            completed_at: row.completed_at,
            expires_at: row.expires_at,
        })
    }
}

fn reservations_from(rows: Vec<ReservationRow>) -> LedgerResult<Vec<InventoryReservation>> {
    rows.into_iter().map(InventoryReservation::try_from).collect()
}

#[derive(Debug, Clone, Queryable)]
struct ItemRow {
    id: Uuid,
    sku: String,
    name: String,
    attributes: serde_json::Value,
}

impl From<ItemRow> for CatalogItem {
    fn from(row: ItemRow) -> Self {
        let attributes: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(row.attributes).unwrap_or_default();
        Self { id: row.id, sku: row.sku, name: row.name, attributes }
    }
}

/// Applies the embedded migrations. Runs on a blocking thread because the
/// migration harness drives a synchronous connection.
pub async fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    let url = database_url.to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
        info!("Applied {} migration(s)", applied.len());
        Ok(())
    })
    .await?
}

/// Failure inside one ledger write transaction. Database errors stay
/// unconverted until the transaction ends so lock waits can be recognized.
#[derive(Debug)]
enum WriteError {
    Ledger(LedgerError),
    Database(diesel::result::Error),
}

impl From<LedgerError> for WriteError {
    fn from(err: LedgerError) -> Self {
        WriteError::Ledger(err)
    }
}

impl From<diesel::result::Error> for WriteError {
    fn from(err: diesel::result::Error) -> Self {
        WriteError::Database(err)
    }
}

/// Postgres cancels a statement that waited past `lock_timeout` with SQLSTATE
/// 55P03 (`lock_not_available`). diesel has no kind for that class and reports
/// it as `Unknown`, carrying the server message
/// "canceling statement due to lock timeout".
fn is_lock_timeout(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(DatabaseErrorKind::Unknown, info)
            if info.message().contains("lock timeout")
    )
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = processed_commands)]
struct ProcessedCommandRow {
    idempotency_key: String,
    command_id: Uuid,
    reply: serde_json::Value,
    processed_at: DateTime<Utc>,
}

fn transactions_matching(filter: &TransactionFilter) -> inventory_transactions::BoxedQuery<'static, Pg> {
    let mut query = inventory_transactions::table.into_boxed();
    if let Some(id) = filter.item_id {
        query = query.filter(inventory_transactions::item_id.eq(id));
    }
    if let Some(id) = filter.warehouse_id {
        query = query.filter(inventory_transactions::warehouse_id.eq(id));
    }
    if let Some(kind) = filter.kind {
        query = query.filter(inventory_transactions::kind.eq(kind.as_str()));
    }
    if let Some(reference) = filter.reference.clone() {
        query = query.filter(inventory_transactions::reference.eq(reference));
    }
    if let Some(user) = filter.user_id.clone() {
        query = query.filter(inventory_transactions::user_id.eq(user));
    }
    query
}

/// PostgreSQL backend. Row locking is `SELECT ... FOR UPDATE` inside one
/// database transaction per [`LedgerWrite`].
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: DbPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub async fn connect(database_url: &str, lock_timeout: Duration) -> anyhow::Result<Self> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder().build(config).await?;
        Ok(Self::new(pool, lock_timeout))
    }

    async fn apply_hold(
        conn: &mut AsyncPgConnection,
        effect: HoldEffect,
        now: DateTime<Utc>,
    ) -> Result<(), WriteError> {
        match effect {
            HoldEffect::Create(new) => {
                new.validate()?;
                let row = ReservationRow::from(new.into_record(Uuid::new_v4(), now));
                diesel::insert_into(inventory_reservations::table)
                    .values(&row)
                    .execute(conn)
                    .await?;
            }
            HoldEffect::Transition { reservation_id, status, completed_at, expected } => {
                let row = inventory_reservations::table
                    .find(reservation_id)
                    .for_update()
                    .first::<ReservationRow>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| LedgerError::not_found("reservation", reservation_id))?;
                if let Some(expected) = expected {
                    if row.status != expected.as_str() {
                        return Err(LedgerError::NoPendingReservations(row.order_id).into());
                    }
                }
                diesel::update(inventory_reservations::table.find(reservation_id))
                    .set((
                        inventory_reservations::status.eq(status.as_str()),
                        inventory_reservations::completed_at.eq(Some(completed_at)),
                    ))
                    .execute(conn)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn get_level(&self, key: LevelKey) -> LedgerResult<InventoryLevel> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let row = inventory_levels::table
            .find((key.item_id, key.warehouse_id))
            .first::<LevelRow>(conn)
            .await
            .optional()?;
        Ok(row.map(InventoryLevel::from).unwrap_or_else(|| InventoryLevel::empty(key)))
    }

    async fn list_levels(&self, filter: &LevelFilter) -> LedgerResult<Vec<InventoryLevel>> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let mut query = inventory_levels::table.into_boxed();
        if let Some(id) = filter.item_id {
            query = query.filter(inventory_levels::item_id.eq(id));
        }
        if let Some(id) = filter.warehouse_id {
            query = query.filter(inventory_levels::warehouse_id.eq(id));
        }
        let rows = query
            .order(inventory_levels::last_updated.desc())
            .load::<LevelRow>(conn)
            .await?;
        Ok(rows.into_iter().map(InventoryLevel::from).collect())
    }

    async fn apply(&self, write: LedgerWrite) -> LedgerResult<InventoryLevel> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let key = write.key;
        let lock_timeout_ms = self.lock_timeout.as_millis();

        let result = conn
            .transaction::<_, WriteError, _>(|conn| {
                async move {
                    diesel::sql_query(format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout_ms))
                        .execute(conn)
                        .await?;

                    // Materialize the zero row first so that concurrent first writers
                    // serialize on it instead of racing on the insert.
                    diesel::insert_into(inventory_levels::table)
                        .values(&LevelRow::from(&InventoryLevel::empty(key)))
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;

                    let current: InventoryLevel = inventory_levels::table
                        .find((key.item_id, key.warehouse_id))
                        .for_update()
                        .first::<LevelRow>(conn)
                        .await?
                        .into();

                    let now = Utc::now();
                    let next = write.op.apply(&current, now)?;

                    if let Some(effect) = write.hold {
                        Self::apply_hold(conn, effect, now).await?;
                    }
                    if let Some(entry) = write.journal {
                        entry.validate()?;
                        let row = TransactionRow::from(entry.into_record(Uuid::new_v4(), now));
                        diesel::insert_into(inventory_transactions::table)
                            .values(&row)
                            .execute(conn)
                            .await?;
                    }

                    diesel::update(inventory_levels::table.find((key.item_id, key.warehouse_id)))
                        .set((
                            inventory_levels::quantity.eq(next.quantity),
                            inventory_levels::reserved.eq(next.reserved),
                            inventory_levels::available.eq(next.available),
                            inventory_levels::last_updated.eq(next.last_updated),
                        ))
                        .execute(conn)
                        .await?;

                    Ok(next)
                }
                .scope_boxed()
            })
            .await;

        result.map_err(|err| match err {
            WriteError::Database(e) if is_lock_timeout(&e) => LedgerError::LockTimeout(key),
            WriteError::Database(e) => e.into(),
            WriteError::Ledger(e) => e,
        })
    }
}

#[async_trait]
impl TransactionLog for PgStore {
    async fn append(&self, entry: NewTransaction) -> LedgerResult<InventoryTransaction> {
        entry.validate()?;
        let record = entry.into_record(Uuid::new_v4(), Utc::now());
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        diesel::insert_into(inventory_transactions::table)
            .values(&TransactionRow::from(record.clone()))
            .execute(conn)
            .await?;
        Ok(record)
    }

    async fn query(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> LedgerResult<(Vec<InventoryTransaction>, u64)> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let total: i64 = transactions_matching(filter).count().get_result(conn).await?;
        let rows = transactions_matching(filter)
            .order((inventory_transactions::recorded_at.desc(), inventory_transactions::id.desc()))
            .limit(i64::from(page.page_size))
            .offset(page.offset() as i64)
            .load::<TransactionRow>(conn)
            .await?;
        let transactions = rows
            .into_iter()
            .map(InventoryTransaction::try_from)
            .collect::<LedgerResult<Vec<_>>>()?;
        Ok((transactions, total.max(0) as u64))
    }
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn create(&self, reservation: NewReservation) -> LedgerResult<InventoryReservation> {
        reservation.validate()?;
        let record = reservation.into_record(Uuid::new_v4(), Utc::now());
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        diesel::insert_into(inventory_reservations::table)
            .values(&ReservationRow::from(record.clone()))
            .execute(conn)
            .await?;
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> LedgerResult<InventoryReservation> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        inventory_reservations::table
            .find(id)
            .first::<ReservationRow>(conn)
            .await
            .optional()?
            .ok_or_else(|| LedgerError::not_found("reservation", id))?
            .try_into()
    }

    async fn find_by_order_id(&self, order_id: &str) -> LedgerResult<Vec<InventoryReservation>> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let rows = inventory_reservations::table
            .filter(inventory_reservations::order_id.eq(order_id))
            .order(inventory_reservations::created_at.asc())
            .load::<ReservationRow>(conn)
            .await?;
        reservations_from(rows)
    }

    async fn transition(
        &self,
        id: Uuid,
        status: ReservationStatus,
        completed_at: DateTime<Utc>,
    ) -> LedgerResult<InventoryReservation> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        diesel::update(inventory_reservations::table.find(id))
            .set((
                inventory_reservations::status.eq(status.as_str()),
                inventory_reservations::completed_at.eq(Some(completed_at)),
            ))
            .get_result::<ReservationRow>(conn)
            .await
            .optional()?
            .ok_or_else(|| LedgerError::not_found("reservation", id))?
            .try_into()
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> LedgerResult<Vec<InventoryReservation>> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let rows = inventory_reservations::table
            .filter(inventory_reservations::status.eq(ReservationStatus::Pending.as_str()))
            .filter(inventory_reservations::expires_at.le(now))
            .order(inventory_reservations::expires_at.asc())
            .limit(limit as i64)
            .load::<ReservationRow>(conn)
            .await?;
        reservations_from(rows)
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn resolve_item_by_id(&self, id: Uuid) -> LedgerResult<CatalogItem> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        inventory_items::table
            .find(id)
            .first::<ItemRow>(conn)
            .await
            .optional()?
            .map(CatalogItem::from)
            .ok_or_else(|| LedgerError::not_found("item", id))
    }

    async fn resolve_item_by_sku(&self, sku: &str) -> LedgerResult<CatalogItem> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        inventory_items::table
            .filter(inventory_items::sku.eq(sku))
            .first::<ItemRow>(conn)
            .await
            .optional()?
            .map(CatalogItem::from)
            .ok_or_else(|| LedgerError::not_found("item", sku))
    }

    async fn resolve_warehouse(&self, id: Uuid) -> LedgerResult<Warehouse> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let row: Option<(Uuid, String)> = warehouses::table
            .find(id)
            .first::<(Uuid, String)>(conn)
            .await
            .optional()?;
        row.map(|(id, name)| Warehouse { id, name })
            .ok_or_else(|| LedgerError::not_found("warehouse", id))
    }
}

#[async_trait]
impl ProcessedCommandStore for PgStore {
    async fn find_reply(&self, idempotency_key: &str) -> LedgerResult<Option<CommandReply>> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let reply = processed_commands::table
            .find(idempotency_key)
            .select(processed_commands::reply)
            .first::<serde_json::Value>(conn)
            .await
            .optional()?;
        reply
            .map(|value| serde_json::from_value(value).map_err(LedgerError::infrastructure))
            .transpose()
    }

    async fn record_reply(&self, idempotency_key: &str, reply: &CommandReply) -> LedgerResult<()> {
        let row = ProcessedCommandRow {
            idempotency_key: idempotency_key.to_string(),
            command_id: reply.command_id,
            reply: serde_json::to_value(reply).map_err(LedgerError::infrastructure)?,
            processed_at: Utc::now(),
        };
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        diesel::insert_into(processed_commands::table)
            .values(&row)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
        Ok(())
    }
}
