//! Postgres-backed stock store.
//!
//! Parts live in `spare_parts`, the ledger in `stock_movements`. Every part
//! write is a single version-guarded `UPDATE`, so two writers that read the
//! same version cannot both commit.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database | `23505`, `40001`, `40P01` | `Concurrency` | Lost race, serialization failure or deadlock |
//! | Database | `55P03`, `57014` | `Concurrency` | `lock_timeout` or statement timeout expired |
//! | Database | `23503` | `ForeignKey` / `Restricted` | Unknown actor on insert, referenced part on delete |
//! | Database | `23514` | `Domain` | Check constraint (e.g. negative quantity) |
//! | Database (other), PoolClosed, Io, ... | N/A | `Unavailable` | Storage is not usable |
//! | ColumnDecode, Decode | N/A | `Corrupt` | Row cannot be read back |
//!
//! Schema management is left to the deployment.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, Span};

use sparestock_core::{
    ActorId, AggregateRoot, DomainError, ExpectedVersion, Money, MovementId, PartId,
};
use sparestock_inventory::{Movement, NewMovement, NewPart, Part, PartState};

use super::query::{MovementFilter, MovementPage, Pagination, PartFilter};
use super::r#trait::{StockStore, StoreError};

const PART_COLUMNS: &str = "id, name, category, description, quantity, minimum_quantity, \
     unit_price_cents, total_value_cents, status, version, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, spare_part_id, direction, quantity, unit_price_cents, \
     total_price_cents, occurred_at, user_id, reason";

const MOVEMENT_WHERE: &str = "($1::bigint IS NULL OR spare_part_id = $1) \
     AND ($2::bigint IS NULL OR user_id = $2) \
     AND ($3::text IS NULL OR direction = $3) \
     AND ($4::timestamptz IS NULL OR occurred_at >= $4) \
     AND ($5::timestamptz IS NULL OR occurred_at <= $5)";

/// Postgres-backed stock store.
///
/// `Send + Sync`; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction with the configured `lock_timeout` applied to it.
    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        Ok(tx)
    }

    /// Explain a guarded `UPDATE` that touched no row, then roll back.
    async fn reject_guarded_write(
        mut tx: Transaction<'static, Postgres>,
        part_id: PartId,
        expected_version: ExpectedVersion,
    ) -> StoreError {
        let current = sqlx::query("SELECT version FROM spare_parts WHERE id = $1")
            .bind(part_id.get())
            .fetch_optional(&mut *tx)
            .await;

        let err = match current {
            Ok(None) => StoreError::PartNotFound(part_id),
            Ok(Some(row)) => match row.try_get::<i64, _>("version") {
                Ok(version) => StoreError::Concurrency(format!(
                    "part {part_id}: expected {expected_version:?}, found {version}"
                )),
                Err(e) => map_sqlx_error("check_version", e),
            },
            Err(e) => map_sqlx_error("check_version", e),
        };

        if let Err(e) = tx.rollback().await {
            return map_sqlx_error("rollback", e);
        }
        err
    }
}

fn expected_param(expected_version: ExpectedVersion) -> Option<i64> {
    match expected_version {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    }
}

#[async_trait::async_trait]
impl StockStore for PostgresStockStore {
    #[instrument(
        skip(self, draft),
        fields(category = %draft.category, part_id = tracing::field::Empty),
        err
    )]
    async fn insert_part(&self, draft: NewPart) -> Result<Part, StoreError> {
        draft.validate()?;
        let draft = draft.normalized();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO spare_parts (
                name, category, description, quantity, minimum_quantity,
                unit_price_cents, total_value_cents, status, version
            )
            VALUES ($1, $2, $3, 0, $4, $5, 0, 'active', 1)
            RETURNING {PART_COLUMNS}
            "#
        ))
        .bind(&draft.name)
        .bind(&draft.category)
        .bind(&draft.description)
        .bind(draft.minimum_quantity)
        .bind(draft.unit_price.cents())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_part", e))?;

        let part = decode_part(&row)?;
        Span::current().record("part_id", part.part_id().get());
        Ok(part)
    }

    #[instrument(skip(self), fields(part_id = %part_id), err)]
    async fn load_part(&self, part_id: PartId) -> Result<Option<Part>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PART_COLUMNS} FROM spare_parts WHERE id = $1"))
            .bind(part_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_part", e))?;

        row.as_ref().map(decode_part).transpose()
    }

    #[instrument(
        skip(self, part),
        fields(part_id = %part.part_id(), expected_version = ?expected_version),
        err
    )]
    async fn save_part(
        &self,
        part: &Part,
        expected_version: ExpectedVersion,
    ) -> Result<Part, StoreError> {
        let mut tx = self.begin("save_part").await?;

        // quantity is never written here; total_value follows the stored quantity.
        let row = sqlx::query(&format!(
            r#"
            UPDATE spare_parts
            SET name = $2,
                category = $3,
                description = $4,
                minimum_quantity = $5,
                unit_price_cents = $6,
                total_value_cents = quantity * $6,
                status = $7,
                version = $8,
                updated_at = NOW()
            WHERE id = $1 AND ($9::bigint IS NULL OR version = $9)
            RETURNING {PART_COLUMNS}
            "#
        ))
        .bind(part.part_id().get())
        .bind(part.name())
        .bind(part.category())
        .bind(part.description())
        .bind(part.minimum_quantity())
        .bind(part.unit_price().cents())
        .bind(part.status().as_str())
        .bind(part.version() as i64)
        .bind(expected_param(expected_version))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("save_part", e))?;

        let Some(row) = row else {
            return Err(Self::reject_guarded_write(tx, part.part_id(), expected_version).await);
        };
        let saved = decode_part(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(saved)
    }

    #[instrument(
        skip(self, part, movement),
        fields(
            part_id = %part.part_id(),
            direction = %movement.direction,
            quantity = movement.quantity,
            expected_version = ?expected_version,
            movement_id = tracing::field::Empty
        ),
        err
    )]
    async fn commit_movement(
        &self,
        part: &Part,
        expected_version: ExpectedVersion,
        movement: NewMovement,
    ) -> Result<(Part, Movement), StoreError> {
        if movement.part_id != part.part_id() {
            return Err(DomainError::invariant("movement does not belong to part").into());
        }

        let span = Span::current();
        let mut tx = self.begin("commit_movement").await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE spare_parts
            SET quantity = $2,
                total_value_cents = $3,
                version = $4,
                updated_at = NOW()
            WHERE id = $1 AND ($5::bigint IS NULL OR version = $5)
            RETURNING {PART_COLUMNS}
            "#
        ))
        .bind(part.part_id().get())
        .bind(part.quantity())
        .bind(part.total_value().cents())
        .bind(part.version() as i64)
        .bind(expected_param(expected_version))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_part", e))?;

        let Some(row) = row else {
            return Err(Self::reject_guarded_write(tx, part.part_id(), expected_version).await);
        };
        let updated = decode_part(&row)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO stock_movements (
                spare_part_id, direction, quantity, unit_price_cents,
                total_price_cents, occurred_at, user_id, reason
            )
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, NOW()), $7, $8)
            RETURNING {MOVEMENT_COLUMNS}
            "#
        ))
        .bind(movement.part_id.get())
        .bind(movement.direction.as_str())
        .bind(movement.quantity)
        .bind(movement.unit_price.cents())
        .bind(movement.total_price.cents())
        .bind(movement.occurred_at)
        .bind(movement.actor_id.get())
        .bind(&movement.reason)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        let committed = decode_movement(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        span.record("movement_id", committed.id.get());
        Ok((updated, committed))
    }

    #[instrument(skip(self), fields(part_id = %part_id), err)]
    async fn delete_part(&self, part_id: PartId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM spare_parts WHERE id = $1")
            .bind(part_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| match map_sqlx_error("delete_part", e) {
                StoreError::ForeignKey(_) => StoreError::Restricted(format!(
                    "part {part_id} is referenced by stock movements"
                )),
                other => other,
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PartNotFound(part_id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_parts(&self, filter: &PartFilter) -> Result<Vec<Part>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PART_COLUMNS}
            FROM spare_parts
            WHERE ($1::text IS NULL OR status = $1)
                AND ($2::text IS NULL OR category = $2)
            ORDER BY id ASC
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.category.as_deref())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_parts", e))?;

        rows.iter().map(decode_part).collect()
    }

    #[instrument(skip(self), fields(returned = tracing::field::Empty), err)]
    async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let span = Span::current();

        let count_row = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM stock_movements WHERE {MOVEMENT_WHERE}"
        ))
        .bind(filter.part_id.map(|id| id.get()))
        .bind(filter.actor_id.map(|id| id.get()))
        .bind(filter.direction.map(|d| d.as_str()))
        .bind(filter.occurred_after)
        .bind(filter.occurred_before)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_movements", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_movements", e))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            WHERE {MOVEMENT_WHERE}
            ORDER BY occurred_at DESC, id DESC
            LIMIT $6 OFFSET $7
            "#
        ))
        .bind(filter.part_id.map(|id| id.get()))
        .bind(filter.actor_id.map(|id| id.get()))
        .bind(filter.direction.map(|d| d.as_str()))
        .bind(filter.occurred_after)
        .bind(filter.occurred_before)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        let movements = rows.iter().map(decode_movement).collect::<Result<Vec<_>, _>>()?;
        span.record("returned", movements.len());
        Ok(MovementPage::new(movements, total.max(0) as u64, pagination))
    }

    #[instrument(skip(self), err)]
    async fn scan_movements(&self, filter: &MovementFilter) -> Result<Vec<Movement>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE {MOVEMENT_WHERE} ORDER BY id ASC"
        ))
        .bind(filter.part_id.map(|id| id.get()))
        .bind(filter.actor_id.map(|id| id.get()))
        .bind(filter.direction.map(|d| d.as_str()))
        .bind(filter.occurred_after)
        .bind(filter.occurred_before)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scan_movements", e))?;

        rows.iter().map(decode_movement).collect()
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // unique violation, serialization failure, deadlock
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                // lock_timeout / statement_timeout
                Some("55P03") | Some("57014") => StoreError::Concurrency(msg),
                Some("23503") => StoreError::ForeignKey(msg),
                Some("23514") => StoreError::Domain(DomainError::invariant(msg)),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("failed to decode row in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_part(row: &PgRow) -> Result<Part, StoreError> {
    PartRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_part", e))?
        .try_into()
}

fn decode_movement(row: &PgRow) -> Result<Movement, StoreError> {
    MovementRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_movement", e))?
        .try_into()
}

fn corrupt(what: &str, err: DomainError) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

// SQLx row types

#[derive(Debug)]
struct PartRow {
    id: i64,
    name: String,
    category: String,
    description: Option<String>,
    quantity: i64,
    minimum_quantity: i64,
    unit_price_cents: i64,
    total_value_cents: i64,
    status: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PartRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PartRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            description: row.try_get("description")?,
            quantity: row.try_get("quantity")?,
            minimum_quantity: row.try_get("minimum_quantity")?,
            unit_price_cents: row.try_get("unit_price_cents")?,
            total_value_cents: row.try_get("total_value_cents")?,
            status: row.try_get("status")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<PartRow> for Part {
    type Error = StoreError;

    fn try_from(row: PartRow) -> Result<Self, Self::Error> {
        Ok(Part::rehydrate(PartState {
            id: PartId::new(row.id),
            name: row.name,
            category: row.category,
            description: row.description,
            quantity: row.quantity,
            unit_price: Money::from_cents(row.unit_price_cents)
                .map_err(|e| corrupt("spare_parts.unit_price_cents", e))?,
            total_value: Money::from_cents(row.total_value_cents)
                .map_err(|e| corrupt("spare_parts.total_value_cents", e))?,
            minimum_quantity: row.minimum_quantity,
            status: row
                .status
                .parse()
                .map_err(|e| corrupt("spare_parts.status", e))?,
            version: row.version.max(0) as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }
}

#[derive(Debug)]
struct MovementRow {
    id: i64,
    spare_part_id: i64,
    direction: String,
    quantity: i64,
    unit_price_cents: i64,
    total_price_cents: i64,
    occurred_at: DateTime<Utc>,
    user_id: i64,
    reason: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            spare_part_id: row.try_get("spare_part_id")?,
            direction: row.try_get("direction")?,
            quantity: row.try_get("quantity")?,
            unit_price_cents: row.try_get("unit_price_cents")?,
            total_price_cents: row.try_get("total_price_cents")?,
            occurred_at: row.try_get("occurred_at")?,
            user_id: row.try_get("user_id")?,
            reason: row.try_get("reason")?,
        })
    }
}

impl TryFrom<MovementRow> for Movement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(Movement {
            id: MovementId::new(row.id),
            part_id: PartId::new(row.spare_part_id),
            direction: row
                .direction
                .parse()
                .map_err(|e| corrupt("stock_movements.direction", e))?,
            quantity: row.quantity,
            unit_price: Money::from_cents(row.unit_price_cents)
                .map_err(|e| corrupt("stock_movements.unit_price_cents", e))?,
            total_price: Money::from_cents(row.total_price_cents)
                .map_err(|e| corrupt("stock_movements.total_price_cents", e))?,
            occurred_at: row.occurred_at,
            actor_id: ActorId::new(row.user_id),
            reason: row.reason,
        })
    }
}
