//! Postgres-backed package store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (lock not available) | `55P03` | `LockBusy` | `FOR UPDATE NOWAIT` hit a row locked by another transaction |
//! | Database (foreign key violation) | `23503` | `NotFound` | Insert referencing an unknown package type |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed | N/A | `Closed` | Connection pool was closed |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! Every transaction is a `sqlx::Transaction`; dropping it without commit
//! rolls back, which also releases row locks taken with `FOR UPDATE NOWAIT`.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, instrument};

use parcelhub_core::{PackageId, PackageTypeId, SessionId, TransportCompanyId};
use parcelhub_shipping::{
    DeliveryCost, NewPackage, Package, PackageFilter, PackagePage, PackageType, PageRequest, seed_package_types,
};

use super::{PackageStore, PackageTx, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS package_types (
    id      INTEGER PRIMARY KEY,
    name    VARCHAR(100) NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS packages (
    id                   BIGSERIAL PRIMARY KEY,
    name                 VARCHAR(255) NOT NULL,
    weight               DOUBLE PRECISION NOT NULL CHECK (weight > 0),
    package_type_id      INTEGER NOT NULL REFERENCES package_types (id),
    content_cost_usd     DOUBLE PRECISION NOT NULL CHECK (content_cost_usd >= 0),
    delivery_cost_rub    DOUBLE PRECISION NULL,
    session_id           VARCHAR(255) NOT NULL,
    transport_company_id BIGINT NULL,
    created_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at           TIMESTAMPTZ NULL
);

CREATE INDEX IF NOT EXISTS packages_session_idx ON packages (session_id, created_at DESC);
CREATE INDEX IF NOT EXISTS packages_unpriced_idx ON packages (id) WHERE delivery_cost_rub IS NULL;
"#;

const PACKAGE_COLUMNS: &str = "id, name, weight, package_type_id, content_cost_usd, delivery_cost_rub, \
     session_id, transport_company_id, created_at, updated_at";

/// Postgres package store over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PostgresPackageStore {
    pool: PgPool,
}

impl PostgresPackageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small pool sized for the API process plus workers.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables if missing and seed the package types.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;

        for package_type in seed_package_types() {
            sqlx::query("INSERT INTO package_types (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
                .bind(package_type.id.get())
                .bind(&package_type.name)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("seed_package_types", e))?;
        }

        info!("package schema ready");
        Ok(())
    }
}

#[async_trait]
impl PackageStore for PostgresPackageStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx, StoreError> {
        let tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PostgresTx { tx: Some(tx) })
    }
}

/// Open Postgres transaction.
pub struct PostgresTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresTx {
    fn conn(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl PackageTx for PostgresTx {
    async fn package_types(&mut self) -> Result<Vec<PackageType>, StoreError> {
        let conn = self.conn()?;
        let rows = sqlx::query("SELECT id, name FROM package_types ORDER BY id")
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("package_types", e))?;
        rows.iter().map(package_type_from_row).collect()
    }

    async fn package_type(&mut self, id: PackageTypeId) -> Result<Option<PackageType>, StoreError> {
        let conn = self.conn()?;
        let row = sqlx::query("SELECT id, name FROM package_types WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("package_type", e))?;
        row.as_ref().map(package_type_from_row).transpose()
    }

    #[instrument(skip(self, input, session_id), fields(package_type_id = %input.package_type_id), err)]
    async fn insert_package(&mut self, input: NewPackage, session_id: &SessionId) -> Result<Package, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO packages (name, weight, package_type_id, content_cost_usd, session_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {PACKAGE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&input.name)
            .bind(input.weight_kg)
            .bind(input.package_type_id.get())
            .bind(input.content_cost_usd)
            .bind(session_id.as_str())
            .fetch_one(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("insert_package", e))?;
        package_from_row(&row)
    }

    async fn find_package(&mut self, id: PackageId, session_id: &SessionId) -> Result<Option<Package>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = $1 AND session_id = $2");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .bind(session_id.as_str())
            .fetch_optional(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("find_package", e))?;
        row.as_ref().map(package_from_row).transpose()
    }

    async fn list_packages(
        &mut self,
        session_id: &SessionId,
        filter: PackageFilter,
        page: PageRequest,
    ) -> Result<PackagePage, StoreError> {
        const WHERE: &str = "WHERE session_id = $1 \
             AND ($2::INTEGER IS NULL OR package_type_id = $2) \
             AND ($3::BOOLEAN IS NULL OR (delivery_cost_rub IS NOT NULL) = $3)";

        let type_id = filter.package_type_id.map(|t| t.get());
        let conn = self.conn()?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM packages {WHERE}"))
            .bind(session_id.as_str())
            .bind(type_id)
            .bind(filter.has_delivery_cost)
            .fetch_one(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("count_packages", e))?;

        let sql = format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages {WHERE} \
             ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&sql)
            .bind(session_id.as_str())
            .bind(type_id)
            .bind(filter.has_delivery_cost)
            .bind(i64::from(page.size()))
            .bind(page.offset() as i64)
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("list_packages", e))?;

        let items = rows.iter().map(package_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(PackagePage::new(items, total.max(0) as u64, page))
    }

    #[instrument(skip(self), err)]
    async fn unpriced_packages(&mut self) -> Result<Vec<Package>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE delivery_cost_rub IS NULL ORDER BY id");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("unpriced_packages", e))?;
        rows.iter().map(package_from_row).collect()
    }

    #[instrument(skip(self, session_id), fields(package_id = %id), err)]
    async fn lock_package_nowait(
        &mut self,
        id: PackageId,
        session_id: &SessionId,
    ) -> Result<Option<Package>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = $1 AND session_id = $2 FOR UPDATE NOWAIT"
        );
        let row = sqlx::query(&sql)
            .bind(id.get())
            .bind(session_id.as_str())
            .fetch_optional(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("lock_package_nowait", e))?;
        row.as_ref().map(package_from_row).transpose()
    }

    #[instrument(skip(self), fields(package_id = %id, company_id = %company), err)]
    async fn set_transport_company(&mut self, id: PackageId, company: TransportCompanyId) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let result = sqlx::query("UPDATE packages SET transport_company_id = $2, updated_at = now() WHERE id = $1")
            .bind(id.get())
            .bind(company.get())
            .execute(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("set_transport_company", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("package {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, costs), fields(count = costs.len()), err)]
    async fn set_delivery_costs(&mut self, costs: &[(PackageId, DeliveryCost)]) -> Result<(), StoreError> {
        if costs.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = costs.iter().map(|(id, _)| id.get()).collect();
        let rubles: Vec<f64> = costs.iter().map(|(_, cost)| cost.as_rubles()).collect();

        let conn = self.conn()?;
        sqlx::query(
            r#"
            UPDATE packages AS p
            SET delivery_cost_rub = v.cost, updated_at = now()
            FROM UNNEST($1::BIGINT[], $2::DOUBLE PRECISION[]) AS v(id, cost)
            WHERE p.id = v.id
            "#,
        )
        .bind(ids)
        .bind(rubles)
        .execute(&mut **conn)
        .await
        .map_err(|e| map_sqlx_error("set_delivery_costs", e))?;
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") => StoreError::LockBusy,
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Closed,
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn package_type_from_row(row: &PgRow) -> Result<PackageType, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Storage(format!("failed to decode package type row: {e}"));
    Ok(PackageType {
        id: PackageTypeId::from_raw(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
    })
}

fn package_from_row(row: &PgRow) -> Result<Package, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Storage(format!("failed to decode package row: {e}"));

    let session: String = row.try_get("session_id").map_err(decode)?;
    let session_id = SessionId::from_str(&session)
        .map_err(|e| StoreError::Storage(format!("stored session id is invalid: {e}")))?;

    let delivery_cost = row
        .try_get::<Option<f64>, _>("delivery_cost_rub")
        .map_err(decode)?
        .map(|rubles| {
            DeliveryCost::from_rubles(rubles)
                .ok_or_else(|| StoreError::Storage(format!("stored delivery cost is invalid: {rubles}")))
        })
        .transpose()?;

    let transport_company_id = row
        .try_get::<Option<i64>, _>("transport_company_id")
        .map_err(decode)?
        .map(TransportCompanyId::from_raw);

    Ok(Package {
        id: PackageId::from_raw(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        weight_kg: row.try_get("weight").map_err(decode)?,
        package_type_id: PackageTypeId::from_raw(row.try_get("package_type_id").map_err(decode)?),
        content_cost_usd: row.try_get("content_cost_usd").map_err(decode)?,
        session_id,
        delivery_cost,
        transport_company_id,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<Option<DateTime<Utc>>, _>("updated_at").map_err(decode)?,
    })
}

// These run only against a live database:
//   DATABASE_URL=postgres://... cargo test -p parcelhub-infra -- --ignored
#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> PostgresPackageStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres tests");
        let store = PostgresPackageStore::connect(&url, 5).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    async fn insert(store: &PostgresPackageStore, session: &SessionId) -> Package {
        let mut tx = store.begin().await.unwrap();
        let p = tx
            .insert_package(NewPackage::new("parcel", 2.5, 2, 150.0).unwrap(), session)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        p
    }

    #[tokio::test]
    #[ignore]
    async fn nowait_lock_reports_busy() {
        let store = store().await;
        let session = SessionId::generate();
        let p = insert(&store, &session).await;

        let mut first = store.begin().await.unwrap();
        assert!(first.lock_package_nowait(p.id, &session).await.unwrap().is_some());

        let mut second = store.begin().await.unwrap();
        assert_eq!(
            second.lock_package_nowait(p.id, &session).await.unwrap_err(),
            StoreError::LockBusy
        );

        first.rollback().await.unwrap();
        let mut third = store.begin().await.unwrap();
        assert!(third.lock_package_nowait(p.id, &session).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore]
    async fn batch_cost_update_round_trips_kopecks() {
        let store = store().await;
        let session = SessionId::generate();
        let p = insert(&store, &session).await;

        let mut tx = store.begin().await.unwrap();
        tx.set_delivery_costs(&[(p.id, DeliveryCost::from_kopecks(24_750))]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let loaded = tx.find_package(p.id, &session).await.unwrap().unwrap();
        assert_eq!(loaded.delivery_cost, Some(DeliveryCost::from_kopecks(24_750)));
        assert!(loaded.updated_at.is_some());
    }

    #[tokio::test]
    #[ignore]
    async fn unknown_package_type_maps_to_not_found() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_package(NewPackage::new("parcel", 1.0, 9_999, 1.0).unwrap(), &SessionId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
