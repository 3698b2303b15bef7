//! Sqlite-backed ship repository.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::RepositoryError;
use crate::repository::ShipRepository;
use crate::ship::{Ship, ShipSpec, ShipStatus};

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn row_to_ship(row: &sqlx::sqlite::SqliteRow) -> Ship {
    Ship {
        id: row.get("id"),
        status: ShipStatus::from_i32(row.get::<i64, _>("status") as i32),
        container_id: row.get("container_id"),
        ip_address: row.get("ip_address"),
        created_at: ms_to_dt(row.get("created_at_ms")),
        updated_at: ms_to_dt(row.get("updated_at_ms")),
        ttl: row.get("ttl_seconds"),
        deadline: ms_to_dt(row.get("deadline_ms")),
        max_session_num: row.get::<i64, _>("max_session_num") as u32,
        spec: ShipSpec {
            cpus: row.get("spec_cpus"),
            memory: row.get("spec_memory"),
        },
    }
}

#[derive(Clone)]
pub struct SqliteShipRepository {
    pool: SqlitePool,
}

impl SqliteShipRepository {
    /// Connect to `database_url` (e.g. `sqlite://bay.db?mode=rwc`,
    /// `sqlite::memory:`) and bootstrap the schema.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(RepositoryError::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Additive-only schema bootstrap.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ships (
                id TEXT PRIMARY KEY,
                status INTEGER NOT NULL,
                container_id TEXT NOT NULL DEFAULT '',
                ip_address TEXT NOT NULL DEFAULT '',
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                ttl_seconds INTEGER NOT NULL,
                deadline_ms INTEGER NOT NULL,
                max_session_num INTEGER NOT NULL,
                spec_cpus REAL,
                spec_memory TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ships_status ON ships(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ship_sessions (
                session_id TEXT PRIMARY KEY,
                ship_id TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ship_sessions_ship ON ship_sessions(ship_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ShipRepository for SqliteShipRepository {
    async fn insert(&self, ship: &Ship) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO ships (id, status, container_id, ip_address, created_at_ms,
                 updated_at_ms, ttl_seconds, deadline_ms, max_session_num, spec_cpus, spec_memory)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&ship.id)
        .bind(ship.status.as_i32())
        .bind(&ship.container_id)
        .bind(&ship.ip_address)
        .bind(dt_to_ms(ship.created_at))
        .bind(dt_to_ms(ship.updated_at))
        .bind(ship.ttl)
        .bind(dt_to_ms(ship.deadline))
        .bind(ship.max_session_num as i64)
        .bind(ship.spec.cpus)
        .bind(&ship.spec.memory)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::DuplicateKey {
                    key: ship.id.clone(),
                }
            }
            _ => RepositoryError::from(e),
        })?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Ship>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM ships WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_ship))
    }

    async fn update(&self, ship: &Ship) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE ships SET status = ?2, container_id = ?3, ip_address = ?4,
                 updated_at_ms = ?5, ttl_seconds = ?6, deadline_ms = ?7,
                 max_session_num = ?8, spec_cpus = ?9, spec_memory = ?10
             WHERE id = ?1",
        )
        .bind(&ship.id)
        .bind(ship.status.as_i32())
        .bind(&ship.container_id)
        .bind(&ship.ip_address)
        .bind(dt_to_ms(ship.updated_at))
        .bind(ship.ttl)
        .bind(dt_to_ms(ship.deadline))
        .bind(ship.max_session_num as i64)
        .bind(ship.spec.cpus)
        .bind(&ship.spec.memory)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<Ship>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM ships WHERE status != 0 ORDER BY created_at_ms ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_ship).collect())
    }

    async fn load_all(&self) -> Result<Vec<Ship>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM ships ORDER BY created_at_ms ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_ship).collect())
    }

    async fn mark_stopped(&self, id: &str) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE ships SET status = 0, updated_at_ms = ?2 WHERE id = ?1")
            .bind(id)
            .bind(dt_to_ms(Utc::now()))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ship_sessions WHERE ship_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn bind_session(&self, ship_id: &str, session_id: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO ship_sessions (session_id, ship_id, created_at_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(session_id)
        .bind(ship_id)
        .bind(dt_to_ms(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unbind_session(&self, session_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM ship_sessions WHERE session_id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unbind_all(&self, ship_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM ship_sessions WHERE ship_id = ?1")
            .bind(ship_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sessions_for(&self, ship_id: &str) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT session_id FROM ship_sessions WHERE ship_id = ?1 ORDER BY created_at_ms ASC",
        )
        .bind(ship_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("session_id")).collect())
    }

    async fn load_bindings(&self) -> Result<Vec<(String, String)>, RepositoryError> {
        let rows = sqlx::query("SELECT session_id, ship_id FROM ship_sessions")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("session_id"), r.get("ship_id")))
            .collect())
    }
}
