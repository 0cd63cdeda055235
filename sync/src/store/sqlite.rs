//! SQLite persistence for items, the operation log and push errors.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use opqueue_engine::{
    item::Item,
    record::{decode_item, encode_item},
    ErrorRecord, OperationKind, OperationRecord, TableKind,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{batch_ids, LocalStore, QueueStore, StoreResult};
use crate::{config::SyncConfig, error::StoreError};

/// Store backed by a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and run migrations.
    ///
    /// An in-memory database lives only as long as its connection, so it is
    /// given a single connection that is never recycled.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        }
        .connect_with(options)
        .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Connect using the configured database URL and pool size.
    pub async fn from_config(config: &SyncConfig) -> StoreResult<Self> {
        Self::connect(&config.database_url, config.max_connections).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// A stored operation row from the database.
#[derive(Debug)]
struct StoredOperation {
    id: String,
    kind: i64,
    table_name: String,
    table_kind: i64,
    item_id: String,
    item: Option<String>,
    version: i64,
    sequence: i64,
    created_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredOperation {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredOperation {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            table_name: row.try_get("table_name")?,
            table_kind: row.try_get("table_kind")?,
            item_id: row.try_get("item_id")?,
            item: row.try_get("item")?,
            version: row.try_get("version")?,
            sequence: row.try_get("sequence")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl StoredOperation {
    fn into_record(self) -> StoreResult<OperationRecord> {
        Ok(OperationRecord {
            kind: operation_kind(self.kind, &self.id)?,
            table_kind: table_kind(self.table_kind, &self.id)?,
            id: self.id,
            table_name: self.table_name,
            item_id: self.item_id,
            item: self.item,
            version: self.version.max(0) as u64,
            sequence: self.sequence.max(0) as u64,
            created_at: self.created_at.max(0) as u64,
        })
    }
}

/// A stored push error row from the database.
#[derive(Debug)]
struct StoredError {
    id: String,
    http_status: Option<i64>,
    operation_version: i64,
    operation_kind: i64,
    table_name: String,
    table_kind: i64,
    item: Option<String>,
    raw_result: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredError {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredError {
            id: row.try_get("id")?,
            http_status: row.try_get("http_status")?,
            operation_version: row.try_get("operation_version")?,
            operation_kind: row.try_get("operation_kind")?,
            table_name: row.try_get("table_name")?,
            table_kind: row.try_get("table_kind")?,
            item: row.try_get("item")?,
            raw_result: row.try_get("raw_result")?,
        })
    }
}

impl StoredError {
    fn into_record(self) -> StoreResult<ErrorRecord> {
        Ok(ErrorRecord {
            operation_kind: operation_kind(self.operation_kind, &self.id)?,
            table_kind: table_kind(self.table_kind, &self.id)?,
            http_status: self.http_status.and_then(|s| u16::try_from(s).ok()),
            operation_version: self.operation_version.max(0) as u64,
            id: self.id,
            table_name: self.table_name,
            item: self.item,
            raw_result: self.raw_result,
        })
    }
}

fn operation_kind(code: i64, id: &str) -> StoreResult<OperationKind> {
    u8::try_from(code)
        .ok()
        .and_then(OperationKind::from_code)
        .ok_or_else(|| StoreError::Corrupt(format!("operation {} has unknown kind {}", id, code)))
}

fn table_kind(code: i64, id: &str) -> StoreResult<TableKind> {
    u8::try_from(code)
        .ok()
        .and_then(|code| TableKind::try_from(code).ok())
        .ok_or_else(|| StoreError::Corrupt(format!("operation {} has unknown table kind {}", id, code)))
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn upsert(&self, table: &str, items: &[Item], allow_conflict_overwrite: bool) -> StoreResult<()> {
        let batch = batch_ids(table, items, allow_conflict_overwrite)?;

        let mut tx = self.pool.begin().await?;
        for (id, item) in batch {
            sqlx::query(
                r#"
                INSERT INTO items (table_name, item_id, data)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (table_name, item_id) DO UPDATE SET data = excluded.data
                "#,
            )
            .bind(table)
            .bind(id)
            .bind(encode_item(item))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM items WHERE table_name = ?1 AND item_id = ?2")
            .bind(table)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn lookup(&self, table: &str, id: &str) -> StoreResult<Option<Item>> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM items WHERE table_name = ?1 AND item_id = ?2")
                .bind(table)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        decode_item(data.as_deref()).map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn save_operation(&self, record: &OperationRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO operations (
                id, kind, table_name, table_kind, item_id, item,
                version, sequence, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (id) DO UPDATE SET
                kind = excluded.kind,
                table_name = excluded.table_name,
                table_kind = excluded.table_kind,
                item_id = excluded.item_id,
                item = excluded.item,
                version = excluded.version,
                sequence = excluded.sequence,
                created_at = excluded.created_at
            "#,
        )
        .bind(&record.id)
        .bind(i64::from(record.kind.code()))
        .bind(&record.table_name)
        .bind(i64::from(record.table_kind.code()))
        .bind(&record.item_id)
        .bind(record.item.as_deref())
        .bind(record.version as i64)
        .bind(record.sequence as i64)
        .bind(record.created_at as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_operation(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM operations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_operations(&self) -> StoreResult<Vec<OperationRecord>> {
        let rows = sqlx::query_as::<_, StoredOperation>(
            r#"
            SELECT id, kind, table_name, table_kind, item_id, item,
                   version, sequence, created_at
            FROM operations
            ORDER BY sequence ASC, created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredOperation::into_record).collect()
    }

    async fn save_error(&self, record: &ErrorRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_errors (
                id, http_status, operation_version, operation_kind,
                table_name, table_kind, item, raw_result
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id) DO UPDATE SET
                http_status = excluded.http_status,
                operation_version = excluded.operation_version,
                operation_kind = excluded.operation_kind,
                table_name = excluded.table_name,
                table_kind = excluded.table_kind,
                item = excluded.item,
                raw_result = excluded.raw_result
            "#,
        )
        .bind(&record.id)
        .bind(record.http_status.map(i64::from))
        .bind(record.operation_version as i64)
        .bind(i64::from(record.operation_kind.code()))
        .bind(&record.table_name)
        .bind(i64::from(record.table_kind.code()))
        .bind(record.item.as_deref())
        .bind(record.raw_result.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_errors(&self) -> StoreResult<Vec<ErrorRecord>> {
        let rows = sqlx::query_as::<_, StoredError>(
            r#"
            SELECT id, http_status, operation_version, operation_kind,
                   table_name, table_kind, item, raw_result
            FROM sync_errors
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredError::into_record).collect()
    }

    async fn delete_errors(&self) -> StoreResult<()> {
        sqlx::query("DELETE FROM sync_errors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_error(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM sync_errors WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
