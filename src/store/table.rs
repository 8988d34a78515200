//! PostgreSQL-backed key-value record table.
//!
//! Expected layout (the table name is configurable):
//!
//! ```sql
//! CREATE TABLE user_records (
//!     partition_key TEXT NOT NULL,
//!     record_id     TEXT NOT NULL,
//!     group_key     TEXT,
//!     category      TEXT NOT NULL,
//!     usage_count   BIGINT NOT NULL DEFAULT 0,
//!     logged_at     TIMESTAMPTZ,
//!     payload       JSONB NOT NULL DEFAULT '{}',
//!     PRIMARY KEY (partition_key, record_id)
//! );
//! ```

use super::{Cursor, MutationOutcome, Page, RemoteStore, StoreError, StoreResult};
use crate::config::TableStoreConfig;
use crate::reconcile::models::{RankingMetrics, Record, RecordError, Scope};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const COLUMNS: &str = "record_id, group_key, category, usage_count, logged_at, payload";

/// Keyset position, serialized into the opaque cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KeysetCursor {
    after: String,
}

#[derive(Debug, Clone)]
pub struct TableStore {
    pool: PgPool,
    table: String,
    page_size: usize,
}

impl TableStore {
    pub async fn connect(config: &TableStoreConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await?;
        Self::with_pool(pool, &config.table, config.page_size)
    }

    pub fn with_pool(pool: PgPool, table: &str, page_size: usize) -> StoreResult<Self> {
        if !is_identifier(table) {
            return Err(StoreError::Unavailable(format!(
                "invalid table name '{table}'"
            )));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
            page_size: page_size.max(1),
        })
    }

    fn row_to_record(row: &PgRow) -> StoreResult<Record> {
        let usage_count: i64 = row.try_get("usage_count")?;
        Ok(Record {
            id: row.try_get("record_id")?,
            group_key: row.try_get("group_key")?,
            category: row.try_get("category")?,
            ranking: RankingMetrics {
                usage_count: usage_count.max(0) as u64,
                logged_at: row.try_get::<Option<DateTime<Utc>>, _>("logged_at")?,
            },
            payload: row.try_get("payload")?,
        })
    }
}

fn is_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

fn encode_cursor(last_id: &str) -> StoreResult<Cursor> {
    let raw = serde_json::to_vec(&KeysetCursor {
        after: last_id.to_string(),
    })?;
    Ok(Cursor::new(BASE64_STANDARD.encode(raw)))
}

fn decode_cursor(cursor: &Cursor) -> StoreResult<KeysetCursor> {
    let raw = BASE64_STANDARD
        .decode(cursor.as_str())
        .map_err(|e| StoreError::Decode(format!("invalid table cursor: {e}")))?;
    Ok(serde_json::from_slice(&raw)?)
}

#[async_trait]
impl RemoteStore for TableStore {
    fn name(&self) -> &str {
        "record-table"
    }

    async fn list(&self, scope: &Scope, cursor: Option<&Cursor>) -> StoreResult<Page> {
        let after = cursor.map(decode_cursor).transpose()?.map(|c| c.after);
        let since = scope.window.map(|w| w.since);
        let until = scope.window.and_then(|w| w.until);

        let sql = format!(
            "SELECT {COLUMNS} FROM {table} \
             WHERE partition_key = $1 \
               AND ($2::text IS NULL OR record_id > $2) \
               AND ($3::timestamptz IS NULL OR logged_at >= $3) \
               AND ($4::timestamptz IS NULL OR logged_at < $4) \
             ORDER BY record_id \
             LIMIT $5",
            table = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(&scope.key)
            .bind(after)
            .bind(since)
            .bind(until)
            .bind(self.page_size as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<StoreResult<Vec<_>>>()?;
        let next_cursor = match items.last() {
            Some(last) if items.len() == self.page_size => Some(encode_cursor(&last.id)?),
            _ => None,
        };

        debug!(partition = %scope.key, rows = items.len(), "Listed table page");
        Ok(Page { items, next_cursor })
    }

    async fn fetch(&self, scope: &Scope, ids: &[String]) -> StoreResult<HashMap<String, Record>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT {COLUMNS} FROM {table} WHERE partition_key = $1 AND record_id = ANY($2)",
            table = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(&scope.key)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Self::row_to_record(row).map(|r| (r.id.clone(), r)))
            .collect()
    }

    async fn delete_many(&self, scope: &Scope, ids: &[String]) -> StoreResult<MutationOutcome> {
        let sql = format!(
            "DELETE FROM {table} WHERE partition_key = $1 AND record_id = ANY($2) RETURNING record_id",
            table = self.table
        );
        let deleted: HashSet<String> = sqlx::query(&sql)
            .bind(&scope.key)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("record_id"))
            .collect::<Result<_, _>>()?;

        let failed = ids
            .iter()
            .filter(|id| !deleted.contains(*id))
            .map(|id| RecordError::new(id.clone(), "record not found"))
            .collect();
        Ok(MutationOutcome { failed })
    }

    async fn upsert_many(&self, scope: &Scope, records: &[Record]) -> StoreResult<MutationOutcome> {
        let sql = format!(
            "INSERT INTO {table} (partition_key, {COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (partition_key, record_id) DO UPDATE SET \
               group_key = EXCLUDED.group_key, \
               category = EXCLUDED.category, \
               usage_count = EXCLUDED.usage_count, \
               logged_at = EXCLUDED.logged_at, \
               payload = EXCLUDED.payload",
            table = self.table
        );

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(&sql)
                .bind(&scope.key)
                .bind(&record.id)
                .bind(&record.group_key)
                .bind(&record.category)
                .bind(i64::try_from(record.ranking.usage_count).unwrap_or(i64::MAX))
                .bind(record.ranking.logged_at)
                .bind(&record.payload)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(MutationOutcome::ok())
    }
}
