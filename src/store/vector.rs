//! HTTP client for a serverless vector index data plane.
//!
//! Namespaces are scopes. When the index offers native listing, ids are paged
//! with `/vectors/list` and resolved with `/vectors/fetch`. Without it the
//! store falls back to a sweep of broad similarity queries, which cannot
//! promise to reach every vector and reports itself as approximate.

use super::{
    Cursor, ListingCoverage, MutationOutcome, Page, RemoteStore, StoreError, StoreResult,
};
use crate::config::{ListMode, VectorStoreConfig};
use crate::reconcile::models::{RankingMetrics, Record, RecordError, Scope};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const FETCH_CHUNK: usize = 100;
const USAGE_FIELD: &str = "usage_count";
const LOGGED_AT_FIELD: &str = "logged_at";

#[derive(Debug, Deserialize)]
struct IndexStats {
    #[serde(default)]
    namespaces: HashMap<String, NamespaceSummary>,
    dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct NamespaceSummary {
    #[serde(rename = "vectorCount", default)]
    vector_count: u64,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListedId>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct ListedId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, VectorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    id: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(rename = "sparseValues", skip_serializing_if = "Option::is_none")]
    sparse_values: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorEntry>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<VectorEntry>,
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    #[serde(rename = "upsertedCount", default)]
    upserted_count: usize,
}

/// Position in a query sweep, carried inside the opaque cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SweepPosition {
    probe: usize,
    dimension: usize,
}

#[derive(Debug, Clone)]
pub struct VectorIndexStore {
    client: Client,
    base_url: String,
    config: VectorStoreConfig,
}

impl VectorIndexStore {
    pub fn new(config: VectorStoreConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if self.config.api_key.is_empty() {
            builder
        } else {
            builder.header("Api-Key", &self.config.api_key)
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> StoreResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn index_stats(&self) -> StoreResult<IndexStats> {
        self.send(self.request(Method::POST, "/describe_index_stats").json(&json!({})))
            .await
    }

    /// Confirms the namespace exists and returns the index dimension.
    async fn check_namespace(&self, scope: &Scope) -> StoreResult<Option<usize>> {
        let stats = self.index_stats().await?;
        match stats.namespaces.get(&scope.key) {
            Some(summary) => {
                debug!(namespace = %scope.key, vectors = summary.vector_count, "Namespace found");
                Ok(stats.dimension)
            }
            None => Err(StoreError::ScopeNotFound(scope.key.clone())),
        }
    }

    async fn list_native(&self, scope: &Scope, cursor: Option<&Cursor>) -> StoreResult<Page> {
        if cursor.is_none() {
            self.check_namespace(scope).await?;
        }

        let limit = self.config.page_size.to_string();
        let mut query: Vec<(&str, &str)> = vec![("namespace", scope.key.as_str()), ("limit", limit.as_str())];
        if let Some(cursor) = cursor {
            query.push(("paginationToken", cursor.as_str()));
        }

        let listed: ListResponse = match self
            .send(self.request(Method::GET, "/vectors/list").query(&query))
            .await
        {
            Err(StoreError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Err(StoreError::ScopeNotFound(scope.key.clone()))
            }
            other => other?,
        };

        let ids: Vec<String> = listed.vectors.into_iter().map(|v| v.id).collect();
        let mut fetched = self.fetch(scope, &ids).await?;
        // keep list order; ids deleted between list and fetch are skipped
        let items = ids.iter().filter_map(|id| fetched.remove(id)).collect();
        let next_cursor = listed
            .pagination
            .and_then(|p| p.next)
            .filter(|next| !next.is_empty())
            .map(Cursor::new);

        Ok(Page { items, next_cursor })
    }

    async fn list_sweep(&self, scope: &Scope, cursor: Option<&Cursor>) -> StoreResult<Page> {
        let position = match cursor {
            Some(cursor) => decode_sweep_cursor(cursor)?,
            None => {
                let indexed = self.check_namespace(scope).await?;
                let dimension = self.config.dimension.or(indexed).ok_or_else(|| {
                    StoreError::Decode("index dimension unknown; set VECTOR_STORE_DIMENSION".to_string())
                })?;
                SweepPosition { probe: 0, dimension }
            }
        };

        let request = QueryRequest {
            namespace: &scope.key,
            vector: probe_vector(position.probe, self.config.sweep_queries, position.dimension),
            top_k: self.config.page_size,
            include_metadata: true,
            include_values: true,
        };
        let response: QueryResponse = self
            .send(self.request(Method::POST, "/query").json(&request))
            .await?;

        let next = position.probe + 1;
        let next_cursor = (next < self.config.sweep_queries).then(|| {
            encode_sweep_cursor(SweepPosition {
                probe: next,
                dimension: position.dimension,
            })
        });

        Ok(Page {
            items: response.matches.into_iter().map(|m| self.to_record(m)).collect(),
            next_cursor,
        })
    }

    fn to_record(&self, entry: VectorEntry) -> Record {
        let metadata = entry.metadata.unwrap_or_default();
        let group_key = metadata
            .get(&self.config.group_key_field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);
        let category = metadata
            .get(&self.config.category_field)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let usage_count = metadata
            .get(USAGE_FIELD)
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(0);
        let logged_at = metadata.get(LOGGED_AT_FIELD).and_then(parse_timestamp);

        let mut payload = json!({ "values": entry.values, "metadata": metadata });
        if let Some(sparse) = entry.sparse_values {
            payload["sparseValues"] = sparse;
        }

        Record {
            id: entry.id,
            group_key,
            ranking: RankingMetrics {
                usage_count,
                logged_at,
            },
            category,
            payload,
        }
    }

    fn to_entry(record: &Record) -> StoreResult<VectorEntry> {
        let values: Vec<f32> = match record.payload.get("values") {
            Some(values) => serde_json::from_value(values.clone())?,
            None => Vec::new(),
        };
        if values.is_empty() {
            return Err(StoreError::Decode(format!("record {} has no vector values", record.id)));
        }
        let metadata = match record.payload.get("metadata") {
            Some(Value::Object(map)) => Some(map.clone()),
            _ => None,
        };
        Ok(VectorEntry {
            id: record.id.clone(),
            values,
            sparse_values: record.payload.get("sparseValues").cloned(),
            metadata,
        })
    }
}

#[async_trait]
impl RemoteStore for VectorIndexStore {
    fn name(&self) -> &str {
        "vector-index"
    }

    fn coverage(&self) -> ListingCoverage {
        match self.config.list_mode {
            ListMode::Native => ListingCoverage::Exhaustive,
            ListMode::QuerySweep => ListingCoverage::Approximate,
        }
    }

    async fn list(&self, scope: &Scope, cursor: Option<&Cursor>) -> StoreResult<Page> {
        match self.config.list_mode {
            ListMode::Native => self.list_native(scope, cursor).await,
            ListMode::QuerySweep => self.list_sweep(scope, cursor).await,
        }
    }

    async fn fetch(&self, scope: &Scope, ids: &[String]) -> StoreResult<HashMap<String, Record>> {
        let mut records = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(FETCH_CHUNK) {
            let mut query: Vec<(&str, &str)> = vec![("namespace", scope.key.as_str())];
            query.extend(chunk.iter().map(|id| ("ids", id.as_str())));

            let response: FetchResponse = self
                .send(self.request(Method::GET, "/vectors/fetch").query(&query))
                .await?;
            for (id, entry) in response.vectors {
                records.insert(id, self.to_record(entry));
            }
        }
        Ok(records)
    }

    async fn delete_many(&self, scope: &Scope, ids: &[String]) -> StoreResult<MutationOutcome> {
        let request = DeleteRequest {
            ids,
            namespace: &scope.key,
        };
        let _: Value = self
            .send(self.request(Method::POST, "/vectors/delete").json(&request))
            .await?;
        Ok(MutationOutcome::ok())
    }

    async fn upsert_many(&self, scope: &Scope, records: &[Record]) -> StoreResult<MutationOutcome> {
        let mut failed = Vec::new();
        let mut vectors = Vec::with_capacity(records.len());
        for record in records {
            match Self::to_entry(record) {
                Ok(entry) => vectors.push(entry),
                Err(e) => failed.push(RecordError::new(record.id.clone(), e.to_string())),
            }
        }
        if vectors.is_empty() {
            return Ok(MutationOutcome { failed });
        }

        let sent = vectors.len();
        let request = UpsertRequest {
            vectors,
            namespace: &scope.key,
        };
        let response: UpsertResponse = self
            .send(self.request(Method::POST, "/vectors/upsert").json(&request))
            .await?;
        if response.upserted_count != sent {
            // the index does not say which ones, so nothing is attributed
            warn!(sent, upserted = response.upserted_count, "Upsert count mismatch");
        }
        Ok(MutationOutcome { failed })
    }
}

/// Axis-aligned probe for sweep query `index` of `total`, alternating sign so
/// neighbouring probes face different regions of the space.
fn probe_vector(index: usize, total: usize, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    if dimension == 0 {
        return vector;
    }
    let axis = (index * dimension / total.max(1)) % dimension;
    vector[axis] = if index % 2 == 0 { 1.0 } else { -1.0 };
    vector
}

fn encode_sweep_cursor(position: SweepPosition) -> Cursor {
    let raw = format!("sweep:{}:{}", position.probe, position.dimension);
    Cursor::new(URL_SAFE_NO_PAD.encode(raw))
}

fn decode_sweep_cursor(cursor: &Cursor) -> StoreResult<SweepPosition> {
    let bad = || StoreError::Decode(format!("invalid sweep cursor: {cursor}"));
    let raw = URL_SAFE_NO_PAD.decode(cursor.as_str()).map_err(|_| bad())?;
    let raw = String::from_utf8(raw).map_err(|_| bad())?;
    let mut parts = raw.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("sweep"), Some(probe), Some(dimension)) => Ok(SweepPosition {
            probe: probe.parse().map_err(|_| bad())?,
            dimension: dimension.parse().map_err(|_| bad())?,
        }),
        _ => Err(bad()),
    }
}

/// RFC 3339 strings, or epoch seconds / milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            if raw.unsigned_abs() >= 1_000_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}
