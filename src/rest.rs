//! Managed-database REST client: bulk inserts, raw SQL through the
//! `exec_sql` function, row counts and table stats.

use crate::config::Config;
use crate::query::{ResultRow, SqlExecutor};
use crate::record::ClaimRecord;
use crate::store::{ClaimSink, StorageError};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{json, Value};

/// Schema for the claims table, applied by [`RestClient::setup`].
pub const SCHEMA_SQL: &str = include_str!("../schema.sql");

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInfo {
    pub count: u64,
    pub min_date: Option<String>,
    pub max_date: Option<String>,
    pub distinct_members: u64,
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    key: String,
    table: String,
}

impl RestClient {
    pub fn new(http: Client, base_url: &str, key: &str, table: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            table: table.to_string(),
        }
    }

    /// Client authenticated with the public key (inserts, counts).
    pub fn with_public_key(config: &Config) -> Result<Self, StorageError> {
        Self::build(config, config.db_key()?)
    }

    /// Client for raw SQL (service key when configured).
    pub fn with_sql_key(config: &Config) -> Result<Self, StorageError> {
        Self::build(config, config.sql_key()?)
    }

    /// Client for administrative statements; requires the service key.
    pub fn with_service_key(config: &Config) -> Result<Self, StorageError> {
        Self::build(config, config.service_key()?)
    }

    fn build(config: &Config, key: &str) -> Result<Self, StorageError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self::new(http, config.db_url()?, key, &config.table))
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }

    /// Exact row count of the table.
    pub async fn count(&self) -> Result<u64, StorageError> {
        let response = self
            .authed(self.http.head(format!("{}?select=*", self.table_url())))
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| StorageError::Response("missing or invalid Content-Range".into()))
    }

    /// Row count, incurred-date range and distinct members, queried concurrently.
    pub async fn database_info(&self) -> Result<DbInfo, StorageError> {
        let count_sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let range_sql = format!(
            "SELECT MIN(incurred_date), MAX(incurred_date) FROM {}",
            self.table
        );
        let members_sql = format!("SELECT COUNT(DISTINCT member_id) FROM {}", self.table);
        let (count, range, members) = tokio::try_join!(
            self.exec_sql(&count_sql),
            self.exec_sql(&range_sql),
            self.exec_sql(&members_sql),
        )?;
        Ok(DbInfo {
            count: first_u64(&count, "count"),
            min_date: first_string(&range, "min"),
            max_date: first_string(&range, "max"),
            distinct_members: first_u64(&members, "count"),
        })
    }

    /// Recreate the schema. Existing claims are dropped.
    pub async fn setup(&self, schema_sql: &str) -> Result<(), StorageError> {
        self.exec_sql(schema_sql).await?;
        log::info!("Database synchronized successfully.");
        Ok(())
    }
}

impl ClaimSink for RestClient {
    async fn insert_batch(&mut self, batch: &[ClaimRecord]) -> Result<(), StorageError> {
        let response = self
            .authed(self.http.post(self.table_url()))
            .header("Prefer", "return=minimal")
            .json(batch)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

impl SqlExecutor for RestClient {
    async fn exec_sql(&self, sql: &str) -> Result<Vec<ResultRow>, StorageError> {
        let response = self
            .authed(self.http.post(self.rpc_url("exec_sql")))
            .json(&json!({ "query": sql }))
            .send()
            .await?;
        let body = check_status(response).await?.bytes().await?;
        rows_from_body(&body)
    }
}

async fn check_status(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Rejected {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// `message` field of a JSON error body, else the body itself.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Rows from an `exec_sql` body: a JSON array of objects, `null` or nothing.
fn rows_from_body(body: &[u8]) -> Result<Vec<ResultRow>, StorageError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    match serde_json::from_slice::<Value>(body)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(StorageError::Response(format!("expected row object, got {other}"))),
            })
            .collect(),
        other => Err(StorageError::Response(format!("expected row array, got {other}"))),
    }
}

/// Total from `Content-Range: 0-24/3573` (or `*/0`).
fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

fn first_value<'a>(rows: &'a [ResultRow], key: &str) -> Option<&'a Value> {
    rows.first()?.get(key)
}

fn first_u64(rows: &[ResultRow], key: &str) -> u64 {
    match first_value(rows, key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or_default(),
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

fn first_string(rows: &[ResultRow], key: &str) -> Option<String> {
    match first_value(rows, key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[test]
    fn exec_sql_bodies() {
        assert!(rows_from_body(b"").unwrap().is_empty());
        assert!(rows_from_body(b"null").unwrap().is_empty());
        let rows = rows_from_body(br#"[{"count": 12}]"#).unwrap();
        assert_eq!(first_u64(&rows, "count"), 12);
        assert!(rows_from_body(br#"[1, 2]"#).is_err());
        assert!(rows_from_body(br#"{"count": 1}"#).is_err());
    }

    #[test]
    fn stats_accept_numbers_or_strings() {
        let rows = rows_from_body(br#"[{"count": "3573", "min": "2023-01-01", "max": null}]"#).unwrap();
        assert_eq!(first_u64(&rows, "count"), 3573);
        assert_eq!(first_string(&rows, "min").as_deref(), Some("2023-01-01"));
        assert_eq!(first_string(&rows, "max"), None);
        assert_eq!(first_u64(&[], "count"), 0);
    }

    #[test]
    fn error_messages_prefer_json_message() {
        assert_eq!(
            error_message(r#"{"code":"42P01","message":"relation \"claims\" does not exist"}"#),
            "relation \"claims\" does not exist"
        );
        assert_eq!(error_message(" Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let client = RestClient::new(Client::new(), "https://db.example.com/", "k", "claims");
        assert_eq!(client.table_url(), "https://db.example.com/rest/v1/claims");
        assert_eq!(client.rpc_url("exec_sql"), "https://db.example.com/rest/v1/rpc/exec_sql");
    }

    #[test]
    fn missing_url_is_reported() {
        let config = Config {
            db_key: Some("k".into()),
            ..Default::default()
        };
        assert!(matches!(
            RestClient::with_public_key(&config),
            Err(StorageError::Config(ConfigError::Missing("CLAIMS_DB_URL")))
        ));
    }

    #[test]
    fn schema_creates_claims_table() {
        assert!(SCHEMA_SQL.contains("CREATE TABLE claims"));
    }
}
