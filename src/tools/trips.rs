//! Tabular query tool over uploaded trip records.
//!
//! Rows are loaded into a private in-memory SQLite database and exposed
//! through read-only `SELECT` queries. Each `load` replaces the previous
//! dataset. Column names are sanitized before table creation and cell values
//! are always bound as parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{QueryError, QueryResult};

/// Table name every dataset is loaded into.
pub const TRIPS_TABLE: &str = "trips";

/// One uploaded row, column name to raw cell text.
pub type TripRow = BTreeMap<String, String>;

/// Rows returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    /// Result column names in select order.
    pub columns: Vec<String>,
    /// One JSON object per result row.
    pub rows: Vec<Map<String, Value>>,
    /// Number of rows returned.
    pub row_count: usize,
}

/// What a `load` produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub columns: Vec<String>,
    pub row_count: usize,
}

struct Dataset {
    pool: SqlitePool,
    columns: Vec<String>,
}

/// Queryable store for one analysis run's trip records.
pub struct TripStore {
    dataset: RwLock<Option<Dataset>>,
    timeout_ms: u64,
}

impl TripStore {
    /// Create an empty store; `query` fails until `load` succeeds.
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            dataset: RwLock::new(None),
            timeout_ms: config.query_timeout_ms,
        }
    }

    /// Load rows, replacing any previously loaded dataset.
    ///
    /// The column set comes from the first row; later rows missing a column
    /// get an empty string and extra keys are ignored.
    pub async fn load(&self, rows: &[TripRow]) -> QueryResult<LoadSummary> {
        let first = rows.first().ok_or(QueryError::EmptyDataset)?;
        let columns = sanitize_columns(first.keys());
        if columns.is_empty() {
            return Err(QueryError::EmptyDataset);
        }

        let pool = self.bounded(populate(&columns, rows)).await?;

        let previous = self.dataset.write().await.replace(Dataset {
            pool,
            columns: columns.clone(),
        });
        if let Some(old) = previous {
            old.pool.close().await;
            debug!("Previous trip dataset released");
        }

        info!(
            rows = rows.len(),
            columns = columns.len(),
            "Trip dataset loaded"
        );

        Ok(LoadSummary {
            columns,
            row_count: rows.len(),
        })
    }

    /// Run a read-only `SELECT` against the loaded dataset.
    pub async fn query(&self, sql: &str) -> QueryResult<QueryOutput> {
        let statement = guard_select(sql)?;

        let guard = self.dataset.read().await;
        let dataset = guard.as_ref().ok_or(QueryError::NotInitialized)?;

        debug!(sql = %statement, "Executing trip query");
        let rows = self
            .bounded(async {
                sqlx::query(statement)
                    .fetch_all(&dataset.pool)
                    .await
                    .map_err(QueryError::from)
            })
            .await?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows: Vec<Map<String, Value>> = rows.iter().map(row_to_json).collect();

        Ok(QueryOutput {
            columns,
            row_count: rows.len(),
            rows,
        })
    }

    /// Sanitized column names of the loaded dataset.
    pub async fn columns(&self) -> QueryResult<Vec<String>> {
        self.dataset
            .read()
            .await
            .as_ref()
            .map(|d| d.columns.clone())
            .ok_or(QueryError::NotInitialized)
    }

    /// Whether a dataset is currently loaded.
    pub async fn is_loaded(&self) -> bool {
        self.dataset.read().await.is_some()
    }

    /// Release the dataset and its database handle.
    pub async fn close(&self) {
        if let Some(dataset) = self.dataset.write().await.take() {
            dataset.pool.close().await;
            debug!("Trip dataset closed");
        }
    }

    async fn bounded<T, F>(&self, work: F) -> QueryResult<T>
    where
        F: Future<Output = QueryResult<T>>,
    {
        tokio::time::timeout(Duration::from_millis(self.timeout_ms), work)
            .await
            .map_err(|_| QueryError::Timeout {
                timeout_ms: self.timeout_ms,
            })?
    }
}

/// Create a fresh in-memory database holding `rows`, then lock it read-only.
async fn populate(columns: &[String], rows: &[TripRow]) -> QueryResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    // An in-memory database lives and dies with its single connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    let quoted: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c)).collect();
    let ddl = format!(
        "CREATE TABLE {} ({})",
        TRIPS_TABLE,
        quoted
            .iter()
            .map(|c| format!("{} TEXT", c))
            .collect::<Vec<_>>()
            .join(", ")
    );
    sqlx::query(&ddl).execute(&pool).await?;

    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        TRIPS_TABLE,
        quoted.join(", "),
        vec!["?"; columns.len()].join(", ")
    );

    let mut tx = pool.begin().await?;
    for row in rows {
        let cells: HashMap<String, &str> = row
            .iter()
            .map(|(key, value)| (sanitize_identifier(key), value.as_str()))
            .collect();

        let mut query = sqlx::query(&insert);
        for column in columns {
            query = query.bind(cells.get(column).copied().unwrap_or("").to_string());
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;

    sqlx::query("PRAGMA query_only = ON").execute(&pool).await?;

    Ok(pool)
}

/// Permit a single `SELECT` statement, rejecting anything else untouched.
pub fn guard_select(sql: &str) -> QueryResult<&str> {
    let statement = sql
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace());

    let is_select = statement
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("select"))
        .unwrap_or(false);

    if !is_select || statement.contains(';') {
        return Err(QueryError::Forbidden);
    }
    Ok(statement)
}

/// Replace anything outside `[A-Za-z0-9_]` so headers cannot inject SQL.
pub fn sanitize_identifier(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    match cleaned.chars().next() {
        None => String::new(),
        Some(c) if c.is_ascii_digit() => format!("c_{}", cleaned),
        Some(_) => cleaned,
    }
}

fn sanitize_columns<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.map(|k| sanitize_identifier(k))
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect()
}

fn row_to_json(row: &SqliteRow) -> Map<String, Value> {
    let mut object = Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => Value::Null,
            Ok(raw) => {
                let type_name = raw.type_info().name().to_string();
                match type_name.as_str() {
                    "INTEGER" => row.try_get::<i64, _>(index).map(Value::from).ok(),
                    "REAL" => row.try_get::<f64, _>(index).map(Value::from).ok(),
                    _ => row.try_get::<String, _>(index).map(Value::String).ok(),
                }
                .unwrap_or(Value::Null)
            }
            Err(_) => Value::Null,
        };
        object.insert(column.name().to_string(), value);
    }
    object
}

/// Convert JSON objects into trip rows, stringifying scalar cells.
pub fn rows_from_json(objects: Vec<Map<String, Value>>) -> Vec<TripRow> {
    objects
        .into_iter()
        .map(|object| {
            object
                .into_iter()
                .map(|(key, value)| {
                    let cell = match value {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (key, cell)
                })
                .collect()
        })
        .collect()
}
