//! Warehouse connector
//!
//! The [`Warehouse`] trait is the write surface the loader needs: an
//! idempotent schema ensure and a pure append. [`PostgresWarehouse`] talks
//! to a PostgreSQL-wire warehouse through `sqlx`; [`MemoryWarehouse`] keeps
//! rows in process for dry runs.

use crate::config::WarehouseCredentials;
use crate::models::NormalizedRow;
use crate::{LoadError, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, Postgres};
use sqlx::query_builder::Separated;
use sqlx::{ConnectOptions, QueryBuilder};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Write access to the destination warehouse
#[async_trait]
pub trait Warehouse: Send {
    /// Create `schema` if it does not exist yet; no-op otherwise
    async fn ensure_schema(&mut self, schema: &str) -> Result<()>;

    /// Append `rows` to `schema.table`, returning the number of rows written.
    ///
    /// The table must already exist. Nothing is overwritten or merged.
    async fn append_rows(&mut self, rows: &[NormalizedRow], schema: &str, table: &str)
    -> Result<u64>;
}

/// Build the connection URL; the password is percent-encoded here and nowhere else
#[must_use]
pub fn connection_url(credentials: &WarehouseCredentials) -> String {
    format!(
        "postgres://{}:{}@{}/{}?application_name={}",
        urlencoding::encode(&credentials.user),
        urlencoding::encode(credentials.password.expose_secret()),
        credentials.account,
        urlencoding::encode(&credentials.database),
        urlencoding::encode(&credentials.warehouse)
    )
}

/// Quote an SQL identifier, doubling embedded quotes
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Ordered union of the columns of every row in the batch
#[must_use]
pub fn column_union(rows: &[NormalizedRow]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for column in row.columns() {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
    }
    columns
}

/// Warehouse reached over the PostgreSQL wire protocol
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    /// Open the single long-lived connection used for the whole run
    pub async fn connect(credentials: &WarehouseCredentials) -> Result<Self> {
        info!(
            account = %credentials.account,
            database = %credentials.database,
            warehouse = %credentials.warehouse,
            "Connecting to warehouse"
        );

        let connect_options = PgConnectOptions::from_str(&connection_url(credentials))
            .map_err(|e| LoadError::connection(format!("Invalid connection settings: {e}")))?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(5));

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| LoadError::connection(format!("Failed to connect to warehouse: {e}")))?;

        Ok(Self { pool })
    }
}

impl std::fmt::Debug for PostgresWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresWarehouse")
            .field("connections", &self.pool.size())
            .finish()
    }
}

/// How a JSON value is written into a column
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Strings verbatim; arrays and objects as their JSON text
    Text(String),
}

impl From<Option<&Value>> for SqlValue {
    fn from(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => SqlValue::Null,
            Some(Value::Bool(b)) => SqlValue::Bool(*b),
            Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => SqlValue::Int(i),
                (None, Some(f)) => SqlValue::Float(f),
                (None, None) => SqlValue::Text(n.to_string()),
            },
            Some(Value::String(s)) => SqlValue::Text(s.clone()),
            Some(nested) => SqlValue::Text(nested.to_string()),
        }
    }
}

fn push_value(separated: &mut Separated<'_, '_, Postgres, &'static str>, value: SqlValue) {
    match value {
        SqlValue::Null => {
            separated.push("NULL");
        }
        SqlValue::Bool(b) => {
            separated.push_bind(b);
        }
        SqlValue::Int(i) => {
            separated.push_bind(i);
        }
        SqlValue::Float(f) => {
            separated.push_bind(f);
        }
        SqlValue::Text(text) => {
            separated.push_bind(text);
        }
    }
}

/// Multi-row INSERT over the ordered union of the batch's columns
fn insert_statement(
    rows: &[NormalizedRow],
    schema: &str,
    table: &str,
) -> QueryBuilder<'static, Postgres> {
    let columns = column_union(rows);
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {}.{} (",
        quote_ident(schema),
        quote_ident(table)
    ));
    {
        let mut names = builder.separated(", ");
        for column in &columns {
            names.push(quote_ident(column));
        }
    }
    builder.push(") ");
    builder.push_values(rows, |mut separated, row| {
        for column in &columns {
            push_value(&mut separated, SqlValue::from(row.get(column)));
        }
    });
    builder
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn ensure_schema(&mut self, schema: &str) -> Result<()> {
        let query = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema));
        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| LoadError::insert(format!("Failed to ensure schema {schema}: {e}")))?;
        debug!(schema, "Schema ensured");
        Ok(())
    }

    async fn append_rows(
        &mut self,
        rows: &[NormalizedRow],
        schema: &str,
        table: &str,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder = insert_statement(rows, schema, table);
        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            LoadError::insert(format!(
                "Failed to append {} row(s) into {schema}.{table}: {e}",
                rows.len()
            ))
        })?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, Default)]
struct MemoryTable {
    /// Declared column set; `None` accepts any columns
    columns: Option<Vec<String>>,
    rows: Vec<NormalizedRow>,
}

/// In-process warehouse used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    strict: bool,
    schemas: Vec<String>,
    ensure_calls: usize,
    tables: HashMap<String, MemoryTable>,
}

impl MemoryWarehouse {
    /// Accepts appends to any table, creating it on first write
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects appends to undeclared tables or schemas, like a real warehouse
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Declare an existing table; an empty column list accepts any columns
    #[must_use]
    pub fn with_table(mut self, schema: &str, table: &str, columns: &[&str]) -> Self {
        let columns = (!columns.is_empty())
            .then(|| columns.iter().map(|c| (*c).to_string()).collect());
        self.tables.insert(
            Self::key(schema, table),
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
        self
    }

    fn key(schema: &str, table: &str) -> String {
        format!("{schema}.{table}")
    }

    /// Rows appended so far to `schema.table`
    #[must_use]
    pub fn rows(&self, schema: &str, table: &str) -> &[NormalizedRow] {
        self.tables
            .get(&Self::key(schema, table))
            .map(|t| t.rows.as_slice())
            .unwrap_or_default()
    }

    /// Schemas that currently exist
    #[must_use]
    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    /// How many times `ensure_schema` was called
    #[must_use]
    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ensure_schema(&mut self, schema: &str) -> Result<()> {
        self.ensure_calls += 1;
        if !self.schemas.iter().any(|s| s == schema) {
            self.schemas.push(schema.to_string());
        }
        Ok(())
    }

    async fn append_rows(
        &mut self,
        rows: &[NormalizedRow],
        schema: &str,
        table: &str,
    ) -> Result<u64> {
        if self.strict && !self.schemas.iter().any(|s| s == schema) {
            return Err(LoadError::insert(format!("schema {schema} does not exist")));
        }

        let key = Self::key(schema, table);
        if self.strict && !self.tables.contains_key(&key) {
            return Err(LoadError::insert(format!("table {key} does not exist")));
        }
        let entry = self.tables.entry(key.clone()).or_default();

        if let Some(declared) = &entry.columns {
            for column in column_union(rows) {
                if !declared.contains(&column) {
                    return Err(LoadError::insert(format!(
                        "column {column} does not exist in {key}"
                    )));
                }
            }
        }

        entry.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }
}
