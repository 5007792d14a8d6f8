//! DuckDB storage backend implementation.
//!
//! This module provides a storage backend using DuckDB, an embedded analytical
//! database. The implementation supports:
//! - In-memory and persistent storage options
//! - Positional parameter binding
//! - Independent connections on one database via `try_clone_boxed`
//!
//! # Configuration
//!
//! The DuckDB backend can be configured using the following options:
//!
//! ```toml
//! [instances.replica]
//! engine = "duckdb"
//! connection = ":memory:"  # Use ":memory:" for in-memory or file path
//! options = {
//!     threads = "4",      # Optional: Number of threads
//!     read_only = "false" # Optional: Read-only mode (default: false)
//! }
//! ```
//!
//! Or via command line:
//!
//! ```bash
//! usermetrics \
//!   --engine duckdb \
//!   --engine-connection ":memory:" \
//!   --engine-options threads=4 \
//!   --engine-options read_only=false
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use duckdb::types::{ToSqlOutput, Value as DuckValue};
use duckdb::{params_from_iter, AccessMode, Config, Connection, ToSql};
use tokio::sync::Mutex;
use tracing::debug;
use crate::config::Credentials;
use crate::error::{Result, StoreError};
use crate::storage::{Row, StorageBackend, Value};

/// DuckDB-based storage backend.
pub struct DuckDbBackend {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Opens a DuckDB database at `connection_string` (`:memory:` or a path).
    pub fn new(connection_string: &str, options: &HashMap<String, String>) -> Result<Self> {
        let config = Self::config_from_options(options)?;
        let conn = if connection_string == ":memory:" {
            Connection::open_in_memory_with_flags(config)?
        } else {
            Connection::open_with_flags(connection_string, config)?
        };
        debug!(connection = connection_string, "opened duckdb database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates a new DuckDB backend with an in-memory database.
    pub fn new_in_memory() -> Result<Self> {
        Self::new(":memory:", &HashMap::new())
    }

    /// Creates a backend from configured options and optional credentials.
    ///
    /// DuckDB has no notion of users, so credentials are accepted and ignored.
    pub fn new_with_options(
        connection_string: &str,
        options: &HashMap<String, String>,
        credentials: Option<&Credentials>,
    ) -> Result<Self> {
        if credentials.is_some() {
            debug!("duckdb ignores engine credentials");
        }
        Self::new(connection_string, options)
    }

    fn config_from_options(options: &HashMap<String, String>) -> Result<Config> {
        let mut config = Config::default();

        if let Some(threads) = options.get("threads") {
            let threads: i64 = threads.parse().map_err(|_| StoreError::InvalidOption {
                key: "threads".to_string(),
                value: threads.clone(),
            })?;
            config = config.threads(threads)?;
        }

        if let Some(read_only) = options.get("read_only") {
            let read_only: bool = read_only.parse().map_err(|_| StoreError::InvalidOption {
                key: "read_only".to_string(),
                value: read_only.clone(),
            })?;
            if read_only {
                config = config.access_mode(AccessMode::ReadOnly)?;
            }
        }

        Ok(config)
    }

    fn convert(value: DuckValue) -> Result<Value> {
        Ok(match value {
            DuckValue::Null => Value::Null,
            DuckValue::Boolean(v) => Value::Bool(v),
            DuckValue::TinyInt(v) => Value::Int(i64::from(v)),
            DuckValue::SmallInt(v) => Value::Int(i64::from(v)),
            DuckValue::Int(v) => Value::Int(i64::from(v)),
            DuckValue::BigInt(v) => Value::Int(v),
            DuckValue::HugeInt(v) => Value::Int(
                i64::try_from(v).map_err(|_| StoreError::UnsupportedType(format!("HUGEINT {}", v)))?,
            ),
            DuckValue::UTinyInt(v) => Value::Int(i64::from(v)),
            DuckValue::USmallInt(v) => Value::Int(i64::from(v)),
            DuckValue::UInt(v) => Value::Int(i64::from(v)),
            DuckValue::UBigInt(v) => Value::Int(
                i64::try_from(v).map_err(|_| StoreError::UnsupportedType(format!("UBIGINT {}", v)))?,
            ),
            DuckValue::Float(v) => Value::Float(f64::from(v)),
            DuckValue::Double(v) => Value::Float(v),
            DuckValue::Text(s) => Value::Text(s),
            DuckValue::Blob(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
            other => return Err(StoreError::UnsupportedType(format!("{:?}", other))),
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(match self {
            Value::Null => DuckValue::Null,
            Value::Int(v) => DuckValue::BigInt(*v),
            Value::Float(v) => DuckValue::Double(*v),
            Value::Text(s) => DuckValue::Text(s.clone()),
            Value::Bool(v) => DuckValue::Boolean(*v),
        }))
    }
}

#[async_trait]
impl StorageBackend for DuckDbBackend {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let column_count = rows.as_ref().map(|s| s.column_count()).unwrap_or(0);

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(Self::convert(row.get::<usize, DuckValue>(i)?)?);
            }
            results.push(values);
        }

        Ok(results)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn try_clone_boxed(&self) -> Result<Box<dyn StorageBackend>> {
        let conn = self
            .conn
            .try_lock()
            .map_err(|_| StoreError::Busy("duckdb".to_string()))?;
        let cloned = conn.try_clone()?;
        Ok(Box::new(Self {
            conn: Arc::new(Mutex::new(cloned)),
        }))
    }
}
