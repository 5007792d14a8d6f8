//! Named store instances and the scoped handles issued against them.
//!
//! A [`Connector`] keeps one root backend per instance and hands out a fresh
//! connection (a clone of the root) for every [`Connector::connect`] call, so
//! two handles never share a connection. Handles are closed when dropped.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use crate::config::{EngineConfig, Settings};
use crate::error::{Result, StoreError};
use crate::storage::duckdb::DuckDbBackend;
use crate::storage::{Row, StorageBackend, Value};

/// What a handle may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::ReadOnly => write!(f, "read-only"),
            AccessMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

enum Instance {
    Configured(EngineConfig),
    Open(Box<dyn StorageBackend>),
}

/// Registry of store instances.
pub struct Connector {
    instances: Mutex<HashMap<String, Instance>>,
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Registers every instance named in `settings`; nothing is opened yet.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut instances = HashMap::new();
        instances.insert(
            settings.engine.name.clone(),
            Instance::Configured(settings.engine.clone()),
        );
        for (name, config) in &settings.instances {
            let mut config = config.clone();
            config.name = name.clone();
            instances.insert(name.clone(), Instance::Configured(config));
        }

        Self {
            instances: Mutex::new(instances),
        }
    }

    /// Registers an already opened backend under `name`.
    pub async fn register(&self, name: impl Into<String>, backend: Box<dyn StorageBackend>) {
        self.instances.lock().await.insert(name.into(), Instance::Open(backend));
    }

    /// Opens a dedicated read-write handle on `instance`.
    pub async fn connect(&self, instance: &str) -> Result<ConnectionHandle> {
        self.open(instance, AccessMode::ReadWrite).await
    }

    /// Opens a dedicated read-only handle on `instance`.
    pub async fn connect_read_only(&self, instance: &str) -> Result<ConnectionHandle> {
        self.open(instance, AccessMode::ReadOnly).await
    }

    async fn open(&self, instance: &str, mode: AccessMode) -> Result<ConnectionHandle> {
        let mut instances = self.instances.lock().await;
        let slot = instances
            .get_mut(instance)
            .ok_or_else(|| StoreError::UnknownInstance(instance.to_string()))?;

        if let Instance::Configured(config) = slot {
            let root = Self::open_backend(config)?;
            *slot = Instance::Open(root);
        }

        let backend = match slot {
            Instance::Open(root) => root.try_clone_boxed()?,
            Instance::Configured(_) => return Err(StoreError::UnknownInstance(instance.to_string())),
        };

        debug!(instance, %mode, "opened connection handle");
        Ok(ConnectionHandle::new(instance, mode, Arc::from(backend)))
    }

    fn open_backend(config: &EngineConfig) -> Result<Box<dyn StorageBackend>> {
        match config.engine.as_str() {
            "duckdb" => Ok(Box::new(DuckDbBackend::new_with_options(
                &config.connection,
                &config.options,
                config.credentials.as_ref(),
            )?)),
            other => Err(StoreError::UnsupportedEngine(other.to_string())),
        }
    }
}

/// A connection scoped to its owner. Dropping the handle closes it.
pub struct ConnectionHandle {
    instance: String,
    mode: AccessMode,
    backend: Arc<dyn StorageBackend>,
}

impl ConnectionHandle {
    pub fn new(instance: impl Into<String>, mode: AccessMode, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            instance: instance.into(),
            mode,
            backend,
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// A read-only view sharing this handle's connection.
    pub fn read_only(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.instance.clone(), AccessMode::ReadOnly, self.backend.clone())
    }

    /// Runs a query and drains every row before returning.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(instance = %self.instance, sql, params = params.len(), "query");
        self.backend.query(sql, params).await
    }

    /// Runs a write statement. Fails on read-only handles.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.ensure_writable()?;
        debug!(instance = %self.instance, sql, params = params.len(), "execute");
        self.backend.execute(sql, params).await
    }

    /// Runs parameterless statements (DDL, seeding). Fails on read-only handles.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.ensure_writable()?;
        self.backend.execute_batch(sql).await
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            AccessMode::ReadWrite => Ok(()),
            AccessMode::ReadOnly => Err(StoreError::ReadOnly(self.instance.clone())),
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if Arc::strong_count(&self.backend) == 1 {
            debug!(instance = %self.instance, mode = %self.mode, "closed connection handle");
        }
    }
}
