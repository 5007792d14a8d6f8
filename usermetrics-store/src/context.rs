//! Explicitly passed store context.
//!
//! Holds the [`Connector`], the routing settings, and one lazily opened
//! read-only handle that readers may share. Writers always get a dedicated
//! handle from [`StoreContext::dedicated`].

use std::collections::HashMap;
use tokio::sync::OnceCell;
use crate::config::Settings;
use crate::error::Result;
use crate::storage::connector::{ConnectionHandle, Connector};

pub struct StoreContext {
    connector: Connector,
    default_instance: String,
    projects: HashMap<String, String>,
    shared: OnceCell<ConnectionHandle>,
}

impl StoreContext {
    pub fn new(connector: Connector, default_instance: impl Into<String>) -> Self {
        Self {
            connector,
            default_instance: default_instance.into(),
            projects: HashMap::new(),
            shared: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut context = Self::new(Connector::from_settings(settings), settings.engine.name.clone());
        context.projects = settings.projects.clone();
        context
    }

    /// Routes `project` to an instance name.
    pub fn with_project(mut self, project: impl Into<String>, instance: impl Into<String>) -> Self {
        self.projects.insert(project.into(), instance.into());
        self
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Instance serving `project`, falling back to the default instance.
    pub fn instance_for(&self, project: &str) -> &str {
        self.projects
            .get(project)
            .map(String::as_str)
            .unwrap_or(self.default_instance.as_str())
    }

    /// The process-wide read-only handle on the default instance.
    ///
    /// Opened on first use. The returned view cannot write.
    pub async fn shared(&self) -> Result<ConnectionHandle> {
        let handle = self
            .shared
            .get_or_try_init(|| self.connector.connect_read_only(&self.default_instance))
            .await?;
        Ok(handle.read_only())
    }

    /// A read-only handle for `project`: the shared handle when the project
    /// lives on the default instance, otherwise a new one.
    pub async fn reader_for(&self, project: &str) -> Result<ConnectionHandle> {
        let instance = self.instance_for(project);
        if instance == self.default_instance {
            self.shared().await
        } else {
            self.reader(instance).await
        }
    }

    /// A new read-only handle owned by the caller.
    pub async fn reader(&self, instance: &str) -> Result<ConnectionHandle> {
        self.connector.connect_read_only(instance).await
    }

    /// A new read-write handle owned by the caller; never shared.
    pub async fn dedicated(&self, instance: &str) -> Result<ConnectionHandle> {
        self.connector.connect(instance).await
    }
}
