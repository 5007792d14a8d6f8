//! Experiment definitions.
//!
//! An experiment names the log files its events come from, the time span it
//! ran over, the tables the log parser fills and the derived tables metrics
//! are written to. Metrics only ever read from those named tables.
//!
//! Definitions are loaded from TOML:
//!
//! ```toml
//! [experiments.cta4]
//! log_files = ["clicktracking.log-20121026.gz"]
//! start_date = "20121026000000"
//! end_date = "20121107000000"
//! user_list_sql = "SELECT DISTINCT user_id FROM e3_cta4_server_logs"
//!
//! [experiments.cta4.log_data.server_logs]
//! definition = "CREATE TABLE e3_cta4_server_logs (user_id BIGINT)"
//! table_name = "e3_cta4_server_logs"
//! parser = "e3_cta4_log_parse_server"
//! ```
//!
//! Experiment names are case-insensitive.

use std::collections::BTreeMap;
use std::path::Path;
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use umstore_core::{ConnectionHandle, Value};
use crate::cohort::{Cohort, UserId};
use crate::error::{MetricError, Result};
use crate::templates::{collapse_whitespace, validate};
use crate::timestamp::TimeWindow;

/// A table filled from raw logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTable {
    pub definition: String,
    pub table_name: String,
    /// Name of the line parser the log collaborator applies
    pub parser: String,
}

/// A derived table (blocks, edit volume, time to milestone, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub definition: String,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    #[serde(default)]
    pub log_files: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub log_data: BTreeMap<String, LogTable>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableDef>,
    /// Query producing the experiment's canonical cohort
    pub user_list_sql: String,
}

impl ExperimentDefinition {
    pub fn time_window(&self) -> Result<TimeWindow> {
        TimeWindow::new(&self.start_date, &self.end_date)
    }

    /// Target table for a log or derived table key.
    pub fn table_name(&self, key: &str) -> Option<&str> {
        self.log_data
            .get(key)
            .map(|t| t.table_name.as_str())
            .or_else(|| self.tables.get(key).map(|t| t.table_name.as_str()))
    }

    fn definitions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.log_data
            .values()
            .map(|t| (t.table_name.as_str(), t.definition.as_str()))
            .chain(
                self.tables
                    .values()
                    .map(|t| (t.table_name.as_str(), t.definition.as_str())),
            )
    }

    /// Creates every log and derived table. Needs a writable handle.
    pub async fn create_tables(&self, handle: &ConnectionHandle) -> Result<usize> {
        let mut created = 0;
        for (table, definition) in self.definitions() {
            let sql = collapse_whitespace(definition);
            validate(&sql)?;
            handle.execute_batch(&sql).await?;
            debug!(table, "created experiment table");
            created += 1;
        }
        Ok(created)
    }

    /// Runs `user_list_sql` and returns the cohort it yields for `project`.
    pub async fn cohort(&self, handle: &ConnectionHandle, project: &str) -> Result<Cohort> {
        let sql = collapse_whitespace(&self.user_list_sql);
        validate(&sql)?;
        let users = handle
            .query(&sql, &[])
            .await?
            .iter()
            .map(|row| UserId::from_value(row.first().unwrap_or(&Value::Null), "user_list_sql"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Cohort::new(project, users))
    }
}

#[derive(Debug, Default, Deserialize)]
struct CatalogueFile {
    #[serde(default)]
    experiments: BTreeMap<String, ExperimentDefinition>,
}

/// All known experiments by (lowercased) name.
#[derive(Debug, Clone, Default)]
pub struct ExperimentCatalogue {
    experiments: BTreeMap<String, ExperimentDefinition>,
}

impl ExperimentCatalogue {
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Config::builder().add_source(File::from(path.as_ref())))
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let file: CatalogueFile = builder.build()?.try_deserialize()?;
        let experiments: BTreeMap<String, ExperimentDefinition> = file
            .experiments
            .into_iter()
            .map(|(name, def)| (name.to_lowercase(), def))
            .collect();
        for (name, def) in &experiments {
            def.time_window()?;
            info!(experiment = %name, log_tables = def.log_data.len(), tables = def.tables.len(), "loaded experiment");
        }
        Ok(Self { experiments })
    }

    pub fn get(&self, name: &str) -> Result<&ExperimentDefinition> {
        self.experiments
            .get(&name.to_lowercase())
            .ok_or_else(|| MetricError::UnknownExperiment(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.experiments.keys().map(String::as_str)
    }
}
