use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use crate::error::Result;
use crate::escape::NamespaceFilter;
use crate::metrics::ProcessOptions;
use crate::timestamp::TimeWindow;
use crate::users::UserQuerySource;

const DEFAULT_METRIC_CONFIG: &str = include_str!("../config/metrics.toml");

/// Engine-side settings: defaults for metric requests.
///
/// Store settings (instances, routing, cohort tables) live in
/// `umstore_core::config::Settings`.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricSettings {
    #[serde(default)]
    pub metric: MetricDefaults,
    /// Experiment catalogue file
    #[serde(default)]
    pub experiments: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricDefaults {
    pub project: String,
    pub namespace: NamespaceFilter,
    pub t: i64,
    pub n: i64,
    pub user_source: UserQuerySource,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
}

impl Default for MetricDefaults {
    fn default() -> Self {
        Self {
            project: "enwiki".to_string(),
            namespace: NamespaceFilter::All,
            t: 24,
            n: 1,
            user_source: UserQuerySource::Logging,
            date_start: None,
            date_end: None,
        }
    }
}

impl MetricSettings {
    /// Embedded defaults, then `file` if given, then `USERMETRICS__*`
    /// environment variables.
    pub fn new(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from_str(DEFAULT_METRIC_CONFIG, FileFormat::Toml));

        if let Some(file) = file {
            builder = builder.add_source(File::from(file));
        }

        builder = builder.add_source(Environment::with_prefix("USERMETRICS").separator("__"));

        Ok(builder.build()?.try_deserialize()?)
    }

    /// The configured date range, if both ends are set.
    pub fn window(&self) -> Result<Option<TimeWindow>> {
        match (&self.metric.date_start, &self.metric.date_end) {
            (Some(start), Some(end)) => TimeWindow::new(start, end).map(Some),
            _ => Ok(None),
        }
    }

    /// Process options seeded from these defaults.
    pub fn process_options(&self) -> Result<ProcessOptions> {
        let mut options = ProcessOptions::default()
            .namespace(self.metric.namespace.clone())
            .t(self.metric.t)
            .n(self.metric.n);
        if let Some(window) = self.window()? {
            options = options.window(window);
        }
        Ok(options)
    }
}

impl Default for MetricSettings {
    fn default() -> Self {
        Self {
            metric: MetricDefaults::default(),
            experiments: None,
        }
    }
}
