//! Store settings: named instances, project routing and cohort tables.
//!
//! Sources, later ones winning: the embedded `config/default.toml`,
//! `/etc/usermetrics/config.toml`, the `--config` file,
//! `USERMETRICS__<SECTION>__<KEY>` variables and finally command-line flags.
//!
//! Default instance credentials are read from `USERMETRICS_ENGINE_USERNAME`
//! and `USERMETRICS_ENGINE_PASSWORD`, or the matching flags.

use clap::Parser;
use config::{Config, ConfigError};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const DEFAULT_CONFIG_PATH: &str = "/etc/usermetrics/config.toml";

/// Command-line arguments for the store layer.
///
/// Flattened into the binary's own argument parser; every option has a
/// matching environment variable.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Default instance engine type
    #[arg(long, env = "USERMETRICS_ENGINE", global = true)]
    pub engine: Option<String>,

    /// Default instance connection string
    #[arg(long, env = "USERMETRICS_ENGINE_CONNECTION", global = true)]
    pub engine_connection: Option<String>,

    /// Default instance options (key=value pairs)
    #[arg(long, env = "USERMETRICS_ENGINE_OPTIONS", global = true)]
    pub engine_options: Option<Vec<String>>,

    /// Default instance username
    #[arg(long, env = "USERMETRICS_ENGINE_USERNAME", global = true)]
    pub engine_username: Option<String>,

    /// Default instance password
    #[arg(long, env = "USERMETRICS_ENGINE_PASSWORD", global = true)]
    pub engine_password: Option<String>,
}

/// Complete store configuration.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Default instance
    pub engine: EngineConfig,
    /// Additional named instances
    #[serde(default)]
    pub instances: HashMap<String, EngineConfig>,
    /// Project (data partition) to instance routing
    #[serde(default)]
    pub projects: HashMap<String, String>,
    /// Where cohort bookkeeping lives
    #[serde(default)]
    pub cohort: CohortStoreConfig,
}

/// Engine configuration for one named instance.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Instance name used for routing
    #[serde(default = "default_instance_name")]
    pub name: String,
    /// Engine type (only "duckdb" is built in)
    pub engine: String,
    /// Connection string for the engine
    pub connection: String,
    /// Engine-specific options
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// Authentication credentials (not serialized)
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

/// Authentication credentials for storage backends.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Cohort bookkeeping tables.
#[derive(Debug, Clone, Deserialize)]
pub struct CohortStoreConfig {
    /// Instance holding the cohort tables
    pub instance: String,
    /// Table with one row per cohort (`utm_id`, `utm_name`, ...)
    pub meta_table: String,
    /// Table with one row per cohort member (`ut_user`, `ut_tag`)
    pub users_table: String,
}

fn default_instance_name() -> String {
    "replica".to_string()
}

impl Default for CohortStoreConfig {
    fn default() -> Self {
        Self {
            instance: default_instance_name(),
            meta_table: "usertags_meta".to_string(),
            users_table: "usertags".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_instance_name(),
            engine: "duckdb".to_string(),
            connection: ":memory:".to_string(),
            options: HashMap::new(),
            credentials: None,
        }
    }
}

impl Settings {
    /// Loads configuration from all available sources.
    pub fn new(cli: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = builder.add_source(config::File::from_str(
            DEFAULT_CONFIG,
            config::FileFormat::Toml,
        ));

        if let Ok(metadata) = std::fs::metadata(DEFAULT_CONFIG_PATH) {
            if metadata.is_file() {
                builder = builder.add_source(config::File::from(PathBuf::from(DEFAULT_CONFIG_PATH)));
            }
        }

        if let Some(ref config_path) = cli.config {
            builder = builder.add_source(config::File::from(config_path.clone()));
        }

        builder = builder.add_source(config::Environment::with_prefix("USERMETRICS").separator("__"));

        if let Some(ref engine) = cli.engine {
            builder = builder.set_override("engine.engine", engine.as_str())?;
        }
        if let Some(ref connection) = cli.engine_connection {
            builder = builder.set_override("engine.connection", connection.as_str())?;
        }
        if let Some(ref options) = cli.engine_options {
            builder = builder.set_override("engine.options", parse_options(options))?;
        }

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.engine.credentials = Self::load_engine_credentials(cli);

        Ok(settings)
    }

    /// Instance serving `project`, falling back to the default instance.
    pub fn instance_for(&self, project: &str) -> &str {
        self.projects
            .get(project)
            .map(String::as_str)
            .unwrap_or(self.engine.name.as_str())
    }

    /// Load credentials, environment first, then command line.
    fn load_engine_credentials(cli: &CliArgs) -> Option<Credentials> {
        if let (Some(username), Some(password)) = (
            env::var("USERMETRICS_ENGINE_USERNAME").ok(),
            env::var("USERMETRICS_ENGINE_PASSWORD").ok(),
        ) {
            return Some(Credentials { username, password });
        }

        if let (Some(username), Some(password)) = (&cli.engine_username, &cli.engine_password) {
            return Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            });
        }

        None
    }
}

fn parse_options(options: &[String]) -> HashMap<String, String> {
    options
        .iter()
        .filter_map(|opt| {
            let (key, value) = opt.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
