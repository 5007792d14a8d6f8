//! usermetrics: cohort behavioral metrics over revision history
//!
//! This library turns a metric definition plus a cohort of user handles into
//! parameterized queries, runs them against a historical data store and
//! yields typed, named-field result rows.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use umstore_core::{Connector, DuckDbBackend, StoreContext};
//! use usermetrics::{
//!     Cohort, CohortResolver, Cutoff, Metric, MetricKind, ProcessOptions, TimeWindow,
//!     UserMetric, UserQuerySource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Register the store instance holding the `enwiki` tables
//!     let connector = Connector::new();
//!     connector
//!         .register("replica", Box::new(DuckDbBackend::new("replica.db", &Default::default())?))
//!         .await;
//!     let context = Arc::new(StoreContext::new(connector, "replica"));
//!
//!     // Pick the most active users registered in the window
//!     let window = TimeWindow::new("2012-10-26T00:00:00", "2012-11-07T00:00:00")?;
//!     let resolver = CohortResolver::new(context.clone(), UserQuerySource::Logging);
//!     let users = resolver.resolve("enwiki", &window, 100, 5).await?;
//!     let cohort = Cohort::new("enwiki", users);
//!
//!     // Did they edit at or before the end of the window?
//!     let options = ProcessOptions::default().window(window).cutoff(Cutoff::WindowEnd);
//!     let mut metric = Metric::open(MetricKind::Threshold, &context, cohort.project()).await?;
//!     for row in metric.process(&cohort, &options).await?.iter() {
//!         println!("{}", serde_json::to_string(row)?);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod cohort;
pub mod config;
pub mod error;
pub mod escape;
pub mod experiment;
pub mod metrics;
pub mod result;
pub mod templates;
pub mod timestamp;
pub mod users;

pub mod tests;

pub use aggregator::{aggregate, apply_function, boolean_rate, AggregateFunction};
pub use cohort::{Cohort, UserId};
pub use config::MetricSettings;
pub use error::{MetricError, Result};
pub use escape::{escape, escape_identifier, format_list, format_namespace, NamespaceFilter};
pub use experiment::{ExperimentCatalogue, ExperimentDefinition};
pub use metrics::{Cutoff, Metric, MetricKind, ProcessOptions, UserMetric};
pub use result::ResultRow;
pub use templates::{QueryKey, TemplateStore};
pub use timestamp::{normalize, TimeWindow, Timestamp};
pub use users::{CohortResolver, UserQuerySource};
