//! usermetrics command-line tool.
//!
//! Computes per-user metrics for a cohort, builds cohorts from registration
//! windows and records them in the bookkeeping tables.
//!
//! # Configuration
//!
//! Store settings (instances, project routing, cohort tables) are read from
//! the embedded defaults, `/etc/usermetrics/config.toml`, `--config` and
//! `USERMETRICS__*` environment variables. Metric defaults (project,
//! namespace, `t`, `n`, date range) come from `--metrics-config` and the same
//! environment prefix.
//!
//! ```text
//! usermetrics compute threshold 101 102 103 --start 2012-10-26 --end 2012-11-07 --window-end
//! usermetrics compute edit_count --experiment cta4
//! usermetrics compute bytes_added 101 102 --start 2012-10-26 --end 2012-11-07 --aggregate avg --field bytes_added_net
//! usermetrics compute time_to_threshold 101 102 --first-edit 0 --threshold-edit -1
//! usermetrics cohort --start 20121026000000 --end 20121107000000 --max-size 100 --record cta4
//! usermetrics users --start 2012-10-26 --end 2012-11-07 --source registration
//! usermetrics next-cohort-id
//! ```
//!
//! Result rows are printed as JSON lines keyed by header field.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use umstore_core::config::{CliArgs, Settings};
use umstore_core::StoreContext;
use usermetrics::{
    aggregate, boolean_rate, AggregateFunction, Cohort, CohortResolver, Cutoff,
    ExperimentCatalogue, Metric, MetricKind, MetricSettings, NamespaceFilter,
    TimeWindow, UserId, UserMetric, UserQuerySource,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    store: CliArgs,

    /// Metric defaults file
    #[arg(long, value_name = "FILE", global = true)]
    metrics_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute a metric for a list of users or an experiment's cohort
    Compute {
        /// threshold, survival, edit_count, bytes_added, time_to_threshold or live_account
        metric: MetricKind,
        /// User ids, or user names with --names
        users: Vec<String>,
        #[arg(long)]
        project: Option<String>,
        /// Take the cohort and window from this experiment
        #[arg(long, conflicts_with = "users")]
        experiment: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Hours after registration to the cutoff
        #[arg(long)]
        t: Option<i64>,
        /// Minimum revision count
        #[arg(long)]
        n: Option<i64>,
        /// all_namespaces or a comma-separated list of codes
        #[arg(long)]
        namespace: Option<NamespaceFilter>,
        /// Use the window end as the cutoff
        #[arg(long)]
        window_end: bool,
        #[arg(long)]
        survival: bool,
        /// Only count revisions inside the window
        #[arg(long)]
        restrict: bool,
        /// Treat users as names
        #[arg(long)]
        names: bool,
        /// Edit index time_to_threshold starts from
        #[arg(long)]
        first_edit: Option<i64>,
        /// Edit index time_to_threshold ends at, -1 for the last edit
        #[arg(long, allow_hyphen_values = true)]
        threshold_edit: Option<i64>,
        /// Minutes after registration a live account must open the editor within
        #[arg(long)]
        active_minutes: Option<i64>,
        /// Print the share of users passing instead of per-user rows
        #[arg(long, conflicts_with = "aggregate")]
        rate: bool,
        /// Reduce the rows with count, sum, avg, min or max over --field
        #[arg(long, requires = "field")]
        aggregate: Option<AggregateFunction>,
        /// Result field to aggregate
        #[arg(long)]
        field: Option<String>,
    },
    /// Pick the most active users registered in a window
    Cohort {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value_t = 100)]
        max_size: usize,
        #[arg(long, default_value_t = 0)]
        min_activity: i64,
        /// Record the cohort under this name
        #[arg(long)]
        record: Option<String>,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Stream users registered in a window
    Users {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// logging or registration
        #[arg(long)]
        source: Option<String>,
    },
    /// Print the id the next recorded cohort will get
    NextCohortId,
    /// Create an experiment's tables
    CreateTables { experiment: String },
}

fn user_source(name: Option<&str>, default: UserQuerySource) -> Result<UserQuerySource, Box<dyn std::error::Error>> {
    match name {
        None => Ok(default),
        Some("logging") => Ok(UserQuerySource::Logging),
        Some("registration") => Ok(UserQuerySource::Registration),
        Some(other) => Err(format!("Unknown user source: {}", other).into()),
    }
}

fn window(
    metrics: &MetricSettings,
    start: Option<String>,
    end: Option<String>,
) -> Result<Option<TimeWindow>, Box<dyn std::error::Error>> {
    let start = start.or_else(|| metrics.metric.date_start.clone());
    let end = end.or_else(|| metrics.metric.date_end.clone());
    match (start, end) {
        (Some(start), Some(end)) => Ok(Some(TimeWindow::new(start.as_str(), end.as_str())?)),
        (None, None) => Ok(None),
        _ => Err("Both --start and --end are required".into()),
    }
}

fn require_window(window: Option<TimeWindow>) -> Result<TimeWindow, Box<dyn std::error::Error>> {
    window.ok_or_else(|| "A date range is required (--start/--end or metric.date_start/date_end)".into())
}

fn experiments(metrics: &MetricSettings) -> Result<ExperimentCatalogue, Box<dyn std::error::Error>> {
    match &metrics.experiments {
        Some(path) => Ok(ExperimentCatalogue::load(path)?),
        None => Err("No experiment catalogue configured (set `experiments`)".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::new(&cli.store)?;
    let metrics = MetricSettings::new(cli.metrics_config.as_deref())?;
    let context = Arc::new(StoreContext::from_settings(&settings));
    info!(instance = %settings.engine.name, "store context ready");

    match cli.command {
        Command::Compute {
            metric,
            users,
            project,
            experiment,
            start,
            end,
            t,
            n,
            namespace,
            window_end,
            survival,
            restrict,
            names,
            first_edit,
            threshold_edit,
            active_minutes,
            rate,
            aggregate: function,
            field,
        } => {
            let project = project.unwrap_or_else(|| metrics.metric.project.clone());
            let mut options = metrics.process_options()?.is_id(!names).survival(survival).restrict(restrict);
            if let Some(window) = window(&metrics, start, end)? {
                options = options.window(window);
            }
            if let Some(t) = t {
                options = options.t(t);
            }
            if let Some(n) = n {
                options = options.n(n);
            }
            if let Some(namespace) = namespace {
                options = options.namespace(namespace);
            }
            if first_edit.is_some() || threshold_edit.is_some() {
                let first = first_edit.unwrap_or(options.first_edit);
                let threshold = threshold_edit.unwrap_or(options.threshold_edit);
                options = options.edits(first, threshold);
            }
            if let Some(minutes) = active_minutes {
                options = options.active_minutes(minutes);
            }

            let cohort = match experiment {
                Some(name) => {
                    let catalogue = experiments(&metrics)?;
                    let definition = catalogue.get(&name)?;
                    if options.window.is_none() {
                        options = options.window(definition.time_window()?);
                    }
                    definition.cohort(&context.reader_for(&project).await?, &project).await?
                }
                None => {
                    let users = users
                        .into_iter()
                        .map(|user| {
                            if names {
                                Ok(UserId::from(user))
                            } else {
                                user.parse::<i64>().map(UserId::from)
                            }
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Cohort::new(project.as_str(), users)
                }
            };
            if window_end {
                options = options.cutoff(Cutoff::WindowEnd);
            }

            let mut metric = Metric::open(metric, &context, cohort.project()).await?;
            metric.process(&cohort, &options).await?;
            if rate {
                let field = metric.header()[1];
                println!("{}", serde_json::to_string(&boolean_rate(metric.results(), field)?)?);
            } else if let (Some(function), Some(field)) = (function, field) {
                println!("{}", serde_json::to_string(&aggregate(function, metric.results(), &field)?)?);
            } else {
                for row in &metric {
                    println!("{}", serde_json::to_string(row)?);
                }
            }
        }
        Command::Cohort {
            project,
            start,
            end,
            max_size,
            min_activity,
            record,
            notes,
        } => {
            let project = project.unwrap_or_else(|| metrics.metric.project.clone());
            let window = require_window(window(&metrics, start, end)?)?;
            let resolver = CohortResolver::new(context.clone(), metrics.metric.user_source)
                .with_bookkeeping(settings.cohort.clone());
            let cohort = Cohort::new(project.as_str(), resolver.resolve(&project, &window, max_size, min_activity).await?);

            match record {
                Some(name) => {
                    let id = resolver.record(&name, &cohort, &notes).await?;
                    println!("{}", serde_json::json!({ "cohort_id": id, "name": name, "users": cohort.len() }));
                }
                None => {
                    for user in &cohort {
                        println!("{}", serde_json::to_string(user)?);
                    }
                }
            }
        }
        Command::Users {
            project,
            start,
            end,
            source,
        } => {
            let project = project.unwrap_or_else(|| metrics.metric.project.clone());
            let window = require_window(window(&metrics, start, end)?)?;
            let source = user_source(source.as_deref(), metrics.metric.user_source)?;
            let resolver = CohortResolver::new(context.clone(), source);

            let mut users = resolver.users_between(window.start(), window.end(), &project);
            while let Some(user) = users.next().await {
                println!("{}", serde_json::to_string(&user?)?);
            }
        }
        Command::NextCohortId => {
            let resolver = CohortResolver::new(context.clone(), metrics.metric.user_source)
                .with_bookkeeping(settings.cohort.clone());
            println!("{}", resolver.next_cohort_id().await?);
        }
        Command::CreateTables { experiment } => {
            let catalogue = experiments(&metrics)?;
            let definition = catalogue.get(&experiment)?;
            let handle = context.dedicated(context.instance_for(&metrics.metric.project)).await?;
            let created = definition.create_tables(&handle).await?;
            info!(experiment = %experiment, created, "created experiment tables");
        }
    }

    Ok(())
}
