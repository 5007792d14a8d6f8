#[cfg(test)]
mod tests {
    use crate::metrics::{Cutoff, Metric, MetricKind, ProcessOptions, UserMetric};
    use crate::{
        boolean_rate, Cohort, CohortResolver, ExperimentCatalogue, MetricError, NamespaceFilter,
        TimeWindow, UserId, UserQuerySource,
    };
    use async_trait::async_trait;
    use futures::StreamExt;
    use mockall::*;
    use std::sync::{Arc, Mutex};
    use umstore_core::{
        AccessMode, ConnectionHandle, Connector, DuckDbBackend, Row, StorageBackend, StoreContext,
        StoreError, Value,
    };

    mock! {
        pub Backend {}
        #[async_trait]
        impl StorageBackend for Backend {
            async fn query(&self, sql: &str, params: &[Value]) -> umstore_core::Result<Vec<Row>>;
            async fn execute(&self, sql: &str, params: &[Value]) -> umstore_core::Result<usize>;
            async fn execute_batch(&self, sql: &str) -> umstore_core::Result<()>;
            fn try_clone_boxed(&self) -> umstore_core::Result<Box<dyn StorageBackend>>;
        }
    }

    type QueryLog = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

    fn registration_row(id: i64, name: &str, ts: &str) -> Row {
        vec![Value::Int(id), Value::Text(name.to_string()), Value::Text(ts.to_string())]
    }

    /// Answers registration lookups with `registrations` and every activity
    /// count with `count`, recording each query.
    fn recording_backend(log: QueryLog, registrations: Vec<Row>, count: i64) -> MockBackend {
        let mut backend = MockBackend::new();
        backend
            .expect_query()
            .returning(move |sql: &str, params: &[Value]| {
                log.lock().unwrap().push((sql.to_string(), params.to_vec()));
                if sql.contains(".logging") {
                    Ok(registrations.clone())
                } else {
                    Ok(vec![vec![Value::Int(count)]])
                }
            });
        backend
    }

    fn handle(backend: MockBackend) -> ConnectionHandle {
        ConnectionHandle::new("replica", AccessMode::ReadOnly, Arc::new(backend))
    }

    fn window() -> TimeWindow {
        TimeWindow::new("2012-10-26T00:00:00", "2012-11-07T00:00:00").unwrap()
    }

    async fn activity_query(is_survival: bool) -> (String, Vec<Value>) {
        let log = QueryLog::default();
        let backend = recording_backend(
            log.clone(),
            vec![registration_row(101, "Alice", "20121026120000")],
            3,
        );
        let mut metric = Metric::new(MetricKind::Threshold, handle(backend)).unwrap();
        let options = ProcessOptions::default()
            .window(window())
            .cutoff(Cutoff::WindowEnd)
            .survival(is_survival);
        metric.process(&Cohort::new("enwiki", [101_i64]), &options).await.unwrap();

        let queries = log.lock().unwrap();
        assert_eq!(queries.len(), 2);
        queries[1].clone()
    }

    #[tokio::test]
    async fn test_threshold_counts_at_or_before_cutoff() {
        let (sql, params) = activity_query(false).await;
        assert!(sql.ends_with("rev_user = ? AND rev_timestamp <= ?"), "{}", sql);
        assert_eq!(params, vec![Value::Int(101), Value::Text("20121107000000".into())]);
    }

    #[tokio::test]
    async fn test_survival_counts_strictly_after_cutoff() {
        let (sql, params) = activity_query(true).await;
        assert!(sql.ends_with("rev_user = ? AND rev_timestamp > ?"), "{}", sql);
        assert_eq!(params, vec![Value::Int(101), Value::Text("20121107000000".into())]);
    }

    #[tokio::test]
    async fn test_directional_queries_differ_only_in_operator() {
        let (threshold, _) = activity_query(false).await;
        let (survival, _) = activity_query(true).await;
        assert_ne!(threshold, survival);
        assert_eq!(threshold.replace("rev_timestamp <= ?", "rev_timestamp > ?"), survival);
    }

    #[tokio::test]
    async fn test_restrict_binds_window_after_cutoff() {
        let log = QueryLog::default();
        let backend = recording_backend(
            log.clone(),
            vec![registration_row(101, "Alice", "2012-10-26 12:00:00")],
            0,
        );
        let mut metric = Metric::new(MetricKind::Survival, handle(backend)).unwrap();
        let options = ProcessOptions::default().window(window()).t(24).restrict(true);
        metric.process(&Cohort::new("enwiki", [101_i64]), &options).await.unwrap();

        let queries = log.lock().unwrap();
        let (sql, params) = &queries[1];
        assert!(sql.ends_with("rev_timestamp > ? AND rev_timestamp > ? AND rev_timestamp <= ?"));
        assert_eq!(
            params,
            &vec![
                Value::Int(101),
                Value::Text("20121027120000".into()),
                Value::Text("20121026000000".into()),
                Value::Text("20121107000000".into()),
            ]
        );
        assert_eq!(metric.results()[0].get("is_alive"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_namespace_clause_is_rendered() {
        let log = QueryLog::default();
        let backend = recording_backend(log.clone(), vec![registration_row(7, "Bo", "20121030000000")], 1);
        let mut metric = Metric::new(MetricKind::Threshold, handle(backend)).unwrap();
        let options = ProcessOptions::default().namespace(NamespaceFilter::codes([0, 4]).unwrap());
        metric.process(&Cohort::new("enwiki", [7_i64]), &options).await.unwrap();

        let queries = log.lock().unwrap();
        assert!(queries[1].0.contains("WHERE page_namespace IN (0,4) AND rev_user = ?"));
    }

    #[tokio::test]
    async fn test_user_names_are_bound_not_inlined() {
        let log = QueryLog::default();
        let backend = recording_backend(
            log.clone(),
            vec![registration_row(101, "Alice Smith", "20121026120000")],
            1,
        );
        let mut metric = Metric::new(MetricKind::Threshold, handle(backend)).unwrap();
        let options = ProcessOptions::default().is_id(false);
        let cohort = Cohort::new("enwiki", ["Alice Smith", "Robert'); DROP TABLE user;--"]);
        metric.process(&cohort, &options).await.unwrap();

        let queries = log.lock().unwrap();
        let (registration, params) = &queries[0];
        assert!(registration.ends_with("log_user_text IN (?,?)"));
        assert!(!registration.contains("DROP"));
        assert_eq!(params.len(), 2);
        assert!(queries[1].0.contains("rev_user_text = ?"));

        // only the registered user gets a row, reported by name
        assert_eq!(metric.results().len(), 1);
        assert_eq!(metric.results()[0].get("user_id"), Some(&Value::Text("Alice Smith".into())));
    }

    #[tokio::test]
    async fn test_registration_arity_mismatch() {
        let mut backend = MockBackend::new();
        backend
            .expect_query()
            .times(1)
            .returning(|_: &str, _: &[Value]| Ok(vec![vec![Value::Int(101), Value::Text("Alice".into())]]));
        let mut metric = Metric::new(MetricKind::Threshold, handle(backend)).unwrap();

        let result = metric.process(&Cohort::new("enwiki", [101_i64]), &ProcessOptions::default()).await;
        assert!(matches!(result, Err(MetricError::HeaderMismatch { expected: 3, actual: 2 })));
        assert!(metric.results().is_empty());
    }

    /// Registers user 101 and answers the activity count with `count_rows`.
    fn count_backend(count_rows: Vec<Row>) -> MockBackend {
        let mut backend = MockBackend::new();
        backend
            .expect_query()
            .times(2)
            .returning(move |sql: &str, _: &[Value]| {
                if sql.contains(".logging") {
                    Ok(vec![registration_row(101, "Alice", "20121026120000")])
                } else {
                    Ok(count_rows.clone())
                }
            });
        backend
    }

    async fn threshold_with_count(count_rows: Vec<Row>) -> (crate::Result<()>, usize) {
        let mut metric = Metric::new(MetricKind::Threshold, handle(count_backend(count_rows))).unwrap();
        let result = metric
            .process(&Cohort::new("enwiki", [101_i64]), &ProcessOptions::default())
            .await
            .map(|_| ());
        (result, metric.results().len())
    }

    #[tokio::test]
    async fn test_activity_count_without_rows_fails() {
        let (result, rows) = threshold_with_count(vec![]).await;
        assert!(matches!(result, Err(MetricError::UnexpectedValue { ref column, .. }) if column == "revs"));
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_activity_count_non_integer_fails() {
        let (result, rows) = threshold_with_count(vec![vec![Value::Text("n/a".into())]]).await;
        assert!(matches!(result, Err(MetricError::UnexpectedValue { ref value, .. }) if value == "n/a"));
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_activity_count_arity_mismatch() {
        let (result, rows) = threshold_with_count(vec![vec![Value::Null, Value::Int(9)]]).await;
        assert!(matches!(result, Err(MetricError::HeaderMismatch { expected: 1, actual: 2 })));
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_results() {
        let mut backend = MockBackend::new();
        let mut seq = Sequence::new();
        backend
            .expect_query()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|sql: &str, _: &[Value]| {
                if sql.contains(".logging") {
                    Ok(vec![registration_row(101, "Alice", "20121026120000")])
                } else {
                    Ok(vec![vec![Value::Int(2)]])
                }
            });
        backend
            .expect_query()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_: &str, _: &[Value]| Ok(vec![registration_row(101, "Alice", "20121026120000")]));
        backend
            .expect_query()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_: &str, _: &[Value]| Err(StoreError::Busy("connection lost".into())));

        let mut metric = Metric::new(MetricKind::Threshold, handle(backend)).unwrap();
        let cohort = Cohort::new("enwiki", [101_i64]);
        metric.process(&cohort, &ProcessOptions::default()).await.unwrap();
        assert_eq!(metric.results().len(), 1);

        let result = metric.process(&cohort, &ProcessOptions::default()).await;
        assert!(matches!(result, Err(MetricError::Store(StoreError::Busy(_)))));
        assert_eq!(metric.results().len(), 1);
        assert_eq!(metric.results()[0].get("has_reached_threshold"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_errors_before_any_query() {
        let mut backend = MockBackend::new();
        backend.expect_query().never();
        let mut metric = Metric::new(MetricKind::EditCount, handle(backend)).unwrap();

        let empty = Cohort::new("enwiki", Vec::<i64>::new());
        let options = ProcessOptions::default().window(window());
        assert!(matches!(metric.process(&empty, &options).await, Err(MetricError::EmptyCohort)));

        let cohort = Cohort::new("enwiki", [101_i64]);
        let no_window = ProcessOptions::default();
        assert!(matches!(
            metric.process(&cohort, &no_window).await,
            Err(MetricError::MissingOption("window"))
        ));

        let bad_project = Cohort::new("en wiki; --", [101_i64]);
        assert!(matches!(
            metric.process(&bad_project, &options).await,
            Err(MetricError::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_unimplemented_metric() {
        let backend = MockBackend::new();
        let result = Metric::new(MetricKind::RevertRate, handle(backend));
        assert!(matches!(result, Err(MetricError::UnimplementedMetric(_))));
    }

    #[test]
    fn test_unknown_metric_name() {
        let err = tokio_test::assert_err!("revert".parse::<MetricKind>());
        assert!(matches!(err, MetricError::UnknownMetric(_)));
        assert_eq!(tokio_test::assert_ok!("revert_rate".parse::<MetricKind>()), MetricKind::RevertRate);
    }

    const SCHEMA: &str = r#"
        CREATE SCHEMA enwiki;
        CREATE TABLE enwiki.logging (
            log_id INTEGER, log_type VARCHAR, log_action VARCHAR,
            log_user BIGINT, log_user_text VARCHAR, log_timestamp VARCHAR
        );
        CREATE TABLE enwiki.page (page_id INTEGER, page_namespace INTEGER, page_title VARCHAR);
        CREATE TABLE enwiki.revision (
            rev_id INTEGER, rev_page INTEGER, rev_user BIGINT,
            rev_user_text VARCHAR, rev_timestamp VARCHAR, rev_len INTEGER, rev_parent_id INTEGER
        );
        CREATE TABLE enwiki.edit_page_tracking (ept_user BIGINT, ept_title VARCHAR, ept_timestamp VARCHAR);
        CREATE TABLE enwiki."user" (user_id BIGINT, user_name VARCHAR, user_registration VARCHAR);
        CREATE TABLE usertags_meta (
            utm_id INTEGER, utm_name VARCHAR, utm_project VARCHAR,
            utm_notes VARCHAR, utm_touched VARCHAR, utm_enabled BOOLEAN
        );
        CREATE TABLE usertags (ut_user BIGINT, ut_tag INTEGER);

        INSERT INTO enwiki.logging VALUES
            (1, 'newusers', 'create', 101, 'Alice Smith', '20121026120000'),
            (2, 'newusers', 'create', 102, 'Bob', '20121028000000'),
            (3, 'newusers', 'create', 103, 'Carol', '20121030000000'),
            (4, 'newusers', 'create', 104, 'Dave', '20121105000000'),
            (5, 'newusers', 'autocreate', 105, 'Eve', '20121101000000'),
            (6, 'block', 'block', 101, 'Alice Smith', '20121102000000');
        INSERT INTO enwiki."user" VALUES
            (101, 'Alice Smith', '20121026120000'),
            (102, 'Bob', '20121028000000'),
            (103, 'Carol', '20121030000000'),
            (104, 'Dave', '20121105000000'),
            (106, 'Frank', '20121201000000');
        INSERT INTO enwiki.page VALUES (1, 0, 'Main_Page'), (2, 1, 'Talk:Main_Page');
        INSERT INTO enwiki.revision VALUES
            (10, 1, 101, 'Alice Smith', '20121027100000', 100, 0),
            (11, 1, 101, 'Alice Smith', '20121101000000', 50, 10),
            (12, 1, 102, 'Bob', '20121110000000', 70, 11),
            (13, 1, 103, 'Carol', '20121107000000', 30, 12),
            (14, 2, 104, 'Dave', '20121106000000', 10, 0);
        INSERT INTO enwiki.edit_page_tracking VALUES
            (101, 'Main_Page', '20121026123000'),
            (102, 'Main_Page', '20121028050000'),
            (102, 'Main_Page', '20121029000000'),
            (104, 'Talk:Main_Page', '20121105001000');
    "#;

    async fn store() -> Arc<StoreContext> {
        let backend = DuckDbBackend::new_in_memory().unwrap();
        backend.execute_batch(SCHEMA).await.unwrap();
        let connector = Connector::new();
        connector.register("replica", Box::new(backend)).await;
        Arc::new(StoreContext::new(connector, "replica").with_project("enwiki", "replica"))
    }

    async fn run(
        context: &StoreContext,
        kind: MetricKind,
        cohort: &Cohort,
        options: &ProcessOptions,
    ) -> Vec<(Value, Value)> {
        let mut metric = Metric::open(kind, context, cohort.project()).await.unwrap();
        metric
            .process(cohort, options)
            .await
            .unwrap()
            .iter()
            .map(|row| (row.values()[0].clone(), row.values()[1].clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_threshold_end_to_end() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", [101_i64, 102, 103]);
        let options = ProcessOptions::default()
            .window(window())
            .cutoff(Cutoff::WindowEnd)
            .survival(false)
            .namespace(NamespaceFilter::All);

        let rows = run(&context, MetricKind::Threshold, &cohort, &options).await;
        assert_eq!(
            rows,
            vec![
                (Value::Int(101), Value::Bool(true)),
                (Value::Int(102), Value::Bool(false)),
                (Value::Int(103), Value::Bool(true)),
            ]
        );

        let at_least_two = options.clone().n(2);
        let rows = run(&context, MetricKind::Threshold, &cohort, &at_least_two).await;
        let passed: Vec<_> = rows.iter().filter(|(_, v)| *v == Value::Bool(true)).collect();
        assert_eq!(passed, vec![&(Value::Int(101), Value::Bool(true))]);
    }

    #[tokio::test]
    async fn test_survival_end_to_end() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", [101_i64, 102, 103]);
        let options = ProcessOptions::default().window(window()).cutoff(Cutoff::WindowEnd);

        let rows = run(&context, MetricKind::Survival, &cohort, &options).await;
        assert_eq!(
            rows,
            vec![
                (Value::Int(101), Value::Bool(false)),
                (Value::Int(102), Value::Bool(true)),
                (Value::Int(103), Value::Bool(false)),
            ]
        );

        // the restriction window drops Bob's edit after the window end
        let restricted = ProcessOptions::default().window(window()).t(24).restrict(true);
        let rows = run(&context, MetricKind::Survival, &cohort, &restricted).await;
        assert_eq!(rows[1], (Value::Int(102), Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_threshold_after_registration() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", [101_i64, 102, 103, 999]);
        let rows = run(&context, MetricKind::Threshold, &cohort, &ProcessOptions::default().t(24)).await;
        // 999 never registered and is skipped
        assert_eq!(
            rows,
            vec![
                (Value::Int(101), Value::Bool(true)),
                (Value::Int(102), Value::Bool(false)),
                (Value::Int(103), Value::Bool(false)),
            ]
        );
    }

    #[tokio::test]
    async fn test_namespace_filter_end_to_end() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", [104_i64]);
        let all = ProcessOptions::default().window(window()).cutoff(Cutoff::WindowEnd);
        assert_eq!(run(&context, MetricKind::Threshold, &cohort, &all).await[0].1, Value::Bool(true));

        let articles = all.clone().namespace(NamespaceFilter::codes([0]).unwrap());
        assert_eq!(run(&context, MetricKind::Threshold, &cohort, &articles).await[0].1, Value::Bool(false));
    }

    #[tokio::test]
    async fn test_threshold_by_user_name() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", ["Alice Smith", "Bob"]);
        let options = ProcessOptions::default()
            .is_id(false)
            .window(window())
            .cutoff(Cutoff::WindowEnd);
        let rows = run(&context, MetricKind::Threshold, &cohort, &options).await;
        assert_eq!(
            rows,
            vec![
                (Value::Text("Alice Smith".into()), Value::Bool(true)),
                (Value::Text("Bob".into()), Value::Bool(false)),
            ]
        );
    }

    #[tokio::test]
    async fn test_edit_count_end_to_end() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", [101_i64, 102, 103, 999]);
        let options = ProcessOptions::default().window(window());
        let mut metric = Metric::open(MetricKind::EditCount, &context, "enwiki").await.unwrap();
        metric.process(&cohort, &options).await.unwrap();

        let rows: Vec<Vec<Value>> = metric.iter().map(|row| row.values().to_vec()).collect();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(101), Value::Int(2), Value::Int(150)],
                vec![Value::Int(102), Value::Int(0), Value::Int(0)],
                vec![Value::Int(103), Value::Int(1), Value::Int(30)],
                vec![Value::Int(999), Value::Int(0), Value::Int(0)],
            ]
        );
        assert_eq!(metric.header(), &["user_id", "edit_count", "bytes_added"]);

        // results can be iterated again
        assert_eq!((&metric).into_iter().count(), 4);
    }

    #[tokio::test]
    async fn test_bytes_added_end_to_end() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", [101_i64, 102, 103]);
        let options = ProcessOptions::default().window(window());
        let mut metric = Metric::open(MetricKind::BytesAdded, &context, "enwiki").await.unwrap();
        metric.process(&cohort, &options).await.unwrap();

        let ints = |values: [i64; 6]| values.into_iter().map(Value::Int).collect::<Vec<_>>();
        let rows: Vec<Vec<Value>> = metric.iter().map(|row| row.values().to_vec()).collect();
        assert_eq!(
            rows,
            vec![
                ints([101, 50, 150, 100, -50, 2]),
                ints([102, 0, 0, 0, 0, 0]),
                ints([103, -40, 40, 0, -40, 1]),
            ]
        );
        assert_eq!(metric.results()[0].get("bytes_added_neg"), Some(&Value::Int(-50)));

        let no_window = ProcessOptions::default();
        assert!(matches!(
            metric.process(&cohort, &no_window).await,
            Err(MetricError::MissingOption("window"))
        ));
        assert_eq!(metric.results().len(), 3);
    }

    #[tokio::test]
    async fn test_bytes_added_by_user_name() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", ["Alice Smith"]);
        let options = ProcessOptions::default().window(window()).is_id(false);
        let mut metric = Metric::open(MetricKind::BytesAdded, &context, "enwiki").await.unwrap();
        metric.process(&cohort, &options).await.unwrap();
        assert_eq!(metric.results()[0].get("user_id"), Some(&Value::Text("Alice Smith".into())));
        assert_eq!(metric.results()[0].get("bytes_added_net"), Some(&Value::Int(50)));
    }

    #[tokio::test]
    async fn test_time_to_threshold_end_to_end() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", [101_i64, 102, 103]);

        let rows = run(&context, MetricKind::TimeToThreshold, &cohort, &ProcessOptions::default()).await;
        assert_eq!(
            rows,
            vec![
                (Value::Int(101), Value::Int(6600)),
                (Value::Int(102), Value::Int(-1)),
                (Value::Int(103), Value::Int(-1)),
            ]
        );

        let to_last = ProcessOptions::default().edits(0, -1);
        let rows = run(&context, MetricKind::TimeToThreshold, &cohort, &to_last).await;
        assert_eq!(rows[1], (Value::Int(102), Value::Int(0)));

        // 104 only edited a talk page
        let main = ProcessOptions::default().edits(0, -1).namespace(NamespaceFilter::codes([0]).unwrap());
        let rows = run(&context, MetricKind::TimeToThreshold, &Cohort::new("enwiki", [104_i64]), &main).await;
        assert_eq!(rows, vec![(Value::Int(104), Value::Int(-1))]);
    }

    #[tokio::test]
    async fn test_live_account_end_to_end() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", [101_i64, 102, 103]);

        let rows = run(&context, MetricKind::LiveAccount, &cohort, &ProcessOptions::default()).await;
        assert_eq!(
            rows,
            vec![
                (Value::Int(101), Value::Bool(true)),
                (Value::Int(102), Value::Bool(false)),
                (Value::Int(103), Value::Bool(false)),
            ]
        );

        let six_hours = ProcessOptions::default().active_minutes(360);
        let rows = run(&context, MetricKind::LiveAccount, &cohort, &six_hours).await;
        assert_eq!(rows[1], (Value::Int(102), Value::Bool(true)));

        let dave = Cohort::new("enwiki", [104_i64]);
        let rows = run(&context, MetricKind::LiveAccount, &dave, &ProcessOptions::default()).await;
        assert_eq!(rows, vec![(Value::Int(104), Value::Bool(true))]);
        let main = ProcessOptions::default().namespace(NamespaceFilter::codes([0]).unwrap());
        let rows = run(&context, MetricKind::LiveAccount, &dave, &main).await;
        assert_eq!(rows, vec![(Value::Int(104), Value::Bool(false))]);
    }

    #[tokio::test]
    async fn test_boolean_rate_over_threshold() {
        let context = store().await;
        let cohort = Cohort::new("enwiki", [101_i64, 102, 103, 104]);
        let options = ProcessOptions::default().window(window()).cutoff(Cutoff::WindowEnd);
        let mut metric = Metric::open(MetricKind::Threshold, &context, "enwiki").await.unwrap();
        metric.process(&cohort, &options).await.unwrap();

        let rate = boolean_rate(metric.results(), "has_reached_threshold").unwrap();
        assert_eq!(rate.values(), &[Value::Int(4), Value::Int(3), Value::Float(0.75)]);
    }

    #[tokio::test]
    async fn test_resolve_ranks_by_activity() {
        let context = store().await;
        let resolver = CohortResolver::new(context, UserQuerySource::Logging);

        let users = resolver.resolve("enwiki", &window(), 2, 0).await.unwrap();
        assert_eq!(users, vec![UserId::Id(101), UserId::Id(102)]);

        let users = resolver.resolve("enwiki", &window(), 10, 1).await.unwrap();
        assert_eq!(users, vec![UserId::Id(101)]);
    }

    #[tokio::test]
    async fn test_users_between_sources() {
        let context = store().await;

        let from_log = CohortResolver::new(context.clone(), UserQuerySource::Logging);
        let users: Vec<_> = from_log
            .users_between("2012-10-26", "2012-11-07", "enwiki")
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(users, vec![UserId::Id(101), UserId::Id(102), UserId::Id(103), UserId::Id(104)]);

        let from_registration = CohortResolver::new(context, UserQuerySource::Registration);
        let stream = from_registration.users_between("2012-10-29", "2012-12-31", "enwiki");
        let users: Vec<_> = stream.map(|user| user.unwrap()).collect().await;
        assert_eq!(users, vec![UserId::Id(103), UserId::Id(104), UserId::Id(106)]);

        // a new call queries again
        let again: Vec<_> = from_registration
            .users_between("2012-10-29", "2012-12-31", "enwiki")
            .map(|user| user.unwrap())
            .collect()
            .await;
        assert_eq!(again, users);
    }

    #[tokio::test]
    async fn test_users_between_reports_bad_input_lazily() {
        let context = store().await;
        let resolver = CohortResolver::new(context, UserQuerySource::Logging);
        let mut stream = resolver.users_between("2012-11-07", "2012-10-26", "enwiki");
        assert!(matches!(stream.next().await, Some(Err(MetricError::InvalidWindow { .. }))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_next_cohort_id() {
        let context = store().await;
        let resolver = CohortResolver::new(context.clone(), UserQuerySource::Logging);
        assert!(matches!(resolver.latest_cohort_id().await, Err(MetricError::NoCohortsExist)));
        assert_eq!(resolver.next_cohort_id().await.unwrap(), 1);

        let writer = context.dedicated("replica").await.unwrap();
        writer
            .execute(
                "INSERT INTO usertags_meta (utm_id, utm_name) VALUES (?, ?), (?, ?)",
                &[Value::Int(3), "pilot".into(), Value::Int(7), "cta4".into()],
            )
            .await
            .unwrap();
        assert_eq!(resolver.latest_cohort_id().await.unwrap(), 7);
        assert_eq!(resolver.next_cohort_id().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_record_cohort() {
        let context = store().await;
        let resolver = CohortResolver::new(context.clone(), UserQuerySource::Logging);
        let cohort = Cohort::new("enwiki", [101_i64, 102, 103]);

        assert_eq!(resolver.record("cta4", &cohort, "first run").await.unwrap(), 1);
        assert_eq!(resolver.record("cta4-b", &cohort, "").await.unwrap(), 2);

        let reader = context.shared().await.unwrap();
        let rows = reader
            .query("SELECT ut_user FROM usertags WHERE ut_tag = ? ORDER BY ut_user", &[Value::Int(2)])
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![Value::Int(101)], vec![Value::Int(102)], vec![Value::Int(103)]]);

        let meta = reader
            .query("SELECT utm_name, utm_project, utm_enabled FROM usertags_meta WHERE utm_id = 1", &[])
            .await
            .unwrap();
        assert_eq!(meta, vec![vec!["cta4".into(), "enwiki".into(), Value::Bool(true)]]);

        let empty = Cohort::new("enwiki", Vec::<i64>::new());
        assert!(matches!(resolver.record("none", &empty, "").await, Err(MetricError::EmptyCohort)));
    }

    #[tokio::test]
    async fn test_experiment_tables_and_cohort() {
        let context = store().await;
        let catalogue = ExperimentCatalogue::from_toml_str(include_str!("../../config/experiments.toml")).unwrap();
        let cta4 = catalogue.get("cta4").unwrap();

        let writer = context.dedicated("replica").await.unwrap();
        assert_eq!(cta4.create_tables(&writer).await.unwrap(), 5);
        writer
            .execute_batch(
                "INSERT INTO e3_cta4_server_logs (project, user_id) VALUES ('enwiki', 103), ('enwiki', 101), ('enwiki', 103);",
            )
            .await
            .unwrap();

        let reader = context.shared().await.unwrap();
        let cohort = cta4.cohort(&reader, "enwiki").await.unwrap();
        assert_eq!(cohort.users(), &[UserId::Id(101), UserId::Id(103)]);

        // the shared handle cannot create tables
        assert!(matches!(
            cta4.create_tables(&reader).await,
            Err(MetricError::Store(StoreError::ReadOnly(_)))
        ));
    }
}
