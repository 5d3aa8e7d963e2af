use taxroll_core::jitter::JitterConfig;
use taxroll_core::job::{JobOutcome, PipelineConfig};
use taxroll_core::pipeline::{Pipeline, TracingPipelineReporter};
use taxroll_core::testutil::{MockExtractor, MockPortal, make_test_record};
use taxroll_core::user_agent::UserAgents;
use tokio_util::sync::CancellationToken;

use crate::integration::common::{count_rows, setup_test_db};

fn url(id: i64) -> String {
    format!("https://propaccess.trueautomation.com/clientdb/Property.aspx?cid=56&prop_id={id}")
}

#[tokio::test]
async fn stored_properties_are_skipped_and_new_one_persisted() {
    let (db, _container) = setup_test_db().await;
    let store = db.property_repo();
    let proxies = db.proxy_repo();
    proxies
        .load(&["10.2.0.1:3128".to_string(), "10.2.0.2:3128".to_string()])
        .await
        .unwrap();

    store.persist(&make_test_record(100)).await.unwrap();
    store.persist(&make_test_record(200)).await.unwrap();

    let portal = MockPortal::new();
    let pipeline = Pipeline::new(
        store.clone(),
        proxies.clone(),
        portal.clone(),
        MockExtractor::new(),
        UserAgents::from_lines("Mozilla/5.0 (X11; Linux x86_64)"),
        PipelineConfig::default().with_warmup_jitter(JitterConfig::none()),
    );

    let report = pipeline
        .run(
            vec![url(100), url(200), url(300)],
            CancellationToken::new(),
            &TracingPipelineReporter,
        )
        .await;

    assert_eq!(report.total, 3);
    assert_eq!(report.duplicates, 2);
    assert_eq!(report.persisted, 1);
    assert_eq!(report.failed_total(), 0);

    for job in &report.jobs {
        match job.property_id {
            Some(100) | Some(200) => assert_eq!(job.outcome, JobOutcome::Duplicate),
            Some(300) => assert_eq!(job.outcome, JobOutcome::Persisted),
            other => panic!("unexpected property {other:?}"),
        }
    }

    // Only the new property touched the network.
    assert_eq!(portal.fetch_calls(), vec![url(300)]);
    assert_eq!(portal.warm_up_calls().len(), 1);

    let stored = store.get(300).await.unwrap().expect("property 300 stored");
    assert_eq!(stored, make_test_record(300));
    assert_eq!(count_rows(&db, "properties").await, 3);

    let total_uses: i64 = proxies.list().await.unwrap().iter().map(|p| p.uses).sum();
    assert_eq!(total_uses, 1);
}

#[tokio::test]
async fn failed_warm_up_marks_database_proxy_bad() {
    let (db, _container) = setup_test_db().await;
    let proxies = db.proxy_repo();
    proxies.load(&["10.3.0.1:3128".to_string()]).await.unwrap();

    let portal = MockPortal::new()
        .with_warm_up_error(taxroll_core::AppError::NetworkError("HTTP 403".into()));
    let pipeline = Pipeline::new(
        db.property_repo(),
        proxies.clone(),
        portal,
        MockExtractor::new(),
        UserAgents::from_lines("Mozilla/5.0"),
        PipelineConfig::default()
            .with_replicas(1)
            .with_warmup_jitter(JitterConfig::none()),
    );

    let report = pipeline
        .run(vec![url(1)], CancellationToken::new(), &TracingPipelineReporter)
        .await;
    assert_eq!(report.failed.get("network_error"), Some(&1));
    assert!(proxies.list().await.unwrap()[0].is_bad);

    // With its only proxy retired the next run cannot get an identity.
    let report = pipeline
        .run(vec![url(2)], CancellationToken::new(), &TracingPipelineReporter)
        .await;
    assert_eq!(report.failed.get("proxy_exhaustion"), Some(&1));
}
