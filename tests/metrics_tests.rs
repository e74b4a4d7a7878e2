use chrono::Utc;
use datastore_cache::{MetricsConfig, PerformanceLog};
use std::time::Duration;

#[tokio::test]
async fn test_performance_log_basic_operations() {
    let log = PerformanceLog::new(MetricsConfig::default());

    log.record("store", "/a.h5", Duration::from_millis(5), true)
        .await;
    log.record("store", "/b.h5", Duration::from_millis(15), false)
        .await;
    log.record("retrieve", "/a.h5::g", Duration::from_millis(3), true)
        .await;

    let summary = log.summary().await;
    assert_eq!(summary.len(), 2);

    let store = &summary["store"];
    assert_eq!(store.count, 2);
    assert_eq!(store.failures, 1);
    assert_eq!(store.total, Duration::from_millis(20));
    assert_eq!(store.max, Duration::from_millis(15));
    assert_eq!(store.average(), Duration::from_millis(10));
    assert_eq!(store.slow, 0);

    assert_eq!(summary["retrieve"].count, 1);
}

#[tokio::test]
async fn test_slow_operations_are_counted() {
    let config = MetricsConfig {
        slow_operation_threshold: Duration::from_millis(100),
        ..Default::default()
    };
    let log = PerformanceLog::new(config);

    log.record("store", "/a.h5", Duration::from_millis(50), true)
        .await;
    log.record("store", "/a.h5", Duration::from_millis(250), true)
        .await;

    assert_eq!(log.summary().await["store"].slow, 1);
}

#[tokio::test]
async fn test_history_size_limit() {
    let config = MetricsConfig {
        max_history_size: 3,
        ..Default::default()
    };
    let log = PerformanceLog::new(config);

    for i in 0..5 {
        log.record("retrieve", &format!("g{}", i), Duration::from_millis(i), true)
            .await;
    }

    let samples = log.samples_since(Utc::now() - chrono::Duration::hours(1)).await;
    assert_eq!(samples.len(), 3);
    // Oldest samples are dropped first
    assert_eq!(samples[0].target, "g2");
    assert_eq!(samples[2].target, "g4");
}

#[tokio::test]
async fn test_tracking_disabled() {
    let config = MetricsConfig {
        track_operations: false,
        ..Default::default()
    };
    let log = PerformanceLog::new(config);

    log.record("store", "/a.h5", Duration::from_millis(5), true)
        .await;
    assert!(log.summary().await.is_empty());
}

#[tokio::test]
async fn test_report_json_and_clear() {
    let log = PerformanceLog::new(MetricsConfig::default());
    log.record("delete_groups", "/a.h5", Duration::from_millis(8), true)
        .await;

    let report = log.report_json().await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(parsed["delete_groups"]["count"], 1);

    log.clear().await;
    assert!(log.summary().await.is_empty());
    assert!(log.samples_since(Utc::now() - chrono::Duration::hours(1)).await.is_empty());
}
