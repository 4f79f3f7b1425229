use std::sync::Arc;

use broker_core::BrokerSettings;
use tokio::time::{self, Duration};

mod common;
use common::fake_service::FakeServiceFactory;
use common::fake_transport::FakeConnector;

fn short_ttl() -> BrokerSettings {
    BrokerSettings {
        idle_ttl_ms: 1_000,
        sweep_interval_ms: 200,
        ..BrokerSettings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn use_keeps_an_entry_alive_and_idleness_rebuilds_it() {
    common::init_test_logging();

    let log = common::event_log();
    let connector = Arc::new(FakeConnector::new(log.clone()));
    let factory = Arc::new(FakeServiceFactory::new(log.clone()));
    let broker = common::broker(&connector, &factory, short_ttl());
    let config = common::pg_config("10.0.0.5", 5432);

    let first = broker.get_service(&config, None).await.unwrap();

    // ── Each use resets the idle clock ───────────────────────────────────
    time::advance(Duration::from_millis(600)).await;
    let touched = broker.get_service(&config, None).await.unwrap();
    time::advance(Duration::from_millis(600)).await;
    let still = broker.get_service(&config, None).await.unwrap();

    assert!(Arc::ptr_eq(&first, &touched));
    assert!(
        Arc::ptr_eq(&first, &still),
        "1.2s after creation but only 0.6s idle: must be reused"
    );
    assert_eq!(factory.creates(), 1);

    // ── Past the TTL the old service is closed and a new one built ───────
    time::advance(Duration::from_millis(1_500)).await;
    let rebuilt = broker.get_service(&config, None).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert_eq!(factory.creates(), 2);
    assert_eq!(factory.closes(), 1, "the stale service is released exactly once");
}

#[tokio::test(start_paused = true)]
async fn sweeper_evicts_idle_entries_without_new_requests() {
    common::init_test_logging();

    let log = common::event_log();
    let connector = Arc::new(FakeConnector::new(log.clone()));
    let factory = Arc::new(FakeServiceFactory::new(log.clone()));
    let broker = common::broker(&connector, &factory, short_ttl());
    broker.start_sweeper();

    let config = common::pg_config("10.0.0.5", 5432);
    broker.get_service(&config, None).await.unwrap();
    assert_eq!(broker.cached_services(), 1);

    // A few sweep intervals past the TTL, driven by the paused clock.
    time::sleep(Duration::from_millis(1_600)).await;

    assert_eq!(broker.cached_services(), 0, "the sweeper should have evicted it");
    assert_eq!(factory.closes(), 1);

    // Nothing left to release on shutdown.
    assert_eq!(broker.shutdown_all().await, 0);
    assert_eq!(factory.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn sweep_spares_recently_used_entries() {
    let log = common::event_log();
    let connector = Arc::new(FakeConnector::new(log.clone()));
    let factory = Arc::new(FakeServiceFactory::new(log.clone()));
    let broker = common::broker(&connector, &factory, short_ttl());

    let idle = common::pg_config("10.0.0.5", 5432);
    let busy = common::pg_config("10.0.0.6", 5432);
    broker.get_service(&idle, None).await.unwrap();
    broker.get_service(&busy, None).await.unwrap();

    time::advance(Duration::from_millis(700)).await;
    broker.get_service(&busy, None).await.unwrap();
    time::advance(Duration::from_millis(400)).await;

    assert_eq!(broker.cache().sweep().await, 1);
    assert_eq!(broker.cached_services(), 1);
    assert_eq!(factory.creates(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_all_releases_everything_once() {
    let log = common::event_log();
    let connector = Arc::new(FakeConnector::new(log.clone()));
    let factory = Arc::new(FakeServiceFactory::new(log.clone()));
    let broker = common::broker(&connector, &factory, short_ttl());
    broker.start_sweeper();

    for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        broker
            .get_service(&common::pg_config(host, 5432), None)
            .await
            .unwrap();
    }

    assert_eq!(broker.shutdown_all().await, 3);
    assert_eq!(broker.shutdown_all().await, 0);
    assert_eq!(factory.closes(), 3);
    assert!(broker.cache().is_empty());
}
