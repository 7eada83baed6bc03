//! SubscriptionScheduler Tests
//!
//! Tests for:
//! - Interval validation against the subscription lifetime
//! - Start/stop lifecycle
//! - Periodic sweeps renewing tracked subscriptions
//! - Stop interrupting a sweep between entries
//! - Reused subscriptions surviving until the first sweep

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cw_subscriptions::{
    InMemoryNotificationService, LifecycleConfig, SchedulerConfig, SubscriptionError,
    SubscriptionLifecycleManager, SubscriptionRegistry, SubscriptionScheduler,
};

const TARGET: &str = "https://host/api/notifications";

fn manager_with(service: Arc<InMemoryNotificationService>, renew_interval: Duration) -> Arc<SubscriptionLifecycleManager> {
    let config = LifecycleConfig::new(TARGET)
        .with_client_state("scheduler-test")
        .with_renew_interval(renew_interval);
    Arc::new(SubscriptionLifecycleManager::new(
        config,
        service,
        Arc::new(SubscriptionRegistry::new()),
    ))
}

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig { enabled: true }
}

#[tokio::test]
async fn test_interval_must_be_shorter_than_lifetime() {
    let service = Arc::new(InMemoryNotificationService::new());

    for renew_interval in [Duration::from_secs(60 * 60), Duration::from_secs(2 * 60 * 60), Duration::ZERO] {
        let manager = manager_with(service.clone(), renew_interval);
        let result = SubscriptionScheduler::new(scheduler_config(), manager);
        assert!(matches!(result, Err(SubscriptionError::Config(_))));
    }

    let manager = Arc::new(SubscriptionLifecycleManager::new(
        LifecycleConfig::new(TARGET),
        service,
        Arc::new(SubscriptionRegistry::new()),
    ));
    let scheduler = SubscriptionScheduler::new(SchedulerConfig::default(), manager).unwrap();
    assert_eq!(scheduler.renew_interval(), Duration::from_secs(15 * 60));
}

#[tokio::test]
async fn test_interval_follows_manager_config() {
    let manager = manager_with(Arc::new(InMemoryNotificationService::new()), Duration::from_secs(5 * 60));
    let scheduler = SubscriptionScheduler::new(scheduler_config(), manager.clone()).unwrap();

    assert_eq!(scheduler.renew_interval(), manager.config().renew_interval);
}

#[tokio::test]
async fn test_start_and_stop() {
    let manager = manager_with(Arc::new(InMemoryNotificationService::new()), Duration::from_secs(60));
    let scheduler = SubscriptionScheduler::new(scheduler_config(), manager).unwrap();

    assert!(!scheduler.is_running());
    scheduler.start();
    assert!(scheduler.is_running());

    scheduler.stop().await;
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_disabled_scheduler_never_sweeps() {
    let service = Arc::new(InMemoryNotificationService::new());
    let manager = manager_with(service.clone(), Duration::from_millis(20));
    manager.ensure_subscription("/teams/T1/channels").await.unwrap();

    let config = SchedulerConfig { enabled: false };
    let scheduler = SubscriptionScheduler::new(config, manager).unwrap();
    scheduler.start();
    assert!(!scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.update_calls(), 0);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_sweeps_renew_on_each_tick() {
    let service = Arc::new(InMemoryNotificationService::new());
    let manager = manager_with(service.clone(), Duration::from_millis(50));
    manager.ensure_subscription("/teams/T1/channels").await.unwrap();
    manager.ensure_subscription("/teams/T2/channels").await.unwrap();

    let scheduler = SubscriptionScheduler::new(scheduler_config(), manager.clone()).unwrap();
    scheduler.start();

    tokio::time::sleep(Duration::from_millis(180)).await;
    scheduler.stop().await;

    let updates = service.update_calls();
    assert!(updates >= 2, "expected at least one sweep, saw {} updates", updates);
    assert_eq!(manager.registry().len(), 2);
    assert_eq!(service.create_calls(), 2);

    // No further sweeps once stopped
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(service.update_calls(), updates);
}

#[tokio::test]
async fn test_first_tick_is_skipped() {
    let service = Arc::new(InMemoryNotificationService::new());
    let manager = manager_with(service.clone(), Duration::from_secs(30));
    manager.ensure_subscription("/teams/T1/channels").await.unwrap();

    let scheduler = SubscriptionScheduler::new(scheduler_config(), manager).unwrap();
    scheduler.start();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.update_calls(), 0);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_stop_interrupts_sweep_between_entries() {
    let service = Arc::new(InMemoryNotificationService::with_latency(Duration::from_millis(30)));
    let manager = manager_with(service.clone(), Duration::from_millis(50));

    let onboarding: Vec<_> = (0..20)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_subscription(&format!("/teams/T{}/channels", i)).await })
        })
        .collect();
    for result in futures::future::join_all(onboarding).await {
        assert!(result.unwrap().unwrap().is_some());
    }
    assert_eq!(manager.registry().len(), 20);

    let scheduler = SubscriptionScheduler::new(scheduler_config(), manager).unwrap();
    scheduler.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.stop().await;

    let updates = service.update_calls();
    assert!(updates >= 1);
    assert!(updates < 20, "sweep should have been interrupted, saw {} updates", updates);
}

#[tokio::test]
async fn test_run_once_sweeps_immediately() {
    let service = Arc::new(InMemoryNotificationService::new());
    let manager = manager_with(service.clone(), Duration::from_secs(60));
    manager.ensure_subscription("/teams/T1/channels").await.unwrap();
    service.drop_remote("S1");

    let scheduler = SubscriptionScheduler::new(scheduler_config(), manager.clone()).unwrap();
    let report = scheduler.run_once().await;

    assert_eq!(report.examined, 1);
    assert_eq!(report.recreated, 1);
    assert!(manager.registry().get("S2").is_some());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let service = Arc::new(InMemoryNotificationService::new());
    let manager = manager_with(service.clone(), Duration::from_millis(40));
    manager.ensure_subscription("/teams/T1/channels").await.unwrap();

    let scheduler = SubscriptionScheduler::new(scheduler_config(), manager).unwrap();
    scheduler.start();
    scheduler.stop().await;
    let after_first_run = service.update_calls();

    scheduler.start();
    assert!(scheduler.is_running());
    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.stop().await;

    assert!(service.update_calls() > after_first_run);
}

#[tokio::test]
async fn test_reused_subscription_survives_until_first_sweep() {
    let service = Arc::new(InMemoryNotificationService::new());
    let config = LifecycleConfig::new(TARGET)
        .with_expiration_period(Duration::from_secs(4))
        .with_renew_interval(Duration::from_secs(1));
    let manager = Arc::new(SubscriptionLifecycleManager::new(
        config,
        service.clone(),
        Arc::new(SubscriptionRegistry::new()),
    ));

    // Left behind by a previous process, about to expire
    service.insert("/teams/T1/channels", TARGET, Utc::now() + chrono::Duration::milliseconds(200));

    let reused = manager.ensure_subscription("/teams/T1/channels").await.unwrap().unwrap();
    assert_eq!(reused.id, "S1");
    assert_eq!(service.create_calls(), 0);

    let scheduler = SubscriptionScheduler::new(scheduler_config(), manager.clone()).unwrap();
    scheduler.start();
    tokio::time::sleep(Duration::from_millis(600)).await;
    scheduler.stop().await;

    let remote = service.get("S1").unwrap();
    assert!(remote.expiration_date_time > Utc::now() + chrono::Duration::seconds(2));
    assert_eq!(manager.registry().get("S1").unwrap().expires_at(), remote.expiration_date_time);
    assert_eq!(service.create_calls(), 0);
}
