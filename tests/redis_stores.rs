//! Integration tests for the Redis counter and rule stores.
//!
//! These tests require a Redis instance running at `redis://127.0.0.1/`.
//! Tests are ignored by default - run with `cargo test --test redis_stores -- --ignored`

use chrono::{Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use rulekeeper::config::StorageConfig;
use rulekeeper::ratelimit::{CounterStore, RedisCounterStore};
use rulekeeper::rules::{
    CustomerId, Expiry, OperationKind, RedisRuleStore, RuleData, RuleStore, StoreError,
};
use rulekeeper::storage::redis_connection;

const REDIS_URL: &str = "redis://127.0.0.1/";

/// Check if Redis is available before running tests
async fn redis_available() -> bool {
    redis_connection(REDIS_URL, &StorageConfig::default())
        .await
        .is_ok()
}

/// Storage settings with a key prefix unique to one test run
fn test_config(test_name: &str) -> StorageConfig {
    StorageConfig {
        redis_url: Some(REDIS_URL.to_string()),
        key_prefix: format!("test:{}:{}:", test_name, uuid::Uuid::new_v4()),
        ..StorageConfig::default()
    }
}

async fn connect(config: &StorageConfig) -> ConnectionManager {
    redis_connection(REDIS_URL, config)
        .await
        .expect("Failed to connect to Redis")
}

async fn clear(conn: &mut ConnectionManager, prefix: &str) {
    let keys: Vec<String> = conn.keys(format!("{}*", prefix)).await.unwrap();
    if !keys.is_empty() {
        let _: () = conn.del(keys).await.unwrap();
    }
}

fn customer(id: &str) -> CustomerId {
    CustomerId::parse(id).unwrap()
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_first_increment_opens_window() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {}", REDIS_URL);
        return;
    }

    let config = test_config("open_window");
    let mut conn = connect(&config).await;
    let store = RedisCounterStore::new(conn.clone());
    let key = format!("{}rate_limit:acme", config.key_prefix);

    assert_eq!(store.increment_in_window(&key, Duration::from_secs(60)).await.unwrap(), 1);
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!((55..=60).contains(&ttl), "ttl was {ttl}");

    clear(&mut conn, &config.key_prefix).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_later_increments_keep_window() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let config = test_config("keep_window");
    let mut conn = connect(&config).await;
    let store = RedisCounterStore::new(conn.clone());
    let key = format!("{}rate_limit:acme", config.key_prefix);

    store.increment_in_window(&key, Duration::from_secs(60)).await.unwrap();
    // Stand in for time passing inside the window.
    let _: () = conn.expire(&key, 20).await.unwrap();

    for expected in 2..=4 {
        let count = store.increment_in_window(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(count, expected);
    }
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!((1..=20).contains(&ttl), "window was extended, ttl {ttl}");

    clear(&mut conn, &config.key_prefix).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_counter_without_ttl_gets_one() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let config = test_config("heal_ttl");
    let mut conn = connect(&config).await;
    let store = RedisCounterStore::new(conn.clone());
    let key = format!("{}rate_limit:acme", config.key_prefix);

    // A two-step writer that lost its EXPIRE leaves the key like this.
    let _: u64 = conn.incr(&key, 1u64).await.unwrap();
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert_eq!(ttl, -1);

    assert_eq!(store.increment_in_window(&key, Duration::from_secs(60)).await.unwrap(), 2);
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!((55..=60).contains(&ttl), "ttl was {ttl}");

    clear(&mut conn, &config.key_prefix).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_rules_survive_a_new_connection() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let config = test_config("durable_rules");
    let mut conn = connect(&config).await;
    let tenant = customer("acme");
    let expiry = Utc::now() + ChronoDuration::hours(1);

    let rule_id = {
        let store = RedisRuleStore::new(conn.clone(), &config);
        let rule = RuleData::new("r1", "office", "10.0.0.1").with_expiry(Expiry::At(expiry));
        store.insert(&tenant, &rule).await.unwrap()
    };

    // A fresh connection and store, as after a restart.
    let store = RedisRuleStore::new(connect(&config).await, &config);
    let record = store.get(&tenant, "r1").await.unwrap();
    assert_eq!(record.rule_id, rule_id);
    assert_eq!(record.ip, "10.0.0.1");
    assert_eq!(
        record.expired_date.map(|ts| ts.timestamp_micros()),
        Some(expiry.timestamp_micros())
    );

    assert!(matches!(
        store.get(&customer("other"), "r1").await,
        Err(StoreError::NotFound { .. })
    ));

    clear(&mut conn, &config.key_prefix).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_rule_crud_and_audit() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let config = test_config("rule_crud");
    let mut conn = connect(&config).await;
    let store = RedisRuleStore::new(conn.clone(), &config);
    let tenant = customer("acme");
    let expiry = Utc::now() + ChronoDuration::hours(1);

    let rule = RuleData::new("r1", "before", "10.0.0.1").with_expiry(Expiry::At(expiry));
    store.insert(&tenant, &rule).await.unwrap();
    assert!(matches!(
        store.insert(&tenant, &rule).await,
        Err(StoreError::Conflict { .. })
    ));

    // Absent expiry keeps the stored one.
    store
        .update(&tenant, &RuleData::new("r1", "after", "10.0.0.2"))
        .await
        .unwrap();
    let record = store.get(&tenant, "r1").await.unwrap();
    assert_eq!(record.description, "after");
    assert!(record.expired_date.is_some());

    // Null expiry clears it.
    store
        .update(&tenant, &RuleData::new("r1", "after", "10.0.0.2").with_expiry(Expiry::Clear))
        .await
        .unwrap();
    assert_eq!(store.get(&tenant, "r1").await.unwrap().expired_date, None);

    assert!(matches!(
        store.update(&tenant, &RuleData::new("nope", "", "1.1.1.1")).await,
        Err(StoreError::NotFound { .. })
    ));

    store.delete(&tenant, "r1").await.unwrap();
    assert!(matches!(
        store.delete(&tenant, "r1").await,
        Err(StoreError::NotFound { .. })
    ));

    let actions: Vec<_> = store
        .audit_entries(10)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(
        actions,
        [OperationKind::Delete, OperationKind::Update, OperationKind::Update, OperationKind::Create]
    );

    clear(&mut conn, &config.key_prefix).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_delete_expired_across_tenants() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let config = test_config("delete_expired");
    let mut conn = connect(&config).await;
    let store = RedisRuleStore::new(conn.clone(), &config);
    let now = Utc::now();
    let past = Expiry::At(now - ChronoDuration::seconds(1));

    store
        .insert(&customer("a"), &RuleData::new("old", "", "1.1.1.1").with_expiry(past))
        .await
        .unwrap();
    store
        .insert(&customer("b:eu"), &RuleData::new("old", "", "1.1.1.1").with_expiry(past))
        .await
        .unwrap();
    let boundary = RuleData::new("boundary", "", "1.1.1.1").with_expiry(Expiry::At(now));
    store.insert(&customer("a"), &boundary).await.unwrap();
    store
        .insert(&customer("a"), &RuleData::new("forever", "", "1.1.1.1"))
        .await
        .unwrap();
    // Cleared before the sweep, so it must survive it.
    store
        .insert(&customer("a"), &RuleData::new("renewed", "", "1.1.1.1").with_expiry(past))
        .await
        .unwrap();
    let renewed = RuleData::new("renewed", "", "1.1.1.1").with_expiry(Expiry::Clear);
    store.update(&customer("a"), &renewed).await.unwrap();

    assert_eq!(store.delete_expired(now).await.unwrap(), 2);
    assert_eq!(store.delete_expired(now).await.unwrap(), 0);

    assert!(store.get(&customer("a"), "old").await.is_err());
    assert!(store.get(&customer("b:eu"), "old").await.is_err());
    assert!(store.get(&customer("a"), "boundary").await.is_ok());
    assert!(store.get(&customer("a"), "forever").await.is_ok());
    assert!(store.get(&customer("a"), "renewed").await.is_ok());

    clear(&mut conn, &config.key_prefix).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_audit_trail_is_trimmed() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let config = StorageConfig {
        audit_capacity: 2,
        ..test_config("audit_trim")
    };
    let mut conn = connect(&config).await;
    let store = RedisRuleStore::new(conn.clone(), &config);

    for name in ["r1", "r2", "r3"] {
        store
            .insert(&customer("acme"), &RuleData::new(name, "", "1.1.1.1"))
            .await
            .unwrap();
    }

    let names: Vec<_> = store
        .audit_entries(10)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.rule_name)
        .collect();
    assert_eq!(names, ["r3", "r2"]);

    clear(&mut conn, &config.key_prefix).await;
}
