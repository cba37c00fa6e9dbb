//! End-to-end tests against a real Redis.
//!
//! Ignored by default; run with a local server on 6379:
//!
//! ```sh
//! cargo test -p tabletap-redis -- --ignored
//! ```
//!
//! Keys are prefixed per test run so concurrent runs don't collide.

use std::time::Duration;

use futures_util::StreamExt;
use tabletap_config::Settings;
use tabletap_redis::{Realtime, SessionRecord};
use uuid::Uuid;

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    let run = Uuid::new_v4().simple().to_string();
    settings.cache.prefix = format!("tabletap-test:{run}:cache:");
    settings.session.prefix = format!("tabletap-test:{run}:session:");
    settings
}

async fn key_ttl(realtime: &Realtime, key: &str) -> i64 {
    let mut conn = realtime.connections.cache().await.unwrap();
    redis::cmd("TTL").arg(key).query_async(&mut conn).await.unwrap()
}

#[tokio::test]
#[ignore = "requires a running Redis at localhost:6379"]
async fn cafe_consumer_receives_exactly_one_matching_order_event() {
    let realtime = Realtime::from_settings(&test_settings());
    realtime.pubsub.subscribe("cafe:c1:orders").await.unwrap();
    let mut events = realtime.pubsub.cafe_events("c1");

    // Let the SUBSCRIBE settle before publishing (at-most-once delivery).
    tokio::time::sleep(Duration::from_millis(100)).await;

    let data = serde_json::json!({"orderId": "o1", "status": "PREPARING"});
    let delivered = realtime.pubsub.publish("cafe:c1:orders", data.clone()).await.unwrap();
    assert_eq!(delivered, 1);

    let envelope = tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended");
    assert_eq!(envelope.channel, "cafe:c1:orders");
    assert_eq!(envelope.data, data);
    assert!(!envelope.message_id.is_empty());

    realtime.shutdown().await;
}

#[tokio::test]
#[ignore = "requires a running Redis at localhost:6379"]
async fn subscribe_is_idempotent() {
    let realtime = Realtime::from_settings(&test_settings());
    realtime.pubsub.subscribe("cafe:c9:orders").await.unwrap();
    realtime.pubsub.subscribe("cafe:c9:orders").await.unwrap();
    assert_eq!(
        realtime.pubsub.subscribed_channels().await,
        vec!["cafe:c9:orders".to_string()]
    );

    realtime.pubsub.unsubscribe("cafe:c9:orders").await.unwrap();
    assert!(realtime.pubsub.subscribed_channels().await.is_empty());

    realtime.shutdown().await;
}

#[tokio::test]
#[ignore = "requires a running Redis at localhost:6379"]
async fn fan_out_returns_summed_subscriber_counts() {
    let realtime = Realtime::from_settings(&test_settings());
    realtime.pubsub.subscribe("order:o7:status").await.unwrap();
    realtime.pubsub.subscribe("cafe:c7:orders").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let delivered = realtime
        .pubsub
        .publish_order_status("c7", "o7", serde_json::json!({"status": "READY"}))
        .await;
    // One subscriber (this process) on each of the two channels.
    assert_eq!(delivered, 2);

    realtime.shutdown().await;
}

#[tokio::test]
#[ignore = "requires a running Redis at localhost:6379"]
async fn menu_cache_roundtrip_and_invalidation() {
    let realtime = Realtime::from_settings(&test_settings());
    let items = serde_json::json!([{"name": "espresso", "price": 3.2}]);

    realtime.cache.cache_menu_items("cafe-1", &items).await.unwrap();
    let cached: Option<serde_json::Value> = realtime.cache.get_cached_menu_items("cafe-1").await;
    assert_eq!(cached, Some(items));

    assert!(realtime.cache.invalidate_cafe_cache("cafe-1").await >= 1);
    let gone: Option<serde_json::Value> = realtime.cache.get_cached_menu_items("cafe-1").await;
    assert_eq!(gone, None);
}

#[tokio::test]
#[ignore = "requires a running Redis at localhost:6379"]
async fn zero_ttl_write_never_expires() {
    let realtime = Realtime::from_settings(&test_settings());
    realtime.cache.set("menu", "pinned", &serde_json::json!(1), Some(0)).await.unwrap();
    assert_eq!(realtime.cache.ttl("menu", "pinned").await, Some(-1));

    realtime.cache.set("menu", "short", &serde_json::json!(1), Some(5)).await.unwrap();
    let ttl = realtime.cache.ttl("menu", "short").await.unwrap();
    assert!(ttl > 0 && ttl <= 5);

    realtime.cache.clear(None).await;
}

#[tokio::test]
#[ignore = "requires a running Redis at localhost:6379"]
async fn mget_counts_hits_and_misses() {
    let realtime = Realtime::from_settings(&test_settings());
    realtime.cache.set("menu", "a", &serde_json::json!(1), Some(30)).await.unwrap();
    realtime.cache.set("menu", "b", &serde_json::json!(2), Some(30)).await.unwrap();

    let values: Vec<Option<serde_json::Value>> =
        realtime.cache.mget("menu", &["a", "b", "missing"]).await;
    assert_eq!(
        values,
        vec![Some(serde_json::json!(1)), Some(serde_json::json!(2)), None]
    );

    let stats = realtime.cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);

    realtime.cache.clear(None).await;
}

#[tokio::test]
#[ignore = "requires a running Redis at localhost:6379"]
async fn counters_and_bulk_clear() {
    let realtime = Realtime::from_settings(&test_settings());
    assert_eq!(realtime.cache.incr("inventory", "beans").await.unwrap(), 1);
    assert_eq!(realtime.cache.incr_by("inventory", "beans", 4).await.unwrap(), 5);
    assert_eq!(realtime.cache.decr("inventory", "beans").await.unwrap(), 4);

    assert!(realtime.cache.clear(Some("inventory:*")).await >= 1);
    assert_eq!(realtime.cache.ttl("inventory", "beans").await, Some(-2));
}

#[tokio::test]
#[ignore = "requires a running Redis at localhost:6379"]
async fn session_lifecycle_keeps_key_pair_coupled() {
    let settings = test_settings();
    let realtime = Realtime::from_settings(&settings);
    let record = SessionRecord::new("s1", "u1", "barista").with_cafe("cafe-1");
    let record_key = format!("{}s1", settings.session.prefix);
    let user_key = format!("{}user:u1", settings.session.prefix);

    realtime.sessions.create_session(&record, Some(60)).await.unwrap();
    assert!(realtime.sessions.is_valid_session("s1").await);

    // Both keys of the pair carry the requested TTL.
    let record_ttl = key_ttl(&realtime, &record_key).await;
    let user_ttl = key_ttl(&realtime, &user_key).await;
    assert!((59..=60).contains(&record_ttl), "record ttl {record_ttl}");
    assert!((59..=60).contains(&user_ttl), "user index ttl {user_ttl}");

    let by_user = realtime.sessions.get_session_by_user_id("u1").await.unwrap();
    assert_eq!(by_user.session_id, "s1");

    // Extending moves both TTLs by the same delta.
    assert!(realtime.sessions.extend_session("s1", 30).await.unwrap());
    let record_ttl = key_ttl(&realtime, &record_key).await;
    let user_ttl = key_ttl(&realtime, &user_key).await;
    assert!((88..=90).contains(&record_ttl), "record ttl {record_ttl}");
    assert!((88..=90).contains(&user_ttl), "user index ttl {user_ttl}");

    assert!(realtime.sessions.delete_session("s1").await);
    assert!(!realtime.sessions.is_valid_session("s1").await);
    assert!(realtime.sessions.get_session_by_user_id("u1").await.is_none());
}

#[tokio::test]
#[ignore = "requires a running Redis at localhost:6379"]
async fn sliding_read_refreshes_activity_but_not_ttl() {
    let realtime = Realtime::from_settings(&test_settings());
    let record = SessionRecord::new("s2", "u2", "manager").with_sliding_expiration(true);
    realtime.sessions.create_session(&record, Some(60)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let read = realtime.sessions.get_session("s2").await.unwrap();
    assert!(read.last_activity > record.last_activity);

    // The refresh rewrote the record in place without resetting its TTL, so
    // a later read still sees the same session on the original clock.
    let again = realtime.sessions.get_session("s2").await.unwrap();
    assert_eq!(again.session_id, "s2");
    assert!(again.last_activity >= read.last_activity);

    realtime.sessions.delete_session("s2").await;
}
