use mapcache::backup::{self, Backup};
use mapcache::{CacheError, Command, ErrorKind, ExecContext, Registry};
use serde_json::json;
use std::time::Duration;

// =============================================================================
// Counter with trigger fan-out
// =============================================================================

#[test]
fn test_counter_trigger_marks_complete() {
  let registry = Registry::default();
  let cache = registry.add_cache("jobs").unwrap();
  let ctx = ExecContext::new();
  let mut guard = cache.acquire("test");
  guard
    .create([("a".to_string(), json!({"b": {"c": 2}, "z": "busy"}))])
    .unwrap();
  guard
    .create_trigger(
      "a/b/c",
      Command::if_else(
        "${{a/b/c}} == 0",
        Command::replace("a/z", "complete"),
        Command::Noop,
      ),
    )
    .unwrap();

  Command::inc("a/b/c", -1.0).execute(&mut guard, &ctx).unwrap();
  assert_eq!(guard.get("a/z").unwrap(), json!("busy"));
  Command::inc("a/b/c", -1.0).execute(&mut guard, &ctx).unwrap();

  assert_eq!(guard.get("a/b/c").unwrap(), json!(0));
  assert_eq!(guard.get("a/z").unwrap(), json!("complete"));
}

// =============================================================================
// Wildcard aggregation
// =============================================================================

#[test]
fn test_all_counters_drained() {
  let registry = Registry::default();
  let cache = registry.add_cache("fanin").unwrap();
  let ctx = ExecContext::new();
  let mut guard = cache.acquire("test");
  guard
    .create([(
      "a".to_string(),
      json!({"b": {"c": 2}, "d": {"c": 1}, "z": "busy"}),
    )])
    .unwrap();
  guard
    .create_trigger(
      "a/*/c",
      Command::if_else(
        "all(${{a/*/c}} == 0)",
        Command::replace("a/z", "complete"),
        Command::Noop,
      ),
    )
    .unwrap();

  Command::inc("a/d/c", -1.0).execute(&mut guard, &ctx).unwrap();
  Command::inc("a/b/c", -1.0).execute(&mut guard, &ctx).unwrap();
  assert_eq!(guard.get("a/z").unwrap(), json!("busy"));
  Command::inc("a/b/c", -1.0).execute(&mut guard, &ctx).unwrap();

  assert_eq!(guard.get("a/z").unwrap(), json!("complete"));
}

// =============================================================================
// Recursion guard
// =============================================================================

#[test]
fn test_self_triggering_write_hits_depth_limit() {
  let registry = Registry::default();
  let cache = registry.add_cache("loop").unwrap();
  let ctx = ExecContext::new();
  {
    let mut guard = cache.acquire("test");
    guard.create([("k".to_string(), json!(0))]).unwrap();
    guard.create_trigger("k", Command::inc("k", 1.0)).unwrap();

    let err = guard.replace(&ctx, "k", json!(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionLimit);
    assert!(matches!(err.root(), CacheError::RecursionLimit(10)));
  }

  // The token was released; the cache is still usable
  assert!(cache.acquire("after").exists("k"));
}

// =============================================================================
// TTL expiration
// =============================================================================

#[tokio::test]
async fn test_key_ttl_expires() {
  let registry = Registry::default();
  let cache = registry.fetch_cache("default").unwrap();
  {
    let mut guard = cache.acquire("test");
    guard.create([("s".to_string(), json!("v"))]).unwrap();
    guard.set_key_ttl("s", 1).unwrap();
  }

  tokio::time::sleep(Duration::from_millis(200)).await;

  let guard = cache.acquire("test");
  let err = guard.get("s").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// Backup / restore
// =============================================================================

#[tokio::test]
async fn test_backup_restore_round_trip() {
  let registry = Registry::default();
  let cache = registry.add_cache("orders").unwrap();
  {
    let mut guard = cache.acquire("test");
    guard
      .create([
        ("count".to_string(), json!(3)),
        ("label".to_string(), json!("open")),
        ("flag".to_string(), json!(true)),
        ("ratio".to_string(), json!(0.5)),
        ("temp".to_string(), json!("short-lived")),
        ("seen".to_string(), json!(0)),
      ])
      .unwrap();
    guard.create_trigger("count", Command::inc("seen", 1.0)).unwrap();
    guard.set_key_ttl("temp", 1500).unwrap();
  }
  registry.set_cache_ttl("orders", 4000).unwrap();

  let bytes = {
    let guard = cache.acquire("backup");
    backup::backup(&guard).to_bytes().unwrap()
  };
  registry.delete_cache("orders").unwrap();
  assert!(!registry.exists("orders"));

  let restored = backup::restore(&registry, Backup::from_bytes(&bytes).unwrap(), None).unwrap();
  assert_eq!(restored.name(), "orders");
  assert!(restored.ttl_millis().is_some());
  {
    let mut guard = restored.acquire("check");
    assert_eq!(guard.get("count").unwrap(), json!(3));
    assert_eq!(guard.get("label").unwrap(), json!("open"));
    assert_eq!(guard.get("flag").unwrap(), json!(true));
    assert_eq!(guard.get("ratio").unwrap(), json!(0.5));
    assert_eq!(guard.get("temp").unwrap(), json!("short-lived"));

    guard.replace(&ExecContext::new(), "count", json!(4)).unwrap();
    assert_eq!(guard.get("seen").unwrap(), json!(1));
  }

  // Expirations are stored with second precision
  tokio::time::sleep(Duration::from_millis(1800)).await;
  assert!(!restored.acquire("check").exists("temp"));
  assert!(registry.exists("orders"));

  tokio::time::sleep(Duration::from_millis(2700)).await;
  assert!(!registry.exists("orders"));
}

// =============================================================================
// FOR with captures
// =============================================================================

#[test]
fn test_for_marks_every_item_done() {
  let registry = Registry::default();
  let cache = registry.add_cache("batch").unwrap();
  let ctx = ExecContext::new();
  let mut guard = cache.acquire("test");
  guard
    .create([(
      "items".to_string(),
      json!([{"value": 1}, {"value": 2}, {"value": 3}]),
    )])
    .unwrap();

  let result = Command::for_each(
    "${{items/*/value}}",
    vec![Command::replace("items/${{1}}/value", "done")],
  )
  .execute(&mut guard, &ctx)
  .unwrap();

  assert_eq!(result, json!(["done", "done", "done"]));
  assert_eq!(
    guard.get("items").unwrap(),
    json!([{"value": "done"}, {"value": "done"}, {"value": "done"}])
  );
}

// =============================================================================
// Trigger with nested FOR and fallback
// =============================================================================

#[test]
fn test_trigger_runs_nested_loops() {
  let registry = Registry::default();
  let cache = registry.add_cache("warehouse").unwrap();
  let ctx = ExecContext::new();
  let mut guard = cache.acquire("test");
  guard
    .create([
      (
        "orders".to_string(),
        json!({
          "a": {"items": [{"qty": 1}, {"qty": 2}]},
          "b": {"items": [{"qty": 5}]}
        }),
      ),
      ("seen".to_string(), json!({"0": 0, "1": 0})),
      ("restock".to_string(), json!(0)),
      ("note".to_string(), json!("")),
    ])
    .unwrap();

  // The outer capture picks the order; the inner loop rebinds ${{1}} to
  // the item index
  guard
    .create_trigger(
      "restock",
      Command::group(vec![
        Command::for_each(
          "${{orders/*/items}}",
          vec![Command::for_each(
            "${{orders/${{1}}/items/*/qty}}",
            vec![Command::inc("seen/${{1}}", 1.0)],
          )],
        ),
        Command::replace("note", "${{orders/c/status || 'none'}}"),
      ]),
    )
    .unwrap();

  guard.replace(&ctx, "restock", json!(1)).unwrap();

  assert_eq!(guard.get("seen").unwrap(), json!({"0": 2, "1": 1}));
  assert_eq!(guard.get("note").unwrap(), json!("none"));
}
