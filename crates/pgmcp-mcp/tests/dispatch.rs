//! Reads, calls and subscriptions through the dispatcher.

mod common;

use common::{FakeExecutor, Harness, harness, shop_catalog};
use pgmcp_mcp::{BoundValue, ExecError, ListenerState, McpError, ReadRequest};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

const CONFIG: &str = r#"
pagination:
  default_limit: 25
  max_limit: 100
expose:
  resources:
    - pattern: "sales.*"
    - table: "public.users"
      columns: ["id", "email"]
  tools:
    - function: "api.refresh_stats"
    - function: "api.purge_cache"
      dangerous: true
  notifications:
    - channel: "order_events"
      format: json
"#;

async fn bound(executor: std::sync::Arc<FakeExecutor>) -> Harness {
    let h = harness(CONFIG, shop_catalog(), executor);
    assert!(h.bridge.bind().await.is_clean());
    h
}

#[tokio::test]
async fn test_limit_is_clamped_to_ceiling() {
    let h = bound(FakeExecutor::with_rows(500)).await;
    let request = ReadRequest {
        limit: Some(10_000),
        ..Default::default()
    };

    let page = h.bridge.dispatcher().read("sales_orders", &request).await.unwrap();
    assert_eq!(page.pagination.limit, 100);
    assert_eq!(page.data.len(), 100);
    assert_eq!(page.pagination.total, 500);
    assert!(page.pagination.has_more);
}

#[tokio::test]
async fn test_default_limit_and_last_page() {
    let h = bound(FakeExecutor::with_rows(30)).await;
    let dispatcher = h.bridge.dispatcher();

    let first = dispatcher.read("sales_orders", &ReadRequest::default()).await.unwrap();
    assert_eq!(first.pagination.limit, 25);
    assert_eq!(first.data.len(), 25);
    assert!(first.pagination.has_more);

    let request = ReadRequest {
        offset: Some(25),
        ..Default::default()
    };
    let last = dispatcher.read("sales_orders", &request).await.unwrap();
    assert_eq!(last.data.len(), 5);
    assert!(!last.pagination.has_more);
}

#[tokio::test]
async fn test_read_response_shape() {
    let h = bound(FakeExecutor::with_rows(1)).await;
    let page = h
        .bridge
        .dispatcher()
        .read("public_users", &ReadRequest::default())
        .await
        .unwrap();

    let body = serde_json::to_value(&page).unwrap();
    assert_eq!(body["schema"]["id"]["type"]["type"], "integer");
    assert_eq!(body["schema"]["email"]["nullable"], false);
    assert!(body["schema"].get("password_hash").is_none());
    assert_eq!(body["pagination"]["hasMore"], false);
    assert_eq!(body["data"], json!([{"id": 0}]));

    let executed = h.executor.executed.lock();
    assert!(executed[0].sql.contains("SELECT \"id\", \"email\" FROM \"public\".\"users\""));
}

#[tokio::test]
async fn test_hidden_columns_cannot_be_filtered_or_sorted() {
    let h = bound(FakeExecutor::with_rows(1)).await;
    let dispatcher = h.bridge.dispatcher();

    let request = ReadRequest {
        filter: Some(r#"{"password_hash": {"like": "a%"}}"#.into()),
        ..Default::default()
    };
    assert_eq!(
        dispatcher.read("public_users", &request).await,
        Err(McpError::InvalidColumn {
            endpoint: "public_users".into(),
            column: "password_hash".into()
        })
    );

    let request = ReadRequest {
        order_by: Some("password_hash desc".into()),
        ..Default::default()
    };
    assert!(matches!(
        dispatcher.read("public_users", &request).await,
        Err(McpError::InvalidColumn { .. })
    ));
    assert_eq!(h.executor.executed_count(), 0);
}

#[tokio::test]
async fn test_unknown_endpoint() {
    let h = bound(FakeExecutor::with_rows(0)).await;
    let dispatcher = h.bridge.dispatcher();
    assert_eq!(
        dispatcher.read("public_tmp_cache", &ReadRequest::default()).await,
        Err(McpError::NotFound("public_tmp_cache".into()))
    );
    assert!(matches!(
        dispatcher.call("sales_orders", json!({})).await,
        Err(McpError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_missing_argument_fails_before_query() {
    let h = bound(FakeExecutor::with_rows(0)).await;
    let result = h
        .bridge
        .dispatcher()
        .call("api_refresh_stats", json!({"since": "2024-01-01"}))
        .await;

    assert_eq!(
        result,
        Err(McpError::MissingArgument {
            endpoint: "api_refresh_stats".into(),
            parameter: "customer_id".into()
        })
    );
    assert_eq!(h.executor.executed_count(), 0);
}

#[tokio::test]
async fn test_call_binds_arguments() {
    let h = bound(FakeExecutor::with_rows(0)).await;
    *h.executor.call_result.lock() = json!(12);

    let result = h
        .bridge
        .dispatcher()
        .call("api_refresh_stats", json!({"customer_id": 9}))
        .await
        .unwrap();
    assert_eq!(result, json!(12));

    let executed = h.executor.executed.lock();
    assert_eq!(
        executed[0].sql,
        "SELECT to_jsonb(\"api\".\"refresh_stats\"($1::integer)) AS result"
    );
    assert_eq!(executed[0].params, vec![BoundValue::Int(9)]);
}

#[tokio::test]
async fn test_dangerous_tool_requires_confirmation() {
    let h = bound(FakeExecutor::with_rows(0)).await;
    let dispatcher = h.bridge.dispatcher();

    for args in [json!({}), json!({"_confirm": false}), json!({"_confirm": "yes"})] {
        assert_eq!(
            dispatcher.call("api_purge_cache", args).await,
            Err(McpError::ConfirmationRequired {
                endpoint: "api_purge_cache".into()
            })
        );
    }
    assert_eq!(h.executor.executed_count(), 0);

    let result = dispatcher
        .call("api_purge_cache", json!({"_confirm": true}))
        .await
        .unwrap();
    assert_eq!(result, serde_json::Value::Null);
    assert_eq!(
        h.executor.executed.lock()[0].sql,
        "SELECT \"api\".\"purge_cache\"()"
    );
}

#[tokio::test]
async fn test_native_failures_are_structured() {
    let h = bound(FakeExecutor::with_rows(0)).await;
    let dispatcher = h.bridge.dispatcher();

    *h.executor.fail_with.lock() = Some(ExecError::Query {
        sqlstate: Some("57014".into()),
    });
    let err = dispatcher
        .read("sales_orders", &ReadRequest::default())
        .await
        .unwrap_err();
    let body = err.to_body();
    assert_eq!(body.code, "query_failed");
    assert_eq!(body.sqlstate.as_deref(), Some("57014"));
    assert!(!body.message.contains("SELECT"));

    *h.executor.fail_with.lock() = Some(ExecError::PoolExhausted);
    let err = dispatcher
        .call("api_refresh_stats", json!({"customer_id": 1}))
        .await
        .unwrap_err();
    assert_eq!(err, McpError::PoolExhausted);
    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_read_releases_connection() {
    let executor = FakeExecutor::with_rows(10);
    *executor.delay.lock() = Some(Duration::from_secs(60));
    let h = bound(executor).await;

    let dispatcher = h.bridge.dispatcher();
    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        dispatcher.read("sales_orders", &ReadRequest::default()),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(h.executor.in_use.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rebind_swaps_set_for_new_requests() {
    let h = bound(FakeExecutor::with_rows(1)).await;
    let dispatcher = h.bridge.dispatcher();
    let before = dispatcher.bindings();

    h.source.add(common::table("sales", "refunds", &[("id", "bigint", false)]));
    h.bridge.rebind(Some("sales")).await;

    assert!(before.resource("sales_refunds").is_none());
    assert!(dispatcher.bindings().resource("sales_refunds").is_some());
    assert!(dispatcher.read("sales_refunds", &ReadRequest::default()).await.is_ok());
}

#[tokio::test]
async fn test_subscribe_and_shutdown() {
    let h = bound(FakeExecutor::with_rows(0)).await;
    let dispatcher = h.bridge.dispatcher();

    assert!(matches!(
        dispatcher.subscribe("unknown").await,
        Err(McpError::NotFound(_))
    ));

    let first = dispatcher.subscribe("order_events").await.unwrap();
    let second = dispatcher.subscribe("order_events").await.unwrap();
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);

    h.connector.notify("order_events", r#"{"order": 5}"#);
    let a = first.recv().await.unwrap();
    let b = second.recv().await.unwrap();
    assert_eq!(a.decoded_payload, Some(json!({"order": 5})));
    assert_eq!(a.payload, b.payload);

    h.bridge.shutdown().await;
    assert_eq!(h.bridge.hub().state("order_events").await, ListenerState::Closed);
    assert!(first.recv().await.is_none());
}
