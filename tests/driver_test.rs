//! End-to-end driver tests against the scripted Bolt server.

mod support;

use std::collections::HashMap;
use std::time::Duration;

use cyq::{Driver, DriverConfig, DriverError, QueryType, Value};
use support::{ServerScript, TestServer};

#[tokio::test]
async fn ping_round_trips_handshake_and_auth() {
    let server = TestServer::start(ServerScript::returning(vec![], vec![])).await;
    let driver = Driver::new(&server.url()).unwrap();

    driver.ping().await.unwrap();
    assert_eq!(server.accepted(), 1);

    driver.close().await;
}

#[tokio::test]
async fn run_returns_columns_rows_and_summary() {
    let server = TestServer::start(ServerScript::returning(
        vec!["n"],
        vec![vec![Value::Integer(1)]],
    ))
    .await;
    let driver = Driver::new(&server.url()).unwrap();

    let result = driver
        .run("RETURN 1 AS n", HashMap::new(), HashMap::new())
        .await
        .unwrap();

    assert_eq!(result.columns, vec!["n"]);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].get_int("n").unwrap(), 1);
    assert!(result.summary.execution_time > Duration::ZERO);
    assert_eq!(result.summary.query_type, QueryType::Read);
    assert_eq!(result.summary.bookmark.as_deref(), Some("bm:test:1"));
}

#[tokio::test]
async fn run_checks_credentials() {
    let mut script = ServerScript::returning(vec![], vec![]);
    script.credentials = Some(("user", "pass"));
    let server = TestServer::start(script).await;

    // Matching credentials (the URL carries user:pass).
    let driver = Driver::new(&server.url()).unwrap();
    driver.ping().await.unwrap();

    // Wrong password must surface as an authentication error.
    let bad = Driver::new(&format!("neo4j://user:wrong@{}", server.address)).unwrap();
    let err = bad.ping().await.unwrap_err();
    assert!(matches!(err, DriverError::Authentication(_)));
}

#[tokio::test]
async fn run_failure_is_classified_and_connection_recycled() {
    let mut script = ServerScript::unwind(3);
    script.fail_run = Some((
        "Neo.ClientError.Statement.SyntaxError",
        "Invalid input 'RETRN'",
    ));
    let server = TestServer::start(script).await;
    let driver = Driver::new(&server.url()).unwrap();

    let err = driver
        .run("RETRN 1", HashMap::new(), HashMap::new())
        .await
        .unwrap_err();

    match &err {
        DriverError::Database { code, message } => {
            assert_eq!(code, "Neo.ClientError.Statement.SyntaxError");
            assert!(message.contains("RETRN"));
        }
        other => panic!("expected database error, got {:?}", other),
    }
    assert!(!err.is_retriable());

    // The errored connection was discarded; the driver dials a fresh one
    // and keeps working.
    let err = driver
        .run("RETRN 1", HashMap::new(), HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Database { .. }));
    assert!(server.accepted() >= 2);
}

#[tokio::test]
async fn authenticated_connection_is_reused() {
    let server = TestServer::start(ServerScript::unwind(2)).await;
    let driver = Driver::new(&server.url()).unwrap();

    for _ in 0..3 {
        let result = driver
            .run("UNWIND range(1,2) AS i RETURN i", HashMap::new(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.records.len(), 2);
    }

    // One socket, one handshake: every run reused the pooled connection.
    assert_eq!(server.accepted(), 1);
    assert_eq!(driver.pool_metrics().total_created, 1);
}

#[tokio::test]
async fn parameters_travel_with_the_query() {
    let server = TestServer::start(ServerScript::returning(
        vec!["name"],
        vec![vec![Value::from("Alice")]],
    ))
    .await;
    let driver = Driver::new(&server.url()).unwrap();

    let mut params = HashMap::new();
    params.insert("name".to_string(), Value::from("Alice"));

    let result = driver
        .run(
            "MATCH (p:Person {name: $name}) RETURN p.name AS name",
            params,
            HashMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.records[0].get_string("name").unwrap(), "Alice");
    assert_eq!(result.summary.parameters.len(), 1);
}

#[tokio::test]
async fn empty_result_set() {
    let server = TestServer::start(ServerScript::returning(vec!["x"], vec![])).await;
    let driver = Driver::new(&server.url()).unwrap();

    let result = driver
        .run("MATCH (n:Nothing) RETURN n AS x", HashMap::new(), HashMap::new())
        .await
        .unwrap();

    assert_eq!(result.columns, vec!["x"]);
    assert!(result.records.is_empty());
}

#[tokio::test]
async fn dirty_connection_triggers_fresh_handshake() {
    let server = TestServer::start(ServerScript::unwind(5)).await;
    let config = DriverConfig::builder().fetch_size(2).build();
    let driver = Driver::with_config(&server.url(), config).unwrap();

    // Abandon a stream mid-way: the cursor goes back dirty and the socket
    // is discarded.
    let mut cursor = driver
        .run_stream("UNWIND range(1,5) AS i RETURN i", HashMap::new(), HashMap::new())
        .await
        .unwrap();
    assert!(cursor.next().await);
    cursor.close();

    // The next query must arrive on a brand new, freshly handshaken
    // connection.
    let result = driver
        .run("UNWIND range(1,5) AS i RETURN i", HashMap::new(), HashMap::new())
        .await
        .unwrap();
    assert_eq!(result.records.len(), 5);
    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
async fn retry_wraps_driver_operations() {
    let server = TestServer::start(ServerScript::unwind(1)).await;
    let driver = Driver::new(&server.url()).unwrap();

    let policy = cyq::RetryPolicy::new();
    let result = cyq::retry(&policy, || {
        driver.run("RETURN 1 AS i", HashMap::new(), HashMap::new())
    })
    .await
    .unwrap();

    assert_eq!(result.records.len(), 1);
}
