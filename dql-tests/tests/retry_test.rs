//! Throttling and server errors are absorbed by backoff; other failures
//! surface immediately.

use dql_core::client::DynamoError;
use dql_core::{EngineOptions, Error, MemoryDynamoClient};
use dql_core::retry::RetryPolicy;
use dql_tests::TestEngine;

fn fast_retry_engine(client: MemoryDynamoClient) -> TestEngine {
    TestEngine::build(
        client,
        EngineOptions {
            throttle_policy: RetryPolicy::new(10, 1, 2, 2.0, 0.0),
            server_policy: RetryPolicy::new(5, 1, 2, 2.0, 0.0),
            ..EngineOptions::default()
        },
    )
}

#[test]
fn test_throttle_is_retried_invisibly() {
    let t = fast_retry_engine(MemoryDynamoClient::new());
    t.query("CREATE TABLE t (id STRING HASH KEY)");
    t.query("INSERT INTO t (id) VALUES ('a')");

    t.client.inject_fault(DynamoError::throttled("simulated"));
    t.client.inject_fault(DynamoError::throttled("simulated"));
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a'"));
    assert_eq!(items.len(), 1);
}

#[test]
fn test_server_error_is_retried() {
    let t = fast_retry_engine(MemoryDynamoClient::new());
    t.query("CREATE TABLE t (id STRING HASH KEY)");
    t.query("INSERT INTO t (id) VALUES ('a')");

    t.client.inject_fault(DynamoError::server_error("simulated 500"));
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a'"));
    assert_eq!(items.len(), 1);
}

#[test]
fn test_retries_exhausted_reports_execution_error() {
    let t = TestEngine::build(
        MemoryDynamoClient::new(),
        EngineOptions {
            throttle_policy: RetryPolicy::new(2, 1, 2, 2.0, 0.0),
            server_policy: RetryPolicy::new(2, 1, 2, 2.0, 0.0),
            ..EngineOptions::default()
        },
    );
    t.query("CREATE TABLE t (id STRING HASH KEY)");
    // Prime the schema cache so the faults hit the data call, not DescribeTable
    t.query("INSERT INTO t (id) VALUES ('a')");

    // Initial attempt + 2 retries all throttled
    for _ in 0..3 {
        t.client.inject_fault(DynamoError::throttled("still busy"));
    }
    let err = t.query_err("SELECT * FROM t WHERE id = 'a'");
    assert!(matches!(err, Error::Execution(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_validation_error_not_retried() {
    let t = fast_retry_engine(MemoryDynamoClient::new());
    t.query("CREATE TABLE t (id STRING HASH KEY)");
    // Prime the schema cache so the fault hits the data call
    t.query("INSERT INTO t (id) VALUES ('a')");

    let calls_before = t.client.call_count();
    t.client
        .inject_fault(DynamoError::validation("bad request"));
    let err = t.query_err("SELECT * FROM t WHERE id = 'a'");
    assert!(matches!(err, Error::Execution(_)));
    // Exactly one (failed) call: no retry for a 4xx
    assert_eq!(t.client.call_count() - calls_before, 1);
}
