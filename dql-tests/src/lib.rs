//! Test utilities for DQL system tests.
//!
//! Wraps an `Engine` over the in-memory DynamoDB client with the standard
//! fixture table used across the test suite: `t` with HASH `id:STRING`,
//! RANGE `ts:NUMBER`, and GSI `by_user(user:STRING)`.

use std::sync::Arc;

use dql_core::memory::MemoryDynamoClient;
use dql_core::types::Value;
use dql_core::{Engine, EngineOptions, Item, StatementResult};

/// Engine + client pair for one test.
pub struct TestEngine {
    pub client: Arc<MemoryDynamoClient>,
    pub engine: Engine,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::build(MemoryDynamoClient::new(), EngineOptions::default())
    }

    /// Allow read-then-write mutation plans.
    pub fn with_bulk_mutations() -> Self {
        Self::build(
            MemoryDynamoClient::new(),
            EngineOptions {
                allow_full_table_mutation: true,
                ..EngineOptions::default()
            },
        )
    }

    /// Force small result pages to exercise pagination.
    pub fn with_page_size(page_size: usize) -> Self {
        Self::build(
            MemoryDynamoClient::new().with_page_size(page_size),
            EngineOptions::default(),
        )
    }

    pub fn build(client: MemoryDynamoClient, options: EngineOptions) -> Self {
        let client = Arc::new(client);
        let engine = Engine::with_options(client.clone(), options);
        Self { client, engine }
    }

    /// Run one statement, panicking on failure.
    pub fn query(&self, source: &str) -> StatementResult {
        self.engine
            .execute(source)
            .unwrap_or_else(|e| panic!("statement failed: {}\n  {}", source, e))
    }

    /// Run one statement, returning the engine error.
    pub fn query_err(&self, source: &str) -> dql_core::Error {
        match self.engine.execute(source) {
            Ok(_) => panic!("statement unexpectedly succeeded: {}", source),
            Err(e) => e,
        }
    }

    /// Create the standard fixture table.
    pub fn create_fixture_table(&self) {
        self.query(
            r#"CREATE TABLE t (id STRING HASH KEY, ts NUMBER RANGE KEY, user STRING)
               GLOBAL INDEX ("by_user", user)"#,
        );
    }

    /// Items from a SELECT/SCAN result.
    pub fn items(result: StatementResult) -> Vec<Item> {
        match result {
            StatementResult::Items { items, .. } => items,
            other => panic!("expected items, got {:?}", other),
        }
    }

    /// Count from a count(*) result.
    pub fn count(result: StatementResult) -> u64 {
        match result {
            StatementResult::Count { count, .. } => count,
            other => panic!("expected a count, got {:?}", other),
        }
    }

    /// Processed-row count from a mutation result.
    pub fn processed(result: StatementResult) -> usize {
        match result {
            StatementResult::Mutation { processed, .. } => processed,
            other => panic!("expected a mutation result, got {:?}", other),
        }
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert an item attribute equals the expected string.
pub fn assert_string_eq(item: &Item, attr: &str, expected: &str) {
    match item.get(attr) {
        Some(Value::S(s)) => assert_eq!(s, expected),
        other => panic!("expected string {} for '{}', got {:?}", expected, attr, other),
    }
}

/// Assert an item attribute equals the expected number text.
pub fn assert_number_eq(item: &Item, attr: &str, expected: &str) {
    match item.get(attr) {
        Some(Value::N(n)) => assert_eq!(n, expected),
        other => panic!("expected number {} for '{}', got {:?}", expected, attr, other),
    }
}
