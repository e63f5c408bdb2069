//! Table lifecycle: CREATE / ALTER / DROP, schema dump, and cache
//! invalidation after DDL.

use dql_core::StatementResult;
use dql_tests::TestEngine;

#[test]
fn test_create_describe_drop() {
    let t = TestEngine::new();
    let result = t.query(
        "CREATE TABLE users (id STRING HASH KEY, ts NUMBER RANGE KEY, THROUGHPUT (5, 5))",
    );
    match result {
        StatementResult::Table(description) => {
            assert_eq!(description.table_name, "users");
            assert_eq!(description.key_schema.len(), 2);
        }
        other => panic!("expected table description, got {:?}", other),
    }

    t.query("DROP TABLE users");
    let err = t.query_err("SELECT * FROM users WHERE id = 'a'");
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_create_if_not_exists_skips() {
    let t = TestEngine::new();
    t.query("CREATE TABLE users (id STRING HASH KEY)");
    match t.query("CREATE TABLE IF NOT EXISTS users (id STRING HASH KEY)") {
        StatementResult::Message(message) => assert!(message.contains("already exists")),
        other => panic!("expected a message, got {:?}", other),
    }
}

#[test]
fn test_drop_if_exists_skips() {
    let t = TestEngine::new();
    match t.query("DROP TABLE IF EXISTS missing") {
        StatementResult::Message(message) => assert!(message.contains("does not exist")),
        other => panic!("expected a message, got {:?}", other),
    }
}

#[test]
fn test_alter_throughput_and_cache_invalidation() {
    let t = TestEngine::new();
    t.query("CREATE TABLE users (id STRING HASH KEY, THROUGHPUT (1, 1))");
    // Prime the cache
    t.query("INSERT INTO users (id) VALUES ('a')");

    t.query("ALTER TABLE users SET THROUGHPUT (9, 9)");

    // The post-DDL dump reflects the new throughput immediately: the DDL
    // invalidated the cached schema
    match t.query("DUMP SCHEMA users") {
        StatementResult::SchemaDump(dump) => assert!(dump.contains("THROUGHPUT (9, 9)")),
        other => panic!("expected schema dump, got {:?}", other),
    }
}

#[test]
fn test_alter_create_and_drop_index() {
    let t = TestEngine::new();
    t.query("CREATE TABLE users (id STRING HASH KEY, email STRING)");
    t.query(r#"ALTER TABLE users CREATE GLOBAL INDEX ("by_email", email STRING)"#);

    // The new index is usable for planning
    t.query("INSERT INTO users (id, email) VALUES ('a', 'a@example.com')");
    let items = TestEngine::items(t.query("SELECT * FROM users WHERE email = 'a@example.com'"));
    assert_eq!(items.len(), 1);

    t.query("ALTER TABLE users DROP INDEX by_email");
    let err = t.query_err("SELECT * FROM users USING by_email WHERE email = 'a@example.com'");
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_dump_schema_round_trips_through_parser() {
    let t = TestEngine::new();
    t.query(
        r#"CREATE TABLE t (id STRING HASH KEY, ts NUMBER RANGE KEY, user STRING,
           THROUGHPUT (5, 6)) GLOBAL INDEX ("by_user", user)"#,
    );

    let dump = match t.query("DUMP SCHEMA t") {
        StatementResult::SchemaDump(dump) => dump,
        other => panic!("expected schema dump, got {:?}", other),
    };

    // Feed the dump back through a fresh engine
    let t2 = TestEngine::new();
    for result in t2.engine.execute_script(&dump).unwrap() {
        match result {
            StatementResult::Table(_) => {}
            other => panic!("expected table creation, got {:?}", other),
        }
    }
    match t2.query("DUMP SCHEMA t") {
        StatementResult::SchemaDump(second) => assert_eq!(second, dump),
        other => panic!("expected schema dump, got {:?}", other),
    }
}

#[test]
fn test_script_execution_in_order() {
    let t = TestEngine::new();
    let results = t
        .engine
        .execute_script(
            "CREATE TABLE s (id STRING HASH KEY);\n\
             INSERT INTO s (id) VALUES ('a');\n\
             SELECT * FROM s WHERE id = 'a';",
        )
        .unwrap();
    assert_eq!(results.len(), 3);
    match &results[2] {
        StatementResult::Items { items, .. } => assert_eq!(items.len(), 1),
        other => panic!("expected items, got {:?}", other),
    }
}

#[test]
fn test_analyze_reports_capacity() {
    let t = TestEngine::new();
    t.query("CREATE TABLE s (id STRING HASH KEY)");
    t.query("INSERT INTO s (id) VALUES ('a')");

    match t.query("ANALYZE SELECT * FROM s WHERE id = 'a'") {
        StatementResult::Items {
            consumed_capacity, ..
        } => assert!(consumed_capacity.is_some()),
        other => panic!("expected items, got {:?}", other),
    }

    // Without ANALYZE no capacity is requested or reported
    match t.query("SELECT * FROM s WHERE id = 'a'") {
        StatementResult::Items {
            consumed_capacity, ..
        } => assert!(consumed_capacity.is_none()),
        other => panic!("expected items, got {:?}", other),
    }
}

#[test]
fn test_consistent_read_paths() {
    let t = TestEngine::new();
    t.create_fixture_table();
    t.query("INSERT INTO t (id, ts, user) VALUES ('a', 1, 'x')");

    // Consistent read on the base table is fine
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a' AND ts = 1 CONSISTENT READ"));
    assert_eq!(items.len(), 1);

    // On a GSI it is rejected before execution
    let err = t.query_err("SELECT * FROM t WHERE user = 'x' CONSISTENT READ");
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_explained_dump_plan_executes() {
    // EXPLAIN DUMP SCHEMA renders DescribeTable descriptors; the rendered
    // plan parses back and drives the executor directly
    let t = TestEngine::new();
    t.query("CREATE TABLE users (id STRING HASH KEY)");

    let rendered = match t.query("EXPLAIN DUMP SCHEMA users") {
        StatementResult::Explained(plan) => plan,
        other => panic!("expected a plan, got {:?}", other),
    };
    assert!(rendered.contains("\"DescribeTable\""));

    let plan = dql_core::ExecutionPlan::parse(&rendered).unwrap();
    let executor = dql_core::Executor::new(&*t.client);
    let output = executor
        .execute(&plan, &mut dql_core::executor::NullSink)
        .unwrap();
    assert_eq!(output.table_descriptions.len(), 1);
    assert_eq!(output.table_descriptions[0].table_name, "users");
}

#[test]
fn test_help() {
    let t = TestEngine::new();
    match t.query("HELP") {
        StatementResult::Message(message) => assert!(message.contains("SELECT")),
        other => panic!("expected a message, got {:?}", other),
    }
    match t.query("HELP SELECT") {
        StatementResult::Message(message) => assert!(message.contains("FROM")),
        other => panic!("expected a message, got {:?}", other),
    }
}
