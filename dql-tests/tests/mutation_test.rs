//! UPDATE/DELETE semantics: point writes, expansion, the bulk-mutation
//! guard, RETURNS selectors, and conditional failures.

use dql_core::client::DynamoErrorKind;
use dql_core::error::SemanticErrorKind;
use dql_core::{Error, StatementResult};
use dql_tests::{assert_number_eq, assert_string_eq, TestEngine};

fn fixture(bulk: bool) -> TestEngine {
    let t = if bulk {
        TestEngine::with_bulk_mutations()
    } else {
        TestEngine::new()
    };
    t.create_fixture_table();
    for (id, ts, user) in [("a", 1, "x"), ("a", 2, "x"), ("b", 1, "y")] {
        t.query(&format!(
            "INSERT INTO t (id, ts, user, views) VALUES ('{}', {}, '{}', 0)",
            id, ts, user
        ));
    }
    t
}

#[test]
fn test_update_set_and_remove() {
    let t = fixture(false);
    t.query("UPDATE t SET color = 'red', views = views + 5 WHERE id = 'a' AND ts = 1");

    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a' AND ts = 1"));
    assert_string_eq(&items[0], "color", "red");
    assert_number_eq(&items[0], "views", "5");

    t.query("UPDATE t REMOVE color WHERE id = 'a' AND ts = 1");
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a' AND ts = 1"));
    assert!(!items[0].contains_key("color"));
}

#[test]
fn test_update_add_assign_sugar() {
    let t = fixture(false);
    t.query("UPDATE t SET views += 3 WHERE id = 'a' AND ts = 2");
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a' AND ts = 2"));
    assert_number_eq(&items[0], "views", "3");
}

#[test]
fn test_update_returns_all_new() {
    let t = fixture(false);
    let result = t.query("UPDATE t ADD views 7 WHERE id = 'b' AND ts = 1 RETURNS ALL NEW");
    match result {
        StatementResult::Mutation { returned, .. } => {
            assert_eq!(returned.len(), 1);
            assert_number_eq(&returned[0], "views", "7");
        }
        other => panic!("expected mutation result, got {:?}", other),
    }
}

#[test]
fn test_delete_point_and_returns() {
    let t = fixture(false);
    let result = t.query("DELETE FROM t WHERE id = 'b' AND ts = 1 RETURNS ALL OLD");
    match result {
        StatementResult::Mutation { processed, returned, .. } => {
            assert_eq!(processed, 1);
            assert_string_eq(&returned[0], "user", "y");
        }
        other => panic!("expected mutation result, got {:?}", other),
    }
    let remaining = TestEngine::items(t.query("SCAN * FROM t"));
    assert_eq!(remaining.len(), 2);
}

#[test]
fn test_delete_batches_in_list() {
    let t = fixture(false);
    assert_eq!(
        TestEngine::processed(t.query("DELETE FROM t WHERE id = 'a' AND ts IN (1, 2)")),
        2
    );
    assert_eq!(TestEngine::items(t.query("SCAN * FROM t")).len(), 1);
}

#[test]
fn test_unkeyed_mutation_rejected_without_flag() {
    let t = fixture(false);
    let err = t.query_err("DELETE FROM t WHERE user = 'x'");
    match err {
        Error::Semantic(e) => assert_eq!(e.kind, SemanticErrorKind::MutationWithoutKey),
        other => panic!("expected semantic error, got {:?}", other),
    }
    // Exit code 1: a user error
    assert_eq!(t.query_err("UPDATE t SET views = 1").exit_code(), 1);
}

#[test]
fn test_full_table_update_with_flag() {
    let t = fixture(true);
    assert_eq!(
        TestEngine::processed(t.query("UPDATE t SET audited = true WHERE views = 0")),
        3
    );
    let items = TestEngine::items(t.query("SCAN * FROM t FILTER audited = true"));
    assert_eq!(items.len(), 3);
}

#[test]
fn test_point_update_with_condition_surfaces_failure() {
    let t = fixture(false);
    let err = t.query_err("UPDATE t SET views = 1 WHERE id = 'a' AND ts = 1 AND views > 100");
    match err {
        Error::Execution(e) => {
            assert_eq!(e.source.kind, DynamoErrorKind::ConditionalCheckFailed);
        }
        other => panic!("expected execution error, got {:?}", other),
    }
}

#[test]
fn test_insert_overwrites_existing_key() {
    let t = fixture(false);
    t.query("INSERT INTO t (id, ts, user) VALUES ('a', 1, 'replaced')");
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a' AND ts = 1"));
    assert_eq!(items.len(), 1);
    assert_string_eq(&items[0], "user", "replaced");
    // The overwrite dropped non-key attributes of the old item
    assert!(!items[0].contains_key("views"));
}

#[test]
fn test_multi_row_insert_batches() {
    let t = TestEngine::new();
    t.query("CREATE TABLE wide (id STRING HASH KEY)");
    let rows: Vec<String> = (0..60).map(|i| format!("('k{}')", i)).collect();
    let statement = format!("INSERT INTO wide (id) VALUES {}", rows.join(", "));
    assert_eq!(TestEngine::processed(t.query(&statement)), 60);
    assert_eq!(TestEngine::items(t.query("SCAN * FROM wide")).len(), 60);
}

#[test]
fn test_update_set_functions() {
    let t = fixture(false);
    t.query(
        "UPDATE t SET log = if_not_exists(log, []), views = views + 1 WHERE id = 'a' AND ts = 1",
    );
    t.query("UPDATE t SET log = list_append(log, [1]) WHERE id = 'a' AND ts = 1");
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a' AND ts = 1"));
    match items[0].get("log") {
        Some(dql_core::types::Value::L(list)) => assert_eq!(list.len(), 1),
        other => panic!("expected list, got {:?}", other),
    }
}

#[test]
fn test_update_delete_from_set() {
    let t = TestEngine::new();
    t.query("CREATE TABLE s (id STRING HASH KEY)");
    t.query("INSERT INTO s (id, tags) VALUES ('a', ('x', 'y', 'z'))");
    t.query("UPDATE s DELETE tags ('y') WHERE id = 'a'");
    let items = TestEngine::items(t.query("SELECT * FROM s WHERE id = 'a'"));
    assert_eq!(
        items[0].get("tags"),
        Some(&dql_core::types::Value::Ss(vec![
            "x".to_string(),
            "z".to_string()
        ]))
    );
}
