//! Every literal form survives an insert-then-scan round trip.

use dql_core::types::Value;
use dql_tests::TestEngine;

fn engine_with_simple_table() -> TestEngine {
    let t = TestEngine::new();
    t.query("CREATE TABLE foobar (id STRING HASH KEY)");
    t
}

fn scan_single(t: &TestEngine) -> dql_core::Item {
    let items = TestEngine::items(t.query("SCAN * FROM foobar"));
    assert_eq!(items.len(), 1);
    items.into_iter().next().unwrap()
}

#[test]
fn test_string_literal() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id) VALUES ('a')");
    let item = scan_single(&t);
    assert_eq!(item.get("id"), Some(&Value::string("a")));
}

#[test]
fn test_int_literal() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, bar) VALUES ('a', 5)");
    assert_eq!(scan_single(&t).get("bar"), Some(&Value::N("5".into())));
}

#[test]
fn test_float_literal_preserves_text() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, bar) VALUES ('a', 1.2345)");
    assert_eq!(scan_single(&t).get("bar"), Some(&Value::N("1.2345".into())));
}

#[test]
fn test_negative_number() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, bar) VALUES ('a', -7)");
    assert_eq!(scan_single(&t).get("bar"), Some(&Value::N("-7".into())));
}

#[test]
fn test_bool_literal() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, bar) VALUES ('a', false)");
    assert_eq!(scan_single(&t).get("bar"), Some(&Value::Bool(false)));
}

#[test]
fn test_binary_literal() {
    let t = engine_with_simple_table();
    // b"YWJj" is base64 for "abc"
    t.query(r#"INSERT INTO foobar (id, bar) VALUES ('a', b"YWJj")"#);
    match scan_single(&t).get("bar") {
        Some(Value::B(bytes)) => assert_eq!(bytes.as_ref(), b"abc"),
        other => panic!("expected binary, got {:?}", other),
    }
}

#[test]
fn test_null_literal() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, bar) VALUES ('a', null)");
    assert_eq!(scan_single(&t).get("bar"), Some(&Value::Null));
}

#[test]
fn test_list_literals() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, bar) VALUES ('a', [1, null, 'a'])");
    assert_eq!(
        scan_single(&t).get("bar"),
        Some(&Value::L(vec![
            Value::N("1".into()),
            Value::Null,
            Value::string("a"),
        ]))
    );
}

#[test]
fn test_empty_and_nested_lists() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, bar, baz) VALUES ('a', [], [1, [2, 3]])");
    let item = scan_single(&t);
    assert_eq!(item.get("bar"), Some(&Value::L(vec![])));
    assert_eq!(
        item.get("baz"),
        Some(&Value::L(vec![
            Value::N("1".into()),
            Value::L(vec![Value::N("2".into()), Value::N("3".into())]),
        ]))
    );
}

#[test]
fn test_map_literals() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, bar) VALUES ('a', {'a': {'b': null}})");
    let item = scan_single(&t);
    let outer = item.get("bar").unwrap().as_map().unwrap();
    let inner = outer.get("a").unwrap().as_map().unwrap();
    assert_eq!(inner.get("b"), Some(&Value::Null));
}

#[test]
fn test_empty_map() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, bar) VALUES ('a', {})");
    assert!(scan_single(&t)
        .get("bar")
        .unwrap()
        .as_map()
        .unwrap()
        .is_empty());
}

#[test]
fn test_set_literals() {
    let t = engine_with_simple_table();
    t.query("INSERT INTO foobar (id, s, n) VALUES ('a', ('x', 'y'), (1, 2, 3))");
    let item = scan_single(&t);
    assert_eq!(
        item.get("s"),
        Some(&Value::Ss(vec!["x".to_string(), "y".to_string()]))
    );
    assert_eq!(
        item.get("n"),
        Some(&Value::Ns(vec![
            "1".to_string(),
            "2".to_string(),
            "3".to_string()
        ]))
    );
}
