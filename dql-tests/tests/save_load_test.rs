//! SAVE / LOAD round trips through JSON-lines files.

use dql_tests::TestEngine;

#[test]
fn test_save_then_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json");
    let path = path.to_str().unwrap();

    let t = TestEngine::new();
    t.query("CREATE TABLE foobar (id STRING HASH KEY)");
    t.query("CREATE TABLE destination (id STRING HASH KEY)");
    t.query("INSERT INTO foobar (id, foo) VALUES ('a', 1), ('b', 2)");

    t.query(&format!("SCAN * FROM foobar SAVE '{}'", path));
    assert_eq!(
        TestEngine::processed(t.query(&format!("LOAD '{}' INTO destination", path))),
        2
    );

    let mut source = TestEngine::items(t.query("SCAN * FROM foobar"));
    let mut loaded = TestEngine::items(t.query("SCAN * FROM destination"));
    let key = |item: &dql_core::Item| item.get("id").unwrap().as_string().unwrap().to_string();
    source.sort_by_key(&key);
    loaded.sort_by_key(&key);
    assert_eq!(source, loaded);
}

#[test]
fn test_save_select_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subset.json");
    let path = path.to_str().unwrap();

    let t = TestEngine::new();
    t.query("CREATE TABLE foobar (id STRING HASH KEY)");
    t.query("INSERT INTO foobar (id, n) VALUES ('a', 1), ('b', 2), ('c', 3)");
    t.query(&format!("SELECT * FROM foobar WHERE id = 'b' SAVE '{}'", path));

    let contents = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(r#""id":{"S":"b"}"#));
}

#[test]
fn test_load_missing_file_is_io_error() {
    let t = TestEngine::new();
    t.query("CREATE TABLE foobar (id STRING HASH KEY)");
    let err = t.query_err("LOAD '/nonexistent/items.json' INTO foobar");
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_load_preserves_value_types() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("typed.json");
    let path = path.to_str().unwrap();

    let t = TestEngine::new();
    t.query("CREATE TABLE foobar (id STRING HASH KEY)");
    t.query("CREATE TABLE destination (id STRING HASH KEY)");
    t.query(
        r#"INSERT INTO foobar (id, n, flag, data, tags)
           VALUES ('a', 1.5, true, b"YWJj", ('x', 'y'))"#,
    );
    t.query(&format!("SCAN * FROM foobar SAVE '{}'", path));
    t.query(&format!("LOAD '{}' INTO destination", path));

    let items = TestEngine::items(t.query("SELECT * FROM destination WHERE id = 'a'"));
    use dql_core::types::Value;
    assert_eq!(items[0].get("n"), Some(&Value::N("1.5".into())));
    assert_eq!(items[0].get("flag"), Some(&Value::Bool(true)));
    match items[0].get("data") {
        Some(Value::B(bytes)) => assert_eq!(bytes.as_ref(), b"abc"),
        other => panic!("expected binary, got {:?}", other),
    }
    assert_eq!(
        items[0].get("tags"),
        Some(&Value::Ss(vec!["x".to_string(), "y".to_string()]))
    );
}
