//! Pagination, limits, and parallel scan behavior against small pages.

use dql_tests::TestEngine;

fn fixture(page_size: usize, rows: i64) -> TestEngine {
    let t = TestEngine::with_page_size(page_size);
    t.query("CREATE TABLE t (id STRING HASH KEY, ts NUMBER RANGE KEY)");
    for ts in 0..rows {
        t.query(&format!("INSERT INTO t (id, ts) VALUES ('a', {})", ts));
    }
    t
}

#[test]
fn test_query_drains_all_pages() {
    let t = fixture(3, 10);
    let calls_before = t.client.call_count();
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a'"));
    assert_eq!(items.len(), 10);
    // 3-item pages: four pages needed for 10 items
    assert!(t.client.call_count() - calls_before >= 4);
}

#[test]
fn test_limit_stops_paging_early() {
    let t = fixture(3, 30);
    let calls_before = t.client.call_count();
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a' LIMIT 3"));
    assert_eq!(items.len(), 3);
    // One page satisfies the limit; no follow-up call for the advertised
    // continuation
    assert_eq!(t.client.call_count() - calls_before, 1);
}

#[test]
fn test_limit_zero_is_free() {
    let t = fixture(3, 5);
    let calls_before = t.client.call_count();
    let items = TestEngine::items(t.query("SELECT * FROM t WHERE id = 'a' LIMIT 0"));
    assert!(items.is_empty());
    assert_eq!(t.client.call_count(), calls_before);
}

#[test]
fn test_count_sums_across_pages() {
    let t = fixture(4, 10);
    assert_eq!(
        TestEngine::count(t.query("SELECT count(*) FROM t WHERE id = 'a'")),
        10
    );
}

#[test]
fn test_scan_limit_applies_after_filter() {
    let t = fixture(3, 20);
    // Only even ts survive the filter; LIMIT counts post-filter items
    let items = TestEngine::items(t.query(
        "SCAN * FROM t FILTER ts IN (0, 2, 4, 6, 8, 10) LIMIT 4",
    ));
    assert_eq!(items.len(), 4);
}

#[test]
fn test_parallel_scan_returns_everything() {
    let t = fixture(5, 23);
    let items = TestEngine::items(t.query("SCAN * FROM t THREADS 4"));
    assert_eq!(items.len(), 23);
}

#[test]
fn test_parallel_scan_respects_limit() {
    let t = fixture(5, 40);
    let items = TestEngine::items(t.query("SCAN * FROM t THREADS 3 LIMIT 7"));
    assert_eq!(items.len(), 7);
}

#[test]
fn test_scan_shorthand_form() {
    let t = fixture(10, 4);
    let items = TestEngine::items(t.query("SCAN t"));
    assert_eq!(items.len(), 4);
}
