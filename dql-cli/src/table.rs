//! Table formatting for query results using comfy-table.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dql_core::types::Value;
use dql_core::Item;

/// Format a list of items as a table.
///
/// All attribute names across the items become columns (sorted), each item a
/// row; attributes an item lacks render as `-`.
pub fn format_items_table(items: &[Item]) -> String {
    if items.is_empty() {
        return "No items found".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let mut columns: Vec<String> = items
        .iter()
        .flat_map(|item| item.keys().cloned())
        .collect();
    columns.sort();
    columns.dedup();

    table.set_header(columns.iter().map(Cell::new).collect::<Vec<_>>());

    for item in items {
        let row = columns
            .iter()
            .map(|column| match item.get(column) {
                Some(value) => Cell::new(format_value(value)),
                None => Cell::new("-"),
            })
            .collect::<Vec<_>>();
        table.add_row(row);
    }

    table.to_string()
}

/// Format a value for display in a table cell.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::S(s) => s.clone(),
        Value::N(n) => n.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::B(bytes) => format!("<Binary {} bytes>", bytes.len()),
        Value::L(list) => {
            let items: Vec<String> = list.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::M(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let pairs: Vec<String> = keys
                .iter()
                .map(|k| format!("\"{}\": {}", k, format_value(&map[*k])))
                .collect();
            format!("{{{}}}", pairs.join(", "))
        }
        Value::Ss(set) => format!("({})", set.join(", ")),
        Value::Ns(set) => format!("({})", set.join(", ")),
        Value::Bs(set) => format!("<BinarySet {} values>", set.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_empty_items() {
        assert_eq!(format_items_table(&[]), "No items found");
    }

    #[test]
    fn test_format_simple_items() {
        let items = vec![
            Item::from([
                ("name".to_string(), Value::string("Alice")),
                ("age".to_string(), Value::number(30)),
            ]),
            Item::from([
                ("name".to_string(), Value::string("Bob")),
                ("active".to_string(), Value::Bool(true)),
            ]),
        ];

        let output = format_items_table(&items);
        assert!(output.contains("Alice"));
        assert!(output.contains("Bob"));
        assert!(output.contains("30"));
        assert!(output.contains("true"));
        // Missing attributes render as "-"
        assert!(output.contains('-'));
    }

    #[test]
    fn test_format_value_types() {
        assert_eq!(format_value(&Value::string("x")), "x");
        assert_eq!(format_value(&Value::number(42)), "42");
        assert_eq!(format_value(&Value::Bool(false)), "false");
        assert_eq!(format_value(&Value::Null), "null");
        assert_eq!(
            format_value(&Value::L(vec![Value::string("a"), Value::number(1)])),
            "[a, 1]"
        );
        assert_eq!(
            format_value(&Value::Ss(vec!["a".to_string(), "b".to_string()])),
            "(a, b)"
        );
    }
}
