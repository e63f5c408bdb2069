//! Result rendering shared by batch mode and the REPL.

use colored::Colorize;
use dql_core::plan::PlanItem;
use dql_core::StatementResult;

use crate::table::format_items_table;

pub fn print_result(result: &StatementResult, json: bool) {
    match result {
        StatementResult::Items { items, .. } => {
            if json {
                for item in items {
                    let ordered: PlanItem =
                        item.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    match serde_json::to_string(&ordered) {
                        Ok(line) => println!("{}", line),
                        Err(e) => eprintln!("cannot render item: {}", e),
                    }
                }
            } else {
                println!("{}", format_items_table(items));
            }
        }
        StatementResult::Count {
            count,
            scanned_count,
            consumed_capacity,
        } => {
            println!("count: {} (scanned: {})", count, scanned_count);
            print_capacity(consumed_capacity);
        }
        StatementResult::Mutation {
            processed,
            returned,
            consumed_capacity,
        } => {
            println!(
                "{} item{} affected",
                processed,
                if *processed == 1 { "" } else { "s" }
            );
            if !returned.is_empty() && !json {
                println!("{}", format_items_table(returned));
            }
            print_capacity(consumed_capacity);
        }
        StatementResult::Table(description) => {
            println!(
                "table {} [{}]",
                description.table_name.bold(),
                description.table_status
            );
        }
        StatementResult::Explained(plan) => println!("{}", plan),
        StatementResult::SchemaDump(dump) => print!("{}", dump),
        StatementResult::Message(message) => println!("{}", message),
    }
}

fn print_capacity(consumed: &Option<f64>) {
    if let Some(units) = consumed {
        println!("{}", format!("consumed capacity: {:.1}", units).dimmed());
    }
}
