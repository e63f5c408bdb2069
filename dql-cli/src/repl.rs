//! Interactive REPL for DQL.
//!
//! Line editing, history, and keyword completion over a `FragmentEngine`:
//! input buffers across lines until a `;`-terminated statement is available.

use anyhow::{Context, Result};
use colored::Colorize;
use dql_core::engine::format_error_with_caret;
use dql_core::{Engine, FragmentEngine, StatementResult};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::Helper;

use crate::render;

/// Keyword completion for DQL statements.
#[derive(Clone)]
struct DqlCompleter {
    keywords: Vec<String>,
}

impl DqlCompleter {
    fn new() -> Self {
        Self {
            keywords: [
                "SELECT", "SCAN", "COUNT", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER",
                "DROP", "EXPLAIN", "ANALYZE", "DUMP", "LOAD", "HELP", "FROM", "INTO", "TABLE",
                "WHERE", "FILTER", "USING", "LIMIT", "ORDER", "BY", "VALUES", "SET", "ADD",
                "REMOVE", "RETURNS", "THROUGHPUT", "CONSISTENT", "READ", "THREADS", "SCHEMA",
                "BETWEEN", "AND", "OR", "NOT",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Completer for DqlCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let prefix = &line[..pos];
        let word_start = prefix
            .rfind(|c: char| c.is_whitespace())
            .map(|i| i + 1)
            .unwrap_or(0);
        let word = prefix[word_start..].to_uppercase();

        let candidates = self
            .keywords
            .iter()
            .filter(|keyword| keyword.starts_with(&word))
            .map(|keyword| Pair {
                display: keyword.clone(),
                replacement: keyword.clone(),
            })
            .collect();
        Ok((word_start, candidates))
    }
}

impl Hinter for DqlCompleter {
    type Hint = String;
}

impl Highlighter for DqlCompleter {}

impl Validator for DqlCompleter {}

impl Helper for DqlCompleter {}

pub struct Repl {
    engine: Engine,
    editor: rustyline::Editor<DqlCompleter, rustyline::history::FileHistory>,
    json: bool,
}

impl Repl {
    pub fn new(engine: Engine, json: bool) -> Result<Self> {
        let mut editor = rustyline::Editor::new().context("failed to initialize line editor")?;
        editor.set_helper(Some(DqlCompleter::new()));

        if let Some(path) = history_path() {
            if path.exists() {
                let _ = editor.load_history(&path);
            }
        }

        Ok(Self {
            engine,
            editor,
            json,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        println!(
            "{} type statements ending with ';', {} to exit",
            "dql".green().bold(),
            "Ctrl+D".bold()
        );

        let mut fragments = FragmentEngine::new();

        loop {
            let prompt = if fragments.is_partial() {
                "   > ".to_string()
            } else {
                format!("{} ", "dql>".green().bold())
            };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    if line.trim().is_empty() && !fragments.is_partial() {
                        continue;
                    }
                    let Some(query) = fragments.append(&line) else {
                        continue;
                    };
                    let _ = self.editor.add_history_entry(query.trim());
                    self.run_query(&query);
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C cancels the current input
                    println!("^C");
                    fragments.reset();
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("input error: {}", e);
                    break;
                }
            }
        }

        if let Some(path) = history_path() {
            let _ = self.editor.save_history(&path);
        }
        Ok(())
    }

    fn run_query(&self, query: &str) {
        let started = std::time::Instant::now();
        match self.engine.execute_script(query) {
            Ok(results) => {
                for result in results {
                    render::print_result(&result, self.json);
                    if let StatementResult::Items { count, .. } = result {
                        println!(
                            "{}",
                            format!(
                                "{} row{} ({:.2}ms)",
                                count,
                                if count == 1 { "" } else { "s" },
                                started.elapsed().as_secs_f64() * 1000.0
                            )
                            .dimmed()
                        );
                    }
                }
            }
            Err(e) => {
                // Offsets are relative to the text handed to the engine
                eprintln!(
                    "{} {}",
                    "Error:".red().bold(),
                    format_error_with_caret(query, &e)
                );
            }
        }
    }
}

fn history_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|home| home.join(".dql_history"))
}
