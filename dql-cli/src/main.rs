use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser as ClapParser;
use colored::Colorize;
use dql_core::engine::format_error_with_caret;
use dql_core::{DynamoClient, Engine, EngineOptions, MemoryDynamoClient};

mod render;
mod repl;
mod table;

/// SQL-like queries for Amazon DynamoDB.
#[derive(ClapParser)]
#[command(name = "dql", version, about, long_about = None)]
struct Cli {
    /// Script file of ;-separated statements to run
    file: Option<PathBuf>,

    /// Run this statement (or statements) and exit
    #[arg(short, long)]
    command: Option<String>,

    /// AWS region to connect to
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Endpoint URL, or ":memory:" for a process-local in-memory instance
    #[arg(long)]
    endpoint: Option<String>,

    /// AWS credentials profile
    #[arg(long)]
    profile: Option<String>,

    /// Emit result items as JSON lines instead of tables
    #[arg(long)]
    json: bool,

    /// Allow UPDATE/DELETE statements that expand beyond a single primary
    /// key (read-then-write plans, including full-table scans)
    #[arg(long)]
    allow_full_table_mutations: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let client = match connect(&cli) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{} {:#}", "Configuration error:".red().bold(), e);
            return ExitCode::from(3);
        }
    };

    let engine = Engine::with_options(
        client,
        EngineOptions {
            allow_full_table_mutation: cli.allow_full_table_mutations,
            ..EngineOptions::default()
        },
    );

    let batch = match (&cli.command, &cli.file) {
        (Some(command), _) => Some(command.clone()),
        (None, Some(path)) => match std::fs::read_to_string(path) {
            Ok(script) => Some(script),
            Err(e) => {
                eprintln!(
                    "{} cannot read {}: {}",
                    "Configuration error:".red().bold(),
                    path.display(),
                    e
                );
                return ExitCode::from(3);
            }
        },
        (None, None) => None,
    };

    match batch {
        Some(script) => run_batch(&engine, &script, cli.json),
        None => match repl::Repl::new(engine, cli.json).and_then(|mut repl| repl.run()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
                ExitCode::from(3)
            }
        },
    }
}

fn run_batch(engine: &Engine, script: &str, json: bool) -> ExitCode {
    // A final ';' is optional in batch mode
    match engine.execute_script(script) {
        Ok(results) => {
            for result in results {
                render::print_result(&result, json);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!(
                "{} {}",
                "Error:".red().bold(),
                format_error_with_caret(script, &e)
            );
            ExitCode::from(e.exit_code().clamp(0, u8::MAX as i32) as u8)
        }
    }
}

/// Build the DynamoDB client for this session.
///
/// The in-memory instance is built in; a network transport is supplied by
/// the embedding build behind the `DynamoClient` trait.
fn connect(cli: &Cli) -> Result<Arc<dyn DynamoClient>> {
    if cli.endpoint.as_deref() == Some(":memory:") {
        return Ok(Arc::new(MemoryDynamoClient::new()));
    }
    let target = cli
        .endpoint
        .clone()
        .or_else(|| cli.region.clone())
        .unwrap_or_else(|| "<no region>".to_string());
    let profile = cli.profile.as_deref().unwrap_or("default");
    bail!(
        "no network transport is compiled into this build (target {}, profile {}); \
         use --endpoint :memory: for a local in-memory instance",
        target,
        profile
    )
}
