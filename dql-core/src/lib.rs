//! DQL: an SQL-like query language for Amazon DynamoDB.
//!
//! The pipeline runs leaves-first: `lexer` tokenizes, `parser` builds the
//! AST, `semantic` resolves tables and validates key usage, `plan` picks the
//! cheapest access path and lowers expressions to DynamoDB wire syntax, and
//! `executor` drives the resulting operation list against an abstract
//! `DynamoClient`. `engine` ties the stages together for one session.

pub mod ast;
pub mod cancel;
pub mod client;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expr;
pub mod lexer;
pub mod memory;
pub mod parser;
pub mod plan;
pub mod retry;
pub mod schema;
pub mod semantic;
pub mod types;

pub use cancel::CancelToken;
pub use client::{DynamoClient, DynamoError, DynamoErrorKind};
pub use engine::{Engine, EngineOptions, FragmentEngine, StatementResult};
pub use error::{Error, Result};
pub use executor::{Executor, PlanOutput, ResultSink};
pub use memory::MemoryDynamoClient;
pub use parser::Parser;
pub use plan::{ExecutionPlan, Operation};
pub use schema::{CachingSchemaProvider, SchemaProvider};
pub use types::{Item, TableSchema, Value};
