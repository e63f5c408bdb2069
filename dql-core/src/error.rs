use std::io;
use thiserror::Error;

use crate::client::DynamoError;

/// Lexical error with the byte offset of the offending input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub offset: usize,
    pub message: String,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at offset {})", self.message, self.offset)
    }
}

/// Syntax error: what the parser expected versus what it found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub offset: usize,
    pub expected: String,
    pub found: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "expected {}, found {} (at offset {})",
            self.expected, self.found, self.offset
        )
    }
}

/// Classification of semantic analysis failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticErrorKind {
    UnknownTable,
    UnknownAttribute,
    TypeMismatch,
    InvalidKeyUsage,
    AmbiguousIndex,
    MutationWithoutKey,
}

impl SemanticErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticErrorKind::UnknownTable => "UnknownTable",
            SemanticErrorKind::UnknownAttribute => "UnknownAttribute",
            SemanticErrorKind::TypeMismatch => "TypeMismatch",
            SemanticErrorKind::InvalidKeyUsage => "InvalidKeyUsage",
            SemanticErrorKind::AmbiguousIndex => "AmbiguousIndex",
            SemanticErrorKind::MutationWithoutKey => "MutationWithoutKey",
        }
    }
}

/// Semantic error with classification and, when traceable, a source offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticError {
    pub kind: SemanticErrorKind,
    pub message: String,
    pub offset: Option<usize>,
}

impl SemanticError {
    pub fn new(kind: SemanticErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            offset: None,
        }
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl std::fmt::Display for SemanticError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)?;
        if let Some(offset) = self.offset {
            write!(f, " (at offset {})", offset)?;
        }
        Ok(())
    }
}

/// Failure while applying a partially-executed mutation plan.
///
/// Writes already applied before the failure are reported; the engine does
/// not attempt rollback.
#[derive(Debug)]
pub struct ExecutionError {
    pub source: DynamoError,
    pub applied: usize,
    pub remaining: usize,
}

impl ExecutionError {
    pub fn new(source: DynamoError) -> Self {
        Self {
            source,
            applied: 0,
            remaining: 0,
        }
    }

    pub fn partial(source: DynamoError, applied: usize, remaining: usize) -> Self {
        Self {
            source,
            applied,
            remaining,
        }
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.applied > 0 || self.remaining > 0 {
            write!(
                f,
                "{} (applied: {}, remaining: {})",
                self.source, self.applied, self.remaining
            )
        } else {
            write!(f, "{}", self.source)
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Lex error: {0}")]
    Lex(LexError),

    #[error("Parse error: {0}")]
    Parse(ParseError),

    #[error("Semantic error: {0}")]
    Semantic(SemanticError),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Execution error: {0}")]
    Execution(ExecutionError),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn lex(offset: usize, message: impl Into<String>) -> Self {
        Error::Lex(LexError {
            offset,
            message: message.into(),
        })
    }

    pub fn parse(offset: usize, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Error::Parse(ParseError {
            offset,
            expected: expected.into(),
            found: found.into(),
        })
    }

    pub fn semantic(kind: SemanticErrorKind, message: impl Into<String>) -> Self {
        Error::Semantic(SemanticError::new(kind, message))
    }

    /// Source offset of the error, when it is traceable to statement text.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::Lex(e) => Some(e.offset),
            Error::Parse(e) => Some(e.offset),
            Error::Semantic(e) => e.offset,
            _ => None,
        }
    }

    /// Process exit code for the CLI: 1 for user errors, 2 for execution
    /// errors, 3 for configuration/environment errors, 130 for cancellation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Lex(_) | Error::Parse(_) | Error::Semantic(_) | Error::Plan(_) => 1,
            Error::Execution(_) => 2,
            Error::Io(_) => 3,
            Error::Cancelled => 130,
        }
    }

    /// True when the failure is a user mistake (bad statement) rather than an
    /// environment or runtime problem.
    pub fn is_user_error(&self) -> bool {
        self.exit_code() == 1
    }
}

impl From<DynamoError> for Error {
    fn from(e: DynamoError) -> Self {
        Error::Execution(ExecutionError::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
