//! Tokenizer for DQL statements.
//!
//! Longest-match tokenization over UTF-8 input. Keywords are matched
//! case-insensitively; identifiers are case-sensitive. Every token records
//! its byte offset and the exact source lexeme so errors can point into the
//! statement and token streams can be checked against the source.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;

use crate::error::{Error, Result};

/// All keywords recognized by the grammar, in canonical (uppercase) spelling.
const KEYWORDS: &[&str] = &[
    "SELECT", "SCAN", "COUNT", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "EXPLAIN",
    "ANALYZE", "DUMP", "LOAD", "SAVE", "HELP", "FROM", "INTO", "TABLE", "WHERE", "FILTER", "USING",
    "LIMIT", "ORDER", "BY", "ASC", "DESC", "CONSISTENT", "READ", "THREADS", "VALUES", "SET", "ADD",
    "REMOVE", "RETURNS", "NONE", "ALL", "NEW", "OLD", "UPDATED", "IF", "NOT", "EXISTS", "AND",
    "OR", "IN", "BETWEEN", "IS", "HASH", "RANGE", "KEY", "KEYS", "INDEX", "GLOBAL", "INCLUDE",
    "THROUGHPUT", "PAY_PER_REQUEST", "STRING", "NUMBER", "BINARY", "BOOL", "LIST", "MAP", "SCHEMA",
];

/// Operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    AddAssign,
    SubAssign,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Plus => "+",
            Op::Minus => "-",
            Op::Star => "*",
            Op::AddAssign => "+=",
            Op::SubAssign => "-=",
        }
    }
}

/// Token classification.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A reserved word, canonicalized to uppercase.
    Keyword(&'static str),
    /// A case-sensitive identifier.
    Ident,
    /// A quoted string literal; payload is the decoded value.
    Str(String),
    /// A numeric literal; the lexeme is the arbitrary-precision text.
    Number,
    /// A `b"base64"` literal; payload is the decoded bytes.
    Binary(Bytes),
    /// TRUE or FALSE.
    Bool(bool),
    /// NULL.
    Null,
    Op(Op),
    /// Single-character punctuation: `( ) [ ] { } , ; : .`
    Punct(char),
    Eof,
}

/// A lexed token with its exact source lexeme and byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub offset: usize,
}

impl Token {
    /// The word content if this token can stand in identifier position.
    /// Keywords double as identifiers in attribute and table positions.
    pub fn as_word(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident | TokenKind::Keyword(_) => Some(&self.lexeme),
            _ => None,
        }
    }

    /// True if this token is the given keyword (canonical uppercase name).
    pub fn is_keyword(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Keyword(k) if *k == name)
    }

    /// Human-readable description used in parse errors.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Keyword(k) => format!("keyword {}", k),
            TokenKind::Ident => format!("identifier '{}'", self.lexeme),
            TokenKind::Str(_) => format!("string {}", self.lexeme),
            TokenKind::Number => format!("number {}", self.lexeme),
            TokenKind::Binary(_) => "binary literal".to_string(),
            TokenKind::Bool(b) => format!("{}", if *b { "TRUE" } else { "FALSE" }),
            TokenKind::Null => "NULL".to_string(),
            TokenKind::Op(op) => format!("'{}'", op.as_str()),
            TokenKind::Punct(c) => format!("'{}'", c),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

/// Tokenizer state: a character cursor with byte offsets.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().collect(),
            pos: 0,
        }
    }

    /// Tokenize the whole input, ending with an Eof token.
    pub fn tokenize(source: &'a str) -> Result<Vec<Token>> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn peek_at(&self, lookahead: usize) -> Option<char> {
        self.chars.get(self.pos + lookahead).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map_or(self.source.len(), |&(off, _)| off)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn slice_from(&self, start: usize) -> &'a str {
        &self.source[start..self.offset()]
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.advance(),
                Some('-') if self.peek_at(1) == Some('-') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.offset();
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => self.advance(),
                            None => {
                                return Err(Error::lex(start, "unterminated block comment"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia()?;

        let offset = self.offset();
        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                lexeme: String::new(),
                offset,
            });
        };

        match c {
            '\'' | '"' => self.read_string(offset, c),
            'b' | 'B' if matches!(self.peek_at(1), Some('\'') | Some('"')) => {
                self.read_binary(offset)
            }
            c if c.is_ascii_digit() => self.read_number(offset),
            '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number(offset),
            c if is_ident_start(c) => Ok(self.read_word(offset)),
            '=' => {
                self.advance();
                self.op_token(offset, Op::Eq)
            }
            '<' => {
                self.advance();
                match self.peek() {
                    Some('>') => {
                        self.advance();
                        self.op_token(offset, Op::Ne)
                    }
                    Some('=') => {
                        self.advance();
                        self.op_token(offset, Op::Le)
                    }
                    _ => self.op_token(offset, Op::Lt),
                }
            }
            '>' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    self.op_token(offset, Op::Ge)
                } else {
                    self.op_token(offset, Op::Gt)
                }
            }
            '!' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    self.op_token(offset, Op::Ne)
                } else {
                    Err(Error::lex(offset, "unexpected character '!'"))
                }
            }
            '+' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    self.op_token(offset, Op::AddAssign)
                } else {
                    self.op_token(offset, Op::Plus)
                }
            }
            '-' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    self.op_token(offset, Op::SubAssign)
                } else {
                    self.op_token(offset, Op::Minus)
                }
            }
            '*' => {
                self.advance();
                self.op_token(offset, Op::Star)
            }
            '(' | ')' | '[' | ']' | '{' | '}' | ',' | ';' | ':' | '.' => {
                self.advance();
                Ok(Token {
                    kind: TokenKind::Punct(c),
                    lexeme: c.to_string(),
                    offset,
                })
            }
            other => Err(Error::lex(offset, format!("unexpected character '{}'", other))),
        }
    }

    fn op_token(&self, offset: usize, op: Op) -> Result<Token> {
        Ok(Token {
            kind: TokenKind::Op(op),
            lexeme: self.slice_from(offset).to_string(),
            offset,
        })
    }

    /// Quoted string with doubled-quote escape; embedded newlines permitted.
    fn read_string(&mut self, offset: usize, quote: char) -> Result<Token> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.advance();
                    if self.peek() == Some(quote) {
                        // Doubled quote is a literal quote character
                        value.push(quote);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
                None => return Err(Error::lex(offset, "unterminated string literal")),
            }
        }
        Ok(Token {
            kind: TokenKind::Str(value),
            lexeme: self.slice_from(offset).to_string(),
            offset,
        })
    }

    /// `b"base64"` binary literal.
    fn read_binary(&mut self, offset: usize) -> Result<Token> {
        self.advance(); // 'b'
        let quote = self.peek().expect("checked by caller");
        let string = self.read_string(self.offset(), quote)?;
        let encoded = match string.kind {
            TokenKind::Str(s) => s,
            _ => unreachable!(),
        };
        let decoded = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| Error::lex(offset, format!("invalid base64 in binary literal: {}", e)))?;
        Ok(Token {
            kind: TokenKind::Binary(Bytes::from(decoded)),
            lexeme: self.slice_from(offset).to_string(),
            offset,
        })
    }

    /// Integer or decimal literal, preserved as text. Signs are handled at
    /// the parser level.
    fn read_number(&mut self, offset: usize) -> Result<Token> {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let lexeme = self.slice_from(offset);
        if !lexeme.chars().any(|c| c.is_ascii_digit()) {
            return Err(Error::lex(offset, "malformed number literal"));
        }
        Ok(Token {
            kind: TokenKind::Number,
            lexeme: lexeme.to_string(),
            offset,
        })
    }

    fn read_word(&mut self, offset: usize) -> Token {
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let lexeme = self.slice_from(offset).to_string();
        let upper = lexeme.to_ascii_uppercase();
        let kind = match upper.as_str() {
            "TRUE" => TokenKind::Bool(true),
            "FALSE" => TokenKind::Bool(false),
            "NULL" => TokenKind::Null,
            _ => match KEYWORDS.iter().find(|k| **k == upper) {
                Some(canonical) => TokenKind::Keyword(*canonical),
                None => TokenKind::Ident,
            },
        };
        Token {
            kind,
            lexeme,
            offset,
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
