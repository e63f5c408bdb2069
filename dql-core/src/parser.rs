//! Recursive-descent parser for DQL statements.
//!
//! Consumes the token stream from `lexer` and yields `ast::Statement` values.
//! Statement clauses (WHERE / USING / LIMIT / ...) are accepted in any order
//! and rejected when repeated. Boolean operators bind NOT > AND > OR;
//! comparison operators are non-associative and bind tighter than the
//! boolean connectives.

use crate::ast::*;
use crate::client::ReturnValue;
use crate::error::{Error, Result};
use crate::lexer::{Lexer, Op, Token, TokenKind};
use crate::types::{AttrType, IndexProjection, ScalarType, Throughput};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse a single statement. A trailing `;` is permitted; anything else
    /// after the statement is an error.
    pub fn parse_statement(source: &str) -> Result<Statement> {
        let mut parser = Parser::new(source)?;
        let statement = parser.statement()?;
        parser.accept_punct(';');
        parser.expect_eof()?;
        Ok(statement)
    }

    /// Parse a `;`-separated batch of statements.
    pub fn parse_script(source: &str) -> Result<Vec<Statement>> {
        let mut parser = Parser::new(source)?;
        let mut statements = Vec::new();
        loop {
            if parser.at_eof() {
                break;
            }
            statements.push(parser.statement()?);
            if !parser.accept_punct(';') {
                break;
            }
        }
        parser.expect_eof()?;
        Ok(statements)
    }

    fn new(source: &str) -> Result<Self> {
        Ok(Self {
            tokens: Lexer::tokenize(source)?,
            pos: 0,
        })
    }

    // -- token plumbing ----------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn error(&self, expected: impl Into<String>) -> Error {
        let token = self.current();
        Error::parse(token.offset, expected, token.describe())
    }

    fn expect_eof(&self) -> Result<()> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.error("end of statement"))
        }
    }

    fn accept_keyword(&mut self, name: &str) -> bool {
        if self.current().is_keyword(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, name: &str) -> Result<()> {
        if self.accept_keyword(name) {
            Ok(())
        } else {
            Err(self.error(name))
        }
    }

    fn accept_punct(&mut self, c: char) -> bool {
        if self.current().kind == TokenKind::Punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        if self.accept_punct(c) {
            Ok(())
        } else {
            Err(self.error(format!("'{}'", c)))
        }
    }

    fn accept_op(&mut self, op: Op) -> bool {
        if self.current().kind == TokenKind::Op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// A word usable as an identifier: a plain identifier or any keyword.
    fn expect_word(&mut self, what: &str) -> Result<(String, usize)> {
        match self.current().as_word() {
            Some(_) => {
                let token = self.advance();
                Ok((token.lexeme, token.offset))
            }
            None => Err(self.error(what)),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<String> {
        match &self.current().kind {
            TokenKind::Str(value) => {
                let value = value.clone();
                self.advance();
                Ok(value)
            }
            _ => Err(self.error(what)),
        }
    }

    fn expect_integer(&mut self, what: &str) -> Result<u64> {
        match &self.current().kind {
            TokenKind::Number => {
                let token = self.advance();
                token
                    .lexeme
                    .parse::<u64>()
                    .map_err(|_| Error::parse(token.offset, what, format!("number {}", token.lexeme)))
            }
            _ => Err(self.error(what)),
        }
    }

    fn table_ref(&mut self) -> Result<TableRef> {
        let (name, offset) = self.expect_word("table name")?;
        Ok(TableRef::new(name, offset))
    }

    // -- statements --------------------------------------------------------

    fn statement(&mut self) -> Result<Statement> {
        let token = self.current().clone();
        match &token.kind {
            TokenKind::Keyword("SELECT") => self.select_statement(),
            TokenKind::Keyword("SCAN") => self.scan_statement(),
            TokenKind::Keyword("COUNT") => self.count_statement(),
            TokenKind::Keyword("INSERT") => self.insert_statement(),
            TokenKind::Keyword("UPDATE") => self.update_statement(),
            TokenKind::Keyword("DELETE") => self.delete_statement(),
            TokenKind::Keyword("CREATE") => self.create_table_statement(),
            TokenKind::Keyword("ALTER") => self.alter_table_statement(),
            TokenKind::Keyword("DROP") => self.drop_table_statement(),
            TokenKind::Keyword("EXPLAIN") => {
                self.advance();
                let inner = self.statement()?;
                Ok(Statement::Explain(Box::new(inner)))
            }
            TokenKind::Keyword("ANALYZE") => {
                self.advance();
                let inner = self.statement()?;
                Ok(Statement::Analyze(Box::new(inner)))
            }
            TokenKind::Keyword("DUMP") => self.dump_statement(),
            TokenKind::Keyword("LOAD") => self.load_statement(),
            TokenKind::Keyword("HELP") => {
                self.advance();
                let topic = match self.current().as_word() {
                    Some(word) => {
                        let topic = word.to_string();
                        self.advance();
                        Some(topic)
                    }
                    None => None,
                };
                Ok(Statement::Help(topic))
            }
            _ => Err(self.error("a statement (SELECT, SCAN, INSERT, ...)")),
        }
    }

    fn select_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("SELECT")?;
        let select_list = self.select_list()?;
        self.expect_keyword("FROM")?;
        let table = self.table_ref()?;

        let mut stmt = SelectStatement {
            table,
            select_list,
            where_clause: None,
            using_index: None,
            order_by: None,
            limit: None,
            consistent: false,
            save_file: None,
        };

        loop {
            if self.current().is_keyword("WHERE") && stmt.where_clause.is_none() {
                self.advance();
                stmt.where_clause = Some(self.expr()?);
            } else if self.current().is_keyword("USING") && stmt.using_index.is_none() {
                self.advance();
                stmt.using_index = Some(self.index_name()?);
            } else if self.current().is_keyword("ORDER") && stmt.order_by.is_none() {
                self.advance();
                self.expect_keyword("BY")?;
                let (attr, _) = self.expect_word("attribute name")?;
                let dir = self.order_dir().unwrap_or(OrderDir::Asc);
                stmt.order_by = Some(OrderBy {
                    attr: Some(attr),
                    dir,
                });
            } else if stmt.order_by.is_none() && self.peek_order_dir() {
                let dir = self.order_dir().expect("peeked");
                stmt.order_by = Some(OrderBy { attr: None, dir });
            } else if self.current().is_keyword("LIMIT") && stmt.limit.is_none() {
                self.advance();
                stmt.limit = Some(self.expect_integer("limit count")?);
            } else if self.current().is_keyword("CONSISTENT") && !stmt.consistent {
                self.advance();
                self.expect_keyword("READ")?;
                stmt.consistent = true;
            } else if self.current().is_keyword("SAVE") && stmt.save_file.is_none() {
                self.advance();
                stmt.save_file = Some(self.expect_string("file name")?);
            } else {
                break;
            }
        }

        Ok(Statement::Select(stmt))
    }

    fn scan_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("SCAN")?;

        // Two accepted forms: `SCAN (*|attrs) FROM table` and the shorthand
        // `SCAN table`.
        let (select_list, table) = if self.current().kind == TokenKind::Op(Op::Star)
            || self.current().kind == TokenKind::Punct('(')
        {
            let list = self.select_list()?;
            self.expect_keyword("FROM")?;
            (list, self.table_ref()?)
        } else {
            let (first, offset) = self.expect_word("table name or attribute list")?;
            if self.accept_punct(',') {
                let mut attrs = vec![AttributePath::simple(first, offset)];
                loop {
                    let (name, attr_offset) = self.expect_word("attribute name")?;
                    attrs.push(AttributePath::simple(name, attr_offset));
                    if !self.accept_punct(',') {
                        break;
                    }
                }
                self.expect_keyword("FROM")?;
                (SelectList::Attributes(attrs), self.table_ref()?)
            } else if self.accept_keyword("FROM") {
                (
                    SelectList::Attributes(vec![AttributePath::simple(first, offset)]),
                    self.table_ref()?,
                )
            } else {
                (SelectList::All, TableRef::new(first, offset))
            }
        };

        let mut stmt = ScanStatement {
            table,
            select_list,
            filter: None,
            limit: None,
            threads: None,
            save_file: None,
        };

        loop {
            if self.current().is_keyword("FILTER") && stmt.filter.is_none() {
                self.advance();
                stmt.filter = Some(self.expr()?);
            } else if self.current().is_keyword("LIMIT") && stmt.limit.is_none() {
                self.advance();
                stmt.limit = Some(self.expect_integer("limit count")?);
            } else if self.current().is_keyword("THREADS") && stmt.threads.is_none() {
                self.advance();
                let n = self.expect_integer("thread count")?;
                stmt.threads = Some(n as u32);
            } else if self.current().is_keyword("SAVE") && stmt.save_file.is_none() {
                self.advance();
                stmt.save_file = Some(self.expect_string("file name")?);
            } else {
                break;
            }
        }

        Ok(Statement::Scan(stmt))
    }

    fn count_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("COUNT")?;
        let table = self.table_ref()?;

        let mut stmt = CountStatement {
            table,
            where_clause: None,
            using_index: None,
            consistent: false,
        };

        loop {
            if self.current().is_keyword("WHERE") && stmt.where_clause.is_none() {
                self.advance();
                stmt.where_clause = Some(self.expr()?);
            } else if self.current().is_keyword("USING") && stmt.using_index.is_none() {
                self.advance();
                stmt.using_index = Some(self.index_name()?);
            } else if self.current().is_keyword("CONSISTENT") && !stmt.consistent {
                self.advance();
                self.expect_keyword("READ")?;
                stmt.consistent = true;
            } else {
                break;
            }
        }

        Ok(Statement::Count(stmt))
    }

    fn insert_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.table_ref()?;

        self.expect_punct('(')?;
        let mut columns = Vec::new();
        loop {
            let (name, _) = self.expect_word("column name")?;
            columns.push(name);
            if !self.accept_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;

        self.expect_keyword("VALUES")?;

        let mut rows = Vec::new();
        loop {
            let offset = self.current().offset;
            self.expect_punct('(')?;
            let mut values = Vec::new();
            loop {
                values.push(self.literal()?);
                if !self.accept_punct(',') {
                    break;
                }
            }
            self.expect_punct(')')?;

            if values.len() != columns.len() {
                return Err(Error::parse(
                    offset,
                    format!("{} values to match the column list", columns.len()),
                    format!("{} values", values.len()),
                ));
            }
            rows.push(columns.iter().cloned().zip(values).collect());
            if !self.accept_punct(',') {
                break;
            }
        }

        Ok(Statement::Insert(InsertStatement { table, rows }))
    }

    fn update_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("UPDATE")?;
        let table = self.table_ref()?;

        let mut clauses = Vec::new();
        loop {
            if self.accept_keyword("SET") {
                clauses.push(UpdateClause::Set(self.set_actions()?));
            } else if self.accept_keyword("ADD") {
                clauses.push(UpdateClause::Add(self.path_literal_pairs()?));
            } else if self.accept_keyword("REMOVE") {
                let mut paths = vec![self.attribute_path()?];
                while self.accept_punct(',') {
                    paths.push(self.attribute_path()?);
                }
                clauses.push(UpdateClause::Remove(paths));
            } else if self.accept_keyword("DELETE") {
                clauses.push(UpdateClause::Delete(self.path_literal_pairs()?));
            } else {
                break;
            }
        }
        if clauses.is_empty() {
            return Err(self.error("SET, ADD, REMOVE, or DELETE"));
        }

        let where_clause = if self.accept_keyword("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };
        let returns = self.returns_clause()?;

        Ok(Statement::Update(UpdateStatement {
            table,
            clauses,
            where_clause,
            returns,
        }))
    }

    fn set_actions(&mut self) -> Result<Vec<SetAction>> {
        let mut actions = Vec::new();
        loop {
            let path = self.attribute_path()?;
            if self.accept_op(Op::Eq) {
                let value = self.set_value()?;
                actions.push(SetAction { path, value });
            } else if self.accept_op(Op::AddAssign) {
                let rhs = self.set_operand()?;
                actions.push(SetAction {
                    path: path.clone(),
                    value: SetValue::Arith {
                        op: ArithOp::Add,
                        lhs: Box::new(SetValue::Path(path)),
                        rhs: Box::new(rhs),
                    },
                });
            } else if self.accept_op(Op::SubAssign) {
                let rhs = self.set_operand()?;
                actions.push(SetAction {
                    path: path.clone(),
                    value: SetValue::Arith {
                        op: ArithOp::Sub,
                        lhs: Box::new(SetValue::Path(path)),
                        rhs: Box::new(rhs),
                    },
                });
            } else {
                return Err(self.error("'=', '+=', or '-='"));
            }
            if !self.accept_punct(',') {
                break;
            }
        }
        Ok(actions)
    }

    /// SET right-hand side: an operand, optionally followed by `+`/`-` and a
    /// second operand.
    fn set_value(&mut self) -> Result<SetValue> {
        let lhs = self.set_operand()?;
        if self.accept_op(Op::Plus) {
            let rhs = self.set_operand()?;
            Ok(SetValue::Arith {
                op: ArithOp::Add,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            })
        } else if self.accept_op(Op::Minus) {
            let rhs = self.set_operand()?;
            Ok(SetValue::Arith {
                op: ArithOp::Sub,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            })
        } else {
            Ok(lhs)
        }
    }

    fn set_operand(&mut self) -> Result<SetValue> {
        // Function forms first: if_not_exists(path, value), list_append(a, b)
        if let Some(word) = self.current().as_word() {
            let lower = word.to_ascii_lowercase();
            if lower == "if_not_exists" {
                self.advance();
                self.expect_punct('(')?;
                let path = self.attribute_path()?;
                self.expect_punct(',')?;
                let default = self.set_value()?;
                self.expect_punct(')')?;
                return Ok(SetValue::IfNotExists(path, Box::new(default)));
            }
            if lower == "list_append" {
                self.advance();
                self.expect_punct('(')?;
                let first = self.set_value()?;
                self.expect_punct(',')?;
                let second = self.set_value()?;
                self.expect_punct(')')?;
                return Ok(SetValue::ListAppend(Box::new(first), Box::new(second)));
            }
        }

        if self.peek_literal() {
            return Ok(SetValue::Literal(self.literal()?));
        }
        if self.current().as_word().is_some() {
            return Ok(SetValue::Path(self.attribute_path()?));
        }
        Err(self.error("a literal, attribute, if_not_exists, or list_append"))
    }

    fn path_literal_pairs(&mut self) -> Result<Vec<(AttributePath, Literal)>> {
        let mut pairs = Vec::new();
        loop {
            let path = self.attribute_path()?;
            let value = self.literal()?;
            pairs.push((path, value));
            if !self.accept_punct(',') {
                break;
            }
        }
        Ok(pairs)
    }

    fn returns_clause(&mut self) -> Result<ReturnValue> {
        if !self.accept_keyword("RETURNS") {
            return Ok(ReturnValue::None);
        }
        if self.accept_keyword("NONE") {
            Ok(ReturnValue::None)
        } else if self.accept_keyword("ALL") {
            if self.accept_keyword("OLD") {
                Ok(ReturnValue::AllOld)
            } else if self.accept_keyword("NEW") {
                Ok(ReturnValue::AllNew)
            } else {
                Err(self.error("OLD or NEW"))
            }
        } else if self.accept_keyword("UPDATED") {
            if self.accept_keyword("OLD") {
                Ok(ReturnValue::UpdatedOld)
            } else if self.accept_keyword("NEW") {
                Ok(ReturnValue::UpdatedNew)
            } else {
                Err(self.error("OLD or NEW"))
            }
        } else {
            Err(self.error("NONE, ALL OLD, ALL NEW, UPDATED OLD, or UPDATED NEW"))
        }
    }

    fn delete_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.table_ref()?;

        let mut stmt = DeleteStatement {
            table,
            where_clause: None,
            using_index: None,
            returns: ReturnValue::None,
        };

        loop {
            if self.current().is_keyword("WHERE") && stmt.where_clause.is_none() {
                self.advance();
                stmt.where_clause = Some(self.expr()?);
            } else if self.current().is_keyword("USING") && stmt.using_index.is_none() {
                self.advance();
                stmt.using_index = Some(self.index_name()?);
            } else if self.current().is_keyword("RETURNS") {
                stmt.returns = self.returns_clause()?;
            } else {
                break;
            }
        }

        Ok(Statement::Delete(stmt))
    }

    fn create_table_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("CREATE")?;
        self.expect_keyword("TABLE")?;

        let if_not_exists = if self.accept_keyword("IF") {
            self.expect_keyword("NOT")?;
            self.expect_keyword("EXISTS")?;
            true
        } else {
            false
        };

        let table = self.table_ref()?;

        self.expect_punct('(')?;
        let mut attrs = Vec::new();
        let mut throughput = None;
        loop {
            if self.current().is_keyword("THROUGHPUT") && throughput.is_none() {
                self.advance();
                throughput = Some(self.throughput_spec()?);
            } else {
                attrs.push(self.attr_decl()?);
            }
            if !self.accept_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;

        if attrs.is_empty() {
            return Err(self.error("at least one attribute declaration"));
        }

        if throughput.is_none() && self.accept_keyword("THROUGHPUT") {
            throughput = Some(self.throughput_spec_body()?);
        }

        let mut global_indexes = Vec::new();
        while self.current().is_keyword("GLOBAL") {
            self.advance();
            global_indexes.push(self.global_index_decl()?);
        }

        Ok(Statement::CreateTable(CreateTableStatement {
            table,
            if_not_exists,
            attrs,
            throughput,
            global_indexes,
        }))
    }

    fn attr_decl(&mut self) -> Result<AttrDecl> {
        let (name, offset) = self.expect_word("attribute name")?;
        let ty = self.attr_type()?;

        let role = if self.accept_keyword("HASH") {
            self.expect_keyword("KEY")?;
            Some(AttrRole::HashKey)
        } else if self.accept_keyword("RANGE") {
            self.expect_keyword("KEY")?;
            Some(AttrRole::RangeKey)
        } else if self.peek_index_projection() || self.current().is_keyword("INDEX") {
            let projection = self.index_projection()?;
            self.expect_keyword("INDEX")?;
            self.expect_punct('(')?;
            let index_name = self.expect_string("index name")?;
            let projection = self.include_list(projection)?;
            self.expect_punct(')')?;
            Some(AttrRole::LocalIndex {
                name: index_name,
                projection,
            })
        } else {
            None
        };

        Ok(AttrDecl {
            name,
            ty,
            role,
            offset,
        })
    }

    fn attr_type(&mut self) -> Result<AttrType> {
        if self.accept_keyword("STRING") {
            if self.accept_keyword("SET") {
                Ok(AttrType::StringSet)
            } else {
                Ok(AttrType::Scalar(ScalarType::S))
            }
        } else if self.accept_keyword("NUMBER") {
            if self.accept_keyword("SET") {
                Ok(AttrType::NumberSet)
            } else {
                Ok(AttrType::Scalar(ScalarType::N))
            }
        } else if self.accept_keyword("BINARY") {
            if self.accept_keyword("SET") {
                Ok(AttrType::BinarySet)
            } else {
                Ok(AttrType::Scalar(ScalarType::B))
            }
        } else if self.accept_keyword("BOOL") {
            Ok(AttrType::Bool)
        } else if self.current().kind == TokenKind::Null {
            self.advance();
            Ok(AttrType::Null)
        } else if self.accept_keyword("LIST") {
            Ok(AttrType::List)
        } else if self.accept_keyword("MAP") {
            Ok(AttrType::Map)
        } else {
            Err(self.error("a type (STRING, NUMBER, BINARY, BOOL, NULL, LIST, MAP, or SET form)"))
        }
    }

    fn peek_index_projection(&self) -> bool {
        // ALL INDEX / KEYS INDEX / INCLUDE INDEX
        matches!(
            self.current().kind,
            TokenKind::Keyword("ALL") | TokenKind::Keyword("KEYS") | TokenKind::Keyword("INCLUDE")
        )
    }

    fn index_projection(&mut self) -> Result<IndexProjection> {
        if self.accept_keyword("KEYS") {
            Ok(IndexProjection::KeysOnly)
        } else if self.accept_keyword("INCLUDE") {
            // Attribute list follows the index name
            Ok(IndexProjection::Include(Vec::new()))
        } else {
            self.accept_keyword("ALL");
            Ok(IndexProjection::All)
        }
    }

    /// Parse the optional `, ["attr", ...]` include list after an index name.
    fn include_list(&mut self, projection: IndexProjection) -> Result<IndexProjection> {
        if !matches!(projection, IndexProjection::Include(_)) {
            return Ok(projection);
        }
        self.expect_punct(',')?;
        self.expect_punct('[')?;
        let mut attrs = Vec::new();
        loop {
            attrs.push(self.expect_string("projected attribute name")?);
            if !self.accept_punct(',') {
                break;
            }
        }
        self.expect_punct(']')?;
        Ok(IndexProjection::Include(attrs))
    }

    fn global_index_decl(&mut self) -> Result<GlobalIndexDecl> {
        let projection = self.index_projection()?;
        self.expect_keyword("INDEX")?;
        self.expect_punct('(')?;
        let name = self.expect_string("index name")?;
        self.expect_punct(',')?;
        let (hash_attr, _) = self.expect_word("hash key attribute")?;

        let mut range_attr = None;
        let mut throughput = None;
        let mut projection = projection;
        while self.accept_punct(',') {
            if self.current().is_keyword("THROUGHPUT") && throughput.is_none() {
                self.advance();
                throughput = Some(self.throughput_spec()?);
            } else if self.current().kind == TokenKind::Punct('[') {
                if let IndexProjection::Include(attrs) = &mut projection {
                    self.advance();
                    loop {
                        attrs.push(self.expect_string("projected attribute name")?);
                        if !self.accept_punct(',') {
                            break;
                        }
                    }
                    self.expect_punct(']')?;
                } else {
                    return Err(self.error("THROUGHPUT or range key attribute"));
                }
            } else if range_attr.is_none() {
                let (attr, _) = self.expect_word("range key attribute")?;
                range_attr = Some(attr);
            } else {
                return Err(self.error("THROUGHPUT or ')'"));
            }
        }
        self.expect_punct(')')?;

        Ok(GlobalIndexDecl {
            name,
            projection,
            hash_attr,
            range_attr,
            throughput,
        })
    }

    /// `(r, w)` or `PAY_PER_REQUEST`, assuming THROUGHPUT was consumed.
    fn throughput_spec(&mut self) -> Result<Throughput> {
        self.throughput_spec_body()
    }

    fn throughput_spec_body(&mut self) -> Result<Throughput> {
        if self.accept_keyword("PAY_PER_REQUEST") {
            return Ok(Throughput::PayPerRequest);
        }
        self.expect_punct('(')?;
        let read = self.expect_integer("read capacity")?;
        self.expect_punct(',')?;
        let write = self.expect_integer("write capacity")?;
        self.expect_punct(')')?;
        Ok(Throughput::provisioned(read, write))
    }

    fn alter_table_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("ALTER")?;
        self.expect_keyword("TABLE")?;
        let table = self.table_ref()?;

        let action = if self.accept_keyword("SET") {
            if self.accept_keyword("THROUGHPUT") {
                AlterAction::SetThroughput(self.throughput_spec()?)
            } else if self.accept_keyword("INDEX") {
                let (index, _) = self.expect_word("index name")?;
                self.expect_keyword("THROUGHPUT")?;
                AlterAction::SetIndexThroughput {
                    index,
                    throughput: self.throughput_spec()?,
                }
            } else {
                return Err(self.error("THROUGHPUT or INDEX"));
            }
        } else if self.accept_keyword("DROP") {
            self.expect_keyword("INDEX")?;
            let (index, _) = self.expect_word("index name")?;
            AlterAction::DropIndex(index)
        } else if self.accept_keyword("CREATE") {
            self.expect_keyword("GLOBAL")?;
            let projection = self.index_projection()?;
            self.expect_keyword("INDEX")?;
            self.expect_punct('(')?;
            let name = self.expect_string("index name")?;
            self.expect_punct(',')?;
            let (hash_name, _) = self.expect_word("hash key attribute")?;
            let hash_ty = self.scalar_type()?;

            let mut range = None;
            let mut throughput = None;
            let mut projection = projection;
            while self.accept_punct(',') {
                if self.current().is_keyword("THROUGHPUT") && throughput.is_none() {
                    self.advance();
                    throughput = Some(self.throughput_spec()?);
                } else if self.current().kind == TokenKind::Punct('[') {
                    if let IndexProjection::Include(attrs) = &mut projection {
                        self.advance();
                        loop {
                            attrs.push(self.expect_string("projected attribute name")?);
                            if !self.accept_punct(',') {
                                break;
                            }
                        }
                        self.expect_punct(']')?;
                    } else {
                        return Err(self.error("THROUGHPUT or range key declaration"));
                    }
                } else if range.is_none() {
                    let (range_name, _) = self.expect_word("range key attribute")?;
                    let range_ty = self.scalar_type()?;
                    range = Some((range_name, range_ty));
                } else {
                    return Err(self.error("THROUGHPUT or ')'"));
                }
            }
            self.expect_punct(')')?;

            AlterAction::CreateGlobalIndex {
                name,
                projection,
                hash: (hash_name, hash_ty),
                range,
                throughput,
            }
        } else {
            return Err(self.error("SET, DROP, or CREATE"));
        };

        Ok(Statement::AlterTable(AlterTableStatement { table, action }))
    }

    fn scalar_type(&mut self) -> Result<ScalarType> {
        let offset = self.current().offset;
        match self.attr_type()? {
            AttrType::Scalar(s) => Ok(s),
            other => Err(Error::parse(
                offset,
                "a scalar key type (STRING, NUMBER, BINARY)",
                other.dql_name(),
            )),
        }
    }

    fn drop_table_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("DROP")?;
        self.expect_keyword("TABLE")?;
        let if_exists = if self.accept_keyword("IF") {
            self.expect_keyword("EXISTS")?;
            true
        } else {
            false
        };
        let table = self.table_ref()?;
        Ok(Statement::DropTable(DropTableStatement { table, if_exists }))
    }

    fn dump_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("DUMP")?;
        self.expect_keyword("SCHEMA")?;
        let mut tables = Vec::new();
        if self.current().as_word().is_some() {
            loop {
                let (name, _) = self.expect_word("table name")?;
                tables.push(name);
                if !self.accept_punct(',') {
                    break;
                }
            }
        }
        Ok(Statement::DumpSchema(tables))
    }

    fn load_statement(&mut self) -> Result<Statement> {
        self.expect_keyword("LOAD")?;
        let file = self.expect_string("file name")?;
        self.expect_keyword("INTO")?;
        let table = self.table_ref()?;
        Ok(Statement::Load(LoadStatement { file, table }))
    }

    // -- shared clauses ----------------------------------------------------

    fn select_list(&mut self) -> Result<SelectList> {
        if self.accept_op(Op::Star) {
            return Ok(SelectList::All);
        }
        if self.current().is_keyword("COUNT") {
            // count(*) — anything else after COUNT is an error here
            self.advance();
            self.expect_punct('(')?;
            if !self.accept_op(Op::Star) {
                return Err(self.error("'*'"));
            }
            self.expect_punct(')')?;
            return Ok(SelectList::Count);
        }

        let parenthesized = self.accept_punct('(');
        let mut attrs = Vec::new();
        loop {
            attrs.push(self.attribute_path()?);
            if !self.accept_punct(',') {
                break;
            }
        }
        if parenthesized {
            self.expect_punct(')')?;
        }
        Ok(SelectList::Attributes(attrs))
    }

    fn index_name(&mut self) -> Result<String> {
        match &self.current().kind {
            TokenKind::Str(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => self.expect_word("index name").map(|(name, _)| name),
        }
    }

    fn peek_order_dir(&self) -> bool {
        self.current().is_keyword("ASC") || self.current().is_keyword("DESC")
    }

    fn order_dir(&mut self) -> Option<OrderDir> {
        if self.accept_keyword("ASC") {
            Some(OrderDir::Asc)
        } else if self.accept_keyword("DESC") {
            Some(OrderDir::Desc)
        } else {
            None
        }
    }

    fn attribute_path(&mut self) -> Result<AttributePath> {
        let (name, offset) = self.expect_word("attribute name")?;
        let mut segments = vec![PathSegment::Attr(name)];
        loop {
            if self.accept_punct('.') {
                let (name, _) = self.expect_word("attribute name")?;
                segments.push(PathSegment::Attr(name));
            } else if self.current().kind == TokenKind::Punct('[') {
                // Only consume brackets that hold a list index
                let save = self.pos;
                self.advance();
                match self.current().kind.clone() {
                    TokenKind::Number => {
                        let index = self.expect_integer("list index")?;
                        self.expect_punct(']')?;
                        segments.push(PathSegment::Index(index as u32));
                    }
                    _ => {
                        self.pos = save;
                        break;
                    }
                }
            } else {
                break;
            }
        }
        Ok(AttributePath { segments, offset })
    }

    // -- expressions -------------------------------------------------------

    /// expr := and_expr (OR and_expr)*
    pub(crate) fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.accept_keyword("OR") {
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.not_expr()?;
        while self.accept_keyword("AND") {
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.accept_keyword("NOT") {
            let inner = self.not_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.condition()
    }

    fn condition(&mut self) -> Result<Expr> {
        if self.current().kind == TokenKind::Punct('(') {
            self.advance();
            let inner = self.expr()?;
            self.expect_punct(')')?;
            return Ok(inner);
        }

        // Boolean-valued function calls
        if let Some(word) = self.current().as_word() {
            if let Some(name) = FunctionName::from_name(word) {
                if self.peek_at_is_lparen() {
                    let call = self.function_call(name)?;
                    // size(x) is numeric and must be compared
                    if name == FunctionName::Size {
                        return self.comparison_tail(call);
                    }
                    return Ok(call);
                }
            }
        }

        let operand = self.operand()?;
        self.comparison_tail(operand)
    }

    fn comparison_tail(&mut self, lhs: Expr) -> Result<Expr> {
        let op = match self.current().kind {
            TokenKind::Op(Op::Eq) => Some(CompareOp::Eq),
            TokenKind::Op(Op::Ne) => Some(CompareOp::Ne),
            TokenKind::Op(Op::Lt) => Some(CompareOp::Lt),
            TokenKind::Op(Op::Le) => Some(CompareOp::Le),
            TokenKind::Op(Op::Gt) => Some(CompareOp::Gt),
            TokenKind::Op(Op::Ge) => Some(CompareOp::Ge),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let rhs = self.operand()?;
            // Non-associative: a second comparison operator is an error
            if matches!(self.current().kind, TokenKind::Op(Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge))
            {
                return Err(self.error("AND, OR, or end of expression (comparisons do not chain)"));
            }
            return Ok(Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }

        if self.accept_keyword("BETWEEN") {
            let low = self.operand()?;
            self.expect_keyword("AND")?;
            let high = self.operand()?;
            return Ok(Expr::Between {
                value: Box::new(lhs),
                low: Box::new(low),
                high: Box::new(high),
            });
        }

        if self.accept_keyword("IN") {
            self.expect_punct('(')?;
            let mut list = Vec::new();
            loop {
                list.push(self.operand()?);
                if !self.accept_punct(',') {
                    break;
                }
            }
            self.expect_punct(')')?;
            return Ok(Expr::In {
                value: Box::new(lhs),
                list,
            });
        }

        if self.accept_keyword("IS") {
            let negated = self.accept_keyword("NOT");
            if self.current().kind == TokenKind::Null {
                self.advance();
                return Ok(Expr::IsNull {
                    value: Box::new(lhs),
                    negated,
                });
            }
            return Err(self.error("NULL"));
        }

        Err(self.error("a comparison operator, BETWEEN, IN, or IS"))
    }

    fn peek_at_is_lparen(&self) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|t| t.kind == TokenKind::Punct('('))
    }

    fn function_call(&mut self, name: FunctionName) -> Result<Expr> {
        self.advance(); // function name
        self.expect_punct('(')?;
        let mut args = Vec::new();

        match name {
            FunctionName::AttributeExists | FunctionName::AttributeNotExists => {
                args.push(Expr::Attr(self.attribute_path()?));
            }
            FunctionName::Size => {
                args.push(Expr::Attr(self.attribute_path()?));
            }
            FunctionName::BeginsWith | FunctionName::Contains => {
                args.push(Expr::Attr(self.attribute_path()?));
                self.expect_punct(',')?;
                args.push(self.operand()?);
            }
            FunctionName::AttributeType => {
                args.push(Expr::Attr(self.attribute_path()?));
                self.expect_punct(',')?;
                let (ty, _) = self.expect_word("a type tag (S, N, B, BOOL, NULL, L, M, SS, NS, BS)")?;
                args.push(Expr::Literal(Literal::S(ty.to_ascii_uppercase())));
            }
        }
        self.expect_punct(')')?;
        Ok(Expr::Function { name, args })
    }

    /// An operand: a literal or an attribute path (or `size(path)`).
    fn operand(&mut self) -> Result<Expr> {
        if let Some(word) = self.current().as_word() {
            if word.eq_ignore_ascii_case("size") && self.peek_at_is_lparen() {
                return self.function_call(FunctionName::Size);
            }
        }
        if self.peek_literal() {
            return Ok(Expr::Literal(self.literal()?));
        }
        if self.current().as_word().is_some() {
            return Ok(Expr::Attr(self.attribute_path()?));
        }
        Err(self.error("a literal or attribute"))
    }

    fn peek_literal(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Str(_)
                | TokenKind::Number
                | TokenKind::Binary(_)
                | TokenKind::Bool(_)
                | TokenKind::Null
                | TokenKind::Punct('[')
                | TokenKind::Punct('{')
                | TokenKind::Punct('(')
                | TokenKind::Op(Op::Minus)
                | TokenKind::Op(Op::Plus)
        )
    }

    fn literal(&mut self) -> Result<Literal> {
        let token = self.current().clone();
        match &token.kind {
            TokenKind::Str(s) => {
                let value = s.clone();
                self.advance();
                Ok(Literal::S(value))
            }
            TokenKind::Number => {
                self.advance();
                Ok(Literal::N(token.lexeme))
            }
            TokenKind::Op(Op::Minus) => {
                self.advance();
                match &self.current().kind {
                    TokenKind::Number => {
                        let number = self.advance();
                        Ok(Literal::N(format!("-{}", number.lexeme)))
                    }
                    _ => Err(self.error("a number")),
                }
            }
            TokenKind::Op(Op::Plus) => {
                self.advance();
                match &self.current().kind {
                    TokenKind::Number => {
                        let number = self.advance();
                        Ok(Literal::N(number.lexeme))
                    }
                    _ => Err(self.error("a number")),
                }
            }
            TokenKind::Binary(bytes) => {
                let value = bytes.clone();
                self.advance();
                Ok(Literal::B(value))
            }
            TokenKind::Bool(b) => {
                let value = *b;
                self.advance();
                Ok(Literal::Bool(value))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Literal::Null)
            }
            TokenKind::Punct('[') => self.list_literal(),
            TokenKind::Punct('{') => self.map_literal(),
            TokenKind::Punct('(') => self.set_literal(),
            _ => Err(self.error("a literal")),
        }
    }

    fn list_literal(&mut self) -> Result<Literal> {
        self.expect_punct('[')?;
        let mut items = Vec::new();
        if !self.accept_punct(']') {
            loop {
                items.push(self.literal()?);
                if !self.accept_punct(',') {
                    break;
                }
            }
            self.expect_punct(']')?;
        }
        Ok(Literal::L(items))
    }

    fn map_literal(&mut self) -> Result<Literal> {
        self.expect_punct('{')?;
        let mut pairs = Vec::new();
        if !self.accept_punct('}') {
            loop {
                let key = self.expect_string("a quoted map key")?;
                self.expect_punct(':')?;
                let value = self.literal()?;
                pairs.push((key, value));
                if !self.accept_punct(',') {
                    break;
                }
            }
            self.expect_punct('}')?;
        }
        Ok(Literal::M(pairs))
    }

    /// Parenthesized tuple denoting a set. Element types must be uniform.
    fn set_literal(&mut self) -> Result<Literal> {
        let offset = self.current().offset;
        self.expect_punct('(')?;
        let mut items = Vec::new();
        loop {
            items.push(self.literal()?);
            if !self.accept_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;

        let mut strings = Vec::new();
        let mut numbers = Vec::new();
        let mut blobs = Vec::new();
        for item in &items {
            match item {
                Literal::S(s) => strings.push(s.clone()),
                Literal::N(n) => numbers.push(n.clone()),
                Literal::B(b) => blobs.push(b.clone()),
                _ => {
                    return Err(Error::parse(
                        offset,
                        "set elements to be strings, numbers, or binary",
                        "a non-scalar element",
                    ))
                }
            }
        }
        match (strings.len(), numbers.len(), blobs.len()) {
            (n, 0, 0) if n == items.len() => Ok(Literal::Ss(strings)),
            (0, n, 0) if n == items.len() => Ok(Literal::Ns(numbers)),
            (0, 0, n) if n == items.len() => Ok(Literal::Bs(blobs)),
            _ => Err(Error::parse(
                offset,
                "set elements of a single scalar type",
                "mixed element types",
            )),
        }
    }
}
