//! Recursive-descent parser for the upsert-statement subset.
//!
//! Two modes share one grammar:
//!
//! | Mode | Unknown input | Used by |
//! |------|---------------|---------|
//! | [`ParseMode::Strict`] | error | graph validation, in-memory graph |
//! | [`ParseMode::Lenient`] | kept as [`Clause::Unparsed`] and skipped | statement correction |

use super::ast::*;
use super::lexer::{tokenize, tokenize_lenient, Spanned, Token};
use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Strict,
    Lenient,
}

/// Keywords that start a clause.
const CLAUSE_KEYWORDS: &[&str] = &[
    "MATCH", "OPTIONAL", "MERGE", "CREATE", "SET", "WHERE", "WITH", "RETURN", "UNWIND", "DELETE",
    "DETACH", "REMOVE", "ORDER", "SKIP", "LIMIT", "DROP", "CALL", "FOREACH", "UNION", "LOAD",
];

/// Clauses kept as raw source text.
const RAW_CLAUSES: &[&str] = &[
    "WHERE", "WITH", "RETURN", "UNWIND", "DELETE", "DETACH", "REMOVE", "ORDER", "SKIP", "LIMIT",
    "CALL", "FOREACH", "UNION", "LOAD",
];

const INDEX_KINDS: &[&str] = &[
    "RANGE", "TEXT", "POINT", "LOOKUP", "FULLTEXT", "VECTOR", "BTREE",
];

/// Parse a `;`-separated script into statements. Empty statements are skipped.
pub fn parse_script(source: &str, mode: ParseMode) -> Result<Vec<Statement>, ParseError> {
    let tokens = match mode {
        ParseMode::Strict => tokenize(source)?,
        ParseMode::Lenient => tokenize_lenient(source),
    };
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        mode,
    };
    let mut statements = Vec::new();
    loop {
        while parser.eat(&Token::Semicolon) {}
        if parser.at_end() {
            break;
        }
        let statement = parser.statement()?;
        if !statement.clauses.is_empty() {
            statements.push(statement);
        }
    }
    Ok(statements)
}

/// Parse exactly one statement; a trailing `;` is allowed.
pub fn parse_statement(source: &str, mode: ParseMode) -> Result<Statement, ParseError> {
    let mut statements = parse_script(source, mode)?;
    match statements.len() {
        0 => Err(ParseError::new("empty statement", 0)),
        1 => Ok(statements.remove(0)),
        n => Err(ParseError::new(
            format!("expected one statement, found {}", n),
            0,
        )),
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    mode: ParseMode,
}

impl<'a> Parser<'a> {
    // ── token helpers ───────────────────────────────────────────────────

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.start)
            .unwrap_or(self.source.len())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", token)))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", kw)))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let found = match self.peek() {
            Some(t) => format!(", found {:?}", t),
            None => ", found end of input".to_string(),
        };
        ParseError::new(format!("{}{}", message.into(), found), self.offset())
    }

    fn name(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(s)) | Some(Token::Quoted(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    /// Source text of tokens `from..self.pos`.
    fn text_since(&self, from: usize) -> String {
        if from >= self.pos || from >= self.tokens.len() {
            return String::new();
        }
        let start = self.tokens[from].start;
        let end = self.tokens[self.pos - 1].end;
        self.source[start..end].to_string()
    }

    fn at_clause_start(&self) -> bool {
        let after_dot = self.pos > 0 && self.tokens[self.pos - 1].token == Token::Dot;
        !after_dot && CLAUSE_KEYWORDS.iter().any(|kw| self.at_keyword(kw))
    }

    /// Skip to the next clause keyword or `;` at nesting depth 0.
    fn skip_clause_body(&mut self) {
        let mut depth = 0i32;
        while let Some(token) = self.peek() {
            match token {
                Token::Semicolon if depth == 0 => break,
                Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => depth -= 1,
                _ if depth <= 0 && self.at_clause_start() => break,
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn skip_to_statement_end(&mut self) {
        while let Some(token) = self.peek() {
            if *token == Token::Semicolon {
                break;
            }
            self.pos += 1;
        }
    }

    // ── statements and clauses ──────────────────────────────────────────

    fn statement(&mut self) -> Result<Statement, ParseError> {
        if !self.eat_keyword("EXPLAIN") {
            self.eat_keyword("PROFILE");
        }
        let mut statement = Statement::default();
        while !self.at_end() && self.peek() != Some(&Token::Semicolon) {
            let start = self.pos;
            match self.clause() {
                Ok(clause) => statement.clauses.push(clause),
                Err(err) if self.mode == ParseMode::Strict => return Err(err),
                Err(_) => {
                    self.pos = start + 1;
                    self.skip_clause_body();
                    statement.clauses.push(Clause::Unparsed(self.text_since(start)));
                }
            }
        }
        Ok(statement)
    }

    fn clause(&mut self) -> Result<Clause, ParseError> {
        if self.eat_keyword("MATCH") {
            return Ok(Clause::Match {
                optional: false,
                patterns: self.pattern_list(Intent::Read)?,
            });
        }
        if self.eat_keyword("OPTIONAL") {
            self.expect_keyword("MATCH")?;
            return Ok(Clause::Match {
                optional: true,
                patterns: self.pattern_list(Intent::Read)?,
            });
        }
        if self.eat_keyword("MERGE") {
            let pattern = self.pattern(Intent::Write)?;
            let mut on_set = Vec::new();
            while self.eat_keyword("ON") {
                if !(self.eat_keyword("CREATE") || self.eat_keyword("MATCH")) {
                    return Err(self.error("expected CREATE or MATCH after ON"));
                }
                self.expect_keyword("SET")?;
                on_set.extend(self.set_items()?);
            }
            return Ok(Clause::Merge { pattern, on_set });
        }
        if self.at_keyword("CREATE") {
            let start = self.pos;
            self.pos += 1;
            if self.at_keyword("CONSTRAINT") {
                self.pos += 1;
                let checkpoint = self.pos;
                return match self.unique_constraint() {
                    Ok(c) => Ok(Clause::CreateConstraint(c)),
                    Err(_) => {
                        self.pos = checkpoint;
                        self.skip_to_statement_end();
                        Ok(Clause::Schema(self.text_since(start)))
                    }
                };
            }
            let index_kind = INDEX_KINDS.iter().any(|k| self.at_keyword(k))
                && self.peek_at(1).is_some_and(|t| t.is_keyword("INDEX"));
            if self.at_keyword("INDEX") || index_kind {
                self.skip_to_statement_end();
                return Ok(Clause::Schema(self.text_since(start)));
            }
            return Ok(Clause::Create(self.pattern_list(Intent::Write)?));
        }
        if self.eat_keyword("SET") {
            return Ok(Clause::Set(self.set_items()?));
        }
        if self.at_keyword("DROP") {
            let start = self.pos;
            self.pos += 1;
            if self.eat_keyword("CONSTRAINT") {
                let name = self.name()?;
                let if_exists = self.eat_keyword("IF");
                if if_exists {
                    self.expect_keyword("EXISTS")?;
                }
                return Ok(Clause::DropConstraint { name, if_exists });
            }
            self.skip_to_statement_end();
            return Ok(Clause::Schema(self.text_since(start)));
        }
        if let Some(keyword) = RAW_CLAUSES.iter().find(|kw| self.at_keyword(kw)) {
            let start = self.pos;
            self.pos += 1;
            self.skip_clause_body();
            return Ok(Clause::Other {
                keyword: keyword.to_string(),
                text: self.text_since(start),
            });
        }
        Err(self.error("expected a clause"))
    }

    /// `[name] [IF NOT EXISTS] FOR|ON (v:Label) REQUIRE|ASSERT v.prop IS UNIQUE`
    fn unique_constraint(&mut self) -> Result<UniqueConstraint, ParseError> {
        let name = if !self.at_keyword("IF") && !self.at_keyword("FOR") && !self.at_keyword("ON")
        {
            Some(self.name()?)
        } else {
            None
        };
        let if_not_exists = self.eat_keyword("IF");
        if if_not_exists {
            self.expect_keyword("NOT")?;
            self.expect_keyword("EXISTS")?;
        }
        if !(self.eat_keyword("FOR") || self.eat_keyword("ON")) {
            return Err(self.error("expected FOR"));
        }
        self.expect(&Token::LParen)?;
        self.name()?;
        self.expect(&Token::Colon)?;
        let label = self.name()?;
        self.expect(&Token::RParen)?;
        if !(self.eat_keyword("REQUIRE") || self.eat_keyword("ASSERT")) {
            return Err(self.error("expected REQUIRE"));
        }
        let parenthesized = self.eat(&Token::LParen);
        self.name()?;
        self.expect(&Token::Dot)?;
        let property = self.name()?;
        if parenthesized {
            self.expect(&Token::RParen)?;
        }
        self.expect_keyword("IS")?;
        self.expect_keyword("UNIQUE")?;
        if !self.at_end() && self.peek() != Some(&Token::Semicolon) {
            return Err(self.error("unexpected input after constraint"));
        }
        Ok(UniqueConstraint {
            name,
            label,
            property,
            if_not_exists,
        })
    }

    fn set_items(&mut self) -> Result<Vec<SetItem>, ParseError> {
        let mut items = Vec::new();
        loop {
            let var = self.name()?;
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let property = self.name()?;
                    self.expect(&Token::Eq)?;
                    let value = self.value()?;
                    items.push(SetItem {
                        var,
                        property,
                        value,
                    });
                }
                Some(Token::Eq) | Some(Token::PlusEq) => {
                    self.pos += 1;
                    for (property, value) in self.properties()? {
                        items.push(SetItem {
                            var: var.clone(),
                            property,
                            value,
                        });
                    }
                }
                Some(Token::Colon) => {
                    // Label assignment; labels are fixed by the node pattern.
                    while self.eat(&Token::Colon) {
                        self.name()?;
                    }
                }
                _ => return Err(self.error("expected property assignment")),
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    // ── patterns ────────────────────────────────────────────────────────

    fn pattern_list(&mut self, intent: Intent) -> Result<Vec<Pattern>, ParseError> {
        let mut patterns = vec![self.pattern(intent)?];
        while self.eat(&Token::Comma) {
            patterns.push(self.pattern(intent)?);
        }
        Ok(patterns)
    }

    fn pattern(&mut self, intent: Intent) -> Result<Pattern, ParseError> {
        // Path variable: `p = (a)-->(b)`
        if matches!(self.peek(), Some(Token::Ident(_))) && self.peek_at(1) == Some(&Token::Eq) {
            self.pos += 2;
        }
        let start = self.node(intent)?;
        let mut hops = Vec::new();
        while matches!(self.peek(), Some(Token::Dash) | Some(Token::Lt)) {
            let rel = self.relationship()?;
            let node = self.node(intent)?;
            hops.push((rel, node));
        }
        Ok(Pattern { start, hops })
    }

    fn node(&mut self, intent: Intent) -> Result<NodePattern, ParseError> {
        self.expect(&Token::LParen)?;
        let var = match self.peek() {
            Some(Token::Ident(_)) | Some(Token::Quoted(_)) => Some(self.name()?),
            _ => None,
        };
        let mut labels = Vec::new();
        while self.eat(&Token::Colon) {
            labels.push(self.name()?);
            while self.eat(&Token::Pipe) {
                self.eat(&Token::Colon);
                self.name()?;
            }
        }
        let properties = if self.peek() == Some(&Token::LBrace) {
            self.properties()?
        } else {
            Vec::new()
        };
        self.expect(&Token::RParen)?;
        Ok(NodePattern {
            var,
            labels,
            properties,
            intent,
        })
    }

    fn relationship(&mut self) -> Result<RelPattern, ParseError> {
        let incoming = self.eat(&Token::Lt);
        self.expect(&Token::Dash)?;
        let mut var = None;
        let mut rel_type = None;
        let mut properties = Vec::new();
        if self.eat(&Token::LBracket) {
            if matches!(self.peek(), Some(Token::Ident(_)) | Some(Token::Quoted(_))) {
                var = Some(self.name()?);
            }
            if self.eat(&Token::Colon) {
                rel_type = Some(self.name()?);
                while self.eat(&Token::Pipe) {
                    self.eat(&Token::Colon);
                    self.name()?;
                }
            }
            if self.eat(&Token::Star) {
                if self.mode == ParseMode::Strict {
                    return Err(self.error("variable-length relationships are not supported"));
                }
                while matches!(self.peek(), Some(Token::Number(_)) | Some(Token::Dot)) {
                    self.pos += 1;
                }
            }
            if self.peek() == Some(&Token::LBrace) {
                properties = self.properties()?;
            }
            self.expect(&Token::RBracket)?;
        }
        self.expect(&Token::Dash)?;
        let outgoing = self.eat(&Token::Gt);
        let direction = match (incoming, outgoing) {
            (false, true) => Direction::Outgoing,
            (true, false) => Direction::Incoming,
            (false, false) => Direction::Undirected,
            (true, true) => return Err(self.error("relationship cannot point both ways")),
        };
        Ok(RelPattern {
            var,
            rel_type,
            direction,
            properties,
        })
    }

    fn properties(&mut self) -> Result<Vec<(String, Literal)>, ParseError> {
        self.expect(&Token::LBrace)?;
        let mut props = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(props);
        }
        loop {
            let key = match self.peek() {
                Some(Token::Str(s)) => {
                    let s = s.clone();
                    self.pos += 1;
                    s
                }
                _ => self.name()?,
            };
            self.expect(&Token::Colon)?;
            props.push((key, self.value()?));
            if self.eat(&Token::RBrace) {
                break;
            }
            self.expect(&Token::Comma)?;
        }
        Ok(props)
    }

    fn value(&mut self) -> Result<Literal, ParseError> {
        let negative = self.eat(&Token::Dash);
        let value = match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.pos += 1;
                let n = if negative { format!("-{}", n) } else { n };
                match n.parse::<i64>() {
                    Ok(i) => Literal::Integer(i),
                    Err(_) => Literal::Float(n),
                }
            }
            _ if negative => return Err(self.error("expected a number after '-'")),
            Some(Token::Str(s)) => {
                self.pos += 1;
                Literal::String(s)
            }
            Some(Token::Param(p)) => {
                self.pos += 1;
                Literal::Parameter(p)
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.value()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                Literal::List(items)
            }
            Some(Token::Ident(word)) if self.peek_at(1) == Some(&Token::LParen) => {
                let start = self.pos;
                self.pos += 2;
                let mut depth = 1;
                while depth > 0 {
                    match self.advance() {
                        Some(Token::LParen) => depth += 1,
                        Some(Token::RParen) => depth -= 1,
                        Some(_) => {}
                        None => return Err(self.error(format!("unclosed call to {}", word))),
                    }
                }
                Literal::Expression(self.text_since(start))
            }
            Some(Token::Ident(word)) => {
                let literal = match word.to_ascii_lowercase().as_str() {
                    "true" => Literal::Boolean(true),
                    "false" => Literal::Boolean(false),
                    "null" => Literal::Null,
                    _ => return Err(self.error("expected a literal value")),
                };
                self.pos += 1;
                literal
            }
            _ => return Err(self.error("expected a literal value")),
        };
        Ok(value)
    }
}
