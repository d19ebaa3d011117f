//! Graph upsert statements: parsing, correction, and script handling.
//!
//! Generated statements arrive as free text. This module turns them into a
//! normalized, idempotent upsert program:
//!
//! | Step | Module |
//! |------|--------|
//! | Repair escaped edge operators | [`decode`] |
//! | Tokenize and parse the upsert subset | [`lexer`], [`parser`], [`ast`] |
//! | Hoist, resolve, canonicalize, complete, dedupe | [`program`] |
//! | Domain rule tables | [`rules`] |
//! | End-to-end correction | [`corrector`] |
//! | Splitting scripts for ingestion | [`script`] |

pub mod ast;
pub mod corrector;
pub mod decode;
pub mod lexer;
pub mod parser;
pub mod program;
pub mod rules;
pub mod script;

pub use ast::{Clause, Intent, Literal, Statement};
pub use corrector::{Correction, StatementCorrector};
pub use parser::{parse_script, parse_statement, ParseMode};
pub use program::{CorrectionReport, ParsedProgram};
pub use rules::{RuleError, RuleSet};
pub use script::{is_schema_statement, split_statements};

/// Syntax error with the byte offset where parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}
