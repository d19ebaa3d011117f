//! Statement correction: turn raw model output into an executable,
//! idempotent upsert program.

use tracing::debug;

use super::decode::repair_encoding;
use super::parser::{parse_script, ParseMode};
use super::program::{CorrectionReport, ParsedProgram};
use super::rules::{RuleError, RuleSet};
use crate::schema::GraphSchema;

/// Result of correcting one piece of generated text.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    /// Corrected statements, or the decoded input when nothing parsed.
    pub text: String,
    /// `None` when no node upsert could be recovered.
    pub program: Option<ParsedProgram>,
    pub report: CorrectionReport,
}

impl Correction {
    pub fn is_structured(&self) -> bool {
        self.program.is_some()
    }
}

/// Rule-driven corrector for generated upsert statements.
///
/// Correction never fails: when no node upserts can be recovered the
/// output is the encoding-repaired input, and validation downstream
/// decides whether it is usable.
#[derive(Debug, Clone)]
pub struct StatementCorrector {
    rules: RuleSet,
    complete_required_links: bool,
}

impl StatementCorrector {
    /// Build a corrector from a rule table, rejecting inconsistent tables.
    pub fn new(rules: RuleSet) -> Result<Self, RuleError> {
        rules.validate()?;
        Ok(Self {
            rules,
            complete_required_links: true,
        })
    }

    pub fn financial() -> Self {
        Self {
            rules: RuleSet::financial(),
            complete_required_links: true,
        }
    }

    /// Enable or disable synthesis of missing required links.
    pub fn with_completion(mut self, enabled: bool) -> Self {
        self.complete_required_links = enabled;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn correct(&self, text: &str, schema: Option<&GraphSchema>) -> Correction {
        let decoded = repair_encoding(text);
        let statements = match parse_script(&decoded, ParseMode::Lenient) {
            Ok(statements) => statements,
            Err(e) => {
                debug!(error = %e, "statement text did not parse; passing through");
                return Correction {
                    text: decoded,
                    program: None,
                    report: CorrectionReport::default(),
                };
            }
        };

        let (mut program, mut report) = ParsedProgram::collect(&statements);
        if program.nodes.is_empty() {
            debug!(
                unparsed = report.unparsed_fragments,
                "no node upserts recovered; passing through"
            );
            return Correction {
                text: decoded,
                program: None,
                report,
            };
        }

        program.canonicalize(&self.rules, &mut report);
        if self.complete_required_links {
            program.complete(&self.rules, &mut report);
            // Synthesized links follow the same direction table.
            program.canonicalize(&self.rules, &mut report);
        }
        program.dedupe_edges(&mut report);
        program.synthesize_constraints(schema);

        debug!(
            nodes = program.nodes.len(),
            edges = program.edges.len(),
            renamed = report.renamed_edges,
            flipped = report.flipped_edges,
            synthesized = report.synthesized_edges,
            dropped_nodes = report.dropped_nodes,
            dropped_edges = report.dropped_edges,
            "corrected statements"
        );

        Correction {
            text: program.render(&self.rules),
            program: Some(program),
            report,
        }
    }
}
