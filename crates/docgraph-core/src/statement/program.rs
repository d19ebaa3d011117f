//! Normalized upsert program: the corrector's intermediate form.
//!
//! ```text
//!   parsed statements
//!        │  collect()        hoist inline nodes, resolve variables,
//!        ▼                   coerce reads, drop keyless / dangling
//!   ParsedProgram
//!        │  canonicalize()   aliases + direction flips
//!        │  complete()       synthesize missing required links
//!        │  dedupe_edges()
//!        ▼
//!   render()                 constraints │ nodes │ relationships
//! ```
//!
//! Nodes are identified by `(label, key property, key value)`; edges by
//! `(from, type, to)`. Variables are reassigned from label prefixes at
//! render time, so rendering a program and collecting the result again
//! yields the same program.

use std::collections::{HashMap, HashSet};

use super::ast::{render_ident, Clause, Direction, Intent, Literal, NodePattern, SetItem, Statement};
use super::rules::RuleSet;
use crate::schema::{identifier_property, GraphSchema};

#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpsert {
    pub label: String,
    pub key: String,
    pub value: Literal,
    /// Non-key properties, first value wins.
    pub properties: Vec<(String, Literal)>,
    /// Intent of the pattern that first introduced the node.
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeUpsert {
    pub from: usize,
    pub rel_type: String,
    pub to: usize,
    pub properties: Vec<(String, Literal)>,
    pub synthesized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSpec {
    pub label: String,
    pub property: String,
}

impl ConstraintSpec {
    pub fn name(&self) -> String {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect()
        };
        format!(
            "{}_{}_unique",
            sanitize(&self.label.to_lowercase()),
            sanitize(&self.property)
        )
    }

    pub fn render(&self) -> String {
        format!(
            "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE;",
            self.name(),
            render_ident(&self.label),
            render_ident(&self.property)
        )
    }
}

/// Counts of what collection and canonicalization changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionReport {
    pub unparsed_fragments: usize,
    pub dropped_nodes: usize,
    pub dropped_edges: usize,
    pub coerced_reads: usize,
    pub merged_nodes: usize,
    pub renamed_edges: usize,
    pub flipped_edges: usize,
    pub synthesized_edges: usize,
    pub duplicate_edges: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedProgram {
    pub constraints: Vec<ConstraintSpec>,
    pub nodes: Vec<NodeUpsert>,
    pub edges: Vec<EdgeUpsert>,
}

enum Endpoint {
    Resolved(usize),
    Pending(String),
    Dead,
}

struct PendingEdge {
    from: Endpoint,
    rel_type: String,
    to: Endpoint,
    properties: Vec<(String, Literal)>,
}

#[derive(Default)]
struct Collector {
    nodes: Vec<NodeUpsert>,
    identity: HashMap<(String, String, String), usize>,
    bindings: HashMap<String, usize>,
    dead: HashSet<String>,
    edges: Vec<PendingEdge>,
    report: CorrectionReport,
}

impl Collector {
    fn node(&mut self, pattern: &NodePattern) -> Endpoint {
        let bound = pattern.var.as_ref().and_then(|v| self.bindings.get(v)).copied();

        let (Some(label), false) = (pattern.label(), pattern.properties.is_empty()) else {
            // Bare reference: `(a)` or `(a:Label)` without a key.
            return match (&pattern.var, bound) {
                (Some(_), Some(idx)) => Endpoint::Resolved(idx),
                (Some(var), None) if pattern.labels.is_empty() && !self.dead.contains(var) => {
                    Endpoint::Pending(var.clone())
                }
                _ => {
                    if pattern.label().is_some() {
                        self.report.dropped_nodes += 1;
                    }
                    if let Some(var) = &pattern.var {
                        self.dead.insert(var.clone());
                    }
                    Endpoint::Dead
                }
            };
        };

        let names: Vec<&str> = pattern.properties.iter().map(|(k, _)| k.as_str()).collect();
        let key = identifier_property(label, &names).unwrap_or(names[0]);
        let value = pattern
            .properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or(Literal::Null);
        if !value.is_key_value() {
            self.report.dropped_nodes += 1;
            if let Some(var) = &pattern.var {
                self.bindings.remove(var);
                self.dead.insert(var.clone());
            }
            return Endpoint::Dead;
        }

        let identity = (label.to_string(), key.to_string(), value.to_string());
        let idx = match self.identity.get(&identity) {
            Some(&idx) => {
                self.report.merged_nodes += 1;
                idx
            }
            None => {
                if pattern.intent == Intent::Read {
                    self.report.coerced_reads += 1;
                }
                self.nodes.push(NodeUpsert {
                    label: label.to_string(),
                    key: key.to_string(),
                    value,
                    properties: Vec::new(),
                    intent: pattern.intent,
                });
                self.identity.insert(identity, self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };
        for (name, value) in &pattern.properties {
            if name != key {
                add_property(&mut self.nodes[idx], name, value);
            }
        }
        if let Some(var) = &pattern.var {
            self.bindings.insert(var.clone(), idx);
            self.dead.remove(var);
        }
        Endpoint::Resolved(idx)
    }

    fn set(&mut self, items: &[SetItem]) {
        for item in items {
            if let Some(&idx) = self.bindings.get(&item.var) {
                add_property(&mut self.nodes[idx], &item.property, &item.value);
            }
        }
    }

    fn statement(&mut self, statement: &Statement) {
        for clause in &statement.clauses {
            match clause {
                Clause::Match { patterns, .. } | Clause::Create(patterns) => {
                    for pattern in patterns {
                        self.pattern(pattern);
                    }
                }
                Clause::Merge { pattern, on_set } => {
                    self.pattern(pattern);
                    self.set(on_set);
                }
                Clause::Set(items) => self.set(items),
                Clause::Unparsed(_) => self.report.unparsed_fragments += 1,
                // Constraints are regenerated; read-only clauses carry no upserts.
                _ => {}
            }
        }
    }

    fn pattern(&mut self, pattern: &super::ast::Pattern) {
        let mut previous = self.node(&pattern.start);
        for (rel, node) in &pattern.hops {
            let next = self.node(node);
            let from = std::mem::replace(&mut previous, next);
            let to = self.endpoint_copy(&previous);
            match &rel.rel_type {
                Some(rel_type) => {
                    let (from, to) = match rel.direction {
                        Direction::Incoming => (to, from),
                        Direction::Outgoing | Direction::Undirected => (from, to),
                    };
                    self.edges.push(PendingEdge {
                        from,
                        rel_type: rel_type.clone(),
                        to,
                        properties: rel.properties.clone(),
                    });
                }
                None => self.report.dropped_edges += 1,
            }
        }
    }

    fn endpoint_copy(&self, endpoint: &Endpoint) -> Endpoint {
        match endpoint {
            Endpoint::Resolved(i) => Endpoint::Resolved(*i),
            Endpoint::Pending(v) => match self.bindings.get(v) {
                Some(&i) => Endpoint::Resolved(i),
                None => Endpoint::Pending(v.clone()),
            },
            Endpoint::Dead => Endpoint::Dead,
        }
    }

    fn finish(mut self) -> (ParsedProgram, CorrectionReport) {
        let mut edges = Vec::new();
        for pending in std::mem::take(&mut self.edges) {
            let resolve = |e: &Endpoint| match e {
                Endpoint::Resolved(i) => Some(*i),
                Endpoint::Pending(v) => self.bindings.get(v).copied(),
                Endpoint::Dead => None,
            };
            match (resolve(&pending.from), resolve(&pending.to)) {
                (Some(from), Some(to)) => edges.push(EdgeUpsert {
                    from,
                    rel_type: pending.rel_type,
                    to,
                    properties: pending.properties,
                    synthesized: false,
                }),
                _ => self.report.dropped_edges += 1,
            }
        }
        let program = ParsedProgram {
            constraints: Vec::new(),
            nodes: self.nodes,
            edges,
        };
        (program, self.report)
    }
}

fn add_property(node: &mut NodeUpsert, name: &str, value: &Literal) {
    if name == node.key || node.properties.iter().any(|(k, _)| k == name) {
        return;
    }
    node.properties.push((name.to_string(), value.clone()));
}

impl ParsedProgram {
    /// Build a program from leniently parsed statements.
    ///
    /// Inline node declarations inside relationship patterns become node
    /// upserts. Variables resolve to the binding in effect where they are
    /// used, falling back to the last binding in the input.
    pub fn collect(statements: &[Statement]) -> (Self, CorrectionReport) {
        let mut collector = Collector::default();
        for statement in statements {
            collector.statement(statement);
        }
        collector.finish()
    }

    /// Apply relationship aliases and canonical directions.
    pub fn canonicalize(&mut self, rules: &RuleSet, report: &mut CorrectionReport) {
        for edge in &mut self.edges {
            let canonical = rules.canonical_type(&edge.rel_type);
            if canonical != edge.rel_type {
                edge.rel_type = canonical;
                report.renamed_edges += 1;
            }
            let from_label = &self.nodes[edge.from].label;
            let to_label = &self.nodes[edge.to].label;
            if rules.is_reversed(&edge.rel_type, from_label, to_label) {
                std::mem::swap(&mut edge.from, &mut edge.to);
                report.flipped_edges += 1;
            }
        }
    }

    /// Link every subject node that lacks a required relationship to the
    /// first node of the target class.
    ///
    /// A link counts as present when any edge, in either direction and of
    /// any type, joins the subject to a node of the target class.
    pub fn complete(&mut self, rules: &RuleSet, report: &mut CorrectionReport) {
        for link in &rules.required_links {
            let in_class = |labels: &[String], node: &NodeUpsert| labels.iter().any(|l| *l == node.label);
            for subject in 0..self.nodes.len() {
                if !in_class(&link.subject_labels, &self.nodes[subject]) {
                    continue;
                }
                let linked = self.edges.iter().any(|e| {
                    let other = if e.from == subject {
                        e.to
                    } else if e.to == subject {
                        e.from
                    } else {
                        return false;
                    };
                    other != subject && in_class(&link.target_labels, &self.nodes[other])
                });
                if linked {
                    continue;
                }
                let target = (0..self.nodes.len())
                    .find(|&i| i != subject && in_class(&link.target_labels, &self.nodes[i]));
                if let Some(target) = target {
                    let (from, to) = if link.subject_is_source {
                        (subject, target)
                    } else {
                        (target, subject)
                    };
                    self.edges.push(EdgeUpsert {
                        from,
                        rel_type: link.rel_type.clone(),
                        to,
                        properties: Vec::new(),
                        synthesized: true,
                    });
                    report.synthesized_edges += 1;
                }
            }
        }
    }

    /// Collapse edges with the same `(from, type, to)`, merging properties.
    pub fn dedupe_edges(&mut self, report: &mut CorrectionReport) {
        let mut seen: HashMap<(usize, String, usize), usize> = HashMap::new();
        let mut kept: Vec<EdgeUpsert> = Vec::with_capacity(self.edges.len());
        for edge in std::mem::take(&mut self.edges) {
            let identity = (edge.from, edge.rel_type.clone(), edge.to);
            match seen.get(&identity) {
                Some(&i) => {
                    report.duplicate_edges += 1;
                    for (name, value) in edge.properties {
                        if !kept[i].properties.iter().any(|(k, _)| *k == name) {
                            kept[i].properties.push((name, value));
                        }
                    }
                }
                None => {
                    seen.insert(identity, kept.len());
                    kept.push(edge);
                }
            }
        }
        self.edges = kept;
    }

    /// Uniqueness constraints from the schema, or inferred from the nodes
    /// when the schema yields none.
    pub fn synthesize_constraints(&mut self, schema: Option<&GraphSchema>) {
        let mut constraints = Vec::new();
        if let Some(schema) = schema {
            for node in schema.nodes() {
                if let Some(prop) = identifier_property(&node.label, &node.properties) {
                    push_unique(&mut constraints, &node.label, prop);
                }
            }
        }
        if constraints.is_empty() {
            let mut labels: Vec<(&str, Vec<&str>)> = Vec::new();
            for node in &self.nodes {
                let names = std::iter::once(node.key.as_str())
                    .chain(node.properties.iter().map(|(k, _)| k.as_str()));
                match labels.iter_mut().find(|(l, _)| *l == node.label) {
                    Some((_, props)) => props.extend(names),
                    None => labels.push((node.label.as_str(), names.collect())),
                }
            }
            for (label, props) in &labels {
                if let Some(prop) = identifier_property(label, props) {
                    push_unique(&mut constraints, label, prop);
                }
            }
        }
        self.constraints = constraints;
    }

    /// Canonical variable names, one per node, from label prefixes.
    pub fn variables(&self, rules: &RuleSet) -> Vec<String> {
        let mut counters: HashMap<String, usize> = HashMap::new();
        self.nodes
            .iter()
            .map(|node| {
                let prefix = rules.prefix_for(&node.label);
                let n = counters.entry(prefix.clone()).or_insert(0);
                *n += 1;
                format!("{}{}", prefix, n)
            })
            .collect()
    }

    /// Render the program as three delimited sections.
    pub fn render(&self, rules: &RuleSet) -> String {
        let vars = self.variables(rules);
        let mut out = String::from("// constraints\n");
        for constraint in &self.constraints {
            out.push_str(&constraint.render());
            out.push('\n');
        }

        out.push_str("\n// nodes\n");
        for (node, var) in self.nodes.iter().zip(&vars) {
            out.push_str("MERGE ");
            out.push_str(&node_pattern(node, var));
            for (i, (name, value)) in node.properties.iter().enumerate() {
                out.push_str(if i == 0 { " SET " } else { ", " });
                out.push_str(&format!("{}.{} = {}", var, render_ident(name), value));
            }
            out.push_str(";\n");
        }

        out.push_str("\n// relationships\n");
        for edge in &self.edges {
            let (from_var, to_var) = (&vars[edge.from], &vars[edge.to]);
            out.push_str(&format!("MATCH {}", node_pattern(&self.nodes[edge.from], from_var)));
            if edge.to != edge.from {
                out.push_str(&format!(" MATCH {}", node_pattern(&self.nodes[edge.to], to_var)));
            }
            out.push_str(&format!(
                " MERGE ({})-[:{}{}]->({});\n",
                from_var,
                render_ident(&edge.rel_type),
                relationship_properties(&edge.properties),
                to_var
            ));
        }
        out
    }
}

fn push_unique(constraints: &mut Vec<ConstraintSpec>, label: &str, property: &str) {
    if !constraints.iter().any(|c| c.label == label) {
        constraints.push(ConstraintSpec {
            label: label.to_string(),
            property: property.to_string(),
        });
    }
}

fn node_pattern(node: &NodeUpsert, var: &str) -> String {
    format!(
        "({}:{} {{{}: {}}})",
        var,
        render_ident(&node.label),
        render_ident(&node.key),
        node.value
    )
}

fn relationship_properties(properties: &[(String, Literal)]) -> String {
    if properties.is_empty() {
        return String::new();
    }
    let body: Vec<String> = properties
        .iter()
        .map(|(k, v)| format!("{}: {}", render_ident(k), v))
        .collect();
    format!(" {{{}}}", body.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::parser::{parse_script, ParseMode};

    fn collect(source: &str) -> (ParsedProgram, CorrectionReport) {
        ParsedProgram::collect(&parse_script(source, ParseMode::Lenient).unwrap())
    }

    #[test]
    fn test_inline_nodes_hoisted_and_deduplicated() {
        let (program, report) = collect(
            r#"MERGE (a:Account {accountId: "A1"})-[:HAS_POSITION]->(p:Position {positionId: "P1"});
               MERGE (b:Account {accountId: "A1", name: "Main"})"#,
        );
        assert_eq!(program.nodes.len(), 2);
        assert_eq!(program.edges.len(), 1);
        assert_eq!(report.merged_nodes, 1);
        assert_eq!(
            program.nodes[0].properties,
            vec![("name".to_string(), Literal::String("Main".into()))]
        );
    }

    #[test]
    fn test_first_property_value_wins() {
        let (program, _) = collect(
            r#"MERGE (a:Account {accountId: "A1", name: "First"});
               MERGE (b:Account {accountId: "A1", name: "Second"});
               SET b.name = "Third""#,
        );
        assert_eq!(
            program.nodes[0].properties,
            vec![("name".to_string(), Literal::String("First".into()))]
        );
    }

    #[test]
    fn test_forward_reference_resolves_at_end() {
        let (program, report) = collect(
            r#"MERGE (a)-[:HAS_POSITION]->(p);
               MERGE (a:Account {accountId: "A1"});
               MERGE (p:Position {positionId: "P1"})"#,
        );
        assert_eq!(program.edges.len(), 1);
        assert_eq!(report.dropped_edges, 0);
    }

    #[test]
    fn test_variable_rebinding_uses_point_of_use() {
        let (program, _) = collect(
            r#"MERGE (a:Account {accountId: "A1"}) MERGE (p:Position {positionId: "P1"}) MERGE (a)-[:HAS_POSITION]->(p);
               MERGE (a:Account {accountId: "A2"}) MERGE (p:Position {positionId: "P2"}) MERGE (a)-[:HAS_POSITION]->(p)"#,
        );
        assert_eq!(program.edges.len(), 2);
        assert_eq!((program.edges[0].from, program.edges[0].to), (0, 1));
        assert_eq!((program.edges[1].from, program.edges[1].to), (2, 3));
    }

    #[test]
    fn test_keyless_and_dangling_dropped() {
        let (program, report) = collect(
            r#"MERGE (x:Account);
               MERGE (a:Account {accountId: $id});
               MERGE (s:Security {securityId: "S1"});
               MERGE (ghost)-[:IN_SECURITY]->(s);
               MERGE (x)-[:HAS_POSITION]->(s)"#,
        );
        assert_eq!(program.nodes.len(), 1);
        assert!(program.edges.is_empty());
        assert_eq!(report.dropped_nodes, 2);
        assert_eq!(report.dropped_edges, 2);
    }

    #[test]
    fn test_incoming_normalized_to_outgoing() {
        let (program, _) = collect(
            r#"MERGE (p:Position {positionId: "P1"})<-[:HAS_POSITION]-(a:Account {accountId: "A1"})"#,
        );
        let edge = &program.edges[0];
        assert_eq!(program.nodes[edge.from].label, "Account");
        assert_eq!(program.nodes[edge.to].label, "Position");
    }

    #[test]
    fn test_match_nodes_coerced_to_upserts() {
        let (program, report) = collect(
            r#"MATCH (a:Account {accountId: "A1"}), (s:Security {securityId: "S1"})
               MERGE (a)-[:HOLDS]->(s)"#,
        );
        assert_eq!(program.nodes.len(), 2);
        assert_eq!(report.coerced_reads, 2);
        assert!(program.nodes.iter().all(|n| n.intent == Intent::Read));
    }

    #[test]
    fn test_canonicalize_alias_then_flip() {
        let (mut program, mut report) = collect(
            r#"MERGE (s:Security {securityId: "S1"})-[:HELD_IN_POSITION]->(p:Position {positionId: "P1"})"#,
        );
        program.canonicalize(&RuleSet::financial(), &mut report);
        let edge = &program.edges[0];
        assert_eq!(edge.rel_type, "IN_SECURITY");
        assert_eq!(program.nodes[edge.from].label, "Position");
        assert_eq!((report.renamed_edges, report.flipped_edges), (1, 1));
    }

    #[test]
    fn test_completion_links_first_target() {
        let (mut program, mut report) = collect(
            r#"MERGE (i:Investment {investmentId: "I1"});
               MERGE (s1:Security {securityId: "S1"});
               MERGE (s2:Security {securityId: "S2"})"#,
        );
        program.complete(&RuleSet::financial(), &mut report);
        assert_eq!(program.edges.len(), 1);
        assert_eq!((program.edges[0].from, program.edges[0].to), (0, 1));
        assert!(program.edges[0].synthesized);
    }

    #[test]
    fn test_completion_respects_existing_link_of_any_type() {
        let (mut program, mut report) = collect(
            r#"MERGE (s:Security {securityId: "S1"})-[:MENTIONED_WITH]->(i:Investment {investmentId: "I1"})"#,
        );
        program.complete(&RuleSet::financial(), &mut report);
        assert_eq!(program.edges.len(), 1);
        assert_eq!(report.synthesized_edges, 0);
    }

    #[test]
    fn test_completion_without_target_does_nothing() {
        let (mut program, mut report) = collect(r#"MERGE (t:Trade {tradeId: "T1"})"#);
        program.complete(&RuleSet::financial(), &mut report);
        assert!(program.edges.is_empty());
    }

    #[test]
    fn test_dedupe_edges_merges_properties() {
        let (mut program, mut report) = collect(
            r#"MERGE (a:Account {accountId: "A1"})-[:HAS_POSITION {since: 2020}]->(p:Position {positionId: "P1"});
               MERGE (a)-[:HAS_POSITION {since: 2021, weight: 1}]->(p)"#,
        );
        program.dedupe_edges(&mut report);
        assert_eq!(program.edges.len(), 1);
        assert_eq!(report.duplicate_edges, 1);
        assert_eq!(
            program.edges[0].properties,
            vec![
                ("since".to_string(), Literal::Integer(2020)),
                ("weight".to_string(), Literal::Integer(1)),
            ]
        );
    }

    #[test]
    fn test_constraints_from_schema_then_inferred() {
        let (mut program, _) = collect(r#"MERGE (a:Account {accountId: "A1", accountType: "IRA"})"#);
        let mut schema = GraphSchema::new();
        schema.add_node("Trade", &["tradeId", "quantity"]);
        program.synthesize_constraints(Some(&schema));
        assert_eq!(program.constraints.len(), 1);
        assert_eq!(program.constraints[0].label, "Trade");

        program.synthesize_constraints(Some(&GraphSchema::new()));
        assert_eq!(
            program.constraints,
            vec![ConstraintSpec {
                label: "Account".into(),
                property: "accountId".into()
            }]
        );
    }

    #[test]
    fn test_schema_yields_one_constraint_on_identifier() {
        let (mut program, _) = collect(r#"MERGE (a:Account {accountId: "A1", accountType: "IRA"})"#);
        let mut schema = GraphSchema::new();
        schema.add_node("Account", &["accountId", "accountType"]);
        program.synthesize_constraints(Some(&schema));
        assert_eq!(
            program.constraints,
            vec![ConstraintSpec {
                label: "Account".into(),
                property: "accountId".into()
            }]
        );
        let text = program.render(&RuleSet::financial());
        assert_eq!(text.matches("CREATE CONSTRAINT").count(), 1);
        assert!(text.contains("REQUIRE n.accountId IS UNIQUE"));
    }

    #[test]
    fn test_render_sections_and_variables() {
        let (mut program, _) = collect(
            r#"MERGE (x:Account {accountId: "A1", accountType: "IRA"})-[:HAS_POSITION]->(y:Position {positionId: "P1"})"#,
        );
        program.synthesize_constraints(None);
        let text = program.render(&RuleSet::financial());
        assert!(text.starts_with("// constraints\nCREATE CONSTRAINT account_accountId_unique IF NOT EXISTS FOR (n:Account) REQUIRE n.accountId IS UNIQUE;"));
        assert!(text.contains(
            "MERGE (acc1:Account {accountId: \"A1\"}) SET acc1.accountType = \"IRA\";"
        ));
        assert!(text.contains(
            "MATCH (acc1:Account {accountId: \"A1\"}) MATCH (pos1:Position {positionId: \"P1\"}) MERGE (acc1)-[:HAS_POSITION]->(pos1);"
        ));
        let nodes_at = text.find("// nodes").unwrap();
        let rels_at = text.find("// relationships").unwrap();
        assert!(nodes_at < rels_at);
    }

    #[test]
    fn test_self_loop_renders_single_match() {
        let (program, _) = collect(r#"MERGE (a:Account {accountId: "A1"})-[:LINKED]->(a)"#);
        let text = program.render(&RuleSet::empty());
        assert!(text.contains(
            "MATCH (a1:Account {accountId: \"A1\"}) MERGE (a1)-[:LINKED]->(a1);"
        ));
    }
}
