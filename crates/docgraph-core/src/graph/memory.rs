//! In-memory [`GraphStore`] implementation for tests and local runs.
//!
//! Interprets the statement subset the pipeline emits: `MERGE`, `CREATE`,
//! `MATCH` / `OPTIONAL MATCH`, `SET`, unique constraints, and a small
//! read-only projection (`WHERE a.x = literal`, `RETURN`, `ORDER BY`,
//! `LIMIT`). Index statements are accepted and ignored.
//!
//! Transactions work on a private copy of the graph. Commit succeeds only
//! if nothing else committed since the transaction began; otherwise it
//! fails with [`GraphError::Conflict`], which callers treat as retryable.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{GraphError, GraphStore, GraphTransaction, MutationSummary, QueryRow};
use crate::statement::ast::{Clause, Direction, Literal, NodePattern, Pattern, SetItem, Statement};
use crate::statement::lexer::{tokenize, Token};
use crate::statement::parser::{parse_script, ParseMode};

type Properties = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
struct Node {
    labels: Vec<String>,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct Relationship {
    from: usize,
    rel_type: String,
    to: usize,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct Constraint {
    name: String,
    label: String,
    property: String,
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
    constraints: Vec<Constraint>,
    version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entity {
    Node(usize),
    Relationship(usize),
}

type Row = HashMap<String, Entity>;

/// Process-local property graph.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    state: Arc<Mutex<GraphState>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, GraphState>, GraphError> {
        self.state
            .lock()
            .map_err(|_| GraphError::Other("graph state lock poisoned".to_string()))
    }

    fn read<T>(&self, f: impl FnOnce(&GraphState) -> T) -> Option<T> {
        self.state.lock().ok().map(|state| f(&state))
    }

    pub fn node_count(&self) -> usize {
        self.read(|s| s.nodes.len()).unwrap_or(0)
    }

    pub fn relationship_count(&self) -> usize {
        self.read(|s| s.relationships.len()).unwrap_or(0)
    }

    pub fn constraint_names(&self) -> Vec<String> {
        self.read(|s| s.constraints.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Properties of every node carrying `label`, in creation order.
    pub fn nodes_with_label(&self, label: &str) -> Vec<Properties> {
        self.read(|s| {
            s.nodes
                .iter()
                .filter(|n| n.labels.iter().any(|l| l == label))
                .map(|n| n.properties.clone())
                .collect()
        })
        .unwrap_or_default()
    }

    /// Whether some `(:from_label)-[:rel_type]->(:to_label)` relationship exists.
    pub fn has_relationship(&self, from_label: &str, rel_type: &str, to_label: &str) -> bool {
        self.read(|s| {
            s.relationships.iter().any(|r| {
                r.rel_type == rel_type
                    && s.nodes[r.from].labels.iter().any(|l| l == from_label)
                    && s.nodes[r.to].labels.iter().any(|l| l == to_label)
            })
        })
        .unwrap_or(false)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn explain(&self, statement: &str) -> Result<(), GraphError> {
        parse(statement).map(|_| ())
    }

    async fn run_schema_statement(&self, statement: &str) -> Result<MutationSummary, GraphError> {
        let statements = parse(statement)?;
        let mut state = self.lock()?;
        let mut summary = MutationSummary::default();
        for stmt in &statements {
            if !stmt.is_schema() {
                return Err(GraphError::Unsupported(
                    "data statements must run inside a transaction".to_string(),
                ));
            }
            apply_schema(&mut state, stmt, &mut summary)?;
        }
        state.version += 1;
        Ok(summary)
    }

    async fn begin(&self) -> Result<Box<dyn GraphTransaction>, GraphError> {
        let state = self.lock()?;
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.state),
            base_version: state.version,
            working: state.clone(),
        }))
    }

    async fn query(&self, statement: &str) -> Result<Vec<QueryRow>, GraphError> {
        let statements = parse(statement)?;
        let [stmt] = statements.as_slice() else {
            return Err(GraphError::Unsupported(
                "queries must be a single statement".to_string(),
            ));
        };
        if !stmt.is_read_only() {
            return Err(GraphError::Unsupported("queries must be read-only".to_string()));
        }
        let mut snapshot = self.lock()?.clone();
        execute(&mut snapshot, stmt, &mut MutationSummary::default())
    }
}

pub struct InMemoryTransaction {
    shared: Arc<Mutex<GraphState>>,
    base_version: u64,
    working: GraphState,
}

#[async_trait]
impl GraphTransaction for InMemoryTransaction {
    async fn run(&mut self, statement: &str) -> Result<MutationSummary, GraphError> {
        let statements = parse(statement)?;
        let mut scratch = self.working.clone();
        let mut summary = MutationSummary::default();
        for stmt in &statements {
            if stmt.is_schema() {
                return Err(GraphError::Unsupported(
                    "schema statements cannot run inside a write transaction".to_string(),
                ));
            }
            execute(&mut scratch, stmt, &mut summary)?;
        }
        self.working = scratch;
        Ok(summary)
    }

    async fn commit(self: Box<Self>) -> Result<(), GraphError> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| GraphError::Other("graph state lock poisoned".to_string()))?;
        if shared.version != self.base_version {
            return Err(GraphError::Conflict(
                "graph changed since the transaction began".to_string(),
            ));
        }
        let mut working = self.working;
        working.version = self.base_version + 1;
        *shared = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), GraphError> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parsing and validation
// ═══════════════════════════════════════════════════════════════════════

fn parse(statement: &str) -> Result<Vec<Statement>, GraphError> {
    let statements =
        parse_script(statement, ParseMode::Strict).map_err(|e| GraphError::Syntax(e.to_string()))?;
    if statements.is_empty() {
        return Err(GraphError::Syntax("empty statement".to_string()));
    }
    for stmt in &statements {
        check_variables(stmt)?;
    }
    Ok(statements)
}

/// Reject `SET` on variables no earlier pattern introduced.
fn check_variables(stmt: &Statement) -> Result<(), GraphError> {
    fn define<'a>(pattern: &'a Pattern, defined: &mut HashSet<&'a str>) {
        let nodes = pattern.nodes().into_iter().filter_map(|n| n.var.as_deref());
        let rels = pattern.hops.iter().filter_map(|(r, _)| r.var.as_deref());
        defined.extend(nodes.chain(rels));
    }

    let mut defined: HashSet<&str> = HashSet::new();
    for clause in &stmt.clauses {
        let items: &[SetItem] = match clause {
            Clause::Match { patterns, .. } | Clause::Create(patterns) => {
                for pattern in patterns {
                    define(pattern, &mut defined);
                }
                &[]
            }
            Clause::Merge { pattern, on_set } => {
                define(pattern, &mut defined);
                on_set
            }
            Clause::Set(items) => items,
            _ => &[],
        };
        if let Some(item) = items.iter().find(|i| !defined.contains(i.var.as_str())) {
            return Err(GraphError::Syntax(format!(
                "variable `{}` not defined",
                item.var
            )));
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Execution
// ═══════════════════════════════════════════════════════════════════════

fn execute(
    state: &mut GraphState,
    stmt: &Statement,
    summary: &mut MutationSummary,
) -> Result<Vec<QueryRow>, GraphError> {
    let mut rows: Vec<Row> = vec![Row::new()];
    let mut output: Option<Vec<QueryRow>> = None;

    for clause in &stmt.clauses {
        match clause {
            Clause::Match { optional, patterns } => {
                let mut next = Vec::new();
                for row in &rows {
                    let mut matched = vec![row.clone()];
                    for pattern in patterns {
                        let mut expanded = Vec::new();
                        for r in &matched {
                            expanded.extend(match_pattern(state, pattern, r)?);
                        }
                        matched = expanded;
                    }
                    if matched.is_empty() && *optional {
                        next.push(row.clone());
                    } else {
                        next.extend(matched);
                    }
                }
                rows = next;
            }
            Clause::Merge { pattern, on_set } => {
                let mut next = Vec::new();
                for row in &rows {
                    let found = match_pattern(state, pattern, row)?;
                    if found.is_empty() {
                        next.push(create_pattern(state, pattern, row, summary)?);
                    } else {
                        next.extend(found);
                    }
                }
                rows = next;
                apply_set(state, &rows, on_set, summary)?;
                check_constraints(state)?;
            }
            Clause::Create(patterns) => {
                let mut next = Vec::new();
                for row in &rows {
                    let mut row = row.clone();
                    for pattern in patterns {
                        row = create_pattern(state, pattern, &row, summary)?;
                    }
                    next.push(row);
                }
                rows = next;
                check_constraints(state)?;
            }
            Clause::Set(items) => {
                apply_set(state, &rows, items, summary)?;
                check_constraints(state)?;
            }
            Clause::Other { keyword, text } => match keyword.as_str() {
                "WHERE" => rows = filter_where(state, rows, text)?,
                "RETURN" => output = Some(project(state, &rows, text)?),
                "ORDER" => {
                    if let Some(out) = output.as_mut() {
                        order_rows(out, text)?;
                    }
                }
                "LIMIT" => {
                    let n = parse_limit(text)?;
                    match output.as_mut() {
                        Some(out) => out.truncate(n),
                        None => rows.truncate(n),
                    }
                }
                other => {
                    return Err(GraphError::Unsupported(format!("{} clauses", other)));
                }
            },
            Clause::CreateConstraint(_) | Clause::DropConstraint { .. } | Clause::Schema(_) => {
                return Err(GraphError::Unsupported(
                    "schema statements must stand alone".to_string(),
                ));
            }
            Clause::Unparsed(text) => {
                return Err(GraphError::Syntax(format!("cannot parse `{}`", text)));
            }
        }
    }

    Ok(output.unwrap_or_default())
}

fn literal_json(literal: &Literal) -> Result<Value, GraphError> {
    match literal {
        Literal::Parameter(p) => Err(GraphError::Unsupported(format!("parameter ${}", p))),
        Literal::List(items) => Ok(Value::Array(
            items.iter().map(literal_json).collect::<Result<_, _>>()?,
        )),
        other => Ok(other.to_json()),
    }
}

fn properties_json(properties: &[(String, Literal)]) -> Result<Properties, GraphError> {
    properties
        .iter()
        .map(|(k, v)| Ok((k.clone(), literal_json(v)?)))
        .collect()
}

fn node_fits(node: &Node, labels: &[String], props: &Properties) -> bool {
    labels.iter().all(|l| node.labels.contains(l))
        && props.iter().all(|(k, v)| node.properties.get(k) == Some(v))
}

fn node_candidate_ok(
    state: &GraphState,
    pattern: &NodePattern,
    props: &Properties,
    row: &Row,
    id: usize,
) -> bool {
    match pattern.var.as_ref().and_then(|v| row.get(v)) {
        Some(Entity::Node(bound)) => *bound == id && node_fits(&state.nodes[id], &pattern.labels, props),
        Some(Entity::Relationship(_)) => false,
        None => node_fits(&state.nodes[id], &pattern.labels, props),
    }
}

fn bind(row: &mut Row, var: &Option<String>, entity: Entity) {
    if let Some(var) = var {
        row.insert(var.clone(), entity);
    }
}

fn match_pattern(state: &GraphState, pattern: &Pattern, row: &Row) -> Result<Vec<Row>, GraphError> {
    let start_props = properties_json(&pattern.start.properties)?;
    let mut partial: Vec<(Row, usize)> = (0..state.nodes.len())
        .filter(|&id| node_candidate_ok(state, &pattern.start, &start_props, row, id))
        .map(|id| {
            let mut r = row.clone();
            bind(&mut r, &pattern.start.var, Entity::Node(id));
            (r, id)
        })
        .collect();

    for (rel, node) in &pattern.hops {
        let rel_props = properties_json(&rel.properties)?;
        let node_props = properties_json(&node.properties)?;
        let mut next = Vec::new();
        for (r, current) in &partial {
            let current = *current;
            for (rid, candidate) in state.relationships.iter().enumerate() {
                if rel.rel_type.as_ref().is_some_and(|t| *t != candidate.rel_type) {
                    continue;
                }
                if !rel_props
                    .iter()
                    .all(|(k, v)| candidate.properties.get(k) == Some(v))
                {
                    continue;
                }
                if let Some(bound) = rel.var.as_ref().and_then(|v| r.get(v)) {
                    if *bound != Entity::Relationship(rid) {
                        continue;
                    }
                }
                let other = match rel.direction {
                    Direction::Outgoing => (candidate.from == current).then_some(candidate.to),
                    Direction::Incoming => (candidate.to == current).then_some(candidate.from),
                    Direction::Undirected => {
                        if candidate.from == current {
                            Some(candidate.to)
                        } else if candidate.to == current {
                            Some(candidate.from)
                        } else {
                            None
                        }
                    }
                };
                let Some(other) = other else { continue };
                if !node_candidate_ok(state, node, &node_props, r, other) {
                    continue;
                }
                let mut extended = r.clone();
                bind(&mut extended, &rel.var, Entity::Relationship(rid));
                bind(&mut extended, &node.var, Entity::Node(other));
                next.push((extended, other));
            }
        }
        partial = next;
    }

    Ok(partial.into_iter().map(|(r, _)| r).collect())
}

fn ensure_node(
    state: &mut GraphState,
    pattern: &NodePattern,
    row: &mut Row,
    summary: &mut MutationSummary,
) -> Result<usize, GraphError> {
    if let Some(var) = &pattern.var {
        match row.get(var) {
            Some(Entity::Node(id)) => return Ok(*id),
            Some(Entity::Relationship(_)) => {
                return Err(GraphError::Syntax(format!("`{}` is a relationship", var)));
            }
            None => {}
        }
    }
    let properties = properties_json(&pattern.properties)?;
    summary.properties_set += properties.len() as i64;
    summary.nodes_created += 1;
    state.nodes.push(Node {
        labels: pattern.labels.clone(),
        properties,
    });
    let id = state.nodes.len() - 1;
    bind(row, &pattern.var, Entity::Node(id));
    Ok(id)
}

fn create_pattern(
    state: &mut GraphState,
    pattern: &Pattern,
    row: &Row,
    summary: &mut MutationSummary,
) -> Result<Row, GraphError> {
    let mut row = row.clone();
    let mut current = ensure_node(state, &pattern.start, &mut row, summary)?;
    for (rel, node) in &pattern.hops {
        let next = ensure_node(state, node, &mut row, summary)?;
        let rel_type = rel.rel_type.clone().ok_or_else(|| {
            GraphError::Syntax("relationships must have exactly one type".to_string())
        })?;
        let (from, to) = match rel.direction {
            Direction::Incoming => (next, current),
            Direction::Outgoing | Direction::Undirected => (current, next),
        };
        let properties = properties_json(&rel.properties)?;
        summary.properties_set += properties.len() as i64;
        summary.relationships_created += 1;
        state.relationships.push(Relationship {
            from,
            rel_type,
            to,
            properties,
        });
        bind(
            &mut row,
            &rel.var,
            Entity::Relationship(state.relationships.len() - 1),
        );
        current = next;
    }
    Ok(row)
}

fn apply_set(
    state: &mut GraphState,
    rows: &[Row],
    items: &[SetItem],
    summary: &mut MutationSummary,
) -> Result<(), GraphError> {
    for row in rows {
        for item in items {
            let value = literal_json(&item.value)?;
            let properties = match row.get(&item.var) {
                Some(Entity::Node(id)) => &mut state.nodes[*id].properties,
                Some(Entity::Relationship(id)) => &mut state.relationships[*id].properties,
                // Unbound OPTIONAL MATCH variable.
                None => continue,
            };
            if value.is_null() {
                properties.remove(&item.property);
            } else {
                properties.insert(item.property.clone(), value);
            }
            summary.properties_set += 1;
        }
    }
    Ok(())
}

fn check_constraints(state: &GraphState) -> Result<(), GraphError> {
    for constraint in &state.constraints {
        let mut seen = HashSet::new();
        for node in state.nodes.iter().filter(|n| n.labels.contains(&constraint.label)) {
            if let Some(value) = node.properties.get(&constraint.property) {
                if !seen.insert(value.to_string()) {
                    return Err(GraphError::ConstraintViolation(format!(
                        "node with label `{}` and property `{}` = {} already exists",
                        constraint.label, constraint.property, value
                    )));
                }
            }
        }
    }
    Ok(())
}

fn apply_schema(
    state: &mut GraphState,
    stmt: &Statement,
    summary: &mut MutationSummary,
) -> Result<(), GraphError> {
    let [clause] = stmt.clauses.as_slice() else {
        return Err(GraphError::Unsupported(
            "schema statements must stand alone".to_string(),
        ));
    };
    match clause {
        Clause::CreateConstraint(c) => {
            let name = c.name.clone().unwrap_or_else(|| {
                format!("constraint_{}_{}", c.label.to_lowercase(), c.property)
            });
            let exists = state.constraints.iter().any(|x| {
                x.name == name || (x.label == c.label && x.property == c.property)
            });
            if exists {
                return if c.if_not_exists {
                    Ok(())
                } else {
                    Err(GraphError::SchemaExists(name))
                };
            }
            state.constraints.push(Constraint {
                name,
                label: c.label.clone(),
                property: c.property.clone(),
            });
            if let Err(e) = check_constraints(state) {
                state.constraints.pop();
                return Err(e);
            }
            summary.constraints_added += 1;
            Ok(())
        }
        Clause::DropConstraint { name, if_exists } => {
            let before = state.constraints.len();
            state.constraints.retain(|c| c.name != *name);
            if state.constraints.len() == before && !if_exists {
                return Err(GraphError::Other(format!("no constraint named `{}`", name)));
            }
            Ok(())
        }
        // Indexes only affect performance.
        Clause::Schema(_) => Ok(()),
        _ => Err(GraphError::Unsupported("not a schema statement".to_string())),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Read-only projection
// ═══════════════════════════════════════════════════════════════════════

fn clause_tokens(text: &str) -> Result<Vec<Token>, GraphError> {
    let tokens = tokenize(text).map_err(|e| GraphError::Syntax(e.to_string()))?;
    // Drop the clause keyword itself.
    Ok(tokens.into_iter().skip(1).map(|s| s.token).collect())
}

fn token_literal(tokens: &[Token]) -> Option<Value> {
    match tokens {
        [Token::Str(s)] => Some(Value::String(s.clone())),
        [Token::Number(n)] => number_json(n),
        [Token::Dash, Token::Number(n)] => number_json(&format!("-{}", n)),
        [Token::Ident(w)] if w.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
        [Token::Ident(w)] if w.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
        [Token::Ident(w)] if w.eq_ignore_ascii_case("null") => Some(Value::Null),
        _ => None,
    }
}

fn number_json(n: &str) -> Option<Value> {
    match n.parse::<i64>() {
        Ok(i) => Some(Value::from(i)),
        Err(_) => n
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
    }
}

fn entity_property(state: &GraphState, row: &Row, var: &str, property: &str) -> Value {
    let props = match row.get(var) {
        Some(Entity::Node(id)) => &state.nodes[*id].properties,
        Some(Entity::Relationship(id)) => &state.relationships[*id].properties,
        None => return Value::Null,
    };
    props.get(property).cloned().unwrap_or(Value::Null)
}

/// `WHERE a.x = literal [AND b.y = literal ...]`
fn filter_where(state: &GraphState, rows: Vec<Row>, text: &str) -> Result<Vec<Row>, GraphError> {
    let tokens = clause_tokens(text)?;
    let unsupported =
        || GraphError::Unsupported("WHERE supports only `var.prop = literal` conditions".to_string());
    let mut conditions = Vec::new();
    for condition in tokens.split(|t| t.is_keyword("AND")) {
        match condition {
            [Token::Ident(var), Token::Dot, Token::Ident(prop), Token::Eq, rest @ ..] => {
                let value = token_literal(rest).ok_or_else(unsupported)?;
                conditions.push((var.clone(), prop.clone(), value));
            }
            _ => return Err(unsupported()),
        }
    }
    Ok(rows
        .into_iter()
        .filter(|row| {
            conditions
                .iter()
                .all(|(var, prop, value)| entity_property(state, row, var, prop) == *value)
        })
        .collect())
}

enum Projection {
    Entity(String),
    Property(String, String),
    Count,
}

/// `RETURN [DISTINCT] item [AS alias], ...` with `var`, `var.prop`, `count(*)`.
fn project(state: &GraphState, rows: &[Row], text: &str) -> Result<Vec<QueryRow>, GraphError> {
    let mut tokens = clause_tokens(text)?;
    let distinct = tokens.first().is_some_and(|t| t.is_keyword("DISTINCT"));
    if distinct {
        tokens.remove(0);
    }

    let mut items = Vec::new();
    for item in tokens.split(|t| *t == Token::Comma) {
        let (expr, alias) = match item {
            [expr @ .., Token::Ident(kw), Token::Ident(alias)] if kw.eq_ignore_ascii_case("AS") => {
                (expr, Some(alias.clone()))
            }
            expr => (expr, None),
        };
        let (projection, default_name) = match expr {
            [Token::Ident(var)] => (Projection::Entity(var.clone()), var.clone()),
            [Token::Ident(var), Token::Dot, Token::Ident(prop)] => (
                Projection::Property(var.clone(), prop.clone()),
                format!("{}.{}", var, prop),
            ),
            [Token::Ident(f), Token::LParen, _, Token::RParen] if f.eq_ignore_ascii_case("count") => {
                (Projection::Count, "count(*)".to_string())
            }
            _ => {
                return Err(GraphError::Unsupported(
                    "RETURN supports `var`, `var.prop`, and `count(*)`".to_string(),
                ))
            }
        };
        items.push((projection, alias.unwrap_or(default_name)));
    }

    let value_of = |row: &Row, projection: &Projection| -> Value {
        match projection {
            Projection::Entity(var) => match row.get(var) {
                Some(Entity::Node(id)) => json_object(&state.nodes[*id].properties),
                Some(Entity::Relationship(id)) => json_object(&state.relationships[*id].properties),
                None => Value::Null,
            },
            Projection::Property(var, prop) => entity_property(state, row, var, prop),
            Projection::Count => Value::Null,
        }
    };

    // Group by the non-aggregate columns; counts are per group.
    let has_count = items.iter().any(|(p, _)| matches!(p, Projection::Count));
    let mut groups: Vec<(String, QueryRow, u64)> = Vec::new();
    for row in rows {
        let mut out = QueryRow::new();
        for (projection, name) in &items {
            if !matches!(projection, Projection::Count) {
                out.insert(name.clone(), value_of(row, projection));
            }
        }
        let key = Value::Object(out.clone()).to_string();
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some(group) if has_count || distinct => group.2 += 1,
            _ => groups.push((key, out, 1)),
        }
    }
    if has_count && groups.is_empty() && items.iter().all(|(p, _)| matches!(p, Projection::Count)) {
        groups.push((String::new(), QueryRow::new(), 0));
    }

    Ok(groups
        .into_iter()
        .map(|(_, mut out, count)| {
            for (projection, name) in &items {
                if matches!(projection, Projection::Count) {
                    out.insert(name.clone(), Value::from(count));
                }
            }
            out
        })
        .collect())
}

fn json_object(properties: &Properties) -> Value {
    Value::Object(
        properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

/// `ORDER BY column [ASC|DESC]`, where column names a RETURN column.
fn order_rows(rows: &mut [QueryRow], text: &str) -> Result<(), GraphError> {
    let tokens = clause_tokens(text)?;
    let (column, descending) = match tokens.as_slice() {
        [by, rest @ ..] if by.is_keyword("BY") => {
            let (expr, descending) = match rest {
                [expr @ .., dir] if dir.is_keyword("DESC") => (expr, true),
                [expr @ .., dir] if dir.is_keyword("ASC") => (expr, false),
                expr => (expr, false),
            };
            let name = match expr {
                [Token::Ident(var)] => var.clone(),
                [Token::Ident(var), Token::Dot, Token::Ident(prop)] => format!("{}.{}", var, prop),
                _ => String::new(),
            };
            (name, descending)
        }
        _ => (String::new(), false),
    };
    if rows.first().is_some_and(|r| !r.contains_key(&column)) || column.is_empty() {
        return Err(GraphError::Unsupported(
            "ORDER BY must name a returned column".to_string(),
        ));
    }
    rows.sort_by(|a, b| {
        let ordering = compare_values(&a[&column], &b[&column]);
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    Ok(())
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn parse_limit(text: &str) -> Result<usize, GraphError> {
    match clause_tokens(text)?.as_slice() {
        [Token::Number(n)] => n
            .parse()
            .map_err(|_| GraphError::Syntax(format!("invalid LIMIT `{}`", n))),
        _ => Err(GraphError::Unsupported("LIMIT must be a literal".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &[&str] = &[
        r#"MERGE (acc1:Account {accountId: "A1"}) SET acc1.accountType = "IRA""#,
        r#"MERGE (pos1:Position {positionId: "P1"})"#,
        r#"MATCH (acc1:Account {accountId: "A1"}) MATCH (pos1:Position {positionId: "P1"}) MERGE (acc1)-[:HAS_POSITION]->(pos1)"#,
    ];

    async fn run_program(graph: &InMemoryGraphStore) -> MutationSummary {
        let mut tx = graph.begin().await.unwrap();
        let mut total = MutationSummary::default();
        for stmt in PROGRAM {
            total.add(&tx.run(stmt).await.unwrap());
        }
        tx.commit().await.unwrap();
        total
    }

    #[tokio::test]
    async fn test_merge_program_is_idempotent() {
        let graph = InMemoryGraphStore::new();
        let first = run_program(&graph).await;
        assert_eq!((first.nodes_created, first.relationships_created), (2, 1));
        let second = run_program(&graph).await;
        assert_eq!((second.nodes_created, second.relationships_created), (0, 0));
        assert_eq!(graph.node_count(), 2);
        assert!(graph.has_relationship("Account", "HAS_POSITION", "Position"));
        assert_eq!(graph.nodes_with_label("Account")[0]["accountType"], "IRA");
    }

    #[tokio::test]
    async fn test_uncommitted_work_is_invisible_and_rollback_discards() {
        let graph = InMemoryGraphStore::new();
        let mut tx = graph.begin().await.unwrap();
        tx.run(PROGRAM[0]).await.unwrap();
        assert_eq!(graph.node_count(), 0);
        tx.rollback().await.unwrap();
        assert_eq!(graph.node_count(), 0);
    }

    #[tokio::test]
    async fn test_unique_constraint_enforced() {
        let graph = InMemoryGraphStore::new();
        graph
            .run_schema_statement(
                "CREATE CONSTRAINT account_accountId_unique IF NOT EXISTS FOR (n:Account) REQUIRE n.accountId IS UNIQUE",
            )
            .await
            .unwrap();
        let mut tx = graph.begin().await.unwrap();
        tx.run(r#"CREATE (a:Account {accountId: "A1"})"#).await.unwrap();
        let err = tx
            .run(r#"CREATE (b:Account {accountId: "A1"})"#)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_schema_statement_exists_handling() {
        let graph = InMemoryGraphStore::new();
        let plain = "CREATE CONSTRAINT acct FOR (n:Account) REQUIRE n.accountId IS UNIQUE";
        let summary = graph.run_schema_statement(plain).await.unwrap();
        assert_eq!(summary.constraints_added, 1);
        assert!(matches!(
            graph.run_schema_statement(plain).await,
            Err(GraphError::SchemaExists(_))
        ));
        let idempotent = "CREATE CONSTRAINT acct IF NOT EXISTS FOR (n:Account) REQUIRE n.accountId IS UNIQUE";
        assert!(graph.run_schema_statement(idempotent).await.is_ok());
        assert_eq!(graph.constraint_names(), vec!["acct".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_commit_conflicts() {
        let graph = InMemoryGraphStore::new();
        let mut a = graph.begin().await.unwrap();
        let mut b = graph.begin().await.unwrap();
        a.run(PROGRAM[0]).await.unwrap();
        b.run(PROGRAM[1]).await.unwrap();
        a.commit().await.unwrap();
        let err = b.commit().await.unwrap_err();
        assert!(matches!(err, GraphError::Conflict(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_explain_rejects_bad_syntax_and_undefined_variables() {
        let graph = InMemoryGraphStore::new();
        assert!(graph.explain(PROGRAM[2]).await.is_ok());
        assert!(matches!(
            graph.explain("MERGE (a:Account {accountId: 'A1'").await,
            Err(GraphError::Syntax(_))
        ));
        assert!(matches!(
            graph.explain("MERGE (a:Account {accountId: 'A1'}) SET b.x = 1").await,
            Err(GraphError::Syntax(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_statement_leaves_transaction_state_untouched() {
        let graph = InMemoryGraphStore::new();
        let mut tx = graph.begin().await.unwrap();
        assert!(tx
            .run(r#"CREATE (a:Account {accountId: "A1"})-[]->(b:Account {accountId: "A2"})"#)
            .await
            .is_err());
        tx.commit().await.unwrap();
        assert_eq!(graph.node_count(), 0);
    }

    #[tokio::test]
    async fn test_read_only_query_projection() {
        let graph = InMemoryGraphStore::new();
        run_program(&graph).await;
        let rows = graph
            .query(r#"MATCH (a:Account)-[:HAS_POSITION]->(p:Position) WHERE a.accountId = "A1" RETURN a.accountType AS type, p.positionId"#)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["type"], "IRA");
        assert_eq!(rows[0]["p.positionId"], "P1");

        let counts = graph.query("MATCH (n:Account) RETURN count(*) AS n").await.unwrap();
        assert_eq!(counts[0]["n"], 1);

        assert!(matches!(
            graph.query(PROGRAM[0]).await,
            Err(GraphError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_order_and_limit() {
        let graph = InMemoryGraphStore::new();
        let mut tx = graph.begin().await.unwrap();
        for (id, qty) in [("P1", 5), ("P2", 50), ("P3", 20)] {
            tx.run(&format!(r#"MERGE (p:Position {{positionId: "{}", quantity: {}}})"#, id, qty))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
        let rows = graph
            .query("MATCH (p:Position) RETURN p.positionId AS id, p.quantity AS qty ORDER BY qty DESC LIMIT 2")
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["P2", "P3"]);
    }
}
