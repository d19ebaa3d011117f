//! Per-document graph schema.
//!
//! A [`GraphSchema`] is extracted exactly once per document and is
//! read-only afterwards: every generation call for that document reuses it.
//! Labels, relationship descriptors, and each label's property list are kept
//! duplicate-free by construction.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A node label and its ordered, duplicate-free property names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeType {
    pub label: String,
    pub properties: Vec<String>,
}

/// A relationship type with its expected source and target labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub rel_type: String,
    pub from_label: String,
    pub to_label: String,
}

/// Node labels with their properties plus relationship descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSchema {
    nodes: Vec<NodeType>,
    relationships: Vec<RelationshipDescriptor>,
}

impl GraphSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label (if new) and any properties it does not have yet.
    pub fn add_node<S: AsRef<str>>(&mut self, label: &str, properties: &[S]) {
        let label = label.trim();
        if label.is_empty() {
            return;
        }
        let idx = match self.nodes.iter().position(|n| n.label == label) {
            Some(idx) => idx,
            None => {
                self.nodes.push(NodeType {
                    label: label.to_string(),
                    properties: Vec::new(),
                });
                self.nodes.len() - 1
            }
        };
        let node = &mut self.nodes[idx];
        for prop in properties {
            let prop = prop.as_ref().trim();
            if !prop.is_empty() && !node.properties.iter().any(|p| p == prop) {
                node.properties.push(prop.to_string());
            }
        }
    }

    /// Add a relationship descriptor unless an identical one exists.
    pub fn add_relationship(&mut self, rel_type: &str, from_label: &str, to_label: &str) {
        let descriptor = RelationshipDescriptor {
            rel_type: rel_type.trim().to_string(),
            from_label: from_label.trim().to_string(),
            to_label: to_label.trim().to_string(),
        };
        if descriptor.rel_type.is_empty() || self.relationships.contains(&descriptor) {
            return;
        }
        self.relationships.push(descriptor);
    }

    pub fn nodes(&self) -> &[NodeType] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[RelationshipDescriptor] {
        &self.relationships
    }

    pub fn properties(&self, label: &str) -> Option<&[String]> {
        self.nodes
            .iter()
            .find(|n| n.label == label)
            .map(|n| n.properties.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    /// Parse the JSON a schema-extraction call returns.
    ///
    /// Accepts surrounding prose or Markdown fences and takes the outermost
    /// JSON object. `nodes` may be an object (`{"Label": ["prop"]}`) or an
    /// array of `{"label", "properties"}`; relationships may use
    /// `type`/`from`/`to` or `rel_type`/`from_label`/`to_label`.
    pub fn from_model_output(text: &str) -> Result<Self> {
        let start = text.find('{');
        let end = text.rfind('}');
        let json = match (start, end) {
            (Some(s), Some(e)) if e > s => &text[s..=e],
            _ => bail!("schema response contains no JSON object"),
        };
        let value: Value = serde_json::from_str(json)?;

        let mut schema = GraphSchema::new();
        match value.get("nodes") {
            Some(Value::Object(map)) => {
                for (label, props) in map {
                    schema.add_node(label, &string_list(props));
                }
            }
            Some(Value::Array(items)) => {
                for item in items {
                    let label = item
                        .get("label")
                        .and_then(|l| l.as_str())
                        .unwrap_or_default();
                    let props = item.get("properties").map(string_list).unwrap_or_default();
                    schema.add_node(label, &props);
                }
            }
            _ => bail!("schema response is missing a 'nodes' field"),
        }

        if let Some(Value::Array(rels)) = value.get("relationships") {
            for rel in rels {
                let field = |a: &str, b: &str| {
                    rel.get(a)
                        .or_else(|| rel.get(b))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                schema.add_relationship(
                    &field("type", "rel_type"),
                    &field("from", "from_label"),
                    &field("to", "to_label"),
                );
            }
        }

        if schema.nodes.is_empty() {
            bail!("schema response declares no node labels");
        }
        Ok(schema)
    }

    /// Render the schema as compact text for generation prompts.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::from("Node labels:\n");
        for node in &self.nodes {
            out.push_str(&format!("- {} {{{}}}\n", node.label, node.properties.join(", ")));
        }
        out.push_str("Relationships:\n");
        for rel in &self.relationships {
            out.push_str(&format!(
                "- (:{})-[:{}]->(:{})\n",
                rel.from_label, rel.rel_type, rel.to_label
            ));
        }
        out
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Pick the property that identifies nodes of `label`.
///
/// Prefers `{label}Id` / `{label}_id` (case-insensitive), then a generic
/// `id`, `_id`, or `uuid`. Returns `None` when no property qualifies, so
/// `accountType` is never chosen for `Account`.
pub fn identifier_property<'a, S: AsRef<str>>(label: &str, properties: &'a [S]) -> Option<&'a str> {
    let lower = label.to_lowercase();
    let specific = [format!("{}id", lower), format!("{}_id", lower)];
    properties
        .iter()
        .map(AsRef::as_ref)
        .find(|p| specific.iter().any(|s| p.to_lowercase() == *s))
        .or_else(|| {
            properties
                .iter()
                .map(AsRef::as_ref)
                .find(|p| matches!(p.to_lowercase().as_str(), "id" | "_id" | "uuid"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_node_dedups_labels_and_properties() {
        let mut schema = GraphSchema::new();
        schema.add_node("Account", &["accountId", "accountType", "accountId"]);
        schema.add_node("Account", &["accountType", "openedOn"]);
        assert_eq!(schema.nodes().len(), 1);
        assert_eq!(
            schema.properties("Account").unwrap(),
            &["accountId", "accountType", "openedOn"]
        );
    }

    #[test]
    fn test_add_relationship_dedups() {
        let mut schema = GraphSchema::new();
        schema.add_relationship("HAS_POSITION", "Account", "Position");
        schema.add_relationship("HAS_POSITION", "Account", "Position");
        schema.add_relationship("IN_SECURITY", "Position", "Security");
        assert_eq!(schema.relationships().len(), 2);
    }

    #[test]
    fn test_from_model_output_object_form_with_fences() {
        let text = r#"Here is the schema:
```json
{"nodes": {"Account": ["accountId", "accountType"], "Security": ["securityId", "ticker"]},
 "relationships": [{"type": "HOLDS", "from": "Account", "to": "Security"}]}
```"#;
        let schema = GraphSchema::from_model_output(text).unwrap();
        assert_eq!(schema.nodes().len(), 2);
        assert_eq!(schema.relationships()[0].rel_type, "HOLDS");
        assert_eq!(schema.relationships()[0].to_label, "Security");
    }

    #[test]
    fn test_from_model_output_array_form() {
        let text = r#"{"nodes": [{"label": "Trade", "properties": ["tradeId", "tradeId"]}],
                       "relationships": [{"rel_type": "FOR_SECURITY", "from_label": "Trade", "to_label": "Security"}]}"#;
        let schema = GraphSchema::from_model_output(text).unwrap();
        assert_eq!(schema.properties("Trade").unwrap(), &["tradeId"]);
        assert_eq!(schema.relationships().len(), 1);
    }

    #[test]
    fn test_from_model_output_rejects_garbage() {
        assert!(GraphSchema::from_model_output("no json here").is_err());
        assert!(GraphSchema::from_model_output(r#"{"relationships": []}"#).is_err());
        assert!(GraphSchema::from_model_output(r#"{"nodes": {}}"#).is_err());
    }

    #[test]
    fn test_identifier_prefers_label_specific_id() {
        let props = ["accountType", "id", "accountId"];
        assert_eq!(identifier_property("Account", &props), Some("accountId"));
        assert_eq!(identifier_property("Account", &["account_id"]), Some("account_id"));
        assert_eq!(identifier_property("Person", &["name", "uuid"]), Some("uuid"));
        assert_eq!(identifier_property("Account", &["accountType"]), None);
    }
}
