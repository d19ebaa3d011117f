//! Prompt text for the three generation calls the pipeline makes.

use docgraph_core::chunk::chunk_words;
use docgraph_core::schema::GraphSchema;

/// Words of document text sent to schema extraction.
pub const SCHEMA_SAMPLE_WORDS: usize = 3000;

pub const SCHEMA_SYSTEM_PROMPT: &str = "You design property-graph schemas for business documents. \
Identify the entity types (node labels) the document describes, the properties each entity has, \
and the relationships between them. Every label must have an identifier property named \
<lowercased label>Id, for example accountId for Account. Use PascalCase labels, camelCase \
properties, and UPPER_SNAKE_CASE relationship types. Reply with a single JSON object and nothing \
else, in this shape: \
{\"nodes\": {\"Label\": [\"labelId\", \"property\"]}, \
\"relationships\": [{\"type\": \"REL_TYPE\", \"from\": \"Label\", \"to\": \"OtherLabel\"}]}";

pub const STATEMENT_SYSTEM_PROMPT: &str = "You convert business documents into graph upsert \
statements in the Cypher language. Use only the labels, properties, and relationship types in \
the schema you are given. Rules: \
1. Create every node with MERGE on its identifier property only, e.g. \
MERGE (a:Account {accountId: \"A-1\"}), then set other properties with SET. \
2. Create every relationship with MERGE between variables bound by earlier MERGE statements, \
e.g. MERGE (a)-[:HAS_POSITION]->(p). Never create nodes inside a relationship pattern. \
3. Use string literals in double quotes and plain numbers for numeric values. \
4. End every statement with a semicolon. \
5. Output statements only: no explanations, no Markdown.";

pub const QUERY_SYSTEM_PROMPT: &str = "You translate questions about a property graph into one \
read-only Cypher query. Use only the labels, properties, and relationship types in the schema \
you are given. Use MATCH, OPTIONAL MATCH, WHERE, RETURN, ORDER BY, and LIMIT only; never \
MERGE, CREATE, SET, or DELETE. Give every returned column an alias with AS. Output the query \
only: no explanations, no Markdown.";

/// `text` up to the end of its `max_words`-th word, line breaks kept.
pub fn sample_words(text: &str, max_words: usize) -> String {
    chunk_words(text, max_words, 0)
        .into_iter()
        .next()
        .map(|window| window.text)
        .unwrap_or_default()
}

pub fn schema_user_prompt(text: &str) -> String {
    format!(
        "Document:\n\"\"\"\n{}\n\"\"\"\n\nReturn the JSON schema.",
        sample_words(text, SCHEMA_SAMPLE_WORDS)
    )
}

/// `part` is `(index, total)` for a chunk, `None` for the whole document.
pub fn statement_user_prompt(schema: &GraphSchema, text: &str, part: Option<(usize, usize)>) -> String {
    let scope = match part {
        Some((index, total)) => format!(
            "This is part {} of {} of the document. Emit statements for the facts in this part only.\n\n",
            index + 1,
            total
        ),
        None => String::new(),
    };
    format!(
        "Schema:\n{}\n{}Document:\n\"\"\"\n{}\n\"\"\"\n\nReturn the statements.",
        schema.to_prompt_text(),
        scope,
        text
    )
}

pub fn query_user_prompt(schema: &GraphSchema, question: &str) -> String {
    format!(
        "Schema:\n{}\nQuestion: {}\n\nReturn the query.",
        schema.to_prompt_text(),
        question
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_words_truncates() {
        assert_eq!(sample_words("a  b\nc d", 3), "a  b\nc");
        assert_eq!(sample_words("id,name\nA-1,Main", 10), "id,name\nA-1,Main");
        assert_eq!(sample_words("", 3), "");
    }

    #[test]
    fn test_statement_prompt_mentions_part_and_schema() {
        let mut schema = GraphSchema::new();
        schema.add_node("Account", &["accountId"]);
        let prompt = statement_user_prompt(&schema, "Account A-1", Some((1, 3)));
        assert!(prompt.contains("part 2 of 3"));
        assert!(prompt.contains("Account {accountId}"));
        assert!(!statement_user_prompt(&schema, "x", None).contains("part"));
    }
}
