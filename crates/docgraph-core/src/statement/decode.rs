//! Encoding repair for model-generated statements.
//!
//! Generation models (and the transports in front of them) regularly hand
//! back the edge operator in escaped form: `-&gt;`, `&amp;gt;`, `%3E`,
//! `>`. Nested encodings need several passes, so [`repair_encoding`]
//! iterates until nothing changes, bounded by [`MAX_PASSES`].

/// Upper bound on repair passes; each pass removes one encoding layer.
pub const MAX_PASSES: usize = 10;

/// Entity forms that are unambiguous markup artifacts, replaced anywhere.
const ENTITY_REPLACEMENTS: &[(&str, &str)] = &[
    ("&amp;amp;", "&amp;"),
    ("&amp;gt;", "&gt;"),
    ("&amp;lt;", "&lt;"),
    ("&gt;", ">"),
    ("&lt;", "<"),
    ("&#62;", ">"),
    ("&#60;", "<"),
    ("&#x3e;", ">"),
    ("&#x3E;", ">"),
    ("&#x3c;", "<"),
    ("&#x3C;", "<"),
];

/// Percent and escape-sequence forms, replaced only next to a dash so that
/// URLs and string literals elsewhere are left alone.
const ARROW_REPLACEMENTS: &[(&str, &str)] = &[
    ("-%3E", "->"),
    ("-%3e", "->"),
    ("%3C-", "<-"),
    ("%3c-", "<-"),
    ("-\\u003e", "->"),
    ("-\\u003E", "->"),
    ("\\u003c-", "<-"),
    ("\\u003C-", "<-"),
    ("-\\x3e", "->"),
    ("-\\x3E", "->"),
    ("\\x3c-", "<-"),
    ("\\x3C-", "<-"),
];

/// Run one repair pass.
fn repair_once(text: &str) -> String {
    let mut out = strip_code_fences(text);
    for (from, to) in ENTITY_REPLACEMENTS.iter().chain(ARROW_REPLACEMENTS) {
        if out.contains(from) {
            out = out.replace(from, to);
        }
    }
    out
}

/// Repair escaped edge operators until a fixed point is reached.
pub fn repair_encoding(text: &str) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_PASSES {
        let next = repair_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Drop Markdown code-fence lines (```` ``` ```` / ```` ```cypher ````).
fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}
