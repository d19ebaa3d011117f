//! Splitting statement scripts and classifying individual statements.

/// Split a script on `;`, ignoring separators inside quotes and comments.
///
/// `//` and `/* */` comments outside quotes are removed. Blank statements
/// are dropped; the rest are returned trimmed and without the trailing `;`.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = script.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' && q != '`' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                current.push(' ');
            }
            ';' => push_statement(&mut statements, &mut current),
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

const INDEX_KINDS: &[&str] = &[
    "RANGE", "TEXT", "POINT", "LOOKUP", "FULLTEXT", "VECTOR", "UNIQUE", "BTREE",
];

/// Whether a statement creates or drops a constraint or index.
///
/// Recognizes `CREATE|DROP [kind] CONSTRAINT|INDEX`, case-insensitively.
pub fn is_schema_statement(statement: &str) -> bool {
    let mut words = statement
        .split_whitespace()
        .map(|w| w.to_ascii_uppercase());
    match words.next().as_deref() {
        Some("CREATE") | Some("DROP") => {}
        _ => return false,
    }
    let mut next = words.next();
    if next.as_deref().is_some_and(|w| INDEX_KINDS.contains(&w)) {
        next = words.next();
    }
    matches!(next.as_deref(), Some("CONSTRAINT") | Some("INDEX"))
}
