//! Tokenizer for the upsert-statement subset.

use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare identifier or keyword.
    Ident(String),
    /// Backtick-quoted identifier.
    Quoted(String),
    Str(String),
    Number(String),
    Param(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    Semicolon,
    Eq,
    PlusEq,
    Dash,
    Lt,
    Gt,
    Pipe,
    Star,
    Other(char),
}

impl Token {
    /// Case-insensitive keyword test; backtick-quoted names never match.
    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(kw))
    }
}

/// A token with its byte range in the source.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ParseError> {
    scan(source, false)
}

/// Tokenize without failing: an unterminated quote becomes [`Token::Other`]
/// so stray apostrophes in surrounding prose do not sink the whole input.
pub fn tokenize_lenient(source: &str) -> Vec<Spanned> {
    scan(source, true).unwrap_or_default()
}

fn scan(source: &str, lenient: bool) -> Result<Vec<Spanned>, ParseError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = source[i..].chars().next().unwrap_or('\0');
        let start = i;

        if c.is_whitespace() {
            i += c.len_utf8();
            continue;
        }

        // Comments
        if source[i..].starts_with("//") {
            i = source[i..].find('\n').map(|n| i + n).unwrap_or(bytes.len());
            continue;
        }
        if source[i..].starts_with("/*") {
            i = source[i + 2..]
                .find("*/")
                .map(|n| i + 2 + n + 2)
                .unwrap_or(bytes.len());
            continue;
        }

        let token = match c {
            '(' => single(&mut i, Token::LParen),
            ')' => single(&mut i, Token::RParen),
            '[' => single(&mut i, Token::LBracket),
            ']' => single(&mut i, Token::RBracket),
            '{' => single(&mut i, Token::LBrace),
            '}' => single(&mut i, Token::RBrace),
            ':' => single(&mut i, Token::Colon),
            ',' => single(&mut i, Token::Comma),
            '.' => single(&mut i, Token::Dot),
            ';' => single(&mut i, Token::Semicolon),
            '=' => single(&mut i, Token::Eq),
            '-' => single(&mut i, Token::Dash),
            '<' => single(&mut i, Token::Lt),
            '>' => single(&mut i, Token::Gt),
            '|' => single(&mut i, Token::Pipe),
            '*' => single(&mut i, Token::Star),
            '+' if source[i..].starts_with("+=") => {
                i += 2;
                Token::PlusEq
            }
            '\'' | '"' => match read_string(source, i, c) {
                Ok((value, next)) => {
                    i = next;
                    Token::Str(value)
                }
                Err(_) if lenient => single(&mut i, Token::Other(c)),
                Err(e) => return Err(e),
            },
            '`' => match source[i + 1..].find('`') {
                Some(close) => {
                    let name = source[i + 1..i + 1 + close].to_string();
                    i += close + 2;
                    Token::Quoted(name)
                }
                None if lenient => single(&mut i, Token::Other('`')),
                None => return Err(ParseError::new("unterminated backtick identifier", i)),
            },
            '$' => {
                i += 1;
                let name_start = i;
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
                Token::Param(source[name_start..i].to_string())
            }
            c if c.is_ascii_digit() => {
                i = read_number(bytes, i);
                Token::Number(source[start..i].to_string())
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < bytes.len() {
                    let ch = source[i..].chars().next().unwrap_or('\0');
                    if ch.is_alphanumeric() || ch == '_' {
                        i += ch.len_utf8();
                    } else {
                        break;
                    }
                }
                Token::Ident(source[start..i].to_string())
            }
            other => {
                i += other.len_utf8();
                Token::Other(other)
            }
        };

        tokens.push(Spanned {
            token,
            start,
            end: i,
        });
    }

    Ok(tokens)
}

fn single(i: &mut usize, token: Token) -> Token {
    *i += 1;
    token
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn read_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

/// Read a quoted string starting at `start`; returns the unescaped value
/// and the byte offset just past the closing quote.
fn read_string(source: &str, start: usize, quote: char) -> Result<(String, usize), ParseError> {
    let mut value = String::new();
    let mut chars = source[start + 1..].char_indices();
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '\\' => {
                let (_, escaped) = chars
                    .next()
                    .ok_or_else(|| ParseError::new("unterminated string literal", start))?;
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    'u' => {
                        let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                        match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                            Some(decoded) => value.push(decoded),
                            None => {
                                return Err(ParseError::new("invalid unicode escape", start))
                            }
                        }
                    }
                    other => value.push(other),
                }
            }
            c if c == quote => return Ok((value, start + 1 + offset + c.len_utf8())),
            c => value.push(c),
        }
    }
    Err(ParseError::new("unterminated string literal", start))
}
