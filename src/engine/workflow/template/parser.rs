//! Template parser
//!
//! Parses strings like:
//! - `${fetch.result.issues}`
//! - `${fetch[0].title}`
//! - `Found ${count.total} issues in ${repo}`
//!
//! `$${` is an escaped literal `${`.

use super::ast::{PathSegment, Piece, Reference, Template};

/// Parse a string into literal and reference pieces
pub fn parse(input: &str) -> Result<Template, String> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        literal.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("$${") {
            literal.push_str("${");
            rest = &tail[3..];
        } else if let Some(body) = tail.strip_prefix("${") {
            let end = body
                .find('}')
                .ok_or_else(|| format!("unterminated reference starting at `{}`", tail))?;
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Reference(parse_reference(&body[..end])?));
            rest = &body[end + 1..];
        } else {
            literal.push('$');
            rest = &tail[1..];
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(Template { pieces })
}

/// Quick check used to skip parsing plain strings
pub fn contains_reference(input: &str) -> bool {
    input.contains("${")
}

/// Parse the body of a `${...}` reference
pub fn parse_reference(input: &str) -> Result<Reference, String> {
    let chars: Vec<char> = input.trim().chars().collect();
    let mut i = 0;

    let root = read_identifier(&chars, &mut i);
    if root.is_empty() {
        return Err(format!("empty reference `${{{}}}`", input));
    }

    let mut path = Vec::new();
    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let key = read_identifier(&chars, &mut i);
                if key.is_empty() {
                    return Err(format!("empty field name in `{}`", input.trim()));
                }
                path.push(PathSegment::Key(key));
            }
            '[' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if start == i || i >= chars.len() || chars[i] != ']' {
                    return Err(format!("invalid index in `{}`", input.trim()));
                }
                let digits: String = chars[start..i].iter().collect();
                let index = digits
                    .parse::<usize>()
                    .map_err(|e| format!("invalid index `{}`: {}", digits, e))?;
                path.push(PathSegment::Index(index));
                i += 1;
            }
            other => {
                return Err(format!(
                    "unexpected character '{}' in `{}`",
                    other,
                    input.trim()
                ))
            }
        }
    }

    Ok(Reference { root, path })
}

fn read_identifier(chars: &[char], i: &mut usize) -> String {
    let start = *i;
    while *i < chars.len() && is_identifier_char(chars[*i]) {
        *i += 1;
    }
    chars[start..*i].iter().collect()
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}
