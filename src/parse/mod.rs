mod error;
mod grammar;

pub use error::{ParseError, ParseErrors};

use winnow::combinator::terminated;
use winnow::prelude::*;

use crate::types::{KnowledgeBase, RuleEntity};

/// Parse rule source into a [`KnowledgeBase`].
///
/// The whole source is consumed per build. Failures do not stop at the
/// first bad block: each `rule` block parses independently, and every
/// positioned error is returned in one batch. An empty source (or one
/// containing only whitespace and comments) parses to an empty knowledge
/// base.
///
/// # Errors
///
/// Returns [`ParseErrors`] carrying `(line, column, snippet)` for every
/// failure found.
pub fn parse(input: &str) -> Result<KnowledgeBase, ParseErrors> {
    let mut errors = Vec::new();
    let mut rules: Vec<RuleEntity> = Vec::new();

    let starts = block_starts(input);
    let leading = starts.first().map_or(input, |&s| &input[..s]);
    if let Some(offset) = first_token(leading) {
        errors.push(ParseError::at(input, offset, "expected 'rule'"));
    }

    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(input.len());
        let text = &input[start..end];
        match terminated(grammar::rule_block, grammar::ws).parse(text) {
            Ok(rule) => {
                if rules.iter().any(|r| r.name == rule.name) {
                    errors.push(ParseError::at(
                        input,
                        start,
                        format!("duplicate rule name \"{}\"", rule.name),
                    ));
                } else {
                    rules.push(rule);
                }
            }
            Err(e) => {
                let mut message = e.inner().to_string().replace('\n', "; ");
                if message.is_empty() {
                    message = "syntax error".to_owned();
                }
                errors.push(ParseError::at(input, start + e.offset(), message));
            }
        }
    }

    if errors.is_empty() {
        Ok(KnowledgeBase::from_rules(rules))
    } else {
        Err(ParseErrors::new(errors))
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offsets of every top-level `rule` keyword, skipping string
/// literals and line comments. Each offset opens one block slice used for
/// independent parsing and error recovery.
fn block_starts(input: &str) -> Vec<usize> {
    let bytes = input.as_bytes();
    let mut starts = Vec::new();
    let mut i = 0;
    let mut prev_ident = false;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' {
            i += 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' => i += 2,
                    b'"' => {
                        i += 1;
                        break;
                    }
                    _ => i += 1,
                }
            }
            prev_ident = false;
            continue;
        }
        if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            prev_ident = false;
            continue;
        }
        if !prev_ident
            && bytes[i..].starts_with(b"rule")
            && !bytes.get(i + 4).copied().is_some_and(is_ident_byte)
        {
            starts.push(i);
            i += 4;
            prev_ident = true;
            continue;
        }
        prev_ident = is_ident_byte(b);
        i += 1;
    }
    starts
}

/// Offset of the first byte that is neither whitespace nor inside a line
/// comment, or `None` for blank content.
fn first_token(input: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        return Some(i);
    }
    None
}
