use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::error::GrammarError;
use crate::types::{is_identifier, Action};

/// A resource or field segment. An omitted segment is equivalent to `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Any,
    Named(String),
}

impl Segment {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::Named(n) => n == name,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Segment::Any)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionPattern {
    Any,
    Is(Action),
}

impl ActionPattern {
    pub fn matches(&self, action: Action) -> bool {
        match self {
            ActionPattern::Any => true,
            ActionPattern::Is(a) => *a == action,
        }
    }
}

/// Parsed form of one permission string. Immutable once built.
///
/// Grammar: `["~"] scope "." [resource "." [field "."]] action ("|" field "=" value)*`
/// Filter values on the same field are OR'd, values across fields AND'd,
/// and always compared as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPermission {
    pub negated: bool,
    pub scope: String,
    pub resource: Segment,
    pub field: Segment,
    pub action: ActionPattern,
    pub filters: BTreeMap<String, BTreeSet<String>>,
}

impl ParsedPermission {
    pub fn is_unconditional(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Parse one permission string. Partial matches fail: the entire input must
/// conform to the grammar.
pub fn parse(text: &str) -> Result<ParsedPermission, GrammarError> {
    let raw = text.trim();
    if raw.is_empty() {
        return Err(GrammarError::Empty);
    }

    let (negated, rest) = match raw.strip_prefix('~') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let (head, clauses) = split_clauses(raw, rest)?;

    let segments: Vec<&str> = head.split('.').collect();
    if segments.len() < 2 {
        return Err(GrammarError::MissingAction(raw.to_string()));
    }
    if segments.len() > 4 {
        return Err(GrammarError::TooManySegments(raw.to_string()));
    }
    for (position, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(GrammarError::EmptySegment { text: raw.to_string(), position });
        }
    }

    let scope = segments[0].to_string();
    let action_text = segments[segments.len() - 1];
    let action = if action_text == "*" {
        ActionPattern::Any
    } else {
        match Action::parse(action_text) {
            Some(a) => ActionPattern::Is(a),
            None => {
                return Err(GrammarError::UnknownAction {
                    text: raw.to_string(),
                    action: action_text.to_string(),
                })
            }
        }
    };

    let middle = &segments[1..segments.len() - 1];
    let resource = middle.first().map_or(Segment::Any, |s| named_or_any(s));
    let field = middle.get(1).map_or(Segment::Any, |s| named_or_any(s));

    let mut filters: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for clause in clauses {
        let (field_name, value) = parse_clause(raw, &clause)?;
        filters.entry(field_name).or_default().insert(value);
    }

    Ok(ParsedPermission { negated, scope, resource, field, action, filters })
}

fn named_or_any(segment: &str) -> Segment {
    if segment == "*" {
        Segment::Any
    } else {
        Segment::Named(segment.to_string())
    }
}

/// Split the head (dotted segments) from trailing `|field=value` clauses.
/// `|` inside a quoted value does not terminate a clause.
fn split_clauses(raw: &str, rest: &str) -> Result<(String, Vec<String>), GrammarError> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = rest.chars();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if in_quotes => {
                current.push(c);
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(GrammarError::UnterminatedQuote(raw.to_string())),
                }
            }
            '|' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(GrammarError::UnterminatedQuote(raw.to_string()));
    }
    parts.push(current);

    let head = parts.remove(0);
    Ok((head, parts))
}

/// Parse one `field=value` clause. Values are either bare tokens or
/// double-quoted with `\"` escapes.
fn parse_clause(raw: &str, clause: &str) -> Result<(String, String), GrammarError> {
    let malformed = || GrammarError::MalformedFilter {
        text: raw.to_string(),
        clause: clause.to_string(),
    };

    let (field, value_text) = clause.split_once('=').ok_or_else(malformed)?;
    if field.is_empty() {
        return Err(malformed());
    }
    if !is_identifier(field) {
        return Err(GrammarError::InvalidFilterField {
            text: raw.to_string(),
            field: field.to_string(),
        });
    }

    let value = if let Some(inner) = value_text.strip_prefix('"') {
        let inner = inner.strip_suffix('"').ok_or_else(|| GrammarError::UnterminatedQuote(raw.to_string()))?;
        unescape(raw, inner)?
    } else if value_text.is_empty() {
        return Err(malformed());
    } else if value_text.contains('"') {
        return Err(malformed());
    } else {
        value_text.to_string()
    };

    Ok((field.to_string(), value))
}

fn unescape(raw: &str, inner: &str) -> Result<String, GrammarError> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => return Err(GrammarError::UnterminatedQuote(raw.to_string())),
            }
        } else if c == '"' {
            // a bare quote inside the value means the closing quote we
            // stripped was not actually the end of the literal
            return Err(GrammarError::UnterminatedQuote(raw.to_string()));
        } else {
            out.push(c);
        }
    }
    Ok(out)
}
