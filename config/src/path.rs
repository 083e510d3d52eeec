//! Dotted path expressions.
//!
//! A path such as `config.datasets.get(name="obs").filename` is parsed once,
//! when the schema is loaded, into a list of [`Segment`]s. Call arguments are
//! keyword-only and always strings; quotes are optional and numbers or
//! booleans are never coerced.

use std::fmt;
use std::str::FromStr;

use lineage_types::Kwargs;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Attribute or map-key access; which one is decided by the value it is
    /// applied to.
    Name(String),
    /// Keyword-only call, e.g. `get(name="obs")`.
    Call { name: String, kwargs: Kwargs },
}

impl Segment {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Segment::Name(name) | Segment::Call { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("empty segment at position {0}")]
    EmptySegment(usize),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("unterminated call in segment {0:?}")]
    UnterminatedCall(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid argument {arg:?} in call {segment:?}, expected key=\"value\"")]
    InvalidArgument { segment: String, arg: String },
    #[error("unexpected text after call in segment {0:?}")]
    TrailingText(String),
    #[error("bare `self` only names a list element, not the instance")]
    BareSelf,
}

/// A parsed dotted path. A path that names only `self` has no segments; it
/// resolves to the current list element and is rejected where the root is
/// the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    raw: String,
    segments: Vec<Segment>,
}

impl PathExpr {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = split_segments(trimmed)?
            .into_iter()
            .enumerate()
            .map(|(position, text)| parse_segment(position, text))
            .collect::<Result<Vec<_>, _>>()?;

        if matches!(segments.first(), Some(Segment::Name(name)) if name == "self") {
            segments.remove(0);
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// True for `self` alone.
    #[must_use]
    pub fn is_bare_self(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Name of the last segment, used for the fallback-namespace lookup.
    #[must_use]
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(Segment::name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PathExpr {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split on `.` outside parentheses and string literals.
fn split_segments(raw: &str) -> Result<Vec<&str>, PathError> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, ch) in raw.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, '.') if depth == 0 => {
                segments.push(&raw[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(PathError::UnterminatedString);
    }
    segments.push(&raw[start..]);
    Ok(segments)
}

fn parse_segment(position: usize, text: &str) -> Result<Segment, PathError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PathError::EmptySegment(position));
    }

    let Some(open) = text.find('(') else {
        return validate_name(text).map(|name| Segment::Name(name.to_string()));
    };

    let name = validate_name(text[..open].trim())?.to_string();
    let rest = &text[open + 1..];
    let close = find_closing(rest).ok_or_else(|| PathError::UnterminatedCall(text.to_string()))?;
    if !rest[close + 1..].trim().is_empty() {
        return Err(PathError::TrailingText(text.to_string()));
    }

    let mut kwargs = Kwargs::new();
    for arg in split_arguments(&rest[..close]) {
        let arg = arg.trim();
        if arg.is_empty() {
            continue;
        }
        let invalid = || PathError::InvalidArgument {
            segment: text.to_string(),
            arg: arg.to_string(),
        };
        let (key, literal) = arg.split_once('=').ok_or_else(invalid)?;
        let key = key.trim();
        if key.is_empty() || validate_name(key).is_err() {
            return Err(invalid());
        }
        kwargs.insert(key.to_string(), unquote(literal.trim()).ok_or_else(invalid)?);
    }

    Ok(Segment::Call { name, kwargs })
}

fn validate_name(name: &str) -> Result<&str, PathError> {
    let invalid = name.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\'' | '=' | ','));
    if invalid {
        Err(PathError::InvalidName(name.to_string()))
    } else {
        Ok(name)
    }
}

/// Index of the `)` that closes the call, skipping string literals.
fn find_closing(rest: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in rest.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, ')') => return Some(idx),
            _ => {}
        }
    }
    None
}

fn split_arguments(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, ch) in args.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, ',') => {
                parts.push(&args[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&args[start..]);
    parts
}

fn unquote(literal: &str) -> Option<String> {
    for q in ['"', '\''] {
        if let Some(inner) = literal.strip_prefix(q) {
            return inner.strip_suffix(q).map(ToString::to_string);
        }
    }
    if literal.is_empty() {
        None
    } else {
        Some(literal.to_string())
    }
}
