//! Glob matching over qualified catalog names.
//!
//! A pattern has one or two dot-separated segments. With two segments the first
//! matches the schema and the second the local name; with one segment only the
//! local name is matched and any schema is accepted.
//!
//! Segments support `*`, `?` and character classes (`[abc]`, `[!abc]`, `[a-z]`).
//!
//! Case policy follows Postgres identifier folding: an unquoted segment is folded
//! to lower case, a `"Quoted"` segment is kept verbatim. The folded segment is
//! then matched case-sensitively against the name as stored in the catalog.
//!
//! Excludes always win: a name matched by any exclude is never selected.

use crate::ident::QualifiedName;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,

    #[error("pattern {0:?} has more than two segments")]
    TooManySegments(String),

    #[error("pattern {0:?} has an unterminated quote")]
    UnterminatedQuote(String),

    #[error("pattern {pattern:?} is invalid: {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Glob(Regex),
}

impl Segment {
    fn matches(&self, value: &str) -> bool {
        match self {
            Segment::Literal(s) => s == value,
            Segment::Glob(re) => re.is_match(value),
        }
    }
}

/// A compiled one- or two-segment name pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    schema: Option<Segment>,
    name: Segment,
}

impl Pattern {
    /// Compile a glob pattern such as `public.*`, `*.orders` or `tmp_*`.
    pub fn glob(pattern: &str) -> Result<Self, PatternError> {
        Self::compile(pattern, true)
    }

    /// Compile an exact name (`users` or `public.users`). Glob characters are literal.
    pub fn exact(name: &str) -> Result<Self, PatternError> {
        Self::compile(name, false)
    }

    fn compile(raw: &str, glob: bool) -> Result<Self, PatternError> {
        let segments = split_segments(raw)?;
        let build = |seg: &str| -> Result<Segment, PatternError> {
            if glob && has_glob_chars(seg) {
                let re = Regex::new(&glob_to_regex(seg)).map_err(|source| PatternError::Invalid {
                    pattern: raw.to_string(),
                    source,
                })?;
                Ok(Segment::Glob(re))
            } else {
                Ok(Segment::Literal(seg.to_string()))
            }
        };

        let (schema, name) = match segments.as_slice() {
            [name] => (None, build(name)?),
            [schema, name] => (Some(build(schema)?), build(name)?),
            _ => return Err(PatternError::TooManySegments(raw.to_string())),
        };

        Ok(Self {
            raw: raw.to_string(),
            schema,
            name,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, name: &QualifiedName) -> bool {
        if let Some(schema) = &self.schema
            && !schema.matches(&name.schema)
        {
            return false;
        }
        self.name.matches(&name.name)
    }

    /// The schema this pattern is pinned to, when its schema segment is a literal.
    pub fn literal_schema(&self) -> Option<&str> {
        match &self.schema {
            Some(Segment::Literal(s)) => Some(s),
            _ => None,
        }
    }
}

/// An include pattern together with its excludes.
#[derive(Debug, Clone)]
pub struct Selector {
    pub include: Pattern,
    pub excludes: Vec<Pattern>,
}

impl Selector {
    pub fn new(include: Pattern, excludes: Vec<Pattern>) -> Self {
        Self { include, excludes }
    }

    /// Compile a glob include and glob excludes.
    pub fn from_globs(include: &str, excludes: &[String]) -> Result<Self, PatternError> {
        let excludes = excludes
            .iter()
            .map(|e| Pattern::glob(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(Pattern::glob(include)?, excludes))
    }

    pub fn is_match(&self, name: &QualifiedName) -> bool {
        if self.excludes.iter().any(|e| e.matches(name)) {
            return false;
        }
        self.include.matches(name)
    }

    /// Keep the items whose name is selected, preserving input order.
    pub fn select<'a, T, F>(&self, items: &'a [T], name_of: F) -> Vec<&'a T>
    where
        F: Fn(&T) -> &QualifiedName,
    {
        items.iter().filter(|i| self.is_match(name_of(i))).collect()
    }
}

/// Return the names selected by `pattern` minus `excludes`, in input order.
pub fn match_names(
    names: &[QualifiedName],
    pattern: &str,
    excludes: &[String],
) -> Result<Vec<QualifiedName>, PatternError> {
    let selector = Selector::from_globs(pattern, excludes)?;
    Ok(selector
        .select(names, |n| n)
        .into_iter()
        .cloned()
        .collect())
}

/// Split at unquoted dots, folding unquoted segments to lower case.
fn split_segments(raw: &str) -> Result<Vec<String>, PatternError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PatternError::Empty);
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            '"' => quoted = !quoted,
            '.' if !quoted => segments.push(std::mem::take(&mut current)),
            c if quoted => current.push(c),
            c => current.extend(c.to_lowercase()),
        }
    }
    if quoted {
        return Err(PatternError::UnterminatedQuote(raw.to_string()));
    }
    segments.push(current);

    if segments.iter().any(|s| s.is_empty()) {
        return Err(PatternError::Empty);
    }
    Ok(segments)
}

fn has_glob_chars(segment: &str) -> bool {
    segment.contains(['*', '?', '['])
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push('[');
                    let mut j = i + 1;
                    if chars[j] == '!' || chars[j] == '^' {
                        out.push('^');
                        j += 1;
                    }
                    for &c in &chars[j..end] {
                        match c {
                            '\\' | '[' | ']' | '&' | '~' => {
                                out.push('\\');
                                out.push(c);
                            }
                            c => out.push(c),
                        }
                    }
                    out.push(']');
                    i = end;
                }
                None => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// Index of the `]` closing the class that opens at `start`, if any.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if j < chars.len() && (chars[j] == '!' || chars[j] == '^') {
        j += 1;
    }
    // a leading `]` is part of the class
    if j < chars.len() && chars[j] == ']' {
        j += 1;
    }
    (j..chars.len()).find(|&k| chars[k] == ']')
}
