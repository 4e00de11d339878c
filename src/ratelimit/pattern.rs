//! Ant-style path patterns.
//!
//! Supported syntax, matched segment by segment against `/`-separated paths:
//!
//! - literal segments match exactly (case-sensitive)
//! - `?` matches one character within a segment
//! - `*` matches zero or more characters within a segment
//! - `{name}` matches zero or more characters within a segment, like `*`
//! - `**` as a whole segment matches zero or more segments
//!
//! Patterns are anchored to the whole path. Empty segments are ignored, but
//! a leading `/` must agree between pattern and path. A pattern without `**`
//! also needs the trailing `/` to agree, except that a final lone `*` accepts
//! an empty last segment (`/files/*` matches `/files/`). Patterns containing
//! `**` ignore the trailing `/`.

use std::fmt;

use crate::error::{Result, TurnstileError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Glob(Vec<GlobToken>),
    AnyDepth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobToken {
    Char(char),
    AnyChar,
    AnyRun,
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
    leading_slash: bool,
    trailing_slash: bool,
    any_depth: bool,
    lone_star_tail: bool,
}

impl PathPattern {
    /// Compile a pattern string.
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(TurnstileError::Config("path pattern must not be empty".to_string()));
        }

        let mut segments = Vec::new();
        let mut last_raw = "";
        for raw in trimmed.split('/').filter(|s| !s.is_empty()) {
            let segment = compile_segment(raw)?;
            last_raw = raw;
            // Consecutive `**` are equivalent to one.
            if segment == Segment::AnyDepth && segments.last() == Some(&Segment::AnyDepth) {
                continue;
            }
            segments.push(segment);
        }

        Ok(Self {
            source: trimmed.to_string(),
            any_depth: segments.contains(&Segment::AnyDepth),
            lone_star_tail: last_raw == "*",
            segments,
            leading_slash: trimmed.starts_with('/'),
            trailing_slash: trimmed.ends_with('/'),
        })
    }

    /// The pattern as written in configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `path` matches this pattern in full.
    pub fn matches(&self, path: &str) -> bool {
        if path.starts_with('/') != self.leading_slash {
            return false;
        }

        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if self.any_depth {
            return match_segments(&self.segments, &parts);
        }

        if parts.len() == self.segments.len() {
            return path.ends_with('/') == self.trailing_slash
                && match_segments(&self.segments, &parts);
        }

        // A final `*` also covers the empty segment after a trailing `/`.
        self.lone_star_tail
            && path.ends_with('/')
            && parts.len() + 1 == self.segments.len()
            && self
                .segments
                .iter()
                .zip(&parts)
                .all(|(segment, part)| segment_matches(segment, part))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn compile_segment(raw: &str) -> Result<Segment> {
    if raw == "**" {
        return Ok(Segment::AnyDepth);
    }
    if !raw.contains(['*', '?', '{']) {
        return Ok(Segment::Literal(raw.to_string()));
    }

    let mut tokens = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if tokens.last() != Some(&GlobToken::AnyRun) {
                    tokens.push(GlobToken::AnyRun);
                }
            }
            '?' => tokens.push(GlobToken::AnyChar),
            '{' => {
                if !chars.by_ref().any(|c| c == '}') {
                    return Err(TurnstileError::Config(format!(
                        "unterminated template variable in path segment '{}'",
                        raw
                    )));
                }
                if tokens.last() != Some(&GlobToken::AnyRun) {
                    tokens.push(GlobToken::AnyRun);
                }
            }
            other => tokens.push(GlobToken::Char(other)),
        }
    }
    Ok(Segment::Glob(tokens))
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyDepth, rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((segment, rest)) => match path.split_first() {
            Some((part, remaining)) => {
                segment_matches(segment, part) && match_segments(rest, remaining)
            }
            None => false,
        },
    }
}

fn segment_matches(segment: &Segment, part: &str) -> bool {
    match segment {
        Segment::Literal(literal) => literal == part,
        Segment::Glob(tokens) => glob_matches(tokens, part),
        Segment::AnyDepth => true,
    }
}

/// Greedy wildcard match with single-point backtracking on the last `*`.
fn glob_matches(tokens: &[GlobToken], text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let (mut t, mut c) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < chars.len() {
        match tokens.get(t) {
            Some(GlobToken::AnyRun) => {
                backtrack = Some((t, c));
                t += 1;
            }
            Some(GlobToken::AnyChar) => {
                t += 1;
                c += 1;
            }
            Some(GlobToken::Char(expected)) if *expected == chars[c] => {
                t += 1;
                c += 1;
            }
            _ => match backtrack {
                Some((star_t, star_c)) => {
                    t = star_t + 1;
                    c = star_c + 1;
                    backtrack = Some((star_t, star_c + 1));
                }
                None => return false,
            },
        }
    }

    tokens[t..].iter().all(|token| *token == GlobToken::AnyRun)
}
