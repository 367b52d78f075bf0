//! Glob patterns over cache keys.
//!
//! Supports `*` (any run, including empty) and `?` (exactly one
//! character). Everything else matches literally.

use regex::Regex;

use super::errors::{BroadcastError, BroadcastResult};

/// Compiled glob
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> BroadcastResult<Self> {
        let regex = Regex::new(&glob_to_regex(pattern))
            .map_err(|err| BroadcastError::InvalidPattern(err.to_string()))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

/// Anchored regular expression equivalent to `pattern`
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}
