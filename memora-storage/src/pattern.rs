//! Key patterns for bulk invalidation.
//!
//! Globs follow shell conventions: `*` matches any run of characters
//! (including none), `?` matches one character and `[...]` a character class
//! (`[!...]` negates). Globs are anchored at both ends and compiled to a
//! [`Regex`].

use std::fmt;

use memora_core::ConfigError;
use regex::Regex;

/// A compiled key pattern.
#[derive(Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
    is_glob: bool,
}

impl KeyPattern {
    /// Compile a shell-style glob.
    pub fn glob(glob: &str) -> Result<Self, ConfigError> {
        let translated = glob_to_regex(glob).ok_or_else(|| invalid(glob, "unterminated character class"))?;
        let regex = Regex::new(&translated).map_err(|e| invalid(glob, &e.to_string()))?;
        Ok(Self {
            source: glob.to_string(),
            regex,
            is_glob: true,
        })
    }

    /// Compile a raw regular expression (unanchored unless the expression
    /// anchors itself).
    pub fn regex(expr: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(expr).map_err(|e| invalid(expr, &e.to_string()))?;
        Ok(Self {
            source: expr.to_string(),
            regex,
            is_glob: false,
        })
    }

    /// Whether the pattern matches `key`.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The pattern as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The longest literal prefix of a glob, used to narrow remote scans.
    /// Always empty for raw regular expressions.
    pub fn literal_prefix(&self) -> &str {
        if !self.is_glob {
            return "";
        }
        let end = self
            .source
            .find(['*', '?', '['])
            .unwrap_or(self.source.len());
        &self.source[..end]
    }
}

impl fmt::Debug for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPattern")
            .field("source", &self.source)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

fn invalid(pattern: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: "pattern".to_string(),
        value: pattern.to_string(),
        reason: reason.to_string(),
    }
}

fn glob_to_regex(glob: &str) -> Option<String> {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    out.push('^');
                }
                // A leading ']' is literal.
                if chars.peek() == Some(&']') {
                    chars.next();
                    out.push_str("\\]");
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | '&' | '~' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                }
                if !closed {
                    return None;
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }

    out.push('$');
    Some(out)
}
