use regex::Regex;

use crate::error::{Error, Result};

/// A wildcard pattern over bus service names.
///
/// Only `*` (any run of characters) and `?` (exactly one character) are special. Matching is
/// always against the whole name, so `org.mpris.MediaPlayer2.*` matches
/// `org.mpris.MediaPlayer2.vlc` but neither `org.mpris.MediaPlayer2` nor
/// `xorg.mpris.MediaPlayer2.vlc`.
#[derive(Debug, Clone)]
pub struct ServicePattern {
    source: String,
    regex: Regex,
}

impl ServicePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push('^');
        let mut literal = String::new();
        for c in pattern.chars() {
            match c {
                '*' | '?' => {
                    translated.push_str(&regex::escape(&literal));
                    literal.clear();
                    translated.push_str(if c == '*' { ".*" } else { "." });
                }
                _ => literal.push(c),
            }
        }
        translated.push_str(&regex::escape(&literal));
        translated.push('$');

        let regex = Regex::new(&translated).map_err(|source| Error::InvalidPattern { pattern: pattern.to_owned(), source })?;
        Ok(ServicePattern { source: pattern.to_owned(), regex })
    }

    pub fn matches(&self, service: &str) -> bool {
        self.regex.is_match(service)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for ServicePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}
