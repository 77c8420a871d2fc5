use crate::error::{TesseraError, TesseraResult};
use regex::Regex;
use std::fmt;

/// Predicate deciding whether a key listener sees an event
#[derive(Clone)]
pub enum KeyMatcher {
    Exact(String),
    /// Raw string prefix, not segment-aware
    Prefix(String),
    /// Anchored regular expression
    Pattern(Regex),
}

impl KeyMatcher {
    /// Plain keys, dotted ones included, match exactly; anything with
    /// other regex metacharacters is compiled as a pattern anchored at both
    /// ends. Use `\.` inside a pattern for a literal dot.
    pub fn parse(pattern: &str) -> TesseraResult<Self> {
        if regex::escape(pattern) == pattern.replace('.', "\\.") {
            return Ok(KeyMatcher::Exact(pattern.to_string()));
        }
        Self::pattern(pattern)
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyMatcher::Prefix(prefix.into())
    }

    pub fn pattern(pattern: &str) -> TesseraResult<Self> {
        let anchored = format!("^(?:{})$", pattern);
        Regex::new(&anchored)
            .map(KeyMatcher::Pattern)
            .map_err(|source| TesseraError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyMatcher::Exact(k) => k == key,
            KeyMatcher::Prefix(p) => key.starts_with(p.as_str()),
            KeyMatcher::Pattern(re) => re.is_match(key),
        }
    }

    /// Textual identity used to pair a listener with its registration
    pub fn id(&self) -> String {
        match self {
            KeyMatcher::Exact(k) => format!("exact:{}", k),
            KeyMatcher::Prefix(p) => format!("prefix:{}", p),
            KeyMatcher::Pattern(re) => format!("pattern:{}", re.as_str()),
        }
    }
}

impl fmt::Debug for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl PartialEq for KeyMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

/// Segment-aware key prefix used by module listeners
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModulePrefix(String);

impl ModulePrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self(prefix.trim_end_matches('.').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `a.b` covers `a.b` and `a.b.c` but not `a.bc`
    pub fn matches(&self, key: &str) -> bool {
        if self.0.is_empty() {
            return true;
        }
        match key.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_key_is_exact() {
        let m = KeyMatcher::parse("timeout").unwrap();
        assert!(matches!(m, KeyMatcher::Exact(_)));
        assert!(m.matches("timeout"));
        assert!(!m.matches("timeout_ms"));
    }

    #[test]
    fn test_regex_is_anchored() {
        let m = KeyMatcher::parse("db\\..*").unwrap();
        assert!(m.matches("db.host"));
        assert!(!m.matches("cache.db.host"));

        let dotted = KeyMatcher::parse("server.port").unwrap();
        assert!(dotted.matches("server.port"));
        assert!(!dotted.matches("server.port.max"));
    }

    #[test]
    fn test_dotted_key_does_not_wildcard() {
        let m = KeyMatcher::parse("server.port").unwrap();
        assert_eq!(m, KeyMatcher::Exact("server.port".to_string()));
        assert!(!m.matches("serverXport"));

        let pattern = KeyMatcher::parse("server.port|db.host").unwrap();
        assert!(matches!(pattern, KeyMatcher::Pattern(_)));
        assert!(pattern.matches("db.host"));
    }

    #[test]
    fn test_prefix_matcher() {
        let m = KeyMatcher::prefix("log");
        assert!(m.matches("log.level"));
        assert!(m.matches("logger"));
        assert!(!m.matches("catalog"));
        assert_ne!(m, KeyMatcher::Exact("log".to_string()));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = KeyMatcher::parse("a(").unwrap_err();
        assert!(matches!(err, TesseraError::InvalidPattern { .. }));
    }

    #[test]
    fn test_module_prefix_segments() {
        let p = ModulePrefix::new("server");
        assert!(p.matches("server"));
        assert!(p.matches("server.port"));
        assert!(!p.matches("serverless.port"));
        assert_eq!(ModulePrefix::new("server.").as_str(), "server");
    }
}
