//! Phrase to canonical command mapping

use super::{phrase_regex, Anchor, SpeechFilter};
use crate::config::MatchMode;
use crate::error::FilterError;
use regex::Regex;

/// A canonical command and the phrasings that trigger it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPattern {
    pub canonical: String,
    pub variants: Vec<String>,
}

struct CompiledPattern {
    pattern: CommandPattern,
    matchers: Vec<Regex>,
}

/// Maps free-form text to the first registered command it matches.
///
/// Patterns are registered while the filter is owned mutably; once it is
/// moved into a [`FilterChain`](super::FilterChain) it is read-only.
pub struct CommandFilter {
    mode: MatchMode,
    case_sensitive: bool,
    patterns: Vec<CompiledPattern>,
}

impl CommandFilter {
    pub fn new(mode: MatchMode, case_sensitive: bool) -> Self {
        Self {
            mode,
            case_sensitive,
            patterns: Vec::new(),
        }
    }

    /// Register the phrasings of one canonical command.
    ///
    /// Blank variants are skipped; a pattern with none left is rejected.
    pub fn add_pattern<I, S>(&mut self, canonical: &str, variants: I) -> Result<(), FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let canonical = canonical.trim();
        if canonical.is_empty() {
            return Err(FilterError::EmptyCanonical);
        }

        let anchor = match self.mode {
            MatchMode::Exact => Anchor::Full,
            MatchMode::Contains => Anchor::Anywhere,
        };

        let mut kept = Vec::new();
        let mut matchers = Vec::new();
        for variant in variants {
            let variant = variant.as_ref();
            if let Some(matcher) = phrase_regex(variant, anchor, self.case_sensitive)? {
                kept.push(variant.trim().to_string());
                matchers.push(matcher);
            }
        }

        if matchers.is_empty() {
            return Err(FilterError::NoVariants(canonical.to_string()));
        }

        if self.patterns.iter().any(|p| p.pattern.canonical == canonical) {
            tracing::debug!("Command {} registered more than once", canonical);
        }

        self.patterns.push(CompiledPattern {
            pattern: CommandPattern {
                canonical: canonical.to_string(),
                variants: kept,
            },
            matchers,
        });
        Ok(())
    }

    /// Registered patterns in registration order
    pub fn patterns(&self) -> Vec<&CommandPattern> {
        self.patterns.iter().map(|p| &p.pattern).collect()
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }
}

impl SpeechFilter for CommandFilter {
    fn apply(&self, text: &str) -> Option<String> {
        self.patterns
            .iter()
            .find(|p| p.matchers.iter().any(|m| m.is_match(text)))
            .map(|p| p.pattern.canonical.clone())
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
