//! Wake token gate

use super::{phrase_regex, Anchor, SpeechFilter};
use crate::config::SignalPosition;
use crate::error::FilterError;
use regex::Regex;

/// Passes only text containing the signal token, with the token removed.
///
/// The token matches as whole words, so "computer" does not fire on
/// "computers". Separators left behind ("computer, lights on") are trimmed
/// from the remainder. Text that is nothing but the token is dropped.
pub struct SignalFilter {
    token: String,
    position: SignalPosition,
    matcher: Regex,
}

impl SignalFilter {
    pub fn new(
        token: &str,
        position: SignalPosition,
        case_sensitive: bool,
    ) -> Result<Self, FilterError> {
        let anchor = match position {
            SignalPosition::Prefix => Anchor::Start,
            SignalPosition::Anywhere => Anchor::Anywhere,
        };
        let matcher = phrase_regex(token, anchor, case_sensitive)?.ok_or(FilterError::EmptySignal)?;

        Ok(Self {
            token: token.trim().to_string(),
            position,
            matcher,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn position(&self) -> SignalPosition {
        self.position
    }
}

fn trim_separators(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c == ',' || c == ':')
}

impl SpeechFilter for SignalFilter {
    fn apply(&self, text: &str) -> Option<String> {
        let found = self.matcher.find(text)?;

        let before = trim_separators(&text[..found.start()]);
        let after = trim_separators(&text[found.end()..]);

        let remainder = match (before.is_empty(), after.is_empty()) {
            (true, true) => return None,
            (true, false) => after.to_string(),
            (false, true) => before.to_string(),
            (false, false) => format!("{} {}", before, after),
        };
        Some(remainder)
    }

    fn name(&self) -> &'static str {
        "signal"
    }
}
