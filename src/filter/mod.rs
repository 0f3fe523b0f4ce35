//! Speech filter chain
//!
//! Recognized text passes through an ordered list of stages. Each stage
//! either rewrites the text for the next one or drops it:
//!
//! ```text
//! "computer turn on the light"
//!     │ SignalFilter   (wake token present? strip it)
//!     ▼
//! "turn on the light"
//!     │ CommandFilter  (which registered phrase is this?)
//!     ▼
//! "LIGHT_ON"
//! ```
//!
//! Dropping is the normal outcome for most speech and is only logged at
//! debug level.

pub mod command;
pub mod signal;

pub use command::{CommandFilter, CommandPattern};
pub use signal::SignalFilter;

use crate::config::Config;
use crate::error::FilterError;
use crate::recognition::RecognitionListener;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;

/// One stage of the chain
pub trait SpeechFilter: Send + Sync {
    /// Transform `text` for the next stage, or drop it
    fn apply(&self, text: &str) -> Option<String>;

    /// Stage name for logging
    fn name(&self) -> &'static str;
}

/// Receives recognized speech, best hypothesis first
pub trait SpeechListener: Send + Sync {
    fn on_speech_recognized(&self, candidates: &[String]);
}

/// Ordered stages run until one drops the text
#[derive(Default)]
pub struct FilterChain {
    stages: Vec<Box<dyn SpeechFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn with(mut self, stage: impl SpeechFilter + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Build the signal and command stages from configuration
    pub fn from_config(config: &Config) -> Result<Self, FilterError> {
        let speech = &config.speech;
        let signal = SignalFilter::new(&speech.signal, speech.signal_position, speech.case_sensitive)?;

        let mut commands = CommandFilter::new(speech.match_mode, speech.case_sensitive);
        for command in &config.commands {
            commands.add_pattern(&command.canonical, &command.variants)?;
        }

        tracing::debug!(
            "Filter chain: signal {:?} ({:?}), {} command(s), {:?} matching",
            speech.signal,
            speech.signal_position,
            commands.patterns().len(),
            speech.match_mode
        );

        Ok(Self::new().with(signal).with(commands))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run `text` through every stage
    pub fn apply(&self, text: &str) -> Option<String> {
        let mut current = text.to_string();
        for stage in &self.stages {
            match stage.apply(&current) {
                Some(next) => current = next,
                None => {
                    tracing::debug!("{} dropped {:?}", stage.name(), current);
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Run hypotheses in order and return the first that survives
    pub fn apply_candidates(&self, candidates: &[String]) -> Option<String> {
        candidates.iter().find_map(|candidate| self.apply(candidate))
    }
}

/// Recognition listener that filters speech before passing it on.
///
/// Lifecycle and level events go straight through. Speech reaches the
/// downstream listener only when a candidate survives the chain, as a
/// single-element list holding the chain's output.
pub struct FilteredListener {
    chain: FilterChain,
    downstream: Arc<dyn RecognitionListener>,
}

impl FilteredListener {
    pub fn new(chain: FilterChain, downstream: Arc<dyn RecognitionListener>) -> Self {
        Self { chain, downstream }
    }
}

impl SpeechListener for FilteredListener {
    fn on_speech_recognized(&self, candidates: &[String]) {
        match self.chain.apply_candidates(candidates) {
            Some(command) => {
                tracing::debug!("Speech matched command {:?}", command);
                self.downstream.on_speech_recognized(&[command]);
            }
            None => tracing::debug!("No command in {:?}", candidates),
        }
    }
}

impl RecognitionListener for FilteredListener {
    fn on_start(&self) {
        self.downstream.on_start();
    }

    fn on_stop(&self) {
        self.downstream.on_stop();
    }

    fn on_sound_changed(&self, level: f32) {
        self.downstream.on_sound_changed(level);
    }
}

/// Where a phrase must appear within the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    /// At the start, after optional whitespace
    Start,
    /// Anywhere, as whole words
    Anywhere,
    /// The whole text, ignoring surrounding whitespace
    Full,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Compile `phrase` into a regex that tolerates any whitespace between
/// its words. Returns `None` for a blank phrase.
fn phrase_regex(
    phrase: &str,
    anchor: Anchor,
    case_sensitive: bool,
) -> Result<Option<Regex>, FilterError> {
    let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return Ok(None);
    }
    let body = words.join(r"\s+");

    let trimmed = phrase.trim();
    let open = trimmed.chars().next().is_some_and(is_word_char);
    let close = trimmed.chars().last().is_some_and(is_word_char);
    let boundary = |needed: bool| if needed { r"\b" } else { "" };

    let pattern = match anchor {
        Anchor::Start => format!(r"^\s*{}{}", body, boundary(close)),
        Anchor::Anywhere => format!("{}{}{}", boundary(open), body, boundary(close)),
        Anchor::Full => format!(r"^\s*{}\s*$", body),
    };

    RegexBuilder::new(&pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map(Some)
        .map_err(|e| FilterError::InvalidPattern {
            phrase: phrase.to_string(),
            reason: e.to_string(),
        })
}
