//! Recognizer running as an external process
//!
//! One process is spawned per session. It captures audio itself and writes
//! newline-delimited JSON to stdout, then exits when the utterance ends:
//!
//! ```text
//! {"level": 3.2}
//! {"level": 7.9}
//! {"results": ["computer turn on the light", "computer turn on the lights"]}
//! ```
//!
//! A line `{"error": "..."}` fails the session. Other lines are ignored.
//! Stopping the session kills the process.

use super::{RecognitionEngine, SessionEvents};
use crate::error::RecognitionError;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// One line of recognizer output
#[derive(Debug, Default, serde::Deserialize)]
struct RecognizerLine {
    #[serde(default)]
    level: Option<f32>,
    #[serde(default)]
    results: Option<Vec<String>>,
    #[serde(default)]
    error: Option<String>,
}

/// Engine that runs a recognizer command for every session
pub struct SubprocessEngine {
    command: String,
    args: Vec<String>,
}

impl SubprocessEngine {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Result<Self, RecognitionError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(RecognitionError::NotConfigured);
        }
        Ok(Self { command, args })
    }

    /// The command line, for logging
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn_failed(&self, reason: impl ToString) -> RecognitionError {
        RecognitionError::SpawnFailed {
            command: self.command.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl RecognitionEngine for SubprocessEngine {
    async fn listen(&self, events: &SessionEvents) -> Result<(), RecognitionError> {
        tracing::debug!("Spawning recognizer: {}", self.command_line());

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_failed(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.spawn_failed("stdout not available"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut got_results = false;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| RecognitionError::SessionFailed(format!("Reading recognizer output: {}", e)))?
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parsed: RecognizerLine = match serde_json::from_str(line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!("Ignoring recognizer output {:?}: {}", line, e);
                    continue;
                }
            };

            if let Some(error) = parsed.error {
                return Err(RecognitionError::SessionFailed(error));
            }
            if let Some(level) = parsed.level {
                events.level(level);
            }
            if let Some(results) = parsed.results {
                got_results = true;
                events.results(results);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| RecognitionError::SessionFailed(e.to_string()))?;

        if !status.success() && !got_results {
            return Err(RecognitionError::SessionFailed(format!(
                "recognizer exited with {}",
                status
            )));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "subprocess"
    }
}
