//! Session configuration and constants.
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// Prompt shown before each interactive turn
    pub prompt: String,

    /// Marker that turns a line into a command
    pub command_prefix: char,

    /// Chords that cancel an in-flight turn (Alt+C, Ctrl+C)
    pub cancel_chords: Vec<String>,

    /// Inputs that end the session (compared case-insensitively)
    pub exit_commands: Vec<String>,

    /// Headless line that ends the current buffered turn
    pub send_sentinel: String,

    /// Indicator emitted before the backend starts
    pub processing_message: String,

    /// Notice emitted when the user cancels a turn
    pub cancelled_message: String,

    /// Reported when the backend returns false
    pub failed_message: String,

    /// Reason handed to backends that support cancellation
    pub cancel_reason: String,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "User: ".to_string(),
            command_prefix: '/',
            cancel_chords: DEFAULT_CANCEL_CHORDS.iter().map(|c| c.to_string()).collect(),
            exit_commands: EXIT_COMMANDS.iter().map(|c| c.to_string()).collect(),
            send_sentinel: "/send".to_string(),
            processing_message: "Thinking... (Press Alt+C to cancel)".to_string(),
            cancelled_message: "Operation cancelled by user.".to_string(),
            failed_message: "Operation failed.".to_string(),
            cancel_reason: "User requested cancellation".to_string(),
        }
    }
}

impl ReplConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn is_exit_command(&self, input: &str) -> bool {
        let input = input.trim().to_lowercase();
        self.exit_commands
            .iter()
            .any(|cmd| cmd.to_lowercase() == input)
    }

    pub fn is_command(&self, input: &str) -> bool {
        input.trim_start().starts_with(self.command_prefix)
    }
}

/// Alt+C and Ctrl+C
pub const DEFAULT_CANCEL_CHORDS: &[&str] = &["escape c", "c-c"];

pub const EXIT_COMMANDS: &[&str] = &["/exit", "/quit"];
