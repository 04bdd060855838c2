//! Remote command vocabulary and acknowledgments.
//!
//! Commands arrive as plain strings from a paired device. Each dispatch
//! yields exactly one [`Acknowledgment`], whether or not any transport is
//! connected to carry it back.

use serde::{Deserialize, Serialize};

/// Error code for strings outside the vocabulary
pub const UNKNOWN_COMMAND: &str = "unknown_command";

/// Error code for commands that need a running session
pub const NO_ACTIVE_SESSION: &str = "no_active_session";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteCommand {
    Pause,
    Resume,
    NextStep,
    #[serde(rename = "PREV_STEP")]
    PreviousStep,
    SkipRest,
    End,
}

impl RemoteCommand {
    /// Parse a wire string, ignoring surrounding whitespace and case
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PAUSE" => Some(RemoteCommand::Pause),
            "RESUME" => Some(RemoteCommand::Resume),
            "NEXT_STEP" => Some(RemoteCommand::NextStep),
            "PREV_STEP" => Some(RemoteCommand::PreviousStep),
            "SKIP_REST" => Some(RemoteCommand::SkipRest),
            "END" => Some(RemoteCommand::End),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteCommand::Pause => "PAUSE",
            RemoteCommand::Resume => "RESUME",
            RemoteCommand::NextStep => "NEXT_STEP",
            RemoteCommand::PreviousStep => "PREV_STEP",
            RemoteCommand::SkipRest => "SKIP_REST",
            RemoteCommand::End => "END",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckResult {
    Success,
    Error { code: String },
}

/// Reply to a remote command, matched to its request by correlation id
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Acknowledgment {
    pub correlation_id: String,
    pub command: String,
    pub result: AckResult,
}

impl Acknowledgment {
    pub fn success(correlation_id: &str, command: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            command: command.to_string(),
            result: AckResult::Success,
        }
    }

    pub fn error(correlation_id: &str, command: &str, code: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            command: command.to_string(),
            result: AckResult::Error {
                code: code.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == AckResult::Success
    }

    pub fn error_code(&self) -> Option<&str> {
        match &self.result {
            AckResult::Success => None,
            AckResult::Error { code } => Some(code),
        }
    }
}
