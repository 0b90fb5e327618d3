use serde::{Deserialize, Serialize};
use std::fmt;

/// The behaviour a connection runs for its whole life
///
/// Resolved once from the boolean flags of a [`TcpConfig`](super::TcpConfig)
/// so that dispatch is a single exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Echo,
    #[serde(rename = "Response")]
    ResponsePayload,
    Stream,
    Conversation,
    #[serde(rename = "Payload")]
    PayloadValidation,
    SilentLife,
    CloseAtFirstByte,
}

impl Mode {
    pub const ALL: [Mode; 7] = [
        Mode::ResponsePayload,
        Mode::Stream,
        Mode::Conversation,
        Mode::PayloadValidation,
        Mode::SilentLife,
        Mode::CloseAtFirstByte,
        Mode::Echo,
    ];

    /// Name used for metrics keys and history filtering
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Echo => "Echo",
            Mode::ResponsePayload => "Response",
            Mode::Stream => "Stream",
            Mode::Conversation => "Conversation",
            Mode::PayloadValidation => "Payload",
            Mode::SilentLife => "SilentLife",
            Mode::CloseAtFirstByte => "CloseAtFirstByte",
        }
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<Mode> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!(Mode::ResponsePayload.as_str(), "Response");
        assert_eq!(Mode::from_name("silentlife"), Some(Mode::SilentLife));
        assert_eq!(Mode::from_name("payload"), Some(Mode::PayloadValidation));
        assert_eq!(Mode::from_name("nope"), None);
        for mode in Mode::ALL {
            assert_eq!(Mode::from_name(&mode.to_string()), Some(mode));
        }
    }
}
