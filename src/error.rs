use std::fmt::{self, Display};

/// Unified error type for the bridging engine.
///
/// Wraps a descriptive message, the way the protocol and configuration
/// layers each used to roll their own string-wrapper error before this
/// crate unified them. Constructed directly or via `From` for the
/// lower-level errors (`io`, `rosc`, `midir`) that processors encounter.
#[derive(Debug, Clone)]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        EngineError(msg.into())
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Engine Error: {}", self.0)
    }
}

impl std::error::Error for EngineError {}

impl From<String> for EngineError {
    fn from(value: String) -> Self {
        EngineError(value)
    }
}

impl From<&str> for EngineError {
    fn from(value: &str) -> Self {
        EngineError(value.to_owned())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError(format!("IO error: {}", e))
    }
}

impl From<rosc::OscError> for EngineError {
    fn from(e: rosc::OscError) -> Self {
        EngineError(format!("OSC error: {}", e))
    }
}

impl From<midir::InitError> for EngineError {
    fn from(e: midir::InitError) -> Self {
        EngineError(format!("MIDI init error: {}", e))
    }
}

impl From<midir::ConnectError<midir::MidiOutput>> for EngineError {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        EngineError(format!("MIDI connect error: {}", e))
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for EngineError {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        EngineError(format!("MIDI connect error: {}", e))
    }
}

impl From<midir::SendError> for EngineError {
    fn from(e: midir::SendError) -> Self {
        EngineError(format!("MIDI send error: {}", e))
    }
}

/// Errors surfaced while ingesting a configuration tree (spec.md §6, §7 item 1).
#[derive(Debug, Clone)]
pub enum ConfigError {
    MissingElement(String),
    DuplicateId(String),
    UnknownMode(String),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingElement(e) => write!(f, "missing configuration element: {}", e),
            ConfigError::DuplicateId(id) => write!(f, "duplicate id in configuration: {}", id),
            ConfigError::UnknownMode(m) => write!(f, "unknown object handling mode: {}", m),
            ConfigError::Invalid(m) => write!(f, "invalid configuration: {}", m),
        }
    }
}

impl std::error::Error for ConfigError {}
