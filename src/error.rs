//! Error taxonomy for the radio

use std::path::PathBuf;
use thiserror::Error;

/// Application-specific error type
#[derive(Debug, Error)]
pub enum RadioError {
    /// Configuration cannot describe a working radio
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Configuration file could not be read
    #[error("failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for this radio
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Backend went away; `ready()` reconnects
    #[error("server {server}: connection lost: {reason}")]
    ConnectionLost { server: usize, reason: String },

    /// Backend address can never be reached
    #[error("server {server}: unreachable: {reason}")]
    BackendUnreachable { server: usize, reason: String },

    /// Backend or collaborator refused a command
    #[error("command '{command}' rejected: {reason}")]
    CommandRejected { command: String, reason: String },

    /// A pot could not be read this tick
    #[error("sensor channel {channel}: {reason}")]
    SensorRead { channel: u8, reason: String },

    /// Nothing can answer the request right now
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RadioError {
    pub fn rejected(command: impl Into<String>, reason: impl Into<String>) -> Self {
        RadioError::CommandRejected {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Errors that must end the control loop instead of being logged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RadioError::ConfigInvalid(_)
                | RadioError::ConfigRead { .. }
                | RadioError::ConfigParse(_)
                | RadioError::BackendUnreachable { .. }
                | RadioError::Io(_)
        )
    }
}

/// Result type alias for radio operations
pub type RadioResult<T> = Result<T, RadioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RadioError::ConfigInvalid("no stations".into()).is_fatal());
        assert!(
            RadioError::BackendUnreachable {
                server: 0,
                reason: "unknown host".into()
            }
            .is_fatal()
        );
        assert!(!RadioError::rejected("load", "No such playlist").is_fatal());
        assert!(
            !RadioError::SensorRead {
                channel: 1,
                reason: "EAGAIN".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_display_names_component_and_condition() {
        let err = RadioError::ConnectionLost {
            server: 1,
            reason: "Connection refused".into(),
        };
        assert_eq!(err.to_string(), "server 1: connection lost: Connection refused");
    }
}
