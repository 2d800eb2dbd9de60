//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Error types for character devices

use crate::BackendKind;
use thiserror::Error;

/// Result type for chardev operations
pub type Result<T> = std::result::Result<T, ChardevError>;

/// Chardev error types
#[derive(Debug, Error)]
pub enum ChardevError {
    /// I/O error from the underlying descriptor or socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error from the telnet layer
    #[error("Protocol error: {0}")]
    Protocol(#[from] chario_telnetcodec::CodecError),

    /// TLS configuration or handshake failure
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// An option has an invalid value or conflicts with another option
    #[error("Invalid option '{option}': {reason}")]
    Config {
        /// Name of the offending option
        option: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A required option was not given
    #[error("Missing required option '{0}'")]
    MissingOption(&'static str),

    /// Backend name not recognised
    #[error("Unknown chardev backend '{0}'")]
    UnknownBackend(String),

    /// Option name not recognised
    #[error("Unknown option '{0}'")]
    UnknownOption(String),

    /// The backend does not implement the requested operation
    #[error("Operation '{operation}' not supported by {kind} chardev")]
    NotSupported {
        /// Backend kind
        kind: BackendKind,
        /// Operation name
        operation: &'static str,
    },

    /// Socket chardev has no peer
    #[error("Chardev '{0}' is not connected")]
    NotConnected(String),

    /// Chardev has been closed
    #[error("Chardev '{0}' is closed")]
    Closed(String),

    /// A frontend is already attached to a non multiplexed chardev
    #[error("Chardev '{0}' already has a frontend attached")]
    FrontendAttached(String),

    /// The direct read path is in use by the frontend read pump
    #[error("Chardev '{0}' reader is owned by the attached frontend")]
    ReaderBusy(String),

    /// Multiplexer frontend ceiling reached
    #[error("Mux is full ({0} frontends)")]
    MuxFull(usize),

    /// Named TLS credentials were not registered
    #[error("TLS credentials '{0}' not found")]
    TlsCredentialsNotFound(String),

    /// TLS credentials endpoint does not match the socket role
    #[error("TLS credentials '{name}' are for the {endpoint} endpoint")]
    TlsEndpointMismatch {
        /// Credentials id
        name: String,
        /// Endpoint the credentials were built for
        endpoint: &'static str,
    },

    /// A chardev with this label already exists
    #[error("Chardev '{0}' already exists")]
    LabelInUse(String),

    /// No chardev with this label exists
    #[error("Device '{0}' not found")]
    NotFound(String),

    /// Argument out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ChardevError {
    /// Build a [`ChardevError::Config`]
    pub fn config(option: &'static str, reason: impl Into<String>) -> Self {
        ChardevError::Config {
            option,
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    ///
    /// Recoverable errors describe a transient condition of one connection or
    /// attach attempt; retrying later might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChardevError::Io(_)
                | ChardevError::Tls(_)
                | ChardevError::NotConnected(_)
                | ChardevError::ReaderBusy(_)
        )
    }

    /// Check if the error was raised while validating options
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ChardevError::Config { .. }
                | ChardevError::MissingOption(_)
                | ChardevError::UnknownBackend(_)
                | ChardevError::UnknownOption(_)
                | ChardevError::TlsCredentialsNotFound(_)
                | ChardevError::TlsEndpointMismatch { .. }
        )
    }

    /// Check if the error indicates the chardev can no longer be used
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChardevError::Closed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChardevError::config("size", "must be a power of two");
        assert_eq!(
            err.to_string(),
            "Invalid option 'size': must be a power of two"
        );

        let err = ChardevError::MuxFull(4);
        assert_eq!(err.to_string(), "Mux is full (4 frontends)");

        let err = ChardevError::NotSupported {
            kind: BackendKind::Null,
            operation: "read_sync",
        };
        assert_eq!(
            err.to_string(),
            "Operation 'read_sync' not supported by null chardev"
        );
    }

    #[test]
    fn test_error_classification() {
        let io = ChardevError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(io.is_recoverable());
        assert!(!io.is_config_error());

        let cfg = ChardevError::MissingOption("path");
        assert!(cfg.is_config_error());
        assert!(!cfg.is_recoverable());

        assert!(ChardevError::Closed("serial0".into()).is_fatal());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: ChardevError = io_err.into();
        assert!(matches!(err, ChardevError::Io(_)));
    }
}
