//! Error types for recording, replay, and persistence
//!
//! Format errors and replay divergence are fatal for the session that hit
//! them. `TtdError::Abort` is the one variant a host is expected to catch:
//! it carries the reason control returned to the host loop.

use crate::events::EventKind;
use crate::snapshot::PtrId;
use std::fmt;
use thiserror::Error;

/// Why replay unwound back to the host's control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Replay ran past the last recorded event
    EndOfLog,
    /// The debugger asked to move to another event time
    TopLevelAbortRequest {
        /// Event time the host should move to
        target_time: i64,
    },
    /// An uncaught exception escaped a top-level call
    UncaughtException {
        /// Event time of the top-level call that threw
        target_time: i64,
    },
}

impl AbortReason {
    /// Numeric abort code shared with hosts
    pub fn code(&self) -> u32 {
        match self {
            AbortReason::EndOfLog => 1,
            AbortReason::TopLevelAbortRequest { .. } => 2,
            AbortReason::UncaughtException { .. } => 3,
        }
    }

    /// Target event time, if the abort carries one
    pub fn target_time(&self) -> Option<i64> {
        match self {
            AbortReason::EndOfLog => None,
            AbortReason::TopLevelAbortRequest { target_time }
            | AbortReason::UncaughtException { target_time } => Some(*target_time),
        }
    }

    /// True if replay simply ran out of log
    pub fn is_end_of_log(&self) -> bool {
        matches!(self, AbortReason::EndOfLog)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::EndOfLog => write!(f, "end of log reached"),
            AbortReason::TopLevelAbortRequest { target_time } => {
                write!(f, "move to event time {}", target_time)
            }
            AbortReason::UncaughtException { target_time } => {
                write!(f, "uncaught exception in call at {}", target_time)
            }
        }
    }
}

/// Errors raised by the record/replay engine
#[derive(Debug, Error)]
pub enum TtdError {
    /// Underlying stream failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended where more bytes are structurally required
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// A keyed read found a different key
    #[error("Expected key '{expected}' but found '{found}'")]
    KeyMismatch {
        /// Key the reader asked for
        expected: &'static str,
        /// Key present in the stream
        found: String,
    },

    /// A structural token did not match
    #[error("Expected {expected} but found {found}")]
    TokenMismatch {
        /// Token the reader asked for
        expected: &'static str,
        /// Text or byte present in the stream
        found: String,
    },

    /// An enum tag outside the known range
    #[error("Unknown {what} discriminant {value}")]
    UnknownDiscriminant {
        /// Enum being decoded
        what: &'static str,
        /// Raw value read
        value: u64,
    },

    /// Stream header is missing or malformed
    #[error("Invalid stream header")]
    InvalidHeader,

    /// Stream written by an incompatible version
    #[error("Incompatible format version (expected {expected}, got {actual})")]
    IncompatibleVersion {
        /// Version this build reads
        expected: u32,
        /// Version found in the header
        actual: u32,
    },

    /// Stream was written on a machine with different byte order
    #[error("Endianness mismatch")]
    EndiannessMismatch,

    /// Binary stream digest does not match its contents
    #[error("Checksum verification failed")]
    ChecksumMismatch,

    /// The replayed program asked for a different event time than the log holds
    #[error("Replay divergence: expected event time {expected}, log holds {found}")]
    ReplayDivergence {
        /// Internal event-time counter
        expected: i64,
        /// Time stored on the current log entry
        found: i64,
    },

    /// The replayed program asked for a different kind of event
    #[error("Expected {expected:?} event at time {time} but found {found:?}")]
    EventKindMismatch {
        /// Event time of the mismatching entry
        time: i64,
        /// Kind the replay asked for
        expected: EventKind,
        /// Kind stored in the log
        found: EventKind,
    },

    /// A replayed action produced a different result than the recording
    #[error("Replayed action at time {time} produced {found}, log holds {expected}")]
    ActionResultMismatch {
        /// Event time of the action
        time: i64,
        /// Result stored in the log
        expected: String,
        /// Result the replay produced
        found: String,
    },

    /// Persisted event times are not strictly increasing
    #[error("Event time {found} follows {previous}")]
    EventOrder {
        /// Time of the preceding entry
        previous: i64,
        /// Time of the offending entry
        found: i64,
    },

    /// Replay returned control to the host
    #[error("Replay aborted: {0}")]
    Abort(AbortReason),

    /// The heap adapter reported an object with no extraction handler
    #[error("No extraction handler for object {0}")]
    UnhandledObject(PtrId),

    /// Inflation referenced an id that was never inflated
    #[error("Missing {what} {id} during inflation")]
    MissingInflateTarget {
        /// Table the id belongs to
        what: &'static str,
        /// Persisted id
        id: u64,
    },

    /// Caller broke an API contract
    #[error("Policy violation: {0}")]
    PolicyViolation(&'static str),

    /// A named resource stream does not exist
    #[error("Missing stream '{0}'")]
    MissingStream(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration TOML could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be rendered as TOML
    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// The host adapter failed
    #[error("Host error: {0}")]
    Host(String),
}

impl TtdError {
    /// True for errors the host loop should treat as a normal unwind
    pub fn is_abort(&self) -> bool {
        matches!(self, TtdError::Abort(_))
    }

    /// Abort reason, if this is an abort
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            TtdError::Abort(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Result alias used across the engine
pub type TtdResult<T> = Result<T, TtdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_codes() {
        assert_eq!(AbortReason::EndOfLog.code(), 1);
        assert_eq!(AbortReason::TopLevelAbortRequest { target_time: 4 }.code(), 2);
        assert_eq!(AbortReason::UncaughtException { target_time: 9 }.code(), 3);
        assert_eq!(AbortReason::EndOfLog.target_time(), None);
        assert_eq!(
            AbortReason::UncaughtException { target_time: 9 }.target_time(),
            Some(9)
        );
    }

    #[test]
    fn test_abort_error_classification() {
        let err = TtdError::Abort(AbortReason::EndOfLog);
        assert!(err.is_abort());
        assert_eq!(err.abort_reason(), Some(AbortReason::EndOfLog));
        assert!(!TtdError::UnexpectedEof.is_abort());
    }

    #[test]
    fn test_error_messages() {
        let err = TtdError::KeyMismatch {
            expected: "eventTime",
            found: "eventKind".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Expected key 'eventTime' but found 'eventKind'"
        );
        let err = TtdError::ReplayDivergence {
            expected: 3,
            found: 5,
        };
        assert!(err.to_string().contains("expected event time 3"));
    }
}
