//! Error taxonomy shared by the session, the monitors and the collectors

use std::time::Duration as StdDuration;

/// Malformed inbound line. The read loop drops the line and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,
    #[error("unknown verb: {0}")]
    UnknownVerb(String),
    #[error("field without separator: {0}")]
    MissingSeparator(String),
    #[error("unterminated quoted value for field {0}")]
    UnterminatedQuote(String),
    #[error("{verb} is missing required field {field}")]
    MissingField { verb: &'static str, field: &'static str },
    #[error("invalid value for field {field}: {value:?}")]
    InvalidField { field: String, value: String },
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("device not found: {0}")]
    Lookup(String),

    #[error("device {0} has no value yet")]
    NoData(String),

    #[error("feed {uid} is stale: last update {age_secs}s ago, allowed {max_skew_secs}s")]
    Staleness {
        uid: String,
        age_secs: i64,
        max_skew_secs: i64,
    },

    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("connection closed by hub")]
    ConnectionClosed,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("session closed, outbound queue is gone")]
    SessionClosed,

    #[error("sink error: {0}")]
    Sink(String),

    #[error("timed out after {0:?}")]
    Timeout(StdDuration),
}

impl Error {
    /// Fatal errors end the process; the others degrade health and the
    /// session keeps processing messages.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Protocol(_)
            | Error::Lookup(_)
            | Error::NoData(_)
            | Error::Staleness { .. }
            | Error::Sink(_) => false,
            Error::Connection(_)
            | Error::ConnectionClosed
            | Error::Configuration(_)
            | Error::SessionClosed
            | Error::Timeout(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!Error::Lookup("a".into()).is_fatal());
        assert!(!Error::Protocol(ProtocolError::Empty).is_fatal());
        assert!(!Error::Staleness { uid: "b".into(), age_secs: 99, max_skew_secs: 25 }.is_fatal());
        assert!(Error::ConnectionClosed.is_fatal());
        assert!(Error::Configuration("refuid is empty".into()).is_fatal());
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: Error = ProtocolError::UnknownVerb("frob".into()).into();
        assert_eq!(err.to_string(), "protocol error: unknown verb: frob");
    }
}
