use std::time::Duration;
use thiserror::Error;

/// Region of the packet that was being read when the input ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    PrimaryHeader,
    SecondaryHeader,
    Payload,
}

impl std::fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DecodeStage::PrimaryHeader => "primary header",
            DecodeStage::SecondaryHeader => "secondary header",
            DecodeStage::Payload => "telemetry payload",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: {length} bytes, minimum length is {minimum} bytes")]
    TooShort { length: usize, minimum: usize },

    #[error("failed to decode {stage}: needed {needed} bytes, {available} available")]
    Truncated {
        stage: DecodeStage,
        needed: usize,
        available: usize,
    },
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage connection failure: {0}")]
    ConnectionFailure(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl PersistError {
    /// Constraint violations fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PersistError::ConstraintViolation(_))
    }
}

impl From<rusqlite::Error> for PersistError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                PersistError::ConstraintViolation(e.to_string())
            }
            _ => PersistError::ConnectionFailure(s!(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("no webhook URL configured")]
    MissingEndpoint,

    #[error("failed to send notification: {0}")]
    TransportFailure(String),

    #[error("notification failed with status: {0}")]
    NonOkResponse(u16),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::TransportFailure(s!(e))
    }
}

/// Failures that end the ingestion loop and are handed to its supervisor.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write packet to database: {0}")]
    Persist(#[from] PersistError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be a non-zero port")]
    ZeroPort(&'static str),

    #[error("ingestion and healthcheck ports must differ (both {0})")]
    PortClash(u16),
}
