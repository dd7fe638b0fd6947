use std::any::Any;
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP parsing error: {0}")]
    HttpParse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Error returned by a request handler or by the future it hands back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<io::Error> for HandlerError {
    fn from(err: io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Why a request left the normal dispatch path.
///
/// Every early exit is classified with exactly one of these before observers
/// are notified. The numeric codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    /// The transport delivered a request without a target or method.
    NoUrl = 1,
    /// The method is rejected by the global method filter.
    BadMethod = 2,
    /// No route matched and no default handler is configured.
    NotFound = 3,
    /// The transport reported an error while the body was streaming.
    NetError = 4,
    /// The peer went away before the body was complete.
    NetAborted = 5,
    /// The body grew past the effective size cap.
    Oversized = 6,
    /// The absolute request URL could not be built.
    BadUrl = 7,
    /// The handler failed, panicked, or its future failed.
    HandlingError = 8,
}

impl ErrorReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::NoUrl => "no_url",
            ErrorReason::BadMethod => "bad_method",
            ErrorReason::NotFound => "not_found",
            ErrorReason::NetError => "net_error",
            ErrorReason::NetAborted => "net_aborted",
            ErrorReason::Oversized => "oversized",
            ErrorReason::BadUrl => "bad_url",
            ErrorReason::HandlingError => "handling_error",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
