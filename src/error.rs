//! Unified error types for bidi-oxide

use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for bidi-oxide
///
/// The protocol-facing variants map one-to-one onto the WebDriver BiDi error
/// codes carried on the wire; infrastructure variants are folded into
/// `unknown error` at the command boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// CDP protocol errors with the browser's code and message
    #[error("CDP error {code}: {message}")]
    Cdp { code: i64, message: String },

    /// The CDP session or socket went away mid-flight
    #[error("CDP connection closed: {0}")]
    CdpClosed(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed or semantically invalid command parameters
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown browsing context id
    #[error("no such frame: {0}")]
    NoSuchFrame(String),

    /// Unknown preload script id
    #[error("no such script: {0}")]
    NoSuchScript(String),

    /// Unknown shared node reference
    #[error("no such node: {0}")]
    NoSuchNode(String),

    /// Command arrived on a socket with no associated session
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// Capability negotiation failed
    #[error("session not created: {0}")]
    SessionNotCreated(String),

    /// Method name did not resolve to any processor
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Recognized but unimplemented operation
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Cookie write rejected
    #[error("unable to set cookie: {0}")]
    UnableToSetCookie(String),

    /// Storage partition spec missing required keys
    #[error("underspecified storage partition: {0}")]
    UnderspecifiedStoragePartition(String),

    /// Screenshot capture failed
    #[error("unable to capture screen: {0}")]
    UnableToCaptureScreen(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Anything else
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Create a new WebSocket error
    pub fn websocket<S: Into<String>>(msg: S) -> Self {
        Error::WebSocket(msg.into())
    }

    /// Create a new CDP error
    pub fn cdp(code: i64, message: impl Into<String>) -> Self {
        Error::Cdp {
            code,
            message: message.into(),
        }
    }

    /// Create a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a new no such frame error
    pub fn no_such_frame<S: Into<String>>(id: S) -> Self {
        Error::NoSuchFrame(id.into())
    }

    /// Create a new no such script error
    pub fn no_such_script<S: Into<String>>(id: S) -> Self {
        Error::NoSuchScript(id.into())
    }

    /// Create a new no such node error
    pub fn no_such_node<S: Into<String>>(msg: S) -> Self {
        Error::NoSuchNode(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a new unknown error
    pub fn unknown<S: Into<String>>(msg: S) -> Self {
        Error::Unknown(msg.into())
    }

    /// Whether this error means the target or socket detached under us.
    ///
    /// Only close-errors are swallowed during target initialization; every
    /// other failure propagates to the command that caused it.
    pub fn is_close_error(&self) -> bool {
        match self {
            Error::CdpClosed(_) => true,
            Error::WebSocket(msg) => {
                msg.contains("ConnectionClosed")
                    || msg.contains("AlreadyClosed")
                    || msg.contains("connection closed")
            }
            // Chrome answers commands on detached sessions with -32001,
            // and with "Session closed" / "Target closed" messages.
            Error::Cdp { code, message } => {
                *code == -32001
                    || message.contains("Session closed")
                    || message.contains("Target closed")
                    || message.contains("Session with given id not found")
            }
            _ => false,
        }
    }

    /// The BiDi error code string carried on the wire.
    pub fn bidi_code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) | Error::Serialization(_) => "invalid argument",
            Error::NoSuchFrame(_) => "no such frame",
            Error::NoSuchScript(_) => "no such script",
            Error::NoSuchNode(_) => "no such node",
            Error::InvalidSessionId(_) => "invalid session id",
            Error::SessionNotCreated(_) => "session not created",
            Error::UnknownCommand(_) => "unknown command",
            Error::UnsupportedOperation(_) => "unsupported operation",
            Error::UnableToSetCookie(_) => "unable to set cookie",
            Error::UnderspecifiedStoragePartition(_) => "underspecified storage partition",
            Error::UnableToCaptureScreen(_) => "unable to capture screen",
            _ => "unknown error",
        }
    }

    /// The human-readable message carried beside the code.
    pub fn bidi_message(&self) -> String {
        match self {
            Error::InvalidArgument(m)
            | Error::NoSuchFrame(m)
            | Error::NoSuchScript(m)
            | Error::NoSuchNode(m)
            | Error::InvalidSessionId(m)
            | Error::SessionNotCreated(m)
            | Error::UnknownCommand(m)
            | Error::UnsupportedOperation(m)
            | Error::UnableToSetCookie(m)
            | Error::UnderspecifiedStoragePartition(m)
            | Error::UnableToCaptureScreen(m)
            | Error::Unknown(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_error_recognition() {
        assert!(Error::CdpClosed("socket gone".into()).is_close_error());
        assert!(Error::cdp(-32001, "Session with given id not found").is_close_error());
        assert!(Error::websocket("ConnectionClosed").is_close_error());
        assert!(!Error::cdp(-32000, "Invalid parameters").is_close_error());
        assert!(!Error::invalid_argument("nope").is_close_error());
    }

    #[test]
    fn bidi_codes() {
        assert_eq!(Error::invalid_argument("x").bidi_code(), "invalid argument");
        assert_eq!(Error::no_such_frame("f").bidi_code(), "no such frame");
        assert_eq!(
            Error::UnderspecifiedStoragePartition("sourceOrigin".into()).bidi_code(),
            "underspecified storage partition"
        );
        assert_eq!(Error::cdp(-32000, "boom").bidi_code(), "unknown error");
    }
}
