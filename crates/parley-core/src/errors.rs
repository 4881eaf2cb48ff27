//! Error types for the Parley protocol
//!
//! Transport, codec, session, and engine failures each get their own enum,
//! unified under [`ParleyError`]. Every variant maps to a stable wire error
//! code via [`ParleyError::error_code`] so both ends of a call agree on what
//! went wrong.

use core::fmt;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Transport-level failures (connect, timeout, half-open connections)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("socket timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Envelope encoding/decoding failures
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("envelope encoding failed: {reason}")]
    Encoding { reason: String },
    #[error("envelope decoding failed: {reason}")]
    Decoding { reason: String },
    #[error("local key pair is not configured")]
    KeysNotConfigured,
    #[error("payload encryption failed")]
    Encryption,
    #[error("payload decryption failed")]
    Decryption,
    #[error("malformed key material: {reason}")]
    MalformedKey { reason: String },
}

/// Session store failures
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown session {session_id}")]
    UnknownSession { session_id: String },
    #[error("session {session_id} already exists")]
    AlreadyExists { session_id: String },
    #[error("session store integrity check failed: {reason}")]
    Integrity { reason: String },
}

/// Command engine phase failures, client and server side
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("preparation failed: {reason}")]
    Preparation { reason: String },
    #[error("evaluation failed: {reason}")]
    Evaluation { reason: String },
    #[error("post-processing failed: {reason}")]
    PostProcessing { reason: String },
    #[error("protocol validation failed: missing required field {field}")]
    MissingField { field: String },
    #[error("unknown command {command}")]
    UnknownCommand { command: String },
    #[error("command execution failed: {reason}")]
    Execution { reason: String },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Parley protocol
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl ParleyError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        ParleyError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an encoding error with a reason
    pub fn encoding<T: Into<String>>(reason: T) -> Self {
        ParleyError::Codec(CodecError::Encoding {
            reason: reason.into(),
        })
    }

    /// Create a decoding error with a reason
    pub fn decoding<T: Into<String>>(reason: T) -> Self {
        ParleyError::Codec(CodecError::Decoding {
            reason: reason.into(),
        })
    }

    /// Create an unknown-session error
    pub fn unknown_session<T: Into<String>>(session_id: T) -> Self {
        ParleyError::Session(SessionError::UnknownSession {
            session_id: session_id.into(),
        })
    }

    /// Create a session-already-exists error
    pub fn session_exists<T: Into<String>>(session_id: T) -> Self {
        ParleyError::Session(SessionError::AlreadyExists {
            session_id: session_id.into(),
        })
    }

    /// Create a preparation-phase error
    pub fn preparation<T: Into<String>>(reason: T) -> Self {
        ParleyError::Engine(EngineError::Preparation {
            reason: reason.into(),
        })
    }

    /// Create an evaluation-phase error
    pub fn evaluation<T: Into<String>>(reason: T) -> Self {
        ParleyError::Engine(EngineError::Evaluation {
            reason: reason.into(),
        })
    }

    /// Create a post-processing-phase error
    pub fn post_processing<T: Into<String>>(reason: T) -> Self {
        ParleyError::Engine(EngineError::PostProcessing {
            reason: reason.into(),
        })
    }

    /// Create a missing-required-field error
    pub fn missing_field<T: Into<String>>(field: T) -> Self {
        ParleyError::Engine(EngineError::MissingField {
            field: field.into(),
        })
    }

    /// Create a server-side execution error
    pub fn execution<T: Into<String>>(reason: T) -> Self {
        ParleyError::Engine(EngineError::Execution {
            reason: reason.into(),
        })
    }

    /// The wire error code this failure is reported under
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ParleyError::Transport(TransportError::Timeout { .. }) => ErrorCode::SocketTimeout,
            ParleyError::Transport(_) => ErrorCode::Connect,
            ParleyError::Codec(CodecError::Encoding { .. })
            | ParleyError::Codec(CodecError::Encryption) => ErrorCode::Encoding,
            ParleyError::Codec(_) => ErrorCode::Decoding,
            ParleyError::Session(SessionError::UnknownSession { .. }) => ErrorCode::UnknownSession,
            ParleyError::Session(SessionError::AlreadyExists { .. }) => {
                ErrorCode::SessionAlreadyExists
            }
            ParleyError::Session(SessionError::Integrity { .. }) => ErrorCode::IntegrityCheck,
            ParleyError::Engine(EngineError::Preparation { .. }) => ErrorCode::Preparation,
            ParleyError::Engine(EngineError::Evaluation { .. }) => ErrorCode::Evaluation,
            ParleyError::Engine(EngineError::PostProcessing { .. }) => ErrorCode::PostProcessing,
            ParleyError::Engine(EngineError::MissingField { .. }) => ErrorCode::ProtocolValidation,
            ParleyError::Engine(EngineError::UnknownCommand { .. }) => ErrorCode::UnknownCommand,
            ParleyError::Engine(EngineError::Execution { .. }) => ErrorCode::ServerExecution,
            ParleyError::Configuration { .. } => ErrorCode::Preparation,
        }
    }
}

// ----------------------------------------------------------------------------
// Wire Error Codes
// ----------------------------------------------------------------------------

/// Stable error-code strings carried in response envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Connect,
    SocketTimeout,
    Encoding,
    Decoding,
    ProtocolValidation,
    UnknownSession,
    SessionAlreadyExists,
    Preparation,
    Evaluation,
    PostProcessing,
    ServerExecution,
    IntegrityCheck,
    UnknownCommand,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Connect => "ConnectError",
            ErrorCode::SocketTimeout => "SocketTimeoutError",
            ErrorCode::Encoding => "EncodingError",
            ErrorCode::Decoding => "DecodingError",
            ErrorCode::ProtocolValidation => "ProtocolValidationError",
            ErrorCode::UnknownSession => "UnknownSessionError",
            ErrorCode::SessionAlreadyExists => "SessionAlreadyExistsError",
            ErrorCode::Preparation => "PreparationError",
            ErrorCode::Evaluation => "EvaluationError",
            ErrorCode::PostProcessing => "PostProcessingError",
            ErrorCode::ServerExecution => "ServerExecutionError",
            ErrorCode::IntegrityCheck => "IntegrityCheckError",
            ErrorCode::UnknownCommand => "UnknownCommandError",
        }
    }

    /// Parse a wire error code; `None` for codes this build does not know
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ConnectError" => Some(ErrorCode::Connect),
            "SocketTimeoutError" => Some(ErrorCode::SocketTimeout),
            "EncodingError" => Some(ErrorCode::Encoding),
            "DecodingError" => Some(ErrorCode::Decoding),
            "ProtocolValidationError" => Some(ErrorCode::ProtocolValidation),
            "UnknownSessionError" => Some(ErrorCode::UnknownSession),
            "SessionAlreadyExistsError" => Some(ErrorCode::SessionAlreadyExists),
            "PreparationError" => Some(ErrorCode::Preparation),
            "EvaluationError" => Some(ErrorCode::Evaluation),
            "PostProcessingError" => Some(ErrorCode::PostProcessing),
            "ServerExecutionError" => Some(ErrorCode::ServerExecution),
            "IntegrityCheckError" => Some(ErrorCode::IntegrityCheck),
            "UnknownCommandError" => Some(ErrorCode::UnknownCommand),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ParleyError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
