//! Error types for QuickJS operations
//!
//! Every engine-side exception is drained and translated into a [`QjsError`]
//! at the first API boundary it crosses, so callers never see raw engine
//! exception state.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for QuickJS operations
pub type QjsResult<T> = Result<T, QjsError>;

/// Structured error types for QuickJS operations
#[derive(Debug, Error)]
pub enum QjsError {
    /// `JS_NewRuntime` returned null
    #[error("Failed to create QuickJS runtime")]
    RuntimeInit,

    /// `JS_NewContext` returned null
    #[error("Failed to create QuickJS context")]
    ContextInit,

    /// Compile or execution failure reported by the engine.
    ///
    /// Stack overflow and out-of-memory also land here, as `RangeError`
    /// and `InternalError` respectively.
    #[error("{error_type}: {message}")]
    Script {
        error_type: String,
        message: String,
        stack: Option<String>,
    },

    /// Engine coercion raised while converting a value
    #[error("Cannot convert value to {target}: {message}")]
    Conversion {
        target: &'static str,
        message: String,
    },

    /// Named property access raised
    #[error("Property error on '{name}': {message}")]
    Property { name: String, message: String },

    /// Indexed element access raised
    #[error("Index error at {index}: {message}")]
    Index { index: u32, message: String },

    /// Target not callable, or the callee raised
    #[error("Call error: {0}")]
    Call(String),

    /// Source file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure raised by a host closure
    #[error("{0}")]
    Native(String),

    /// An exception has been made pending in the engine and will be
    /// reported by the engine itself
    ///
    /// Only meaningful after [`QjsCtx::throw_exception`](crate::QjsCtx::throw_exception)
    /// or a failed engine call left an exception pending.
    #[error("JavaScript exception pending")]
    Exception,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QjsError {
    /// Create a script error from error type and message
    pub fn script_error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            error_type: error_type.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Create a host closure failure
    pub fn native(message: impl Into<String>) -> Self {
        Self::Native(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error kind as a stable string (for logging and reporting)
    pub fn error_type(&self) -> &str {
        match self {
            Self::RuntimeInit => "RuntimeInitError",
            Self::ContextInit => "ContextInitError",
            Self::Script { error_type, .. } => error_type,
            Self::Conversion { .. } => "ConversionError",
            Self::Property { .. } => "PropertyError",
            Self::Index { .. } => "IndexError",
            Self::Call(_) => "CallError",
            Self::Io { .. } => "IOError",
            Self::Native(_) => "NativeError",
            Self::Exception => "Exception",
            Self::Json(_) => "JsonError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Whether this error came from evaluating script
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::Script { .. })
    }

    /// Stack trace captured from the engine, if any
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Script { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}
