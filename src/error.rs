//! Error types for docshift.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (3=not_found, 4=validation, 6=remote store, etc.)
//! - Retryability flags for scripted callers
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use thiserror::Error;

/// Result type alias for docshift operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Not Found (exit 3)
    StateNotFound,

    // Validation (exit 4)
    InvalidArgument,
    UnknownField,
    StoreMismatch,

    // Remote store (exit 6)
    StoreError,
    HttpError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::StateNotFound => "STATE_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::UnknownField => "UNKNOWN_FIELD",
            Self::StoreMismatch => "STORE_MISMATCH",
            Self::StoreError => "STORE_ERROR",
            Self::HttpError => "HTTP_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::StateNotFound => 3,
            Self::InvalidArgument | Self::UnknownField | Self::StoreMismatch => 4,
            Self::StoreError | Self::HttpError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether re-running the same command may succeed.
    ///
    /// True for transport failures; a paused or failed run keeps its
    /// checkpoint, so a retry resumes instead of starting over.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreError | Self::HttpError | Self::IoError)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in docshift operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Migration state not found: {id}")]
    StateNotFound { id: String },

    #[error("Store mismatch for {role}: checkpoint was recorded against {expected}, connected to {actual}")]
    StoreMismatch {
        role: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Unknown field {field} on {object} in {store}")]
    UnknownField {
        object: String,
        field: String,
        store: String,
    },

    #[error("Store request failed ({status}): {message}")]
    Store { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::StateNotFound { .. } => ErrorCode::StateNotFound,
            Self::StoreMismatch { .. } => ErrorCode::StoreMismatch,
            Self::UnknownField { .. } => ErrorCode::UnknownField,
            Self::Store { .. } => ErrorCode::StoreError,
            Self::Http(_) => ErrorCode::HttpError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::StateNotFound { id } => Some(format!(
                "No checkpoint with ID '{id}'. Use `docshift states list` to see resumable migrations."
            )),

            Self::StoreMismatch { .. } => Some(
                "Connect to the stores the checkpoint was created with, \
                 or discard it with `docshift states discard <state-id>`."
                    .to_string(),
            ),

            Self::UnknownField { object, store, .. } => Some(format!(
                "Use `docshift describe {object}{}` to list available fields.",
                if *store == "target" { " --target" } else { "" }
            )),

            Self::Store { status: 401, .. } => Some(
                "The access token was rejected. Refresh it and set \
                 DOCSHIFT_SOURCE_TOKEN / DOCSHIFT_TARGET_TOKEN."
                    .to_string(),
            ),

            Self::Store { .. } | Self::Http(_) => Some(
                "Progress up to the last completed batch is checkpointed. \
                 Re-run the same command to resume."
                    .to_string(),
            ),

            Self::Config(_) => Some(
                "Set instance URLs and tokens in ~/.docshift/config.json \
                 or via DOCSHIFT_SOURCE_URL / DOCSHIFT_TARGET_URL."
                    .to_string(),
            ),

            Self::Io(_) | Self::Json(_) | Self::InvalidArgument(_) | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
