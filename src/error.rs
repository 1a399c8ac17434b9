//! Error types for the fanout engine
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - Transient/non-transient classification used by the retry policy
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Job creation errors (3xx)
    PartitionFailed = 300,
    SerializationFailed = 301,
    FunctionNotFound = 302,

    // Backend errors (4xx)
    BackendUnavailable = 400,
    QuotaExceeded = 401,
    PayloadRejected = 402,
    TransportError = 403,
    BackendTimeout = 404,
    InfrastructureFault = 405,
    ActivationNotFound = 406,

    // Job execution errors (5xx)
    JobNotFound = 500,
    JobTimeout = 501,
    ReductionFailed = 502,
    TaskFailed = 503,
    JobCleaned = 504,

    // Internal errors (9xx)
    InternalError = 900,
    NotSupported = 902,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Job creation errors
            400..=499 => 40, // Backend errors
            500..=599 => 50, // Job execution errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Job Creation Errors
    // ─────────────────────────────────────────────────────────────

    /// Input cannot be split into partitions
    #[error("Partitioning failed: {message}")]
    Partition { message: String },

    /// Function or arguments cannot be captured into a task payload
    #[error("Cannot package task{}: {message}", .index.map(|i| format!(" {}", i)).unwrap_or_default())]
    Serialization {
        index: Option<usize>,
        message: String,
    },

    /// Function name is not present in the catalog
    #[error("Function not found in catalog: {name}")]
    FunctionNotFound { name: String },

    // ─────────────────────────────────────────────────────────────
    // Backend Errors
    // ─────────────────────────────────────────────────────────────

    /// Backend cannot accept submissions
    #[error("Backend '{backend}' unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    /// Backend refused the submission because of a quota
    #[error("Backend '{backend}' quota exceeded: {message}")]
    QuotaExceeded { backend: String, message: String },

    /// Backend refused a malformed payload
    #[error("Backend '{backend}' rejected payload: {message}")]
    PayloadRejected { backend: String, message: String },

    /// Transport failure while talking to the backend
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Activation did not settle within its execution timeout
    #[error("Activation {activation} timed out after {timeout_ms}ms")]
    BackendTimeout { activation: String, timeout_ms: u64 },

    /// Backend reported an infrastructure fault for an activation
    #[error("Infrastructure fault on activation {activation}: {message}")]
    InfrastructureFault { activation: String, message: String },

    /// Backend has no record of the activation
    #[error("Activation not found: {activation}")]
    ActivationNotFound { activation: String },

    // ─────────────────────────────────────────────────────────────
    // Job Execution Errors
    // ─────────────────────────────────────────────────────────────

    /// Job handle does not refer to a live job
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Tasks remained non-terminal past the deadline
    #[error("Job {job_id} timed out after {timeout_ms}ms with {pending} task(s) pending")]
    JobTimeout {
        job_id: String,
        timeout_ms: u64,
        pending: usize,
    },

    /// A reducer dependency never resolved
    #[error("Reducer {reducer} of job {job_id} cannot run: dependency {dependency} failed: {message}")]
    Reduction {
        job_id: String,
        reducer: usize,
        dependency: usize,
        message: String,
    },

    /// A consumed result slot holds an error
    #[error("Task {index} failed: {message}")]
    TaskFailed { index: usize, message: String },

    /// Job was released by clean() before its result was consumed
    #[error("Job {job_id} was cleaned")]
    JobCleaned { job_id: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Feature not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::SerializationFailed,

            Error::Partition { .. } => ErrorCode::PartitionFailed,
            Error::Serialization { .. } => ErrorCode::SerializationFailed,
            Error::FunctionNotFound { .. } => ErrorCode::FunctionNotFound,

            Error::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            Error::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            Error::PayloadRejected { .. } => ErrorCode::PayloadRejected,
            Error::Transport { .. } => ErrorCode::TransportError,
            Error::BackendTimeout { .. } => ErrorCode::BackendTimeout,
            Error::InfrastructureFault { .. } => ErrorCode::InfrastructureFault,
            Error::ActivationNotFound { .. } => ErrorCode::ActivationNotFound,

            Error::JobNotFound { .. } => ErrorCode::JobNotFound,
            Error::JobTimeout { .. } => ErrorCode::JobTimeout,
            Error::Reduction { .. } => ErrorCode::ReductionFailed,
            Error::TaskFailed { .. } => ErrorCode::TaskFailed,
            Error::JobCleaned { .. } => ErrorCode::JobCleaned,

            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is a transient backend fault.
    ///
    /// Transient faults re-enter the dispatch queue under the retry policy;
    /// everything else becomes the task's terminal outcome immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. }
                | Error::BackendTimeout { .. }
                | Error::InfrastructureFault { .. }
                | Error::Io(_)
        )
    }

    /// Check if the error rejects a submission outright
    pub fn is_dispatch_rejection(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. }
                | Error::QuotaExceeded { .. }
                | Error::PayloadRejected { .. }
        )
    }

    /// Check if the error is fatal for the CLI
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'fanout config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'fanout config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),

            Error::Partition { .. } => Some(
                "Check that the input is not empty and that chunk sizes are greater than zero."
            ),
            Error::Serialization { .. } => Some(
                "Task data must be JSON-serializable and within the packager's 'max_payload_bytes'."
            ),
            Error::FunctionNotFound { .. } => Some(
                "Register the function in the catalog before submitting work that uses it."
            ),

            Error::BackendUnavailable { .. } => Some(
                "Verify the backend is reachable and correctly configured in the [backend] section."
            ),
            Error::QuotaExceeded { .. } => Some(
                "Lower 'max_in_flight' in the [executor] section or raise the backend quota."
            ),

            Error::JobTimeout { .. } => Some(
                "Increase the wait timeout or request partial results with wait()."
            ),
            Error::Reduction { .. } => Some(
                "Enable 'partial_results' to let reducers run over failed dependencies."
            ),

            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            code.as_str(),
            self
        );

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        let code = self.code();
        format!("[{}] {}", code.as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a partition error
    pub fn partition(message: impl Into<String>) -> Self {
        Error::Partition {
            message: message.into(),
        }
    }

    /// Create a serialization error for one task
    pub fn serialization(index: usize, message: impl Into<String>) -> Self {
        Error::Serialization {
            index: Some(index),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a quota exceeded error
    pub fn quota_exceeded(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::QuotaExceeded {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
