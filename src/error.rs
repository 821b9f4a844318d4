//! Error types for `ScareBox`
//!
//! One `thiserror` enum per domain, aggregated by [`ScareBoxError`] which
//! also maps every failure to a process exit code.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `scarebox` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure, persistence)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// HTTP server error (bind failed, serve failed)
    pub const SERVER_ERROR: i32 = 4;

    /// Hardware collaborator failed to initialize
    pub const HARDWARE_ERROR: i32 = 5;

    /// Usage error (invalid arguments)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `ScareBox` operations.
#[derive(Debug, Error)]
pub enum ScareBoxError {
    /// Configuration loading, validation or persistence error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Hardware collaborator error
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// Sequence state machine error
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// HTTP server error
    #[error("server error: {0}")]
    Server(String),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ScareBoxError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Hardware(_) => ExitCode::HARDWARE_ERROR,
            Self::Server(_) => ExitCode::SERVER_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
            Self::Controller(ControllerError::Hardware(_)) => ExitCode::HARDWARE_ERROR,
            Self::Controller(_) | Self::Sequence(_) => ExitCode::ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading, validation and persistence errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {} issue(s)", errors.len())]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Reading the configuration file failed
    #[error("failed to read {path}: {message}")]
    ReadFailed {
        /// Source path
        path: PathBuf,
        /// Underlying failure
        message: String,
    },

    /// Writing the configuration back to disk failed
    #[error("failed to persist configuration to {path}: {message}")]
    PersistFailed {
        /// Destination path
        path: PathBuf,
        /// Underlying failure
        message: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Dotted path to the problematic field (e.g., "timing.countdown_duration")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl ValidationIssue {
    /// Creates an error-severity issue.
    #[must_use]
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Creates a warning-severity issue.
    #[must_use]
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Suspicious but usable
    Warning,
}

// ============================================================================
// Hardware Errors
// ============================================================================

/// Failures reported by lighting, audio and microphone collaborators.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The device could not be found or opened
    #[error("{device} unavailable: {reason}")]
    Unavailable {
        /// Device kind (e.g. `"lights"`)
        device: &'static str,
        /// Human-readable reason
        reason: String,
    },

    /// A command sent to the device failed
    #[error("{device} command '{command}' failed: {reason}")]
    CommandFailed {
        /// Device kind
        device: &'static str,
        /// Command name (e.g. `"flash"`)
        command: &'static str,
        /// Human-readable reason
        reason: String,
    },

    /// The device did not answer in time
    #[error("{device} command '{command}' timed out")]
    Timeout {
        /// Device kind
        device: &'static str,
        /// Command name
        command: &'static str,
    },
}

impl HardwareError {
    /// Returns the device kind the error originated from.
    #[must_use]
    pub const fn device(&self) -> &'static str {
        match self {
            Self::Unavailable { device, .. }
            | Self::CommandFailed { device, .. }
            | Self::Timeout { device, .. } => device,
        }
    }
}

// ============================================================================
// Sequence Errors
// ============================================================================

/// Sequence state machine errors.
#[derive(Debug, Error)]
pub enum SequenceError {
    /// `trigger()` was called outside a Tokio runtime
    #[error("no async runtime available to run the sequence")]
    NoRuntime,

    /// The run task panicked or was aborted
    #[error("sequence run failed: {0}")]
    RunFailed(String),
}

// ============================================================================
// Controller Errors
// ============================================================================

/// Errors surfaced by the orchestrator handle.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The controller task has exited
    #[error("controller is shut down")]
    Closed,

    /// A hardware collaborator failed during initialization
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// The sequence machine could not start a run
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `ScareBox` operations.
pub type Result<T> = std::result::Result<T, ScareBoxError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::SERVER_ERROR, 4);
        assert_eq!(ExitCode::HARDWARE_ERROR, 5);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
        assert_eq!(ExitCode::INTERRUPTED, 130);
        assert_eq!(ExitCode::TERMINATED, 143);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: ScareBoxError = ConfigError::MissingFile {
            path: PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_hardware_error_exit_code() {
        let hw = HardwareError::Unavailable {
            device: "microphone",
            reason: "no input device".to_string(),
        };
        let err: ScareBoxError = hw.into();
        assert_eq!(err.exit_code(), ExitCode::HARDWARE_ERROR);

        let wrapped: ScareBoxError = ControllerError::Hardware(HardwareError::Timeout {
            device: "lights",
            command: "initialize",
        })
        .into();
        assert_eq!(wrapped.exit_code(), ExitCode::HARDWARE_ERROR);
    }

    #[test]
    fn test_controller_closed_exit_code() {
        let err: ScareBoxError = ControllerError::Closed.into();
        assert_eq!(err.exit_code(), ExitCode::ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: ScareBoxError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_hardware_error_device() {
        let err = HardwareError::CommandFailed {
            device: "speaker",
            command: "play_scare",
            reason: "mixer closed".to_string(),
        };
        assert_eq!(err.device(), "speaker");
        assert_eq!(
            err.to_string(),
            "speaker command 'play_scare' failed: mixer closed"
        );
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue::error("timing.countdown_duration", "must be positive");
        assert_eq!(
            issue.to_string(),
            "error: must be positive at timing.countdown_duration"
        );
    }

    #[test]
    fn test_validation_issue_warning_display() {
        let issue = ValidationIssue::warning("intensity.adult.volume", "above 1.0");
        assert_eq!(
            issue.to_string(),
            "warning: above 1.0 at intensity.adult.volume"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ParseError {
            path: PathBuf::from("config.yaml"),
            line: Some(7),
            message: "unexpected token".to_string(),
        };
        assert!(err.to_string().contains("config.yaml"));
        assert!(err.to_string().contains("unexpected token"));
    }
}
