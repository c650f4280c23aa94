//! Error types for isolate lifecycle and message dispatch

use crate::phase::Phase;
use std::fmt;

/// Severity tag the native runtime attaches to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorKind {
    /// No error recorded
    #[default]
    None,

    /// An exception escaped user code; the isolate keeps running
    UnhandledException,

    /// Code failed to parse, link, or resolve
    CompileTimeError,

    /// Unrecoverable; the isolate must be shut down
    Fatal,
}

impl ErrorKind {
    /// Whether this severity forces isolate shutdown
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Fatal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::None => "no error",
            ErrorKind::UnhandledException => "unhandled exception",
            ErrorKind::CompileTimeError => "compile-time error",
            ErrorKind::Fatal => "fatal error",
        };
        f.write_str(name)
    }
}

/// Error reported by the native runtime, tagged with its severity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    /// Severity as classified by the native runtime
    pub kind: ErrorKind,

    /// Diagnostic message
    pub message: String,
}

impl RuntimeError {
    /// Create an error with an explicit severity
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Non-fatal uncaught exception
    pub fn unhandled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnhandledException, message)
    }

    /// Parse, link, or resolution failure
    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CompileTimeError, message)
    }

    /// Unrecoverable failure
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Whether the native runtime classified this error as fatal
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

/// Errors returned by isolate lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum IsolateError {
    /// Snapshot missing or malformed
    #[error("Invalid snapshot: {0}")]
    SnapshotInvalid(String),

    /// The native runtime could not construct the isolate
    #[error("Native isolate creation failed: {0}")]
    NativeCreateFailed(String),

    /// Operation invoked in the wrong phase; no state was changed
    #[error("{operation} requires phase {expected}, but the isolate is in phase {actual}")]
    PreconditionViolation {
        /// Name of the rejected operation
        operation: &'static str,
        /// Phase the operation requires
        expected: Phase,
        /// Phase observed at the time of the call
        actual: Phase,
    },

    /// `MessageDispatcher::initialize` was called more than once
    #[error("Message dispatcher is already bound to a task runner")]
    DispatcherAlreadyInitialized,

    /// The native runtime refused to make the isolate runnable
    #[error("Could not mark isolate runnable: {0}")]
    MarkRunnableFailed(String),

    /// The group's child isolate preparer rejected a spawned isolate
    #[error("Child isolate preparer rejected the isolate")]
    ChildPreparationFailed,

    /// Entrypoint resolution or invocation failed; the phase was not advanced
    #[error("Entrypoint {entrypoint} failed: {source}")]
    EntrypointFailed {
        /// `library::function` as requested
        entrypoint: String,
        /// Error reported by the native runtime
        source: RuntimeError,
    },

    /// The isolate has already been shut down
    #[error("Isolate has been shut down")]
    AlreadyShutDown,

    /// A message handler called back into its own isolate's native state
    #[error("{operation} cannot be called from a message handler of the same isolate")]
    CalledFromHandler {
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// Error raised by the native runtime
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl IsolateError {
    /// Whether this is a phase-precondition violation
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, IsolateError::PreconditionViolation { .. })
    }
}

/// Result of an isolate lifecycle operation
pub type IsolateResult<T> = Result<T, IsolateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_fatality() {
        assert!(ErrorKind::Fatal.is_fatal());
        assert!(!ErrorKind::UnhandledException.is_fatal());
        assert!(!ErrorKind::CompileTimeError.is_fatal());
        assert!(!ErrorKind::None.is_fatal());
        assert_eq!(ErrorKind::default(), ErrorKind::None);
    }

    #[test]
    fn test_runtime_error_display() {
        let error = RuntimeError::unhandled("boom");
        assert_eq!(error.to_string(), "unhandled exception: boom");
        assert!(!error.is_fatal());
        assert!(RuntimeError::fatal("out of memory").is_fatal());
    }

    #[test]
    fn test_precondition_violation_display() {
        let error = IsolateError::PreconditionViolation {
            operation: "run_entrypoint",
            expected: Phase::Ready,
            actual: Phase::Running,
        };
        assert!(error.is_precondition_violation());
        assert_eq!(
            error.to_string(),
            "run_entrypoint requires phase Ready, but the isolate is in phase Running"
        );
    }
}
