//! Error taxonomy shared across all NexusShell crates.
//!
//! Every boundary returns `Result<_, NexusError>`; the engine never swallows
//! errors, they propagate to the top-level `execute` caller.

use serde::{Deserialize, Serialize};

/// Stable error kind tags, used for audit records, recording entries, and
/// the one-line user-visible rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    SyntaxError,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    ExecutionFailure,
    Timeout,
    Cancelled,
    MemoryExceeded,
    TransactionAborted,
    InternalError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::ExecutionFailure => "ExecutionFailure",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::MemoryExceeded => "MemoryExceeded",
            ErrorKind::TransactionAborted => "TransactionAborted",
            ErrorKind::InternalError => "InternalError",
        };
        write!(f, "{tag}")
    }
}

/// Errors that can occur across the NexusShell runtime.
#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    /// Malformed input line; `offset` is a byte offset into the input,
    /// always within `[0, len]`.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { message: String, offset: usize },

    /// A capability check refused `action` on `resource`.
    #[error("permission denied: {action}:{resource}")]
    PermissionDenied { action: String, resource: String },

    /// A named thing (file, command, handle, recording) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller passed something the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A command, script, or bridge operation failed while running.
    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    /// A deadline elapsed before the operation finished.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The operation observed its cancellation token.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The live-value payload cap would be exceeded.
    #[error("memory limit exceeded: {0}")]
    MemoryExceeded(String),

    /// A transaction was rolled back because a command inside it failed.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// Bug or unrecoverable runtime state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NexusError {
    /// The taxonomy tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NexusError::Syntax { .. } => ErrorKind::SyntaxError,
            NexusError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            NexusError::NotFound(_) => ErrorKind::NotFound,
            NexusError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            NexusError::ExecutionFailure(_) => ErrorKind::ExecutionFailure,
            NexusError::Timeout(_) => ErrorKind::Timeout,
            NexusError::Cancelled(_) => ErrorKind::Cancelled,
            NexusError::MemoryExceeded(_) => ErrorKind::MemoryExceeded,
            NexusError::TransactionAborted(_) => ErrorKind::TransactionAborted,
            NexusError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Byte offset for syntax errors, `None` otherwise.
    pub fn offset(&self) -> Option<usize> {
        match self {
            NexusError::Syntax { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    pub fn syntax(message: impl Into<String>, offset: usize) -> Self {
        NexusError::Syntax {
            message: message.into(),
            offset,
        }
    }

    pub fn denied(action: impl Into<String>, resource: impl Into<String>) -> Self {
        NexusError::PermissionDenied {
            action: action.into(),
            resource: resource.into(),
        }
    }

    /// An alias lookup re-entered itself; surfaced as an execution failure
    /// tagged with the offending name.
    pub fn alias_cycle(name: impl AsRef<str>) -> Self {
        NexusError::ExecutionFailure(format!("alias cycle detected for '{}'", name.as_ref()))
    }

    /// The one-line rendering the shell prints: `<Kind>: <message>`.
    pub fn user_line(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

impl From<std::io::Error> for NexusError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => NexusError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => NexusError::PermissionDenied {
                action: "io".to_string(),
                resource: e.to_string(),
            },
            std::io::ErrorKind::TimedOut => NexusError::Timeout(e.to_string()),
            _ => NexusError::ExecutionFailure(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for NexusError {
    fn from(e: serde_json::Error) -> Self {
        NexusError::ExecutionFailure(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(
            NexusError::syntax("unterminated quote", 4).kind(),
            ErrorKind::SyntaxError
        );
        assert_eq!(
            NexusError::denied("fs:read", "/etc/shadow").kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            NexusError::alias_cycle("ll").kind(),
            ErrorKind::ExecutionFailure
        );
    }

    #[test]
    fn syntax_errors_carry_offset() {
        let e = NexusError::syntax("trailing escape", 12);
        assert_eq!(e.offset(), Some(12));
        assert_eq!(NexusError::NotFound("x".into()).offset(), None);
    }

    #[test]
    fn user_line_is_kind_tagged() {
        let line = NexusError::denied("proc:kill", "1").user_line();
        assert!(line.starts_with("PermissionDenied: "));
        assert!(line.contains("proc:kill:1"));
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        assert_eq!(NexusError::from(io).kind(), ErrorKind::NotFound);
    }
}
