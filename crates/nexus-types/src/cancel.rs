//! Cooperative cancellation.
//!
//! Async operations accept an optional deadline; a timeout fires the token
//! and bridge methods observe it at I/O boundaries. Cancellation is
//! cooperative: a running operation may complete past its deadline, in
//! which case the caller discards its result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::NexusError;

/// Shared cancellation flag with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that trips automatically after `timeout`.
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Trip the token explicitly.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Has the deadline passed (independent of explicit cancellation)?
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || self.deadline_passed()
    }

    /// Error-returning observation point for I/O boundaries: `Timeout` when
    /// the deadline tripped the token, `Cancelled` for explicit requests.
    pub fn observe(&self) -> Result<(), NexusError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(NexusError::Cancelled("operation cancelled".to_string()));
        }
        if self.deadline_passed() {
            return Err(NexusError::Timeout("deadline exceeded".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_live() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
        assert!(t.observe().is_ok());
    }

    #[test]
    fn cancel_flag_is_shared_across_clones() {
        let t = CancelToken::new();
        let clone = t.clone();
        t.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(
            clone.observe().unwrap_err().kind(),
            crate::error::ErrorKind::Cancelled
        );
    }

    #[test]
    fn deadline_produces_timeout() {
        let t = CancelToken::with_deadline(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(t.is_cancelled());
        assert_eq!(
            t.observe().unwrap_err().kind(),
            crate::error::ErrorKind::Timeout
        );
    }
}
