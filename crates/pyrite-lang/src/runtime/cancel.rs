use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{ErrorKind, RuntimeError};

/// Granularity of `CancelToken::sleep`.
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Cooperative cancellation: a shared flag plus an optional deadline.
/// Clones observe the same flag, so any thread holding one can cancel.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), deadline: Some(deadline) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline_passed()
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err` with `ErrorKind::Cancellation` once cancelled or past the deadline.
    pub fn check(&self) -> Result<(), RuntimeError> {
        if self.flag.load(Ordering::SeqCst) {
            Err(RuntimeError::new(ErrorKind::Cancellation, 0, "execution cancelled"))
        } else if self.deadline_passed() {
            Err(RuntimeError::new(ErrorKind::Cancellation, 0, "deadline exceeded"))
        } else {
            Ok(())
        }
    }

    /// Block for `duration`, waking early with a cancellation error.
    pub fn sleep(&self, duration: Duration) -> Result<(), RuntimeError> {
        let until = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let mut slice = SLEEP_SLICE.min(until - now);
            if let Some(deadline) = self.deadline {
                slice = slice.min(deadline.saturating_duration_since(now));
            }
            std::thread::sleep(slice);
        }
    }
}
