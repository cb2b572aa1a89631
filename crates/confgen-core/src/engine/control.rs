use super::error::EngineError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A cancellation flag shared by every worker of a run.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Caller-supplied abort hook, polled alongside the shared flag.
pub type AbortCallback = Arc<dyn Fn() -> bool + Send + Sync>;

/// What a poll point should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Continue,
    Abort,
    Timeout,
}

/// Cancellation and deadline state for one molecule.
///
/// Generation stages call [`RunControl::poll`] between trials and after each phase.
/// Nothing is interrupted preemptively.
#[derive(Clone)]
pub struct RunControl {
    signal: AbortSignal,
    callback: Option<AbortCallback>,
    deadline: Option<Instant>,
}

impl fmt::Debug for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("signal", &self.signal)
            .field("callback", &self.callback.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl RunControl {
    pub fn new(signal: AbortSignal, callback: Option<AbortCallback>, timeout: Option<Duration>) -> Self {
        Self {
            signal,
            callback,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// A control that never aborts or times out.
    pub fn unbounded() -> Self {
        Self::new(AbortSignal::new(), None, None)
    }

    /// A copy with a tighter deadline, used for sub-stages with their own limit.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            deadline,
            ..self.clone()
        }
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_raised() || self.callback.as_ref().is_some_and(|cb| cb())
    }

    pub fn is_timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn poll(&self) -> Poll {
        if self.is_aborted() {
            Poll::Abort
        } else if self.is_timed_out() {
            Poll::Timeout
        } else {
            Poll::Continue
        }
    }

    /// Converts a poll into an early return for phase boundaries.
    pub fn check(&self) -> Result<(), EngineError> {
        match self.poll() {
            Poll::Continue => Ok(()),
            Poll::Abort => Err(EngineError::Aborted),
            Poll::Timeout => Err(EngineError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn raised_signal_is_seen_by_every_clone() {
        let signal = AbortSignal::new();
        let control = RunControl::new(signal.clone(), None, None);
        assert_eq!(control.poll(), Poll::Continue);
        signal.raise();
        assert_eq!(control.poll(), Poll::Abort);
        assert_eq!(control.check(), Err(EngineError::Aborted));
    }

    #[test]
    fn callback_is_polled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: AbortCallback = Arc::new(move || counter.fetch_add(1, Ordering::SeqCst) >= 1);
        let control = RunControl::new(AbortSignal::new(), Some(callback), None);
        assert!(!control.is_aborted());
        assert!(control.is_aborted());
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let control = RunControl::new(AbortSignal::new(), None, Some(Duration::ZERO));
        assert_eq!(control.poll(), Poll::Timeout);
        let nested = RunControl::unbounded().with_timeout(Some(Duration::ZERO));
        assert!(nested.is_timed_out());
        assert!(!RunControl::unbounded().with_timeout(None).is_timed_out());
    }

    #[test]
    fn abort_takes_precedence_over_timeout() {
        let signal = AbortSignal::new();
        signal.raise();
        let control = RunControl::new(signal, None, Some(Duration::ZERO));
        assert_eq!(control.poll(), Poll::Abort);
    }
}
