use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::foundation::error::{LayercompError, LayercompResult};

#[derive(Debug, Default)]
struct FenceState {
    signaled: Mutex<bool>,
    cv: Condvar,
}

/// Producer-ready signal attached to a buffer.
///
/// Clones share one underlying signal. Equality is identity: two fences are equal only when
/// they are clones of each other.
#[derive(Clone, Debug, Default)]
pub struct Fence {
    inner: Arc<FenceState>,
}

impl Fence {
    /// Create an unsignaled fence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fence that is already signaled.
    pub fn signaled() -> Self {
        let f = Self::new();
        f.signal();
        f
    }

    /// Mark the producer as done. Wakes every waiter.
    pub fn signal(&self) {
        let mut done = self
            .inner
            .signaled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *done = true;
        self.inner.cv.notify_all();
    }

    /// Return `true` once [`Fence::signal`] has been called.
    pub fn is_signaled(&self) -> bool {
        *self
            .inner
            .signaled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until signaled or until `timeout` elapses.
    ///
    /// Exceeding the timeout is a fatal display error, never silently ignored.
    pub fn wait(&self, timeout: Duration, label: &str) -> LayercompResult<()> {
        let guard = self
            .inner
            .signaled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (guard, res) = self
            .inner
            .cv
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if res.timed_out() && !*guard {
            tracing::warn!(label, timeout_ms = timeout.as_millis() as u64, "fence wait timed out");
            return Err(LayercompError::FenceTimeout {
                label: label.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }
}

impl PartialEq for Fence {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Fence {}

/// How a composer hands back the source buffers it consumed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SourceRelease {
    /// Sources were read synchronously; producers may reuse them immediately.
    #[default]
    Immediate,
    /// Producers must wait on this fence before reusing the sources.
    OnFence(Fence),
}

/// Result of composing one composition.
///
/// Composing never blocks on the output becoming consumable downstream; that ordering is
/// returned as [`ComposeOutcome::consumer_wait`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposeOutcome {
    /// Release obligation for the consumed sources.
    pub sources: SourceRelease,
    /// Fence the downstream consumer must wait on before reading the target.
    pub consumer_wait: Option<Fence>,
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/fence.rs"]
mod tests;
