//! Lock-free counters backing the gate's closing policy
//!
//! Every limiter keeps two numbers:
//! - a running `count`, reset when the gate reopens or the batch rolls over
//! - a lifetime `total`, never reset
//!
//! [`VolumeLimiter`] additionally numbers its batches with a generation that
//! advances on every rollover. [`ErrorLimiter`] additionally retains the most
//! recent failure so the original error is never lost.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Base counter: incrementable, decrementable, resettable
#[derive(Debug, Default)]
pub struct Limiter {
    count: AtomicU64,
    total: AtomicU64,
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the running count and the total, returning the new count
    pub fn increment(&self) -> u64 {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the running count, saturating at zero
    ///
    /// The lifetime total is left untouched.
    pub fn decrement(&self) -> u64 {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Reset the running count to zero
    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }
}

/// Counts processed calls, numbering each batch with a generation
#[derive(Debug, Default)]
pub struct VolumeLimiter {
    limiter: Limiter,
    generation: AtomicU64,
}

impl VolumeLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> u64 {
        self.limiter.increment()
    }

    pub fn decrement(&self) -> u64 {
        self.limiter.decrement()
    }

    /// Reset the running count without starting a new generation
    pub fn reset(&self) {
        self.limiter.reset();
    }

    /// Roll over to the next batch: reset the count and bump the generation
    pub fn next(&self) -> u64 {
        self.limiter.reset();
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn count(&self) -> u64 {
        self.limiter.count()
    }

    pub fn total(&self) -> u64 {
        self.limiter.total()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// The most recent failure observed by the gate
#[derive(Clone)]
pub struct FailureRecord {
    message: String,
    occurred_at: DateTime<Utc>,
    source: Arc<dyn StdError + Send + Sync + 'static>,
}

impl FailureRecord {
    pub fn new<E>(error: E, occurred_at: DateTime<Utc>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self { message: error.to_string(), occurred_at, source: Arc::new(error) }
    }

    /// Rendered message of the original error
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// The original error, shared
    pub fn source(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Attempt to recover the concrete error type
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }
}

impl fmt::Debug for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureRecord")
            .field("message", &self.message)
            .field("occurred_at", &self.occurred_at)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.message, self.occurred_at.to_rfc3339())
    }
}

impl Serialize for FailureRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FailureRecord", 2)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("occurred_at", &self.occurred_at)?;
        state.end()
    }
}

/// Counts failed calls and keeps the last failure for diagnostics
#[derive(Debug, Default)]
pub struct ErrorLimiter {
    limiter: Limiter,
    last: ArcSwapOption<FailureRecord>,
}

impl ErrorLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a failure and remember it as the most recent one
    pub fn record(&self, failure: FailureRecord) -> u64 {
        self.last.store(Some(Arc::new(failure)));
        self.limiter.increment()
    }

    pub fn increment(&self) -> u64 {
        self.limiter.increment()
    }

    pub fn decrement(&self) -> u64 {
        self.limiter.decrement()
    }

    /// Reset the running count; the last failure is kept
    pub fn reset(&self) {
        self.limiter.reset();
    }

    pub fn count(&self) -> u64 {
        self.limiter.count()
    }

    pub fn total(&self) -> u64 {
        self.limiter.total()
    }

    pub fn last(&self) -> Option<Arc<FailureRecord>> {
        self.last.load_full()
    }
}
