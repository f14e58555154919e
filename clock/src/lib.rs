//! An injectable source of wall-clock time.
//!
//! Production code uses [`SystemProvider`]; tests that depend on "now" (e.g.
//! retention-window pruning) inject a [`MockProvider`] and control the clock
//! explicitly.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs
)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current wall-clock time as non-leap nanoseconds since the
/// Unix epoch.
pub trait TimeProvider: std::fmt::Debug + Send + Sync + 'static {
    /// Returns the current time in nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;
}

/// A [`TimeProvider`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl SystemProvider {
    /// Create a new provider reading from the system clock.
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock set before the Unix epoch")
            .as_nanos() as i64
    }
}

/// A [`TimeProvider`] that returns a programmable instant.
#[derive(Debug)]
pub struct MockProvider {
    now: AtomicI64,
}

impl MockProvider {
    /// Create a provider frozen at `nanos`.
    pub fn new(nanos: i64) -> Self {
        Self {
            now: AtomicI64::new(nanos),
        }
    }

    /// Replace the current instant.
    pub fn set(&self, nanos: i64) {
        self.now.store(nanos, Ordering::SeqCst)
    }

    /// Advance the current instant by `nanos`.
    pub fn inc(&self, nanos: i64) -> i64 {
        self.now.fetch_add(nanos, Ordering::SeqCst) + nanos
    }
}

impl TimeProvider for MockProvider {
    fn now_nanos(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_past_2020() {
        // 2020-01-01T00:00:00Z
        const JAN_2020_NS: i64 = 1_577_836_800_000_000_000;
        assert!(SystemProvider::new().now_nanos() > JAN_2020_NS);
    }

    #[test]
    fn mock_set_and_inc() {
        let t = MockProvider::new(100);
        assert_eq!(t.now_nanos(), 100);

        t.set(42);
        assert_eq!(t.now_nanos(), 42);

        assert_eq!(t.inc(8), 50);
        assert_eq!(t.now_nanos(), 50);
    }
}
