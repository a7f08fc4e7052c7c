//! The `Environment` capability: the only way connection logic touches time
//! or randomness.
//!
//! Keeping these behind a trait lets [`crate::connection::Connection`] run
//! identically under a real clock in production and a fake clock advanced by
//! hand in tests — the same split the driver crate this is grounded on uses
//! to avoid sleeping in unit tests.

use std::{future::Future, ops::Sub, time::Duration};

/// Capability a [`crate::connection::Connection`] needs from its host: a
/// monotonic clock and a source of randomness.
///
/// # Safety
/// `now()` must be monotonically non-decreasing across calls on the same
/// environment instance. `random_bytes` must be cryptographically secure in
/// production implementations; it's a general-purpose capability for callers
/// that need randomness (tests, today), not something connection ids are
/// derived from — those come from `ConnectionRegistry`'s monotonic counter.
pub trait Environment: Clone + Send + Sync + 'static {
    /// An opaque point in time; only orderable and subtractable to a
    /// [`Duration`], never inspected for wall-clock meaning.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Suspends the caller for `duration`. Only ever called from the
    /// production I/O loop, never from pure connection-logic methods.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fills `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Convenience: a random `u64` built from [`Self::random_bytes`].
    fn random_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        self.random_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }
}
