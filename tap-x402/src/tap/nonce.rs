//! Nonce replay guard.
//!
//! A [`ReplayGuard`] remembers every nonce it has been shown together with the time it
//! was first seen. Entries leave only through TTL eviction, so a nonce that is still
//! present is always rejected. Share one guard (behind an `Arc`) between every verifier
//! that must see the same replay window.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Source of wall-clock time in milliseconds since the unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in unix milliseconds.
    fn now_ms(&self) -> u64;
}

/// [`Clock`] backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "unix milliseconds fit u64 until the year 584 million"
    )]
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
    }
}

/// Manually driven [`Clock`] for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `now_ms`.
    #[must_use]
    pub const fn new(now_ms: u64) -> Self {
        Self { now_ms: AtomicU64::new(now_ms) }
    }

    /// Sets the current time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "test durations are far below u64 milliseconds"
    )]
    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Concurrent `nonce -> first seen` map with TTL eviction.
///
/// Insertion is first-writer-wins: of several concurrent callers presenting the same
/// nonce, exactly one is told the nonce is fresh.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use tap_x402::tap::ReplayGuard;
///
/// let guard = ReplayGuard::new(Duration::from_secs(3600));
/// assert!(guard.check_and_insert("a1b2"));
/// assert!(!guard.check_and_insert("a1b2"));
/// ```
pub struct ReplayGuard {
    seen: DashMap<String, u64>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("entries", &self.seen.len())
            .field("ttl", &self.ttl)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

impl ReplayGuard {
    /// Default retention of seen nonces: one hour.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

    /// Default interval between background sweeps.
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    /// Creates a guard on the system clock.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Creates a guard on a caller-supplied clock.
    #[must_use]
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { seen: DashMap::new(), ttl, clock }
    }

    /// Retention window.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current time according to the guard's clock, in unix milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Records `nonce` and returns `true` if it had not been seen, `false` if it is
    /// already present.
    pub fn check_and_insert(&self, nonce: &str) -> bool {
        match self.seen.entry(nonce.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(self.clock.now_ms());
                true
            }
        }
    }

    /// Returns `true` if `nonce` is currently remembered.
    #[must_use]
    pub fn contains(&self, nonce: &str) -> bool {
        self.seen.contains_key(nonce)
    }

    /// Number of remembered nonces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if no nonce is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Evicts entries older than the TTL and returns how many were removed.
    ///
    /// Shards are locked one at a time, so lookups on other shards proceed during a sweep.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "ttl in ms fits u64 for practical values"
    )]
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now_ms().saturating_sub(self.ttl.as_millis() as u64);
        let mut removed = 0;
        self.seen.retain(|_, first_seen| {
            let keep = *first_seen >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Runs [`sweep`](Self::sweep) every `interval` on the tokio runtime until `cancel`
    /// fires or the guard is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let guard = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(guard) = guard.upgrade() else { break };
                        let removed = guard.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = guard.len(), "swept expired nonces");
                        }
                    }
                }
            }
            debug!("nonce sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual(ttl_ms: u64) -> (Arc<ManualClock>, ReplayGuard) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let guard = ReplayGuard::with_clock(Duration::from_millis(ttl_ms), clock.clone());
        (clock, guard)
    }

    #[test]
    fn test_first_writer_wins() {
        let (_, guard) = manual(1_000);
        assert!(guard.check_and_insert("n1"));
        assert!(!guard.check_and_insert("n1"));
        assert!(guard.check_and_insert("n2"));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_expired_but_unswept_nonce_is_still_rejected() {
        let (clock, guard) = manual(1_000);
        assert!(guard.check_and_insert("n1"));
        clock.advance(Duration::from_secs(10));
        assert!(!guard.check_and_insert("n1"));
    }

    #[test]
    fn test_sweep_evicts_only_expired() {
        let (clock, guard) = manual(1_000);
        guard.check_and_insert("old");
        clock.advance(Duration::from_millis(600));
        guard.check_and_insert("young");
        clock.advance(Duration::from_millis(600));

        assert_eq!(guard.sweep(), 1);
        assert!(!guard.contains("old"));
        assert!(guard.contains("young"));

        // Once evicted, a nonce is accepted again.
        assert!(guard.check_and_insert("old"));
    }

    #[test]
    fn test_entry_at_exact_ttl_is_kept() {
        let (clock, guard) = manual(1_000);
        guard.check_and_insert("edge");
        clock.advance(Duration::from_millis(1_000));
        assert_eq!(guard.sweep(), 0);
    }

    #[test]
    fn test_concurrent_duplicates_admit_one() {
        let guard = Arc::new(ReplayGuard::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.check_and_insert("shared"))
            })
            .collect();
        let admitted = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_background_sweeper_evicts_and_stops() {
        let clock = Arc::new(ManualClock::new(0));
        let guard = Arc::new(ReplayGuard::with_clock(Duration::from_millis(100), clock.clone()));
        guard.check_and_insert("n1");
        clock.advance(Duration::from_millis(500));

        let cancel = CancellationToken::new();
        let handle = guard.spawn_sweeper(Duration::from_millis(10), cancel.clone());

        for _ in 0..50 {
            if guard.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(guard.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_exits_when_guard_dropped() {
        let guard = Arc::new(ReplayGuard::default());
        let handle = guard.spawn_sweeper(Duration::from_millis(5), CancellationToken::new());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
