//! Peer registry: who has been heard from, and how long ago.
//!
//! # Freshness (for beginners)
//!
//! Nobody ever says goodbye in this protocol.  A peer that is switched off
//! simply stops announcing, so liveness has to be inferred from silence.  The
//! registry remembers the instant each peer was last heard from and a
//! [`FreshnessPolicy`] turns the elapsed time into a verdict:
//!
//! ```text
//!   age (whole seconds)   0 ........ fresh_window ........ eviction_window ....
//!   verdict               Fresh      |  Stale               |  (removed)
//! ```
//!
//! The age is truncated to whole seconds before comparing, so a peer last
//! heard from exactly `fresh_window` ago is still fresh.  When
//! `eviction_window` is `None` stale peers are kept indefinitely.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Transport-level address that identifies a peer.
pub type PeerAddress = IpAddr;

/// Liveness verdict for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Heard from within the fresh window.
    Fresh,
    /// Silent for longer than the fresh window but still retained.
    Stale,
}

/// The two thresholds that make liveness decay with silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Longest silence (whole seconds) for which a peer is still fresh.
    pub fresh_window: Duration,
    /// Silence (whole seconds) after which a peer is forgotten; `None` keeps
    /// stale peers forever.
    pub eviction_window: Option<Duration>,
}

impl FreshnessPolicy {
    pub const DEFAULT_FRESH_WINDOW: Duration = Duration::from_secs(10);
    pub const DEFAULT_EVICTION_WINDOW: Duration = Duration::from_secs(60);

    pub fn new(fresh_window: Duration, eviction_window: Option<Duration>) -> Self {
        Self {
            fresh_window,
            eviction_window,
        }
    }

    /// Policy that marks silent peers stale but never forgets them.
    pub fn retain_stale() -> Self {
        Self::new(Self::DEFAULT_FRESH_WINDOW, None)
    }

    /// Classifies a peer that has been silent for `age`.
    pub fn classify_age(&self, age: Duration) -> Freshness {
        if age.as_secs() <= self.fresh_window.as_secs() {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    /// Returns `true` once a peer silent for `age` should be removed.
    pub fn is_expired(&self, age: Duration) -> bool {
        self.eviction_window
            .map_or(false, |window| age.as_secs() > window.as_secs())
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_FRESH_WINDOW,
            Some(Self::DEFAULT_EVICTION_WINDOW),
        )
    }
}

/// One row of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEntry {
    pub address: PeerAddress,
    pub last_seen: Instant,
}

impl PeerEntry {
    /// Time elapsed since the peer was last heard from, saturating at zero.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// In-memory map from peer address to last-seen instant.
///
/// A `HashMap` gives O(1) `touch`.  Iteration order is unspecified; the UI
/// re-sorts whatever it is given.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerAddress, Instant>,
    policy: FreshnessPolicy,
}

impl PeerRegistry {
    pub fn new(policy: FreshnessPolicy) -> Self {
        Self {
            peers: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    /// Records that `address` was heard from at `now`.
    ///
    /// The stored instant only ever moves forward, so an out-of-order touch
    /// with an older timestamp cannot make a peer look staler than it is.
    ///
    /// Returns `true` if the peer was not known before.
    pub fn touch(&mut self, address: PeerAddress, now: Instant) -> bool {
        match self.peers.get_mut(&address) {
            Some(last_seen) => {
                if now > *last_seen {
                    *last_seen = now;
                }
                false
            }
            None => {
                trace!("registering new peer {address}");
                self.peers.insert(address, now);
                true
            }
        }
    }

    pub fn last_seen(&self, address: PeerAddress) -> Option<Instant> {
        self.peers.get(&address).copied()
    }

    /// Classifies `address` at `now`; `None` if the peer is unknown.
    pub fn classify(&self, address: PeerAddress, now: Instant) -> Option<Freshness> {
        self.peers
            .get(&address)
            .map(|last_seen| self.policy.classify_age(now.saturating_duration_since(*last_seen)))
    }

    /// Returns every entry in unspecified order.
    pub fn snapshot(&self) -> Vec<PeerEntry> {
        self.peers
            .iter()
            .map(|(address, last_seen)| PeerEntry {
                address: *address,
                last_seen: *last_seen,
            })
            .collect()
    }

    /// Removes every peer past the eviction window and returns their addresses.
    pub fn evict_expired(&mut self, now: Instant) -> Vec<PeerAddress> {
        let policy = self.policy;
        let expired: Vec<PeerAddress> = self
            .peers
            .iter()
            .filter(|(_, last_seen)| policy.is_expired(now.saturating_duration_since(**last_seen)))
            .map(|(address, _)| *address)
            .collect();
        for address in &expired {
            if let Some(last_seen) = self.peers.remove(address) {
                trace!(
                    "evicting {address} after {}s of silence",
                    now.saturating_duration_since(last_seen).as_secs()
                );
            }
        }
        expired
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> PeerAddress {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    // ── touch ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_touch_inserts_unknown_peer() {
        // Arrange
        let mut registry = PeerRegistry::default();
        let t0 = Instant::now();

        // Act
        let inserted = registry.touch(addr(10), t0);

        // Assert
        assert!(inserted);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.last_seen(addr(10)), Some(t0));
    }

    #[test]
    fn test_touch_last_write_wins() {
        // Arrange
        let mut registry = PeerRegistry::default();
        let t1 = Instant::now();
        let t2 = t1 + secs(30);
        registry.touch(addr(10), t1);

        // Act
        let inserted = registry.touch(addr(10), t2);

        // Assert – classification is relative to t2, not t1
        assert!(!inserted);
        assert_eq!(registry.last_seen(addr(10)), Some(t2));
        assert_eq!(registry.classify(addr(10), t2), Some(Freshness::Fresh));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_touch_with_older_timestamp_does_not_regress() {
        let mut registry = PeerRegistry::default();
        let t1 = Instant::now();
        let t2 = t1 + secs(5);
        registry.touch(addr(10), t2);

        registry.touch(addr(10), t1);

        assert_eq!(registry.last_seen(addr(10)), Some(t2));
    }

    // ── classify ──────────────────────────────────────────────────────────────

    #[test]
    fn test_classify_exactly_ten_seconds_is_fresh() {
        // Arrange
        let mut registry = PeerRegistry::default();
        let t0 = Instant::now();
        registry.touch(addr(1), t0);

        // Act / Assert
        assert_eq!(registry.classify(addr(1), t0 + secs(10)), Some(Freshness::Fresh));
    }

    #[test]
    fn test_classify_truncates_to_whole_seconds() {
        let mut registry = PeerRegistry::default();
        let t0 = Instant::now();
        registry.touch(addr(1), t0);

        let just_under_eleven = t0 + secs(10) + Duration::from_millis(999);

        assert_eq!(registry.classify(addr(1), just_under_eleven), Some(Freshness::Fresh));
    }

    #[test]
    fn test_classify_eleven_seconds_is_stale() {
        let mut registry = PeerRegistry::default();
        let t0 = Instant::now();
        registry.touch(addr(1), t0);

        assert_eq!(registry.classify(addr(1), t0 + secs(11)), Some(Freshness::Stale));
    }

    #[test]
    fn test_classify_unknown_peer_is_none() {
        let registry = PeerRegistry::default();
        assert_eq!(registry.classify(addr(99), Instant::now()), None);
    }

    #[test]
    fn test_classify_uses_configured_fresh_window() {
        let mut registry = PeerRegistry::new(FreshnessPolicy::new(secs(3), None));
        let t0 = Instant::now();
        registry.touch(addr(1), t0);

        assert_eq!(registry.classify(addr(1), t0 + secs(3)), Some(Freshness::Fresh));
        assert_eq!(registry.classify(addr(1), t0 + secs(4)), Some(Freshness::Stale));
    }

    // ── eviction ──────────────────────────────────────────────────────────────

    #[test]
    fn test_evict_keeps_peer_at_exactly_sixty_seconds() {
        // Arrange
        let mut registry = PeerRegistry::default();
        let t0 = Instant::now();
        registry.touch(addr(1), t0);

        // Act
        let evicted = registry.evict_expired(t0 + secs(60));

        // Assert
        assert!(evicted.is_empty());
        assert_eq!(registry.classify(addr(1), t0 + secs(60)), Some(Freshness::Stale));
    }

    #[test]
    fn test_evict_removes_peer_after_sixty_seconds() {
        // Arrange
        let mut registry = PeerRegistry::default();
        let t0 = Instant::now();
        registry.touch(addr(1), t0);
        registry.touch(addr(2), t0 + secs(30));

        // Act
        let evicted = registry.evict_expired(t0 + secs(61));

        // Assert – only the long-silent peer goes
        assert_eq!(evicted, vec![addr(1)]);
        assert_eq!(registry.len(), 1);
        assert!(registry.snapshot().iter().all(|e| e.address == addr(2)));
    }

    #[test]
    fn test_retain_stale_policy_never_evicts() {
        let mut registry = PeerRegistry::new(FreshnessPolicy::retain_stale());
        let t0 = Instant::now();
        registry.touch(addr(1), t0);

        let evicted = registry.evict_expired(t0 + secs(86_400));

        assert!(evicted.is_empty());
        assert_eq!(registry.classify(addr(1), t0 + secs(86_400)), Some(Freshness::Stale));
    }

    // ── snapshot / clear ──────────────────────────────────────────────────────

    #[test]
    fn test_snapshot_contains_every_peer_once() {
        let mut registry = PeerRegistry::default();
        let t0 = Instant::now();
        for last in 1..=5 {
            registry.touch(addr(last), t0);
            registry.touch(addr(last), t0 + secs(1));
        }

        let mut addresses: Vec<PeerAddress> =
            registry.snapshot().into_iter().map(|e| e.address).collect();
        addresses.sort();

        assert_eq!(addresses, (1..=5).map(addr).collect::<Vec<_>>());
    }

    #[test]
    fn test_clear_forgets_everything() {
        // Arrange
        let mut registry = PeerRegistry::default();
        let t0 = Instant::now();
        registry.touch(addr(1), t0);
        registry.touch(addr(2), t0);

        // Act
        registry.clear();

        // Assert
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.classify(addr(1), t0), None);
    }

    #[test]
    fn test_entry_age_saturates_at_zero() {
        let t0 = Instant::now();
        let entry = PeerEntry {
            address: addr(1),
            last_seen: t0 + secs(5),
        };
        assert_eq!(entry.age(t0), Duration::ZERO);
        assert_eq!(entry.age(t0 + secs(7)), secs(2));
    }

    #[test]
    fn test_default_policy_windows() {
        let policy = FreshnessPolicy::default();
        assert_eq!(policy.fresh_window, secs(10));
        assert_eq!(policy.eviction_window, Some(secs(60)));
    }
}
