//! Sliding-window ledgers.
//!
//! A [`WindowStore`] records timestamped hits per (client, endpoint) and
//! answers how many fall inside the trailing window. The window is anchored
//! to the caller's `now`, so it slides continuously instead of resetting on
//! fixed boundaries.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use super::client::ClientId;
use super::descriptor::LedgerKey;
use crate::error::Result;

/// A batch of hits recorded at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

impl WindowEntry {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, count: 1 }
    }

    /// Whether this entry is newer than `cutoff`.
    #[inline]
    pub fn is_active(&self, cutoff: DateTime<Utc>) -> bool {
        self.timestamp > cutoff
    }
}

/// Outcome of an atomic check-and-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the hit was recorded
    pub admitted: bool,
    /// Hits in the window before this request
    pub active: u64,
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub entries_removed: usize,
    pub endpoints_removed: usize,
    pub clients_removed: usize,
}

/// Storage for sliding-window ledgers.
///
/// Implementations must make [`WindowStore::admit`] atomic with respect to
/// every other call for the same key: two concurrent admits may never both
/// observe the same active count.
pub trait WindowStore: Send + Sync {
    /// Sum of hits for `key` newer than `now - window`. Does not create the key.
    fn count_active(&self, key: &LedgerKey, now: DateTime<Utc>, window: Duration) -> u64;

    /// Append one hit for `key` at `now`.
    fn record(&self, key: &LedgerKey, now: DateTime<Utc>);

    /// Count, compare against `ceiling`, and record if under it, as one step.
    /// Rejected hits are not recorded.
    fn admit(
        &self,
        key: &LedgerKey,
        now: DateTime<Utc>,
        window: Duration,
        ceiling: u64,
    ) -> WindowDecision;

    /// Drop entries at or before `cutoff` and any ledgers left empty.
    fn sweep(&self, cutoff: DateTime<Utc>) -> Result<SweepStats>;

    /// Number of distinct clients with at least one ledger.
    fn client_count(&self) -> usize;

    /// Number of (client, endpoint) ledgers.
    fn ledger_count(&self) -> usize;

    /// Remove everything.
    fn clear(&self);
}

fn active_sum(entries: &[WindowEntry], cutoff: DateTime<Utc>) -> u64 {
    entries
        .iter()
        .filter(|e| e.is_active(cutoff))
        .map(|e| e.count)
        .sum()
}

type Ledger = HashMap<ClientId, HashMap<String, Vec<WindowEntry>>>;

/// In-memory store guarded by a single mutex.
///
/// Every operation, including sweeps, serializes on the same lock. There is
/// no per-key locking, so no lock ordering to get wrong.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    ledger: Mutex<Ledger>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn count_active(&self, key: &LedgerKey, now: DateTime<Utc>, window: Duration) -> u64 {
        let ledger = self.ledger.lock();
        ledger
            .get(&key.client)
            .and_then(|endpoints| endpoints.get(&key.endpoint))
            .map(|entries| active_sum(entries, now - window))
            .unwrap_or(0)
    }

    fn record(&self, key: &LedgerKey, now: DateTime<Utc>) {
        let mut ledger = self.ledger.lock();
        ledger
            .entry(key.client.clone())
            .or_default()
            .entry(key.endpoint.clone())
            .or_default()
            .push(WindowEntry::new(now));
    }

    fn admit(
        &self,
        key: &LedgerKey,
        now: DateTime<Utc>,
        window: Duration,
        ceiling: u64,
    ) -> WindowDecision {
        let cutoff = now - window;
        let mut ledger = self.ledger.lock();

        let active = ledger
            .get(&key.client)
            .and_then(|endpoints| endpoints.get(&key.endpoint))
            .map(|entries| active_sum(entries, cutoff))
            .unwrap_or(0);

        if active >= ceiling {
            return WindowDecision {
                admitted: false,
                active,
            };
        }

        let entries = ledger
            .entry(key.client.clone())
            .or_default()
            .entry(key.endpoint.clone())
            .or_default();
        entries.retain(|e| e.is_active(cutoff));
        entries.push(WindowEntry::new(now));

        WindowDecision {
            admitted: true,
            active,
        }
    }

    fn sweep(&self, cutoff: DateTime<Utc>) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let mut ledger = self.ledger.lock();

        ledger.retain(|_, endpoints| {
            endpoints.retain(|_, entries| {
                let before = entries.len();
                entries.retain(|e| e.is_active(cutoff));
                stats.entries_removed += before - entries.len();
                if entries.is_empty() {
                    stats.endpoints_removed += 1;
                    false
                } else {
                    true
                }
            });
            if endpoints.is_empty() {
                stats.clients_removed += 1;
                false
            } else {
                true
            }
        });

        Ok(stats)
    }

    fn client_count(&self) -> usize {
        self.ledger.lock().len()
    }

    fn ledger_count(&self) -> usize {
        self.ledger.lock().values().map(HashMap::len).sum()
    }

    fn clear(&self) {
        self.ledger.lock().clear();
    }
}

/// Store sharded by ledger key.
///
/// Each key is guarded by its `DashMap` shard lock, so requests for
/// different keys rarely contend. `admit` holds the shard lock across the
/// count and the write, which keeps it atomic per key.
#[derive(Debug, Default)]
pub struct ShardedWindowStore {
    ledgers: DashMap<LedgerKey, Vec<WindowEntry>>,
}

impl ShardedWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> HashSet<ClientId> {
        self.ledgers.iter().map(|r| r.key().client.clone()).collect()
    }
}

impl WindowStore for ShardedWindowStore {
    fn count_active(&self, key: &LedgerKey, now: DateTime<Utc>, window: Duration) -> u64 {
        self.ledgers
            .get(key)
            .map(|entries| active_sum(&entries, now - window))
            .unwrap_or(0)
    }

    fn record(&self, key: &LedgerKey, now: DateTime<Utc>) {
        self.ledgers
            .entry(key.clone())
            .or_default()
            .push(WindowEntry::new(now));
    }

    fn admit(
        &self,
        key: &LedgerKey,
        now: DateTime<Utc>,
        window: Duration,
        ceiling: u64,
    ) -> WindowDecision {
        let cutoff = now - window;

        let decision = {
            let mut entries = self.ledgers.entry(key.clone()).or_default();
            let active = active_sum(&entries, cutoff);
            if active >= ceiling {
                WindowDecision {
                    admitted: false,
                    active,
                }
            } else {
                entries.retain(|e| e.is_active(cutoff));
                entries.push(WindowEntry::new(now));
                WindowDecision {
                    admitted: true,
                    active,
                }
            }
        };

        if !decision.admitted {
            self.ledgers.remove_if(key, |_, entries| entries.is_empty());
        }

        decision
    }

    fn sweep(&self, cutoff: DateTime<Utc>) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let clients_before = self.clients();

        self.ledgers.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.is_active(cutoff));
            stats.entries_removed += before - entries.len();
            if entries.is_empty() {
                stats.endpoints_removed += 1;
                false
            } else {
                true
            }
        });

        let clients_after = self.clients();
        stats.clients_removed = clients_before.difference(&clients_after).count();

        Ok(stats)
    }

    fn client_count(&self) -> usize {
        self.clients().len()
    }

    fn ledger_count(&self) -> usize {
        self.ledgers.len()
    }

    fn clear(&self) {
        self.ledgers.clear();
    }
}
