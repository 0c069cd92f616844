//! Admission control logic and state management.

mod backend;
mod client;
mod clock;
mod descriptor;
mod engine;
mod rules;
mod store;
mod sweeper;
mod tier;

pub use backend::AdmissionBackend;
pub use client::{ClientId, CLIENT_ID_LEN, UNKNOWN_ADDRESS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use descriptor::{LedgerKey, RequestDescriptor};
pub use engine::{AdmissionEngine, AdmissionResult, EngineBuilder, RateLimitStatus, DEFAULT_WINDOW_SECS};
pub use rules::{LimitTable, TierRules, DEFAULT_PATTERN, GLOBAL_FALLBACK_LIMIT};
pub use store::{
    InMemoryWindowStore, ShardedWindowStore, SweepStats, WindowDecision, WindowEntry, WindowStore,
};
pub use sweeper::{EvictionSweeper, SweeperHandle, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use tier::{is_valid_wallet, AdminKeyStore, StaticAdminKeys, Tier, TierClassifier};
