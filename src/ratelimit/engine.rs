//! Core admission engine.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::backend::AdmissionBackend;
use super::clock::{Clock, SystemClock};
use super::descriptor::{LedgerKey, RequestDescriptor};
use super::rules::LimitTable;
use super::store::{InMemoryWindowStore, ShardedWindowStore, WindowStore};
use super::sweeper::{EvictionSweeper, SweeperHandle, DEFAULT_CLEANUP_INTERVAL_SECS};
use super::tier::{StaticAdminKeys, Tier, TierClassifier};
use crate::config::{RateLimitingConfig, StoreKind, MAX_DURATION_SECS};
use crate::error::{Result, TiergateError};

/// Default sliding window length in seconds.
pub const DEFAULT_WINDOW_SECS: i64 = 3600;

/// The outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub tier: Tier,
}

/// Read-only view of a caller's quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub tier: Tier,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Decides whether requests are admitted.
///
/// This struct is thread-safe and can be shared across tasks. All ledger
/// state lives in the [`WindowStore`]; the engine itself only holds
/// configuration.
pub struct AdmissionEngine {
    limits: RwLock<LimitTable>,
    classifier: TierClassifier,
    store: Arc<dyn WindowStore>,
    sweeper: Arc<EvictionSweeper>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl AdmissionEngine {
    /// Create an engine with the built-in limit table and default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Build an engine from the `rate_limiting` configuration section.
    ///
    /// Fails if the rules file cannot be loaded or does not validate.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let limits = match &config.rules_path {
            Some(path) => LimitTable::from_file(path)?,
            None => LimitTable::builtin(),
        };
        limits.validate()?;

        let store: Arc<dyn WindowStore> = match config.store {
            StoreKind::SingleLock => Arc::new(InMemoryWindowStore::new()),
            StoreKind::Sharded => Arc::new(ShardedWindowStore::new()),
        };

        let admin_keys = StaticAdminKeys::new(&config.admin_keys);
        info!(
            admin_keys = admin_keys.len(),
            window_secs = config.window_secs,
            cleanup_interval_secs = config.cleanup_interval_secs,
            store = ?config.store,
            "Admission engine configured"
        );

        Ok(Self::builder()
            .limits(limits)
            .store(store)
            .classifier(TierClassifier::new(Arc::new(admin_keys)))
            .window(config_duration("window_secs", config.window_secs)?)
            .cleanup_interval(config_duration(
                "cleanup_interval_secs",
                config.cleanup_interval_secs,
            )?)
            .build())
    }

    /// Evaluate a request at `now`.
    ///
    /// Admitted requests are recorded; rejected ones are not and so do not
    /// consume quota. The count-check-record sequence is atomic per store.
    pub fn evaluate(&self, descriptor: &RequestDescriptor, now: DateTime<Utc>) -> AdmissionResult {
        let client = descriptor.client_id();
        let tier = self.classify(descriptor);
        let limit = self.limits.read().resolve(tier, &descriptor.path);

        self.sweeper.maybe_sweep(now);

        let key = LedgerKey::new(client, descriptor.path.as_str());
        trace!(key = %key, tier = %tier, limit = limit, "Checking admission");

        let decision = self.store.admit(&key, now, self.window, limit);
        let reset_at = now + self.window;

        if !decision.admitted {
            debug!(
                key = %key,
                tier = %tier,
                limit = limit,
                active = decision.active,
                "Rate limit exceeded"
            );
            return AdmissionResult {
                allowed: false,
                limit,
                remaining: 0,
                reset_at,
                tier,
            };
        }

        AdmissionResult {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(decision.active + 1),
            reset_at,
            tier,
        }
    }

    /// Report usage at `now` without recording anything.
    pub fn status_at(&self, descriptor: &RequestDescriptor, now: DateTime<Utc>) -> RateLimitStatus {
        let tier = self.classify(descriptor);
        let limit = self.limits.read().resolve(tier, &descriptor.path);
        let key = LedgerKey::new(descriptor.client_id(), descriptor.path.as_str());
        let used = self.store.count_active(&key, now, self.window);

        RateLimitStatus {
            tier,
            limit,
            used,
            remaining: limit.saturating_sub(used),
            reset_at: now + self.window,
        }
    }

    /// Swap in a new limit table. The table is validated first and the old
    /// one stays in place on error.
    pub fn set_limits(&self, limits: LimitTable) -> Result<()> {
        limits.validate()?;
        *self.limits.write() = limits;
        info!("Limit table replaced");
        Ok(())
    }

    /// Get a copy of the current limit table.
    pub fn limits(&self) -> LimitTable {
        self.limits.read().clone()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    /// Start the background sweeper for this engine's store.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        self.sweeper.clone().spawn(self.clock.clone())
    }

    fn classify(&self, descriptor: &RequestDescriptor) -> Tier {
        self.classifier.classify(
            descriptor.api_key.as_deref(),
            descriptor.wallet_address.as_deref(),
        )
    }
}

fn config_duration(name: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .filter(|_| secs > 0 && secs <= MAX_DURATION_SECS)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| {
            TiergateError::Config(format!(
                "rate_limiting.{} must be between 1 and {} seconds, got {}",
                name, MAX_DURATION_SECS, secs
            ))
        })
}

/// Use `value` if it is positive and at most [`MAX_DURATION_SECS`], else the default.
fn bounded(name: &str, value: Option<Duration>, default_secs: i64) -> Duration {
    let default = Duration::seconds(default_secs);
    match value {
        None => default,
        Some(d) if d > Duration::zero() && d.num_seconds() <= MAX_DURATION_SECS as i64 => d,
        Some(d) => {
            warn!(
                setting = name,
                seconds = d.num_seconds(),
                default_secs = default_secs,
                "Duration out of range, using default"
            );
            default
        }
    }
}

impl Default for AdmissionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdmissionBackend for AdmissionEngine {
    async fn check(&self, descriptor: &RequestDescriptor) -> AdmissionResult {
        self.evaluate(descriptor, self.clock.now())
    }

    async fn status(&self, descriptor: &RequestDescriptor) -> RateLimitStatus {
        self.status_at(descriptor, self.clock.now())
    }

    fn window(&self) -> Duration {
        self.window
    }
}

/// Builder for [`AdmissionEngine`].
#[derive(Default)]
pub struct EngineBuilder {
    limits: Option<LimitTable>,
    classifier: Option<TierClassifier>,
    store: Option<Arc<dyn WindowStore>>,
    clock: Option<Arc<dyn Clock>>,
    window: Option<Duration>,
    cleanup_interval: Option<Duration>,
}

impl EngineBuilder {
    pub fn limits(mut self, limits: LimitTable) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn classifier(mut self, classifier: TierClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub fn build(self) -> AdmissionEngine {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryWindowStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let window = bounded("window", self.window, DEFAULT_WINDOW_SECS);
        let interval = bounded(
            "cleanup_interval",
            self.cleanup_interval,
            DEFAULT_CLEANUP_INTERVAL_SECS,
        );

        let sweeper = Arc::new(EvictionSweeper::new(
            store.clone(),
            window,
            interval,
            clock.now(),
        ));

        AdmissionEngine {
            limits: RwLock::new(self.limits.unwrap_or_else(LimitTable::builtin)),
            classifier: self.classifier.unwrap_or_default(),
            store,
            sweeper,
            clock,
            window,
        }
    }
}
