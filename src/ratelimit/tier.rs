//! Service tiers and request classification.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::trace;

/// Length of a hex wallet address including the `0x` prefix.
const WALLET_ADDRESS_LEN: usize = 42;

/// A service class determining how generous the rate ceiling is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    #[serde(alias = "staking_user")]
    Elevated,
    Admin,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Elevated => "elevated",
            Tier::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates admin API keys.
pub trait AdminKeyStore: Send + Sync {
    /// Returns `true` if `key` is a valid admin credential.
    fn validate(&self, key: &str) -> bool;
}

/// Admin keys held in memory as SHA-256 digests.
///
/// Every stored digest is compared on each lookup, and each comparison
/// touches every byte, so timing does not reveal which key (or how much of
/// it) matched. An empty store rejects everything.
#[derive(Debug, Clone, Default)]
pub struct StaticAdminKeys {
    digests: Vec<[u8; 32]>,
}

impl StaticAdminKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = keys
            .into_iter()
            .filter(|k| !k.as_ref().is_empty())
            .map(|k| digest(k.as_ref()))
            .collect();
        Self { digests }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl AdminKeyStore for StaticAdminKeys {
    fn validate(&self, key: &str) -> bool {
        let candidate = digest(key);
        self.digests
            .iter()
            .fold(false, |found, stored| found | constant_time_eq(stored, &candidate))
    }
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Structural check for a `0x`-prefixed, 42-character hex address.
///
/// This is syntax only; no signature is verified.
pub fn is_valid_wallet(address: &str) -> bool {
    address.len() == WALLET_ADDRESS_LEN
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Maps request credentials to a [`Tier`].
#[derive(Clone)]
pub struct TierClassifier {
    admin_keys: Arc<dyn AdminKeyStore>,
}

impl TierClassifier {
    pub fn new(admin_keys: Arc<dyn AdminKeyStore>) -> Self {
        Self { admin_keys }
    }

    /// Classify a request. Missing or malformed credentials yield `Free`.
    pub fn classify(&self, api_key: Option<&str>, wallet_address: Option<&str>) -> Tier {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            if self.admin_keys.validate(key) {
                return Tier::Admin;
            }
            trace!("Admin key rejected");
        }

        if wallet_address.is_some_and(is_valid_wallet) {
            return Tier::Elevated;
        }

        Tier::Free
    }
}

impl Default for TierClassifier {
    fn default() -> Self {
        Self::new(Arc::new(StaticAdminKeys::default()))
    }
}

impl std::fmt::Debug for TierClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierClassifier").finish_non_exhaustive()
    }
}
