//! Request descriptors and ledger keys.

use serde::{Deserialize, Serialize};

use super::client::ClientId;

/// Everything the engine needs to know about an inbound request.
///
/// The host pipeline parses the request; the engine never sees the raw
/// connection or body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Direct peer address of the connection
    #[serde(default)]
    pub peer_addr: Option<String>,
    /// Raw `X-Forwarded-For` header value
    #[serde(default)]
    pub forwarded_for: Option<String>,
    /// Raw `X-API-Key` header value
    #[serde(default)]
    pub api_key: Option<String>,
    /// Raw `X-Wallet-Address` header value
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Requested path, without query string
    pub path: String,
}

impl RequestDescriptor {
    /// Create a descriptor for `path` with no connection details.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_peer_addr(mut self, addr: impl Into<String>) -> Self {
        self.peer_addr = Some(addr.into());
        self
    }

    pub fn with_forwarded_for(mut self, chain: impl Into<String>) -> Self {
        self.forwarded_for = Some(chain.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_wallet_address(mut self, address: impl Into<String>) -> Self {
        self.wallet_address = Some(address.into());
        self
    }

    /// The client identifier for this request.
    pub fn client_id(&self) -> ClientId {
        ClientId::resolve(self.peer_addr.as_deref(), self.forwarded_for.as_deref())
    }
}

/// A key that uniquely identifies one ledger in the window store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    /// The hashed client identifier
    pub client: ClientId,
    /// The exact request path
    pub endpoint: String,
}

impl LedgerKey {
    pub fn new(client: ClientId, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl std::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client, self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let descriptor = RequestDescriptor::new("/api/data")
            .with_peer_addr("10.0.0.1")
            .with_api_key("key");

        assert_eq!(descriptor.path, "/api/data");
        assert_eq!(descriptor.peer_addr.as_deref(), Some("10.0.0.1"));
        assert_eq!(descriptor.api_key.as_deref(), Some("key"));
        assert!(descriptor.wallet_address.is_none());
    }

    #[test]
    fn test_descriptor_client_id_prefers_forwarded_for() {
        let descriptor = RequestDescriptor::new("/")
            .with_peer_addr("10.0.0.1")
            .with_forwarded_for("203.0.113.9, 10.0.0.1");

        assert_eq!(descriptor.client_id(), ClientId::from_address("203.0.113.9"));
    }

    #[test]
    fn test_descriptor_from_json() {
        let descriptor: RequestDescriptor =
            serde_json::from_str(r#"{"path": "/api/data", "peer_addr": "1.2.3.4"}"#).unwrap();
        assert_eq!(descriptor.path, "/api/data");
        assert!(descriptor.forwarded_for.is_none());
    }

    #[test]
    fn test_ledger_key_display() {
        let key = LedgerKey::new(ClientId::from_address("1.2.3.4"), "/api/data");
        assert_eq!(key.to_string(), format!("{}:/api/data", key.client));
    }

    #[test]
    fn test_ledger_key_equality() {
        let a = LedgerKey::new(ClientId::from_address("1.2.3.4"), "/x");
        let b = LedgerKey::new(ClientId::from_address("1.2.3.4"), "/x");
        let c = LedgerKey::new(ClientId::from_address("1.2.3.4"), "/y");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
