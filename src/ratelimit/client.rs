//! Privacy-preserving client identification.

use sha2::{Digest, Sha256};

/// Address used when neither a forwarding header nor a peer address is known.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Number of hex characters kept from the address digest.
pub const CLIENT_ID_LEN: usize = 16;

/// An opaque, fixed-length identifier derived from a client's address.
///
/// The raw address never reaches the ledger; only its truncated SHA-256
/// digest does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Hash an address string into a client identifier.
    pub fn from_address(address: &str) -> Self {
        let digest = Sha256::digest(address.as_bytes());
        let mut hex = format!("{:x}", digest);
        hex.truncate(CLIENT_ID_LEN);
        Self(hex)
    }

    /// Resolve the identifier for a request.
    ///
    /// The first entry of an `X-Forwarded-For` chain wins over the direct
    /// peer address. An empty first entry falls through to the peer.
    pub fn resolve(peer_addr: Option<&str>, forwarded_for: Option<&str>) -> Self {
        Self::from_address(client_address(peer_addr, forwarded_for))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pick the address that identifies the originating client.
pub fn client_address<'a>(peer_addr: Option<&'a str>, forwarded_for: Option<&'a str>) -> &'a str {
    let forwarded = forwarded_for
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| peer_addr.map(str::trim).filter(|ip| !ip.is_empty()))
        .unwrap_or(UNKNOWN_ADDRESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_is_fixed_length_hex() {
        let id = ClientId::from_address("192.168.1.10");
        assert_eq!(id.as_str().len(), CLIENT_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_client_id_is_deterministic() {
        assert_eq!(
            ClientId::from_address("10.0.0.1"),
            ClientId::from_address("10.0.0.1")
        );
        assert_ne!(
            ClientId::from_address("10.0.0.1"),
            ClientId::from_address("10.0.0.2")
        );
    }

    #[test]
    fn test_client_id_matches_sha256_prefix() {
        // sha256("unknown") = 4a8a...; only the prefix is kept
        let id = ClientId::from_address("unknown");
        let full = format!("{:x}", Sha256::digest(b"unknown"));
        assert_eq!(id.as_str(), &full[..CLIENT_ID_LEN]);
    }

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let addr = client_address(Some("10.0.0.1"), Some(" 203.0.113.7 , 10.0.0.2, 10.0.0.3"));
        assert_eq!(addr, "203.0.113.7");
    }

    #[test]
    fn test_peer_address_without_forwarding() {
        assert_eq!(client_address(Some("10.0.0.1"), None), "10.0.0.1");
    }

    #[test]
    fn test_empty_forwarded_entry_falls_back_to_peer() {
        assert_eq!(client_address(Some("10.0.0.1"), Some(" , 1.2.3.4")), "10.0.0.1");
    }

    #[test]
    fn test_unknown_sentinel() {
        assert_eq!(client_address(None, None), UNKNOWN_ADDRESS);
        assert_eq!(ClientId::resolve(None, None), ClientId::from_address("unknown"));
    }
}
