//! Client key handling.

use std::borrow::Borrow;
use std::sync::Arc;

/// Key used when a request carries no identifying signal.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// A key that identifies the origin of a request.
///
/// The value is opaque to the limiter: an IP address, a header value, or
/// [`UNKNOWN_CLIENT`]. Cloning is cheap since the string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(Arc<str>);

impl ClientKey {
    /// Create a new client key.
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// The sentinel key for requests without any identifying signal.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_CLIENT)
    }

    /// Whether this is the sentinel key.
    pub fn is_unknown(&self) -> bool {
        &*self.0 == UNKNOWN_CLIENT
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ClientKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClientKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_client_key_equality() {
        let key1 = ClientKey::new("10.0.0.1");
        let key2 = ClientKey::from(String::from("10.0.0.1"));

        assert_eq!(key1, key2);
        assert_eq!(key1.to_string(), "10.0.0.1");
    }

    #[test]
    fn test_unknown_key() {
        assert!(ClientKey::unknown().is_unknown());
        assert!(!ClientKey::new("10.0.0.1").is_unknown());
        assert_eq!(ClientKey::unknown().as_str(), "unknown");
    }

    #[test]
    fn test_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(ClientKey::new("client_a"), 1);

        assert_eq!(map.get("client_a"), Some(&1));
        assert_eq!(map.get("client_b"), None);
    }
}
