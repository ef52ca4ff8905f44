//! Transaction identifier using UUIDv7
//!
//! UUIDv7 provides time-ordered uniqueness, which keeps coordinator and
//! decision-log output readable without giving ordering any protocol meaning.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque transaction identifier, assigned at `begin` and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new transaction ID using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID (for testing/deserialization)
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for TransactionId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransactionId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Lexicographic comparison of bytes provides total ordering
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let id1 = TransactionId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TransactionId::new();

        // Later transaction should have higher ID (roughly)
        // Note: Not guaranteed due to millisecond precision, but likely
        assert!(id1 <= id2);
    }

    #[test]
    fn test_roundtrip() {
        let id = TransactionId::new();
        let s = id.to_string();
        let parsed = TransactionId::parse(&s).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_hash_eq_consistency() {
        use std::collections::HashMap;

        let id1 = TransactionId::new();
        let id2 = id1; // Copy

        let mut map = HashMap::new();
        map.insert(id1, "value");

        // Should be able to retrieve with copy
        assert_eq!(map.get(&id2), Some(&"value"));
    }

    #[test]
    fn test_from_uuid() {
        let uuid = Uuid::now_v7();
        let txn_id = TransactionId::from_uuid(uuid);
        assert_eq!(txn_id.as_uuid(), &uuid);
    }
}
