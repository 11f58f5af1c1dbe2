//! Stored value envelopes.

use serde::{Deserialize, Serialize};

/// A key/value entry with an optional absolute expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TtlValue {
    pub value: String,
    /// Epoch milliseconds after which the entry reads as absent.
    pub expires_at_ms: Option<u64>,
}

impl TtlValue {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|exp| now_ms >= exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundaries() {
        let v = TtlValue {
            value: "x".to_string(),
            expires_at_ms: Some(1000),
        };
        assert!(!v.is_expired(999));
        assert!(v.is_expired(1000));

        let forever = TtlValue {
            value: "x".to_string(),
            expires_at_ms: None,
        };
        assert!(!forever.is_expired(u64::MAX));
    }
}
