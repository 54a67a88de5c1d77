//! Cache Entry Module
//!
//! Defines the record stored for every resident key.

// == Cache Entry ==
/// Represents a single cache entry with value and policy metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The key this entry is indexed under
    pub key: String,
    /// The stored value
    pub value: Vec<u8>,
    /// Access count, meaningful only under LFU. Starts at 1.
    pub frequency: u64,
    /// Bytes charged against the cache size when the entry was created.
    ///
    /// Overwriting the value leaves the charge untouched, so removing the
    /// entry always releases exactly what was reserved for it.
    pub charge: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry at frequency 1, charged at the value's length.
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        let charge = value.len() as u64;
        Self {
            key: key.into(),
            value,
            frequency: 1,
            charge,
        }
    }

    // == Replace Value ==
    /// Overwrites the value in place without touching the charge.
    pub fn replace_value(&mut self, value: Vec<u8>) {
        self.value = value;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("key", b"value".to_vec());

        assert_eq!(entry.key, "key");
        assert_eq!(entry.value, b"value");
        assert_eq!(entry.frequency, 1);
        assert_eq!(entry.charge, 5);
    }

    #[test]
    fn test_replace_value_keeps_charge() {
        let mut entry = CacheEntry::new("key", b"ab".to_vec());
        entry.replace_value(b"a much longer value".to_vec());

        assert_eq!(entry.value, b"a much longer value");
        assert_eq!(entry.charge, 2);
    }

    #[test]
    fn test_empty_value_has_zero_charge() {
        let entry = CacheEntry::new("key", Vec::new());
        assert_eq!(entry.charge, 0);
    }
}
