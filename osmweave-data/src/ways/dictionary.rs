//! Per-pass dictionary of tag keys and their common values.

use std::collections::HashMap;

use log::warn;

/// Most distinct keys indexed in one pass.
pub const MAX_KEYS: usize = 32_768;

/// Values indexed per key before later values are stored inline.
pub const MAX_VALUES_PER_KEY: usize = 1_024;

/// How an encoded tag refers to its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRef {
    /// Index into the key's value table, always at least 1.
    Indexed(u32),
    /// The value travels inline next to the key index.
    Inline,
}

#[derive(Debug, Default)]
struct KeyEntry {
    name: String,
    values: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl KeyEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            // Slot 0 doubles as the inline marker in the encoding.
            values: vec![String::new()],
            lookup: HashMap::new(),
        }
    }
}

/// Maps keys to small indices and values to per-key indices.
///
/// Indices stay valid for the whole pass so encoded ways persisted early
/// can be decoded later. Call [`KeyDictionary::clear`] between passes.
#[derive(Debug, Default)]
pub struct KeyDictionary {
    keys: Vec<KeyEntry>,
    lookup: HashMap<String, u32>,
    warned_full: bool,
}

impl KeyDictionary {
    /// Create an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed keys.
    #[must_use]
    pub const fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Intern `key=value`, returning the key index and the value reference.
    ///
    /// Returns `None` once [`MAX_KEYS`] distinct keys are known and `key` is
    /// new; the caller drops such tags.
    pub fn intern(&mut self, key: &str, value: &str) -> Option<(u32, ValueRef)> {
        let key_index = match self.lookup.get(key) {
            Some(&index) => index,
            None => {
                if self.keys.len() >= MAX_KEYS {
                    if !self.warned_full {
                        warn!("more than {MAX_KEYS} distinct tag keys; dropping tags with new keys");
                        self.warned_full = true;
                    }
                    return None;
                }
                let index = u32::try_from(self.keys.len()).ok()?;
                self.keys.push(KeyEntry::new(key));
                self.lookup.insert(key.to_owned(), index);
                index
            }
        };
        let entry = self.keys.get_mut(usize::try_from(key_index).ok()?)?;
        if let Some(&value_index) = entry.lookup.get(value) {
            return Some((key_index, ValueRef::Indexed(value_index)));
        }
        if entry.values.len() >= MAX_VALUES_PER_KEY || value.is_empty() {
            return Some((key_index, ValueRef::Inline));
        }
        let value_index = u32::try_from(entry.values.len()).ok()?;
        entry.values.push(value.to_owned());
        entry.lookup.insert(value.to_owned(), value_index);
        Some((key_index, ValueRef::Indexed(value_index)))
    }

    /// Key text for `index`.
    #[must_use]
    pub fn key(&self, index: u32) -> Option<&str> {
        self.keys
            .get(usize::try_from(index).ok()?)
            .map(|entry| entry.name.as_str())
    }

    /// Value text for `value_index` under `key_index`.
    #[must_use]
    pub fn value(&self, key_index: u32, value_index: u32) -> Option<&str> {
        self.keys
            .get(usize::try_from(key_index).ok()?)?
            .values
            .get(usize::try_from(value_index).ok()?)
            .map(String::as_str)
    }

    /// Forget every key and value.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.lookup.clear();
        self.warned_full = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn repeated_pairs_share_indices() {
        let mut dictionary = KeyDictionary::new();
        let first = dictionary.intern("highway", "residential");
        let second = dictionary.intern("highway", "residential");
        assert_eq!(first, second);
        assert_eq!(first, Some((0, ValueRef::Indexed(1))));
        assert_eq!(dictionary.key(0), Some("highway"));
        assert_eq!(dictionary.value(0, 1), Some("residential"));
    }

    #[rstest]
    fn empty_values_travel_inline() {
        let mut dictionary = KeyDictionary::new();
        assert_eq!(dictionary.intern("note", ""), Some((0, ValueRef::Inline)));
    }

    #[rstest]
    fn busy_keys_spill_values_inline() {
        let mut dictionary = KeyDictionary::new();
        for value in 1..MAX_VALUES_PER_KEY {
            let interned = dictionary.intern("name", &format!("v{value}"));
            assert!(matches!(interned, Some((0, ValueRef::Indexed(_)))));
        }
        assert_eq!(dictionary.intern("name", "overflow"), Some((0, ValueRef::Inline)));
        assert_eq!(dictionary.intern("name", "v1"), Some((0, ValueRef::Indexed(1))));
    }

    #[rstest]
    fn new_keys_are_refused_when_full() {
        let mut dictionary = KeyDictionary::new();
        for key in 0..MAX_KEYS {
            assert!(dictionary.intern(&format!("k{key}"), "v").is_some());
        }
        assert_eq!(dictionary.intern("one-too-many", "v"), None);
        assert!(dictionary.intern("k0", "v").is_some());

        dictionary.clear();
        assert_eq!(dictionary.key_count(), 0);
        assert_eq!(dictionary.intern("fresh", "v"), Some((0, ValueRef::Indexed(1))));
    }
}
