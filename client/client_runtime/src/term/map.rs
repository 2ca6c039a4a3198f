use std::collections::BTreeMap;
use std::sync::Arc;

use super::Term;
use super::map_key::encode_map_key;

/// Term-keyed map. Entries are indexed by the canonical key encoding, so
/// structurally equal keys collide and iteration order is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Map {
    entries: Arc<BTreeMap<String, (Term, Term)>>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Term, Term)>) -> Self {
        let mut entries = BTreeMap::new();
        for (key, value) in pairs {
            entries.insert(encode_map_key(&key), (key, value));
        }
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Returns a new map with `key` bound to `value`.
    pub fn put(&self, key: Term, value: Term) -> Map {
        let mut entries = Arc::clone(&self.entries);
        Arc::make_mut(&mut entries).insert(encode_map_key(&key), (key, value));
        Map { entries }
    }

    /// Returns a new map without `key`.
    pub fn remove(&self, key: &Term) -> Map {
        let encoded = encode_map_key(key);
        if !self.entries.contains_key(&encoded) {
            return self.clone();
        }
        let mut entries = Arc::clone(&self.entries);
        Arc::make_mut(&mut entries).remove(&encoded);
        Map { entries }
    }

    pub fn get(&self, key: &Term) -> Option<&Term> {
        self.entries
            .get(&encode_map_key(key))
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &Term) -> bool {
        self.entries.contains_key(&encode_map_key(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Term, &Term)> {
        self.entries.values().map(|(key, value)| (key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_returns_a_new_map() {
        let original = Map::new().put(Term::atom("a"), Term::integer(1));
        let updated = original.put(Term::atom("b"), Term::integer(2));

        assert_eq!(original.len(), 1);
        assert_eq!(updated.len(), 2);
        assert_eq!(original.get(&Term::atom("b")), None);
        assert_eq!(updated.get(&Term::atom("b")), Some(&Term::integer(2)));
    }

    #[test]
    fn structurally_equal_keys_collide() {
        let map = Map::from_pairs([
            (Term::string("key"), Term::integer(1)),
            (Term::binary(b"key".to_vec()), Term::integer(2)),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Term::string("key")), Some(&Term::integer(2)));
    }

    #[test]
    fn keys_of_different_types_stay_apart() {
        let map = Map::from_pairs([
            (Term::atom("a"), Term::integer(1)),
            (Term::string("a"), Term::integer(2)),
            (Term::integer(1), Term::integer(3)),
            (Term::float(1.0), Term::integer(4)),
        ]);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a = Term::map([
            (Term::atom("x"), Term::integer(1)),
            (Term::atom("y"), Term::integer(2)),
        ]);
        let b = Term::map([
            (Term::atom("y"), Term::integer(2)),
            (Term::atom("x"), Term::integer(1)),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn remove_leaves_the_original_untouched() {
        let original = Map::from_pairs([(Term::atom("a"), Term::integer(1))]);
        let removed = original.remove(&Term::atom("a"));
        assert!(removed.is_empty());
        assert!(original.contains_key(&Term::atom("a")));
    }
}
