use std::fmt::{self, Debug, Display, Formatter};

use funcgen::{Function, Shared};
use itertools::Itertools;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::error::Error;
use crate::list::List;
use crate::value::Value;

/// Maps with more entries than this get a hash index.
const HASH_THRESHOLD: usize = 16;
/// Longest chain of `put` layers before a map is flattened.
const MAX_APPEND_DEPTH: usize = 32;

/// A persistent map from names to values.
///
/// Entries keep their insertion order. [`Map::put`] never modifies a map: it returns a new
/// map layering the entry over the unchanged original. Overriding an existing key keeps that
/// key's position.
#[derive(Clone)]
pub struct Map(Shared<Storage>);

enum Storage {
    List(Vec<(SmolStr, Value)>),
    Hash {
        entries: Vec<(SmolStr, Value)>,
        index: FxHashMap<SmolStr, usize>,
    },
    Append {
        key: SmolStr,
        value: Value,
        parent: Map,
        len: usize,
        depth: usize,
    },
}

impl Default for Map {
    fn default() -> Self {
        Map(Shared::new(Storage::List(Vec::new())))
    }
}

impl Map {
    /// Creates a map. A repeated key keeps its first position and its last value.
    pub fn new(entries: Vec<(SmolStr, Value)>) -> Self {
        let mut unique: Vec<(SmolStr, Value)> = Vec::with_capacity(entries.len());
        let mut index: FxHashMap<SmolStr, usize> = FxHashMap::default();
        for (key, value) in entries {
            match index.get(&key) {
                Some(&i) => unique[i].1 = value,
                None => {
                    index.insert(key.clone(), unique.len());
                    unique.push((key, value));
                }
            }
        }

        if unique.len() > HASH_THRESHOLD {
            Map(Shared::new(Storage::Hash { entries: unique, index }))
        } else {
            Map(Shared::new(Storage::List(unique)))
        }
    }

    pub fn len(&self) -> usize {
        match &*self.0 {
            Storage::List(entries) | Storage::Hash { entries, .. } => entries.len(),
            Storage::Append { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn depth(&self) -> usize {
        match &*self.0 {
            Storage::Append { depth, .. } => *depth,
            _ => 0,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut cursor = self;
        loop {
            match &*cursor.0 {
                Storage::Append {
                    key: k, value, parent, ..
                } => {
                    if k == key {
                        return Some(value);
                    }
                    cursor = parent;
                }
                Storage::List(entries) => return entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
                Storage::Hash { entries, index } => return index.get(key).map(|&i| &entries[i].1),
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns a new map with `key` set to `value`.
    pub fn put(&self, key: impl Into<SmolStr>, value: Value) -> Map {
        let key = key.into();
        if self.depth() >= MAX_APPEND_DEPTH {
            let mut entries = self.to_vec();
            entries.push((key, value));
            return Map::new(entries);
        }

        let len = if self.contains_key(&key) { self.len() } else { self.len() + 1 };
        Map(Shared::new(Storage::Append {
            key,
            value,
            parent: self.clone(),
            len,
            depth: self.depth() + 1,
        }))
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> Vec<(&SmolStr, &Value)> {
        let mut layers = Vec::new();
        let mut cursor = self;
        let base = loop {
            match &*cursor.0 {
                Storage::Append {
                    key, value, parent, ..
                } => {
                    layers.push((key, value));
                    cursor = parent;
                }
                Storage::List(entries) | Storage::Hash { entries, .. } => break entries,
            }
        };

        let mut entries: Vec<(&SmolStr, &Value)> = base.iter().map(|(k, v)| (k, v)).collect();
        if layers.is_empty() {
            return entries;
        }

        let mut positions: FxHashMap<&str, usize> =
            base.iter().enumerate().map(|(i, (k, _))| (k.as_str(), i)).collect();
        for (key, value) in layers.into_iter().rev() {
            match positions.get(key.as_str()) {
                Some(&i) => entries[i].1 = value,
                None => {
                    positions.insert(key.as_str(), entries.len());
                    entries.push((key, value));
                }
            }
        }
        entries
    }

    pub fn to_vec(&self) -> Vec<(SmolStr, Value)> {
        self.entries()
            .into_iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Keeps the entries for which `predicate(key, value)` returns `true`.
    pub fn accept(&self, predicate: Function<Value>) -> Result<Map, Error> {
        let mut accepted = Vec::new();
        for (key, value) in self.entries() {
            match predicate.eval(&[Value::String(key.clone()), value.clone()])? {
                Value::Bool(true) => accepted.push((key.clone(), value.clone())),
                Value::Bool(false) => {}
                _ => return Err(Error::NotABool("accept".to_string())),
            }
        }
        Ok(Map::new(accepted))
    }

    /// Replaces every value by `f(key, value)`.
    pub fn map(&self, f: Function<Value>) -> Result<Map, Error> {
        self.entries()
            .into_iter()
            .map(|(key, value)| -> Result<(SmolStr, Value), Error> {
                Ok((key.clone(), f.eval(&[Value::String(key.clone()), value.clone()])?))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Map::new)
    }

    /// Calls `f` with the map itself.
    pub fn replace(&self, f: Function<Value>) -> Result<Value, Error> {
        Ok(f.eval(&[Value::Map(self.clone())])?)
    }

    /// Lazy list of `{key, value}` maps, one per entry.
    pub fn list(&self) -> List {
        let map = self.clone();
        List::from_producer(move |sink| {
            for (key, value) in map.entries() {
                let entry = Map::new(vec![
                    (SmolStr::new_static("key"), Value::String(key.clone())),
                    (SmolStr::new_static("value"), value.clone()),
                ]);
                if !sink(Value::Map(entry))? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }
}

// Equal maps hold the same keys with equal values, however they were built.
impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        if Shared::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.len() == other.len()
            && self
                .entries()
                .into_iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl FromIterator<(SmolStr, Value)> for Map {
    fn from_iter<T: IntoIterator<Item = (SmolStr, Value)>>(iter: T) -> Self {
        Map::new(iter.into_iter().collect())
    }
}

impl Display for Map {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.entries()
                .into_iter()
                .map(|(key, value)| format!("{}:{}", key, value))
                .join(", ")
        )
    }
}

impl Debug for Map {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

#[cfg(test)]
mod tests {
    use funcgen::{Arity, EvalError};
    use rstest::rstest;

    use super::*;

    fn map(entries: &[(&str, i64)]) -> Map {
        entries
            .iter()
            .map(|(k, v)| (SmolStr::new(k), Value::Int(*v)))
            .collect()
    }

    fn closure<F>(args: usize, f: F) -> Function<Value>
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Function::new(Arity::Fixed(args), false, f)
    }

    #[test]
    fn test_put_keeps_parent() {
        let parent = map(&[("a", 1)]);
        let child = parent.put("b", Value::Int(2));

        assert_eq!(parent.len(), 1);
        assert_eq!(parent.get("b"), None);
        assert_eq!(child.len(), 2);
        assert_eq!(child.get("a"), Some(&Value::Int(1)));
        assert_eq!(child.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_put_overrides_in_place() {
        let updated = map(&[("a", 1), ("b", 2)]).put("a", Value::Int(10)).put("c", Value::Int(3));

        assert_eq!(updated.len(), 3);
        assert_eq!(updated.to_string(), "{a:10, b:2, c:3}");
        assert_eq!(updated, map(&[("a", 10), ("b", 2), ("c", 3)]));
    }

    #[test]
    fn test_long_put_chains_flatten() {
        let mut m = Map::default();
        for i in 0..100 {
            m = m.put(format!("k{}", i), Value::Int(i));
        }

        assert_eq!(m.len(), 100);
        assert!(m.depth() <= MAX_APPEND_DEPTH);
        assert_eq!(m.get("k0"), Some(&Value::Int(0)));
        assert_eq!(m.get("k99"), Some(&Value::Int(99)));
        assert_eq!(m.entries().first().map(|(k, _)| k.as_str()), Some("k0"));
    }

    #[test]
    fn test_large_maps_use_hash_index() {
        let entries: Vec<(String, i64)> = (0..40).map(|i| (format!("k{}", i), i)).collect();
        let m: Map = entries
            .iter()
            .map(|(k, v)| (SmolStr::new(k), Value::Int(*v)))
            .collect();

        assert!(matches!(&*m.0, Storage::Hash { .. }));
        assert_eq!(m.get("k39"), Some(&Value::Int(39)));
        assert_eq!(m.get("missing"), None);
    }

    #[test]
    fn test_duplicate_keys_keep_last_value() {
        let m = Map::new(vec![
            (SmolStr::new("a"), Value::Int(1)),
            (SmolStr::new("b"), Value::Int(2)),
            (SmolStr::new("a"), Value::Int(3)),
        ]);
        assert_eq!(m.to_string(), "{a:3, b:2}");
    }

    #[rstest]
    #[case::same_order(map(&[("a", 1), ("b", 2)]), map(&[("a", 1), ("b", 2)]), true)]
    #[case::other_order(map(&[("a", 1), ("b", 2)]), map(&[("b", 2), ("a", 1)]), true)]
    #[case::layered(map(&[("a", 1)]).put("b", Value::Int(2)), map(&[("b", 2), ("a", 1)]), true)]
    #[case::different_value(map(&[("a", 1)]), map(&[("a", 2)]), false)]
    #[case::different_size(map(&[("a", 1)]), map(&[("a", 1), ("b", 2)]), false)]
    fn test_structural_equality(#[case] a: Map, #[case] b: Map, #[case] expected: bool) {
        assert_eq!(a == b, expected);
    }

    #[test]
    fn test_accept_and_map() {
        let m = map(&[("a", 1), ("b", 2), ("c", 3)]);
        let odd = m
            .accept(closure(2, |args| Ok(Value::Bool(args[1].to_int().unwrap() % 2 == 1))))
            .unwrap();
        assert_eq!(odd, map(&[("a", 1), ("c", 3)]));

        let doubled = m
            .map(closure(2, |args| Ok(Value::Int(args[1].to_int().unwrap() * 2))))
            .unwrap();
        assert_eq!(doubled, map(&[("a", 2), ("b", 4), ("c", 6)]));
    }

    #[test]
    fn test_list() {
        let entries = map(&[("a", 1), ("b", 2)]).list();
        assert_eq!(entries.to_string(), "[{key:a, value:1}, {key:b, value:2}]");
    }
}
