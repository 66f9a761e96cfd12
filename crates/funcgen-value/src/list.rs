use std::fmt::{self, Debug, Display, Formatter};
use std::sync::OnceLock;

use funcgen::{Function, Shared};
use itertools::Itertools;
use parking_lot::ReentrantMutex;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::trace;

use crate::error::Error;
use crate::map::Map;
use crate::value::Value;

/// Receives the items of a traversal. Returning `Ok(false)` stops the traversal.
pub type Sink<'a> = &'a mut dyn FnMut(Value) -> Result<bool, Error>;

/// Restartable producer feeding every item to the sink. Returns `Ok(false)` if the sink
/// stopped the traversal early.
type Producer = Shared<dyn Fn(&mut dyn FnMut(Value) -> Result<bool, Error>) -> Result<bool, Error> + Send + Sync>;

/// A possibly lazy list of values.
///
/// A list is either backed by its items or by a producer that can be run any number of
/// times. The first traversal that runs to completion caches the produced items, and every
/// later traversal reads the cache instead of running the producer again. Derived lists
/// (`accept`, `map`, `top`, ...) are lazy: they do no work until traversed.
///
/// Lists are cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct List(Shared<Inner>);

struct Inner {
    producer: Option<Producer>,
    items: OnceLock<Shared<[Value]>>,
    /// Held while the producer runs. Reentrant so that a sink may read the list it is
    /// traversing.
    materialize: ReentrantMutex<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Int(i64),
    String(SmolStr),
}

impl From<GroupKey> for Value {
    fn from(key: GroupKey) -> Self {
        match key {
            GroupKey::Int(i) => Value::Int(i),
            GroupKey::String(s) => Value::String(s),
        }
    }
}

impl Default for List {
    fn default() -> Self {
        List::new(Vec::new())
    }
}

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Shared::from(items));
        List(Shared::new(Inner {
            producer: None,
            items: cell,
            materialize: ReentrantMutex::new(()),
        }))
    }

    /// Creates a lazy list. `producer` must yield the same items every time it is run.
    pub fn from_producer<F>(producer: F) -> Self
    where
        F: Fn(&mut dyn FnMut(Value) -> Result<bool, Error>) -> Result<bool, Error> + Send + Sync + 'static,
    {
        List(Shared::new(Inner {
            producer: Some(Shared::new(producer)),
            items: OnceLock::new(),
            materialize: ReentrantMutex::new(()),
        }))
    }

    /// The lazy list `0, 1, ..., n-1`.
    pub fn range(n: i64) -> Self {
        List::from_producer(move |sink| {
            for i in 0..n {
                if !sink(Value::Int(i))? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }

    pub fn is_materialized(&self) -> bool {
        self.0.items.get().is_some()
    }

    /// Feeds every item to `sink`.
    ///
    /// Returns `Ok(false)` if the sink stopped early. A complete traversal of a lazy list
    /// caches its items. Traversals of a list that is not cached yet run one at a time, so
    /// concurrent first traversals run the producer once.
    pub fn iterate(&self, sink: Sink<'_>) -> Result<bool, Error> {
        if let Some(items) = self.0.items.get() {
            return feed(items, sink);
        }

        let Some(producer) = &self.0.producer else {
            return Ok(true);
        };
        let _guard = self.0.materialize.lock();
        if let Some(items) = self.0.items.get() {
            return feed(items, sink);
        }

        let mut seen = Vec::new();
        let completed = producer(&mut |value| {
            seen.push(value.clone());
            sink(value)
        })?;
        if completed && self.0.items.set(Shared::from(seen)).is_ok() {
            trace!("list materialized by traversal");
        }
        Ok(completed)
    }

    /// Returns all items, running the producer at most once across all callers.
    pub fn items(&self) -> Result<Shared<[Value]>, Error> {
        if let Some(items) = self.0.items.get() {
            return Ok(Shared::clone(items));
        }

        let _guard = self.0.materialize.lock();
        if let Some(items) = self.0.items.get() {
            return Ok(Shared::clone(items));
        }

        let mut items = Vec::new();
        if let Some(producer) = &self.0.producer {
            producer(&mut |value| {
                items.push(value);
                Ok(true)
            })?;
        }
        let items: Shared<[Value]> = Shared::from(items);
        let _ = self.0.items.set(Shared::clone(&items));
        trace!(len = items.len(), "list materialized");
        Ok(items)
    }

    pub fn size(&self) -> Result<usize, Error> {
        Ok(self.items()?.len())
    }

    pub fn get(&self, index: i64) -> Result<Value, Error> {
        let items = self.items()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or(Error::IndexOutOfBounds {
                index,
                len: items.len(),
            })
    }

    pub fn first(&self) -> Result<Value, Error> {
        let mut first = None;
        self.iterate(&mut |value| {
            first = Some(value);
            Ok(false)
        })?;
        first.ok_or_else(|| Error::NoItems("first".to_string()))
    }

    /// Lazily keeps the items for which `predicate` returns `true`.
    pub fn accept(&self, predicate: Function<Value>) -> List {
        let source = self.clone();
        List::from_producer(move |sink| {
            source.iterate(&mut |value| match predicate.eval(std::slice::from_ref(&value))? {
                Value::Bool(true) => sink(value),
                Value::Bool(false) => Ok(true),
                _ => Err(Error::NotABool("accept".to_string())),
            })
        })
    }

    pub fn map(&self, f: Function<Value>) -> List {
        let source = self.clone();
        List::from_producer(move |sink| source.iterate(&mut |value| sink(f.eval(&[value])?)))
    }

    /// Folds the list from the left, starting with the first item.
    pub fn reduce(&self, f: Function<Value>) -> Result<Value, Error> {
        let mut acc: Option<Value> = None;
        self.iterate(&mut |value| {
            acc = Some(match acc.take() {
                Some(acc) => f.eval(&[acc, value])?,
                None => value,
            });
            Ok(true)
        })?;
        acc.ok_or_else(|| Error::NoItems("reduce".to_string()))
    }

    /// Calls `f` with the list itself.
    pub fn replace(&self, f: Function<Value>) -> Result<Value, Error> {
        Ok(f.eval(&[Value::List(self.clone())])?)
    }

    /// Lazily applies `f` to every pair of neighbours, yielding one item less than the list has.
    pub fn combine(&self, f: Function<Value>) -> List {
        let source = self.clone();
        List::from_producer(move |sink| {
            let mut last: Option<Value> = None;
            source.iterate(&mut |value| match last.replace(value.clone()) {
                Some(previous) => sink(f.eval(&[previous, value])?),
                None => Ok(true),
            })
        })
    }

    /// Index of the first item equal to `item`, or `-1`.
    pub fn index_of(&self, item: &Value) -> Result<i64, Error> {
        let mut index = 0;
        let mut found = false;
        self.iterate(&mut |value| {
            if value == *item {
                found = true;
                return Ok(false);
            }
            index += 1;
            Ok(true)
        })?;
        Ok(if found { index } else { -1 })
    }

    pub fn group_by_string(&self, key: Function<Value>) -> Result<List, Error> {
        self.group_by(|value| Ok(GroupKey::String(SmolStr::new(key.eval(&[value])?.to_string()))))
    }

    pub fn group_by_int(&self, key: Function<Value>) -> Result<List, Error> {
        self.group_by(|value| match key.eval(&[value])? {
            Value::Int(i) => Ok(GroupKey::Int(i)),
            Value::Float(f) if f.is_finite() => Ok(GroupKey::Int(f.trunc() as i64)),
            _ => Err(Error::invalid_type("groupByInt", "an int as key")),
        })
    }

    /// Groups the items into `{key, value}` maps. Groups appear in the order their key was
    /// first seen and keep the relative order of their members.
    fn group_by<F>(&self, mut key_of: F) -> Result<List, Error>
    where
        F: FnMut(Value) -> Result<GroupKey, Error>,
    {
        let mut groups: Vec<(GroupKey, Vec<Value>)> = Vec::new();
        let mut index: FxHashMap<GroupKey, usize> = FxHashMap::default();
        self.iterate(&mut |value| {
            let key = key_of(value.clone())?;
            match index.get(&key) {
                Some(&i) => groups[i].1.push(value),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![value]));
                }
            }
            Ok(true)
        })?;

        Ok(List::new(
            groups
                .into_iter()
                .map(|(key, members)| {
                    Value::Map(Map::new(vec![
                        (SmolStr::new_static("key"), key.into()),
                        (SmolStr::new_static("value"), Value::List(List::new(members))),
                    ]))
                })
                .collect(),
        ))
    }

    /// Stable sort by `less(a, b)`, which must return a bool.
    pub fn order(&self, less: Function<Value>) -> Result<List, Error> {
        let items = self.items()?.to_vec();
        let sorted = merge_sort(items, &mut |a, b| match less.eval(&[a.clone(), b.clone()])? {
            Value::Bool(b) => Ok(b),
            _ => Err(Error::NotABool("order".to_string())),
        })?;
        Ok(List::new(sorted))
    }

    pub fn reverse(&self) -> Result<List, Error> {
        let mut items = self.items()?.to_vec();
        items.reverse();
        Ok(List::new(items))
    }

    /// Returns a new list with `item` appended; this list is unchanged.
    pub fn append(&self, item: Value) -> Result<List, Error> {
        let items = self.items()?;
        let mut appended = Vec::with_capacity(items.len() + 1);
        appended.extend(items.iter().cloned());
        appended.push(item);
        Ok(List::new(appended))
    }

    /// Lazy recursive filter: the first item maps through `initial(item)`, every further
    /// item through `f(item, previous_result)`.
    pub fn iir(&self, initial: Function<Value>, f: Function<Value>) -> List {
        let source = self.clone();
        List::from_producer(move |sink| {
            let mut last: Option<Value> = None;
            source.iterate(&mut |item| {
                let next = match last.take() {
                    Some(previous) => f.eval(&[item, previous])?,
                    None => initial.eval(&[item])?,
                };
                last = Some(next.clone());
                sink(next)
            })
        })
    }

    /// Threads `visitor` through `f(visitor, item)` for every item.
    pub fn visit(&self, visitor: Value, f: Function<Value>) -> Result<Value, Error> {
        let mut visitor = visitor;
        self.iterate(&mut |item| {
            let current = std::mem::replace(&mut visitor, Value::FALSE);
            visitor = f.eval(&[current, item])?;
            Ok(true)
        })?;
        Ok(visitor)
    }

    /// Lazily takes the first `n` items.
    pub fn top(&self, n: usize) -> List {
        let source = self.clone();
        List::from_producer(move |sink| {
            if n == 0 {
                return Ok(true);
            }
            let mut remaining = n;
            let mut stopped = false;
            source.iterate(&mut |value| {
                if !sink(value)? {
                    stopped = true;
                    return Ok(false);
                }
                remaining -= 1;
                Ok(remaining > 0)
            })?;
            Ok(!stopped)
        })
    }

    /// Lazily maps every item through `f(index, item)`.
    pub fn number(&self, f: Function<Value>) -> List {
        let source = self.clone();
        List::from_producer(move |sink| {
            let mut index = 0i64;
            source.iterate(&mut |value| {
                let numbered = f.eval(&[Value::Int(index), value])?;
                index += 1;
                sink(numbered)
            })
        })
    }

    pub fn string(&self) -> Result<String, Error> {
        Ok(format!("[{}]", self.items()?.iter().join(", ")))
    }

    pub fn equals(&self, other: &List) -> Result<bool, Error> {
        if Shared::ptr_eq(&self.0, &other.0) {
            return Ok(true);
        }
        Ok(*self.items()? == *other.items()?)
    }
}

fn feed(items: &[Value], sink: Sink<'_>) -> Result<bool, Error> {
    for item in items {
        if !sink(item.clone())? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn merge_sort<F>(mut items: Vec<Value>, less: &mut F) -> Result<Vec<Value>, Error>
where
    F: FnMut(&Value, &Value) -> Result<bool, Error>,
{
    if items.len() <= 1 {
        return Ok(items);
    }

    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, less)?;
    let right = merge_sort(right, less)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        // Take from the right only if strictly less, which keeps equal items in order.
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => less(r, l)?,
            _ => break,
        };
        merged.extend(if take_right { right.next() } else { left.next() });
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

impl Display for List {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.string() {
            Ok(s) => write!(f, "{}", s),
            Err(err) => write!(f, "[<{}>]", err),
        }
    }
}

impl Debug for List {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0.items.get() {
            Some(items) => f.debug_list().entries(items.iter()).finish(),
            None => write!(f, "[<lazy>]"),
        }
    }
}
