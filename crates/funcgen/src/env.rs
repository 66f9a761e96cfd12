use std::fmt::{self, Debug, Formatter};

use rustc_hash::FxHashMap;

use crate::Shared;
use crate::ast::node::IdentName;

type Materialize<V> = dyn Fn(&Env<V>) -> V + Send + Sync;

/// Persistent scope chain resolving names to values.
///
/// An `Env` is a handle to the innermost frame of a singly linked list of frames. Binding a
/// name never mutates an existing frame: it allocates a new frame pointing at the current one,
/// so every closure that captured the old handle keeps seeing exactly what it captured.
pub struct Env<V> {
    head: Option<Shared<Frame<V>>>,
}

struct Frame<V> {
    binding: Binding<V>,
    parent: Env<V>,
}

enum Binding<V> {
    Value {
        name: IdentName,
        value: V,
    },
    Map(FxHashMap<IdentName, V>),
    /// A name whose value is created on lookup from the frame holding it. This is how a
    /// closure bound by `let` sees itself without the frame owning the closure, which would
    /// otherwise form a reference cycle.
    Recursive {
        name: IdentName,
        materialize: Shared<Materialize<V>>,
    },
}

impl<V> Clone for Env<V> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
        }
    }
}

impl<V> Default for Env<V> {
    fn default() -> Self {
        Self { head: None }
    }
}

impl<V: Clone> Env<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a root environment holding all given bindings in a single frame.
    pub fn from_map<I, K>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<IdentName>,
    {
        Env::new().bind_all(vars)
    }

    /// Returns a new environment with `name` bound to `value` on top of `self`.
    pub fn bind(&self, name: impl Into<IdentName>, value: V) -> Self {
        self.push(Binding::Value {
            name: name.into(),
            value,
        })
    }

    /// Returns a new environment with all given bindings in one frame on top of `self`.
    pub fn bind_all<I, K>(&self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<IdentName>,
    {
        let map: FxHashMap<IdentName, V> = vars.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if map.is_empty() {
            return self.clone();
        }
        self.push(Binding::Map(map))
    }

    /// Binds `name` to a value produced on demand from the environment that contains the
    /// binding itself.
    pub fn bind_recursive<F>(&self, name: impl Into<IdentName>, materialize: F) -> Self
    where
        F: Fn(&Env<V>) -> V + Send + Sync + 'static,
    {
        self.push(Binding::Recursive {
            name: name.into(),
            materialize: Shared::new(materialize),
        })
    }

    fn push(&self, binding: Binding<V>) -> Self {
        Self {
            head: Some(Shared::new(Frame {
                binding,
                parent: self.clone(),
            })),
        }
    }

    /// Looks up `name`, innermost binding first.
    pub fn get(&self, name: &str) -> Option<V> {
        let mut cursor = self.head.as_ref();
        while let Some(frame) = cursor {
            match &frame.binding {
                Binding::Value { name: n, value } if n == name => return Some(value.clone()),
                Binding::Map(map) => {
                    if let Some(value) = map.get(name) {
                        return Some(value.clone());
                    }
                }
                Binding::Recursive {
                    name: n,
                    materialize,
                } if n == name => {
                    let here = Env {
                        head: Some(Shared::clone(frame)),
                    };
                    return Some(materialize(&here));
                }
                _ => {}
            }
            cursor = frame.parent.head.as_ref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        let mut cursor = self.head.as_ref();
        while let Some(frame) = cursor {
            let found = match &frame.binding {
                Binding::Value { name: n, .. } | Binding::Recursive { name: n, .. } => n == name,
                Binding::Map(map) => map.contains_key(name),
            };
            if found {
                return true;
            }
            cursor = frame.parent.head.as_ref();
        }
        false
    }
}

impl<V> Env<V> {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Number of frames between this handle and the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.head.as_ref();
        while let Some(frame) = cursor {
            depth += 1;
            cursor = frame.parent.head.as_ref();
        }
        depth
    }

    /// Returns `true` if both handles point at the same frame.
    pub fn ptr_eq(&self, other: &Env<V>) -> bool {
        match (&self.head, &other.head) {
            (Some(a), Some(b)) => Shared::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

// Long chains would otherwise be dropped recursively, one stack frame per binding.
impl<V> Drop for Env<V> {
    fn drop(&mut self) {
        let mut head = self.head.take();
        while let Some(frame) = head {
            match Shared::try_unwrap(frame) {
                Ok(mut frame) => head = frame.parent.head.take(),
                Err(_) => break,
            }
        }
    }
}

impl<V: Debug> Debug for Env<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        let mut cursor = self.head.as_ref();
        while let Some(frame) = cursor {
            match &frame.binding {
                Binding::Value { name, value } => {
                    list.entry(&format_args!("{}={:?}", name, value));
                }
                Binding::Map(map) => {
                    list.entry(map);
                }
                Binding::Recursive { name, .. } => {
                    list.entry(&format_args!("{}=<recursive>", name));
                }
            }
            cursor = frame.parent.head.as_ref();
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_env_bind_and_get() {
        let env = Env::new().bind("x", 42);
        assert_eq!(env.get("x"), Some(42));
        assert_eq!(env.get("y"), None);
    }

    #[test]
    fn test_env_resolve_from_parent() {
        let parent = Env::new().bind("parent_var", 100);
        let child = parent.bind("child_var", 200);

        assert_eq!(child.get("child_var"), Some(200));
        assert_eq!(child.get("parent_var"), Some(100));
        assert_eq!(parent.get("child_var"), None);
    }

    #[test]
    fn test_env_shadow_parent_variable() {
        let parent = Env::new().bind("x", 100);
        let child = parent.bind("x", 200);

        assert_eq!(child.get("x"), Some(200));
        assert_eq!(parent.get("x"), Some(100));
    }

    #[test]
    fn test_env_from_map() {
        let env = Env::from_map([("a", 1), ("b", 2)]).bind("a", 3);
        assert_eq!(env.get("a"), Some(3));
        assert_eq!(env.get("b"), Some(2));
        assert!(env.contains("b"));
        assert!(!env.contains("c"));
        assert_eq!(env.depth(), 2);
    }

    #[test]
    fn test_env_recursive_binding_sees_its_own_frame() {
        let calls = Shared::new(AtomicUsize::new(0));
        let counter = Shared::clone(&calls);
        let env = Env::new().bind("n", 1).bind_recursive("f", move |here: &Env<i32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            here.get("n").unwrap_or_default() * 10
        });

        assert_eq!(env.get("f"), Some(10));
        assert_eq!(env.get("f"), Some(10));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(env.contains("f"));
    }

    #[test]
    fn test_env_drop_long_chain() {
        let mut env = Env::new();
        for i in 0..200_000 {
            env = env.bind("x", i);
        }
        assert_eq!(env.get("x"), Some(199_999));
        drop(env);
    }

    #[test]
    fn test_env_shared_between_threads() {
        let env = Env::new().bind("x", 7);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let env = env.bind("y", i);
                std::thread::spawn(move || env.get("x").unwrap_or_default() + env.get("y").unwrap_or_default())
            })
            .collect();
        let results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![7, 8, 9, 10]);
    }
}
