use ahash::AHashMap as HashMap;
use std::collections::hash_map::Entry;

/// Resources grouped by namespace and then by name.
///
/// Per-namespace maps are created on first insert and dropped when they become empty, so a missing
/// namespace simply means there are no resources in it.
#[derive(Debug)]
pub struct ByNamespace<T> {
    by_ns: HashMap<String, HashMap<String, T>>,
}

impl<T> Default for ByNamespace<T> {
    fn default() -> Self {
        Self {
            by_ns: HashMap::default(),
        }
    }
}

impl<T> ByNamespace<T> {
    /// Returns the namespace's map, creating it if necessary.
    pub fn get_or_default(&mut self, ns: impl Into<String>) -> &mut HashMap<String, T> {
        self.by_ns.entry(ns.into()).or_default()
    }

    /// Inserts or replaces a resource, returning the previous value.
    pub fn insert(&mut self, ns: impl Into<String>, name: impl Into<String>, value: T) -> Option<T> {
        self.get_or_default(ns).insert(name.into(), value)
    }

    /// Removes a resource. Removing an absent resource is a no-op.
    pub fn remove(&mut self, ns: &str, name: &str) -> Option<T> {
        let Entry::Occupied(mut entry) = self.by_ns.entry(ns.to_string()) else {
            return None;
        };
        let removed = entry.get_mut().remove(name);
        if entry.get().is_empty() {
            entry.remove();
        }
        removed
    }

    /// Removes every resource in the namespace, returning how many were removed.
    pub fn remove_namespace(&mut self, ns: &str) -> usize {
        self.by_ns.remove(ns).map(|m| m.len()).unwrap_or(0)
    }

    pub fn get(&self, ns: &str, name: &str) -> Option<&T> {
        self.by_ns.get(ns)?.get(name)
    }

    /// Iterates over the resources of a namespace.
    pub fn in_namespace<'a>(&'a self, ns: &str) -> impl Iterator<Item = (&'a str, &'a T)> + 'a {
        self.by_ns
            .get(ns)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Iterates over every resource as `(namespace, name, resource)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &T)> {
        self.by_ns.iter().flat_map(|(ns, m)| {
            m.iter()
                .map(move |(name, v)| (ns.as_str(), name.as_str(), v))
        })
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.by_ns.keys().map(String::as_str)
    }

    pub fn contains_namespace(&self, ns: &str) -> bool {
        self.by_ns.contains_key(ns)
    }

    pub fn len_in(&self, ns: &str) -> usize {
        self.by_ns.get(ns).map(|m| m.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.by_ns.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ns.is_empty()
    }

    /// Removes and returns the first resource, in any namespace, for which `f` returns true.
    pub fn remove_where(&mut self, mut f: impl FnMut(&T) -> bool) -> Option<(String, T)> {
        let (ns, name) = self.iter().find_map(|(ns, name, v)| {
            if f(v) {
                Some((ns.to_string(), name.to_string()))
            } else {
                None
            }
        })?;
        let value = self.remove(&ns, &name)?;
        Some((ns, value))
    }
}
