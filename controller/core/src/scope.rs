use ahash::AHashSet as HashSet;

/// The set of proxies that must be refreshed: either every proxy, or the proxies of a set of
/// namespaces.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    pub namespaces: HashSet<String>,
    pub global: bool,
}

impl Scope {
    pub fn global() -> Self {
        Self {
            namespaces: HashSet::default(),
            global: true,
        }
    }

    pub fn from_namespaces<S: Into<String>>(namespaces: impl IntoIterator<Item = S>) -> Self {
        Self {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
            global: false,
        }
    }

    /// Returns true if no proxy is affected.
    pub fn is_empty(&self) -> bool {
        !self.global && self.namespaces.is_empty()
    }

    /// Accumulates another scope into this one. Once global, a scope stays global.
    pub fn merge(&mut self, other: Scope) {
        self.global |= other.global;
        self.namespaces.extend(other.namespaces);
    }

    pub fn insert(&mut self, namespace: impl Into<String>) {
        self.namespaces.insert(namespace.into());
    }

    /// Takes the accumulated scope, leaving an empty one in its place.
    pub fn take(&mut self) -> Scope {
        std::mem::take(self)
    }
}
