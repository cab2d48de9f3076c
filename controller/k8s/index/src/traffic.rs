use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use mesh_sync_k8s_api::smi::TrafficTarget;
use std::{collections::hash_map::Entry, sync::Arc};

/// namespace -> namespace -> target id -> target
type Edges = HashMap<String, HashMap<String, HashMap<String, Arc<TrafficTarget>>>>;

/// The namespace graph derived from `TrafficTarget`s.
///
/// Every edge is recorded twice: `received_by[dst][src]` and `sent_by[src][dst]`, keyed by the
/// target's `namespace/name` id. The two sides always hold the same set of edges.
#[derive(Debug, Default)]
pub struct TrafficTargets {
    received_by: Edges,
    sent_by: Edges,

    /// The targets that produced the current edges, by id.
    targets: HashMap<String, Granted>,
}

/// A stored target and the `(dst, src)` edges recorded under its id.
#[derive(Debug)]
struct Granted {
    target: Arc<TrafficTarget>,
    edges: HashSet<(String, String)>,
}

impl TrafficTargets {
    /// Records that `src` may send traffic to `dst` as granted by `target`.
    ///
    /// The edge is tracked under the target's id, so deleting or re-applying the target removes
    /// it.
    pub fn add_edge(&mut self, dst: &str, src: &str, target: &Arc<TrafficTarget>) {
        let id = target.id();
        insert(&mut self.received_by, dst, src, id.clone(), target.clone());
        insert(&mut self.sent_by, src, dst, id.clone(), target.clone());
        self.store(id, target)
            .edges
            .insert((dst.to_string(), src.to_string()));
    }

    fn store(&mut self, id: String, target: &Arc<TrafficTarget>) -> &mut Granted {
        let granted = self.targets.entry(id).or_insert_with(|| Granted {
            target: target.clone(),
            edges: HashSet::default(),
        });
        granted.target = target.clone();
        granted
    }

    /// Adds or replaces a target, returning every namespace named by its old or new edges.
    ///
    /// Edges produced by a previous version of the target are removed first so that grants dropped
    /// from the target do not linger.
    pub fn apply(&mut self, target: TrafficTarget) -> HashSet<String> {
        let target = Arc::new(target);
        let id = target.id();
        let mut touched = self.delete(&id);

        let dst = target.destination_namespace();
        touched.insert(dst.clone());
        for src in target.source_namespaces() {
            self.add_edge(&dst, &src, &target);
            touched.insert(src);
        }
        self.store(id, &target);
        touched
    }

    /// Removes every edge produced by the target, returning the namespaces those edges named.
    pub fn delete(&mut self, id: &str) -> HashSet<String> {
        let mut touched = HashSet::default();
        let Some(granted) = self.targets.remove(id) else {
            return touched;
        };

        touched.insert(granted.target.destination_namespace());
        for (dst, src) in granted.edges {
            remove(&mut self.received_by, &dst, &src, id);
            remove(&mut self.sent_by, &src, &dst, id);
            touched.insert(dst);
            touched.insert(src);
        }
        touched
    }

    /// Removes every edge naming the namespace, on either side, and every target defined in it.
    pub fn remove_namespace(&mut self, ns: &str) {
        if let Some(srcs) = self.received_by.remove(ns) {
            for src in srcs.keys() {
                remove_pair(&mut self.sent_by, src, ns);
            }
        }
        if let Some(dsts) = self.sent_by.remove(ns) {
            for dst in dsts.keys() {
                remove_pair(&mut self.received_by, dst, ns);
            }
        }

        for granted in self.targets.values_mut() {
            granted.edges.retain(|(dst, src)| dst != ns && src != ns);
        }

        let prefix = format!("{ns}/");
        let owned = self
            .targets
            .keys()
            .filter(|id| id.starts_with(&prefix))
            .cloned()
            .collect::<Vec<_>>();
        for id in owned {
            self.delete(&id);
        }
    }

    /// Returns the namespaces that may send traffic to, or receive traffic from, `ns`.
    pub fn related(&self, ns: &str) -> HashSet<String> {
        let senders = self.received_by.get(ns).into_iter().flat_map(|m| m.keys());
        let receivers = self.sent_by.get(ns).into_iter().flat_map(|m| m.keys());
        senders.chain(receivers).cloned().collect()
    }

    /// The targets granting `src` access to `dst`.
    pub fn granting(&self, dst: &str, src: &str) -> impl Iterator<Item = &TrafficTarget> {
        self.received_by
            .get(dst)
            .and_then(|srcs| srcs.get(src))
            .into_iter()
            .flat_map(|ids| ids.values().map(|t| &**t))
    }

    pub fn get(&self, id: &str) -> Option<&TrafficTarget> {
        self.targets.get(id).map(|g| &*g.target)
    }

    /// The number of edges into `ns`.
    pub fn received_len(&self, ns: &str) -> usize {
        self.received_by
            .get(ns)
            .map(|srcs| srcs.values().map(|ids| ids.len()).sum())
            .unwrap_or(0)
    }

    pub fn targets_len(&self) -> usize {
        self.targets.len()
    }

    /// Iterates over the destination namespaces that have at least one edge.
    pub(crate) fn destinations(&self) -> impl Iterator<Item = &str> {
        self.received_by.keys().map(String::as_str)
    }

    /// Returns true if both sides of the graph hold exactly the same edges.
    #[cfg(test)]
    pub(crate) fn is_symmetric(&self) -> bool {
        fn flatten(edges: &Edges, flip: bool) -> std::collections::BTreeSet<(String, String, String)> {
            let mut set = std::collections::BTreeSet::new();
            for (a, bs) in edges {
                for (b, ids) in bs {
                    for id in ids.keys() {
                        if flip {
                            set.insert((b.clone(), a.clone(), id.clone()));
                        } else {
                            set.insert((a.clone(), b.clone(), id.clone()));
                        }
                    }
                }
            }
            set
        }
        flatten(&self.received_by, false) == flatten(&self.sent_by, true)
    }
}

fn insert(edges: &mut Edges, a: &str, b: &str, id: String, target: Arc<TrafficTarget>) {
    edges
        .entry(a.to_string())
        .or_default()
        .entry(b.to_string())
        .or_default()
        .insert(id, target);
}

fn remove(edges: &mut Edges, a: &str, b: &str, id: &str) {
    let Entry::Occupied(mut by_a) = edges.entry(a.to_string()) else {
        return;
    };
    if let Entry::Occupied(mut by_b) = by_a.get_mut().entry(b.to_string()) {
        by_b.get_mut().remove(id);
        if by_b.get().is_empty() {
            by_b.remove();
        }
    }
    if by_a.get().is_empty() {
        by_a.remove();
    }
}

fn remove_pair(edges: &mut Edges, a: &str, b: &str) {
    if let Entry::Occupied(mut by_a) = edges.entry(a.to_string()) {
        by_a.get_mut().remove(b);
        if by_a.get().is_empty() {
            by_a.remove();
        }
    }
}
