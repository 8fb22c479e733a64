//! Unified resource table
//!
//! Every handle the plugin sees is a positive 32-bit resource id (rid)
//! naming an entry in this table. Ids are allocated from a monotonically
//! increasing counter and never reused within an instance's lifetime;
//! zero and negative values are reserved for error codes across the ABI.

use crate::abi::{RunnerError, RuntimeLimits};
use crate::canvas::{CanvasContext, CanvasFont, CanvasImage};
use crate::js::JsContext;
use crate::net::RequestState;
use crate::value::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Resource id as seen across the plugin ABI
pub type Rid = i32;

/// Category tag for a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Value,
    Request,
    Canvas,
    Image,
    Font,
    JsContext,
}

/// Payload of a table entry
#[derive(Debug)]
pub enum Resource {
    Value(Value),
    Request(RequestState),
    Canvas(CanvasContext),
    Image(CanvasImage),
    Font(CanvasFont),
    JsContext(JsContext),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Value(_) => ResourceKind::Value,
            Resource::Request(_) => ResourceKind::Request,
            Resource::Canvas(_) => ResourceKind::Canvas,
            Resource::Image(_) => ResourceKind::Image,
            Resource::Font(_) => ResourceKind::Font,
            Resource::JsContext(_) => ResourceKind::JsContext,
        }
    }
}

#[derive(Debug)]
struct Entry {
    resource: Resource,
    kind: ResourceKind,
    refs: i32,
    created: Instant,
}

/// Per-instance id-to-resource map with reference counting
#[derive(Debug)]
pub struct ResourceTable {
    entries: HashMap<Rid, Entry>,
    next_id: Rid,
    last_sweep: Instant,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
            last_sweep: Instant::now(),
        }
    }

    /// Insert a resource and return its freshly allocated rid.
    ///
    /// Node references embedded in the payload (directly or inside arrays
    /// and objects) pin their owning document.
    pub fn allocate(&mut self, resource: Resource) -> Rid {
        if let Resource::Value(value) = &resource {
            self.retain_embedded(value);
        }
        self.next_id += 1;
        let id = self.next_id;
        let kind = resource.kind();
        self.entries.insert(
            id,
            Entry {
                resource,
                kind,
                refs: 1,
                created: Instant::now(),
            },
        );
        id
    }

    /// Shorthand for allocating a stored value.
    pub fn allocate_value(&mut self, value: Value) -> Rid {
        self.allocate(Resource::Value(value))
    }

    /// Retain the documents referenced by every node embedded in a value.
    pub fn retain_embedded(&mut self, value: &Value) {
        let mut docs = Vec::new();
        collect_node_docs(value, &mut docs);
        for doc in docs {
            self.retain(doc);
        }
    }

    /// Release the documents referenced by every node embedded in a value.
    pub fn release_embedded(&mut self, value: &Value) {
        let mut docs = Vec::new();
        collect_node_docs(value, &mut docs);
        for doc in docs {
            self.release(doc);
        }
    }

    pub fn get(&self, rid: Rid) -> Option<&Resource> {
        self.entries.get(&rid).map(|e| &e.resource)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Resource> {
        self.entries.get_mut(&rid).map(|e| &mut e.resource)
    }

    pub fn kind(&self, rid: Rid) -> Option<ResourceKind> {
        self.entries.get(&rid).map(|e| e.kind)
    }

    /// Convenience accessor for stored values.
    pub fn value(&self, rid: Rid) -> Option<&Value> {
        match self.get(rid) {
            Some(Resource::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn value_mut(&mut self, rid: Rid) -> Option<&mut Value> {
        match self.get_mut(rid) {
            Some(Resource::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Replace the payload in place, keeping refcount and age.
    pub fn update(&mut self, rid: Rid, resource: Resource) -> bool {
        if !self.entries.contains_key(&rid) {
            return false;
        }
        if let Resource::Value(value) = &resource {
            self.retain_embedded(value);
        }
        let Some(entry) = self.entries.get_mut(&rid) else {
            return false;
        };
        entry.kind = resource.kind();
        let old = std::mem::replace(&mut entry.resource, resource);
        if let Resource::Value(value) = &old {
            let mut docs = Vec::new();
            collect_node_docs(value, &mut docs);
            for doc in docs {
                self.release(doc);
            }
        }
        true
    }

    pub fn retain(&mut self, rid: Rid) {
        if let Some(entry) = self.entries.get_mut(&rid) {
            entry.refs += 1;
        }
    }

    /// Decrement the refcount, removing the entry when it reaches zero.
    pub fn release(&mut self, rid: Rid) {
        let remove = match self.entries.get_mut(&rid) {
            Some(entry) => {
                entry.refs -= 1;
                entry.refs <= 0
            }
            None => false,
        };
        if remove {
            self.remove_entry(rid);
        }
    }

    /// Unconditional removal, ignoring the refcount.
    pub fn force_remove(&mut self, rid: Rid) {
        self.remove_entry(rid);
    }

    /// Import-facing unified destroy. Reports whether the rid existed.
    pub fn destroy(&mut self, rid: Rid) -> bool {
        let existed = self.entries.contains_key(&rid);
        self.remove_entry(rid);
        existed
    }

    fn remove_entry(&mut self, rid: Rid) {
        let Some(entry) = self.entries.remove(&rid) else {
            return;
        };
        // Node descriptors pin their owning document; dropping the node
        // releases that pin.
        if let Resource::Value(value) = &entry.resource {
            let mut docs = Vec::new();
            collect_node_docs(value, &mut docs);
            for doc in docs {
                self.release(doc);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn request_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.kind == ResourceKind::Request)
            .count()
    }

    /// Drop everything. Used on plugin disposal.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Run the sweep if the configured interval has elapsed.
    pub fn maybe_sweep(&mut self, limits: &RuntimeLimits) {
        if self.last_sweep.elapsed() >= limits.sweep_interval {
            self.sweep(limits);
        }
    }

    /// Age- and population-based cleanup of leaked descriptors.
    ///
    /// An entry with only its creation reference left (no outstanding
    /// retains) counts as unreferenced for sweeping purposes.
    pub fn sweep(&mut self, limits: &RuntimeLimits) {
        self.last_sweep = Instant::now();

        let stale: Vec<Rid> = self
            .entries
            .iter()
            .filter(|(_, e)| match e.kind {
                ResourceKind::Request => e.created.elapsed() >= limits.request_max_age,
                _ => e.refs <= 1 && e.created.elapsed() >= limits.descriptor_max_age,
            })
            .map(|(id, _)| *id)
            .collect();
        let swept = stale.len();
        for rid in stale {
            self.remove_entry(rid);
        }

        self.enforce_cap(limits.descriptor_cap, None);
        self.enforce_cap(limits.request_cap, Some(ResourceKind::Request));

        if swept > 0 {
            tracing::debug!(swept, remaining = self.entries.len(), "descriptor sweep");
        }
    }

    fn enforce_cap(&mut self, cap: usize, kind: Option<ResourceKind>) {
        let population = match kind {
            Some(k) => self.entries.values().filter(|e| e.kind == k).count(),
            None => self.entries.len(),
        };
        if population <= cap {
            return;
        }
        let mut candidates: Vec<(Rid, Instant)> = self
            .entries
            .iter()
            .filter(|(_, e)| kind.map_or(true, |k| e.kind == k) && e.refs <= 1)
            .map(|(id, e)| (*id, e.created))
            .collect();
        candidates.sort_by_key(|(_, created)| *created);
        let excess = population - cap;
        for (rid, _) in candidates.into_iter().take(excess) {
            self.remove_entry(rid);
        }
    }
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_node_docs(value: &Value, out: &mut Vec<Rid>) {
    match value {
        Value::Node(node) => out.push(node.doc),
        Value::Array(items) => {
            for item in items {
                collect_node_docs(item, out);
            }
        }
        Value::Object(map) => {
            for member in map.values() {
                collect_node_docs(member, out);
            }
        }
        _ => {}
    }
}

/// Rid lifetime guard for one host-driven call
///
/// The dispatcher tracks every descriptor it allocates for call arguments
/// in a scope and drains them on every exit path. Descriptors the plugin
/// allocates through imports are its own responsibility (or the sweeper's).
#[derive(Debug, Default)]
pub struct Scope {
    tracked: Vec<Rid>,
    disposed: bool,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a rid for cleanup, returning it for convenience.
    pub fn track(&mut self, rid: Rid) -> Result<Rid, RunnerError> {
        if self.disposed {
            return Err(RunnerError::ScopeDisposed);
        }
        self.tracked.push(rid);
        Ok(rid)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Force-remove every tracked rid. Idempotent.
    pub fn cleanup(&mut self, table: &mut ResourceTable) {
        if self.disposed {
            return;
        }
        for rid in self.tracked.drain(..) {
            table.force_remove(rid);
        }
        self.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn zero_age_limits() -> RuntimeLimits {
        RuntimeLimits {
            descriptor_max_age: Duration::ZERO,
            request_max_age: Duration::ZERO,
            sweep_interval: Duration::ZERO,
            ..RuntimeLimits::default()
        }
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let mut table = ResourceTable::new();
        let a = table.allocate_value(Value::Int(1));
        let b = table.allocate_value(Value::Int(2));
        assert!(b > a);
        table.destroy(a);
        let c = table.allocate_value(Value::Int(3));
        assert!(c > b);
    }

    #[test]
    fn test_retain_release_balance() {
        let mut table = ResourceTable::new();
        let rid = table.allocate_value(Value::Bool(true));
        for _ in 0..3 {
            table.retain(rid);
        }
        for _ in 0..3 {
            table.release(rid);
        }
        assert!(table.get(rid).is_some());
        table.release(rid);
        assert!(table.get(rid).is_none());
    }

    #[test]
    fn test_destroy_reports_existence() {
        let mut table = ResourceTable::new();
        let rid = table.allocate_value(Value::Null);
        assert!(table.destroy(rid));
        assert!(!table.destroy(rid));
        assert!(table.get(rid).is_none());
    }

    #[test]
    fn test_force_remove_ignores_refcount() {
        let mut table = ResourceTable::new();
        let rid = table.allocate_value(Value::Int(9));
        table.retain(rid);
        table.force_remove(rid);
        assert!(table.get(rid).is_none());
    }

    #[test]
    fn test_scope_cleanup_is_exact_and_idempotent() {
        let mut table = ResourceTable::new();
        let keep = table.allocate_value(Value::Int(0));
        let mut scope = Scope::new();
        let a = scope.track(table.allocate_value(Value::Int(1))).unwrap();
        let b = scope.track(table.allocate_value(Value::Int(2))).unwrap();
        assert_eq!(scope.len(), 2);

        scope.cleanup(&mut table);
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_none());
        assert!(table.get(keep).is_some());

        // Second cleanup is a no-op; tracking afterwards is an error.
        scope.cleanup(&mut table);
        assert!(matches!(
            scope.track(1),
            Err(RunnerError::ScopeDisposed)
        ));
    }

    #[test]
    fn test_sweep_removes_unreferenced_entries() {
        let mut table = ResourceTable::new();
        let leaked = table.allocate_value(Value::Int(1));
        let held = table.allocate_value(Value::Int(2));
        table.retain(held);
        table.sweep(&zero_age_limits());
        assert!(table.get(leaked).is_none());
        assert!(table.get(held).is_some());
    }

    #[test]
    fn test_sweep_cap_removes_oldest_first() {
        let mut table = ResourceTable::new();
        let mut limits = zero_age_limits();
        limits.descriptor_max_age = Duration::from_secs(3600);
        limits.descriptor_cap = 2;
        let first = table.allocate_value(Value::Int(1));
        let second = table.allocate_value(Value::Int(2));
        let third = table.allocate_value(Value::Int(3));
        let _ = (second, third);
        table.sweep(&limits);
        assert_eq!(table.len(), 2);
        assert!(table.get(first).is_none());
        assert!(table.get(second).is_some());
        assert!(table.get(third).is_some());
    }
}
