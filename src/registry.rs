//! Shared table of the distributed interfaces attached to one local network.
//!
//! Interfaces on the same network need to see each other's role and
//! supplied capacitance to avoid reporting the same remote capacitance
//! twice. Instead of holding references to each other, every interface
//! registers a record here and refers to its siblings by [`IfId`]. The table
//! outlives any individual interface, so a handle can never dangle across a
//! restart.
//!
//! # Examples
//!
//! ```
//! use tandem::registry::InterfaceRegistry;
//!
//! let registry = InterfaceRegistry::new();
//! let a = registry.register("cabin_if", 0);
//! let b = registry.register("airlock_if", 3);
//!
//! // Each interface publishes its own state...
//! registry.update(a, |record| record.demand_mode = true);
//!
//! // ...and siblings read it through the shared table
//! assert!(registry.get(a).demand_mode);
//! assert_eq!(registry.get(b).node_index, 3);
//! ```

use std::cell::RefCell;
use std::rc::Rc;

/// Handle of an interface in an [`InterfaceRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IfId(pub usize);

impl IfId {
    /// Gets the index value.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// State an interface publishes to its siblings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceRecord {
    /// Interface name, for diagnostics.
    pub name: String,
    /// Index of the interface's node in the host network.
    pub node_index: usize,
    /// True while the interface is in Demand role.
    pub demand_mode: bool,
    /// Capacitance the interface adds to the local network (kmol/kPa).
    pub supplied_capacitance: f64,
}

/// Central table of interface records.
///
/// Cloning the registry yields another handle onto the same table.
#[derive(Debug, Clone, Default)]
pub struct InterfaceRegistry {
    records: Rc<RefCell<Vec<InterfaceRecord>>>,
}

impl InterfaceRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new interface and returns its handle.
    pub fn register(&self, name: impl Into<String>, node_index: usize) -> IfId {
        let mut records = self.records.borrow_mut();
        let id = IfId(records.len());
        records.push(InterfaceRecord { name: name.into(), node_index, ..Default::default() });
        id
    }

    /// Gets a copy of an interface's record.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this registry.
    pub fn get(&self, id: IfId) -> InterfaceRecord {
        self.records.borrow()[id.0].clone()
    }

    /// Gets a copy of an interface's record, or `None` for a foreign handle.
    pub fn try_get(&self, id: IfId) -> Option<InterfaceRecord> {
        self.records.borrow().get(id.0).cloned()
    }

    /// Modifies an interface's record in place. Foreign handles are ignored.
    pub fn update(&self, id: IfId, f: impl FnOnce(&mut InterfaceRecord)) {
        if let Some(record) = self.records.borrow_mut().get_mut(id.0) {
            f(record);
        }
    }

    /// Returns the total number of registered interfaces.
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// Finds an interface by name.
    pub fn find(&self, name: &str) -> Option<IfId> {
        self.records.borrow().iter().position(|r| r.name == name).map(IfId)
    }
}
