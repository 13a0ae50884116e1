use std::{
    any::Any,
    cell::{RefCell, RefMut},
    fmt,
    rc::Rc,
};

use ahash::AHashMap;

use crate::{
    error::{Raise, RunResult},
    value::{CallArgs, Value},
};

/// The protocol a registered namespace object implements.
///
/// The engine treats namespaces opaquely: attribute reads go through
/// [`attr`](Self::attr), method calls through [`call`](Self::call), and the
/// two optional `generate_*` hooks contribute to the post-run output and
/// metadata maps. `Any` is a supertrait so drivers can downcast a handle back
/// to its concrete type (for example to feed bars into the data namespace).
pub trait Namespace: Any + fmt::Debug {
    /// Short name used in error messages.
    fn label(&self) -> &'static str {
        "namespace"
    }

    /// Reads a data attribute such as `color.red` or `data.close`.
    fn attr(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }

    /// Invokes `namespace.method(args)`.
    fn call(&mut self, method: &str, args: CallArgs) -> RunResult<Value> {
        let _ = args;
        Err(Raise::attribute_error(format!("'{}' object has no attribute '{method}'", self.label())).into())
    }

    /// Post-run output contribution (plotted series, orders, log records…).
    fn generate_output(&self) -> Option<Value> {
        None
    }

    /// Post-run metadata contribution (declared inputs…).
    fn generate_metadata(&self) -> Option<Value> {
        None
    }
}

/// Shared-ownership handle to a namespace object.
#[derive(Clone)]
pub struct NamespaceHandle(pub(crate) Rc<RefCell<dyn Namespace>>);

impl NamespaceHandle {
    pub fn new(namespace: impl Namespace) -> Self {
        Self(Rc::new(RefCell::new(namespace)))
    }

    /// Borrows the namespace as its concrete type, for driver-side mutation.
    ///
    /// # Panics
    /// Panics if the namespace is currently borrowed (i.e. called from inside
    /// a script invocation on the same namespace).
    pub fn downcast_mut<T: Namespace>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.0.borrow_mut(), |ns| {
            let any: &mut dyn Any = ns;
            any.downcast_mut::<T>()
        })
        .ok()
    }

    pub(crate) fn attr(&self, name: &str) -> Option<Value> {
        self.0.borrow().attr(name)
    }

    pub(crate) fn call(&self, method: &str, args: CallArgs) -> RunResult<Value> {
        self.0.borrow_mut().call(method, args)
    }

    pub(crate) fn label(&self) -> &'static str {
        self.0.borrow().label()
    }

    pub(crate) fn generate_output(&self) -> Option<Value> {
        self.0.borrow().generate_output()
    }

    pub(crate) fn generate_metadata(&self) -> Option<Value> {
        self.0.borrow().generate_metadata()
    }
}

impl fmt::Debug for NamespaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(ns) => write!(f, "NamespaceHandle({})", ns.label()),
            Err(_) => f.write_str("NamespaceHandle(<borrowed>)"),
        }
    }
}

/// The registry-owned mapping every namespace instance receives by reference.
///
/// This is the only cross-namespace channel: the data namespace publishes the
/// bar series here, and the strategy namespace reads the current timestamp
/// back out when recording orders.
#[derive(Clone, Default)]
pub struct SharedDict(Rc<RefCell<AHashMap<String, Value>>>);

impl SharedDict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.0.borrow_mut().insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().remove(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }
}

impl fmt::Debug for SharedDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedDict({} entries)", self.0.borrow().len())
    }
}
