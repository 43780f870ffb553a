use std::sync::{Arc, RwLock};

use serde_json::Value;

use stratum_core::{
    Behavior, Composite, CompositeInstance, ContributorDescriptor, PointId, RootHandle,
};

use crate::error::Result;
use crate::scope::{ScopeState, class_for, register_in};

/// Single-chain extension point: one root, one flat ordered contributor
/// list, one cached composite. Cloned handles address the same tree.
#[derive(Clone, Debug)]
pub struct ExtensionPoint {
    state: Arc<RwLock<ScopeState>>,
    handle: RootHandle,
}

impl ExtensionPoint {
    pub(crate) fn new(state: Arc<RwLock<ScopeState>>, handle: RootHandle) -> Self {
        Self { state, handle }
    }

    pub fn id(&self) -> &PointId {
        self.handle.id()
    }

    /// Register a contributor built from `behavior`. Every call is a new
    /// layer; use [`ExtensionPoint::register_descriptor`] to re-register an
    /// existing descriptor idempotently.
    pub fn register(&self, behavior: Behavior) -> Result<Arc<ContributorDescriptor>> {
        let desc = ContributorDescriptor::new(self.handle.id().clone(), behavior);
        self.register_descriptor(Arc::clone(&desc))?;
        Ok(desc)
    }

    /// Register a pre-built descriptor. Idempotent by descriptor identity:
    /// a duplicate neither adds a layer nor invalidates the cache.
    pub fn register_descriptor(&self, desc: Arc<ContributorDescriptor>) -> Result<()> {
        register_in(&self.state, &self.handle, desc)
    }

    /// The composite for the current contributor set, cached until the next
    /// registration. The returned value is a snapshot: it never changes,
    /// even after the cache is invalidated.
    pub fn get_class(&self) -> Result<Arc<Composite>> {
        class_for(&self.state, self.handle.id(), None)
    }

    /// Construct an instance via the current composite.
    pub fn instantiate(&self, args: &[Value]) -> Result<CompositeInstance> {
        Ok(self.get_class()?.instantiate(args)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ExtensionScope;
    use serde_json::json;
    use stratum_core::PointConfig;

    fn point_with_base() -> ExtensionPoint {
        let scope = ExtensionScope::new();
        scope
            .declare_root(
                PointConfig::new("service"),
                Behavior::new("service").method("describe", |_c, _a| Ok(json!("base"))),
            )
            .unwrap()
    }

    #[test]
    fn test_passthrough_composite_before_any_registration() {
        let point = point_with_base();
        let composite = point.get_class().unwrap();
        assert_eq!(composite.layer_names(), vec!["service"]);

        let mut instance = point.instantiate(&[]).unwrap();
        assert_eq!(instance.call("describe", &[]).unwrap(), json!("base"));
    }

    #[test]
    fn test_registration_invalidates_the_cached_class() {
        let point = point_with_base();
        let before = point.get_class().unwrap();

        point
            .register(Behavior::new("ext").method("describe", |_c, _a| Ok(json!("ext"))))
            .unwrap();

        let after = point.get_class().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.layer_names(), vec!["ext", "service"]);
        // The old composite is an unchanged snapshot.
        assert_eq!(before.layer_names(), vec!["service"]);
    }

    #[test]
    fn test_register_descriptor_is_idempotent() {
        let point = point_with_base();
        let desc = ContributorDescriptor::new(point.id().clone(), Behavior::new("ext"));
        point.register_descriptor(Arc::clone(&desc)).unwrap();
        point.register_descriptor(desc).unwrap();

        assert_eq!(point.get_class().unwrap().layer_names().len(), 2);
    }
}
