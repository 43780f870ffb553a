use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use stratum_core::{
    Behavior, Composite, CompositeInstance, ContributorDescriptor, FamilyKey, PointId, RootHandle,
};

use crate::error::{PointError, Result};
use crate::scope::{ScopeState, class_for, read_state, register_in};

/// Keyed extension point: a family of sibling composition chains, one per
/// family key, each additionally inheriting the tree's base-level
/// contributors. Composites are cached per key.
#[derive(Clone, Debug)]
pub struct KeyedExtensionPoint {
    state: Arc<RwLock<ScopeState>>,
    handle: RootHandle,
}

impl KeyedExtensionPoint {
    pub(crate) fn new(state: Arc<RwLock<ScopeState>>, handle: RootHandle) -> Self {
        Self { state, handle }
    }

    pub fn id(&self) -> &PointId {
        self.handle.id()
    }

    /// Register a contributor. It lands under the key named by the tree's
    /// hash attribute (when configured and present as a string field of
    /// `behavior`), otherwise at base level, applying to every key.
    pub fn register(&self, behavior: Behavior) -> Result<Arc<ContributorDescriptor>> {
        let desc = ContributorDescriptor::new(self.handle.id().clone(), behavior);
        self.register_descriptor(Arc::clone(&desc))?;
        Ok(desc)
    }

    /// Register a contributor under an explicit family key.
    pub fn register_keyed(
        &self,
        key: impl Into<FamilyKey>,
        behavior: Behavior,
    ) -> Result<Arc<ContributorDescriptor>> {
        let desc =
            ContributorDescriptor::with_key(self.handle.id().clone(), key.into(), behavior);
        self.register_descriptor(Arc::clone(&desc))?;
        Ok(desc)
    }

    /// Register a pre-built descriptor. Idempotent by descriptor identity.
    pub fn register_descriptor(&self, desc: Arc<ContributorDescriptor>) -> Result<()> {
        register_in(&self.state, &self.handle, desc)
    }

    /// The composite for `key`. `None` yields the base-only composite. An
    /// unknown key fails unless `allow_default`, which falls back to the
    /// shared cached base-only composite — the same artifact every unknown
    /// key receives.
    pub fn get_class(
        &self,
        key: Option<&FamilyKey>,
        allow_default: bool,
    ) -> Result<Arc<Composite>> {
        let Some(k) = key else {
            return class_for(&self.state, self.handle.id(), None);
        };
        let known = read_state(&self.state)
            .registry
            .has_key(self.handle.id(), k)?;
        if known {
            class_for(&self.state, self.handle.id(), Some(k))
        } else if allow_default {
            class_for(&self.state, self.handle.id(), None)
        } else {
            Err(PointError::UnknownKey {
                point: self.handle.id().to_string(),
                key: k.to_string(),
            })
        }
    }

    /// Keys with at least one keyed contributor.
    pub fn get_registered_names(&self) -> Result<BTreeSet<FamilyKey>> {
        Ok(read_state(&self.state)
            .registry
            .registered_keys(self.handle.id())?)
    }

    /// Construct an instance of the composite for `key`.
    pub fn get_object(
        &self,
        key: &FamilyKey,
        allow_default: bool,
        args: &[Value],
    ) -> Result<CompositeInstance> {
        Ok(self.get_class(Some(key), allow_default)?.instantiate(args)?)
    }

    /// Unkeyed instantiation is intentionally not defined for keyed trees:
    /// without a key there is no unambiguous composite to construct.
    pub fn instantiate(&self, _args: &[Value]) -> Result<CompositeInstance> {
        Err(PointError::KeyRequired {
            point: self.handle.id().to_string(),
        })
    }
}
