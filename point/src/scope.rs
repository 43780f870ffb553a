use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::debug;

use stratum_core::{
    Behavior, Composite, CompositeBuilder, CompositeInstance, ContributorDescriptor, CoreError,
    ExtensionRegistry, FamilyKey, PointConfig, PointId, RegisterOutcome, RegistrySnapshot,
    RootHandle,
};

use crate::error::{PointError, Result};
use crate::keyed::KeyedExtensionPoint;
use crate::point::ExtensionPoint;

#[derive(Debug)]
pub(crate) struct ScopeState {
    pub(crate) registry: ExtensionRegistry,
    pub(crate) builder: CompositeBuilder,
    /// Root behavior name -> tree handle.
    roots: HashMap<String, RootHandle>,
    /// Contributor behavior name -> declared parent name.
    lineage: HashMap<String, String>,
}

impl ScopeState {
    /// Walk the declared lineage from `parent` up to the nearest enclosing
    /// root. Extending an extension lands in the same tree as its parent.
    fn resolve_root(&self, parent: &str) -> Result<RootHandle> {
        let mut current = parent;
        let mut hops = 0usize;
        loop {
            if let Some(handle) = self.roots.get(current) {
                return Ok(handle.clone());
            }
            match self.lineage.get(current) {
                Some(next) if hops <= self.lineage.len() => {
                    current = next;
                    hops += 1;
                }
                _ => return Err(CoreError::UnknownRoot(parent.to_string()).into()),
            }
        }
    }
}

pub(crate) fn read_state(state: &RwLock<ScopeState>) -> RwLockReadGuard<'_, ScopeState> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_state(state: &RwLock<ScopeState>) -> RwLockWriteGuard<'_, ScopeState> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

/// Composite lookup shared by the point handles: read-fast cache hit, with
/// a write-side rebuild (double-checked inside `get_or_build`) on a miss.
pub(crate) fn class_for(
    state: &Arc<RwLock<ScopeState>>,
    id: &PointId,
    key: Option<&FamilyKey>,
) -> Result<Arc<Composite>> {
    if let Some(composite) = read_state(state).builder.cached(id, key) {
        return Ok(composite);
    }
    let mut guard = write_state(state);
    let ScopeState {
        registry, builder, ..
    } = &mut *guard;
    Ok(builder.get_or_build(registry, id, key)?)
}

/// Registration shared by the point handles: serialize under the write
/// lock, then drop exactly the cache entries the new contributor touches.
pub(crate) fn register_in(
    state: &Arc<RwLock<ScopeState>>,
    handle: &RootHandle,
    desc: Arc<ContributorDescriptor>,
) -> Result<()> {
    let mut guard = write_state(state);
    let outcome = guard.registry.register(handle, desc)?;
    if let RegisterOutcome::Inserted { key } = outcome {
        guard.builder.invalidate(handle.id(), key.as_ref());
    }
    Ok(())
}

/// Context-owned scope holding one registry, its composite cache, and the
/// declaration lineage. Each scope is fully independent; tests build fresh
/// ones. Cloned handles share the same underlying state.
#[derive(Clone)]
pub struct ExtensionScope {
    state: Arc<RwLock<ScopeState>>,
}

impl ExtensionScope {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ScopeState {
                registry: ExtensionRegistry::new(),
                builder: CompositeBuilder::new(),
                roots: HashMap::new(),
                lineage: HashMap::new(),
            })),
        }
    }

    /// Declare an unkeyed root: one base behavior, one flat composition
    /// chain.
    pub fn declare_root(&self, config: PointConfig, base: Behavior) -> Result<ExtensionPoint> {
        if config.is_keyed() {
            return Err(PointError::InvalidConfig(format!(
                "extension point '{}' is keyed; declare it with declare_keyed_root",
                config.name()
            )));
        }
        let handle = self.declare(config, base)?;
        Ok(ExtensionPoint::new(Arc::clone(&self.state), handle))
    }

    /// Declare a keyed root: per-key composition chains sharing the tree's
    /// base-level contributors.
    pub fn declare_keyed_root(
        &self,
        config: PointConfig,
        base: Behavior,
    ) -> Result<KeyedExtensionPoint> {
        let handle = self.declare(config.keyed(), base)?;
        Ok(KeyedExtensionPoint::new(Arc::clone(&self.state), handle))
    }

    fn declare(&self, config: PointConfig, base: Behavior) -> Result<RootHandle> {
        let root_name = base.name().to_string();
        let mut state = write_state(&self.state);
        if state.roots.contains_key(&root_name) {
            return Err(CoreError::DuplicateRoot(root_name).into());
        }
        if state.lineage.contains_key(&root_name) {
            return Err(PointError::InvalidConfig(format!(
                "name '{root_name}' is already a contributor in this scope"
            )));
        }
        let handle = state.registry.declare_root(config, base)?;
        state.roots.insert(root_name, handle.clone());
        Ok(handle)
    }

    /// Register `behavior` with the tree owned by the nearest root at or
    /// above `parent` in the declaration lineage.
    pub fn extend(&self, parent: &str, behavior: Behavior) -> Result<Arc<ContributorDescriptor>> {
        self.extend_inner(parent, None, behavior)
    }

    /// Like [`ExtensionScope::extend`], pinning the contributor to a family
    /// key of a keyed tree. The key binds only this descriptor: it is never
    /// inherited by later contributors extending this one.
    pub fn extend_keyed(
        &self,
        parent: &str,
        key: impl Into<FamilyKey>,
        behavior: Behavior,
    ) -> Result<Arc<ContributorDescriptor>> {
        self.extend_inner(parent, Some(key.into()), behavior)
    }

    fn extend_inner(
        &self,
        parent: &str,
        key: Option<FamilyKey>,
        behavior: Behavior,
    ) -> Result<Arc<ContributorDescriptor>> {
        let name = behavior.name().to_string();
        let mut state = write_state(&self.state);
        if state.roots.contains_key(&name) || state.lineage.contains_key(&name) {
            return Err(PointError::InvalidConfig(format!(
                "name '{name}' is already declared in this scope"
            )));
        }
        let handle = state.resolve_root(parent)?;
        let desc = match key {
            Some(k) => ContributorDescriptor::with_key(handle.id().clone(), k, behavior),
            None => ContributorDescriptor::new(handle.id().clone(), behavior),
        };
        let outcome = state.registry.register(&handle, Arc::clone(&desc))?;
        if let RegisterOutcome::Inserted { key } = outcome {
            state.builder.invalidate(handle.id(), key.as_ref());
        }
        state.lineage.insert(name, parent.to_string());
        debug!(parent, contributor = desc.name(), point = %handle.id(), "extended");
        Ok(desc)
    }

    /// Construct an instance of `root`'s composite. Root construction
    /// redirects here to the cached composite; constructing through an
    /// already-obtained composite goes straight to it, with no further
    /// redirection. Keyed trees have no unambiguous composite without a
    /// key and are rejected.
    pub fn construct(&self, root: &str, args: &[Value]) -> Result<CompositeInstance> {
        let handle = self.root_handle(root)?;
        let keyed = read_state(&self.state)
            .registry
            .config(handle.id())?
            .is_keyed();
        if keyed {
            return Err(PointError::KeyRequired {
                point: handle.id().to_string(),
            });
        }
        let composite = class_for(&self.state, handle.id(), None)?;
        Ok(composite.instantiate(args)?)
    }

    /// Re-obtain the handle for an unkeyed root declared in this scope.
    pub fn point(&self, root: &str) -> Result<ExtensionPoint> {
        let handle = self.root_handle(root)?;
        let keyed = read_state(&self.state)
            .registry
            .config(handle.id())?
            .is_keyed();
        if keyed {
            return Err(PointError::InvalidConfig(format!(
                "extension point '{root}' is keyed; use keyed_point"
            )));
        }
        Ok(ExtensionPoint::new(Arc::clone(&self.state), handle))
    }

    /// Re-obtain the handle for a keyed root declared in this scope.
    pub fn keyed_point(&self, root: &str) -> Result<KeyedExtensionPoint> {
        let handle = self.root_handle(root)?;
        let keyed = read_state(&self.state)
            .registry
            .config(handle.id())?
            .is_keyed();
        if !keyed {
            return Err(PointError::NotKeyed {
                point: handle.id().to_string(),
            });
        }
        Ok(KeyedExtensionPoint::new(Arc::clone(&self.state), handle))
    }

    /// Scope-wide diagnostics.
    pub fn snapshot(&self) -> RegistrySnapshot {
        read_state(&self.state).registry.snapshot()
    }

    fn root_handle(&self, root: &str) -> Result<RootHandle> {
        read_state(&self.state)
            .roots
            .get(root)
            .cloned()
            .ok_or_else(|| CoreError::UnknownRoot(root.to_string()).into())
    }
}

impl Default for ExtensionScope {
    fn default() -> Self {
        Self::new()
    }
}
