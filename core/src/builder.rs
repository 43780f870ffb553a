use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::composite::Composite;
use crate::descriptor::{FamilyKey, PointId};
use crate::error::Result;
use crate::linearize::{ResolutionOrder, linearize};
use crate::registry::ExtensionRegistry;

/// Materializes composites from resolution orders and memoizes them per
/// `(tree, family key)`. Invalidation only affects future lookups: a
/// composite already handed out stays a valid, unchanged snapshot.
#[derive(Debug, Default)]
pub struct CompositeBuilder {
    cache: HashMap<(PointId, Option<FamilyKey>), Arc<Composite>>,
}

impl CompositeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a composite from an explicit order. Pure: a fixed order always
    /// yields a behaviorally identical composite.
    pub fn build(order: &ResolutionOrder, name: &str) -> Arc<Composite> {
        debug!(composite = name, layers = order.len(), "building composite");
        Composite::from_order(order, name)
    }

    /// Cached composite lookup, rebuilding lazily after invalidation.
    pub fn get_or_build(
        &mut self,
        registry: &ExtensionRegistry,
        id: &PointId,
        key: Option<&FamilyKey>,
    ) -> Result<Arc<Composite>> {
        let cache_key = (id.clone(), key.cloned());
        if let Some(composite) = self.cache.get(&cache_key) {
            trace!(point = %id, key = ?key, "composite cache hit");
            return Ok(Arc::clone(composite));
        }
        let contributors = registry.list_contributors(id, key)?;
        let root = registry.root(id)?;
        let extra = registry.extra_base(id)?;
        let strict = registry.config(id)?.is_strict();
        let order = linearize(&contributors, &root, extra.as_ref(), strict)?;
        let name = match key {
            Some(k) => format!("{id}[{k}]"),
            None => id.to_string(),
        };
        let composite = Self::build(&order, &name);
        self.cache.insert(cache_key, Arc::clone(&composite));
        Ok(composite)
    }

    /// Drop stale cache entries after a registration. A base-level
    /// registration empties the whole tree's cache, since every keyed
    /// composite also includes the base-level list; a keyed registration
    /// drops that key's entry plus the unkeyed entry.
    pub fn invalidate(&mut self, id: &PointId, key: Option<&FamilyKey>) {
        match key {
            None => self.cache.retain(|(point, _), _| point != id),
            Some(k) => {
                self.cache.remove(&(id.clone(), Some(k.clone())));
                self.cache.remove(&(id.clone(), None));
            }
        }
        trace!(point = %id, key = ?key, "invalidated composite cache");
    }

    /// Cache peek without building.
    pub fn cached(&self, id: &PointId, key: Option<&FamilyKey>) -> Option<Arc<Composite>> {
        self.cache.get(&(id.clone(), key.cloned())).map(Arc::clone)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
