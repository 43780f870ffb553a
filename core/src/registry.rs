use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::behavior::Behavior;
use crate::descriptor::{ContributorDescriptor, ContributorId, FamilyKey, PointId};
use crate::error::{CoreError, Result};

/// Options recognized when declaring a root.
#[derive(Debug, Clone)]
pub struct PointConfig {
    name: String,
    keyed: bool,
    hash_attribute: Option<String>,
    strict_conflicts: bool,
    extra_base: Option<Arc<Behavior>>,
}

impl PointConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keyed: false,
            hash_attribute: None,
            strict_conflicts: false,
            extra_base: None,
        }
    }

    /// Partition the tree into per-key composition chains that share the
    /// base-level contributor list.
    pub fn keyed(mut self) -> Self {
        self.keyed = true;
        self
    }

    /// Behavior field that carries a contributor's family key when no
    /// explicit key is supplied at registration. Implies a keyed tree.
    pub fn hash_attribute(mut self, field: &str) -> Self {
        self.keyed = true;
        self.hash_attribute = Some(field.to_string());
        self
    }

    /// Reject resolution orders in which two contributor layers define the
    /// same member. The default is permissive: the newest declaration wins
    /// silently.
    pub fn strict_conflicts(mut self) -> Self {
        self.strict_conflicts = true;
        self
    }

    /// Extra behavior layered beneath the root in every composite of the
    /// tree, as the ultimate fallback.
    pub fn extra_base(mut self, behavior: Behavior) -> Self {
        self.extra_base = Some(Arc::new(behavior));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    pub fn hash_attribute_name(&self) -> Option<&str> {
        self.hash_attribute.as_deref()
    }

    pub fn is_strict(&self) -> bool {
        self.strict_conflicts
    }
}

/// Handle returned by root declaration; names the tree for registrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHandle {
    id: PointId,
}

impl RootHandle {
    pub fn id(&self) -> &PointId {
        &self.id
    }
}

/// Result of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Newly inserted under the given effective family key.
    Inserted { key: Option<FamilyKey> },
    /// The descriptor identity was already present; nothing changed.
    AlreadyRegistered,
}

#[derive(Debug, Clone)]
struct Registered {
    desc: Arc<ContributorDescriptor>,
    seq: u64,
}

#[derive(Debug)]
struct TreeState {
    config: PointConfig,
    root: Arc<ContributorDescriptor>,
    extra: Option<Arc<ContributorDescriptor>>,
    /// Newest first.
    unkeyed: Vec<Registered>,
    /// Each list newest first.
    keyed: BTreeMap<FamilyKey, Vec<Registered>>,
    next_seq: u64,
}

impl TreeState {
    fn contains(&self, id: ContributorId) -> bool {
        self.unkeyed.iter().any(|r| r.desc.id() == id)
            || self
                .keyed
                .values()
                .any(|list| list.iter().any(|r| r.desc.id() == id))
    }

    /// The key a descriptor lands under: its explicit key, else the value
    /// of the tree's hash attribute, else base-level.
    fn effective_key(&self, desc: &ContributorDescriptor) -> Result<Option<FamilyKey>> {
        if let Some(key) = desc.family_key() {
            if !self.config.is_keyed() {
                return Err(CoreError::NotKeyed {
                    point: self.config.name().to_string(),
                    detail: format!(
                        "contributor '{}' carries family key '{key}'",
                        desc.name()
                    ),
                });
            }
            return Ok(Some(key.clone()));
        }
        if !self.config.is_keyed() {
            return Ok(None);
        }
        let Some(attr) = self.config.hash_attribute_name() else {
            return Ok(None);
        };
        match desc.behavior().field_value(attr) {
            Some(Value::String(key)) => Ok(Some(FamilyKey::new(key))),
            _ => Ok(None),
        }
    }
}

/// Pure bookkeeping store mapping each extension point to its ordered
/// contributor lists. Composition lives elsewhere; locking belongs to the
/// owner.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    trees: BTreeMap<PointId, TreeState>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh, empty tree for the configured name.
    pub fn declare_root(&mut self, config: PointConfig, base: Behavior) -> Result<RootHandle> {
        let id = PointId::new(config.name());
        if self.trees.contains_key(&id) {
            return Err(CoreError::DuplicateRoot(id.to_string()));
        }
        let root = ContributorDescriptor::new(id.clone(), base);
        let extra = config
            .extra_base
            .clone()
            .map(|behavior| ContributorDescriptor::from_shared(id.clone(), behavior));
        debug!(point = %id, keyed = config.is_keyed(), "declared extension root");
        self.trees.insert(
            id.clone(),
            TreeState {
                config,
                root,
                extra,
                unkeyed: Vec::new(),
                keyed: BTreeMap::new(),
                next_seq: 0,
            },
        );
        Ok(RootHandle { id })
    }

    /// Prepend a contributor to its tree (newest first). Idempotent by
    /// descriptor identity; a duplicate leaves the tree untouched.
    pub fn register(
        &mut self,
        root: &RootHandle,
        desc: Arc<ContributorDescriptor>,
    ) -> Result<RegisterOutcome> {
        if desc.point() != root.id() {
            return Err(CoreError::PointMismatch {
                contributor: desc.name().to_string(),
                expected: desc.point().to_string(),
                actual: root.id().to_string(),
            });
        }
        let tree = self
            .trees
            .get_mut(root.id())
            .ok_or_else(|| CoreError::UnknownRoot(root.id().to_string()))?;
        let key = tree.effective_key(&desc)?;
        if tree.contains(desc.id()) {
            return Ok(RegisterOutcome::AlreadyRegistered);
        }
        let seq = tree.next_seq;
        tree.next_seq += 1;
        let entry = Registered {
            desc: Arc::clone(&desc),
            seq,
        };
        match &key {
            Some(k) => tree.keyed.entry(k.clone()).or_default().insert(0, entry),
            None => tree.unkeyed.insert(0, entry),
        }
        debug!(
            point = %root.id(),
            contributor = desc.name(),
            key = ?key,
            seq,
            "registered contributor"
        );
        Ok(RegisterOutcome::Inserted { key })
    }

    /// Contributors applicable to `key`: the keyed list (if any) followed by
    /// the base-level list, newest first. The root layer is excluded; the
    /// linearizer appends it. Policy for unknown keys belongs to the caller.
    pub fn list_contributors(
        &self,
        id: &PointId,
        key: Option<&FamilyKey>,
    ) -> Result<Vec<Arc<ContributorDescriptor>>> {
        let tree = self.tree(id)?;
        let mut out = Vec::new();
        if let Some(k) = key {
            if !tree.config.is_keyed() {
                return Err(CoreError::NotKeyed {
                    point: id.to_string(),
                    detail: format!("family key '{k}' requested"),
                });
            }
            if let Some(list) = tree.keyed.get(k) {
                out.extend(list.iter().map(|r| Arc::clone(&r.desc)));
            }
        }
        out.extend(tree.unkeyed.iter().map(|r| Arc::clone(&r.desc)));
        Ok(out)
    }

    pub fn root(&self, id: &PointId) -> Result<Arc<ContributorDescriptor>> {
        Ok(Arc::clone(&self.tree(id)?.root))
    }

    pub fn extra_base(&self, id: &PointId) -> Result<Option<Arc<ContributorDescriptor>>> {
        Ok(self.tree(id)?.extra.clone())
    }

    pub fn config(&self, id: &PointId) -> Result<&PointConfig> {
        Ok(&self.tree(id)?.config)
    }

    /// Keys with at least one keyed contributor. Lists are append-only, so
    /// a key never drops out once present.
    pub fn registered_keys(&self, id: &PointId) -> Result<BTreeSet<FamilyKey>> {
        Ok(self.tree(id)?.keyed.keys().cloned().collect())
    }

    pub fn has_key(&self, id: &PointId, key: &FamilyKey) -> Result<bool> {
        Ok(self.tree(id)?.keyed.contains_key(key))
    }

    pub fn contains_root(&self, id: &PointId) -> bool {
        self.trees.contains_key(id)
    }

    /// Serializable view of the registry for diagnostics.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let points = self
            .trees
            .iter()
            .map(|(id, tree)| PointSnapshot {
                name: id.to_string(),
                keyed: tree.config.is_keyed(),
                base_contributors: records(&tree.unkeyed),
                keyed_contributors: tree
                    .keyed
                    .iter()
                    .map(|(key, list)| (key.to_string(), records(list)))
                    .collect(),
            })
            .collect();
        RegistrySnapshot { points }
    }

    fn tree(&self, id: &PointId) -> Result<&TreeState> {
        self.trees
            .get(id)
            .ok_or_else(|| CoreError::UnknownRoot(id.to_string()))
    }
}

fn records(list: &[Registered]) -> Vec<ContributorRecord> {
    list.iter()
        .map(|r| ContributorRecord {
            name: r.desc.name().to_string(),
            seq: r.seq,
        })
        .collect()
}

/// Serializable view of one registry for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub points: Vec<PointSnapshot>,
}

/// One tree inside a [`RegistrySnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointSnapshot {
    pub name: String,
    pub keyed: bool,
    pub base_contributors: Vec<ContributorRecord>,
    pub keyed_contributors: BTreeMap<String, Vec<ContributorRecord>>,
}

/// One registered contributor inside a [`PointSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributorRecord {
    pub name: String,
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declare(registry: &mut ExtensionRegistry, config: PointConfig) -> RootHandle {
        registry.declare_root(config, Behavior::new("base")).unwrap()
    }

    #[test]
    fn test_declare_and_duplicate_rejection() {
        let mut registry = ExtensionRegistry::new();
        let handle = declare(&mut registry, PointConfig::new("workers"));
        assert_eq!(handle.id().as_str(), "workers");
        assert!(registry.contains_root(handle.id()));

        let err = registry
            .declare_root(PointConfig::new("workers"), Behavior::new("base"))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateRoot(_)));
    }

    #[test]
    fn test_register_is_idempotent_by_identity() {
        let mut registry = ExtensionRegistry::new();
        let handle = declare(&mut registry, PointConfig::new("workers"));

        let desc = ContributorDescriptor::new(handle.id().clone(), Behavior::new("a"));
        let first = registry.register(&handle, Arc::clone(&desc)).unwrap();
        assert_eq!(first, RegisterOutcome::Inserted { key: None });

        let second = registry.register(&handle, desc).unwrap();
        assert_eq!(second, RegisterOutcome::AlreadyRegistered);

        let listed = registry.list_contributors(handle.id(), None).unwrap();
        assert_eq!(listed.len(), 1);

        // A structurally identical behavior under a fresh descriptor is a
        // new layer.
        let twin = ContributorDescriptor::new(handle.id().clone(), Behavior::new("a"));
        registry.register(&handle, twin).unwrap();
        let listed = registry.list_contributors(handle.id(), None).unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn test_list_is_newest_first() {
        let mut registry = ExtensionRegistry::new();
        let handle = declare(&mut registry, PointConfig::new("workers"));
        for name in ["a", "b", "c"] {
            let desc = ContributorDescriptor::new(handle.id().clone(), Behavior::new(name));
            registry.register(&handle, desc).unwrap();
        }

        let listed = registry.list_contributors(handle.id(), None).unwrap();
        let names: Vec<&str> = listed.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_keyed_register_on_plain_tree_is_rejected() {
        let mut registry = ExtensionRegistry::new();
        let handle = declare(&mut registry, PointConfig::new("workers"));
        let desc = ContributorDescriptor::with_key(
            handle.id().clone(),
            FamilyKey::new("x"),
            Behavior::new("a"),
        );
        let err = registry.register(&handle, desc).unwrap_err();
        assert!(matches!(err, CoreError::NotKeyed { .. }));
    }

    #[test]
    fn test_keyed_listing_concatenates_key_then_base() {
        let mut registry = ExtensionRegistry::new();
        let handle = declare(&mut registry, PointConfig::new("connections").keyed());

        let base = ContributorDescriptor::new(handle.id().clone(), Behavior::new("shared"));
        registry.register(&handle, base).unwrap();
        let keyed = ContributorDescriptor::with_key(
            handle.id().clone(),
            FamilyKey::new("xml_rpc"),
            Behavior::new("xml"),
        );
        registry.register(&handle, keyed).unwrap();

        let key = FamilyKey::new("xml_rpc");
        let listed = registry.list_contributors(handle.id(), Some(&key)).unwrap();
        let names: Vec<_> = listed.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["xml", "shared"]);

        let base_only = registry.list_contributors(handle.id(), None).unwrap();
        assert_eq!(base_only.len(), 1);

        let keys = registry.registered_keys(handle.id()).unwrap();
        assert!(keys.contains(&key));
        assert!(registry.has_key(handle.id(), &key).unwrap());
        assert!(!registry.has_key(handle.id(), &FamilyKey::new("json_rpc")).unwrap());
    }

    #[test]
    fn test_hash_attribute_derives_the_key() {
        let mut registry = ExtensionRegistry::new();
        let handle = declare(
            &mut registry,
            PointConfig::new("connections").hash_attribute("proto"),
        );

        let tagged = ContributorDescriptor::new(
            handle.id().clone(),
            Behavior::new("xml").field("proto", json!("xml_rpc")),
        );
        let outcome = registry.register(&handle, tagged).unwrap();
        assert_eq!(
            outcome,
            RegisterOutcome::Inserted {
                key: Some(FamilyKey::new("xml_rpc"))
            }
        );

        // No hash attribute field means base-level.
        let untagged = ContributorDescriptor::new(handle.id().clone(), Behavior::new("shared"));
        let outcome = registry.register(&handle, untagged).unwrap();
        assert_eq!(outcome, RegisterOutcome::Inserted { key: None });
    }

    #[test]
    fn test_unknown_root_errors() {
        let registry = ExtensionRegistry::new();
        let missing = PointId::new("missing");
        assert!(matches!(
            registry.list_contributors(&missing, None).unwrap_err(),
            CoreError::UnknownRoot(_)
        ));
        assert!(matches!(
            registry.root(&missing).unwrap_err(),
            CoreError::UnknownRoot(_)
        ));
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut registry = ExtensionRegistry::new();
        let handle = declare(&mut registry, PointConfig::new("connections").keyed());
        let keyed = ContributorDescriptor::with_key(
            handle.id().clone(),
            FamilyKey::new("xml_rpc"),
            Behavior::new("xml"),
        );
        registry.register(&handle, keyed).unwrap();

        let snapshot = registry.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: RegistrySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.points.len(), 1);
        assert_eq!(parsed.points[0].name, "connections");
        assert!(parsed.points[0].keyed);
        assert_eq!(parsed.points[0].keyed_contributors["xml_rpc"][0].name, "xml");
    }
}
