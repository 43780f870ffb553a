use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::behavior::Behavior;

/// Identifier of one composition tree. Doubles as the display name of the
/// tree's generated composites.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(String);

impl PointId {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PointId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Tag partitioning a keyed extension point into sibling composition
/// chains that share the tree's base-level contributors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FamilyKey(String);

impl FamilyKey {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FamilyKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FamilyKey {
    fn from(name: String) -> Self {
        Self(name)
    }
}

static NEXT_CONTRIBUTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one declared contributor. Allocated once per descriptor;
/// registration is idempotent on this value, never on structural equality,
/// so re-declaring an identical-looking behavior is a new layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContributorId(u64);

impl ContributorId {
    fn next() -> Self {
        Self(NEXT_CONTRIBUTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContributorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contributor-{}", self.0)
    }
}

/// One declared extension of a tree: the behavior payload, an optional
/// explicit family key, and the tree it belongs to. Immutable once built;
/// there is no un-registration.
#[derive(Debug, Clone)]
pub struct ContributorDescriptor {
    id: ContributorId,
    point: PointId,
    family_key: Option<FamilyKey>,
    behavior: Arc<Behavior>,
}

impl ContributorDescriptor {
    /// A base-level contributor (applies to every key of a keyed tree, or
    /// to the single chain of an unkeyed one).
    pub fn new(point: PointId, behavior: Behavior) -> Arc<Self> {
        Self::build(point, None, Arc::new(behavior))
    }

    /// A contributor pinned to one family key of a keyed tree.
    pub fn with_key(point: PointId, key: FamilyKey, behavior: Behavior) -> Arc<Self> {
        Self::build(point, Some(key), Arc::new(behavior))
    }

    pub(crate) fn from_shared(point: PointId, behavior: Arc<Behavior>) -> Arc<Self> {
        Self::build(point, None, behavior)
    }

    fn build(point: PointId, family_key: Option<FamilyKey>, behavior: Arc<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            id: ContributorId::next(),
            point,
            family_key,
            behavior,
        })
    }

    pub fn id(&self) -> ContributorId {
        self.id
    }

    pub fn point(&self) -> &PointId {
        &self.point
    }

    pub fn family_key(&self) -> Option<&FamilyKey> {
        self.family_key.as_ref()
    }

    pub fn behavior(&self) -> &Arc<Behavior> {
        &self.behavior
    }

    pub fn name(&self) -> &str {
        self.behavior.name()
    }
}
