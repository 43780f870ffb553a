use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::descriptor::{ContributorDescriptor, ContributorId};
use crate::error::{CoreError, Result};

/// Deterministic composition order: newest contributor first, root second to
/// last, the tree's extra base behavior (if configured) as the ultimate
/// fallback. Earlier layers win member-name conflicts.
#[derive(Debug, Clone)]
pub struct ResolutionOrder {
    layers: Vec<Arc<ContributorDescriptor>>,
}

impl ResolutionOrder {
    pub fn layers(&self) -> &[Arc<ContributorDescriptor>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|d| d.name()).collect()
    }
}

/// Stack `contributors` (assumed newest-first) over `root`, deduplicating
/// by descriptor identity; the first occurrence wins. An empty contributor
/// list is legal: the order is a transparent passthrough of the root.
///
/// `strict` opts into conflict detection between contributor layers; the
/// default stacking policy lets the newest declaration shadow silently.
pub fn linearize(
    contributors: &[Arc<ContributorDescriptor>],
    root: &Arc<ContributorDescriptor>,
    extra: Option<&Arc<ContributorDescriptor>>,
    strict: bool,
) -> Result<ResolutionOrder> {
    let mut seen: BTreeSet<ContributorId> = BTreeSet::new();
    let mut layers = Vec::with_capacity(contributors.len() + 2);
    for desc in contributors {
        if seen.insert(desc.id()) {
            layers.push(Arc::clone(desc));
        }
    }
    if strict {
        check_conflicts(&layers)?;
    }
    layers.push(Arc::clone(root));
    if let Some(extra) = extra {
        layers.push(Arc::clone(extra));
    }
    Ok(ResolutionOrder { layers })
}

/// Fail when two distinct contributor layers define the same member. Root
/// and extra-base members are legitimate fallbacks and are not checked.
fn check_conflicts(layers: &[Arc<ContributorDescriptor>]) -> Result<()> {
    let mut winners: BTreeMap<&str, &str> = BTreeMap::new();
    for desc in layers {
        for member in desc.behavior().method_names() {
            if let Some(winner) = winners.get(member) {
                return Err(CoreError::Conflict {
                    member: member.to_string(),
                    first: (*winner).to_string(),
                    second: desc.name().to_string(),
                });
            }
            winners.insert(member, desc.name());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::Behavior;
    use crate::descriptor::PointId;
    use serde_json::json;

    fn desc(point: &PointId, name: &str) -> Arc<ContributorDescriptor> {
        ContributorDescriptor::new(point.clone(), Behavior::new(name))
    }

    fn desc_with_method(point: &PointId, name: &str, member: &str) -> Arc<ContributorDescriptor> {
        ContributorDescriptor::new(
            point.clone(),
            Behavior::new(name).method(member, |_call, _args| Ok(json!(null))),
        )
    }

    #[test]
    fn test_empty_contributor_list_is_a_passthrough() {
        let point = PointId::new("workers");
        let root = desc(&point, "workers");
        let order = linearize(&[], &root, None, false).unwrap();
        assert_eq!(order.layer_names(), vec!["workers"]);
    }

    #[test]
    fn test_root_is_last_and_extra_base_trails_it() {
        let point = PointId::new("workers");
        let root = desc(&point, "workers");
        let extra = desc(&point, "introspection");
        let a = desc(&point, "a");
        let order = linearize(&[Arc::clone(&a)], &root, Some(&extra), false).unwrap();
        assert_eq!(order.layer_names(), vec!["a", "workers", "introspection"]);
    }

    #[test]
    fn test_dedup_is_by_identity_first_occurrence_wins() {
        let point = PointId::new("workers");
        let root = desc(&point, "workers");
        let a = desc(&point, "a");
        let twin = desc(&point, "a");
        let order = linearize(
            &[Arc::clone(&a), Arc::clone(&a), Arc::clone(&twin)],
            &root,
            None,
            false,
        )
        .unwrap();
        // The repeated descriptor collapses; the identically-named twin is
        // a distinct identity and stays.
        assert_eq!(order.layer_names(), vec!["a", "a", "workers"]);
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_strict_mode_rejects_overlapping_members() {
        let point = PointId::new("workers");
        let root = desc(&point, "workers");
        let a = desc_with_method(&point, "a", "run");
        let b = desc_with_method(&point, "b", "run");
        let err = linearize(&[a, b], &root, None, true).unwrap_err();
        match err {
            CoreError::Conflict { member, first, second } => {
                assert_eq!(member, "run");
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_permissive_mode_allows_overlapping_members() {
        let point = PointId::new("workers");
        let root = desc(&point, "workers");
        let a = desc_with_method(&point, "a", "run");
        let b = desc_with_method(&point, "b", "run");
        let order = linearize(&[a, b], &root, None, false).unwrap();
        assert_eq!(order.len(), 3);
    }
}
