//! Depth ordering of parent/child trees such as the location taxonomy.
//!
//! Nodes are stored in an arena indexed by source id. Depths are computed with an explicit
//! stack so that deep or malformed trees never recurse.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

use crate::types::SourceId;

/// One node of a hierarchical taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyNode {
    pub source_id: SourceId,
    pub name: String,
    pub slug: Option<String>,
    pub parent: Option<SourceId>,
}

impl HierarchyNode {
    pub fn new(source_id: SourceId, name: impl Into<String>) -> Self {
        Self {
            source_id,
            name: name.into(),
            slug: None,
            parent: None,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_parent(mut self, parent: SourceId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A node whose parent is not part of the input. It is migrated as a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanedNode {
    pub source_id: SourceId,
    pub missing_parent: SourceId,
}

/// Nodes excluded by one cycle of the parent relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyCycle {
    /// Ids of the cycle members, in ascending order.
    pub members: Vec<SourceId>,
    /// Nodes below the cycle, in ascending order.
    pub descendants: Vec<SourceId>,
}

impl HierarchyCycle {
    /// Number of excluded nodes.
    pub fn len(&self) -> usize {
        self.members.len() + self.descendants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.descendants.is_empty()
    }
}

/// Migration order of a hierarchy.
#[derive(Debug, Clone, Default)]
pub struct HierarchyPlan {
    /// Nodes grouped by depth, roots first. Each level is ordered by source id.
    pub levels: Vec<Vec<HierarchyNode>>,
    pub orphans: Vec<OrphanedNode>,
    /// Each detected cycle with the nodes it excludes.
    pub cycles: Vec<HierarchyCycle>,
    /// Source ids that appeared more than once. Only the first node was kept.
    pub duplicates: Vec<SourceId>,
}

impl HierarchyPlan {
    /// Number of nodes that will be migrated.
    pub fn node_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Iterates over migratable nodes, parents before children.
    pub fn nodes(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.levels.iter().flatten()
    }
}

#[derive(Debug, Clone, Copy)]
enum Depth {
    Resolved(usize),
    /// Part of or below the cycle at this index of [`HierarchyPlan::cycles`].
    Excluded(usize),
}

/// Where a walk up the tree stopped.
#[derive(Debug, Clone, Copy)]
enum Anchor {
    Root,
    Memoized(Depth),
    Cycle(usize),
}

/// Computes the depth-ordered migration plan of `nodes`.
pub fn resolve(nodes: Vec<HierarchyNode>) -> HierarchyPlan {
    let mut plan = HierarchyPlan::default();

    let mut arena: BTreeMap<SourceId, HierarchyNode> = BTreeMap::new();
    for node in nodes {
        if arena.contains_key(&node.source_id) {
            warn!(source_id = %node.source_id, name = %node.name, "duplicate hierarchy node, keeping the first one");
            plan.duplicates.push(node.source_id);
            continue;
        }
        arena.insert(node.source_id, node);
    }

    // Orphans are demoted to roots before depths are computed.
    let orphaned: Vec<OrphanedNode> = arena
        .values()
        .filter_map(|node| {
            node.parent
                .filter(|parent| !arena.contains_key(parent))
                .map(|missing_parent| OrphanedNode {
                    source_id: node.source_id,
                    missing_parent,
                })
        })
        .collect();
    for orphan in &orphaned {
        warn!(source_id = %orphan.source_id, missing_parent = %orphan.missing_parent, "parent not found, migrating node as a root");
        if let Some(node) = arena.get_mut(&orphan.source_id) {
            node.parent = None;
        }
    }
    plan.orphans = orphaned;

    let mut depths: HashMap<SourceId, Depth> = HashMap::with_capacity(arena.len());
    let mut cycle_of: HashMap<SourceId, usize> = HashMap::new();

    for &start in arena.keys() {
        if depths.contains_key(&start) {
            continue;
        }

        // Walk up until a root, a memoized node, or a node already on the path.
        let mut path: Vec<SourceId> = Vec::new();
        let mut on_path: HashSet<SourceId> = HashSet::new();
        let mut current = start;
        let anchor = loop {
            if let Some(depth) = depths.get(&current) {
                break Anchor::Memoized(*depth);
            }
            if !on_path.insert(current) {
                // `current` closes a cycle: every node from its first occurrence is a member.
                let first = path.iter().position(|id| *id == current).unwrap_or(0);
                let mut members: Vec<SourceId> = path[first..].to_vec();
                members.sort();
                warn!(members = ?members, "cycle detected in hierarchy, excluding its nodes");
                let cycle = plan.cycles.len();
                cycle_of.extend(members.iter().map(|member| (*member, cycle)));
                plan.cycles.push(HierarchyCycle {
                    members,
                    descendants: Vec::new(),
                });
                break Anchor::Cycle(cycle);
            }
            path.push(current);

            match arena.get(&current).and_then(|node| node.parent) {
                Some(parent) => current = parent,
                None => break Anchor::Root,
            }
        };

        // Unwind the path from the top, assigning depths.
        let mut below = match anchor {
            Anchor::Root => None,
            Anchor::Memoized(depth) => Some(depth),
            Anchor::Cycle(cycle) => Some(Depth::Excluded(cycle)),
        };
        for id in path.iter().rev() {
            let depth = match (cycle_of.get(id), below) {
                (Some(cycle), _) => Depth::Excluded(*cycle),
                (None, None) => Depth::Resolved(0),
                (None, Some(Depth::Resolved(parent_depth))) => Depth::Resolved(parent_depth + 1),
                (None, Some(Depth::Excluded(cycle))) => {
                    if let Some(excluding) = plan.cycles.get_mut(cycle) {
                        excluding.descendants.push(*id);
                    }
                    Depth::Excluded(cycle)
                }
            };
            depths.insert(*id, depth);
            below = Some(depth);
        }
    }

    for cycle in &mut plan.cycles {
        cycle.descendants.sort();
        for descendant in &cycle.descendants {
            warn!(source_id = %descendant, members = ?cycle.members, "node descends from a cycle, excluding it");
        }
    }

    for (source_id, node) in arena {
        if let Some(Depth::Resolved(depth)) = depths.get(&source_id).copied() {
            if plan.levels.len() <= depth {
                plan.levels.resize_with(depth + 1, Vec::new);
            }
            plan.levels[depth].push(node);
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, name: &str) -> HierarchyNode {
        HierarchyNode::new(SourceId::new(id), name)
    }

    fn child(id: u64, name: &str, parent: u64) -> HierarchyNode {
        node(id, name).with_parent(SourceId::new(parent))
    }

    fn ids(level: &[HierarchyNode]) -> Vec<u64> {
        level.iter().map(|node| node.source_id.into_inner()).collect()
    }

    #[test]
    fn parents_are_planned_before_children() {
        let plan = resolve(vec![
            child(2, "Buenos Aires", 1),
            node(1, "Argentina"),
        ]);

        assert_eq!(plan.levels.len(), 2);
        assert_eq!(ids(&plan.levels[0]), vec![1]);
        assert_eq!(ids(&plan.levels[1]), vec![2]);
        assert!(plan.orphans.is_empty());
        assert!(plan.cycles.is_empty());
    }

    #[test]
    fn levels_are_ordered_by_source_id() {
        let plan = resolve(vec![
            child(30, "Rosario", 10),
            child(20, "Córdoba", 10),
            node(40, "Uruguay"),
            node(10, "Argentina"),
            child(50, "Barrio", 20),
        ]);

        assert_eq!(ids(&plan.levels[0]), vec![10, 40]);
        assert_eq!(ids(&plan.levels[1]), vec![20, 30]);
        assert_eq!(ids(&plan.levels[2]), vec![50]);
        assert_eq!(plan.node_count(), 5);
    }

    #[test]
    fn missing_parent_demotes_the_node_to_a_root() {
        let plan = resolve(vec![
            child(7, "Palermo", 99),
            child(8, "Soho", 7),
        ]);

        assert_eq!(
            plan.orphans,
            vec![OrphanedNode {
                source_id: SourceId::new(7),
                missing_parent: SourceId::new(99),
            }]
        );
        assert_eq!(ids(&plan.levels[0]), vec![7]);
        assert_eq!(plan.levels[0][0].parent, None);
        assert_eq!(ids(&plan.levels[1]), vec![8]);
    }

    #[test]
    fn cycles_and_their_descendants_are_excluded() {
        let plan = resolve(vec![
            child(1, "A", 2),
            child(2, "B", 1),
            child(3, "C", 2),
            node(4, "D"),
            child(5, "E", 4),
        ]);

        assert_eq!(
            plan.cycles,
            vec![HierarchyCycle {
                members: vec![SourceId::new(1), SourceId::new(2)],
                descendants: vec![SourceId::new(3)],
            }]
        );
        assert_eq!(ids(&plan.levels[0]), vec![4]);
        assert_eq!(ids(&plan.levels[1]), vec![5]);
        assert_eq!(plan.node_count(), 2);
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let plan = resolve(vec![child(1, "Loop", 1)]);

        assert_eq!(plan.cycles[0].members, vec![SourceId::new(1)]);
        assert_eq!(plan.node_count(), 0);
    }

    #[test]
    fn descendants_are_attributed_to_their_own_cycle() {
        let plan = resolve(vec![
            child(1, "A", 2),
            child(2, "B", 1),
            child(3, "C", 4),
            child(4, "D", 3),
            child(5, "E", 3),
            child(6, "F", 5),
            child(7, "G", 1),
        ]);

        assert_eq!(
            plan.cycles,
            vec![
                HierarchyCycle {
                    members: vec![SourceId::new(1), SourceId::new(2)],
                    descendants: vec![SourceId::new(7)],
                },
                HierarchyCycle {
                    members: vec![SourceId::new(3), SourceId::new(4)],
                    descendants: vec![SourceId::new(5), SourceId::new(6)],
                },
            ]
        );
        assert_eq!(plan.node_count(), 0);
    }

    #[test]
    fn first_duplicate_wins() {
        let plan = resolve(vec![
            node(1, "Argentina"),
            node(1, "Argentina (copy)"),
        ]);

        assert_eq!(plan.duplicates, vec![SourceId::new(1)]);
        assert_eq!(plan.levels[0][0].name, "Argentina");
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let nodes = (1..=10_000u64)
            .map(|id| {
                let name = format!("n{id}");
                if id > 1 { child(id, &name, id - 1) } else { node(id, &name) }
            })
            .collect();

        let plan = resolve(nodes);

        assert_eq!(plan.levels.len(), 10_000);
        assert_eq!(ids(&plan.levels[9_999]), vec![10_000]);
    }

    #[test]
    fn every_node_lands_deeper_than_its_parent() {
        let plan = resolve(vec![
            child(5, "e", 3),
            child(3, "c", 1),
            child(4, "d", 1),
            node(1, "a"),
            child(2, "b", 4),
        ]);

        let depth_of: HashMap<SourceId, usize> = plan
            .levels
            .iter()
            .enumerate()
            .flat_map(|(depth, level)| level.iter().map(move |node| (node.source_id, depth)))
            .collect();

        for node in plan.nodes() {
            if let Some(parent) = node.parent {
                assert!(depth_of[&node.source_id] > depth_of[&parent]);
            }
        }
    }
}
