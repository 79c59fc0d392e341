//! Hierarchical rollup of title metrics over the agency forest.
//!
//! Agencies arrive from storage as a flat adjacency list (`id`, `parent_id`).
//! [`Forest::new`] materializes them into an arena of index-linked nodes so
//! the recursive walk never goes back to the store, then
//! [`Forest::rollup`] aggregates bottom-up.
//!
//! # Algorithm
//!
//! 1. Build parent → children adjacency; nodes without a known parent are
//!    roots. Every node must be reachable from a root, otherwise the parent
//!    relation contains a cycle and construction fails.
//! 2. For each root, recurse depth-first. A node's title set is its direct
//!    links unioned with the sets of its children. The union is a set, so a
//!    title reachable along several paths counts once.
//! 3. Word count is the sum of member word counts (a title with no known
//!    word count contributes 0 but is still a member); title count is the
//!    set's cardinality.
//! 4. The checksum is [`aggregate_fingerprint`] over the members, which
//!    sorts before hashing.
//!
//! Results are emitted in post-order (children before parents). Sibling
//! subtrees share nothing but read-only inputs.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::fingerprint::aggregate_fingerprint;

/// Errors raised while materializing the forest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RollupError {
    #[error("duplicate agency id {0}")]
    DuplicateId(i64),

    /// Agency is not reachable from any root.
    #[error("agency {0} is part of a parent cycle")]
    Cycle(i64),
}

/// Aggregate computed for one agency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollup {
    pub agency_id: i64,
    pub total_word_count: i64,
    pub title_count: i64,
    pub checksum: String,
    /// Ascending, de-duplicated.
    pub title_numbers: Vec<i64>,
}

#[derive(Debug)]
struct Node {
    id: i64,
    children: Vec<usize>,
    titles: Vec<i64>,
}

/// Arena-backed agency forest.
#[derive(Debug)]
pub struct Forest {
    nodes: Vec<Node>,
    roots: Vec<usize>,
}

impl Forest {
    /// Build the forest from `(id, parent_id)` pairs and `(agency_id, title)`
    /// links. Links naming an unknown agency are ignored. Child order follows
    /// input order.
    pub fn new(agencies: &[(i64, Option<i64>)], links: &[(i64, i64)]) -> Result<Self, RollupError> {
        let mut index: HashMap<i64, usize> = HashMap::with_capacity(agencies.len());
        let mut nodes = Vec::with_capacity(agencies.len());
        for (id, _) in agencies {
            if index.insert(*id, nodes.len()).is_some() {
                return Err(RollupError::DuplicateId(*id));
            }
            nodes.push(Node {
                id: *id,
                children: Vec::new(),
                titles: Vec::new(),
            });
        }

        let mut roots = Vec::new();
        for (slot, (_, parent)) in agencies.iter().enumerate() {
            match parent.and_then(|p| index.get(&p).copied()) {
                Some(parent_slot) => nodes[parent_slot].children.push(slot),
                None => roots.push(slot),
            }
        }

        for (agency_id, title) in links {
            if let Some(&slot) = index.get(agency_id) {
                nodes[slot].titles.push(*title);
            }
        }

        let forest = Self { nodes, roots };
        forest.check_reachable()?;
        Ok(forest)
    }

    /// Agency ids of the roots, in input order.
    pub fn root_ids(&self) -> Vec<i64> {
        self.roots.iter().map(|&r| self.nodes[r].id).collect()
    }

    fn check_reachable(&self) -> Result<(), RollupError> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = self.roots.clone();
        while let Some(slot) = stack.pop() {
            if seen[slot] {
                continue;
            }
            seen[slot] = true;
            stack.extend(self.nodes[slot].children.iter().copied());
        }
        match seen.iter().position(|s| !s) {
            Some(slot) => Err(RollupError::Cycle(self.nodes[slot].id)),
            None => Ok(()),
        }
    }

    /// Every agency id paired with its depth (roots are 0), parents listed
    /// before their children.
    pub fn preorder(&self) -> Vec<(i64, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&r| (r, 0)).collect();
        while let Some((slot, depth)) = stack.pop() {
            let node = &self.nodes[slot];
            out.push((node.id, depth));
            stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
        }
        out
    }

    /// Aggregate every agency. `word_counts` maps title number to its
    /// current word count.
    pub fn rollup(&self, word_counts: &HashMap<i64, i64>) -> Vec<Rollup> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            self.collect(root, word_counts, &mut out);
        }
        out
    }

    fn collect(
        &self,
        slot: usize,
        word_counts: &HashMap<i64, i64>,
        out: &mut Vec<Rollup>,
    ) -> BTreeSet<i64> {
        let node = &self.nodes[slot];
        let mut titles: BTreeSet<i64> = node.titles.iter().copied().collect();

        for &child in &node.children {
            titles.extend(self.collect(child, word_counts, out));
        }

        let members: Vec<(i64, i64)> = titles
            .iter()
            .map(|t| (*t, word_counts.get(t).copied().unwrap_or(0)))
            .collect();

        out.push(Rollup {
            agency_id: node.id,
            total_word_count: members.iter().map(|(_, w)| w).sum(),
            title_count: members.len() as i64,
            checksum: aggregate_fingerprint(&members),
            title_numbers: titles.iter().copied().collect(),
        });

        titles
    }
}
