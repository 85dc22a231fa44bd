//! Per-document revision trees.
//!
//! Each document id owns a small arena of revisions: every accepted write
//! adds a node whose parent is the revision the writer started from.
//! Replication merges remote revision paths into the same arena, so
//! divergent concurrent edits become sibling branches instead of silent
//! overwrites.
//!
//! The *winner* - the revision ordinary reads see - is chosen
//! deterministically: live leaves beat tombstoned leaves, then the highest
//! `(generation, digest)` wins. The rule depends only on tree content, so
//! two replicas holding the same revisions always agree on the winner.

use crate::document::Attachment;
use crate::revision::RevisionId;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The stored payload of one revision.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RevBody {
    /// JSON payload fields.
    pub data: Map<String, Value>,
    /// Named attachments.
    pub attachments: BTreeMap<String, Attachment>,
}

impl RevBody {
    pub(crate) fn new(
        data: Map<String, Value>,
        attachments: BTreeMap<String, Attachment>,
    ) -> Self {
        Self { data, attachments }
    }
}

/// One revision in the arena.
#[derive(Debug, Clone)]
pub(crate) struct RevNode {
    /// Parent revision, `None` for a root.
    pub parent: Option<RevisionId>,
    /// Stored body. `None` for interior ancestors replicated without bodies.
    pub body: Option<RevBody>,
    /// Whether this revision is a deletion tombstone.
    pub deleted: bool,
}

/// The revision arena for a single document id.
#[derive(Debug, Clone)]
pub(crate) struct RevTree {
    nodes: HashMap<RevisionId, RevNode>,
    leaves: BTreeSet<RevisionId>,
    winner: RevisionId,
}

impl RevTree {
    /// Creates a tree from its first locally written revision.
    pub(crate) fn new(rev: RevisionId, body: RevBody, deleted: bool) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            rev.clone(),
            RevNode {
                parent: None,
                body: Some(body),
                deleted,
            },
        );
        let mut leaves = BTreeSet::new();
        leaves.insert(rev.clone());
        Self {
            nodes,
            leaves,
            winner: rev,
        }
    }

    /// Creates a tree by merging a replicated revision path.
    pub(crate) fn from_path(path: &[RevisionId], body: RevBody, deleted: bool) -> Self {
        debug_assert!(!path.is_empty());
        let mut tree = Self {
            nodes: HashMap::new(),
            leaves: BTreeSet::new(),
            winner: path[0].clone(),
        };
        tree.merge_path(path, body, deleted);
        tree
    }

    /// Returns the winning revision.
    pub(crate) fn winner(&self) -> &RevisionId {
        &self.winner
    }

    /// Returns true if the winning revision is a tombstone.
    pub(crate) fn is_tombstoned(&self) -> bool {
        self.nodes
            .get(&self.winner)
            .map(|n| n.deleted)
            .unwrap_or(false)
    }

    /// Returns the node for a revision.
    pub(crate) fn node(&self, rev: &RevisionId) -> Option<&RevNode> {
        self.nodes.get(rev)
    }

    /// Returns the node for the winning revision.
    pub(crate) fn winning_node(&self) -> &RevNode {
        // The winner is always a member of the tree.
        &self.nodes[&self.winner]
    }

    /// Non-winning live leaves: the conflict branches, newest first.
    pub(crate) fn conflicts(&self) -> Vec<RevisionId> {
        let mut branches: Vec<RevisionId> = self
            .leaves
            .iter()
            .filter(|rev| {
                *rev != &self.winner && self.nodes.get(rev).map(|n| !n.deleted).unwrap_or(false)
            })
            .cloned()
            .collect();
        branches.sort_by(|a, b| b.cmp(a));
        branches
    }

    /// All leaf revisions, including tombstones.
    pub(crate) fn leaves(&self) -> impl Iterator<Item = &RevisionId> {
        self.leaves.iter()
    }

    /// Returns true when `rev` is a leaf that is not tombstoned.
    ///
    /// Live leaves are the valid write targets: the winner, or a losing
    /// conflict branch being resolved in place.
    pub(crate) fn is_live_leaf(&self, rev: &RevisionId) -> bool {
        self.leaves.contains(rev)
            && self.nodes.get(rev).map(|n| !n.deleted).unwrap_or(false)
    }

    /// The revision ancestry of `rev`, newest first.
    pub(crate) fn history(&self, rev: &RevisionId) -> Vec<RevisionId> {
        let mut path = Vec::new();
        let mut cursor = Some(rev.clone());
        while let Some(rev) = cursor {
            match self.nodes.get(&rev) {
                Some(node) => {
                    cursor = node.parent.clone();
                    path.push(rev);
                }
                None => break,
            }
        }
        path
    }

    /// Appends a locally written revision under `parent`.
    ///
    /// The caller has already validated the compare-and-swap against the
    /// current winner; this only mutates the arena.
    pub(crate) fn insert_child(
        &mut self,
        parent: Option<&RevisionId>,
        rev: RevisionId,
        body: RevBody,
        deleted: bool,
    ) {
        if let Some(parent) = parent {
            self.leaves.remove(parent);
        }
        self.nodes.insert(
            rev.clone(),
            RevNode {
                parent: parent.cloned(),
                body: Some(body),
                deleted,
            },
        );
        self.leaves.insert(rev);
        self.recompute_winner();
    }

    /// Merges a replicated revision path (newest first) into the tree.
    ///
    /// Stitches the unknown suffix of the path onto the deepest revision
    /// already present. Returns false - and changes nothing - when the tip
    /// is already known, which makes replication apply idempotent.
    pub(crate) fn merge_path(
        &mut self,
        path: &[RevisionId],
        body: RevBody,
        deleted: bool,
    ) -> bool {
        if path.is_empty() {
            return false;
        }

        // Index of the newest revision we already know; everything before
        // it in the path is new.
        let new_count = path
            .iter()
            .position(|rev| self.nodes.contains_key(rev))
            .unwrap_or(path.len());

        if new_count == 0 {
            return false;
        }

        // Insert oldest-first so parents exist before their children.
        let mut body = Some(body);
        for i in (0..new_count).rev() {
            let parent = path.get(i + 1).cloned();
            if let Some(parent) = &parent {
                self.leaves.remove(parent);
            }
            self.nodes.insert(
                path[i].clone(),
                RevNode {
                    parent,
                    // Only the tip carries a body; interior ancestors were
                    // replicated as bare lineage.
                    body: if i == 0 { body.take() } else { None },
                    deleted: i == 0 && deleted,
                },
            );
        }
        self.leaves.insert(path[0].clone());
        self.recompute_winner();
        true
    }

    fn recompute_winner(&mut self) {
        let best = self
            .leaves
            .iter()
            .max_by_key(|rev| {
                let live = self.nodes.get(*rev).map(|n| !n.deleted).unwrap_or(false);
                (live, (*rev).clone())
            })
            .cloned();
        if let Some(best) = best {
            self.winner = best;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(marker: &str) -> RevBody {
        let mut data = Map::new();
        data.insert("marker".into(), json!(marker));
        RevBody::new(data, BTreeMap::new())
    }

    fn rev(generation: u64, digest: &str) -> RevisionId {
        RevisionId::new(generation, digest)
    }

    #[test]
    fn single_revision_is_winner() {
        let tree = RevTree::new(rev(1, "aaa"), body("v1"), false);
        assert_eq!(tree.winner(), &rev(1, "aaa"));
        assert!(!tree.is_tombstoned());
        assert!(tree.conflicts().is_empty());
    }

    #[test]
    fn child_replaces_parent_as_winner() {
        let mut tree = RevTree::new(rev(1, "aaa"), body("v1"), false);
        tree.insert_child(Some(&rev(1, "aaa")), rev(2, "bbb"), body("v2"), false);

        assert_eq!(tree.winner(), &rev(2, "bbb"));
        assert!(tree.conflicts().is_empty());
        assert_eq!(tree.history(&rev(2, "bbb")), vec![rev(2, "bbb"), rev(1, "aaa")]);
    }

    #[test]
    fn divergent_branches_pick_higher_digest() {
        let mut tree = RevTree::new(rev(1, "aaa"), body("v1"), false);
        tree.insert_child(Some(&rev(1, "aaa")), rev(2, "bbb"), body("mine"), false);

        let changed = tree.merge_path(
            &[rev(2, "ccc"), rev(1, "aaa")],
            body("theirs"),
            false,
        );
        assert!(changed);

        // "ccc" > "bbb" at the same generation.
        assert_eq!(tree.winner(), &rev(2, "ccc"));
        assert_eq!(tree.conflicts(), vec![rev(2, "bbb")]);
    }

    #[test]
    fn live_leaf_beats_deleted_leaf() {
        let mut tree = RevTree::new(rev(1, "aaa"), body("v1"), false);
        tree.insert_child(Some(&rev(1, "aaa")), rev(2, "zzz"), RevBody::default(), true);
        tree.merge_path(&[rev(2, "bbb"), rev(1, "aaa")], body("live"), false);

        // The tombstone sorts higher but loses to the live leaf.
        assert_eq!(tree.winner(), &rev(2, "bbb"));
        assert!(!tree.is_tombstoned());
    }

    #[test]
    fn all_deleted_leaves_means_tombstoned() {
        let mut tree = RevTree::new(rev(1, "aaa"), body("v1"), false);
        tree.insert_child(Some(&rev(1, "aaa")), rev(2, "bbb"), RevBody::default(), true);

        assert!(tree.is_tombstoned());
        assert_eq!(tree.winner(), &rev(2, "bbb"));
    }

    #[test]
    fn merge_known_tip_is_noop() {
        let mut tree = RevTree::new(rev(1, "aaa"), body("v1"), false);
        tree.insert_child(Some(&rev(1, "aaa")), rev(2, "bbb"), body("v2"), false);

        let changed = tree.merge_path(&[rev(2, "bbb"), rev(1, "aaa")], body("other"), false);
        assert!(!changed);
        // Body untouched.
        let node = tree.node(&rev(2, "bbb")).unwrap();
        assert_eq!(node.body.as_ref().unwrap(), &body("v2"));
    }

    #[test]
    fn merge_extends_known_lineage() {
        let mut tree = RevTree::new(rev(1, "aaa"), body("v1"), false);

        let changed = tree.merge_path(
            &[rev(3, "ccc"), rev(2, "bbb"), rev(1, "aaa")],
            body("v3"),
            false,
        );
        assert!(changed);
        assert_eq!(tree.winner(), &rev(3, "ccc"));
        // Fast-forward, not a conflict.
        assert!(tree.conflicts().is_empty());
        // The intermediate node exists as bare lineage.
        let mid = tree.node(&rev(2, "bbb")).unwrap();
        assert!(mid.body.is_none());
    }

    #[test]
    fn merge_path_on_empty_ancestor_set_roots_the_path() {
        let tree = RevTree::from_path(
            &[rev(2, "bbb"), rev(1, "aaa")],
            body("remote"),
            false,
        );
        assert_eq!(tree.winner(), &rev(2, "bbb"));
        assert_eq!(
            tree.history(&rev(2, "bbb")),
            vec![rev(2, "bbb"), rev(1, "aaa")]
        );
    }

    #[test]
    fn tombstoning_a_losing_branch_clears_the_conflict() {
        let mut tree = RevTree::new(rev(1, "aaa"), body("v1"), false);
        tree.insert_child(Some(&rev(1, "aaa")), rev(2, "bbb"), body("mine"), false);
        tree.merge_path(&[rev(2, "ccc"), rev(1, "aaa")], body("theirs"), false);
        assert_eq!(tree.conflicts(), vec![rev(2, "bbb")]);
        assert!(tree.is_live_leaf(&rev(2, "bbb")));
        assert!(tree.is_live_leaf(&rev(2, "ccc")));
        assert!(!tree.is_live_leaf(&rev(1, "aaa")));

        tree.insert_child(Some(&rev(2, "bbb")), rev(3, "ddd"), RevBody::default(), true);

        assert!(tree.conflicts().is_empty());
        assert_eq!(tree.winner(), &rev(2, "ccc"));
        assert!(!tree.is_tombstoned());
        assert!(!tree.is_live_leaf(&rev(3, "ddd")));
    }

    #[test]
    fn winner_is_deterministic_regardless_of_merge_order() {
        let base = rev(1, "aaa");
        let ours = rev(2, "bbb");
        let theirs = rev(2, "ccc");

        let mut forward = RevTree::new(base.clone(), body("v1"), false);
        forward.insert_child(Some(&base), ours.clone(), body("ours"), false);
        forward.merge_path(&[theirs.clone(), base.clone()], body("theirs"), false);

        let mut reverse = RevTree::from_path(&[theirs.clone(), base.clone()], body("theirs"), false);
        reverse.merge_path(&[ours.clone(), base.clone()], body("ours"), false);

        assert_eq!(forward.winner(), reverse.winner());
        assert_eq!(forward.winner(), &theirs);
    }
}
