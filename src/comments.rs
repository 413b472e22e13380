//! Threaded comment reconstruction.
//!
//! Comments arrive flat, each optionally naming a parent. The forest is built
//! in two passes (index, then link) so lookups stay linear and a dangling
//! parent reference is handled in one place: the comment becomes a root.
//! Parent chains that loop back on themselves are cut where the loop closes.
//!
//! Reply chains can be arbitrarily deep, so every walk over the tree uses an
//! explicit stack rather than recursion.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::models::Comment;

#[derive(Debug)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    pub fn id(&self) -> &str {
        &self.comment.id
    }

    /// Depth-first search of this subtree.
    pub fn find(&self, id: &str) -> Option<&CommentNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.id() == id {
                return Some(node);
            }
            stack.extend(node.replies.iter().rev());
        }
        None
    }

    /// Number of comments in this subtree, including this one.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.replies.iter());
        }
        count
    }

    /// Ids of this subtree in post-order: every reply before its parent.
    pub fn ids_leaf_first(&self) -> Vec<String> {
        let mut out = Vec::new();
        // (node, replies already pushed)
        let mut stack = vec![(self, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                out.push(node.comment.id.clone());
                continue;
            }
            stack.push((node, true));
            stack.extend(node.replies.iter().rev().map(|reply| (reply, false)));
        }
        out
    }
}

impl Drop for CommentNode {
    // Unlink replies onto a heap stack so a deep chain does not drop
    // recursively.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.replies);
        }
    }
}

/// Build the comment forest. Input order is kept among siblings and roots,
/// so callers pass comments sorted by creation time ascending.
pub fn build_forest(comments: &[Comment]) -> Vec<CommentNode> {
    // Pass 1: id -> position. A repeated id keeps its first occurrence.
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(comments.len());
    let mut keep = vec![true; comments.len()];
    for (i, comment) in comments.iter().enumerate() {
        if index.contains_key(comment.id.as_str()) {
            debug!(id = %comment.id, "duplicate comment id ignored");
            keep[i] = false;
            continue;
        }
        index.insert(comment.id.as_str(), i);
    }

    // Pass 2: resolve parent links. Missing parents degrade to roots.
    let mut parent: Vec<Option<usize>> = comments
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if !keep[i] {
                return None;
            }
            c.parent_id
                .as_deref()
                .and_then(|p| index.get(p).copied())
                .filter(|&p| p != i)
        })
        .collect();

    break_cycles(comments, &mut parent);

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); comments.len()];
    let mut roots = Vec::new();
    for i in (0..comments.len()).filter(|&i| keep[i]) {
        match parent[i] {
            Some(p) => children[p].push(i),
            None => roots.push(i),
        }
    }

    roots
        .into_iter()
        .map(|i| assemble(i, comments, &children))
        .collect()
}

/// Every comment that must go when `id` is deleted, replies first.
/// Empty when `id` is not in the list.
pub fn subtree_ids(comments: &[Comment], id: &str) -> Vec<String> {
    build_forest(comments)
        .iter()
        .find_map(|root| root.find(id))
        .map(CommentNode::ids_leaf_first)
        .unwrap_or_default()
}

/// Flatten the forest into (comment, depth) pairs in display order.
pub fn flatten(forest: &[CommentNode]) -> Vec<(&Comment, usize)> {
    let mut out = Vec::new();
    let mut stack: Vec<(&CommentNode, usize)> = forest.iter().rev().map(|node| (node, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        out.push((&node.comment, depth));
        stack.extend(node.replies.iter().rev().map(|reply| (reply, depth + 1)));
    }
    out
}

fn break_cycles(comments: &[Comment], parent: &mut [Option<usize>]) {
    const UNSEEN: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut state = vec![UNSEEN; parent.len()];
    let mut path = Vec::new();

    for start in 0..parent.len() {
        let mut cur = start;
        while state[cur] == UNSEEN {
            state[cur] = ON_PATH;
            path.push(cur);
            match parent[cur] {
                Some(next) if state[next] == ON_PATH => {
                    warn!(id = %comments[cur].id, "comment parent cycle cut");
                    parent[cur] = None;
                    break;
                }
                Some(next) => cur = next,
                None => break,
            }
        }
        for node in path.drain(..) {
            state[node] = DONE;
        }
    }
}

/// Build the subtree under `root` bottom-up: a node is assembled only after
/// all of its replies.
fn assemble(root: usize, comments: &[Comment], children: &[Vec<usize>]) -> CommentNode {
    let mut built: Vec<CommentNode> = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((i, expanded)) = stack.pop() {
        if !expanded {
            stack.push((i, true));
            stack.extend(children[i].iter().rev().map(|&c| (c, false)));
            continue;
        }
        // Post-order leaves this node's replies on top of `built`, in order.
        let replies = built.split_off(built.len() - children[i].len());
        built.push(CommentNode {
            comment: comments[i].clone(),
            replies,
        });
    }
    match built.pop() {
        Some(node) => node,
        None => CommentNode {
            comment: comments[root].clone(),
            replies: Vec::new(),
        },
    }
}
