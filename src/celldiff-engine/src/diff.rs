// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Edit operations between two documents under a [`ConnectionMap`].

use std::collections::BTreeSet;
use std::fmt;

use float_cmp::approx_eq;
use serde::Serialize;

use crate::matching::ConnectionMap;
use crate::xml::{Document, NodeId, NodeKind};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffOp {
    /// a subtree of `b` with no counterpart in `a`
    Insert { path: String, tag: String },
    /// a subtree of `a` with no counterpart in `b`
    Delete { path: String, tag: String },
    Update {
        old_path: String,
        new_path: String,
        /// names of attributes added, removed or changed
        attributes: Vec<String>,
        text: bool,
    },
    /// `permutation` is set when only the position among the same
    /// siblings changed.
    Move {
        old_path: String,
        new_path: String,
        permutation: bool,
    },
}

impl DiffOp {
    pub fn paths(&self) -> Vec<&str> {
        match self {
            DiffOp::Insert { path, .. } | DiffOp::Delete { path, .. } => vec![path.as_str()],
            DiffOp::Update {
                old_path, new_path, ..
            }
            | DiffOp::Move {
                old_path, new_path, ..
            } => vec![old_path.as_str(), new_path.as_str()],
        }
    }
}

impl fmt::Display for DiffOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffOp::Insert { path, .. } => write!(f, "insert {path}"),
            DiffOp::Delete { path, .. } => write!(f, "delete {path}"),
            DiffOp::Update {
                old_path,
                new_path,
                attributes,
                text,
            } => {
                write!(f, "update {old_path} -> {new_path}")?;
                if !attributes.is_empty() {
                    write!(f, " [{}]", attributes.join(", "))?;
                }
                if *text {
                    write!(f, " [text]")?;
                }
                Ok(())
            }
            DiffOp::Move {
                old_path,
                new_path,
                permutation,
            } => {
                let kind = if *permutation { "reorder" } else { "move" };
                write!(f, "{kind} {old_path} -> {new_path}")
            }
        }
    }
}

fn tag_of(doc: &Document, node: NodeId) -> String {
    doc.local_name(node).unwrap_or("text()").to_owned()
}

fn same_value(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => approx_eq!(f64, x, y, ulps = 4),
        _ => false,
    }
}

fn changed_attributes(a: &[(String, String)], b: &[(String, String)]) -> Vec<String> {
    let find = |attrs: &[(String, String)], key: &str| {
        attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };
    let keys: BTreeSet<&str> = a.iter().chain(b.iter()).map(|(k, _)| k.as_str()).collect();
    keys.into_iter()
        .filter(|key| match (find(a, key), find(b, key)) {
            (Some(x), Some(y)) => !same_value(&x, &y),
            _ => true,
        })
        .map(str::to_owned)
        .collect()
}

/// Indices into `seq` of one longest strictly increasing subsequence.
fn longest_increasing(seq: &[usize]) -> Vec<usize> {
    // tails[k]: index of the smallest tail of an increasing run of length k+1
    let mut tails: Vec<usize> = vec![];
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, value) in seq.iter().enumerate() {
        let pos = tails.partition_point(|t| seq[*t] < *value);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut out = vec![];
    let mut cur = tails.last().copied();
    while let Some(i) = cur {
        out.push(i);
        cur = prev[i];
    }
    out.reverse();
    out
}

/// Computes the operations turning `a` into `b`, given which nodes
/// correspond.  Deletes are listed in document order of `a`, followed by
/// updates and moves, then inserts in document order of `b`.
pub fn diff(a: &Document, b: &Document, map: &ConnectionMap) -> Vec<DiffOp> {
    let mut ops = vec![];
    let order_a = a.descendants(a.root());

    for node in order_a.iter().copied() {
        if map.for_a(node).is_some() {
            continue;
        }
        let topmost = a.parent(node).is_none_or(|parent| map.for_a(parent).is_some());
        if topmost {
            ops.push(DiffOp::Delete {
                path: a.path(node),
                tag: tag_of(a, node),
            });
        }
    }

    for node in order_a.iter().copied() {
        let Some(partner) = map.for_a(node) else {
            continue;
        };

        let update = match (a.kind(node), b.kind(partner)) {
            (NodeKind::Element { attrs: x, .. }, NodeKind::Element { attrs: y, .. }) => {
                Some((changed_attributes(x, y), false))
            }
            (NodeKind::Text(x), NodeKind::Text(y)) => {
                Some((vec![], !same_value(x.trim(), y.trim())))
            }
            _ => None,
        };
        if let Some((attributes, text)) = update {
            if !attributes.is_empty() || text {
                ops.push(DiffOp::Update {
                    old_path: a.path(node),
                    new_path: b.path(partner),
                    attributes,
                    text,
                });
            }
        }

        if let Some(parent) = a.parent(node) {
            let moved = match (map.for_a(parent), b.parent(partner)) {
                (Some(x), Some(y)) => x != y,
                _ => true,
            };
            if moved {
                ops.push(DiffOp::Move {
                    old_path: a.path(node),
                    new_path: b.path(partner),
                    permutation: false,
                });
            }
        }

        ops.extend(reorders(a, b, map, node, partner));
    }

    for node in b.descendants(b.root()) {
        if map.for_b(node).is_some() {
            continue;
        }
        let topmost = b.parent(node).is_none_or(|parent| map.for_b(parent).is_some());
        if topmost {
            ops.push(DiffOp::Insert {
                path: b.path(node),
                tag: tag_of(b, node),
            });
        }
    }

    ops
}

/// Children that stayed under the same parent but changed relative order.
fn reorders(
    a: &Document,
    b: &Document,
    map: &ConnectionMap,
    parent: NodeId,
    partner: NodeId,
) -> Vec<DiffOp> {
    let kept: Vec<(NodeId, NodeId)> = a
        .children(parent)
        .iter()
        .filter_map(|child| map.for_a(*child).map(|other| (*child, other)))
        .filter(|(_, other)| b.parent(*other) == Some(partner))
        .collect();
    if kept.len() < 2 {
        return vec![];
    }

    let siblings = b.children(partner);
    let positions: Vec<usize> = kept
        .iter()
        .map(|(_, other)| siblings.iter().position(|s| s == other).unwrap_or_default())
        .collect();
    let stable: BTreeSet<usize> = longest_increasing(&positions).into_iter().collect();

    kept.iter()
        .enumerate()
        .filter(|(i, _)| !stable.contains(i))
        .map(|(_, (child, other))| DiffOp::Move {
            old_path: a.path(*child),
            new_path: b.path(*other),
            permutation: true,
        })
        .collect()
}
