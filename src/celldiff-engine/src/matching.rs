// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Generic node matching between two documents.

use std::collections::HashMap;

use crate::xml::{Document, NodeId, NodeKind};

/// One-to-one correspondence between nodes of document `a` and nodes of
/// document `b`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionMap {
    a_to_b: HashMap<NodeId, NodeId>,
    b_to_a: HashMap<NodeId, NodeId>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs `a` with `b` when neither is paired yet.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> bool {
        if self.a_to_b.contains_key(&a) || self.b_to_a.contains_key(&b) {
            return false;
        }
        self.a_to_b.insert(a, b);
        self.b_to_a.insert(b, a);
        true
    }

    pub fn for_a(&self, a: NodeId) -> Option<NodeId> {
        self.a_to_b.get(&a).copied()
    }

    pub fn for_b(&self, b: NodeId) -> Option<NodeId> {
        self.b_to_a.get(&b).copied()
    }

    /// Removes the pair `a` belongs to, returning its partner.
    pub fn drop_a(&mut self, a: NodeId) -> Option<NodeId> {
        let b = self.a_to_b.remove(&a)?;
        self.b_to_a.remove(&b);
        Some(b)
    }

    pub fn len(&self) -> usize {
        self.a_to_b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a_to_b.is_empty()
    }

    /// Pairs ordered by the `a` node.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        let mut pairs: Vec<(NodeId, NodeId)> = self.a_to_b.iter().map(|(a, b)| (*a, *b)).collect();
        pairs.sort();
        pairs.into_iter()
    }
}

fn element_name(doc: &Document, node: NodeId) -> Option<&str> {
    doc.local_name(node)
}

fn is_text(doc: &Document, node: NodeId) -> bool {
    matches!(doc.kind(node), NodeKind::Text(_))
}

/// Pairs elements carrying the same value of one of `attributes`, provided
/// the value is unique among elements of that name on both sides.
pub fn match_ids(a: &Document, b: &Document, attributes: &[String], map: &mut ConnectionMap) {
    for attribute in attributes {
        let index = |doc: &Document| {
            let mut seen: HashMap<(String, String), Vec<NodeId>> = HashMap::new();
            for node in doc.descendants(doc.root()) {
                let name = element_name(doc, node);
                if let (Some(name), Some(value)) = (name, doc.attr(node, attribute)) {
                    seen.entry((name.to_owned(), value.to_owned()))
                        .or_default()
                        .push(node);
                }
            }
            seen
        };
        let in_a = index(a);
        let in_b = index(b);

        for node in a.descendants(a.root()) {
            let (Some(name), Some(value)) = (element_name(a, node), a.attr(node, attribute)) else {
                continue;
            };
            let key = (name.to_owned(), value.to_owned());
            if let (Some([_]), Some([other])) = (
                in_a.get(&key).map(Vec::as_slice),
                in_b.get(&key).map(Vec::as_slice),
            ) {
                map.connect(node, *other);
            }
        }
    }
}

/// Extends `map` by structure: identical subtrees first, then parents of
/// matched children, then children of matched parents.
pub fn propagate(a: &Document, b: &Document, map: &mut ConnectionMap) {
    map.connect(a.root(), b.root());
    match_identical(a, b, map);
    match_bottom_up(a, b, map);
    match_top_down(a, b, map);
}

fn match_identical(a: &Document, b: &Document, map: &mut ConnectionMap) {
    let sigs_a = a.signatures();
    let sigs_b = b.signatures();

    let mut by_hash: HashMap<u64, Vec<NodeId>> = HashMap::new();
    for node in b.descendants(b.root()) {
        if let Some(sig) = sigs_b.get(&node) {
            by_hash.entry(sig.hash).or_default().push(node);
        }
    }

    let mut order = a.descendants(a.root());
    // stable: equal weights keep document order
    order.sort_by_key(|node| std::cmp::Reverse(sigs_a.get(node).map_or(0, |sig| sig.weight)));

    for node in order {
        let Some(sig) = sigs_a.get(&node) else {
            continue;
        };
        if let Some(partner) = map.for_a(node) {
            // an identical partner found by id or name lends its descendants
            if sigs_b.get(&partner).map(|other| other.hash) == Some(sig.hash) {
                zip_subtrees(a, b, node, partner, map);
            }
            continue;
        }
        let Some(candidates) = by_hash.get(&sig.hash) else {
            continue;
        };
        let free: Vec<NodeId> = candidates
            .iter()
            .copied()
            .filter(|other| map.for_b(*other).is_none())
            .collect();

        let chosen = match free.as_slice() {
            [] => None,
            [only] => Some(*only),
            _ => {
                let parent = a.parent(node).and_then(|p| map.for_a(p));
                let mut under_parent = free
                    .iter()
                    .filter(|other| b.parent(**other) == parent && parent.is_some());
                match (under_parent.next(), under_parent.next()) {
                    (Some(other), None) => Some(*other),
                    _ => None,
                }
            }
        };

        if let Some(other) = chosen {
            zip_subtrees(a, b, node, other, map);
        }
    }
}

/// Pairs the nodes of two identical subtrees position by position.
fn zip_subtrees(a: &Document, b: &Document, x: NodeId, y: NodeId, map: &mut ConnectionMap) {
    for (p, q) in a.descendants(x).into_iter().zip(b.descendants(y)) {
        map.connect(p, q);
    }
}

fn match_bottom_up(a: &Document, b: &Document, map: &mut ConnectionMap) {
    let mut order = a.descendants(a.root());
    order.reverse();

    for node in order {
        if map.for_a(node).is_some() || is_text(a, node) {
            continue;
        }
        let name = element_name(a, node);

        let mut votes: Vec<(NodeId, usize)> = vec![];
        for child in a.children(node) {
            let Some(partner) = map.for_a(*child) else {
                continue;
            };
            let Some(parent) = b.parent(partner) else {
                continue;
            };
            if map.for_b(parent).is_some() || element_name(b, parent) != name {
                continue;
            }
            match votes.iter_mut().find(|(candidate, _)| *candidate == parent) {
                Some((_, count)) => *count += 1,
                None => votes.push((parent, 1)),
            }
        }

        let mut best: Option<(NodeId, usize)> = None;
        for (candidate, count) in votes {
            if best.is_none_or(|(_, top)| count > top) {
                best = Some((candidate, count));
            }
        }
        if let Some((parent, _)) = best {
            map.connect(node, parent);
        }
    }
}

fn match_top_down(a: &Document, b: &Document, map: &mut ConnectionMap) {
    for node in a.descendants(a.root()) {
        let Some(partner) = map.for_a(node) else {
            continue;
        };

        for child in a.children(node).iter().copied() {
            if map.for_a(child).is_some() {
                continue;
            }
            let free = b
                .children(partner)
                .iter()
                .copied()
                .filter(|other| map.for_b(*other).is_none());

            let candidates: Vec<NodeId> = if is_text(a, child) {
                free.filter(|other| is_text(b, *other)).collect()
            } else {
                let name = element_name(a, child);
                let same_tag = free.filter(|other| element_name(b, *other) == name);
                match a.attr(child, "name") {
                    Some(label) => same_tag
                        .filter(|other| b.attr(*other, "name") == Some(label))
                        .collect(),
                    None => same_tag.collect(),
                }
            };

            if let [only] = candidates.as_slice() {
                map.connect(child, *only);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(a: &str, b: &str) -> (Document, Document) {
        (Document::parse(a).unwrap(), Document::parse(b).unwrap())
    }

    fn by_path(doc: &Document, path: &str) -> NodeId {
        doc.descendants(doc.root())
            .into_iter()
            .find(|node| doc.path(*node) == path)
            .unwrap()
    }

    #[test]
    fn test_connect_is_one_to_one() {
        let (a, b) = docs("<m><x/><y/></m>", "<m><x/><y/></m>");
        let (ax, ay) = (a.children(a.root())[0], a.children(a.root())[1]);
        let bx = b.children(b.root())[0];
        let mut map = ConnectionMap::new();
        assert!(map.connect(ax, bx));
        assert!(!map.connect(ay, bx));
        assert_eq!(Some(bx), map.for_a(ax));
        assert_eq!(Some(ax), map.for_b(bx));
        assert_eq!(Some(bx), map.drop_a(ax));
        assert!(map.is_empty());
        assert!(map.connect(ay, bx));
    }

    #[test]
    fn test_match_ids_requires_unique_values() {
        let (a, b) = docs(
            r#"<m><c id="1"/><c id="2"/><c id="2"/><v id="1"/></m>"#,
            r#"<m><v id="1"/><c id="2"/><c id="1"/></m>"#,
        );
        let mut map = ConnectionMap::new();
        match_ids(&a, &b, &["id".to_owned()], &mut map);
        assert_eq!(2, map.len());
        assert_eq!(Some(by_path(&b, "/m[1]/c[2]")), map.for_a(by_path(&a, "/m[1]/c[1]")));
        assert_eq!(Some(by_path(&b, "/m[1]/v[1]")), map.for_a(by_path(&a, "/m[1]/v[1]")));
        assert_eq!(None, map.for_a(by_path(&a, "/m[1]/c[2]")));
    }

    #[test]
    fn test_identical_documents_match_completely() {
        let text = r#"<model name="m"><component name="a"><variable name="x"/></component><math><ci>x</ci></math></model>"#;
        let (a, b) = docs(text, text);
        let mut map = ConnectionMap::new();
        propagate(&a, &b, &mut map);
        assert_eq!(a.descendants(a.root()).len(), map.len());
        for (x, y) in map.iter() {
            assert_eq!(a.path(x), b.path(y));
        }
    }

    #[test]
    fn test_changed_attribute_matched_by_structure() {
        let (a, b) = docs(
            r#"<model><component name="a"><variable name="x" units="volt"/><variable name="y"/></component></model>"#,
            r#"<model><component name="a"><variable name="x" units="ampere"/><variable name="y"/></component></model>"#,
        );
        let mut map = ConnectionMap::new();
        propagate(&a, &b, &mut map);
        let x = by_path(&a, "/model[1]/component[1]/variable[1]");
        assert_eq!(Some(by_path(&b, "/model[1]/component[1]/variable[1]")), map.for_a(x));
        let component = by_path(&a, "/model[1]/component[1]");
        assert_eq!(Some(by_path(&b, "/model[1]/component[1]")), map.for_a(component));
    }

    #[test]
    fn test_renamed_parent_matched_bottom_up() {
        let (a, b) = docs(
            r#"<model><component name="old"><variable name="x"/><variable name="y"/></component></model>"#,
            r#"<model><component name="new"><variable name="x"/><variable name="y"/></component></model>"#,
        );
        let mut map = ConnectionMap::new();
        propagate(&a, &b, &mut map);
        assert_eq!(
            Some(by_path(&b, "/model[1]/component[1]")),
            map.for_a(by_path(&a, "/model[1]/component[1]"))
        );
    }

    #[test]
    fn test_moved_subtree_follows_hash() {
        let (a, b) = docs(
            r#"<model><group><leaf k="1"><x/></leaf></group><other/></model>"#,
            r#"<model><other><leaf k="1"><x/></leaf></other><group/></model>"#,
        );
        let mut map = ConnectionMap::new();
        propagate(&a, &b, &mut map);
        assert_eq!(
            Some(by_path(&b, "/model[1]/other[1]/leaf[1]")),
            map.for_a(by_path(&a, "/model[1]/group[1]/leaf[1]"))
        );
    }
}
