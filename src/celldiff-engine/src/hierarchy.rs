// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Component hierarchies declared by `<group>` statements.  Each
//! relationship (and optional name) forms its own forest; the unnamed
//! "encapsulation" forest controls which components can see each other.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use celldiff_core::common::Result;
use celldiff_core::{consistency_err, logical_err, parse_err};

use crate::model::ComponentId;
use crate::xml::{Document, NodeId};

pub const ENCAPSULATION: &str = "encapsulation";

/// How component 1 relates to component 2 in the encapsulation forest.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Relationship {
    Hidden,
    Sibling,
    /// component 1 encapsulates component 2
    Parent,
    /// component 1 is encapsulated by component 2
    Encapsulated,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HierarchyNode {
    pub parent: Option<ComponentId>,
    pub children: Vec<ComponentId>,
}

#[derive(Clone, Debug, Default)]
pub struct HierarchyNetwork {
    pub relationship: String,
    pub name: String,
    nodes: HashMap<ComponentId, HierarchyNode>,
    order: Vec<ComponentId>,
}

impl HierarchyNetwork {
    pub fn new(relationship: &str, name: &str) -> Self {
        HierarchyNetwork {
            relationship: relationship.to_owned(),
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn node(&self, component: ComponentId) -> Option<&HierarchyNode> {
        self.nodes.get(&component)
    }

    pub fn parent(&self, component: ComponentId) -> Option<ComponentId> {
        self.nodes.get(&component).and_then(|node| node.parent)
    }

    pub fn children(&self, component: ComponentId) -> &[ComponentId] {
        match self.nodes.get(&component) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    /// Components in the order they were first mentioned.
    pub fn components(&self) -> &[ComponentId] {
        &self.order
    }

    pub fn add(&mut self, component: ComponentId) {
        if !self.nodes.contains_key(&component) {
            self.nodes.insert(component, HierarchyNode::default());
            self.order.push(component);
        }
    }

    /// Makes `parent` the parent of `child`.  Each node gets at most one
    /// parent, and no node may end up its own ancestor.
    pub fn connect(&mut self, parent: ComponentId, child: ComponentId) -> Result<()> {
        self.add(parent);
        self.add(child);

        match self.parent(child) {
            Some(existing) if existing == parent => return Ok(()),
            Some(existing) => {
                return logical_err!(
                    SecondParent,
                    format!(
                        "{child:?} already has parent {existing:?} in {} network, cannot add {parent:?}",
                        self.relationship
                    )
                );
            }
            None => {}
        }

        let mut cur = Some(parent);
        while let Some(ancestor) = cur {
            if ancestor == child {
                return logical_err!(
                    CyclicHierarchy,
                    format!("making {parent:?} the parent of {child:?} creates a cycle")
                );
            }
            cur = self.parent(ancestor);
        }

        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
        Ok(())
    }

    /// Every parent/child edge, parents in first-mention order.
    pub fn edges(&self) -> Vec<(ComponentId, ComponentId)> {
        self.order
            .iter()
            .flat_map(|parent| {
                self.children(*parent)
                    .iter()
                    .map(move |child| (*parent, *child))
            })
            .collect()
    }

    pub fn relationship(&self, c1: ComponentId, c2: ComponentId) -> Relationship {
        let (n1, n2) = match (self.nodes.get(&c1), self.nodes.get(&c2)) {
            (None, None) => return Relationship::Sibling,
            (Some(n), None) | (None, Some(n)) => {
                return if n.parent.is_none() {
                    Relationship::Sibling
                } else {
                    Relationship::Hidden
                };
            }
            (Some(n1), Some(n2)) => (n1, n2),
        };

        if n1.parent == n2.parent {
            Relationship::Sibling
        } else if n1.parent == Some(c2) {
            Relationship::Encapsulated
        } else if n2.parent == Some(c1) {
            Relationship::Parent
        } else {
            Relationship::Hidden
        }
    }

    /// Reads one top-level `<component_ref>` and its nested refs.
    fn read_component_ref<F>(
        &mut self,
        doc: &Document,
        node: NodeId,
        lookup: &F,
    ) -> Result<ComponentId>
    where
        F: Fn(&str) -> Option<ComponentId>,
    {
        let name = doc.required_attr(node, "component")?;
        let component = match lookup(name) {
            Some(component) => component,
            None => {
                return consistency_err!(
                    ComponentNotFound,
                    format!("{} references unknown component '{}'", doc.path(node), name)
                );
            }
        };
        self.add(component);

        for child_ref in doc.children_named(node, "component_ref") {
            let child = self.read_component_ref(doc, child_ref, lookup)?;
            self.connect(component, child)?;
        }
        Ok(component)
    }
}

/// All hierarchy networks of one document, keyed by relationship and name.
#[derive(Clone, Debug, Default)]
pub struct Hierarchy {
    networks: BTreeMap<(String, String), HierarchyNetwork>,
}

impl Hierarchy {
    pub fn network(&self, relationship: &str, name: &str) -> Option<&HierarchyNetwork> {
        self.networks
            .get(&(relationship.to_owned(), name.to_owned()))
    }

    pub fn network_mut(&mut self, relationship: &str, name: &str) -> &mut HierarchyNetwork {
        self.networks
            .entry((relationship.to_owned(), name.to_owned()))
            .or_insert_with(|| HierarchyNetwork::new(relationship, name))
    }

    pub fn networks(&self) -> impl Iterator<Item = &HierarchyNetwork> {
        self.networks.values()
    }

    pub fn encapsulation(&self) -> Option<&HierarchyNetwork> {
        self.network(ENCAPSULATION, "")
    }

    pub fn encapsulation_mut(&mut self) -> &mut HierarchyNetwork {
        self.network_mut(ENCAPSULATION, "")
    }

    /// Relationship in the encapsulation forest; without one every pair
    /// of components is made of siblings.
    pub fn relationship(&self, c1: ComponentId, c2: ComponentId) -> Relationship {
        match self.encapsulation() {
            Some(network) => network.relationship(c1, c2),
            None => Relationship::Sibling,
        }
    }

    /// Reads a `<group>` statement.  `lookup` resolves component names in
    /// the scope of the document the group belongs to.
    pub(crate) fn read_group<F>(&mut self, doc: &Document, node: NodeId, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<ComponentId>,
    {
        let mut keys = vec![];
        for rel_ref in doc.children_named(node, "relationship_ref") {
            let relationship = match doc.attr(rel_ref, "relationship") {
                Some(relationship) => relationship,
                None => {
                    warn!(
                        path = %doc.path(rel_ref),
                        "relationship_ref without relationship, skipped"
                    );
                    continue;
                }
            };
            let name = doc.attr(rel_ref, "name").unwrap_or("");
            if relationship == ENCAPSULATION && !name.is_empty() {
                return logical_err!(
                    NamedEncapsulation,
                    format!("{}: encapsulation relationships cannot be named", doc.path(rel_ref))
                );
            }
            keys.push((relationship, name));
        }

        if keys.is_empty() {
            warn!(path = %doc.path(node), "group without usable relationship_ref, skipped");
            return Ok(());
        }

        for comp_ref in doc.children_named(node, "component_ref") {
            if doc.children_named(comp_ref, "component_ref").is_empty() {
                return parse_err!(
                    EmptyGroup,
                    format!("{}: top-level component_ref has no children", doc.path(comp_ref))
                );
            }
            for (relationship, name) in keys.iter() {
                self.network_mut(relationship, name)
                    .read_component_ref(doc, comp_ref, &lookup)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use celldiff_core::ErrorCode;
    use proptest::prelude::*;

    fn c(n: usize) -> ComponentId {
        ComponentId(n)
    }

    #[test]
    fn test_relationships() {
        let mut net = HierarchyNetwork::new(ENCAPSULATION, "");
        net.connect(c(0), c(1)).unwrap();
        net.connect(c(0), c(2)).unwrap();
        net.connect(c(1), c(3)).unwrap();

        assert_eq!(Relationship::Sibling, net.relationship(c(1), c(2)));
        assert_eq!(Relationship::Parent, net.relationship(c(0), c(1)));
        assert_eq!(Relationship::Encapsulated, net.relationship(c(1), c(0)));
        assert_eq!(Relationship::Hidden, net.relationship(c(0), c(3)));
        assert_eq!(Relationship::Hidden, net.relationship(c(3), c(2)));
        // components outside the network
        assert_eq!(Relationship::Sibling, net.relationship(c(0), c(9)));
        assert_eq!(Relationship::Hidden, net.relationship(c(9), c(1)));
        assert_eq!(Relationship::Sibling, net.relationship(c(8), c(9)));
    }

    #[test]
    fn test_second_parent_rejected() {
        let mut net = HierarchyNetwork::new(ENCAPSULATION, "");
        net.connect(c(0), c(1)).unwrap();
        net.connect(c(0), c(1)).unwrap();
        let err = net.connect(c(2), c(1)).unwrap_err();
        assert_eq!(ErrorCode::SecondParent, err.code);
        assert_eq!(Some(c(0)), net.parent(c(1)));
        assert_eq!(vec![(c(0), c(1))], net.edges());
    }

    #[test]
    fn test_cycles_rejected() {
        let mut net = HierarchyNetwork::new(ENCAPSULATION, "");
        net.connect(c(0), c(1)).unwrap();
        net.connect(c(1), c(2)).unwrap();
        let err = net.connect(c(2), c(0)).unwrap_err();
        assert_eq!(ErrorCode::CyclicHierarchy, err.code);
        assert_eq!(
            ErrorCode::CyclicHierarchy,
            net.connect(c(4), c(4)).unwrap_err().code
        );
    }

    fn lookup(name: &str) -> Option<ComponentId> {
        match name {
            "outer" => Some(c(0)),
            "inner" => Some(c(1)),
            "leaf" => Some(c(2)),
            _ => None,
        }
    }

    #[test]
    fn test_read_group() {
        let doc = Document::parse(
            r#"<group>
                 <relationship_ref relationship="encapsulation"/>
                 <relationship_ref relationship="containment" name="cell"/>
                 <component_ref component="outer">
                   <component_ref component="inner">
                     <component_ref component="leaf"/>
                   </component_ref>
                 </component_ref>
               </group>"#,
        )
        .unwrap();
        let mut hierarchy = Hierarchy::default();
        hierarchy.read_group(&doc, doc.root(), lookup).unwrap();

        let enc = hierarchy.encapsulation().unwrap();
        assert_eq!(Some(c(0)), enc.parent(c(1)));
        assert_eq!(Some(c(1)), enc.parent(c(2)));
        let containment = hierarchy.network("containment", "cell").unwrap();
        assert_eq!(&[c(1)], containment.children(c(0)));
        assert_eq!(2, hierarchy.networks().count());
    }

    #[test]
    fn test_bad_groups() {
        let named = Document::parse(
            r#"<group><relationship_ref relationship="encapsulation" name="x"/>
               <component_ref component="outer"><component_ref component="inner"/></component_ref></group>"#,
        )
        .unwrap();
        let err = Hierarchy::default()
            .read_group(&named, named.root(), lookup)
            .unwrap_err();
        assert_eq!(ErrorCode::NamedEncapsulation, err.code);

        let empty = Document::parse(
            r#"<group><relationship_ref relationship="encapsulation"/><component_ref component="outer"/></group>"#,
        )
        .unwrap();
        let err = Hierarchy::default()
            .read_group(&empty, empty.root(), lookup)
            .unwrap_err();
        assert_eq!(ErrorCode::EmptyGroup, err.code);

        let unknown = Document::parse(
            r#"<group><relationship_ref relationship="encapsulation"/>
               <component_ref component="outer"><component_ref component="nope"/></component_ref></group>"#,
        )
        .unwrap();
        let err = Hierarchy::default()
            .read_group(&unknown, unknown.root(), lookup)
            .unwrap_err();
        assert_eq!(ErrorCode::ComponentNotFound, err.code);

        // no relationship at all: skipped, not fatal
        let skipped = Document::parse(
            r#"<group><relationship_ref/><component_ref component="outer"><component_ref component="inner"/></component_ref></group>"#,
        )
        .unwrap();
        let mut hierarchy = Hierarchy::default();
        hierarchy.read_group(&skipped, skipped.root(), lookup).unwrap();
        assert!(hierarchy.encapsulation().is_none());
    }

    proptest! {
        #[test]
        fn prop_hierarchy_is_a_forest(
            edges in proptest::collection::vec((0usize..8, 0usize..8), 0..40)
        ) {
            let mut net = HierarchyNetwork::new(ENCAPSULATION, "");
            for (p, k) in edges {
                let before = net.parent(c(k));
                match net.connect(c(p), c(k)) {
                    Ok(()) => prop_assert_eq!(Some(c(p)), net.parent(c(k))),
                    Err(_) => prop_assert_eq!(before, net.parent(c(k))),
                }
            }
            // walking up from any node terminates within the node count
            for component in net.components() {
                let mut steps = 0;
                let mut cur = net.parent(*component);
                while let Some(p) = cur {
                    steps += 1;
                    prop_assert!(steps <= net.components().len());
                    cur = net.parent(p);
                }
            }
        }
    }
}
