// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Matching the entities of two versions of a model.
//!
//! [`connect_models`] runs in stages: nodes carrying a unique identifier are
//! paired first, then units and components by name, then the remaining
//! nodes by structure.  Last, matched variables and reactions whose
//! connection context differs between the versions are unpaired.

use tracing::{debug, info};

use crate::diff::{DiffOp, diff};
use crate::matching::{ConnectionMap, match_ids, propagate};
use crate::meta::{EntityRef, META_ID_ATTR};
use crate::model::{Component, ComponentId, Model, ROOT};
use crate::reaction::{Direction, ReactionId, RoleKind};
use crate::variable::{Side, VariableId};
use crate::xml::NodeId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchOptions {
    /// attributes whose values identify a node across versions
    pub id_attributes: Vec<String>,
    /// unpair variables and reactions whose connections disagree
    pub validate_topology: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        MatchOptions {
            id_attributes: vec!["id".to_owned(), META_ID_ATTR.to_owned()],
            validate_topology: true,
        }
    }
}

/// The other end of a connection, as seen from model `b`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Partner {
    Node(NodeId),
    /// a component that still lives in an imported document
    Imported(String),
    Unmatched,
}

pub fn connect_models(a: &Model, b: &Model, options: &MatchOptions) -> ConnectionMap {
    let mut map = ConnectionMap::new();
    match_ids(a.document(), b.document(), &options.id_attributes, &mut map);
    let by_id = map.len();
    match_names(a, b, &mut map);
    let by_name = map.len() - by_id;
    propagate(a.document(), b.document(), &mut map);
    debug!(by_id, by_name, total = map.len(), "matched nodes");

    if options.validate_topology {
        validate_variables(a, b, &mut map);
        validate_reactions(a, b, &mut map);
    }
    map
}

fn root_components(model: &Model) -> impl Iterator<Item = (ComponentId, &Component)> {
    model.components().filter(|(_, c)| c.source == ROOT)
}

/// Units and components with the same name on both sides are paired when
/// neither is paired yet.
fn match_names(a: &Model, b: &Model, map: &mut ConnectionMap) {
    for (name, unit) in a.root().units().global_units() {
        let unit = a.unit(unit);
        if unit.source != ROOT {
            continue;
        }
        if let Some(other) = b.root().units().global(name) {
            let other = b.unit(other);
            if other.source == ROOT {
                map.connect(unit.node, other.node);
            }
        }
    }

    for (id, component) in root_components(a) {
        let Some(other_id) = b.component_named(&component.name) else {
            continue;
        };
        let other = b.component(other_id);
        if other.source != ROOT {
            continue;
        }
        map.connect(component.node, other.node);

        let local_b = b.root().units().local_units(other_id);
        for (name, unit) in a.root().units().local_units(id) {
            if let Some((_, other_unit)) = local_b.iter().find(|(n, _)| *n == name) {
                map.connect(a.unit(unit).node, b.unit(*other_unit).node);
            }
        }
    }
}

fn component_node_a(a: &Model, map: &ConnectionMap, component: ComponentId) -> Partner {
    let c = a.component(component);
    if c.source != ROOT {
        return Partner::Imported(c.name.clone());
    }
    map.for_a(c.node).map_or(Partner::Unmatched, Partner::Node)
}

fn component_node_b(b: &Model, map: &ConnectionMap, component: ComponentId) -> Partner {
    let c = b.component(component);
    if c.source != ROOT {
        return Partner::Imported(c.name.clone());
    }
    match map.for_b(c.node) {
        Some(_) => Partner::Node(c.node),
        None => Partner::Unmatched,
    }
}

fn network<F>(model: &Model, var: VariableId, partner: F) -> Vec<(Side, Partner)>
where
    F: Fn(ComponentId) -> Partner,
{
    let v = model.variable(var);
    let mut out: Vec<(Side, Partner)> = [Side::Public, Side::Private]
        .into_iter()
        .flat_map(|side| {
            v.links(side)
                .iter()
                .map(move |other| (side, *other))
        })
        .map(|(side, other)| (side, partner(model.variable(other).component)))
        .collect();
    out.sort();
    out.dedup();
    out
}

fn consistent(a: &[(Side, Partner)], b: &[(Side, Partner)]) -> bool {
    a == b && !a.iter().any(|(_, partner)| *partner == Partner::Unmatched)
}

fn matched_pairs(a: &Model, b: &Model, map: &ConnectionMap) -> Vec<(NodeId, EntityRef, EntityRef)> {
    map.iter()
        .filter_map(|(x, y)| match (a.entity_for_node(x), b.entity_for_node(y)) {
            (Some(ea), Some(eb)) => Some((x, ea, eb)),
            _ => None,
        })
        .collect()
}

fn validate_variables(a: &Model, b: &Model, map: &mut ConnectionMap) {
    for (node, ea, eb) in matched_pairs(a, b, map) {
        let (EntityRef::Variable(va), EntityRef::Variable(vb)) = (ea, eb) else {
            continue;
        };
        let owner_a = a.component(a.variable(va).component).node;
        let owner_b = b.component(b.variable(vb).component).node;
        let same_owner = map.for_a(owner_a) == Some(owner_b);

        let links_a = network(a, va, |c| component_node_a(a, map, c));
        let links_b = network(b, vb, |c| component_node_b(b, map, c));

        if !same_owner || !consistent(&links_a, &links_b) {
            info!(
                variable = %a.variable(va).name,
                same_owner,
                "dropping variable match with differing connections"
            );
            map.drop_a(node);
        }
    }
}

type Participation = (Partner, Vec<(RoleKind, Direction)>);

fn participants<F>(model: &Model, reaction: ReactionId, partner: F) -> Vec<Participation>
where
    F: Fn(NodeId) -> Partner,
{
    let mut out: Vec<Participation> = model
        .reaction(reaction)
        .substances
        .iter()
        .map(|substance| {
            let mut roles: Vec<(RoleKind, Direction)> =
                substance.roles.iter().map(|role| (role.kind, role.direction)).collect();
            roles.sort();
            (partner(model.variable(substance.variable).node), roles)
        })
        .collect();
    out.sort();
    out
}

fn validate_reactions(a: &Model, b: &Model, map: &mut ConnectionMap) {
    for (node, ea, eb) in matched_pairs(a, b, map) {
        let (EntityRef::Reaction(ra), EntityRef::Reaction(rb)) = (ea, eb) else {
            continue;
        };
        let owner_a = a.component(a.reaction(ra).component).node;
        let owner_b = b.component(b.reaction(rb).component).node;
        let same_owner = map.for_a(owner_a) == Some(owner_b);

        let roles_a = participants(a, ra, |n| {
            map.for_a(n).map_or(Partner::Unmatched, Partner::Node)
        });
        let roles_b = participants(b, rb, |n| match map.for_b(n) {
            Some(_) => Partner::Node(n),
            None => Partner::Unmatched,
        });
        let agrees = roles_a == roles_b
            && !roles_a.iter().any(|(partner, _)| *partner == Partner::Unmatched);

        if !same_owner || !agrees {
            info!(same_owner, "dropping reaction match with differing participants");
            map.drop_a(node);
        }
    }
}

/// Result of comparing two versions of a model.
#[derive(Clone, Debug)]
pub struct Comparison {
    pub connections: ConnectionMap,
    pub operations: Vec<DiffOp>,
}

pub fn compare(a: &Model, b: &Model, options: &MatchOptions) -> Comparison {
    let connections = connect_models(a, b, options);
    let operations = diff(a.document(), b.document(), &connections);
    debug!(operations = operations.len(), "compared models");
    Comparison {
        connections,
        operations,
    }
}
