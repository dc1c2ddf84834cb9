// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use smallvec::SmallVec;

use celldiff_core::common::Result;
use celldiff_core::{consistency_err, parse_err};

use crate::meta::meta_id_attr;
use crate::model::ComponentId;
use crate::variable::VariableId;
use crate::xml::{Document, NodeId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactionId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleKind {
    Reactant,
    Product,
    Catalyst,
    Activator,
    Inhibitor,
    Modifier,
    Rate,
}

impl RoleKind {
    fn parse(role: &str) -> Option<RoleKind> {
        let kind = match role {
            "reactant" => RoleKind::Reactant,
            "product" => RoleKind::Product,
            "catalyst" => RoleKind::Catalyst,
            "activator" => RoleKind::Activator,
            "inhibitor" => RoleKind::Inhibitor,
            "modifier" => RoleKind::Modifier,
            "rate" => RoleKind::Rate,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Forward,
    Reverse,
    Both,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Role {
    pub kind: RoleKind,
    pub direction: Direction,
    pub delta_variable: Option<VariableId>,
    pub stoichiometry: Option<f64>,
    pub node: NodeId,
    pub math: SmallVec<[NodeId; 1]>,
}

/// A `<variable_ref>` inside a reaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Substance {
    pub variable: VariableId,
    pub node: NodeId,
    pub roles: SmallVec<[Role; 2]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reaction {
    pub component: ComponentId,
    pub node: NodeId,
    pub reversible: bool,
    pub substances: Vec<Substance>,
    pub meta_id: Option<String>,
}

pub(crate) fn read_reaction<F>(
    doc: &Document,
    node: NodeId,
    component: ComponentId,
    lookup: F,
) -> Result<Reaction>
where
    F: Fn(&str) -> Option<VariableId>,
{
    let find = |name: &str| match lookup(name) {
        Some(var) => Ok(var),
        None => consistency_err!(
            VariableNotFound,
            format!("reaction at {} references unknown variable '{}'", doc.path(node), name)
        ),
    };

    let mut substances = vec![];
    for var_ref in doc.children_named(node, "variable_ref") {
        let variable = find(doc.required_attr(var_ref, "variable")?)?;
        let mut roles = SmallVec::new();
        for role in doc.children_named(var_ref, "role") {
            let raw = doc.required_attr(role, "role")?;
            let kind = match RoleKind::parse(raw) {
                Some(kind) => kind,
                None => {
                    return parse_err!(
                        UnknownRole,
                        format!("{}: unknown role '{}'", doc.path(role), raw)
                    );
                }
            };
            let direction = match doc.attr(role, "direction") {
                None | Some("forward") => Direction::Forward,
                Some("reverse") => Direction::Reverse,
                Some("both") => Direction::Both,
                Some(other) => {
                    return parse_err!(
                        UnknownDirection,
                        format!("{}: unknown direction '{}'", doc.path(role), other)
                    );
                }
            };
            let delta_variable = match doc.attr(role, "delta_variable") {
                Some(name) => Some(find(name)?),
                None => None,
            };
            roles.push(Role {
                kind,
                direction,
                delta_variable,
                stoichiometry: doc.number_attr(role, "stoichiometry")?,
                node: role,
                math: doc.children_named(role, "math").into_iter().collect(),
            });
        }
        substances.push(Substance {
            variable,
            node: var_ref,
            roles,
        });
    }

    Ok(Reaction {
        component,
        node,
        reversible: doc.attr(node, "reversible") != Some("no"),
        substances,
        meta_id: meta_id_attr(doc, node).map(str::to_owned),
    })
}
