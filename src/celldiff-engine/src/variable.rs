// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use celldiff_core::common::Result;
use celldiff_core::{consistency_err, logical_err, parse_err};

use crate::meta::meta_id_attr;
use crate::model::ComponentId;
use crate::units::{UnitDictionary, UnitRef};
use crate::xml::{Document, NodeId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interface {
    None,
    In,
    Out,
}

impl Interface {
    fn read(doc: &Document, node: NodeId, attr: &str) -> Result<Interface> {
        match doc.attr(node, attr).map(str::trim) {
            None | Some("none") => Ok(Interface::None),
            Some("in") => Ok(Interface::In),
            Some("out") => Ok(Interface::Out),
            Some(other) => parse_err!(
                UnknownInterface,
                format!("{}/@{}: unknown interface '{}'", doc.path(node), attr, other)
            ),
        }
    }
}

/// Which of a variable's two interfaces a connection goes through.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Public,
    Private,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InitialValue {
    Literal(f64),
    Variable(VariableId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub component: ComponentId,
    pub node: NodeId,
    pub units: UnitRef,
    pub initial_value: Option<InitialValue>,
    pub public_interface: Interface,
    pub private_interface: Interface,
    pub public_links: Vec<VariableId>,
    pub private_links: Vec<VariableId>,
    pub meta_id: Option<String>,
}

impl Variable {
    pub fn interface(&self, side: Side) -> Interface {
        match side {
            Side::Public => self.public_interface,
            Side::Private => self.private_interface,
        }
    }

    pub fn links(&self, side: Side) -> &[VariableId] {
        match side {
            Side::Public => &self.public_links,
            Side::Private => &self.private_links,
        }
    }

    pub(crate) fn links_mut(&mut self, side: Side) -> &mut Vec<VariableId> {
        match side {
            Side::Public => &mut self.public_links,
            Side::Private => &mut self.private_links,
        }
    }

    /// Records a connection through `side`.  An "in" interface takes its
    /// value from exactly one place.
    pub(crate) fn link(&mut self, side: Side, other: VariableId) -> Result<()> {
        if self.links(side).contains(&other) {
            return Ok(());
        }
        if self.interface(side) == Interface::In && !self.links(side).is_empty() {
            return logical_err!(
                SecondConnection,
                format!(
                    "variable '{}' already receives its value through its {:?} interface",
                    self.name, side
                )
            );
        }
        self.links_mut(side).push(other);
        Ok(())
    }

    /// The link followed when resolving the root variable.
    pub fn input(&self) -> Option<VariableId> {
        if self.public_interface == Interface::In {
            return self.public_links.first().copied();
        }
        if self.private_interface == Interface::In {
            return self.private_links.first().copied();
        }
        None
    }
}

/// A parsed `<variable>` whose initial value may still name a sibling.
pub(crate) struct VariableDraft {
    pub variable: Variable,
    pub initial_reference: Option<String>,
}

pub(crate) fn read_variable(
    doc: &Document,
    node: NodeId,
    dict: &UnitDictionary,
    component: ComponentId,
) -> Result<VariableDraft> {
    let name = doc.required_attr(node, "name")?.to_owned();
    let units_name = doc.required_attr(node, "units")?;
    let units = match dict.resolve(units_name, Some(component)) {
        Some(units) => units,
        None => {
            return consistency_err!(
                UnitNotFound,
                format!("variable '{name}' uses undefined unit '{units_name}'")
            );
        }
    };

    let public_interface = Interface::read(doc, node, "public_interface")?;
    let private_interface = Interface::read(doc, node, "private_interface")?;
    if public_interface == Interface::In && private_interface == Interface::In {
        return logical_err!(
            DualInInterface,
            format!("variable '{name}' has both interfaces set to 'in'")
        );
    }

    let mut initial_value = None;
    let mut initial_reference = None;
    if let Some(raw) = doc.attr(node, "initial_value") {
        if public_interface == Interface::In || private_interface == Interface::In {
            return logical_err!(
                InitialValueOnInput,
                format!("variable '{name}' has an 'in' interface and an initial value")
            );
        }
        match raw.trim().parse::<f64>() {
            Ok(value) => initial_value = Some(InitialValue::Literal(value)),
            Err(_) => initial_reference = Some(raw.trim().to_owned()),
        }
    }

    Ok(VariableDraft {
        variable: Variable {
            name,
            component,
            node,
            units,
            initial_value,
            public_interface,
            private_interface,
            public_links: vec![],
            private_links: vec![],
            meta_id: meta_id_attr(doc, node).map(str::to_owned),
        },
        initial_reference,
    })
}
