// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use celldiff_core::common::Result;
use celldiff_core::{consistency_err, logical_err, parse_err};

use crate::hierarchy::Relationship;
use crate::model::{ComponentId, Model, SourceId};
use crate::variable::{Interface, Side, VariableId};
use crate::xml::{Document, NodeId};

/// A `<connection>` statement between two components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectedComponents {
    pub component_1: ComponentId,
    pub component_2: ComponentId,
    pub node: NodeId,
}

impl ConnectedComponents {
    pub fn covers(&self, a: ComponentId, b: ComponentId) -> bool {
        (self.component_1 == a && self.component_2 == b)
            || (self.component_1 == b && self.component_2 == a)
    }
}

/// Interfaces through which two components see each other.
pub fn interface_sides(relationship: Relationship) -> Option<(Side, Side)> {
    match relationship {
        Relationship::Sibling => Some((Side::Public, Side::Public)),
        Relationship::Parent => Some((Side::Private, Side::Public)),
        Relationship::Encapsulated => Some((Side::Public, Side::Private)),
        Relationship::Hidden => None,
    }
}

impl Model {
    fn component_in(
        &self,
        s: SourceId,
        doc: &Document,
        node: NodeId,
        attr: &str,
    ) -> Result<ComponentId> {
        let name = doc.required_attr(node, attr)?;
        match self.sources[s.0].components.get(name) {
            Some(id) => Ok(*id),
            None => consistency_err!(
                ComponentNotFound,
                format!("{} references unknown component '{}'", doc.path(node), name)
            ),
        }
    }

    fn variable_in(
        &self,
        component: ComponentId,
        doc: &Document,
        node: NodeId,
        attr: &str,
    ) -> Result<VariableId> {
        let name = doc.required_attr(node, attr)?;
        match self.variable_named(component, name) {
            Some(id) => Ok(id),
            None => consistency_err!(
                VariableNotFound,
                format!(
                    "{}: component '{}' has no variable '{}'",
                    doc.path(node),
                    self.components[component.0].name,
                    name
                )
            ),
        }
    }

    pub(crate) fn read_connection(
        &mut self,
        s: SourceId,
        doc: &Document,
        node: NodeId,
    ) -> Result<()> {
        let map = match doc.first_child_named(node, "map_components") {
            Some(map) => map,
            None => {
                return parse_err!(
                    MissingChild,
                    format!("{} has no map_components", doc.path(node))
                );
            }
        };
        let c1 = self.component_in(s, doc, map, "component_1")?;
        let c2 = self.component_in(s, doc, map, "component_2")?;
        if c1 == c2 {
            return logical_err!(
                SelfConnection,
                format!("{} connects '{}' to itself", doc.path(node), self.components[c1.0].name)
            );
        }

        let relationship = self.sources[s.0].hierarchy.relationship(c1, c2);
        let (side_1, side_2) = match interface_sides(relationship) {
            Some(sides) => sides,
            None => {
                return logical_err!(
                    HiddenComponents,
                    format!(
                        "'{}' and '{}' are hidden from each other",
                        self.components[c1.0].name, self.components[c2.0].name
                    )
                );
            }
        };

        for pair in doc.children_named(node, "map_variables") {
            let v1 = self.variable_in(c1, doc, pair, "variable_1")?;
            let v2 = self.variable_in(c2, doc, pair, "variable_2")?;
            self.link_variables(v1, side_1, v2, side_2)?;
        }

        self.sources[s.0].connections.push(ConnectedComponents {
            component_1: c1,
            component_2: c2,
            node,
        });
        Ok(())
    }

    /// Connects `v1` through its `side_1` interface with `v2` through its
    /// `side_2` one.  Exactly one of the two must be an input.
    pub(crate) fn link_variables(
        &mut self,
        v1: VariableId,
        side_1: Side,
        v2: VariableId,
        side_2: Side,
    ) -> Result<()> {
        let i1 = self.variables[v1.0].interface(side_1);
        let i2 = self.variables[v2.0].interface(side_2);
        let input = match (i1, i2) {
            (Interface::In, Interface::Out) => v1,
            (Interface::Out, Interface::In) => v2,
            _ => {
                return logical_err!(
                    IncompatibleInterfaces,
                    format!(
                        "cannot connect '{}' ({:?} {:?}) with '{}' ({:?} {:?})",
                        self.variables[v1.0].name,
                        side_1,
                        i1,
                        self.variables[v2.0].name,
                        side_2,
                        i2
                    )
                );
            }
        };

        self.variables[v1.0].link(side_1, v2)?;
        self.variables[v2.0].link(side_2, v1)?;
        self.root_variable(input)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use celldiff_core::ErrorCode;

    fn model(body: &str) -> Result<Model> {
        Model::parse_str(&format!(r#"<model name="m">{body}</model>"#))
    }

    const NESTED: &str = r#"
      <component name="outer">
        <variable name="x" units="second" public_interface="out" private_interface="out"/>
      </component>
      <component name="inner">
        <variable name="x" units="second" public_interface="in"/>
        <variable name="y" units="second" public_interface="out"/>
      </component>
      <component name="sibling">
        <variable name="y" units="second" public_interface="in"/>
      </component>
      <group>
        <relationship_ref relationship="encapsulation"/>
        <component_ref component="outer">
          <component_ref component="inner"/>
        </component_ref>
      </group>"#;

    #[test]
    fn test_parent_child_uses_private_interface() {
        let m = model(&format!(
            r#"{NESTED}
            <connection>
              <map_components component_1="outer" component_2="inner"/>
              <map_variables variable_1="x" variable_2="x"/>
            </connection>"#
        ))
        .unwrap();
        let outer = m.component_named("outer").unwrap();
        let inner = m.component_named("inner").unwrap();
        let ox = m.variable_named(outer, "x").unwrap();
        let ix = m.variable_named(inner, "x").unwrap();
        assert_eq!(vec![ix], m.variable(ox).private_links);
        assert!(m.variable(ox).public_links.is_empty());
        assert_eq!(vec![ox], m.variable(ix).public_links);
        assert_eq!(ox, m.root_variable(ix).unwrap());
    }

    #[test]
    fn test_hidden_components_cannot_connect() {
        let err = model(&format!(
            r#"{NESTED}
            <connection>
              <map_components component_1="inner" component_2="sibling"/>
              <map_variables variable_1="y" variable_2="y"/>
            </connection>"#
        ))
        .unwrap_err();
        assert_eq!(ErrorCode::HiddenComponents, err.code);
    }

    #[test]
    fn test_second_input_is_rejected() {
        let err = model(
            r#"<component name="a"><variable name="x" units="second" public_interface="in"/></component>
               <component name="b"><variable name="x" units="second" public_interface="out"/></component>
               <component name="c"><variable name="x" units="second" public_interface="out"/></component>
               <connection><map_components component_1="a" component_2="b"/><map_variables variable_1="x" variable_2="x"/></connection>
               <connection><map_components component_1="c" component_2="a"/><map_variables variable_1="x" variable_2="x"/></connection>"#,
        )
        .unwrap_err();
        assert_eq!(ErrorCode::SecondConnection, err.code);
    }

    #[test]
    fn test_incompatible_interfaces() {
        let err = model(
            r#"<component name="a"><variable name="x" units="second" public_interface="out"/></component>
               <component name="b"><variable name="x" units="second" public_interface="out"/></component>
               <connection><map_components component_1="a" component_2="b"/><map_variables variable_1="x" variable_2="x"/></connection>"#,
        )
        .unwrap_err();
        assert_eq!(ErrorCode::IncompatibleInterfaces, err.code);
    }

    #[test]
    fn test_missing_pieces() {
        let err = model(r#"<component name="a"/><connection/>"#).unwrap_err();
        assert_eq!(ErrorCode::MissingChild, err.code);

        let err = model(
            r#"<component name="a"/><connection><map_components component_1="a" component_2="zz"/></connection>"#,
        )
        .unwrap_err();
        assert_eq!(ErrorCode::ComponentNotFound, err.code);

        let err = model(
            r#"<component name="a"><variable name="x" units="second" public_interface="in"/></component>
               <component name="b"/>
               <connection><map_components component_1="a" component_2="b"/><map_variables variable_1="x" variable_2="q"/></connection>"#,
        )
        .unwrap_err();
        assert_eq!(ErrorCode::VariableNotFound, err.code);

        let err = model(
            r#"<component name="a"/><connection><map_components component_1="a" component_2="a"/></connection>"#,
        )
        .unwrap_err();
        assert_eq!(ErrorCode::SelfConnection, err.code);
    }

    #[test]
    fn test_fan_out() {
        let m = model(
            r#"<component name="src"><variable name="t" units="second" public_interface="out"/></component>
               <component name="a"><variable name="t" units="second" public_interface="in"/></component>
               <component name="b"><variable name="t" units="second" public_interface="in"/></component>
               <connection><map_components component_1="src" component_2="a"/><map_variables variable_1="t" variable_2="t"/></connection>
               <connection><map_components component_1="b" component_2="src"/><map_variables variable_1="t" variable_2="t"/></connection>"#,
        )
        .unwrap();
        let src = m.component_named("src").unwrap();
        let t = m.variable_named(src, "t").unwrap();
        assert_eq!(2, m.variable(t).public_links.len());
        for name in ["a", "b"] {
            let c = m.component_named(name).unwrap();
            let v = m.variable_named(c, "t").unwrap();
            assert_eq!(t, m.root_variable(v).unwrap());
        }
    }
}
