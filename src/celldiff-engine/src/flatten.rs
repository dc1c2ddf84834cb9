// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Merging imported units and components into the root document.
//!
//! Flattening works on the parsed model and rewrites documents in place:
//! names are settled first (renaming dependencies that collide), then the
//! subtrees are copied into the root document and the entities re-owned,
//! and finally the hierarchy and connection statements that were implied
//! by the imports are written out explicitly.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info};

use celldiff_core::common::Result;
use celldiff_core::logical_err;
use celldiff_core::naming::{Slot, disambiguate};

use crate::connection::ConnectedComponents;
use crate::hierarchy::ENCAPSULATION;
use crate::meta::{Description, EntityRef, META_ID_ATTR, RDF_NS, meta_id_key, set_about};
use crate::model::{ComponentId, Model, ROOT, Source, SourceId};
use crate::units::{UnitId, UnitRef, standard_unit};
use crate::xml::{Document, NodeId};

#[derive(Debug, Default)]
struct MergePlan {
    direct_units: Vec<UnitId>,
    direct_components: Vec<ComponentId>,
    dependency_units: Vec<UnitId>,
    dependency_components: Vec<ComponentId>,
    /// encapsulation edges among the merged components
    edges: Vec<(ComponentId, ComponentId)>,
}

impl MergePlan {
    fn components(&self) -> Vec<ComponentId> {
        self.direct_components
            .iter()
            .chain(self.dependency_components.iter())
            .copied()
            .collect()
    }
}

/// Namespace prefixes appearing on tags or attributes below `node`.
fn used_prefixes(doc: &Document, node: NodeId) -> HashSet<String> {
    let mut used = HashSet::new();
    for id in doc.descendants(node) {
        let names = doc
            .tag(id)
            .into_iter()
            .chain(doc.attrs(id).iter().map(|(key, _)| key.as_str()));
        for name in names {
            if let Some((prefix, _)) = name.split_once(':') {
                if prefix != "xmlns" {
                    used.insert(prefix.to_owned());
                }
            }
        }
    }
    used
}

/// Whether `key` is declared on `node` or one of its ancestors.
fn declared(doc: &Document, node: NodeId, key: &str) -> bool {
    let mut cur = Some(node);
    while let Some(id) = cur {
        if doc.attr(id, key).is_some() {
            return true;
        }
        cur = doc.parent(id);
    }
    false
}

fn remap(mapping: &HashMap<NodeId, NodeId>, node: NodeId) -> NodeId {
    mapping.get(&node).copied().unwrap_or(node)
}

impl Model {
    /// Removes every import from the root document by copying the imported
    /// entities (and everything they depend on) into it.  A model without
    /// imports is left untouched.
    ///
    /// The merge runs on a copy that replaces `self` only once every step
    /// has succeeded, so a failed flatten leaves the model as it was.
    pub fn flatten(&mut self) -> Result<()> {
        if !self.sources[ROOT.0].contains_imports {
            return Ok(());
        }

        let mut staged = self.clone();
        staged.merge_imports()?;
        *self = staged;
        Ok(())
    }

    fn merge_imports(&mut self) -> Result<()> {
        let plan = self.plan_merge();
        debug!(
            direct_units = plan.direct_units.len(),
            direct_components = plan.direct_components.len(),
            dependency_units = plan.dependency_units.len(),
            dependency_components = plan.dependency_components.len(),
            "flattening"
        );

        self.check_direct_names(&plan)?;
        let units = self.place_dependency_units(&plan)?;
        self.place_dependency_components(&plan)?;

        for unit in units {
            self.merge_unit(unit)?;
        }
        let components = plan.components();
        for component in components.iter() {
            self.merge_component(*component)?;
        }

        self.write_hierarchy(&plan.edges)?;
        self.write_connections(&components);
        self.remove_imports();
        Ok(())
    }

    fn plan_merge(&self) -> MergePlan {
        let root = &self.sources[ROOT.0];
        let mut plan = MergePlan {
            direct_units: root.imported_units.clone(),
            direct_components: root.imported_components.clone(),
            ..Default::default()
        };

        let mut seen: HashSet<ComponentId> = plan.direct_components.iter().copied().collect();
        let mut queue: VecDeque<ComponentId> = plan.direct_components.iter().copied().collect();
        let mut edges = HashSet::new();
        while let Some(component) = queue.pop_front() {
            for child in self.imported_children(component) {
                if edges.insert((component, child)) {
                    plan.edges.push((component, child));
                }
                if seen.insert(child) {
                    plan.dependency_components.push(child);
                    queue.push_back(child);
                }
            }
        }

        let direct: HashSet<UnitId> = plan.direct_units.iter().copied().collect();
        let mut visited = HashSet::new();
        let mut dependencies = vec![];
        for unit in plan.direct_units.iter() {
            self.collect_unit(*unit, &direct, &mut visited, &mut dependencies);
        }
        for component in plan.components() {
            let component = &self.components[component.0];
            for unit in component.units.iter() {
                self.collect_unit(*unit, &direct, &mut visited, &mut dependencies);
            }
            for var in component.variables.iter() {
                if let UnitRef::User(unit) = self.variables[var.0].units {
                    self.collect_unit(unit, &direct, &mut visited, &mut dependencies);
                }
            }
        }
        plan.dependency_units = dependencies;
        plan
    }

    /// Children of a component in the encapsulation networks of the
    /// documents it passed through on its way into the model.
    fn imported_children(&self, component: ComponentId) -> Vec<ComponentId> {
        let mut children = vec![];
        for source in self.sources.iter().skip(1) {
            if let Some(network) = source.hierarchy.encapsulation() {
                for child in network.children(component) {
                    if !children.contains(child) {
                        children.push(*child);
                    }
                }
            }
        }
        children
    }

    /// Global units are collected after the units they are defined in terms
    /// of; component-local units are walked but travel with their component.
    fn collect_unit(
        &self,
        unit: UnitId,
        direct: &HashSet<UnitId>,
        visited: &mut HashSet<UnitId>,
        out: &mut Vec<UnitId>,
    ) {
        if !visited.insert(unit) {
            return;
        }
        let definition = &self.units[unit.0];
        for dependency in definition.dependencies() {
            self.collect_unit(dependency, direct, visited, out);
        }
        if definition.component.is_none() && definition.source != ROOT && !direct.contains(&unit) {
            out.push(unit);
        }
    }

    /// Direct imports were registered under their aliases while parsing; a
    /// mismatch here means two requests ended up with the same name.
    fn check_direct_names(&self, plan: &MergePlan) -> Result<()> {
        let root = &self.sources[ROOT.0];
        for unit in plan.direct_units.iter() {
            let name = &self.units[unit.0].name;
            if root.units.global(name) != Some(*unit) {
                return logical_err!(
                    DirectImportCollision,
                    format!("imported unit '{name}' collides with another unit")
                );
            }
        }
        for component in plan.direct_components.iter() {
            let name = &self.components[component.0].name;
            if root.components.get(name) != Some(component) {
                return logical_err!(
                    DirectImportCollision,
                    format!("imported component '{name}' collides with another component")
                );
            }
        }
        Ok(())
    }

    /// Settles the names of dependency units.  Returns every unit that has
    /// to be copied into the root document.
    fn place_dependency_units(&mut self, plan: &MergePlan) -> Result<Vec<UnitId>> {
        let mut written = plan.direct_units.clone();

        for unit in plan.dependency_units.iter().copied() {
            let name = self.units[unit.0].name.clone();
            let origin = self.units[unit.0].origin.clone();
            let existing = self.sources[ROOT.0]
                .units
                .global_with_origin(&name)
                .map(|(id, from)| (id, *from == origin));

            match existing {
                None => {
                    self.sources[ROOT.0].units.insert_global(&name, unit, &origin);
                    written.push(unit);
                }
                Some((other, true)) => {
                    debug!(unit = %name, "dependency unit already present");
                    self.retarget_unit(unit, other);
                }
                Some((_, false)) => {
                    let dict = &self.sources[ROOT.0].units;
                    let (new_name, slot) = disambiguate(&name, |candidate| {
                        match dict.global_with_origin(candidate) {
                            Some((_, from)) if *from == origin => Slot::Reusable,
                            Some(_) => Slot::Taken,
                            None if standard_unit(candidate).is_some() => Slot::Taken,
                            None => Slot::Free,
                        }
                    })?;
                    info!(unit = %name, renamed = %new_name, "renaming colliding unit");
                    self.rename_unit(unit, &new_name);

                    let reusable = match slot {
                        Slot::Reusable => self.sources[ROOT.0].units.global(&new_name),
                        _ => None,
                    };
                    match reusable {
                        Some(other) => self.retarget_unit(unit, other),
                        None => {
                            self.sources[ROOT.0]
                                .units
                                .insert_global(&new_name, unit, &origin);
                            written.push(unit);
                        }
                    }
                }
            }
        }

        Ok(written)
    }

    fn place_dependency_components(&mut self, plan: &MergePlan) -> Result<()> {
        for component in plan.dependency_components.iter().copied() {
            let name = self.components[component.0].name.clone();
            let renamed = {
                let taken = &self.sources[ROOT.0].components;
                if taken.contains_key(&name) {
                    let (new_name, _) = disambiguate(&name, |candidate| {
                        if taken.contains_key(candidate) {
                            Slot::Taken
                        } else {
                            Slot::Free
                        }
                    })?;
                    Some(new_name)
                } else {
                    None
                }
            };

            let name = match renamed {
                Some(new_name) => {
                    info!(component = %name, renamed = %new_name, "renaming colliding component");
                    self.rename_component(component, &new_name);
                    new_name
                }
                None => name,
            };
            self.sources[ROOT.0].components.insert(name, component);
        }
        Ok(())
    }

    /// Copies the subtree at `node` of source `src` under `parent` in the
    /// root document.  Prefix declarations of the source model the new
    /// location does not see are repeated on the copy.
    fn copy_into_root(
        &mut self,
        src: SourceId,
        node: NodeId,
        parent: NodeId,
    ) -> (NodeId, HashMap<NodeId, NodeId>) {
        let (head, tail) = self.sources.split_at_mut(1);
        let root = &mut head[0];
        let source = &tail[src.0 - 1];
        let (copy, mapping) = root.document.copy_subtree(&source.document, node);

        let used = used_prefixes(&source.document, node);
        let declarations: Vec<(String, String)> = source
            .document
            .attrs(source.document.root())
            .iter()
            .filter(|(key, _)| {
                key.strip_prefix("xmlns:")
                    .is_some_and(|prefix| used.contains(prefix))
            })
            .filter(|(key, _)| !declared(&root.document, parent, key))
            .cloned()
            .collect();
        for (key, value) in declarations {
            if root.document.attr(copy, &key).is_none() {
                root.document.set_attr(copy, &key, &value);
            }
        }

        root.document.append_child(parent, copy);
        (copy, mapping)
    }

    fn set_meta_field(&mut self, entity: EntityRef, id: &str) {
        let field = match entity {
            EntityRef::Component(c) => &mut self.components[c.0].meta_id,
            EntityRef::Variable(v) => &mut self.variables[v.0].meta_id,
            EntityRef::Unit(u) => &mut self.units[u.0].meta_id,
            EntityRef::Reaction(r) => &mut self.reactions[r.0].meta_id,
            EntityRef::Model(_) => return,
        };
        *field = Some(id.to_owned());
    }

    /// Moves the meta identifier of an entity about to be merged into the
    /// root registry, renaming it on collision, and relocates descriptions
    /// of it that live outside `subtree`.
    fn rewrite_meta_id(&mut self, entity: EntityRef, src: SourceId, subtree: NodeId) -> Result<()> {
        let old = match self.sources[src.0].meta_ids.id_of(entity) {
            Some(id) => id.to_owned(),
            None => return Ok(()),
        };

        let new = {
            let registry = &self.sources[ROOT.0].meta_ids;
            let local = &self.sources[src.0].meta_ids;
            if registry.contains(&old) {
                disambiguate(&old, |candidate| {
                    let foreign = local.get(candidate).is_some_and(|owner| owner != entity);
                    if registry.contains(candidate) || foreign {
                        Slot::Taken
                    } else {
                        Slot::Free
                    }
                })?
                .0
            } else {
                old.clone()
            }
        };

        if new != old {
            info!(meta_id = %old, renamed = %new, "renaming colliding meta id");
            self.sources[src.0].meta_ids.rename(entity, &new)?;
            let node = self.node_of(entity);
            let Source {
                document,
                descriptions,
                ..
            } = &mut self.sources[src.0];
            let key = meta_id_key(document, node).unwrap_or_else(|| META_ID_ATTR.to_owned());
            document.set_attr(node, &key, &new);
            for desc in descriptions.iter_mut().filter(|desc| desc.about == old) {
                set_about(document, desc.node, &new);
                desc.about = new.clone();
            }
            self.set_meta_field(entity, &new);
        }
        self.sources[src.0].meta_ids.remove(entity);
        self.sources[ROOT.0].meta_ids.insert(&new, entity)?;

        let outside: Vec<NodeId> = {
            let source = &self.sources[src.0];
            source
                .descriptions
                .iter()
                .filter(|desc| {
                    desc.about == new && !source.document.is_ancestor(subtree, desc.node)
                })
                .map(|desc| desc.node)
                .collect()
        };
        for desc in outside {
            self.relocate_description(src, desc, &new);
        }
        Ok(())
    }

    /// First top-level metadata block of the root document, created when
    /// there is none.
    fn root_rdf_block(&mut self) -> NodeId {
        let doc = &mut self.sources[ROOT.0].document;
        let root = doc.root();
        if let Some(block) = doc.first_child_named(root, "RDF") {
            return block;
        }
        let declared = doc.attrs(root).iter().any(|(key, _)| key == "xmlns:rdf");
        let block = if declared {
            doc.new_element("rdf:RDF", &[])
        } else {
            doc.new_element("rdf:RDF", &[("xmlns:rdf", RDF_NS)])
        };
        doc.append_child(root, block);
        block
    }

    fn relocate_description(&mut self, src: SourceId, desc: NodeId, about: &str) {
        let block = self.root_rdf_block();
        let (copy, _) = self.copy_into_root(src, desc, block);
        self.sources[ROOT.0].descriptions.push(Description {
            node: copy,
            about: about.to_owned(),
        });
        self.sources[src.0]
            .descriptions
            .retain(|existing| existing.node != desc);
    }

    /// Records descriptions that were copied along with a subtree.
    fn adopt_descriptions(
        &mut self,
        src: SourceId,
        subtree: NodeId,
        mapping: &HashMap<NodeId, NodeId>,
    ) {
        let adopted: Vec<Description> = {
            let source = &self.sources[src.0];
            source
                .descriptions
                .iter()
                .filter(|desc| source.document.is_ancestor(subtree, desc.node))
                .map(|desc| Description {
                    node: remap(mapping, desc.node),
                    about: desc.about.clone(),
                })
                .collect()
        };
        self.sources[ROOT.0].descriptions.extend(adopted);
    }

    fn relocate_unit(&mut self, unit: UnitId, mapping: &HashMap<NodeId, NodeId>) {
        let definition = &mut self.units[unit.0];
        definition.node = remap(mapping, definition.node);
        for term in definition.terms.iter_mut() {
            term.node = remap(mapping, term.node);
        }
        definition.source = ROOT;
        let node = definition.node;
        self.sources[ROOT.0].nodes.insert(node, EntityRef::Unit(unit));
    }

    fn merge_unit(&mut self, unit: UnitId) -> Result<()> {
        let src = self.units[unit.0].source;
        if src == ROOT {
            return Ok(());
        }
        let node = self.units[unit.0].node;
        self.rewrite_meta_id(EntityRef::Unit(unit), src, node)?;
        let parent = self.sources[ROOT.0].document.root();
        let (_, mapping) = self.copy_into_root(src, node, parent);
        self.relocate_unit(unit, &mapping);
        self.adopt_descriptions(src, node, &mapping);
        Ok(())
    }

    fn merge_component(&mut self, component: ComponentId) -> Result<()> {
        let src = self.components[component.0].source;
        if src == ROOT {
            return Ok(());
        }
        let node = self.components[component.0].node;

        let entities: Vec<EntityRef> = {
            let c = &self.components[component.0];
            std::iter::once(EntityRef::Component(component))
                .chain(c.units.iter().map(|u| EntityRef::Unit(*u)))
                .chain(c.variables.iter().map(|v| EntityRef::Variable(*v)))
                .chain(c.reactions.iter().map(|r| EntityRef::Reaction(*r)))
                .collect()
        };
        for entity in entities.iter() {
            self.rewrite_meta_id(*entity, src, node)?;
        }

        let parent = self.sources[ROOT.0].document.root();
        let (_, mapping) = self.copy_into_root(src, node, parent);

        let c = &mut self.components[component.0];
        c.node = remap(&mapping, c.node);
        for math in c.math.iter_mut() {
            *math = remap(&mapping, *math);
        }
        c.source = ROOT;
        let (units, variables, reactions) =
            (c.units.clone(), c.variables.clone(), c.reactions.clone());
        let component_node = c.node;
        self.sources[ROOT.0]
            .nodes
            .insert(component_node, EntityRef::Component(component));

        for unit in units {
            self.relocate_unit(unit, &mapping);
        }
        for var in variables {
            let v = &mut self.variables[var.0];
            v.node = remap(&mapping, v.node);
            let var_node = v.node;
            self.sources[ROOT.0].nodes.insert(var_node, EntityRef::Variable(var));
        }
        for reaction in reactions {
            let r = &mut self.reactions[reaction.0];
            r.node = remap(&mapping, r.node);
            for substance in r.substances.iter_mut() {
                substance.node = remap(&mapping, substance.node);
                for role in substance.roles.iter_mut() {
                    role.node = remap(&mapping, role.node);
                    for math in role.math.iter_mut() {
                        *math = remap(&mapping, *math);
                    }
                }
            }
            let reaction_node = r.node;
            self.sources[ROOT.0]
                .nodes
                .insert(reaction_node, EntityRef::Reaction(reaction));
        }

        self.adopt_descriptions(src, node, &mapping);
        let (head, tail) = self.sources.split_at_mut(1);
        head[0].units.adopt_local(&mut tail[src.0 - 1].units, component);
        Ok(())
    }

    /// Writes group statements for encapsulation edges the root document
    /// does not already declare.
    fn write_hierarchy(&mut self, edges: &[(ComponentId, ComponentId)]) -> Result<()> {
        let mut by_parent: Vec<(ComponentId, Vec<ComponentId>)> = vec![];
        for (parent, child) in edges.iter().copied() {
            match by_parent.iter_mut().find(|(p, _)| *p == parent) {
                Some((_, children)) => children.push(child),
                None => by_parent.push((parent, vec![child])),
            }
        }

        for (parent, children) in by_parent {
            let missing: Vec<ComponentId> = {
                let network = self.sources[ROOT.0].hierarchy.encapsulation();
                children
                    .into_iter()
                    .filter(|child| network.and_then(|n| n.parent(*child)) != Some(parent))
                    .collect()
            };
            if missing.is_empty() {
                continue;
            }

            let parent_name = self.components[parent.0].name.clone();
            let child_names: Vec<String> = missing
                .iter()
                .map(|child| self.components[child.0].name.clone())
                .collect();

            let doc = &mut self.sources[ROOT.0].document;
            let root = doc.root();
            let prefix = doc.prefix(root).to_owned();
            let group = doc.new_element(&format!("{prefix}group"), &[]);
            let relationship = doc.new_element(
                &format!("{prefix}relationship_ref"),
                &[("relationship", ENCAPSULATION)],
            );
            doc.append_child(group, relationship);
            let parent_ref = doc.new_element(
                &format!("{prefix}component_ref"),
                &[("component", parent_name.as_str())],
            );
            doc.append_child(group, parent_ref);
            for name in child_names.iter() {
                let child_ref = doc.new_element(
                    &format!("{prefix}component_ref"),
                    &[("component", name.as_str())],
                );
                doc.append_child(parent_ref, child_ref);
            }
            doc.append_child(root, group);

            debug!(parent = %parent_name, children = ?child_names, "wrote group");
            let network = self.sources[ROOT.0].hierarchy.encapsulation_mut();
            for child in missing {
                network.connect(parent, child)?;
            }
        }
        Ok(())
    }

    /// Writes connection statements for merged component pairs whose
    /// variables are linked but that no statement of the root covers.
    fn write_connections(&mut self, components: &[ComponentId]) {
        for (i, a) in components.iter().copied().enumerate() {
            for b in components.iter().skip(i + 1).copied() {
                if self.sources[ROOT.0]
                    .connections
                    .iter()
                    .any(|conn| conn.covers(a, b))
                {
                    continue;
                }

                let mut pairs = vec![];
                for var in self.components[a.0].variables.iter().copied() {
                    let v = &self.variables[var.0];
                    for other in v.private_links.iter().chain(v.public_links.iter()).copied() {
                        let into_b = self.variables[other.0].component == b;
                        if into_b && !pairs.contains(&(var, other)) {
                            pairs.push((var, other));
                        }
                    }
                }
                if pairs.is_empty() {
                    continue;
                }

                let names: Vec<(String, String)> = pairs
                    .iter()
                    .map(|(v1, v2)| {
                        (
                            self.variables[v1.0].name.clone(),
                            self.variables[v2.0].name.clone(),
                        )
                    })
                    .collect();
                let name_a = self.components[a.0].name.clone();
                let name_b = self.components[b.0].name.clone();

                let doc = &mut self.sources[ROOT.0].document;
                let root = doc.root();
                let prefix = doc.prefix(root).to_owned();
                let connection = doc.new_element(&format!("{prefix}connection"), &[]);
                let map = doc.new_element(
                    &format!("{prefix}map_components"),
                    &[
                        ("component_1", name_a.as_str()),
                        ("component_2", name_b.as_str()),
                    ],
                );
                doc.append_child(connection, map);
                for (v1, v2) in names.iter() {
                    let pair = doc.new_element(
                        &format!("{prefix}map_variables"),
                        &[("variable_1", v1.as_str()), ("variable_2", v2.as_str())],
                    );
                    doc.append_child(connection, pair);
                }
                doc.append_child(root, connection);

                debug!(component_1 = %name_a, component_2 = %name_b, "wrote connection");
                self.sources[ROOT.0].connections.push(ConnectedComponents {
                    component_1: a,
                    component_2: b,
                    node: connection,
                });
            }
        }
    }

    fn remove_imports(&mut self) {
        let root = &mut self.sources[ROOT.0];
        for import in std::mem::take(&mut root.imports) {
            root.document.detach(import);
        }
        root.imported_units.clear();
        root.imported_components.clear();
        root.contains_imports = false;
    }
}
