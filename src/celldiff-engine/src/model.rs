// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The parsed form of a model document.
//!
//! Every document taking part in a model (the root document and everything
//! pulled in through imports) is a [`Source`]; all entities of all sources
//! share one arena owned by [`Model`] and refer to each other through ids.
//! Entities always live in the document of the source named by their
//! `source` field, so a node id is only meaningful together with that.

use std::collections::{BTreeMap, HashMap, HashSet};

use smallvec::SmallVec;
use tracing::debug;
use url::Url;

use celldiff_core::common::{ErrorCode, Result};
use celldiff_core::{consistency_err, logical_err, parse_err};

use crate::connection::ConnectedComponents;
use crate::hierarchy::Hierarchy;
use crate::import::{MemoryResolver, Resolver};
use crate::meta::{Description, EntityRef, MetaIdRegistry, collect_descriptions, meta_id_attr};
use crate::reaction::{Reaction, ReactionId, read_reaction};
use crate::units::{Unit, UnitDictionary, UnitId, UnitRef, read_unit};
use crate::variable::{InitialValue, Variable, VariableId, read_variable};
use crate::xml::{Document, NodeId};

/// Base location of documents parsed from memory.
pub const MEMORY_BASE: &str = "memory:/model.cellml";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) usize);

/// The document the model was parsed from.
pub const ROOT: SourceId = SourceId(0);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) usize);

#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub name: String,
    pub source: SourceId,
    pub origin: Url,
    pub node: NodeId,
    pub variables: Vec<VariableId>,
    pub reactions: Vec<ReactionId>,
    pub math: SmallVec<[NodeId; 2]>,
    /// component-local units
    pub units: Vec<UnitId>,
    pub meta_id: Option<String>,
}

/// One document and the names it makes visible.
#[derive(Clone, Debug)]
pub struct Source {
    pub(crate) location: Url,
    pub(crate) name: Option<String>,
    pub(crate) document: Document,
    pub(crate) units: UnitDictionary,
    pub(crate) components: BTreeMap<String, ComponentId>,
    pub(crate) hierarchy: Hierarchy,
    pub(crate) connections: Vec<ConnectedComponents>,
    pub(crate) imports: Vec<NodeId>,
    pub(crate) imported_units: Vec<UnitId>,
    pub(crate) imported_components: Vec<ComponentId>,
    pub(crate) contains_imports: bool,
    pub(crate) meta_ids: MetaIdRegistry,
    pub(crate) descriptions: Vec<Description>,
    pub(crate) nodes: HashMap<NodeId, EntityRef>,
}

impl Source {
    fn new(location: Url) -> Self {
        Source {
            location,
            name: None,
            document: Document::default(),
            units: UnitDictionary::default(),
            components: BTreeMap::new(),
            hierarchy: Hierarchy::default(),
            connections: vec![],
            imports: vec![],
            imported_units: vec![],
            imported_components: vec![],
            contains_imports: false,
            meta_ids: MetaIdRegistry::default(),
            descriptions: vec![],
            nodes: HashMap::new(),
        }
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn units(&self) -> &UnitDictionary {
        &self.units
    }

    /// Components visible in this document by name, imported ones under
    /// their alias.
    pub fn components(&self) -> &BTreeMap<String, ComponentId> {
        &self.components
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn connections(&self) -> &[ConnectedComponents] {
        &self.connections
    }

    pub fn imported_units(&self) -> &[UnitId] {
        &self.imported_units
    }

    pub fn imported_components(&self) -> &[ComponentId] {
        &self.imported_components
    }

    pub fn contains_imports(&self) -> bool {
        self.contains_imports
    }

    pub fn meta_ids(&self) -> &MetaIdRegistry {
        &self.meta_ids
    }

    pub fn descriptions(&self) -> &[Description] {
        &self.descriptions
    }
}

/// State carried through one (possibly nested) load.
pub(crate) struct Loader<'a> {
    pub resolver: &'a dyn Resolver,
    /// locations currently being loaded, outermost first
    pub chain: Vec<Url>,
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    pub(crate) sources: Vec<Source>,
    pub(crate) components: Vec<Component>,
    pub(crate) variables: Vec<Variable>,
    pub(crate) units: Vec<Unit>,
    pub(crate) reactions: Vec<Reaction>,
}

impl Model {
    /// Parses a document located at `location`, fetching imports through
    /// `resolver`.
    pub fn parse(bytes: &[u8], location: Url, resolver: &dyn Resolver) -> Result<Model> {
        let document = Document::from_bytes(bytes)?;
        let mut model = Model::default();
        let mut loader = Loader {
            resolver,
            chain: vec![],
        };
        model.load_source(document, location, &mut loader)?;
        Ok(model)
    }

    /// Parses a self-contained document; any import fails to resolve.
    pub fn parse_str(text: &str) -> Result<Model> {
        let location = Url::parse(MEMORY_BASE).map_err(|err| {
            celldiff_core::Error::new(
                celldiff_core::ErrorKind::Import,
                ErrorCode::BadHref,
                Some(err.to_string()),
            )
        })?;
        Model::parse(text.as_bytes(), location, &MemoryResolver::default())
    }

    pub(crate) fn load_source(
        &mut self,
        document: Document,
        location: Url,
        loader: &mut Loader,
    ) -> Result<SourceId> {
        let id = SourceId(self.sources.len());
        self.sources.push(Source::new(location.clone()));
        loader.chain.push(location);
        let result = self.read_source(id, &document, loader);
        loader.chain.pop();
        self.sources[id.0].document = document;
        result.map(|_| id)
    }

    fn read_source(&mut self, s: SourceId, doc: &Document, loader: &mut Loader) -> Result<()> {
        let root = doc.root();
        if doc.local_name(root) != Some("model") {
            return parse_err!(
                NotAModel,
                format!(
                    "root element of {} is <{}>, expected <model>",
                    self.sources[s.0].location,
                    doc.tag(root).unwrap_or_default()
                )
            );
        }
        self.sources[s.0].name = doc.attr(root, "name").map(str::to_owned);
        self.register(s, doc, root, EntityRef::Model(s))?;

        // imported entities must be visible before anything native is read
        for import in doc.children_named(root, "import") {
            self.read_import(s, doc, import, loader)?;
            let source = &mut self.sources[s.0];
            source.imports.push(import);
            source.contains_imports = true;
        }

        let units = doc.children_named(root, "units");
        self.read_units(s, doc, &units, None)?;

        for node in doc.children_named(root, "component") {
            self.read_component(s, doc, node)?;
        }

        for node in doc.children_named(root, "group") {
            let Source {
                hierarchy,
                components,
                ..
            } = &mut self.sources[s.0];
            hierarchy.read_group(doc, node, |name| components.get(name).copied())?;
        }

        for node in doc.children_named(root, "connection") {
            self.read_connection(s, doc, node)?;
        }

        self.sources[s.0].descriptions = collect_descriptions(doc);

        let source = &self.sources[s.0];
        debug!(
            location = %source.location,
            components = source.components.len(),
            imports = source.imports.len(),
            "read model document"
        );
        Ok(())
    }

    fn register(
        &mut self,
        s: SourceId,
        doc: &Document,
        node: NodeId,
        entity: EntityRef,
    ) -> Result<()> {
        let source = &mut self.sources[s.0];
        source.nodes.insert(node, entity);
        if let Some(id) = meta_id_attr(doc, node) {
            source.meta_ids.insert(id, entity)?;
        }
        Ok(())
    }

    /// Reads unit definitions in rounds until every one resolves; a round
    /// without progress means the leftovers reference undefined (or
    /// cyclically defined) units.
    fn read_units(
        &mut self,
        s: SourceId,
        doc: &Document,
        nodes: &[NodeId],
        component: Option<ComponentId>,
    ) -> Result<Vec<UnitId>> {
        let origin = self.sources[s.0].location.clone();
        let mut added = vec![];
        let mut pending = nodes.to_vec();

        while !pending.is_empty() {
            let mut deferred = vec![];
            let mut problems = vec![];
            for node in pending.iter().copied() {
                match read_unit(doc, node, &self.sources[s.0].units, component, s, &origin) {
                    Ok(unit) => {
                        let id = UnitId(self.units.len());
                        self.sources[s.0]
                            .units
                            .define(component, &unit.name, id, &origin, false)?;
                        self.units.push(unit);
                        self.register(s, doc, node, EntityRef::Unit(id))?;
                        added.push(id);
                    }
                    Err(err) if err.code == ErrorCode::UnitNotFound => {
                        deferred.push(node);
                        problems.push(err.details.unwrap_or_default());
                    }
                    Err(err) => return Err(err),
                }
            }

            if deferred.len() == pending.len() {
                return consistency_err!(UnresolvedUnits, problems.join("; "));
            }
            if !deferred.is_empty() {
                debug!(count = deferred.len(), "deferring unit definitions to next round");
            }
            pending = deferred;
        }

        Ok(added)
    }

    fn read_component(&mut self, s: SourceId, doc: &Document, node: NodeId) -> Result<ComponentId> {
        let name = doc.required_attr(node, "name")?.to_owned();
        if self.sources[s.0].components.contains_key(&name) {
            return consistency_err!(
                DuplicateComponent,
                format!("component '{}' is defined twice in {}", name, self.sources[s.0].location)
            );
        }

        let id = ComponentId(self.components.len());
        self.components.push(Component {
            name: name.clone(),
            source: s,
            origin: self.sources[s.0].location.clone(),
            node,
            variables: vec![],
            reactions: vec![],
            math: doc.children_named(node, "math").into_iter().collect(),
            units: vec![],
            meta_id: meta_id_attr(doc, node).map(str::to_owned),
        });
        self.sources[s.0].components.insert(name.clone(), id);
        self.register(s, doc, node, EntityRef::Component(id))?;

        let local = doc.children_named(node, "units");
        let local = self.read_units(s, doc, &local, Some(id))?;
        self.components[id.0].units = local;

        let mut names = HashSet::new();
        let mut references = vec![];
        for var_node in doc.children_named(node, "variable") {
            let draft = read_variable(doc, var_node, &self.sources[s.0].units, id)?;
            if !names.insert(draft.variable.name.clone()) {
                return consistency_err!(
                    DuplicateVariable,
                    format!(
                        "variable '{}' is defined twice in component '{}'",
                        draft.variable.name, name
                    )
                );
            }
            let var = VariableId(self.variables.len());
            self.variables.push(draft.variable);
            self.components[id.0].variables.push(var);
            self.register(s, doc, var_node, EntityRef::Variable(var))?;
            if let Some(reference) = draft.initial_reference {
                references.push((var, reference));
            }
        }

        for (var, reference) in references {
            match self.variable_named(id, &reference) {
                Some(sibling) => {
                    self.variables[var.0].initial_value = Some(InitialValue::Variable(sibling))
                }
                None => {
                    return consistency_err!(
                        VariableNotFound,
                        format!(
                            "initial value '{}' of '{}' is neither a number nor a variable of '{}'",
                            reference, self.variables[var.0].name, name
                        )
                    );
                }
            }
        }

        for reaction_node in doc.children_named(node, "reaction") {
            let reaction = read_reaction(doc, reaction_node, id, |n| self.variable_named(id, n))?;
            let reaction_id = ReactionId(self.reactions.len());
            self.reactions.push(reaction);
            self.components[id.0].reactions.push(reaction_id);
            self.register(s, doc, reaction_node, EntityRef::Reaction(reaction_id))?;
        }

        Ok(id)
    }

    pub fn name(&self) -> Option<&str> {
        self.root().name()
    }

    pub fn root(&self) -> &Source {
        &self.sources[ROOT.0]
    }

    pub fn source(&self, id: SourceId) -> &Source {
        &self.sources[id.0]
    }

    pub fn sources(&self) -> impl Iterator<Item = (SourceId, &Source)> {
        self.sources
            .iter()
            .enumerate()
            .map(|(i, source)| (SourceId(i), source))
    }

    /// The root document; after [`Model::flatten`] it is self-contained.
    pub fn document(&self) -> &Document {
        &self.root().document
    }

    pub fn to_xml(&self) -> Result<String> {
        self.document().to_xml()
    }

    pub fn component(&self, id: ComponentId) -> &Component {
        &self.components[id.0]
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0]
    }

    pub fn unit(&self, id: UnitId) -> &Unit {
        &self.units[id.0]
    }

    pub fn reaction(&self, id: ReactionId) -> &Reaction {
        &self.reactions[id.0]
    }

    /// Components visible in the root document, by name.
    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &Component)> {
        self.root()
            .components
            .values()
            .map(|id| (*id, &self.components[id.0]))
    }

    pub fn component_named(&self, name: &str) -> Option<ComponentId> {
        self.root().components.get(name).copied()
    }

    pub fn variable_named(&self, component: ComponentId, name: &str) -> Option<VariableId> {
        self.components[component.0]
            .variables
            .iter()
            .copied()
            .find(|var| self.variables[var.0].name == name)
    }

    /// Resolves a unit name in the root document's scope.
    pub fn resolve_unit(&self, name: &str, component: Option<ComponentId>) -> Option<UnitRef> {
        self.root().units.resolve(name, component)
    }

    pub fn unit_name(&self, unit: UnitRef) -> &str {
        match unit {
            UnitRef::Standard(name) => name,
            UnitRef::User(id) => &self.units[id.0].name,
        }
    }

    /// Follows "in" links until reaching the variable that provides the
    /// value.
    pub fn root_variable(&self, var: VariableId) -> Result<VariableId> {
        let mut cur = var;
        let mut steps = 0;
        while let Some(next) = self.variables[cur.0].input() {
            steps += 1;
            if steps > self.variables.len() {
                return logical_err!(
                    CyclicConnection,
                    format!("variable '{}' is connected in a cycle", self.variables[var.0].name)
                );
            }
            cur = next;
        }
        Ok(cur)
    }

    pub fn entity_by_meta_id(&self, id: &str) -> Option<EntityRef> {
        self.root().meta_ids.get(id)
    }

    /// The entity a node of the root document stands for.
    pub fn entity_for_node(&self, node: NodeId) -> Option<EntityRef> {
        self.root().nodes.get(&node).copied()
    }

    /// Node of an entity in the document of the source holding it.
    pub fn node_of(&self, entity: EntityRef) -> NodeId {
        match entity {
            EntityRef::Model(s) => self.sources[s.0].document.root(),
            EntityRef::Component(id) => self.components[id.0].node,
            EntityRef::Variable(id) => self.variables[id.0].node,
            EntityRef::Unit(id) => self.units[id.0].node,
            EntityRef::Reaction(id) => self.reactions[id.0].node,
        }
    }

    /// Source currently holding an entity.
    pub fn source_of(&self, entity: EntityRef) -> SourceId {
        match entity {
            EntityRef::Model(s) => s,
            EntityRef::Component(id) => self.components[id.0].source,
            EntityRef::Variable(id) => self.components[self.variables[id.0].component.0].source,
            EntityRef::Unit(id) => self.units[id.0].source,
            EntityRef::Reaction(id) => self.components[self.reactions[id.0].component.0].source,
        }
    }

    /// Renames a unit and every `units` attribute referring to it.
    pub(crate) fn rename_unit(&mut self, id: UnitId, new_name: &str) {
        let source = self.units[id.0].source;
        let node = self.units[id.0].node;
        self.units[id.0].name = new_name.to_owned();
        self.sources[source.0].document.set_attr(node, "name", new_name);

        let target = UnitRef::User(id);
        for var in self.variables.iter() {
            if var.units == target {
                let source = self.components[var.component.0].source;
                self.sources[source.0]
                    .document
                    .set_attr(var.node, "units", new_name);
            }
        }
        for unit in self.units.iter() {
            for term in unit.terms.iter().filter(|term| term.unit == target) {
                self.sources[unit.source.0]
                    .document
                    .set_attr(term.node, "units", new_name);
            }
        }
    }

    /// Points every reference to `from` at `to`, a unit of the same name.
    pub(crate) fn retarget_unit(&mut self, from: UnitId, to: UnitId) {
        let (from, to) = (UnitRef::User(from), UnitRef::User(to));
        for var in self.variables.iter_mut() {
            if var.units == from {
                var.units = to;
            }
        }
        for unit in self.units.iter_mut() {
            for term in unit.terms.iter_mut() {
                if term.unit == from {
                    term.unit = to;
                }
            }
        }
    }

    pub(crate) fn rename_component(&mut self, id: ComponentId, new_name: &str) {
        let component = &mut self.components[id.0];
        component.name = new_name.to_owned();
        let (source, node) = (component.source, component.node);
        self.sources[source.0]
            .document
            .set_attr(node, "name", new_name);
    }
}
