// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};
use url::Url;

use celldiff_core::common::{Error, ErrorCode, ErrorKind, Result};
use celldiff_core::{consistency_err, import_err, parse_err};

use crate::meta::EntityRef;
use crate::model::{ComponentId, Loader, Model, SourceId};
use crate::units::{Defined, UnitRef};
use crate::xml::{Document, NodeId, local_name};

/// Fetches the bytes of referenced documents.
pub trait Resolver {
    fn fetch(&self, location: &Url) -> Result<Vec<u8>>;
}

/// Reads `file:` URLs from the local filesystem.
#[derive(Copy, Clone, Debug, Default)]
pub struct FileResolver;

impl Resolver for FileResolver {
    fn fetch(&self, location: &Url) -> Result<Vec<u8>> {
        if location.scheme() != "file" {
            return import_err!(
                FetchFailed,
                format!("cannot fetch {location}: only file URLs are supported")
            );
        }
        let path = match location.to_file_path() {
            Ok(path) => path,
            Err(()) => return import_err!(BadHref, format!("{location} is not a local path")),
        };
        std::fs::read(&path).map_err(|err| {
            Error::new(
                ErrorKind::Import,
                ErrorCode::FetchFailed,
                Some(format!("{}: {}", path.display(), err)),
            )
        })
    }
}

/// Serves documents registered up front, keyed by absolute location.
#[derive(Clone, Debug, Default)]
pub struct MemoryResolver {
    documents: HashMap<Url, Vec<u8>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: &str, contents: impl Into<Vec<u8>>) -> Result<()> {
        let location = Url::parse(location).map_err(|err| {
            Error::new(
                ErrorKind::Import,
                ErrorCode::BadHref,
                Some(format!("{location}: {err}")),
            )
        })?;
        self.documents.insert(location, contents.into());
        Ok(())
    }
}

impl Resolver for MemoryResolver {
    fn fetch(&self, location: &Url) -> Result<Vec<u8>> {
        match self.documents.get(location) {
            Some(bytes) => Ok(bytes.clone()),
            None => import_err!(FetchFailed, format!("no document at {location}")),
        }
    }
}

fn href_of(doc: &Document, node: NodeId) -> Option<&str> {
    doc.attrs(node)
        .iter()
        .find(|(key, _)| local_name(key) == "href")
        .map(|(_, value)| value.as_str())
        .filter(|href| !href.trim().is_empty())
}

impl Model {
    /// Processes one `<import>` statement of source `s`.  Whatever fails is
    /// reported wrapped with the statement's href.
    pub(crate) fn read_import(
        &mut self,
        s: SourceId,
        doc: &Document,
        node: NodeId,
        loader: &mut Loader,
    ) -> Result<()> {
        let href = match href_of(doc, node) {
            Some(href) => href,
            None => {
                return parse_err!(
                    MissingAttribute,
                    format!("{} has no xlink:href", doc.path(node))
                );
            }
        };
        self.import_statement(s, doc, node, href, loader)
            .map_err(|err| Error::import(href, err))
    }

    fn import_statement(
        &mut self,
        s: SourceId,
        doc: &Document,
        node: NodeId,
        href: &str,
        loader: &mut Loader,
    ) -> Result<()> {
        let location = self.sources[s.0].location.join(href.trim()).map_err(|err| {
            Error::new(
                ErrorKind::Import,
                ErrorCode::BadHref,
                Some(format!("{href}: {err}")),
            )
        })?;
        if loader.chain.contains(&location) {
            return import_err!(
                CyclicImport,
                format!("{location} imports itself through {href}")
            );
        }

        info!(%location, "importing");
        let bytes = loader.resolver.fetch(&location)?;
        let document = Document::from_bytes(&bytes)?;
        let t = self.load_source(document, location, loader)?;

        let mut seen = HashSet::new();

        for unit_node in doc.children_named(node, "units") {
            let alias = doc.required_attr(unit_node, "name")?;
            let target = doc.required_attr(unit_node, "units_ref")?;
            let unit = match self.sources[t.0].units.resolve(target, None) {
                Some(UnitRef::User(id)) => id,
                Some(UnitRef::Standard(_)) => {
                    return consistency_err!(
                        BaseUnitImport,
                        format!("'{target}' is a standard unit and cannot be imported")
                    );
                }
                None => {
                    return consistency_err!(
                        UnitNotFound,
                        format!("{href} defines no unit '{target}'")
                    );
                }
            };
            if !seen.insert(EntityRef::Unit(unit)) {
                return import_err!(
                    DoubleImport,
                    format!("unit '{target}' is imported twice from {href}")
                );
            }

            self.rename_unit(unit, alias);
            let origin = self.units[unit.0].origin.clone();
            match self.sources[s.0].units.define(None, alias, unit, &origin, true)? {
                Defined::Added => self.sources[s.0].imported_units.push(unit),
                Defined::AlreadyPresent(_) => {
                    debug!(alias, %origin, "unit already imported from the same document")
                }
            }
        }

        let mut requested = vec![];
        for comp_node in doc.children_named(node, "component") {
            let alias = doc.required_attr(comp_node, "name")?;
            let target = doc.required_attr(comp_node, "component_ref")?;
            let component = match self.sources[t.0].components.get(target) {
                Some(id) => *id,
                None => {
                    return consistency_err!(
                        ComponentNotFound,
                        format!("{href} defines no component '{target}'")
                    );
                }
            };
            if !seen.insert(EntityRef::Component(component)) {
                return import_err!(
                    DoubleImport,
                    format!("component '{target}' is imported twice from {href}")
                );
            }
            if self.sources[s.0].components.contains_key(alias) {
                return consistency_err!(
                    DuplicateComponent,
                    format!("imported component '{alias}' collides with an existing component")
                );
            }

            self.rename_component(component, alias);
            let source = &mut self.sources[s.0];
            source.components.insert(alias.to_owned(), component);
            source.imported_components.push(component);
            requested.push(component);
        }

        self.drop_foreign_public_links(&requested);
        Ok(())
    }

    /// Public connections of imported components may only lead to other
    /// components imported by the same statement; the rest of the source
    /// document is not part of the importing model.
    fn drop_foreign_public_links(&mut self, requested: &[ComponentId]) {
        let keep: HashSet<ComponentId> = requested.iter().copied().collect();
        for component in requested {
            for var in self.components[component.0].variables.clone() {
                let (kept, dropped): (Vec<_>, Vec<_>) = self.variables[var.0]
                    .public_links
                    .iter()
                    .copied()
                    .partition(|other| keep.contains(&self.variables[other.0].component));
                if dropped.is_empty() {
                    continue;
                }
                self.variables[var.0].public_links = kept;
                for other in dropped {
                    self.variables[other.0].public_links.retain(|v| *v != var);
                }
            }
        }
    }
}
