// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use celldiff_core::common::Result;
use celldiff_core::consistency_err;

use crate::model::{ComponentId, SourceId};
use crate::reaction::ReactionId;
use crate::units::UnitId;
use crate::variable::VariableId;
use crate::xml::{Document, NodeId, local_name};

pub const META_ID_ATTR: &str = "cmeta:id";
pub const META_NS: &str = "http://www.cellml.org/metadata/1.0#";
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// Anything a node or a meta identifier can stand for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Model(SourceId),
    Component(ComponentId),
    Variable(VariableId),
    Unit(UnitId),
    Reaction(ReactionId),
}

/// Bijection between meta identifiers and the entities carrying them.
/// Both directions are only ever changed together.
#[derive(Clone, Debug, Default)]
pub struct MetaIdRegistry {
    by_id: HashMap<String, EntityRef>,
    by_entity: HashMap<EntityRef, String>,
}

impl MetaIdRegistry {
    pub fn insert(&mut self, id: &str, entity: EntityRef) -> Result<()> {
        if let Some(existing) = self.by_id.get(id) {
            return consistency_err!(
                DuplicateMetaId,
                format!("meta id '{id}' is used by both {existing:?} and {entity:?}")
            );
        }
        if let Some(old) = self.by_entity.get(&entity) {
            return consistency_err!(
                DuplicateMetaId,
                format!("{entity:?} already carries meta id '{old}'")
            );
        }
        self.by_id.insert(id.to_owned(), entity);
        self.by_entity.insert(entity, id.to_owned());
        Ok(())
    }

    pub fn remove(&mut self, entity: EntityRef) -> Option<String> {
        let id = self.by_entity.remove(&entity)?;
        self.by_id.remove(&id);
        Some(id)
    }

    /// Gives `entity` the identifier `new`; fails without changing anything
    /// if `new` belongs to another entity.
    pub fn rename(&mut self, entity: EntityRef, new: &str) -> Result<()> {
        match self.by_id.get(new) {
            Some(owner) if *owner == entity => return Ok(()),
            Some(owner) => {
                return consistency_err!(
                    DuplicateMetaId,
                    format!("meta id '{new}' already belongs to {owner:?}")
                );
            }
            None => {}
        }
        self.remove(entity);
        self.by_id.insert(new.to_owned(), entity);
        self.by_entity.insert(entity, new.to_owned());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<EntityRef> {
        self.by_id.get(id).copied()
    }

    pub fn id_of(&self, entity: EntityRef) -> Option<&str> {
        self.by_entity.get(&entity).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, EntityRef)> {
        self.by_id.iter().map(|(id, entity)| (id.as_str(), *entity))
    }
}

/// An `rdf:Description` and the meta identifier it is about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Description {
    pub node: NodeId,
    /// target without the leading '#'
    pub about: String,
}

pub fn about_target(about: &str) -> &str {
    about.strip_prefix('#').unwrap_or(about)
}

/// The `about` attribute of a description whatever prefix rdf is bound to.
pub(crate) fn about_attr(doc: &Document, node: NodeId) -> Option<&str> {
    doc.attrs(node)
        .iter()
        .find(|(key, _)| local_name(key) == "about")
        .map(|(_, value)| value.as_str())
}

pub(crate) fn set_about(doc: &mut Document, node: NodeId, target: &str) {
    let key = doc
        .attrs(node)
        .iter()
        .find(|(key, _)| local_name(key) == "about")
        .map(|(key, _)| key.clone());
    let value = match about_attr(doc, node) {
        Some(old) if old.starts_with('#') => format!("#{target}"),
        _ => target.to_owned(),
    };
    if let Some(key) = key {
        doc.set_attr(node, &key, &value);
    }
}

/// The namespace `prefix` is bound to at `node`.
fn namespace_of<'a>(doc: &'a Document, node: NodeId, prefix: &str) -> Option<&'a str> {
    let key = format!("xmlns:{prefix}");
    let mut cur = Some(node);
    while let Some(id) = cur {
        if let Some(ns) = doc.attr(id, &key) {
            return Some(ns);
        }
        cur = doc.parent(id);
    }
    None
}

/// Key of the meta identifier attribute on `node`: `id` in the metadata
/// namespace under whichever prefix binds it.  An unbound `cmeta` prefix
/// is accepted too.
pub(crate) fn meta_id_key(doc: &Document, node: NodeId) -> Option<String> {
    doc.attrs(node)
        .iter()
        .find(|(key, _)| match key.split_once(':') {
            Some((prefix, "id")) if prefix != "xmlns" => match namespace_of(doc, node, prefix) {
                Some(ns) => ns == META_NS,
                None => prefix == "cmeta",
            },
            _ => false,
        })
        .map(|(key, _)| key.clone())
}

pub(crate) fn meta_id_attr(doc: &Document, node: NodeId) -> Option<&str> {
    let key = meta_id_key(doc, node)?;
    doc.attr(node, &key)
}

/// Every description inside an `RDF` block anywhere in `doc`.
pub(crate) fn collect_descriptions(doc: &Document) -> Vec<Description> {
    let mut out = vec![];
    for node in doc.descendants(doc.root()) {
        if doc.local_name(node) != Some("RDF") {
            continue;
        }
        for desc in doc.children_named(node, "Description") {
            if let Some(about) = about_attr(doc, desc) {
                out.push(Description {
                    node: desc,
                    about: about_target(about).to_owned(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use celldiff_core::ErrorCode;
    use proptest::prelude::*;

    #[test]
    fn test_registry() {
        let mut reg = MetaIdRegistry::default();
        let c = EntityRef::Component(ComponentId(0));
        let v = EntityRef::Variable(VariableId(0));
        reg.insert("c1", c).unwrap();
        reg.insert("v1", v).unwrap();

        assert_eq!(
            ErrorCode::DuplicateMetaId,
            reg.insert("c1", v).unwrap_err().code
        );
        assert_eq!(Some(c), reg.get("c1"));

        assert!(reg.rename(c, "v1").is_err());
        assert_eq!(Some("c1"), reg.id_of(c));

        reg.rename(c, "c2").unwrap();
        assert!(!reg.contains("c1"));
        assert_eq!(Some(c), reg.get("c2"));
        assert_eq!(Some("c2".to_owned()), reg.remove(c));
        assert_eq!(1, reg.len());
    }

    #[test]
    fn test_meta_id_under_any_prefix() {
        let doc = Document::parse(
            r#"<model xmlns:md="http://www.cellml.org/metadata/1.0#" xmlns:other="urn:x">
              <component name="a" md:id="a1"/>
              <component name="b" other:id="b1"/>
              <component name="c" cmeta:id="c1"/>
              <component name="d" id="d1"/>
            </model>"#,
        )
        .unwrap();
        let ids: Vec<Option<&str>> = doc
            .children_named(doc.root(), "component")
            .into_iter()
            .map(|node| meta_id_attr(&doc, node))
            .collect();
        assert_eq!(vec![Some("a1"), None, Some("c1"), None], ids);
    }

    #[test]
    fn test_descriptions() {
        let doc = Document::parse(
            r##"<model xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
              <rdf:RDF>
                <rdf:Description rdf:about="#m1"/>
                <rdf:Description rdf:about="c1"/>
                <rdf:Description/>
              </rdf:RDF>
              <component name="a"><RDF><Description about="#v1"/></RDF></component>
            </model>"##,
        )
        .unwrap();
        let abouts: Vec<String> = collect_descriptions(&doc)
            .into_iter()
            .map(|d| d.about)
            .collect();
        assert_eq!(vec!["m1", "c1", "v1"], abouts);
    }

    #[test]
    fn test_set_about_keeps_style() {
        let mut doc = Document::parse(
            r##"<rdf:RDF xmlns:rdf="x"><rdf:Description rdf:about="#a"/><rdf:Description rdf:about="b"/></rdf:RDF>"##,
        )
        .unwrap();
        let descs = collect_descriptions(&doc);
        set_about(&mut doc, descs[0].node, "a_imported");
        set_about(&mut doc, descs[1].node, "b_imported");
        assert_eq!(Some("#a_imported"), about_attr(&doc, descs[0].node));
        assert_eq!(Some("b_imported"), about_attr(&doc, descs[1].node));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Insert(u8, usize),
        Remove(usize),
        Rename(usize, u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12, 0usize..6).prop_map(|(id, e)| Op::Insert(id, e)),
            (0usize..6).prop_map(Op::Remove),
            (0usize..6, 0u8..12).prop_map(|(e, id)| Op::Rename(e, id)),
        ]
    }

    proptest! {
        #[test]
        fn prop_registry_stays_bijective(ops in proptest::collection::vec(op(), 0..60)) {
            let mut reg = MetaIdRegistry::default();
            for op in ops {
                let _ = match op {
                    Op::Insert(id, e) => {
                        reg.insert(&format!("m{id}"), EntityRef::Variable(VariableId(e)))
                    }
                    Op::Remove(e) => { reg.remove(EntityRef::Variable(VariableId(e))); Ok(()) }
                    Op::Rename(e, id) => {
                        let entity = EntityRef::Variable(VariableId(e));
                        if reg.id_of(entity).is_some() {
                            reg.rename(entity, &format!("m{id}"))
                        } else {
                            Ok(())
                        }
                    }
                };
                prop_assert_eq!(reg.by_id.len(), reg.by_entity.len());
                for (id, entity) in reg.iter() {
                    prop_assert_eq!(Some(id), reg.id_of(entity));
                }
            }
        }
    }
}
