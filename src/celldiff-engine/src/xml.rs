// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! A small mutable XML tree.  Nodes live in an arena owned by the
//! [`Document`] and are addressed by [`NodeId`]; detached nodes stay in the
//! arena but are no longer reachable from the root.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use celldiff_core::common::{Error, ErrorCode, ErrorKind, Result};
use celldiff_core::parse_err;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Clone, Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Hash and size of the subtree rooted at a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub hash: u64,
    pub weight: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId(0)
    }
}

pub(crate) fn xml_error(details: String) -> Error {
    Error::new(ErrorKind::Parse, ErrorCode::XmlDeserialization, Some(details))
}

fn write_error(err: std::io::Error) -> Error {
    Error::new(
        ErrorKind::Parse,
        ErrorCode::XmlSerialization,
        Some(err.to_string()),
    )
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|err| xml_error(err.to_string()))
}

fn resolve_reference(name: &str) -> Result<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => num.parse::<u32>().ok(),
        };
        return match code.and_then(char::from_u32) {
            Some(c) => Ok(c.to_string()),
            None => parse_err!(
                XmlDeserialization,
                format!("bad character reference '&{name};'")
            ),
        };
    }
    let resolved = match name {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "apos" => "'",
        "quot" => "\"",
        _ => {
            return parse_err!(
                XmlDeserialization,
                format!("unknown entity '&{name};'")
            );
        }
    };
    Ok(resolved.to_owned())
}

/// The part of a qualified name after the namespace prefix.
pub fn local_name(tag: &str) -> &str {
    match tag.rfind(':') {
        Some(pos) => &tag[pos + 1..],
        None => tag,
    }
}

impl Document {
    pub fn from_bytes(bytes: &[u8]) -> Result<Document> {
        let bytes = bytes.strip_prefix(b"\xef\xbb\xbf".as_slice()).unwrap_or(bytes);
        Document::parse(utf8(bytes)?)
    }

    pub fn parse(text: &str) -> Result<Document> {
        let mut reader = Reader::from_str(text);
        let mut doc = Document::default();
        let mut root: Option<NodeId> = None;
        let mut stack: Vec<NodeId> = vec![];
        let mut pending = String::new();

        loop {
            let event = reader
                .read_event()
                .map_err(|err| xml_error(err.to_string()))?;
            match event {
                Event::Start(e) => {
                    doc.flush_text(&mut pending, stack.last().copied());
                    let id = doc.open_element(&e, stack.last().copied(), &mut root)?;
                    stack.push(id);
                }
                Event::Empty(e) => {
                    doc.flush_text(&mut pending, stack.last().copied());
                    doc.open_element(&e, stack.last().copied(), &mut root)?;
                }
                Event::End(_) => {
                    doc.flush_text(&mut pending, stack.last().copied());
                    stack.pop();
                }
                Event::Text(e) => {
                    let text = e.decode().map_err(|err| xml_error(err.to_string()))?;
                    if text.contains('&') {
                        let text = quick_xml::escape::unescape(&text)
                            .map_err(|err| xml_error(err.to_string()))?;
                        pending.push_str(&text);
                    } else {
                        pending.push_str(&text);
                    }
                }
                Event::CData(e) => {
                    pending.push_str(utf8(&e)?);
                }
                Event::GeneralRef(e) => {
                    pending.push_str(&resolve_reference(utf8(&e)?)?);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        match root {
            Some(root) => {
                doc.root = root;
                Ok(doc)
            }
            None => parse_err!(XmlDeserialization, "document has no root element".to_owned()),
        }
    }

    fn open_element(
        &mut self,
        e: &BytesStart,
        parent: Option<NodeId>,
        root: &mut Option<NodeId>,
    ) -> Result<NodeId> {
        let tag = utf8(e.name().as_ref())?.to_owned();
        let mut attrs = vec![];
        for attr in e.attributes() {
            let attr = attr.map_err(|err| xml_error(err.to_string()))?;
            let key = utf8(attr.key.as_ref())?.to_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| xml_error(err.to_string()))?
                .into_owned();
            attrs.push((key, value));
        }

        let id = self.alloc(NodeKind::Element { tag: tag.clone(), attrs });
        match parent {
            Some(parent) => self.append_child(parent, id),
            None if root.is_none() => *root = Some(id),
            None => {
                return parse_err!(
                    XmlDeserialization,
                    format!("second root element <{tag}>")
                );
            }
        }
        Ok(id)
    }

    /// Whitespace between elements is layout, not content.
    fn flush_text(&mut self, pending: &mut String, parent: Option<NodeId>) {
        if pending.trim().is_empty() {
            pending.clear();
            return;
        }
        let text = std::mem::take(pending);
        if let Some(parent) = parent {
            let id = self.alloc(NodeKind::Text(text));
            self.append_child(parent, id);
        }
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: None,
            children: vec![],
        });
        id
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Element { .. })
    }

    /// Qualified tag name, or `None` for text leaves.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.node(id).kind {
            NodeKind::Element { ref tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.tag(id).map(local_name)
    }

    /// Namespace prefix of an element including the colon, e.g. `"cellml:"`.
    pub fn prefix(&self, id: NodeId) -> &str {
        match self.tag(id) {
            Some(tag) => match tag.rfind(':') {
                Some(pos) => &tag[..=pos],
                None => "",
            },
            None => "",
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.node(id).kind {
            NodeKind::Text(ref text) => Some(text),
            NodeKind::Element { .. } => None,
        }
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match self.node(id).kind {
            NodeKind::Element { ref attrs, .. } => attrs,
            NodeKind::Text(_) => &[],
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Sets or adds an attribute, keeping the position of an existing one.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { ref mut attrs, .. } = self.nodes[id.index()].kind {
            match attrs.iter_mut().find(|(key, _)| key == name) {
                Some((_, v)) => *v = value.to_owned(),
                None => attrs.push((name.to_owned(), value.to_owned())),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let NodeKind::Element { ref mut attrs, .. } = self.nodes[id.index()].kind {
            attrs.retain(|(key, _)| key != name);
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Element children whose local name is `name`, in document order.
    pub fn children_named(&self, id: NodeId, name: &str) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|child| self.local_name(*child) == Some(name))
            .collect()
    }

    pub fn first_child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|child| self.local_name(*child) == Some(name))
    }

    /// The subtree rooted at `id` in pre-order, `id` included.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(node) = cur {
            if node == ancestor {
                return true;
            }
            cur = self.parent(node);
        }
        false
    }

    /// Whether `id` is still reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.is_ancestor(self.root, id)
    }

    /// Creates a detached element.
    pub fn new_element(&mut self, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let attrs = attrs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        self.alloc(NodeKind::Element {
            tag: tag.to_owned(),
            attrs,
        })
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    pub fn insert_child(&mut self, parent: NodeId, pos: usize, child: NodeId) {
        self.detach(child);
        self.nodes[child.index()].parent = Some(parent);
        let children = &mut self.nodes[parent.index()].children;
        let pos = pos.min(children.len());
        children.insert(pos, child);
    }

    /// Unlinks `id` from its parent.  The subtree stays intact.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.index()].parent.take() {
            self.nodes[parent.index()].children.retain(|c| *c != id);
        }
    }

    /// Deep-copies the subtree at `node` of `other` into this document as a
    /// detached subtree.  Returns the new subtree root and the mapping from
    /// every copied node of `other` to its copy.
    pub fn copy_subtree(
        &mut self,
        other: &Document,
        node: NodeId,
    ) -> (NodeId, HashMap<NodeId, NodeId>) {
        let mut mapping = HashMap::new();
        let root = self.copy_node(other, node, &mut mapping);
        (root, mapping)
    }

    fn copy_node(
        &mut self,
        other: &Document,
        node: NodeId,
        mapping: &mut HashMap<NodeId, NodeId>,
    ) -> NodeId {
        let id = self.alloc(other.kind(node).clone());
        mapping.insert(node, id);
        for child in other.children(node).to_vec() {
            let copy = self.copy_node(other, child, mapping);
            self.nodes[copy.index()].parent = Some(id);
            self.nodes[id.index()].children.push(copy);
        }
        id
    }

    /// An attribute that must be present, as a parse error otherwise.
    pub fn required_attr(&self, id: NodeId, name: &str) -> Result<&str> {
        match self.attr(id, name) {
            Some(value) => Ok(value),
            None => parse_err!(
                MissingAttribute,
                format!("{} has no '{}' attribute", self.path(id), name)
            ),
        }
    }

    /// A numeric attribute, `None` when absent.
    pub fn number_attr(&self, id: NodeId, name: &str) -> Result<Option<f64>> {
        match self.attr(id, name) {
            None => Ok(None),
            Some(value) => match value.trim().parse::<f64>() {
                Ok(n) => Ok(Some(n)),
                Err(_) => parse_err!(
                    ExpectedNumber,
                    format!("{}/@{}: '{}' is not a number", self.path(id), name, value)
                ),
            },
        }
    }

    /// Positional path of a node, e.g. `/model[1]/component[2]/variable[1]`.
    /// Positions count siblings with the same local name; text leaves are
    /// addressed as `text()[n]`.
    pub fn path(&self, id: NodeId) -> String {
        let mut segments = vec![];
        let mut cur = Some(id);
        while let Some(node) = cur {
            let name = self.local_name(node).unwrap_or("text()");
            let position = match self.parent(node) {
                Some(parent) => {
                    self.children(parent)
                        .iter()
                        .take_while(|sibling| **sibling != node)
                        .filter(|sibling| self.local_name(**sibling) == self.local_name(node))
                        .count()
                        + 1
                }
                None => 1,
            };
            segments.push(format!("{name}[{position}]"));
            cur = self.parent(node);
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    /// Subtree signatures for every node reachable from the root.
    /// Attribute order does not affect the hash; child order does.
    pub fn signatures(&self) -> HashMap<NodeId, Signature> {
        let mut out = HashMap::new();
        self.signature_of(self.root, &mut out);
        out
    }

    fn signature_of(&self, id: NodeId, out: &mut HashMap<NodeId, Signature>) -> Signature {
        let mut hasher = DefaultHasher::new();
        let mut weight = 1;
        match self.kind(id) {
            NodeKind::Element { tag, attrs } => {
                0u8.hash(&mut hasher);
                tag.hash(&mut hasher);
                let mut sorted: Vec<&(String, String)> = attrs.iter().collect();
                sorted.sort();
                sorted.hash(&mut hasher);
            }
            NodeKind::Text(text) => {
                1u8.hash(&mut hasher);
                text.trim().hash(&mut hasher);
            }
        }
        for child in self.children(id) {
            let sig = self.signature_of(*child, out);
            sig.hash.hash(&mut hasher);
            weight += sig.weight;
        }
        let sig = Signature {
            hash: hasher.finish(),
            weight,
        };
        out.insert(id, sig);
        sig
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_error)?;
        self.write_node(&mut writer, self.root)?;
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|err| {
            Error::new(
                ErrorKind::Parse,
                ErrorCode::XmlSerialization,
                Some(err.to_string()),
            )
        })
    }

    fn write_node(&self, writer: &mut Writer<Cursor<Vec<u8>>>, id: NodeId) -> Result<()> {
        match self.kind(id) {
            NodeKind::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_error),
            NodeKind::Element { tag, attrs } => {
                let mut elem = BytesStart::new(tag.as_str());
                for (key, value) in attrs.iter() {
                    elem.push_attribute((key.as_str(), value.as_str()));
                }
                let children = self.children(id);
                if children.is_empty() {
                    return writer.write_event(Event::Empty(elem)).map_err(write_error);
                }
                writer.write_event(Event::Start(elem)).map_err(write_error)?;
                for child in children {
                    self.write_node(writer, *child)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(tag.as_str())))
                    .map_err(write_error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<model name="m" xmlns="http://www.cellml.org/cellml/1.0#" xmlns:cmeta="http://www.cellml.org/metadata/1.0#">
  <!-- comment -->
  <component name="a" cmeta:id="c1">
    <variable name="x" units="second"/>
    <variable name="y" units="second"/>
  </component>
  <component name="b">
    <math><ci>x &amp; y</ci></math>
  </component>
</model>"#;

    #[test]
    fn test_parse_structure() {
        let doc = Document::parse(SAMPLE).unwrap();
        let root = doc.root();
        assert_eq!(Some("model"), doc.tag(root));
        assert_eq!(Some("m"), doc.attr(root, "name"));

        let components = doc.children_named(root, "component");
        assert_eq!(2, components.len());
        assert_eq!(Some("c1"), doc.attr(components[0], "cmeta:id"));
        assert_eq!(2, doc.children_named(components[0], "variable").len());

        let math = doc.first_child_named(components[1], "math").unwrap();
        let ci = doc.children(math)[0];
        assert_eq!(Some("x & y"), doc.text(doc.children(ci)[0]));
    }

    #[test]
    fn test_paths() {
        let doc = Document::parse(SAMPLE).unwrap();
        let components = doc.children_named(doc.root(), "component");
        let var = doc.children_named(components[0], "variable")[1];
        assert_eq!("/model[1]/component[1]/variable[2]", doc.path(var));
        assert_eq!("/model[1]/component[2]", doc.path(components[1]));
    }

    #[test]
    fn test_roundtrip_keeps_content() {
        let doc = Document::parse(SAMPLE).unwrap();
        let xml = doc.to_xml().unwrap();
        assert!(xml.starts_with("<?xml"));
        let again = Document::parse(&xml).unwrap();
        let sigs_a = doc.signatures();
        let sigs_b = again.signatures();
        assert_eq!(sigs_a[&doc.root()], sigs_b[&again.root()]);
    }

    #[test]
    fn test_copy_and_detach() {
        let mut dst = Document::parse("<model name=\"dst\"/>").unwrap();
        let src = Document::parse(SAMPLE).unwrap();
        let comp = src.children_named(src.root(), "component")[0];

        let (copy, mapping) = dst.copy_subtree(&src, comp);
        assert_eq!(src.descendants(comp).len(), mapping.len());
        assert!(!dst.is_attached(copy));

        let root = dst.root();
        dst.append_child(root, copy);
        assert!(dst.is_attached(copy));
        assert_eq!("/model[1]/component[1]", dst.path(copy));
        assert_eq!(Some("a"), dst.attr(copy, "name"));

        dst.detach(copy);
        assert!(dst.children(root).is_empty());
        assert!(!dst.is_attached(mapping[&comp]));
    }

    #[test]
    fn test_attribute_edit() {
        let mut doc = Document::parse("<model name=\"m\" a=\"1\"/>").unwrap();
        let root = doc.root();
        doc.set_attr(root, "name", "n");
        doc.set_attr(root, "b", "2");
        doc.remove_attr(root, "a");
        let keys: Vec<&str> = doc.attrs(root).iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(vec!["name", "b"], keys);
        assert_eq!(Some("n"), doc.attr(root, "name"));
    }

    #[test]
    fn test_signature_ignores_attribute_order() {
        let a = Document::parse("<m><u x=\"1\" y=\"2\"/></m>").unwrap();
        let b = Document::parse("<m><u y=\"2\" x=\"1\"/></m>").unwrap();
        assert_eq!(a.signatures()[&a.root()], b.signatures()[&b.root()]);

        let c = Document::parse("<m><u y=\"3\" x=\"1\"/></m>").unwrap();
        assert_ne!(a.signatures()[&a.root()].hash, c.signatures()[&c.root()].hash);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Document::parse("").is_err());
        assert!(Document::parse("<a></b>").is_err());
        assert!(Document::parse("<a/><b/>").is_err());
    }

    #[test]
    fn test_character_references() {
        assert_eq!("A", resolve_reference("#65").unwrap());
        assert_eq!("A", resolve_reference("#x41").unwrap());
        assert_eq!("<", resolve_reference("lt").unwrap());
        assert!(resolve_reference("nbsp").is_err());
    }
}
