/*!
 * Owned markup tree for chapter documents.
 *
 * Chapters are parsed from quick-xml events into an arena of nodes so that
 * segment contents can be read, replaced and written back without touching
 * the surrounding bytes. Text, comments, doctype and processing instructions
 * are kept as the raw events they were read as, which keeps entity spelling
 * and attribute order intact on output.
 *
 * Two modes are supported:
 * - lenient: mismatched end tags close back to the nearest matching open
 *   element or are dropped, and elements left open at end of input are
 *   closed implicitly. HTML void elements written as `<br>` never open a
 *   scope.
 * - strict: any mismatch, unclosed element or unresolvable reference in
 *   text is an error (validator)
 */

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashSet;

use crate::document::entities;
use crate::errors::DocumentError;

/// HTML elements that never have content
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source", "track", "wbr",
];

fn is_void(local_name: &[u8]) -> bool {
    VOID_ELEMENTS
        .iter()
        .any(|name| name.as_bytes().eq_ignore_ascii_case(local_name))
}

/// Index of a node inside its tree
pub type NodeId = usize;

#[derive(Debug, Clone)]
enum NodeKind {
    Element { start: BytesStart<'static>, self_closing: bool },
    Leaf(Event<'static>),
    /// Pre-serialized markup spliced in by `replace_inner`
    Raw(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    children: Vec<NodeId>,
}

/// Parse mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Lenient,
    Strict,
}

/// Arena-backed markup document
#[derive(Debug, Clone, Default)]
pub struct MarkupTree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl MarkupTree {
    /// Parse in recovering mode
    pub fn parse(source: &str) -> Result<Self, DocumentError> {
        Self::parse_with_mode(source, ParseMode::Lenient)
    }

    /// Parse rejecting any structural error
    pub fn parse_strict(source: &str) -> Result<Self, DocumentError> {
        Self::parse_with_mode(source, ParseMode::Strict)
    }

    pub fn parse_with_mode(source: &str, mode: ParseMode) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_str(source);
        reader.trim_text(false);
        reader.expand_empty_elements(false);
        reader.check_end_names(mode == ParseMode::Strict);

        let mut tree = MarkupTree::default();
        let mut open: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(start) if mode == ParseMode::Lenient && is_void(start.local_name().as_ref()) => {
                    tree.push(NodeKind::Leaf(Event::Start(start.into_owned())), open.last().copied());
                }
                Event::Start(start) => {
                    let id = tree.push(
                        NodeKind::Element { start: start.into_owned(), self_closing: false },
                        open.last().copied(),
                    );
                    open.push(id);
                }
                Event::Empty(start) => {
                    tree.push(
                        NodeKind::Element { start: start.into_owned(), self_closing: true },
                        open.last().copied(),
                    );
                }
                Event::End(end) => {
                    let matching = open
                        .iter()
                        .rposition(|id| tree.raw_name(*id) == Some(end.name().as_ref()));
                    match matching {
                        Some(position) if mode == ParseMode::Lenient || position + 1 == open.len() => {
                            open.truncate(position);
                        }
                        _ if mode == ParseMode::Strict => {
                            return Err(DocumentError::Xml(format!(
                                "unexpected closing tag </{}> at byte {}",
                                String::from_utf8_lossy(end.name().as_ref()),
                                reader.buffer_position()
                            )));
                        }
                        _ if is_void(end.local_name().as_ref()) => {
                            tree.push(NodeKind::Leaf(Event::End(end.into_owned())), open.last().copied());
                        }
                        _ => {}
                    }
                }
                Event::Text(text) if mode == ParseMode::Strict => {
                    if let Err(e) = text.unescape_with(|name| entities::lookup(name).map(|_| "")) {
                        return Err(DocumentError::Xml(format!(
                            "invalid character reference before byte {}: {}",
                            reader.buffer_position(),
                            e
                        )));
                    }
                    tree.push(NodeKind::Leaf(Event::Text(text.into_owned())), open.last().copied());
                }
                Event::Eof => break,
                other => {
                    tree.push(NodeKind::Leaf(other.into_owned()), open.last().copied());
                }
            }
        }

        if mode == ParseMode::Strict {
            if let Some(id) = open.last() {
                return Err(DocumentError::Xml(format!(
                    "element <{}> is never closed",
                    tree.tag_name(*id).unwrap_or_default()
                )));
            }
            if tree.element_roots().count() != 1 {
                return Err(DocumentError::Xml("document must have exactly one root element".to_string()));
            }
        }

        Ok(tree)
    }

    /// Turn `<br>`-style void leaves into self-closing elements and drop
    /// their stray end tags
    fn close_void_elements(&mut self) {
        let mut dropped = HashSet::new();
        for (id, node) in self.nodes.iter_mut().enumerate() {
            let closed = match &node.kind {
                NodeKind::Leaf(Event::Start(start)) => {
                    Some(NodeKind::Element { start: start.clone(), self_closing: true })
                }
                NodeKind::Leaf(Event::End(_)) => {
                    dropped.insert(id);
                    None
                }
                _ => None,
            };
            if let Some(kind) = closed {
                node.kind = kind;
            }
        }
        if dropped.is_empty() {
            return;
        }
        for node in &mut self.nodes {
            node.children.retain(|child| !dropped.contains(child));
        }
        self.roots.retain(|root| !dropped.contains(root));
    }

    fn push(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node { kind, children: Vec::new() });
        match parent {
            Some(parent) => self.nodes[parent].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    fn raw_name(&self, id: NodeId) -> Option<&[u8]> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Element { start, .. } => Some(start.name().into_inner()),
            _ => None,
        }
    }

    fn element_roots(&self) -> impl Iterator<Item = &NodeId> {
        self.roots
            .iter()
            .filter(|id| matches!(self.nodes[**id].kind, NodeKind::Element { .. }))
    }

    /// Top-level nodes in document order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Children of a node in document order
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Lower-cased local name of an element node
    pub fn tag_name(&self, id: NodeId) -> Option<String> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Element { start, .. } => Some(
                String::from_utf8_lossy(start.local_name().as_ref()).to_ascii_lowercase(),
            ),
            _ => None,
        }
    }

    /// Decoded value of an attribute, matched by local name
    pub fn attribute(&self, id: NodeId, key: &str) -> Option<String> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Element { start, .. } => start_attribute(start, key),
            _ => None,
        }
    }

    /// Element nodes whose local name is in `tags`, outermost only,
    /// never descending below an element named in `excluded`
    pub fn find_outermost(&self, tags: &HashSet<String>, excluded: &HashSet<String>) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            let Some(name) = self.tag_name(id) else {
                continue;
            };
            if excluded.contains(&name) {
                continue;
            }
            if tags.contains(&name) {
                found.push(id);
                continue;
            }
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }

        found
    }

    /// Serialized children of a node
    pub fn inner_markup(&self, id: NodeId) -> Result<String, DocumentError> {
        let mut writer = Writer::new(Vec::new());
        for child in self.children(id) {
            self.write_node(*child, &mut writer)?;
        }
        into_string(writer.into_inner())
    }

    /// Human-readable text of a node's descendants
    pub fn plain_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Leaf(Event::Text(text)) => {
                out.push_str(&entities::decode(&String::from_utf8_lossy(text)));
            }
            NodeKind::Leaf(Event::CData(data)) => out.push_str(&String::from_utf8_lossy(data)),
            NodeKind::Raw(markup) => out.push_str(&fragment_plain_text(markup)),
            NodeKind::Element { .. } => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
            NodeKind::Leaf(_) => {}
        }
    }

    /// Replace the children of an element with a markup fragment
    ///
    /// Fragments that do not parse are inserted as escaped text.
    pub fn replace_inner(&mut self, id: NodeId, fragment: &str) -> Result<(), DocumentError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| DocumentError::Xml(format!("node {} does not exist", id)))?;

        let markup = match normalize_fragment(fragment) {
            Ok(markup) => markup,
            Err(_) => escape_text(fragment),
        };

        if let NodeKind::Element { self_closing, .. } = &mut node.kind {
            *self_closing = false;
        }
        node.children.clear();

        let raw = self.nodes.len();
        self.nodes.push(Node { kind: NodeKind::Raw(markup), children: Vec::new() });
        self.nodes[id].children.push(raw);
        Ok(())
    }

    /// Serialize the whole document
    pub fn to_markup(&self) -> Result<String, DocumentError> {
        let mut writer = Writer::new(Vec::new());
        for root in &self.roots {
            self.write_node(*root, &mut writer)?;
        }
        into_string(writer.into_inner())
    }

    fn write_node(&self, id: NodeId, writer: &mut Writer<Vec<u8>>) -> Result<(), DocumentError> {
        let node = &self.nodes[id];
        match &node.kind {
            NodeKind::Element { start, self_closing: true } => {
                writer.write_event(Event::Empty(start.borrow()))?;
            }
            NodeKind::Element { start, self_closing: false } => {
                writer.write_event(Event::Start(start.borrow()))?;
                for child in &node.children {
                    self.write_node(*child, writer)?;
                }
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                writer.write_event(Event::End(BytesEnd::new(name)))?;
            }
            NodeKind::Leaf(event) => writer.write_event(event)?,
            NodeKind::Raw(markup) => writer.get_mut().extend_from_slice(markup.as_bytes()),
        }
        Ok(())
    }
}

fn into_string(bytes: Vec<u8>) -> Result<String, DocumentError> {
    String::from_utf8(bytes).map_err(|e| DocumentError::Xml(format!("serialized markup is not UTF-8: {}", e)))
}

/// Decoded attribute value on a start tag, matched by local name
pub fn start_attribute(start: &BytesStart<'_>, key: &str) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key.as_bytes())
        .map(|attr| entities::decode(&String::from_utf8_lossy(&attr.value)))
}

/// Re-serialize a fragment through the lenient parser
///
/// Open tags are closed, void elements become self-closing, and stray `&`
/// and `<` are escaped, so the result always parses strictly.
pub fn normalize_fragment(fragment: &str) -> Result<String, DocumentError> {
    let cleaned = entities::named_to_numeric(&entities::escape_stray_markup(fragment));
    let wrapped = format!("<fragment>{}</fragment>", cleaned);
    let mut tree = MarkupTree::parse(&wrapped)?;
    tree.close_void_elements();
    let root = tree
        .element_roots()
        .next()
        .copied()
        .ok_or_else(|| DocumentError::Xml("empty fragment".to_string()))?;
    tree.inner_markup(root)
}

/// Plain text of a fragment; tags are stripped when it does not parse
pub fn fragment_plain_text(fragment: &str) -> String {
    let wrapped = format!("<fragment>{}</fragment>", fragment);
    match MarkupTree::parse(&wrapped) {
        Ok(tree) => tree.roots().iter().map(|r| tree.plain_text(*r)).collect(),
        Err(_) => {
            let stripped = TAG_RE.replace_all(fragment, "");
            entities::decode(&stripped)
        }
    }
}

static TAG_RE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"<[^>]*>").unwrap());

/// Escape `&`, `<` and `>` for use as element text
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
