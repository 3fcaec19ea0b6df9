//! Owned, arena-allocated XML trees.
//!
//! Both XML parsers hand out [`XmlElement`] handles into an `Arc<Document>`.
//! A document is either a whole parsed feed (DOM parser) or a snapshot of a
//! single element copied out of a stream, so handles stay valid after the
//! reader that produced them has moved on.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::namespace::NamespaceRegistry;
use super::xpath::{XPath, XPathError, XPathMatch};

pub type NodeId = usize;

/// Node 0 of every document is the document (root) node.
pub const ROOT: NodeId = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    /// Splits `prefix:local`; a name without a colon has no prefix.
    pub fn parse(name: &str) -> Self {
        match name.split_once(':') {
            Some((prefix, local)) => QName {
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
            },
            None => QName {
                prefix: None,
                local: name.to_string(),
            },
        }
    }

    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub name: QName,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Root,
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) data: NodeData,
}

/// Nodes are stored in document order: a node's id is always greater than
/// its parent's and than every node preceding it.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes[id].data {
            NodeData::Element(data) => Some(data),
            _ => None,
        }
    }

    /// The first element child of the root.
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(ROOT)
            .iter()
            .copied()
            .find(|&id| self.element(id).is_some())
    }

    /// Concatenated text of the node's direct text children.
    pub fn direct_text(&self, id: NodeId) -> String {
        self.children(id)
            .iter()
            .filter_map(|&child| match &self.nodes[child].data {
                NodeData::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// XPath string-value: all descendant text in document order.
    pub fn string_value(&self, id: NodeId) -> String {
        match &self.nodes[id].data {
            NodeData::Text(text) => text.clone(),
            _ => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        for &child in self.children(id) {
            match &self.nodes[child].data {
                NodeData::Text(text) => out.push_str(text),
                NodeData::Element(_) => self.collect_text(child, out),
                NodeData::Root => {}
            }
        }
    }

    pub fn has_element_children(&self, id: NodeId) -> bool {
        self.children(id)
            .iter()
            .any(|&child| self.element(child).is_some())
    }

    fn write_xml(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].data {
            NodeData::Root => {
                for &child in self.children(id) {
                    self.write_xml(child, out);
                }
            }
            NodeData::Text(text) => out.push_str(&escape(text, false)),
            NodeData::Element(data) => {
                let name = data.name.qualified();
                out.push('<');
                out.push_str(&name);
                for attribute in &data.attributes {
                    out.push(' ');
                    out.push_str(&attribute.name.qualified());
                    out.push_str("=\"");
                    out.push_str(&escape(&attribute.value, true));
                    out.push('"');
                }
                if self.children(id).is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for &child in self.children(id) {
                    self.write_xml(child, out);
                }
                out.push_str("</");
                out.push_str(&name);
                out.push('>');
            }
        }
    }

    fn same_subtree(&self, id: NodeId, other: &Document, other_id: NodeId) -> bool {
        let equal_data = match (&self.nodes[id].data, &other.nodes[other_id].data) {
            (NodeData::Root, NodeData::Root) => true,
            (NodeData::Text(a), NodeData::Text(b)) => a == b,
            (NodeData::Element(a), NodeData::Element(b)) => {
                a.name == b.name && a.namespace == b.namespace && a.attributes == b.attributes
            }
            _ => false,
        };
        let children = self.children(id);
        let other_children = other.children(other_id);
        equal_data
            && children.len() == other_children.len()
            && children
                .iter()
                .zip(other_children)
                .all(|(&a, &b)| self.same_subtree(a, other, b))
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Appends nodes in document order. Used by both the DOM conversion and the
/// streaming snapshot reader.
#[derive(Debug)]
pub struct DocumentBuilder {
    nodes: Vec<Node>,
    open: Vec<NodeId>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> Self {
        DocumentBuilder {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Root,
            }],
            open: vec![ROOT],
        }
    }

    fn append(&mut self, data: NodeData) -> NodeId {
        let id = self.nodes.len();
        let parent = *self.open.last().unwrap_or(&ROOT);
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn start_element(
        &mut self,
        name: QName,
        namespace: Option<String>,
        attributes: Vec<Attribute>,
    ) -> NodeId {
        let id = self.append(NodeData::Element(ElementData {
            name,
            namespace,
            attributes,
        }));
        self.open.push(id);
        id
    }

    pub fn end_element(&mut self) {
        if self.open.len() > 1 {
            self.open.pop();
        }
    }

    /// Adjacent text (e.g. a CDATA section after character data) is merged.
    pub fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let parent = *self.open.last().unwrap_or(&ROOT);
        if let Some(&last) = self.nodes[parent].children.last() {
            if let NodeData::Text(existing) = &mut self.nodes[last].data {
                existing.push_str(text);
                return;
            }
        }
        self.append(NodeData::Text(text.to_string()));
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.open.len() - 1
    }

    pub fn finish(self) -> Document {
        Document { nodes: self.nodes }
    }
}

/// A read-only handle on an element of a shared document.
#[derive(Clone)]
pub struct XmlElement {
    doc: Arc<Document>,
    id: NodeId,
}

impl XmlElement {
    pub fn new(doc: Arc<Document>, id: NodeId) -> Self {
        XmlElement { doc, id }
    }

    /// Handle on the document element, if the document has one.
    pub fn root_of(doc: Arc<Document>) -> Option<Self> {
        let id = doc.document_element()?;
        Some(XmlElement { doc, id })
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.doc
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn data(&self) -> Option<&ElementData> {
        self.doc.element(self.id)
    }

    pub fn qualified_name(&self) -> String {
        self.data().map(|d| d.name.qualified()).unwrap_or_default()
    }

    pub fn local_name(&self) -> &str {
        self.data().map(|d| d.name.local.as_str()).unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.data().and_then(|d| d.namespace.as_deref())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.data()?
            .attributes
            .iter()
            .find(|a| a.name.qualified() == name)
            .map(|a| a.value.as_str())
    }

    /// The element's own text, without descendants.
    pub fn text(&self) -> String {
        self.doc.direct_text(self.id)
    }

    pub fn string_value(&self) -> String {
        self.doc.string_value(self.id)
    }

    pub fn has_children(&self) -> bool {
        self.doc.has_element_children(self.id)
    }

    pub fn children(&self) -> Vec<XmlElement> {
        self.doc
            .children(self.id)
            .iter()
            .filter(|&&child| self.doc.element(child).is_some())
            .map(|&child| XmlElement::new(self.doc.clone(), child))
            .collect()
    }

    /// Compiles and evaluates `expr` with this element as context node.
    pub fn xpath(
        &self,
        expr: &str,
        namespaces: &NamespaceRegistry,
    ) -> Result<Vec<XPathMatch>, XPathError> {
        let compiled = XPath::compile(expr)?;
        compiled.select(self, namespaces)
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.doc.write_xml(self.id, &mut out);
        out
    }
}

impl PartialEq for XmlElement {
    /// Structural equality, so snapshots from different documents compare
    /// equal when they hold the same markup.
    fn eq(&self, other: &Self) -> bool {
        self.doc.same_subtree(self.id, &other.doc, other.id)
    }
}

impl fmt::Debug for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XmlElement({})", self.to_xml_string())
    }
}

impl Serialize for XmlElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_xml_string())
    }
}
