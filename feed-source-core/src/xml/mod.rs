//! XML support shared by the DOM and streaming parsers: an owned node arena,
//! an XPath subset over it, and namespace bindings.

pub mod build;
pub mod namespace;
pub mod tree;
pub mod xpath;

pub use namespace::NamespaceRegistry;
pub use tree::{Document, XmlElement};
pub use xpath::{XPath, XPathError, XPathMatch};
