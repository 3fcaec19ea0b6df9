//! The three data parsers and the factory the driver builds them with.

pub mod json;
pub mod simple_xml;
pub mod xml;

use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};
use serde_json::Value;
use tracing::debug;

use crate::config::{ParserConfig, ParserKind};
use crate::contract::{DataFetcher, DataParser};
use crate::error::ParserError;
use crate::xml::{Document, NamespaceRegistry, XPath, XPathError, XPathMatch};

pub use self::json::JsonParser;
pub use self::simple_xml::SimpleXmlParser;
pub use self::xml::XmlParser;

/// Builds the parser for `kind`. Selectors are compiled here, so a bad
/// configuration fails before anything is fetched.
pub fn create(
    kind: ParserKind,
    config: ParserConfig,
    fetcher: Arc<dyn DataFetcher>,
) -> Result<Box<dyn DataParser>, ParserError> {
    debug!(?kind, "Creating data parser");
    Ok(match kind {
        ParserKind::Json => Box::new(JsonParser::new(config, fetcher)),
        ParserKind::SimpleXml => Box::new(SimpleXmlParser::new(config, fetcher)?),
        ParserKind::Xml => Box::new(XmlParser::new(config, fetcher)?),
    })
}

/// Evaluates a pager selector from the document node: no match is `None`,
/// one match its string value, several an array of string values.
pub(crate) fn select_xml(
    doc: &Arc<Document>,
    selector: &str,
    namespaces: &NamespaceRegistry,
) -> Result<Option<Value>, ParserError> {
    let invalid = |source: XPathError| ParserError::Selector {
        selector: selector.to_string(),
        source,
    };
    let xpath = XPath::compile(selector).map_err(invalid)?;
    let mut found: Vec<Value> = xpath
        .select_from_root(doc, namespaces)
        .map_err(invalid)?
        .iter()
        .map(|m| Value::String(XPathMatch::string_value(m)))
        .collect();
    Ok(match found.len() {
        0 => None,
        1 => found.pop(),
        _ => Some(Value::Array(found)),
    })
}

/// Decodes fetched XML bytes to UTF-8 text.
///
/// A byte order mark takes precedence over the `encoding` of the XML
/// declaration; with neither the bytes are read as UTF-8. Malformed
/// sequences are replaced rather than rejected so the parser reports
/// positions in the rest of the document.
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    let encoding = declared_encoding(bytes).unwrap_or(UTF_8);
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!(encoding = used.name(), "Replaced malformed sequences in XML");
    }
    text.into_owned()
}

/// Encoding named by the leading `<?xml ... encoding="..."?>`, if any.
/// A declaration readable as ASCII cannot be UTF-16, so such labels map to
/// UTF-8.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let decl = bytes.strip_prefix(b"<?xml")?;
    let decl = &decl[..decl.windows(2).position(|w| w == b"?>")?];
    let at = decl.windows(8).position(|w| w == b"encoding")?;
    let rest = skip_space(&decl[at + 8..]);
    let rest = skip_space(rest.strip_prefix(b"=")?);
    let (&quote, rest) = rest.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let label = &rest[..rest.iter().position(|&b| b == quote)?];
    Encoding::for_label(label).map(Encoding::output_encoding)
}

fn skip_space(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}
