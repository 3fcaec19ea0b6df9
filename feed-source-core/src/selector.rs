//! Field selector resolution shared by all parsers.

use serde_json::Value;
use tracing::debug;

use crate::config::FieldSelector;
use crate::error::ConfigError;
use crate::row::{FieldValue, Row};
use crate::xml::{NamespaceRegistry, XPath, XPathMatch, XmlElement};

/// Walks `value` along `/`-separated keys. Array steps take numeric keys.
/// `None` as soon as a key is missing or a step lands on a scalar.
pub fn descend<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return Some(value);
    }
    path.split('/').try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolves every field against one JSON item. A selector that misses
/// yields an empty string.
pub fn resolve_json(item: &Value, fields: &[FieldSelector]) -> Row {
    fields
        .iter()
        .map(|field| {
            let value = match descend(item, &field.selector) {
                Some(found) => found.clone(),
                None => {
                    debug!(field = %field.name, selector = %field.selector, "JSON selector missed");
                    Value::String(String::new())
                }
            };
            (field.name.clone(), FieldValue::Json(value))
        })
        .collect()
}

/// Flattens one XPath match: an element with no text of its own but with
/// child elements stays a sub-tree, everything else becomes text.
pub fn flatten_match(found: XPathMatch) -> FieldValue {
    match found {
        XPathMatch::Element(element) => flatten_element(element),
        XPathMatch::Attribute { value, .. } => FieldValue::Text(value),
        XPathMatch::Text(text) => FieldValue::Text(text),
    }
}

pub fn flatten_element(element: XmlElement) -> FieldValue {
    let text = element.text();
    if element.has_children() && text.trim().is_empty() {
        FieldValue::Element(element)
    } else {
        FieldValue::Text(text)
    }
}

/// A field selector compiled for XML parsers.
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub name: String,
    pub selector: String,
    pub kind: CompiledSelector,
}

#[derive(Debug, Clone)]
pub enum CompiledSelector {
    XPath(XPath),
    Ancestor(AncestorRef),
}

impl CompiledField {
    /// Compiles every selector. With `ancestors` set, `../name` selectors are
    /// kept as ancestor references instead of XPath.
    pub fn compile_all(
        fields: &[FieldSelector],
        ancestors: bool,
    ) -> Result<Vec<CompiledField>, ConfigError> {
        fields
            .iter()
            .map(|field| {
                let kind = match AncestorRef::parse(&field.selector) {
                    Some(ancestor) if ancestors => CompiledSelector::Ancestor(ancestor),
                    _ => CompiledSelector::XPath(XPath::compile(&field.selector).map_err(
                        |source| ConfigError::InvalidFieldSelector {
                            field: field.name.clone(),
                            selector: field.selector.clone(),
                            source,
                        },
                    )?),
                };
                Ok(CompiledField {
                    name: field.name.clone(),
                    selector: field.selector.clone(),
                    kind,
                })
            })
            .collect()
    }
}

/// Evaluates `xpath` relative to `element` and flattens the matches.
/// Evaluation failures count as misses.
pub fn select_values(
    element: &XmlElement,
    xpath: &XPath,
    namespaces: &NamespaceRegistry,
) -> Vec<FieldValue> {
    match xpath.select(element, namespaces) {
        Ok(found) => found.into_iter().map(flatten_match).collect(),
        Err(err) => {
            debug!(selector = %xpath.as_str(), error = %err, "XPath evaluation failed");
            Vec::new()
        }
    }
}

/// Resolves every XPath field relative to `element`. Ancestor references
/// are left for the caller.
pub fn resolve_xpath(
    element: &XmlElement,
    fields: &[CompiledField],
    namespaces: &NamespaceRegistry,
) -> Row {
    let mut row = Row::new();
    for field in fields {
        if let CompiledSelector::XPath(xpath) = &field.kind {
            insert_collapsed(&mut row, &field.name, select_values(element, xpath, namespaces));
        }
    }
    row
}

/// Inserts `values` into `row` under `name`, collapsing a single value. No
/// values leave the field absent.
pub fn insert_collapsed(row: &mut Row, name: &str, values: Vec<FieldValue>) {
    match FieldValue::from_matches(values) {
        Some(value) => row.insert(name, value),
        None => debug!(field = %name, "Selector matched nothing"),
    }
}

/// A `../name` or `..\name` selector pointing outside the matched item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorRef {
    pub levels_up: usize,
    pub name: String,
}

impl AncestorRef {
    pub fn parse(selector: &str) -> Option<Self> {
        let prefix = ["../", "..\\"]
            .into_iter()
            .find(|prefix| selector.starts_with(prefix))?;
        Some(AncestorRef {
            levels_up: selector.matches(prefix).count(),
            name: selector.replace(prefix, ""),
        })
    }
}
