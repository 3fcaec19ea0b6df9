use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::xml::XmlElement;

/// The value of one output field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Whatever the JSON parser found at the selector's path, including
    /// nested objects and arrays, or the raw item echo.
    Json(serde_json::Value),
    /// Flattened text of an XML node or attribute.
    Text(String),
    /// An XML sub-tree kept whole because it has no text of its own.
    Element(XmlElement),
    /// Several matches, in document order.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Collapses a single match into a scalar. `None` for no matches.
    pub fn from_matches(mut values: Vec<FieldValue>) -> Option<FieldValue> {
        match values.len() {
            0 => None,
            1 => values.pop(),
            _ => Some(FieldValue::List(values)),
        }
    }

    /// Text form of scalar values; `None` for lists, sub-trees and non-scalar JSON.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(text) => Some(text.clone()),
            FieldValue::Json(serde_json::Value::String(text)) => Some(text.clone()),
            FieldValue::Json(serde_json::Value::Number(n)) => Some(n.to_string()),
            FieldValue::Json(serde_json::Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Json(value) => value.clone(),
            FieldValue::Text(text) => serde_json::Value::String(text.clone()),
            FieldValue::Element(element) => serde_json::Value::String(element.to_xml_string()),
            FieldValue::List(values) => {
                serde_json::Value::Array(values.iter().map(FieldValue::to_json).collect())
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        FieldValue::Json(value)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Json(value) => value.serialize(serializer),
            FieldValue::Text(text) => serializer.serialize_str(text),
            FieldValue::Element(element) => element.serialize(serializer),
            FieldValue::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
        }
    }
}

/// One source record: field name → value, in selector order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, FieldValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name`, replacing an existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
