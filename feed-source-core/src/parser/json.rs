//! JSON data parser.
//!
//! Items are located either by path (`data/items`) or, for older
//! configurations, by depth: an integer item selector picks every object or
//! array found exactly that many levels below the document root.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ItemSelector, ParserConfig};
use crate::contract::{DataFetcher, DataParser};
use crate::error::ParserError;
use crate::row::{FieldValue, Row};
use crate::selector::resolve_json;

static NULL: Value = Value::Null;

pub struct JsonParser {
    config: ParserConfig,
    fetcher: Arc<dyn DataFetcher>,
    /// Last fetched URL and its decoded document.
    cached: Option<(String, Value)>,
    items: VecDeque<Value>,
}

impl JsonParser {
    pub fn new(config: ParserConfig, fetcher: Arc<dyn DataFetcher>) -> Self {
        JsonParser {
            config,
            fetcher,
            cached: None,
            items: VecDeque::new(),
        }
    }

    /// Makes the document at `url` the cached one, fetching only when the
    /// URL changed or nothing usable is cached.
    async fn load(&mut self, url: &str) -> Result<&Value, ParserError> {
        let hit = matches!(&self.cached, Some((cached_url, doc)) if cached_url == url && !doc.is_null());
        if hit {
            debug!(url, "Using cached JSON document");
        } else {
            let bytes = self
                .fetcher
                .response_content(url)
                .await
                .map_err(|e| ParserError::fetch(url, e))?;
            self.cached = Some((url.to_string(), decode(url, &bytes)));
        }
        Ok(self
            .cached
            .as_ref()
            .map(|(_, doc)| doc)
            .unwrap_or(&NULL))
    }

    /// Items left in the open document.
    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

/// Decodes `bytes`, retrying as Latin-1 when they are not valid UTF-8 JSON.
/// Undecodable input becomes `Null`.
fn decode(url: &str, bytes: &[u8]) -> Value {
    match serde_json::from_slice(bytes) {
        Ok(doc) => doc,
        Err(first) => {
            let transcoded: String = bytes.iter().map(|&b| b as char).collect();
            match serde_json::from_str(&transcoded) {
                Ok(doc) => {
                    debug!(url, "Decoded JSON after re-encoding as UTF-8");
                    doc
                }
                Err(_) => {
                    warn!(url, error = %first, "Source is not valid JSON");
                    Value::Null
                }
            }
        }
    }
}

/// Pre-order walk collecting every container exactly `target` levels below
/// the root; the root's own children are depth 0.
pub fn select_by_depth(doc: &Value, target: usize) -> Vec<Value> {
    fn walk(value: &Value, depth: usize, target: usize, out: &mut Vec<Value>) {
        let children: Box<dyn Iterator<Item = &Value>> = match value {
            Value::Object(map) => Box::new(map.values()),
            Value::Array(items) => Box::new(items.iter()),
            _ => return,
        };
        for child in children {
            if !(child.is_object() || child.is_array()) {
                continue;
            }
            if depth == target {
                out.push(child.clone());
            } else {
                walk(child, depth + 1, target, out);
            }
        }
    }

    let mut out = Vec::new();
    walk(doc, 0, target, &mut out);
    out
}

/// Descends `doc` along `path`. An empty path is the whole document; a
/// missing or null step is an empty array.
pub fn select_by_path(doc: &Value, path: &str) -> Value {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return doc.clone();
    }
    let mut current = doc;
    for key in path.split('/') {
        let next = match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) if !value.is_null() => current = value,
            _ => return Value::Array(Vec::new()),
        }
    }
    current.clone()
}

/// Items of a selection: array elements or object values. Scalars hold none.
fn into_items(selection: Value) -> VecDeque<Value> {
    match selection {
        Value::Array(items) => items.into(),
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        _ => VecDeque::new(),
    }
}

#[async_trait]
impl DataParser for JsonParser {
    fn config(&self) -> &ParserConfig {
        &self.config
    }

    fn fetcher(&self) -> Arc<dyn DataFetcher> {
        self.fetcher.clone()
    }

    async fn open_source_url(&mut self, url: &str) -> Result<bool, ParserError> {
        let item_selector = self.config.item_selector.clone();
        let doc = self.load(url).await?;
        if doc.is_null() {
            debug!(url, "No JSON source data");
            self.items.clear();
            return Ok(false);
        }
        let items = match &item_selector {
            ItemSelector::Depth(depth) => select_by_depth(doc, *depth).into(),
            ItemSelector::Path(path) => into_items(select_by_path(doc, path)),
        };
        info!(url, items = items.len(), "Opened JSON source");
        self.items = items;
        Ok(true)
    }

    fn fetch_next_row(&mut self) -> Result<Option<Row>, ParserError> {
        let Some(item) = self.items.pop_front() else {
            return Ok(None);
        };
        let mut row = resolve_json(&item, &self.config.fields);
        if self.config.include_raw_data {
            row.insert("raw", FieldValue::Json(item));
        }
        Ok(Some(row))
    }

    async fn select(&mut self, url: &str, selector: &str) -> Result<Option<Value>, ParserError> {
        let depth_mode = matches!(self.config.item_selector, ItemSelector::Depth(_));
        let doc = self.load(url).await?;
        if doc.is_null() {
            return Ok(None);
        }
        let selected = if depth_mode {
            match selector.parse::<usize>() {
                Ok(depth) => Value::Array(select_by_depth(doc, depth)),
                Err(_) => Value::Array(Vec::new()),
            }
        } else {
            select_by_path(doc, selector)
        };
        Ok(Some(selected))
    }

    fn rewind(&mut self) {
        self.items.clear();
    }
}
