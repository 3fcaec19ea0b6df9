//! Streaming XML data parser.
//!
//! The document is written to a scratch file and read forward once with a
//! pull reader, so memory stays bounded by the items and ancestors actually
//! materialized rather than by the document.
//!
//! The item selector is a plain element path, optionally followed by one
//! predicate on the matched element: `/feed/entry[@type="post"]`. Field
//! selectors are XPath relative to the item, except `../name` (or
//! `..\name`), which refers to `name` elements captured from the item's
//! ancestors as the reader passed them.
//!
//! Stream state:
//! - `current_path` holds the element names from the document element down
//!   to the reader's current depth.
//! - `parent_cache` maps depth → element name → captured elements. Closing
//!   an element at depth D forgets everything captured deeper than D, so the
//!   cache never outlives the current ancestor chain.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Write};
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{decode_text, select_xml};
use crate::config::ParserConfig;
use crate::contract::{DataFetcher, DataParser};
use crate::error::{ConfigError, ParserError, Severity, XmlParseError};
use crate::row::Row;
use crate::selector::{
    flatten_element, insert_collapsed, select_values, CompiledField, CompiledSelector,
};
use crate::xml::build::{
    new_reader, parse_document, position_in_file, read_start_tag, snapshot_element, StartTag,
};
use crate::xml::namespace::NamespaceScope;
use crate::xml::{XPath, XmlElement};

/// An opened document.
struct Stream {
    url: String,
    file: NamedTempFile,
    reader: Reader<BufReader<File>>,
    scope: NamespaceScope,
    /// Number of open elements.
    depth: usize,
    buf: Vec<u8>,
    done: bool,
}

impl Stream {
    fn error(&self, message: String, offset: u64) -> ParserError {
        let (line, column) = match self.file.reopen() {
            Ok(mut file) => position_in_file(&mut file, offset),
            Err(_) => (0, 0),
        };
        ParserError::Xml(XmlParseError {
            severity: Severity::Fatal,
            message,
            line,
            column,
            file: self.url.clone(),
        })
    }
}

enum Step {
    Open(StartTag),
    Close,
    Eof,
    Other,
    Failed(String, u64),
}

pub struct XmlParser {
    config: ParserConfig,
    fetcher: Arc<dyn DataFetcher>,
    elements_to_match: Vec<String>,
    predicate: Option<XPath>,
    /// Compare qualified (`p:name`) instead of local names.
    prefixed_name: bool,
    parent_elements_of_interest: Vec<String>,
    fields: Vec<CompiledField>,
    stream: Option<Stream>,
    current_path: Vec<String>,
    parent_cache: BTreeMap<usize, HashMap<String, Vec<XmlElement>>>,
    /// Depth of the last matched item.
    item_depth: usize,
}

impl XmlParser {
    pub fn new(config: ParserConfig, fetcher: Arc<dyn DataFetcher>) -> Result<Self, ConfigError> {
        let item_selector = config.item_selector.as_path();
        let invalid = |reason: String| ConfigError::InvalidItemSelector {
            selector: item_selector.clone(),
            reason,
        };

        let pattern = Regex::new(r"^(.*?)\[(.*)\]$").map_err(|e| invalid(e.to_string()))?;
        let trimmed = item_selector.trim_start_matches('/');
        let (path, predicate) = match pattern.captures(trimmed) {
            Some(caps) => (
                caps.get(1).map_or("", |m| m.as_str()),
                caps.get(2).map(|m| m.as_str()),
            ),
            None => (trimmed, None),
        };
        let elements_to_match: Vec<String> = path.split('/').map(str::to_string).collect();
        let prefixed_name = elements_to_match.iter().any(|name| name.contains(':'));
        let predicate = predicate
            .map(|predicate| {
                XPath::compile(&format!("/*[{predicate}]")).map_err(|e| invalid(e.to_string()))
            })
            .transpose()?;

        let fields = CompiledField::compile_all(&config.fields, true)?;
        let parent_elements_of_interest = fields
            .iter()
            .filter_map(|field| match &field.kind {
                CompiledSelector::Ancestor(ancestor) => Some(ancestor.name.clone()),
                CompiledSelector::XPath(_) => None,
            })
            .collect();
        debug!(
            ?elements_to_match,
            prefixed_name,
            predicate = predicate.as_ref().map(XPath::as_str),
            "Compiled streaming item selector"
        );

        Ok(XmlParser {
            config,
            fetcher,
            elements_to_match,
            predicate,
            prefixed_name,
            parent_elements_of_interest,
            fields,
            stream: None,
            current_path: Vec::new(),
            parent_cache: BTreeMap::new(),
            item_depth: 0,
        })
    }

    /// Element names the item selector matches, outermost first.
    pub fn elements_to_match(&self) -> &[String] {
        &self.elements_to_match
    }

    /// Names referenced by `../` field selectors.
    pub fn parent_elements_of_interest(&self) -> &[String] {
        &self.parent_elements_of_interest
    }

    /// Path of the scratch file backing the open document.
    pub fn scratch_path(&self) -> Option<&std::path::Path> {
        self.stream.as_ref().map(|stream| stream.file.path())
    }

    /// Elements named `name` captured `levels_up` levels above the last
    /// matched item; level 1 holds the item's siblings. Empty when nothing
    /// was captured there.
    pub fn ancestor_elements(&self, levels_up: usize, name: &str) -> Vec<XmlElement> {
        let Some(depth) = (self.item_depth + 1).checked_sub(levels_up) else {
            return Vec::new();
        };
        self.parent_cache
            .get(&depth)
            .and_then(|by_name| by_name.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn accepts(&self, candidate: &XmlElement) -> bool {
        let Some(predicate) = &self.predicate else {
            return true;
        };
        match predicate.select_from_root(candidate.document(), &self.config.namespaces) {
            Ok(found) => !found.is_empty(),
            Err(err) => {
                debug!(predicate = %predicate.as_str(), error = %err, "Predicate evaluation failed");
                false
            }
        }
    }

    /// Advances the reader to the next element matching the item selector and
    /// returns its snapshot, or `None` at the end of the document.
    fn next_item(&mut self) -> Result<Option<XmlElement>, ParserError> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            if stream.done {
                return Ok(None);
            }

            stream.buf.clear();
            let offset = stream.reader.buffer_position() as u64;
            let step = match stream.reader.read_event_into(&mut stream.buf) {
                Ok(Event::Start(start)) => match read_start_tag(&start) {
                    Ok(tag) => Step::Open(tag),
                    Err(message) => Step::Failed(message, offset),
                },
                Ok(Event::End(_)) => Step::Close,
                Ok(Event::Eof) => Step::Eof,
                Ok(_) => Step::Other,
                Err(err) => Step::Failed(err.to_string(), stream.reader.error_position() as u64),
            };

            match step {
                Step::Open(tag) => {
                    let depth = stream.depth;
                    let name = if self.prefixed_name {
                        tag.name.qualified()
                    } else {
                        tag.name.local.clone()
                    };
                    self.current_path.truncate(depth);
                    self.current_path.push(name.clone());

                    let of_interest = self.parent_elements_of_interest.contains(&name);
                    let candidate = self.current_path == self.elements_to_match;
                    // Only snapshotted elements need the outer scope spelled out.
                    let inherited = (of_interest || candidate).then(|| stream.scope.flatten());
                    stream.scope.push(tag.declarations);
                    stream.depth += 1;
                    let Some(inherited) = inherited else {
                        continue;
                    };

                    let snapshot = match stream
                        .file
                        .reopen()
                        .map_err(ParserError::from)
                        .and_then(|file| {
                            snapshot_element(file, offset, inherited, &stream.url)
                                .map_err(ParserError::from)
                        }) {
                        Ok(snapshot) => snapshot,
                        Err(err) => {
                            stream.done = true;
                            warn!(url = %stream.url, error = %err, "Malformed XML stream");
                            return Err(err);
                        }
                    };
                    if of_interest {
                        self.parent_cache
                            .entry(depth)
                            .or_default()
                            .entry(name)
                            .or_default()
                            .push(snapshot.clone());
                    }
                    if candidate {
                        if self.accepts(&snapshot) {
                            self.item_depth = depth;
                            return Ok(Some(snapshot));
                        }
                        debug!("Candidate rejected by predicate");
                    }
                }
                Step::Close => {
                    stream.scope.pop();
                    stream.depth = stream.depth.saturating_sub(1);
                    let depth = stream.depth;
                    self.current_path.truncate(depth);
                    self.parent_cache.retain(|&cached, _| cached <= depth);
                }
                Step::Eof => {
                    stream.done = true;
                    if stream.depth > 0 {
                        let at = stream.reader.buffer_position() as u64;
                        let message = format!(
                            "Premature end of data in tag {}",
                            self.current_path.last().map_or("", String::as_str)
                        );
                        return Err(stream.error(message, at));
                    }
                    return Ok(None);
                }
                Step::Other => {}
                Step::Failed(message, at) => {
                    stream.done = true;
                    warn!(url = %stream.url, %message, "Malformed XML stream");
                    return Err(stream.error(message, at));
                }
            }
        }
    }
}

#[async_trait]
impl DataParser for XmlParser {
    fn config(&self) -> &ParserConfig {
        &self.config
    }

    fn fetcher(&self) -> Arc<dyn DataFetcher> {
        self.fetcher.clone()
    }

    async fn open_source_url(&mut self, url: &str) -> Result<bool, ParserError> {
        let bytes = self
            .fetcher
            .response_content(url)
            .await
            .map_err(|e| ParserError::fetch(url, e))?;

        // The scratch file always holds UTF-8, whatever the feed declares.
        let text = decode_text(&bytes);
        let mut file = NamedTempFile::new()?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        let reader = new_reader(file.reopen()?);
        info!(url, bytes = bytes.len(), path = %file.path().display(), "Opened XML stream");

        // Dropping the previous stream removes its scratch file.
        self.stream = Some(Stream {
            url: url.to_string(),
            file,
            reader,
            scope: NamespaceScope::default(),
            depth: 0,
            buf: Vec::new(),
            done: false,
        });
        self.current_path.clear();
        self.parent_cache.clear();
        Ok(true)
    }

    fn fetch_next_row(&mut self) -> Result<Option<Row>, ParserError> {
        let Some(item) = self.next_item()? else {
            return Ok(None);
        };
        let mut row = Row::new();
        for field in &self.fields {
            let values = match &field.kind {
                CompiledSelector::XPath(xpath) => {
                    select_values(&item, xpath, &self.config.namespaces)
                }
                CompiledSelector::Ancestor(ancestor) => self
                    .ancestor_elements(ancestor.levels_up, &ancestor.name)
                    .into_iter()
                    .map(flatten_element)
                    .collect(),
            };
            insert_collapsed(&mut row, &field.name, values);
        }
        Ok(Some(row))
    }

    async fn select(&mut self, url: &str, selector: &str) -> Result<Option<Value>, ParserError> {
        let bytes = self
            .fetcher
            .response_content(url)
            .await
            .map_err(|e| ParserError::fetch(url, e))?;
        let doc = parse_document(&decode_text(&bytes), url)?;
        select_xml(&doc, selector, &self.config.namespaces)
    }

    fn rewind(&mut self) {
        self.current_path.clear();
        self.parent_cache.clear();
    }
}
