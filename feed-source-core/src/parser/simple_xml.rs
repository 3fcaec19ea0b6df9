//! DOM XML data parser: loads the whole document, so item and field
//! selectors can use any XPath the evaluator supports.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{decode_text, select_xml};
use crate::config::ParserConfig;
use crate::contract::{DataFetcher, DataParser};
use crate::error::{ConfigError, ParserError, XmlParseError};
use crate::row::Row;
use crate::selector::{resolve_xpath, CompiledField};
use crate::xml::build::parse_document;
use crate::xml::{Document, XPath, XPathMatch, XmlElement};

pub struct SimpleXmlParser {
    config: ParserConfig,
    fetcher: Arc<dyn DataFetcher>,
    item_xpath: XPath,
    fields: Vec<CompiledField>,
    /// Parse problems of the last opened document.
    errors: Vec<XmlParseError>,
    document: Option<(String, Arc<Document>)>,
    matches: VecDeque<XmlElement>,
}

impl SimpleXmlParser {
    pub fn new(config: ParserConfig, fetcher: Arc<dyn DataFetcher>) -> Result<Self, ConfigError> {
        let item_selector = config.item_selector.as_path();
        let item_xpath =
            XPath::compile(&item_selector).map_err(|e| ConfigError::InvalidItemSelector {
                selector: item_selector.clone(),
                reason: e.to_string(),
            })?;
        let fields = CompiledField::compile_all(&config.fields, false)?;
        Ok(SimpleXmlParser {
            config,
            fetcher,
            item_xpath,
            fields,
            errors: Vec::new(),
            document: None,
            matches: VecDeque::new(),
        })
    }

    pub fn errors(&self) -> &[XmlParseError] {
        &self.errors
    }

    async fn fetch_document(&mut self, url: &str) -> Result<Arc<Document>, ParserError> {
        let bytes = self
            .fetcher
            .response_content(url)
            .await
            .map_err(|e| ParserError::fetch(url, e))?;
        parse_document(&decode_text(&bytes), url).map_err(|err| {
            warn!(url, line = err.line, column = err.column, "Malformed XML source");
            self.errors.push(err.clone());
            ParserError::Xml(err)
        })
    }
}

#[async_trait]
impl DataParser for SimpleXmlParser {
    fn config(&self) -> &ParserConfig {
        &self.config
    }

    fn fetcher(&self) -> Arc<dyn DataFetcher> {
        self.fetcher.clone()
    }

    async fn open_source_url(&mut self, url: &str) -> Result<bool, ParserError> {
        self.errors.clear();
        self.matches.clear();
        self.document = None;
        let doc = self.fetch_document(url).await?;
        let found = self
            .item_xpath
            .select_from_root(&doc, &self.config.namespaces)
            .map_err(|source| ParserError::Selector {
                selector: self.item_xpath.as_str().to_string(),
                source,
            })?;
        self.matches = found
            .into_iter()
            .filter_map(|m| match m {
                XPathMatch::Element(element) => Some(element),
                _ => None,
            })
            .collect();
        info!(url, items = self.matches.len(), "Opened XML document");
        self.document = Some((url.to_string(), doc));
        Ok(true)
    }

    fn fetch_next_row(&mut self) -> Result<Option<Row>, ParserError> {
        Ok(self
            .matches
            .pop_front()
            .map(|element| resolve_xpath(&element, &self.fields, &self.config.namespaces)))
    }

    async fn select(&mut self, url: &str, selector: &str) -> Result<Option<Value>, ParserError> {
        let open = self
            .document
            .as_ref()
            .filter(|(open_url, _)| open_url == url)
            .map(|(_, doc)| doc.clone());
        let doc = match open {
            Some(doc) => {
                debug!(url, "Evaluating pager selector on the open document");
                doc
            }
            None => self.fetch_document(url).await?,
        };
        select_xml(&doc, selector, &self.config.namespaces)
    }

    fn rewind(&mut self) {
        self.matches.clear();
    }
}
