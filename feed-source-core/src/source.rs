//! # source: row iteration across a chain of URLs
//!
//! [`DataSource`] walks a URL list with one [`DataParser`]: it opens each
//! URL in turn, skipping those that hold nothing, pulls rows until the
//! document is exhausted and moves on. When a pager is configured, the URLs
//! a document yields are spliced in right after it, so paged feeds are read
//! in page order.
//!
//! ## Usage
//! ```no_run
//! # async fn demo(parser: Box<dyn feed_source_core::contract::DataParser>) -> Result<(), feed_source_core::error::ParserError> {
//! use feed_source_core::source::DataSource;
//!
//! let mut source = DataSource::new(parser, vec!["https://example.com/feed.json".into()], vec!["id".into()]);
//! source.rewind().await?;
//! while let Some(row) = source.current() {
//!     println!("{}", row.to_json());
//!     source.next().await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::contract::{DataFetcher, DataParser};
use crate::error::ParserError;
use crate::parser;
use crate::row::Row;

pub struct DataSource {
    parser: Box<dyn DataParser>,
    urls: Vec<String>,
    id_fields: Vec<String>,
    /// Index into `urls` of the open document.
    active_url: Option<usize>,
    current_item: Option<Row>,
    current_id: Option<Row>,
}

impl DataSource {
    pub fn new(parser: Box<dyn DataParser>, urls: Vec<String>, id_fields: Vec<String>) -> Self {
        DataSource {
            parser,
            urls,
            id_fields,
            active_url: None,
            current_item: None,
            current_id: None,
        }
    }

    /// Validates `config` and builds its parser around `fetcher`.
    pub fn from_config(
        config: &SourceConfig,
        fetcher: Arc<dyn DataFetcher>,
    ) -> Result<Self, ParserError> {
        let parser = parser::create(config.data_parser_plugin, config.parser_config()?, fetcher)?;
        Ok(DataSource::new(
            parser,
            config.urls.clone(),
            config.id_fields(),
        ))
    }

    /// The URL list, including URLs added by the pager so far.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn current(&self) -> Option<&Row> {
        self.current_item.as_ref()
    }

    /// The id fields of the current row.
    pub fn current_id(&self) -> Option<&Row> {
        self.current_id.as_ref()
    }

    pub fn valid(&self) -> bool {
        self.current_item.is_some()
    }

    /// Starts over from the first URL and loads the first row.
    pub async fn rewind(&mut self) -> Result<(), ParserError> {
        self.active_url = None;
        self.parser.rewind();
        self.next().await
    }

    /// Loads the next row, opening following sources as needed. Leaves
    /// [`DataSource::current`] empty once every source is exhausted.
    pub async fn next(&mut self) -> Result<(), ParserError> {
        self.current_item = None;
        self.current_id = None;

        if self.active_url.is_none() && !self.next_source().await? {
            debug!("No source data");
            return Ok(());
        }

        self.current_item = self.parser.fetch_next_row()?;
        while self.current_item.is_none() && self.next_source().await? {
            self.current_item = self.parser.fetch_next_row()?;
        }

        if let Some(item) = &self.current_item {
            self.current_id = Some(
                self.id_fields
                    .iter()
                    .filter_map(|name| item.get(name).map(|value| (name.clone(), value.clone())))
                    .collect(),
            );
        }
        Ok(())
    }

    /// Opens the URL after the active one. `false` when none is left.
    async fn next_source(&mut self) -> Result<bool, ParserError> {
        loop {
            let next = self.active_url.map_or(0, |active| active + 1);
            if next >= self.urls.len() {
                return Ok(false);
            }
            self.active_url = Some(next);
            let url = self.urls[next].clone();
            if self.parser.open_source_url(&url).await? {
                if self.parser.config().pager.is_some() {
                    self.add_next_urls(next).await?;
                }
                return Ok(true);
            }
            debug!(url = %url, "Source holds nothing to iterate, skipping");
        }
    }

    /// Splices the URLs following `urls[active]` in right after it. A URL
    /// already in the list keeps its first position.
    async fn add_next_urls(&mut self, active: usize) -> Result<(), ParserError> {
        let url = self.urls[active].clone();
        let next_urls = self.parser.next_urls(&url).await?;
        if next_urls.is_empty() {
            return Ok(());
        }
        info!(url = %url, added = next_urls.len(), "Chaining next URLs");

        let tail = self.urls.split_off(active + 1);
        let mut seen: HashSet<String> = HashSet::new();
        self.urls = std::mem::take(&mut self.urls)
            .into_iter()
            .chain(next_urls)
            .chain(tail)
            .filter(|candidate| seen.insert(candidate.clone()))
            .collect();
        Ok(())
    }

    /// Iterates every source from the start and counts the rows.
    pub async fn count(&mut self) -> Result<usize, ParserError> {
        let mut count = 0;
        self.rewind().await?;
        while self.valid() {
            count += 1;
            self.next().await?;
        }
        Ok(count)
    }

    /// Iterates from the start and collects up to `limit` rows.
    pub async fn rows(&mut self, limit: Option<usize>) -> Result<Vec<Row>, ParserError> {
        let mut rows = Vec::new();
        self.rewind().await?;
        while let Some(row) = self.current_item.take() {
            rows.push(row);
            if limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
            self.next().await?;
        }
        Ok(rows)
    }
}
