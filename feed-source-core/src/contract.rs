#![allow(unused)]

//! # contract: collaborator interfaces of the parsing core
//!
//! Two traits meet here:
//! - [`DataFetcher`] retrieves raw documents. Implemented by the HTTP and
//!   file fetchers in [`crate::fetcher`] and, under `test` or the
//!   `test-export-mocks` feature, by the generated `MockDataFetcher`.
//! - [`DataParser`] is the surface a driver uses to walk one source: open a
//!   URL, pull rows, ask for the URLs that follow.
//!
//! ## Errors
//! Fetchers return the boxed [`FetchError`]; parsers wrap it into
//! [`ParserError::Fetch`] together with the URL.

use std::sync::Arc;

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use serde_json::Value;

use crate::config::ParserConfig;
use crate::error::{FetchError, ParserError};
use crate::row::Row;

/// Status and body of a fetched URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Retrieves raw documents for the parsers.
///
/// Fetching is the only place a parser waits; retry and backoff policy
/// belong to the implementor.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DataFetcher: Send + Sync {
    /// Body of `url`. Transport failures and non-success statuses are errors.
    async fn response_content(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Status and body of `url`. Only transport failures are errors.
    async fn response(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

/// A pull parser over one feed format.
///
/// The driver calls [`DataParser::open_source_url`], then
/// [`DataParser::fetch_next_row`] until it returns `None`, and asks
/// [`DataParser::next_urls`] which URLs to open afterwards.
#[async_trait]
pub trait DataParser: Send {
    fn config(&self) -> &ParserConfig;

    fn fetcher(&self) -> Arc<dyn DataFetcher>;

    /// Fetches `url` and positions the item cursor on its first candidate.
    /// `Ok(false)` when the document holds nothing to iterate.
    async fn open_source_url(&mut self, url: &str) -> Result<bool, ParserError>;

    /// The next row of the open document, or `None` once it is exhausted.
    fn fetch_next_row(&mut self) -> Result<Option<Row>, ParserError>;

    /// Evaluates a pager selector against the document at `url`.
    ///
    /// A scalar match comes back as a JSON scalar, several matches as an
    /// array, no match as `None` (XML) or an empty array (JSON).
    async fn select(&mut self, url: &str, selector: &str) -> Result<Option<Value>, ParserError>;

    /// Resets traversal state before a new pass.
    fn rewind(&mut self) {}

    /// URLs contributed by an enclosing paging mechanism; they come before
    /// the pager strategy's own URLs and are probed along with them by a
    /// selector-less paginator.
    fn outer_next_urls(&self, _url: &str) -> Vec<String> {
        Vec::new()
    }

    /// URLs to fetch after `url`, per the configured pager.
    async fn next_urls(&mut self, url: &str) -> Result<Vec<String>, ParserError> {
        let queued = self.outer_next_urls(url);
        let Some(pager) = self.config().pager.clone() else {
            return Ok(queued);
        };
        let fetcher = self.fetcher();
        crate::pager::next_urls(url, &pager, queued, self, fetcher.as_ref()).await
    }
}
