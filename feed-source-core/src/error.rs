//! Error types shared by the parsers, the pager and the source driver.
//!
//! Only configuration problems, fetch failures and malformed documents are
//! errors. Selector misses and pagination boundaries are not: they resolve to
//! absent values or to an empty next-URL list.

use std::fmt;

use thiserror::Error;

use crate::xml::xpath::XPathError;

/// Error returned by a [`crate::contract::DataFetcher`].
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Problems detected while validating configuration, before any fetch.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("pager \"default_num_items\" must be configured")]
    MissingDefaultNumItems,

    #[error("pager \"paginator_type\" must be page_number or starting_item, got `{0}`")]
    InvalidPaginatorType(String),

    #[error("unknown pager type `{0}` (expected urls, cursor, page or paginator)")]
    UnknownPagerType(String),

    #[error("invalid item selector `{selector}`: {reason}")]
    InvalidItemSelector { selector: String, reason: String },

    #[error("invalid selector `{selector}` for field `{field}`: {source}")]
    InvalidFieldSelector {
        field: String,
        selector: String,
        #[source]
        source: XPathError,
    },
}

/// Severity of a buffered XML parse problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("Warning"),
            Severity::Error => f.write_str("Error"),
            Severity::Fatal => f.write_str("Fatal Error"),
        }
    }
}

/// A malformed XML document, with enough position information for an
/// operator to find the problem in the feed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{severity}: {message}\nLine: {line}\nColumn: {column}\nFile: {file}")]
pub struct XmlParseError {
    pub severity: Severity,
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub file: String,
}

/// Umbrella error for every fallible parser operation.
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Xml(#[from] XmlParseError),

    #[error("invalid selector `{selector}`: {source}")]
    Selector {
        selector: String,
        #[source]
        source: XPathError,
    },

    #[error("scratch file i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ParserError {
    pub(crate) fn fetch(url: &str, source: FetchError) -> Self {
        ParserError::Fetch {
            url: url.to_string(),
            source,
        }
    }
}

/// Converts a byte offset into a 1-based (line, column) pair.
pub(crate) fn line_column(content: &[u8], offset: usize) -> (u32, u32) {
    let end = offset.min(content.len());
    let mut line = 1u32;
    let mut column = 1u32;
    for &byte in &content[..end] {
        if byte == b'\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}
