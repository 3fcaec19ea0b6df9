#![doc = "feed-source-core: data parsers and pagination for JSON and XML feeds."]

//! This crate turns paginated JSON and XML feeds into flat rows for an
//! import pipeline. Fetching is abstracted behind [`contract::DataFetcher`];
//! everything else lives here.
//!
//! # Usage
//! Build a [`config::ParserConfig`] (usually from a [`config::SourceConfig`]),
//! create a parser with [`parser::create`] and drive it with
//! [`source::DataSource`].

pub mod config;
pub mod contract;
pub mod error;
pub mod fetcher;
pub mod pager;
pub mod parser;
pub mod row;
pub mod selector;
pub mod source;
pub mod xml;
