//! # fetcher: concrete [`DataFetcher`] implementations
//!
//! - [`HttpFetcher`] issues GET requests with reqwest, sending the static
//!   headers from the source configuration on every request.
//! - [`FileFetcher`] reads local files, accepting plain paths and `file://`
//!   URLs, so feeds can be replayed from disk.
//!
//! Use [`from_config`] to build whichever one a [`SourceConfig`] asks for.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::{FetcherKind, SourceConfig};
use crate::contract::{DataFetcher, FetchResponse};
use crate::error::FetchError;

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds a client that sends `headers` with every request.
    pub fn new(headers: &BTreeMap<String, String>) -> Result<Self, FetchError> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                tracing::error!(error = ?e, header = %name, "Invalid request header name");
                e
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                tracing::error!(error = ?e, header = %name, "Invalid request header value");
                e
            })?;
            default_headers.insert(header_name, header_value);
        }
        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()?;
        tracing::debug!(headers = headers.len(), "Initialized HTTP fetcher");
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl DataFetcher for HttpFetcher {
    async fn response_content(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tracing::info!(url, "Fetching source document");
        let response = self.client.get(url).send().await?;
        let response = response.error_for_status().map_err(|e| {
            tracing::error!(error = ?e, url, "Source responded with an error status");
            e
        })?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn response(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        tracing::debug!(url, status, "Fetched response");
        Ok(FetchResponse { status, body })
    }
}

/// Reads documents from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl FileFetcher {
    pub fn new() -> Self {
        FileFetcher
    }

    /// Strips `file://` and any query string or fragment the pager added.
    fn path_of(url: &str) -> &str {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let end = path.find(&['?', '#'][..]).unwrap_or(path.len());
        &path[..end]
    }
}

#[async_trait]
impl DataFetcher for FileFetcher {
    async fn response_content(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let path = Self::path_of(url);
        tracing::info!(path, "Reading source document");
        tokio::fs::read(path).await.map_err(|e| {
            tracing::error!(error = ?e, path, "Failed to read source document");
            e.into()
        })
    }

    async fn response(&self, url: &str) -> Result<FetchResponse, FetchError> {
        match tokio::fs::read(Self::path_of(url)).await {
            Ok(body) => Ok(FetchResponse { status: 200, body }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FetchResponse {
                status: 404,
                body: Vec::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// The fetcher named by `config.data_fetcher_plugin`.
pub fn from_config(config: &SourceConfig) -> Result<Arc<dyn DataFetcher>, FetchError> {
    Ok(match config.data_fetcher_plugin {
        FetcherKind::Http => Arc::new(HttpFetcher::new(&config.headers)?),
        FetcherKind::File => Arc::new(FileFetcher::new()),
    })
}
