//! Next-URL strategies.
//!
//! After a document is opened the driver asks which URLs follow it. The
//! configured [`PagerConfig`] decides, usually from a value selected out of
//! the same document. A selector result of the wrong shape is not an error:
//! it yields no URLs and pagination stops there.

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{PagerConfig, PaginatorType};
use crate::contract::{DataFetcher, DataParser};
use crate::error::ParserError;

/// Upper bound on the page URLs one document may queue.
pub const MAX_PAGE_URLS: i64 = 1000;

/// A URL split into the parts the pager rewrites.
///
/// Works on absolute URLs and on bare local paths alike; parameter order is
/// preserved and rewritten keys keep their position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub base: String,
    pub query: Vec<(String, String)>,
    pub fragment: Option<String>,
}

impl UrlParts {
    pub fn parse(url: &str) -> Self {
        let (rest, fragment) = match url.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_string())),
            None => (url, None),
        };
        let (base, query) = match rest.split_once('?') {
            Some((base, query)) => (
                base,
                serde_urlencoded::from_str::<Vec<(String, String)>>(query).unwrap_or_default(),
            ),
            None => (rest, Vec::new()),
        };
        UrlParts {
            base: base.to_string(),
            query,
            fragment,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.query.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.query.push((key.to_string(), value)),
        }
    }

    pub fn to_url(&self) -> String {
        let mut url = self.base.clone();
        if !self.query.is_empty() {
            url.push('?');
            url.push_str(&serde_urlencoded::to_string(&self.query).unwrap_or_default());
        }
        if let Some(fragment) = &self.fragment {
            url.push('#');
            url.push_str(fragment);
        }
        url
    }
}

/// `url` with `key` set to `value`.
pub fn with_query_param(url: &str, key: &str, value: impl Into<String>) -> String {
    let mut parts = UrlParts::parse(url);
    parts.set(key, value);
    parts.to_url()
}

/// An absolute URL with a host.
pub fn is_valid_url(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .map(|parsed| parsed.has_host())
        .unwrap_or(false)
}

/// Text of a JSON scalar; `None` for null, arrays and objects.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric value of a JSON number or numeric string. NaN and infinities
/// are not numbers here.
pub fn scalar_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// A page number: an integer, or a number truncated towards zero, that fits
/// in an `i64`.
pub fn scalar_page(value: &Value) -> Option<i64> {
    let exact = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    exact.or_else(|| {
        let n = scalar_number(value)?;
        // 2^63 itself is out of range, hence the strict upper bound.
        (n >= i64::MIN as f64 && n < i64::MAX as f64).then_some(n as i64)
    })
}

/// Computes the URLs that follow `url` under `pager`, evaluating selectors
/// through `parser` and probing candidates through `fetcher` where the
/// strategy calls for it.
///
/// `queued` holds candidates already contributed for `url`; they come first
/// in the result. A paginator without a selector probes them together with
/// its own candidate.
pub async fn next_urls<P: DataParser + ?Sized>(
    url: &str,
    pager: &PagerConfig,
    queued: Vec<String>,
    parser: &mut P,
    fetcher: &dyn DataFetcher,
) -> Result<Vec<String>, ParserError> {
    let selector_data = match pager.selector() {
        Some(selector) => parser.select(url, selector).await?,
        None => None,
    };

    let mut next = queued;
    match pager {
        PagerConfig::Urls { .. } => next.extend(urls_strategy(selector_data.as_ref())),
        PagerConfig::Cursor { key, .. } => {
            next.extend(cursor_strategy(url, key, selector_data.as_ref()))
        }
        PagerConfig::Page {
            key, selector_max, ..
        } => {
            let max = match selector_max {
                Some(selector) => Some(parser.select(url, selector).await?),
                None => None,
            };
            next.extend(page_strategy(url, key, selector_data.as_ref(), max))
        }
        PagerConfig::Paginator {
            selector,
            num_items,
            paginator_type,
            page_key,
            size_key,
        } => {
            let next_url =
                paginator_next_url(url, *num_items, *paginator_type, page_key, size_key);
            if next_url.is_none() {
                debug!(url, "Paginator position overflows, paginator stops");
            }
            if selector.is_none() {
                next.extend(next_url);
                next = probe(fetcher, next).await;
            } else if page_was_full(selector_data.as_ref(), *num_items) {
                next.extend(next_url);
            } else {
                debug!(url, "Partial page, paginator stops");
            }
        }
    }

    if !next.is_empty() {
        info!(url, next = ?next, "Pager produced next URLs");
    }
    Ok(next)
}

fn urls_strategy(selector_data: Option<&Value>) -> Vec<String> {
    match selector_data {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(candidate)) if is_valid_url(candidate) => vec![candidate.clone()],
        Some(other) => {
            debug!(value = %other, "Pager value is neither a URL list nor a URL");
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn cursor_strategy(url: &str, key: &str, selector_data: Option<&Value>) -> Vec<String> {
    match selector_data.and_then(scalar_text) {
        Some(cursor) => vec![with_query_param(url, key, cursor)],
        None => {
            debug!(url, "Cursor value missing or not scalar");
            Vec::new()
        }
    }
}

/// One URL per page after the current one, up to and including `max`.
/// Without a configured maximum exactly one more page is assumed. At most
/// [`MAX_PAGE_URLS`] pages are queued at once.
fn page_strategy(
    url: &str,
    key: &str,
    selector_data: Option<&Value>,
    max: Option<Option<Value>>,
) -> Vec<String> {
    let Some(current) = selector_data.and_then(scalar_page) else {
        debug!(url, "Page value missing, not numeric or out of range");
        return Vec::new();
    };
    let Some(first) = current.checked_add(1) else {
        debug!(url, current, "Page value is the last representable page");
        return Vec::new();
    };
    let last = match max {
        None => first,
        Some(value) => match value.as_ref().and_then(scalar_page) {
            Some(max) => max,
            None => {
                debug!(url, "Maximum page value missing, not numeric or out of range");
                return Vec::new();
            }
        },
    };
    let capped = first.saturating_add(MAX_PAGE_URLS - 1);
    if last > capped {
        warn!(url, last, capped, "Page range truncated");
    }
    (first..=last.min(capped))
        .map(|page| with_query_param(url, key, page.to_string()))
        .collect()
}

fn paginator_next_url(
    url: &str,
    num_items: u64,
    paginator_type: PaginatorType,
    page_key: &str,
    size_key: &str,
) -> Option<String> {
    let mut parts = UrlParts::parse(url);
    let current = parts
        .get(page_key)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let next_start = match paginator_type {
        PaginatorType::PageNumber => current.checked_add(1),
        PaginatorType::StartingItem => current.checked_add(num_items),
    }?;
    parts.set(page_key, next_start.to_string());
    parts.set(size_key, num_items.to_string());
    Some(parts.to_url())
}

/// A count equal to the page size, or a non-empty row list, means the
/// current page was full and another may follow.
fn page_was_full(selector_data: Option<&Value>, num_items: u64) -> bool {
    match selector_data {
        Some(Value::Array(rows)) => !rows.is_empty(),
        Some(value) => scalar_number(value) == Some(num_items as f64),
        None => false,
    }
}

/// Keeps the candidates that answer 200.
async fn probe(fetcher: &dyn DataFetcher, candidates: Vec<String>) -> Vec<String> {
    let responses = join_all(candidates.iter().map(|url| fetcher.response(url))).await;
    candidates
        .into_iter()
        .zip(responses)
        .filter_map(|(url, response)| match response {
            Ok(response) if response.is_ok() => Some(url),
            Ok(response) => {
                debug!(url = %url, status = response.status, "Dropping next URL");
                None
            }
            Err(err) => {
                debug!(url = %url, error = %err, "Dropping unreachable next URL");
                None
            }
        })
        .collect()
}
