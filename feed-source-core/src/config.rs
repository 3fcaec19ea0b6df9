//! Source configuration.
//!
//! [`SourceConfig`] is the loosely-typed shape read from YAML or JSON.
//! [`SourceConfig::parser_config`] validates it once into the immutable
//! [`ParserConfig`] every parser is built from; pager settings become a
//! [`PagerConfig`] variant carrying exactly the fields its strategy needs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::xml::NamespaceRegistry;

/// Which data parser reads the fetched documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    Json,
    SimpleXml,
    Xml,
}

/// Which data fetcher retrieves documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetcherKind {
    #[default]
    Http,
    File,
}

/// One output field and the path expression that fills it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub selector: String,
}

impl FieldSelector {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        FieldSelector {
            name: name.into(),
            label: None,
            selector: selector.into(),
        }
    }
}

/// Where the candidate items live in a document.
///
/// An integer (or all-digit string) selects every container exactly that
/// many levels deep in a JSON document; anything else is a path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawItemSelector")]
pub enum ItemSelector {
    Depth(usize),
    Path(String),
}

impl Default for ItemSelector {
    fn default() -> Self {
        ItemSelector::Path(String::new())
    }
}

impl ItemSelector {
    pub fn as_path(&self) -> String {
        match self {
            ItemSelector::Depth(depth) => depth.to_string(),
            ItemSelector::Path(path) => path.clone(),
        }
    }
}

impl From<&str> for ItemSelector {
    fn from(selector: &str) -> Self {
        if !selector.is_empty() && selector.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(depth) = selector.parse() {
                return ItemSelector::Depth(depth);
            }
        }
        ItemSelector::Path(selector.to_string())
    }
}

impl From<usize> for ItemSelector {
    fn from(depth: usize) -> Self {
        ItemSelector::Depth(depth)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawItemSelector {
    Depth(usize),
    Path(String),
}

impl From<RawItemSelector> for ItemSelector {
    fn from(raw: RawItemSelector) -> Self {
        match raw {
            RawItemSelector::Depth(depth) => ItemSelector::Depth(depth),
            RawItemSelector::Path(path) => ItemSelector::from(path.as_str()),
        }
    }
}

impl Serialize for ItemSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ItemSelector::Depth(depth) => serializer.serialize_u64(*depth as u64),
            ItemSelector::Path(path) => serializer.serialize_str(path),
        }
    }
}

/// Pager settings as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPagerConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub selector_max: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub page_key: Option<String>,
    #[serde(default)]
    pub size_key: Option<String>,
    #[serde(default)]
    pub default_num_items: Option<u64>,
    #[serde(default)]
    pub paginator_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaginatorType {
    /// The page key counts pages: the next page is `current + 1`.
    #[default]
    PageNumber,
    /// The page key is an item offset: the next page is `current + num_items`.
    StartingItem,
}

/// Validated pager settings, one variant per next-URL strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerConfig {
    Urls {
        selector: Option<String>,
    },
    Cursor {
        selector: Option<String>,
        key: String,
    },
    Page {
        selector: Option<String>,
        selector_max: Option<String>,
        key: String,
    },
    Paginator {
        selector: Option<String>,
        num_items: u64,
        paginator_type: PaginatorType,
        page_key: String,
        size_key: String,
    },
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl TryFrom<RawPagerConfig> for PagerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawPagerConfig) -> Result<Self, Self::Error> {
        let selector = non_empty(raw.selector);
        let pager = match raw.kind.as_str() {
            "urls" => PagerConfig::Urls { selector },
            "cursor" => PagerConfig::Cursor {
                selector,
                key: non_empty(raw.key).unwrap_or_else(|| "cursor".to_string()),
            },
            "page" => PagerConfig::Page {
                selector,
                selector_max: non_empty(raw.selector_max),
                key: non_empty(raw.key).unwrap_or_else(|| "page".to_string()),
            },
            "paginator" => {
                let num_items = raw
                    .default_num_items
                    .ok_or(ConfigError::MissingDefaultNumItems)?;
                let paginator_type = match raw.paginator_type.as_deref() {
                    None | Some("page_number") => PaginatorType::PageNumber,
                    Some("starting_item") => PaginatorType::StartingItem,
                    Some(other) => return Err(ConfigError::InvalidPaginatorType(other.to_string())),
                };
                PagerConfig::Paginator {
                    selector,
                    num_items,
                    paginator_type,
                    page_key: non_empty(raw.page_key).unwrap_or_else(|| "page".to_string()),
                    size_key: non_empty(raw.size_key).unwrap_or_else(|| "pagesize".to_string()),
                }
            }
            other => return Err(ConfigError::UnknownPagerType(other.to_string())),
        };
        debug!(?pager, "Validated pager configuration");
        Ok(pager)
    }
}

impl PagerConfig {
    pub fn selector(&self) -> Option<&str> {
        match self {
            PagerConfig::Urls { selector }
            | PagerConfig::Cursor { selector, .. }
            | PagerConfig::Page { selector, .. }
            | PagerConfig::Paginator { selector, .. } => selector.as_deref(),
        }
    }
}

/// Id field declaration, e.g. `id: { type: integer }`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdSpec {
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// A whole source definition as loaded from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    pub data_parser_plugin: ParserKind,
    #[serde(default)]
    pub data_fetcher_plugin: FetcherKind,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub item_selector: ItemSelector,
    #[serde(default)]
    pub fields: Vec<FieldSelector>,
    #[serde(default)]
    pub ids: BTreeMap<String, IdSpec>,
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,
    #[serde(default)]
    pub pager: Option<RawPagerConfig>,
    #[serde(default)]
    pub include_raw_data: bool,
}

impl SourceConfig {
    /// Validates the parser-facing part of the configuration.
    pub fn parser_config(&self) -> Result<ParserConfig, ConfigError> {
        let pager = self.pager.clone().map(PagerConfig::try_from).transpose()?;
        let config = ParserConfig {
            item_selector: self.item_selector.clone(),
            fields: self.fields.clone(),
            namespaces: NamespaceRegistry::from(self.namespaces.clone()),
            pager,
            include_raw_data: self.include_raw_data,
        };
        info!(
            parser = ?self.data_parser_plugin,
            urls = self.urls.len(),
            fields = config.fields.len(),
            paged = config.pager.is_some(),
            "Loaded source configuration"
        );
        Ok(config)
    }

    pub fn id_fields(&self) -> Vec<String> {
        self.ids.keys().cloned().collect()
    }
}

/// Immutable per-run parser settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParserConfig {
    pub item_selector: ItemSelector,
    pub fields: Vec<FieldSelector>,
    pub namespaces: NamespaceRegistry,
    pub pager: Option<PagerConfig>,
    pub include_raw_data: bool,
}

impl ParserConfig {
    pub fn new(item_selector: impl Into<ItemSelector>, fields: Vec<FieldSelector>) -> Self {
        ParserConfig {
            item_selector: item_selector.into(),
            fields,
            ..Default::default()
        }
    }

    pub fn with_pager(mut self, pager: PagerConfig) -> Self {
        self.pager = Some(pager);
        self
    }

    pub fn with_namespaces(mut self, namespaces: NamespaceRegistry) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_raw_data(mut self, include_raw_data: bool) -> Self {
        self.include_raw_data = include_raw_data;
        self
    }
}
