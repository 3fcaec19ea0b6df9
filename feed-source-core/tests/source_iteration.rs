use std::sync::Arc;

use feed_source_core::config::{FieldSelector, PagerConfig, ParserConfig, SourceConfig};
use feed_source_core::contract::MockDataFetcher;
use feed_source_core::parser::JsonParser;
use feed_source_core::row::FieldValue;
use feed_source_core::source::DataSource;
use serde_json::json;

const PAGE_1: &str = "https://api.example.com/items?page=1";
const PAGE_2: &str = "https://api.example.com/items?page=2";
const EMPTY: &str = "https://api.example.com/empty";

fn routed_fetcher() -> MockDataFetcher {
    let mut fetcher = MockDataFetcher::new();
    fetcher.expect_response_content().returning(|url| {
        let body = match url {
            PAGE_1 => r#"{"items":[{"id":1,"name":"one"},{"id":2,"name":"two"}],"next":"https://api.example.com/items?page=2"}"#,
            PAGE_2 => r#"{"items":[{"id":3,"name":"three"}]}"#,
            EMPTY => "null",
            other => return Err(format!("unexpected url {other}").into()),
        };
        Ok(body.as_bytes().to_vec())
    });
    fetcher
}

fn paged_source(urls: Vec<&str>) -> DataSource {
    let config = ParserConfig::new(
        "items",
        vec![FieldSelector::new("id", "id"), FieldSelector::new("name", "name")],
    )
    .with_pager(PagerConfig::Urls {
        selector: Some("next".into()),
    });
    let parser = JsonParser::new(config, Arc::new(routed_fetcher()));
    DataSource::new(
        Box::new(parser),
        urls.into_iter().map(str::to_string).collect(),
        vec!["id".into()],
    )
}

fn ids(rows: &[feed_source_core::row::Row]) -> Vec<serde_json::Value> {
    rows.iter().map(|row| row.to_json()["id"].clone()).collect()
}

#[tokio::test]
async fn test_pages_are_chained_in_order() {
    let mut source = paged_source(vec![PAGE_1]);

    let rows = source.rows(None).await.unwrap();

    assert_eq!(ids(&rows), vec![json!(1), json!(2), json!(3)]);
    assert_eq!(source.urls(), [PAGE_1, PAGE_2]);
}

#[tokio::test]
async fn test_sources_without_data_are_skipped() {
    let mut source = paged_source(vec![EMPTY, PAGE_2]);

    let rows = source.rows(None).await.unwrap();

    assert_eq!(ids(&rows), vec![json!(3)]);
}

#[tokio::test]
async fn test_known_urls_are_not_queued_twice() {
    let mut source = paged_source(vec![PAGE_1, PAGE_2]);

    assert_eq!(source.count().await.unwrap(), 3);
    assert_eq!(source.urls(), [PAGE_1, PAGE_2]);
}

#[tokio::test]
async fn test_current_id_holds_only_id_fields() {
    let mut source = paged_source(vec![PAGE_1]);

    source.rewind().await.unwrap();

    assert!(source.valid());
    let id = source.current_id().unwrap();
    assert_eq!(id.len(), 1);
    assert_eq!(id.get("id"), Some(&FieldValue::Json(json!(1))));
    assert_eq!(
        source.current().unwrap().get("name"),
        Some(&FieldValue::Json(json!("one")))
    );
}

#[tokio::test]
async fn test_rows_respects_limit_and_count_restarts() {
    let mut source = paged_source(vec![PAGE_1]);

    let first_two = source.rows(Some(2)).await.unwrap();
    assert_eq!(ids(&first_two), vec![json!(1), json!(2)]);
    assert_eq!(source.count().await.unwrap(), 3);
    assert_eq!(source.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_exhausted_source_is_invalid() {
    let mut source = paged_source(vec![EMPTY]);

    source.rewind().await.unwrap();

    assert!(!source.valid());
    assert!(source.current_id().is_none());
}

#[tokio::test]
async fn test_fetch_failure_surfaces() {
    let mut source = paged_source(vec!["https://api.example.com/broken"]);

    let err = source.rewind().await.unwrap_err();
    assert!(err.to_string().contains("https://api.example.com/broken"));
}

#[tokio::test]
async fn test_source_from_configuration() {
    let config: SourceConfig = serde_json::from_value(json!({
        "urls": [PAGE_1],
        "data_parser_plugin": "json",
        "item_selector": "items",
        "fields": [{"name": "name", "selector": "name"}],
        "ids": {"name": {"type": "string"}},
        "pager": {"type": "urls", "selector": "next"},
    }))
    .unwrap();

    let mut source = DataSource::from_config(&config, Arc::new(routed_fetcher())).unwrap();
    let rows = source.rows(None).await.unwrap();

    let names: Vec<_> = rows
        .iter()
        .filter_map(|row| row.get("name").and_then(FieldValue::as_text))
        .collect();
    assert_eq!(names, vec!["one", "two", "three"]);
}
