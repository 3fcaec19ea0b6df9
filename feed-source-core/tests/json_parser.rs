use std::sync::Arc;

use feed_source_core::config::{FieldSelector, ParserConfig};
use feed_source_core::contract::{DataParser, MockDataFetcher};
use feed_source_core::parser::json::{select_by_depth, select_by_path};
use feed_source_core::parser::JsonParser;
use feed_source_core::row::FieldValue;
use serde_json::json;

const URL: &str = "https://feeds.example.com/items.json";

fn fetcher_serving(body: &'static [u8]) -> MockDataFetcher {
    let mut fetcher = MockDataFetcher::new();
    fetcher
        .expect_response_content()
        .returning(move |_| Ok(body.to_vec()));
    fetcher
}

fn field(name: &str, selector: &str) -> FieldSelector {
    FieldSelector::new(name, selector)
}

#[tokio::test]
async fn test_first_row_resolves_nested_field_selectors() {
    let fetcher = fetcher_serving(br#"{"items":[{"a":1,"b":{"c":2}}]}"#);
    let config = ParserConfig::new("items", vec![field("x", "a"), field("y", "b/c")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    assert!(parser.open_source_url(URL).await.unwrap());
    let row = parser.fetch_next_row().unwrap().expect("one row");

    assert_eq!(row.to_json(), json!({"x": 1, "y": 2}));
    assert!(parser.fetch_next_row().unwrap().is_none());
}

#[tokio::test]
async fn test_missing_field_yields_empty_string() {
    let fetcher = fetcher_serving(br#"{"items":[{"a":1}]}"#);
    let config = ParserConfig::new("/items/", vec![field("x", "a"), field("y", "b/c")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    parser.open_source_url(URL).await.unwrap();
    let row = parser.fetch_next_row().unwrap().unwrap();

    assert_eq!(row.get("y"), Some(&FieldValue::Json(json!(""))));
}

#[tokio::test]
async fn test_reopening_same_url_does_not_refetch() {
    let mut fetcher = MockDataFetcher::new();
    fetcher
        .expect_response_content()
        .withf(|url| url == URL)
        .times(1)
        .returning(|_| Ok(br#"{"items":[{"a":1},{"a":2}]}"#.to_vec()));
    let config = ParserConfig::new("items", vec![field("a", "a")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    assert!(parser.open_source_url(URL).await.unwrap());
    assert!(parser.open_source_url(URL).await.unwrap());
    assert_eq!(parser.remaining(), 2);
}

#[tokio::test]
async fn test_different_url_fetches_again() {
    let mut fetcher = MockDataFetcher::new();
    fetcher
        .expect_response_content()
        .times(2)
        .returning(|_| Ok(br#"[{"a":1}]"#.to_vec()));
    let config = ParserConfig::new("", vec![field("a", "a")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    parser.open_source_url(URL).await.unwrap();
    parser
        .open_source_url("https://feeds.example.com/other.json")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_empty_item_selector_iterates_whole_document() {
    let fetcher = fetcher_serving(br#"[{"id":"a"},{"id":"b"},{"id":"c"}]"#);
    let config = ParserConfig::new("", vec![field("id", "id")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    parser.open_source_url(URL).await.unwrap();
    let mut ids = Vec::new();
    while let Some(row) = parser.fetch_next_row().unwrap() {
        ids.push(row.get("id").and_then(FieldValue::as_text).unwrap());
    }
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_object_items_iterate_their_values() {
    let fetcher = fetcher_serving(br#"{"data":{"first":{"n":1},"second":{"n":2}}}"#);
    let config = ParserConfig::new("data", vec![field("n", "n")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    parser.open_source_url(URL).await.unwrap();
    let first = parser.fetch_next_row().unwrap().unwrap();
    let second = parser.fetch_next_row().unwrap().unwrap();
    assert_eq!(first.get("n"), Some(&FieldValue::Json(json!(1))));
    assert_eq!(second.get("n"), Some(&FieldValue::Json(json!(2))));
}

#[tokio::test]
async fn test_missing_item_path_opens_with_no_rows() {
    let fetcher = fetcher_serving(br#"{"data":{}}"#);
    let config = ParserConfig::new("data/items", vec![field("n", "n")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    assert!(parser.open_source_url(URL).await.unwrap());
    assert!(parser.fetch_next_row().unwrap().is_none());
}

#[tokio::test]
async fn test_null_document_does_not_open() {
    let fetcher = fetcher_serving(b"null");
    let config = ParserConfig::new("items", vec![]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    assert!(!parser.open_source_url(URL).await.unwrap());
}

#[tokio::test]
async fn test_invalid_json_does_not_open() {
    let fetcher = fetcher_serving(b"<html>not json</html>");
    let config = ParserConfig::new("items", vec![]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    assert!(!parser.open_source_url(URL).await.unwrap());
}

#[tokio::test]
async fn test_latin1_payload_is_reencoded() {
    let fetcher = fetcher_serving(b"[{\"name\":\"caf\xe9\"}]");
    let config = ParserConfig::new("", vec![field("name", "name")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    assert!(parser.open_source_url(URL).await.unwrap());
    let row = parser.fetch_next_row().unwrap().unwrap();
    assert_eq!(row.get("name").and_then(FieldValue::as_text).unwrap(), "café");
}

#[tokio::test]
async fn test_raw_item_is_attached_when_configured() {
    let fetcher = fetcher_serving(br#"{"items":[{"a":1,"extra":true}]}"#);
    let config = ParserConfig::new("items", vec![field("a", "a")]).with_raw_data(true);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    parser.open_source_url(URL).await.unwrap();
    let row = parser.fetch_next_row().unwrap().unwrap();
    assert_eq!(
        row.get("raw"),
        Some(&FieldValue::Json(json!({"a": 1, "extra": true})))
    );
}

#[tokio::test]
async fn test_falsy_items_do_not_stop_iteration() {
    let fetcher = fetcher_serving(br#"{"items":[{"a":1},{},{"a":3}]}"#);
    let config = ParserConfig::new("items", vec![field("a", "a")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    parser.open_source_url(URL).await.unwrap();
    let mut count = 0;
    while parser.fetch_next_row().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_depth_item_selector_collects_containers() {
    let fetcher = fetcher_serving(
        br#"{"meta":{"total":2},"data":[{"id":1,"tags":["x"]},{"id":2,"tags":[]}]}"#,
    );
    let config = ParserConfig::new("1", vec![field("id", "id")]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    parser.open_source_url(URL).await.unwrap();
    let first = parser.fetch_next_row().unwrap().unwrap();
    let second = parser.fetch_next_row().unwrap().unwrap();
    assert_eq!(first.get("id"), Some(&FieldValue::Json(json!(1))));
    assert_eq!(second.get("id"), Some(&FieldValue::Json(json!(2))));
    assert!(parser.fetch_next_row().unwrap().is_none());
}

#[test]
fn test_select_by_depth_counts_from_root_children() {
    let doc = json!({"a": {"b": [1, 2]}, "c": [{"d": 1}]});

    assert_eq!(select_by_depth(&doc, 0), vec![json!({"b": [1, 2]}), json!([{"d": 1}])]);
    assert_eq!(select_by_depth(&doc, 1), vec![json!([1, 2]), json!({"d": 1})]);
    assert!(select_by_depth(&doc, 5).is_empty());
}

#[test]
fn test_select_by_path_returns_empty_array_on_miss() {
    let doc = json!({"a": {"b": null, "list": [10, 20]}});

    assert_eq!(select_by_path(&doc, "a/list/1"), json!(20));
    assert_eq!(select_by_path(&doc, "a/b"), json!([]));
    assert_eq!(select_by_path(&doc, "a/missing/deeper"), json!([]));
    assert_eq!(select_by_path(&doc, "/"), doc);
}

#[tokio::test]
async fn test_fetch_failure_names_the_url() {
    let mut fetcher = MockDataFetcher::new();
    fetcher
        .expect_response_content()
        .returning(|_| Err("connection refused".into()));
    let config = ParserConfig::new("items", vec![]);
    let mut parser = JsonParser::new(config, Arc::new(fetcher));

    let err = parser.open_source_url(URL).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains(URL), "{message}");
    assert!(message.contains("connection refused"), "{message}");
}
