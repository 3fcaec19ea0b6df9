use std::sync::Arc;

use feed_source_core::config::{FieldSelector, ParserConfig};
use feed_source_core::contract::{DataParser, MockDataFetcher};
use feed_source_core::error::{ConfigError, ParserError};
use feed_source_core::parser::{SimpleXmlParser, XmlParser};
use feed_source_core::row::{FieldValue, Row};
use feed_source_core::xml::NamespaceRegistry;

const URL: &str = "https://feeds.example.com/catalog.xml";

const CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<catalog>
  <book id="b1">
    <title>Pride &amp; Prejudice</title>
    <tag>romance</tag>
    <tag>classic</tag>
    <publisher><name>Egerton</name><city>London</city></publisher>
  </book>
  <shelf>
    <book id="nested"><title>Not a direct child</title></book>
  </shelf>
  <book id="b2">
    <title><![CDATA[Emma]]></title>
    <author>Jane Austen</author>
  </book>
  <book id="b3"/>
</catalog>"#;

fn fetcher_serving(body: &'static str) -> MockDataFetcher {
    let mut fetcher = MockDataFetcher::new();
    fetcher
        .expect_response_content()
        .returning(move |_| Ok(body.as_bytes().to_vec()));
    fetcher
}

async fn all_rows(parser: &mut dyn DataParser) -> Vec<Row> {
    assert!(parser.open_source_url(URL).await.unwrap());
    let mut rows = Vec::new();
    while let Some(row) = parser.fetch_next_row().unwrap() {
        rows.push(row);
    }
    rows
}

fn text(value: &str) -> FieldValue {
    FieldValue::from(value)
}

#[tokio::test]
async fn test_streaming_rows_match_dom_rows() {
    let fields = vec![
        FieldSelector::new("id", "@id"),
        FieldSelector::new("title", "title"),
        FieldSelector::new("tags", "tag"),
        FieldSelector::new("publisher", "publisher"),
        FieldSelector::new("author", "author"),
    ];
    let mut dom = SimpleXmlParser::new(
        ParserConfig::new("/catalog/book", fields.clone()),
        Arc::new(fetcher_serving(CATALOG)),
    )
    .unwrap();
    let mut stream = XmlParser::new(
        ParserConfig::new("/catalog/book", fields),
        Arc::new(fetcher_serving(CATALOG)),
    )
    .unwrap();

    let dom_rows = all_rows(&mut dom).await;
    let stream_rows = all_rows(&mut stream).await;

    assert_eq!(stream_rows.len(), 3);
    assert_eq!(dom_rows, stream_rows);
    assert_eq!(stream_rows[0].get("title"), Some(&text("Pride & Prejudice")));
    assert_eq!(stream_rows[1].get("title"), Some(&text("Emma")));
    assert!(matches!(
        stream_rows[0].get("publisher"),
        Some(FieldValue::Element(_))
    ));
    assert_eq!(stream_rows[2].len(), 1);
}

#[tokio::test]
async fn test_predicate_filters_candidates() {
    let mut parser = XmlParser::new(
        ParserConfig::new(
            "/catalog/book[author='Jane Austen']",
            vec![FieldSelector::new("id", "@id")],
        ),
        Arc::new(fetcher_serving(CATALOG)),
    )
    .unwrap();

    let rows = all_rows(&mut parser).await;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&text("b2")));
}

const GROUPS: &str = r#"<root>
  <source>feed</source>
  <group>
    <label>A</label>
    <item><v>1</v></item>
    <item><v>2</v></item>
  </group>
  <group>
    <label>B</label>
    <item><v>3</v></item>
  </group>
  <group>
    <item><v>4</v></item>
    <label>C</label>
  </group>
</root>"#;

#[tokio::test]
async fn test_ancestor_cache_does_not_leak_across_scopes() {
    let mut parser = XmlParser::new(
        ParserConfig::new(
            "/root/group/item",
            vec![
                FieldSelector::new("v", "v"),
                FieldSelector::new("label", "../label"),
                FieldSelector::new("source", "../../source"),
            ],
        ),
        Arc::new(fetcher_serving(GROUPS)),
    )
    .unwrap();

    let rows = all_rows(&mut parser).await;

    let labels: Vec<Option<&FieldValue>> = rows.iter().map(|row| row.get("label")).collect();
    assert_eq!(
        labels,
        vec![Some(&text("A")), Some(&text("A")), Some(&text("B")), None]
    );
    assert!(rows.iter().all(|row| row.get("source") == Some(&text("feed"))));
    assert_eq!(rows[3].get("v"), Some(&text("4")));
}

#[tokio::test]
async fn test_ancestor_lookup_outside_document_is_empty() {
    let mut parser = XmlParser::new(
        ParserConfig::new(
            "/root/group/item",
            vec![FieldSelector::new("far", "../../../../label")],
        ),
        Arc::new(fetcher_serving(GROUPS)),
    )
    .unwrap();

    parser.open_source_url(URL).await.unwrap();
    let row = parser.fetch_next_row().unwrap().unwrap();

    assert!(!row.contains("far"));
    assert!(parser.ancestor_elements(4, "label").is_empty());
}

#[tokio::test]
async fn test_ancestor_elements_exposes_captured_siblings() {
    let mut parser = XmlParser::new(
        ParserConfig::new(
            "/root/group/item",
            vec![FieldSelector::new("label", "../label")],
        ),
        Arc::new(fetcher_serving(GROUPS)),
    )
    .unwrap();

    parser.open_source_url(URL).await.unwrap();
    parser.fetch_next_row().unwrap();

    let captured = parser.ancestor_elements(1, "label");
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].text(), "A");
}

#[tokio::test]
async fn test_mismatched_tags_raise_error_with_line() {
    for item_selector in ["/a/b", "/a/c"] {
        let mut parser = XmlParser::new(
            ParserConfig::new(item_selector, vec![]),
            Arc::new(fetcher_serving("<a><b></a>")),
        )
        .unwrap();

        parser.open_source_url(URL).await.unwrap();
        let err = parser.fetch_next_row().unwrap_err();

        let ParserError::Xml(details) = &err else {
            panic!("expected an XML parse error, got {err:?}");
        };
        assert_eq!(details.line, 1, "{item_selector}");
        assert_eq!(details.file, URL);
        assert!(err.to_string().contains("Line: 1"));
        assert!(parser.fetch_next_row().unwrap().is_none());
    }
}

#[tokio::test]
async fn test_truncated_document_is_an_error() {
    let mut parser = XmlParser::new(
        ParserConfig::new("/a/c", vec![]),
        Arc::new(fetcher_serving("<a>\n<b>text</b>\n")),
    )
    .unwrap();

    parser.open_source_url(URL).await.unwrap();
    let err = parser.fetch_next_row().unwrap_err();
    assert!(matches!(err, ParserError::Xml(_)), "{err:?}");
}

#[tokio::test]
async fn test_colon_in_item_selector_compares_prefixed_names() {
    const DC: &str = r#"<rss xmlns:dc="urn:dc">
  <dc:entry><dc:title>Prefixed</dc:title></dc:entry>
  <entry><dc:title>Bare</dc:title></entry>
</rss>"#;
    let mut parser = XmlParser::new(
        ParserConfig::new("/rss/dc:entry", vec![FieldSelector::new("title", "dc:title")]),
        Arc::new(fetcher_serving(DC)),
    )
    .unwrap();

    let rows = all_rows(&mut parser).await;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("title"), Some(&text("Prefixed")));
}

#[tokio::test]
async fn test_plain_item_selector_compares_local_names() {
    const PREFIXED: &str = r#"<x:feed xmlns:x="urn:x"><x:entry><x:id>1</x:id></x:entry><x:entry><x:id>2</x:id></x:entry></x:feed>"#;
    let mut parser = XmlParser::new(
        ParserConfig::new("/feed/entry", vec![FieldSelector::new("id", "x:id")]),
        Arc::new(fetcher_serving(PREFIXED)),
    )
    .unwrap();

    let rows = all_rows(&mut parser).await;

    let ids: Vec<_> = rows.iter().map(|row| row.get("id")).collect();
    assert_eq!(ids, vec![Some(&text("1")), Some(&text("2"))]);
}

#[tokio::test]
async fn test_items_see_declarations_from_skipped_ancestors_only_while_open() {
    const NESTED: &str = r#"<feed xmlns:x="urn:x">
  <group xmlns:y="urn:y">
    <skip xmlns:x="urn:other"><x:id>0</x:id></skip>
    <entry><x:id>1</x:id><y:tag>t</y:tag></entry>
  </group>
  <entry><x:id>2</x:id></entry>
</feed>"#;
    let namespaces: NamespaceRegistry = [("a", "urn:x"), ("b", "urn:y")].into_iter().collect();
    let mut parser = XmlParser::new(
        ParserConfig::new(
            "/feed/group/entry",
            vec![
                FieldSelector::new("id", "a:id"),
                FieldSelector::new("tag", "b:tag"),
            ],
        )
        .with_namespaces(namespaces),
        Arc::new(fetcher_serving(NESTED)),
    )
    .unwrap();

    let rows = all_rows(&mut parser).await;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&text("1")));
    assert_eq!(rows[0].get("tag"), Some(&text("t")));
}

#[test]
fn test_item_selector_compiles_into_path_and_ancestors() {
    let parser = XmlParser::new(
        ParserConfig::new(
            "/a/b/c[@x='1']",
            vec![
                FieldSelector::new("p", "../p"),
                FieldSelector::new("q", "..\\..\\q"),
                FieldSelector::new("r", "r"),
            ],
        ),
        Arc::new(MockDataFetcher::new()),
    )
    .unwrap();

    assert_eq!(parser.elements_to_match(), ["a", "b", "c"]);
    assert_eq!(parser.parent_elements_of_interest(), ["p", "q"]);
}

#[test]
fn test_invalid_predicate_is_a_configuration_error() {
    let result = XmlParser::new(
        ParserConfig::new("/a/b[(]", vec![]),
        Arc::new(MockDataFetcher::new()),
    );
    assert!(matches!(
        result,
        Err(ConfigError::InvalidItemSelector { .. })
    ));
}

#[tokio::test]
async fn test_scratch_file_is_replaced_on_reopen_and_removed_on_drop() {
    let mut parser = XmlParser::new(
        ParserConfig::new("/root/group/item", vec![]),
        Arc::new(fetcher_serving(GROUPS)),
    )
    .unwrap();

    parser.open_source_url(URL).await.unwrap();
    let first = parser.scratch_path().unwrap().to_path_buf();
    assert!(first.exists());

    parser.open_source_url(URL).await.unwrap();
    let second = parser.scratch_path().unwrap().to_path_buf();
    assert!(!first.exists());
    assert!(second.exists());

    drop(parser);
    assert!(!second.exists());
}

#[tokio::test]
async fn test_reopen_restarts_from_the_first_item() {
    let mut parser = XmlParser::new(
        ParserConfig::new("/root/group/item", vec![FieldSelector::new("v", "v")]),
        Arc::new(fetcher_serving(GROUPS)),
    )
    .unwrap();

    parser.open_source_url(URL).await.unwrap();
    parser.fetch_next_row().unwrap();
    parser.fetch_next_row().unwrap();
    parser.rewind();
    parser.open_source_url(URL).await.unwrap();

    let row = parser.fetch_next_row().unwrap().unwrap();
    assert_eq!(row.get("v"), Some(&text("1")));
}

#[tokio::test]
async fn test_pager_selector_reads_the_document() {
    const PAGED: &str = r#"<results><meta><page>3</page></meta><item/></results>"#;
    let mut parser = XmlParser::new(
        ParserConfig::new("/results/item", vec![]),
        Arc::new(fetcher_serving(PAGED)),
    )
    .unwrap();

    let page = parser.select(URL, "/results/meta/page").await.unwrap();
    assert_eq!(page, Some(serde_json::json!("3")));
    let missing = parser.select(URL, "/results/meta/total").await.unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn test_declared_latin1_stream_matches_dom() {
    const LATIN1: &[u8] =
        b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r><i><t>caf\xE9</t></i></r>";
    let serving_latin1 = || {
        let mut fetcher = MockDataFetcher::new();
        fetcher
            .expect_response_content()
            .returning(|_| Ok(LATIN1.to_vec()));
        Arc::new(fetcher)
    };
    let fields = vec![FieldSelector::new("t", "t")];
    let mut dom =
        SimpleXmlParser::new(ParserConfig::new("/r/i", fields.clone()), serving_latin1()).unwrap();
    let mut stream =
        XmlParser::new(ParserConfig::new("/r/i", fields), serving_latin1()).unwrap();

    let dom_rows = all_rows(&mut dom).await;
    let stream_rows = all_rows(&mut stream).await;

    assert_eq!(stream_rows.len(), 1);
    assert_eq!(stream_rows[0].get("t"), Some(&text("café")));
    assert_eq!(stream_rows, dom_rows);
}
