use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::path::Path;
use tempfile::TempDir;

/// Writes two chained JSON pages and a config reading them through the file fetcher.
fn create_paged_fixture() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("Creating temp dir failed");
    let page_1 = dir.path().join("page-1.json");
    let page_2 = dir.path().join("page-2.json");
    write(
        &page_1,
        format!(
            r#"{{"items":[{{"id":1,"title":"first"}},{{"id":2,"title":"second"}}],"next":["{}"]}}"#,
            page_2.display()
        ),
    )
    .expect("Writing page 1 failed");
    write(&page_2, r#"{"items":[{"id":3,"title":"third"}],"next":[]}"#)
        .expect("Writing page 2 failed");

    let config = dir.path().join("source.yaml");
    write(&config, config_yaml(&page_1)).expect("Writing temp config failed");
    (dir, config)
}

fn config_yaml(first_page: &Path) -> String {
    format!(
        r#"source:
  urls: "{}"
  data_parser_plugin: json
  data_fetcher_plugin: file
  item_selector: items
  fields:
    - name: id
      selector: id
    - name: title
      selector: title
  ids:
    id:
      type: integer
  pager:
    type: urls
    selector: next
"#,
        first_page.display()
    )
}

#[test]
fn rows_prints_one_json_object_per_row_across_pages() {
    let (_dir, config) = create_paged_fixture();

    let mut cmd = Command::cargo_bin("feed-source").expect("Binary exists");
    cmd.arg("rows").arg("--config").arg(&config);

    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains(r#"{"id":1,"title":"first"}"#)
                .and(predicate::str::contains(r#"{"id":2,"title":"second"}"#))
                .and(predicate::str::contains(r#"{"id":3,"title":"third"}"#)),
        );
}

#[test]
fn rows_stops_at_limit() {
    let (_dir, config) = create_paged_fixture();

    let mut cmd = Command::cargo_bin("feed-source").expect("Binary exists");
    cmd.arg("rows")
        .arg("--config")
        .arg(&config)
        .arg("--limit")
        .arg("1");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""id":1"#).and(predicate::str::contains("second").not()));
}

#[test]
fn count_prints_the_row_count() {
    let (_dir, config) = create_paged_fixture();

    let mut cmd = Command::cargo_bin("feed-source").expect("Binary exists");
    cmd.arg("count").arg("--config").arg(&config);

    cmd.assert().success().stdout("3\n");
}

#[test]
fn missing_config_fails_with_path_in_error() {
    let mut cmd = Command::cargo_bin("feed-source").expect("Binary exists");
    cmd.arg("count").arg("--config").arg("does-not-exist.yaml");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_event_and_writes_rows() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use feed_source::cli::{run, Cli, Commands};

    let (_dir, config) = create_paged_fixture();
    let cli = Cli {
        command: Commands::Rows {
            config,
            limit: Some(2),
        },
    };
    let mut out = Vec::new();

    run(cli, &mut out).await.expect("run succeeds");

    let printed = String::from_utf8(out).unwrap();
    assert_eq!(printed.lines().count(), 2);
    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
