use searchtrail::{
    ClickEventFields, EventSchemaValidator, SearchEventFields, TelemetryClient, TelemetryConfig,
    ValidatedEvent,
};
use searchtrail_jsonl::JsonlSink;
use std::time::Duration;
use tower_service::Service;

const ID: &str = "11111111-1111-1111-1111-111111111111";

fn search() -> SearchEventFields {
    SearchEventFields {
        service_name: "catalog".into(),
        search_id: ID.into(),
        index_name: "products".into(),
        query_terms: "desk".into(),
        result_count: 9,
        scoring_profile: None,
    }
}

fn click() -> ClickEventFields {
    ClickEventFields {
        service_name: "catalog".into(),
        search_id: ID.into(),
        doc_id: "sku-7".into(),
        position: 1,
    }
}

#[tokio::test]
async fn writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let mut sink = JsonlSink::new(&path);

    let event = EventSchemaValidator::new().validate(search().into()).unwrap();
    sink.call(vec![event.clone(), event]).await.unwrap();

    let contents = std::fs::read_to_string(&path).expect("file");
    let lines: Vec<_> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["kind"], "search");
    assert_eq!(first["searchId"], ID);
    assert_eq!(first["queryTerms"], "desk");
}

#[tokio::test]
async fn missing_directory_is_permanent() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = JsonlSink::new(dir.path().join("nope").join("events.jsonl"));
    let event: ValidatedEvent = EventSchemaValidator::new().validate(click().into()).unwrap();

    let err = sink.call(vec![event]).await.unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn client_flushes_to_file_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let client = TelemetryClient::new(TelemetryConfig::default(), JsonlSink::new(&path)).unwrap();

    client.log_search_event(search()).unwrap();
    client.log_click_event(click()).unwrap();
    let report = client.flush(Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.delivered, 2);

    let contents = std::fs::read_to_string(&path).unwrap();
    let kinds: Vec<String> = contents
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["kind"].to_string())
        .collect();
    assert_eq!(kinds, vec!["\"search\"", "\"click\""]);
}

#[tokio::test]
async fn undeliverable_batches_are_dead_lettered() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonlSink::new(dir.path().join("missing").join("events.jsonl"));
    let client = TelemetryClient::new(TelemetryConfig::default(), sink).unwrap();

    client.log_search_event(search()).unwrap();
    let report = client.flush(Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(client.dead_letters().len(), 1);
    assert_eq!(client.buffered(), 0);
}
