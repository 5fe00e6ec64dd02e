//! End-to-end integration tests for the scan pipeline.
//!
//! Every test is hermetic: documents and the chat-completions endpoint are
//! served by a local wiremock server and history lands in a tempdir, so no
//! network access or API key is needed.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use coascan::{
    HistoryStore, PipelineConfig, PipelineState, ScanOutcome, ScanPipeline, Stage,
    ANALYSIS_REQUEST_FAILED, EXTRACT_FAILED_TEXT, FETCH_FAILED_TEXT, NO_RESPONSE_PLACEHOLDER,
    READY_FOR_ANALYSIS,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Build a minimal PDF with one text run per page.
fn sample_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("serialize pdf");
    buf
}

/// A pipeline whose analysis endpoint is the mock server itself.
fn pipeline_at(server: &MockServer, dir: &TempDir) -> ScanPipeline {
    let config = PipelineConfig::builder()
        .api_base(server.uri())
        .api_key("test-key")
        .build()
        .expect("valid config");
    let history = HistoryStore::open(dir.path().join("history.json"));
    ScanPipeline::new(config, history).expect("pipeline must build")
}

/// Mount a GET mock serving `body` as a PDF at `route`.
async fn serve_pdf(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/pdf"))
        .mount(server)
        .await;
}

/// A 200 chat-completions reply with the given message content.
fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": content } }]
    }))
}

/// Mount a POST /chat/completions mock with the given reply.
async fn mount_chat(server: &MockServer, reply: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(reply)
        .mount(server)
        .await;
}

fn record_of(outcome: &Result<ScanOutcome, coascan::ScanError>) -> coascan::ScanRecord {
    match outcome {
        Ok(ScanOutcome::Recorded(record)) => record.clone(),
        other => panic!("expected a recorded outcome, got {other:?}"),
    }
}

// ── Scan stage ───────────────────────────────────────────────────────────────

/// A successful scan stores page-marked text and the ready placeholder,
/// and leaves the pipeline waiting for an analysis request.
#[tokio::test]
async fn scan_stores_extracted_text_with_ready_placeholder() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    serve_pdf(
        &server,
        "/coa/batch-42.pdf",
        sample_pdf(&["Blue Dream flower", "THC 22.4 percent"]),
    )
    .await;

    let pipeline = pipeline_at(&server, &dir);
    let url = format!("{}/coa/batch-42.pdf", server.uri());
    let record = record_of(&pipeline.handle_scan(&url).await);

    assert_eq!(record.url, url);
    assert_eq!(record.analysis, READY_FOR_ANALYSIS);
    let p1 = record.extracted_text.find("--- Page 1 ---").expect("page 1 header");
    let p2 = record.extracted_text.find("--- Page 2 ---").expect("page 2 header");
    assert!(p1 < p2, "pages must appear in ascending order");
    assert!(record.extracted_text.contains("Blue Dream flower"));
    assert!(record.extracted_text.contains("THC 22.4 percent"));

    assert_eq!(pipeline.state_of(&url), PipelineState::ExtractedReady);

    // The record is on disk, not just in memory.
    let stored = pipeline.history().load_all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], record);
}

/// A fetch that returns 404 still produces a record, with the fixed
/// failure string standing in for the extracted text.
#[tokio::test]
async fn fetch_404_is_recorded_with_the_fixed_failure_string() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/gone.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let pipeline = pipeline_at(&server, &dir);
    let url = format!("{}/gone.pdf", server.uri());
    let record = record_of(&pipeline.handle_scan(&url).await);

    assert_eq!(record.extracted_text, FETCH_FAILED_TEXT);
    assert_eq!(record.analysis, "");
    assert_eq!(pipeline.state_of(&url), PipelineState::Failed(Stage::Fetch));
    assert_eq!(pipeline.history().load_all().len(), 1);
}

/// A payload that is not a PDF is recorded as an extraction failure.
#[tokio::test]
async fn non_pdf_payload_is_recorded_as_extraction_failure() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/page.html"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>not a pdf</html>", "text/html"),
        )
        .mount(&server)
        .await;

    let pipeline = pipeline_at(&server, &dir);
    let url = format!("{}/page.html", server.uri());
    let record = record_of(&pipeline.handle_scan(&url).await);

    assert_eq!(record.extracted_text, EXTRACT_FAILED_TEXT);
    assert_eq!(pipeline.state_of(&url), PipelineState::Failed(Stage::Extract));
}

/// Scanning the same code again inside the cooldown window is suppressed
/// before any network traffic happens.
#[tokio::test]
async fn rescan_within_cooldown_is_suppressed() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/coa.pdf"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sample_pdf(&["once"]), "application/pdf"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline_at(&server, &dir);
    let url = format!("{}/coa.pdf", server.uri());

    let first = pipeline.handle_scan(&url).await.unwrap();
    assert!(matches!(first, ScanOutcome::Recorded(_)));

    let second = pipeline.handle_scan(&url).await.unwrap();
    assert_eq!(second, ScanOutcome::Suppressed);

    assert_eq!(pipeline.history().load_all().len(), 1);
}

/// Distinct urls scan concurrently and every one lands in history.
#[tokio::test]
async fn concurrent_scans_record_all_urls() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    serve_pdf(&server, "/a.pdf", sample_pdf(&["product A"])).await;
    serve_pdf(&server, "/b.pdf", sample_pdf(&["product B"])).await;
    serve_pdf(&server, "/c.pdf", sample_pdf(&["product C"])).await;

    let pipeline = pipeline_at(&server, &dir);
    let urls: Vec<String> = ["a", "b", "c"]
        .iter()
        .map(|n| format!("{}/{}.pdf", server.uri(), n))
        .collect();

    let outcomes = pipeline.scan_many(&urls, 3).await;
    assert_eq!(outcomes.len(), 3);
    for (_, outcome) in &outcomes {
        assert!(matches!(outcome, Ok(ScanOutcome::Recorded(_))));
    }

    let mut stored: Vec<String> = pipeline
        .history()
        .load_all()
        .into_iter()
        .map(|r| r.url)
        .collect();
    stored.sort();
    let mut expected = urls.clone();
    expected.sort();
    assert_eq!(stored, expected);
}

// ── Analysis stage ───────────────────────────────────────────────────────────

/// Analysis sends the stored text to the chat endpoint and updates the
/// same record in place; no second record appears.
#[tokio::test]
async fn analysis_updates_the_same_record_in_place() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    serve_pdf(&server, "/coa.pdf", sample_pdf(&["Blue Dream flower"])).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "gpt-4.1-mini" })))
        .respond_with(chat_reply("This is a COA for Blue Dream flower."))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline_at(&server, &dir);
    let url = format!("{}/coa.pdf", server.uri());
    let scanned = record_of(&pipeline.handle_scan(&url).await);

    let analyzed = pipeline.run_analysis(&url).await.unwrap();
    assert_eq!(analyzed.analysis, "This is a COA for Blue Dream flower.");
    assert_eq!(analyzed.extracted_text, scanned.extracted_text);
    assert_eq!(pipeline.state_of(&url), PipelineState::AnalysisComplete);

    let stored = pipeline.history().load_all();
    assert_eq!(stored.len(), 1, "analysis must update, not append");
    assert_eq!(stored[0].analysis, "This is a COA for Blue Dream flower.");
}

/// A 500 from the chat endpoint persists the fixed request-failure string
/// as the analysis, and a retry is allowed from the failed state.
#[tokio::test]
async fn analysis_http_error_persists_the_request_failed_string() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    serve_pdf(&server, "/coa.pdf", sample_pdf(&["some product"])).await;
    mount_chat(&server, ResponseTemplate::new(500)).await;

    let pipeline = pipeline_at(&server, &dir);
    let url = format!("{}/coa.pdf", server.uri());
    record_of(&pipeline.handle_scan(&url).await);

    let failed = pipeline.run_analysis(&url).await.unwrap();
    assert_eq!(failed.analysis, ANALYSIS_REQUEST_FAILED);
    assert_eq!(pipeline.state_of(&url), PipelineState::Failed(Stage::Analyze));
    assert_eq!(pipeline.history().load_all()[0].analysis, ANALYSIS_REQUEST_FAILED);

    // Failed(analysis) permits another attempt.
    let retried = pipeline.run_analysis(&url).await.unwrap();
    assert_eq!(retried.analysis, ANALYSIS_REQUEST_FAILED);
}

/// A syntactically valid reply with no content is a success carrying the
/// no-response placeholder, not an error.
#[tokio::test]
async fn contentless_reply_persists_the_no_response_placeholder() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    serve_pdf(&server, "/coa.pdf", sample_pdf(&["some product"])).await;
    mount_chat(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "choices": [{ "message": {} }] })),
    )
    .await;

    let pipeline = pipeline_at(&server, &dir);
    let url = format!("{}/coa.pdf", server.uri());
    record_of(&pipeline.handle_scan(&url).await);

    let analyzed = pipeline.run_analysis(&url).await.unwrap();
    assert_eq!(analyzed.analysis, NO_RESPONSE_PLACEHOLDER);
    assert_eq!(pipeline.state_of(&url), PipelineState::AnalysisComplete);
}

/// Re-analysis writes through the same upsert path as a scan, so the
/// record moves back to the front of the history.
#[tokio::test]
async fn reanalysis_moves_the_record_to_the_front() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    serve_pdf(&server, "/a.pdf", sample_pdf(&["product A"])).await;
    serve_pdf(&server, "/b.pdf", sample_pdf(&["product B"])).await;
    mount_chat(&server, chat_reply("Summary A")).await;

    let pipeline = pipeline_at(&server, &dir);
    let url_a = format!("{}/a.pdf", server.uri());
    let url_b = format!("{}/b.pdf", server.uri());

    record_of(&pipeline.handle_scan(&url_a).await);
    record_of(&pipeline.handle_scan(&url_b).await);
    assert_eq!(pipeline.history().load_all()[0].url, url_b, "newest first");

    pipeline.run_analysis(&url_a).await.unwrap();

    let stored = pipeline.history().load_all();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].url, url_a);
    assert_eq!(stored[0].analysis, "Summary A");
    assert_eq!(stored[1].url, url_b);
}

/// A record scanned by an earlier process can be analyzed by a later one:
/// the stored text is recalled from disk, nothing is refetched.
#[tokio::test]
async fn analysis_works_across_a_process_restart() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/coa.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sample_pdf(&["Blue Dream flower"]), "application/pdf"),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_chat(&server, chat_reply("Recalled summary")).await;

    let url = format!("{}/coa.pdf", server.uri());
    {
        let first_run = pipeline_at(&server, &dir);
        record_of(&first_run.handle_scan(&url).await);
    }

    // Fresh pipeline, same history file: state starts Idle everywhere.
    let second_run = pipeline_at(&server, &dir);
    assert_eq!(second_run.state_of(&url), PipelineState::Idle);

    let analyzed = second_run.run_analysis(&url).await.unwrap();
    assert_eq!(analyzed.analysis, "Recalled summary");
    assert!(analyzed.extracted_text.contains("Blue Dream flower"));
    assert_eq!(second_run.state_of(&url), PipelineState::AnalysisComplete);
}

// ── Relay ────────────────────────────────────────────────────────────────────

/// With a relay configured, the fetcher never contacts the target host:
/// it asks the relay, passing the whole target url as one encoded parameter.
#[tokio::test]
async fn relay_requests_carry_the_target_as_one_encoded_parameter() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // The target host does not exist; only the relay can serve it.
    let target = "https://cdn.example.com/coa.pdf?batch=42&lot=A";
    Mock::given(method("GET"))
        .and(path("/relay"))
        .and(query_param("url", target))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sample_pdf(&["relayed product"]), "application/pdf"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = PipelineConfig::builder()
        .api_base(server.uri())
        .api_key("test-key")
        .relay_endpoint(format!("{}/relay?url=", server.uri()))
        .build()
        .unwrap();
    let history = HistoryStore::open(dir.path().join("history.json"));
    let pipeline = ScanPipeline::new(config, history).unwrap();

    let record = record_of(&pipeline.handle_scan(target).await);
    assert!(record.extracted_text.contains("relayed product"));
    assert_eq!(record.url, target, "history keys on the original url");
}

// ── Recall and shutdown ──────────────────────────────────────────────────────

/// Recall is a pure read: no fetch, no analysis call, and the stored
/// record comes back as persisted.
#[tokio::test]
async fn recall_reads_without_refetching() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/coa.pdf"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sample_pdf(&["once"]), "application/pdf"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_reply("never sent"))
        .expect(0)
        .mount(&server)
        .await;

    let pipeline = pipeline_at(&server, &dir);
    let url = format!("{}/coa.pdf", server.uri());
    let scanned = record_of(&pipeline.handle_scan(&url).await);

    let recalled = pipeline.recall(&url).expect("record must exist");
    assert_eq!(recalled, scanned);
    assert_eq!(pipeline.state_of(&url), PipelineState::ExtractedReady);
}

/// Results arriving after shutdown are discarded at the commit point:
/// the run reports Cancelled and history stays untouched.
#[tokio::test]
async fn shutdown_discards_in_flight_results() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/slow.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sample_pdf(&["too late"]), "application/pdf")
                .set_delay(Duration::from_millis(250)),
        )
        .mount(&server)
        .await;

    let pipeline = Arc::new(pipeline_at(&server, &dir));
    let url = format!("{}/slow.pdf", server.uri());

    let task = {
        let pipeline = Arc::clone(&pipeline);
        let url = url.clone();
        tokio::spawn(async move { pipeline.handle_scan(&url).await })
    };

    // Let the fetch start, then tear the pipeline down under it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.shutdown();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, ScanOutcome::Cancelled);
    assert!(
        pipeline.history().load_all().is_empty(),
        "a cancelled scan must not write history"
    );
}
