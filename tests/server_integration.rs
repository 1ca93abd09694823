use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum_test::TestServer;
use serde_json::{Value, json};

use chmc_chat::chain::AnswerChain;
use chmc_chat::config::LangSmithConfig;
use chmc_chat::langsmith::LangSmithClient;
use chmc_chat::llm::{ChatMessage, LlmDriver, LlmEvent, LlmStream};
use chmc_chat::reports::{ReportRecord, ReportRegistry};
use chmc_chat::retrieval::{RetrievalError, RetrievedDoc, Retriever};
use chmc_chat::server::{AppState, build_router};

/// Driver that streams a fixed answer and records condense calls.
struct ScriptedLlm {
    tokens: Vec<&'static str>,
    condensed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl LlmDriver for ScriptedLlm {
    async fn stream_chat(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<LlmStream> {
        let mut events: Vec<anyhow::Result<LlmEvent>> = self
            .tokens
            .iter()
            .map(|t| {
                Ok(LlmEvent::Delta {
                    text: (*t).to_string(),
                })
            })
            .collect();
        events.push(Ok(LlmEvent::Done));
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn complete(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<String> {
        self.condensed.store(true, Ordering::SeqCst);
        Ok("What is the housing need in British Columbia?".to_string())
    }
}

/// Driver whose connection drops after emitting some deltas.
struct DroppingLlm {
    tokens: Vec<&'static str>,
}

#[async_trait::async_trait]
impl LlmDriver for DroppingLlm {
    async fn stream_chat(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<LlmStream> {
        let mut events: Vec<anyhow::Result<LlmEvent>> = self
            .tokens
            .iter()
            .map(|t| {
                Ok(LlmEvent::Delta {
                    text: (*t).to_string(),
                })
            })
            .collect();
        events.push(Err(anyhow::anyhow!("connection reset")));
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn complete(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<String> {
        anyhow::bail!("connection reset")
    }
}

struct StaticRetriever(Vec<RetrievedDoc>);

#[async_trait::async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str, _k: usize) -> Result<Vec<RetrievedDoc>, RetrievalError> {
        Ok(self.0.clone())
    }
}

struct FailingRetriever;

#[async_trait::async_trait]
impl Retriever for FailingRetriever {
    async fn retrieve(&self, _query: &str, _k: usize) -> Result<Vec<RetrievedDoc>, RetrievalError> {
        Err(RetrievalError::Response("store unreachable".to_string()))
    }
}

fn sample_docs() -> Vec<RetrievedDoc> {
    vec![
        RetrievedDoc {
            content: "Housing starts fell across BC.".to_string(),
            source: "reports/housing-outlook.pdf_2".to_string(),
            page: Some(2),
            file: Some("reports/housing-outlook.pdf".to_string()),
        },
        RetrievedDoc {
            content: "Vacancy rates remain near record lows.".to_string(),
            source: "reports/housing-outlook.pdf_2".to_string(),
            page: Some(2),
            file: Some("reports/housing-outlook.pdf".to_string()),
        },
    ]
}

fn server_with(llm: Arc<dyn LlmDriver>, retriever: Arc<dyn Retriever>) -> TestServer {
    let registry = ReportRegistry::from_records(vec![ReportRecord {
        file: "housing-outlook.pdf".to_string(),
        name: Some("Housing Market Outlook".to_string()),
        author: Some("CMHC".to_string()),
        date_published: Some("2023-10-01".to_string()),
    }]);
    let chain = Arc::new(AnswerChain::new(llm, retriever, Arc::new(registry), 8, 12_000));
    let langsmith = Arc::new(LangSmithClient::new(&LangSmithConfig {
        base_url: "http://localhost:1".to_string(),
        hostname: "http://localhost:1".to_string(),
        api_key: String::new(),
    }));

    TestServer::new(build_router(AppState { chain, langsmith })).unwrap()
}

fn test_server(condensed: Arc<AtomicBool>) -> TestServer {
    server_with(
        Arc::new(ScriptedLlm {
            tokens: vec!["Housing", " need", " is high."],
            condensed,
        }),
        Arc::new(StaticRetriever(sample_docs())),
    )
}

#[tokio::test]
async fn ping_returns_pong() {
    let server = test_server(Arc::new(AtomicBool::new(false)));
    let resp = server.get("/ping").await;
    resp.assert_status_ok();
    resp.assert_json(&json!({ "ping": "pong!" }));
}

#[tokio::test]
async fn index_serves_the_composition_root() {
    let server = test_server(Arc::new(AtomicBool::new(false)));
    let resp = server.get("/").await;
    resp.assert_status_ok();

    let body = resp.text();
    assert!(body.contains("<theme-provider>"));
    assert!(body.contains("<toast-overlay"));
    assert!(body.contains(r#"title-text="CHMC chatbot 🏙""#));
    assert!(body.contains(r#"placeholder="What the housing need in British Columbia?""#));
}

#[tokio::test]
async fn chat_streams_run_id_sources_and_tokens() {
    let server = test_server(Arc::new(AtomicBool::new(false)));
    let resp = server
        .post("/chat")
        .json(&json!({ "message": "What the housing need in British Columbia?" }))
        .await;
    resp.assert_status_ok();

    let body = resp.text();
    let lines: Vec<Value> = body
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is JSON"))
        .collect();

    assert!(lines[0]["run_id"].is_string());

    let sources = lines[1]["sources"].as_array().expect("sources line");
    assert_eq!(sources.len(), 1, "duplicate sources are deduped");
    assert_eq!(sources[0]["file"], "reports/housing-outlook.pdf");
    assert_eq!(sources[0]["name"], "Housing Market Outlook");
    assert_eq!(sources[0]["author"], "CMHC");

    let answer: String = lines[2..]
        .iter()
        .map(|l| l["tok"].as_str().expect("token line"))
        .collect();
    assert_eq!(answer, "Housing need is high.");
}

#[tokio::test]
async fn chat_body_ends_after_run_id_when_retrieval_fails() {
    let server = server_with(
        Arc::new(ScriptedLlm {
            tokens: vec!["unused"],
            condensed: Arc::new(AtomicBool::new(false)),
        }),
        Arc::new(FailingRetriever),
    );

    let resp = server
        .post("/chat")
        .json(&json!({ "message": "What is the vacancy rate?" }))
        .await;
    resp.assert_status_ok();

    let body = resp.text();
    let lines: Vec<Value> = body
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is JSON"))
        .collect();
    assert_eq!(lines.len(), 1, "body must stop after the run id line");
    assert!(lines[0]["run_id"].is_string());
}

#[tokio::test]
async fn chat_body_ends_after_emitted_tokens_when_generation_drops() {
    let server = server_with(
        Arc::new(DroppingLlm {
            tokens: vec!["Hous", "ing"],
        }),
        Arc::new(StaticRetriever(sample_docs())),
    );

    let resp = server
        .post("/chat")
        .json(&json!({ "message": "What is the vacancy rate?" }))
        .await;
    resp.assert_status_ok();

    let body = resp.text();
    let lines: Vec<Value> = body
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is JSON"))
        .collect();

    assert_eq!(lines.len(), 4, "run id, sources and the two emitted tokens");
    assert!(lines[0]["run_id"].is_string());
    assert!(lines[1]["sources"].is_array());
    assert_eq!(lines[2]["tok"], "Hous");
    assert_eq!(lines[3]["tok"], "ing");
}

#[tokio::test]
async fn chat_without_history_skips_condense_step() {
    let condensed = Arc::new(AtomicBool::new(false));
    let server = test_server(Arc::clone(&condensed));

    server
        .post("/chat")
        .json(&json!({ "message": "What is the vacancy rate?" }))
        .await
        .assert_status_ok();

    assert!(!condensed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn chat_with_history_condenses_the_question() {
    let condensed = Arc::new(AtomicBool::new(false));
    let server = test_server(Arc::clone(&condensed));

    server
        .post("/chat")
        .json(&json!({
            "message": "And in British Columbia?",
            "history": [{ "human": "What is the housing need?", "ai": "It is significant." }],
            "conversation_id": "conv-1",
        }))
        .await
        .assert_status_ok();

    assert!(condensed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn static_assets_referenced_by_the_shell_are_served() {
    let server = test_server(Arc::new(AtomicBool::new(false)));
    server.get("/static/app.css").await.assert_status_ok();
    server.get("/static/main.js").await.assert_status_ok();
}

#[tokio::test]
async fn feedback_requires_a_run_id() {
    let server = test_server(Arc::new(AtomicBool::new(false)));
    let resp = server.post("/feedback").json(&json!({})).await;
    resp.assert_status_ok();
    resp.assert_json(&json!({
        "result": "No LangSmith run ID provided",
        "code": 400,
    }));
}

#[tokio::test]
async fn feedback_patch_requires_a_feedback_id() {
    let server = test_server(Arc::new(AtomicBool::new(false)));
    let resp = server.patch("/feedback").json(&json!({})).await;
    resp.assert_status_ok();
    resp.assert_json(&json!({
        "result": "No feedback ID provided",
        "code": 400,
    }));
}

#[tokio::test]
async fn get_trace_requires_a_run_id() {
    let server = test_server(Arc::new(AtomicBool::new(false)));
    let resp = server.post("/get_trace").json(&json!({})).await;
    resp.assert_status_ok();
    resp.assert_json(&json!({
        "result": "No LangSmith run ID provided",
        "code": 400,
    }));
}
