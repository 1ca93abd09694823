//! The answer chain.
//!
//! One chain run turns a chat request into a stream of [`ChainEvent`]s:
//! a run id, the source attributions for the retrieved context, and the
//! generated answer tokens. When the request carries history, a
//! non-streaming condense step first rewrites the follow-up into a
//! standalone question so retrieval sees the full intent.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use uuid::Uuid;

use crate::events::ChainEvent;
use crate::langsmith::RunTracer;
use crate::llm::{ChatMessage, LlmDriver, LlmEvent};
use crate::reports::ReportRegistry;
use crate::retrieval::{RetrievedDoc, Retriever};

/// System prompt for answer generation. `{context}` is replaced with the
/// formatted retrieval results.
pub const RESPONSE_TEMPLATE: &str = "\
You are an expert real estate analyst, tasked with answering any question \
about CHMC reports.

Generate a comprehensive and informative answer of 80 words or less for the \
given question based solely on the provided search results (files, pages and content). You must \
only use information from the provided search results. Use an unbiased and \
journalistic tone. Combine search results together into a coherent answer. Do not \
repeat text.

If there is nothing in the context relevant to the question at hand, just say \"Hmm, \
I'm not sure.\" Don't try to make up an answer.

Anything between the following `context`  html blocks is retrieved from a knowledge \
bank, not part of the conversation with the user.

<context>
    {context}
<context/>

REMEMBER: If there is no relevant information within the context, just say \"Hmm, I'm \
not sure.\" Don't try to make up an answer. Anything between the preceding 'context' \
html blocks is retrieved from a knowledge bank, not part of the conversation with the \
user.";

/// Prompt for rewriting a follow-up into a standalone question.
pub const REPHRASE_TEMPLATE: &str = "\
Given the following conversation and a follow up question, rephrase the follow up \
question to be a standalone question.

Chat History:
{chat_history}
Follow Up Input: {question}
Standalone Question:";

/// One turn of client-supplied history: a human message and/or the AI reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryPair {
    /// What the user said.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human: Option<String>,
    /// What the assistant answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<String>,
}

/// A chat request as the chain sees it.
#[derive(Debug, Clone, Default)]
pub struct ChainRequest {
    /// The user's question.
    pub question: String,
    /// Prior turns, oldest first.
    pub history: Vec<HistoryPair>,
    /// Client-side conversation id, logged for correlation.
    pub conversation_id: Option<String>,
}

/// Boxed stream of chain events.
pub type ChainStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChainEvent>> + Send>>;

/// The retrieval-augmented answer chain.
#[derive(Clone)]
pub struct AnswerChain {
    llm: Arc<dyn LlmDriver>,
    retriever: Arc<dyn Retriever>,
    registry: Arc<ReportRegistry>,
    tracer: Option<Arc<dyn RunTracer>>,
    top_k: usize,
    max_context_tokens: usize,
}

impl std::fmt::Debug for AnswerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerChain")
            .field("top_k", &self.top_k)
            .field("max_context_tokens", &self.max_context_tokens)
            .finish()
    }
}

impl AnswerChain {
    /// Create a chain over the given driver, retriever and registry.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmDriver>,
        retriever: Arc<dyn Retriever>,
        registry: Arc<ReportRegistry>,
        top_k: usize,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            llm,
            retriever,
            registry,
            tracer: None,
            top_k,
            max_context_tokens,
        }
    }

    /// Record runs with the given tracer so the streamed run ids resolve
    /// on the feedback and trace endpoints.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<dyn RunTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Report run completion to the tracer, if one is attached.
    async fn finish_run(&self, run_id: &str, answer: &str, error: Option<&str>) {
        if let Some(tracer) = &self.tracer
            && let Err(e) = tracer.run_ended(run_id, answer, error).await
        {
            tracing::warn!(run_id = %run_id, error = %e, "failed to record run end");
        }
    }

    /// Rewrite a follow-up question into a standalone one.
    ///
    /// # Errors
    ///
    /// Returns an error if the non-streaming LLM call fails.
    pub async fn condense_question(
        &self,
        question: &str,
        history: &[ChatMessage],
    ) -> anyhow::Result<String> {
        let prompt = REPHRASE_TEMPLATE
            .replace("{chat_history}", &format_chat_history(history))
            .replace("{question}", question);
        let standalone = self.llm.complete(vec![ChatMessage::user(prompt)]).await?;
        Ok(standalone.trim().to_string())
    }

    /// Run the chain, producing the event stream for one request.
    #[must_use]
    pub fn stream(&self, req: ChainRequest) -> ChainStream {
        let chain = self.clone();
        Box::pin(async_stream::stream! {
            let run_id = Uuid::new_v4().to_string();
            yield Ok(ChainEvent::RunId { run_id: run_id.clone() });

            if let Some(tracer) = &chain.tracer
                && let Err(e) = tracer.run_started(&run_id, &req.question).await
            {
                tracing::warn!(run_id = %run_id, error = %e, "failed to record run start");
            }

            let history = convert_history(&req.history);
            let standalone = if history.is_empty() {
                req.question.clone()
            } else {
                match chain.condense_question(&req.question, &history).await {
                    Ok(q) if !q.is_empty() => q,
                    Ok(_) => req.question.clone(),
                    Err(e) => {
                        tracing::warn!(
                            run_id = %run_id,
                            error = %e,
                            "condense step failed, retrieving with the raw question"
                        );
                        req.question.clone()
                    }
                }
            };

            tracing::debug!(
                run_id = %run_id,
                conversation_id = ?req.conversation_id,
                standalone = %standalone,
                "retrieving context"
            );
            let docs = match chain.retriever.retrieve(&standalone, chain.top_k).await {
                Ok(docs) => docs,
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "retrieval failed");
                    chain.finish_run(&run_id, "", Some(&e.to_string())).await;
                    yield Err(e.into());
                    return;
                }
            };

            let sources = chain.registry.collect_sources(&docs);
            if !sources.is_empty() {
                yield Ok(ChainEvent::Sources { sources });
            }

            let docs = fit_docs(docs, chain.max_context_tokens);
            let context = format_docs(&docs);
            let mut messages = Vec::with_capacity(history.len() + 2);
            messages.push(ChatMessage::system(
                RESPONSE_TEMPLATE.replace("{context}", &context),
            ));
            messages.extend(history);
            messages.push(ChatMessage::user(req.question.clone()));

            let llm_stream = match chain.llm.stream_chat(messages).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "failed to start generation");
                    chain.finish_run(&run_id, "", Some(&e.to_string())).await;
                    yield Err(e);
                    return;
                }
            };

            let mut answer = String::new();
            futures::pin_mut!(llm_stream);
            while let Some(event) = llm_stream.next().await {
                match event {
                    Ok(LlmEvent::Delta { text }) => {
                        answer.push_str(&text);
                        yield Ok(ChainEvent::Token { tok: text });
                    }
                    Ok(LlmEvent::Done) => break,
                    Err(e) => {
                        chain.finish_run(&run_id, &answer, Some(&e.to_string())).await;
                        yield Err(e);
                        return;
                    }
                }
            }

            chain.finish_run(&run_id, &answer, None).await;
            tracing::info!(run_id = %run_id, "chain run complete");
        })
    }
}

/// Convert client history pairs into chat messages, human turn first.
#[must_use]
pub fn convert_history(history: &[HistoryPair]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    for pair in history {
        if let Some(human) = &pair.human {
            messages.push(ChatMessage::user(human.clone()));
        }
        if let Some(ai) = &pair.ai {
            messages.push(ChatMessage::assistant(ai.clone()));
        }
    }
    messages
}

/// Render history as a transcript for the rephrase prompt.
#[must_use]
pub fn format_chat_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| match m.role {
            crate::llm::MessageRole::Assistant => format!("AI: {}", m.content),
            _ => format!("Human: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format retrieved chunks as indexed `<doc>` blocks.
#[must_use]
pub fn format_docs(docs: &[RetrievedDoc]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| format!("<doc id='{i}'>{}</doc>", doc.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep the leading docs that fit in the token budget.
///
/// The first doc is always kept so the model never sees an empty context
/// when retrieval found something.
#[must_use]
pub fn fit_docs(docs: Vec<RetrievedDoc>, max_tokens: usize) -> Vec<RetrievedDoc> {
    let mut used = 0;
    let mut kept = Vec::with_capacity(docs.len());
    for doc in docs {
        let cost = token_count(&doc.content);
        if !kept.is_empty() && used + cost > max_tokens {
            break;
        }
        used += cost;
        kept.push(doc);
    }
    kept
}

/// Count tokens with the cl100k vocabulary, falling back to a character
/// heuristic if the vocabulary fails to load.
fn token_count(text: &str) -> usize {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    let bpe = BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok());
    match bpe {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count() / 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmStream;
    use crate::reports::ReportRecord;
    use crate::retrieval::RetrievalError;

    struct ScriptedLlm {
        standalone: String,
        tokens: Vec<String>,
    }

    #[async_trait::async_trait]
    impl LlmDriver for ScriptedLlm {
        async fn stream_chat(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<LlmStream> {
            let mut events: Vec<anyhow::Result<LlmEvent>> = self
                .tokens
                .iter()
                .map(|t| Ok(LlmEvent::Delta { text: t.clone() }))
                .collect();
            events.push(Ok(LlmEvent::Done));
            Ok(Box::pin(futures::stream::iter(events)))
        }

        async fn complete(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<String> {
            Ok(self.standalone.clone())
        }
    }

    struct StaticRetriever(Vec<RetrievedDoc>);

    #[async_trait::async_trait]
    impl Retriever for StaticRetriever {
        async fn retrieve(
            &self,
            _query: &str,
            _k: usize,
        ) -> Result<Vec<RetrievedDoc>, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    struct FailingRetriever;

    #[async_trait::async_trait]
    impl Retriever for FailingRetriever {
        async fn retrieve(
            &self,
            _query: &str,
            _k: usize,
        ) -> Result<Vec<RetrievedDoc>, RetrievalError> {
            Err(RetrievalError::Response("store unreachable".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingTracer {
        started: std::sync::Mutex<Vec<(String, String)>>,
        ended: std::sync::Mutex<Vec<(String, String, Option<String>)>>,
    }

    #[async_trait::async_trait]
    impl RunTracer for RecordingTracer {
        async fn run_started(&self, run_id: &str, question: &str) -> anyhow::Result<()> {
            self.started
                .lock()
                .unwrap()
                .push((run_id.to_string(), question.to_string()));
            Ok(())
        }

        async fn run_ended(
            &self,
            run_id: &str,
            answer: &str,
            error: Option<&str>,
        ) -> anyhow::Result<()> {
            self.ended.lock().unwrap().push((
                run_id.to_string(),
                answer.to_string(),
                error.map(ToString::to_string),
            ));
            Ok(())
        }
    }

    fn doc(content: &str, source: &str) -> RetrievedDoc {
        RetrievedDoc {
            content: content.to_string(),
            source: source.to_string(),
            page: Some(0),
            file: Some("reports/rental.pdf".to_string()),
        }
    }

    fn test_chain(docs: Vec<RetrievedDoc>) -> AnswerChain {
        let registry = ReportRegistry::from_records(vec![ReportRecord {
            file: "rental.pdf".to_string(),
            name: Some("Rental Market Report".to_string()),
            author: None,
            date_published: None,
        }]);
        AnswerChain::new(
            Arc::new(ScriptedLlm {
                standalone: "standalone question".to_string(),
                tokens: vec!["Vacancy".to_string(), " is low.".to_string()],
            }),
            Arc::new(StaticRetriever(docs)),
            Arc::new(registry),
            8,
            12_000,
        )
    }

    #[test]
    fn history_pairs_become_messages() {
        let history = vec![HistoryPair {
            human: Some("hi".to_string()),
            ai: Some("hello".to_string()),
        }];
        let messages = convert_history(&history);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::user("hi"));
        assert_eq!(messages[1], ChatMessage::assistant("hello"));
    }

    #[test]
    fn docs_format_with_ids() {
        let docs = vec![doc("first", "a_0"), doc("second", "a_1")];
        assert_eq!(
            format_docs(&docs),
            "<doc id='0'>first</doc>\n<doc id='1'>second</doc>"
        );
    }

    #[test]
    fn transcript_labels_roles() {
        let history = vec![ChatMessage::user("q"), ChatMessage::assistant("a")];
        assert_eq!(format_chat_history(&history), "Human: q\nAI: a");
    }

    #[test]
    fn budget_keeps_leading_docs() {
        let docs = vec![doc("short", "a_0"), doc(&"word ".repeat(500), "a_1")];
        let kept = fit_docs(docs, 10);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].content, "short");
    }

    #[test]
    fn budget_always_keeps_first_doc() {
        let docs = vec![doc(&"word ".repeat(500), "a_0")];
        assert_eq!(fit_docs(docs, 1).len(), 1);
    }

    #[tokio::test]
    async fn stream_emits_run_id_sources_then_tokens() {
        let chain = test_chain(vec![doc("Vacancy fell.", "reports/rental.pdf_0")]);
        let events: Vec<_> = chain
            .stream(ChainRequest {
                question: "What is the vacancy rate?".to_string(),
                ..Default::default()
            })
            .collect::<Vec<_>>()
            .await;

        let events: Vec<ChainEvent> = events.into_iter().map(Result::unwrap).collect();
        assert!(matches!(events[0], ChainEvent::RunId { .. }));
        match &events[1] {
            ChainEvent::Sources { sources } => {
                assert_eq!(sources.len(), 1);
                assert_eq!(sources[0].name.as_deref(), Some("Rental Market Report"));
            }
            other => panic!("expected sources, got {other:?}"),
        }
        let answer: String = events[2..]
            .iter()
            .map(|e| match e {
                ChainEvent::Token { tok } => tok.as_str(),
                other => panic!("expected token, got {other:?}"),
            })
            .collect();
        assert_eq!(answer, "Vacancy is low.");
    }

    #[tokio::test]
    async fn stream_records_the_run_it_announces() {
        let tracer = Arc::new(RecordingTracer::default());
        let chain = test_chain(vec![doc("Vacancy fell.", "reports/rental.pdf_0")])
            .with_tracer(Arc::clone(&tracer) as Arc<dyn RunTracer>);

        let events: Vec<_> = chain
            .stream(ChainRequest {
                question: "What is the vacancy rate?".to_string(),
                ..Default::default()
            })
            .collect::<Vec<_>>()
            .await;

        let ChainEvent::RunId { run_id } = events[0].as_ref().unwrap() else {
            panic!("expected a run id first");
        };

        let started = tracer.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(&started[0].0, run_id);
        assert_eq!(started[0].1, "What is the vacancy rate?");

        let ended = tracer.ended.lock().unwrap();
        assert_eq!(ended.len(), 1);
        assert_eq!(&ended[0].0, run_id);
        assert_eq!(ended[0].1, "Vacancy is low.");
        assert!(ended[0].2.is_none());
    }

    #[tokio::test]
    async fn stream_closes_the_run_with_the_retrieval_error() {
        let tracer = Arc::new(RecordingTracer::default());
        let registry = ReportRegistry::from_records(Vec::new());
        let chain = AnswerChain::new(
            Arc::new(ScriptedLlm {
                standalone: String::new(),
                tokens: Vec::new(),
            }),
            Arc::new(FailingRetriever),
            Arc::new(registry),
            8,
            12_000,
        )
        .with_tracer(Arc::clone(&tracer) as Arc<dyn RunTracer>);

        let events: Vec<_> = chain
            .stream(ChainRequest {
                question: "anything".to_string(),
                ..Default::default()
            })
            .collect::<Vec<_>>()
            .await;

        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());

        let ended = tracer.ended.lock().unwrap();
        assert_eq!(ended.len(), 1);
        assert!(ended[0].1.is_empty());
        assert!(ended[0].2.as_deref().unwrap().contains("store unreachable"));
    }

    #[tokio::test]
    async fn stream_skips_sources_when_retrieval_is_empty() {
        let chain = test_chain(Vec::new());
        let events: Vec<_> = chain
            .stream(ChainRequest {
                question: "anything".to_string(),
                ..Default::default()
            })
            .collect::<Vec<_>>()
            .await;

        let events: Vec<ChainEvent> = events.into_iter().map(Result::unwrap).collect();
        assert!(matches!(events[0], ChainEvent::RunId { .. }));
        assert!(matches!(events[1], ChainEvent::Token { .. }));
    }
}
