//! Wire events for the `/chat` response stream.
//!
//! The chat endpoint streams newline-delimited JSON. Each line is one of
//! three shapes, in the order the chain produces them:
//!
//! - `{"run_id": "..."}` — emitted once when the run starts;
//! - `{"sources": [...]}` — emitted once after retrieval, when non-empty;
//! - `{"tok": "..."}` — one line per generated token delta.
//!
//! # Example
//!
//! ```rust
//! use chmc_chat::events::{ChainEvent, ndjson_line};
//!
//! let event = ChainEvent::Token { tok: "Hello".to_string() };
//! assert_eq!(ndjson_line(&event), "{\"tok\":\"Hello\"}\n");
//! ```

use serde::{Deserialize, Serialize};

use crate::reports::SourceInfo;

/// Events emitted by the answer chain.
///
/// Serialized untagged so each variant maps directly onto its wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChainEvent {
    /// Run identifier, correlates the stream with feedback and traces.
    RunId {
        /// UUID of this chain run.
        run_id: String,
    },
    /// Deduped, metadata-enriched sources backing the answer.
    Sources {
        /// Source attributions in retrieval order.
        sources: Vec<SourceInfo>,
    },
    /// Incremental answer token.
    Token {
        /// The text fragment to append.
        tok: String,
    },
}

/// Encode an event as one newline-terminated JSON line.
#[must_use]
pub fn ndjson_line(event: &ChainEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("{json}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_line() {
        let line = ndjson_line(&ChainEvent::RunId {
            run_id: "abc".to_string(),
        });
        assert_eq!(line, "{\"run_id\":\"abc\"}\n");
    }

    #[test]
    fn token_line() {
        let line = ndjson_line(&ChainEvent::Token {
            tok: "housing ".to_string(),
        });
        assert_eq!(line, "{\"tok\":\"housing \"}\n");
    }

    #[test]
    fn sources_line_keeps_null_fields() {
        let line = ndjson_line(&ChainEvent::Sources {
            sources: vec![SourceInfo {
                source: "reports/r.pdf_2".to_string(),
                file: "reports/r.pdf".to_string(),
                name: Some("Report".to_string()),
                author: None,
                date_published: None,
            }],
        });
        let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["sources"][0]["source"], "reports/r.pdf_2");
        assert!(parsed["sources"][0]["author"].is_null());
    }

    #[test]
    fn round_trips_through_untagged_repr() {
        let event = ChainEvent::Token {
            tok: "x".to_string(),
        };
        let parsed: ChainEvent = serde_json::from_str(ndjson_line(&event).trim_end()).unwrap();
        assert_eq!(parsed, event);
    }
}
