//! Buffered token-streaming progress events.
//!
//! When a provider supports streaming and the caller installed a progress
//! callback, raw tokens are buffered and flushed on either 20 accumulated
//! tokens or 50 ms since the last flush. Time-to-first-token is measured
//! once; a final `progress = 100` event closes the stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use strand_domain::error::Result;

use crate::traits::{ChatRequest, LlmProvider, LlmResponse};

/// Flush once this many tokens have accumulated.
const FLUSH_TOKEN_COUNT: usize = 20;
/// Or once this much time has passed since the last flush.
const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// A progress update surfaced to the embedder during a chat call.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// 0–100. Token-stream events report an indeterminate 50.
    pub progress_pct: u8,
    pub message: String,
    /// Buffered token text, present on token-stream events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<String>,
    pub is_token_stream: bool,
    /// Time to first token, set once on the first token flush.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<u64>,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

struct TokenBuffer {
    pending: Vec<String>,
    last_flush: Instant,
    started: Instant,
    ttft_ms: Option<u64>,
}

/// Stream a completion through `provider`, forwarding buffered token
/// events to `on_progress`, and return the assembled response.
///
/// Callers must probe [`LlmProvider::supports_streaming`] first; this
/// path deliberately bypasses the retry layer.
pub async fn chat_stream_with_progress(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    on_progress: ProgressCallback,
) -> Result<LlmResponse> {
    let buffer = Arc::new(Mutex::new(TokenBuffer {
        pending: Vec::new(),
        last_flush: Instant::now(),
        started: Instant::now(),
        ttft_ms: None,
    }));

    let sink_buffer = buffer.clone();
    let sink_progress = on_progress.clone();
    let on_token = move |token: &str| {
        let mut buf = sink_buffer.lock();
        if buf.ttft_ms.is_none() {
            buf.ttft_ms = Some(buf.started.elapsed().as_millis() as u64);
        }
        buf.pending.push(token.to_owned());
        let due = buf.pending.len() >= FLUSH_TOKEN_COUNT
            || buf.last_flush.elapsed() >= FLUSH_INTERVAL;
        if due {
            let event = flush(&mut buf);
            drop(buf);
            sink_progress(event);
        }
    };

    let response = provider.chat_stream(req, &on_token).await?;

    // Drain whatever is still buffered, then close out.
    {
        let mut buf = buffer.lock();
        if !buf.pending.is_empty() {
            let event = flush(&mut buf);
            drop(buf);
            on_progress(event);
        }
    }
    on_progress(ProgressEvent {
        progress_pct: 100,
        message: "completed".into(),
        tokens: None,
        is_token_stream: false,
        ttft_ms: None,
    });

    Ok(response)
}

fn flush(buf: &mut TokenBuffer) -> ProgressEvent {
    let text: String = buf.pending.join("");
    buf.pending.clear();
    buf.last_flush = Instant::now();
    let ttft = buf.ttft_ms.take();
    ProgressEvent {
        progress_pct: 50,
        message: "streaming".into(),
        tokens: Some(text),
        is_token_stream: true,
        ttft_ms: ttft,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;
    use strand_domain::message::Message;

    fn collect_events() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let cb: ProgressCallback = Arc::new(move |e| sink.lock().push(e));
        (cb, events)
    }

    #[tokio::test]
    async fn streams_tokens_and_final_event() {
        let provider = ScriptedProvider::new("stream")
            .with_streaming()
            .push_text("hello world from the model");
        let (cb, events) = collect_events();

        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            tools: vec![],
        };
        let resp = chat_stream_with_progress(&provider, &req, cb).await.unwrap();
        assert_eq!(resp.content, "hello world from the model");

        let events = events.lock();
        let last = events.last().unwrap();
        assert_eq!(last.progress_pct, 100);
        assert!(!last.is_token_stream);

        // All token events concatenate back to the full content.
        let streamed: String = events
            .iter()
            .filter_map(|e| e.tokens.clone())
            .collect();
        assert_eq!(streamed, "hello world from the model");
    }

    #[tokio::test]
    async fn ttft_reported_once() {
        let provider = ScriptedProvider::new("stream")
            .with_streaming()
            .push_text("a b c d e f g h i j k l m n o p q r s t u v w x y z");
        let (cb, events) = collect_events();

        let req = ChatRequest::default();
        chat_stream_with_progress(&provider, &req, cb).await.unwrap();

        let events = events.lock();
        let with_ttft: Vec<_> = events.iter().filter(|e| e.ttft_ms.is_some()).collect();
        assert_eq!(with_ttft.len(), 1);
    }

    #[tokio::test]
    async fn non_streaming_provider_errors() {
        let provider = ScriptedProvider::new("plain").push_text("hi");
        let (cb, _) = collect_events();
        let result = chat_stream_with_progress(&provider, &ChatRequest::default(), cb).await;
        assert!(result.is_err());
    }
}
