use strand_domain::error::{Error, Result};
use strand_domain::message::{Message, ToolCall, ToolDefinition};

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The assembled context to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
}

/// Token usage and cost for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Textual content of the response.
    pub content: String,
    /// Tool calls emitted by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information.
    pub usage: Usage,
    /// The reason the model stopped generating (e.g. "stop", "tool_use").
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stop_reason: Some("stop".into()),
            ..Default::default()
        }
    }
}

/// Sink for raw streamed tokens. Installed by the progress layer; the
/// provider calls it once per token chunk.
pub type TokenSink = dyn Fn(&str) + Send + Sync;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability every LLM adapter must implement.
///
/// Streaming is probed through [`LlmProvider::supports_streaming`], never
/// assumed from configuration. Providers own their stream-level
/// resilience — the retry layer only wraps the non-streaming path.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<LlmResponse>;

    /// Whether this provider/model combination can stream tokens.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream a completion, invoking `on_token` for each token chunk, and
    /// return the assembled response. Only called after a positive
    /// capability probe.
    async fn chat_stream(&self, req: &ChatRequest, on_token: &TokenSink) -> Result<LlmResponse> {
        let _ = (req, on_token);
        Err(Error::Upstream(format!(
            "provider {} does not support streaming",
            self.provider_id()
        )))
    }

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
