//! Scripted provider — the deterministic test double used across the
//! workspace. Plays back a queue of responses (or errors); when the queue
//! runs dry it either repeats the last step or returns a fixed reply.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use strand_domain::error::{Error, Result};
use strand_domain::message::ToolCall;

use crate::traits::{ChatRequest, LlmProvider, LlmResponse, TokenSink, Usage};

enum Step {
    Respond(LlmResponse),
    Fail(fn() -> Error),
}

pub struct ScriptedProvider {
    id: String,
    steps: Mutex<VecDeque<Step>>,
    /// When the queue is empty: repeat this response forever.
    repeat: Mutex<Option<LlmResponse>>,
    calls: AtomicUsize,
    streaming: bool,
    /// Message count of the most recent request, for assertions.
    last_request_len: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Mutex::new(VecDeque::new()),
            repeat: Mutex::new(None),
            calls: AtomicUsize::new(0),
            streaming: false,
            last_request_len: AtomicUsize::new(0),
        }
    }

    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Queue a plain text reply.
    pub fn push_text(self, content: &str) -> Self {
        self.steps
            .lock()
            .push_back(Step::Respond(scripted_response(content, vec![])));
        self
    }

    /// Queue a reply that invokes tools.
    pub fn push_tool_calls(self, content: &str, calls: Vec<ToolCall>) -> Self {
        self.steps
            .lock()
            .push_back(Step::Respond(scripted_response(content, calls)));
        self
    }

    /// Queue an error.
    pub fn push_error(self, make: fn() -> Error) -> Self {
        self.steps.lock().push_back(Step::Fail(make));
        self
    }

    /// After the queue drains, repeat this tool-calling response forever
    /// (used by max-turns tests).
    pub fn repeat_tool_call(self, name: &str, input: serde_json::Value) -> Self {
        let call = ToolCall {
            id: format!("{}-repeat", self.id),
            name: name.to_owned(),
            input,
        };
        *self.repeat.lock() = Some(scripted_response("", vec![call]));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request_len(&self) -> usize {
        self.last_request_len.load(Ordering::SeqCst)
    }

    fn next_response(&self, req: &ChatRequest) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_request_len.store(req.messages.len(), Ordering::SeqCst);

        if let Some(step) = self.steps.lock().pop_front() {
            return match step {
                Step::Respond(mut resp) => {
                    // Tool-call IDs must be unique per turn; suffix repeats.
                    let n = self.calls.load(Ordering::SeqCst);
                    for tc in resp.tool_calls.iter_mut() {
                        if tc.id.is_empty() {
                            tc.id = format!("call-{n}");
                        }
                    }
                    Ok(resp)
                }
                Step::Fail(make) => Err(make()),
            };
        }

        if let Some(template) = self.repeat.lock().as_ref() {
            let mut resp = template.clone();
            let n = self.calls.load(Ordering::SeqCst);
            for tc in resp.tool_calls.iter_mut() {
                tc.id = format!("call-{n}");
            }
            return Ok(resp);
        }

        Ok(scripted_response("done", vec![]))
    }
}

fn scripted_response(content: &str, tool_calls: Vec<ToolCall>) -> LlmResponse {
    let stop_reason = if tool_calls.is_empty() {
        "stop"
    } else {
        "tool_use"
    };
    LlmResponse {
        content: content.to_owned(),
        tool_calls,
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
            cost_usd: 0.0001,
        },
        stop_reason: Some(stop_reason.into()),
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<LlmResponse> {
        self.next_response(req)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn chat_stream(&self, req: &ChatRequest, on_token: &TokenSink) -> Result<LlmResponse> {
        if !self.streaming {
            return Err(Error::Upstream(format!(
                "provider {} does not support streaming",
                self.id
            )));
        }
        let resp = self.next_response(req)?;
        for chunk in resp.content.split_inclusive(' ') {
            on_token(chunk);
        }
        Ok(resp)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
