//! The compressor capability and the deterministic fallback summarizer.
//!
//! Memory knows only this narrow trait, injected after construction —
//! never the agent or a full provider. The compressor returns a plain
//! summary string; no structured sections are parsed from it.

use std::collections::HashMap;

use strand_domain::error::Result;
use strand_domain::message::{Message, Role};

/// A text-completion capability used for compression and reranking.
#[async_trait::async_trait]
pub trait ContextCompressor: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Build the summarization prompt for a batch of L1 messages.
pub fn compression_prompt(messages: &[Message]) -> String {
    format!(
        "You are a conversation summarizer. Summarize the following conversation \
         history into a concise summary that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Verified facts and figures from tool results\n\n\
         Be concise but preserve all actionable context. Write in present tense.\n\
         Omit greetings and pleasantries. Focus on substance.\n\n\
         CONVERSATION:\n{}",
        render_conversation(messages)
    )
}

fn render_conversation(messages: &[Message]) -> String {
    let mut buf = String::new();
    for message in messages {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        buf.push_str(label);
        buf.push_str(": ");
        // Truncate very long entries (tool results) to keep the prompt manageable.
        if message.content.chars().count() > 2_000 {
            let head: String = message.content.chars().take(1_000).collect();
            let tail: String = {
                let chars: Vec<char> = message.content.chars().collect();
                chars[chars.len() - 500..].iter().collect()
            };
            buf.push_str(&head);
            buf.push_str(" [...] ");
            buf.push_str(&tail);
        } else {
            buf.push_str(&message.content);
        }
        buf.push('\n');
    }
    buf
}

/// Deterministic fallback used when no compressor LLM is configured:
/// keyword extraction plus the last user request.
pub fn heuristic_summary(messages: &[Message]) -> String {
    let mut frequencies: HashMap<String, usize> = HashMap::new();
    for message in messages {
        for word in message
            .content
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
        {
            if word.len() >= 4 && !is_stopword(word) {
                *frequencies.entry(word.to_owned()).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = frequencies.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let topics: Vec<String> = ranked.into_iter().take(8).map(|(w, _)| w).collect();

    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| {
            let head: String = m.content.chars().take(200).collect();
            head
        })
        .unwrap_or_default();

    let mut summary = format!("[Compressed {} earlier messages.", messages.len());
    if !topics.is_empty() {
        summary.push_str(&format!(" Topics: {}.", topics.join(", ")));
    }
    if !last_user.is_empty() {
        summary.push_str(&format!(" Last user request: {last_user}"));
    }
    summary.push(']');
    summary
}

fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "this" | "that" | "with" | "from" | "have" | "what" | "your" | "about" | "would"
            | "could" | "should" | "there" | "their" | "which" | "will" | "been" | "they"
            | "please" | "thanks"
    )
}
