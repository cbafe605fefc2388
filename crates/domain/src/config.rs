use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration consumed by the runtime core. Loading (file format,
/// watchers, hot reload) is the embedder's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Hard cap on turn-loop iterations per chat call.
    #[serde(default = "d_25")]
    pub max_turns: u32,
    /// Hard cap on tool calls per chat call.
    #[serde(default = "d_50")]
    pub max_tool_executions: u32,
    /// Total LLM context window in tokens.
    #[serde(default = "d_128k")]
    pub max_context_tokens: u32,
    /// Reserved for model output; subtracted from the window to form the
    /// working budget.
    #[serde(default = "d_4k")]
    pub reserved_output_tokens: u32,
    /// Preset compression profile: "balanced", "data_intensive",
    /// "conversational".
    #[serde(default = "d_profile")]
    pub workload_profile: String,
    #[serde(default)]
    pub memory: MemoryOverrides,
    /// Eviction threshold from L2 to swap, in tokens.
    #[serde(default = "d_5k")]
    pub max_l2_tokens: u32,
    #[serde(default = "d_30s")]
    pub llm_call_timeout_ms: u64,
    #[serde(default = "d_60s")]
    pub tool_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub enable_tracing: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_turns: 25,
            max_tool_executions: 50,
            max_context_tokens: 128_000,
            reserved_output_tokens: 4_096,
            workload_profile: d_profile(),
            memory: MemoryOverrides::default(),
            max_l2_tokens: 5_000,
            llm_call_timeout_ms: 30_000,
            tool_timeout_ms: 60_000,
            retry: RetryConfig::default(),
            enable_tracing: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Optional per-deployment overrides of the preset profile values.
/// `None` means "use the preset / dynamically derived value".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryOverrides {
    #[serde(default)]
    pub max_l1_tokens: Option<u32>,
    #[serde(default)]
    pub min_l1_messages: Option<usize>,
    #[serde(default)]
    pub warning_threshold_pct: Option<f64>,
    #[serde(default)]
    pub critical_threshold_pct: Option<f64>,
    #[serde(default)]
    pub normal_batch_size: Option<usize>,
    #[serde(default)]
    pub warning_batch_size: Option<usize>,
    #[serde(default)]
    pub critical_batch_size: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exponential-backoff policy for non-streaming LLM calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_3")]
    pub max_retries: u32,
    #[serde(default = "d_1000")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_30s")]
    pub max_delay_ms: u64,
    #[serde(default = "d_2_0")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_3() -> u32 {
    3
}
fn d_25() -> u32 {
    25
}
fn d_50() -> u32 {
    50
}
fn d_1000() -> u64 {
    1_000
}
fn d_4k() -> u32 {
    4_096
}
fn d_5k() -> u32 {
    5_000
}
fn d_128k() -> u32 {
    128_000
}
fn d_30s() -> u64 {
    30_000
}
fn d_60s() -> u64 {
    60_000
}
fn d_2_0() -> f64 {
    2.0
}
fn d_profile() -> String {
    "balanced".to_owned()
}
