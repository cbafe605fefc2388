//! Segmented, token-budgeted conversation memory.
//!
//! Five layers, coldest to hottest: ROM (static), Kernel (per-session
//! working memory), L1 (hot messages), L2 (compressed summary), Swap
//! (persisted snapshots + history). Adaptive compression keeps the
//! assembled context inside the window; compression never splits a
//! tool-call/tool-result pair.

pub mod compressor;
pub mod kernel;
pub mod profile;
pub mod search;
pub mod segmented;
pub mod tokens;

pub use compressor::ContextCompressor;
pub use kernel::{CachedToolResult, Finding, FindingCategory, KernelSpace};
pub use profile::{CompressionProfile, DerivedLimits};
pub use segmented::SegmentedMemory;
pub use tokens::{count_tokens, estimate_message_tokens, estimate_messages_tokens, TokenBudget};
