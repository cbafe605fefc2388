//! The result-store capability contract and its reference types.

use serde::{Deserialize, Serialize};

use strand_domain::error::Result;

use crate::detect::DataType;

/// Which backend holds the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Memory,
    Sql,
}

/// Compact handle to a stored payload. Safe to place in LLM context.
///
/// References are weak: retrieval may fail with `NotFound` after TTL
/// eviction, in which case the owning tool call must be re-issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LargeResultRef {
    pub id: String,
    pub location: Location,
    pub content_type: String,
    pub size_bytes: usize,
    /// sha256 of the payload, hex-encoded.
    pub checksum: String,
}

/// Metadata + preview returned instead of the payload.
///
/// Contract: for payloads of N ≥ 10 KB the serialized metadata is at most
/// N / 10 bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub reference_id: String,
    pub data_type: DataType,
    pub content_type: String,
    pub size_bytes: usize,
    pub schema_info: serde_json::Value,
    pub preview: serde_json::Value,
    pub retrieval_hints: Vec<String>,
}

/// How to inspect a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuerySpec {
    /// Read-only SQL against a synthetic table `results` whose columns
    /// are derived from the payload. Valid for `json_array` and `csv`.
    Sql(String),
    /// Element/row/byte pagination. Valid for `json_array`, `csv`, `text`.
    Page { offset: usize, limit: usize },
}

/// Query result. `data` is an array of row objects for SQL and record
/// pagination, or a string chunk for text pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutput {
    pub data: serde_json::Value,
    pub row_count: usize,
    /// Total rows/elements in the payload, when cheaply known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

/// Content-addressed store for large tool outputs.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Store a payload under `id`, detecting its data type. Replaces any
    /// existing entry with the same id.
    async fn store(
        &self,
        id: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<LargeResultRef>;

    /// The metadata probe. Never returns the payload itself.
    async fn metadata(&self, id: &str) -> Result<ResultMetadata>;

    /// Run a query against the payload.
    async fn query(&self, id: &str, spec: QuerySpec) -> Result<QueryOutput>;

    /// Raw payload retrieval, for internal consumers.
    async fn fetch(&self, id: &str) -> Result<Vec<u8>>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Drop expired entries; returns how many were evicted.
    async fn sweep_expired(&self) -> Result<usize>;
}

pub(crate) fn checksum_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
