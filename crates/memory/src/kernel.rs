//! Kernel layer — per-conversation working memory.
//!
//! Holds the available tool names, at most one cached tool result, a
//! small LRU schema cache, the findings cache, and an optionally injected
//! pattern. Everything here is cheap to serialize into the context.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema cache capacity.
pub const MAX_SCHEMAS: usize = 10;
/// Findings cache capacity.
pub const MAX_FINDINGS: usize = 50;

/// The single cached tool result the kernel retains. Prior results live
/// in the session store and the large-result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToolResult {
    pub tool_name: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingCategory {
    Statistic,
    Schema,
    Distribution,
    Observation,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::Statistic => "statistic",
            FindingCategory::Schema => "schema",
            FindingCategory::Distribution => "distribution",
            FindingCategory::Observation => "observation",
        }
    }

    fn display_order() -> [FindingCategory; 4] {
        [
            FindingCategory::Statistic,
            FindingCategory::Schema,
            FindingCategory::Distribution,
            FindingCategory::Observation,
        ]
    }
}

/// A verified fact discovered during a turn, kept to prevent the model
/// from re-deriving (or hallucinating) it later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Hierarchical key, e.g. `"sales.q3.total"`.
    pub path: String,
    pub value: serde_json::Value,
    pub category: FindingCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tool_call: Option<String>,
}

#[derive(Default)]
pub struct KernelSpace {
    tool_names: Vec<String>,
    cached_result: Option<CachedToolResult>,
    schemas: HashMap<String, String>,
    /// key → logical access time, for LRU eviction.
    schema_access: HashMap<String, u64>,
    clock: u64,
    /// Insertion/update order; oldest first.
    findings: Vec<Finding>,
    pattern: Option<String>,
}

impl KernelSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tool_names(&mut self, names: Vec<String>) {
        self.tool_names = names;
    }

    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    /// Replace the cached tool result (the kernel keeps at most one).
    pub fn cache_tool_result(&mut self, result: CachedToolResult) {
        self.cached_result = Some(result);
    }

    pub fn cached_result(&self) -> Option<&CachedToolResult> {
        self.cached_result.as_ref()
    }

    pub fn set_pattern(&mut self, pattern: Option<String>) {
        self.pattern = pattern;
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    // ── Schema cache ───────────────────────────────────────────────

    pub fn cache_schema(&mut self, key: impl Into<String>, schema: impl Into<String>) {
        let key = key.into();
        self.clock += 1;
        if !self.schemas.contains_key(&key) && self.schemas.len() >= MAX_SCHEMAS {
            // Evict the least recently used entry.
            if let Some(lru) = self
                .schema_access
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(k, _)| k.clone())
            {
                self.schemas.remove(&lru);
                self.schema_access.remove(&lru);
            }
        }
        self.schema_access.insert(key.clone(), self.clock);
        self.schemas.insert(key, schema.into());
    }

    pub fn get_schema(&mut self, key: &str) -> Option<&str> {
        if self.schemas.contains_key(key) {
            self.clock += 1;
            self.schema_access.insert(key.to_owned(), self.clock);
        }
        self.schemas.get(key).map(String::as_str)
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    // ── Findings ───────────────────────────────────────────────────

    /// Insert or update by path. On overflow the oldest entry is evicted.
    pub fn record_finding(
        &mut self,
        path: impl Into<String>,
        value: serde_json::Value,
        category: FindingCategory,
        note: Option<String>,
        source_tool_call: Option<String>,
    ) {
        let path = path.into();
        let finding = Finding {
            path: path.clone(),
            value,
            category,
            note,
            recorded_at: Utc::now(),
            source_tool_call,
        };
        if let Some(pos) = self.findings.iter().position(|f| f.path == path) {
            // Updating refreshes recency: move to the back.
            self.findings.remove(pos);
        } else if self.findings.len() >= MAX_FINDINGS {
            self.findings.remove(0);
        }
        self.findings.push(finding);
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn finding_count(&self) -> usize {
        self.findings.len()
    }

    /// Deterministic Markdown summary grouped by category. Within each
    /// category, findings are sorted by path.
    pub fn findings_summary(&self) -> Option<String> {
        if self.findings.is_empty() {
            return None;
        }
        let mut out = String::from("## Verified findings\n");
        for category in FindingCategory::display_order() {
            let mut in_category: Vec<&Finding> = self
                .findings
                .iter()
                .filter(|f| f.category == category)
                .collect();
            if in_category.is_empty() {
                continue;
            }
            in_category.sort_by(|a, b| a.path.cmp(&b.path));
            out.push_str(&format!("\n### {}\n", category.as_str()));
            for finding in in_category {
                out.push_str(&format!("- `{}` = {}", finding.path, finding.value));
                if let Some(note) = &finding.note {
                    out.push_str(&format!(" ({note})"));
                }
                out.push('\n');
            }
        }
        Some(out)
    }

    /// Rough token footprint of the kernel, for budget accounting.
    pub fn estimate_tokens(&self) -> u32 {
        let mut chars = self.tool_names.iter().map(|n| n.len() + 2).sum::<usize>();
        chars += self.schemas.values().map(String::len).sum::<usize>();
        chars += self
            .findings
            .iter()
            .map(|f| f.path.len() + f.value.to_string().len())
            .sum::<usize>();
        if let Some(pattern) = &self.pattern {
            chars += pattern.len();
        }
        let mut tokens = (chars as u32).div_ceil(4);
        if let Some(cached) = &self.cached_result {
            tokens += crate::tokens::estimate_tool_result_tokens(std::slice::from_ref(cached));
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_at_most_one_cached_result() {
        let mut kernel = KernelSpace::new();
        kernel.cache_tool_result(CachedToolResult {
            tool_name: "a".into(),
            args: json!({}),
            result: json!(1),
            timestamp: Utc::now(),
        });
        kernel.cache_tool_result(CachedToolResult {
            tool_name: "b".into(),
            args: json!({}),
            result: json!(2),
            timestamp: Utc::now(),
        });
        assert_eq!(kernel.cached_result().unwrap().tool_name, "b");
    }

    #[test]
    fn schema_cache_evicts_lru() {
        let mut kernel = KernelSpace::new();
        for i in 0..MAX_SCHEMAS {
            kernel.cache_schema(format!("table_{i}"), "CREATE TABLE ...");
        }
        // Touch table_0 so table_1 becomes the LRU.
        kernel.get_schema("table_0");
        kernel.cache_schema("table_new", "CREATE TABLE new ...");

        assert_eq!(kernel.schema_count(), MAX_SCHEMAS);
        assert!(kernel.get_schema("table_0").is_some());
        assert!(kernel.get_schema("table_1").is_none());
        assert!(kernel.get_schema("table_new").is_some());
    }

    #[test]
    fn schema_update_does_not_evict() {
        let mut kernel = KernelSpace::new();
        for i in 0..MAX_SCHEMAS {
            kernel.cache_schema(format!("t{i}"), "v1");
        }
        kernel.cache_schema("t0", "v2");
        assert_eq!(kernel.schema_count(), MAX_SCHEMAS);
        assert_eq!(kernel.get_schema("t0"), Some("v2"));
    }

    #[test]
    fn findings_bounded_with_oldest_eviction() {
        let mut kernel = KernelSpace::new();
        for i in 0..MAX_FINDINGS + 5 {
            kernel.record_finding(
                format!("fact.{i}"),
                json!(i),
                FindingCategory::Observation,
                None,
                None,
            );
        }
        assert_eq!(kernel.finding_count(), MAX_FINDINGS);
        // The first five were evicted.
        assert!(!kernel.findings().iter().any(|f| f.path == "fact.0"));
        assert!(kernel.findings().iter().any(|f| f.path == "fact.54"));
    }

    #[test]
    fn finding_update_by_path_refreshes() {
        let mut kernel = KernelSpace::new();
        kernel.record_finding("x", json!(1), FindingCategory::Statistic, None, None);
        kernel.record_finding("y", json!(2), FindingCategory::Statistic, None, None);
        kernel.record_finding("x", json!(3), FindingCategory::Statistic, None, None);

        assert_eq!(kernel.finding_count(), 2);
        // x was refreshed, so it is now the most recent.
        assert_eq!(kernel.findings().last().unwrap().path, "x");
        assert_eq!(kernel.findings().last().unwrap().value, json!(3));
    }

    #[test]
    fn summary_groups_by_category_deterministically() {
        let mut kernel = KernelSpace::new();
        kernel.record_finding(
            "rows.count",
            json!(1042),
            FindingCategory::Statistic,
            Some("from COUNT(*)".into()),
            None,
        );
        kernel.record_finding(
            "sales.schema",
            json!("id, amount, ts"),
            FindingCategory::Schema,
            None,
            None,
        );
        kernel.record_finding("a.first", json!(1), FindingCategory::Statistic, None, None);

        let summary = kernel.findings_summary().unwrap();
        let stat_pos = summary.find("### statistic").unwrap();
        let schema_pos = summary.find("### schema").unwrap();
        assert!(stat_pos < schema_pos);
        // Sorted by path within the category.
        assert!(summary.find("a.first").unwrap() < summary.find("rows.count").unwrap());
        assert!(summary.contains("(from COUNT(*))"));
    }

    #[test]
    fn empty_kernel_has_no_summary() {
        assert!(KernelSpace::new().findings_summary().is_none());
    }
}
