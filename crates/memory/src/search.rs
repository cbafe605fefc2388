//! Two-phase semantic search over conversation history.
//!
//! Phase 1 retrieves BM25 candidates from the session store. Phase 2
//! optionally asks a compressor/judge-class LLM to rescore them 0–10 and
//! returns the top N by score. Any reranker failure — network error,
//! unparsable output — silently falls back to the BM25 order; the
//! failure rate is surfaced as a metric.

use serde::Deserialize;

use strand_domain::error::Result;
use strand_domain::tracer::Tracer;
use strand_sessions::{SearchHit, SessionStore};

use crate::compressor::ContextCompressor;

/// BM25 candidate pool size for the rerank phase.
const CANDIDATE_POOL: usize = 50;

pub async fn two_phase_search(
    store: &dyn SessionStore,
    session_id: &str,
    query: &str,
    limit: usize,
    reranker: Option<&dyn ContextCompressor>,
    tracer: &dyn Tracer,
) -> Result<Vec<SearchHit>> {
    let candidates = store
        .search_full_text(session_id, query, CANDIDATE_POOL)
        .await?;
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let Some(reranker) = reranker else {
        return Ok(top_n(candidates, limit));
    };

    let prompt = rerank_prompt(query, &candidates);
    match reranker.complete(&prompt).await {
        Ok(raw) => match parse_rerank_scores(&raw) {
            Some(scores) => Ok(apply_scores(candidates, scores, limit)),
            None => {
                tracing::warn!(session_id, "reranker output was not parsable; using BM25 order");
                tracer.record_metric("memory.rerank_failures", 1.0, &[("session", session_id)]);
                Ok(top_n(candidates, limit))
            }
        },
        Err(e) => {
            tracing::warn!(session_id, error = %e, "reranker call failed; using BM25 order");
            tracer.record_metric("memory.rerank_failures", 1.0, &[("session", session_id)]);
            Ok(top_n(candidates, limit))
        }
    }
}

fn top_n(mut candidates: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    candidates.truncate(limit);
    candidates
}

fn rerank_prompt(query: &str, candidates: &[SearchHit]) -> String {
    let mut prompt = format!(
        "Score each candidate 0-10 for relevance to the query.\n\
         Respond with ONLY a JSON list like [{{\"index\": 0, \"score\": 7}}].\n\n\
         Query: {query}\n\nCandidates:\n"
    );
    for (i, hit) in candidates.iter().enumerate() {
        let preview: String = hit.content.chars().take(300).collect();
        prompt.push_str(&format!("{i}. {preview}\n"));
    }
    prompt
}

#[derive(Deserialize)]
struct RerankScore {
    index: usize,
    score: f64,
}

/// Extract the JSON score list from the model output. Tolerates prose
/// and code fences around the array; anything else is a parse failure.
fn parse_rerank_scores(raw: &str) -> Option<Vec<(usize, f64)>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    let scores: Vec<RerankScore> = serde_json::from_str(&raw[start..=end]).ok()?;
    if scores.is_empty() {
        return None;
    }
    Some(scores.into_iter().map(|s| (s.index, s.score)).collect())
}

fn apply_scores(
    candidates: Vec<SearchHit>,
    scores: Vec<(usize, f64)>,
    limit: usize,
) -> Vec<SearchHit> {
    let mut scored: Vec<(f64, SearchHit)> = Vec::new();
    let mut candidates: Vec<Option<SearchHit>> = candidates.into_iter().map(Some).collect();
    for (index, score) in scores {
        if let Some(slot) = candidates.get_mut(index) {
            if let Some(hit) = slot.take() {
                scored.push((score, hit));
            }
        }
    }
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(limit).map(|(_, hit)| hit).collect()
}
