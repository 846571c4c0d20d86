//! Relevance ranking and result ordering shared by all backends.

use mindloop_core::memory::{MemoryQuery, MemoryRecord, RecallOrder, RelevanceRanker};
use std::collections::HashSet;

/// Scores a record by the fraction of query terms that appear in its text.
///
/// Terms are lowercased alphanumeric runs of two or more characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordOverlap;

impl KeywordOverlap {
    fn terms(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
            .map(|t| t.to_lowercase())
            .collect()
    }
}

impl RelevanceRanker for KeywordOverlap {
    fn name(&self) -> &str {
        "keyword_overlap"
    }

    fn score(&self, query_text: &str, record: &MemoryRecord) -> f32 {
        let query_terms = Self::terms(query_text);
        if query_terms.is_empty() {
            return 0.0;
        }
        let record_terms = Self::terms(&record.text());
        let hits = query_terms.intersection(&record_terms).count();
        hits as f32 / query_terms.len() as f32
    }
}

/// Order records (given oldest first) per the query and truncate to its limit.
pub fn order_records(
    mut records: Vec<MemoryRecord>,
    query: &MemoryQuery,
    ranker: &dyn RelevanceRanker,
) -> Vec<MemoryRecord> {
    match query.order {
        RecallOrder::OldestFirst => {}
        RecallOrder::MostRecentFirst => records.reverse(),
        RecallOrder::Relevance => {
            let text = query.text.as_deref().unwrap_or_default();
            // Newest first, then a stable sort keeps recency as the tie-breaker.
            records.reverse();
            let mut scored: Vec<(f32, MemoryRecord)> = records
                .into_iter()
                .map(|r| (ranker.score(text, &r), r))
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            records = scored.into_iter().map(|(_, r)| r).collect();
        }
    }
    records.truncate(query.limit);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mindloop_core::memory::{MemoryContent, MemoryKind};

    fn record(id: &str, text: &str) -> MemoryRecord {
        let mut content = MemoryContent::new();
        content.insert("text".into(), text.into());
        MemoryRecord::new(id, "a1", MemoryKind::Observation, content, Utc::now())
    }

    #[test]
    fn overlap_scores_fraction_of_terms() {
        let ranker = KeywordOverlap;
        let r = record("m1", "Rust has ownership and borrowing");
        assert_eq!(ranker.score("rust ownership", &r), 1.0);
        assert_eq!(ranker.score("rust python", &r), 0.5);
        assert_eq!(ranker.score("", &r), 0.0);
    }

    #[test]
    fn relevance_ties_prefer_recent() {
        let records = vec![
            record("old", "tokio runtime"),
            record("mid", "unrelated"),
            record("new", "tokio runtime"),
        ];
        let query = MemoryQuery {
            order: RecallOrder::Relevance,
            text: Some("tokio".into()),
            limit: 10,
            kind: None,
        };
        let ordered = order_records(records, &query, &KeywordOverlap);
        let ids: Vec<&str> = ordered.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["new", "old", "mid"]);
    }

    #[test]
    fn recency_orders_and_truncates() {
        let records = vec![record("a", "x"), record("b", "y"), record("c", "z")];
        let ordered = order_records(records.clone(), &MemoryQuery::recent(2), &KeywordOverlap);
        let ids: Vec<&str> = ordered.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        let query = MemoryQuery {
            order: RecallOrder::OldestFirst,
            ..MemoryQuery::recent(2)
        };
        let ordered = order_records(records, &query, &KeywordOverlap);
        let ids: Vec<&str> = ordered.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
