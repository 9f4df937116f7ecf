//! Evidence Collector
//!
//! Normalizes raw records from external evidence sources into `Evidence`.
//! Source-specific query templating is the source's business; the collector
//! only fans a `SourceQuery` out and cleans up what comes back.

use crate::error::CapabilityFailure;
use crate::models::{Evidence, EvidenceKind};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceQuery {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl SourceQuery {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            vertical: None,
            region: None,
        }
    }

    pub fn with_vertical(mut self, vertical: Option<String>) -> Self {
        self.vertical = vertical;
        self
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }
}

/// A record as an external source returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: String,
    /// Free-form kind, e.g. "hiring", "funding-round", "news"
    pub kind: String,
    pub content: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reliability: Option<f64>,
}

/// External evidence provider (news API, job boards, registries, ...)
#[async_trait::async_trait]
pub trait EvidenceSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawRecord>, CapabilityFailure>;
}

/// Map a source's kind string onto an evidence kind.
pub fn parse_kind(raw: &str) -> Option<EvidenceKind> {
    let kind = match raw.trim().to_lowercase().as_str() {
        "news" | "press" | "article" | "office-opening" | "market-entry"
        | "subsidiary-creation" | "partnership" => EvidenceKind::News,
        "funding" | "funding-round" | "investment" | "acquisition" => EvidenceKind::Funding,
        "hiring" | "hiring-expansion" | "jobs" | "headcount" => EvidenceKind::Hiring,
        "tech" | "technology" | "tech-stack" | "product-launch" => EvidenceKind::Tech,
        "leadership" | "leadership-change" | "executive" => EvidenceKind::Leadership,
        "social" | "linkedin" | "twitter" => EvidenceKind::Social,
        _ => return None,
    };
    Some(kind)
}

pub struct EvidenceCollector {
    sources: Vec<Arc<dyn EvidenceSource>>,
    default_reliability: f64,
}

impl EvidenceCollector {
    pub fn new(default_reliability: f64) -> Self {
        Self {
            sources: Vec::new(),
            default_reliability: default_reliability.clamp(0.0, 1.0),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn EvidenceSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Turn one raw record into evidence. Records with no id, no content or
    /// an unrecognized kind are dropped.
    pub fn normalize(&self, record: RawRecord, collected_at: DateTime<Utc>) -> Option<Evidence> {
        let source_id = record.source_id.trim();
        let content = record.content.trim();
        if source_id.is_empty() || content.is_empty() {
            return None;
        }
        let kind = parse_kind(&record.kind)?;

        Some(Evidence {
            source_id: source_id.to_string(),
            kind,
            raw_content: content.to_string(),
            confidence: record.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            recency: record.published_at.unwrap_or(collected_at),
            source_reliability: record
                .reliability
                .unwrap_or(self.default_reliability)
                .clamp(0.0, 1.0),
        })
    }

    /// Query every source concurrently. A failing source is logged and
    /// skipped; the call fails only when every source failed.
    pub async fn collect(&self, query: &SourceQuery) -> Result<Vec<Evidence>, CapabilityFailure> {
        let fetches = self.sources.iter().map(|source| async move {
            (source.name().to_string(), source.fetch(query).await)
        });
        let responses = join_all(fetches).await;
        let collected_at = Utc::now();

        let mut evidence = Vec::new();
        let mut last_failure = None;
        let mut failed = 0;

        for (source, response) in responses {
            match response {
                Ok(records) => {
                    let before = evidence.len();
                    let fetched = records.len();
                    evidence.extend(
                        records
                            .into_iter()
                            .filter_map(|record| self.normalize(record, collected_at)),
                    );
                    debug!(
                        source = %source,
                        target = %query.target,
                        fetched,
                        kept = evidence.len() - before,
                        "Evidence fetched"
                    );
                }
                Err(failure) => {
                    warn!(source = %source, target = %query.target, %failure, "Evidence source failed");
                    failed += 1;
                    last_failure = Some(failure);
                }
            }
        }

        match last_failure {
            Some(failure) if failed == self.sources.len() => Err(failure),
            _ => Ok(evidence),
        }
    }

    /// Collect for independent targets in parallel. Results come back in
    /// query order.
    pub async fn collect_many(
        &self,
        queries: &[SourceQuery],
    ) -> Vec<Result<Vec<Evidence>, CapabilityFailure>> {
        join_all(queries.iter().map(|query| self.collect(query))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct FixedSource {
        records: Vec<RawRecord>,
    }

    #[async_trait::async_trait]
    impl EvidenceSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawRecord>, CapabilityFailure> {
            Ok(self
                .records
                .iter()
                .filter(|r| r.content.contains(&query.target))
                .cloned()
                .collect())
        }
    }

    struct BrokenSource;

    #[async_trait::async_trait]
    impl EvidenceSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch(&self, _query: &SourceQuery) -> Result<Vec<RawRecord>, CapabilityFailure> {
            Err(CapabilityFailure::UpstreamError("503 from provider".to_string()))
        }
    }

    fn record(id: &str, kind: &str, content: &str) -> RawRecord {
        RawRecord {
            source_id: id.to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
            confidence: Some(0.8),
            published_at: Some(Utc::now() - Duration::days(3)),
            reliability: None,
        }
    }

    #[test]
    fn test_kind_mapping_covers_signal_keys() {
        assert_eq!(parse_kind("hiring-expansion"), Some(EvidenceKind::Hiring));
        assert_eq!(parse_kind("Funding-Round"), Some(EvidenceKind::Funding));
        assert_eq!(parse_kind("office-opening"), Some(EvidenceKind::News));
        assert_eq!(parse_kind("leadership-change"), Some(EvidenceKind::Leadership));
        assert_eq!(parse_kind("weather"), None);
    }

    #[test]
    fn test_normalize_clamps_and_defaults() {
        let collector = EvidenceCollector::new(0.6);
        let now = Utc::now();
        let raw = RawRecord {
            source_id: " job-1 ".to_string(),
            kind: "hiring".to_string(),
            content: "Tabby hiring 40 engineers".to_string(),
            confidence: Some(1.7),
            published_at: None,
            reliability: None,
        };
        let evidence = collector.normalize(raw, now).unwrap();
        assert_eq!(evidence.source_id, "job-1");
        assert_eq!(evidence.confidence, 1.0);
        assert_eq!(evidence.source_reliability, 0.6);
        assert_eq!(evidence.recency, now);

        assert!(collector.normalize(record("x", "unknown-kind", "Tabby"), now).is_none());
        assert!(collector.normalize(record("", "news", "Tabby"), now).is_none());
    }

    #[tokio::test]
    async fn test_collect_skips_failing_source() {
        let collector = EvidenceCollector::new(0.5)
            .with_source(Arc::new(FixedSource {
                records: vec![
                    record("n1", "news", "Tabby opens Riyadh office"),
                    record("h1", "hiring", "Careem hiring drivers"),
                ],
            }))
            .with_source(Arc::new(BrokenSource));

        let evidence = collector.collect(&SourceQuery::new("Tabby")).await.unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].source_id, "n1");
    }

    #[tokio::test]
    async fn test_collect_fails_when_every_source_fails() {
        let collector = EvidenceCollector::new(0.5).with_source(Arc::new(BrokenSource));
        let result = collector.collect(&SourceQuery::new("Tabby")).await;
        assert!(matches!(result, Err(CapabilityFailure::UpstreamError(_))));
    }

    #[tokio::test]
    async fn test_collect_many_keeps_query_order() {
        let collector = EvidenceCollector::new(0.5).with_source(Arc::new(FixedSource {
            records: vec![
                record("n1", "news", "Tabby opens Riyadh office"),
                record("h1", "hiring", "Careem hiring drivers"),
                record("h2", "hiring", "Careem hiring engineers"),
            ],
        }));

        let results = collector
            .collect_many(&[SourceQuery::new("Careem"), SourceQuery::new("Tabby")])
            .await;
        assert_eq!(results[0].as_ref().unwrap().len(), 2);
        assert_eq!(results[1].as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_sources_means_no_evidence() {
        let collector = EvidenceCollector::new(0.5);
        let evidence = collector.collect(&SourceQuery::new("Tabby")).await.unwrap();
        assert!(evidence.is_empty());
    }
}
