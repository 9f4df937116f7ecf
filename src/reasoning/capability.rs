//! The reasoning pipeline exposed as a ranking capability

use crate::config::ReasoningConfig;
use crate::error::CapabilityFailure;
use crate::models::Evidence;
use crate::reasoning::{EvidenceCollector, ReasoningChain, ScoreJustifier, SignalReasoner, SourceQuery};
use crate::registry::{Capability, InvocationSignal};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ScoringCapability {
    collector: Arc<EvidenceCollector>,
    reasoner: SignalReasoner,
    justifier: ScoreJustifier,
}

impl ScoringCapability {
    pub fn new(collector: Arc<EvidenceCollector>, config: ReasoningConfig) -> Self {
        Self {
            justifier: ScoreJustifier::new(&config),
            reasoner: SignalReasoner::new(config),
            collector,
        }
    }

    /// Score one target from already collected evidence.
    pub fn score(&self, evidence: Vec<Evidence>) -> ReasoningChain {
        let chain = self.reasoner.run(evidence, Utc::now());
        self.justifier.justify(&chain)
    }
}

/// Targets from explicit parameters, else from upstream result sets.
fn targets(input: &Value) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |value: &Value| {
        let name = match value {
            Value::Object(fields) => fields
                .get("company")
                .or_else(|| fields.get("name"))
                .and_then(Value::as_str),
            other => other.as_str(),
        };
        if let Some(name) = name {
            let name = name.trim();
            if !name.is_empty() && !found.iter().any(|f| f == name) {
                found.push(name.to_string());
            }
        }
    };

    match input.get("targets") {
        Some(Value::Array(items)) => items.iter().for_each(&mut push),
        Some(value) => push(value),
        None => {}
    }
    if let Some(value) = input.get("target") {
        push(value);
    }

    if let Some(Value::Object(upstream)) = input.get("upstream") {
        for output in upstream.values() {
            if let Some(Value::Array(items)) = output.get("results") {
                items.iter().for_each(&mut push);
            }
        }
    }
    found
}

/// First value of a string-or-array parameter.
fn first_string(input: &Value, key: &str) -> Option<String> {
    match input.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

#[async_trait::async_trait]
impl Capability for ScoringCapability {
    async fn invoke(
        &self,
        input: &Value,
        signal: &InvocationSignal,
    ) -> Result<Value, CapabilityFailure> {
        let targets = targets(input);
        if targets.is_empty() {
            return Err(CapabilityFailure::InvalidInput(
                "no targets to score".to_string(),
            ));
        }

        let vertical = first_string(input, "sector");
        let region = first_string(input, "region");
        let queries: Vec<SourceQuery> = targets
            .iter()
            .map(|target| {
                SourceQuery::new(target.clone())
                    .with_vertical(vertical.clone())
                    .with_region(region.clone())
            })
            .collect();

        let collected = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(CapabilityFailure::Cancelled),
            collected = self.collector.collect_many(&queries) => collected,
        };

        let mut failures = 0;
        let mut ranking: Vec<(String, ReasoningChain)> = Vec::with_capacity(targets.len());
        for (target, evidence) in targets.into_iter().zip(collected) {
            let evidence = match evidence {
                Ok(evidence) => evidence,
                Err(failure) => {
                    warn!(target = %target, %failure, "Scoring without evidence");
                    failures += 1;
                    Vec::new()
                }
            };
            ranking.push((target, self.score(evidence)));
        }
        if failures == ranking.len() && self.collector.source_count() > 0 {
            return Err(CapabilityFailure::UpstreamError(
                "every evidence lookup failed".to_string(),
            ));
        }

        ranking.sort_by(|a, b| {
            b.1.overall
                .partial_cmp(&a.1.overall)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut scores = Map::new();
        let entries: Vec<Value> = ranking
            .iter()
            .enumerate()
            .map(|(index, (company, chain))| {
                scores.insert(company.clone(), json!(round1(chain.overall)));
                let breakdown: Map<String, Value> = chain
                    .combined
                    .iter()
                    .map(|(component, score)| (component.to_string(), json!(round1(*score))))
                    .collect();
                json!({
                    "rank": index + 1,
                    "company": company,
                    "score": round1(chain.overall),
                    "breakdown": breakdown,
                    "justification": chain.justification,
                    "evidence_count": chain.filtered.len(),
                    "chain": chain,
                })
            })
            .collect();

        let summary = match ranking.first() {
            Some((top, chain)) => format!(
                "Ranked {} compan{}; top pick {} scored {:.1}/100.",
                ranking.len(),
                if ranking.len() == 1 { "y" } else { "ies" },
                top,
                chain.overall
            ),
            None => "Nothing to rank.".to_string(),
        };

        debug!(ranked = entries.len(), "Scoring complete");

        Ok(json!({
            "summary": summary,
            "ranking": entries,
            "scores": scores,
        }))
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
