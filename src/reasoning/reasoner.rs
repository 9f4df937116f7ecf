//! Signal Reasoner
//!
//! GATHER → FILTER → WEIGHT → COMBINE. Each stage takes a chain snapshot and
//! returns a new one, so stages can be exercised on their own.

use crate::config::ReasoningConfig;
use crate::models::Evidence;
use crate::reasoning::{Component, ReasoningChain, WeightedEvidence};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

lazy_static! {
    static ref NEGATIVE_CUES: Regex = Regex::new(
        r"(?i)\b(?:layoffs?|laid off|lawsuit|sued|downsiz\w*|bankrupt\w*|insolven\w*|fraud|fined|hiring freeze|restructuring|shut(?:s|ting)? down|closure|resign\w*|steps? down)\b"
    )
    .expect("negative cue pattern is static");
}

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Default)]
pub struct SignalReasoner {
    config: ReasoningConfig,
}

impl SignalReasoner {
    pub fn new(config: ReasoningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    /// Full pipeline up to (not including) justification.
    pub fn run(&self, evidence: Vec<Evidence>, as_of: DateTime<Utc>) -> ReasoningChain {
        let gathered = Self::gather(evidence);
        let filtered = self.filter(&gathered);
        let weighted = self.weight(&filtered, as_of);
        let chain = self.combine(&weighted);

        debug!(
            gathered = chain.gathered.len(),
            filtered = chain.filtered.len(),
            overall = chain.overall,
            "Reasoning chain built"
        );
        chain
    }

    /// GATHER: evidence as given.
    pub fn gather(evidence: Vec<Evidence>) -> ReasoningChain {
        ReasoningChain {
            gathered: evidence,
            ..ReasoningChain::default()
        }
    }

    /// FILTER: drop low-confidence, unreliable or empty items, then dedupe by
    /// source id keeping the most confident copy.
    pub fn filter(&self, chain: &ReasoningChain) -> ReasoningChain {
        let mut kept: Vec<Evidence> = Vec::new();
        let mut index_by_source: HashMap<&str, usize> = HashMap::new();

        for item in &chain.gathered {
            if item.confidence < self.config.confidence_floor
                || item.source_reliability < self.config.reliability_floor
                || item.raw_content.trim().is_empty()
            {
                continue;
            }
            match index_by_source.get(item.source_id.as_str()) {
                Some(&index) => {
                    if item.confidence > kept[index].confidence {
                        kept[index] = item.clone();
                    }
                }
                None => {
                    index_by_source.insert(item.source_id.as_str(), kept.len());
                    kept.push(item.clone());
                }
            }
        }

        ReasoningChain {
            gathered: chain.gathered.clone(),
            filtered: kept,
            ..ReasoningChain::default()
        }
    }

    /// Recency decay: 1.0 for fresh (or future-dated) items, halving every
    /// `half_life_days`.
    pub fn decay(&self, recency: DateTime<Utc>, as_of: DateTime<Utc>) -> f64 {
        let age_days = ((as_of - recency).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0);
        0.5_f64.powf(age_days / self.config.half_life_days)
    }

    /// WEIGHT: confidence × decay × reliability, signed by the item's tone.
    pub fn weight(&self, chain: &ReasoningChain, as_of: DateTime<Utc>) -> ReasoningChain {
        let weighted = chain
            .filtered
            .iter()
            .map(|item| {
                let weight =
                    item.confidence * self.decay(item.recency, as_of) * item.source_reliability;
                let sign = if is_negative(&item.raw_content) { -1.0 } else { 1.0 };
                WeightedEvidence {
                    evidence: item.clone(),
                    weight,
                    contribution: sign * weight * self.config.contribution_scale,
                    component: Component::for_kind(item.kind),
                }
            })
            .collect();

        ReasoningChain {
            weighted,
            ..chain.clone()
        }
    }

    /// COMBINE: baseline plus signed contributions per component, clipped.
    /// A component with no evidence sits at the baseline.
    pub fn combine(&self, chain: &ReasoningChain) -> ReasoningChain {
        let combined: BTreeMap<Component, f64> = Component::ALL
            .iter()
            .map(|component| {
                let total: f64 = chain
                    .weighted
                    .iter()
                    .filter(|w| w.component == *component)
                    .map(|w| w.contribution)
                    .sum();
                let score = (self.config.baseline + total)
                    .clamp(self.config.min_score, self.config.max_score);
                (*component, score)
            })
            .collect();

        let overall = combined.values().sum::<f64>() / combined.len() as f64;

        ReasoningChain {
            combined,
            overall,
            ..chain.clone()
        }
    }
}

pub fn is_negative(content: &str) -> bool {
    NEGATIVE_CUES.is_match(content)
}
