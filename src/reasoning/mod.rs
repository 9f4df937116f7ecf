//! Explainable scoring
//!
//! Evidence Collector → Signal Reasoner → Score Justifier. Every stage is a
//! pure transform from one `ReasoningChain` snapshot to the next.

pub mod capability;
pub mod collector;
pub mod justifier;
pub mod reasoner;

pub use capability::ScoringCapability;
pub use collector::{EvidenceCollector, EvidenceSource, RawRecord, SourceQuery};
pub use justifier::ScoreJustifier;
pub use reasoner::SignalReasoner;

use crate::models::{Evidence, EvidenceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Score components, one per kind of buying signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Growth,
    Financial,
    TechFit,
    Leadership,
    Momentum,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Growth,
        Component::Financial,
        Component::TechFit,
        Component::Leadership,
        Component::Momentum,
    ];

    pub fn for_kind(kind: EvidenceKind) -> Self {
        match kind {
            EvidenceKind::Hiring => Component::Growth,
            EvidenceKind::Funding => Component::Financial,
            EvidenceKind::Tech => Component::TechFit,
            EvidenceKind::Leadership => Component::Leadership,
            EvidenceKind::News | EvidenceKind::Social => Component::Momentum,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Growth => "growth",
            Component::Financial => "financial",
            Component::TechFit => "tech_fit",
            Component::Leadership => "leadership",
            Component::Momentum => "momentum",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightedEvidence {
    pub evidence: Evidence,
    pub weight: f64,
    /// Signed score points this item adds to its component
    pub contribution: f64,
    pub component: Component,
}

/// Staged output of the reasoning pipeline.
///
/// Stages only ever add to the chain: `filtered` is drawn from `gathered`,
/// `weighted` from `filtered`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReasoningChain {
    pub gathered: Vec<Evidence>,
    pub filtered: Vec<Evidence>,
    pub weighted: Vec<WeightedEvidence>,
    pub combined: BTreeMap<Component, f64>,
    pub justification: BTreeMap<Component, String>,
    pub overall: f64,
}

impl ReasoningChain {
    pub fn score(&self, component: Component) -> Option<f64> {
        self.combined.get(&component).copied()
    }

    /// Weighted items of one component, heaviest first.
    pub fn contributors(&self, component: Component) -> Vec<&WeightedEvidence> {
        let mut items: Vec<&WeightedEvidence> = self
            .weighted
            .iter()
            .filter(|w| w.component == component)
            .collect();
        items.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.evidence.source_id.cmp(&b.evidence.source_id))
        });
        items
    }

    /// filtered ⊆ gathered, and every weighted item is in filtered.
    pub fn is_consistent(&self) -> bool {
        let filtered_in_gathered = self
            .filtered
            .iter()
            .all(|item| self.gathered.contains(item));
        let weighted_in_filtered = self
            .weighted
            .iter()
            .all(|w| self.filtered.iter().any(|f| f.source_id == w.evidence.source_id));
        filtered_in_gathered && weighted_in_filtered
    }
}
