//! Intent Classifier
//!
//! Scores every known intent label against the input with weighted,
//! word-bounded patterns:
//! - primary: best score above `min_confidence`
//! - secondary: remaining labels above `secondary_threshold`, best first
//! - nothing clears the bar: `unknown` (routed to help, never to a task agent)

use crate::config::ClassifierConfig;
use crate::models::{ConversationTurn, IntentLabel, IntentResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

/// Static pattern tables: (pattern, weight)
const DISCOVERY_SEARCH: &[(&str, f64)] = &[
    ("find", 0.5),
    ("search(?: for)?", 0.5),
    ("discover", 0.5),
    ("look(?:ing)? for", 0.45),
    ("list", 0.3),
    ("show me", 0.3),
    ("companies|firms|businesses|startups", 0.2),
    ("prospects|leads", 0.25),
];

const RANKING_SCORE: &[(&str, f64)] = &[
    ("rank(?:ing|ed)?", 0.6),
    ("score", 0.5),
    ("prioriti[sz]e", 0.5),
    ("qualify", 0.35),
    ("top \\d+", 0.3),
    ("best", 0.25),
];

const RANKING_COMPARE: &[(&str, f64)] = &[
    ("compare|comparison", 0.65),
    ("versus|vs\\.?", 0.5),
    ("difference between", 0.4),
    ("better than", 0.3),
];

const OUTREACH_DRAFT: &[(&str, f64)] = &[
    ("outreach", 0.55),
    ("reach out", 0.5),
    ("draft", 0.45),
    ("email", 0.4),
    ("pitch", 0.4),
    ("message", 0.3),
    ("write", 0.3),
];

const ENRICHMENT_PROFILE: &[(&str, f64)] = &[
    ("enrich", 0.55),
    ("profile", 0.5),
    ("tell me about", 0.5),
    ("background", 0.35),
    ("overview", 0.35),
    ("who is|what does", 0.35),
    ("details|information|info", 0.3),
];

const ENRICHMENT_SIGNALS: &[(&str, f64)] = &[
    ("signals?", 0.5),
    ("triggers?", 0.4),
    ("news", 0.4),
    ("latest|what's new", 0.35),
    ("hiring", 0.35),
    ("funding", 0.35),
    ("activity", 0.3),
];

const HELP_EXPLAIN: &[(&str, f64)] = &[
    ("help", 0.55),
    ("what can you", 0.55),
    ("how do i", 0.45),
    ("how does", 0.4),
    ("explain", 0.4),
    ("usage|guide", 0.3),
];

lazy_static! {
    static ref PATTERNS: Vec<(IntentLabel, Vec<(Regex, f64)>)> = vec![
        (IntentLabel::DiscoverySearch, compile(DISCOVERY_SEARCH)),
        (IntentLabel::RankingScore, compile(RANKING_SCORE)),
        (IntentLabel::RankingCompare, compile(RANKING_COMPARE)),
        (IntentLabel::OutreachDraft, compile(OUTREACH_DRAFT)),
        (IntentLabel::EnrichmentProfile, compile(ENRICHMENT_PROFILE)),
        (IntentLabel::EnrichmentSignals, compile(ENRICHMENT_SIGNALS)),
        (IntentLabel::HelpExplain, compile(HELP_EXPLAIN)),
    ];
}

fn compile(table: &[(&str, f64)]) -> Vec<(Regex, f64)> {
    table
        .iter()
        .map(|(pattern, weight)| {
            let regex = Regex::new(&format!(r"(?i)\b(?:{})\b", pattern))
                .expect("intent patterns are static");
            (regex, *weight)
        })
        .collect()
}

/// Deterministic rule-based intent classifier
#[derive(Debug, Clone, Default)]
pub struct IntentClassifier {
    config: ClassifierConfig,
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Raw pattern score per label (only labels with at least one match).
    pub fn score(text: &str) -> BTreeMap<IntentLabel, f64> {
        let mut scores = BTreeMap::new();
        for (label, patterns) in PATTERNS.iter() {
            let total: f64 = patterns
                .iter()
                .filter(|(regex, _)| regex.is_match(text))
                .map(|(_, weight)| *weight)
                .sum();
            if total > 0.0 {
                scores.insert(*label, total.min(1.0));
            }
        }
        scores
    }

    /// Classify input, optionally biased towards the prior turn's intent.
    pub fn classify(&self, text: &str, prior: Option<&ConversationTurn>) -> IntentResult {
        let mut scores = Self::score(text);

        if let Some(prior_label) = prior.map(|turn| turn.intent().primary) {
            if let Some(score) = scores.get_mut(&prior_label) {
                *score = (*score + self.config.continuity_bonus).min(1.0);
            }
        }

        let mut ranked: Vec<(IntentLabel, f64)> =
            scores.iter().map(|(label, score)| (*label, *score)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                // equal scores: the more specific (longer) label first
                .then(b.0.as_str().len().cmp(&a.0.as_str().len()))
                .then(a.0.as_str().cmp(b.0.as_str()))
        });

        let primary = match ranked.first() {
            Some((label, score)) if *score >= self.config.min_confidence => *label,
            _ => {
                debug!(text_len = text.len(), "No intent cleared the minimum confidence");
                return IntentResult {
                    primary: IntentLabel::Unknown,
                    secondary: Vec::new(),
                    confidences: scores,
                };
            }
        };

        let secondary: Vec<IntentLabel> = ranked
            .iter()
            .skip(1)
            .filter(|(_, score)| *score >= self.config.secondary_threshold)
            .take(self.config.max_secondary)
            .map(|(label, _)| *label)
            .collect();

        debug!(
            primary = %primary,
            secondary = ?secondary,
            "Intent classified"
        );

        IntentResult {
            primary,
            secondary,
            confidences: scores,
        }
    }
}
