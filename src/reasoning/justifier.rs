//! Score Justifier
//!
//! Template-based explanations, one per component, listing the heaviest
//! contributors with their signed contribution.

use crate::config::ReasoningConfig;
use crate::reasoning::{Component, ReasoningChain};

const NO_EVIDENCE: &str = "no evidence available";

#[derive(Debug, Clone)]
pub struct ScoreJustifier {
    max_contributors: usize,
    baseline: f64,
}

impl Default for ScoreJustifier {
    fn default() -> Self {
        Self::new(&ReasoningConfig::default())
    }
}

impl ScoreJustifier {
    pub fn new(config: &ReasoningConfig) -> Self {
        Self {
            max_contributors: config.max_justified.max(1),
            baseline: config.baseline,
        }
    }

    /// Attach an explanation for every combined component.
    pub fn justify(&self, chain: &ReasoningChain) -> ReasoningChain {
        let justification = chain
            .combined
            .iter()
            .map(|(component, score)| (*component, self.explain(chain, *component, *score)))
            .collect();

        ReasoningChain {
            justification,
            ..chain.clone()
        }
    }

    fn explain(&self, chain: &ReasoningChain, component: Component, score: f64) -> String {
        if chain.filtered.is_empty() {
            return format!(
                "{}: {}; held at the neutral baseline of {:.1}",
                component, NO_EVIDENCE, self.baseline
            );
        }

        let contributors = chain.contributors(component);
        if contributors.is_empty() {
            return format!(
                "{}: {} for this component; neutral baseline {:.1}",
                component, NO_EVIDENCE, self.baseline
            );
        }

        let listed: Vec<String> = contributors
            .iter()
            .take(self.max_contributors)
            .map(|w| {
                format!(
                    "{} {:+.1} ({}: {})",
                    w.evidence.kind,
                    w.contribution,
                    w.evidence.source_id,
                    snippet(&w.evidence.raw_content)
                )
            })
            .collect();

        let mut text = format!(
            "{} scored {:.1} from {} item{}: {}",
            component,
            score,
            contributors.len(),
            if contributors.len() == 1 { "" } else { "s" },
            listed.join("; ")
        );
        if contributors.len() > self.max_contributors {
            text.push_str(&format!(
                "; and {} more",
                contributors.len() - self.max_contributors
            ));
        }
        text
    }
}

fn snippet(content: &str) -> String {
    const MAX_CHARS: usize = 80;
    let trimmed = content.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}
