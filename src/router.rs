//! Tool Router
//!
//! Maps a normalized query onto registered agents and picks an execution
//! mode. Routing never fails: when nothing fits, the help agent is selected
//! and the decision carries the threshold-miss sentinel.

use crate::config::RouterConfig;
use crate::models::{
    AgentAssignment, AgentDescriptor, ExecutionMode, IntentLabel, NormalizedQuery, RoutingDecision,
    SubQuery,
};
use crate::registry::AgentRegistry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct ToolRouter {
    config: RouterConfig,
}

/// One scored candidate for a sub-query
#[derive(Debug, Clone)]
struct Scored<'a> {
    descriptor: &'a AgentDescriptor,
    coverage: f64,
}

impl ToolRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    fn role_weight(&self, sub_query: &SubQuery) -> f64 {
        if sub_query.is_primary {
            1.0
        } else {
            self.config.secondary_weight
        }
    }

    /// coverage = (type overlap / sub-query types) × intent confidence × role weight
    pub fn coverage(&self, descriptor: &AgentDescriptor, sub_query: &SubQuery) -> f64 {
        if sub_query.entity_types.is_empty() {
            return 0.0;
        }
        let overlap = descriptor.entity_overlap(&sub_query.entity_types) as f64
            / sub_query.entity_types.len() as f64;
        overlap * sub_query.confidence * self.role_weight(sub_query)
    }

    fn score_candidates<'a>(
        &self,
        registry: &'a AgentRegistry,
        sub_query: &SubQuery,
    ) -> Vec<Scored<'a>> {
        registry
            .find_candidates(sub_query.intent, &sub_query.entity_types)
            .into_iter()
            .map(|descriptor| Scored {
                descriptor,
                coverage: self.coverage(descriptor, sub_query),
            })
            .collect()
    }

    pub fn route(&self, query: &NormalizedQuery, registry: &AgentRegistry) -> RoutingDecision {
        match query.intent() {
            IntentLabel::Unknown => {
                return self.help_decision(
                    registry,
                    query.intent(),
                    RoutingDecision::THRESHOLD_MISS,
                    "intent not recognized; asking the user to clarify".to_string(),
                );
            }
            IntentLabel::HelpExplain => {
                return self.help_decision(
                    registry,
                    query.intent(),
                    query.primary.confidence,
                    "help requested".to_string(),
                );
            }
            _ => {}
        }

        let mut assignments: Vec<AgentAssignment> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let mut rivals_of_primary = 0;
        let mut primary_coverage = 0.0;

        for sub_query in query.sub_queries() {
            let scored = self.score_candidates(registry, sub_query);

            // candidates come cheapest first; equal coverage keeps the earlier one
            let best = scored.iter().fold(None::<&Scored>, |best, candidate| match best {
                Some(b) if b.coverage >= candidate.coverage => Some(b),
                _ => Some(candidate),
            });

            let Some(best) = best.filter(|b| b.coverage >= self.config.min_routing_threshold) else {
                if sub_query.is_primary {
                    return self.help_decision(
                        registry,
                        sub_query.intent,
                        RoutingDecision::THRESHOLD_MISS,
                        format!(
                            "no agent cleared the routing threshold {:.2} for {}",
                            self.config.min_routing_threshold, sub_query.intent
                        ),
                    );
                }
                notes.push(format!("{} dropped: no agent above threshold", sub_query.intent));
                continue;
            };

            if assignments.iter().any(|a| a.agent_id == best.descriptor.id) {
                notes.push(format!(
                    "{} served by already selected {}",
                    sub_query.intent, best.descriptor.id
                ));
                continue;
            }

            let rivals: Vec<&Scored> = scored
                .iter()
                .filter(|c| {
                    c.descriptor.id != best.descriptor.id
                        && best.coverage - c.coverage <= self.config.rival_margin
                })
                .collect();
            if sub_query.is_primary {
                rivals_of_primary = rivals.len();
                primary_coverage = best.coverage;
            }

            let fallback_agent_id = best
                .descriptor
                .fallback_agent_id
                .clone()
                .or_else(|| rivals.first().map(|r| r.descriptor.id.clone()));

            notes.push(format!(
                "{} -> {} (coverage {:.2}{})",
                sub_query.intent,
                best.descriptor.id,
                best.coverage,
                fallback_agent_id
                    .as_ref()
                    .map(|f| format!(", fallback {}", f))
                    .unwrap_or_default()
            ));

            weights.push(self.role_weight(sub_query));
            assignments.push(AgentAssignment {
                agent_id: best.descriptor.id.clone(),
                intent: sub_query.intent,
                coverage: best.coverage,
                fallback_agent_id,
            });
        }

        let selected: Vec<String> = assignments.iter().map(|a| a.agent_id.clone()).collect();
        let edges = dependency_edges(registry, &selected);
        let ordered = topological_order(&selected, &edges);
        let execution_mode = select_mode(ordered.len(), &edges);

        for (from, to) in &edges {
            notes.push(format!("{} feeds {}", from, to));
        }
        if execution_mode == ExecutionMode::Hybrid {
            notes.push(hybrid_shape(&ordered, &edges));
        }
        if execution_mode == ExecutionMode::Single {
            if primary_coverage < self.config.high_confidence_threshold {
                notes.push(format!(
                    "single agent below high-confidence threshold {:.2}",
                    self.config.high_confidence_threshold
                ));
            } else if rivals_of_primary > 0 {
                notes.push(format!("{} rival(s) within margin", rivals_of_primary));
            }
        }

        let weight_sum: f64 = weights.iter().sum();
        let confidence = if weight_sum > 0.0 {
            assignments
                .iter()
                .zip(&weights)
                .map(|(a, w)| a.coverage * w)
                .sum::<f64>()
                / weight_sum
        } else {
            0.0
        };

        // keep assignments in execution order
        let assignments = ordered
            .iter()
            .filter_map(|id| assignments.iter().find(|a| &a.agent_id == id).cloned())
            .collect();

        notes.push(format!("mode {}", execution_mode));
        let rationale = notes.join("; ");

        info!(
            agents = ?ordered,
            mode = %execution_mode,
            confidence,
            "Routing decision"
        );

        RoutingDecision {
            selected_agents: ordered,
            execution_mode,
            confidence,
            rationale,
            assignments,
        }
    }

    fn help_decision(
        &self,
        registry: &AgentRegistry,
        intent: IntentLabel,
        confidence: f64,
        rationale: String,
    ) -> RoutingDecision {
        let help = registry.help_agent_id().to_string();
        debug!(intent = %intent, help_agent = %help, "Routing to help agent");

        RoutingDecision {
            selected_agents: vec![help.clone()],
            execution_mode: ExecutionMode::Single,
            confidence,
            rationale,
            assignments: vec![AgentAssignment {
                agent_id: help,
                intent,
                coverage: confidence.max(0.0),
                fallback_agent_id: None,
            }],
        }
    }
}

/// Registry-declared (producer, consumer) pairs among the selected agents.
pub fn dependency_edges(registry: &AgentRegistry, selected: &[String]) -> Vec<(String, String)> {
    selected
        .iter()
        .filter_map(|agent| {
            let dependency = registry.dependency_of(agent)?;
            selected
                .iter()
                .any(|s| s == dependency)
                .then(|| (dependency.to_string(), agent.clone()))
        })
        .collect()
}

/// Kahn's algorithm, ties broken by selection order. Nodes left over by a
/// cycle are appended in selection order; the planner rejects such plans.
fn topological_order(selected: &[String], edges: &[(String, String)]) -> Vec<String> {
    let mut in_degree: BTreeMap<&str, usize> = selected.iter().map(|s| (s.as_str(), 0)).collect();
    for (_, to) in edges {
        if let Some(degree) = in_degree.get_mut(to.as_str()) {
            *degree += 1;
        }
    }

    let mut ordered: Vec<String> = Vec::with_capacity(selected.len());
    let mut placed: BTreeSet<&str> = BTreeSet::new();

    while ordered.len() < selected.len() {
        let next = selected
            .iter()
            .find(|s| !placed.contains(s.as_str()) && in_degree[s.as_str()] == 0);
        let Some(next) = next else {
            ordered.extend(
                selected
                    .iter()
                    .filter(|s| !placed.contains(s.as_str()))
                    .cloned(),
            );
            break;
        };
        placed.insert(next.as_str());
        ordered.push(next.clone());
        for (from, to) in edges {
            if from == next {
                if let Some(degree) = in_degree.get_mut(to.as_str()) {
                    *degree = degree.saturating_sub(1);
                }
            }
        }
    }
    ordered
}

/// single: one agent; parallel: no edges; sequential: the edges form one
/// chain through every agent; hybrid: anything else, including a chain with
/// unrelated agents running beside it. [`hybrid_shape`] says which.
pub fn select_mode(agent_count: usize, edges: &[(String, String)]) -> ExecutionMode {
    if agent_count <= 1 {
        return ExecutionMode::Single;
    }
    if edges.is_empty() {
        return ExecutionMode::Parallel;
    }

    let mut out_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for (from, to) in edges {
        *out_degree.entry(from.as_str()).or_default() += 1;
        *in_degree.entry(to.as_str()).or_default() += 1;
    }
    let is_chain = edges.len() == agent_count - 1
        && out_degree.values().all(|d| *d <= 1)
        && in_degree.values().all(|d| *d <= 1);

    if is_chain {
        ExecutionMode::Sequential
    } else {
        ExecutionMode::Hybrid
    }
}

/// Describe a hybrid plan: where branches converge, where one agent feeds
/// several, and which agents run independently of every edge.
fn hybrid_shape(selected: &[String], edges: &[(String, String)]) -> String {
    let mut out_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for (from, to) in edges {
        *out_degree.entry(from.as_str()).or_default() += 1;
        *in_degree.entry(to.as_str()).or_default() += 1;
    }
    let above_one = |degrees: &BTreeMap<&str, usize>| -> Vec<String> {
        selected
            .iter()
            .filter(|id| degrees.get(id.as_str()).is_some_and(|d| *d > 1))
            .cloned()
            .collect()
    };

    let mut parts = Vec::new();
    let converging = above_one(&in_degree);
    if !converging.is_empty() {
        parts.push(format!("branches converge into {}", converging.join(", ")));
    }
    let fanning = above_one(&out_degree);
    if !fanning.is_empty() {
        parts.push(format!("{} feeds several steps", fanning.join(", ")));
    }
    let independent: Vec<String> = selected
        .iter()
        .filter(|id| !in_degree.contains_key(id.as_str()) && !out_degree.contains_key(id.as_str()))
        .cloned()
        .collect();
    if !independent.is_empty() {
        parts.push(format!("{} runs alongside the dependent steps", independent.join(", ")));
    }
    if parts.is_empty() {
        parts.push("independent chains run side by side".to_string());
    }
    parts.join(", ")
}
