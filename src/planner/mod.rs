//! Execution planning
//!
//! Turns a routing decision into a per-request DAG of steps. Planning is
//! deterministic and fails fast on any configuration problem, before a
//! single step runs.

use crate::config::ExecutionConfig;
use crate::error::ConfigurationFailure;
use crate::models::{
    AgentAssignment, ExecutionPlan, ExecutionStep, NormalizedQuery, RoutingDecision, StepId,
};
use crate::registry::AgentRegistry;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct Planner {
    config: ExecutionConfig,
}

impl Planner {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// Step timeout derived from the agent's cost estimate.
    pub fn timeout_for(&self, cost_estimate_ms: u64) -> u64 {
        cost_estimate_ms
            .saturating_mul(self.config.timeout_multiplier)
            .max(self.config.min_step_timeout_ms)
    }

    pub fn plan(
        &self,
        decision: &RoutingDecision,
        query: &NormalizedQuery,
        registry: &AgentRegistry,
    ) -> Result<ExecutionPlan, ConfigurationFailure> {
        registry.validate()?;

        if decision.selected_agents.len() > self.config.max_steps_per_plan {
            return Err(ConfigurationFailure::TooManySteps {
                count: decision.selected_agents.len(),
                limit: self.config.max_steps_per_plan,
            });
        }

        let mut steps = Vec::with_capacity(decision.selected_agents.len());
        for agent_id in &decision.selected_agents {
            let descriptor = registry
                .descriptor(agent_id)
                .ok_or_else(|| ConfigurationFailure::UnknownAgent(agent_id.clone()))?;

            let assignment = decision.assignment(agent_id);
            let mut step = ExecutionStep::new(
                agent_id.as_str(),
                agent_id.clone(),
                self.timeout_for(descriptor.cost_estimate_ms),
            )
            .with_input(step_input(assignment, query));

            if let Some(dependency) = registry.dependency_of(agent_id) {
                if decision.selected_agents.iter().any(|a| a == dependency) {
                    step = step.after(dependency);
                }
            }
            if let Some(fallback) = assignment.and_then(|a| a.fallback_agent_id.as_deref()) {
                step = step.with_fallback(fallback);
            }
            steps.push(step);
        }

        let plan = ExecutionPlan {
            plan_id: Uuid::new_v4(),
            mode: decision.execution_mode,
            steps,
            created_at: Utc::now(),
        };

        // acyclicity and dangling step references
        waves(&plan)?;

        debug!(
            plan_id = %plan.plan_id,
            step_count = plan.steps.len(),
            mode = %plan.mode,
            "Plan created"
        );
        Ok(plan)
    }
}

/// Parameters of the sub-query the agent serves, plus intent and raw text.
fn step_input(assignment: Option<&AgentAssignment>, query: &NormalizedQuery) -> Value {
    let mut input = Map::new();
    if let Some(assignment) = assignment {
        if let Some(sub_query) = query.sub_queries().find(|q| q.intent == assignment.intent) {
            input = sub_query.parameters.clone();
        }
        input.insert(
            "intent".to_string(),
            Value::String(assignment.intent.to_string()),
        );
    }
    input.insert("query".to_string(), Value::String(query.raw_text.clone()));
    Value::Object(input)
}

/// Topological waves (Kahn). Each wave holds indices of steps whose
/// dependencies all sit in earlier waves; order within a wave follows the
/// plan's step order.
pub fn waves(plan: &ExecutionPlan) -> Result<Vec<Vec<usize>>, ConfigurationFailure> {
    let index: BTreeMap<&StepId, usize> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| (&step.step_id, i))
        .collect();

    let mut remaining_deps: Vec<usize> = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        for dependency in &step.depends_on {
            if !index.contains_key(dependency) {
                return Err(ConfigurationFailure::DanglingStep {
                    step: step.step_id.to_string(),
                    missing: dependency.to_string(),
                });
            }
        }
        remaining_deps.push(step.depends_on.len());
    }

    let mut waves = Vec::new();
    let mut done: BTreeSet<usize> = BTreeSet::new();

    while done.len() < plan.steps.len() {
        let wave: Vec<usize> = (0..plan.steps.len())
            .filter(|i| !done.contains(i) && remaining_deps[*i] == 0)
            .collect();

        if wave.is_empty() {
            let path = plan
                .steps
                .iter()
                .enumerate()
                .filter(|(i, _)| !done.contains(i))
                .map(|(_, step)| step.step_id.to_string())
                .collect();
            return Err(ConfigurationFailure::DependencyCycle { path });
        }

        for &i in &wave {
            done.insert(i);
            for (j, step) in plan.steps.iter().enumerate() {
                if step.depends_on.contains(&plan.steps[i].step_id) {
                    remaining_deps[j] -= 1;
                }
            }
        }
        waves.push(wave);
    }

    Ok(waves)
}
