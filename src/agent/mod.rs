//! Orchestrator - runs a routing decision end to end
//!
//! PLANNING → EXECUTING → AGGREGATING → {COMPLETE | PARTIAL | FAILED}

use crate::config::ExecutionConfig;
use crate::error::ConfigurationFailure;
use crate::execution::{ExecutionEngine, ExecutionReport};
use crate::models::{
    ExecutionMode, ExecutionPlan, NormalizedQuery, PlanOutcome, PlanResult, RoutingDecision,
    StepRecord, StepStatus, UnmetStep,
};
use crate::planner::Planner;
use crate::registry::AgentRegistry;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Planning,
    Executing,
    Aggregating,
    Complete,
    Partial,
    Failed,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestratorState::Planning => "PLANNING",
            OrchestratorState::Executing => "EXECUTING",
            OrchestratorState::Aggregating => "AGGREGATING",
            OrchestratorState::Complete => "COMPLETE",
            OrchestratorState::Partial => "PARTIAL",
            OrchestratorState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl From<PlanOutcome> for OrchestratorState {
    fn from(outcome: PlanOutcome) -> Self {
        match outcome {
            PlanOutcome::Complete => OrchestratorState::Complete,
            PlanOutcome::Partial => OrchestratorState::Partial,
            PlanOutcome::Failed => OrchestratorState::Failed,
        }
    }
}

/// Ordered record of state transitions for one run
#[derive(Debug, Default)]
struct Trace {
    lines: Vec<String>,
}

impl Trace {
    fn enter(&mut self, state: OrchestratorState, detail: impl AsRef<str>) {
        self.lines.push(format!("{}: {}", state, detail.as_ref()));
    }
}

/// Main orchestrator that coordinates planning, execution and aggregation
pub struct Orchestrator {
    planner: Planner,
    execution_engine: ExecutionEngine,
}

impl Orchestrator {
    pub fn new(registry: Arc<AgentRegistry>, config: ExecutionConfig) -> Self {
        Self {
            planner: Planner::new(config),
            execution_engine: ExecutionEngine::new(registry),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        self.execution_engine.registry()
    }

    /// Plan and execute a routing decision.
    pub async fn run(
        &self,
        decision: &RoutingDecision,
        query: &NormalizedQuery,
        cancel: &CancellationToken,
    ) -> PlanResult {
        let start_time = Instant::now();
        let mut trace = Trace::default();

        info!(
            agents = ?decision.selected_agents,
            mode = %decision.execution_mode,
            "Orchestrator: starting execution"
        );

        trace.enter(
            OrchestratorState::Planning,
            format!(
                "{} agent(s), mode {}",
                decision.selected_agents.len(),
                decision.execution_mode
            ),
        );

        let plan = match self.planner.plan(decision, query, self.registry()) {
            Ok(plan) => plan,
            Err(failure) => {
                return failed_before_execution(
                    Uuid::new_v4(),
                    Some(decision.execution_mode),
                    failure,
                    trace,
                    start_time,
                )
            }
        };
        trace.enter(
            OrchestratorState::Planning,
            format!("{} steps in plan", plan.steps.len()),
        );

        self.execute(plan, cancel, trace, start_time).await
    }

    /// Execute an already built plan.
    pub async fn run_plan(&self, plan: ExecutionPlan, cancel: &CancellationToken) -> PlanResult {
        let mut trace = Trace::default();
        trace.enter(
            OrchestratorState::Planning,
            format!("{} steps supplied", plan.steps.len()),
        );
        self.execute(plan, cancel, trace, Instant::now()).await
    }

    async fn execute(
        &self,
        plan: ExecutionPlan,
        cancel: &CancellationToken,
        mut trace: Trace,
        start_time: Instant,
    ) -> PlanResult {
        // === EXECUTE ===
        trace.enter(OrchestratorState::Executing, "running plan steps");
        let report = match self.execution_engine.execute_plan(&plan, cancel).await {
            Ok(report) => report,
            Err(failure) => {
                return failed_before_execution(
                    plan.plan_id,
                    Some(plan.mode),
                    failure,
                    trace,
                    start_time,
                )
            }
        };

        for record in &report.records {
            trace.lines.push(format!(
                "OBSERVE: {} ({}) {:?} after {} attempt(s), {} ms",
                record.step_id,
                record.executed_by.as_deref().unwrap_or(&record.agent_id),
                record.status,
                record.attempts,
                record.execution_time_ms
            ));
        }

        // === AGGREGATE ===
        trace.enter(
            OrchestratorState::Aggregating,
            format!("{} output(s)", report.outputs.len()),
        );
        let result = aggregate(&plan, report, trace, start_time);

        info!(
            plan_id = %result.plan_id,
            outcome = ?result.outcome,
            unmet = result.unmet.len(),
            execution_time_ms = result.execution_time_ms,
            "Orchestrator: finished"
        );
        result
    }
}

fn failed_before_execution(
    plan_id: Uuid,
    mode: Option<ExecutionMode>,
    failure: ConfigurationFailure,
    mut trace: Trace,
    start_time: Instant,
) -> PlanResult {
    warn!(plan_id = %plan_id, error = %failure, "Planning failed, nothing executed");
    trace.enter(OrchestratorState::Failed, failure.to_string());

    PlanResult {
        plan_id,
        outcome: PlanOutcome::Failed,
        mode,
        outputs: Default::default(),
        steps: Vec::new(),
        unmet: Vec::new(),
        failure: Some(failure.to_string()),
        trace: trace.lines,
        execution_time_ms: start_time.elapsed().as_millis() as u64,
    }
}

/// Explain why a step produced nothing.
fn unmet_reason(record: &StepRecord, plan: &ExecutionPlan, records: &[StepRecord]) -> String {
    match record.status {
        StepStatus::Skipped => {
            let missing: Vec<String> = plan
                .steps
                .iter()
                .find(|s| s.step_id == record.step_id)
                .map(|step| {
                    step.depends_on
                        .iter()
                        .filter(|dep| {
                            records
                                .iter()
                                .any(|r| &r.step_id == *dep && r.status != StepStatus::Completed)
                        })
                        .map(|dep| dep.to_string())
                        .collect()
                })
                .unwrap_or_default();
            format!("depends on {} which did not complete", missing.join(", "))
        }
        StepStatus::Cancelled => "cancelled".to_string(),
        StepStatus::Pending => "not run".to_string(),
        _ => {
            let failures: Vec<String> = record.failures.iter().map(|f| f.to_string()).collect();
            if failures.is_empty() {
                format!("{:?}", record.status).to_lowercase()
            } else {
                failures.join("; then ")
            }
        }
    }
}

fn aggregate(
    plan: &ExecutionPlan,
    report: ExecutionReport,
    mut trace: Trace,
    start_time: Instant,
) -> PlanResult {
    let unmet: Vec<UnmetStep> = report
        .records
        .iter()
        .filter(|r| r.required && r.status != StepStatus::Completed)
        .map(|r| UnmetStep {
            step_id: r.step_id.clone(),
            agent_id: r.agent_id.clone(),
            status: r.status,
            reason: unmet_reason(r, plan, &report.records),
        })
        .collect();

    let (outcome, failure) = if !plan.steps.is_empty() && report.outputs.is_empty() {
        let reason = if report.cancelled {
            "cancelled before any step completed".to_string()
        } else {
            "no step produced an output".to_string()
        };
        (PlanOutcome::Failed, Some(reason))
    } else if unmet.is_empty() {
        (PlanOutcome::Complete, None)
    } else {
        (PlanOutcome::Partial, None)
    };

    let state = OrchestratorState::from(outcome);
    trace.enter(
        state,
        match outcome {
            PlanOutcome::Complete => "all required steps succeeded".to_string(),
            _ => format!("{} unmet step(s)", unmet.len()),
        },
    );
    debug!(plan_id = %plan.plan_id, state = %state, "Aggregation complete");

    PlanResult {
        plan_id: plan.plan_id,
        outcome,
        mode: Some(plan.mode),
        outputs: report.outputs,
        steps: report.records,
        unmet,
        failure,
        trace: trace.lines,
        execution_time_ms: start_time.elapsed().as_millis() as u64,
    }
}
