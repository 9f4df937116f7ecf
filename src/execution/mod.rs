//! Execution engine for plan DAGs
//!
//! Steps run in topological waves. Every ready step in a wave is launched
//! concurrently and owns its own timeout; the engine waits for the whole wave
//! before computing the next one. A failed step only affects its dependents.

use crate::error::{CapabilityFailure, ConfigurationFailure};
use crate::models::{ExecutionPlan, ExecutionStep, StepId, StepOutput, StepRecord, StepStatus};
use crate::planner::waves;
use crate::registry::{AgentRegistry, InvocationSignal};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything the engine learned while running a plan
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// One record per plan step, in plan order
    pub records: Vec<StepRecord>,
    pub outputs: BTreeMap<StepId, StepOutput>,
    pub cancelled: bool,
}

/// Outcome of one step, including any fallback attempt
struct StepRun {
    status: StepStatus,
    executed_by: Option<String>,
    attempts: u32,
    failures: Vec<CapabilityFailure>,
    output: Option<Value>,
    used_fallback: bool,
    execution_time_ms: u64,
}

pub struct ExecutionEngine {
    registry: Arc<AgentRegistry>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Run every step of `plan`. Step failures are recorded, never returned;
    /// only a malformed plan is an error.
    pub async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ConfigurationFailure> {
        let waves = waves(plan)?;

        let mut records: Vec<StepRecord> = plan
            .steps
            .iter()
            .map(|step| StepRecord {
                step_id: step.step_id.clone(),
                agent_id: step.agent_id.clone(),
                status: StepStatus::Pending,
                executed_by: None,
                attempts: 0,
                failures: Vec::new(),
                execution_time_ms: 0,
                required: step.required,
            })
            .collect();
        let mut outputs: BTreeMap<StepId, StepOutput> = BTreeMap::new();
        let index: BTreeMap<&StepId, usize> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (&step.step_id, i))
            .collect();

        debug!(plan_id = %plan.plan_id, wave_count = waves.len(), "Starting plan execution");

        for (wave_number, wave) in waves.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            // -------------------------------------------------
            // Dependency gate: anything downstream of a miss is skipped
            // -------------------------------------------------
            let mut running = FuturesUnordered::new();
            for &i in wave {
                let step = &plan.steps[i];
                let unmet: Vec<&StepId> = step
                    .depends_on
                    .iter()
                    .filter(|dep| records[index[dep]].status != StepStatus::Completed)
                    .collect();

                if !unmet.is_empty() {
                    warn!(
                        step_id = %step.step_id,
                        unmet = ?unmet,
                        "Skipping step due to unmet dependencies"
                    );
                    records[i].status = StepStatus::Skipped;
                    continue;
                }

                let input = with_upstream(step, plan, &outputs, &index);
                let token = cancel.child_token();
                running.push(async move { (i, self.run_step(step, input, token).await) });
            }

            debug!(
                plan_id = %plan.plan_id,
                wave = wave_number,
                launched = running.len(),
                "Wave launched"
            );

            // -------------------------------------------------
            // Wait for the whole wave
            // -------------------------------------------------
            while let Some((i, run)) = running.next().await {
                let step = &plan.steps[i];
                let record = &mut records[i];
                record.status = run.status;
                record.executed_by = run.executed_by.clone();
                record.attempts = run.attempts;
                record.failures = run.failures;
                record.execution_time_ms = run.execution_time_ms;

                if let (StepStatus::Completed, Some(output)) = (run.status, run.output) {
                    outputs.insert(
                        step.step_id.clone(),
                        StepOutput {
                            agent_id: run.executed_by.unwrap_or_else(|| step.agent_id.clone()),
                            output,
                            used_fallback: run.used_fallback,
                        },
                    );
                }
            }
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            for record in records.iter_mut().filter(|r| r.status == StepStatus::Pending) {
                record.status = StepStatus::Cancelled;
            }
        }

        debug!(
            plan_id = %plan.plan_id,
            completed = outputs.len(),
            cancelled,
            "Plan execution finished"
        );

        Ok(ExecutionReport {
            records,
            outputs,
            cancelled,
        })
    }

    /// Primary attempt, then at most one fallback attempt.
    async fn run_step(&self, step: &ExecutionStep, input: Value, cancel: CancellationToken) -> StepRun {
        let start = Instant::now();
        let mut failures = Vec::new();
        let mut attempts = 0;

        let mut candidates = vec![(step.agent_id.as_str(), false)];
        if let Some(fallback) = step.fallback_agent_id.as_deref() {
            candidates.push((fallback, true));
        }

        for (agent_id, is_fallback) in candidates {
            attempts += 1;
            match self.invoke_once(agent_id, &input, step.timeout_ms, &cancel).await {
                Ok(output) => {
                    debug!(
                        step_id = %step.step_id,
                        agent_id = %agent_id,
                        fallback = is_fallback,
                        "Step completed"
                    );
                    return StepRun {
                        status: StepStatus::Completed,
                        executed_by: Some(agent_id.to_string()),
                        attempts,
                        failures,
                        output: Some(output),
                        used_fallback: is_fallback,
                        execution_time_ms: start.elapsed().as_millis() as u64,
                    };
                }
                Err(CapabilityFailure::Cancelled) => {
                    failures.push(CapabilityFailure::Cancelled);
                    return StepRun {
                        status: StepStatus::Cancelled,
                        executed_by: None,
                        attempts,
                        failures,
                        output: None,
                        used_fallback: is_fallback,
                        execution_time_ms: start.elapsed().as_millis() as u64,
                    };
                }
                Err(failure) => {
                    warn!(
                        step_id = %step.step_id,
                        agent_id = %agent_id,
                        kind = failure.kind(),
                        error = %failure,
                        "Step attempt failed"
                    );
                    failures.push(failure);
                }
            }
        }

        let status = match failures.last() {
            Some(CapabilityFailure::Timeout(_)) => StepStatus::TimedOut,
            _ => StepStatus::Failed,
        };
        StepRun {
            status,
            executed_by: None,
            attempts,
            failures,
            output: None,
            used_fallback: attempts > 1,
            execution_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn invoke_once(
        &self,
        agent_id: &str,
        input: &Value,
        timeout_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<Value, CapabilityFailure> {
        let capability = self.registry.capability(agent_id).ok_or_else(|| {
            CapabilityFailure::UpstreamError(format!("no capability bound for agent '{}'", agent_id))
        })?;

        let budget = Duration::from_millis(timeout_ms);
        let signal = InvocationSignal::new(cancel.clone(), budget);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CapabilityFailure::Cancelled),
            result = tokio::time::timeout(budget, capability.invoke(input, &signal)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(CapabilityFailure::Timeout(timeout_ms)),
                }
            }
        }
    }
}

/// Step input with dependency outputs under `upstream.<agent id>`.
fn with_upstream(
    step: &ExecutionStep,
    plan: &ExecutionPlan,
    outputs: &BTreeMap<StepId, StepOutput>,
    index: &BTreeMap<&StepId, usize>,
) -> Value {
    if step.depends_on.is_empty() {
        return step.input.clone();
    }

    let mut upstream = Map::new();
    for dependency in &step.depends_on {
        if let Some(output) = outputs.get(dependency) {
            let producer = &plan.steps[index[dependency]].agent_id;
            upstream.insert(producer.clone(), output.output.clone());
        }
    }

    let mut input = match &step.input {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    };
    input.insert("upstream".to_string(), Value::Object(upstream));
    Value::Object(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentDescriptor, EntityType, ExecutionMode, IntentLabel};
    use crate::registry::{Capability, HELP_AGENT};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Fixed(Value);

    #[async_trait::async_trait]
    impl Capability for Fixed {
        async fn invoke(&self, _input: &Value, _signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl Capability for Failing {
        async fn invoke(&self, _input: &Value, _signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
            Err(CapabilityFailure::UpstreamError("provider returned 500".to_string()))
        }
    }

    struct Slow(u64);

    #[async_trait::async_trait]
    impl Capability for Slow {
        async fn invoke(&self, _input: &Value, _signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            Ok(json!({ "summary": "slow answer" }))
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<Value>>);

    #[async_trait::async_trait]
    impl Capability for Recording {
        async fn invoke(&self, input: &Value, _signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
            self.0.lock().unwrap().push(input.clone());
            Ok(json!({ "summary": "recorded" }))
        }
    }

    fn cap<C: Capability + 'static>(capability: C) -> Arc<dyn Capability> {
        Arc::new(capability)
    }

    fn registry(capabilities: Vec<(&str, Arc<dyn Capability>)>) -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new(HELP_AGENT);
        for (id, capability) in capabilities {
            registry
                .register(
                    AgentDescriptor::new(id, [IntentLabel::RankingScore], [EntityType::Company], 100),
                    capability,
                )
                .unwrap();
        }
        Arc::new(registry)
    }

    fn plan(steps: Vec<ExecutionStep>) -> ExecutionPlan {
        ExecutionPlan {
            plan_id: Uuid::new_v4(),
            mode: ExecutionMode::Hybrid,
            steps,
            created_at: Utc::now(),
        }
    }

    fn status_of(report: &ExecutionReport, step: &str) -> StepStatus {
        report
            .records
            .iter()
            .find(|r| r.step_id.as_str() == step)
            .map(|r| r.status)
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_step_does_not_affect_siblings() {
        let engine = ExecutionEngine::new(registry(vec![
            ("one", cap(Fixed(json!({ "summary": "1" })))),
            ("two", cap(Failing)),
            ("three", cap(Fixed(json!({ "summary": "3" })))),
        ]));
        let report = engine
            .execute_plan(
                &plan(vec![
                    ExecutionStep::new("s1", "one", 500),
                    ExecutionStep::new("s2", "two", 500),
                    ExecutionStep::new("s3", "three", 500),
                ]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(status_of(&report, "s1"), StepStatus::Completed);
        assert_eq!(status_of(&report, "s2"), StepStatus::Failed);
        assert_eq!(status_of(&report, "s3"), StepStatus::Completed);
        assert_eq!(report.outputs.len(), 2);
        assert_eq!(report.records[1].attempts, 1);
        assert_eq!(report.records[1].failures[0].kind(), "upstream_error");
    }

    #[tokio::test]
    async fn test_dependents_of_failure_are_skipped() {
        let engine = ExecutionEngine::new(registry(vec![
            ("producer", cap(Failing)),
            ("consumer", cap(Fixed(json!({})))),
            ("bystander", cap(Fixed(json!({})))),
        ]));
        let report = engine
            .execute_plan(
                &plan(vec![
                    ExecutionStep::new("p", "producer", 500),
                    ExecutionStep::new("c", "consumer", 500).after("p"),
                    ExecutionStep::new("b", "bystander", 500),
                ]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(status_of(&report, "p"), StepStatus::Failed);
        assert_eq!(status_of(&report, "c"), StepStatus::Skipped);
        assert_eq!(status_of(&report, "b"), StepStatus::Completed);
        assert_eq!(report.records[1].attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retries_with_fallback() {
        let engine = ExecutionEngine::new(registry(vec![
            ("slow", cap(Slow(10_000))),
            ("backup", cap(Fixed(json!({ "summary": "from backup" })))),
        ]));
        let report = engine
            .execute_plan(
                &plan(vec![ExecutionStep::new("s", "slow", 100).with_fallback("backup")]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let record = &report.records[0];
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.executed_by.as_deref(), Some("backup"));
        assert_eq!(record.attempts, 2);
        assert_eq!(record.failures, vec![CapabilityFailure::Timeout(100)]);

        let output = &report.outputs[&StepId::from("s")];
        assert!(output.used_fallback);
        assert_eq!(output.output["summary"], "from backup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_step_does_not_stall_siblings() {
        let engine = ExecutionEngine::new(registry(vec![
            ("slow", cap(Slow(60_000))),
            ("quick", cap(Slow(10))),
        ]));
        let started = Instant::now();
        let report = engine
            .execute_plan(
                &plan(vec![
                    ExecutionStep::new("slow", "slow", 200),
                    ExecutionStep::new("quick", "quick", 200),
                ]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(status_of(&report, "slow"), StepStatus::TimedOut);
        assert_eq!(status_of(&report, "quick"), StepStatus::Completed);
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_upstream_output_injected() {
        let recorder = Arc::new(Recording::default());
        let engine = ExecutionEngine::new(registry(vec![
            ("discovery", cap(Fixed(json!({ "summary": "found 2", "results": ["Tabby", "Sarwa"] })))),
            ("ranking", recorder.clone() as Arc<dyn Capability>),
        ]));
        engine
            .execute_plan(
                &plan(vec![
                    ExecutionStep::new("find", "discovery", 500).with_input(json!({ "sector": ["fintech"] })),
                    ExecutionStep::new("rank", "ranking", 500)
                        .after("find")
                        .with_input(json!({ "targets_from": "discovery.search" })),
                ]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["targets_from"], "discovery.search");
        assert_eq!(seen[0]["upstream"]["discovery"]["results"], json!(["Tabby", "Sarwa"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_keeps_completed_outputs() {
        let engine = ExecutionEngine::new(registry(vec![
            ("fast", cap(Fixed(json!({ "summary": "done" })))),
            ("slow", cap(Slow(5_000))),
            ("last", cap(Fixed(json!({})))),
        ]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = engine
            .execute_plan(
                &plan(vec![
                    ExecutionStep::new("a", "fast", 10_000),
                    ExecutionStep::new("b", "slow", 10_000).after("a"),
                    ExecutionStep::new("c", "last", 10_000).after("b"),
                ]),
                &cancel,
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(status_of(&report, "a"), StepStatus::Completed);
        assert_eq!(status_of(&report, "b"), StepStatus::Cancelled);
        assert_eq!(status_of(&report, "c"), StepStatus::Cancelled);
        assert!(report.outputs.contains_key(&StepId::from("a")));
    }

    #[tokio::test]
    async fn test_unbound_agent_fails_step() {
        let engine = ExecutionEngine::new(registry(vec![]));
        let report = engine
            .execute_plan(
                &plan(vec![ExecutionStep::new("s", "ghost", 100)]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.records[0].status, StepStatus::Failed);
    }
}
