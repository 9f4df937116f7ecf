use async_trait::async_trait;
use chrono::{Duration as Days, Utc};
use sales_agent_orchestrator::{
    config::DecisionConfig,
    error::{CapabilityFailure, ConfigurationFailure, DecisionError},
    extractor::EntityExtractor,
    models::{
        EntityType, ExecutionMode, IntentLabel, PlanOutcome, ReferenceTarget, StepStatus,
        ToneProfile,
    },
    persona::PersonaEngine,
    reasoning::{EvidenceCollector, EvidenceSource, RawRecord, ScoringCapability, SourceQuery},
    registry::{
        AgentRegistry, Capability, HelpCapability, InvocationSignal, DISCOVERY_AGENT, HELP_AGENT,
        RANKING_AGENT,
    },
    IntentClassifier, Orchestrator, SalesAssistant,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SCENARIO: &str = "find fintech companies in Dubai, then rank them";

struct FintechDirectory;

#[async_trait]
impl Capability for FintechDirectory {
    async fn invoke(&self, input: &Value, _signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
        assert_eq!(input["sector"], json!(["fintech"]));
        assert_eq!(input["region"], json!(["Dubai"]));
        Ok(json!({
            "summary": "Found 3 fintech companies in Dubai.",
            "results": [{ "name": "Tabby" }, { "name": "Sarwa" }, { "name": "Ziina" }]
        }))
    }
}

struct NewsFeed;

#[async_trait]
impl EvidenceSource for NewsFeed {
    fn name(&self) -> &str {
        "news-feed"
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawRecord>, CapabilityFailure> {
        let record = |id: &str, kind: &str, content: &str, days: i64| RawRecord {
            source_id: id.to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
            confidence: Some(0.9),
            published_at: Some(Utc::now() - Days::days(days)),
            reliability: Some(0.9),
        };
        Ok(match query.target.as_str() {
            "Tabby" => vec![
                record("tabby-1", "funding-round", "Tabby raised a Series D", 10),
                record("tabby-2", "hiring-expansion", "Tabby is hiring in Dubai", 3),
            ],
            "Sarwa" => vec![record("sarwa-1", "hiring", "Sarwa opened 15 roles", 30)],
            _ => Vec::new(),
        })
    }
}

struct EmptyFeed;

#[async_trait]
impl EvidenceSource for EmptyFeed {
    fn name(&self) -> &str {
        "empty-feed"
    }

    async fn fetch(&self, _query: &SourceQuery) -> Result<Vec<RawRecord>, CapabilityFailure> {
        Ok(Vec::new())
    }
}

/// Never answers before the step deadline.
struct Stalled;

#[async_trait]
impl Capability for Stalled {
    async fn invoke(&self, _input: &Value, _signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({ "summary": "too late" }))
    }
}

fn scorer(source: Arc<dyn EvidenceSource>) -> Arc<dyn Capability> {
    let config = DecisionConfig::default().reasoning;
    let collector = EvidenceCollector::new(config.default_reliability).with_source(source);
    Arc::new(ScoringCapability::new(Arc::new(collector), config))
}

fn registry_with(ranking: Arc<dyn Capability>) -> Arc<AgentRegistry> {
    let mut registry = AgentRegistry::with_default_descriptors();
    registry.bind(HELP_AGENT, Arc::new(HelpCapability::new())).unwrap();
    registry.bind(DISCOVERY_AGENT, Arc::new(FintechDirectory)).unwrap();
    registry.bind(RANKING_AGENT, ranking).unwrap();
    Arc::new(registry)
}

fn assistant_with(ranking: Arc<dyn Capability>, config: DecisionConfig) -> SalesAssistant {
    SalesAssistant::new(registry_with(ranking), config)
        .unwrap()
        .with_extractor(EntityExtractor::new().with_known_companies(["Tabby", "Sarwa", "Ziina"]))
}

#[test]
fn scenario_utterance_is_understood() {
    let entities = EntityExtractor::new().extract(SCENARIO);
    let found: Vec<(EntityType, &str)> = entities
        .iter()
        .filter(|e| e.entity_type != EntityType::Reference)
        .map(|e| (e.entity_type, e.normalized_value.as_str()))
        .collect();
    assert_eq!(
        found,
        vec![(EntityType::Sector, "fintech"), (EntityType::Region, "Dubai")]
    );

    let intent = IntentClassifier::new().classify(SCENARIO, None);
    assert_eq!(intent.primary, IntentLabel::DiscoverySearch);
    assert_eq!(intent.secondary, vec![IntentLabel::RankingScore]);
}

#[tokio::test]
async fn discovery_feeds_ranking_then_follow_up_reuses_results() {
    let assistant = assistant_with(scorer(Arc::new(NewsFeed)), DecisionConfig::default());
    let conversation = Uuid::new_v4();
    let cancel = CancellationToken::new();

    let first = tokio_test::assert_ok!(assistant.respond(conversation, SCENARIO, None, &cancel).await);

    let decision = first.decision.as_ref().unwrap();
    assert_eq!(decision.execution_mode, ExecutionMode::Sequential);
    assert_eq!(
        decision.selected_agents,
        vec![DISCOVERY_AGENT.to_string(), RANKING_AGENT.to_string()]
    );

    let plan = first.plan.as_ref().unwrap();
    assert_eq!(plan.outcome, PlanOutcome::Complete);
    let ranking = &plan.outputs.values().find(|o| o.agent_id == RANKING_AGENT).unwrap().output;
    assert_eq!(ranking["ranking"][0]["company"], "Tabby");
    assert_eq!(ranking["ranking"].as_array().unwrap().len(), 3);
    assert!(first.text.starts_with("Found 3 fintech companies in Dubai.\nRanked 3 companies; top pick Tabby"));

    // "them" now points at the discovery result set from the previous turn
    let second = tokio_test::assert_ok!(assistant.respond(conversation, "rank them", None, &cancel).await);
    let decision = second.decision.as_ref().unwrap();
    assert_eq!(decision.selected_agents, vec![RANKING_AGENT.to_string()]);
    assert_eq!(decision.execution_mode, ExecutionMode::Single);
    assert_eq!(second.outcome(), Some(PlanOutcome::Complete));

    let latest = assistant.memory().latest(conversation).await.unwrap();
    match &latest.resolved_references()[0].target {
        ReferenceTarget::ResultSet { agent_id, items, .. } => {
            assert_eq!(agent_id, DISCOVERY_AGENT);
            assert_eq!(items, &vec!["Tabby".to_string(), "Sarwa".to_string(), "Ziina".to_string()]);
        }
        other => panic!("expected a result set, got {:?}", other),
    }
}

#[tokio::test]
async fn zero_evidence_scores_at_baseline_with_explanation() {
    let assistant = assistant_with(scorer(Arc::new(EmptyFeed)), DecisionConfig::default());
    let reply = tokio_test::assert_ok!(
        assistant
            .respond(Uuid::new_v4(), "score Tabby", None, &CancellationToken::new())
            .await
    );

    let plan = reply.plan.unwrap();
    assert_eq!(plan.outcome, PlanOutcome::Complete);
    let entry = &plan.outputs.values().next().unwrap().output["ranking"][0];
    assert_eq!(entry["company"], "Tabby");
    assert_eq!(entry["score"], json!(50.0));
    assert_eq!(entry["evidence_count"], 0);
    for explanation in entry["justification"].as_object().unwrap().values() {
        let text = explanation.as_str().unwrap();
        assert!(!text.is_empty());
        assert!(text.contains("no evidence available"));
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_keeps_completed_outputs() {
    let assistant = assistant_with(Arc::new(Stalled), DecisionConfig::default());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let reply = assistant
        .respond(Uuid::new_v4(), SCENARIO, None, &cancel)
        .await
        .unwrap();
    let plan = reply.plan.as_ref().unwrap();

    assert_eq!(plan.outcome, PlanOutcome::Partial);
    assert_eq!(plan.outputs.len(), 1);
    assert_eq!(plan.unmet.len(), 1);
    assert_eq!(plan.unmet[0].agent_id, RANKING_AGENT);
    assert_eq!(plan.unmet[0].status, StepStatus::Cancelled);
    assert!(reply.text.contains("Could not complete: ranking (cancelled)."));
}

#[tokio::test(start_paused = true)]
async fn stalled_step_times_out_and_is_reported() {
    let assistant = assistant_with(Arc::new(Stalled), DecisionConfig::default());
    let reply = assistant
        .respond(Uuid::new_v4(), SCENARIO, None, &CancellationToken::new())
        .await
        .unwrap();
    let plan = reply.plan.unwrap();

    assert_eq!(plan.outcome, PlanOutcome::Partial);
    assert_eq!(plan.unmet[0].status, StepStatus::TimedOut);
    assert!(plan.unmet[0].reason.starts_with("timed out after 1800 ms"));
}

#[tokio::test]
async fn cyclic_registry_never_executes() {
    let json = r#"[
        {"id": "help", "supported_intents": ["help.explain", "unknown"],
         "supported_entity_types": ["company"], "cost_estimate_ms": 20},
        {"id": "discovery", "supported_intents": ["discovery.search"],
         "supported_entity_types": ["sector", "region"], "cost_estimate_ms": 500,
         "depends_on_agent_id": "ranking"},
        {"id": "ranking", "supported_intents": ["ranking.score"],
         "supported_entity_types": ["company", "sector"], "cost_estimate_ms": 300,
         "depends_on_agent_id": "discovery"}
    ]"#;
    let registry = Arc::new(AgentRegistry::from_metadata_json(json, "help").unwrap());

    assert!(matches!(
        SalesAssistant::new(registry.clone(), DecisionConfig::default()),
        Err(DecisionError::Configuration(ConfigurationFailure::DependencyCycle { .. }))
    ));

    // driven directly, the orchestrator fails in planning
    let classifier = IntentClassifier::new();
    let intent = classifier.classify(SCENARIO, None);
    let entities = EntityExtractor::new().extract(SCENARIO);
    let resolved = sales_agent_orchestrator::ConversationMemory::new(5)
        .session(Uuid::new_v4())
        .await
        .resolve(&entities, &intent);
    let query = sales_agent_orchestrator::QueryNormalizer::new()
        .normalize(&intent, &resolved, SCENARIO)
        .unwrap();
    let decision = sales_agent_orchestrator::ToolRouter::default().route(&query, &registry);

    let orchestrator = Orchestrator::new(registry, DecisionConfig::default().execution);
    let result = orchestrator
        .run(&decision, &query, &CancellationToken::new())
        .await;
    assert_eq!(result.outcome, PlanOutcome::Failed);
    assert!(result.steps.is_empty());
    assert!(result.outputs.is_empty());
}

#[tokio::test]
async fn tone_changes_rendering_only() {
    let assistant = assistant_with(scorer(Arc::new(NewsFeed)), DecisionConfig::default());
    let cancel = CancellationToken::new();

    let plain = assistant
        .respond(Uuid::new_v4(), SCENARIO, None, &cancel)
        .await
        .unwrap();
    let executive = assistant
        .respond(Uuid::new_v4(), SCENARIO, Some("executive"), &cancel)
        .await
        .unwrap();

    assert!(executive.text.starts_with("Bottom line:"));
    assert!(executive.text.contains("(high confidence)") || executive.text.contains("(moderate confidence)"));
    assert_eq!(
        plain.plan.unwrap().outputs.len(),
        executive.plan.unwrap().outputs.len()
    );

    // an empty profile is the identity on already-normalized text
    let engine = PersonaEngine::default();
    assert_eq!(engine.apply(&plain.text, &ToneProfile::neutral("plain")), plain.text);
}

#[tokio::test]
async fn memory_keeps_most_recent_window() {
    let mut config = DecisionConfig::default();
    config.memory.window = 3;
    let assistant = assistant_with(scorer(Arc::new(EmptyFeed)), config);
    let conversation = Uuid::new_v4();

    let utterances = ["help", "what can you do", "good morning", "hello", "explain ranking"];
    for text in utterances {
        assistant
            .respond(conversation, text, None, &CancellationToken::new())
            .await
            .unwrap();
    }

    let memory = assistant.memory().snapshot(conversation).await;
    assert_eq!(memory.turn_count(), 3);
    let kept: Vec<String> = memory
        .turns()
        .map(|turn| turn.utterance().text.clone())
        .collect();
    assert_eq!(kept, vec!["good morning", "hello", "explain ranking"]);
}
