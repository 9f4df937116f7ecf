use async_trait::async_trait;
use chrono::{Duration, Utc};
use sales_agent_orchestrator::{
    config::DecisionConfig,
    error::CapabilityFailure,
    extractor::EntityExtractor,
    reasoning::{EvidenceCollector, EvidenceSource, RawRecord, ScoringCapability, SourceQuery},
    registry::{
        AgentRegistry, Capability, HelpCapability, InvocationSignal, DISCOVERY_AGENT,
        ENRICHMENT_AGENT, HELP_AGENT, OUTREACH_AGENT, RANKING_AGENT,
    },
    SalesAssistant,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// (name, sector, region, one-line profile)
const CATALOG: &[(&str, &str, &str, &str)] = &[
    ("Tabby", "fintech", "Dubai", "Buy-now-pay-later provider across the GCC"),
    ("Sarwa", "fintech", "Dubai", "Digital investment and savings platform"),
    ("Ziina", "fintech", "Dubai", "Peer-to-peer and merchant payments app"),
    ("Tamara", "fintech", "Riyadh", "Instalment payments for Saudi retailers"),
    ("Careem", "logistics", "Dubai", "Ride-hailing and delivery super app"),
];

fn strings(input: &Value, key: &str) -> Vec<String> {
    match input.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_lowercase))
            .collect(),
        Some(Value::String(s)) => vec![s.to_lowercase()],
        _ => Vec::new(),
    }
}

// -----------------------------------------------------------------------------
// Demo capabilities
// -----------------------------------------------------------------------------

struct CatalogDiscovery;

#[async_trait]
impl Capability for CatalogDiscovery {
    async fn invoke(&self, input: &Value, _signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
        let sectors = strings(input, "sector");
        let regions = strings(input, "region");

        let results: Vec<Value> = CATALOG
            .iter()
            .filter(|(_, sector, region, _)| {
                (sectors.is_empty() || sectors.contains(&sector.to_lowercase()))
                    && (regions.is_empty() || regions.contains(&region.to_lowercase()))
            })
            .map(|(name, sector, region, _)| json!({ "name": name, "sector": sector, "region": region }))
            .collect();

        Ok(json!({
            "summary": format!("Found {} matching companies.", results.len()),
            "results": results,
        }))
    }
}

struct CatalogProfile;

#[async_trait]
impl Capability for CatalogProfile {
    async fn invoke(&self, input: &Value, _signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
        let mut targets = strings(input, "target");
        targets.extend(strings(input, "targets"));
        if targets.is_empty() {
            return Err(CapabilityFailure::InvalidInput("no company to profile".to_string()));
        }

        let profiles: Vec<String> = targets
            .iter()
            .map(|target| {
                match CATALOG.iter().find(|(name, ..)| name.to_lowercase() == *target) {
                    Some((name, _, region, profile)) => format!("{} ({}): {}.", name, region, profile),
                    None => format!("{}: no profile on file.", target),
                }
            })
            .collect();

        Ok(json!({ "summary": profiles.join(" "), "profiles": profiles }))
    }
}

struct TemplateOutreach;

#[async_trait]
impl Capability for TemplateOutreach {
    async fn invoke(&self, input: &Value, signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
        if signal.is_cancelled() {
            return Err(CapabilityFailure::Cancelled);
        }
        let context = input
            .pointer(&format!("/upstream/{}/summary", ENRICHMENT_AGENT))
            .and_then(Value::as_str)
            .unwrap_or("your recent growth");
        let greeting = input
            .pointer("/targets/0")
            .and_then(Value::as_str)
            .unwrap_or("there");

        Ok(json!({
            "summary": format!(
                "Drafted outreach: Hi {} team, we noticed {} and would like to share how we help similar companies.",
                greeting, context
            )
        }))
    }
}

/// Canned buying signals, as a news/job-board source would return them.
struct DemoSignals;

#[async_trait]
impl EvidenceSource for DemoSignals {
    fn name(&self) -> &str {
        "demo-signals"
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawRecord>, CapabilityFailure> {
        let now = Utc::now();
        let record = |id: &str, kind: &str, content: &str, confidence: f64, days: i64| RawRecord {
            source_id: format!("{}:{}", query.target.to_lowercase(), id),
            kind: kind.to_string(),
            content: content.to_string(),
            confidence: Some(confidence),
            published_at: Some(now - Duration::days(days)),
            reliability: Some(0.8),
        };

        let records = match query.target.to_lowercase().as_str() {
            "tabby" => vec![
                record("round", "funding-round", "Tabby raised a $200M Series D", 0.95, 20),
                record("jobs", "hiring-expansion", "Tabby is hiring 120 engineers in Dubai", 0.85, 5),
                record("cto", "leadership-change", "Tabby appointed a new CTO", 0.7, 60),
            ],
            "sarwa" => vec![
                record("jobs", "hiring", "Sarwa opened 15 roles in Dubai", 0.7, 10),
                record("launch", "product-launch", "Sarwa launched crypto trading", 0.8, 45),
            ],
            "ziina" => vec![record("seed", "funding", "Ziina closed a seed extension", 0.6, 200)],
            _ => Vec::new(),
        };
        Ok(records)
    }
}

fn build_registry(config: &DecisionConfig) -> sales_agent_orchestrator::Result<AgentRegistry> {
    let collector = EvidenceCollector::new(config.reasoning.default_reliability)
        .with_source(Arc::new(DemoSignals));

    let mut registry = AgentRegistry::with_default_descriptors();
    registry.bind(DISCOVERY_AGENT, Arc::new(CatalogDiscovery))?;
    registry.bind(
        RANKING_AGENT,
        Arc::new(ScoringCapability::new(Arc::new(collector), config.reasoning.clone())),
    )?;
    registry.bind(ENRICHMENT_AGENT, Arc::new(CatalogProfile))?;
    registry.bind(OUTREACH_AGENT, Arc::new(TemplateOutreach))?;
    registry.bind(HELP_AGENT, Arc::new(HelpCapability::new()))?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Sales Agent Orchestrator starting");

    let config = DecisionConfig::from_env()?;
    let registry = Arc::new(build_registry(&config)?);
    let extractor =
        EntityExtractor::new().with_known_companies(CATALOG.iter().map(|(name, ..)| *name));
    let assistant = SalesAssistant::new(registry, config)?.with_extractor(extractor);

    let conversation_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let script: &[(&str, Option<&str>)] = &[
        ("find fintech companies in Dubai, then rank them", None),
        ("rank them", Some("executive")),
        ("tell me about Tabby and draft an outreach email", Some("friendly")),
        ("what's the weather like?", None),
    ];

    for (utterance, tone) in script {
        info!(conversation_id = %conversation_id, utterance, "User");
        let reply = assistant
            .respond(conversation_id, utterance, *tone, &cancel)
            .await?;

        println!("\n> {}", utterance);
        println!("{}", reply.text);
        if let Some(plan) = &reply.plan {
            println!("\nOutcome: {:?} in {} ms", plan.outcome, plan.execution_time_ms);
            println!("Trace:");
            for (i, line) in plan.trace.iter().enumerate() {
                println!("  {}: {}", i + 1, line);
            }
        }
    }

    Ok(())
}
