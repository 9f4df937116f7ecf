//! Capability trait and agent registry
//!
//! Agents are closed descriptors plus one uniform invocation interface.
//! The registry is read-only once built; routing and planning only query it.

pub mod help;

pub use help::HelpCapability;

use crate::error::{CapabilityFailure, ConfigurationFailure};
use crate::models::{AgentDescriptor, EntityType, IntentLabel};
use crate::Result;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

pub const DISCOVERY_AGENT: &str = "discovery";
pub const RANKING_AGENT: &str = "ranking";
pub const ENRICHMENT_AGENT: &str = "enrichment";
pub const OUTREACH_AGENT: &str = "outreach";
pub const HELP_AGENT: &str = "help";

/// Cancellation and deadline handed to a capability for one invocation
#[derive(Debug, Clone)]
pub struct InvocationSignal {
    token: CancellationToken,
    deadline: Instant,
}

impl InvocationSignal {
    pub fn new(token: CancellationToken, timeout: Duration) -> Self {
        Self {
            token,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A pluggable capability ("agent")
///
/// Output convention: a JSON object with a `summary` string and, for
/// set-valued answers, a `results` array of item names.
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(
        &self,
        input: &Value,
        signal: &InvocationSignal,
    ) -> std::result::Result<Value, CapabilityFailure>;
}

/// Descriptor catalog plus capability bindings
pub struct AgentRegistry {
    descriptors: BTreeMap<String, AgentDescriptor>,
    capabilities: HashMap<String, Arc<dyn Capability>>,
    help_agent_id: String,
}

impl AgentRegistry {
    pub fn new(help_agent_id: impl Into<String>) -> Self {
        Self {
            descriptors: BTreeMap::new(),
            capabilities: HashMap::new(),
            help_agent_id: help_agent_id.into(),
        }
    }

    /// Default catalog (discovery, ranking, enrichment, outreach, help),
    /// no capabilities bound yet.
    pub fn with_default_descriptors() -> Self {
        let mut registry = Self::new(HELP_AGENT);
        for descriptor in default_descriptors() {
            registry.descriptors.insert(descriptor.id.clone(), descriptor);
        }
        registry
    }

    /// Load descriptors from registry metadata (a JSON list).
    pub fn from_metadata_json(json: &str, help_agent_id: impl Into<String>) -> Result<Self> {
        let descriptors: Vec<AgentDescriptor> = serde_json::from_str(json)?;
        let mut registry = Self::new(help_agent_id);
        for descriptor in descriptors {
            registry.add_descriptor(descriptor)?;
        }
        Ok(registry)
    }

    pub fn add_descriptor(&mut self, descriptor: AgentDescriptor) -> Result<()> {
        if self.descriptors.contains_key(&descriptor.id) {
            return Err(ConfigurationFailure::DuplicateAgent(descriptor.id).into());
        }
        self.descriptors.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    /// Register a descriptor together with its capability.
    pub fn register(&mut self, descriptor: AgentDescriptor, capability: Arc<dyn Capability>) -> Result<()> {
        let id = descriptor.id.clone();
        self.add_descriptor(descriptor)?;
        self.capabilities.insert(id, capability);
        Ok(())
    }

    /// Bind (or rebind) the capability behind an existing descriptor.
    pub fn bind(&mut self, agent_id: &str, capability: Arc<dyn Capability>) -> Result<()> {
        if !self.descriptors.contains_key(agent_id) {
            return Err(ConfigurationFailure::UnknownAgent(agent_id.to_string()).into());
        }
        self.capabilities.insert(agent_id.to_string(), capability);
        Ok(())
    }

    pub fn help_agent_id(&self) -> &str {
        &self.help_agent_id
    }

    pub fn descriptor(&self, agent_id: &str) -> Option<&AgentDescriptor> {
        self.descriptors.get(agent_id)
    }

    pub fn capability(&self, agent_id: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(agent_id).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.descriptors.keys().map(|s| s.as_str()).collect()
    }

    /// Agents supporting `intent` with at least one overlapping entity type,
    /// cheapest first (id breaks ties).
    pub fn find_candidates(
        &self,
        intent: IntentLabel,
        entity_types: &BTreeSet<EntityType>,
    ) -> Vec<&AgentDescriptor> {
        let mut candidates: Vec<&AgentDescriptor> = self
            .descriptors
            .values()
            .filter(|d| d.supports_intent(intent) && d.entity_overlap(entity_types) > 0)
            .collect();
        candidates.sort_by(|a, b| {
            a.cost_estimate_ms
                .cmp(&b.cost_estimate_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates
    }

    /// Check the catalog: help agent present, no dangling references, no
    /// dependency cycles.
    pub fn validate(&self) -> std::result::Result<(), ConfigurationFailure> {
        if !self.descriptors.contains_key(&self.help_agent_id) {
            return Err(ConfigurationFailure::MissingHelpAgent(self.help_agent_id.clone()));
        }

        for descriptor in self.descriptors.values() {
            for missing in [&descriptor.depends_on_agent_id, &descriptor.fallback_agent_id]
                .into_iter()
                .flatten()
            {
                if !self.descriptors.contains_key(missing) {
                    return Err(ConfigurationFailure::DanglingDependency {
                        agent: descriptor.id.clone(),
                        missing: missing.clone(),
                    });
                }
            }
        }

        for start in self.descriptors.keys() {
            self.check_chain(start)?;
        }
        Ok(())
    }

    /// Follow `depends_on` links from `start`; each agent has at most one,
    /// so a revisit means a cycle.
    fn check_chain(&self, start: &str) -> std::result::Result<(), ConfigurationFailure> {
        let mut path = vec![start.to_string()];
        let mut current = start;

        while let Some(next) = self
            .descriptors
            .get(current)
            .and_then(|d| d.depends_on_agent_id.as_deref())
        {
            if let Some(position) = path.iter().position(|id| id == next) {
                let mut cycle = path[position..].to_vec();
                cycle.push(next.to_string());
                return Err(ConfigurationFailure::DependencyCycle { path: cycle });
            }
            path.push(next.to_string());
            current = next;
        }
        Ok(())
    }

    /// Dependency of `agent_id`, if it has one.
    pub fn dependency_of(&self, agent_id: &str) -> Option<&str> {
        self.descriptors
            .get(agent_id)
            .and_then(|d| d.depends_on_agent_id.as_deref())
    }
}

/// Built-in catalog for the sales workflow
pub fn default_descriptors() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new(
            DISCOVERY_AGENT,
            [IntentLabel::DiscoverySearch],
            [EntityType::Sector, EntityType::Region, EntityType::Signal, EntityType::Metric],
            800,
        ),
        AgentDescriptor::new(
            RANKING_AGENT,
            [IntentLabel::RankingScore, IntentLabel::RankingCompare],
            [EntityType::Company, EntityType::Sector, EntityType::Signal, EntityType::Metric],
            600,
        )
        .depends_on(DISCOVERY_AGENT),
        AgentDescriptor::new(
            ENRICHMENT_AGENT,
            [IntentLabel::EnrichmentProfile, IntentLabel::EnrichmentSignals],
            [EntityType::Company, EntityType::Signal],
            400,
        ),
        AgentDescriptor::new(
            OUTREACH_AGENT,
            [IntentLabel::OutreachDraft],
            [EntityType::Company, EntityType::Signal, EntityType::Region],
            300,
        )
        .depends_on(ENRICHMENT_AGENT),
        AgentDescriptor::new(
            HELP_AGENT,
            [IntentLabel::HelpExplain, IntentLabel::Unknown],
            [
                EntityType::Company,
                EntityType::Sector,
                EntityType::Region,
                EntityType::Signal,
                EntityType::Metric,
                EntityType::Reference,
            ],
            50,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecisionError;
    use serde_json::json;

    struct Echo;

    #[async_trait::async_trait]
    impl Capability for Echo {
        async fn invoke(
            &self,
            input: &Value,
            _signal: &InvocationSignal,
        ) -> std::result::Result<Value, CapabilityFailure> {
            Ok(json!({ "summary": "echo", "input": input }))
        }
    }

    fn types(list: &[EntityType]) -> BTreeSet<EntityType> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_default_catalog_is_valid() {
        let registry = AgentRegistry::with_default_descriptors();
        assert!(registry.validate().is_ok());
        assert_eq!(registry.list().len(), 5);
        assert_eq!(registry.dependency_of(RANKING_AGENT), Some(DISCOVERY_AGENT));
    }

    #[test]
    fn test_candidates_cheapest_first() {
        let mut registry = AgentRegistry::new(HELP_AGENT);
        registry
            .add_descriptor(AgentDescriptor::new("slow", [IntentLabel::RankingScore], [EntityType::Company], 900))
            .unwrap();
        registry
            .add_descriptor(AgentDescriptor::new("fast", [IntentLabel::RankingScore], [EntityType::Company], 100))
            .unwrap();
        registry
            .add_descriptor(AgentDescriptor::new("sector-only", [IntentLabel::RankingScore], [EntityType::Sector], 10))
            .unwrap();

        let ids: Vec<&str> = registry
            .find_candidates(IntentLabel::RankingScore, &types(&[EntityType::Company]))
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ids, vec!["fast", "slow"]);

        assert!(registry
            .find_candidates(IntentLabel::OutreachDraft, &types(&[EntityType::Company]))
            .is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let mut registry = AgentRegistry::new(HELP_AGENT);
        registry
            .add_descriptor(AgentDescriptor::new(HELP_AGENT, [IntentLabel::HelpExplain], [EntityType::Company], 10))
            .unwrap();
        registry
            .add_descriptor(AgentDescriptor::new("a", [IntentLabel::RankingScore], [EntityType::Company], 10).depends_on("b"))
            .unwrap();
        registry
            .add_descriptor(AgentDescriptor::new("b", [IntentLabel::DiscoverySearch], [EntityType::Sector], 10).depends_on("a"))
            .unwrap();

        match registry.validate() {
            Err(ConfigurationFailure::DependencyCycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 3);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_dangling_and_missing_help() {
        let mut registry = AgentRegistry::new(HELP_AGENT);
        registry
            .add_descriptor(AgentDescriptor::new("ranking", [IntentLabel::RankingScore], [EntityType::Company], 10))
            .unwrap();
        assert_eq!(
            registry.validate(),
            Err(ConfigurationFailure::MissingHelpAgent(HELP_AGENT.to_string()))
        );

        registry
            .add_descriptor(AgentDescriptor::new(HELP_AGENT, [IntentLabel::HelpExplain], [EntityType::Company], 10).with_fallback("ghost"))
            .unwrap();
        assert!(matches!(
            registry.validate(),
            Err(ConfigurationFailure::DanglingDependency { missing, .. }) if missing == "ghost"
        ));
    }

    #[test]
    fn test_duplicate_and_unknown_bind() {
        let mut registry = AgentRegistry::with_default_descriptors();
        let duplicate = registry.add_descriptor(AgentDescriptor::new(
            HELP_AGENT,
            [IntentLabel::HelpExplain],
            [EntityType::Company],
            1,
        ));
        assert!(matches!(
            duplicate,
            Err(DecisionError::Configuration(ConfigurationFailure::DuplicateAgent(_)))
        ));

        assert!(registry.bind("ghost", Arc::new(Echo)).is_err());
        assert!(registry.bind(HELP_AGENT, Arc::new(Echo)).is_ok());
        assert!(registry.capability(HELP_AGENT).is_some());
        assert!(registry.capability(RANKING_AGENT).is_none());
    }

    #[test]
    fn test_metadata_json() {
        let json = r#"[
            {"id": "help", "supported_intents": ["help.explain", "unknown"],
             "supported_entity_types": ["company"], "cost_estimate_ms": 20},
            {"id": "discovery", "supported_intents": ["discovery.search"],
             "supported_entity_types": ["sector", "region"], "cost_estimate_ms": 500},
            {"id": "ranking", "supported_intents": ["ranking.score"],
             "supported_entity_types": ["company", "sector"], "cost_estimate_ms": 300,
             "depends_on_agent_id": "discovery"}
        ]"#;
        let registry = AgentRegistry::from_metadata_json(json, "help").unwrap();
        assert!(registry.validate().is_ok());
        assert_eq!(registry.dependency_of("ranking"), Some("discovery"));

        assert!(AgentRegistry::from_metadata_json("{not json", "help").is_err());
    }

    #[tokio::test]
    async fn test_signal_reports_cancellation() {
        let token = CancellationToken::new();
        let signal = InvocationSignal::new(token.clone(), Duration::from_millis(500));
        assert!(!signal.is_cancelled());
        assert!(signal.remaining() <= Duration::from_millis(500));

        token.cancel();
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }
}
