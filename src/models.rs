//! Core data models for the decision layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::error::CapabilityFailure;

//
// ================= Entities =================
//

/// Entity types in overlap priority order (earlier = more specific).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Company,
    Sector,
    Region,
    Signal,
    Metric,
    Reference,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Company => "company",
            EntityType::Sector => "sector",
            EntityType::Region => "region",
            EntityType::Signal => "signal",
            EntityType::Metric => "metric",
            EntityType::Reference => "reference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "company" => Some(EntityType::Company),
            "sector" => Some(EntityType::Sector),
            "region" => Some(EntityType::Region),
            "signal" => Some(EntityType::Signal),
            "metric" => Some(EntityType::Metric),
            "reference" => Some(EntityType::Reference),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte offsets into the source text, `start..end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,
    pub span: Span,
    pub normalized_value: String,
    pub confidence: f64,
}

impl ExtractedEntity {
    pub fn new(
        entity_type: EntityType,
        span: Span,
        normalized_value: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            entity_type,
            span,
            normalized_value: normalized_value.into(),
            confidence,
        }
    }

    /// Stable id: `<type>:<normalized value>`
    pub fn entity_id(&self) -> String {
        format!("{}:{}", self.entity_type, self.normalized_value)
    }

    pub fn is_reference(&self) -> bool {
        self.entity_type == EntityType::Reference
    }
}

//
// ================= Intents =================
//

/// Closed set of request intents, namespaced `<domain>.<action>`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntentLabel {
    #[serde(rename = "discovery.search")]
    DiscoverySearch,
    #[serde(rename = "ranking.score")]
    RankingScore,
    #[serde(rename = "ranking.compare")]
    RankingCompare,
    #[serde(rename = "outreach.draft")]
    OutreachDraft,
    #[serde(rename = "enrichment.profile")]
    EnrichmentProfile,
    #[serde(rename = "enrichment.signals")]
    EnrichmentSignals,
    #[serde(rename = "help.explain")]
    HelpExplain,
    #[serde(rename = "unknown")]
    Unknown,
}

impl IntentLabel {
    /// Every classifiable label (the `unknown` sentinel is excluded).
    pub const KNOWN: [IntentLabel; 7] = [
        IntentLabel::DiscoverySearch,
        IntentLabel::RankingScore,
        IntentLabel::RankingCompare,
        IntentLabel::OutreachDraft,
        IntentLabel::EnrichmentProfile,
        IntentLabel::EnrichmentSignals,
        IntentLabel::HelpExplain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::DiscoverySearch => "discovery.search",
            IntentLabel::RankingScore => "ranking.score",
            IntentLabel::RankingCompare => "ranking.compare",
            IntentLabel::OutreachDraft => "outreach.draft",
            IntentLabel::EnrichmentProfile => "enrichment.profile",
            IntentLabel::EnrichmentSignals => "enrichment.signals",
            IntentLabel::HelpExplain => "help.explain",
            IntentLabel::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        IntentLabel::KNOWN
            .iter()
            .copied()
            .chain(std::iter::once(IntentLabel::Unknown))
            .find(|label| label.as_str() == s.trim())
    }

    pub fn domain(&self) -> &'static str {
        self.as_str().split('.').next().unwrap_or("unknown")
    }

    /// Requests answered by the clarification/help capability.
    pub fn is_help(&self) -> bool {
        matches!(self, IntentLabel::HelpExplain | IntentLabel::Unknown)
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentResult {
    pub primary: IntentLabel,
    pub secondary: Vec<IntentLabel>,
    pub confidences: BTreeMap<IntentLabel, f64>,
}

impl IntentResult {
    pub fn unknown() -> Self {
        Self {
            primary: IntentLabel::Unknown,
            secondary: Vec::new(),
            confidences: BTreeMap::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.primary == IntentLabel::Unknown
    }

    pub fn confidence(&self, label: IntentLabel) -> f64 {
        self.confidences.get(&label).copied().unwrap_or(0.0)
    }

    /// Primary first, then secondaries in rank order.
    pub fn labels(&self) -> impl Iterator<Item = IntentLabel> + '_ {
        std::iter::once(self.primary).chain(self.secondary.iter().copied())
    }

    pub fn contains(&self, label: IntentLabel) -> bool {
        self.labels().any(|l| l == label)
    }
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: Uuid,
}

impl Utterance {
    pub fn new(conversation_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
            conversation_id,
        }
    }
}

/// What a reference phrase was bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceTarget {
    /// One or more entities mentioned earlier.
    Entities { entities: Vec<ExtractedEntity> },
    /// A set-valued result produced by an agent on an earlier turn.
    ResultSet {
        turn_id: Uuid,
        agent_id: String,
        items: Vec<String>,
    },
    /// Output of a producer step in the same request.
    InRequest { producer: IntentLabel },
    /// No compatible antecedent inside the memory window.
    Unresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedReference {
    pub reference: ExtractedEntity,
    pub target: ReferenceTarget,
}

impl ResolvedReference {
    pub fn is_resolved(&self) -> bool {
        !matches!(self.target, ReferenceTarget::Unresolved)
    }

    /// Set-valued targets (result sets, in-request producers, multi-entity).
    pub fn is_plural(&self) -> bool {
        match &self.target {
            ReferenceTarget::Entities { entities } => entities.len() > 1,
            ReferenceTarget::ResultSet { .. } | ReferenceTarget::InRequest { .. } => true,
            ReferenceTarget::Unresolved => false,
        }
    }
}

/// Entities of one utterance after reference resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResolvedEntities {
    pub entities: Vec<ExtractedEntity>,
    pub references: Vec<ResolvedReference>,
}

impl ResolvedEntities {
    pub fn unresolved(&self) -> impl Iterator<Item = &ResolvedReference> {
        self.references.iter().filter(|r| !r.is_resolved())
    }

    pub fn of_type(&self, entity_type: EntityType) -> impl Iterator<Item = &ExtractedEntity> {
        self.entities
            .iter()
            .filter(move |e| e.entity_type == entity_type)
    }
}

/// A set-valued result an agent produced during a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResultSet {
    pub agent_id: String,
    pub items: Vec<String>,
}

/// One processed utterance. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    turn_id: Uuid,
    utterance: Utterance,
    intent: IntentResult,
    entities: Vec<ExtractedEntity>,
    resolved_references: Vec<ResolvedReference>,
    result_sets: Vec<TurnResultSet>,
    timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        utterance: Utterance,
        intent: IntentResult,
        entities: Vec<ExtractedEntity>,
        resolved_references: Vec<ResolvedReference>,
        result_sets: Vec<TurnResultSet>,
    ) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            utterance,
            intent,
            entities,
            resolved_references,
            result_sets,
            timestamp: Utc::now(),
        }
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn utterance(&self) -> &Utterance {
        &self.utterance
    }

    pub fn intent(&self) -> &IntentResult {
        &self.intent
    }

    pub fn entities(&self) -> &[ExtractedEntity] {
        &self.entities
    }

    pub fn resolved_references(&self) -> &[ResolvedReference] {
        &self.resolved_references
    }

    pub fn result_sets(&self) -> &[TurnResultSet] {
        &self.result_sets
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

//
// ================= Normalized query =================
//

/// One validated intent with its bound parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubQuery {
    pub intent: IntentLabel,
    pub confidence: f64,
    pub is_primary: bool,
    pub parameters: Map<String, Value>,
    pub target_entity_ids: Vec<String>,
    /// Entity types bound into this sub-query's parameters.
    pub entity_types: BTreeSet<EntityType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedQuery {
    pub primary: SubQuery,
    pub secondary: Vec<SubQuery>,
    pub raw_text: String,
}

impl NormalizedQuery {
    pub fn intent(&self) -> IntentLabel {
        self.primary.intent
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.primary.parameters
    }

    pub fn target_entity_ids(&self) -> &[String] {
        &self.primary.target_entity_ids
    }

    pub fn sub_queries(&self) -> impl Iterator<Item = &SubQuery> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }
}

//
// ================= Evidence =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    News,
    Funding,
    Hiring,
    Tech,
    Leadership,
    Social,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::News => "news",
            EvidenceKind::Funding => "funding",
            EvidenceKind::Hiring => "hiring",
            EvidenceKind::Tech => "tech",
            EvidenceKind::Leadership => "leadership",
            EvidenceKind::Social => "social",
        }
    }
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub source_id: String,
    pub kind: EvidenceKind,
    pub raw_content: String,
    pub confidence: f64,
    pub recency: DateTime<Utc>,
    pub source_reliability: f64,
}

//
// ================= Registry & routing =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDescriptor {
    pub id: String,
    pub supported_intents: BTreeSet<IntentLabel>,
    pub supported_entity_types: BTreeSet<EntityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on_agent_id: Option<String>,
    pub cost_estimate_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_agent_id: Option<String>,
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<String>,
        intents: impl IntoIterator<Item = IntentLabel>,
        entity_types: impl IntoIterator<Item = EntityType>,
        cost_estimate_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            supported_intents: intents.into_iter().collect(),
            supported_entity_types: entity_types.into_iter().collect(),
            depends_on_agent_id: None,
            cost_estimate_ms,
            fallback_agent_id: None,
        }
    }

    pub fn depends_on(mut self, agent_id: impl Into<String>) -> Self {
        self.depends_on_agent_id = Some(agent_id.into());
        self
    }

    pub fn with_fallback(mut self, agent_id: impl Into<String>) -> Self {
        self.fallback_agent_id = Some(agent_id.into());
        self
    }

    pub fn supports_intent(&self, intent: IntentLabel) -> bool {
        self.supported_intents.contains(&intent)
    }

    pub fn entity_overlap(&self, types: &BTreeSet<EntityType>) -> usize {
        self.supported_entity_types.intersection(types).count()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Single,
    Parallel,
    Sequential,
    Hybrid,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Single => "single",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// Which sub-query an agent was selected for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentAssignment {
    pub agent_id: String,
    pub intent: IntentLabel,
    pub coverage: f64,
    pub fallback_agent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    /// Agents in dependency order.
    pub selected_agents: Vec<String>,
    pub execution_mode: ExecutionMode,
    pub confidence: f64,
    pub rationale: String,
    pub assignments: Vec<AgentAssignment>,
}

impl RoutingDecision {
    /// Confidence reported when no candidate cleared the routing threshold.
    pub const THRESHOLD_MISS: f64 = -1.0;

    pub fn is_ambiguous(&self) -> bool {
        self.confidence == Self::THRESHOLD_MISS
    }

    pub fn assignment(&self, agent_id: &str) -> Option<&AgentAssignment> {
        self.assignments.iter().find(|a| a.agent_id == agent_id)
    }
}

//
// ================= Execution =================
//

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: StepId,
    pub agent_id: String,
    pub depends_on: BTreeSet<StepId>,
    pub input: Value,
    pub timeout_ms: u64,
    pub fallback_agent_id: Option<String>,
    pub required: bool,
}

impl ExecutionStep {
    pub fn new(step_id: impl Into<StepId>, agent_id: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            step_id: step_id.into(),
            agent_id: agent_id.into(),
            depends_on: BTreeSet::new(),
            input: Value::Object(Map::new()),
            timeout_ms,
            fallback_agent_id: None,
            required: true,
        }
    }

    pub fn after(mut self, step_id: impl Into<StepId>) -> Self {
        self.depends_on.insert(step_id.into());
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_fallback(mut self, agent_id: impl Into<String>) -> Self {
        self.fallback_agent_id = Some(agent_id.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: Uuid,
    pub mode: ExecutionMode,
    pub steps: Vec<ExecutionStep>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    TimedOut,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: StepId,
    pub agent_id: String,
    pub status: StepStatus,
    /// Agent that produced the output (differs from `agent_id` after fallback).
    pub executed_by: Option<String>,
    pub attempts: u32,
    pub failures: Vec<CapabilityFailure>,
    pub execution_time_ms: u64,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    pub agent_id: String,
    pub output: Value,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanOutcome {
    Complete,
    Partial,
    Failed,
}

/// A step that did not produce its output, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmetStep {
    pub step_id: StepId,
    pub agent_id: String,
    pub status: StepStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub plan_id: Uuid,
    pub outcome: PlanOutcome,
    pub mode: Option<ExecutionMode>,
    pub outputs: BTreeMap<StepId, StepOutput>,
    pub steps: Vec<StepRecord>,
    pub unmet: Vec<UnmetStep>,
    pub failure: Option<String>,
    pub trace: Vec<String>,
    pub execution_time_ms: u64,
}

//
// ================= Tone =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StyleModifier {
    Concise,
    Executive,
    Bulleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormalityLevel {
    Casual,
    #[default]
    Neutral,
    Formal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToneProfile {
    pub name: String,
    #[serde(default)]
    pub vocabulary_replacements: BTreeMap<String, String>,
    #[serde(default)]
    pub style_modifiers: Vec<StyleModifier>,
    #[serde(default)]
    pub formality_level: FormalityLevel,
}

impl ToneProfile {
    pub fn neutral(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vocabulary_replacements: BTreeMap::new(),
            style_modifiers: Vec::new(),
            formality_level: FormalityLevel::Neutral,
        }
    }
}
