//! Sales assistant - one utterance in, one rendered answer out
//!
//! text → {extract, classify} → resolve → normalize → route → orchestrate
//! → render → tone. The conversation stays locked from resolution until the
//! turn is appended, so overlapping requests are recorded in arrival order.

use crate::agent::Orchestrator;
use crate::classifier::IntentClassifier;
use crate::config::DecisionConfig;
use crate::error::{Result, ValidationFailure};
use crate::extractor::EntityExtractor;
use crate::memory::ConversationMemory;
use crate::models::{
    ConversationTurn, IntentResult, PlanOutcome, PlanResult, RoutingDecision, TurnResultSet,
    Utterance,
};
use crate::normalizer::QueryNormalizer;
use crate::persona::{PersonaEngine, ToneRegistry};
use crate::registry::AgentRegistry;
use crate::router::ToolRouter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Answer for one utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantReply {
    pub conversation_id: Uuid,
    pub turn_id: Uuid,
    pub text: String,
    pub intent: IntentResult,
    /// Set when the request was incomplete and the user was asked to clarify.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<ValidationFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<RoutingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanResult>,
}

impl AssistantReply {
    pub fn outcome(&self) -> Option<PlanOutcome> {
        self.plan.as_ref().map(|p| p.outcome)
    }
}

pub struct SalesAssistant {
    extractor: EntityExtractor,
    classifier: IntentClassifier,
    memory: ConversationMemory,
    normalizer: QueryNormalizer,
    router: ToolRouter,
    orchestrator: Orchestrator,
    persona: PersonaEngine,
}

impl SalesAssistant {
    pub fn new(registry: Arc<AgentRegistry>, config: DecisionConfig) -> Result<Self> {
        config.validate()?;
        registry.validate()?;

        let tones = ToneRegistry::with_builtins();
        tones.get(&config.persona.default_tone)?;

        info!(
            agents = registry.list().len(),
            memory_window = config.memory.window,
            default_tone = %config.persona.default_tone,
            "Sales assistant ready"
        );

        Ok(Self {
            extractor: EntityExtractor::new(),
            classifier: IntentClassifier::with_config(config.classifier),
            memory: ConversationMemory::new(config.memory.window),
            normalizer: QueryNormalizer::new(),
            router: ToolRouter::new(config.router),
            orchestrator: Orchestrator::new(registry, config.execution),
            persona: PersonaEngine::new(tones, config.persona.default_tone),
        })
    }

    pub fn with_extractor(mut self, extractor: EntityExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the tone catalog. The default tone must still be present.
    pub fn with_tones(mut self, tones: ToneRegistry) -> Result<Self> {
        tones.get(self.persona.default_tone())?;
        let default_tone = self.persona.default_tone().to_string();
        self.persona = PersonaEngine::new(tones, default_tone);
        Ok(self)
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn persona(&self) -> &PersonaEngine {
        &self.persona
    }

    /// Process one utterance of a conversation.
    pub async fn respond(
        &self,
        conversation_id: Uuid,
        text: &str,
        tone: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AssistantReply> {
        info!(conversation_id = %conversation_id, "Processing utterance");

        // unknown tones fail before anything is recorded
        if let Some(name) = tone {
            self.persona.tones().get(name)?;
        }

        let mut session = self.memory.session(conversation_id).await;
        let prior = session.latest();
        let (entities, intent) = tokio::join!(
            async { self.extractor.extract(text) },
            async { self.classifier.classify(text, prior) },
        );
        debug!(
            entities = entities.len(),
            primary = %intent.primary,
            secondary = ?intent.secondary,
            "Understood utterance"
        );

        let resolved = session.resolve(&entities, &intent);
        let utterance = Utterance::new(conversation_id, text);

        let query = match self.normalizer.normalize(&intent, &resolved, text) {
            Ok(query) => query,
            Err(failure) => {
                info!(conversation_id = %conversation_id, %failure, "Asking for clarification");
                let answer = self
                    .persona
                    .render(&clarification_text(&failure), tone)?;
                let turn = ConversationTurn::new(
                    utterance,
                    intent.clone(),
                    entities,
                    resolved.references,
                    Vec::new(),
                );
                let turn_id = turn.turn_id();
                session.append(turn);

                return Ok(AssistantReply {
                    conversation_id,
                    turn_id,
                    text: answer,
                    intent,
                    clarification: Some(failure),
                    decision: None,
                    plan: None,
                });
            }
        };

        let decision = self.router.route(&query, self.orchestrator.registry());
        debug!(
            agents = ?decision.selected_agents,
            mode = %decision.execution_mode,
            confidence = decision.confidence,
            rationale = %decision.rationale,
            "Routing decision"
        );

        let plan = self.orchestrator.run(&decision, &query, cancel).await;
        let answer = self.persona.render(&render_plan(&plan), tone)?;

        let turn = ConversationTurn::new(
            utterance,
            intent.clone(),
            entities,
            resolved.references,
            result_sets(&plan),
        );
        let turn_id = turn.turn_id();
        let retained = session.append(turn);
        debug!(conversation_id = %conversation_id, retained, "Turn appended");

        Ok(AssistantReply {
            conversation_id,
            turn_id,
            text: answer,
            intent,
            clarification: None,
            decision: Some(decision),
            plan: Some(plan),
        })
    }
}

fn clarification_text(failure: &ValidationFailure) -> String {
    match failure {
        ValidationFailure::UnresolvedReference { text } => format!(
            "I'm not sure what \"{}\" refers to. Could you name the companies?",
            text
        ),
        ValidationFailure::MissingParameter { intent, parameter } => format!(
            "To run {} I need a {}. Could you add it?",
            intent,
            parameter.replace('|', " or ")
        ),
        other => format!("I need a bit more detail: {}.", other),
    }
}

/// Summaries of produced outputs in plan order, then a line per unmet step.
pub fn render_plan(plan: &PlanResult) -> String {
    let mut lines: Vec<String> = plan
        .steps
        .iter()
        .filter_map(|record| plan.outputs.get(&record.step_id))
        .map(|output| match output.output.get("summary").and_then(Value::as_str) {
            Some(summary) => summary.to_string(),
            None => format!("{} returned a result.", output.agent_id),
        })
        .collect();

    for unmet in &plan.unmet {
        lines.push(format!("Could not complete: {} ({}).", unmet.agent_id, unmet.reason));
    }

    if lines.is_empty() {
        let reason = plan.failure.as_deref().unwrap_or("nothing was produced");
        lines.push(format!("Could not complete the request: {}.", reason));
    }

    lines.join("\n")
}

/// Set-valued results a later turn can refer back to ("them"), in the order
/// the steps ran.
fn result_sets(plan: &PlanResult) -> Vec<TurnResultSet> {
    plan.steps
        .iter()
        .filter_map(|record| plan.outputs.get(&record.step_id))
        .filter_map(|output| {
            let results = output.output.get("results")?.as_array()?;
            let items: Vec<String> = results
                .iter()
                .filter_map(|item| match item {
                    Value::String(name) => Some(name.clone()),
                    Value::Object(fields) => fields
                        .get("company")
                        .or_else(|| fields.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect();
            (!items.is_empty()).then(|| TurnResultSet {
                agent_id: output.agent_id.clone(),
                items,
            })
        })
        .collect()
}
