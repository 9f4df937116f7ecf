//! Reference resolution against conversation memory
//!
//! Turns are scanned most-recent-first for a type-compatible antecedent.
//! A reference with no antecedent inside the window stays `Unresolved`;
//! it is never silently defaulted.

use crate::extractor::ReferenceKind;
use crate::memory::store::ContextMemory;
use crate::models::{
    ConversationTurn, EntityType, ExtractedEntity, IntentLabel, IntentResult, ReferenceTarget,
    ResolvedEntities, ResolvedReference,
};
use tracing::debug;

/// Types a plural reference may point back to, most useful first
const SET_VALUED_TYPES: [EntityType; 3] = [EntityType::Company, EntityType::Sector, EntityType::Region];

impl ContextMemory {
    /// Bind every reference in `entities`. Reads memory only, so resolving the
    /// same input against unchanged memory always gives the same answer.
    pub fn resolve(&self, entities: &[ExtractedEntity], intent: &IntentResult) -> ResolvedEntities {
        let mut resolved = ResolvedEntities::default();

        for entity in entities {
            let Some(kind) = ReferenceKind::of(entity) else {
                resolved.entities.push(entity.clone());
                continue;
            };

            let target = match kind {
                ReferenceKind::Plural => self.resolve_plural(intent),
                ReferenceKind::Singular(entity_type) => {
                    self.resolve_singular(entity_type, entity, entities)
                }
            };

            if matches!(target, ReferenceTarget::Unresolved) {
                debug!(
                    conversation_id = %self.conversation_id(),
                    reference = %entity.normalized_value,
                    "Reference left unresolved"
                );
            }

            resolved.references.push(ResolvedReference {
                reference: entity.clone(),
                target,
            });
        }

        resolved
    }

    fn resolve_plural(&self, intent: &IntentResult) -> ReferenceTarget {
        // "find X, then rank them": the set comes from this request's discovery step.
        if intent.contains(IntentLabel::DiscoverySearch) {
            return ReferenceTarget::InRequest {
                producer: IntentLabel::DiscoverySearch,
            };
        }

        self.turns_recent_first()
            .find_map(plural_antecedent)
            .unwrap_or(ReferenceTarget::Unresolved)
    }

    fn resolve_singular(
        &self,
        entity_type: EntityType,
        reference: &ExtractedEntity,
        current: &[ExtractedEntity],
    ) -> ReferenceTarget {
        let earlier_in_utterance = current
            .iter()
            .filter(|e| e.entity_type == entity_type && e.span.end <= reference.span.start)
            .last();
        if let Some(entity) = earlier_in_utterance {
            return ReferenceTarget::Entities {
                entities: vec![entity.clone()],
            };
        }

        self.turns_recent_first()
            .find_map(|turn| singular_antecedent(turn, entity_type))
            .unwrap_or(ReferenceTarget::Unresolved)
    }
}

fn plural_antecedent(turn: &ConversationTurn) -> Option<ReferenceTarget> {
    if let Some(set) = turn
        .result_sets()
        .iter()
        .rev()
        .find(|set| !set.items.is_empty())
    {
        return Some(ReferenceTarget::ResultSet {
            turn_id: turn.turn_id(),
            agent_id: set.agent_id.clone(),
            items: set.items.clone(),
        });
    }

    // A set this turn itself referred to ("rank them" → "email them").
    let carried = turn.resolved_references().iter().rev().find(|r| {
        r.is_plural() && !matches!(r.target, ReferenceTarget::InRequest { .. })
    });
    if let Some(reference) = carried {
        return Some(reference.target.clone());
    }

    SET_VALUED_TYPES.iter().find_map(|entity_type| {
        let entities: Vec<ExtractedEntity> = turn
            .entities()
            .iter()
            .filter(|e| e.entity_type == *entity_type)
            .cloned()
            .collect();
        (entities.len() >= 2).then_some(ReferenceTarget::Entities { entities })
    })
}

fn singular_antecedent(turn: &ConversationTurn, entity_type: EntityType) -> Option<ReferenceTarget> {
    if let Some(entity) = turn
        .entities()
        .iter()
        .rev()
        .find(|e| e.entity_type == entity_type)
    {
        return Some(ReferenceTarget::Entities {
            entities: vec![entity.clone()],
        });
    }

    let carried = turn.resolved_references().iter().rev().find(|r| match &r.target {
        ReferenceTarget::Entities { entities } => {
            entities.len() == 1 && entities[0].entity_type == entity_type
        }
        _ => false,
    });
    if let Some(reference) = carried {
        return Some(reference.target.clone());
    }

    if entity_type == EntityType::Company {
        if let Some(set) = turn.result_sets().iter().rev().find(|s| s.items.len() == 1) {
            return Some(ReferenceTarget::ResultSet {
                turn_id: turn.turn_id(),
                agent_id: set.agent_id.clone(),
                items: set.items.clone(),
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::IntentClassifier;
    use crate::extractor::EntityExtractor;
    use crate::models::{TurnResultSet, Utterance};
    use proptest::prelude::*;
    use uuid::Uuid;

    struct Harness {
        id: Uuid,
        memory: ContextMemory,
        extractor: EntityExtractor,
        classifier: IntentClassifier,
    }

    impl Harness {
        fn new(window: usize) -> Self {
            let id = Uuid::new_v4();
            Self {
                id,
                memory: ContextMemory::new(id, window),
                extractor: EntityExtractor::new().with_known_companies(["Careem", "Tabby", "Kitopi"]),
                classifier: IntentClassifier::new(),
            }
        }

        fn resolve(&self, text: &str) -> ResolvedEntities {
            let entities = self.extractor.extract(text);
            let intent = self.classifier.classify(text, None);
            self.memory.resolve(&entities, &intent)
        }

        fn record(&mut self, text: &str, results: Option<(&str, &[&str])>) {
            let entities = self.extractor.extract(text);
            let intent = self.classifier.classify(text, None);
            let resolved = self.memory.resolve(&entities, &intent);
            let result_sets = results
                .map(|(agent, items)| {
                    vec![TurnResultSet {
                        agent_id: agent.to_string(),
                        items: items.iter().map(|s| s.to_string()).collect(),
                    }]
                })
                .unwrap_or_default();
            self.memory.append(ConversationTurn::new(
                Utterance::new(self.id, text),
                intent,
                entities,
                resolved.references,
                result_sets,
            ));
        }
    }

    #[test]
    fn test_plural_binds_in_request_producer() {
        let harness = Harness::new(5);
        let resolved = harness.resolve("find fintech companies in Dubai, then rank them");
        assert_eq!(resolved.references.len(), 1);
        assert_eq!(
            resolved.references[0].target,
            ReferenceTarget::InRequest {
                producer: IntentLabel::DiscoverySearch
            }
        );
        assert_eq!(resolved.entities.len(), 2);
    }

    #[test]
    fn test_plural_resolves_to_previous_result_set() {
        let mut harness = Harness::new(5);
        harness.record(
            "find fintech companies in Dubai, then rank them",
            Some(("discovery", &["Tabby", "Sarwa", "Ziina"])),
        );

        let resolved = harness.resolve("rank them");
        match &resolved.references[0].target {
            ReferenceTarget::ResultSet { agent_id, items, .. } => {
                assert_eq!(agent_id, "discovery");
                assert_eq!(items, &vec!["Tabby", "Sarwa", "Ziina"]);
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_plural_carried_through_follow_ups() {
        let mut harness = Harness::new(5);
        harness.record("find saas firms in Riyadh", Some(("discovery", &["Foodics", "Salla"])));
        harness.record("rank them", None);

        let resolved = harness.resolve("draft an email to them");
        assert!(matches!(
            &resolved.references[0].target,
            ReferenceTarget::ResultSet { items, .. } if items.len() == 2
        ));
    }

    #[test]
    fn test_singular_resolves_most_recent_company() {
        let mut harness = Harness::new(5);
        harness.record("tell me about Careem", None);
        harness.record("tell me about Tabby", None);

        let resolved = harness.resolve("draft outreach to that company");
        match &resolved.references[0].target {
            ReferenceTarget::Entities { entities } => {
                assert_eq!(entities.len(), 1);
                assert_eq!(entities[0].normalized_value, "Tabby");
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_singular_prefers_same_utterance() {
        let harness = Harness::new(5);
        let resolved = harness.resolve("profile Kitopi and tell me what it does");
        assert!(matches!(
            &resolved.references[0].target,
            ReferenceTarget::Entities { entities } if entities[0].normalized_value == "Kitopi"
        ));
    }

    #[test]
    fn test_no_antecedent_is_flagged() {
        let harness = Harness::new(5);
        let resolved = harness.resolve("rank them");
        assert_eq!(resolved.unresolved().count(), 1);
    }

    #[test]
    fn test_evicted_antecedent_is_unresolved() {
        let mut harness = Harness::new(1);
        harness.record("tell me about Careem", None);
        harness.record("hello", None);

        let resolved = harness.resolve("email that company");
        assert_eq!(resolved.unresolved().count(), 1);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut harness = Harness::new(5);
        harness.record("compare Careem and Tabby", None);

        let first = harness.resolve("rank them");
        let second = harness.resolve("rank them");
        assert_eq!(first, second);
        assert!(matches!(
            &first.references[0].target,
            ReferenceTarget::Entities { entities } if entities.len() == 2
        ));
    }

    #[test]
    fn test_unresolved_reference_is_stable() {
        let mut harness = Harness::new(1);
        harness.record("tell me about Careem", None);
        harness.record("hello", None);

        let first = harness.resolve("email that company");
        let second = harness.resolve("email that company");
        assert_eq!(first, second);
        assert_eq!(first.references[0].target, ReferenceTarget::Unresolved);

        let empty = Harness::new(3);
        let first = empty.resolve("rank them");
        assert_eq!(first, empty.resolve("rank them"));
        assert_eq!(first.references[0].target, ReferenceTarget::Unresolved);
    }

    const HISTORY: [&str; 6] = [
        "tell me about Careem",
        "compare Careem and Tabby",
        "find fintech companies in Dubai",
        "hello",
        "rank them",
        "profile Kitopi",
    ];

    const REFERENCES: [&str; 4] = [
        "rank them",
        "email that company",
        "draft outreach to them",
        "tell me what it does",
    ];

    proptest! {
        #[test]
        fn prop_resolution_repeats_against_unchanged_memory(
            window in 1usize..5,
            history in prop::collection::vec((prop::sample::select(HISTORY.to_vec()), any::<bool>()), 0..8),
            reference in prop::sample::select(REFERENCES.to_vec()),
        ) {
            let mut harness = Harness::new(window);
            for (text, with_results) in history {
                let results: Option<(&str, &[&str])> =
                    with_results.then_some(("discovery", &["Tabby", "Sarwa"][..]));
                harness.record(text, results);
            }

            let first = harness.resolve(reference);
            let second = harness.resolve(reference);
            prop_assert_eq!(first, second);
        }
    }
}
