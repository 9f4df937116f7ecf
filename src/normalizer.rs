//! Query Normalizer
//!
//! Binds resolved entities into each intent's parameter schema.
//! Deterministic and side-effect free: the same input always produces the
//! same query or the same validation failure.

use crate::error::ValidationFailure;
use crate::extractor::ReferenceKind;
use crate::models::{
    EntityType, IntentLabel, IntentResult, NormalizedQuery, ReferenceTarget, ResolvedEntities,
    ResolvedReference, SubQuery,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub source: EntityType,
    pub required: bool,
    pub multi: bool,
    pub min_count: usize,
}

const fn param(name: &'static str, source: EntityType, required: bool, multi: bool) -> ParameterSpec {
    ParameterSpec {
        name,
        source,
        required,
        multi,
        min_count: if required { 1 } else { 0 },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntentSchema {
    pub intent: IntentLabel,
    pub parameters: &'static [ParameterSpec],
    /// At least one of these must be bound
    pub require_any: &'static [&'static str],
    /// Slot plural references bind to
    pub reference_slot: Option<&'static str>,
}

const DISCOVERY_SEARCH: IntentSchema = IntentSchema {
    intent: IntentLabel::DiscoverySearch,
    parameters: &[
        param("sector", EntityType::Sector, false, true),
        param("region", EntityType::Region, false, true),
        param("signals", EntityType::Signal, false, true),
        param("metrics", EntityType::Metric, false, true),
    ],
    require_any: &["sector", "region", "signals"],
    reference_slot: None,
};

const RANKING_SCORE: IntentSchema = IntentSchema {
    intent: IntentLabel::RankingScore,
    parameters: &[
        param("targets", EntityType::Company, true, true),
        param("sector", EntityType::Sector, false, false),
        param("signals", EntityType::Signal, false, true),
        param("metrics", EntityType::Metric, false, true),
    ],
    require_any: &[],
    reference_slot: Some("targets"),
};

const RANKING_COMPARE: IntentSchema = IntentSchema {
    intent: IntentLabel::RankingCompare,
    parameters: &[
        ParameterSpec {
            name: "targets",
            source: EntityType::Company,
            required: true,
            multi: true,
            min_count: 2,
        },
        param("sector", EntityType::Sector, false, false),
    ],
    require_any: &[],
    reference_slot: Some("targets"),
};

const OUTREACH_DRAFT: IntentSchema = IntentSchema {
    intent: IntentLabel::OutreachDraft,
    parameters: &[
        param("targets", EntityType::Company, true, true),
        param("signals", EntityType::Signal, false, true),
        param("region", EntityType::Region, false, false),
    ],
    require_any: &[],
    reference_slot: Some("targets"),
};

const ENRICHMENT_PROFILE: IntentSchema = IntentSchema {
    intent: IntentLabel::EnrichmentProfile,
    parameters: &[param("target", EntityType::Company, true, false)],
    require_any: &[],
    reference_slot: Some("target"),
};

const ENRICHMENT_SIGNALS: IntentSchema = IntentSchema {
    intent: IntentLabel::EnrichmentSignals,
    parameters: &[
        param("targets", EntityType::Company, true, true),
        param("signals", EntityType::Signal, false, true),
    ],
    require_any: &[],
    reference_slot: Some("targets"),
};

const HELP: IntentSchema = IntentSchema {
    intent: IntentLabel::HelpExplain,
    parameters: &[],
    require_any: &[],
    reference_slot: None,
};

const UNKNOWN: IntentSchema = IntentSchema {
    intent: IntentLabel::Unknown,
    parameters: &[],
    require_any: &[],
    reference_slot: None,
};

pub fn schema_for(intent: IntentLabel) -> &'static IntentSchema {
    match intent {
        IntentLabel::DiscoverySearch => &DISCOVERY_SEARCH,
        IntentLabel::RankingScore => &RANKING_SCORE,
        IntentLabel::RankingCompare => &RANKING_COMPARE,
        IntentLabel::OutreachDraft => &OUTREACH_DRAFT,
        IntentLabel::EnrichmentProfile => &ENRICHMENT_PROFILE,
        IntentLabel::EnrichmentSignals => &ENRICHMENT_SIGNALS,
        IntentLabel::HelpExplain => &HELP,
        IntentLabel::Unknown => &UNKNOWN,
    }
}

/// Values collected for one parameter
#[derive(Default)]
struct Binding {
    values: Vec<String>,
    entity_ids: Vec<String>,
    produced_by: Option<IntentLabel>,
}

impl Binding {
    fn push(&mut self, value: &str, entity_id: String) {
        if !self.values.iter().any(|v| v == value) {
            self.values.push(value.to_string());
            self.entity_ids.push(entity_id);
        }
    }

    fn is_bound(&self) -> bool {
        !self.values.is_empty() || self.produced_by.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryNormalizer;

impl QueryNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize the primary intent (failures are reported) and every
    /// secondary intent (failures drop that sub-query).
    pub fn normalize(
        &self,
        intent: &IntentResult,
        resolved: &ResolvedEntities,
        raw_text: &str,
    ) -> Result<NormalizedQuery, ValidationFailure> {
        let primary = self.normalize_intent(
            intent.primary,
            intent.confidence(intent.primary),
            true,
            resolved,
            raw_text,
        )?;

        let mut secondary = Vec::new();
        for label in &intent.secondary {
            if label.is_help() || *label == intent.primary {
                continue;
            }
            match self.normalize_intent(*label, intent.confidence(*label), false, resolved, raw_text) {
                Ok(sub_query) => secondary.push(sub_query),
                Err(failure) => {
                    debug!(intent = %label, %failure, "Dropping secondary intent");
                }
            }
        }

        Ok(NormalizedQuery {
            primary,
            secondary,
            raw_text: raw_text.to_string(),
        })
    }

    pub fn normalize_intent(
        &self,
        label: IntentLabel,
        confidence: f64,
        is_primary: bool,
        resolved: &ResolvedEntities,
        raw_text: &str,
    ) -> Result<SubQuery, ValidationFailure> {
        let schema = schema_for(label);
        let mut parameters = Map::new();

        if label.is_help() {
            parameters.insert("topic".to_string(), Value::String(raw_text.trim().to_string()));
            return Ok(SubQuery {
                intent: label,
                confidence,
                is_primary,
                parameters,
                target_entity_ids: Vec::new(),
                entity_types: BTreeSet::new(),
            });
        }

        let mut bindings: Vec<Binding> = schema.parameters.iter().map(|_| Binding::default()).collect();

        for (spec, binding) in schema.parameters.iter().zip(bindings.iter_mut()) {
            for entity in resolved.of_type(spec.source) {
                binding.push(&entity.normalized_value, entity.entity_id());
            }
        }

        for reference in &resolved.references {
            let Some(index) = reference_slot_index(schema, reference) else {
                continue;
            };
            bind_reference(&schema.parameters[index], &mut bindings[index], reference, raw_text)?;
        }

        let mut target_entity_ids = Vec::new();
        let mut entity_types = BTreeSet::new();

        for (spec, binding) in schema.parameters.iter().zip(bindings.iter()) {
            if spec.required && !binding.is_bound() {
                return Err(ValidationFailure::MissingParameter {
                    intent: label.to_string(),
                    parameter: spec.name.to_string(),
                });
            }
            if !binding.is_bound() {
                continue;
            }
            if binding.produced_by.is_none() && binding.values.len() < spec.min_count {
                return Err(ValidationFailure::InsufficientValues {
                    parameter: spec.name.to_string(),
                    minimum: spec.min_count,
                    found: binding.values.len(),
                });
            }
            if !spec.multi && binding.values.len() > 1 {
                return Err(ValidationFailure::AmbiguousParameter {
                    parameter: spec.name.to_string(),
                    values: binding.values.clone(),
                });
            }

            if spec.multi {
                parameters.insert(
                    spec.name.to_string(),
                    Value::Array(binding.values.iter().cloned().map(Value::String).collect()),
                );
            } else if let Some(value) = binding.values.first() {
                parameters.insert(spec.name.to_string(), Value::String(value.clone()));
            }
            if let Some(producer) = binding.produced_by {
                parameters.insert(
                    format!("{}_from", spec.name),
                    Value::String(producer.to_string()),
                );
            }

            target_entity_ids.extend(binding.entity_ids.iter().cloned());
            entity_types.insert(spec.source);
        }

        if !schema.require_any.is_empty()
            && !schema.require_any.iter().any(|name| parameters.contains_key(*name))
        {
            return Err(ValidationFailure::MissingParameter {
                intent: label.to_string(),
                parameter: schema.require_any.join("|"),
            });
        }

        Ok(SubQuery {
            intent: label,
            confidence,
            is_primary,
            parameters,
            target_entity_ids,
            entity_types,
        })
    }
}

/// Slot a reference fills: plural → the schema's reference slot,
/// singular → the first slot of the referenced type.
fn reference_slot_index(schema: &IntentSchema, reference: &ResolvedReference) -> Option<usize> {
    match ReferenceKind::of(&reference.reference)? {
        ReferenceKind::Plural => {
            let slot = schema.reference_slot?;
            schema.parameters.iter().position(|p| p.name == slot)
        }
        ReferenceKind::Singular(entity_type) => schema
            .parameters
            .iter()
            .position(|p| p.source == entity_type),
    }
}

fn bind_reference(
    spec: &ParameterSpec,
    binding: &mut Binding,
    reference: &ResolvedReference,
    raw_text: &str,
) -> Result<(), ValidationFailure> {
    match &reference.target {
        ReferenceTarget::Entities { entities } => {
            for entity in entities {
                if entity.entity_type != spec.source {
                    return Err(ValidationFailure::ConflictingEntityTypes {
                        parameter: spec.name.to_string(),
                        expected: spec.source,
                        found: entity.entity_type,
                    });
                }
                binding.push(&entity.normalized_value, entity.entity_id());
            }
        }
        ReferenceTarget::ResultSet { items, .. } => {
            // agent result sets are company lists
            if spec.source != EntityType::Company {
                return Err(ValidationFailure::ConflictingEntityTypes {
                    parameter: spec.name.to_string(),
                    expected: spec.source,
                    found: EntityType::Company,
                });
            }
            for item in items {
                binding.push(item, format!("{}:{}", EntityType::Company, item));
            }
        }
        ReferenceTarget::InRequest { producer } => {
            binding.produced_by = Some(*producer);
        }
        ReferenceTarget::Unresolved => {
            let span = reference.reference.span;
            let text = raw_text
                .get(span.start..span.end)
                .unwrap_or(reference.reference.normalized_value.as_str());
            return Err(ValidationFailure::UnresolvedReference {
                text: text.to_string(),
            });
        }
    }
    Ok(())
}
