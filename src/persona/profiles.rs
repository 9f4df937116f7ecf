//! Named tone profiles: built-ins plus records loaded from JSON

use crate::error::{DecisionError, Result};
use crate::models::{FormalityLevel, StyleModifier, ToneProfile};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Deserialize)]
#[serde(untagged)]
enum ToneRecords {
    Many(Vec<ToneProfile>),
    One(ToneProfile),
}

fn words(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect()
}

/// Built-in profiles: neutral, concise, executive, friendly
pub fn builtin_profiles() -> Vec<ToneProfile> {
    vec![
        ToneProfile::neutral("neutral"),
        ToneProfile {
            name: "concise".to_string(),
            vocabulary_replacements: words(&[
                ("approximately", "about"),
                ("in order to", "to"),
                ("utilize", "use"),
            ]),
            style_modifiers: vec![StyleModifier::Concise],
            formality_level: FormalityLevel::Neutral,
        },
        ToneProfile {
            name: "executive".to_string(),
            vocabulary_replacements: words(&[("top pick", "lead recommendation")]),
            style_modifiers: vec![StyleModifier::Concise, StyleModifier::Executive],
            formality_level: FormalityLevel::Formal,
        },
        ToneProfile {
            name: "friendly".to_string(),
            vocabulary_replacements: words(&[("companies", "teams"), ("Could not", "Couldn't")]),
            style_modifiers: Vec::new(),
            formality_level: FormalityLevel::Casual,
        },
    ]
}

/// Tone profiles by name. Lookup ignores case.
#[derive(Debug, Clone, Default)]
pub struct ToneRegistry {
    profiles: BTreeMap<String, ToneProfile>,
}

impl ToneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for profile in builtin_profiles() {
            registry.insert(profile);
        }
        registry
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, profile: ToneProfile) {
        self.profiles.insert(profile.name.to_lowercase(), profile);
    }

    /// Load one profile object or an array of them. Returns how many were loaded.
    pub fn load_json(&mut self, json: &str) -> Result<usize> {
        let profiles = match serde_json::from_str::<ToneRecords>(json)? {
            ToneRecords::Many(profiles) => profiles,
            ToneRecords::One(profile) => vec![profile],
        };
        let count = profiles.len();
        for profile in profiles {
            if profile.name.trim().is_empty() {
                return Err(DecisionError::Config("tone profile without a name".to_string()));
            }
            self.insert(profile);
        }
        info!(count, "Loaded tone profiles");
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Result<&ToneProfile> {
        self.profiles
            .get(&name.trim().to_lowercase())
            .ok_or_else(|| DecisionError::UnknownTone(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.values().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
