//! Runtime configuration
//!
//! Every threshold the pipeline uses lives here. Defaults are usable as-is;
//! `DecisionConfig::from_env` overrides them from `ASSISTANT_*` variables
//! (a `.env` file is honoured).

use crate::error::DecisionError;
use crate::Result;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Minimum score for a label to become primary
    pub min_confidence: f64,
    /// Minimum score for a label to be listed as secondary
    pub secondary_threshold: f64,
    pub max_secondary: usize,
    /// Bonus applied to the prior turn's primary label when it matched again
    pub continuity_bonus: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.35,
            secondary_threshold: 0.2,
            max_secondary: 3,
            continuity_bonus: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Turns retained per conversation
    pub window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { window: 10 }
    }
}

#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub confidence_floor: f64,
    /// Evidence from sources less reliable than this is dropped
    pub reliability_floor: f64,
    pub half_life_days: f64,
    pub baseline: f64,
    /// Score points per unit of weighted evidence
    pub contribution_scale: f64,
    pub min_score: f64,
    pub max_score: f64,
    /// Contributors listed per component explanation
    pub max_justified: usize,
    pub default_reliability: f64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.3,
            reliability_floor: 0.2,
            half_life_days: 90.0,
            baseline: 50.0,
            contribution_scale: 25.0,
            min_score: 0.0,
            max_score: 100.0,
            max_justified: 3,
            default_reliability: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub min_routing_threshold: f64,
    pub high_confidence_threshold: f64,
    /// Candidates scoring within this margin of the best are rivals
    pub rival_margin: f64,
    pub secondary_weight: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_routing_threshold: 0.2,
            high_confidence_threshold: 0.45,
            rival_margin: 0.1,
            secondary_weight: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Step timeout = cost estimate x multiplier (bounded below by the floor)
    pub timeout_multiplier: u64,
    pub min_step_timeout_ms: u64,
    pub max_steps_per_plan: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_multiplier: 3,
            min_step_timeout_ms: 250,
            max_steps_per_plan: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersonaConfig {
    pub default_tone: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            default_tone: "neutral".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionConfig {
    pub classifier: ClassifierConfig,
    pub memory: MemoryConfig,
    pub reasoning: ReasoningConfig,
    pub router: RouterConfig,
    pub execution: ExecutionConfig,
    pub persona: PersonaConfig,
}

impl DecisionConfig {
    /// Defaults overridden by `ASSISTANT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        config.classifier.min_confidence =
            env_or("ASSISTANT_MIN_INTENT_CONFIDENCE", config.classifier.min_confidence)?;
        config.classifier.secondary_threshold = env_or(
            "ASSISTANT_SECONDARY_INTENT_THRESHOLD",
            config.classifier.secondary_threshold,
        )?;
        config.classifier.max_secondary =
            env_or("ASSISTANT_MAX_SECONDARY_INTENTS", config.classifier.max_secondary)?;

        config.memory.window = env_or("ASSISTANT_MEMORY_WINDOW", config.memory.window)?;

        config.reasoning.half_life_days =
            env_or("ASSISTANT_EVIDENCE_HALF_LIFE_DAYS", config.reasoning.half_life_days)?;
        config.reasoning.confidence_floor =
            env_or("ASSISTANT_EVIDENCE_CONFIDENCE_FLOOR", config.reasoning.confidence_floor)?;

        config.router.min_routing_threshold =
            env_or("ASSISTANT_MIN_ROUTING_THRESHOLD", config.router.min_routing_threshold)?;
        config.router.high_confidence_threshold = env_or(
            "ASSISTANT_HIGH_CONFIDENCE_THRESHOLD",
            config.router.high_confidence_threshold,
        )?;

        config.execution.timeout_multiplier =
            env_or("ASSISTANT_TIMEOUT_MULTIPLIER", config.execution.timeout_multiplier)?;
        config.execution.min_step_timeout_ms =
            env_or("ASSISTANT_MIN_STEP_TIMEOUT_MS", config.execution.min_step_timeout_ms)?;

        if let Ok(tone) = env::var("ASSISTANT_DEFAULT_TONE") {
            config.persona.default_tone = tone;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.window == 0 {
            return Err(DecisionError::Config(
                "memory window must be at least 1".to_string(),
            ));
        }
        if self.classifier.secondary_threshold > self.classifier.min_confidence {
            return Err(DecisionError::Config(
                "secondary intent threshold must not exceed the primary threshold".to_string(),
            ));
        }
        if self.reasoning.half_life_days <= 0.0 {
            return Err(DecisionError::Config(
                "evidence half-life must be positive".to_string(),
            ));
        }
        if self.router.min_routing_threshold < 0.0 {
            return Err(DecisionError::Config(
                "routing threshold must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DecisionError::Config(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}
