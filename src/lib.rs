//! Sales Agent Orchestrator
//!
//! The decision layer of a sales-intelligence assistant:
//! - Understands an utterance (entities + intents) in the context of the conversation
//! - Normalizes it into typed sub-queries, or asks for clarification
//! - Routes sub-queries to registered agents and plans a dependency-ordered DAG
//! - Executes the plan in concurrent waves with timeouts, fallbacks and cancellation
//! - Scores companies through an explainable evidence → reasoning → justification chain
//! - Renders the aggregate in a configured tone
//!
//! PIPELINE:
//! TEXT → UNDERSTAND → RESOLVE → NORMALIZE → ROUTE → PLAN → EXECUTE → AGGREGATE → RENDER

pub mod agent;
pub mod classifier;
pub mod config;
pub mod conversational;
pub mod error;
pub mod execution;
pub mod extractor;
pub mod memory;
pub mod models;
pub mod normalizer;
pub mod persona;
pub mod planner;
pub mod reasoning;
pub mod registry;
pub mod router;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::Orchestrator;
pub use classifier::IntentClassifier;
pub use config::DecisionConfig;
pub use conversational::{AssistantReply, SalesAssistant};
pub use error::{CapabilityFailure, ConfigurationFailure, DecisionError, ValidationFailure};
pub use extractor::EntityExtractor;
pub use memory::ConversationMemory;
pub use normalizer::QueryNormalizer;
pub use persona::{PersonaEngine, ToneRegistry};
pub use registry::{AgentRegistry, Capability, HelpCapability, InvocationSignal};
pub use router::ToolRouter;
