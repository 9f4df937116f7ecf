//! Built-in help capability: clarification for unrecognized or
//! low-confidence requests

use super::{Capability, InvocationSignal};
use crate::error::CapabilityFailure;
use crate::models::IntentLabel;
use async_trait::async_trait;
use serde_json::{json, Value};

const CAPABILITIES: &str = "I can find companies by sector, region and buying signals, \
rank or compare them, profile a company, track its signals and draft outreach.";

const EXAMPLE: &str = "For example: \"find fintech companies in Dubai, then rank them\".";

#[derive(Debug, Clone, Default)]
pub struct HelpCapability;

impl HelpCapability {
    pub fn new() -> Self {
        Self
    }

    fn answer(intent: Option<IntentLabel>, topic: Option<&str>) -> String {
        let opening = match (intent, topic) {
            (Some(IntentLabel::HelpExplain), _) => String::new(),
            (Some(IntentLabel::Unknown) | None, Some(topic)) if !topic.is_empty() => {
                format!("I'm not sure what you meant by \"{}\". ", topic)
            }
            (Some(IntentLabel::Unknown) | None, _) => "I didn't catch a request there. ".to_string(),
            (Some(label), _) => format!(
                "I couldn't confidently match that {} request to an agent. ",
                label.domain()
            ),
        };
        format!("{}{} {}", opening, CAPABILITIES, EXAMPLE)
    }
}

#[async_trait]
impl Capability for HelpCapability {
    async fn invoke(&self, input: &Value, signal: &InvocationSignal) -> Result<Value, CapabilityFailure> {
        if signal.is_cancelled() {
            return Err(CapabilityFailure::Cancelled);
        }
        let intent = input
            .get("intent")
            .and_then(Value::as_str)
            .and_then(IntentLabel::parse);
        let topic = input
            .get("topic")
            .and_then(Value::as_str)
            .or_else(|| input.get("query").and_then(Value::as_str))
            .map(str::trim);

        Ok(json!({ "summary": Self::answer(intent, topic) }))
    }
}
