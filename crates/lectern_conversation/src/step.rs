//! The model call behind a conversation reply.

use lectern_core::{ConversationType, Message, ModelTier, Role};
use lectern_error::StepError;
use lectern_flow::{Step, extract_json};
use lectern_interface::ModelContent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inputs of a reply: the system prompt and recent history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyInputs {
    /// Rendered system prompt
    pub system: String,
    /// Recent transcript, oldest first, ending with the learner's turn
    pub history: Vec<Message>,
}

/// The model's reply and its proposed follow-ups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyOutput {
    /// Assistant reply text
    pub reply: String,
    /// Unfiltered follow-up suggestions
    #[serde(default)]
    pub quick_replies: Vec<String>,
}

/// Step producing one assistant reply.
///
/// Its name is the conversation type, which is also the request label.
/// Models that ignore the JSON instruction still produce a reply: plain
/// text becomes the reply with no suggestions.
#[derive(Debug, Clone)]
pub struct ConversationStep {
    name: String,
    tier: ModelTier,
}

impl ConversationStep {
    /// A reply step for a conversation type.
    pub fn new(conversation_type: ConversationType, tier: ModelTier) -> Self {
        Self {
            name: conversation_type.to_string(),
            tier,
        }
    }

    fn inputs(&self, inputs: &Value) -> Result<ReplyInputs, StepError> {
        let inputs: ReplyInputs = serde_json::from_value(inputs.clone())
            .map_err(|e| StepError::validation(&self.name, format!("Malformed reply inputs: {}", e)))?;
        match inputs.history.last() {
            Some(message) if message.role == Role::User => Ok(inputs),
            _ => Err(StepError::validation(
                &self.name,
                "History must end with a learner turn",
            )),
        }
    }
}

impl Step for ConversationStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> ModelTier {
        self.tier
    }

    fn validate_inputs(&self, inputs: &Value) -> Result<(), StepError> {
        self.inputs(inputs).map(|_| ())
    }

    fn build_messages(&self, inputs: &Value) -> Result<Vec<Message>, StepError> {
        let inputs = self.inputs(inputs)?;
        let mut messages = Vec::with_capacity(inputs.history.len() + 1);
        messages.push(Message::system(inputs.system));
        messages.extend(inputs.history);
        Ok(messages)
    }

    fn parse_output(&self, content: ModelContent) -> Result<Value, StepError> {
        let output = match content {
            ModelContent::Json(value) => serde_json::from_value::<ReplyOutput>(value).ok(),
            ModelContent::Text(text) => match extract_json(&text)
                .ok()
                .and_then(|value| serde_json::from_value::<ReplyOutput>(value).ok())
            {
                Some(output) => Some(output),
                None => Some(ReplyOutput {
                    reply: text.trim().to_string(),
                    quick_replies: Vec::new(),
                }),
            },
        };

        match output {
            Some(output) if !output.reply.trim().is_empty() => serde_json::to_value(output)
                .map_err(|e| StepError::fatal(&self.name, format!("Unserializable reply: {}", e))),
            _ => Err(StepError::transient(&self.name, "Model returned no reply")),
        }
    }
}
