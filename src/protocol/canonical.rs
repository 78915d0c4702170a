use serde::{Deserialize, Serialize};

pub type ProviderFields = serde_json::Map<String, serde_json::Value>;

pub const FINISH_STOP: &str = "stop";
pub const FINISH_ERROR: &str = "error";
pub const FINISH_CANCELLED: &str = "cancelled";

/// Message role in the turn-based chat grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    /// Parse a wire role. Unknown roles are treated like `user` for content
    /// typing purposes, so this only fails for non-string inputs upstream.
    #[must_use]
    pub fn from_wire(role: &str) -> Self {
        match role {
            "system" => ChatRole::System,
            "developer" => ChatRole::Developer,
            "assistant" => ChatRole::Assistant,
            "tool" => ChatRole::Tool,
            _ => ChatRole::User,
        }
    }
}

/// Name and argument text of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFragment {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// A tool invocation carried by a [`GenericChunk`].
///
/// `function.arguments` is always text (JSON-encoded or raw), never a
/// structured value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUseFragment {
    pub index: usize,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionFragment,
}

impl ToolUseFragment {
    #[must_use]
    pub fn function(
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Self {
        Self {
            index,
            id,
            kind: "function".to_string(),
            function: FunctionFragment { name, arguments },
        }
    }
}

/// Token usage block in the turn-based grammar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// The protocol-agnostic streaming unit handed to callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericChunk {
    pub text: String,
    pub is_finished: bool,
    pub finish_reason: String,
    pub usage: Option<ChatUsage>,
    pub index: usize,
    pub tool_use: Option<ToolUseFragment>,
    pub provider_specific_fields: Option<ProviderFields>,
}

impl GenericChunk {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.finish_reason == FINISH_ERROR
    }

    /// Tag the chunk's diagnostic bag with its `responses_type`.
    pub(crate) fn with_responses_type(mut self, responses_type: &str) -> Self {
        self.provider_specific_fields
            .get_or_insert_with(ProviderFields::new)
            .insert(
                "responses_type".into(),
                serde_json::Value::String(responses_type.to_string()),
            );
        self
    }
}
