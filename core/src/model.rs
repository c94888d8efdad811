use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Prefix marking ids generated client-side for optimistic messages.
pub const TEMP_ID_PREFIX: &str = "temp-user-msg-";

const LOCAL_USER_ID: &str = "local";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    #[serde(alias = "model")]
    Assistant,
    System,
    Tool,
    Error,
    #[serde(other)]
    Other,
}

/// Client-side confirmation state of a message. Never sent over the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    #[default]
    Confirmed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPrompt {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub confirm_text: String,
    #[serde(default)]
    pub cancel_text: String,
}

/// Message body, discriminated by the wire `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Error(String),
    ToolCall { name: String, arguments: Value },
    ToolResponse { name: String, response: Value },
    Confirmation(ConfirmationPrompt),
    Structured { kind: String, payload: Value },
}

#[derive(Deserialize)]
struct ToolCallPayload {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct ToolResponsePayload {
    name: String,
    #[serde(default)]
    response: Value,
}

impl MessageContent {
    /// Decode a wire `(type, content)` pair. Shapes that do not match their
    /// declared type fall back to [`MessageContent::Structured`].
    pub fn from_wire(kind: Option<&str>, content: Value) -> Self {
        let kind = kind.unwrap_or("text");
        match kind {
            "text" => Self::Text(value_to_text(content)),
            "error" => Self::Error(value_to_text(content)),
            "tool_call" => match serde_json::from_value::<ToolCallPayload>(content.clone()) {
                Ok(call) => Self::ToolCall {
                    name: call.name,
                    arguments: call.arguments,
                },
                Err(_) => Self::structured(kind, content),
            },
            "tool_response" => {
                match serde_json::from_value::<ToolResponsePayload>(content.clone()) {
                    Ok(result) => Self::ToolResponse {
                        name: result.name,
                        response: result.response,
                    },
                    Err(_) => Self::structured(kind, content),
                }
            }
            "confirmation" => match serde_json::from_value(content.clone()) {
                Ok(prompt) => Self::Confirmation(prompt),
                Err(_) => Self::structured(kind, content),
            },
            _ => Self::structured(kind, content),
        }
    }

    fn structured(kind: &str, payload: Value) -> Self {
        Self::Structured {
            kind: kind.to_string(),
            payload,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Text(_) => "text",
            Self::Error(_) => "error",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResponse { .. } => "tool_response",
            Self::Confirmation(_) => "confirmation",
            Self::Structured { kind, .. } => kind,
        }
    }

    pub fn to_wire(&self) -> Value {
        match self {
            Self::Text(text) | Self::Error(text) => Value::String(text.clone()),
            Self::ToolCall { name, arguments } => {
                serde_json::json!({ "name": name, "arguments": arguments })
            }
            Self::ToolResponse { name, response } => {
                serde_json::json!({ "name": name, "response": response })
            }
            Self::Confirmation(prompt) => serde_json::to_value(prompt).unwrap_or(Value::Null),
            Self::Structured { payload, .. } => payload.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Error(text) => Some(text),
            _ => None,
        }
    }
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Loosely typed message as it travels over the wire. Poll responses may carry
/// partial entries (`isChunk`) that only have an id and a text fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, rename = "isChunk", skip_serializing_if = "is_false")]
    pub is_chunk: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl WireMessage {
    pub fn chunk(id: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
            user_id: None,
            kind: None,
            content: Value::String(fragment.into()),
            timestamp: None,
            is_chunk: true,
        }
    }

    pub fn fragment(&self) -> String {
        value_to_text(self.content.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub struct Message {
    pub id: String,
    pub user_id: String,
    pub role: MessageRole,
    pub content: MessageContent,
    pub timestamp: String,
    pub delivery: Delivery,
}

impl Message {
    pub fn new(id: impl Into<String>, role: MessageRole, content: MessageContent) -> Self {
        let user_id = match role {
            MessageRole::User => LOCAL_USER_ID,
            MessageRole::Assistant => "LLM_Assistant",
            _ => "System",
        };
        Self {
            id: id.into(),
            user_id: user_id.to_string(),
            role,
            content,
            timestamp: wire_timestamp(Utc::now()),
            delivery: Delivery::Confirmed,
        }
    }

    pub fn text(id: impl Into<String>, role: MessageRole, text: impl Into<String>) -> Self {
        Self::new(id, role, MessageContent::Text(text.into()))
    }

    /// Optimistic user message shown until the server confirms the write.
    pub fn pending_user(text: impl Into<String>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!(
            "{TEMP_ID_PREFIX}{}-{}",
            Utc::now().timestamp_millis(),
            &suffix[..8]
        );
        let mut message = Self::text(id, MessageRole::User, text);
        message.delivery = Delivery::Pending;
        message
    }

    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let role = wire.role.unwrap_or(MessageRole::Assistant);
        let content = if wire.is_chunk {
            MessageContent::Text(value_to_text(wire.content))
        } else {
            MessageContent::from_wire(wire.kind.as_deref(), wire.content)
        };
        Self {
            id: wire.id,
            user_id: wire.user_id.unwrap_or_else(|| "Unknown".to_string()),
            role,
            content,
            timestamp: wire
                .timestamp
                .unwrap_or_else(|| wire_timestamp(Utc::now())),
            delivery: Delivery::Confirmed,
        }
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: Some(message.role),
            user_id: Some(message.user_id),
            kind: Some(message.content.kind().to_string()),
            content: message.content.to_wire(),
            timestamp: Some(message.timestamp),
            is_chunk: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub timestamp: String,
}

impl Thread {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// The client's view of the open conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentChat {
    pub messages: Vec<Message>,
    pub thread_id: Option<String>,
    pub waiting_for_response: bool,
}

impl CurrentChat {
    /// Id of the newest message the server knows about.
    pub fn last_confirmed_id(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.delivery == Delivery::Confirmed)
            .map(|message| message.id.as_str())
    }

    pub fn find(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessages {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub waiting_for_response: bool,
}

/// Response to starting a chat or appending to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub thread_id: String,
    #[serde(default)]
    pub message: String,
    pub user_message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdate {
    pub waiting_for_response: bool,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalContext {
    #[serde(default)]
    pub context: String,
}

pub fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
