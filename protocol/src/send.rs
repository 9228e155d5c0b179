use serde::Deserialize;
use serde::Serialize;

/// Outbound conversation message, addressed by session so the duplicate
/// guard can key on `(session, text)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSendRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SendStatus {
    Ok,
    Queued,
    ContextRequired,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSendResponse {
    pub status: SendStatus,
    #[serde(default)]
    pub server_message_id: Option<String>,
    #[serde(default)]
    pub queued_reason: Option<String>,
}

/// Answer to a pending `user_input_required` request. Choice buttons and
/// free text both collapse to a response string; only the payload differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptAnswer {
    pub prompt_id: String,
    pub response_text: String,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("send rejected by server: {0}")]
    Rejected(String),
}
