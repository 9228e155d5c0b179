use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Broad origin of a normalized event. Reasoning and conversation events are
/// rendered individually; status and content events are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
    Reasoning,
    Status,
    Content,
    Conversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    Active,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusVariant {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Streaming,
    Complete,
    Failed,
}

/// One inbound notification from the pipeline transport, as it appears on
/// the wire. Stream events carry token deltas; the accumulated text lives in
/// the session, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    StreamStart {
        stream_id: String,
        phase_tag: String,
        #[serde(default)]
        payload: String,
    },
    StreamToken {
        stream_id: String,
        phase_tag: String,
        payload: String,
    },
    StreamEnd {
        stream_id: String,
        phase_tag: String,
        #[serde(default)]
        payload: String,
    },
    StatusUpdate {
        status_id: String,
        variant: StatusVariant,
        message: String,
    },
    ProgressItem {
        #[serde(default)]
        link_id: Option<String>,
        description: String,
        lifecycle_state: LifecycleState,
        timestamp: String,
    },
    UserInputRequired {
        prompt_id: String,
        prompt: String,
        #[serde(default)]
        choices: Option<Vec<String>>,
    },
    ConversationMessage {
        turn_id: String,
        role: TurnRole,
        content: String,
        status: TurnStatus,
    },
}

/// The normalized, classification-ready form of one inbound event.
/// Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub source_type: SourceType,
    pub id: String,
    pub link_id: Option<String>,
    /// Specific stage label reported by the pipeline (e.g. a progress item's
    /// description). First rung of the grouping-description ladder.
    pub stage_label: Option<String>,
    /// Component tag, e.g. a content stream's phase tag. Second rung.
    pub component_tag: Option<String>,
    /// Generic step label, e.g. a status update's message. Third rung.
    pub step_label: Option<String>,
    pub message: String,
    pub is_streaming: bool,
    pub lifecycle_state: LifecycleState,
    pub timestamp: String,
    /// Present when the pipeline is asking for user input; drives criticality
    /// and the prompt lifecycle.
    pub prompt_id: Option<String>,
    pub role: Option<TurnRole>,
    pub choices: Option<Vec<String>>,
}

fn is_reasoning_phase(phase_tag: &str) -> bool {
    phase_tag == "reasoning" || phase_tag.starts_with("reasoning/")
}

impl FeedEvent {
    /// Resolve the wire shape into a [`RawEvent`] exactly once. Events that
    /// carry no wire timestamp are stamped with the arrival instant so they
    /// still sort chronologically among timestamped progress items.
    pub fn normalize(&self, received_at: DateTime<Utc>) -> RawEvent {
        let arrival = received_at.to_rfc3339();
        match self {
            FeedEvent::StreamStart {
                stream_id,
                phase_tag,
                payload,
            }
            | FeedEvent::StreamToken {
                stream_id,
                phase_tag,
                payload,
            } => RawEvent {
                source_type: if is_reasoning_phase(phase_tag) {
                    SourceType::Reasoning
                } else {
                    SourceType::Content
                },
                id: stream_id.clone(),
                link_id: Some(stream_id.clone()),
                stage_label: None,
                component_tag: (!is_reasoning_phase(phase_tag) && !phase_tag.is_empty())
                    .then(|| phase_tag.clone()),
                step_label: None,
                message: payload.clone(),
                is_streaming: true,
                lifecycle_state: LifecycleState::Active,
                timestamp: arrival,
                prompt_id: None,
                role: None,
                choices: None,
            },
            FeedEvent::StreamEnd {
                stream_id,
                phase_tag,
                payload,
            } => RawEvent {
                source_type: if is_reasoning_phase(phase_tag) {
                    SourceType::Reasoning
                } else {
                    SourceType::Content
                },
                id: stream_id.clone(),
                link_id: Some(stream_id.clone()),
                stage_label: None,
                component_tag: (!is_reasoning_phase(phase_tag) && !phase_tag.is_empty())
                    .then(|| phase_tag.clone()),
                step_label: None,
                message: payload.clone(),
                is_streaming: false,
                lifecycle_state: LifecycleState::Completed,
                timestamp: arrival,
                prompt_id: None,
                role: None,
                choices: None,
            },
            FeedEvent::StatusUpdate {
                status_id,
                variant,
                message,
            } => RawEvent {
                source_type: SourceType::Status,
                id: status_id.clone(),
                link_id: None,
                stage_label: None,
                component_tag: None,
                step_label: Some(message.clone()),
                message: message.clone(),
                is_streaming: false,
                lifecycle_state: match variant {
                    StatusVariant::Error => LifecycleState::Error,
                    _ => LifecycleState::Completed,
                },
                timestamp: arrival,
                prompt_id: None,
                role: None,
                choices: None,
            },
            FeedEvent::ProgressItem {
                link_id,
                description,
                lifecycle_state,
                timestamp,
            } => RawEvent {
                source_type: SourceType::Content,
                id: link_id
                    .clone()
                    .unwrap_or_else(|| format!("{description}@{timestamp}")),
                link_id: link_id.clone(),
                stage_label: Some(description.clone()),
                component_tag: None,
                step_label: None,
                message: description.clone(),
                is_streaming: *lifecycle_state == LifecycleState::Active,
                lifecycle_state: *lifecycle_state,
                timestamp: timestamp.clone(),
                prompt_id: None,
                role: None,
                choices: None,
            },
            FeedEvent::UserInputRequired {
                prompt_id,
                prompt,
                choices,
            } => RawEvent {
                source_type: SourceType::Conversation,
                id: prompt_id.clone(),
                link_id: None,
                stage_label: None,
                component_tag: None,
                step_label: None,
                message: prompt.clone(),
                is_streaming: false,
                lifecycle_state: LifecycleState::Active,
                timestamp: arrival,
                prompt_id: Some(prompt_id.clone()),
                role: Some(TurnRole::Assistant),
                choices: choices.clone(),
            },
            FeedEvent::ConversationMessage {
                turn_id,
                role,
                content,
                status,
            } => RawEvent {
                source_type: SourceType::Conversation,
                id: turn_id.clone(),
                link_id: None,
                stage_label: None,
                component_tag: None,
                step_label: None,
                message: content.clone(),
                is_streaming: *status == TurnStatus::Streaming,
                lifecycle_state: match status {
                    TurnStatus::Failed => LifecycleState::Error,
                    TurnStatus::Streaming => LifecycleState::Active,
                    TurnStatus::Complete => LifecycleState::Completed,
                },
                timestamp: arrival,
                prompt_id: None,
                role: Some(*role),
                choices: None,
            },
        }
    }
}

/// Parse a wire timestamp. Malformed or empty input degrades to the Unix
/// epoch rather than erroring: this is a display system, not a source of
/// truth, and epoch-zero never advances a group's last-update instant.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(err) => {
            if !raw.is_empty() {
                tracing::warn!("[feed] unparseable timestamp {raw:?}: {err}");
            }
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}
