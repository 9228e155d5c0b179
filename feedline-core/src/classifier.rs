//! Pure routing of normalized events onto the timeline paths.

use feedline_protocol::LifecycleState;
use feedline_protocol::RawEvent;
use feedline_protocol::SourceType;

/// Literal fallback when no lookup rule yields a usable description.
pub const FALLBACK_DESCRIPTION: &str = "processing";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClass {
    /// Rendered as an individual reasoning entry, regardless of other fields.
    Reasoning,
    /// One entry per distinct turn id; never merged into a counter.
    Conversation,
    /// Folded into the group counter for `description`.
    Aggregate { description: String },
}

pub fn classify(event: &RawEvent) -> EventClass {
    match event.source_type {
        SourceType::Reasoning => EventClass::Reasoning,
        SourceType::Conversation => EventClass::Conversation,
        SourceType::Status | SourceType::Content => EventClass::Aggregate {
            description: description_for(event),
        },
    }
}

/// Human-readable grouping key, resolved through an ordered lookup ladder:
/// specific stage label, then component tag, then generic step label, then
/// the literal fallback. Deterministic: same metadata, same description.
pub fn description_for(event: &RawEvent) -> String {
    [&event.stage_label, &event.component_tag, &event.step_label]
        .into_iter()
        .flatten()
        .map(|label| label.trim())
        .find(|label| !label.is_empty())
        .unwrap_or(FALLBACK_DESCRIPTION)
        .to_string()
}

/// Critical entries force the auto-scroll controller's hand even when it
/// would otherwise only bump the pending counter.
pub fn is_critical(event: &RawEvent, waiting_for_input: bool) -> bool {
    event.source_type == SourceType::Reasoning
        || event.lifecycle_state == LifecycleState::Error
        || (waiting_for_input && event.prompt_id.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedline_protocol::TurnRole;
    use pretty_assertions::assert_eq;

    fn content_event() -> RawEvent {
        RawEvent {
            source_type: SourceType::Content,
            id: "e1".to_string(),
            link_id: None,
            stage_label: None,
            component_tag: None,
            step_label: None,
            message: String::new(),
            is_streaming: false,
            lifecycle_state: LifecycleState::Completed,
            timestamp: "2026-03-01T10:00:00Z".to_string(),
            prompt_id: None,
            role: None,
            choices: None,
        }
    }

    #[test]
    fn reasoning_routes_regardless_of_other_fields() {
        let mut event = content_event();
        event.source_type = SourceType::Reasoning;
        event.lifecycle_state = LifecycleState::Error;
        assert_eq!(classify(&event), EventClass::Reasoning);
    }

    #[test]
    fn conversation_bypasses_aggregation() {
        let mut event = content_event();
        event.source_type = SourceType::Conversation;
        event.role = Some(TurnRole::User);
        assert_eq!(classify(&event), EventClass::Conversation);
    }

    #[test]
    fn description_ladder_prefers_stage_label() {
        let mut event = content_event();
        event.stage_label = Some("提取论点".to_string());
        event.component_tag = Some("summarizer".to_string());
        event.step_label = Some("step 3".to_string());
        assert_eq!(description_for(&event), "提取论点");
    }

    #[test]
    fn description_ladder_skips_blank_rungs() {
        let mut event = content_event();
        event.stage_label = Some("   ".to_string());
        event.component_tag = Some("summarizer".to_string());
        assert_eq!(description_for(&event), "summarizer");

        event.component_tag = None;
        event.step_label = Some("fetching sources".to_string());
        assert_eq!(description_for(&event), "fetching sources");

        event.step_label = None;
        assert_eq!(description_for(&event), FALLBACK_DESCRIPTION);
    }

    #[test]
    fn description_is_deterministic() {
        let mut event = content_event();
        event.component_tag = Some("draft_report".to_string());
        assert_eq!(description_for(&event), description_for(&event.clone()));
    }

    #[test]
    fn criticality_rules() {
        let mut event = content_event();
        assert!(!is_critical(&event, false));

        event.lifecycle_state = LifecycleState::Error;
        assert!(is_critical(&event, false));

        let mut prompt_event = content_event();
        prompt_event.prompt_id = Some("p1".to_string());
        assert!(!is_critical(&prompt_event, false));
        assert!(is_critical(&prompt_event, true));

        let mut reasoning = content_event();
        reasoning.source_type = SourceType::Reasoning;
        assert!(is_critical(&reasoning, false));
    }
}
