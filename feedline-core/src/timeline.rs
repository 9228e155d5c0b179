//! Merges reasoning entries, conversation turns and aggregate groups into
//! one render-ready, chronologically ordered sequence.

use std::collections::HashSet;

use chrono::DateTime;
use chrono::Utc;
use feedline_protocol::TurnRole;
use feedline_protocol::parse_timestamp;
use indexmap::IndexMap;
use serde::Serialize;

use crate::aggregator::Aggregator;
use crate::aggregator::GroupEntry;

/// Shown while a reasoning stream is open but has produced no text yet.
const THINKING_PLACEHOLDER: &str = "Thinking…";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasoningEntry {
    pub id: String,
    pub message: String,
    pub is_streaming: bool,
    pub timestamp: String,
    #[serde(skip)]
    first_seen_seq: u64,
}

impl ReasoningEntry {
    pub fn new(id: String, message: String, is_streaming: bool, timestamp: String) -> Self {
        Self {
            id,
            message,
            is_streaming,
            timestamp,
            first_seen_seq: 0,
        }
    }

    /// Streams open with no content yet still render, as a placeholder.
    pub fn display_message(&self) -> &str {
        if self.message.trim().is_empty() && self.is_streaming {
            THINKING_PLACEHOLDER
        } else {
            &self.message
        }
    }

    /// Worth creating only once there is content or an open stream.
    pub fn is_material(&self) -> bool {
        !self.message.trim().is_empty() || self.is_streaming
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationEntry {
    pub id: String,
    pub role: TurnRole,
    pub message: String,
    pub is_streaming: bool,
    pub timestamp: String,
    #[serde(skip)]
    first_seen_seq: u64,
}

impl ConversationEntry {
    pub fn new(
        id: String,
        role: TurnRole,
        message: String,
        is_streaming: bool,
        timestamp: String,
    ) -> Self {
        Self {
            id,
            role,
            message,
            is_streaming,
            timestamp,
            first_seen_seq: 0,
        }
    }
}

/// Immutable view of a [`GroupEntry`] with dismissed error items filtered
/// out; the aggregator's accounting is untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSnapshot {
    pub description: String,
    pub completed_count: usize,
    pub in_progress_count: usize,
    pub error_items: Vec<String>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineEntry {
    Reasoning(ReasoningEntry),
    Conversation(ConversationEntry),
    Group(GroupSnapshot),
}

/// One merged row: the entry plus its user-controlled pin flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineItem {
    pub entry: TimelineEntry,
    pub pinned: bool,
}

impl TimelineItem {
    pub fn id(&self) -> &str {
        match &self.entry {
            TimelineEntry::Reasoning(entry) => &entry.id,
            TimelineEntry::Conversation(entry) => &entry.id,
            TimelineEntry::Group(group) => &group.description,
        }
    }
}

/// Backing collections for the merged view. Entries are replaced, never
/// mutated in place; dismissal hides rows without deleting backing state.
#[derive(Debug, Default)]
pub struct TimelineState {
    reasoning: IndexMap<String, ReasoningEntry>,
    conversation: IndexMap<String, ConversationEntry>,
    dismissed: HashSet<String>,
    pinned: HashSet<String>,
}

impl TimelineState {
    /// Insert or replace a reasoning entry. The first-seen ordinal and
    /// timestamp stick with the id so updates do not reorder the row.
    pub fn upsert_reasoning(&mut self, mut entry: ReasoningEntry, seq: u64) {
        match self.reasoning.get(&entry.id) {
            Some(existing) => {
                entry.first_seen_seq = existing.first_seen_seq;
                entry.timestamp = existing.timestamp.clone();
            }
            None => entry.first_seen_seq = seq,
        }
        self.reasoning.insert(entry.id.clone(), entry);
    }

    pub fn upsert_conversation(&mut self, mut entry: ConversationEntry, seq: u64) {
        match self.conversation.get(&entry.id) {
            Some(existing) => {
                entry.first_seen_seq = existing.first_seen_seq;
                entry.timestamp = existing.timestamp.clone();
            }
            None => entry.first_seen_seq = seq,
        }
        self.conversation.insert(entry.id.clone(), entry);
    }

    pub fn reasoning(&self, id: &str) -> Option<&ReasoningEntry> {
        self.reasoning.get(id)
    }

    pub fn dismiss(&mut self, id: &str) {
        self.dismissed.insert(id.to_string());
    }

    pub fn toggle_pin(&mut self, id: &str) {
        if !self.pinned.remove(id) {
            self.pinned.insert(id.to_string());
        }
    }

    pub fn is_dismissed(&self, id: &str) -> bool {
        self.dismissed.contains(id)
    }

    pub fn clear(&mut self) {
        self.reasoning.clear();
        self.conversation.clear();
        self.dismissed.clear();
        self.pinned.clear();
    }

    /// Produce the ordered, render-ready sequence. Idempotent for a fixed
    /// `now`: the wall clock only decides where in-flight groups sort.
    pub fn merge(&self, aggregator: &Aggregator, now: DateTime<Utc>) -> Vec<TimelineItem> {
        let mut rows: Vec<(i64, u64, TimelineItem)> = Vec::new();

        for entry in self.reasoning.values() {
            if self.dismissed.contains(&entry.id) || !entry.is_material() {
                continue;
            }
            rows.push((
                parse_timestamp(&entry.timestamp).timestamp_millis(),
                entry.first_seen_seq,
                TimelineItem {
                    pinned: self.pinned.contains(&entry.id),
                    entry: TimelineEntry::Reasoning(entry.clone()),
                },
            ));
        }

        for entry in self.conversation.values() {
            if self.dismissed.contains(&entry.id) {
                continue;
            }
            rows.push((
                parse_timestamp(&entry.timestamp).timestamp_millis(),
                entry.first_seen_seq,
                TimelineItem {
                    pinned: self.pinned.contains(&entry.id),
                    entry: TimelineEntry::Conversation(entry.clone()),
                },
            ));
        }

        for group in aggregator.groups() {
            if !group.is_renderable() || self.dismissed.contains(&group.description) {
                continue;
            }
            let snapshot = self.snapshot_group(group);
            if snapshot.completed_count + snapshot.in_progress_count + snapshot.error_items.len()
                == 0
            {
                continue;
            }
            rows.push((
                group_sort_key(group, now),
                group.first_seen_seq,
                TimelineItem {
                    pinned: self.pinned.contains(&group.description),
                    entry: TimelineEntry::Group(snapshot),
                },
            ));
        }

        rows.sort_by_key(|(key, seq, _)| (*key, *seq));
        rows.into_iter().map(|(_, _, item)| item).collect()
    }

    fn snapshot_group(&self, group: &GroupEntry) -> GroupSnapshot {
        GroupSnapshot {
            description: group.description.clone(),
            completed_count: group.completed_count,
            in_progress_count: group.in_progress_count,
            error_items: group
                .error_items
                .iter()
                .filter(|id| !self.dismissed.contains(*id))
                .cloned()
                .collect(),
            last_update: group.last_update,
        }
    }
}

/// Groups with finished work sort at their last update; in-flight groups
/// sort to the merge instant so live work stays ahead of stale completions.
fn group_sort_key(group: &GroupEntry, now: DateTime<Utc>) -> i64 {
    if group.completed_count > 0 || !group.error_items.is_empty() {
        group
            .last_update
            .map(|instant| instant.timestamp_millis())
            .unwrap_or(0)
    } else if group.in_progress_count > 0 {
        now.timestamp_millis()
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupPolicy;
    use feedline_protocol::LifecycleState;
    use feedline_protocol::RawEvent;
    use feedline_protocol::SourceType;
    use pretty_assertions::assert_eq;

    fn raw(
        link_id: Option<&str>,
        state: LifecycleState,
        streaming: bool,
        timestamp: &str,
    ) -> RawEvent {
        RawEvent {
            source_type: SourceType::Content,
            id: link_id.unwrap_or("anon").to_string(),
            link_id: link_id.map(str::to_string),
            stage_label: None,
            component_tag: None,
            step_label: None,
            message: String::new(),
            is_streaming: streaming,
            lifecycle_state: state,
            timestamp: timestamp.to_string(),
            prompt_id: None,
            role: None,
            choices: None,
        }
    }

    fn now() -> DateTime<Utc> {
        parse_timestamp("2026-03-01T12:00:00Z")
    }

    #[test]
    fn merge_is_idempotent_for_fixed_now() {
        let mut state = TimelineState::default();
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);

        state.upsert_reasoning(
            ReasoningEntry::new(
                "r1".to_string(),
                "step one".to_string(),
                false,
                "2026-03-01T10:00:00Z".to_string(),
            ),
            0,
        );
        state.upsert_conversation(
            ConversationEntry::new(
                "t1".to_string(),
                TurnRole::User,
                "hello".to_string(),
                false,
                "2026-03-01T10:00:05Z".to_string(),
            ),
            1,
        );
        agg.observe(
            "search",
            &raw(Some("a"), LifecycleState::Active, true, ""),
            2,
        );

        let first = state.merge(&agg, now());
        let second = state.merge(&agg, now());
        assert_eq!(first, second);
    }

    #[test]
    fn in_flight_groups_sort_after_stale_completions() {
        let mut state = TimelineState::default();
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);

        agg.observe(
            "done early",
            &raw(Some("a"), LifecycleState::Completed, false, "2026-03-01T09:00:00Z"),
            0,
        );
        agg.observe(
            "still running",
            &raw(Some("b"), LifecycleState::Active, true, ""),
            1,
        );
        state.upsert_reasoning(
            ReasoningEntry::new(
                "r1".to_string(),
                "thought".to_string(),
                false,
                "2026-03-01T10:00:00Z".to_string(),
            ),
            2,
        );

        let merged = state.merge(&agg, now());
        let order: Vec<&str> = merged.iter().map(TimelineItem::id).collect();
        assert_eq!(order, vec!["done early", "r1", "still running"]);
    }

    #[test]
    fn ties_break_by_first_seen_order() {
        let mut state = TimelineState::default();
        let agg = Aggregator::new(DedupPolicy::AllWithLink);
        let stamp = "2026-03-01T10:00:00Z";

        state.upsert_reasoning(
            ReasoningEntry::new("r1".to_string(), "a".to_string(), false, stamp.to_string()),
            0,
        );
        state.upsert_reasoning(
            ReasoningEntry::new("r2".to_string(), "b".to_string(), false, stamp.to_string()),
            1,
        );

        let merged = state.merge(&agg, now());
        let order: Vec<&str> = merged.iter().map(TimelineItem::id).collect();
        assert_eq!(order, vec!["r1", "r2"]);
    }

    #[test]
    fn replacement_keeps_original_position() {
        let mut state = TimelineState::default();
        let agg = Aggregator::new(DedupPolicy::AllWithLink);

        state.upsert_reasoning(
            ReasoningEntry::new(
                "r1".to_string(),
                "draft".to_string(),
                true,
                "2026-03-01T10:00:00Z".to_string(),
            ),
            0,
        );
        state.upsert_conversation(
            ConversationEntry::new(
                "t1".to_string(),
                TurnRole::Assistant,
                "reply".to_string(),
                false,
                "2026-03-01T10:00:01Z".to_string(),
            ),
            1,
        );
        // Update arrives much later; the entry must not jump to the end.
        state.upsert_reasoning(
            ReasoningEntry::new(
                "r1".to_string(),
                "draft, extended".to_string(),
                false,
                "2026-03-01T11:00:00Z".to_string(),
            ),
            2,
        );

        let merged = state.merge(&agg, now());
        let order: Vec<&str> = merged.iter().map(TimelineItem::id).collect();
        assert_eq!(order, vec!["r1", "t1"]);
        match &merged[0].entry {
            TimelineEntry::Reasoning(entry) => assert_eq!(entry.message, "draft, extended"),
            other => panic!("expected reasoning entry, got {other:?}"),
        }
    }

    #[test]
    fn empty_streaming_reasoning_renders_placeholder() {
        let entry = ReasoningEntry::new(
            "r1".to_string(),
            String::new(),
            true,
            "2026-03-01T10:00:00Z".to_string(),
        );
        assert!(entry.is_material());
        assert_eq!(entry.display_message(), "Thinking…");

        let finished = ReasoningEntry::new(
            "r2".to_string(),
            String::new(),
            false,
            "2026-03-01T10:00:00Z".to_string(),
        );
        assert!(!finished.is_material());
    }

    #[test]
    fn dismissed_entries_are_filtered_not_deleted() {
        let mut state = TimelineState::default();
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);

        state.upsert_reasoning(
            ReasoningEntry::new(
                "r1".to_string(),
                "thought".to_string(),
                false,
                "2026-03-01T10:00:00Z".to_string(),
            ),
            0,
        );
        agg.observe(
            "search",
            &raw(Some("a"), LifecycleState::Completed, false, "2026-03-01T10:01:00Z"),
            1,
        );

        state.dismiss("r1");
        let merged = state.merge(&agg, now());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id(), "search");
        // Backing collection still holds the entry.
        assert!(state.reasoning("r1").is_some());
    }

    #[test]
    fn dismissed_error_items_leave_accounting_intact() {
        let mut state = TimelineState::default();
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);

        agg.observe(
            "fetch",
            &raw(Some("a"), LifecycleState::Error, false, "2026-03-01T10:00:00Z"),
            0,
        );
        agg.observe(
            "fetch",
            &raw(Some("b"), LifecycleState::Error, false, "2026-03-01T10:00:01Z"),
            1,
        );

        state.dismiss("a");
        let merged = state.merge(&agg, now());
        match &merged[0].entry {
            TimelineEntry::Group(group) => {
                assert_eq!(group.error_items, vec!["b".to_string()]);
            }
            other => panic!("expected group, got {other:?}"),
        }
        assert_eq!(agg.get("fetch").unwrap().error_items.len(), 2);
    }

    #[test]
    fn merged_rows_serialize_for_the_render_surface() {
        let mut state = TimelineState::default();
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);

        state.upsert_reasoning(
            ReasoningEntry::new(
                "r1".to_string(),
                "thought".to_string(),
                false,
                "2026-03-01T10:00:00Z".to_string(),
            ),
            0,
        );
        agg.observe(
            "search",
            &raw(Some("a"), LifecycleState::Completed, false, "2026-03-01T10:01:00Z"),
            1,
        );

        let merged = state.merge(&agg, now());
        let value = serde_json::to_value(&merged).unwrap();
        assert_eq!(value[0]["entry"]["kind"], "reasoning");
        assert_eq!(value[1]["entry"]["kind"], "group");
        assert_eq!(value[1]["entry"]["completed_count"], 1);
    }

    #[test]
    fn pin_state_surfaces_on_rows() {
        let mut state = TimelineState::default();
        let agg = Aggregator::new(DedupPolicy::AllWithLink);

        state.upsert_conversation(
            ConversationEntry::new(
                "t1".to_string(),
                TurnRole::User,
                "keep this".to_string(),
                false,
                "2026-03-01T10:00:00Z".to_string(),
            ),
            0,
        );
        state.toggle_pin("t1");
        assert!(state.merge(&agg, now())[0].pinned);
        state.toggle_pin("t1");
        assert!(!state.merge(&agg, now())[0].pinned);
    }
}
