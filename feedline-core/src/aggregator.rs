//! Folds classified status/content events into per-description counters so
//! rapid-fire pipelines do not overwhelm the timeline with one row per event.

use std::collections::HashSet;

use chrono::DateTime;
use chrono::Utc;
use feedline_protocol::LifecycleState;
use feedline_protocol::RawEvent;
use feedline_protocol::parse_timestamp;
use indexmap::IndexMap;

use crate::config::DedupPolicy;

/// Aggregate counter for every event sharing one description. Owned
/// exclusively by the [`Aggregator`]; the timeline reads snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub description: String,
    pub completed_count: usize,
    pub in_progress_count: usize,
    /// Error ids in arrival order. Never deduplicated: each failure must
    /// remain individually dismissible.
    pub error_items: Vec<String>,
    pub last_update: Option<DateTime<Utc>>,
    /// Stable first-seen ordinal used to break sort ties in the merger.
    pub first_seen_seq: u64,
    completed_links: HashSet<String>,
    in_progress_links: HashSet<String>,
}

impl GroupEntry {
    fn new(description: String, first_seen_seq: u64) -> Self {
        Self {
            description,
            completed_count: 0,
            in_progress_count: 0,
            error_items: Vec::new(),
            last_update: None,
            first_seen_seq,
            completed_links: HashSet::new(),
            in_progress_links: HashSet::new(),
        }
    }

    /// Eligible for rendering once it has counted anything at all.
    pub fn is_renderable(&self) -> bool {
        self.completed_count + self.in_progress_count + self.error_items.len() > 0
    }

    fn advance(&mut self, timestamp: DateTime<Utc>) {
        // Epoch-zero (the malformed-timestamp fallback) never advances.
        self.last_update = Some(match self.last_update {
            Some(current) => current.max(timestamp),
            None => timestamp,
        });
    }
}

#[derive(Debug)]
pub struct Aggregator {
    groups: IndexMap<String, GroupEntry>,
    dedup: DedupPolicy,
}

impl Aggregator {
    pub fn new(dedup: DedupPolicy) -> Self {
        Self {
            groups: IndexMap::new(),
            dedup,
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupEntry> {
        self.groups.values()
    }

    pub fn get(&self, description: &str) -> Option<&GroupEntry> {
        self.groups.get(description)
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    /// Fold one classified event into its group. `first_seen_seq` is the
    /// arrival ordinal recorded if this is the first event for the key.
    pub fn observe(&mut self, description: &str, event: &RawEvent, first_seen_seq: u64) {
        let dedup_applies = event.link_id.is_some() && self.dedup.applies_to(description);
        let group = self
            .groups
            .entry(description.to_string())
            .or_insert_with(|| GroupEntry::new(description.to_string(), first_seen_seq));
        let timestamp = parse_timestamp(&event.timestamp);

        match event.lifecycle_state {
            LifecycleState::Error => {
                // An item that was tracked as in-progress moves buckets.
                if let Some(link) = &event.link_id
                    && group.in_progress_links.remove(link)
                {
                    group.in_progress_count = group.in_progress_count.saturating_sub(1);
                }
                group.error_items.push(event.id.clone());
                group.advance(timestamp);
                tracing::debug!(
                    "[feed] group {description:?} error item {} (total {})",
                    event.id,
                    group.error_items.len()
                );
            }
            LifecycleState::Completed => {
                let mut counted = true;
                if dedup_applies {
                    let link = event.link_id.clone().unwrap_or_default();
                    if group.in_progress_links.remove(&link) {
                        group.in_progress_count = group.in_progress_count.saturating_sub(1);
                    }
                    counted = group.completed_links.insert(link);
                }
                if counted {
                    group.completed_count += 1;
                }
                group.advance(timestamp);
            }
            LifecycleState::Active => {
                if !event.is_streaming {
                    return;
                }
                let mut counted = true;
                if dedup_applies {
                    let link = event.link_id.clone().unwrap_or_default();
                    // Already finished units do not come back in-progress.
                    if group.completed_links.contains(&link) {
                        return;
                    }
                    counted = group.in_progress_links.insert(link);
                }
                if counted {
                    group.in_progress_count += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedline_protocol::SourceType;
    use pretty_assertions::assert_eq;

    fn progress(link_id: Option<&str>, state: LifecycleState, timestamp: &str) -> RawEvent {
        RawEvent {
            source_type: SourceType::Content,
            id: link_id.unwrap_or("anon").to_string(),
            link_id: link_id.map(str::to_string),
            stage_label: Some("提取论点".to_string()),
            component_tag: None,
            step_label: None,
            message: String::new(),
            is_streaming: state == LifecycleState::Active,
            lifecycle_state: state,
            timestamp: timestamp.to_string(),
            prompt_id: None,
            role: None,
            choices: None,
        }
    }

    #[test]
    fn repeated_completion_with_same_link_counts_once() {
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);
        let event = progress(Some("a"), LifecycleState::Completed, "2026-03-01T10:00:00Z");
        agg.observe("提取论点", &event, 0);
        agg.observe("提取论点", &event, 1);

        let group = agg.get("提取论点").unwrap();
        assert_eq!(group.completed_count, 1);
        assert_eq!(agg.groups().count(), 1);
    }

    #[test]
    fn errors_never_deduplicate() {
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);
        let event = progress(Some("a"), LifecycleState::Error, "2026-03-01T10:00:00Z");
        agg.observe("提取论点", &event, 0);
        agg.observe("提取论点", &event, 1);

        let group = agg.get("提取论点").unwrap();
        assert_eq!(group.error_items.len(), 2);
    }

    #[test]
    fn unlinked_completions_count_every_report() {
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);
        let event = progress(None, LifecycleState::Completed, "2026-03-01T10:00:00Z");
        agg.observe("提取论点", &event, 0);
        agg.observe("提取论点", &event, 1);

        assert_eq!(agg.get("提取论点").unwrap().completed_count, 2);
    }

    #[test]
    fn category_policy_limits_dedup() {
        let policy = DedupPolicy::Categories(["transcript".to_string()].into_iter().collect());
        let mut agg = Aggregator::new(policy);
        let event = progress(Some("a"), LifecycleState::Completed, "2026-03-01T10:00:00Z");
        agg.observe("提取论点", &event, 0);
        agg.observe("提取论点", &event, 1);

        // Outside the named categories every report counts.
        assert_eq!(agg.get("提取论点").unwrap().completed_count, 2);
    }

    #[test]
    fn item_moves_from_in_progress_to_completed() {
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);
        agg.observe(
            "提取论点",
            &progress(Some("a"), LifecycleState::Active, "2026-03-01T10:00:00Z"),
            0,
        );
        let group = agg.get("提取论点").unwrap();
        assert_eq!((group.in_progress_count, group.completed_count), (1, 0));

        agg.observe(
            "提取论点",
            &progress(Some("a"), LifecycleState::Completed, "2026-03-01T10:00:01Z"),
            1,
        );
        let group = agg.get("提取论点").unwrap();
        assert_eq!((group.in_progress_count, group.completed_count), (0, 1));
    }

    #[test]
    fn completed_unit_does_not_reenter_in_progress() {
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);
        agg.observe(
            "提取论点",
            &progress(Some("a"), LifecycleState::Completed, "2026-03-01T10:00:00Z"),
            0,
        );
        agg.observe(
            "提取论点",
            &progress(Some("a"), LifecycleState::Active, "2026-03-01T10:00:01Z"),
            1,
        );
        let group = agg.get("提取论点").unwrap();
        assert_eq!((group.in_progress_count, group.completed_count), (0, 1));
    }

    #[test]
    fn malformed_timestamp_never_advances_last_update() {
        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);
        agg.observe(
            "提取论点",
            &progress(Some("a"), LifecycleState::Completed, "2026-03-01T10:00:00Z"),
            0,
        );
        let before = agg.get("提取论点").unwrap().last_update;
        agg.observe(
            "提取论点",
            &progress(Some("b"), LifecycleState::Completed, "garbage"),
            1,
        );
        assert_eq!(agg.get("提取论点").unwrap().last_update, before);
    }

    #[test]
    fn renderable_requires_any_count() {
        let entry = GroupEntry::new("x".to_string(), 0);
        assert!(!entry.is_renderable());

        let mut agg = Aggregator::new(DedupPolicy::AllWithLink);
        agg.observe(
            "x",
            &progress(Some("a"), LifecycleState::Active, "2026-03-01T10:00:00Z"),
            0,
        );
        assert!(agg.get("x").unwrap().is_renderable());
    }
}
