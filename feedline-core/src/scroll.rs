//! Chat-like auto-follow policy for the feed viewport.
//!
//! Two states with a hysteresis band between the thresholds so content
//! growth near the boundary cannot make the mode oscillate. Programmatic
//! scrolls are distinguished from user scrolls by a short suppression
//! window, so the controller's own commands never unpin it.

use std::time::Duration;
use std::time::Instant;

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowState {
    /// Auto-follow newest content.
    Pinned,
    /// The user is reading history; new rows only bump the pending counter.
    Unpinned,
}

/// Viewport geometry reported by the render surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMetrics {
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub client_height: f32,
}

impl ViewportMetrics {
    pub fn distance_from_bottom(&self) -> f32 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollCommand {
    ToBottom,
}

#[derive(Debug)]
pub struct AutoScrollController {
    state: FollowState,
    pending_new_items: usize,
    last_scroll_top: Option<f32>,
    suppress_until: Option<Instant>,
    repin_threshold: f32,
    release_threshold: f32,
    suppress_window: Duration,
}

impl AutoScrollController {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: FollowState::Pinned,
            pending_new_items: 0,
            last_scroll_top: None,
            suppress_until: None,
            repin_threshold: config.repin_threshold_px,
            release_threshold: config.release_threshold_px,
            suppress_window: config.scroll_suppress_window,
        }
    }

    pub fn follow_state(&self) -> FollowState {
        self.state
    }

    pub fn pending_new_items(&self) -> usize {
        self.pending_new_items
    }

    /// React to a viewport scroll notification.
    pub fn on_viewport_scroll(&mut self, metrics: ViewportMetrics, now: Instant) {
        let moved_up = self
            .last_scroll_top
            .is_some_and(|previous| metrics.scroll_top < previous);
        let moved_down = self
            .last_scroll_top
            .is_some_and(|previous| metrics.scroll_top > previous);
        self.last_scroll_top = Some(metrics.scroll_top);

        if self.suppress_until.is_some_and(|until| now < until) {
            // Our own scroll settling; not a user gesture.
            return;
        }

        let distance = metrics.distance_from_bottom();
        match self.state {
            FollowState::Pinned => {
                if moved_up || distance > self.release_threshold {
                    tracing::debug!("[scroll] unpinned at distance {distance:.0}px");
                    self.state = FollowState::Unpinned;
                }
            }
            FollowState::Unpinned => {
                if moved_down && distance <= self.repin_threshold {
                    tracing::debug!("[scroll] repinned at distance {distance:.0}px");
                    self.state = FollowState::Pinned;
                    self.pending_new_items = 0;
                }
            }
        }
    }

    /// React to a timeline mutation. `appended` is the row-count growth;
    /// zero means an in-place replacement, which only a critical update may
    /// turn into a scroll (and only while pinned).
    pub fn on_timeline_mutated(
        &mut self,
        appended: usize,
        newest_critical: bool,
        now: Instant,
    ) -> Option<ScrollCommand> {
        match self.state {
            FollowState::Pinned => {
                if appended == 0 && !newest_critical {
                    return None;
                }
                self.pending_new_items = 0;
                Some(self.issue_scroll(now))
            }
            FollowState::Unpinned => {
                if appended > 0 {
                    self.pending_new_items += appended.max(1);
                    tracing::debug!(
                        "[scroll] {} pending item(s) while unpinned",
                        self.pending_new_items
                    );
                }
                None
            }
        }
    }

    /// Manual "jump to bottom": always re-pins and clears the counter.
    pub fn jump_to_bottom(&mut self, now: Instant) -> ScrollCommand {
        self.state = FollowState::Pinned;
        self.pending_new_items = 0;
        self.issue_scroll(now)
    }

    fn issue_scroll(&mut self, now: Instant) -> ScrollCommand {
        self.suppress_until = Some(now + self.suppress_window);
        ScrollCommand::ToBottom
    }
}
