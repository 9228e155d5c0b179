use std::collections::HashSet;
use std::time::Duration;

/// Which aggregate categories deduplicate repeated reports of the same
/// logical unit of work by `link_id`.
#[derive(Debug, Clone)]
pub enum DedupPolicy {
    /// Any aggregate event carrying a `link_id` is counted at most once per
    /// bucket.
    AllWithLink,
    /// Only the named description keys deduplicate; everything else counts
    /// every report.
    Categories(HashSet<String>),
}

impl DedupPolicy {
    pub fn applies_to(&self, description: &str) -> bool {
        match self {
            DedupPolicy::AllWithLink => true,
            DedupPolicy::Categories(names) => names.contains(description),
        }
    }
}

/// Tunables for one feed session. Constructor-injected; there is no ambient
/// global state anywhere in this crate.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Below this distance from the bottom (while moving down) the view
    /// re-pins to auto-follow.
    pub repin_threshold_px: f32,
    /// Above this distance a pinned view releases. The gap between the two
    /// thresholds is the hysteresis band.
    pub release_threshold_px: f32,
    /// How long a sent message's content hash blocks an identical resend.
    pub recent_send_ttl: Duration,
    /// Delay between a successful prompt submission and clearing the draft,
    /// covering the exit animation.
    pub submit_exit_delay: Duration,
    /// Window after a programmatic scroll during which viewport deltas are
    /// not attributed to the user.
    pub scroll_suppress_window: Duration,
    pub dedup: DedupPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            repin_threshold_px: 40.0,
            release_threshold_px: 60.0,
            recent_send_ttl: Duration::from_secs(30),
            submit_exit_delay: Duration::from_millis(300),
            scroll_suppress_window: Duration::from_millis(250),
            dedup: DedupPolicy::AllWithLink,
        }
    }
}
