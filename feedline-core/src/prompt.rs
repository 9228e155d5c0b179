//! Tracks the single outstanding "waiting for user" request.

use std::time::Duration;
use std::time::Instant;

/// The live prompt, replaced wholesale whenever a distinct prompt id
/// arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrompt {
    pub prompt_id: String,
    pub prompt: String,
    pub choices: Vec<String>,
    pub submitted: bool,
    pub exiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptState {
    Idle,
    Prompting(PendingPrompt),
    /// Answer sent; waiting out the exit animation before clearing the draft.
    Submitting { prompt_id: String, deadline: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptEffect {
    ClearDraft,
}

#[derive(Debug)]
pub struct PromptLifecycle {
    state: PromptState,
    /// Last prompt id this controller finished processing; a repeat of it is
    /// stale pipeline chatter, not a new request.
    last_processed: Option<String>,
    exit_delay: Duration,
}

impl PromptLifecycle {
    pub fn new(exit_delay: Duration) -> Self {
        Self {
            state: PromptState::Idle,
            last_processed: None,
            exit_delay,
        }
    }

    pub fn state(&self) -> &PromptState {
        &self.state
    }

    pub fn active_prompt(&self) -> Option<&PendingPrompt> {
        match &self.state {
            PromptState::Prompting(pending) => Some(pending),
            _ => None,
        }
    }

    /// Pipeline signalled "waiting for user". A new distinct id (re)starts
    /// the prompt, discarding any transient submitted/exiting state.
    pub fn on_waiting(&mut self, prompt_id: &str, prompt: &str, choices: &[String]) {
        if prompt_id.is_empty() || self.last_processed.as_deref() == Some(prompt_id) {
            return;
        }
        if let PromptState::Prompting(pending) = &self.state
            && pending.prompt_id == prompt_id
        {
            return;
        }
        tracing::info!("[prompt] prompting id={prompt_id}");
        self.state = PromptState::Prompting(PendingPrompt {
            prompt_id: prompt_id.to_string(),
            prompt: prompt.to_string(),
            choices: choices.to_vec(),
            submitted: false,
            exiting: false,
        });
    }

    /// The waiting flag cleared externally. Authoritative: drop everything,
    /// including a pending exit deadline, so no stale timer fires into a
    /// superseded state.
    pub fn on_waiting_cleared(&mut self) {
        if self.state != PromptState::Idle {
            tracing::info!("[prompt] waiting flag cleared, forcing idle");
            self.state = PromptState::Idle;
        }
    }

    /// A send tied to the current prompt succeeded.
    pub fn on_submit_success(&mut self, now: Instant) {
        let PromptState::Prompting(pending) = &self.state else {
            tracing::warn!("[prompt] submit success with no active prompt");
            return;
        };
        let prompt_id = pending.prompt_id.clone();
        self.last_processed = Some(prompt_id.clone());
        self.state = PromptState::Submitting {
            prompt_id,
            deadline: now + self.exit_delay,
        };
    }

    /// Advance past an elapsed exit deadline.
    pub fn tick(&mut self, now: Instant) -> Option<PromptEffect> {
        if let PromptState::Submitting { deadline, .. } = &self.state
            && now >= *deadline
        {
            self.state = PromptState::Idle;
            return Some(PromptEffect::ClearDraft);
        }
        None
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            PromptState::Submitting { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = PromptState::Idle;
        self.last_processed = None;
    }
}
