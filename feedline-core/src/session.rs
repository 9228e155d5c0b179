//! Run-to-completion reactions over one feed session.
//!
//! Every entry point is a synchronous reaction to one external trigger
//! (event arrival, viewport scroll, user input, send completion, timer) and
//! returns the effects the embedding surface must apply. Nothing here
//! blocks; nothing here interleaves.

use std::collections::HashMap;
use std::time::Instant;

use chrono::DateTime;
use chrono::Utc;
use feedline_protocol::ConversationSendRequest;
use feedline_protocol::ConversationSendResponse;
use feedline_protocol::FeedEvent;
use feedline_protocol::PromptAnswer;
use feedline_protocol::SendError;
use feedline_protocol::SendStatus;
use feedline_protocol::TurnRole;

use crate::aggregator::Aggregator;
use crate::classifier;
use crate::classifier::EventClass;
use crate::config::SessionConfig;
use crate::prompt::PromptEffect;
use crate::prompt::PromptLifecycle;
use crate::scroll::AutoScrollController;
use crate::scroll::FollowState;
use crate::scroll::ScrollCommand;
use crate::scroll::ViewportMetrics;
use crate::submit::SendAttempt;
use crate::submit::SubmissionGuard;
use crate::timeline::ConversationEntry;
use crate::timeline::ReasoningEntry;
use crate::timeline::TimelineItem;
use crate::timeline::TimelineState;

/// Both clocks a reaction needs: wall time orders timeline entries, the
/// monotonic instant drives timers and suppression windows.
#[derive(Debug, Clone, Copy)]
pub struct Now {
    pub wall: DateTime<Utc>,
    pub mono: Instant,
}

impl Now {
    pub fn system() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }
}

/// Commands for the embedding surface. The session never touches the
/// viewport, the draft box or the network itself.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    ScrollToBottom,
    /// Non-blocking, toast-style user-visible message.
    Notice(String),
    ClearDraft,
    RestoreDraft(String),
    SendConversation(ConversationSendRequest),
    SendPromptResponse(PromptAnswer),
}

#[derive(Debug)]
enum PendingSendKind {
    Conversation,
    Prompt,
}

/// Bookkeeping for the one send the guard allows in flight. Holds the
/// [`SendAttempt`] so dropping this releases the lock.
#[derive(Debug)]
struct PendingSend {
    _attempt: SendAttempt,
    draft: String,
    kind: PendingSendKind,
}

pub struct FeedSession {
    config: SessionConfig,
    session_id: String,
    batch_id: Option<String>,
    timeline: TimelineState,
    aggregator: Aggregator,
    scroll: AutoScrollController,
    guard: SubmissionGuard,
    prompt: PromptLifecycle,
    /// Accumulated text per open stream id; deltas never land in entries
    /// directly.
    streams: HashMap<String, String>,
    waiting_for_input: bool,
    pending_send: Option<PendingSend>,
    arrival_seq: u64,
    merged: Vec<TimelineItem>,
}

impl FeedSession {
    pub fn new(session_id: String, config: SessionConfig) -> Self {
        Self {
            session_id,
            timeline: TimelineState::default(),
            aggregator: Aggregator::new(config.dedup.clone()),
            scroll: AutoScrollController::new(&config),
            guard: SubmissionGuard::new(config.recent_send_ttl),
            prompt: PromptLifecycle::new(config.submit_exit_delay),
            streams: HashMap::new(),
            waiting_for_input: false,
            pending_send: None,
            arrival_seq: 0,
            merged: Vec::new(),
            batch_id: None,
            config,
        }
    }

    /// The merged, render-ready sequence. Read-only to the render surface.
    pub fn timeline(&self) -> &[TimelineItem] {
        &self.merged
    }

    pub fn pending_new_items(&self) -> usize {
        self.scroll.pending_new_items()
    }

    pub fn follow_state(&self) -> FollowState {
        self.scroll.follow_state()
    }

    pub fn waiting_for_input(&self) -> bool {
        self.waiting_for_input
    }

    pub fn active_prompt_id(&self) -> Option<&str> {
        self.prompt
            .active_prompt()
            .map(|pending| pending.prompt_id.as_str())
    }

    /// Trigger class 1: one raw event arrived.
    pub fn handle_event(&mut self, event: &FeedEvent, now: Now) -> Vec<SessionEffect> {
        let raw = event.normalize(now.wall);

        // Waiting-flag maintenance: an explicit request raises it; resumed
        // stream output is the authoritative signal that the wait is over.
        match event {
            FeedEvent::UserInputRequired {
                prompt_id,
                prompt,
                choices,
            } => {
                self.waiting_for_input = true;
                self.prompt
                    .on_waiting(prompt_id, prompt, choices.as_deref().unwrap_or(&[]));
            }
            FeedEvent::StreamStart { .. } | FeedEvent::StreamToken { .. } => {
                if self.waiting_for_input {
                    self.waiting_for_input = false;
                    self.prompt.on_waiting_cleared();
                }
            }
            _ => {}
        }

        let critical = classifier::is_critical(&raw, self.waiting_for_input);
        let seq = self.arrival_seq;
        self.arrival_seq += 1;

        match classifier::classify(&raw) {
            EventClass::Reasoning => {
                let message = self.accumulate_stream(event, &raw.id, &raw.message);
                self.timeline.upsert_reasoning(
                    ReasoningEntry::new(
                        raw.id.clone(),
                        message,
                        raw.is_streaming,
                        raw.timestamp.clone(),
                    ),
                    seq,
                );
            }
            EventClass::Conversation => {
                self.timeline.upsert_conversation(
                    ConversationEntry::new(
                        raw.id.clone(),
                        raw.role.unwrap_or(TurnRole::Assistant),
                        raw.message.clone(),
                        raw.is_streaming,
                        raw.timestamp.clone(),
                    ),
                    seq,
                );
            }
            EventClass::Aggregate { description } => {
                self.aggregator.observe(&description, &raw, seq);
            }
        }

        let mut effects = Vec::new();
        self.remerge(critical, now, &mut effects);
        effects
    }

    /// Trigger class 2: viewport scroll notification.
    pub fn handle_viewport_scroll(&mut self, metrics: ViewportMetrics, now: Now) {
        self.scroll.on_viewport_scroll(metrics, now.mono);
    }

    /// Trigger class 3: user input actions.
    pub fn submit_draft(&mut self, text: &str, now: Now) -> Vec<SessionEffect> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match self.guard.begin(&self.session_id, text, now.mono) {
            Err(rejection) => vec![SessionEffect::Notice(rejection.to_string())],
            Ok(attempt) => match self.prompt.active_prompt() {
                Some(pending_prompt) => {
                    let answer = PromptAnswer {
                        prompt_id: pending_prompt.prompt_id.clone(),
                        response_text: text.to_string(),
                    };
                    self.pending_send = Some(PendingSend {
                        _attempt: attempt,
                        draft: text.to_string(),
                        kind: PendingSendKind::Prompt,
                    });
                    vec![SessionEffect::SendPromptResponse(answer)]
                }
                None => {
                    let request = ConversationSendRequest {
                        session_id: self.session_id.clone(),
                        message: text.to_string(),
                    };
                    self.pending_send = Some(PendingSend {
                        _attempt: attempt,
                        draft: text.to_string(),
                        kind: PendingSendKind::Conversation,
                    });
                    vec![SessionEffect::SendConversation(request)]
                }
            },
        }
    }

    /// Choice buttons funnel through the same guard and lifecycle as free
    /// text; only the payload differs.
    pub fn submit_choice(&mut self, index: usize, now: Now) -> Vec<SessionEffect> {
        let Some(choice) = self
            .prompt
            .active_prompt()
            .and_then(|pending| pending.choices.get(index))
            .cloned()
        else {
            tracing::warn!("[prompt] choice {index} with no matching active prompt");
            return Vec::new();
        };
        self.submit_draft(&choice, now)
    }

    pub fn jump_to_bottom(&mut self, now: Now) -> Vec<SessionEffect> {
        let _ = self.scroll.jump_to_bottom(now.mono);
        vec![SessionEffect::ScrollToBottom]
    }

    pub fn dismiss(&mut self, entry_id: &str, now: Now) -> Vec<SessionEffect> {
        self.timeline.dismiss(entry_id);
        let mut effects = Vec::new();
        self.remerge(false, now, &mut effects);
        effects
    }

    pub fn toggle_pin(&mut self, entry_id: &str, now: Now) -> Vec<SessionEffect> {
        self.timeline.toggle_pin(entry_id);
        let mut effects = Vec::new();
        self.remerge(false, now, &mut effects);
        effects
    }

    /// Trigger class 4: an asynchronous conversation send completed.
    pub fn on_conversation_send_result(
        &mut self,
        result: Result<ConversationSendResponse, SendError>,
        _now: Now,
    ) -> Vec<SessionEffect> {
        let Some(pending) = self.pending_send.take() else {
            tracing::warn!("[guard] send completion with nothing pending");
            return Vec::new();
        };
        if matches!(pending.kind, PendingSendKind::Prompt) {
            tracing::warn!("[guard] conversation completion for a prompt send");
        }

        let mut effects = Vec::new();
        match result {
            Ok(response) => match response.status {
                SendStatus::Ok => effects.push(SessionEffect::ClearDraft),
                SendStatus::Queued => {
                    effects.push(SessionEffect::ClearDraft);
                    let reason = response
                        .queued_reason
                        .unwrap_or_else(|| "pipeline busy".to_string());
                    effects.push(SessionEffect::Notice(format!("message queued: {reason}")));
                }
                SendStatus::ContextRequired => {
                    self.guard.forget_recent(&self.session_id, &pending.draft);
                    effects.push(SessionEffect::RestoreDraft(pending.draft.clone()));
                    effects.push(SessionEffect::Notice(
                        "more context required before sending".to_string(),
                    ));
                }
                SendStatus::Error => {
                    self.guard.forget_recent(&self.session_id, &pending.draft);
                    effects.push(SessionEffect::RestoreDraft(pending.draft.clone()));
                    effects.push(SessionEffect::Notice("the server rejected the message".to_string()));
                }
            },
            Err(err) => {
                tracing::warn!("[guard] conversation send failed: {err}");
                self.guard.forget_recent(&self.session_id, &pending.draft);
                effects.push(SessionEffect::RestoreDraft(pending.draft.clone()));
                effects.push(SessionEffect::Notice(format!("send failed: {err}")));
            }
        }
        // `pending` drops here, releasing the single-flight lock.
        effects
    }

    /// Trigger class 4, prompt flavor: the synchronous responder reported
    /// whether the answer was delivered.
    pub fn on_prompt_send_result(&mut self, delivered: bool, now: Now) -> Vec<SessionEffect> {
        let Some(pending) = self.pending_send.take() else {
            tracing::warn!("[prompt] answer completion with nothing pending");
            return Vec::new();
        };
        if matches!(pending.kind, PendingSendKind::Conversation) {
            tracing::warn!("[prompt] prompt completion for a conversation send");
        }

        if delivered {
            self.prompt.on_submit_success(now.mono);
            // The draft clears once the exit delay elapses, via tick().
            Vec::new()
        } else {
            self.guard.forget_recent(&self.session_id, &pending.draft);
            vec![
                SessionEffect::RestoreDraft(pending.draft.clone()),
                SessionEffect::Notice("failed to deliver the response".to_string()),
            ]
        }
    }

    /// Timer sweep: exit-animation deadline and hash TTL.
    pub fn tick(&mut self, now: Now) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        if let Some(PromptEffect::ClearDraft) = self.prompt.tick(now.mono) {
            effects.push(SessionEffect::ClearDraft);
        }
        self.guard.sweep(now.mono);
        effects
    }

    /// Earliest instant tick() has work to do, for the loop's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.prompt.next_deadline()
    }

    /// A new batch id starts a fresh session: derived state, timers and the
    /// guard are dropped wholesale so no stale callback can mutate it.
    pub fn reset(&mut self, batch_id: &str) {
        if self.batch_id.as_deref() == Some(batch_id) {
            return;
        }
        tracing::info!("[feed] session reset for batch {batch_id}");
        self.batch_id = Some(batch_id.to_string());
        self.timeline.clear();
        self.aggregator = Aggregator::new(self.config.dedup.clone());
        self.streams.clear();
        self.merged.clear();
        self.prompt.reset();
        self.pending_send = None;
        self.guard.reset();
        self.scroll = AutoScrollController::new(&self.config);
        self.waiting_for_input = false;
        self.arrival_seq = 0;
    }

    fn accumulate_stream(&mut self, event: &FeedEvent, id: &str, delta: &str) -> String {
        match event {
            FeedEvent::StreamStart { .. } => {
                self.streams.insert(id.to_string(), delta.to_string());
                delta.to_string()
            }
            FeedEvent::StreamToken { .. } => {
                let buffer = self.streams.entry(id.to_string()).or_default();
                buffer.push_str(delta);
                buffer.clone()
            }
            FeedEvent::StreamEnd { .. } => {
                let mut text = self.streams.remove(id).unwrap_or_default();
                text.push_str(delta);
                text
            }
            _ => delta.to_string(),
        }
    }

    fn remerge(&mut self, newest_critical: bool, now: Now, effects: &mut Vec<SessionEffect>) {
        let merged = self.timeline.merge(&self.aggregator, now.wall);
        let appended = merged.len().saturating_sub(self.merged.len());
        self.merged = merged;
        if let Some(ScrollCommand::ToBottom) =
            self.scroll
                .on_timeline_mutated(appended, newest_critical, now.mono)
        {
            effects.push(SessionEffect::ScrollToBottom);
        }
    }
}
