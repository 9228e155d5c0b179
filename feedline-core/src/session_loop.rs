//! Cooperative driver around a [`FeedSession`].
//!
//! One loop owns the session. External trigger sources (transport, render
//! surface, input widgets) feed [`SessionInput`]s through a channel; effects
//! flow back out on another. Outbound conversation sends are spawned and
//! their completions re-enter the loop, so reactions never interleave.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use feedline_protocol::ConversationSendRequest;
use feedline_protocol::ConversationSendResponse;
use feedline_protocol::FeedEvent;
use feedline_protocol::PromptAnswer;
use feedline_protocol::SendError;
use tokio::sync::mpsc;

use crate::scroll::ViewportMetrics;
use crate::session::FeedSession;
use crate::session::Now;
use crate::session::SessionEffect;

/// Everything that can wake the session.
#[derive(Debug)]
pub enum SessionInput {
    Event(FeedEvent),
    Viewport(ViewportMetrics),
    Submit(String),
    Choice(usize),
    JumpToBottom,
    Dismiss(String),
    TogglePin(String),
    Reset { batch_id: String },
    Shutdown,
}

/// Outbound conversation send API, implemented by the embedding transport.
#[async_trait::async_trait]
pub trait ConversationSender: Send + Sync {
    async fn send_conversation(
        &self,
        request: ConversationSendRequest,
    ) -> Result<ConversationSendResponse, SendError>;
}

/// Synchronous prompt-answer delivery, implemented externally.
pub trait PromptResponder: Send + Sync {
    fn send_prompt_response(&self, answer: &PromptAnswer) -> bool;
}

pub struct SessionLoop {
    session: FeedSession,
    inputs: mpsc::Receiver<SessionInput>,
    effects: mpsc::Sender<SessionEffect>,
    sender: Arc<dyn ConversationSender>,
    responder: Arc<dyn PromptResponder>,
}

impl SessionLoop {
    pub fn new(
        session: FeedSession,
        inputs: mpsc::Receiver<SessionInput>,
        effects: mpsc::Sender<SessionEffect>,
        sender: Arc<dyn ConversationSender>,
        responder: Arc<dyn PromptResponder>,
    ) -> Self {
        Self {
            session,
            inputs,
            effects,
            sender,
            responder,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let (done_tx, mut done_rx) =
            mpsc::channel::<Result<ConversationSendResponse, SendError>>(8);
        loop {
            let deadline = self.session.next_deadline();
            tokio::select! {
                input = self.inputs.recv() => {
                    let Some(input) = input else { break };
                    if matches!(input, SessionInput::Shutdown) {
                        tracing::info!("[feed] session loop shutting down");
                        break;
                    }
                    let effects = self.react(input);
                    self.apply(effects, &done_tx).await;
                }
                Some(result) = done_rx.recv() => {
                    let effects = self
                        .session
                        .on_conversation_send_result(result, Now::system());
                    self.apply(effects, &done_tx).await;
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    let effects = self.session.tick(Now::system());
                    self.apply(effects, &done_tx).await;
                }
            }
        }
        Ok(())
    }

    fn react(&mut self, input: SessionInput) -> Vec<SessionEffect> {
        let now = Now::system();
        match input {
            SessionInput::Event(event) => self.session.handle_event(&event, now),
            SessionInput::Viewport(metrics) => {
                self.session.handle_viewport_scroll(metrics, now);
                Vec::new()
            }
            SessionInput::Submit(text) => self.session.submit_draft(&text, now),
            SessionInput::Choice(index) => self.session.submit_choice(index, now),
            SessionInput::JumpToBottom => self.session.jump_to_bottom(now),
            SessionInput::Dismiss(id) => self.session.dismiss(&id, now),
            SessionInput::TogglePin(id) => self.session.toggle_pin(&id, now),
            SessionInput::Reset { batch_id } => {
                self.session.reset(&batch_id);
                Vec::new()
            }
            SessionInput::Shutdown => Vec::new(),
        }
    }

    async fn apply(
        &mut self,
        effects: Vec<SessionEffect>,
        done_tx: &mpsc::Sender<Result<ConversationSendResponse, SendError>>,
    ) {
        let mut queue: VecDeque<SessionEffect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                SessionEffect::SendConversation(request) => {
                    let sender = Arc::clone(&self.sender);
                    let done = done_tx.clone();
                    tokio::spawn(async move {
                        let result = sender.send_conversation(request).await;
                        let _ = done.send(result).await;
                    });
                }
                SessionEffect::SendPromptResponse(answer) => {
                    // Synchronous per the external API; the result re-enters
                    // the session in the same reaction.
                    let delivered = self.responder.send_prompt_response(&answer);
                    queue.extend(self.session.on_prompt_send_result(delivered, Now::system()));
                }
                other => {
                    if self.effects.send(other).await.is_err() {
                        tracing::warn!("[feed] effect receiver dropped");
                    }
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    let target = deadline.unwrap_or_else(Instant::now);
    tokio::time::sleep_until(tokio::time::Instant::from_std(target)).await;
}
