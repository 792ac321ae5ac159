use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::ContentGenerator;
use crate::clock::Clock;
use crate::cooldown::{CooldownTimer, DEFAULT_TICK};
use crate::error::{ChatError, Result};
use crate::governor::{Governor, GovernorStatus, SharedGovernor};
use crate::history::HistoryStore;
use crate::metrics::{PROMPTS_DENIED, PROMPTS_TOTAL};
use crate::models::{Message, Role};
use crate::rate_limit::{Decision, describe_duration, minutes_remaining};
use crate::worker::Dispatcher;

pub const PENDING_TEXT: &str = "Generating...";
pub const ERROR_TEXT: &str = "Failed to get response. Type /retry to try again.";
pub const EMPTY_REPLY_TEXT: &str = "No response.";

/// Shown when a send is refused by the rate limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyNotice {
    pub remaining: Duration,
    /// This attempt is the one that exhausted the quota.
    pub newly_blocked: bool,
    pub block: Duration,
}

impl fmt::Display for DenyNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.newly_blocked {
            write!(
                f,
                "You have reached the maximum number of messages. Please wait {}.",
                describe_duration(self.block)
            )
        } else {
            write!(
                f,
                "You have reached the message limit. Please try again in {} minutes.",
                minutes_remaining(self.remaining)
            )
        }
    }
}

/// Banner text for an active block.
pub fn block_banner(remaining: Duration) -> String {
    format!(
        "You are blocked. Try again in {} minutes.",
        minutes_remaining(remaining)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The pending entry became this reply.
    Replied(Message),
    /// The pending entry became this retryable error.
    Failed(Message),
    Denied(DenyNotice),
}

/// Message list plus everything needed to gate and dispatch a prompt.
///
/// Sends take `&mut self`, so a second prompt cannot start until the first
/// has resolved.
pub struct ChatSession {
    governor: SharedGovernor,
    cooldown: CooldownTimer,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    history: Box<dyn HistoryStore>,
    messages: Vec<Message>,
    next_id: u64,
    max_prompt_chars: usize,
}

pub struct SessionBuilder {
    governor: Governor,
    history: Box<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    max_prompt_chars: usize,
}

impl SessionBuilder {
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn max_prompt_chars(mut self, max: usize) -> Self {
        self.max_prompt_chars = max;
        self
    }

    /// Restore history, settle any persisted block and spawn the worker.
    pub async fn build<G: ContentGenerator>(self, generator: G) -> ChatSession {
        let now = self.clock.now_millis();
        let mut governor = self.governor;
        // a block that ran out while we were closed is cleared here
        let status = governor.release_if_lapsed(now);
        let governor = governor.shared();

        let messages = self.history.load().unwrap_or_else(|e| {
            warn!("Failed to load chat history: {}", e);
            Vec::new()
        });
        let next_id = messages.iter().map(|m| m.id).max().unwrap_or(0) + 1;

        let mut cooldown = CooldownTimer::new(self.tick, status);
        if let GovernorStatus::Blocked { remaining } = status {
            info!("Starting blocked, {:?} remaining", remaining);
            cooldown.start(governor.clone(), self.clock.clone());
        }

        ChatSession {
            governor,
            cooldown,
            clock: self.clock,
            dispatcher: Dispatcher::spawn(generator),
            history: self.history,
            messages,
            next_id,
            max_prompt_chars: self.max_prompt_chars,
        }
    }
}

impl ChatSession {
    pub fn builder(
        governor: Governor,
        history: Box<dyn HistoryStore>,
        clock: Arc<dyn Clock>,
    ) -> SessionBuilder {
        SessionBuilder {
            governor,
            history,
            clock,
            tick: DEFAULT_TICK,
            max_prompt_chars: crate::config::DEFAULT_MAX_PROMPT_CHARS,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn subscribe_status(&self) -> watch::Receiver<GovernorStatus> {
        self.cooldown.subscribe()
    }

    pub async fn status(&self) -> GovernorStatus {
        self.governor.lock().await.status(self.clock.now_millis())
    }

    fn next_message(&mut self, role: Role, content: impl Into<String>) -> Message {
        let msg = Message::new(self.next_id, role, content);
        self.next_id += 1;
        msg
    }

    fn persist(&mut self) {
        if let Err(e) = self.history.save(&self.messages) {
            warn!("Failed to save chat history: {}", e);
        }
    }

    fn validate_prompt<'a>(&self, prompt: &'a str) -> Result<&'a str> {
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyPrompt);
        }
        let len = trimmed.chars().count();
        if len > self.max_prompt_chars {
            return Err(ChatError::PromptTooLong {
                len,
                max: self.max_prompt_chars,
            });
        }
        Ok(trimmed)
    }

    /// Ask the governor; `Some` means the send must not go out.
    async fn admit(&mut self) -> Option<DenyNotice> {
        PROMPTS_TOTAL.inc();
        let now = self.clock.now_millis();
        let mut governor = self.governor.lock().await;
        let decision = governor.check(now);
        let block = governor.policy().block;
        let status = governor.status(now);
        drop(governor);
        self.cooldown.publish(status);

        let (blocked_until, newly_blocked) = match decision {
            Decision::StartWindow | Decision::Increment { .. } => return None,
            Decision::Deny { blocked_until } => (blocked_until, false),
            Decision::Block { blocked_until } => (blocked_until, true),
        };

        PROMPTS_DENIED.inc();
        self.cooldown
            .start(self.governor.clone(), self.clock.clone());
        Some(DenyNotice {
            remaining: Duration::from_millis(blocked_until.saturating_sub(now).max(0) as u64),
            newly_blocked,
            block,
        })
    }

    /// Gate, record and dispatch one prompt.
    pub async fn send(&mut self, prompt: &str) -> Result<SendOutcome> {
        let prompt = self.validate_prompt(prompt)?.to_string();

        if let Some(notice) = self.admit().await {
            info!("Send denied: {}", notice);
            return Ok(SendOutcome::Denied(notice));
        }

        let user = self.next_message(Role::User, prompt.clone());
        self.messages.push(user);
        Ok(self.dispatch(&prompt).await)
    }

    /// Drop the latest error entry and send the last prompt again. Goes
    /// through the governor like any other send.
    pub async fn retry(&mut self) -> Result<SendOutcome> {
        let error_idx = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Error)
            .ok_or(ChatError::NothingToRetry)?;
        let prompt = self.messages[..error_idx]
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .ok_or(ChatError::NothingToRetry)?;

        if let Some(notice) = self.admit().await {
            return Ok(SendOutcome::Denied(notice));
        }

        self.messages.remove(error_idx);
        Ok(self.dispatch(&prompt).await)
    }

    async fn dispatch(&mut self, prompt: &str) -> SendOutcome {
        let pending = self.next_message(Role::Pending, PENDING_TEXT);
        let pending_id = pending.id;
        self.messages.push(pending);
        self.persist();

        let result = self.dispatcher.dispatch(prompt).await;

        let (role, content) = match result {
            Ok(text) if text.trim().is_empty() => (Role::Ai, EMPTY_REPLY_TEXT.to_string()),
            Ok(text) => (Role::Ai, text),
            Err(e) => {
                warn!("Prompt failed: {}", e);
                (Role::Error, ERROR_TEXT.to_string())
            }
        };
        let entry = self.next_message(role, content);

        match self.messages.iter_mut().find(|m| m.id == pending_id) {
            Some(slot) => *slot = entry.clone(),
            None => self.messages.push(entry.clone()),
        }
        self.persist();

        match role {
            Role::Error => SendOutcome::Failed(entry),
            _ => SendOutcome::Replied(entry),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.messages.clear();
        self.history.clear()
    }
}
