//! Collaborator seams between the dispatch engine and the outside world.
//!
//! A channel adapter owns the wire protocol of one messaging surface; the
//! engine only sees the trait. The same goes for the per-user lock, the
//! error-action factory and the translation function. All implementations
//! must be safe for concurrent use: independent users dispatch in parallel.

use anyhow::Result;
use async_trait::async_trait;

use crate::action_contract::{Action, ActionKind, ChannelType};
use crate::user_contract::{UserId, UserPreferences};

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Synchronous channels expect the reply inside the inbound exchange;
    /// asynchronous channels tolerate scheduled, delayed delivery.
    fn synchronous(&self) -> bool {
        false
    }

    async fn send(&self, action: Action) -> Result<()>;

    /// Shows a typing indicator in answer to the given inbound action.
    async fn start_typing(&self, _action: &Action) -> Result<()> {
        Ok(())
    }

    async fn load_profile(&self, _user_id: &UserId) -> Result<Option<UserPreferences>> {
        Ok(None)
    }

    async fn refresh_profile(&self, _user_id: &UserId) -> Result<Option<UserPreferences>> {
        Ok(None)
    }
}

/// Per-turn lifecycle notifications, mirrored back to the channel adapter.
pub trait TurnCallback: Send + Sync {
    fn event_answered(&self, _action: &Action) {}
    fn event_skipped(&self, _action: &Action) {}
    fn user_locked(&self, _action: &Action) {}
    fn lock_released(&self, _action: &Action) {}
    fn error_thrown(&self, _action: &Action, _error: &anyhow::Error) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTurnCallback;

impl TurnCallback for NoopTurnCallback {}

/// Named mutual-exclusion primitive keyed by user id.
///
/// `try_lock` must never block; contention handling (bounded scheduled
/// retries) is the dispatch controller's job.
pub trait UserLock: Send + Sync {
    fn try_lock(&self, user_id: &UserId) -> bool;
    fn release(&self, user_id: &UserId);
}

/// Builds the in-channel error reply sent when a turn fails unexpectedly.
pub trait ErrorActionFactory: Send + Sync {
    fn error_action_for(&self, inbound: &Action) -> Action;
}

#[derive(Debug, Clone)]
/// Public struct `DefaultErrorActionFactory` used across Murmur components.
pub struct DefaultErrorActionFactory {
    pub message: String,
}

impl Default for DefaultErrorActionFactory {
    fn default() -> Self {
        Self {
            message: "Technical error :( sorry!".to_string(),
        }
    }
}

impl ErrorActionFactory for DefaultErrorActionFactory {
    fn error_action_for(&self, inbound: &Action) -> Action {
        let mut action = Action::reply_to(
            inbound,
            ActionKind::Sentence {
                text: Some(self.message.clone()),
                precomputed_nlp: None,
            },
        );
        action.metadata.last_answer = true;
        action
    }
}

/// Label translation for outbound text; storage and fallback rules live with
/// the embedding application.
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str, default_label: &str, locale: &str, channel_type: &ChannelType)
        -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTranslator;

impl Translator for NoopTranslator {
    fn translate(
        &self,
        _key: &str,
        default_label: &str,
        _locale: &str,
        _channel_type: &ChannelType,
    ) -> String {
        default_label.to_string()
    }
}
