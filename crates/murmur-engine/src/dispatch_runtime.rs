//! Per-user locked dispatch loop.
//!
//! `handle` is the engine's single entrypoint: it serializes turns per user
//! behind the lock, retries contention on a bounded schedule instead of
//! blocking, converts every turn failure into an in-channel error reply, and
//! guarantees the lock is released whatever happened in between.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use murmur_contract::{
    Action, ChannelAdapter, ErrorActionFactory, NoopTurnCallback, Translator, TurnCallback,
    UserLock,
};
use murmur_dialog::{StoryDefinitionRegistry, TimelineStore, UserTimeline};
use murmur_nlp::NlpPipeline;
use tracing::{debug, error, warn};

use crate::engine_config::DispatchConfig;
use crate::story_catalog::StoryHandlerRegistry;
use crate::turn_runtime::{run_turn, TurnEnv};

/// Embeddable hooks for the application hosting the engine.
///
/// `listen` is consulted before dispatch; a listener that consumes the event
/// ends the turn without touching any state. `bot_enabled` is notified when
/// an enable-tagged story re-enables a disabled bot.
pub trait EventListener: Send + Sync {
    fn listen(&self, _action: &Action) -> bool {
        false
    }

    fn bot_enabled(&self, _action: &Action) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventListener;

impl EventListener for NoopEventListener {}

#[derive(Clone)]
/// Channel-side collaborators for one inbound event.
pub struct ChannelContext {
    pub adapter: Arc<dyn ChannelAdapter>,
    pub callback: Arc<dyn TurnCallback>,
}

impl ChannelContext {
    pub fn new(adapter: Arc<dyn ChannelAdapter>) -> Self {
        Self {
            adapter,
            callback: Arc::new(NoopTurnCallback),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn TurnCallback>) -> Self {
        self.callback = callback;
        self
    }
}

/// Public struct `DispatchController` used across Murmur components.
pub struct DispatchController {
    config: DispatchConfig,
    user_lock: Arc<dyn UserLock>,
    timeline_store: Arc<dyn TimelineStore>,
    pipeline: Arc<NlpPipeline>,
    definitions: Arc<dyn StoryDefinitionRegistry>,
    handlers: Arc<dyn StoryHandlerRegistry>,
    translator: Arc<dyn Translator>,
    error_actions: Arc<dyn ErrorActionFactory>,
    event_listener: Arc<dyn EventListener>,
}

impl DispatchController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DispatchConfig,
        user_lock: Arc<dyn UserLock>,
        timeline_store: Arc<dyn TimelineStore>,
        pipeline: Arc<NlpPipeline>,
        definitions: Arc<dyn StoryDefinitionRegistry>,
        handlers: Arc<dyn StoryHandlerRegistry>,
        translator: Arc<dyn Translator>,
        error_actions: Arc<dyn ErrorActionFactory>,
    ) -> Self {
        Self {
            config,
            user_lock,
            timeline_store,
            pipeline,
            definitions,
            handlers,
            translator,
            error_actions,
            event_listener: Arc::new(NoopEventListener),
        }
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.event_listener = listener;
        self
    }

    /// Handles one inbound action end to end.
    ///
    /// Lock contention is retried on a bounded schedule; exhausting the
    /// attempts is a deliberate skip, reported through the callback, with no
    /// timeline mutation and nothing sent.
    pub async fn handle(&self, action: Action, context: ChannelContext) {
        if self.event_listener.listen(&action) {
            context.callback.event_answered(&action);
            return;
        }

        let user_id = action.user_id.clone();
        let max_attempts = self.config.max_lock_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            if self.user_lock.try_lock(&user_id) {
                break;
            }
            if attempt >= max_attempts {
                debug!(
                    user = %user_id,
                    attempts = attempt,
                    "user still locked, skipping event"
                );
                context.callback.event_skipped(&action);
                return;
            }
            attempt += 1;
            debug!(user = %user_id, "user locked, scheduling retry");
            tokio::time::sleep(self.config.lock_retry_delay).await;
        }

        context.callback.user_locked(&action);
        let outcome = self.locked_turn(&action, &context).await;
        if let Err(turn_error) = outcome {
            error!(error = %turn_error, "turn failed, answering with error action");
            context.callback.error_thrown(&action, &turn_error);
            let error_action = self.error_actions.error_action_for(&action);
            self.deliver(&context, &action, error_action, 0).await;
        }
        self.user_lock.release(&user_id);
        context.callback.lock_released(&action);
    }

    async fn locked_turn(&self, action: &Action, context: &ChannelContext) -> Result<()> {
        let mut timeline = self
            .timeline_store
            .load(&action.user_id)
            .await
            .context("failed to load user timeline")?
            .unwrap_or_else(|| UserTimeline::new(action.user_id.clone()));

        let env = TurnEnv {
            definitions: &self.definitions,
            handlers: &self.handlers,
            pipeline: self.pipeline.as_ref(),
            translator: &self.translator,
            adapter: &context.adapter,
            events: &self.event_listener,
        };
        let report = run_turn(&env, &mut timeline, action).await;

        // Replies queued before a handler failure are still delivered; the
        // error action, if any, follows them.
        for record in report.outbox {
            self.deliver(context, action, record.action, record.delay_ms)
                .await;
        }

        if report.save_timeline {
            if let Err(save_error) = self.timeline_store.save(&timeline).await {
                warn!(error = %save_error, "failed to save user timeline");
            }
        } else {
            debug!(user = %action.user_id, "timeline not persisted for this turn");
        }

        report.handler_result
    }

    /// Sends one outbound action. Synchronous channels are awaited in-turn;
    /// asynchronous channels get a worker task, scheduled after the delay
    /// when one is set, without blocking the caller.
    async fn deliver(
        &self,
        context: &ChannelContext,
        inbound: &Action,
        outbound: Action,
        delay_ms: u64,
    ) {
        let last_answer = outbound.metadata.last_answer;
        if context.adapter.synchronous() {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            if let Err(send_error) = context.adapter.send(outbound).await {
                error!(error = %send_error, "channel send failed");
            }
            if last_answer {
                context.callback.event_answered(inbound);
            }
        } else {
            let adapter = Arc::clone(&context.adapter);
            let callback = Arc::clone(&context.callback);
            let inbound = inbound.clone();
            tokio::spawn(async move {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                if let Err(send_error) = adapter.send(outbound).await {
                    error!(error = %send_error, "channel send failed");
                }
                if last_answer {
                    callback.event_answered(&inbound);
                }
            });
        }
    }
}
