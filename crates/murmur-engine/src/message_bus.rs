//! Per-turn message bus handed to story handlers.
//!
//! One bus instance exists per locked turn. Replies queue up with a running
//! cumulative delay so multiple answers within one turn keep their spacing;
//! the dispatch controller flushes the queue through the channel adapter
//! after the handler returns. Everything on the bus is scoped to the turn:
//! metadata applied to the next action, unflushed connector messages, and
//! the non-persistent context map all die with it.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use murmur_contract::{
    Action, ActionKind, ActionNotificationType, ActionPriority, ActionVisibility, ChannelType,
    Translator, UserPreferences,
};
use murmur_dialog::{
    Dialog, DialogStateMachine, EntityValue, NextUserActionState, Story, StoryDefinition,
    StoryDefinitionRegistry, UserTimeline,
};
use serde_json::Value;
use tracing::warn;

use crate::story_catalog::StoryHandlerRegistry;

#[derive(Debug, Clone, PartialEq)]
/// One outbound action with the cumulative delay captured at send time.
pub struct OutboundRecord {
    pub action: Action,
    pub delay_ms: u64,
}

/// Public struct `BotBus` used across Murmur components.
pub struct BotBus<'a> {
    definitions: &'a dyn StoryDefinitionRegistry,
    handlers: &'a dyn StoryHandlerRegistry,
    translator: &'a dyn Translator,
    timeline: &'a mut UserTimeline,
    dialog_index: usize,
    story_index: usize,
    inbound: &'a Action,
    current_delay_ms: u64,
    answer_index: usize,
    next_priority: Option<ActionPriority>,
    next_visibility: Option<ActionVisibility>,
    next_notification: Option<ActionNotificationType>,
    pending_connector_messages: BTreeMap<String, Value>,
    bus_context: BTreeMap<String, Value>,
    outbox: Vec<OutboundRecord>,
    switch_in_progress: bool,
}

impl<'a> BotBus<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        definitions: &'a dyn StoryDefinitionRegistry,
        handlers: &'a dyn StoryHandlerRegistry,
        translator: &'a dyn Translator,
        timeline: &'a mut UserTimeline,
        dialog_index: usize,
        story_index: usize,
        inbound: &'a Action,
    ) -> Self {
        Self {
            definitions,
            handlers,
            translator,
            timeline,
            dialog_index,
            story_index,
            inbound,
            current_delay_ms: 0,
            answer_index: 0,
            next_priority: None,
            next_visibility: None,
            next_notification: None,
            pending_connector_messages: BTreeMap::new(),
            bus_context: BTreeMap::new(),
            outbox: Vec::new(),
            switch_in_progress: false,
        }
    }

    // accessors

    pub fn dialog(&self) -> &Dialog {
        &self.timeline.dialogs[self.dialog_index]
    }

    fn dialog_mut(&mut self) -> &mut Dialog {
        &mut self.timeline.dialogs[self.dialog_index]
    }

    pub fn story(&self) -> &Story {
        &self.dialog().stories[self.story_index]
    }

    pub fn preferences(&self) -> &UserPreferences {
        &self.timeline.preferences
    }

    pub fn inbound_action(&self) -> &Action {
        self.inbound
    }

    /// The text sent by the user, if any.
    pub fn user_text(&self) -> Option<&str> {
        self.inbound.text().map(str::trim)
    }

    pub fn intent(&self) -> Option<&str> {
        self.dialog().state.current_intent.as_deref()
    }

    pub fn is_intent(&self, intent: &str) -> bool {
        self.intent() == Some(intent)
    }

    pub fn step(&self) -> Option<&str> {
        self.story().current_step.as_deref()
    }

    pub fn set_step(&mut self, step: Option<String>) {
        let story_index = self.story_index;
        self.dialog_mut().stories[story_index].current_step = step;
    }

    pub fn ask_again_round(&self) -> u32 {
        self.dialog().state.ask_again_round
    }

    pub fn ask_again_in_progress(&self) -> bool {
        self.dialog().state.ask_again_in_progress
    }

    pub fn switch_in_progress(&self) -> bool {
        self.switch_in_progress
    }

    // entity and context state

    pub fn entity_value(&self, role: &str) -> Option<&EntityValue> {
        self.dialog()
            .state
            .entity_values
            .get(role)
            .and_then(|state| state.value.as_ref())
    }

    pub fn entity_text(&self, role: &str) -> Option<&str> {
        self.entity_value(role).and_then(|value| value.content.as_deref())
    }

    pub fn change_entity_value(&mut self, role: &str, value: Option<EntityValue>) {
        let action_id = self.inbound.id.clone();
        self.dialog_mut()
            .state
            .change_value(role, value, Some(&action_id));
    }

    pub fn remove_entity_value(&mut self, role: &str) {
        self.dialog_mut().state.reset_value(role);
    }

    pub fn remove_all_entity_values(&mut self) {
        self.dialog_mut().state.reset_all_entity_values();
    }

    /// Resets entity values, context and next-action qualifiers while
    /// keeping entity history.
    pub fn reset_dialog_state(&mut self) {
        self.dialog_mut().state.reset_state();
    }

    /// Persistent context value, kept across turns.
    pub fn context_value(&self, name: &str) -> Option<&Value> {
        self.dialog().state.context.get(name)
    }

    pub fn change_context_value(&mut self, name: &str, value: Option<Value>) {
        self.dialog_mut().state.set_context_value(name, value);
    }

    /// Non-persistent context value, scoped to this turn only.
    pub fn bus_context_value(&self, name: &str) -> Option<&Value> {
        self.bus_context.get(name)
    }

    pub fn set_bus_context_value(&mut self, name: impl Into<String>, value: Option<Value>) {
        match value {
            Some(value) => {
                self.bus_context.insert(name.into(), value);
            }
            None => {
                self.bus_context.remove(&name.into());
            }
        }
    }

    /// Qualifies the next user action for the NLU call of the next turn.
    pub fn set_next_action_state(&mut self, state: Option<NextUserActionState>) {
        self.dialog_mut().state.next_action_state = state;
    }

    // outbound metadata applied to the next action

    pub fn with_priority(&mut self, priority: ActionPriority) -> &mut Self {
        self.next_priority = Some(priority);
        self
    }

    pub fn with_visibility(&mut self, visibility: ActionVisibility) -> &mut Self {
        self.next_visibility = Some(visibility);
        self
    }

    pub fn with_notification_type(&mut self, notification: ActionNotificationType) -> &mut Self {
        self.next_notification = Some(notification);
        self
    }

    /// Attaches a channel-specific rich message to the next action sent to
    /// that channel. Replacing an unflushed attachment is reported.
    pub fn with_message(&mut self, channel_type: &ChannelType, message: Value) -> &mut Self {
        let replaced = self
            .pending_connector_messages
            .insert(channel_type.as_str().to_string(), message);
        if replaced.is_some() {
            warn!(
                channel = channel_type.as_str(),
                "replacing unflushed connector message"
            );
        }
        self
    }

    // sending

    /// Sends a translated answer.
    pub fn send_text(&mut self, text: impl Into<String>) -> &mut Self {
        let delay_ms = self.default_delay();
        self.send_text_with_delay(text, delay_ms)
    }

    pub fn send_text_with_delay(&mut self, text: impl Into<String>, delay_ms: u64) -> &mut Self {
        let translated = self.translate(&text.into());
        let action = self.reply_sentence(translated);
        self.enqueue(action, delay_ms, false);
        self
    }

    /// Sends text verbatim, bypassing translation.
    pub fn send_raw_text(&mut self, text: impl Into<String>) -> &mut Self {
        let delay_ms = self.default_delay();
        let action = self.reply_sentence(text.into());
        self.enqueue(action, delay_ms, false);
        self
    }

    /// Sends a translated answer and marks it as the last of the turn.
    pub fn end_text(&mut self, text: impl Into<String>) -> &mut Self {
        let delay_ms = self.default_delay();
        self.end_text_with_delay(text, delay_ms)
    }

    pub fn end_text_with_delay(&mut self, text: impl Into<String>, delay_ms: u64) -> &mut Self {
        let translated = self.translate(&text.into());
        let action = self.reply_sentence(translated);
        self.enqueue(action, delay_ms, true);
        self
    }

    pub fn end_raw_text(&mut self, text: impl Into<String>) -> &mut Self {
        let delay_ms = self.default_delay();
        let action = self.reply_sentence(text.into());
        self.enqueue(action, delay_ms, true);
        self
    }

    /// Sends a prebuilt action.
    pub fn send_action(&mut self, action: Action, delay_ms: u64) -> &mut Self {
        self.enqueue(action, delay_ms, false);
        self
    }

    /// Sends a prebuilt action and marks it as the last of the turn.
    pub fn end_action(&mut self, action: Action, delay_ms: u64) -> &mut Self {
        self.enqueue(action, delay_ms, true);
        self
    }

    // story switching

    /// Switches to the target story, pushing a new story instance unless the
    /// target is already on top of the stack. Leaves the switch marker set
    /// for the caller to react to.
    pub fn switch_story(&mut self, target: &StoryDefinition) {
        self.switch_story_with_intent(target, None);
    }

    pub fn switch_story_with_intent(
        &mut self,
        target: &StoryDefinition,
        starting_intent: Option<&str>,
    ) {
        let machine = DialogStateMachine::new(self.definitions);
        let dialog = &mut self.timeline.dialogs[self.dialog_index];
        self.story_index = machine.switch_story(dialog, target, starting_intent);
        self.switch_in_progress = true;
    }

    /// Switches to the target story and re-invokes its handler synchronously
    /// within this turn, clearing the switch marker when done.
    pub fn handle_and_switch_story(&mut self, target: &StoryDefinition) -> Result<()> {
        self.switch_story(target);
        let handler = self
            .handlers
            .handler_for(&target.id)
            .ok_or_else(|| anyhow!("no handler registered for story '{}'", target.id))?;
        let result = handler.handle(self);
        self.switch_in_progress = false;
        result
    }

    pub(crate) fn finish(self) -> Vec<OutboundRecord> {
        if !self.pending_connector_messages.is_empty() {
            warn!(
                channels = self.pending_connector_messages.len(),
                "connector messages attached but never flushed"
            );
        }
        self.outbox
    }

    fn default_delay(&self) -> u64 {
        self.definitions.default_delay_ms(self.answer_index)
    }

    fn translate(&self, text: &str) -> String {
        self.translator.translate(
            text,
            text,
            &self.timeline.preferences.locale,
            &self.inbound.channel_type,
        )
    }

    fn reply_sentence(&self, text: String) -> Action {
        Action::reply_to(
            self.inbound,
            ActionKind::Sentence {
                text: Some(text),
                precomputed_nlp: None,
            },
        )
    }

    fn enqueue(&mut self, mut action: Action, delay_ms: u64, last_answer: bool) {
        self.current_delay_ms = self.current_delay_ms.saturating_add(delay_ms);
        if let Some(priority) = self.next_priority.take() {
            action.metadata.priority = priority;
        }
        if let Some(visibility) = self.next_visibility.take() {
            action.metadata.visibility = visibility;
        }
        if let Some(notification) = self.next_notification.take() {
            action.metadata.notification = Some(notification);
        }
        if let Some(message) = self
            .pending_connector_messages
            .remove(action.channel_type.as_str())
        {
            action.metadata.connector_message = Some(message);
        }
        action.metadata.last_answer = last_answer;

        let story_index = self.story_index;
        let dialog = &mut self.timeline.dialogs[self.dialog_index];
        action.metadata.intent = dialog.state.current_intent.clone();
        action.metadata.step = dialog.stories[story_index].current_step.clone();
        dialog.stories[story_index].record_action(action.clone());
        dialog.touch();

        self.outbox.push(OutboundRecord {
            action,
            delay_ms: self.current_delay_ms,
        });
        self.answer_index += 1;
    }
}
