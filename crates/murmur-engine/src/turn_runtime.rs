//! One locked turn: profile loading, action parsing, bot enablement, story
//! resolution and handler invocation.
//!
//! Runs entirely under the user's lock; nothing here needs synchronization.
//! The dispatch controller owns everything around it (locking, persistence,
//! outbound delivery, error replies).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use murmur_contract::{Action, ActionKind, ChannelAdapter, Translator};
use murmur_dialog::{
    Dialog, DialogStateMachine, Story, StoryDefinitionRegistry, StoryTag, UserTimeline,
    UNKNOWN_INTENT,
};
use murmur_nlp::NlpPipeline;
use tracing::{debug, warn};

use crate::dispatch_runtime::EventListener;
use crate::message_bus::{BotBus, OutboundRecord};
use crate::story_catalog::StoryHandlerRegistry;

/// Choice parameter carrying the intent that produced the choice screen.
pub const PREVIOUS_INTENT_PARAMETER: &str = "_previous_intent";

pub(crate) struct TurnEnv<'a> {
    pub definitions: &'a Arc<dyn StoryDefinitionRegistry>,
    pub handlers: &'a Arc<dyn StoryHandlerRegistry>,
    pub pipeline: &'a NlpPipeline,
    pub translator: &'a Arc<dyn Translator>,
    pub adapter: &'a Arc<dyn ChannelAdapter>,
    pub events: &'a Arc<dyn EventListener>,
}

pub(crate) struct TurnReport {
    pub outbox: Vec<OutboundRecord>,
    pub save_timeline: bool,
    pub handler_result: Result<()>,
}

pub(crate) async fn run_turn(
    env: &TurnEnv<'_>,
    timeline: &mut UserTimeline,
    inbound: &Action,
) -> TurnReport {
    load_profile_if_needed(env, timeline).await;
    ensure_dialog(timeline, inbound);
    let dialog_index = timeline.dialogs.len() - 1;

    let mut action = inbound.clone();
    parse_action(env, timeline, dialog_index, &mut action).await;
    if apply_bot_enablement(env.definitions.as_ref(), timeline, dialog_index) {
        env.events.bot_enabled(&action);
    }

    // A bot-initiated notification reaching a disabled user leaves no trace.
    let save_timeline = !(timeline.user_state.bot_disabled && action.is_notification());

    if timeline.user_state.bot_disabled {
        debug!("bot is disabled, recording the action without handling it");
        let machine = DialogStateMachine::new(env.definitions.as_ref());
        machine.apply(&mut timeline.dialogs[dialog_index], &action);
        return TurnReport {
            outbox: Vec::new(),
            save_timeline,
            handler_result: Ok(()),
        };
    }

    if let Err(typing_error) = env.adapter.start_typing(&action).await {
        debug!(error = %typing_error, "start_typing failed");
    }

    let machine = DialogStateMachine::new(env.definitions.as_ref());
    let story_index = machine.apply(&mut timeline.dialogs[dialog_index], &action);
    let story_id = timeline.dialogs[dialog_index].stories[story_index]
        .definition_id()
        .to_string();

    if env.definitions.report_unknown_sentences() && story_id == env.definitions.unknown_story().id
    {
        if let Some(text) = action.text().map(str::trim).filter(|text| !text.is_empty()) {
            env.pipeline.report_unknown(text, &timeline.preferences.locale);
        }
    }

    let handler = env.handlers.handler_for(&story_id);
    let mut bus = BotBus::new(
        env.definitions.as_ref(),
        env.handlers.as_ref(),
        env.translator.as_ref(),
        timeline,
        dialog_index,
        story_index,
        &action,
    );
    let handler_result = match handler {
        Some(handler) => handler.handle(&mut bus),
        None => Err(anyhow!("no handler registered for story '{story_id}'")),
    };
    let outbox = bus.finish();

    TurnReport {
        outbox,
        save_timeline,
        handler_result,
    }
}

async fn load_profile_if_needed(env: &TurnEnv<'_>, timeline: &mut UserTimeline) {
    if !timeline.user_state.profile_loaded {
        match env.adapter.load_profile(&timeline.player_id).await {
            Ok(Some(preferences)) => {
                timeline.user_state.profile_loaded = true;
                timeline.user_state.profile_refreshed = true;
                timeline.preferences.fill_with(&preferences);
            }
            Ok(None) => {}
            Err(profile_error) => debug!(error = %profile_error, "profile load failed"),
        }
    } else if !timeline.user_state.profile_refreshed {
        timeline.user_state.profile_refreshed = true;
        match env.adapter.refresh_profile(&timeline.player_id).await {
            Ok(Some(preferences)) => timeline.preferences.refresh_with(&preferences),
            Ok(None) => {}
            Err(profile_error) => debug!(error = %profile_error, "profile refresh failed"),
        }
    }
}

fn ensure_dialog(timeline: &mut UserTimeline, action: &Action) {
    if timeline.current_dialog().is_none() {
        let participants = BTreeSet::from([action.user_id.clone(), action.recipient_id.clone()]);
        timeline.dialogs.push(Dialog::new(participants));
    }
}

async fn parse_action(
    env: &TurnEnv<'_>,
    timeline: &mut UserTimeline,
    dialog_index: usize,
    action: &mut Action,
) {
    let UserTimeline {
        preferences,
        user_state,
        dialogs,
        ..
    } = timeline;
    let dialog = &mut dialogs[dialog_index];

    if matches!(action.kind, ActionKind::Sentence { .. }) {
        if !action.has_empty_text() {
            env.pipeline
                .parse_sentence(action, preferences, user_state.bot_disabled, dialog)
                .await;
        }
    } else {
        match &action.kind {
            ActionKind::Choice { intent, parameters } => {
                parse_choice(env.definitions.as_ref(), dialog, intent, parameters);
            }
            ActionKind::Attachment { .. } => {
                if let Some(definition) = env.definitions.attachment_story() {
                    dialog.state.current_intent = Some(definition.main_intent);
                }
            }
            ActionKind::Location { .. } => {
                if let Some(definition) = env.definitions.location_story() {
                    dialog.state.current_intent = Some(definition.main_intent);
                }
            }
            ActionKind::Custom { .. } => {
                warn!("custom action kind is not parsed");
            }
            ActionKind::Sentence { .. } => unreachable!("handled above"),
        }
    }

    // The qualifiers applied to this parse never outlive it.
    dialog.state.next_action_state = None;
}

/// Restores the intent carried by a choice, creating an intermediate story
/// when the choice references a secondary intent of an earlier story that
/// the current story does not support.
fn parse_choice(
    definitions: &dyn StoryDefinitionRegistry,
    dialog: &mut Dialog,
    intent: &str,
    parameters: &BTreeMap<String, String>,
) {
    if intent != UNKNOWN_INTENT {
        if let Some(previous_intent) = parameters.get(PREVIOUS_INTENT_PARAMETER) {
            let previous_story = definitions.find_story_definition(previous_intent);
            let unknown_id = definitions.unknown_story().id;
            if previous_story.id != unknown_id && previous_story.declares_intent(intent) {
                let direct = definitions.find_story_definition(intent);
                if direct.id == unknown_id {
                    let covered = dialog
                        .current_story()
                        .map(|story| {
                            story.definition.declares_intent(intent)
                                && story.definition.declares_intent(previous_intent)
                        })
                        .unwrap_or(false);
                    if !covered {
                        dialog
                            .stories
                            .push(Story::new(previous_story, intent.to_string(), None));
                    }
                }
            }
        }
    }
    dialog.state.current_intent = Some(intent.to_string());
}

/// Evaluates enable/disable stories before any handler runs, so a disable
/// takes effect on the very turn that triggered it. Returns whether the bot
/// was re-enabled by this turn.
fn apply_bot_enablement(
    definitions: &dyn StoryDefinitionRegistry,
    timeline: &mut UserTimeline,
    dialog_index: usize,
) -> bool {
    let Some(intent) = timeline.dialogs[dialog_index].state.current_intent.clone() else {
        return false;
    };
    let definition = definitions.find_story_definition(&intent);
    if timeline.user_state.bot_disabled && definition.has_tag(StoryTag::EnableBot) {
        debug!(intent = intent.as_str(), "enabling bot");
        timeline.user_state.bot_disabled = false;
        return true;
    }
    if !timeline.user_state.bot_disabled && definition.has_tag(StoryTag::DisableBot) {
        debug!(intent = intent.as_str(), "disabling bot");
        timeline.user_state.bot_disabled = true;
    }
    false
}
