//! Story and step resolution for one turn.
//!
//! The state machine owns the single mutation point of the story stack: a new
//! story is pushed only when the resolved intent maps to a different
//! definition than the one on top. Everything it needs from the configured
//! story set goes through [`StoryDefinitionRegistry`].

use murmur_contract::Action;
use tracing::debug;

use crate::dialog_model::{Dialog, DEFAULT_ASK_AGAIN_ROUND, UNKNOWN_INTENT};
use crate::story_model::Story;
use crate::story_registry::{StoryDefinition, StoryDefinitionRegistry, StoryTag};

/// Public struct `DialogStateMachine` used across Murmur components.
pub struct DialogStateMachine<'a> {
    registry: &'a dyn StoryDefinitionRegistry,
}

impl<'a> DialogStateMachine<'a> {
    pub fn new(registry: &'a dyn StoryDefinitionRegistry) -> Self {
        Self { registry }
    }

    /// Applies the turn's resolved intent (already written into
    /// `dialog.state.current_intent` by the NLU stage) to the story stack,
    /// records the inbound action into the active story, and returns the
    /// index of that story.
    pub fn apply(&self, dialog: &mut Dialog, action: &Action) -> usize {
        let resolved_intent = dialog
            .state
            .current_intent
            .clone()
            .unwrap_or_else(|| UNKNOWN_INTENT.to_string());

        let keep = dialog
            .current_story()
            .map(|story| {
                story.definition.supports_intent(&resolved_intent)
                    || story.step_supports_intent(&resolved_intent)
            })
            .unwrap_or(false);

        if keep {
            if let Some(story) = dialog.current_story_mut() {
                story.compute_current_step(Some(&resolved_intent));
            }
        } else {
            let definition = self.registry.find_story_definition(&resolved_intent);
            debug!(
                intent = resolved_intent.as_str(),
                story = definition.id.as_str(),
                "resolving new story"
            );
            self.push_if_different(dialog, definition, &resolved_intent);
        }

        let index = dialog.stories.len().saturating_sub(1);
        let mut recorded = action.clone();
        recorded.metadata.intent = dialog.state.current_intent.clone();
        recorded.metadata.step = dialog.stories[index].current_step.clone();
        dialog.stories[index].record_action(recorded);
        dialog.touch();
        index
    }

    /// Programmatic story switch, usable from within a handler. Idempotent
    /// against the current top of stack: switching twice to the same target
    /// pushes exactly one story.
    pub fn switch_story(
        &self,
        dialog: &mut Dialog,
        target: &StoryDefinition,
        starting_intent: Option<&str>,
    ) -> usize {
        let starter = starting_intent
            .unwrap_or(target.main_intent.as_str())
            .to_string();
        let already_on_top = dialog
            .current_story()
            .map(|story| story.definition_id() == target.id)
            .unwrap_or(false);
        if !already_on_top {
            let kept_step = dialog
                .current_story()
                .and_then(Story::selected_step)
                .filter(|step| {
                    step.intent
                        .as_deref()
                        .map(|intent| target.declares_intent(intent))
                        .unwrap_or(false)
                })
                .map(|step| step.name.clone());
            self.note_ask_again_transition(dialog);
            dialog.stories.push(Story::new(target.clone(), starter.clone(), kept_step));
        }
        dialog.state.current_intent = Some(starter);
        dialog.touch();
        dialog.stories.len() - 1
    }

    fn push_if_different(
        &self,
        dialog: &mut Dialog,
        definition: StoryDefinition,
        resolved_intent: &str,
    ) {
        let differs = dialog
            .current_story()
            .map(|story| story.definition_id() != definition.id)
            .unwrap_or(true);
        if !differs {
            // Same definition on top; reuse it and re-evaluate the step.
            if let Some(story) = dialog.current_story_mut() {
                story.compute_current_step(Some(resolved_intent));
            }
            return;
        }

        let starter = if definition.is_starter_intent(resolved_intent) {
            resolved_intent.to_string()
        } else {
            definition.main_intent.clone()
        };
        self.note_ask_again_transition(dialog);
        dialog.stories.push(Story::new(definition, starter, None));
    }

    /// Ask-again bookkeeping, evaluated when the top of stack is replaced:
    /// leaving an ask-again-tagged story keeps the loop alive and bumps the
    /// round counter; leaving any other story resets both.
    fn note_ask_again_transition(&self, dialog: &mut Dialog) {
        let previous_asks_again = dialog
            .current_story()
            .map(|story| story.definition.has_tag(StoryTag::AskAgain))
            .unwrap_or(false);
        if previous_asks_again {
            dialog.state.ask_again_round = dialog.state.ask_again_round.saturating_add(1);
            dialog.state.ask_again_in_progress = true;
        } else {
            dialog.state.ask_again_round = DEFAULT_ASK_AGAIN_ROUND;
            dialog.state.ask_again_in_progress = false;
        }
    }
}
