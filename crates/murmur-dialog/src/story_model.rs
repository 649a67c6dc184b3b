//! One contiguous run of a dialogue topic within a dialog.

use murmur_contract::Action;
use serde::{Deserialize, Serialize};

use crate::story_registry::{StoryDefinition, StoryStep};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `Story` used across Murmur components.
pub struct Story {
    pub definition: StoryDefinition,
    /// The intent that started this story instance.
    pub starter_intent: String,
    #[serde(default)]
    pub current_step: Option<String>,
    /// Inbound and outbound actions exchanged while this story was active.
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Story {
    pub fn new(
        definition: StoryDefinition,
        starter_intent: impl Into<String>,
        current_step: Option<String>,
    ) -> Self {
        Self {
            definition,
            starter_intent: starter_intent.into(),
            current_step,
            actions: Vec::new(),
        }
    }

    pub fn definition_id(&self) -> &str {
        &self.definition.id
    }

    pub fn selected_step(&self) -> Option<&StoryStep> {
        self.current_step
            .as_deref()
            .and_then(|name| self.definition.step(name))
    }

    /// Whether the intent keeps the currently selected step selected.
    pub fn step_supports_intent(&self, intent: &str) -> bool {
        self.selected_step()
            .map(|step| step.secondary_intents.contains(intent))
            .unwrap_or(false)
    }

    /// Re-evaluates the selected step against the turn's resolved intent.
    ///
    /// Keeps the step when the intent is one of its secondary intents,
    /// selects the declared step matching the intent otherwise, and falls
    /// back to no step at all.
    pub fn compute_current_step(&mut self, resolved_intent: Option<&str>) {
        if let Some(intent) = resolved_intent {
            if self.step_supports_intent(intent) {
                return;
            }
            if let Some(step) = self.definition.find_step(intent) {
                self.current_step = Some(step.name.clone());
                return;
            }
        }
        self.current_step = None;
    }

    pub fn record_action(&mut self, action: Action) {
        self.actions.push(action);
    }
}
