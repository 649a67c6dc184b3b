//! Dialog session state: current intent, entity map, context values and
//! next-action qualifiers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use murmur_core::{current_unix_timestamp_ms, mint_id};
use murmur_contract::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity_state::{EntityStateValue, EntityValue};
use crate::story_model::Story;

/// Fallback intent routed to the unknown story.
pub const UNKNOWN_INTENT: &str = "unknown";

/// Starting value of the ask-again round counter.
pub const DEFAULT_ASK_AGAIN_ROUND: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Restricts the next NLU call to a weighted subset of intents.
pub struct IntentQualifier {
    pub intent: String,
    pub modifier: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Qualifies the expected next user action, set by story handlers.
pub struct NextUserActionState {
    #[serde(default)]
    pub reference_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reference_timezone: Option<String>,
    /// Active state qualifiers forwarded to the NLU call.
    #[serde(default)]
    pub states: BTreeSet<String>,
    #[serde(default)]
    pub intent_qualifiers: Vec<IntentQualifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `DialogState` used across Murmur components.
pub struct DialogState {
    #[serde(default)]
    pub current_intent: Option<String>,
    #[serde(default)]
    pub entity_values: BTreeMap<String, EntityStateValue>,
    /// Persistent context values, kept across turns until reset.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Cleared after every parse, whatever the outcome.
    #[serde(default)]
    pub next_action_state: Option<NextUserActionState>,
    #[serde(default = "default_ask_again_round")]
    pub ask_again_round: u32,
    #[serde(default)]
    pub ask_again_in_progress: bool,
}

fn default_ask_again_round() -> u32 {
    DEFAULT_ASK_AGAIN_ROUND
}

impl Default for DialogState {
    fn default() -> Self {
        Self {
            current_intent: None,
            entity_values: BTreeMap::new(),
            context: BTreeMap::new(),
            next_action_state: None,
            ask_again_round: DEFAULT_ASK_AGAIN_ROUND,
            ask_again_in_progress: false,
        }
    }
}

impl DialogState {
    /// Updates the retained value for a role, preserving history when the
    /// role already holds state.
    pub fn change_value(
        &mut self,
        role: &str,
        new_value: Option<EntityValue>,
        action_id: Option<&str>,
    ) {
        match self.entity_values.get_mut(role) {
            Some(existing) => existing.change_value(new_value, action_id),
            None => {
                self.entity_values
                    .insert(role.to_string(), EntityStateValue::new(new_value, action_id));
            }
        }
    }

    pub fn reset_value(&mut self, role: &str) {
        if let Some(existing) = self.entity_values.get_mut(role) {
            existing.change_value(None, None);
        }
    }

    pub fn reset_all_entity_values(&mut self) {
        let roles: Vec<String> = self.entity_values.keys().cloned().collect();
        for role in roles {
            self.reset_value(&role);
        }
    }

    /// Resets entity values, context and next-action qualifiers while keeping
    /// entity history.
    pub fn reset_state(&mut self) {
        self.reset_all_entity_values();
        self.context.clear();
        self.next_action_state = None;
    }

    pub fn set_context_value(&mut self, name: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.context.insert(name.to_string(), value);
            }
            None => {
                self.context.remove(name);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `Dialog` used across Murmur components.
pub struct Dialog {
    pub id: String,
    pub participant_ids: BTreeSet<UserId>,
    pub state: DialogState,
    /// Append-only conversation history; stories are never removed.
    pub stories: Vec<Story>,
    pub last_update_unix_ms: u64,
}

impl Dialog {
    pub fn new(participant_ids: BTreeSet<UserId>) -> Self {
        Self {
            id: mint_id("dlg"),
            participant_ids,
            state: DialogState::default(),
            stories: Vec::new(),
            last_update_unix_ms: current_unix_timestamp_ms(),
        }
    }

    pub fn current_story(&self) -> Option<&Story> {
        self.stories.last()
    }

    pub fn current_story_mut(&mut self) -> Option<&mut Story> {
        self.stories.last_mut()
    }

    pub fn touch(&mut self) {
        self.last_update_unix_ms = current_unix_timestamp_ms();
    }
}
