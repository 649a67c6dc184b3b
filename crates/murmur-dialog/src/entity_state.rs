//! Entity values and their per-dialog retained state.
//!
//! An [`EntityValue`] is one observation of an entity in one user sentence.
//! An [`EntityStateValue`] is what the dialog retains for a role across
//! turns: the current value, the action that set it, and an append-only
//! history of superseded values. History is never pruned; it is bounded by
//! dialog lifetime only.

use murmur_core::current_unix_timestamp_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// An entity definition: a type plus the role it plays in a sentence.
pub struct Entity {
    pub entity_type: String,
    pub role: String,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            role: role.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `EntityValue` used across Murmur components.
pub struct EntityValue {
    pub entity: Entity,
    /// Evaluated value, opaque to the engine.
    #[serde(default)]
    pub value: Option<Value>,
    /// Raw text span content the value was evaluated from.
    #[serde(default)]
    pub content: Option<String>,
    /// Whether the remote merge call may combine this value with others.
    #[serde(default)]
    pub merge_support: bool,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub end: Option<usize>,
    #[serde(default = "default_probability")]
    pub probability: f64,
}

fn default_probability() -> f64 {
    1.0
}

impl EntityValue {
    pub fn new(entity: Entity, value: Option<Value>) -> Self {
        Self {
            entity,
            value,
            content: None,
            merge_support: false,
            start: None,
            end: None,
            probability: default_probability(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_merge_support(mut self, merge_support: bool) -> Self {
        self.merge_support = merge_support;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One superseded value, kept for audit and disambiguation.
pub struct EntityStateSnapshot {
    pub value: Option<EntityValue>,
    /// The action whose new value superseded this one.
    pub superseded_by_action_id: Option<String>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `EntityStateValue` used across Murmur components.
pub struct EntityStateValue {
    pub value: Option<EntityValue>,
    pub set_by_action_id: Option<String>,
    pub last_update_unix_ms: u64,
    #[serde(default)]
    pub history: Vec<EntityStateSnapshot>,
    /// All values observed in the turn that set the current value, kept so a
    /// handler can offer disambiguation when several were requested at once.
    #[serde(default)]
    pub multi_requested: Vec<EntityValue>,
}

impl EntityStateValue {
    pub fn new(value: Option<EntityValue>, action_id: Option<&str>) -> Self {
        Self {
            value,
            set_by_action_id: action_id.map(str::to_string),
            last_update_unix_ms: current_unix_timestamp_ms(),
            history: Vec::new(),
            multi_requested: Vec::new(),
        }
    }

    /// Replaces the retained value, archiving the previous one. History is
    /// append-only; each snapshot records the action that superseded it.
    pub fn change_value(&mut self, new_value: Option<EntityValue>, action_id: Option<&str>) {
        let previous = self.value.take();
        self.history.push(EntityStateSnapshot {
            value: previous,
            superseded_by_action_id: action_id.map(str::to_string),
            timestamp_ms: current_unix_timestamp_ms(),
        });
        self.value = new_value;
        self.set_by_action_id = action_id.map(str::to_string);
        self.last_update_unix_ms = current_unix_timestamp_ms();
    }

    pub fn record_alternatives(&mut self, values: &[EntityValue]) {
        self.multi_requested = values.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(role: &str, raw: Value) -> EntityValue {
        EntityValue::new(Entity::new("duckling:datetime", role), Some(raw))
    }

    #[test]
    fn unit_new_state_value_starts_with_empty_history() {
        let state = EntityStateValue::new(Some(value("departure", json!("2026-08-04"))), Some("act-1"));
        assert!(state.history.is_empty());
        assert_eq!(state.set_by_action_id.as_deref(), Some("act-1"));
    }

    #[test]
    fn unit_change_value_archives_the_previous_value_once() {
        let mut state =
            EntityStateValue::new(Some(value("departure", json!("monday"))), Some("act-1"));
        state.change_value(Some(value("departure", json!("tuesday"))), Some("act-2"));
        assert_eq!(state.history.len(), 1);
        let archived = &state.history[0];
        assert_eq!(archived.superseded_by_action_id.as_deref(), Some("act-2"));
        assert_eq!(
            archived.value.as_ref().and_then(|v| v.value.clone()),
            Some(json!("monday"))
        );
        assert_eq!(
            state.value.as_ref().and_then(|v| v.value.clone()),
            Some(json!("tuesday"))
        );
    }

    #[test]
    fn regression_change_value_to_none_keeps_history_growing() {
        let mut state =
            EntityStateValue::new(Some(value("departure", json!("monday"))), Some("act-1"));
        state.change_value(None, Some("act-2"));
        state.change_value(Some(value("departure", json!("friday"))), Some("act-3"));
        assert_eq!(state.history.len(), 2);
        assert!(state.history[1].value.is_none());
        assert_eq!(state.set_by_action_id.as_deref(), Some("act-3"));
    }
}
