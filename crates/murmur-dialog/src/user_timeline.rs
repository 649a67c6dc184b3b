//! Per-user timeline: preferences, bot state and dialog history.

use murmur_contract::{UserId, UserPreferences};
use serde::{Deserialize, Serialize};

use crate::dialog_model::Dialog;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// Engine-side flags attached to a user, distinct from channel preferences.
pub struct UserState {
    #[serde(default)]
    pub bot_disabled: bool,
    #[serde(default)]
    pub profile_loaded: bool,
    #[serde(default)]
    pub profile_refreshed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `UserTimeline` used across Murmur components.
pub struct UserTimeline {
    pub player_id: UserId,
    #[serde(default)]
    pub preferences: UserPreferences,
    #[serde(default)]
    pub user_state: UserState,
    #[serde(default)]
    pub dialogs: Vec<Dialog>,
}

impl UserTimeline {
    pub fn new(player_id: UserId) -> Self {
        Self {
            player_id,
            preferences: UserPreferences::default(),
            user_state: UserState::default(),
            dialogs: Vec::new(),
        }
    }

    pub fn current_dialog(&self) -> Option<&Dialog> {
        self.dialogs.last()
    }

    pub fn current_dialog_mut(&mut self) -> Option<&mut Dialog> {
        self.dialogs.last_mut()
    }
}
