//! End-user identity and preference types shared across crates.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
/// Stable end-user identity as supplied by the channel adapter.
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `UserPreferences` used across Murmur components.
pub struct UserPreferences {
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub display_name: String,
    /// Marks test traffic so downstream calls can avoid polluting NLU stats.
    #[serde(default)]
    pub test: bool,
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            timezone: default_timezone(),
            display_name: String::new(),
            test: false,
        }
    }
}

impl UserPreferences {
    /// Replaces every field with the freshly loaded profile.
    pub fn fill_with(&mut self, loaded: &UserPreferences) {
        *self = loaded.clone();
    }

    /// Overlays non-empty refreshed fields, keeping what we already hold.
    pub fn refresh_with(&mut self, refreshed: &UserPreferences) {
        if !refreshed.locale.trim().is_empty() {
            self.locale = refreshed.locale.clone();
        }
        if !refreshed.timezone.trim().is_empty() {
            self.timezone = refreshed.timezone.clone();
        }
        if !refreshed.display_name.trim().is_empty() {
            self.display_name = refreshed.display_name.clone();
        }
        self.test = refreshed.test;
    }
}
