//! Story definitions and the registry seam the state machine resolves
//! intents against.
//!
//! A definition is pure metadata: which intents start or continue the story,
//! which steps it declares, and behavioral tags. The handler bound to a
//! definition lives with the engine crate; resolution never needs it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `StoryTag` values.
pub enum StoryTag {
    /// The story implements a bounded "please repeat" loop.
    AskAgain,
    /// Reaching this story re-enables a disabled bot.
    EnableBot,
    /// Reaching this story disables the bot for the user.
    DisableBot,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// A named step within a story, selectable by intent.
pub struct StoryStep {
    pub name: String,
    /// Intent that selects this step directly.
    #[serde(default)]
    pub intent: Option<String>,
    /// Intents that keep this step selected once it is active.
    #[serde(default)]
    pub secondary_intents: BTreeSet<String>,
}

impl StoryStep {
    pub fn new(name: impl Into<String>, intent: Option<String>) -> Self {
        Self {
            name: name.into(),
            intent,
            secondary_intents: BTreeSet::new(),
        }
    }

    pub fn with_secondary_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary_intents = intents.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `StoryDefinition` used across Murmur components.
pub struct StoryDefinition {
    pub id: String,
    pub main_intent: String,
    #[serde(default)]
    pub secondary_intents: BTreeSet<String>,
    /// Intents that start this story without being supported mid-story.
    #[serde(default)]
    pub other_starter_intents: BTreeSet<String>,
    #[serde(default)]
    pub steps: Vec<StoryStep>,
    #[serde(default)]
    pub tags: BTreeSet<StoryTag>,
}

impl StoryDefinition {
    pub fn new(id: impl Into<String>, main_intent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            main_intent: main_intent.into(),
            secondary_intents: BTreeSet::new(),
            other_starter_intents: BTreeSet::new(),
            steps: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_secondary_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary_intents = intents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_other_starter_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.other_starter_intents = intents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_steps(mut self, steps: Vec<StoryStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = StoryTag>,
    {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn has_tag(&self, tag: StoryTag) -> bool {
        self.tags.contains(&tag)
    }

    /// Whether the intent keeps an active instance of this story on top of
    /// the stack: the main intent or any secondary intent.
    pub fn supports_intent(&self, intent: &str) -> bool {
        self.main_intent == intent || self.secondary_intents.contains(intent)
    }

    /// Whether the intent may start this story.
    pub fn is_starter_intent(&self, intent: &str) -> bool {
        self.main_intent == intent || self.other_starter_intents.contains(intent)
    }

    /// Whether the intent belongs to this story at all, steps included.
    pub fn declares_intent(&self, intent: &str) -> bool {
        self.supports_intent(intent)
            || self.other_starter_intents.contains(intent)
            || self.steps.iter().any(|step| {
                step.intent.as_deref() == Some(intent) || step.secondary_intents.contains(intent)
            })
    }

    pub fn find_step(&self, intent: &str) -> Option<&StoryStep> {
        self.steps
            .iter()
            .find(|step| step.intent.as_deref() == Some(intent))
    }

    pub fn step(&self, name: &str) -> Option<&StoryStep> {
        self.steps.iter().find(|step| step.name == name)
    }
}

/// Lookup seam between the state machine and the configured story set.
///
/// Implementations must return the unknown story from
/// [`find_story_definition`](Self::find_story_definition) when no definition
/// matches, never fail.
pub trait StoryDefinitionRegistry: Send + Sync {
    fn find_story_definition(&self, intent: &str) -> StoryDefinition;

    fn unknown_story(&self) -> StoryDefinition;

    /// Story handling inbound attachments, when one is configured.
    fn attachment_story(&self) -> Option<StoryDefinition> {
        None
    }

    /// Story handling inbound user locations, when one is configured.
    fn location_story(&self) -> Option<StoryDefinition> {
        None
    }

    /// Spacing inserted between successive answers within one turn.
    fn default_delay_ms(&self, _answer_index: usize) -> u64 {
        0
    }

    /// Whether sentences routed to the unknown story should be reported to
    /// the NLU service for later curation.
    fn report_unknown_sentences(&self) -> bool {
        false
    }
}
