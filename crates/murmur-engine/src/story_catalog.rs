//! Story handlers and the imperatively populated story registry.
//!
//! [`SimpleStoryRegistry`] is the reference registry: the embedding
//! application registers each definition with its handler at startup. It
//! implements both the definition lookup the state machine needs and the
//! handler lookup the turn runtime needs.

use std::sync::Arc;

use anyhow::Result;
use murmur_dialog::{StoryDefinition, StoryDefinitionRegistry, UNKNOWN_INTENT};

use crate::message_bus::BotBus;

/// Conversation logic bound to one story definition.
///
/// Handlers reply through the bus and may switch stories; they run inside
/// the turn that holds the user's lock, so they need no synchronization.
pub trait StoryHandler: Send + Sync {
    fn handle(&self, bus: &mut BotBus<'_>) -> Result<()>;
}

impl<F> StoryHandler for F
where
    F: Fn(&mut BotBus<'_>) -> Result<()> + Send + Sync,
{
    fn handle(&self, bus: &mut BotBus<'_>) -> Result<()> {
        self(bus)
    }
}

/// Handler lookup by story definition id.
pub trait StoryHandlerRegistry: Send + Sync {
    fn handler_for(&self, story_definition_id: &str) -> Option<Arc<dyn StoryHandler>>;
}

/// Public struct `SimpleStoryRegistry` used across Murmur components.
pub struct SimpleStoryRegistry {
    entries: Vec<(StoryDefinition, Arc<dyn StoryHandler>)>,
    unknown: (StoryDefinition, Arc<dyn StoryHandler>),
    attachment_story_id: Option<String>,
    location_story_id: Option<String>,
    answer_delay_ms: u64,
    report_unknown: bool,
}

impl SimpleStoryRegistry {
    pub fn new(unknown_definition: StoryDefinition, unknown_handler: Arc<dyn StoryHandler>) -> Self {
        Self {
            entries: Vec::new(),
            unknown: (unknown_definition, unknown_handler),
            attachment_story_id: None,
            location_story_id: None,
            answer_delay_ms: 0,
            report_unknown: false,
        }
    }

    /// Builds a registry with an unknown story that answers nothing.
    pub fn with_silent_unknown() -> Self {
        let unknown = StoryDefinition::new("unknown", UNKNOWN_INTENT);
        Self::new(unknown, Arc::new(|_: &mut BotBus<'_>| Ok(())))
    }

    pub fn register(&mut self, definition: StoryDefinition, handler: Arc<dyn StoryHandler>) {
        self.entries.push((definition, handler));
    }

    pub fn set_attachment_story(&mut self, story_id: impl Into<String>) {
        self.attachment_story_id = Some(story_id.into());
    }

    pub fn set_location_story(&mut self, story_id: impl Into<String>) {
        self.location_story_id = Some(story_id.into());
    }

    /// Spacing between successive answers of one turn.
    pub fn set_answer_delay_ms(&mut self, delay_ms: u64) {
        self.answer_delay_ms = delay_ms;
    }

    /// Reports sentences routed to the unknown story for model curation.
    pub fn set_report_unknown(&mut self, report_unknown: bool) {
        self.report_unknown = report_unknown;
    }

    fn definition_by_id(&self, story_id: &str) -> Option<StoryDefinition> {
        if self.unknown.0.id == story_id {
            return Some(self.unknown.0.clone());
        }
        self.entries
            .iter()
            .find(|(definition, _)| definition.id == story_id)
            .map(|(definition, _)| definition.clone())
    }
}

impl StoryDefinitionRegistry for SimpleStoryRegistry {
    fn find_story_definition(&self, intent: &str) -> StoryDefinition {
        self.entries
            .iter()
            .find(|(definition, _)| {
                definition.is_starter_intent(intent) || definition.secondary_intents.contains(intent)
            })
            .map(|(definition, _)| definition.clone())
            .unwrap_or_else(|| self.unknown.0.clone())
    }

    fn unknown_story(&self) -> StoryDefinition {
        self.unknown.0.clone()
    }

    fn attachment_story(&self) -> Option<StoryDefinition> {
        self.attachment_story_id
            .as_deref()
            .and_then(|story_id| self.definition_by_id(story_id))
    }

    fn location_story(&self) -> Option<StoryDefinition> {
        self.location_story_id
            .as_deref()
            .and_then(|story_id| self.definition_by_id(story_id))
    }

    fn default_delay_ms(&self, answer_index: usize) -> u64 {
        if answer_index == 0 {
            0
        } else {
            self.answer_delay_ms
        }
    }

    fn report_unknown_sentences(&self) -> bool {
        self.report_unknown
    }
}

impl StoryHandlerRegistry for SimpleStoryRegistry {
    fn handler_for(&self, story_definition_id: &str) -> Option<Arc<dyn StoryHandler>> {
        if self.unknown.0.id == story_definition_id {
            return Some(Arc::clone(&self.unknown.1));
        }
        self.entries
            .iter()
            .find(|(definition, _)| definition.id == story_definition_id)
            .map(|(_, handler)| Arc::clone(handler))
    }
}
