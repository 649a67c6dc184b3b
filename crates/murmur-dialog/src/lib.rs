//! Conversation state model and story resolution for the Murmur engine.
//!
//! Owns the per-user timeline graph (dialogs, stories, entity state) and the
//! state machine that decides, turn by turn, which story and step handle the
//! resolved intent. Persistence lives behind the [`TimelineStore`] seam; story
//! handlers live one crate up, next to the message bus.

pub mod dialog_model;
pub mod entity_state;
pub mod state_machine;
pub mod story_model;
pub mod story_registry;
pub mod timeline_store;
pub mod user_timeline;

pub use dialog_model::{
    Dialog, DialogState, IntentQualifier, NextUserActionState, DEFAULT_ASK_AGAIN_ROUND,
    UNKNOWN_INTENT,
};
pub use entity_state::{Entity, EntityStateSnapshot, EntityStateValue, EntityValue};
pub use state_machine::DialogStateMachine;
pub use story_model::Story;
pub use story_registry::{StoryDefinition, StoryDefinitionRegistry, StoryStep, StoryTag};
pub use timeline_store::TimelineStore;
pub use user_timeline::{UserState, UserTimeline};
