//! Channel-facing contract types for the Murmur dispatch engine.
//!
//! This crate defines the action envelope exchanged with channel adapters and
//! the abstract collaborator seams the engine calls into: the adapter itself,
//! the per-user lock, the error-action factory and the translation function.
//! Concrete wire formats and providers live behind these traits and are never
//! implemented here.

pub mod action_contract;
pub mod channel_contract;
pub mod user_contract;

pub use action_contract::{
    Action, ActionKind, ActionMetadata, ActionNotificationType, ActionPriority, ActionVisibility,
    AttachmentKind, ChannelType,
};
pub use channel_contract::{
    ChannelAdapter, DefaultErrorActionFactory, ErrorActionFactory, NoopTranslator,
    NoopTurnCallback, Translator, TurnCallback, UserLock,
};
pub use user_contract::{UserId, UserPreferences};
