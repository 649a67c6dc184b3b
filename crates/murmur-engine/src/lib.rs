//! Dispatch engine: the concurrency boundary between channel adapters and
//! the conversation logic.
//!
//! One turn = one inbound action handled under that user's lock: load the
//! timeline, parse, resolve the story, run its handler through a fresh
//! message bus, flush outbound sends, save the timeline, release the lock.
//! Users dispatch fully in parallel; a single user's turns are strictly
//! serialized by the per-user lock, the engine's only synchronization point.

pub mod connector_registry;
pub mod dispatch_runtime;
pub mod engine_config;
pub mod message_bus;
pub mod story_catalog;
pub mod turn_runtime;
pub mod user_locking;

pub use connector_registry::ConnectorRegistry;
pub use dispatch_runtime::{ChannelContext, DispatchController, EventListener, NoopEventListener};
pub use engine_config::DispatchConfig;
pub use message_bus::{BotBus, OutboundRecord};
pub use story_catalog::{SimpleStoryRegistry, StoryHandler, StoryHandlerRegistry};
pub use user_locking::MemoryUserLock;
