//! Natural-language understanding orchestration for the Murmur engine.
//!
//! Wraps the remote NLU service behind [`NluClient`], runs every parse
//! through an ordered chain of registered listeners, and reconciles newly
//! recognized entity values against the dialog's retained state via the
//! entity merger. An NLU failure is never fatal to a turn: the dialog's
//! intent stays unresolved and routing falls back to the unknown story.

pub mod entity_merging;
pub mod nlp_contract;
pub mod nlp_listener;
pub mod nlp_pipeline;

pub use entity_merging::EntityMerger;
pub use nlp_contract::{
    entity_value_from_span, MergedValue, NlpCallStats, NlpEntityValue, NlpQuery, NlpQueryContext,
    NlpResult, NluClient, NluClientError, ValueToMerge,
};
pub use nlp_listener::{EntityMergeGroup, NlpListener, NlpListenerRegistry};
pub use nlp_pipeline::NlpPipeline;
