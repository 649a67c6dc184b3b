//! Registered listener chain consulted at every stage of a parse.
//!
//! Listeners are plain values registered explicitly at startup; there is no
//! discovery mechanism. Every hook has a documented pass-through default, and
//! a hook returning an error is logged and treated as that default so one
//! misbehaving listener never blocks the pipeline or its peers.

use std::sync::Arc;

use anyhow::Result;
use murmur_dialog::{Dialog, DialogState, EntityStateValue, EntityValue};

use crate::nlp_contract::{NlpQuery, NlpQueryContext, NlpResult, NluClientError};

#[derive(Debug, Clone, PartialEq)]
/// Entity values for one role, staged for merging into dialog state.
pub struct EntityMergeGroup {
    pub role: String,
    /// Value the dialog already holds for the role, if any.
    pub initial: Option<EntityStateValue>,
    pub new_values: Vec<EntityValue>,
}

/// Hook surface of one NLU listener.
///
/// Hooks run in registration order. `handle_keyword`, `precompute` and
/// `find_intent` use first-non-null-wins semantics; `update_query`,
/// `sort_entities_to_merge` and `merge_entity_values` fold over the chain;
/// `evaluate_entities` results are concatenated; `success` and `error` are
/// plain notifications.
pub trait NlpListener: Send + Sync {
    /// Maps a raw sentence to an intent without any NLU call.
    fn handle_keyword(&self, _sentence: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Supplies an NLU result without calling the remote service.
    fn precompute(&self, _sentence: &str, _context: &NlpQueryContext) -> Result<Option<NlpResult>> {
        Ok(None)
    }

    /// Transforms the outgoing query before classification.
    fn update_query(&self, query: NlpQuery) -> Result<NlpQuery> {
        Ok(query)
    }

    /// Overrides the intent resolved from the NLU result.
    fn find_intent(&self, _dialog: &Dialog, _result: &NlpResult) -> Result<Option<String>> {
        Ok(None)
    }

    /// Contributes custom entity evaluations; entities covered here are
    /// excluded from the NLU-provided set.
    fn evaluate_entities(
        &self,
        _dialog: &Dialog,
        _sentence: &str,
        _result: &NlpResult,
    ) -> Result<Vec<EntityValue>> {
        Ok(Vec::new())
    }

    /// Imposes an evaluation order across entity groups.
    fn sort_entities_to_merge(
        &self,
        groups: Vec<EntityMergeGroup>,
    ) -> Result<Vec<EntityMergeGroup>> {
        Ok(groups)
    }

    /// Adjusts one group before the entity merger runs.
    fn merge_entity_values(
        &self,
        _state: &DialogState,
        group: EntityMergeGroup,
    ) -> Result<EntityMergeGroup> {
        Ok(group)
    }

    fn success(&self, _query: &NlpQuery, _result: &NlpResult) -> Result<()> {
        Ok(())
    }

    fn error(&self, _query: &NlpQuery, _error: Option<&NluClientError>) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
/// Ordered, explicitly populated listener registry.
pub struct NlpListenerRegistry {
    listeners: Vec<Arc<dyn NlpListener>>,
}

impl NlpListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn NlpListener>) {
        self.listeners.push(listener);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn NlpListener>> {
        self.listeners.iter()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}
