//! NLU round-trip value objects and the remote client seam.
//!
//! A query and its result are immutable per call: built, sent, merged,
//! discarded. The concrete service (HTTP model server, GenAI substitution,
//! scripted test double) lives behind [`NluClient`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_contract::{ChannelType, UserId};
use murmur_dialog::{Entity, EntityValue, IntentQualifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `NlpQueryContext` used across Murmur components.
pub struct NlpQueryContext {
    pub locale: String,
    pub user_id: UserId,
    pub dialog_id: String,
    pub channel_type: ChannelType,
    pub reference_date: DateTime<Utc>,
    pub reference_timezone: String,
    pub test: bool,
    /// Whether the service should record this query for model improvement.
    pub register_query: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `NlpQuery` used across Murmur components.
pub struct NlpQuery {
    pub text: String,
    pub namespace: String,
    pub model_name: String,
    pub context: NlpQueryContext,
    /// Active state qualifiers narrowing classification.
    #[serde(default)]
    pub state_qualifiers: BTreeSet<String>,
    /// When non-empty, classification is restricted to this subset.
    #[serde(default)]
    pub intent_qualifiers: Vec<IntentQualifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One entity span recognized by the NLU service.
pub struct NlpEntityValue {
    pub start: usize,
    pub end: usize,
    pub entity: Entity,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default = "default_probability")]
    pub probability: f64,
    #[serde(default)]
    pub merge_support: bool,
}

fn default_probability() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `NlpResult` used across Murmur components.
pub struct NlpResult {
    pub intent: String,
    pub intent_probability: f64,
    #[serde(default)]
    pub entities: Vec<NlpEntityValue>,
    /// Confidence of secondary intents, keyed by intent name.
    #[serde(default)]
    pub other_intents: BTreeMap<String, f64>,
    /// The query text the spans index into.
    #[serde(default)]
    pub retained_query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One candidate handed to the remote entity-merge call.
pub struct ValueToMerge {
    pub value: Value,
    #[serde(default)]
    pub content: Option<String>,
    /// Marks the previously retained value among fresh candidates.
    #[serde(default)]
    pub initial: bool,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default = "default_probability")]
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Outcome of the remote entity-merge call.
pub struct MergedValue {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Error)]
pub enum NluClientError {
    #[error("nlu call failed: {0}")]
    Remote(String),
    #[error("nlu call timed out after {0} ms")]
    Timeout(u64),
    #[error("invalid nlu response: {0}")]
    InvalidResponse(String),
}

/// Remote NLU service seam.
///
/// Implementations own their transport and must apply a bounded timeout;
/// a timeout surfaces as [`NluClientError::Timeout`] and follows the same
/// path as any other classification failure.
#[async_trait]
pub trait NluClient: Send + Sync {
    async fn classify(&self, query: &NlpQuery) -> Result<Option<NlpResult>, NluClientError>;

    /// Re-evaluates precomputed entity spans against the service evaluators.
    async fn evaluate_entities(
        &self,
        _query: &NlpQuery,
        _entities: &[NlpEntityValue],
    ) -> Result<Option<Vec<NlpEntityValue>>, NluClientError> {
        Ok(None)
    }

    /// Reconciles several candidate values for one entity into a single
    /// value, e.g. partial date and time fragments.
    async fn merge_entity_values(
        &self,
        _query: &NlpQuery,
        _entity: &Entity,
        _candidates: &[ValueToMerge],
    ) -> Result<Option<MergedValue>, NluClientError> {
        Ok(None)
    }

    /// Reports a sentence the bot could not route, for later curation.
    async fn mark_as_unknown(
        &self,
        _namespace: &str,
        _model_name: &str,
        _locale: &str,
        _text: &str,
    ) -> Result<(), NluClientError> {
        Ok(())
    }

    /// Service liveness probe.
    async fn health_check(&self) -> Result<bool, NluClientError> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
/// Record of one NLU round-trip, attached to the parsed sentence action.
pub struct NlpCallStats {
    pub locale: String,
    pub intent: String,
    pub entity_evaluations: Vec<EntityValue>,
    pub merged_values: Vec<EntityValue>,
    pub query: NlpQuery,
    pub result: NlpResult,
}

/// Projects a recognized span onto a dialog-level entity value, slicing the
/// span content out of the retained query text.
pub fn entity_value_from_span(result: &NlpResult, span: &NlpEntityValue) -> EntityValue {
    let content = if span.end > span.start {
        let sliced: String = result
            .retained_query
            .chars()
            .skip(span.start)
            .take(span.end - span.start)
            .collect();
        (!sliced.is_empty()).then_some(sliced)
    } else {
        None
    };

    EntityValue {
        entity: span.entity.clone(),
        value: span.value.clone(),
        content,
        merge_support: span.merge_support,
        start: Some(span.start),
        end: Some(span.end),
        probability: span.probability,
    }
}
