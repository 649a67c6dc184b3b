//! Parse orchestration: keyword short-circuit, listener chain, remote
//! classification and entity merging, in that order.
//!
//! A parse mutates the dialog state (current intent, entity map) and attaches
//! call statistics to the sentence action. Failures never propagate: the
//! intent is left unresolved and the caller routes to the unknown story.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use murmur_contract::{Action, ActionKind, UserPreferences};
use murmur_dialog::{Dialog, EntityValue};
use tracing::{debug, error, warn};

use crate::entity_merging::EntityMerger;
use crate::nlp_contract::{
    entity_value_from_span, NlpCallStats, NlpQuery, NlpQueryContext, NlpResult, NluClient,
    NluClientError,
};
use crate::nlp_listener::{EntityMergeGroup, NlpListenerRegistry};

/// Public struct `NlpPipeline` used across Murmur components.
pub struct NlpPipeline {
    client: Arc<dyn NluClient>,
    listeners: Arc<NlpListenerRegistry>,
    namespace: String,
    model_name: String,
}

impl NlpPipeline {
    pub fn new(
        client: Arc<dyn NluClient>,
        listeners: Arc<NlpListenerRegistry>,
        namespace: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            listeners,
            namespace: namespace.into(),
            model_name: model_name.into(),
        }
    }

    /// Parses the sentence action and folds the outcome into the dialog.
    ///
    /// `preferences` and `bot_disabled` come from the user timeline; they are
    /// passed piecewise so the caller can keep the dialog borrowed mutably.
    pub async fn parse_sentence(
        &self,
        action: &mut Action,
        preferences: &UserPreferences,
        bot_disabled: bool,
        dialog: &mut Dialog,
    ) {
        let Some(text) = action
            .text()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
        else {
            return;
        };

        if let Some(intent) = self.find_keyword(&text) {
            debug!(intent = intent.as_str(), "keyword short-circuit");
            dialog.state.current_intent = Some(intent);
            return;
        }

        let mut query = self.build_query(&text, action, preferences, bot_disabled, dialog);
        for listener in self.listeners.iter() {
            match listener.update_query(query.clone()) {
                Ok(updated) => query = updated,
                Err(listener_error) => warn!(
                    error = %listener_error,
                    "listener update_query failed, keeping previous query"
                ),
            }
        }

        let result = match self.obtain_result(action, &text, &query).await {
            Ok(Some(result)) => result,
            Ok(None) => {
                warn!(text = text.as_str(), "nlu returned no result");
                dialog.state.current_intent = None;
                self.notify_error(&query, None);
                return;
            }
            Err(call_error) => {
                error!(error = %call_error, "nlu call failed");
                dialog.state.current_intent = None;
                self.notify_error(&query, Some(&call_error));
                return;
            }
        };

        let intent = self.resolve_intent(dialog, &result);
        dialog.state.current_intent = Some(intent.clone());

        let mut custom_evaluations: Vec<EntityValue> = Vec::new();
        for listener in self.listeners.iter() {
            match listener.evaluate_entities(dialog, &text, &result) {
                Ok(values) => custom_evaluations.extend(values),
                Err(listener_error) => warn!(
                    error = %listener_error,
                    "listener evaluate_entities failed, skipping its evaluations"
                ),
            }
        }

        let mut evaluations = custom_evaluations.clone();
        evaluations.extend(
            result
                .entities
                .iter()
                .filter(|span| {
                    custom_evaluations
                        .iter()
                        .all(|custom| custom.entity != span.entity)
                })
                .map(|span| entity_value_from_span(&result, span)),
        );

        let merged_values = self
            .merge_evaluations(action, dialog, &query, &evaluations)
            .await;

        for listener in self.listeners.iter() {
            if let Err(listener_error) = listener.success(&query, &result) {
                warn!(error = %listener_error, "listener success hook failed");
            }
        }

        let stats = NlpCallStats {
            locale: preferences.locale.clone(),
            intent,
            entity_evaluations: evaluations,
            merged_values,
            query,
            result,
        };
        action.metadata.nlp_stats = serde_json::to_value(&stats).ok();
    }

    /// Whether the remote NLU service currently answers.
    pub async fn health_check(&self) -> bool {
        self.client.health_check().await.unwrap_or(false)
    }

    /// Reports a sentence as not understood, off the turn's critical path.
    pub fn report_unknown(&self, text: &str, locale: &str) {
        let client = Arc::clone(&self.client);
        let namespace = self.namespace.clone();
        let model_name = self.model_name.clone();
        let text = text.to_string();
        let locale = locale.to_string();
        tokio::spawn(async move {
            if let Err(call_error) = client
                .mark_as_unknown(&namespace, &model_name, &locale, &text)
                .await
            {
                debug!(error = %call_error, "mark_as_unknown call failed");
            }
        });
    }

    fn find_keyword(&self, text: &str) -> Option<String> {
        for listener in self.listeners.iter() {
            match listener.handle_keyword(text) {
                Ok(Some(intent)) => return Some(intent),
                Ok(None) => {}
                Err(listener_error) => warn!(
                    error = %listener_error,
                    "listener handle_keyword failed, treating as no match"
                ),
            }
        }
        None
    }

    fn resolve_intent(&self, dialog: &Dialog, result: &NlpResult) -> String {
        for listener in self.listeners.iter() {
            match listener.find_intent(dialog, result) {
                Ok(Some(intent)) => return intent,
                Ok(None) => {}
                Err(listener_error) => warn!(
                    error = %listener_error,
                    "listener find_intent failed, treating as no override"
                ),
            }
        }
        result.intent.clone()
    }

    async fn obtain_result(
        &self,
        action: &Action,
        text: &str,
        query: &NlpQuery,
    ) -> Result<Option<NlpResult>, NluClientError> {
        if let ActionKind::Sentence {
            precomputed_nlp: Some(raw),
            ..
        } = &action.kind
        {
            let precomputed: NlpResult = serde_json::from_value(raw.clone()).map_err(|error| {
                NluClientError::InvalidResponse(format!("precomputed nlp payload: {error}"))
            })?;
            return Ok(Some(self.evaluate_precomputed(query, precomputed).await));
        }

        for listener in self.listeners.iter() {
            match listener.precompute(text, &query.context) {
                Ok(Some(result)) => {
                    debug!("listener precompute supplied the nlu result");
                    return Ok(Some(result));
                }
                Ok(None) => {}
                Err(listener_error) => warn!(
                    error = %listener_error,
                    "listener precompute failed, treating as no result"
                ),
            }
        }

        self.classify(query).await
    }

    async fn classify(&self, query: &NlpQuery) -> Result<Option<NlpResult>, NluClientError> {
        let Some(mut result) = self.client.classify(query).await? else {
            return Ok(None);
        };
        if !query.intent_qualifiers.is_empty()
            && !query
                .intent_qualifiers
                .iter()
                .any(|qualifier| qualifier.intent == result.intent)
        {
            if let Some(forced) = query.intent_qualifiers.iter().max_by(|left, right| {
                left.modifier
                    .partial_cmp(&right.modifier)
                    .unwrap_or(Ordering::Equal)
            }) {
                warn!(
                    classified = result.intent.as_str(),
                    forced = forced.intent.as_str(),
                    "intent outside qualifier subset, forcing best qualifier"
                );
                result.intent = forced.intent.clone();
            }
        }
        Ok(Some(result))
    }

    /// Re-evaluates precomputed entity spans through the service evaluators,
    /// preferring evaluated values over raw ones (dedup by span start).
    async fn evaluate_precomputed(&self, query: &NlpQuery, result: NlpResult) -> NlpResult {
        if result.entities.is_empty() {
            return result;
        }
        match self.client.evaluate_entities(query, &result.entities).await {
            Ok(Some(evaluated)) => {
                let mut entities = evaluated.clone();
                entities.extend(
                    result
                        .entities
                        .iter()
                        .filter(|span| evaluated.iter().all(|value| value.start != span.start))
                        .cloned(),
                );
                NlpResult { entities, ..result }
            }
            Ok(None) => result,
            Err(call_error) => {
                warn!(
                    error = %call_error,
                    "entity evaluation for precomputed result failed, keeping raw spans"
                );
                result
            }
        }
    }

    async fn merge_evaluations(
        &self,
        action: &Action,
        dialog: &mut Dialog,
        query: &NlpQuery,
        evaluations: &[EntityValue],
    ) -> Vec<EntityValue> {
        let mut groups: Vec<EntityMergeGroup> = Vec::new();
        for value in evaluations {
            let role = value.entity.role.clone();
            match groups.iter_mut().find(|group| group.role == role) {
                Some(group) => group.new_values.push(value.clone()),
                None => groups.push(EntityMergeGroup {
                    initial: dialog.state.entity_values.get(&role).cloned(),
                    role,
                    new_values: vec![value.clone()],
                }),
            }
        }

        for listener in self.listeners.iter() {
            match listener.sort_entities_to_merge(groups.clone()) {
                Ok(sorted) => groups = sorted,
                Err(listener_error) => warn!(
                    error = %listener_error,
                    "listener sort_entities_to_merge failed, keeping previous order"
                ),
            }
        }

        let merger = EntityMerger::new(self.client.as_ref(), query);
        let mut merged_values = Vec::new();
        for mut group in groups {
            for listener in self.listeners.iter() {
                match listener.merge_entity_values(&dialog.state, group.clone()) {
                    Ok(adjusted) => group = adjusted,
                    Err(listener_error) => warn!(
                        error = %listener_error,
                        "listener merge_entity_values failed, keeping group"
                    ),
                }
            }
            if group.new_values.is_empty() {
                continue;
            }
            let merged = merger
                .merge(
                    Some(action.id.as_str()),
                    &group.new_values,
                    group.initial.clone(),
                )
                .await;
            if let Some(value) = merged.value.clone() {
                merged_values.push(value);
            }
            dialog.state.entity_values.insert(group.role.clone(), merged);
        }
        merged_values
    }

    fn notify_error(&self, query: &NlpQuery, call_error: Option<&NluClientError>) {
        for listener in self.listeners.iter() {
            if let Err(listener_error) = listener.error(query, call_error) {
                warn!(error = %listener_error, "listener error hook failed");
            }
        }
    }

    fn build_query(
        &self,
        text: &str,
        action: &Action,
        preferences: &UserPreferences,
        bot_disabled: bool,
        dialog: &Dialog,
    ) -> NlpQuery {
        let next_state = dialog.state.next_action_state.as_ref();
        let reference_date = next_state
            .and_then(|state| state.reference_date)
            .unwrap_or_else(Utc::now);
        let reference_timezone = next_state
            .and_then(|state| state.reference_timezone.clone())
            .unwrap_or_else(|| preferences.timezone.clone());
        let state_qualifiers: BTreeSet<String> = next_state
            .map(|state| state.states.clone())
            .filter(|states| !states.is_empty())
            .unwrap_or_else(|| {
                dialog
                    .current_story()
                    .map(|story| BTreeSet::from([story.definition.main_intent.clone()]))
                    .unwrap_or_default()
            });
        let intent_qualifiers = next_state
            .map(|state| state.intent_qualifiers.clone())
            .unwrap_or_default();

        NlpQuery {
            text: text.to_string(),
            namespace: self.namespace.clone(),
            model_name: self.model_name.clone(),
            context: NlpQueryContext {
                locale: preferences.locale.clone(),
                user_id: action.user_id.clone(),
                dialog_id: dialog.id.clone(),
                channel_type: action.channel_type.clone(),
                reference_date,
                reference_timezone,
                test: preferences.test,
                register_query: !preferences.test && !bot_disabled,
            },
            state_qualifiers,
            intent_qualifiers,
        }
    }
}
