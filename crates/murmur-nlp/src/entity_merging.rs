//! Reconciles newly observed entity values with the dialog's retained state.
//!
//! Pure decision logic around one remote call: values flagged merge-support
//! are candidates for the service-side merge (combining partial fragments
//! into one value); everything else replaces the retained value directly.
//! History on the retained state is append-only and never discarded here.

use murmur_dialog::{Entity, EntityStateValue, EntityValue};
use tracing::warn;

use crate::nlp_contract::{NlpQuery, NluClient, ValueToMerge};

/// Public struct `EntityMerger` used across Murmur components.
pub struct EntityMerger<'a> {
    client: &'a dyn NluClient,
    query: &'a NlpQuery,
}

impl<'a> EntityMerger<'a> {
    pub fn new(client: &'a dyn NluClient, query: &'a NlpQuery) -> Self {
        Self { client, query }
    }

    /// Merges the turn's values for one role into the retained state.
    ///
    /// `new_values` must be non-empty; callers group recognized values by
    /// role before calling.
    pub async fn merge(
        &self,
        action_id: Option<&str>,
        new_values: &[EntityValue],
        existing: Option<EntityStateValue>,
    ) -> EntityStateValue {
        let entity = new_values[0].entity.clone();
        let default_new_value = new_values
            .iter()
            .find(|candidate| candidate.value.is_some())
            .cloned()
            .unwrap_or_else(|| new_values[0].clone());
        let merge_candidates: Vec<EntityValue> = new_values
            .iter()
            .filter(|candidate| candidate.merge_support && candidate.value.is_some())
            .cloned()
            .collect();

        let mut state = match existing {
            None => {
                if merge_candidates.len() < 2 {
                    EntityStateValue::new(Some(default_new_value), action_id)
                } else {
                    let merged = self
                        .merge_values(&entity, &merge_candidates, &default_new_value, None)
                        .await;
                    EntityStateValue::new(Some(merged), action_id)
                }
            }
            Some(mut existing) => {
                let existing_holds_nothing = existing
                    .value
                    .as_ref()
                    .map(|value| value.value.is_none())
                    .unwrap_or(true);
                if merge_candidates.is_empty()
                    || (merge_candidates.len() == 1 && existing_holds_nothing)
                {
                    existing.change_value(Some(default_new_value), action_id);
                } else {
                    let merged = self
                        .merge_values(
                            &entity,
                            &merge_candidates,
                            &default_new_value,
                            Some(&existing),
                        )
                        .await;
                    existing.change_value(Some(merged), action_id);
                }
                existing
            }
        };

        if new_values.len() > 1 {
            state.record_alternatives(new_values);
        }
        state
    }

    async fn merge_values(
        &self,
        entity: &Entity,
        merge_candidates: &[EntityValue],
        default_new_value: &EntityValue,
        initial: Option<&EntityStateValue>,
    ) -> EntityValue {
        let mut candidates: Vec<ValueToMerge> = merge_candidates
            .iter()
            .filter_map(|candidate| {
                candidate.value.clone().map(|value| ValueToMerge {
                    value,
                    content: candidate.content.clone(),
                    initial: false,
                    start: candidate.start,
                    probability: candidate.probability,
                })
            })
            .collect();
        if let Some(retained) = initial.and_then(|state| state.value.as_ref()) {
            if let Some(value) = retained.value.clone() {
                candidates.push(ValueToMerge {
                    value,
                    content: retained.content.clone(),
                    initial: true,
                    start: None,
                    probability: 1.0,
                });
            }
        }

        match self
            .client
            .merge_entity_values(self.query, entity, &candidates)
            .await
        {
            Ok(Some(merged)) if merged.value.is_some() => EntityValue {
                entity: entity.clone(),
                value: merged.value,
                content: merged.content,
                merge_support: true,
                start: None,
                end: None,
                probability: 1.0,
            },
            Ok(_) => default_new_value.clone(),
            Err(error) => {
                warn!(
                    role = entity.role.as_str(),
                    error = %error,
                    "entity merge call failed, keeping default candidate"
                );
                default_new_value.clone()
            }
        }
    }
}
