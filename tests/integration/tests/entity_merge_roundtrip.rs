//! Entity recognition and merging across full dispatched turns, with a
//! scripted NLU backend standing in for the remote service.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use murmur_contract::{
    Action, ChannelAdapter, ChannelType, DefaultErrorActionFactory, NoopTranslator, UserId,
};
use murmur_dialog::{Entity, StoryDefinition, TimelineStore, UserTimeline};
use murmur_engine::{
    BotBus, ChannelContext, DispatchConfig, DispatchController, MemoryUserLock,
    SimpleStoryRegistry,
};
use murmur_nlp::{
    MergedValue, NlpEntityValue, NlpListenerRegistry, NlpPipeline, NlpQuery, NlpResult, NluClient,
    NluClientError, ValueToMerge,
};
use serde_json::json;

struct ScriptedNlu {
    classify_results: Mutex<VecDeque<NlpResult>>,
}

impl ScriptedNlu {
    fn new(results: Vec<NlpResult>) -> Arc<Self> {
        Arc::new(Self {
            classify_results: Mutex::new(VecDeque::from(results)),
        })
    }
}

#[async_trait]
impl NluClient for ScriptedNlu {
    async fn classify(&self, _query: &NlpQuery) -> Result<Option<NlpResult>, NluClientError> {
        Ok(self.classify_results.lock().expect("results").pop_front())
    }

    /// Concatenates candidate contents, the way the real service folds
    /// partial date and time fragments into one value.
    async fn merge_entity_values(
        &self,
        _query: &NlpQuery,
        _entity: &Entity,
        candidates: &[ValueToMerge],
    ) -> Result<Option<MergedValue>, NluClientError> {
        let combined = candidates
            .iter()
            .filter_map(|candidate| candidate.value.as_str().map(str::to_string))
            .collect::<Vec<_>>()
            .join(" + ");
        Ok(Some(MergedValue {
            value: Some(json!(combined)),
            content: Some(combined),
        }))
    }
}

struct SilentAdapter;

#[async_trait]
impl ChannelAdapter for SilentAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::new("web")
    }

    fn synchronous(&self) -> bool {
        true
    }

    async fn send(&self, _action: Action) -> Result<()> {
        Ok(())
    }
}

struct MemoryStore {
    timelines: Mutex<BTreeMap<String, UserTimeline>>,
}

impl MemoryStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            timelines: Mutex::new(BTreeMap::new()),
        })
    }

    fn stored(&self, user_id: &str) -> Option<UserTimeline> {
        self.timelines.lock().expect("timelines").get(user_id).cloned()
    }
}

#[async_trait]
impl TimelineStore for MemoryStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<UserTimeline>> {
        Ok(self
            .timelines
            .lock()
            .expect("timelines")
            .get(user_id.as_str())
            .cloned())
    }

    async fn save(&self, timeline: &UserTimeline) -> Result<()> {
        self.timelines
            .lock()
            .expect("timelines")
            .insert(timeline.player_id.as_str().to_string(), timeline.clone());
        Ok(())
    }
}

fn departure_span(raw: &str, start: usize, end: usize) -> NlpEntityValue {
    NlpEntityValue {
        start,
        end,
        entity: Entity::new("datetime", "departure"),
        value: Some(json!(raw)),
        probability: 0.85,
        merge_support: true,
    }
}

fn booking_result(text: &str, spans: Vec<NlpEntityValue>) -> NlpResult {
    NlpResult {
        intent: "book_trip".to_string(),
        intent_probability: 0.93,
        entities: spans,
        other_intents: BTreeMap::new(),
        retained_query: text.to_string(),
    }
}

fn controller_with(client: Arc<dyn NluClient>, store: Arc<MemoryStore>) -> DispatchController {
    let mut registry = SimpleStoryRegistry::with_silent_unknown();
    registry.register(
        StoryDefinition::new("booking", "book_trip"),
        Arc::new(|bus: &mut BotBus<'_>| {
            bus.end_raw_text("noted");
            Ok(())
        }),
    );
    let registry = Arc::new(registry);
    let pipeline = Arc::new(NlpPipeline::new(
        client,
        Arc::new(NlpListenerRegistry::new()),
        "demo",
        "assistant",
    ));
    DispatchController::new(
        DispatchConfig::default(),
        Arc::new(MemoryUserLock::new()),
        store,
        pipeline,
        registry.clone(),
        registry,
        Arc::new(NoopTranslator),
        Arc::new(DefaultErrorActionFactory::default()),
    )
}

fn inbound(text: &str) -> Action {
    Action::sentence(
        UserId::new("user-1"),
        UserId::new("bot-1"),
        ChannelType::new("web"),
        text,
    )
}

#[tokio::test]
async fn integration_merge_support_fragments_combine_through_the_remote_call() {
    let text = "leave monday at 8am";
    let client = ScriptedNlu::new(vec![booking_result(
        text,
        vec![
            departure_span("monday", 6, 12),
            departure_span("8am", 16, 19),
        ],
    )]);
    let store = MemoryStore::new();
    let controller = controller_with(client, store.clone());

    controller
        .handle(inbound(text), ChannelContext::new(Arc::new(SilentAdapter)))
        .await;

    let timeline = store.stored("user-1").expect("stored timeline");
    let retained = timeline.dialogs[0]
        .state
        .entity_values
        .get("departure")
        .expect("departure entity state");
    assert_eq!(
        retained.value.as_ref().and_then(|value| value.value.clone()),
        Some(json!("monday + 8am"))
    );
    assert!(retained.history.is_empty());
    assert_eq!(retained.multi_requested.len(), 2);
}

#[tokio::test]
async fn integration_followup_turn_merges_against_the_retained_value() {
    let first_text = "leave monday";
    let second_text = "make it 8am";
    let client = ScriptedNlu::new(vec![
        booking_result(first_text, vec![departure_span("monday", 6, 12)]),
        booking_result(second_text, vec![departure_span("8am", 8, 11)]),
    ]);
    let store = MemoryStore::new();
    let controller = controller_with(client, store.clone());

    controller
        .handle(
            inbound(first_text),
            ChannelContext::new(Arc::new(SilentAdapter)),
        )
        .await;
    controller
        .handle(
            inbound(second_text),
            ChannelContext::new(Arc::new(SilentAdapter)),
        )
        .await;

    let timeline = store.stored("user-1").expect("stored timeline");
    let retained = timeline.dialogs[0]
        .state
        .entity_values
        .get("departure")
        .expect("departure entity state");
    // the second fragment merged with the retained first one
    assert_eq!(
        retained.value.as_ref().and_then(|value| value.value.clone()),
        Some(json!("8am + monday"))
    );
    // exactly one archived value, superseded by the second turn's action
    assert_eq!(retained.history.len(), 1);
    assert_eq!(
        retained.history[0]
            .value
            .as_ref()
            .and_then(|value| value.value.clone()),
        Some(json!("monday"))
    );
    assert!(retained.history[0].superseded_by_action_id.is_some());
    let participants: BTreeSet<String> = timeline.dialogs[0]
        .participant_ids
        .iter()
        .map(|id| id.as_str().to_string())
        .collect();
    assert!(participants.contains("user-1"));
}
