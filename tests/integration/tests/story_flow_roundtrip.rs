//! End-to-end story flows: programmatic switching and ask-again rounds
//! across full dispatched turns.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use murmur_contract::{
    Action, ChannelAdapter, ChannelType, DefaultErrorActionFactory, NoopTranslator, UserId,
};
use murmur_dialog::{StoryDefinition, StoryTag, TimelineStore, UserTimeline};
use murmur_engine::{
    BotBus, ChannelContext, DispatchConfig, DispatchController, MemoryUserLock,
    SimpleStoryRegistry,
};
use murmur_nlp::{NlpListener, NlpListenerRegistry, NlpPipeline, NlpQuery, NlpResult, NluClient, NluClientError};

struct EchoKeywordListener;

impl NlpListener for EchoKeywordListener {
    fn handle_keyword(&self, sentence: &str) -> Result<Option<String>> {
        Ok(Some(sentence.trim().replace(' ', "_")))
    }
}

struct NullNlu;

#[async_trait]
impl NluClient for NullNlu {
    async fn classify(&self, _query: &NlpQuery) -> Result<Option<NlpResult>, NluClientError> {
        Ok(None)
    }
}

struct RecordingAdapter {
    sent: Mutex<Vec<Action>>,
}

impl RecordingAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("sent")
            .iter()
            .filter_map(|action| action.text().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::new("web")
    }

    fn synchronous(&self) -> bool {
        true
    }

    async fn send(&self, action: Action) -> Result<()> {
        self.sent.lock().expect("sent").push(action);
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

fn controller_with(registry: SimpleStoryRegistry, store: Arc<MemoryStore>) -> DispatchController {
    let registry = Arc::new(registry);
    let mut listeners = NlpListenerRegistry::new();
    listeners.register(Arc::new(EchoKeywordListener));
    let pipeline = Arc::new(NlpPipeline::new(
        Arc::new(NullNlu),
        Arc::new(listeners),
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
async fn integration_handle_and_switch_story_replies_from_the_target_story() {
    let checkout = StoryDefinition::new("checkout", "pay");
    let mut registry = SimpleStoryRegistry::with_silent_unknown();
    let switch_target = checkout.clone();
    registry.register(
        StoryDefinition::new("booking", "book_trip"),
        Arc::new(move |bus: &mut BotBus<'_>| {
            bus.send_raw_text("trip booked");
            bus.handle_and_switch_story(&switch_target)
        }),
    );
    registry.register(
        checkout,
        Arc::new(|bus: &mut BotBus<'_>| {
            bus.end_raw_text("paying now");
            Ok(())
        }),
    );
    let store = MemoryStore::new();
    let controller = controller_with(registry, store.clone());
    let adapter = RecordingAdapter::new();

    controller
        .handle(inbound("book_trip"), ChannelContext::new(adapter.clone()))
        .await;

    assert_eq!(adapter.sent_texts(), vec!["trip booked", "paying now"]);
    let timeline = store.stored("user-1").expect("stored timeline");
    let dialog = &timeline.dialogs[0];
    assert_eq!(dialog.stories.len(), 2);
    assert_eq!(dialog.stories[0].definition_id(), "booking");
    assert_eq!(dialog.stories[1].definition_id(), "checkout");
    // the switched story holds the answer sent after the switch
    assert_eq!(dialog.stories[1].actions.len(), 1);
    assert_eq!(dialog.state.current_intent.as_deref(), Some("pay"));
}

#[tokio::test]
async fn integration_ask_again_rounds_grow_and_reset_across_turns() {
    let observations: Arc<Mutex<Vec<(u32, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SimpleStoryRegistry::with_silent_unknown();
    registry.register(
        StoryDefinition::new("repeat", "ask_again").with_tags([StoryTag::AskAgain]),
        Arc::new(|bus: &mut BotBus<'_>| {
            bus.end_raw_text("could you say that again?");
            Ok(())
        }),
    );
    let greetings_log = Arc::clone(&observations);
    registry.register(
        StoryDefinition::new("greetings", "hello"),
        Arc::new(move |bus: &mut BotBus<'_>| {
            greetings_log
                .lock()
                .expect("observations")
                .push((bus.ask_again_round(), bus.ask_again_in_progress()));
            bus.end_raw_text("hi!");
            Ok(())
        }),
    );
    let farewell_log = Arc::clone(&observations);
    registry.register(
        StoryDefinition::new("farewell", "goodbye"),
        Arc::new(move |bus: &mut BotBus<'_>| {
            farewell_log
                .lock()
                .expect("observations")
                .push((bus.ask_again_round(), bus.ask_again_in_progress()));
            bus.end_raw_text("bye!");
            Ok(())
        }),
    );
    let store = MemoryStore::new();
    let controller = controller_with(registry, store.clone());
    let adapter = RecordingAdapter::new();

    controller
        .handle(inbound("ask_again"), ChannelContext::new(adapter.clone()))
        .await;
    controller
        .handle(inbound("hello"), ChannelContext::new(adapter.clone()))
        .await;
    controller
        .handle(inbound("goodbye"), ChannelContext::new(adapter.clone()))
        .await;

    // Leaving the tagged story keeps the loop alive and bumps the round;
    // leaving the untagged story resets it.
    assert_eq!(
        observations.lock().expect("observations").as_slice(),
        &[(2, true), (1, false)]
    );
    let timeline = store.stored("user-1").expect("stored timeline");
    assert_eq!(timeline.dialogs[0].stories.len(), 3);
}
