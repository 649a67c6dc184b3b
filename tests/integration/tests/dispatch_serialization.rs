//! Concurrency properties of the dispatch loop: one user's turns serialize
//! behind the lock while independent users proceed in parallel.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use murmur_contract::{
    Action, ChannelAdapter, ChannelType, DefaultErrorActionFactory, NoopTranslator, UserId,
};
use murmur_dialog::{StoryDefinition, TimelineStore, UserTimeline};
use murmur_engine::{
    BotBus, ChannelContext, DispatchConfig, DispatchController, MemoryUserLock,
    SimpleStoryRegistry,
};
use murmur_nlp::{NlpListener, NlpListenerRegistry, NlpPipeline, NlpQuery, NlpResult, NluClient, NluClientError};
use tokio::sync::Barrier;

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

/// Store that journals every load/save and optionally stalls loads, so tests
/// can observe turn boundaries and force contention windows.
struct JournalingStore {
    timelines: Mutex<BTreeMap<String, UserTimeline>>,
    journal: Arc<Mutex<Vec<String>>>,
    load_delay: Duration,
    load_barrier: Option<Arc<Barrier>>,
}

impl JournalingStore {
    fn new(load_delay: Duration, load_barrier: Option<Arc<Barrier>>) -> Arc<Self> {
        Arc::new(Self {
            timelines: Mutex::new(BTreeMap::new()),
            journal: Arc::new(Mutex::new(Vec::new())),
            load_delay,
            load_barrier,
        })
    }

    fn journal_entries(&self) -> Vec<String> {
        self.journal.lock().expect("journal").clone()
    }
}

#[async_trait]
impl TimelineStore for JournalingStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<UserTimeline>> {
        self.journal
            .lock()
            .expect("journal")
            .push(format!("load:{user_id}"));
        if let Some(barrier) = &self.load_barrier {
            barrier.wait().await;
        }
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        Ok(self
            .timelines
            .lock()
            .expect("timelines")
            .get(user_id.as_str())
            .cloned())
    }

    async fn save(&self, timeline: &UserTimeline) -> Result<()> {
        self.journal
            .lock()
            .expect("journal")
            .push(format!("save:{}", timeline.player_id));
        self.timelines
            .lock()
            .expect("timelines")
            .insert(timeline.player_id.as_str().to_string(), timeline.clone());
        Ok(())
    }
}

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn build_controller(store: Arc<JournalingStore>, handled: Arc<Mutex<Vec<String>>>) -> Arc<DispatchController> {
    let mut registry = SimpleStoryRegistry::with_silent_unknown();
    registry.register(
        StoryDefinition::new("greetings", "hello").with_secondary_intents(["hello_again"]),
        Arc::new(move |bus: &mut BotBus<'_>| {
            handled
                .lock()
                .expect("handled")
                .push(bus.user_text().unwrap_or_default().to_string());
            bus.end_raw_text("hi!");
            Ok(())
        }),
    );
    let registry = Arc::new(registry);

    let mut listeners = NlpListenerRegistry::new();
    listeners.register(Arc::new(EchoKeywordListener));
    let pipeline = Arc::new(NlpPipeline::new(
        Arc::new(NullNlu),
        Arc::new(listeners),
        "demo",
        "assistant",
    ));

    Arc::new(DispatchController::new(
        DispatchConfig {
            max_lock_attempts: 100,
            lock_retry_delay: Duration::from_millis(5),
        },
        Arc::new(MemoryUserLock::new()),
        store,
        pipeline,
        registry.clone(),
        registry,
        Arc::new(NoopTranslator),
        Arc::new(DefaultErrorActionFactory::default()),
    ))
}

fn inbound(user: &str, text: &str) -> Action {
    Action::sentence(
        UserId::new(user),
        UserId::new("bot-1"),
        ChannelType::new("web"),
        text,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_same_user_turns_never_interleave() {
    init_tracing();
    let store = JournalingStore::new(Duration::from_millis(20), None);
    let handled = Arc::new(Mutex::new(Vec::new()));
    let controller = build_controller(store.clone(), handled.clone());

    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller
                .handle(inbound("user-1", "hello"), ChannelContext::new(Arc::new(SilentAdapter)))
                .await;
        })
    };
    let second = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller
                .handle(
                    inbound("user-1", "hello again"),
                    ChannelContext::new(Arc::new(SilentAdapter)),
                )
                .await;
        })
    };
    first.await.expect("first turn");
    second.await.expect("second turn");

    // Strict alternation: a turn's save always precedes the next turn's load.
    let phases: Vec<String> = store
        .journal_entries()
        .iter()
        .map(|entry| entry.split(':').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(phases, vec!["load", "save", "load", "save"]);
    assert_eq!(handled.lock().expect("handled").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_independent_users_are_processed_in_parallel() {
    init_tracing();
    // Both loads must be in flight at once for the barrier to open; a
    // serialized dispatcher would deadlock here and trip the timeout.
    let barrier = Arc::new(Barrier::new(2));
    let store = JournalingStore::new(Duration::ZERO, Some(barrier));
    let handled = Arc::new(Mutex::new(Vec::new()));
    let controller = build_controller(store.clone(), handled.clone());

    let turns = {
        let alice = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .handle(inbound("alice", "hello"), ChannelContext::new(Arc::new(SilentAdapter)))
                    .await;
            })
        };
        let bob = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .handle(inbound("bob", "hello"), ChannelContext::new(Arc::new(SilentAdapter)))
                    .await;
            })
        };
        async move {
            alice.await.expect("alice turn");
            bob.await.expect("bob turn");
        }
    };
    tokio::time::timeout(Duration::from_secs(5), turns)
        .await
        .expect("independent users must not serialize");

    assert_eq!(handled.lock().expect("handled").len(), 2);
    let journal = store.journal_entries();
    assert_eq!(journal.len(), 4);
    assert_eq!(
        journal
            .iter()
            .filter(|entry| entry.starts_with("save"))
            .count(),
        2
    );
}
