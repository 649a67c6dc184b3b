//! Explicit registry of installed channel adapters.
//!
//! Adapters are registered imperatively at startup and looked up by channel
//! type when an inbound event arrives. The registry has an explicit
//! lifecycle (`register`, `adapter_for`, `clear`) and is passed by reference
//! to whoever needs it; there is no ambient global state and no discovery.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use murmur_contract::{ChannelAdapter, ChannelType};
use tracing::info;

#[derive(Default)]
/// Public struct `ConnectorRegistry` used across Murmur components.
pub struct ConnectorRegistry {
    adapters: Mutex<BTreeMap<String, Arc<dyn ChannelAdapter>>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing any previous one for the same channel.
    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        let channel_type = adapter.channel_type();
        info!(channel = channel_type.as_str(), "registering channel adapter");
        self.adapters
            .lock()
            .expect("connector registry lock poisoned")
            .insert(channel_type.as_str().to_string(), adapter);
    }

    pub fn adapter_for(&self, channel_type: &ChannelType) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters
            .lock()
            .expect("connector registry lock poisoned")
            .get(channel_type.as_str())
            .cloned()
    }

    pub fn installed_channels(&self) -> Vec<ChannelType> {
        self.adapters
            .lock()
            .expect("connector registry lock poisoned")
            .keys()
            .map(|key| ChannelType::new(key.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.adapters
            .lock()
            .expect("connector registry lock poisoned")
            .clear();
    }
}
