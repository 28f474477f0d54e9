//! Engine assembly: one owned structure holding the Event Bus, the
//! Session Manager and the Stream Gateway.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use earnwatch_core::config::EngineConfig;
use earnwatch_core::source::{Clock, SnapshotSource, SystemClock};
use earnwatch_core::store::{JsonFileStore, MemoryStore, SnapshotStore};
use tracing::info;

use crate::bridge::PersistenceBridge;
use crate::bus::EventBus;
use crate::gateway::StreamGateway;
use crate::polling::PollingManager;
use crate::sources::build_source;

pub struct Engine {
    config: EngineConfig,
    bus: EventBus,
    polling: PollingManager,
    gateway: StreamGateway,
    started_at: Instant,
}

impl Engine {
    /// Wire an engine from explicit collaborators.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn SnapshotSource>,
        store: Option<Arc<dyn SnapshotStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bus = EventBus::with_capacity(config.subscriber_buffer);
        let bridge = match store {
            Some(store) => PersistenceBridge::new(store),
            None => PersistenceBridge::disabled(),
        };
        let polling = PollingManager::new(&config, source, bus.clone(), clock.clone(), bridge);
        let gateway = StreamGateway::new(bus.clone(), clock, config.heartbeat_interval());
        Self {
            config,
            bus,
            polling,
            gateway,
            started_at: Instant::now(),
        }
    }

    /// Build the engine described by `config`, using the real clock.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let source_config = config
            .source
            .clone()
            .ok_or_else(|| anyhow!("No source configured (set \"source\" in the config file)"))?;
        let source = build_source(&source_config, &config, clock.clone())?;

        let store: Arc<dyn SnapshotStore> = match &config.store_path {
            Some(path) => {
                info!("Persisting snapshots to {}", path.display());
                Arc::new(JsonFileStore::open(path))
            }
            None => {
                info!("No storePath configured, keeping snapshots in memory");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self::new(config, source, Some(store), clock))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn polling(&self) -> &PollingManager {
        &self.polling
    }

    pub fn gateway(&self) -> &StreamGateway {
        &self.gateway
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Stop every polling session.
    pub async fn shutdown(&self) {
        let subjects = self.polling.active_subjects().await;
        if !subjects.is_empty() {
            info!("Stopping polling for {}", subjects.join(", "));
        }
        self.polling.shutdown().await;
    }
}
