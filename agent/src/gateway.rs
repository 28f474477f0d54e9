//! Stream Gateway: binds one client connection to the Event Bus.
//!
//! A [`StreamConnection`] goes `Connecting -> Streaming -> Closed`. Opening
//! it subscribes to the bus and arms the heartbeat; closing it (explicitly,
//! or by dropping it on any disconnect path) cancels the heartbeat and
//! unsubscribes.

use std::sync::Arc;
use std::time::Duration;

use earnwatch_core::events::{timestamp_payload, FRAME_CONNECTED, FRAME_HEARTBEAT};
use earnwatch_core::protocol::messages::JsonRpcNotification;
use earnwatch_core::source::Clock;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{EventBus, Subscription};

/// Lifecycle of one stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Closed,
}

/// Factory for stream connections sharing one bus and heartbeat period.
pub struct StreamGateway {
    bus: EventBus,
    clock: Arc<dyn Clock>,
    heartbeat: Duration,
}

impl StreamGateway {
    pub fn new(bus: EventBus, clock: Arc<dyn Clock>, heartbeat: Duration) -> Self {
        Self {
            bus,
            clock,
            heartbeat,
        }
    }

    /// A new connection in the `Connecting` state.
    pub fn connect(&self) -> StreamConnection {
        StreamConnection {
            id: Uuid::new_v4(),
            state: ConnectionState::Connecting,
            bus: self.bus.clone(),
            clock: self.clock.clone(),
            heartbeat_period: self.heartbeat,
            subscription: None,
            heartbeat: None,
        }
    }
}

pub struct StreamConnection {
    id: Uuid,
    state: ConnectionState,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    heartbeat_period: Duration,
    subscription: Option<Subscription>,
    heartbeat: Option<Interval>,
}

impl StreamConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Start streaming and return the `connected` frame to send first.
    ///
    /// Calling this on a connection that is already open or closed only
    /// returns a fresh `connected` frame.
    pub fn open(&mut self) -> JsonRpcNotification {
        if self.state == ConnectionState::Connecting {
            let subscription = self.bus.subscribe();
            debug!("Stream {} open as subscriber {}", self.id, subscription.id());
            self.subscription = Some(subscription);
            let mut heartbeat =
                tokio::time::interval_at(Instant::now() + self.heartbeat_period, self.heartbeat_period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.heartbeat = Some(heartbeat);
            self.state = ConnectionState::Streaming;
        }
        JsonRpcNotification::new(FRAME_CONNECTED, timestamp_payload(self.clock.now()))
    }

    /// Wait for the next frame: a bus event or a heartbeat.
    ///
    /// Returns `None` once the connection is not streaming, including after
    /// the bus evicted it for falling behind (the connection is then
    /// closed). Cancel-safe, so it can sit in a `select!` next to the
    /// transport's reader.
    pub async fn next_frame(&mut self) -> Option<JsonRpcNotification> {
        let frame = {
            let clock = &self.clock;
            let (Some(subscription), Some(heartbeat)) =
                (self.subscription.as_mut(), self.heartbeat.as_mut())
            else {
                return None;
            };

            loop {
                tokio::select! {
                    event = subscription.recv() => {
                        let Some(event) = event else {
                            break None;
                        };
                        match event.payload() {
                            Ok(params) => break Some(JsonRpcNotification::new(event.name(), params)),
                            Err(e) => warn!("Dropping '{}' frame that failed to serialize: {e}", event.name()),
                        }
                    }
                    _ = heartbeat.tick() => {
                        break Some(JsonRpcNotification::new(
                            FRAME_HEARTBEAT,
                            timestamp_payload(clock.now()),
                        ));
                    }
                }
            }
        };

        if frame.is_none() {
            warn!("Stream {} was dropped by the event bus", self.id);
            self.close();
        }
        frame
    }

    /// Stop the heartbeat and unsubscribe. Only a streaming connection
    /// moves to `Closed`; returns whether this call closed it.
    pub fn close(&mut self) -> bool {
        if self.state != ConnectionState::Streaming {
            return false;
        }
        self.heartbeat = None;
        self.subscription = None;
        self.state = ConnectionState::Closed;
        debug!(
            "Stream {} closed ({} subscribers remain)",
            self.id,
            self.bus.subscriber_count()
        );
        true
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}
