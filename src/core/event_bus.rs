//! Process-wide publish/subscribe channel for auth signals.
//!
//! The transport layer raises signals here without knowing who listens;
//! the session manager is the canonical subscriber.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, trace, warn};

use crate::error::{event_bus_publish_failed, AuthResult};

/// Wire name of the refresh signal
pub const TOKEN_REFRESHED: &str = "token-refreshed";
/// Wire name of the forced logout signal
pub const LOGOUT: &str = "logout";

/// Session-mutating signals raised by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthSignal {
    /// A refresh succeeded and the store now holds this token
    #[serde(rename_all = "camelCase")]
    TokenRefreshed { access_token: String },
    /// Refresh failed irrecoverably; the session is gone
    Logout,
}

impl AuthSignal {
    pub fn name(&self) -> &'static str {
        match self {
            AuthSignal::TokenRefreshed { .. } => TOKEN_REFRESHED,
            AuthSignal::Logout => LOGOUT,
        }
    }
}

/// Envelope carried on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    /// Unique event ID
    pub id: String,
    /// The signal itself
    pub signal: AuthSignal,
    /// Token store epoch the signal was raised in
    pub epoch: u64,
    /// Timestamp when the event was created
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl SignalEvent {
    pub fn new(signal: AuthSignal, epoch: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            signal,
            epoch,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.signal.name()
    }
}

/// Statistics about event bus activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    /// Number of signals delivered to at least one receiver
    pub events_published: u64,
    /// Number of signals dropped (no receivers)
    pub events_dropped: u64,
    /// Count of signals by wire name
    pub type_counts: HashMap<String, u64>,
}

/// Broadcast channel shared by the gateway and every subscriber
pub struct EventBus {
    /// The broadcast channel sender
    sender: broadcast::Sender<SignalEvent>,
    /// Configured capacity of the channel
    capacity: usize,
    /// Statistics about event bus activity
    pub(crate) stats: Arc<RwLock<EventBusStats>>,
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    pub fn new(capacity: usize) -> Self {
        info!(capacity, "Creating auth event bus");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: Arc::new(RwLock::new(EventBusStats::default())),
        }
    }

    /// Get a receiver to subscribe to signals
    pub fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        trace!("New subscriber registered to auth event bus");
        self.sender.subscribe()
    }

    /// Publish a signal to all subscribers.
    ///
    /// Returns the number of receivers; zero receivers is not an error.
    pub async fn publish(&self, event: SignalEvent) -> AuthResult<usize> {
        let name = event.name();
        trace!(signal = name, epoch = event.epoch, "Publishing auth signal");

        match self.sender.send(event) {
            Ok(receivers) => {
                let mut stats = self.stats.write().await;
                stats.events_published += 1;
                *stats.type_counts.entry(name.to_string()).or_insert(0) += 1;

                trace!(receivers, "Auth signal published");
                Ok(receivers)
            }
            Err(broadcast::error::SendError(event)) => {
                if self.sender.receiver_count() == 0 {
                    self.stats.write().await.events_dropped += 1;
                    warn!(signal = event.name(), "No receivers for auth signal, dropped");
                    Ok(0)
                } else {
                    Err(event_bus_publish_failed(format!(
                        "send of {} failed",
                        event.name()
                    )))
                }
            }
        }
    }

    /// Get current event bus statistics
    pub async fn get_stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }

    /// Reset all statistics counters
    pub async fn reset_stats(&self) {
        info!("Resetting auth event bus statistics");
        *self.stats.write().await = EventBusStats::default();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
