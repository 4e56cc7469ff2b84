// src/services/live_channel.rs
//
// Per-ride event fan-out. Events are informational only: the authoritative
// state change is the ride store write that precedes every publish, and a
// client that reconnects is expected to re-fetch the ride rather than rely
// on having seen every frame.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};
use tracing;

use crate::models::ride::{GeoPoint, RideStatus};

/// Events buffered per ride group. A receiver that falls further behind
/// than this loses the oldest events instead of stalling the publisher.
const EVENT_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RideEvent {
    LocationUpdated {
        ride_id: String,
        location: GeoPoint,
        recorded_at: DateTime<Utc>,
    },
    StatusUpdated {
        ride_id: String,
        status: RideStatus,
        timestamp: DateTime<Utc>,
    },
    CodeVerified {
        ride_id: String,
    },
    /// Connection confirmation, sent once to a newly joined observer.
    Joined {
        ride_id: String,
        observer_id: String,
    },
}

impl RideEvent {
    pub fn ride_id(&self) -> &str {
        match self {
            RideEvent::LocationUpdated { ride_id, .. } => ride_id,
            RideEvent::StatusUpdated { ride_id, .. } => ride_id,
            RideEvent::CodeVerified { ride_id } => ride_id,
            RideEvent::Joined { ride_id, .. } => ride_id,
        }
    }
}

/// One broadcast group per ride. Ordering within a ride follows from the
/// single sender per group; there is no ordering across rides.
pub struct RideEventHub {
    groups: RwLock<HashMap<String, broadcast::Sender<RideEvent>>>,
}

impl RideEventHub {
    pub fn new() -> Self {
        Self { groups: RwLock::new(HashMap::new()) }
    }

    /// Joins the observer group for a ride, creating the group on first
    /// join. Events published before the join are not replayed.
    pub async fn join(&self, ride_id: &str) -> broadcast::Receiver<RideEvent> {
        let mut groups = self.groups.write().await;
        groups
            .entry(ride_id.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_BUFFER_SIZE).0)
            .subscribe()
    }

    /// Drops the ride's group once its last observer is gone. Receivers
    /// detach by being dropped; this only reclaims the sender side.
    pub async fn leave(&self, ride_id: &str) {
        let mut groups = self.groups.write().await;
        if let Some(tx) = groups.get(ride_id) {
            if tx.receiver_count() == 0 {
                groups.remove(ride_id);
                tracing::debug!(ride_id, "Dropped empty ride event group");
            }
        }
    }

    /// Fire-and-forget publish to the ride's current observers. No group or
    /// no receivers means the event is silently dropped; a slow observer
    /// overruns its own buffer without affecting anyone else.
    pub async fn publish(&self, event: RideEvent) {
        let groups = self.groups.read().await;
        if let Some(tx) = groups.get(event.ride_id()) {
            match tx.send(event.clone()) {
                Ok(count) => {
                    tracing::debug!(ride_id = event.ride_id(), receivers = count, "Published ride event");
                }
                Err(_) => {
                    tracing::debug!(ride_id = event.ride_id(), "No observers for ride event");
                }
            }
        }
    }

    pub async fn observer_count(&self, ride_id: &str) -> usize {
        let groups = self.groups.read().await;
        groups.get(ride_id).map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}

impl Default for RideEventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event(ride_id: &str, status: RideStatus) -> RideEvent {
        RideEvent::StatusUpdated {
            ride_id: ride_id.to_string(),
            status,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_observers_is_noop() {
        let hub = RideEventHub::new();
        // Should not panic or block
        hub.publish(status_event("rid-1", RideStatus::Accepted)).await;
    }

    #[tokio::test]
    async fn test_observer_receives_events_in_order() {
        let hub = RideEventHub::new();
        let mut rx = hub.join("rid-1").await;

        hub.publish(status_event("rid-1", RideStatus::Accepted)).await;
        hub.publish(status_event("rid-1", RideStatus::Started)).await;
        hub.publish(RideEvent::CodeVerified { ride_id: "rid-1".to_string() }).await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            RideEvent::StatusUpdated { status: RideStatus::Accepted, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            RideEvent::StatusUpdated { status: RideStatus::Started, .. }
        ));
        assert!(matches!(rx.try_recv().unwrap(), RideEvent::CodeVerified { .. }));
    }

    #[tokio::test]
    async fn test_groups_are_isolated_per_ride() {
        let hub = RideEventHub::new();
        let mut rx_one = hub.join("rid-1").await;
        let mut rx_two = hub.join("rid-2").await;

        hub.publish(status_event("rid-1", RideStatus::Accepted)).await;

        assert!(rx_one.try_recv().is_ok());
        assert!(rx_two.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_all_observers_of_a_ride_receive() {
        let hub = RideEventHub::new();
        let mut rx_a = hub.join("rid-1").await;
        let mut rx_b = hub.join("rid-1").await;

        hub.publish(status_event("rid-1", RideStatus::PickedUp)).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_slow_observer_drops_oldest_without_blocking_publisher() {
        let hub = RideEventHub::new();
        let mut rx = hub.join("rid-1").await;

        for _ in 0..(EVENT_BUFFER_SIZE + 10) {
            hub.publish(status_event("rid-1", RideStatus::Accepted)).await;
        }

        // The overrun surfaces as a lag marker, then delivery resumes
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_leave_reclaims_empty_group() {
        let hub = RideEventHub::new();
        let rx = hub.join("rid-1").await;
        assert_eq!(hub.observer_count("rid-1").await, 1);

        drop(rx);
        hub.leave("rid-1").await;
        assert_eq!(hub.observer_count("rid-1").await, 0);
        assert!(hub.groups.read().await.is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = RideEvent::LocationUpdated {
            ride_id: "rid-1".to_string(),
            location: GeoPoint { latitude: 5.6, longitude: -0.18 },
            recorded_at: Utc::now(),
        };

        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"type\":\"location_updated\""));

        let back: RideEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.ride_id(), "rid-1");
    }
}
