// src/state.rs
use std::sync::Arc;
use tracing;

use crate::errors::RideResult;
use crate::services::{
    live_channel::RideEventHub,
    matching_service::MatchingService,
    profile_service::{MemoryProfileService, ProfileOperations, RedisProfileService},
    ride_service::RideService,
    ride_store::{MemoryRideStore, RedisRideStore, RideStore},
};

pub struct AppState {
    pub store: Arc<dyn RideStore>,
    pub profiles: Arc<dyn ProfileOperations>,
    pub rides: Arc<RideService>,
    pub matching: Arc<MatchingService>,
    pub events: Arc<RideEventHub>,
    pub config: AppConfig,
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub redis_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            redis_url: std::env::var("REDIS_URL").ok(),
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> RideResult<Self> {
        let (store, profiles): (Arc<dyn RideStore>, Arc<dyn ProfileOperations>) =
            match &config.redis_url {
                Some(url) => (
                    Arc::new(RedisRideStore::new(url)?),
                    Arc::new(RedisProfileService::new(url)?),
                ),
                None => {
                    tracing::warn!("REDIS_URL not set, using in-memory stores");
                    (
                        Arc::new(MemoryRideStore::new()),
                        Arc::new(MemoryProfileService::new()),
                    )
                }
            };

        let events = Arc::new(RideEventHub::new());
        let rides = Arc::new(RideService::new(
            store.clone(),
            profiles.clone(),
            events.clone(),
        ));
        let matching = Arc::new(MatchingService::new(store.clone(), profiles.clone()));

        Ok(Self {
            store,
            profiles,
            rides,
            matching,
            events,
            config,
        })
    }
}
