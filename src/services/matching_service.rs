// src/services/matching_service.rs
use async_trait::async_trait;
use std::sync::Arc;
use tracing;

use crate::{
    errors::RideResult,
    models::ride::{GeoPoint, RideResponse},
    models::user::{Availability, DriverSummary, UserRole},
    services::{profile_service::ProfileOperations, ride_store::RideStore},
};

/// Upper bound on the pending page handed to a driver. Driver apps render
/// this list on every refresh, so it stays small.
pub const PENDING_PAGE_SIZE: usize = 10;

#[async_trait]
pub trait MatchingOperations: Send + Sync {
    async fn list_pending_rides(&self, driver_id: &str) -> RideResult<Vec<RideResponse>>;
    async fn find_available_drivers(
        &self,
        near: Option<GeoPoint>,
        radius_km: f64,
    ) -> RideResult<Vec<DriverSummary>>;
}

pub struct MatchingService {
    store: Arc<dyn RideStore>,
    profiles: Arc<dyn ProfileOperations>,
}

impl MatchingService {
    pub fn new(store: Arc<dyn RideStore>, profiles: Arc<dyn ProfileOperations>) -> Self {
        Self { store, profiles }
    }
}

#[async_trait]
impl MatchingOperations for MatchingService {
    /// Work offered to a driver going online. Not being online is a normal
    /// state, answered with an empty page rather than an error.
    async fn list_pending_rides(&self, driver_id: &str) -> RideResult<Vec<RideResponse>> {
        let profile = match self.profiles.get(driver_id).await? {
            Some(p) if p.role == UserRole::Driver && p.availability == Availability::Online => p,
            _ => {
                tracing::debug!("Driver {} not online, empty pending page", driver_id);
                return Ok(Vec::new());
            }
        };

        let mut pending = self.store.list_pending().await?;

        if let Some(vehicle) = profile.vehicle_type {
            pending.retain(|r| r.vehicle_type == vehicle);
        }

        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pending.truncate(PENDING_PAGE_SIZE);

        Ok(pending.into_iter().map(|r| r.to_response(true)).collect())
    }

    /// Drivers a rider can pick from. With a coordinate, filters by
    /// distance to each driver's last known position, closest first.
    async fn find_available_drivers(
        &self,
        near: Option<GeoPoint>,
        radius_km: f64,
    ) -> RideResult<Vec<DriverSummary>> {
        let online = self.profiles.list_online_drivers().await?;

        let summaries: Vec<DriverSummary> = match near {
            Some(point) => {
                let mut in_range: Vec<(f64, DriverSummary)> = online
                    .iter()
                    .filter_map(|p| {
                        let last = p.last_location.as_ref()?;
                        let distance = point.distance_km(&last.location);
                        (distance <= radius_km).then(|| (distance, DriverSummary::from(p)))
                    })
                    .collect();

                in_range.sort_by(|a, b| a.0.total_cmp(&b.0));
                in_range.into_iter().map(|(_, s)| s).collect()
            }
            None => online.iter().map(DriverSummary::from).collect(),
        };

        tracing::debug!("Matched {} available drivers", summaries.len());
        Ok(summaries)
    }
}
