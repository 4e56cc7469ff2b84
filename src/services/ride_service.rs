// src/services/ride_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{RideError, RideResult},
    models::ride::{
        CancelledBy, CreateRideRequest, GeoPoint, LocationPing, Ride, RideResponse, RideStatus,
    },
    models::user::{Availability, Caller, UserRole},
    services::{
        live_channel::{RideEvent, RideEventHub},
        pickup_service::PickupCodeIssuer,
        profile_service::ProfileOperations,
        ride_store::{RideStore, StoreError},
    },
    utils::id_generator::{IdGenerator, IdType},
};

/// The edges a ride may travel. Everything else is refused with
/// `InvalidTransition`, leaving the record untouched.
const TRANSITIONS: &[(RideStatus, RideStatus)] = &[
    (RideStatus::Pending, RideStatus::Accepted),
    (RideStatus::Pending, RideStatus::Rejected),
    (RideStatus::Accepted, RideStatus::Started),
    (RideStatus::Started, RideStatus::PickedUp),
    (RideStatus::PickedUp, RideStatus::Completed),
    (RideStatus::Accepted, RideStatus::Cancelled),
    (RideStatus::Started, RideStatus::Cancelled),
    (RideStatus::PickedUp, RideStatus::Cancelled),
];

fn transition_allowed(from: RideStatus, to: RideStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

/// Ride lifecycle operations. Every status write funnels through the store's
/// compare-and-set transition, so concurrent callers on one ride resolve to
/// a single committed ordering.
#[async_trait]
pub trait RideOperations: Send + Sync {
    async fn create_ride(
        &self,
        caller: &Caller,
        request: CreateRideRequest,
    ) -> RideResult<RideResponse>;
    async fn accept_ride(&self, ride_id: &str, caller: &Caller) -> RideResult<RideResponse>;
    async fn reject_ride(&self, ride_id: &str, caller: &Caller) -> RideResult<()>;
    async fn verify_pickup_code(
        &self,
        ride_id: &str,
        caller: &Caller,
        code: &str,
    ) -> RideResult<()>;
    async fn advance_status(
        &self,
        ride_id: &str,
        caller: &Caller,
        target: RideStatus,
    ) -> RideResult<RideResponse>;
    async fn report_location(
        &self,
        ride_id: &str,
        caller: &Caller,
        location: GeoPoint,
    ) -> RideResult<()>;
    async fn get_ride(&self, ride_id: &str, caller: &Caller) -> RideResult<RideResponse>;
    async fn get_shared_ride(&self, ride_id: &str, token: &str) -> RideResult<RideResponse>;
    async fn list_my_rides(&self, caller: &Caller) -> RideResult<Vec<RideResponse>>;
}

pub struct RideService {
    store: Arc<dyn RideStore>,
    profiles: Arc<dyn ProfileOperations>,
    events: Arc<RideEventHub>,
}

impl RideService {
    pub fn new(
        store: Arc<dyn RideStore>,
        profiles: Arc<dyn ProfileOperations>,
        events: Arc<RideEventHub>,
    ) -> Self {
        Self { store, profiles, events }
    }

    async fn load(&self, ride_id: &str) -> RideResult<Ride> {
        if !IdGenerator::validate_id(ride_id, Some(IdType::Ride)) {
            tracing::debug!("Malformed ride id: {}", ride_id);
            return Err(RideError::ride_not_found(ride_id));
        }
        self.store
            .get(ride_id)
            .await
            .map_err(|e| store_error(e, ride_id))?
            .ok_or_else(|| RideError::ride_not_found(ride_id))
    }

    fn require_assigned_driver(&self, ride: &Ride, caller: &Caller) -> RideResult<()> {
        if ride.driver_id.as_deref() != Some(caller.id.as_str()) {
            return Err(RideError::unauthorized(
                "only the assigned driver may perform this action",
            ));
        }
        Ok(())
    }

    async fn broadcast_status(&self, ride: &Ride) {
        self.events
            .publish(RideEvent::StatusUpdated {
                ride_id: ride.id.clone(),
                status: ride.status,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Availability and stats writes land after the durable ride write; a
    /// failure in the profile collaborator is logged, not rolled back into
    /// the already-committed transition.
    async fn free_driver(&self, driver_id: &str) {
        if let Err(e) = self
            .profiles
            .set_availability(driver_id, Availability::Online)
            .await
        {
            tracing::warn!("Could not return driver {} to online: {}", driver_id, e);
        }
    }

    /// Shared path for the driver-progress transitions, each of which has
    /// exactly one legal source state.
    async fn drive_forward(
        &self,
        ride_id: &str,
        caller: &Caller,
        target: RideStatus,
    ) -> RideResult<RideResponse> {
        let observed = self.load(ride_id).await?;
        self.require_assigned_driver(&observed, caller)?;

        if !transition_allowed(observed.status, target) {
            return Err(RideError::InvalidTransition { from: observed.status, to: target });
        }

        if target == RideStatus::Started && !observed.code_verified {
            return Err(RideError::CodeNotVerified);
        }

        let expected_from = match target {
            RideStatus::Started => RideStatus::Accepted,
            RideStatus::PickedUp => RideStatus::Started,
            RideStatus::Completed => RideStatus::PickedUp,
            _ => unreachable!("drive_forward only handles driver-progress targets"),
        };

        let now = Utc::now();
        let updated = self
            .store
            .transition(
                ride_id,
                expected_from,
                Box::new(move |ride| {
                    ride.status = target;
                    match target {
                        RideStatus::Started => ride.started_at = Some(now),
                        RideStatus::PickedUp => ride.picked_up_at = Some(now),
                        RideStatus::Completed => ride.completed_at = Some(now),
                        _ => {}
                    }
                }),
            )
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual } => {
                    RideError::InvalidTransition { from: actual, to: target }
                }
                other => store_error(other, ride_id),
            })?;

        tracing::info!("Ride {} moved to {}", ride_id, target.as_str());

        if target == RideStatus::Completed {
            if let Some(driver_id) = &updated.driver_id {
                if let Err(e) = self.profiles.record_completed_trip(driver_id).await {
                    tracing::warn!("Could not record trip for driver {}: {}", driver_id, e);
                }
                self.free_driver(driver_id).await;
            }
        }

        self.broadcast_status(&updated).await;
        Ok(updated.to_response(false))
    }

    async fn cancel_ride(&self, ride_id: &str, caller: &Caller) -> RideResult<RideResponse> {
        let observed = self.load(ride_id).await?;

        let cancelled_by = if observed.rider_id == caller.id {
            CancelledBy::Rider
        } else if observed.driver_id.as_deref() == Some(caller.id.as_str()) {
            CancelledBy::Driver
        } else {
            return Err(RideError::unauthorized(
                "only the rider or the assigned driver may cancel this ride",
            ));
        };

        if !transition_allowed(observed.status, RideStatus::Cancelled) {
            return Err(RideError::InvalidTransition {
                from: observed.status,
                to: RideStatus::Cancelled,
            });
        }

        let now = Utc::now();
        let updated = self
            .store
            .transition(
                ride_id,
                observed.status,
                Box::new(move |ride| {
                    ride.status = RideStatus::Cancelled;
                    ride.cancelled_at = Some(now);
                    ride.cancelled_by = Some(cancelled_by);
                }),
            )
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual } => {
                    RideError::InvalidTransition { from: actual, to: RideStatus::Cancelled }
                }
                other => store_error(other, ride_id),
            })?;

        tracing::info!("Ride {} cancelled by {:?}", ride_id, cancelled_by);

        // The ride ending frees the driver no matter which party pulled out
        if let Some(driver_id) = &updated.driver_id {
            self.free_driver(driver_id).await;
        }

        self.broadcast_status(&updated).await;
        Ok(updated.to_response(false))
    }
}

fn store_error(err: StoreError, ride_id: &str) -> RideError {
    match err {
        StoreError::NotFound => RideError::ride_not_found(ride_id),
        StoreError::StatusConflict { actual } => {
            // Call sites with a specific mapping handle this before we do
            RideError::InvalidTransition { from: actual, to: actual }
        }
        StoreError::Backend(msg) => RideError::StoreUnavailable(msg),
        StoreError::Serialization(msg) => RideError::Serialization(msg),
    }
}

#[async_trait]
impl RideOperations for RideService {
    async fn create_ride(
        &self,
        caller: &Caller,
        request: CreateRideRequest,
    ) -> RideResult<RideResponse> {
        if caller.role != UserRole::Rider {
            return Err(RideError::unauthorized("only riders can request rides"));
        }
        request.validate()?;

        let ride = Ride::new(
            IdGenerator::generate(IdType::Ride),
            caller.id.clone(),
            request,
        );
        self.store
            .put(&ride)
            .await
            .map_err(|e| store_error(e, &ride.id))?;

        tracing::info!("Ride {} created by rider {}", ride.id, caller.id);
        Ok(ride.to_response(false))
    }

    async fn accept_ride(&self, ride_id: &str, caller: &Caller) -> RideResult<RideResponse> {
        if caller.role != UserRole::Driver {
            return Err(RideError::unauthorized("only drivers can accept rides"));
        }

        let driver_id = caller.id.clone();
        let pickup_code = PickupCodeIssuer::issue();
        let now = Utc::now();

        let updated = self
            .store
            .transition(
                ride_id,
                RideStatus::Pending,
                Box::new(move |ride| {
                    ride.status = RideStatus::Accepted;
                    ride.driver_id = Some(driver_id.clone());
                    ride.pickup_code = Some(pickup_code.clone());
                    ride.accepted_at = Some(now);
                }),
            )
            .await
            .map_err(|e| match e {
                // The losing side of an accept race is an expected outcome,
                // not a fault; clients re-query the pending list.
                StoreError::StatusConflict { .. } => RideError::RideNoLongerAvailable,
                other => store_error(other, ride_id),
            })?;

        tracing::info!("Ride {} accepted by driver {}", ride_id, caller.id);

        if let Err(e) = self
            .profiles
            .set_availability(&caller.id, Availability::Busy)
            .await
        {
            tracing::warn!("Could not mark driver {} busy: {}", caller.id, e);
        }

        self.broadcast_status(&updated).await;
        Ok(updated.to_response(false))
    }

    async fn reject_ride(&self, ride_id: &str, caller: &Caller) -> RideResult<()> {
        if caller.role != UserRole::Driver {
            return Err(RideError::unauthorized("only drivers can decline rides"));
        }

        let updated = self
            .store
            .transition(
                ride_id,
                RideStatus::Pending,
                // Terminal and deliberately bare: the ride just stops being offered
                Box::new(|ride| ride.status = RideStatus::Rejected),
            )
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual } => {
                    RideError::InvalidTransition { from: actual, to: RideStatus::Rejected }
                }
                other => store_error(other, ride_id),
            })?;

        tracing::info!("Ride {} declined by driver {}", ride_id, caller.id);
        self.broadcast_status(&updated).await;
        Ok(())
    }

    async fn verify_pickup_code(
        &self,
        ride_id: &str,
        caller: &Caller,
        code: &str,
    ) -> RideResult<()> {
        let observed = self.load(ride_id).await?;
        self.require_assigned_driver(&observed, caller)?;

        // Re-verifying an already verified ride succeeds without a re-check
        if observed.code_verified {
            return Ok(());
        }

        let stored = observed
            .pickup_code
            .as_deref()
            .ok_or_else(|| RideError::internal("accepted ride has no pickup code"))?;

        if !PickupCodeIssuer::matches(stored, code) {
            tracing::debug!("Pickup code mismatch on ride {}", ride_id);
            return Err(RideError::InvalidCode);
        }

        self.store
            .update(
                ride_id,
                vec![RideStatus::Accepted, RideStatus::Started, RideStatus::PickedUp],
                Box::new(|ride| ride.code_verified = true),
            )
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual } => RideError::RideNotActive { status: actual },
                other => store_error(other, ride_id),
            })?;

        tracing::info!("Pickup code verified for ride {}", ride_id);
        self.events
            .publish(RideEvent::CodeVerified { ride_id: ride_id.to_string() })
            .await;
        Ok(())
    }

    async fn advance_status(
        &self,
        ride_id: &str,
        caller: &Caller,
        target: RideStatus,
    ) -> RideResult<RideResponse> {
        match target {
            RideStatus::Accepted => self.accept_ride(ride_id, caller).await,
            RideStatus::Rejected => {
                self.reject_ride(ride_id, caller).await?;
                let ride = self.load(ride_id).await?;
                Ok(ride.to_response(true))
            }
            RideStatus::Started | RideStatus::PickedUp | RideStatus::Completed => {
                self.drive_forward(ride_id, caller, target).await
            }
            RideStatus::Cancelled => self.cancel_ride(ride_id, caller).await,
            RideStatus::Pending => {
                let observed = self.load(ride_id).await?;
                Err(RideError::InvalidTransition {
                    from: observed.status,
                    to: RideStatus::Pending,
                })
            }
        }
    }

    async fn report_location(
        &self,
        ride_id: &str,
        caller: &Caller,
        location: GeoPoint,
    ) -> RideResult<()> {
        let observed = self.load(ride_id).await?;
        self.require_assigned_driver(&observed, caller)?;

        if !location.is_valid() {
            return Err(RideError::validation("location", "coordinates out of range"));
        }

        let ping = LocationPing { location, recorded_at: Utc::now() };
        let ping_for_store = ping.clone();

        self.store
            .update(
                ride_id,
                vec![RideStatus::Accepted, RideStatus::Started, RideStatus::PickedUp],
                Box::new(move |ride| {
                    ride.current_location = Some(ping_for_store.clone());
                    ride.location_history.push(ping_for_store.clone());
                }),
            )
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual } => RideError::RideNotActive { status: actual },
                other => store_error(other, ride_id),
            })?;

        // Matching reads the driver's last known position from the profile
        if let Err(e) = self
            .profiles
            .update_last_location(&caller.id, ping.clone())
            .await
        {
            tracing::warn!("Could not update location for driver {}: {}", caller.id, e);
        }

        self.events
            .publish(RideEvent::LocationUpdated {
                ride_id: ride_id.to_string(),
                location,
                recorded_at: ping.recorded_at,
            })
            .await;
        Ok(())
    }

    async fn get_ride(&self, ride_id: &str, caller: &Caller) -> RideResult<RideResponse> {
        let ride = self.load(ride_id).await?;

        if ride.is_party(&caller.id) || caller.role == UserRole::Admin {
            return Ok(ride.to_response(false));
        }
        Err(RideError::unauthorized("not a party to this ride"))
    }

    async fn get_shared_ride(&self, ride_id: &str, token: &str) -> RideResult<RideResponse> {
        let ride = self.load(ride_id).await?;

        if ride.share_token.to_string() != token {
            return Err(RideError::unauthorized("invalid share token"));
        }
        // Shared viewers never see the pickup code
        Ok(ride.to_response(true))
    }

    async fn list_my_rides(&self, caller: &Caller) -> RideResult<Vec<RideResponse>> {
        let mut rides = self
            .store
            .list_by_user(&caller.id)
            .await
            .map_err(|e| store_error(e, "mine"))?;

        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rides.into_iter().map(|r| r.to_response(false)).collect())
    }
}
