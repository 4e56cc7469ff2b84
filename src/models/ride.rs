// src/models/ride.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{FieldError, RideError};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,   // Ride created, offered to drivers
    Accepted,  // A driver claimed the ride, heading to pickup
    Rejected,  // Declined while pending, no longer offered
    Started,   // Pickup code verified, trip underway
    PickedUp,  // Rider on board
    Completed, // Trip finished at the drop point
    Cancelled, // Ended early by rider or driver
}

impl RideStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RideStatus::Rejected | RideStatus::Completed | RideStatus::Cancelled
        )
    }

    /// States during which the assigned driver streams location updates.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RideStatus::Accepted | RideStatus::Started | RideStatus::PickedUp
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::Rejected => "rejected",
            RideStatus::Started => "started",
            RideStatus::PickedUp => "picked_up",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Car,
    Bike,
    Auto,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RidePaymentMethod {
    Cash,
    Card,
    Wallet,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Rider,
    Driver,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Haversine great-circle distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let earth_radius_km = 6371.0;
        let lat1_rad = self.latitude.to_radians();
        let lat2_rad = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        earth_radius_km * c
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoutePoint {
    pub address: String,
    pub location: GeoPoint,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LocationPing {
    pub location: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ride {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub status: RideStatus,

    // Route, fixed at creation
    pub pickup: RoutePoint,
    pub dropoff: RoutePoint,

    // Commercial terms, fixed at creation
    pub fare: f64,
    pub distance_km: f64,
    pub estimated_minutes: i64,
    pub vehicle_type: VehicleType,
    pub payment_method: RidePaymentMethod,

    // One timestamp per status entry, each written once
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<CancelledBy>,

    // Pickup handshake
    pub pickup_code: Option<String>,
    pub code_verified: bool,

    // Live location, written only by the assigned driver on an active ride
    pub current_location: Option<LocationPing>,
    pub location_history: Vec<LocationPing>,

    // Opaque token for read-only trip sharing
    pub share_token: Uuid,

    // Bumped on every store write, drives optimistic concurrency checks
    #[serde(default)]
    pub revision: u64,
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateRideRequest {
    pub pickup: RoutePoint,
    pub dropoff: RoutePoint,
    pub fare: f64,
    pub distance_km: f64,
    pub estimated_minutes: i64,
    pub vehicle_type: VehicleType,
    pub payment_method: RidePaymentMethod,
}

impl CreateRideRequest {
    /// Field checks that run before anything is written.
    pub fn validate(&self) -> Result<(), RideError> {
        let mut errors = Vec::new();

        if self.fare <= 0.0 {
            errors.push(FieldError::new("fare", "must be greater than zero"));
        }
        if self.distance_km < 0.0 {
            errors.push(FieldError::new("distance_km", "must not be negative"));
        }
        if self.estimated_minutes < 0 {
            errors.push(FieldError::new("estimated_minutes", "must not be negative"));
        }
        if self.pickup.address.trim().is_empty() {
            errors.push(FieldError::new("pickup.address", "must not be empty"));
        }
        if self.dropoff.address.trim().is_empty() {
            errors.push(FieldError::new("dropoff.address", "must not be empty"));
        }
        if !self.pickup.location.is_valid() {
            errors.push(FieldError::new("pickup.location", "coordinates out of range"));
        }
        if !self.dropoff.location.is_valid() {
            errors.push(FieldError::new("dropoff.location", "coordinates out of range"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RideError::Validation(errors))
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideResponse {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub status: RideStatus,
    pub pickup: RoutePoint,
    pub dropoff: RoutePoint,
    pub fare: f64,
    pub distance_km: f64,
    pub estimated_minutes: i64,
    pub vehicle_type: VehicleType,
    pub payment_method: RidePaymentMethod,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<CancelledBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_code: Option<String>,
    pub code_verified: bool,
    pub current_location: Option<LocationPing>,
}

impl Ride {
    pub fn new(id: String, rider_id: String, request: CreateRideRequest) -> Self {
        Self {
            id,
            rider_id,
            driver_id: None,
            status: RideStatus::Pending,
            pickup: request.pickup,
            dropoff: request.dropoff,
            fare: request.fare,
            distance_km: request.distance_km,
            estimated_minutes: request.estimated_minutes,
            vehicle_type: request.vehicle_type,
            payment_method: request.payment_method,
            created_at: Utc::now(),
            accepted_at: None,
            started_at: None,
            picked_up_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            pickup_code: None,
            code_verified: false,
            current_location: None,
            location_history: Vec::new(),
            share_token: Uuid::new_v4(),
            revision: 0,
        }
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.rider_id == user_id || self.driver_id.as_deref() == Some(user_id)
    }

    /// Snapshot for API responses. The pickup code travels only to callers
    /// who are a party to the ride.
    pub fn to_response(&self, redact_code: bool) -> RideResponse {
        RideResponse {
            id: self.id.clone(),
            rider_id: self.rider_id.clone(),
            driver_id: self.driver_id.clone(),
            status: self.status,
            pickup: self.pickup.clone(),
            dropoff: self.dropoff.clone(),
            fare: self.fare,
            distance_km: self.distance_km,
            estimated_minutes: self.estimated_minutes,
            vehicle_type: self.vehicle_type,
            payment_method: self.payment_method,
            created_at: self.created_at,
            accepted_at: self.accepted_at,
            started_at: self.started_at,
            picked_up_at: self.picked_up_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            cancelled_by: self.cancelled_by,
            pickup_code: if redact_code {
                None
            } else {
                self.pickup_code.clone()
            },
            code_verified: self.code_verified,
            current_location: self.current_location.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateRideRequest {
        CreateRideRequest {
            pickup: RoutePoint {
                address: "12 Oak Street".to_string(),
                location: GeoPoint { latitude: 5.6037, longitude: -0.1870 },
            },
            dropoff: RoutePoint {
                address: "Airport Terminal 3".to_string(),
                location: GeoPoint { latitude: 5.6052, longitude: -0.1668 },
            },
            fare: 200.0,
            distance_km: 4.2,
            estimated_minutes: 18,
            vehicle_type: VehicleType::Car,
            payment_method: RidePaymentMethod::Cash,
        }
    }

    #[test]
    fn test_new_ride_starts_pending() {
        let ride = Ride::new("rid-1".to_string(), "usr-1".to_string(), request());
        assert_eq!(ride.status, RideStatus::Pending);
        assert!(ride.driver_id.is_none());
        assert!(ride.pickup_code.is_none());
        assert!(!ride.code_verified);
        assert!(ride.location_history.is_empty());
    }

    #[test]
    fn test_validation_rejects_bad_fare() {
        let mut req = request();
        req.fare = 0.0;
        let err = req.validate().unwrap_err();
        match err {
            RideError::Validation(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "fare");
            }
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_out_of_range_coordinates() {
        let mut req = request();
        req.pickup.location.latitude = 95.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_response_redacts_pickup_code() {
        let mut ride = Ride::new("rid-1".to_string(), "usr-1".to_string(), request());
        ride.pickup_code = Some("4821".to_string());

        assert_eq!(ride.to_response(false).pickup_code.as_deref(), Some("4821"));
        assert!(ride.to_response(true).pickup_code.is_none());
    }

    #[test]
    fn test_haversine_distance() {
        let accra = GeoPoint { latitude: 5.6037, longitude: -0.1870 };
        let kumasi = GeoPoint { latitude: 6.6666, longitude: -1.6163 };
        let d = accra.distance_km(&kumasi);
        assert!(d > 190.0 && d < 210.0, "unexpected distance: {}", d);
    }

    #[test]
    fn test_terminal_and_active_states() {
        assert!(RideStatus::Completed.is_terminal());
        assert!(RideStatus::Rejected.is_terminal());
        assert!(RideStatus::Cancelled.is_terminal());
        assert!(!RideStatus::Pending.is_terminal());

        assert!(RideStatus::Accepted.is_active());
        assert!(RideStatus::Started.is_active());
        assert!(RideStatus::PickedUp.is_active());
        assert!(!RideStatus::Pending.is_active());
        assert!(!RideStatus::Completed.is_active());
    }
}
