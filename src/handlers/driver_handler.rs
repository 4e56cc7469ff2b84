// src/handlers/driver_handler.rs
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    errors::{RideError, RideResult},
    models::ride::GeoPoint,
    models::user::{Availability, Caller, DriverSummary, Profile, UserRole},
    services::matching_service::MatchingOperations,
    state::AppState,
};

/// Search radius when the rider supplies a coordinate but no radius.
const DEFAULT_RADIUS_KM: f64 = 10.0;

#[derive(Debug, Deserialize)]
pub struct AvailableDriversQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SetAvailabilityRequest {
    pub availability: Availability,
}

pub async fn find_available_drivers(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Query(query): Query<AvailableDriversQuery>,
) -> RideResult<Json<Vec<DriverSummary>>> {
    let near = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => {
            let point = GeoPoint { latitude: lat, longitude: lng };
            if !point.is_valid() {
                return Err(RideError::validation("lat/lng", "coordinates out of range"));
            }
            Some(point)
        }
        (None, None) => None,
        _ => return Err(RideError::validation("lat/lng", "supply both or neither")),
    };

    let radius_km = query.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
    let drivers = state.matching.find_available_drivers(near, radius_km).await?;
    Ok(Json(drivers))
}

/// Drivers toggle themselves online and offline. Busy is owned by the
/// lifecycle engine and cannot be set by hand.
pub async fn set_availability(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<SetAvailabilityRequest>,
) -> RideResult<Json<Profile>> {
    if caller.role != UserRole::Driver {
        return Err(RideError::unauthorized("only drivers set availability"));
    }
    if request.availability == Availability::Busy {
        return Err(RideError::validation(
            "availability",
            "busy is set by ride assignment, not directly",
        ));
    }

    let profile = state
        .profiles
        .set_availability(&caller.id, request.availability)
        .await?;
    Ok(Json(profile))
}
