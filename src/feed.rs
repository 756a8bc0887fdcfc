// Wire models for the realtime feed snapshot.
//
// The feed is the JSON rendering of GTFS-realtime: a top-level `entity` list
// where each entity carries a `tripUpdate` or a `vehicle` update, keyed to the
// static tables by `tripId`. Feeds are inconsistent about numeric fields, so
// epoch-second timestamps accept both JSON numbers and numeric strings.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{PlannerError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedSnapshot {
    #[serde(default)]
    pub entity: Vec<FeedEntity>,
}

impl FeedSnapshot {
    /// Parses the JSON value handed back by the cache into typed entities.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| PlannerError::FeedUnavailable(format!("Malformed feed snapshot: {e}")))
    }

    /// First vehicle position reporting the given trip, if any.
    pub fn vehicle_for_trip(&self, trip_id: &str) -> Option<&VehiclePosition> {
        self.entity
            .iter()
            .filter_map(|entity| entity.vehicle.as_ref())
            .find(|vehicle| vehicle.trip.trip_id == trip_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub trip_update: Option<TripUpdate>,
    #[serde(default)]
    pub vehicle: Option<VehiclePosition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripUpdate {
    pub trip: TripDescriptor,
    #[serde(default)]
    pub stop_time_update: Vec<StopTimeUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripDescriptor {
    pub trip_id: String,
    #[serde(default)]
    pub service_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTimeUpdate {
    #[serde(default)]
    pub stop_id: Option<String>,
    #[serde(default)]
    pub arrival: Option<StopTimeEvent>,
    #[serde(default)]
    pub departure: Option<StopTimeEvent>,
}

impl StopTimeUpdate {
    /// Arrival time, falling back to departure time when arrival is absent.
    pub fn best_time(&self) -> Option<i64> {
        self.arrival
            .as_ref()
            .and_then(|event| event.time)
            .or_else(|| self.departure.as_ref().and_then(|event| event.time))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopTimeEvent {
    #[serde(default, deserialize_with = "lenient_epoch")]
    pub time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehiclePosition {
    pub trip: TripDescriptor,
    #[serde(default, deserialize_with = "lenient_epoch")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

fn lenient_epoch<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}
