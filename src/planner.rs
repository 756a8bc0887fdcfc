// Route matching engine: static timetable lookup crossed with the live feed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Australia::Brisbane;
use chrono_tz::Tz;
use serde::Serialize;

use crate::cache::DEFAULT_MAX_AGE;
use crate::dataframe::{self, Record};
use crate::error::{PlannerError, Result};
use crate::feed::FeedSnapshot;

// Feed entity age filter window: buses scheduled within the next 10 minutes.
const WINDOW_MINUTES: i64 = 10;

// Placeholder transit-time model: a flat 5 minutes per stop hop. Not a real
// estimate; see DESIGN.md before touching this.
const MINUTES_PER_HOP: u32 = 5;

/// Paths and endpoints the planner runs against. Defaults match the SEQ
/// Translink layout: local `static-data/` tables and the local GTFS proxy.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub static_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub trip_updates_url: String,
    pub vehicle_positions_url: String,
    pub max_cache_age: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            static_dir: PathBuf::from("./static-data"),
            cache_dir: PathBuf::from("./cached-data"),
            trip_updates_url: "http://127.0.0.1:5343/gtfs/seq/trip_updates.json".to_string(),
            vehicle_positions_url: "http://127.0.0.1:5343/gtfs/seq/vehicle_positions.json"
                .to_string(),
            max_cache_age: DEFAULT_MAX_AGE,
        }
    }
}

impl PlannerConfig {
    pub fn trip_updates_cache_file(&self) -> PathBuf {
        self.cache_dir.join("trip_updates.json")
    }

    pub fn vehicle_positions_cache_file(&self) -> PathBuf {
        self.cache_dir.join("vehicle_positions.json")
    }
}

/// Start and end stop ordinals as shown in the numbered stop list.
#[derive(Debug, Clone, Copy)]
pub struct StopRange {
    pub start: u32,
    pub end: u32,
}

impl StopRange {
    fn hops(&self) -> u32 {
        self.start.abs_diff(self.end)
    }
}

/// A resolved route with its ordered, deduplicated stop list.
#[derive(Debug, Clone)]
pub struct RouteStops {
    pub route_id: String,
    pub route_short_name: String,
    pub route_long_name: String,
    /// Display names sorted by stop_sequence, first occurrence per name.
    pub stop_names: Vec<String>,
    stop_ids: Vec<String>,
    trips_for_route: Vec<Record>,
}

/// One upcoming bus on the selected route, matched against the live feed.
/// Ephemeral: computed per query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItineraryRow {
    pub route_short_name: String,
    pub route_long_name: String,
    pub service_id: String,
    pub trip_headsign: String,
    pub scheduled_arrival_time: String,
    pub live_arrival_time: String,
    pub live_position: String,
    pub estimated_travel_time: String,
}

pub struct RoutePlanner {
    routes: Vec<Record>,
    trips: Vec<Record>,
    stop_times: Vec<Record>,
    stops: Vec<Record>,
}

impl RoutePlanner {
    /// Loads the four static tables fresh; any unreadable or malformed table
    /// is fatal for the invocation.
    pub fn load(static_dir: &Path) -> Result<Self> {
        Ok(RoutePlanner {
            routes: dataframe::load_table(&static_dir.join("routes.txt"))?,
            trips: dataframe::load_table(&static_dir.join("trips.txt"))?,
            stop_times: dataframe::load_table(&static_dir.join("stop_times.txt"))?,
            stops: dataframe::load_table(&static_dir.join("stops.txt"))?,
        })
    }

    /// Resolves a user-facing route short name to its ordered stop list.
    pub fn resolve_stops(&self, route_short_name: &str) -> Result<RouteStops> {
        let matches = dataframe::filter(&self.routes, &[("route_short_name", route_short_name)]);
        let route = matches
            .first()
            .ok_or_else(|| PlannerError::RouteNotFound(route_short_name.to_string()))?;
        let route_id = route.get("route_id").cloned().unwrap_or_default();
        let route_long_name = route.get("route_long_name").cloned().unwrap_or_default();

        let trips_for_route = dataframe::filter(&self.trips, &[("route_id", route_id.as_str())]);
        let trip_ids: HashSet<&str> = trips_for_route
            .iter()
            .filter_map(|trip| trip.get("trip_id"))
            .map(String::as_str)
            .collect();

        let stop_times_for_route: Vec<Record> = self
            .stop_times
            .iter()
            .filter(|stop_time| {
                stop_time
                    .get("trip_id")
                    .is_some_and(|id| trip_ids.contains(id.as_str()))
            })
            .cloned()
            .collect();
        let stop_ids = dataframe::distinct(&stop_times_for_route, "stop_id");

        // One record per scheduled visit, carrying the stop's display fields.
        let visits = dataframe::select(
            &dataframe::join(&stop_times_for_route, &self.stops, "stop_id"),
            &["stop_sequence", "stop_name", "platform_code"],
        );

        let mut entries: Vec<(u32, String)> = visits
            .iter()
            .filter_map(|visit| {
                // Numeric sort; lexical order would put "10" before "2".
                let sequence: u32 = visit.get("stop_sequence")?.parse().ok()?;
                let name = visit.get("stop_name")?;
                Some((
                    sequence,
                    display_name(name, visit.get("platform_code").map(String::as_str)),
                ))
            })
            .collect();
        // Stable sort, so dedup below keeps the first visit at each sequence.
        entries.sort_by_key(|(sequence, _)| *sequence);

        let mut seen = HashSet::new();
        let stop_names: Vec<String> = entries
            .into_iter()
            .filter(|(_, name)| seen.insert(name.clone()))
            .map(|(_, name)| name)
            .collect();

        if stop_names.is_empty() {
            return Err(PlannerError::NoStopsOnRoute { route_id });
        }

        Ok(RouteStops {
            route_id,
            route_short_name: route_short_name.to_string(),
            route_long_name,
            stop_names,
            stop_ids,
            trips_for_route,
        })
    }

    /// Matches live trip updates against the resolved route and keeps buses
    /// scheduled within ten minutes of `departure`.
    ///
    /// Row order follows feed entity order; an empty result means no buses in
    /// the window, not an error.
    pub fn plan_route(
        &self,
        route_short_name: &str,
        range: StopRange,
        departure: NaiveDateTime,
        trip_updates: &FeedSnapshot,
        vehicle_positions: &FeedSnapshot,
    ) -> Result<Vec<ItineraryRow>> {
        let route = self.resolve_stops(route_short_name)?;
        let stop_ids: HashSet<&str> = route.stop_ids.iter().map(String::as_str).collect();
        let window_end = departure + chrono::Duration::minutes(WINDOW_MINUTES);

        let mut rows = Vec::new();
        for entity in &trip_updates.entity {
            let Some(update) = &entity.trip_update else {
                continue;
            };
            // Not a trip on this route.
            let Some(trip) = route
                .trips_for_route
                .iter()
                .find(|trip| trip.get("trip_id").map(String::as_str) == Some(update.trip.trip_id.as_str()))
            else {
                continue;
            };
            // None of this route's stops on the update's remaining itinerary.
            let Some(stop_update) = update.stop_time_update.iter().find(|stop_time| {
                stop_time
                    .stop_id
                    .as_deref()
                    .is_some_and(|id| stop_ids.contains(id))
            }) else {
                continue;
            };
            let Some(epoch) = stop_update.best_time() else {
                continue;
            };
            let Some(scheduled) = local_time(epoch) else {
                continue;
            };

            // The scheduled clock time on the caller's travel date, both
            // bounds inclusive.
            let candidate = departure.date().and_time(scheduled.time());
            if candidate < departure || candidate > window_end {
                continue;
            }

            let vehicle = vehicle_positions.vehicle_for_trip(&update.trip.trip_id);
            let live_arrival_time = vehicle
                .and_then(|v| v.timestamp)
                .and_then(local_time)
                .map(format_clock)
                .unwrap_or_else(|| "N/A".to_string());
            let live_position = vehicle
                .and_then(|v| v.position.as_ref())
                .map(|p| format!("{}, {}", p.latitude, p.longitude))
                .unwrap_or_else(|| "N/A".to_string());

            rows.push(ItineraryRow {
                route_short_name: route.route_short_name.clone(),
                route_long_name: route.route_long_name.clone(),
                service_id: update
                    .trip
                    .service_id
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
                trip_headsign: trip
                    .get("trip_headsign")
                    .filter(|headsign| !headsign.is_empty())
                    .cloned()
                    .unwrap_or_else(|| "N/A".to_string()),
                scheduled_arrival_time: format_clock(scheduled),
                live_arrival_time,
                live_position,
                estimated_travel_time: format!("{} min", range.hops() * MINUTES_PER_HOP),
            });
        }

        Ok(rows)
    }
}

fn display_name(stop_name: &str, platform_code: Option<&str>) -> String {
    match platform_code {
        Some(code) if !code.is_empty() => format!("{stop_name}, platform {code}"),
        _ => stop_name.to_string(),
    }
}

fn local_time(epoch: i64) -> Option<DateTime<Tz>> {
    Brisbane.timestamp_opt(epoch, 0).single()
}

fn format_clock(time: DateTime<Tz>) -> String {
    time.format("%-I:%M:%S %p").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FeedCache, FetchJson};
    use chrono::{NaiveDate, NaiveTime};
    use serde_json::{Value, json};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::SystemTime;

    fn rec(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // The route-66 fixture: one trip, one stop with a platform code.
    fn planner() -> RoutePlanner {
        RoutePlanner {
            routes: vec![rec(&[
                ("route_id", "1"),
                ("route_short_name", "66"),
                ("route_long_name", "Route 66"),
            ])],
            trips: vec![rec(&[
                ("trip_id", "1"),
                ("route_id", "1"),
                ("trip_headsign", "Downtown"),
            ])],
            stop_times: vec![rec(&[
                ("trip_id", "1"),
                ("stop_id", "101"),
                ("stop_sequence", "1"),
            ])],
            stops: vec![rec(&[
                ("stop_id", "101"),
                ("stop_name", "Main St"),
                ("platform_code", "A"),
            ])],
        }
    }

    // 1700000000 is 8:13:20 AM on 2023-11-15 in Brisbane.
    fn departure() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 11, 15)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(8, 10, 0).unwrap())
    }

    fn trip_updates() -> FeedSnapshot {
        FeedSnapshot::from_value(json!({
            "entity": [
                {
                    "id": "1",
                    "tripUpdate": {
                        "trip": {"tripId": "1"},
                        "stopTimeUpdate": [{"stopId": "101", "arrival": {"time": 1700000000}}]
                    }
                }
            ]
        }))
        .unwrap()
    }

    fn empty_feed() -> FeedSnapshot {
        FeedSnapshot::default()
    }

    #[test]
    fn resolve_stops_formats_platforms() {
        let resolved = planner().resolve_stops("66").unwrap();
        assert_eq!(resolved.route_id, "1");
        assert_eq!(resolved.route_long_name, "Route 66");
        assert_eq!(resolved.stop_names, vec!["Main St, platform A"]);
    }

    #[test]
    fn resolve_stops_sorts_numerically_and_dedups_by_name() {
        let mut planner = planner();
        planner.stop_times = vec![
            rec(&[("trip_id", "1"), ("stop_id", "110"), ("stop_sequence", "10")]),
            rec(&[("trip_id", "1"), ("stop_id", "102"), ("stop_sequence", "2")]),
            rec(&[("trip_id", "1"), ("stop_id", "101"), ("stop_sequence", "1")]),
            // Same stop again later in the run; first occurrence wins.
            rec(&[("trip_id", "1"), ("stop_id", "101"), ("stop_sequence", "9")]),
        ];
        planner.stops = vec![
            rec(&[("stop_id", "101"), ("stop_name", "Main St"), ("platform_code", "")]),
            rec(&[("stop_id", "102"), ("stop_name", "Central"), ("platform_code", "2")]),
            rec(&[("stop_id", "110"), ("stop_name", "Terminus")]),
        ];

        let resolved = planner.resolve_stops("66").unwrap();
        assert_eq!(
            resolved.stop_names,
            vec!["Main St", "Central, platform 2", "Terminus"]
        );
    }

    #[test]
    fn unknown_short_name_is_route_not_found() {
        assert!(matches!(
            planner().resolve_stops("999"),
            Err(PlannerError::RouteNotFound(name)) if name == "999"
        ));
    }

    #[test]
    fn route_without_stop_times_is_no_stops_on_route() {
        let mut planner = planner();
        planner.stop_times.clear();
        assert!(matches!(
            planner.resolve_stops("66"),
            Err(PlannerError::NoStopsOnRoute { route_id }) if route_id == "1"
        ));
    }

    #[test]
    fn plan_route_without_vehicle_yields_na_live_fields() {
        let rows = planner()
            .plan_route(
                "66",
                StopRange { start: 1, end: 2 },
                departure(),
                &trip_updates(),
                &empty_feed(),
            )
            .unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.route_short_name, "66");
        assert_eq!(row.route_long_name, "Route 66");
        assert_eq!(row.service_id, "N/A");
        assert_eq!(row.trip_headsign, "Downtown");
        assert_eq!(row.scheduled_arrival_time, "8:13:20 AM");
        assert_eq!(row.live_arrival_time, "N/A");
        assert_eq!(row.live_position, "N/A");
        assert_eq!(row.estimated_travel_time, "5 min");
    }

    #[test]
    fn plan_route_reports_matching_vehicle() {
        let vehicles = FeedSnapshot::from_value(json!({
            "entity": [
                {
                    "id": "v1",
                    "vehicle": {
                        "trip": {"tripId": "1"},
                        "timestamp": 1700000100,
                        "position": {"latitude": -27.47, "longitude": 153.02}
                    }
                }
            ]
        }))
        .unwrap();

        let rows = planner()
            .plan_route(
                "66",
                StopRange { start: 1, end: 3 },
                departure(),
                &trip_updates(),
                &vehicles,
            )
            .unwrap();

        assert_eq!(rows[0].live_arrival_time, "8:15:00 AM");
        assert_eq!(rows[0].live_position, "-27.47, 153.02");
        assert_eq!(rows[0].estimated_travel_time, "10 min");
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let planner = planner();
        let range = StopRange { start: 1, end: 2 };
        let updates = trip_updates();
        let at = |h, m, s| {
            NaiveDate::from_ymd_opt(2023, 11, 15)
                .unwrap()
                .and_time(NaiveTime::from_hms_opt(h, m, s).unwrap())
        };

        // Lower bound: departure exactly at the scheduled time.
        assert_eq!(
            planner
                .plan_route("66", range, at(8, 13, 20), &updates, &empty_feed())
                .unwrap()
                .len(),
            1
        );
        // Upper bound: scheduled time exactly ten minutes after departure.
        assert_eq!(
            planner
                .plan_route("66", range, at(8, 3, 20), &updates, &empty_feed())
                .unwrap()
                .len(),
            1
        );
        // Just outside on either side.
        assert!(planner
            .plan_route("66", range, at(8, 13, 21), &updates, &empty_feed())
            .unwrap()
            .is_empty());
        assert!(planner
            .plan_route("66", range, at(8, 3, 19), &updates, &empty_feed())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unmatched_updates_are_discarded() {
        let planner = planner();
        let range = StopRange { start: 1, end: 2 };

        // A trip that is not on the route, an update that never visits the
        // route's stops, and an update with no usable time at all.
        let updates = FeedSnapshot::from_value(json!({
            "entity": [
                {"tripUpdate": {"trip": {"tripId": "other"},
                    "stopTimeUpdate": [{"stopId": "101", "arrival": {"time": 1700000000}}]}},
                {"tripUpdate": {"trip": {"tripId": "1"},
                    "stopTimeUpdate": [{"stopId": "999", "arrival": {"time": 1700000000}}]}},
                {"tripUpdate": {"trip": {"tripId": "1"},
                    "stopTimeUpdate": [{"stopId": "101"}]}}
            ]
        }))
        .unwrap();

        assert!(planner
            .plan_route("66", range, departure(), &updates, &empty_feed())
            .unwrap()
            .is_empty());
    }

    struct CountingFetch {
        calls: Rc<Cell<usize>>,
        payload: Value,
    }

    impl FetchJson for CountingFetch {
        fn fetch(&self, _url: &str) -> crate::error::Result<Value> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.payload.clone())
        }
    }

    #[test]
    fn repeated_queries_inside_cache_window_fetch_once() {
        let cache_file = std::env::temp_dir().join(format!(
            "seq-planner-idempotent-{}.json",
            std::process::id()
        ));
        std::fs::remove_file(&cache_file).ok();

        let calls = Rc::new(Cell::new(0));
        let cache = FeedCache::with_parts(
            CountingFetch {
                calls: Rc::clone(&calls),
                payload: json!({
                    "entity": [
                        {"tripUpdate": {"trip": {"tripId": "1"},
                            "stopTimeUpdate": [{"stopId": "101", "arrival": {"time": 1700000000}}]}}
                    ]
                }),
            },
            DEFAULT_MAX_AGE,
            Box::new(SystemTime::now),
        );

        let planner = planner();
        let range = StopRange { start: 1, end: 2 };
        let mut results = Vec::new();
        for _ in 0..2 {
            let updates = FeedSnapshot::from_value(
                cache
                    .get_data("http://feed.invalid/trip_updates", &cache_file)
                    .unwrap(),
            )
            .unwrap();
            results.push(
                planner
                    .plan_route("66", range, departure(), &updates, &empty_feed())
                    .unwrap(),
            );
        }

        assert_eq!(calls.get(), 1);
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].len(), 1);
        std::fs::remove_file(cache_file).ok();
    }
}
