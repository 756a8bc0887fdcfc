// South East Queensland (Translink) route planner CLI.
//
// Prompts for a route, shows its ordered stop list, then matches the live
// GTFS-realtime feed against the static timetable to show buses arriving
// within the next ten minutes of the chosen departure.

use std::io::{self, Write};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::cache::FeedCache;
use crate::error::PlannerError;
use crate::feed::FeedSnapshot;
use crate::planner::{ItineraryRow, PlannerConfig, RoutePlanner, RouteStops, StopRange};

mod cache;
mod dataframe;
mod error;
mod feed;
mod planner;

fn main() {
    println!("Welcome to the South East Queensland Route Planner!");

    let config = PlannerConfig::default();

    println!("Loading and processing data, please wait...");
    let planner = match RoutePlanner::load(&config.static_dir) {
        Ok(planner) => planner,
        Err(e) => {
            eprintln!("❌ Could not load static timetable data: {e}");
            std::process::exit(1);
        }
    };

    let Some(route) = prompt_route(&planner) else {
        // Route exists but has no stops; nothing to plan.
        println!("No stops found for this route.");
        return;
    };

    for (ordinal, stop_name) in route.stop_names.iter().enumerate() {
        println!("{}. {}", ordinal + 1, stop_name);
    }

    let range = prompt_stop_range();
    let travel_date = prompt_date();
    let travel_time = prompt_time();

    let rows = fetch_and_plan(&planner, &config, &route, range, travel_date.and_time(travel_time));
    print_table(&rows);

    println!("Thanks for using the Route tracker!");
}

// ============================================================================
// Prompting
// ============================================================================

fn prompt(message: &str) -> String {
    print!("{message}");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line).ok();
    line.trim().to_string()
}

/// Re-prompts until the short name resolves. `None` means the route exists
/// but has no stops, which ends the query gracefully.
fn prompt_route(planner: &RoutePlanner) -> Option<RouteStops> {
    loop {
        let input = prompt("What Bus Route would you like to take? ");
        match planner.resolve_stops(&input) {
            Ok(route) => return Some(route),
            Err(PlannerError::RouteNotFound(_)) => {
                println!("Please enter a valid bus route.");
            }
            Err(PlannerError::NoStopsOnRoute { .. }) => return None,
            Err(e) => {
                eprintln!("❌ Could not resolve route: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn prompt_stop_range() -> StopRange {
    loop {
        let input = prompt("What is your start and end stop on the route? (e.g. 1 - 2) ");
        if let Some(range) = parse_stop_range(&input) {
            return range;
        }
        println!("Please follow the format and enter a valid number for the stop.");
    }
}

fn parse_stop_range(input: &str) -> Option<StopRange> {
    let (start, end) = input.split_once('-')?;
    Some(StopRange {
        start: start.trim().parse().ok()?,
        end: end.trim().parse().ok()?,
    })
}

fn prompt_date() -> NaiveDate {
    loop {
        let input = prompt("What date will you take the route? (YYYY-MM-DD) ");
        if let Ok(date) = NaiveDate::parse_from_str(&input, "%Y-%m-%d") {
            return date;
        }
        println!("Incorrect date format. Please use YYYY-MM-DD");
    }
}

fn prompt_time() -> NaiveTime {
    loop {
        let input = prompt("What time will you leave? (HH:mm) ");
        if let Ok(time) = NaiveTime::parse_from_str(&input, "%H:%M") {
            return time;
        }
        println!("Incorrect time format. Please use HH:mm");
    }
}

// ============================================================================
// Live feed
// ============================================================================

/// Pulls both feed snapshots through the time-bounded cache and runs the
/// matching engine. An unavailable feed degrades to an empty itinerary with a
/// visible notice rather than a crash.
fn fetch_and_plan(
    planner: &RoutePlanner,
    config: &PlannerConfig,
    route: &RouteStops,
    range: StopRange,
    departure: NaiveDateTime,
) -> Vec<ItineraryRow> {
    if let Err(e) = std::fs::create_dir_all(&config.cache_dir) {
        eprintln!("⚠️  Could not create cache directory {:?}: {e}", config.cache_dir);
    }

    let snapshots = FeedCache::new(config.max_cache_age).and_then(|cache| {
        let trip_updates = FeedSnapshot::from_value(
            cache.get_data(&config.trip_updates_url, &config.trip_updates_cache_file())?,
        )?;
        let vehicle_positions = FeedSnapshot::from_value(
            cache.get_data(
                &config.vehicle_positions_url,
                &config.vehicle_positions_cache_file(),
            )?,
        )?;
        Ok((trip_updates, vehicle_positions))
    });

    let (trip_updates, vehicle_positions) = match snapshots {
        Ok(snapshots) => snapshots,
        Err(e) => {
            eprintln!("⚠️  {e} — no live data available.");
            return Vec::new();
        }
    };

    match planner.plan_route(
        &route.route_short_name,
        range,
        departure,
        &trip_updates,
        &vehicle_positions,
    ) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("⚠️  Could not plan route: {e}");
            Vec::new()
        }
    }
}

// ============================================================================
// Table rendering
// ============================================================================

fn print_table(rows: &[ItineraryRow]) {
    if rows.is_empty() {
        println!("No buses found within 10 minutes of your departure time.");
        return;
    }

    let headers = [
        "route_short_name",
        "route_long_name",
        "service_id",
        "trip_headsign",
        "scheduled_arrival_time",
        "live_arrival_time",
        "live_position",
        "estimated_travel_time",
    ];
    let cells: Vec<[&str; 8]> = rows
        .iter()
        .map(|row| {
            [
                row.route_short_name.as_str(),
                row.route_long_name.as_str(),
                row.service_id.as_str(),
                row.trip_headsign.as_str(),
                row.scheduled_arrival_time.as_str(),
                row.live_arrival_time.as_str(),
                row.live_position.as_str(),
                row.estimated_travel_time.as_str(),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let rule: String = widths
        .iter()
        .map(|w| "─".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("┼");
    let format_row = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!(" {cell:<width$} "))
            .collect::<Vec<_>>()
            .join("│")
    };

    println!("{}", format_row(&headers));
    println!("{rule}");
    for row in &cells {
        println!("{}", format_row(row));
    }
}
