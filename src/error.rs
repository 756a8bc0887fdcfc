use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Could not read {path:?}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Malformed row {line} in {path:?}: expected {expected} fields, found {found}")]
    MalformedRow {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("No route with short name {0:?}")]
    RouteNotFound(String),

    #[error("Route {route_id:?} has no stops")]
    NoStopsOnRoute { route_id: String },

    #[error("Live feed unavailable: {0}")]
    FeedUnavailable(String),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
