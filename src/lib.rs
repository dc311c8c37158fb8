// Client library for the flight data API: resilient cached fetching and route analysis

pub mod analysis;
pub mod cache;
pub mod client;
pub mod error;
pub mod gateway;
pub mod models;
pub mod retry;
pub mod routes;

// Re-export key types for convenience
pub use analysis::{
    classify_airports, competition, duration_distribution, network_summary, AirportClass,
    CompetitionLevel, CompetitionReport, NetworkSummary,
};
pub use cache::{CacheConfig, CacheKey, CacheStats, RequestParams, ResultCache};
pub use client::{ClientConfig, FlightDataClient, HttpTransport, RouteQuery, Transport};
pub use error::{classify, ApiError, AttemptOutcome, ClientError, ErrorKind, RequestOutcome};
pub use gateway::CachedGateway;
pub use models::{DaySet, Endpoint, Route, TimeOfDay, Weekday};
pub use retry::RetryConfig;
pub use routes::{find_connections, ConnectionCandidate, ConnectionOptions, RouteGraph};
