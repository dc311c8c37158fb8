// Route graph and one-stop connection search

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{DaySet, Route};

pub const DEFAULT_MIN_LAYOVER_MINUTES: u32 = 45;
pub const DEFAULT_MAX_LAYOVER_MINUTES: u32 = 360;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub min_layover_minutes: u32,
    pub max_layover_minutes: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            min_layover_minutes: DEFAULT_MIN_LAYOVER_MINUTES,
            max_layover_minutes: DEFAULT_MAX_LAYOVER_MINUTES,
        }
    }
}

impl ConnectionOptions {
    pub fn with_max_layover(max_layover_minutes: u32) -> Self {
        Self {
            max_layover_minutes,
            ..Default::default()
        }
    }

    fn accepts(&self, layover_minutes: u32) -> bool {
        (self.min_layover_minutes..=self.max_layover_minutes).contains(&layover_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCandidate {
    pub outbound: Route,
    pub inbound: Route,
    pub connecting_airport: String,
    pub layover_minutes: u32,
    pub operating_days: DaySet,
    pub total_duration_minutes: u32,
}

/// Routes indexed by departure and arrival airport.
#[derive(Debug, Default)]
pub struct RouteGraph<'a> {
    departures: HashMap<&'a str, Vec<&'a Route>>,
    arrivals: HashMap<&'a str, Vec<&'a Route>>,
}

impl<'a> RouteGraph<'a> {
    pub fn build(routes: &'a [Route]) -> Self {
        let mut graph = RouteGraph::default();
        for route in routes {
            graph
                .departures
                .entry(route.origin.as_str())
                .or_default()
                .push(route);
            graph
                .arrivals
                .entry(route.destination.as_str())
                .or_default()
                .push(route);
        }
        graph
    }

    pub fn departures_from(&self, airport: &str) -> &[&'a Route] {
        self.departures.get(airport).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn arrivals_at(&self, airport: &str) -> &[&'a Route] {
        self.arrivals.get(airport).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn airports(&self) -> impl Iterator<Item = &'a str> + '_ {
        let mut seen: Vec<&'a str> = self
            .departures
            .keys()
            .chain(self.arrivals.keys())
            .copied()
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.into_iter()
    }

    /// Enumerates one-stop itineraries from `origin` to `destination`,
    /// shortest total journey first.
    pub fn connections(
        &self,
        origin: &str,
        destination: &str,
        options: &ConnectionOptions,
    ) -> Vec<ConnectionCandidate> {
        let mut candidates = Vec::new();

        for outbound in self.departures_from(origin) {
            let hub = outbound.destination.as_str();
            if hub == origin || hub == destination {
                continue;
            }

            for inbound in self.arrivals_at(destination) {
                if inbound.origin != hub {
                    continue;
                }

                let layover_minutes = outbound.arrival.minutes_until(inbound.departure);
                if !options.accepts(layover_minutes) {
                    continue;
                }

                let operating_days = outbound.operating_days.intersection(&inbound.operating_days);
                if operating_days.is_empty() {
                    continue;
                }

                candidates.push(ConnectionCandidate {
                    outbound: (*outbound).clone(),
                    inbound: (*inbound).clone(),
                    connecting_airport: hub.to_string(),
                    layover_minutes,
                    operating_days,
                    total_duration_minutes: outbound
                        .duration_minutes
                        .saturating_add(layover_minutes)
                        .saturating_add(inbound.duration_minutes),
                });
            }
        }

        candidates.sort_by_key(|c| (c.total_duration_minutes, c.layover_minutes));
        candidates
    }
}

pub fn find_connections(
    routes: &[Route],
    origin: &str,
    destination: &str,
    options: &ConnectionOptions,
) -> Vec<ConnectionCandidate> {
    RouteGraph::build(routes).connections(origin, destination, options)
}


#[cfg(test)]
mod tests {
    use super::fixtures::route;
    use super::*;
    use crate::models::Weekday::{Mon, Thu, Tue, Wed};

    #[test]
    fn test_single_connection_via_hub() {
        let routes = vec![
            route("EK", "LHR", "DXB", (10, 0), (20, 0), &[Mon]),
            route("EK", "DXB", "SIN", (21, 30), (7, 0), &[Mon, Tue]),
        ];

        let found = find_connections(&routes, "LHR", "SIN", &ConnectionOptions::with_max_layover(180));

        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.connecting_airport, "DXB");
        assert_eq!(c.layover_minutes, 90);
        assert_eq!(c.operating_days.iter().collect::<Vec<_>>(), vec![Mon]);
        assert_eq!(c.total_duration_minutes, 600 + 90 + 570);
        assert_eq!(c.outbound.destination, c.inbound.origin);
    }

    #[test]
    fn test_overnight_layover_wraps() {
        let routes = vec![
            route("BA", "JFK", "LHR", (15, 30), (23, 30), &[]),
            route("BA", "LHR", "NCE", (0, 15), (3, 0), &[]),
        ];

        let found = find_connections(&routes, "JFK", "NCE", &ConnectionOptions::default());

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].layover_minutes, 45);
    }

    #[test]
    fn test_disjoint_days_never_connect() {
        let routes = vec![
            route("LH", "MUC", "FRA", (8, 0), (9, 0), &[Mon, Wed]),
            route("LH", "FRA", "JFK", (11, 0), (19, 0), &[Tue, Thu]),
        ];

        let found = find_connections(&routes, "MUC", "JFK", &ConnectionOptions::default());
        assert!(found.is_empty());
    }

    #[test]
    fn test_layover_window_bounds() {
        let routes = vec![
            route("AF", "NCE", "CDG", (8, 0), (9, 30), &[]),
            // 44 minutes: too short
            route("AF", "CDG", "JFK", (10, 14), (18, 0), &[]),
            // exactly the minimum
            route("AF", "CDG", "JFK", (10, 15), (18, 0), &[]),
            // exactly the maximum
            route("AF", "CDG", "JFK", (12, 30), (20, 0), &[]),
            // one minute past the maximum
            route("AF", "CDG", "JFK", (12, 31), (20, 0), &[]),
        ];

        let found = find_connections(&routes, "NCE", "JFK", &ConnectionOptions::with_max_layover(180));

        let layovers: Vec<u32> = found.iter().map(|c| c.layover_minutes).collect();
        assert_eq!(layovers, vec![45, 180]);
    }

    #[test]
    fn test_sorted_by_total_duration() {
        let routes = vec![
            route("KL", "BCN", "AMS", (7, 0), (9, 30), &[]),
            route("LH", "BCN", "FRA", (6, 0), (8, 0), &[]),
            route("KL", "AMS", "ORD", (11, 0), (19, 0), &[]),
            route("LH", "FRA", "ORD", (9, 0), (17, 0), &[]),
        ];

        let found = find_connections(&routes, "BCN", "ORD", &ConnectionOptions::default());

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].connecting_airport, "FRA");
        assert_eq!(found[0].total_duration_minutes, 120 + 60 + 480);
        assert_eq!(found[1].connecting_airport, "AMS");
        assert!(found[0].total_duration_minutes <= found[1].total_duration_minutes);
    }

    #[test]
    fn test_ignores_direct_and_loop_routes() {
        let routes = vec![
            route("BA", "LHR", "JFK", (9, 0), (12, 0), &[]),
            route("BA", "JFK", "JFK", (13, 0), (14, 0), &[]),
            route("BA", "LHR", "LHR", (9, 0), (10, 0), &[]),
            route("BA", "LHR", "JFK", (11, 0), (14, 0), &[]),
        ];

        let found = find_connections(&routes, "LHR", "JFK", &ConnectionOptions::default());
        assert!(found.is_empty());
    }

    #[test]
    fn test_total_duration_saturates() {
        let mut routes = vec![
            route("QF", "SYD", "SIN", (6, 0), (12, 0), &[]),
            route("QF", "SIN", "LHR", (14, 0), (20, 0), &[]),
        ];
        routes[0].duration_minutes = u32::MAX - 10;
        routes[1].duration_minutes = u32::MAX;

        let found = find_connections(&routes, "SYD", "LHR", &ConnectionOptions::default());

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].layover_minutes, 120);
        assert_eq!(found[0].total_duration_minutes, u32::MAX);
    }

    #[test]
    fn test_empty_input() {
        assert!(find_connections(&[], "LHR", "SIN", &ConnectionOptions::default()).is_empty());
    }

    #[test]
    fn test_graph_indexes() {
        let routes = vec![
            route("EK", "LHR", "DXB", (10, 0), (20, 0), &[]),
            route("EK", "DXB", "SIN", (21, 30), (7, 0), &[]),
            route("SQ", "LHR", "SIN", (11, 0), (7, 0), &[]),
        ];
        let graph = RouteGraph::build(&routes);

        assert_eq!(graph.departures_from("LHR").len(), 2);
        assert_eq!(graph.arrivals_at("SIN").len(), 2);
        assert!(graph.departures_from("JFK").is_empty());
        assert_eq!(graph.airports().collect::<Vec<_>>(), vec!["DXB", "LHR", "SIN"]);
    }
}
