// Network and competition statistics over route lists

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::models::{DaySet, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionLevel {
    Unserved,
    Monopoly,
    Low,
    Medium,
    High,
}

impl CompetitionLevel {
    pub fn from_airline_count(airlines: usize) -> Self {
        match airlines {
            0 => CompetitionLevel::Unserved,
            1 => CompetitionLevel::Monopoly,
            2 => CompetitionLevel::Low,
            3..=4 => CompetitionLevel::Medium,
            _ => CompetitionLevel::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AirlineShare {
    pub airline: String,
    pub airline_name: Option<String>,
    pub flights: usize,
    pub market_share: u32,
    pub avg_duration_minutes: u32,
    pub operating_days: DaySet,
    pub has_codeshare: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompetitionReport {
    pub per_airline: Vec<AirlineShare>,
    pub competition_level: CompetitionLevel,
    pub total_flights: usize,
}

/// Whole-number percentages that sum to exactly 100 (largest remainder).
/// Leftover points go to the largest remainders, earlier entries first on ties.
fn apportion_percent(parts: &[usize]) -> Vec<u32> {
    let total: usize = parts.iter().sum();
    if total == 0 {
        return vec![0; parts.len()];
    }

    let mut shares: Vec<u32> = parts.iter().map(|p| (p * 100 / total) as u32).collect();
    let assigned: u32 = shares.iter().sum();

    let mut by_remainder: Vec<usize> = (0..parts.len()).collect();
    // Stable sort keeps input order among equal remainders
    by_remainder.sort_by(|&a, &b| (parts[b] * 100 % total).cmp(&(parts[a] * 100 % total)));

    for &i in by_remainder.iter().take((100 - assigned) as usize) {
        shares[i] += 1;
    }
    shares
}

fn rounded_average(sum: u64, count: usize) -> u32 {
    if count == 0 {
        return 0;
    }
    let count = count as u64;
    ((sum * 2 + count) / (count * 2)) as u32
}

/// Market shares and competition level for routes serving one city pair.
pub fn competition(routes: &[Route]) -> CompetitionReport {
    let mut by_airline: BTreeMap<&str, Vec<&Route>> = BTreeMap::new();
    for route in routes {
        by_airline.entry(route.airline.as_str()).or_default().push(route);
    }

    let total_flights = routes.len();

    let mut per_airline: Vec<AirlineShare> = by_airline
        .into_iter()
        .map(|(airline, flights)| {
            let duration_sum: u64 = flights.iter().map(|r| r.duration_minutes as u64).sum();
            AirlineShare {
                airline: airline.to_string(),
                airline_name: flights.iter().find_map(|r| r.airline_name.clone()),
                flights: flights.len(),
                market_share: 0,
                avg_duration_minutes: rounded_average(duration_sum, flights.len()),
                operating_days: flights
                    .iter()
                    .fold(DaySet::empty(), |days, r| days.union(&r.operating_days)),
                has_codeshare: flights.iter().any(|r| r.is_codeshare),
            }
        })
        .collect();

    // per_airline is still in airline-code order here
    let counts: Vec<usize> = per_airline.iter().map(|a| a.flights).collect();
    for (share, percent) in per_airline.iter_mut().zip(apportion_percent(&counts)) {
        share.market_share = percent;
    }

    // BTreeMap order already breaks ties by airline code
    per_airline.sort_by(|a, b| b.flights.cmp(&a.flights));

    CompetitionReport {
        competition_level: CompetitionLevel::from_airline_count(per_airline.len()),
        per_airline,
        total_flights,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirportClass {
    Hub,
    FocusCity,
    Destination,
}

impl AirportClass {
    pub fn from_connections(connected_airports: usize) -> Self {
        match connected_airports {
            0..=4 => AirportClass::Destination,
            5..=9 => AirportClass::FocusCity,
            _ => AirportClass::Hub,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AirportRole {
    pub airport: String,
    pub connected_airports: usize,
    pub classification: AirportClass,
}

/// Classifies every airport in an airline's route set by how many distinct
/// airports it is connected to. Hubs come first, then by connection count.
pub fn classify_airports(routes: &[Route]) -> Vec<AirportRole> {
    let mut neighbours: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for route in routes {
        if route.origin == route.destination {
            continue;
        }
        neighbours
            .entry(route.origin.as_str())
            .or_default()
            .insert(route.destination.as_str());
        neighbours
            .entry(route.destination.as_str())
            .or_default()
            .insert(route.origin.as_str());
    }

    let mut roles: Vec<AirportRole> = neighbours
        .into_iter()
        .map(|(airport, connected)| AirportRole {
            airport: airport.to_string(),
            connected_airports: connected.len(),
            classification: AirportClass::from_connections(connected.len()),
        })
        .collect();

    roles.sort_by(|a, b| {
        a.classification
            .cmp(&b.classification)
            .then(b.connected_airports.cmp(&a.connected_airports))
            .then(a.airport.cmp(&b.airport))
    });
    roles
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DurationDistribution {
    // < 3h
    pub short: usize,
    // 3h to < 6h
    pub medium: usize,
    // 6h to < 12h
    pub long: usize,
    // >= 12h
    pub ultra_long: usize,
    pub avg_minutes: u32,
    pub min_minutes: u32,
    pub max_minutes: u32,
}

pub fn duration_distribution(routes: &[Route]) -> DurationDistribution {
    let mut dist = DurationDistribution::default();
    if routes.is_empty() {
        return dist;
    }

    let mut sum: u64 = 0;
    dist.min_minutes = u32::MAX;

    for route in routes {
        let minutes = route.duration_minutes;
        match minutes {
            0..=179 => dist.short += 1,
            180..=359 => dist.medium += 1,
            360..=719 => dist.long += 1,
            _ => dist.ultra_long += 1,
        }
        sum += minutes as u64;
        dist.min_minutes = dist.min_minutes.min(minutes);
        dist.max_minutes = dist.max_minutes.max(minutes);
    }

    dist.avg_minutes = rounded_average(sum, routes.len());
    dist
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSummary {
    pub airline: String,
    pub total_routes: usize,
    pub airports: usize,
    pub roles: Vec<AirportRole>,
    pub durations: DurationDistribution,
}

impl NetworkSummary {
    pub fn hubs(&self) -> impl Iterator<Item = &AirportRole> {
        self.roles
            .iter()
            .filter(|r| r.classification == AirportClass::Hub)
    }

    pub fn focus_cities(&self) -> impl Iterator<Item = &AirportRole> {
        self.roles
            .iter()
            .filter(|r| r.classification == AirportClass::FocusCity)
    }
}

/// Summarizes the routes operated by `airline`; routes of other carriers are ignored.
pub fn network_summary(airline: &str, routes: &[Route]) -> NetworkSummary {
    let own: Vec<Route> = routes
        .iter()
        .filter(|r| r.airline.eq_ignore_ascii_case(airline))
        .cloned()
        .collect();

    let roles = classify_airports(&own);

    NetworkSummary {
        airline: airline.to_ascii_uppercase(),
        total_routes: own.len(),
        airports: roles.len(),
        durations: duration_distribution(&own),
        roles,
    }
}
