// Typed records for the flight data API

use std::{fmt, str::FromStr};

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MINUTES_PER_DAY: u32 = 1440;

// Upstream endpoints exposed by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Flights,
    Routes,
    Airports,
    Airlines,
    Countries,
    Cities,
    Prices,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Flights => "flights",
            Endpoint::Routes => "routes",
            Endpoint::Airports => "airports",
            Endpoint::Airlines => "airlines",
            Endpoint::Countries => "countries",
            Endpoint::Cities => "cities",
            Endpoint::Prices => "prices",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];

    // 1 = Monday .. 7 = Sunday
    pub fn from_number(n: u64) -> Option<Self> {
        match n {
            1..=7 => Some(Self::ALL[(n - 1) as usize]),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl FromStr for Weekday {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Ok(n) = lower.parse::<u64>() {
            return Weekday::from_number(n).ok_or_else(|| format!("invalid day number {}", n));
        }
        let day = match lower.get(..3) {
            Some("mon") => Weekday::Mon,
            Some("tue") => Weekday::Tue,
            Some("wed") => Weekday::Wed,
            Some("thu") => Weekday::Thu,
            Some("fri") => Weekday::Fri,
            Some("sat") => Weekday::Sat,
            Some("sun") => Weekday::Sun,
            _ => return Err(format!("invalid weekday {:?}", s)),
        };
        Ok(day)
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Set of weekdays a route operates on, stored as a 7-bit mask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DaySet(u8);

impl DaySet {
    pub fn empty() -> Self {
        DaySet(0)
    }

    pub fn all() -> Self {
        DaySet(0b111_1111)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= day.bit();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & day.bit() != 0
    }

    pub fn intersection(&self, other: &DaySet) -> DaySet {
        DaySet(self.0 & other.0)
    }

    pub fn union(&self, other: &DaySet) -> DaySet {
        DaySet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        Weekday::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = DaySet::empty();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl fmt::Debug for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self::from)
    }

    pub fn minutes(&self) -> u32 {
        self.0 as u32
    }

    /// Minutes from `self` forward to `later`, wrapping past midnight.
    pub fn minutes_until(&self, later: TimeOfDay) -> u32 {
        (later.minutes() + MINUTES_PER_DAY - self.minutes()) % MINUTES_PER_DAY
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(t: NaiveTime) -> Self {
        TimeOfDay((t.hour() * 60 + t.minute()) as u16)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Datetime strings carry the time after a 'T' or a space
        let time_part = s.rsplit(|c| c == 'T' || c == ' ').next().unwrap_or(s);
        let time_part = time_part.get(..8).unwrap_or(time_part);
        NaiveTime::parse_from_str(time_part, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(time_part.get(..5).unwrap_or(time_part), "%H:%M"))
            .map(TimeOfDay::from)
            .map_err(|e| format!("invalid time {:?}: {}", s, e))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub airline: String,
    pub airline_name: Option<String>,
    pub flight_number: String,
    pub origin: String,
    pub destination: String,
    pub departure: TimeOfDay,
    pub arrival: TimeOfDay,
    pub operating_days: DaySet,
    pub duration_minutes: u32,
    pub is_codeshare: bool,
}

impl Route {
    // Block time inferred from the schedule when the feed omits a duration
    pub fn scheduled_duration(departure: TimeOfDay, arrival: TimeOfDay) -> u32 {
        departure.minutes_until(arrival)
    }
}

// Wire shape of a record from the routes endpoint

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRoute {
    #[serde(default)]
    pub departure: RawStop,
    #[serde(default)]
    pub arrival: RawStop,
    #[serde(default)]
    pub airline: RawAirline,
    #[serde(default)]
    pub flight: RawFlight,
    #[serde(default)]
    pub days: Option<Vec<RawDay>>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub codeshared: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStop {
    pub iata: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAirline {
    pub iata: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFlight {
    pub number: Option<String>,
    #[serde(default)]
    pub codeshared: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDay {
    Number(u64),
    Name(String),
}

impl RawDay {
    fn to_weekday(&self) -> Option<Weekday> {
        match self {
            RawDay::Number(n) => Weekday::from_number(*n),
            RawDay::Name(s) => s.parse().ok(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_ascii_uppercase()).filter(|s| !s.is_empty())
}

fn is_present(value: &Option<serde_json::Value>) -> bool {
    matches!(value, Some(v) if !v.is_null())
}

impl RawRoute {
    /// Normalizes a wire record; `None` when a mandatory field is missing or malformed.
    pub fn normalize(self) -> Option<Route> {
        let origin = non_empty(self.departure.iata)?;
        let destination = non_empty(self.arrival.iata)?;
        let airline = non_empty(self.airline.iata)?;
        let departure: TimeOfDay = self.departure.time.as_deref()?.parse().ok()?;
        let arrival: TimeOfDay = self.arrival.time.as_deref()?.parse().ok()?;

        let operating_days = match self.days {
            // Routes published without a day list are assumed to operate daily
            None => DaySet::all(),
            Some(days) => days.iter().filter_map(RawDay::to_weekday).collect(),
        };

        let is_codeshare = is_present(&self.codeshared) || is_present(&self.flight.codeshared);

        Some(Route {
            flight_number: self.flight.number.unwrap_or_default(),
            airline_name: self.airline.name,
            airline,
            origin,
            destination,
            departure,
            arrival,
            operating_days,
            duration_minutes: self
                .duration
                .unwrap_or_else(|| Route::scheduled_duration(departure, arrival)),
            is_codeshare,
        })
    }
}

/// Parses a list of route records, skipping entries that cannot be normalized.
pub fn parse_routes(records: &[serde_json::Value]) -> Vec<Route> {
    records
        .iter()
        .filter_map(|record| {
            let route = serde_json::from_value::<RawRoute>(record.clone())
                .ok()
                .and_then(RawRoute::normalize);
            if route.is_none() {
                debug!(record = %record, "skipping route record that could not be normalized");
            }
            route
        })
        .collect()
}
