use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::data::{median, DriverInfo, LapRecord, SpeedSample};
use crate::errors::{Outcome, ProviderError};

/// Source of session data. Implementations own caching and I/O.
pub trait TelemetryProvider {
    fn get_session(&self, year: i32, circuit: &str, session_type: &str) -> Result<Session, ProviderError>;
}

/// Fetches a session, turning a missing session into `Outcome::NoData`.
/// Any other provider failure is returned as an error.
pub fn load_session<P: TelemetryProvider + ?Sized>(
    provider: &P,
    year: i32,
    circuit: &str,
    session_type: &str,
) -> Result<Outcome<Session>, ProviderError> {
    match provider.get_session(year, circuit, session_type) {
        Ok(session) => Ok(Outcome::Ready(session)),
        Err(ProviderError::SessionNotFound { .. }) => Ok(Outcome::NoData(format!(
            "no {} data for {} {}",
            session_type.trim().to_uppercase(),
            year,
            circuit
        ))),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionKey {
    pub year: i32,
    pub circuit: String,
    pub session_type: String,
}

impl SessionKey {
    pub fn new(year: i32, circuit: &str, session_type: &str) -> Self {
        Self {
            year,
            circuit: circuit.trim().to_string(),
            session_type: session_type.trim().to_uppercase(),
        }
    }
}

/// One loaded session. Laps are grouped per driver and ordered by lap number.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: SessionKey,
    driver_laps: BTreeMap<String, Vec<LapRecord>>,
    roster: Vec<DriverInfo>,
    traces: BTreeMap<String, Vec<SpeedSample>>,
}

impl Session {
    /// Builds a session; when `roster` is empty it is derived from the laps.
    pub fn new(key: SessionKey, laps: Vec<LapRecord>, roster: Vec<DriverInfo>) -> Self {
        let mut driver_laps: BTreeMap<String, Vec<LapRecord>> = BTreeMap::new();
        for lap in laps {
            driver_laps.entry(lap.driver.clone()).or_default().push(lap);
        }
        for laps in driver_laps.values_mut() {
            laps.sort_by_key(|l| l.lap_number);
            laps.dedup_by_key(|l| l.lap_number);
        }

        let roster = if roster.is_empty() { roster_from_laps(&driver_laps) } else { roster };
        Self { key, driver_laps, roster, traces: BTreeMap::new() }
    }

    pub fn with_traces(mut self, traces: BTreeMap<String, Vec<SpeedSample>>) -> Self {
        self.traces = traces;
        self
    }

    pub fn roster(&self) -> &[DriverInfo] {
        &self.roster
    }

    pub fn is_empty(&self) -> bool {
        self.driver_laps.values().all(|laps| laps.is_empty())
    }

    pub fn drivers(&self) -> impl Iterator<Item = &str> {
        self.driver_laps.keys().map(String::as_str)
    }

    pub fn all_laps(&self) -> impl Iterator<Item = &LapRecord> {
        self.driver_laps.values().flatten()
    }

    pub fn driver_laps(&self, driver: &str) -> &[LapRecord] {
        self.driver_laps.get(driver).map_or(&[], Vec::as_slice)
    }

    pub fn lap(&self, driver: &str, lap_number: u32) -> Option<&LapRecord> {
        let laps = self.driver_laps(driver);
        laps.binary_search_by_key(&lap_number, |l| l.lap_number)
            .ok()
            .map(|idx| &laps[idx])
    }

    pub fn fastest_lap(&self, driver: &str) -> Option<&LapRecord> {
        self.driver_laps(driver)
            .iter()
            .filter(|l| l.is_accurate)
            .filter_map(|l| l.lap_time_seconds.map(|t| (l, t)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(lap, _)| lap)
    }

    pub fn fastest_lap_trace(&self, driver: &str) -> Option<&[SpeedSample]> {
        self.traces.get(driver).map(Vec::as_slice)
    }

    /// Median of every clean lap in the session.
    pub fn median_clean_lap(&self) -> Option<f64> {
        let times: Vec<f64> = self
            .all_laps()
            .filter(|l| l.is_clean())
            .filter_map(|l| l.lap_time_seconds)
            .collect();
        median(&times)
    }

    /// Abbreviations of the first `n` classified drivers.
    pub fn classified_drivers(&self, n: usize) -> Vec<String> {
        let mut classified: Vec<&DriverInfo> = self.roster.iter().collect();
        classified.sort_by_key(|d| (d.position.is_none(), d.position));
        classified.into_iter().take(n).map(|d| d.abbreviation.clone()).collect()
    }

    /// Resolves a car number, a three-letter abbreviation or a unique
    /// last-name fragment. Ambiguous fragments resolve to nothing.
    pub fn resolve_driver(&self, identifier: &str) -> Option<&DriverInfo> {
        let needle = identifier.trim();
        if needle.is_empty() {
            return None;
        }

        if let Ok(number) = needle.parse::<u32>() {
            return self
                .roster
                .iter()
                .find(|d| d.number.parse::<u32>().ok() == Some(number));
        }

        if let Some(driver) = self.roster.iter().find(|d| d.abbreviation.eq_ignore_ascii_case(needle)) {
            return Some(driver);
        }

        let fragment = needle.to_lowercase();
        let matches: Vec<&DriverInfo> = self
            .roster
            .iter()
            .filter(|d| {
                let last = d.last_name().to_lowercase();
                !last.is_empty() && last.contains(&fragment)
            })
            .collect();
        match matches.as_slice() {
            [only] => Some(*only),
            [] => None,
            many => {
                debug!("identifier '{}' is ambiguous across {} drivers", identifier, many.len());
                None
            }
        }
    }

    /// Classification, optionally narrowed to one driver.
    pub fn standings(&self, driver: Option<&str>) -> Outcome<Vec<StandingRow>> {
        let entries: Vec<&DriverInfo> = match driver {
            Some(identifier) => match self.resolve_driver(identifier) {
                Some(info) => vec![info],
                None => return Outcome::DriverNotFound(identifier.to_string()),
            },
            None => self.roster.iter().collect(),
        };
        if entries.is_empty() {
            return Outcome::NoData(format!("no classification for {} {}", self.key.year, self.key.circuit));
        }

        let mut rows: Vec<StandingRow> = entries
            .into_iter()
            .map(|d| StandingRow {
                position: d.position,
                driver: d.abbreviation.clone(),
                team: d.team.clone(),
                grid_position: d.grid_position,
                positions_gained: match (d.grid_position, d.position) {
                    (Some(grid), Some(pos)) => Some(grid as i32 - pos as i32),
                    _ => None,
                },
                points: d.points,
                status: d.status.clone(),
            })
            .collect();
        rows.sort_by_key(|r| (r.position.is_none(), r.position));
        Outcome::Ready(rows)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandingRow {
    pub position: Option<u32>,
    pub driver: String,
    pub team: String,
    pub grid_position: Option<u32>,
    pub positions_gained: Option<i32>,
    pub points: f64,
    pub status: String,
}

fn roster_from_laps(driver_laps: &BTreeMap<String, Vec<LapRecord>>) -> Vec<DriverInfo> {
    driver_laps
        .iter()
        .filter_map(|(driver, laps)| {
            let last = laps.last()?;
            let mut info = DriverInfo::new(&last.driver_number, driver, "");
            info.position = laps.iter().rev().find_map(|l| l.position);
            Some(info)
        })
        .collect()
}

/// Provider over sessions that are already in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProvider {
    sessions: HashMap<SessionKey, Session>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.key.clone(), session);
    }
}

impl TelemetryProvider for InMemoryProvider {
    fn get_session(&self, year: i32, circuit: &str, session_type: &str) -> Result<Session, ProviderError> {
        self.sessions
            .get(&SessionKey::new(year, circuit, session_type))
            .cloned()
            .ok_or_else(|| ProviderError::SessionNotFound {
                year,
                circuit: circuit.to_string(),
                session_type: session_type.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Compound;

    fn roster() -> Vec<DriverInfo> {
        vec![
            DriverInfo::new("1", "VER", "Max Verstappen").with_position(2),
            DriverInfo::new("4", "NOR", "Lando Norris").with_position(1),
            DriverInfo::new("63", "RUS", "George Russell").with_position(3),
            DriverInfo::new("12", "ANT", "Andrea Kimi Antonelli"),
            DriverInfo::new("23", "ALB", "Alexander Albon").with_position(4),
        ]
    }

    fn session() -> Session {
        let laps = vec![
            LapRecord::new("VER", 2, 91.0, Compound::Medium, 1),
            LapRecord::new("VER", 1, 95.0, Compound::Medium, 1),
            LapRecord::new("NOR", 1, 94.0, Compound::Soft, 1),
        ];
        Session::new(SessionKey::new(2025, "Monaco", "r"), laps, roster())
    }

    #[test]
    fn resolves_numbers_abbreviations_and_names() {
        let s = session();
        assert_eq!(s.resolve_driver("63").map(|d| d.abbreviation.as_str()), Some("RUS"));
        assert_eq!(s.resolve_driver("01").map(|d| d.abbreviation.as_str()), Some("VER"));
        assert_eq!(s.resolve_driver("nor").map(|d| d.abbreviation.as_str()), Some("NOR"));
        assert_eq!(s.resolve_driver("verst").map(|d| d.abbreviation.as_str()), Some("VER"));
        assert_eq!(s.resolve_driver("Antonelli").map(|d| d.abbreviation.as_str()), Some("ANT"));
    }

    #[test]
    fn ambiguous_or_unknown_identifiers_are_not_found() {
        let s = session();
        // "l" appears in Russell, Antonelli and Albon
        assert!(s.resolve_driver("l").is_none());
        assert!(s.resolve_driver("99").is_none());
        assert!(s.resolve_driver("   ").is_none());
    }

    #[test]
    fn laps_are_sorted_per_driver() {
        let s = session();
        let laps = s.driver_laps("VER");
        assert_eq!(laps.iter().map(|l| l.lap_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(s.lap("VER", 2).and_then(|l| l.lap_time_seconds), Some(91.0));
        assert!(s.driver_laps("HAM").is_empty());
        assert_eq!(s.fastest_lap("VER").map(|l| l.lap_number), Some(2));
    }

    #[test]
    fn standings_sort_unclassified_last() {
        let rows = session().standings(None).ready().unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.driver.as_str()).collect();
        assert_eq!(order, vec!["NOR", "VER", "RUS", "ALB", "ANT"]);
        assert_eq!(session().standings(Some("XYZ")), Outcome::DriverNotFound("XYZ".to_string()));
    }

    #[test]
    fn roster_is_derived_when_results_are_missing() {
        let laps = vec![
            LapRecord::new("HAM", 1, 95.0, Compound::Hard, 1).with_number("44").with_position(5),
        ];
        let s = Session::new(SessionKey::new(2024, "Silverstone", "R"), laps, Vec::new());
        assert_eq!(s.resolve_driver("44").map(|d| d.abbreviation.as_str()), Some("HAM"));
        assert_eq!(s.classified_drivers(3), vec!["HAM".to_string()]);
    }

    #[test]
    fn in_memory_provider_reports_missing_sessions() {
        let mut provider = InMemoryProvider::new();
        provider.insert(session());
        assert!(provider.get_session(2025, "Monaco", "R").is_ok());
        assert!(matches!(
            provider.get_session(2025, "Monza", "R"),
            Err(ProviderError::SessionNotFound { .. })
        ));
        assert!(matches!(load_session(&provider, 2025, "Monza", "R"), Ok(Outcome::NoData(_))));
        assert!(load_session(&provider, 2025, "monaco ", "r").unwrap().is_ready());
    }
}
