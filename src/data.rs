use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::session::{Session, SessionKey, TelemetryProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compound {
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
    Unknown,
}

impl Compound {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "SOFT" => Compound::Soft,
            "MEDIUM" => Compound::Medium,
            "HARD" => Compound::Hard,
            "INTERMEDIATE" => Compound::Intermediate,
            "WET" => Compound::Wet,
            _ => Compound::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compound::Soft => "SOFT",
            Compound::Medium => "MEDIUM",
            Compound::Hard => "HARD",
            Compound::Intermediate => "INTERMEDIATE",
            Compound::Wet => "WET",
            Compound::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFlag {
    Green,
    Yellow,
    SafetyCar,
    VirtualSafetyCar,
    Red,
}

impl TrackFlag {
    fn bit(self) -> u8 {
        match self {
            TrackFlag::Green => 1,
            TrackFlag::Yellow => 1 << 1,
            TrackFlag::SafetyCar => 1 << 2,
            TrackFlag::VirtualSafetyCar => 1 << 3,
            TrackFlag::Red => 1 << 4,
        }
    }
}

/// Set of track flags seen during a lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackStatus(u8);

impl TrackStatus {
    pub fn green() -> Self {
        Self::from_flags(&[TrackFlag::Green])
    }

    pub fn from_flags(flags: &[TrackFlag]) -> Self {
        TrackStatus(flags.iter().fold(0, |bits, flag| bits | flag.bit()))
    }

    /// Parses a FastF1 status string, where every character is one status code
    /// ("1" green, "2" yellow, "4" safety car, "5" red, "6"/"7" VSC).
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        let code = code.strip_suffix(".0").unwrap_or(code);
        let mut bits = 0;
        for c in code.chars() {
            let flag = match c {
                '1' => TrackFlag::Green,
                '2' => TrackFlag::Yellow,
                '4' => TrackFlag::SafetyCar,
                '5' => TrackFlag::Red,
                '6' | '7' => TrackFlag::VirtualSafetyCar,
                _ => continue,
            };
            bits |= flag.bit();
        }
        TrackStatus(bits)
    }

    pub fn contains(&self, flag: TrackFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn union(&self, other: TrackStatus) -> TrackStatus {
        TrackStatus(self.0 | other.0)
    }

    /// SC or VSC.
    pub fn is_caution(&self) -> bool {
        self.contains(TrackFlag::SafetyCar) || self.contains(TrackFlag::VirtualSafetyCar)
    }

    /// No yellow, caution or red flag during the lap.
    pub fn is_green(&self) -> bool {
        !(self.contains(TrackFlag::Yellow) || self.is_caution() || self.contains(TrackFlag::Red))
    }
}

/// One lap of one driver as delivered by the telemetry provider. Times are seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LapRecord {
    pub driver: String,
    pub driver_number: String,
    pub lap_number: u32,
    pub lap_time_seconds: Option<f64>,
    pub compound: Compound,
    pub tyre_age: u32,
    pub stint: u32,
    pub track_status: TrackStatus,
    pub pit_in_time: Option<f64>,
    pub pit_out_time: Option<f64>,
    pub is_accurate: bool,
    pub position: Option<u32>,
    /// Session clock when the lap was completed.
    pub session_time: Option<f64>,
    /// Time gap to the car ahead at the end of the lap, when the feed provides it.
    pub gap_ahead: Option<f64>,
}

impl LapRecord {
    /// An accurate green-flag lap on a tyre that is as old as the lap number.
    pub fn new(driver: &str, lap_number: u32, lap_time_seconds: f64, compound: Compound, stint: u32) -> Self {
        Self {
            driver: driver.to_string(),
            driver_number: String::new(),
            lap_number,
            lap_time_seconds: Some(lap_time_seconds),
            compound,
            tyre_age: lap_number,
            stint,
            track_status: TrackStatus::green(),
            pit_in_time: None,
            pit_out_time: None,
            is_accurate: true,
            position: None,
            session_time: None,
            gap_ahead: None,
        }
    }

    pub fn with_number(mut self, number: &str) -> Self {
        self.driver_number = number.to_string();
        self
    }

    pub fn with_tyre_age(mut self, age: u32) -> Self {
        self.tyre_age = age;
        self
    }

    pub fn with_status(mut self, status: TrackStatus) -> Self {
        self.track_status = status;
        self
    }

    pub fn with_pit_in(mut self, at: f64) -> Self {
        self.pit_in_time = Some(at);
        self
    }

    pub fn with_pit_out(mut self, at: f64) -> Self {
        self.pit_out_time = Some(at);
        self
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_session_time(mut self, at: f64) -> Self {
        self.session_time = Some(at);
        self
    }

    pub fn with_gap_ahead(mut self, gap: f64) -> Self {
        self.gap_ahead = Some(gap);
        self
    }

    pub fn without_time(mut self) -> Self {
        self.lap_time_seconds = None;
        self
    }

    pub fn inaccurate(mut self) -> Self {
        self.is_accurate = false;
        self
    }

    pub fn is_pit_in_lap(&self) -> bool {
        self.pit_in_time.is_some()
    }

    pub fn is_pit_out_lap(&self) -> bool {
        self.pit_out_time.is_some()
    }

    /// Whether this lap runs on a different set of tyres than `prev`. Stint id 0
    /// means the feed had no stint column.
    pub fn opens_stint_after(&self, prev: &LapRecord) -> bool {
        // only a tyre change bumps the stint id; drive-throughs and stop-go
        // penalties go through the pit lane on the same set
        if self.stint == 0 || prev.stint == 0 {
            return prev.is_pit_in_lap() || self.is_pit_out_lap();
        }
        self.stint != prev.stint
    }

    /// Accurate, timed, run under green flag and not an in/out lap.
    pub fn is_clean(&self) -> bool {
        self.is_accurate
            && self.track_status.is_green()
            && self.lap_time_seconds.is_some()
            && !self.is_pit_in_lap()
            && !self.is_pit_out_lap()
    }
}

/// A point of a speed trace, positioned by distance from the start line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub distance_m: f64,
    pub speed_kph: f64,
}

/// Roster entry, taken from the session classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverInfo {
    pub number: String,
    pub abbreviation: String,
    pub full_name: String,
    pub team: String,
    pub position: Option<u32>,
    pub grid_position: Option<u32>,
    pub points: f64,
    pub status: String,
}

impl DriverInfo {
    pub fn new(number: &str, abbreviation: &str, full_name: &str) -> Self {
        Self {
            number: number.to_string(),
            abbreviation: abbreviation.to_string(),
            full_name: full_name.to_string(),
            team: String::new(),
            position: None,
            grid_position: None,
            points: 0.0,
            status: String::new(),
        }
    }

    pub fn with_team(mut self, team: &str) -> Self {
        self.team = team.to_string();
        self
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn last_name(&self) -> &str {
        self.full_name.split_whitespace().last().unwrap_or("")
    }
}

// FastF1 column names, as exported by the lap loader
#[derive(Debug, Deserialize)]
struct RawLapRow {
    #[serde(rename = "Driver")] driver: String,
    #[serde(rename = "DriverNumber", default)] driver_number: Option<String>,
    #[serde(rename = "LapNumber")] lap_number: Option<f64>,
    #[serde(rename = "LapTime", default)] lap_time: Option<f64>,
    #[serde(rename = "Compound", default)] compound: Option<String>,
    #[serde(rename = "TyreLife", default)] tyre_life: Option<f64>,
    #[serde(rename = "Stint", default)] stint: Option<f64>,
    #[serde(rename = "TrackStatus", default)] track_status: Option<String>,
    #[serde(rename = "PitInTime", default)] pit_in_time: Option<f64>,
    #[serde(rename = "PitOutTime", default)] pit_out_time: Option<f64>,
    #[serde(rename = "IsAccurate", default)] is_accurate: Option<String>,
    #[serde(rename = "Position", default)] position: Option<f64>,
    #[serde(rename = "Time", default)] time: Option<f64>,
    #[serde(rename = "GapAhead", default)] gap_ahead: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawResultRow {
    #[serde(rename = "DriverNumber")] driver_number: String,
    #[serde(rename = "Abbreviation")] abbreviation: String,
    #[serde(rename = "FullName", default)] full_name: Option<String>,
    #[serde(rename = "TeamName", default)] team_name: Option<String>,
    #[serde(rename = "Position", default)] position: Option<f64>,
    #[serde(rename = "GridPosition", default)] grid_position: Option<f64>,
    #[serde(rename = "Points", default)] points: Option<f64>,
    #[serde(rename = "Status", default)] status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTelemetryRow {
    #[serde(rename = "Driver")] driver: String,
    #[serde(rename = "Distance")] distance: f64,
    #[serde(rename = "Speed")] speed: f64,
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.trim().to_lowercase()).as_deref(),
        Some("true") | Some("1") | Some("1.0")
    )
}

fn positive_u32(raw: Option<f64>) -> Option<u32> {
    raw.filter(|v| v.is_finite() && *v >= 1.0).map(|v| v.round() as u32)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Reads `laps.csv`. Rows without a driver or a lap number are dropped.
pub fn read_laps(path: &Path) -> Result<Vec<LapRecord>, ProviderError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut laps = Vec::new();
    let mut skipped = 0usize;

    for res in reader.deserialize() {
        let raw: RawLapRow = res?;
        let lap_number = match positive_u32(raw.lap_number) {
            Some(n) if !raw.driver.trim().is_empty() => n,
            _ => {
                skipped += 1;
                continue;
            }
        };
        let lap_time = raw.lap_time.filter(|t| t.is_finite() && *t > 0.0);
        laps.push(LapRecord {
            driver: raw.driver.trim().to_uppercase(),
            driver_number: raw.driver_number.map(|n| n.trim().to_string()).unwrap_or_default(),
            lap_number,
            lap_time_seconds: lap_time,
            compound: raw.compound.as_deref().map_or(Compound::Unknown, Compound::parse),
            tyre_age: raw.tyre_life.filter(|v| v.is_finite() && *v >= 0.0).map_or(0, |v| v.round() as u32),
            stint: raw.stint.filter(|v| v.is_finite() && *v >= 0.0).map_or(0, |v| v.round() as u32),
            track_status: raw.track_status.as_deref().map_or_else(TrackStatus::green, TrackStatus::from_code),
            pit_in_time: raw.pit_in_time,
            pit_out_time: raw.pit_out_time,
            is_accurate: parse_flag(raw.is_accurate.as_deref()),
            position: positive_u32(raw.position),
            session_time: raw.time,
            gap_ahead: raw.gap_ahead.filter(|g| g.is_finite() && *g >= 0.0),
        });
    }

    if skipped > 0 {
        debug!("{}: skipped {} rows without driver or lap number", display_name(path), skipped);
    }
    Ok(laps)
}

pub fn read_results(path: &Path) -> Result<Vec<DriverInfo>, ProviderError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut roster = Vec::new();
    for res in reader.deserialize() {
        let raw: RawResultRow = res?;
        roster.push(DriverInfo {
            number: raw.driver_number.trim().to_string(),
            abbreviation: raw.abbreviation.trim().to_uppercase(),
            full_name: raw.full_name.unwrap_or_default(),
            team: raw.team_name.unwrap_or_default(),
            position: positive_u32(raw.position),
            grid_position: positive_u32(raw.grid_position),
            points: raw.points.unwrap_or(0.0),
            status: raw.status.unwrap_or_default(),
        });
    }
    Ok(roster)
}

/// Reads fastest-lap speed traces, grouped by driver and sorted by distance.
pub fn read_traces(path: &Path) -> Result<BTreeMap<String, Vec<SpeedSample>>, ProviderError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut traces: BTreeMap<String, Vec<SpeedSample>> = BTreeMap::new();
    for res in reader.deserialize() {
        let raw: RawTelemetryRow = res?;
        if !raw.distance.is_finite() || !raw.speed.is_finite() {
            continue;
        }
        traces
            .entry(raw.driver.trim().to_uppercase())
            .or_default()
            .push(SpeedSample { distance_m: raw.distance, speed_kph: raw.speed });
    }
    for trace in traces.values_mut() {
        trace.sort_by(|a, b| a.distance_m.partial_cmp(&b.distance_m).unwrap_or(Ordering::Equal));
    }
    Ok(traces)
}

/// Telemetry provider over a directory of FastF1 exports, one sub-directory
/// per session named like `2025_Las_Vegas_Grand_Prix_R`.
#[derive(Debug, Clone)]
pub struct CsvProvider {
    data_dir: PathBuf,
}

impl CsvProvider {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self { data_dir: data_dir.as_ref().to_path_buf() }
    }

    /// Finds the session directory whose name carries the year, the circuit
    /// keyword and the session type. The first match in sorted order wins.
    pub fn find_session_dir(&self, year: i32, circuit: &str, session_type: &str) -> Result<Option<PathBuf>, ProviderError> {
        let keyword = circuit.trim().replace(' ', "_").to_lowercase();
        if keyword.is_empty() {
            return Ok(None);
        }
        let prefix = format!("{year}_");
        let suffix = format!("_{}", session_type.trim().to_lowercase());

        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name.starts_with(&prefix) && name.ends_with(&suffix) && name.contains(&keyword) {
                candidates.push(entry.path());
            }
        }
        candidates.sort();
        if candidates.len() > 1 {
            debug!("{} sessions match '{}', using {}", candidates.len(), circuit, candidates[0].display());
        }
        Ok(candidates.into_iter().next())
    }

    pub fn load_dir(&self, dir: &Path, key: SessionKey) -> Result<Session, ProviderError> {
        let laps_path = dir.join("laps.csv");
        if !laps_path.exists() {
            return Err(ProviderError::Malformed {
                file: display_name(dir),
                reason: "missing laps.csv".to_string(),
            });
        }
        let laps = read_laps(&laps_path)?;

        let results_path = dir.join("results.csv");
        let roster = if results_path.exists() { read_results(&results_path)? } else { Vec::new() };

        let telemetry_path = dir.join("telemetry.csv");
        let traces = if telemetry_path.exists() {
            read_traces(&telemetry_path)?
        } else {
            BTreeMap::new()
        };

        debug!(
            "loaded {}: {} laps, {} roster entries, {} traces",
            display_name(dir), laps.len(), roster.len(), traces.len()
        );
        Ok(Session::new(key, laps, roster).with_traces(traces))
    }
}

impl TelemetryProvider for CsvProvider {
    fn get_session(&self, year: i32, circuit: &str, session_type: &str) -> Result<Session, ProviderError> {
        match self.find_session_dir(year, circuit, session_type)? {
            Some(dir) => self.load_dir(&dir, SessionKey::new(year, circuit, session_type)),
            None => {
                warn!("no session directory for {} {} ({})", year, circuit, session_type);
                Err(ProviderError::SessionNotFound {
                    year,
                    circuit: circuit.to_string(),
                    session_type: session_type.to_string(),
                })
            }
        }
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
