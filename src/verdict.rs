use serde::Serialize;
use std::fmt;

use crate::data::{LapRecord, TrackFlag, TrackStatus};

/// Track conditions under which a stop was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PitCondition {
    #[serde(rename = "SC")]
    SafetyCar,
    #[serde(rename = "VSC")]
    VirtualSafetyCar,
    #[serde(rename = "Red Flag")]
    RedFlag,
    #[serde(rename = "Green")]
    Green,
}

impl PitCondition {
    /// Red flag wins over SC, SC over VSC.
    pub fn from_status(status: TrackStatus) -> Self {
        if status.contains(TrackFlag::Red) {
            PitCondition::RedFlag
        } else if status.contains(TrackFlag::SafetyCar) {
            PitCondition::SafetyCar
        } else if status.contains(TrackFlag::VirtualSafetyCar) {
            PitCondition::VirtualSafetyCar
        } else {
            PitCondition::Green
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PitCondition::SafetyCar => "SC",
            PitCondition::VirtualSafetyCar => "VSC",
            PitCondition::RedFlag => "Red Flag",
            PitCondition::Green => "Green",
        }
    }
}

/// Conditions of the stop on `pit_lap`: flags of the in-lap and the lap before it.
pub fn pit_condition_at(driver_laps: &[LapRecord], pit_lap: u32) -> PitCondition {
    let status = driver_laps
        .iter()
        .filter(|l| l.lap_number == pit_lap || l.lap_number + 1 == pit_lap)
        .fold(TrackStatus::default(), |acc, l| acc.union(l.track_status));
    PitCondition::from_status(status)
}

impl fmt::Display for PitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerdictKind {
    #[serde(rename = "Lucky Stop (Optimal Timing)")]
    LuckyStop,
    #[serde(rename = "Free Tyre Change")]
    FreeStop,
    #[serde(rename = "High Deg (Late Stop)")]
    HighDegLateStop,
    #[serde(rename = "Good Pace (Early Stop)")]
    GoodPace,
    #[serde(rename = "Standard")]
    Standard,
    #[serde(rename = "Too Early")]
    TooEarly,
    #[serde(rename = "Good Timing")]
    GoodTiming,
    #[serde(rename = "Undercut Viable")]
    UndercutViable,
    #[serde(rename = "Undercut Unlikely")]
    UndercutUnlikely,
}

impl VerdictKind {
    pub fn label(&self) -> &'static str {
        match self {
            VerdictKind::LuckyStop => "Lucky Stop (Optimal Timing)",
            VerdictKind::FreeStop => "Free Tyre Change",
            VerdictKind::HighDegLateStop => "High Deg (Late Stop)",
            VerdictKind::GoodPace => "Good Pace (Early Stop)",
            VerdictKind::Standard => "Standard",
            VerdictKind::TooEarly => "Too Early",
            VerdictKind::GoodTiming => "Good Timing",
            VerdictKind::UndercutViable => "Undercut Viable",
            VerdictKind::UndercutUnlikely => "Undercut Unlikely",
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// A judgment on a stop or stint, with the number that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyVerdict {
    pub verdict: VerdictKind,
    pub rationale: String,
    pub delta: f64,
}

impl StrategyVerdict {
    pub fn new(verdict: VerdictKind, rationale: impl Into<String>, delta: f64) -> Self {
        Self { verdict, rationale: rationale.into(), delta }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_precedence() {
        let both = TrackStatus::from_code("467");
        assert_eq!(PitCondition::from_status(both), PitCondition::SafetyCar);
        assert_eq!(PitCondition::from_status(TrackStatus::from_code("15")), PitCondition::RedFlag);
        assert_eq!(PitCondition::from_status(TrackStatus::from_code("12")), PitCondition::Green);
    }

    #[test]
    fn condition_looks_at_in_lap_and_the_lap_before() {
        use crate::data::Compound;
        let laps: Vec<LapRecord> = (1..=4)
            .map(|n| LapRecord::new("VER", n, 90.0, Compound::Medium, 1))
            .map(|l| if l.lap_number == 2 { l.with_status(TrackStatus::from_code("6")) } else { l })
            .collect();
        assert_eq!(pit_condition_at(&laps, 3), PitCondition::VirtualSafetyCar);
        assert_eq!(pit_condition_at(&laps, 2), PitCondition::VirtualSafetyCar);
        assert_eq!(pit_condition_at(&laps, 4), PitCondition::Green);
    }

    #[test]
    fn labels_serialize_as_text() {
        let v = StrategyVerdict::new(VerdictKind::HighDegLateStop, "stayed out", 0.2);
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("\"High Deg (Late Stop)\""));
        assert_eq!(serde_json::to_string(&PitCondition::VirtualSafetyCar).unwrap(), "\"VSC\"");
    }
}
