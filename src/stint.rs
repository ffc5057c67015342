use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::AnalysisConfig;
use crate::data::{mean, round_to, Compound, LapRecord};
use crate::degradation::fit_degradation;
use crate::errors::Outcome;
use crate::session::Session;

/// A contiguous run of laps by one driver on one set of tyres.
#[derive(Debug, Clone, PartialEq)]
pub struct Stint {
    pub driver: String,
    /// 1-based position of the stint in the driver's race.
    pub index: usize,
    pub stint_id: u32,
    pub compound: Compound,
    pub start_lap: u32,
    pub end_lap: u32,
    pub laps: Vec<LapRecord>,
}

impl Stint {
    pub fn lap_count(&self) -> usize {
        self.laps.len()
    }

    /// Mean time of the clean laps, if there are any.
    pub fn clean_pace(&self) -> Option<f64> {
        let times: Vec<f64> = self
            .laps
            .iter()
            .filter(|l| l.is_clean())
            .filter_map(|l| l.lap_time_seconds)
            .collect();
        mean(&times)
    }

    pub fn last_lap(&self) -> Option<&LapRecord> {
        self.laps.last()
    }

    /// The last `n` laps of the stint.
    pub fn tail(&self, n: usize) -> &[LapRecord] {
        &self.laps[self.laps.len().saturating_sub(n)..]
    }
}

/// Splits a driver's ordered laps into stints, one per set of tyres. Without
/// stint ids a new stint starts after each pit entry.
pub fn build_stints(driver_laps: &[LapRecord]) -> Vec<Stint> {
    let mut stints: Vec<Stint> = Vec::new();

    for lap in driver_laps {
        let starts_new = match stints.last() {
            None => true,
            Some(current) => current
                .last_lap()
                .map_or(true, |prev| lap.opens_stint_after(prev)),
        };

        if starts_new {
            stints.push(Stint {
                driver: lap.driver.clone(),
                index: stints.len() + 1,
                stint_id: lap.stint,
                compound: lap.compound,
                start_lap: lap.lap_number,
                end_lap: lap.lap_number,
                laps: Vec::new(),
            });
        }
        if let Some(current) = stints.last_mut() {
            if current.compound == Compound::Unknown {
                current.compound = lap.compound;
            }
            current.end_lap = lap.lap_number;
            current.laps.push(lap.clone());
        }
    }
    stints
}

/// Field-wide stint length distribution for one compound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompoundStats {
    pub stints: usize,
    pub mean_length: f64,
    pub max_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldStintStats {
    by_compound: BTreeMap<Compound, CompoundStats>,
}

impl FieldStintStats {
    pub fn from_stints<'a, I>(stints: I) -> Self
    where
        I: IntoIterator<Item = &'a Stint>,
    {
        let mut lengths: BTreeMap<Compound, Vec<usize>> = BTreeMap::new();
        for stint in stints {
            if stint.lap_count() > 0 {
                lengths.entry(stint.compound).or_default().push(stint.lap_count());
            }
        }
        Self::from_lengths(lengths)
    }

    pub fn from_lengths(lengths: BTreeMap<Compound, Vec<usize>>) -> Self {
        let by_compound = lengths
            .into_iter()
            .filter(|(_, l)| !l.is_empty())
            .map(|(compound, l)| {
                let stats = CompoundStats {
                    stints: l.len(),
                    mean_length: l.iter().sum::<usize>() as f64 / l.len() as f64,
                    max_length: l.iter().copied().max().unwrap_or(0),
                };
                (compound, stats)
            })
            .collect();
        Self { by_compound }
    }

    /// Every stint of every driver in the session.
    pub fn from_session(session: &Session) -> Self {
        let stints: Vec<Stint> = session
            .drivers()
            .flat_map(|driver| build_stints(session.driver_laps(driver)))
            .collect();
        Self::from_stints(&stints)
    }

    pub fn get(&self, compound: Compound) -> Option<&CompoundStats> {
        self.by_compound.get(&compound)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Compound, &CompoundStats)> {
        self.by_compound.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StintType {
    #[serde(rename = "Extreme (Max Life)")]
    Extreme,
    #[serde(rename = "Long Run")]
    LongRun,
    #[serde(rename = "Short Sprint")]
    ShortSprint,
    #[serde(rename = "Standard")]
    Standard,
}

impl StintType {
    pub fn label(&self) -> &'static str {
        match self {
            StintType::Extreme => "Extreme (Max Life)",
            StintType::LongRun => "Long Run",
            StintType::ShortSprint => "Short Sprint",
            StintType::Standard => "Standard",
        }
    }
}

/// Labels a stint length relative to the same session's field on that compound.
pub fn classify_length(lap_count: usize, compound: Compound, field: &FieldStintStats, cfg: &AnalysisConfig) -> StintType {
    let Some(stats) = field.get(compound) else {
        return StintType::Standard;
    };
    let laps = lap_count as f64;
    if laps >= stats.max_length as f64 * cfg.extreme_ratio {
        StintType::Extreme
    } else if laps > stats.mean_length * cfg.long_run_ratio {
        StintType::LongRun
    } else if laps < stats.mean_length * cfg.short_sprint_ratio {
        StintType::ShortSprint
    } else {
        StintType::Standard
    }
}

pub fn classify_stint(stint: &Stint, field: &FieldStintStats, cfg: &AnalysisConfig) -> StintType {
    classify_length(stint.lap_count(), stint.compound, field, cfg)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompoundSummaryRow {
    pub compound: Compound,
    pub stints: usize,
    pub mean_length: f64,
    pub max_length: usize,
    /// Mean fuel-corrected slope over stints with enough clean laps.
    pub mean_degradation: Option<f64>,
}

/// Tyre life and wear per compound across the whole field.
pub fn compound_summary(session: &Session, cfg: &AnalysisConfig) -> Outcome<Vec<CompoundSummaryRow>> {
    let stints: Vec<Stint> = session
        .drivers()
        .flat_map(|driver| build_stints(session.driver_laps(driver)))
        .collect();
    let field = FieldStintStats::from_stints(&stints);

    let mut slopes: BTreeMap<Compound, Vec<f64>> = BTreeMap::new();
    for stint in &stints {
        let fit = fit_degradation(&stint.laps, cfg);
        if fit.fitted {
            slopes.entry(stint.compound).or_default().push(fit.corrected_slope);
        }
    }

    let rows: Vec<CompoundSummaryRow> = field
        .iter()
        .map(|(compound, stats)| CompoundSummaryRow {
            compound: *compound,
            stints: stats.stints,
            mean_length: round_to(stats.mean_length, 1),
            max_length: stats.max_length,
            mean_degradation: slopes
                .get(compound)
                .and_then(|s| mean(s))
                .map(|m| round_to(m, 4)),
        })
        .collect();

    if rows.is_empty() {
        Outcome::NoData(format!("no stints for {} {}", session.key.year, session.key.circuit))
    } else {
        Outcome::Ready(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, plan};

    fn field(lengths: &[usize]) -> FieldStintStats {
        let mut map = BTreeMap::new();
        map.insert(Compound::Hard, lengths.to_vec());
        FieldStintStats::from_lengths(map)
    }

    #[test]
    fn relative_thresholds() {
        let cfg = AnalysisConfig::default();
        let stats = field(&[10, 10, 10, 10, 40]);
        assert_eq!(classify_length(40, Compound::Hard, &stats, &cfg), StintType::Extreme);
        assert_eq!(classify_length(6, Compound::Hard, &stats, &cfg), StintType::ShortSprint);
        assert_eq!(classify_length(16, Compound::Hard, &stats, &cfg), StintType::Standard);
        // mean 16 → long run above 20.8, extreme from 38
        assert_eq!(classify_length(25, Compound::Hard, &stats, &cfg), StintType::LongRun);
    }

    #[test]
    fn unknown_compound_is_standard() {
        let stats = field(&[10, 20]);
        assert_eq!(
            classify_length(3, Compound::Soft, &stats, &AnalysisConfig::default()),
            StintType::Standard
        );
    }

    #[test]
    fn stints_split_on_stint_id_and_pit_entry() {
        let laps = testutil::race(
            "VER",
            "1",
            &[plan(Compound::Medium, 4, 90.0, 0.1), plan(Compound::Hard, 3, 91.0, 0.0)],
            5.0,
            17.0,
            0.0,
        );
        let stints = build_stints(&laps);
        assert_eq!(stints.len(), 2);
        assert_eq!((stints[0].start_lap, stints[0].end_lap), (1, 4));
        assert_eq!(stints[1].compound, Compound::Hard);
        assert_eq!((stints[1].index, stints[1].lap_count()), (2, 3));

        // a pit entry on an unchanged stint id keeps the same tyres
        let mut relabelled = laps.clone();
        relabelled.iter_mut().for_each(|l| l.stint = 1);
        assert_eq!(build_stints(&relabelled).len(), 1);

        // no stint column: the pit entry is the only boundary left
        let mut unlabelled = laps.clone();
        unlabelled.iter_mut().for_each(|l| l.stint = 0);
        let stints = build_stints(&unlabelled);
        assert_eq!(stints.len(), 2);
        assert_eq!((stints[1].start_lap, stints[1].end_lap), (5, 7));
    }

    #[test]
    fn drive_through_penalty_keeps_one_stint() {
        let mut laps = testutil::race("VER", "1", &[plan(Compound::Hard, 30, 91.0, 0.05)], 0.0, 0.0, 0.0);
        laps[9] = laps[9].clone().with_pit_in(900.0).inaccurate();
        laps[10] = laps[10].clone().with_pit_out(920.0).inaccurate();

        let stints = build_stints(&laps);
        assert_eq!(stints.len(), 1);
        assert_eq!((stints[0].start_lap, stints[0].end_lap), (1, 30));
        assert_eq!(stints[0].stint_id, 1);
    }

    #[test]
    fn clean_pace_skips_pit_laps() {
        let laps = testutil::race(
            "VER",
            "1",
            &[plan(Compound::Medium, 3, 90.0, 0.0), plan(Compound::Hard, 2, 91.0, 0.0)],
            5.0,
            17.0,
            0.0,
        );
        let stints = build_stints(&laps);
        assert_eq!(stints[0].clean_pace(), Some(90.0));
        assert_eq!(stints[1].clean_pace(), Some(91.0));
        assert_eq!(stints[0].tail(2).len(), 2);
        assert_eq!(stints[0].tail(10).len(), 3);
    }

    #[test]
    fn field_stats_from_session() {
        let session = testutil::three_car_session();
        let stats = FieldStintStats::from_session(&session);
        let medium = stats.get(Compound::Medium).unwrap();
        assert_eq!((medium.stints, medium.max_length), (3, 20));
        assert_eq!(medium.mean_length, 20.0);

        let rows = compound_summary(&session, &AnalysisConfig::default()).ready().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].compound, Compound::Medium);
        assert!(rows[0].mean_degradation.unwrap() > 0.1);
    }
}
