use serde::Serialize;
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::data::{round_to, Compound, LapRecord};
use crate::degradation::fit_degradation;
use crate::errors::{Outcome, Result};
use crate::pit_loss::estimate_track_pit_loss;
use crate::session::{load_session, Session, TelemetryProvider};
use crate::stint::{build_stints, classify_stint, FieldStintStats, Stint, StintType};
use crate::verdict::{pit_condition_at, PitCondition, StrategyVerdict, VerdictKind};

/// One row of a strategy audit, one per stint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StintReportRow {
    pub stint: usize,
    pub compound: Compound,
    pub start_lap: u32,
    pub end_lap: u32,
    pub laps: usize,
    pub stint_type: StintType,
    pub clean_pace: Option<f64>,
    pub degradation: f64,
    /// Share of the stint's laps within the traffic gap of the car ahead;
    /// `None` when the feed carries no gap data.
    pub traffic_share: Option<f64>,
    /// Share of the stint's laps that carry a gap reading at all.
    pub traffic_coverage: Option<f64>,
    pub pit_lap: Option<u32>,
    pub pit_condition: Option<PitCondition>,
    pub verdict: Option<StrategyVerdict>,
    pub insight: String,
}

/// Audits a driver's race strategy stint by stint. A missing session or an
/// unknown driver is an empty answer, not an error.
pub fn audit_race_strategy<P: TelemetryProvider + ?Sized>(
    provider: &P,
    year: i32,
    circuit: &str,
    driver_identifier: &str,
    cfg: &AnalysisConfig,
) -> Result<Outcome<Vec<StintReportRow>>> {
    info!("auditing {} at {} {}", driver_identifier, year, circuit);
    let session = match load_session(provider, year, circuit, "R")? {
        Outcome::Ready(session) => session,
        Outcome::NoData(reason) => return Ok(Outcome::NoData(reason)),
        Outcome::DriverNotFound(id) => return Ok(Outcome::DriverNotFound(id)),
    };
    Ok(audit_session(&session, driver_identifier, cfg))
}

pub fn audit_session(session: &Session, driver_identifier: &str, cfg: &AnalysisConfig) -> Outcome<Vec<StintReportRow>> {
    let Some(driver) = session.resolve_driver(driver_identifier) else {
        return Outcome::DriverNotFound(driver_identifier.to_string());
    };
    let laps = session.driver_laps(&driver.abbreviation);
    if laps.is_empty() {
        return Outcome::NoData(format!("no laps recorded for {}", driver.abbreviation));
    }

    let field = FieldStintStats::from_session(session);
    let track_pit_loss = estimate_track_pit_loss(session, cfg);
    let stints = build_stints(laps);
    let last_index = stints.len();

    let rows: Vec<StintReportRow> = stints
        .iter()
        .map(|stint| {
            let pit = if stint.index < last_index {
                Some(assess_pit(stint, laps, track_pit_loss, cfg))
            } else {
                None
            };
            stint_row(stint, &field, pit, cfg)
        })
        .collect();

    info!("audit of {} produced {} stint rows", driver.abbreviation, rows.len());
    Outcome::Ready(rows)
}

struct PitAssessment {
    pit_lap: u32,
    condition: PitCondition,
    verdict: StrategyVerdict,
}

fn assess_pit(stint: &Stint, driver_laps: &[LapRecord], track_pit_loss: f64, cfg: &AnalysisConfig) -> PitAssessment {
    let pit_lap = stint.end_lap;
    let condition = pit_condition_at(driver_laps, pit_lap);

    let verdict = match condition {
        PitCondition::SafetyCar | PitCondition::VirtualSafetyCar => StrategyVerdict::new(
            VerdictKind::LuckyStop,
            format!(
                "Pitted under {condition}: the slowed field absorbed much of the {track_pit_loss:.1}s green-flag pit loss"
            ),
            track_pit_loss,
        ),
        PitCondition::RedFlag => StrategyVerdict::new(
            VerdictKind::FreeStop,
            "Tyres changed under red flag at no strategic cost",
            0.0,
        ),
        PitCondition::Green => green_flag_verdict(stint, cfg),
    };

    PitAssessment { pit_lap, condition, verdict }
}

fn green_flag_verdict(stint: &Stint, cfg: &AnalysisConfig) -> StrategyVerdict {
    let late = fit_degradation(stint.tail(cfg.late_window_laps), cfg);
    if !late.fitted {
        return StrategyVerdict::new(
            VerdictKind::Standard,
            format!("Only {} clean laps before the stop, timing not judged", late.samples),
            0.0,
        );
    }

    let slope = round_to(late.corrected_slope, 3);
    if slope > cfg.high_deg_threshold {
        StrategyVerdict::new(
            VerdictKind::HighDegLateStop,
            format!("Lap times rising {slope:.3}s/lap before the stop: stayed out too long"),
            slope,
        )
    } else if slope < cfg.good_pace_threshold {
        StrategyVerdict::new(
            VerdictKind::GoodPace,
            format!("Tyres still holding ({slope:.3}s/lap) when pitting: stop may have been early"),
            slope,
        )
    } else {
        StrategyVerdict::new(
            VerdictKind::Standard,
            format!("Normal wear of {slope:.3}s/lap at the stop"),
            slope,
        )
    }
}

/// Share of all `laps` spent closer than the traffic gap to the car ahead.
/// Laps without a gap reading count as clear air.
pub fn traffic_share(laps: &[LapRecord], cfg: &AnalysisConfig) -> Option<f64> {
    let gaps: Vec<f64> = laps.iter().filter_map(|l| l.gap_ahead).collect();
    if gaps.is_empty() {
        return None;
    }
    let in_traffic = gaps.iter().filter(|g| **g < cfg.traffic_gap).count();
    Some(in_traffic as f64 / laps.len() as f64)
}

/// Share of `laps` that carry a gap reading; `None` when none do.
pub fn gap_coverage(laps: &[LapRecord]) -> Option<f64> {
    let tagged = laps.iter().filter(|l| l.gap_ahead.is_some()).count();
    (tagged > 0).then(|| tagged as f64 / laps.len() as f64)
}

fn stint_row(stint: &Stint, field: &FieldStintStats, pit: Option<PitAssessment>, cfg: &AnalysisConfig) -> StintReportRow {
    let fit = fit_degradation(&stint.laps, cfg);
    let degradation = round_to(fit.corrected_slope, 3);
    let stint_type = classify_stint(stint, field, cfg);
    let clean_pace = stint.clean_pace().map(|p| round_to(p, 3));
    let traffic = traffic_share(&stint.laps, cfg).map(|s| round_to(s, 3));
    let coverage = gap_coverage(&stint.laps).map(|c| round_to(c, 3));

    let mut notes = vec![format!(
        "{} {} stint of {} laps (L{}-L{})",
        stint_type.label(),
        stint.compound,
        stint.lap_count(),
        stint.start_lap,
        stint.end_lap
    )];
    match clean_pace {
        Some(pace) => notes.push(format!("clean pace {pace:.3}s")),
        None => notes.push("no clean laps".to_string()),
    }
    if fit.fitted {
        notes.push(format!("degradation {degradation:.3}s/lap"));
    } else {
        notes.push("too few clean laps for a degradation trend".to_string());
    }
    match traffic {
        Some(share) if share > cfg.traffic_share_threshold => notes.push(format!(
            "stuck in traffic for {:.0}% of the stint (within {:.1}s of the car ahead)",
            share * 100.0,
            cfg.traffic_gap
        )),
        Some(_) => {}
        None => notes.push("traffic analysis unavailable".to_string()),
    }
    // A partial gap feed makes the share a lower bound, so say how much was seen.
    if let Some(c) = coverage.filter(|c| *c < 1.0) {
        notes.push(format!("gap data on {:.0}% of laps", c * 100.0));
    }
    match &pit {
        Some(p) => notes.push(format!("pit on L{} [{}]: {}", p.pit_lap, p.verdict.verdict, p.verdict.rationale)),
        None => notes.push("race-ending stint".to_string()),
    }

    debug!("{} stint {}: {:?}, deg {:.3}", stint.driver, stint.index, stint_type, degradation);
    StintReportRow {
        stint: stint.index,
        compound: stint.compound,
        start_lap: stint.start_lap,
        end_lap: stint.end_lap,
        laps: stint.lap_count(),
        stint_type,
        clean_pace,
        degradation,
        traffic_share: traffic,
        traffic_coverage: coverage,
        pit_lap: pit.as_ref().map(|p| p.pit_lap),
        pit_condition: pit.as_ref().map(|p| p.condition),
        verdict: pit.map(|p| p.verdict),
        insight: notes.join("; "),
    }
}
