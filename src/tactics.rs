//! What-if analysis of pit stops.
//!
//! Two questions are asked of every stop: could the driver have undercut the
//! car ahead ([`simulate_pit_opportunity`]), and would staying out have been
//! faster ([`audit_extension`]). The undercut probability comes from fixed
//! margin bands in [`AnalysisConfig`]; it is a heuristic, not a fitted model.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::data::{round_to, LapRecord};
use crate::degradation::calculate_slope;
use crate::errors::Outcome;
use crate::pit_loss::{estimate_driver_pit_loss, estimate_track_pit_loss, pit_events};
use crate::session::Session;
use crate::verdict::{pit_condition_at, PitCondition, StrategyVerdict, VerdictKind};

/// `gap + pit_loss_delta - gain`. Negative means the undercut works.
///
/// `gap_to_rival` is positive when the subject runs behind the rival.
pub fn undercut_margin(gap_to_rival: f64, pit_loss_delta: f64, undercut_gain: f64) -> f64 {
    gap_to_rival + pit_loss_delta - undercut_gain
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndercutSimulation {
    pub driver: String,
    pub rival: String,
    pub pit_lap: u32,
    /// Lap the gap was measured on.
    pub reference_lap: u32,
    pub gap_to_rival: f64,
    pub pit_loss: f64,
    pub track_pit_loss: f64,
    pub pit_loss_delta: f64,
    pub undercut_gain_estimate: f64,
    pub net_margin: f64,
    pub success_probability: f64,
    pub verdict: StrategyVerdict,
}

/// Simulates an undercut by `driver_identifier` stopping on `pit_lap`.
///
/// Without a rival the car one place ahead on the lap before the stop is used.
/// When either car has no timed lap there, no comparison is made.
pub fn simulate_pit_opportunity(
    session: &Session,
    driver_identifier: &str,
    pit_lap: u32,
    rival_identifier: Option<&str>,
    cfg: &AnalysisConfig,
) -> Outcome<UndercutSimulation> {
    let Some(driver) = session.resolve_driver(driver_identifier) else {
        return Outcome::DriverNotFound(driver_identifier.to_string());
    };
    let driver = driver.abbreviation.clone();
    if pit_lap < 2 {
        return Outcome::NoData(format!("no lap before a stop on lap {pit_lap}"));
    }
    let reference_lap = pit_lap - 1;
    let Some(subject_lap) = session.lap(&driver, reference_lap) else {
        return Outcome::NoData(format!("{driver} has no lap {reference_lap}"));
    };

    let rival = match rival_identifier {
        Some(id) => match session.resolve_driver(id) {
            Some(info) => info.abbreviation.clone(),
            None => return Outcome::DriverNotFound(id.to_string()),
        },
        None => match car_ahead(session, subject_lap) {
            Some(rival) => rival,
            None => return Outcome::NoData(format!("no car ahead of {driver} on lap {reference_lap}")),
        },
    };
    if rival == driver {
        return Outcome::NoData(format!("{driver} cannot be compared with itself"));
    }

    let Some(gap) = gap_between(session, &driver, &rival, reference_lap) else {
        return Outcome::NoData(format!("no comparable timing for {driver} and {rival} on lap {reference_lap}"));
    };

    let track_pit_loss = estimate_track_pit_loss(session, cfg);
    let pit_loss = estimate_driver_pit_loss(session.driver_laps(&driver), pit_lap, track_pit_loss, cfg);
    let pit_loss_delta = pit_loss - track_pit_loss;
    let margin = undercut_margin(gap, pit_loss_delta, cfg.undercut_gain);
    let probability = cfg.success_probability(margin);

    let verdict = if margin < 0.0 {
        StrategyVerdict::new(
            VerdictKind::UndercutViable,
            format!("Would emerge {:.2}s ahead of {rival}", -margin),
            round_to(margin, 3),
        )
    } else {
        StrategyVerdict::new(
            VerdictKind::UndercutUnlikely,
            format!("Would rejoin {margin:.2}s behind {rival}"),
            round_to(margin, 3),
        )
    };
    debug!("{} vs {} on lap {}: gap {:.3}, margin {:.3}", driver, rival, pit_lap, gap, margin);

    Outcome::Ready(UndercutSimulation {
        driver,
        rival,
        pit_lap,
        reference_lap,
        gap_to_rival: round_to(gap, 3),
        pit_loss: round_to(pit_loss, 3),
        track_pit_loss: round_to(track_pit_loss, 3),
        pit_loss_delta: round_to(pit_loss_delta, 3),
        undercut_gain_estimate: cfg.undercut_gain,
        net_margin: round_to(margin, 3),
        success_probability: probability,
        verdict,
    })
}

fn car_ahead(session: &Session, subject_lap: &LapRecord) -> Option<String> {
    let position = subject_lap.position?;
    if position < 2 {
        return None;
    }
    session
        .drivers()
        .find(|d| {
            session
                .lap(d, subject_lap.lap_number)
                .is_some_and(|l| l.position == Some(position - 1))
        })
        .map(str::to_string)
}

/// Seconds the subject trails the rival at the end of `lap_number`.
fn gap_between(session: &Session, subject: &str, rival: &str, lap_number: u32) -> Option<f64> {
    let subject_lap = session.lap(subject, lap_number)?;
    let rival_lap = session.lap(rival, lap_number)?;
    // the session clock already includes time lost to pit stops and the
    // start; summing lap times is the fallback for feeds without it
    if let (Some(s), Some(r)) = (subject_lap.session_time, rival_lap.session_time) {
        return Some(s - r);
    }
    Some(elapsed(session.driver_laps(subject), lap_number)? - elapsed(session.driver_laps(rival), lap_number)?)
}

/// Sum of lap times up to and including `lap_number`; every lap must be timed.
fn elapsed(laps: &[LapRecord], lap_number: u32) -> Option<f64> {
    let run: Vec<&LapRecord> = laps.iter().filter(|l| l.lap_number <= lap_number).collect();
    if run.len() != lap_number as usize {
        return None;
    }
    run.iter().map(|l| l.lap_time_seconds).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionAudit {
    pub pit_lap: u32,
    pub laps_compared: usize,
    pub slope: f64,
    /// Time over the compared laps had the driver stayed out, plus the stop still owed.
    pub projected_time: f64,
    pub actual_time: f64,
    pub verdict: StrategyVerdict,
}

/// Compares the stop on `pit_lap` with staying out for the configured horizon.
///
/// Staying out is projected from the last clean lap before the stop at
/// `slope` seconds per lap, and still owes `pit_loss`. The actual side is the
/// laps driven after the stop. `None` when either side cannot be measured.
pub fn audit_extension(
    driver_laps: &[LapRecord],
    pit_lap: u32,
    slope: f64,
    pit_loss: f64,
    cfg: &AnalysisConfig,
) -> Option<ExtensionAudit> {
    let base = driver_laps
        .iter()
        .rev()
        .find(|l| l.lap_number < pit_lap && l.is_clean())?;
    let base_time = base.lap_time_seconds?;

    let mut actual_time = 0.0;
    let mut projected_time = pit_loss;
    let mut compared = 0;
    for offset in 1..=cfg.extension_horizon as u32 {
        let lap_number = pit_lap + offset;
        let Some(time) = driver_laps
            .iter()
            .find(|l| l.lap_number == lap_number)
            .and_then(|l| l.lap_time_seconds)
        else {
            break;
        };
        actual_time += time;
        projected_time += base_time + slope * (lap_number - base.lap_number) as f64;
        compared += 1;
    }
    if compared == 0 {
        return None;
    }

    let delta = round_to(projected_time - actual_time, 3);
    let verdict = if delta < 0.0 {
        StrategyVerdict::new(
            VerdictKind::TooEarly,
            format!("Staying out {compared} more laps would have saved {:.2}s", -delta),
            delta,
        )
    } else {
        StrategyVerdict::new(
            VerdictKind::GoodTiming,
            format!("Stopping gained {delta:.2}s over {compared} laps against staying out"),
            delta,
        )
    };

    Some(ExtensionAudit {
        pit_lap,
        laps_compared: compared,
        slope: round_to(slope, 3),
        projected_time: round_to(projected_time, 3),
        actual_time: round_to(actual_time, 3),
        verdict,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitStopAnalysis {
    pub pit_lap: u32,
    pub condition: PitCondition,
    pub pit_loss: f64,
    pub extension: Option<ExtensionAudit>,
    pub undercut: Option<UndercutSimulation>,
    /// Why the undercut could not be simulated.
    pub undercut_note: Option<String>,
}

/// Tactical review of every stop a driver made.
pub fn run_tactical_simulation(
    session: &Session,
    driver_identifier: &str,
    rival_identifier: Option<&str>,
    cfg: &AnalysisConfig,
) -> Outcome<Vec<PitStopAnalysis>> {
    let Some(driver) = session.resolve_driver(driver_identifier) else {
        return Outcome::DriverNotFound(driver_identifier.to_string());
    };
    let driver = driver.abbreviation.clone();
    let laps = session.driver_laps(&driver);
    let stops = pit_events(laps);
    if stops.is_empty() {
        return Outcome::NoData(format!("{driver} made no pit stops"));
    }
    info!("simulating {} stops for {}", stops.len(), driver);

    let track_pit_loss = estimate_track_pit_loss(session, cfg);
    let analyses = stops
        .iter()
        .map(|stop| {
            let pit_lap = stop.pit_lap;
            let pit_loss = estimate_driver_pit_loss(laps, pit_lap, track_pit_loss, cfg);

            let window_start = pit_lap.saturating_sub(cfg.late_window_laps as u32);
            let slope = calculate_slope(
                laps.iter().filter(|l| l.lap_number >= window_start && l.lap_number < pit_lap),
                cfg,
            );
            let extension = audit_extension(laps, pit_lap, slope, track_pit_loss, cfg);

            let (undercut, undercut_note) =
                match simulate_pit_opportunity(session, &driver, pit_lap, rival_identifier, cfg) {
                    Outcome::Ready(sim) => (Some(sim), None),
                    Outcome::NoData(reason) => (None, Some(reason)),
                    Outcome::DriverNotFound(id) => (None, Some(format!("rival '{id}' not found"))),
                };

            PitStopAnalysis {
                pit_lap,
                condition: pit_condition_at(laps, pit_lap),
                pit_loss: round_to(pit_loss, 3),
                extension,
                undercut,
                undercut_note,
            }
        })
        .collect();
    Outcome::Ready(analyses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Compound;
    use crate::testutil::{self, plan};

    #[test]
    fn margin_sign_convention() {
        assert!((undercut_margin(-3.0, 0.0, 2.0) + 5.0).abs() < 1e-12);
        assert!((undercut_margin(2.5, 0.5, 2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rival_defaults_to_the_car_ahead() {
        let session = testutil::three_car_session();
        let cfg = AnalysisConfig::default();
        let sim = simulate_pit_opportunity(&session, "VER", 20, None, &cfg).ready().unwrap();
        assert_eq!(sim.rival, "NOR");
        assert_eq!(sim.reference_lap, 19);
        // 1.5s start offset plus 0.1s a lap over 19 laps
        assert!((sim.gap_to_rival - 3.4).abs() < 1e-6);
        let expected = undercut_margin(sim.gap_to_rival, sim.pit_loss_delta, cfg.undercut_gain);
        assert!((sim.net_margin - expected).abs() < 1e-3);
        assert_eq!(sim.success_probability, cfg.success_probability(sim.net_margin));
    }

    #[test]
    fn leader_has_no_one_to_undercut() {
        let session = testutil::three_car_session();
        let out = simulate_pit_opportunity(&session, "NOR", 20, None, &AnalysisConfig::default());
        assert!(matches!(out, Outcome::NoData(_)));

        // but an explicit rival behind gives a negative gap
        let sim = simulate_pit_opportunity(&session, "NOR", 20, Some("63"), &AnalysisConfig::default())
            .ready()
            .unwrap();
        assert_eq!(sim.rival, "RUS");
        assert!(sim.gap_to_rival < 0.0);
        assert_eq!(sim.verdict.verdict, VerdictKind::UndercutViable);
    }

    #[test]
    fn gap_falls_back_to_summed_lap_times() {
        let session = testutil::three_car_session();
        let laps: Vec<LapRecord> = session
            .all_laps()
            .cloned()
            .map(|mut l| {
                l.session_time = None;
                l
            })
            .collect();
        let stripped = Session::new(session.key.clone(), laps, session.roster().to_vec());
        let sim = simulate_pit_opportunity(&stripped, "VER", 20, Some("NOR"), &AnalysisConfig::default())
            .ready()
            .unwrap();
        assert!((sim.gap_to_rival - 1.9).abs() < 1e-6);
    }

    #[test]
    fn missing_reference_laps_give_no_comparison() {
        let session = testutil::three_car_session();
        let cfg = AnalysisConfig::default();
        assert!(matches!(simulate_pit_opportunity(&session, "VER", 1, None, &cfg), Outcome::NoData(_)));
        assert!(matches!(simulate_pit_opportunity(&session, "VER", 80, None, &cfg), Outcome::NoData(_)));
        assert!(matches!(
            simulate_pit_opportunity(&session, "VER", 20, Some("VER"), &cfg),
            Outcome::NoData(_)
        ));
        assert_eq!(
            simulate_pit_opportunity(&session, "VER", 20, Some("PIA"), &cfg),
            Outcome::DriverNotFound("PIA".to_string())
        );
    }

    fn one_stop(first_slope: f64) -> Vec<LapRecord> {
        testutil::race(
            "HAM",
            "44",
            &[plan(Compound::Medium, 15, 90.0, first_slope), plan(Compound::Hard, 10, 93.0, 0.0)],
            5.0,
            17.0,
            0.0,
        )
    }

    #[test]
    fn extension_flags_an_early_stop() {
        let cfg = AnalysisConfig::default();
        // 5 laps at 90.0 plus a 10s stop against 110 + 4 * 93
        let audit = audit_extension(&one_stop(0.0), 15, 0.0, 10.0, &cfg).unwrap();
        assert_eq!(audit.laps_compared, 5);
        assert!((audit.projected_time - 460.0).abs() < 1e-6);
        assert!((audit.actual_time - 482.0).abs() < 1e-6);
        assert_eq!(audit.verdict.verdict, VerdictKind::TooEarly);
    }

    #[test]
    fn extension_backs_a_stop_on_worn_tyres() {
        let cfg = AnalysisConfig::default();
        let laps = one_stop(0.3);
        // last clean lap before the stop is lap 14 at 93.9s
        let audit = audit_extension(&laps, 15, 0.33, 22.0, &cfg).unwrap();
        assert_eq!(audit.verdict.verdict, VerdictKind::GoodTiming);
        assert!(audit.verdict.delta > 0.0);
    }

    #[test]
    fn extension_needs_laps_after_the_stop() {
        let cfg = AnalysisConfig::default();
        let laps = one_stop(0.0);
        assert!(audit_extension(&laps, 25, 0.1, 22.0, &cfg).is_none());
        assert!(audit_extension(&laps, 1, 0.1, 22.0, &cfg).is_none());
        let short = audit_extension(&laps, 22, 0.1, 22.0, &cfg).unwrap();
        assert_eq!(short.laps_compared, 3);
    }

    #[test]
    fn tactical_report_covers_each_stop() {
        let session = testutil::three_car_session();
        let cfg = AnalysisConfig::default();
        let report = run_tactical_simulation(&session, "Verstappen", None, &cfg).ready().unwrap();
        assert_eq!(report.len(), 1);
        let stop = &report[0];
        assert_eq!(stop.pit_lap, 20);
        assert_eq!(stop.condition, PitCondition::Green);
        assert!(stop.extension.is_some());
        assert_eq!(stop.undercut.as_ref().map(|u| u.rival.as_str()), Some("NOR"));

        let leader = run_tactical_simulation(&session, "NOR", None, &cfg).ready().unwrap();
        assert!(leader[0].undercut.is_none());
        assert!(leader[0].undercut_note.is_some());
    }

    #[test]
    fn no_stops_is_no_data() {
        let laps: Vec<LapRecord> = (1..=10)
            .map(|n| LapRecord::new("ALO", n, 91.0, Compound::Hard, 1).with_number("14"))
            .collect();
        let session = Session::new(testutil::key(), laps, Vec::new());
        let cfg = AnalysisConfig::default();
        assert!(matches!(run_tactical_simulation(&session, "ALO", None, &cfg), Outcome::NoData(_)));
        assert!(matches!(run_tactical_simulation(&session, "ZZZ", None, &cfg), Outcome::DriverNotFound(_)));
    }
}
