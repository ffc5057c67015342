use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{AnalysisConfig, RegressionAxis};
use crate::data::{round_to, Compound, LapRecord};
use crate::errors::Outcome;
use crate::session::Session;
use crate::stint::build_stints;

/// Result of a degradation regression over one run of laps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DegradationFit {
    /// Seconds per lap straight from the regression.
    pub raw_slope: f64,
    /// Raw slope plus the fuel-burn correction; the neutral slope when no fit was possible.
    pub corrected_slope: f64,
    pub samples: usize,
    pub fitted: bool,
}

/// Fits lap time against lap number (or tyre age) over the clean laps given.
/// Fewer than `min_regression_laps` clean laps, or a degenerate design,
/// yields the neutral slope instead of an error.
pub fn fit_degradation<'a, I>(laps: I, cfg: &AnalysisConfig) -> DegradationFit
where
    I: IntoIterator<Item = &'a LapRecord>,
{
    let points: Vec<(f64, f64)> = laps
        .into_iter()
        .filter(|l| l.is_clean())
        .filter_map(|l| {
            let x = match cfg.regression_axis {
                RegressionAxis::LapNumber => l.lap_number as f64,
                RegressionAxis::TyreAge => l.tyre_age as f64,
            };
            l.lap_time_seconds.map(|y| (x, y))
        })
        .collect();

    let neutral = DegradationFit {
        raw_slope: cfg.neutral_slope - cfg.fuel_correction,
        corrected_slope: cfg.neutral_slope,
        samples: points.len(),
        fitted: false,
    };
    if points.len() < cfg.min_regression_laps {
        return neutral;
    }

    match regression_slope(&points) {
        Some(slope) => DegradationFit {
            raw_slope: slope,
            corrected_slope: slope + cfg.fuel_correction,
            samples: points.len(),
            fitted: true,
        },
        None => {
            debug!("degenerate regression over {} laps, using neutral slope", points.len());
            neutral
        }
    }
}

/// Fuel-corrected degradation in seconds per lap.
pub fn calculate_slope<'a, I>(laps: I, cfg: &AnalysisConfig) -> f64
where
    I: IntoIterator<Item = &'a LapRecord>,
{
    fit_degradation(laps, cfg).corrected_slope
}

fn regression_slope(points: &[(f64, f64)]) -> Option<f64> {
    let first_x = points.first()?.0;
    if points.iter().all(|(x, _)| (x - first_x).abs() < f64::EPSILON) {
        return None;
    }

    let x = Array2::from_shape_vec((points.len(), 1), points.iter().map(|p| p.0).collect()).ok()?;
    let y = Array1::from_vec(points.iter().map(|p| p.1).collect());
    let ds = Dataset::new(x, y);

    let model = LinearRegression::new().fit(&ds).ok()?;
    let slope = *model.params().get(0)?;
    slope.is_finite().then_some(slope)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationRow {
    pub driver: String,
    pub stint: usize,
    pub compound: Compound,
    pub laps_run: usize,
    pub start_lap: u32,
    pub end_lap: u32,
    pub raw_slope: f64,
    pub true_degradation: f64,
}

/// Per-stint degradation for the given drivers, or the top ten finishers
/// when `drivers` is empty. Unknown identifiers are skipped.
pub fn tire_degradation_table(session: &Session, drivers: &[String], cfg: &AnalysisConfig) -> Outcome<Vec<DegradationRow>> {
    let selected: Vec<String> = if drivers.is_empty() {
        session.classified_drivers(10)
    } else {
        drivers
            .iter()
            .filter_map(|id| match session.resolve_driver(id) {
                Some(info) => Some(info.abbreviation.clone()),
                None => {
                    warn!("skipping unknown driver '{}'", id);
                    None
                }
            })
            .collect()
    };

    let mut rows = Vec::new();
    for driver in &selected {
        for stint in build_stints(session.driver_laps(driver)) {
            let fit = fit_degradation(&stint.laps, cfg);
            rows.push(DegradationRow {
                driver: driver.clone(),
                stint: stint.index,
                compound: stint.compound,
                laps_run: stint.lap_count(),
                start_lap: stint.start_lap,
                end_lap: stint.end_lap,
                raw_slope: round_to(fit.raw_slope, 4),
                true_degradation: round_to(fit.corrected_slope, 4),
            });
        }
    }

    if rows.is_empty() {
        Outcome::NoData(format!("no stints for {} {}", session.key.year, session.key.circuit))
    } else {
        Outcome::Ready(rows)
    }
}
