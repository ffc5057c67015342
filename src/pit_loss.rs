use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AnalysisConfig;
use crate::data::{mean, median, round_to, LapRecord, TrackFlag, TrackStatus};
use crate::session::Session;

/// A transition between two stints of one driver.
#[derive(Debug, Clone, PartialEq)]
pub struct PitEvent {
    pub driver: String,
    /// The in-lap.
    pub pit_lap: u32,
    pub in_lap_time: Option<f64>,
    pub out_lap_time: Option<f64>,
    /// Flags seen on the in-lap and the out-lap.
    pub track_status: TrackStatus,
}

impl PitEvent {
    /// `(in + out) - 2 * reference`, when both laps are timed.
    pub fn observed_loss(&self, reference_lap: f64) -> Option<f64> {
        match (self.in_lap_time, self.out_lap_time) {
            (Some(in_lap), Some(out_lap)) => Some(in_lap + out_lap - 2.0 * reference_lap),
            _ => None,
        }
    }
}

/// Tyre stops of one driver, from their ordered laps. An in-lap with no
/// following lap (retirement in the pit lane) is not a stop, nor is a pass
/// through the pit lane that keeps the same stint.
pub fn pit_events(driver_laps: &[LapRecord]) -> Vec<PitEvent> {
    driver_laps
        .windows(2)
        .filter(|pair| pair[1].lap_number == pair[0].lap_number + 1)
        .filter(|pair| pair[1].opens_stint_after(&pair[0]))
        .map(|pair| PitEvent {
            driver: pair[0].driver.clone(),
            pit_lap: pair[0].lap_number,
            in_lap_time: pair[0].lap_time_seconds,
            out_lap_time: pair[1].lap_time_seconds,
            track_status: pair[0].track_status.union(pair[1].track_status),
        })
        .collect()
}

/// Track-wide reference values for one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackBaseline {
    pub median_clean_lap: Option<f64>,
    /// Mean green-flag pit loss, or the configured fallback.
    pub pit_loss: f64,
    pub samples: usize,
    pub rejected: usize,
    pub fallback: bool,
}

pub fn track_baseline(session: &Session, cfg: &AnalysisConfig) -> TrackBaseline {
    let median_clean_lap = session.median_clean_lap();
    let Some(reference) = median_clean_lap else {
        warn!("no clean laps in {} {}, using fallback pit loss", session.key.year, session.key.circuit);
        return TrackBaseline {
            median_clean_lap,
            pit_loss: cfg.pit_loss_fallback,
            samples: 0,
            rejected: 0,
            fallback: true,
        };
    };

    let mut samples = Vec::new();
    let mut rejected = 0;
    for driver in session.drivers() {
        for event in pit_events(session.driver_laps(driver)) {
            // a yellow only slows one sector, the stop still costs the full
            // pit lane; SC, VSC and red bunch the field and would flatter it
            if event.track_status.is_caution() || event.track_status.contains(TrackFlag::Red) {
                continue;
            }
            let Some(loss) = event.observed_loss(reference) else {
                continue;
            };
            if cfg.pit_loss_plausible(loss) {
                samples.push(loss);
            } else {
                debug!("discarding pit loss {:.2}s for {} on lap {}", loss, driver, event.pit_lap);
                rejected += 1;
            }
        }
    }

    match mean(&samples) {
        Some(avg) => TrackBaseline {
            median_clean_lap,
            pit_loss: round_to(avg, 3),
            samples: samples.len(),
            rejected,
            fallback: false,
        },
        None => {
            warn!(
                "no usable pit-loss samples in {} {}, using fallback {:.1}s",
                session.key.year, session.key.circuit, cfg.pit_loss_fallback
            );
            TrackBaseline {
                median_clean_lap,
                pit_loss: cfg.pit_loss_fallback,
                samples: 0,
                rejected,
                fallback: true,
            }
        }
    }
}

/// Average green-flag pit loss for the session, in seconds.
pub fn estimate_track_pit_loss(session: &Session, cfg: &AnalysisConfig) -> f64 {
    track_baseline(session, cfg).pit_loss
}

/// Pit loss of one stop, measured against the driver's own median clean lap.
/// Missing laps, missing times or an implausible value give `fallback_seconds`.
pub fn estimate_driver_pit_loss(driver_laps: &[LapRecord], pit_lap: u32, fallback_seconds: f64, cfg: &AnalysisConfig) -> f64 {
    let clean: Vec<f64> = driver_laps
        .iter()
        .filter(|l| l.is_clean())
        .filter_map(|l| l.lap_time_seconds)
        .collect();
    let Some(reference) = median(&clean) else {
        return fallback_seconds;
    };

    let lap_time = |n: u32| {
        driver_laps
            .iter()
            .find(|l| l.lap_number == n)
            .and_then(|l| l.lap_time_seconds)
    };
    let (Some(in_lap), Some(out_lap)) = (lap_time(pit_lap), lap_time(pit_lap + 1)) else {
        return fallback_seconds;
    };

    let loss = in_lap + out_lap - 2.0 * reference;
    if cfg.pit_loss_plausible(loss) {
        round_to(loss, 3)
    } else {
        debug!("implausible pit loss {:.2}s on lap {}, using fallback", loss, pit_lap);
        fallback_seconds
    }
}
