use ndarray::{s, Array2, Axis};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::data::{round_to, SpeedSample};
use crate::errors::{Outcome, Result};
use crate::session::{load_session, Session, TelemetryProvider};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkLeader {
    pub chunk: usize,
    pub start_m: f64,
    pub end_m: f64,
    pub leader: String,
    pub mean_speed_kph: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DominanceShare {
    pub driver: String,
    pub chunks: usize,
    pub share_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorDominance {
    pub chunk_count: usize,
    /// Driver whose fastest lap defines the distance axis.
    pub reference_driver: String,
    pub track_length_m: f64,
    pub chunks: Vec<ChunkLeader>,
    /// Drivers leading at least one chunk, by share.
    pub summary: Vec<DominanceShare>,
    /// Requested drivers without usable fastest-lap telemetry.
    pub excluded: Vec<String>,
}

/// Loads the race and runs [`sector_dominance`] on it.
pub fn analyze_sector_dominance<P: TelemetryProvider + ?Sized>(
    provider: &P,
    year: i32,
    circuit: &str,
    drivers: &[String],
    chunk_count: Option<usize>,
    cfg: &AnalysisConfig,
) -> Result<Outcome<SectorDominance>> {
    info!("mini-sector dominance for {} {}", year, circuit);
    let session = match load_session(provider, year, circuit, "R")? {
        Outcome::Ready(session) => session,
        Outcome::NoData(reason) => return Ok(Outcome::NoData(reason)),
        Outcome::DriverNotFound(id) => return Ok(Outcome::DriverNotFound(id)),
    };
    Ok(sector_dominance(&session, drivers, chunk_count, cfg))
}

/// Splits the lap into equal-length chunks and names the fastest driver in each.
///
/// Every driver's fastest-lap trace is interpolated onto one common distance
/// grid taken from the quickest lap among them; a chunk goes to the highest
/// mean speed, ties to the driver listed first. An empty `drivers` list means
/// the top three of the classification.
pub fn sector_dominance(
    session: &Session,
    drivers: &[String],
    chunk_count: Option<usize>,
    cfg: &AnalysisConfig,
) -> Outcome<SectorDominance> {
    let chunk_count = chunk_count.unwrap_or(cfg.sector_chunks);
    if chunk_count == 0 {
        return Outcome::NoData("at least one mini-sector is required".to_string());
    }
    let requested: Vec<String> = if drivers.is_empty() {
        session.classified_drivers(3)
    } else {
        drivers.to_vec()
    };

    let mut included: Vec<(String, &[SpeedSample])> = Vec::new();
    let mut excluded = Vec::new();
    for id in &requested {
        let Some(info) = session.resolve_driver(id) else {
            warn!("excluding unknown driver '{}'", id);
            excluded.push(id.clone());
            continue;
        };
        let abbreviation = info.abbreviation.clone();
        if included.iter().any(|(d, _)| *d == abbreviation) {
            continue;
        }
        match session.fastest_lap_trace(&abbreviation) {
            Some(trace) if usable(trace) => included.push((abbreviation, trace)),
            _ => {
                warn!("excluding {}: no fastest-lap telemetry", abbreviation);
                excluded.push(abbreviation);
            }
        }
    }
    if included.is_empty() {
        return Outcome::NoData(format!(
            "no fastest-lap telemetry for {} in {} {}",
            requested.join(", "),
            session.key.year,
            session.key.circuit
        ));
    }

    // the quickest of the compared laps defines the axis
    let reference = included
        .iter()
        .enumerate()
        .filter_map(|(idx, (d, _))| session.fastest_lap(d)?.lap_time_seconds.map(|t| (idx, t)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(idx, _)| idx);
    let (reference_driver, reference_trace) = &included[reference];
    let start = reference_trace[0].distance_m;
    let end = reference_trace[reference_trace.len() - 1].distance_m;
    let length = end - start;

    let per_chunk = cfg.samples_per_chunk.max(1);
    let points = chunk_count * per_chunk;
    let step = length / points as f64;
    let grid: Vec<f64> = (0..points).map(|i| start + (i as f64 + 0.5) * step).collect();

    let mut speeds = Array2::<f64>::zeros((included.len(), points));
    for (row, (_, trace)) in included.iter().enumerate() {
        for (col, distance) in grid.iter().enumerate() {
            speeds[[row, col]] = interpolate(trace, *distance);
        }
    }

    let mut chunks = Vec::with_capacity(chunk_count);
    let mut wins = vec![0usize; included.len()];
    for chunk in 0..chunk_count {
        let window = speeds.slice(s![.., chunk * per_chunk..(chunk + 1) * per_chunk]);
        let Some(means) = window.mean_axis(Axis(1)) else {
            continue;
        };
        let mut best = 0;
        for (idx, speed) in means.iter().enumerate() {
            if *speed > means[best] {
                best = idx;
            }
        }
        wins[best] += 1;
        chunks.push(ChunkLeader {
            chunk: chunk + 1,
            start_m: round_to(start + chunk as f64 * per_chunk as f64 * step, 1),
            end_m: round_to(start + (chunk + 1) as f64 * per_chunk as f64 * step, 1),
            leader: included[best].0.clone(),
            mean_speed_kph: round_to(means[best], 2),
        });
    }

    let mut summary: Vec<DominanceShare> = included
        .iter()
        .zip(&wins)
        .filter(|(_, n)| **n > 0)
        .map(|((driver, _), n)| DominanceShare {
            driver: driver.clone(),
            chunks: *n,
            share_pct: round_to(*n as f64 * 100.0 / chunk_count as f64, 1),
        })
        .collect();
    summary.sort_by(|a, b| b.chunks.cmp(&a.chunks));

    debug!("{} chunks over {:.0} m, reference {}", chunk_count, length, reference_driver);
    Outcome::Ready(SectorDominance {
        chunk_count,
        reference_driver: reference_driver.clone(),
        track_length_m: round_to(length, 1),
        chunks,
        summary,
        excluded,
    })
}

fn usable(trace: &[SpeedSample]) -> bool {
    trace.len() >= 2 && trace[trace.len() - 1].distance_m > trace[0].distance_m
}

/// Linear interpolation of speed at `distance`, clamped at the trace ends.
fn interpolate(trace: &[SpeedSample], distance: f64) -> f64 {
    let idx = trace.partition_point(|p| p.distance_m < distance);
    if idx == 0 {
        return trace[0].speed_kph;
    }
    if idx >= trace.len() {
        return trace[trace.len() - 1].speed_kph;
    }
    let (a, b) = (trace[idx - 1], trace[idx]);
    let span = b.distance_m - a.distance_m;
    if span <= 0.0 {
        return b.speed_kph;
    }
    a.speed_kph + (b.speed_kph - a.speed_kph) * (distance - a.distance_m) / span
}
