use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::errors::{AnalysisError, Result};

/// Independent variable used by the degradation regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionAxis {
    LapNumber,
    TyreAge,
}

/// A margin band of the undercut classifier: margins strictly below `below`
/// map to `probability`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityBand {
    pub below: f64,
    pub probability: f64,
}

/// Tuning constants for every analysis. These are empirical defaults, not
/// physical constants, so each one can be overridden from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    // degradation
    pub fuel_correction: f64,
    pub neutral_slope: f64,
    pub min_regression_laps: usize,
    pub regression_axis: RegressionAxis,

    // pit loss
    pub pit_loss_fallback: f64,
    pub pit_loss_min: f64,
    pub pit_loss_max: f64,

    // auditor
    pub late_window_laps: usize,
    pub high_deg_threshold: f64,
    pub good_pace_threshold: f64,
    pub traffic_gap: f64,
    pub traffic_share_threshold: f64,

    // stint classifier, as fractions of the field's max / mean stint length
    pub extreme_ratio: f64,
    pub long_run_ratio: f64,
    pub short_sprint_ratio: f64,

    // tactical simulator
    pub undercut_gain: f64,
    pub extension_horizon: usize,
    pub probability_bands: Vec<ProbabilityBand>,
    pub fallback_probability: f64,

    // mini sectors
    pub sector_chunks: usize,
    pub samples_per_chunk: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fuel_correction: 0.03,
            neutral_slope: 0.03,
            min_regression_laps: 3,
            regression_axis: RegressionAxis::LapNumber,
            pit_loss_fallback: 22.0,
            pit_loss_min: 10.0,
            pit_loss_max: 40.0,
            late_window_laps: 5,
            high_deg_threshold: 0.15,
            good_pace_threshold: 0.05,
            traffic_gap: 1.0,
            traffic_share_threshold: 0.40,
            extreme_ratio: 0.95,
            long_run_ratio: 1.30,
            short_sprint_ratio: 0.60,
            undercut_gain: 2.0,
            extension_horizon: 5,
            probability_bands: vec![
                ProbabilityBand { below: -1.0, probability: 0.95 },
                ProbabilityBand { below: 0.0, probability: 0.60 },
                ProbabilityBand { below: 1.0, probability: 0.30 },
            ],
            fallback_probability: 0.05,
            sector_chunks: 25,
            samples_per_chunk: 20,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(contents)
            .map_err(|e| AnalysisError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            AnalysisError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pit_loss_min >= self.pit_loss_max {
            return Err(AnalysisError::Config(format!(
                "pit_loss_min ({}) must be below pit_loss_max ({})",
                self.pit_loss_min, self.pit_loss_max
            )));
        }
        if self.min_regression_laps < 2 {
            return Err(AnalysisError::Config(
                "min_regression_laps must be at least 2".to_string(),
            ));
        }
        if self.sector_chunks == 0 || self.samples_per_chunk == 0 {
            return Err(AnalysisError::Config(
                "sector_chunks and samples_per_chunk must be positive".to_string(),
            ));
        }
        if self
            .probability_bands
            .windows(2)
            .any(|w| w[0].below >= w[1].below)
        {
            return Err(AnalysisError::Config(
                "probability_bands must be sorted by ascending margin".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a pit-loss sample is inside the plausible band.
    pub fn pit_loss_plausible(&self, loss: f64) -> bool {
        loss.is_finite() && loss >= self.pit_loss_min && loss <= self.pit_loss_max
    }

    /// Heuristic success probability for an undercut margin (seconds).
    pub fn success_probability(&self, margin: f64) -> f64 {
        self.probability_bands
            .iter()
            .find(|band| margin < band.below)
            .map_or(self.fallback_probability, |band| band.probability)
    }
}
