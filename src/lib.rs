//! Race-strategy audits over lap telemetry.
//!
//! A [`Session`] is fetched through a [`TelemetryProvider`] and analysed by
//! plain functions that take an explicit [`AnalysisConfig`]. Missing data is
//! an [`Outcome`], never an error.

pub mod audit;
pub mod config;
pub mod data;
pub mod degradation;
pub mod errors;
pub mod logging;
pub mod pit_loss;
pub mod sectors;
pub mod session;
pub mod stint;
pub mod tactics;
pub mod verdict;

#[cfg(test)]
mod testutil;

pub use audit::{audit_race_strategy, audit_session, StintReportRow};
pub use config::{AnalysisConfig, RegressionAxis};
pub use data::{Compound, CsvProvider, DriverInfo, LapRecord, SpeedSample, TrackFlag, TrackStatus};
pub use degradation::{calculate_slope, fit_degradation, tire_degradation_table, DegradationFit};
pub use errors::{AnalysisError, Outcome, ProviderError};
pub use pit_loss::{estimate_driver_pit_loss, estimate_track_pit_loss, track_baseline, PitEvent, TrackBaseline};
pub use sectors::{analyze_sector_dominance, sector_dominance, SectorDominance};
pub use session::{load_session, InMemoryProvider, Session, SessionKey, TelemetryProvider};
pub use stint::{build_stints, classify_stint, compound_summary, FieldStintStats, Stint, StintType};
pub use tactics::{audit_extension, run_tactical_simulation, simulate_pit_opportunity, undercut_margin};
pub use verdict::{PitCondition, StrategyVerdict, VerdictKind};
