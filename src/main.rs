use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

use pitwall::audit::{audit_race_strategy, StintReportRow};
use pitwall::degradation::{tire_degradation_table, DegradationRow};
use pitwall::sectors::{analyze_sector_dominance, SectorDominance};
use pitwall::session::{load_session, Session, StandingRow};
use pitwall::stint::{compound_summary, CompoundSummaryRow};
use pitwall::tactics::{run_tactical_simulation, simulate_pit_opportunity, PitStopAnalysis, UndercutSimulation};
use pitwall::{logging, track_baseline, AnalysisConfig, CsvProvider, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    Audit,
    Degradation,
    Tactics,
    Sectors,
    Standings,
    Compounds,
}

#[derive(Parser, Debug)]
#[command(name = "pitwall")]
#[command(version, about = "Race-strategy audits from FastF1 lap exports", long_about = None)]
struct Args {
    /// Directory holding one sub-directory per session
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[arg(short, long)]
    year: i32,

    /// Canonical event keyword, e.g. "Las_Vegas" or "Mexico"
    #[arg(short, long)]
    circuit: String,

    /// Session type used by the degradation, standings and compound reports
    #[arg(short, long, default_value = "R")]
    session: String,

    /// Car number, abbreviation or last name; repeat for several drivers
    #[arg(short, long)]
    driver: Vec<String>,

    /// Rival for the undercut simulation (default: the car ahead)
    #[arg(long)]
    rival: Option<String>,

    /// Simulate an undercut on this lap only (tactics report)
    #[arg(long)]
    pit_lap: Option<u32>,

    /// Mini-sector count for the sectors report
    #[arg(long)]
    chunks: Option<usize>,

    /// TOML file overriding analysis thresholds
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Report::Audit)]
    report: Report,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    // Thresholds come from the config file when one is given.
    let cfg = match &args.config {
        Some(path) => AnalysisConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    let provider = CsvProvider::new(&args.data_dir);

    match args.report {
        Report::Audit => {
            let driver = first_driver(&args)?;
            let outcome = audit_race_strategy(&provider, args.year, &args.circuit, driver, &cfg)?;
            emit(outcome, args.json, |rows| print_audit(rows))
        }
        Report::Sectors => {
            let outcome =
                analyze_sector_dominance(&provider, args.year, &args.circuit, &args.driver, args.chunks, &cfg)?;
            emit(outcome, args.json, print_sectors)
        }
        Report::Tactics => {
            let driver = first_driver(&args)?;
            let session = match load_session(&provider, args.year, &args.circuit, "R")? {
                Outcome::Ready(session) => session,
                other => return emit(other.map(|_| ()), args.json, |_| {}),
            };
            match args.pit_lap {
                Some(lap) => {
                    let outcome = simulate_pit_opportunity(&session, driver, lap, args.rival.as_deref(), &cfg);
                    emit(outcome, args.json, print_undercut)
                }
                None => {
                    let outcome = run_tactical_simulation(&session, driver, args.rival.as_deref(), &cfg);
                    emit(outcome, args.json, |stops| print_tactics(stops))
                }
            }
        }
        Report::Degradation | Report::Standings | Report::Compounds => {
            let session = match load_session(&provider, args.year, &args.circuit, &args.session)? {
                Outcome::Ready(session) => session,
                other => return emit(other.map(|_| ()), args.json, |_| {}),
            };
            session_report(&session, &args, &cfg)
        }
    }
}

fn session_report(session: &Session, args: &Args, cfg: &AnalysisConfig) -> Result<()> {
    match args.report {
        Report::Degradation => emit(tire_degradation_table(session, &args.driver, cfg), args.json, |rows| print_degradation(rows)),
        Report::Standings => emit(session.standings(args.driver.first().map(String::as_str)), args.json, |rows| print_standings(rows)),
        _ => {
            let baseline = track_baseline(session, cfg);
            if !args.json {
                println!(
                    "Track baseline: median clean lap {}, pit loss {:.2}s ({} samples{})",
                    baseline.median_clean_lap.map_or("n/a".to_string(), |t| format!("{t:.3}s")),
                    baseline.pit_loss,
                    baseline.samples,
                    if baseline.fallback { ", fallback" } else { "" }
                );
            }
            emit(compound_summary(session, cfg), args.json, |rows| print_compounds(rows))
        }
    }
}

fn first_driver(args: &Args) -> Result<&str> {
    match args.driver.first() {
        Some(driver) => Ok(driver.as_str()),
        None => bail!("the {:?} report needs --driver", args.report),
    }
}

/// Prints a finished analysis. "No data" and "not found" are answers, not failures.
fn emit<T: Serialize>(outcome: Outcome<T>, json: bool, text: impl FnOnce(&T)) -> Result<()> {
    match (outcome, json) {
        (Outcome::Ready(value), true) => println!("{}", serde_json::to_string_pretty(&value)?),
        (Outcome::Ready(value), false) => text(&value),
        (Outcome::NoData(reason), true) => {
            println!("{}", serde_json::json!({ "status": "no_data", "reason": reason }))
        }
        (Outcome::NoData(reason), false) => println!("No data: {reason}"),
        (Outcome::DriverNotFound(id), true) => {
            println!("{}", serde_json::json!({ "status": "driver_not_found", "driver": id }))
        }
        (Outcome::DriverNotFound(id), false) => println!("Driver '{id}' not found in this session"),
    }
    Ok(())
}

fn opt(value: Option<f64>, decimals: usize) -> String {
    value.map_or("-".to_string(), |v| format!("{v:.decimals$}"))
}

fn print_audit(rows: &[StintReportRow]) {
    println!(
        "{:<3} {:<12} {:<9} {:>4} {:<20} {:>9} {:>7} {:>8} {:<9}",
        "#", "Compound", "Laps", "N", "Type", "Pace", "Deg", "Traffic", "Pit"
    );
    for row in rows {
        println!(
            "{:<3} {:<12} {:<9} {:>4} {:<20} {:>9} {:>7.3} {:>8} {:<9}",
            row.stint,
            row.compound,
            format!("L{}-L{}", row.start_lap, row.end_lap),
            row.laps,
            row.stint_type.label(),
            opt(row.clean_pace, 3),
            row.degradation,
            row.traffic_share.map_or("-".to_string(), |s| format!("{:.0}%", s * 100.0)),
            row.pit_condition.map_or("-".to_string(), |c| c.to_string()),
        );
    }
    println!();
    for row in rows {
        println!("Stint {}: {}", row.stint, row.insight);
    }
}

fn print_degradation(rows: &[DegradationRow]) {
    println!(
        "{:<6} {:>5} {:<12} {:>5} {:<9} {:>9} {:>9}",
        "Driver", "Stint", "Compound", "Laps", "Range", "Raw", "True"
    );
    for row in rows {
        println!(
            "{:<6} {:>5} {:<12} {:>5} {:<9} {:>9.4} {:>9.4}",
            row.driver,
            row.stint,
            row.compound,
            row.laps_run,
            format!("L{}-L{}", row.start_lap, row.end_lap),
            row.raw_slope,
            row.true_degradation
        );
    }
}

fn print_undercut(sim: &UndercutSimulation) {
    println!("{} vs {} (stop on lap {}, gap taken on lap {})", sim.driver, sim.rival, sim.pit_lap, sim.reference_lap);
    println!("- Gap to rival:      {:+.3}s", sim.gap_to_rival);
    println!("- Pit loss delta:    {:+.3}s ({:.3}s vs track {:.3}s)", sim.pit_loss_delta, sim.pit_loss, sim.track_pit_loss);
    println!("- Undercut gain:     -{:.3}s", sim.undercut_gain_estimate);
    println!("- Net margin:        {:+.3}s", sim.net_margin);
    println!("- Success (heuristic): {:.0}%", sim.success_probability * 100.0);
    println!("{}: {}", sim.verdict.verdict, sim.verdict.rationale);
}

fn print_tactics(stops: &[PitStopAnalysis]) {
    for stop in stops {
        println!("[Pit stop @ lap {}] {} conditions, loss {:.3}s", stop.pit_lap, stop.condition, stop.pit_loss);
        match &stop.extension {
            Some(ext) => println!(
                "  Extension: {} ({}; projected {:.3}s vs actual {:.3}s)",
                ext.verdict.verdict, ext.verdict.rationale, ext.projected_time, ext.actual_time
            ),
            None => println!("  Extension: not enough laps to compare"),
        }
        match (&stop.undercut, &stop.undercut_note) {
            (Some(sim), _) => println!(
                "  Undercut on {}: {} (margin {:+.3}s, {:.0}%)",
                sim.rival,
                sim.verdict.verdict,
                sim.net_margin,
                sim.success_probability * 100.0
            ),
            (None, Some(note)) => println!("  Undercut: {note}"),
            (None, None) => println!("  Undercut: no comparison possible"),
        }
    }
}

fn print_sectors(result: &SectorDominance) {
    println!(
        "{} mini-sectors over {:.0} m (reference lap: {})",
        result.chunk_count, result.track_length_m, result.reference_driver
    );
    for share in &result.summary {
        println!("- {}: {:.1}% ({} sectors)", share.driver, share.share_pct, share.chunks);
    }
    if !result.excluded.is_empty() {
        println!("Excluded (no telemetry): {}", result.excluded.join(", "));
    }
}

fn print_standings(rows: &[StandingRow]) {
    for row in rows {
        println!(
            "{:>3} {:<4} {:<24} grid {:>3} {:>6} pts  {}",
            row.position.map_or("-".to_string(), |p| p.to_string()),
            row.driver,
            row.team,
            row.grid_position.map_or("-".to_string(), |g| g.to_string()),
            row.points,
            row.status
        );
    }
}

fn print_compounds(rows: &[CompoundSummaryRow]) {
    for row in rows {
        println!(
            "{:<12} {:>3} stints, mean {:>5.1} laps, max {:>3}, deg {}",
            row.compound,
            row.stints,
            row.mean_length,
            row.max_length,
            opt(row.mean_degradation, 4)
        );
    }
}
