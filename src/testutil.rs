//! Synthetic sessions shared by the unit tests.

use crate::data::{Compound, DriverInfo, LapRecord, TrackStatus};
use crate::session::{Session, SessionKey};

pub(crate) struct StintPlan {
    pub compound: Compound,
    pub laps: u32,
    pub base: f64,
    pub slope: f64,
}

pub(crate) fn plan(compound: Compound, laps: u32, base: f64, slope: f64) -> StintPlan {
    StintPlan { compound, laps, base, slope }
}

/// Builds a full race for one driver. The last lap of every stint but the
/// final one is an in-lap costing `in_extra` seconds, the next lap an out-lap
/// costing `out_extra`. Session clock starts at `start`.
pub(crate) fn race(
    driver: &str,
    number: &str,
    stints: &[StintPlan],
    in_extra: f64,
    out_extra: f64,
    start: f64,
) -> Vec<LapRecord> {
    let mut laps = Vec::new();
    let mut lap_number = 0;
    let mut clock = start;

    for (idx, stint) in stints.iter().enumerate() {
        let is_last_stint = idx + 1 == stints.len();
        for age in 1..=stint.laps {
            lap_number += 1;
            let mut time = stint.base + stint.slope * (age - 1) as f64;
            let in_lap = !is_last_stint && age == stint.laps;
            let out_lap = idx > 0 && age == 1;
            if in_lap {
                time += in_extra;
            }
            if out_lap {
                time += out_extra;
            }
            clock += time;

            let mut lap = LapRecord::new(driver, lap_number, time, stint.compound, idx as u32 + 1)
                .with_number(number)
                .with_tyre_age(age)
                .with_session_time(clock);
            if in_lap {
                lap = lap.with_pit_in(clock - 1.0).inaccurate();
            }
            if out_lap {
                lap = lap.with_pit_out(clock - time + 20.0).inaccurate();
            }
            laps.push(lap);
        }
    }
    laps
}

pub(crate) fn set_status(laps: &mut [LapRecord], lap_number: u32, status: TrackStatus) {
    if let Some(lap) = laps.iter_mut().find(|l| l.lap_number == lap_number) {
        lap.track_status = status;
    }
}

pub(crate) fn key() -> SessionKey {
    SessionKey::new(2025, "Las Vegas", "R")
}

/// Three-car race: NOR leads VER who leads RUS. Every car stops once after
/// 20 laps (M → H) in a 35-lap race; positions follow the session clock.
pub(crate) fn three_car_session() -> Session {
    let mut laps = Vec::new();
    laps.extend(race(
        "NOR",
        "4",
        &[plan(Compound::Medium, 20, 94.0, 0.08), plan(Compound::Hard, 15, 94.5, 0.04)],
        5.0,
        17.0,
        0.0,
    ));
    laps.extend(race(
        "VER",
        "1",
        &[plan(Compound::Medium, 20, 94.1, 0.08), plan(Compound::Hard, 15, 94.4, 0.04)],
        5.0,
        16.0,
        1.5,
    ));
    laps.extend(race(
        "RUS",
        "63",
        &[plan(Compound::Medium, 20, 94.3, 0.10), plan(Compound::Hard, 15, 94.6, 0.05)],
        5.0,
        17.0,
        4.0,
    ));
    assign_positions(&mut laps);

    let roster = vec![
        DriverInfo::new("4", "NOR", "Lando Norris").with_team("McLaren").with_position(1),
        DriverInfo::new("1", "VER", "Max Verstappen").with_team("Red Bull Racing").with_position(2),
        DriverInfo::new("63", "RUS", "George Russell").with_team("Mercedes").with_position(3),
    ];
    Session::new(key(), laps, roster)
}

/// Sets every lap's position from the order of session clocks on that lap.
pub(crate) fn assign_positions(laps: &mut [LapRecord]) {
    let max_lap = laps.iter().map(|l| l.lap_number).max().unwrap_or(0);
    for lap_number in 1..=max_lap {
        let mut order: Vec<(usize, f64)> = laps
            .iter()
            .enumerate()
            .filter(|(_, l)| l.lap_number == lap_number)
            .map(|(i, l)| (i, l.session_time.unwrap_or(f64::MAX)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));
        for (pos, (idx, _)) in order.into_iter().enumerate() {
            laps[idx].position = Some(pos as u32 + 1);
        }
    }
}
