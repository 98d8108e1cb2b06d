/// Utility helpers shared by all collectors.
///
/// This module contains:
/// - Time helpers
/// - Measurement name normalization
///
/// IMPORTANT:
/// - No collector-specific business logic should live here.
/// - This module must remain lightweight and deterministic.
///

use chrono::{Local, LocalResult, NaiveDateTime, TimeDelta, TimeZone};

/// Returns the current Unix timestamp in seconds.
///
/// Readings published on the bus carry second resolution.
pub fn now_secs() -> i64 {
    Local::now().timestamp()
}

/// Converts a local wall-clock datetime into a Unix timestamp.
///
/// Ambiguous local times (DST fold) resolve to the earliest instant.
/// Non-existent local times (DST gap) are read with the offset in
/// force before the gap, i.e. shifted forward by one hour.
/// `None` only when even the shifted time does not exist.
pub fn local_timestamp(dt: &NaiveDateTime) -> Option<i64> {
    match Local.from_local_datetime(dt) {
        LocalResult::Single(t) => Some(t.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp()),
        LocalResult::None => {
            let shifted = dt.checked_add_signed(TimeDelta::hours(1))?;
            Local
                .from_local_datetime(&shifted)
                .earliest()
                .map(|t| t.timestamp())
        }
    }
}

/// Normalize a raw label into a measurement name.
///
/// Examples:
/// - "Living Room" -> "living_room"
/// - "rpi-kitchen" -> "rpi_kitchen"
///
/// Downstream time-series stores reject dashes and spaces in
/// measurement names.
pub fn measurement_name(raw: &str) -> String {
    raw.trim()
        .replace(['-', ' '], "_")
        .to_lowercase()
}
