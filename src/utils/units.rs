//! Display-unit selection for sizes and durations.

const KB_PER_MB: f64 = 1024.0;
const KB_PER_GB: f64 = 1024.0 * 1024.0;

const SECS_PER_MIN: f64 = 60.0;
const SECS_PER_HOUR: f64 = 60.0 * 60.0;
const SECS_PER_DAY: f64 = 60.0 * 60.0 * 24.0;
const SECS_PER_WEEK: f64 = SECS_PER_DAY * 7.0;
const SECS_PER_MONTH: f64 = SECS_PER_DAY * 30.44;
const SECS_PER_YEAR: f64 = SECS_PER_DAY * 365.23;

/// Pick a unit for a size given in KB.
///
/// Returns the unit name and the factor converting KB into it.
pub fn size_unit(max_kb: f64) -> (&'static str, f64) {
    if max_kb > KB_PER_GB {
        ("GB", 1.0 / KB_PER_GB)
    } else if max_kb > 10.0 * KB_PER_MB {
        ("MB", 1.0 / KB_PER_MB)
    } else {
        ("KB", 1.0)
    }
}

/// Factor converting KB into a unit returned by `size_unit`
pub fn size_factor(unit: &str) -> f64 {
    match unit {
        "GB" => 1.0 / KB_PER_GB,
        "MB" => 1.0 / KB_PER_MB,
        _ => 1.0,
    }
}

/// Pick a unit for a duration given in seconds.
///
/// A unit is chosen once the value exceeds ten of it (five for years).
pub fn time_unit(max_secs: f64) -> (&'static str, f64) {
    if max_secs > 5.0 * SECS_PER_YEAR {
        ("years", 1.0 / SECS_PER_YEAR)
    } else if max_secs > 10.0 * SECS_PER_MONTH {
        ("months", 1.0 / SECS_PER_MONTH)
    } else if max_secs > 10.0 * SECS_PER_WEEK {
        ("weeks", 1.0 / SECS_PER_WEEK)
    } else if max_secs > 10.0 * SECS_PER_DAY {
        ("days", 1.0 / SECS_PER_DAY)
    } else if max_secs > 10.0 * SECS_PER_HOUR {
        ("hours", 1.0 / SECS_PER_HOUR)
    } else if max_secs > 10.0 * SECS_PER_MIN {
        ("min", 1.0 / SECS_PER_MIN)
    } else {
        ("seconds", 1.0)
    }
}

/// Minutes in an average year
pub fn minutes_per_year() -> f64 {
    SECS_PER_YEAR / SECS_PER_MIN
}
