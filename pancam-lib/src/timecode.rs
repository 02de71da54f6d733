//! Onboard time handling.
//!
//! Housekeeping blocks carry a 48-bit CUC timecode: 32 bits of coarse
//! seconds and 16 bits of fractional seconds. The rover clock counts from
//! 2000-01-01T00:00:00 UTC.
use hifitime::{Duration, Epoch};

/// Fractional-second denominator for the 16-bit fine field.
const FINE_PER_SEC: f64 = 65536.0;

/// Convert a raw 48-bit CUC value to decimal seconds since the rover epoch.
#[must_use]
pub fn cuc_seconds(cuc: u64) -> f64 {
    (cuc >> 16) as f64 + (cuc & 0xffff) as f64 / FINE_PER_SEC
}

/// Seconds elapsed from CUC `earlier` to CUC `later`. Negative when time
/// runs backwards, which is itself a data-quality signal.
#[must_use]
pub fn cuc_delta(later: u64, earlier: u64) -> f64 {
    cuc_seconds(later) - cuc_seconds(earlier)
}

/// Convert a raw 48-bit CUC value to a UTC [`Epoch`].
#[must_use]
pub fn cuc_epoch(cuc: u64) -> Epoch {
    Epoch::from_gregorian_utc_at_midnight(2000, 1, 1) + Duration::from_seconds(cuc_seconds(cuc))
}
