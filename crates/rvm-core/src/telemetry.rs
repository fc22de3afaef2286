//! # Bin Telemetry
//!
//! The ultrasonic sensor looks down into the bin: a long distance means an
//! empty bin, a short one means a full bin.
//!
//! ```text
//!   sensor ─┬─            distance 5 cm  → 100 %
//!           │
//!           │
//!   floor  ─┴─            distance 50 cm →   0 %
//! ```

/// Distance reading of an empty bin, in centimetres.
pub const BIN_EMPTY_DISTANCE_CM: f64 = 50.0;

/// Distance reading of a full bin, in centimetres.
pub const BIN_FULL_DISTANCE_CM: f64 = 5.0;

/// Converts a distance reading into a fill percentage (0..=100).
///
/// Missing, non-positive and non-finite readings are treated as "no
/// reading" and report 0. The percentage is truncated, not rounded.
///
/// ## Example
/// ```rust
/// use rvm_core::telemetry::bin_fill_percent;
///
/// assert_eq!(bin_fill_percent(Some(50.0)), 0);
/// assert_eq!(bin_fill_percent(Some(27.5)), 50);
/// assert_eq!(bin_fill_percent(Some(5.0)), 100);
/// assert_eq!(bin_fill_percent(None), 0);
/// ```
pub fn bin_fill_percent(distance_cm: Option<f64>) -> u8 {
    let Some(distance) = distance_cm else {
        return 0;
    };

    if !distance.is_finite() || distance <= 0.0 {
        return 0;
    }

    let span = BIN_EMPTY_DISTANCE_CM - BIN_FULL_DISTANCE_CM;
    let percent = ((BIN_EMPTY_DISTANCE_CM - distance) / span * 100.0).trunc();

    percent.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamps_out_of_range() {
        assert_eq!(bin_fill_percent(Some(80.0)), 0);
        assert_eq!(bin_fill_percent(Some(1.0)), 100);
    }

    #[test]
    fn test_truncates() {
        // (50 - 40) / 45 * 100 = 22.2
        assert_eq!(bin_fill_percent(Some(40.0)), 22);
        // (50 - 10) / 45 * 100 = 88.8
        assert_eq!(bin_fill_percent(Some(10.0)), 88);
    }

    #[test]
    fn test_bad_readings_report_empty() {
        assert_eq!(bin_fill_percent(Some(0.0)), 0);
        assert_eq!(bin_fill_percent(Some(-3.0)), 0);
        assert_eq!(bin_fill_percent(Some(f64::NAN)), 0);
        assert_eq!(bin_fill_percent(Some(f64::INFINITY)), 0);
    }
}
