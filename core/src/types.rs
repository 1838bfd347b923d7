//! Shared primitive types used across the entire pipeline.

/// The subscriber identifier. Always a non-empty string after normalization.
pub type SubscriberId = String;

/// Region identifier as configured in `regions`.
pub type RegionId = String;

/// A unique identifier for a single pipeline run (uuid v4).
pub type RunId = String;

/// Money in integer minor units (cents). Sums never touch floating point.
pub type MinorUnits = i64;

pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Render minor units as a major-unit decimal string, e.g. `1234 -> "12.34"`.
pub fn format_minor_units(amount: MinorUnits) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let major = abs / MINOR_UNITS_PER_MAJOR as u64;
    let minor = abs % MINOR_UNITS_PER_MAJOR as u64;
    format!("{sign}{major}.{minor:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minor_units_with_two_decimals() {
        assert_eq!(format_minor_units(0), "0.00");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(1234), "12.34");
        assert_eq!(format_minor_units(-250), "-2.50");
    }
}
