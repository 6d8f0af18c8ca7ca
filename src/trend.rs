/// Pressure change over the trend window, in hPa, that counts as a trend.
pub const THRESHOLD: f64 = 1.6;

/// Barometer resolution in hPa. Changes are compared in whole steps of this.
pub const RESOLUTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trend {
    Falling,
    Rising,
    Steady,
}

/// Classifies the change from `reference` (older) to `current`.
///
/// Both bounds belong to the steady band: a change of exactly [`THRESHOLD`]
/// in either direction is steady. The change is rounded to [`RESOLUTION`]
/// first, so float noise in the subtraction cannot move it across a bound.
pub fn classify(reference: f64, current: f64) -> Trend {
    let steps = ((reference - current) / RESOLUTION).round();
    let limit = (THRESHOLD / RESOLUTION).round();

    if steps > limit {
        Trend::Falling
    } else if steps < -limit {
        Trend::Rising
    } else {
        Trend::Steady
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Trend::Falling => "falling",
            Trend::Rising => "rising",
            Trend::Steady => "steady",
        };
        f.write_str(s)
    }
}
