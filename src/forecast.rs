//! Zambretti forecaster: pressure trend plus absolute pressure to a forecast letter.

use crate::measurement::Reading;
use crate::trend::{self, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForecastCode {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
}

impl ForecastCode {
    /// Short glyph published to subscribers.
    pub fn glyph(self) -> &'static str {
        use ForecastCode::*;
        match self {
            A | B | C => "☀️",
            D | E | F => "🌤️",
            G | H | I | J | K | L | M | N => "⛅",
            O | R => "🌦️",
            P | Q | S | T => "☁️",
            U | V | W | X | Y | Z => "🌧️",
        }
    }

    pub fn description(self) -> &'static str {
        use ForecastCode::*;
        match self {
            A => "Settled Weather",
            B => "Fine Weather",
            C => "Becoming Fine",
            D => "Fine, Becoming Less Settled",
            E => "Fine, Possible Showers",
            F => "Fairly Fine, Improving",
            G => "Fairly Fine, Possible Showers Early",
            H => "Fairly Fine, Showers Later",
            I => "Showers Early, Improving",
            J => "Changeable, Mending",
            K => "Fairly Fine, Showers Likely",
            L => "Rather Unsettled, Clearing Later",
            M => "Unsettled, Probably Improving",
            N => "Showery, Bright Intervals",
            O => "Showery, Becoming More Unsettled",
            P => "Changeable, Some Rain",
            Q => "Unsettled, Short Fine Intervals",
            R => "Unsettled, Rain Later",
            S => "Unsettled, Rain At Times",
            T => "Very Unsettled, Finer At Times",
            U => "Rain At Times, Worse Later",
            V => "Rain At Times, Becoming Very Unsettled",
            W => "Rain At Frequent Intervals",
            X => "Very Unsettled, Rain",
            Y => "Stormy, Possibly Improving",
            Z => "Stormy, Much Rain",
        }
    }
}

impl std::fmt::Display for ForecastCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One band: pressures strictly above `threshold` map to `code`, unless an
/// earlier band already matched.
#[derive(Debug, Clone, Copy)]
pub struct Band {
    pub threshold: f64,
    pub code: ForecastCode,
}

const fn band(threshold: f64, code: ForecastCode) -> Band {
    Band { threshold, code }
}

// Thresholds strictly descending, last row is the -inf catch-all.

pub const FALLING: &[Band] = &[
    band(1045.0, ForecastCode::A),
    band(1032.0, ForecastCode::B),
    band(1020.0, ForecastCode::D),
    band(1014.0, ForecastCode::H),
    band(1006.0, ForecastCode::O),
    band(1000.0, ForecastCode::R),
    band(993.0, ForecastCode::U),
    band(987.0, ForecastCode::V),
    band(f64::NEG_INFINITY, ForecastCode::X),
];

pub const RISING: &[Band] = &[
    band(1025.0, ForecastCode::A),
    band(1016.0, ForecastCode::B),
    band(1009.0, ForecastCode::C),
    band(1003.0, ForecastCode::F),
    band(997.0, ForecastCode::G),
    band(992.0, ForecastCode::I),
    band(986.0, ForecastCode::J),
    band(980.0, ForecastCode::L),
    band(973.0, ForecastCode::M),
    band(967.0, ForecastCode::Q),
    band(961.0, ForecastCode::T),
    band(953.0, ForecastCode::Y),
    band(f64::NEG_INFINITY, ForecastCode::Z),
];

pub const STEADY: &[Band] = &[
    band(1028.0, ForecastCode::A),
    band(1017.0, ForecastCode::B),
    band(1011.0, ForecastCode::E),
    band(1003.0, ForecastCode::K),
    band(996.0, ForecastCode::N),
    band(991.0, ForecastCode::P),
    band(984.0, ForecastCode::S),
    band(978.0, ForecastCode::W),
    band(966.0, ForecastCode::X),
    band(f64::NEG_INFINITY, ForecastCode::Z),
];

pub fn table(trend: Trend) -> &'static [Band] {
    match trend {
        Trend::Falling => FALLING,
        Trend::Rising => RISING,
        Trend::Steady => STEADY,
    }
}

/// Looks up the forecast for `pressure` in the table for `trend`.
///
/// Pressures that match no band (`-inf`, NaN) fall to the catch-all row.
pub fn lookup(trend: Trend, pressure: f64) -> ForecastCode {
    let bands = table(trend);
    bands
        .iter()
        .find(|b| pressure > b.threshold)
        .or(bands.last())
        .map_or(ForecastCode::Z, |b| b.code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forecast {
    pub trend: Trend,
    pub code: ForecastCode,
}

pub fn forecast(reference: &Reading, current: &Reading) -> Forecast {
    debug_assert_eq!(reference.device, current.device);
    let trend = trend::classify(reference.pressure, current.pressure);
    Forecast {
        trend,
        code: lookup(trend, current.pressure),
    }
}
