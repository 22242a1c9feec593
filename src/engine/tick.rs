// Tick-grid arithmetic for limit prices.
//
// Everything here is total: bad input comes back as `NaN` or `false`, never a panic.

/// Binary noise past this many fractional digits is not a real tick digit.
const MAX_TICK_DECIMALS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMode {
    Down,
    Up,
    Nearest,
}

/// A tick size together with the fractional precision it implies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSpec {
    pub tick: f64,
    pub decimals: usize,
}

impl TickSpec {
    /// `None` for a non-finite or non-positive tick.
    pub fn new(tick: f64) -> Option<Self> {
        if !tick.is_finite() || tick <= 0.0 {
            return None;
        }
        Some(Self { tick, decimals: count_decimals(tick) })
    }

    pub fn round(&self, value: f64, mode: RoundMode) -> f64 {
        round_to_tick(value, self.tick, mode)
    }

    pub fn contains(&self, value: f64) -> bool {
        is_on_tick(value, self.tick)
    }

    /// Largest distance from the grid still accepted as "on tick".
    pub fn tolerance(&self) -> f64 {
        10f64.powi(-(self.decimals as i32 + 2))
    }
}

/// Fractional digits carried by `tick`, read from its shortest exponential form
/// (`2.5e-1` -> 2, `1e-4` -> 4, `5e0` -> 0).
pub fn count_decimals(tick: f64) -> usize {
    if !tick.is_finite() || tick <= 0.0 {
        return 0;
    }
    let text = format!("{:e}", tick);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    let mantissa_decimals = mantissa
        .split_once('.')
        .map(|(_, fraction)| fraction.len() as i64)
        .unwrap_or(0);
    let exponent: i64 = exponent.parse().unwrap_or(0);
    (mantissa_decimals - exponent).clamp(0, MAX_TICK_DECIMALS as i64) as usize
}

/// Snap `value` onto the `tick` grid.
///
/// A non-finite `value` gives `NaN`; an unusable `tick` (non-finite or `<= 0`)
/// hands `value` back untouched. The ratio is nudged by an epsilon scaled to its
/// magnitude so that `10.1 / 0.1 = 100.99999999999999` still floors to 101.
pub fn round_to_tick(value: f64, tick: f64, mode: RoundMode) -> f64 {
    if !value.is_finite() {
        return f64::NAN;
    }
    if !tick.is_finite() || tick <= 0.0 {
        return value;
    }
    let ratio = value / tick;
    let epsilon = f64::EPSILON * (ratio.abs() * 10.0).max(1.0);
    let steps = match mode {
        RoundMode::Down => (ratio + epsilon).floor(),
        RoundMode::Up => (ratio - epsilon).ceil(),
        RoundMode::Nearest => (ratio + epsilon).round(),
    };
    clamp_decimals(steps * tick, count_decimals(tick))
}

/// Whether `value` sits on the `tick` grid, within `10^-(decimals + 2)`.
pub fn is_on_tick(value: f64, tick: f64) -> bool {
    match TickSpec::new(tick) {
        Some(spec) if value.is_finite() => {
            let snapped = spec.round(value, RoundMode::Nearest);
            (snapped - value).abs() <= spec.tolerance()
        }
        _ => false,
    }
}

fn clamp_decimals(value: f64, decimals: usize) -> f64 {
    if !value.is_finite() {
        return f64::NAN;
    }
    format!("{:.*}", decimals, value).parse().unwrap_or(value)
}
