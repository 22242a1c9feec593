// Convert wire values into canonical price keys and validated levels.
// Keys are fixed-point integers so "0.10", "0.1" and 0.1 land on the same level.

use serde::Deserialize;

use crate::engine::types::is_valid_level;

pub const PRICE_DECIMALS: u32 = 10;
pub const DEFAULT_MARKET: &str = "ARK-EUR";
pub const DEFAULT_DEPTH: usize = 25;
pub const MAX_DEPTH: usize = 500;

/// Fixed-point price, `PRICE_DECIMALS` fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriceKey(i64);

impl PriceKey {
    pub fn raw(self) -> i64 {
        self.0
    }
}

/// A price or size as venues send it: a JSON string or a JSON number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    Text(String),
    Number(f64),
}

impl WireNumber {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireNumber::Text(s) => parse_wire_number(s),
            WireNumber::Number(n) => n.is_finite().then_some(*n),
        }
    }
}

/// A level keyed for the book. `size <= 0` is a deletion in a diff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyedLevel {
    pub key: PriceKey,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Normaliser {
    pub price_scale: i64,
    price_decimals: usize,
}

impl Default for Normaliser {
    fn default() -> Self {
        Self::new(PRICE_DECIMALS)
    }
}

impl Normaliser {
    pub fn new(price_decimals: u32) -> Self {
        let price_decimals = price_decimals.min(15);
        Self { price_scale: 10i64.pow(price_decimals), price_decimals: price_decimals as usize }
    }

    /// Exact decimal parse; digits past the scale round half away from zero,
    /// matching `key_from_f64`. Exponent notation goes through `f64`.
    pub fn key_from_str(&self, s: &str) -> Option<PriceKey> {
        let s = s.trim();
        if s.contains(['e', 'E']) {
            return self.key_from_f64(parse_wire_number(s)?);
        }
        let s = s.replace(',', ".");
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(&s)),
        };

        let (integer_part, decimal_part) = digits.split_once('.').unwrap_or((digits, ""));
        if integer_part.is_empty() && decimal_part.is_empty() {
            return None;
        }
        if !integer_part.bytes().chain(decimal_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        let integer: i64 = if integer_part.is_empty() { 0 } else { integer_part.parse().ok()? };
        // Pad the fraction to the scale, or round it half away from zero like key_from_f64
        let (decimal, carry): (i64, i64) = if decimal_part.is_empty() {
            (0, 0)
        } else if decimal_part.len() > self.price_decimals {
            let (kept, dropped) = decimal_part.split_at(self.price_decimals);
            let kept = if kept.is_empty() { 0 } else { kept.parse().ok()? };
            (kept, i64::from(dropped.as_bytes()[0] >= b'5'))
        } else {
            (format!("{:0<width$}", decimal_part, width = self.price_decimals).parse().ok()?, 0)
        };

        let magnitude = integer
            .checked_mul(self.price_scale)?
            .checked_add(decimal)?
            .checked_add(carry)?;
        Some(PriceKey(if negative { -magnitude } else { magnitude }))
    }

    pub fn key_from_f64(&self, value: f64) -> Option<PriceKey> {
        let scaled = (value * self.price_scale as f64).round();
        (scaled.is_finite() && scaled.abs() < i64::MAX as f64).then_some(PriceKey(scaled as i64))
    }

    pub fn key_from_wire(&self, value: &WireNumber) -> Option<PriceKey> {
        match value {
            WireNumber::Text(s) => self.key_from_str(s),
            WireNumber::Number(n) if n.is_finite() => self.key_from_f64(*n),
            WireNumber::Number(_) => None,
        }
    }

    pub fn key_to_price(&self, key: PriceKey) -> f64 {
        key.0 as f64 / self.price_scale as f64
    }

    /// Parse one `[price, size]` row. Rejects rows whose price is not a valid
    /// positive number or whose size is not finite; keeps `size <= 0` for deletions.
    pub fn keyed_level(&self, row: &[WireNumber]) -> Option<KeyedLevel> {
        let [price, size, ..] = row else {
            return None;
        };
        let key = self.key_from_wire(price)?;
        let price = price.as_f64()?;
        let size = size.as_f64()?;
        if price <= 0.0 || key.0 <= 0 {
            return None;
        }
        Some(KeyedLevel { key, price, size })
    }

    /// Rows for a full snapshot: only levels with positive price and size survive.
    pub fn snapshot_levels(&self, rows: &[Vec<WireNumber>]) -> Vec<KeyedLevel> {
        rows.iter()
            .filter_map(|row| self.keyed_level(row))
            .filter(|level| is_valid_level(level.price, level.size))
            .collect()
    }

    /// Rows for a diff: zero or negative sizes are kept as deletions.
    pub fn diff_levels(&self, rows: &[Vec<WireNumber>]) -> Vec<KeyedLevel> {
        rows.iter().filter_map(|row| self.keyed_level(row)).collect()
    }
}

/// Parse a wire string, accepting `,` as the decimal separator.
/// `None` for anything that is not a finite number.
pub fn parse_wire_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let value: f64 = if s.contains(',') { s.replace(',', ".").parse().ok()? } else { s.parse().ok()? };
    value.is_finite().then_some(value)
}

/// Trim and upper-case; anything not shaped like `BASE-QUOTE` over `[A-Z0-9-]`
/// becomes the default market.
pub fn normalize_market_id(raw: &str) -> String {
    let candidate = raw.trim().to_ascii_uppercase();
    let well_formed = split_market_id(&candidate).is_some()
        && candidate.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-');
    if well_formed {
        candidate
    } else {
        DEFAULT_MARKET.to_string()
    }
}

pub fn split_market_id(market: &str) -> Option<(&str, &str)> {
    let (base, quote) = market.split_once('-')?;
    (!base.is_empty() && !quote.is_empty()).then_some((base, quote))
}

pub fn sanitize_depth(depth: i64) -> usize {
    if depth <= 0 {
        DEFAULT_DEPTH
    } else {
        (depth as usize).min(MAX_DEPTH)
    }
}
