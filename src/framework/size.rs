//! Volume size ranges and Kubernetes quantity parsing
//!
//! Only the subset of the quantity grammar that shows up in size ranges is
//! handled: plain byte counts, binary suffixes (`Ki`..`Ei`) and decimal
//! suffixes (`k`..`E`), optionally with a fractional mantissa.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Smallest size used when neither range sets a minimum
pub const MIN_VALID_SIZE: &str = "1Ki";
/// Largest size used when neither range sets a maximum
pub const MAX_VALID_SIZE: &str = "10Ei";

/// Inclusive range of volume sizes; unset bounds are open
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SizeRange {
    /// Lower bound, as a quantity string
    pub min: Option<String>,
    /// Upper bound, as a quantity string
    pub max: Option<String>,
}

impl SizeRange {
    /// Range with both bounds set
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: Some(min.into()),
            max: Some(max.into()),
        }
    }
}

const BINARY_SUFFIXES: [(&str, u32); 6] =
    [("Ki", 1), ("Mi", 2), ("Gi", 3), ("Ti", 4), ("Pi", 5), ("Ei", 6)];
const DECIMAL_SUFFIXES: [(&str, u32); 6] =
    [("k", 1), ("M", 2), ("G", 3), ("T", 4), ("P", 5), ("E", 6)];

/// Parse a quantity such as `5Gi` or `1.5G` into bytes
pub fn parse_quantity(quantity: &str) -> Result<u128> {
    let q = quantity.trim();
    let invalid = || Error::validation(format!("invalid quantity '{quantity}'"));

    let (number, multiplier) = BINARY_SUFFIXES
        .iter()
        .find_map(|(suffix, exp)| q.strip_suffix(suffix).map(|n| (n, 1024u128.pow(*exp))))
        .or_else(|| {
            DECIMAL_SUFFIXES
                .iter()
                .find_map(|(suffix, exp)| q.strip_suffix(suffix).map(|n| (n, 1000u128.pow(*exp))))
        })
        .unwrap_or((q, 1));

    if number.is_empty() || number.starts_with('-') {
        return Err(invalid());
    }

    match number.split_once('.') {
        None => number
            .parse::<u128>()
            .map_err(|_| invalid())?
            .checked_mul(multiplier)
            .ok_or_else(invalid),
        Some((whole, frac)) => {
            let whole: u128 = if whole.is_empty() {
                0
            } else {
                whole.parse().map_err(|_| invalid())?
            };
            if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            let scale = 10u128.checked_pow(frac.len() as u32).ok_or_else(invalid)?;
            let frac: u128 = frac.parse().map_err(|_| invalid())?;
            let whole_bytes = whole.checked_mul(multiplier).ok_or_else(invalid)?;
            // Round up: a claim must never be smaller than the bound it came from
            let frac_bytes = (frac * multiplier).div_ceil(scale);
            whole_bytes.checked_add(frac_bytes).ok_or_else(invalid)
        }
    }
}

/// Pick a claim size that fits both ranges.
///
/// Returns the larger of the two minimums, as written in its range. Fails
/// when the ranges do not overlap.
pub fn get_size_ranges_intersection(first: &SizeRange, second: &SizeRange) -> Result<String> {
    let min_first = first.min.as_deref().unwrap_or(MIN_VALID_SIZE);
    let max_first = first.max.as_deref().unwrap_or(MAX_VALID_SIZE);
    let min_second = second.min.as_deref().unwrap_or(MIN_VALID_SIZE);
    let max_second = second.max.as_deref().unwrap_or(MAX_VALID_SIZE);

    let (min_first_b, max_first_b) = (parse_quantity(min_first)?, parse_quantity(max_first)?);
    let (min_second_b, max_second_b) = (parse_quantity(min_second)?, parse_quantity(max_second)?);

    if min_first_b > max_first_b || min_second_b > max_second_b {
        return Err(Error::validation(format!(
            "size range has min above max: {first:?} / {second:?}"
        )));
    }

    if max_first_b < min_second_b || max_second_b < min_first_b {
        return Err(Error::validation(format!(
            "size ranges do not intersect: [{min_first}, {max_first}] and [{min_second}, {max_second}]"
        )));
    }

    if min_first_b >= min_second_b {
        Ok(min_first.to_string())
    } else {
        Ok(min_second.to_string())
    }
}
