//! Human-readable size parsing and provider allocation granularity.

use thiserror::Error;

/// Bytes in one gibibyte, the provider's allocation unit.
pub const GIB: u64 = 1 << 30;

/// Errors raised while parsing a size string.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SizeError {
    /// Raised when the input is blank.
    #[error("size must not be empty")]
    Empty,
    /// Raised when the numeric part is not a non-negative integer.
    #[error("invalid size '{0}': expected an integer optionally followed by b, k, m, g or t")]
    Invalid(String),
    /// Raised when the value does not fit in 64 bits.
    #[error("size '{0}' is too large to represent")]
    Overflow(String),
}

/// Parses sizes such as `4G`, `512m` or `1073741824` into bytes.
///
/// Suffixes are case-insensitive binary multiples. A bare number is a byte
/// count.
///
/// # Errors
///
/// Returns [`SizeError`] when the input is empty, malformed, or overflows.
///
/// # Examples
///
/// ```
/// use volsnap::size::{parse_size, GIB};
/// assert_eq!(parse_size("4G"), Ok(4 * GIB));
/// assert_eq!(parse_size("2048"), Ok(2048));
/// ```
pub fn parse_size(raw: &str) -> Result<u64, SizeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SizeError::Empty);
    }

    let (digits, multiplier) = split_suffix(trimmed)
        .ok_or_else(|| SizeError::Invalid(trimmed.to_owned()))?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(SizeError::Invalid(trimmed.to_owned()));
    }

    let value: u64 = digits
        .parse()
        .map_err(|_| SizeError::Overflow(trimmed.to_owned()))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| SizeError::Overflow(trimmed.to_owned()))
}

fn split_suffix(value: &str) -> Option<(&str, u64)> {
    let last = value.chars().last()?;
    if last.is_ascii_digit() {
        return Some((value, 1));
    }

    let multiplier = match last.to_ascii_lowercase() {
        'b' => 1,
        'k' => 1 << 10,
        'm' => 1 << 20,
        'g' => GIB,
        't' => 1 << 40,
        _ => return None,
    };
    let digits = value.strip_suffix(last)?;
    Some((digits.trim_end(), multiplier))
}

/// Rounds a byte count up to whole gibibytes, returning the GiB count.
#[must_use]
pub const fn round_up_to_gib(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}
