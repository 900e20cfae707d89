//! Digit normalization for numeric operator input.
//!
//! Operators on Persian or Arabic keyboard layouts type
//! `۱۲۰۰۰` or `١٢٠٠٠` just as readily as `12000`. Both scripts
//! are folded to ASCII and thousands separators are dropped
//! before the integer parse.

use std::ops::RangeInclusive;

use crate::error::{DeployError, DeployResult};

/// Thousands separators removed by [`normalize`]: ASCII comma and
/// the Arabic thousands separator (U+066C).
const SEPARATORS: [char; 2] = [',', '\u{066C}'];

/// Fold Eastern Arabic-Indic (`۰`..`۹`) and Arabic-Indic
/// (`٠`..`٩`) digits to ASCII and strip thousands separators.
///
/// Every other character passes through unchanged.
///
/// ```
/// use stackpilot::digits::normalize;
///
/// assert_eq!(normalize("۱۲۳۴"), "1234");
/// assert_eq!(normalize("12,345"), "12345");
/// assert_eq!(normalize("v2"), "v2");
/// ```
#[must_use]
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !SEPARATORS.contains(c))
        .map(fold_digit)
        .collect()
}

fn fold_digit(c: char) -> char {
    let offset = match c {
        '\u{06F0}'..='\u{06F9}' => u32::from(c) - 0x06F0,
        '\u{0660}'..='\u{0669}' => u32::from(c) - 0x0660,
        _ => return c,
    };
    char::from_digit(offset, 10).unwrap_or(c)
}

/// Normalize `input` and parse it as an integer inside `range`.
///
/// Surrounding whitespace is ignored. Anything that is not a
/// plain non-negative integer after normalization is rejected,
/// as is any value outside the inclusive range.
pub fn parse_in_range(input: &str, range: &RangeInclusive<u64>) -> DeployResult<u64> {
    let normalized = normalize(input.trim());

    if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_digit()) {
        return Err(DeployError::InvalidInput(format!(
            "'{}' is not a whole number",
            input.trim()
        )));
    }

    let value: u64 = normalized
        .parse()
        .map_err(|_| DeployError::InvalidInput(format!("'{normalized}' is too large")))?;

    if range.contains(&value) {
        Ok(value)
    } else {
        Err(DeployError::InvalidInput(format!(
            "{value} is outside {}..={}",
            range.start(),
            range.end()
        )))
    }
}
