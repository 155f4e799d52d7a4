//! Human-readable durations for command-line and environment options.

use std::time::Duration;

/// Unit suffixes and their length in milliseconds. `ms` must be tried
/// before `m` and `s`.
const UNITS: [(&str, u64); 4] = [("ms", 1), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)];

/// Parse a duration such as `60s`, `2m`, `500ms` or `1h`.
///
/// A bare number is taken as seconds. Zero is rejected because a scan or
/// write with no time budget can never succeed.
///
/// # Examples
/// ```
/// use switchbot_collector::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (number, millis_per_unit) = UNITS
        .iter()
        .find_map(|&(suffix, millis)| src.strip_suffix(suffix).map(|n| (n, millis)))
        .unwrap_or((src, 1_000));

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    let millis = value
        .checked_mul(millis_per_unit)
        .ok_or_else(|| format!("duration too large: {src}"))?;

    if millis == 0 {
        return Err(format!("duration must be greater than zero: {src}"));
    }

    Ok(Duration::from_millis(millis))
}
