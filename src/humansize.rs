//! Human-readable byte sizes (1024 base).

use crate::error::{Result, ToolError};

pub const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Split a size into its rendered number and unit, e.g. `("1.5", "KB")`.
///
/// The largest unit whose threshold is not above `bytes` is used. Values
/// below 10 (except plain bytes) keep one decimal, a trailing `.0` is dropped.
pub fn split_size(bytes: u64) -> (String, &'static str) {
    if bytes == 0 {
        return ("0".to_string(), UNITS[0]);
    }
    let mut idx = 0usize;
    while idx + 1 < UNITS.len() && bytes >= 1u64 << (10 * (idx + 1)) {
        idx += 1;
    }
    if idx == 0 {
        return (bytes.to_string(), UNITS[0]);
    }
    let value = bytes as f64 / (1u64 << (10 * idx)) as f64;
    let text = if value < 10.0 {
        let s = format!("{:.1}", value);
        // 9.96 rounds to "10.0"; keep the integer form in that case too
        s.strip_suffix(".0").map(str::to_string).unwrap_or(s)
    } else {
        format!("{:.0}", value)
    };
    (text, UNITS[idx])
}

/// `0 B`, `512 B`, `1.5 KB`, `12 MB`, ...
pub fn format_size(bytes: u64) -> String {
    let (value, unit) = split_size(bytes);
    format!("{} {}", value, unit)
}

/// Parse `123`, `10K`, `1.5 MB`, `2g` into bytes. A trailing `B`/`iB` is optional.
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ToolError::invalid("empty size"));
    }
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| ToolError::invalid(format!("invalid size '{}'", input)))?;
    let unit = unit.trim().to_ascii_uppercase();
    let unit = unit.trim_end_matches("IB").trim_end_matches('B');
    let power = match unit {
        "" => 0,
        "K" => 1,
        "M" => 2,
        "G" => 3,
        "T" => 4,
        "P" => 5,
        _ => return Err(ToolError::invalid(format!("unknown size unit in '{}'", input))),
    };
    Ok((value * (1u64 << (10 * power)) as f64).round() as u64)
}
