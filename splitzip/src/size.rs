//! Human-readable byte counts: `"100MB"`, `"700MiB"`, `"4.7GB"`, ...

use crate::result::*;

/// Parses a size string into a byte count.
///
/// The unit suffix is optional (bare numbers are bytes) and case-insensitive:
/// `B`/`byte`/`bytes`, decimal `KB`/`MB`/`GB`/`TB`, or binary
/// `KiB`/`MiB`/`GiB`/`TiB`. The numeric part may carry a decimal fraction.
pub fn parse_size(input: &str) -> ZipResult<u64> {
    let trimmed = input.trim();
    let unit_start = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or_else(|| trimmed.len());
    let (number, unit) = trimmed.split_at(unit_start);
    let unit = unit.trim_start();

    if number.is_empty() {
        return Err(SplitZipError::Config(format!(
            "Invalid size format: {:?}. Expected <number>[unit], e.g. \"100MB\", \"700MiB\", \"4.7GB\"",
            input
        )));
    }

    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" | "byte" | "bytes" => 1,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        _ => {
            return Err(SplitZipError::Config(format!(
                "Unknown size unit {:?} in {:?}",
                unit, input
            )))
        }
    };

    if !number.contains('.') {
        let value: u64 = number
            .parse()
            .map_err(|_| SplitZipError::Config(format!("Invalid size format: {:?}", input)))?;
        value
            .checked_mul(multiplier)
            .ok_or_else(|| SplitZipError::Config(format!("Size out of range: {:?}", input)))
    } else {
        let value: f64 = number
            .parse()
            .map_err(|_| SplitZipError::Config(format!("Invalid size format: {:?}", input)))?;
        let bytes = value * multiplier as f64;
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(SplitZipError::Config(format!("Size out of range: {:?}", input)));
        }
        Ok(bytes as u64)
    }
}

/// Renders a byte count for humans, e.g. `1.50 MB` or (`binary`) `1.50 MiB`.
/// Whole values drop the fraction: `500 B`, `1 KiB`.
pub fn format_size(size: u64, binary: bool) -> String {
    let (units, divisor): (&[&str], f64) = if binary {
        (&["B", "KiB", "MiB", "GiB", "TiB"], 1024.0)
    } else {
        (&["B", "KB", "MB", "GB", "TB"], 1000.0)
    };

    let mut value = size as f64;
    for unit in &units[..units.len() - 1] {
        if value < divisor {
            return render(value, unit);
        }
        value /= divisor;
    }
    render(value, units[units.len() - 1])
}

fn render(value: f64, unit: &str) -> String {
    if value == value.trunc() {
        format!("{} {}", value as u64, unit)
    } else {
        format!("{:.2} {}", value, unit)
    }
}
