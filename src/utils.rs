use crate::GIB;

const MIB: u64 = 1024 * 1024;
const KIB: u64 = 1024;

/// Format byte count as human-readable string.
pub fn format_size(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Parse human-readable size string ("10GB", "512 mb", "4096") into bytes.
/// Units are binary; a bare number is bytes.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let s = input.trim();
    let upper = s.to_ascii_uppercase();
    let (num_str, multiplier) = [
        ("GIB", GIB),
        ("GB", GIB),
        ("G", GIB),
        ("MIB", MIB),
        ("MB", MIB),
        ("M", MIB),
        ("KIB", KIB),
        ("KB", KIB),
        ("K", KIB),
        ("B", 1),
    ]
    .iter()
    .find_map(|(suffix, multiplier)| {
        upper
            .strip_suffix(suffix)
            .map(|n| (s[..n.len()].trim(), *multiplier))
    })
    .unwrap_or((s, 1));

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid size: '{input}'"))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Size cannot be negative: '{input}'"));
    }

    Ok((num * multiplier as f64) as u64)
}
