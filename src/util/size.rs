//! Byte-size units for reservation sizes and reports.

/// `n` KiB in bytes.
#[inline]
pub const fn kib(n: u64) -> u64 {
    n << 10
}

/// `n` MiB in bytes.
#[inline]
pub const fn mib(n: u64) -> u64 {
    n << 20
}

/// `n` GiB in bytes.
#[inline]
pub const fn gib(n: u64) -> u64 {
    n << 30
}

/// Render a byte count with the largest binary unit that keeps it at or
/// above one, e.g. `"128.00 MiB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < kib(1) {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(kib(64), 65_536);
        assert_eq!(mib(128), 134_217_728);
        assert_eq!(gib(4), 4_294_967_296);
    }

    #[test]
    fn test_format_picks_largest_unit() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(mib(200)), "200.00 MiB");
        assert_eq!(format_bytes(gib(3)), "3.00 GiB");
        assert_eq!(format_bytes(gib(2048)), "2.00 TiB");
    }
}
