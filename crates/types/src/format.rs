//! Human readable formatting helpers

const UNITS: [&str; 7] = ["bytes", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Format a byte count with a binary unit suffix, e.g. `1.5 KB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bytes_to_human(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::bytes_to_human;

    const KB: u64 = 1024;

    #[test]
    fn units() {
        assert_eq!(bytes_to_human(1), "1.0 bytes");
        assert_eq!(bytes_to_human(KB), "1.0 KB");
        assert_eq!(bytes_to_human(KB + KB / 2), "1.5 KB");
        assert_eq!(bytes_to_human(KB * KB * 44 / 10), "4.4 MB");
        assert_eq!(bytes_to_human(KB * KB * KB * 169 / 10), "16.9 GB");
        assert_eq!(bytes_to_human(KB * KB * KB * KB * 106 / 100), "1.1 TB");
        assert_eq!(bytes_to_human(KB * KB * KB * KB * KB), "1.0 PB");
        assert_eq!(bytes_to_human(KB * KB * KB * KB * KB * KB * 9), "9.0 EB");
    }

    #[test]
    fn zero() {
        assert_eq!(bytes_to_human(0), "0.0 bytes");
    }
}
