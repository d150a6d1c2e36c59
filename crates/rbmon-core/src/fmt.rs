//! Formatting helpers for report strings.
//!
//! All units are binary (1K = 1024 bytes) and the suffixes carry no `i`, which
//! is what the collector dashboard parses.

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

/// Format a bytes-per-second rate.
///
/// `"0B"`, `"512B"`, `"1.5K"`, `"3.2M"`, `"1.1G"`. Negative and non-finite
/// rates read as `"0B"`.
pub fn format_rate(rate: f64) -> String {
    if !rate.is_finite() || rate < 0.0 {
        return "0B".to_string();
    }
    if rate >= GIB {
        format!("{:.1}G", rate / GIB)
    } else if rate >= MIB {
        format!("{:.1}M", rate / MIB)
    } else if rate >= KIB {
        format!("{:.1}K", rate / KIB)
    } else {
        format!("{}B", rate as u64)
    }
}

/// Format a cumulative byte counter.
///
/// Never drops below kilobytes: `"0.5K"`, `"12.3K"`, `"4.0M"`, `"1.2G"`, `"2.0T"`.
pub fn format_total(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= TIB {
        format!("{:.1}T", b / TIB)
    } else if b >= GIB {
        format!("{:.1}G", b / GIB)
    } else if b >= MIB {
        format!("{:.1}M", b / MIB)
    } else {
        format!("{:.1}K", b / KIB)
    }
}

/// `"used MiB / total MiB"` with two decimals.
pub fn format_mib_pair(used: u64, total: u64) -> String {
    format!("{:.2} MiB / {:.2} MiB", used as f64 / MIB, total as f64 / MIB)
}

/// `"used GiB / total GiB"` with two decimals.
pub fn format_gib_pair(used: u64, total: u64) -> String {
    format!("{:.2} GiB / {:.2} GiB", used as f64 / GIB, total as f64 / GIB)
}

/// Percentage of `part` in `total`, `0.0` when `total` is zero.
pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn normalize_for_display(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0.0), "0B");
        assert_eq!(format_rate(-5.0), "0B");
        assert_eq!(format_rate(f64::NAN), "0B");
        assert_eq!(format_rate(512.7), "512B");
        assert_eq!(format_rate(1536.0), "1.5K");
        assert_eq!(format_rate(3.2 * MIB), "3.2M");
        assert_eq!(format_rate(1.1 * GIB), "1.1G");
    }

    #[test]
    fn test_format_total() {
        assert_eq!(format_total(0), "0.0K");
        assert_eq!(format_total(512), "0.5K");
        assert_eq!(format_total(12_595), "12.3K");
        assert_eq!(format_total(4 * 1024 * 1024), "4.0M");
        assert_eq!(format_total(2 * 1024 * 1024 * 1024 * 1024), "2.0T");
    }

    #[test]
    fn test_pairs() {
        assert_eq!(format_mib_pair(512 * 1024 * 1024, 1024 * 1024 * 1024), "512.00 MiB / 1024.00 MiB");
        assert_eq!(format_gib_pair(0, 0), "0.00 GiB / 0.00 GiB");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }

    #[test]
    fn test_normalize_for_display() {
        assert_eq!(
            normalize_for_display("  Intel(R)  Xeon(R) CPU\tE5-2680 v4 @ 2.40GHz \n"),
            "Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz"
        );
    }
}
