//! Built-in protocol decoders. Each emits a single packet stream.

mod pulse;
mod uart;

pub use pulse::PulseDecoder;
pub use uart::UartDecoder;

use crate::graph::stream::FS_PER_SECOND;

/// Format a femtosecond duration with an engineering prefix, e.g. `"2.500 us"`.
pub fn format_duration(fs: i64) -> String {
    const UNITS: [(i64, &str); 5] = [
        (FS_PER_SECOND, "s"),
        (1_000_000_000_000, "ms"),
        (1_000_000_000, "us"),
        (1_000_000, "ns"),
        (1_000, "ps"),
    ];
    let magnitude = fs.unsigned_abs();
    for (scale, suffix) in UNITS {
        if magnitude >= scale as u64 {
            return format!("{:.3} {}", fs as f64 / scale as f64, suffix);
        }
    }
    format!("{} fs", fs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(2_500_000_000), "2.500 us");
        assert_eq!(format_duration(FS_PER_SECOND), "1.000 s");
        assert_eq!(format_duration(12), "12 fs");
        assert_eq!(format_duration(-3_000_000), "-3.000 ns");
    }
}
