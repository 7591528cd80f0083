const MIB: f64 = 1024.0 * 1024.0;

pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / MIB)
}

pub fn format_percent(value: f64) -> String {
    format!("{:.2} %", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megabytes_use_binary_units() {
        assert_eq!(format_megabytes(0), "0.00 MB");
        assert_eq!(format_megabytes(1024 * 1024 * 3 / 2), "1.50 MB");
    }

    #[test]
    fn percent_has_two_decimals() {
        assert_eq!(format_percent(12.3456), "12.35 %");
    }
}
