pub struct FileSizeUtils;

impl FileSizeUtils {
    /// Display size for a placeholder title, e.g. `"2 MB"`.
    ///
    /// The value is divided by 1024 while it stays above 900 and the result
    /// is floored, so `1_000` bytes reads as `"0 KB"`.
    pub fn format_size(size: u64) -> String {
        const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size > 900.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        let rounded = (size * 100.0).round() / 100.0;
        format!("{} {}", rounded.floor() as u64, UNITS[unit_index])
    }
}
