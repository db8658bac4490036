//! Human-readable renderings used on the stats page.

use std::time::Duration;

const KB: u64 = 1024;

/// `"< 1KB"` below one kibibyte, otherwise whole units up to TB
pub fn format_bytes(bytes: u64) -> String {
    if bytes < KB {
        return "< 1KB".to_string();
    }

    let units = ["KB", "MB", "GB", "TB"];
    let mut value = bytes / KB;
    let mut unit = 0;
    while value >= KB && unit < units.len() - 1 {
        value /= KB;
        unit += 1;
    }

    format!("{} {}", value, units[unit])
}

/// Largest whole unit among seconds, minutes, hours and days
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}

pub fn format_millis(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}
