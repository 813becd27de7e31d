use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};
use humansize::{format_size as human_format_size, BINARY};

/// Format a byte count in human-readable form (KiB, MiB, ...)
pub fn format_size(size: u64) -> String {
    human_format_size(size, BINARY)
}

/// Format a size given in MiB
pub fn format_mib(mib: f64) -> String {
    format_size((mib.max(0.0) * 1024.0 * 1024.0) as u64)
}

/// Format a duration in seconds as `1d 2h 3m 4s`, dropping leading zero units
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Format timestamp in local time (YYYY-MM-DD HH:MM:SS)
pub fn format_time(time: DateTime<Utc>) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Color a percentage green/yellow/red against warning and critical levels
pub fn colored_percent(value: f32, warning: f32, critical: f32) -> ColoredString {
    let text = format!("{:.1}%", value);
    if value >= critical {
        text.red().bold()
    } else if value >= warning {
        text.yellow()
    } else {
        text.green()
    }
}

pub fn running_badge(running: bool) -> ColoredString {
    if running {
        "● running".green().bold()
    } else {
        "○ stopped".dimmed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert!(format_size(1536).ends_with("KiB"));
        assert_eq!(format_size(1024 * 1024), "1 MiB");
        assert_eq!(format_mib(1.0), "1 MiB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(5), "5s");
        assert_eq!(format_uptime(125), "2m 5s");
        assert_eq!(format_uptime(3_725), "1h 2m 5s");
        assert_eq!(format_uptime(90_061), "1d 1h 1m 1s");
    }
}
