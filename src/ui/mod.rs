// User interface helpers for the command handlers

pub mod formatters;

pub use formatters::{
    colored_percent, format_mib, format_size, format_time, format_uptime, running_badge,
};
