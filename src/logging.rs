//! Timestamped log output
//!
//! Every line the harness prints starts with the local wall-clock time in
//! `YYYY-MM-DD HH:MM:SS` form, followed by the message. Lines are written
//! to stdout in a single write so lines coming from the monitor threads and
//! from the test flow never interleave mid-line.

use chrono::{DateTime, Local, TimeZone};
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::io::Write;

/// Layout of the timestamp prefix
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render one log line with its timestamp prefix
pub fn format_line<Tz>(at: &DateTime<Tz>, message: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{} {}", at.format(TIMESTAMP_FORMAT), message)
}

/// Build the logger used by the harness
///
/// `RUST_LOG` takes precedence over `default_level`; `verbose` forces
/// debug output regardless of both.
pub fn builder(default_level: &str, verbose: bool) -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_level));
    builder.target(Target::Stdout).format(|buf, record| {
        let line = format_line(&Local::now(), &record.args().to_string());
        writeln!(buf, "{line}")
    });
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder
}

/// Install the harness logger; later calls are ignored
pub fn init(default_level: &str, verbose: bool) {
    let _ = builder(default_level, verbose).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_format_line_prefix() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(
            format_line(&at, "Start system monitoring"),
            "2024-03-07 09:05:01 Start system monitoring"
        );
    }

    #[test]
    fn test_format_line_keeps_local_wall_clock() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let at = offset.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert!(format_line(&at, "x").starts_with("2024-12-31 23:59:59 "));
    }

    #[test]
    fn test_init_is_idempotent() {
        init("info", false);
        init("debug", true);
    }
}
