use anyhow::{Context, Result};
use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

const LOG_ENV: &str = "RUST_LOG";

/// Install the logger. `RUST_LOG`, when set, takes precedence over the level
/// later passed to [`set_level`]. Fails if a logger is already installed.
pub fn init_logging() -> Result<()> {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Trace);
    if let Ok(spec) = std::env::var(LOG_ENV) {
        builder.parse_filters(&spec);
    }
    builder.try_init().context("installing the logger")?;
    if std::env::var_os(LOG_ENV).is_none() {
        log::set_max_level(LevelFilter::Info);
    }
    Ok(())
}

/// Apply the configured level, unless `RUST_LOG` chose one.
pub fn set_level(level: LevelFilter) {
    if std::env::var_os(LOG_ENV).is_none() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        // no other test in this crate installs a logger
        init_logging().unwrap();
        let err = init_logging().unwrap_err();
        assert!(format!("{err:#}").contains("installing the logger"));
    }
}
