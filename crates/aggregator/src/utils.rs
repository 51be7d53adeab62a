use slog::{o, Drain, Level, Logger};
use std::env;

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

/// Root logger for embedding applications. Without an explicit level,
/// `RUST_LOG` is consulted and anything unrecognised means info.
pub fn setup_logger(level: Option<&str>) -> Logger {
    let log_level = match level {
        Some(level) => parse_level(level),
        None => parse_level(&env::var("RUST_LOG").unwrap_or_default()),
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(parse_level("WARN"), Level::Warning);
        assert_eq!(parse_level("trace"), Level::Trace);
        assert_eq!(parse_level("verbose"), Level::Info);
        assert_eq!(parse_level(""), Level::Info);
    }
}
