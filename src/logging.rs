//! Logger setup for the binary

/// Install the global logger.
///
/// `RUST_LOG` takes precedence over `default_filter` when set.
pub fn init_logging(default_filter: &str) -> Result<(), log::SetLoggerError> {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) if !filters.trim().is_empty() => builder.parse_filters(&filters),
        _ => builder.parse_filters(default_filter),
    };
    builder.try_init()
}
