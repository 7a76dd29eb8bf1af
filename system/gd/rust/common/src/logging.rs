use log::LevelFilter;

/// Environment variable holding the level tag for the adapter stack.
pub const LOG_LEVEL_ENV: &str = "BT_LOG_LEVEL";

pub const LOG_TAG_FATAL: &str = "LOG_FATAL";
pub const LOG_TAG_ERROR: &str = "LOG_ERROR";
pub const LOG_TAG_WARN: &str = "LOG_WARN";
pub const LOG_TAG_NOTICE: &str = "LOG_NOTICE";
pub const LOG_TAG_INFO: &str = "LOG_INFO";
pub const LOG_TAG_DEBUG: &str = "LOG_DEBUG";
pub const LOG_TAG_VERBOSE: &str = "LOG_VERBOSE";

/// Maps a level tag (`LOG_DEBUG`, `LOG_INFO`, ...) to a log level. Unknown tags map to info.
pub fn level_from_tag(tag: &str) -> log::Level {
    match tag {
        LOG_TAG_FATAL => log::Level::Error,
        LOG_TAG_ERROR => log::Level::Error,
        LOG_TAG_WARN => log::Level::Warn,
        LOG_TAG_NOTICE => log::Level::Info,
        LOG_TAG_INFO => log::Level::Info,
        LOG_TAG_DEBUG => log::Level::Debug,
        LOG_TAG_VERBOSE => log::Level::Trace,
        _ => log::Level::Info, // default level
    }
}

fn get_log_level() -> log::Level {
    match std::env::var(LOG_LEVEL_ENV) {
        Ok(tag) => level_from_tag(&tag),
        Err(_) => log::Level::Info,
    }
}

/// Inits logging for host
pub fn init_logging() {
    init_logging_with_level(get_log_level().to_level_filter());
}

/// Inits stderr logging at the given level. Safe to call more than once.
pub fn init_logging_with_level(level: LevelFilter) {
    env_logger::Builder::new().filter(None, level).parse_default_env().try_init().ok();
    log::set_max_level(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_tag() {
        assert_eq!(level_from_tag(LOG_TAG_VERBOSE), log::Level::Trace);
        assert_eq!(level_from_tag(LOG_TAG_DEBUG), log::Level::Debug);
        assert_eq!(level_from_tag(LOG_TAG_NOTICE), log::Level::Info);
        assert_eq!(level_from_tag(LOG_TAG_FATAL), log::Level::Error);
        assert_eq!(level_from_tag("bogus"), log::Level::Info);
    }
}
