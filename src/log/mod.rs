#![allow(unused_macros)]
use self::simple_logger::SimpleLogger;
use std::fmt;
use std::ops::Deref;

mod simple_logger;

macro_rules! logger_macro {
    ($name:ident is $rule_level:ident to $target:expr, $d:tt) => {
        macro_rules! $name {
            ($d($d arg:tt)+) => (::log::log!(target: $target, ::log::Level::$rule_level, $d($d arg)+));
        }

        pub(crate) use $name;
    };
    ($name:ident is $rule_level:ident to $target:expr) => {
        logger_macro!($name is $rule_level to $target, $);
    };
}

logger_macro!(user_error is Error to "sysdep::user");
logger_macro!(user_warn is Warn to "sysdep::user");
logger_macro!(user_info is Info to "sysdep::user");

macro_rules! dev_logger_macro {
    ($name:ident is $rule_level:ident to $target:expr, $d:tt) => {
        macro_rules! $name {
            ($d($d arg:tt)+) => {
                if std::cfg!(feature = "dev") {
                    (::log::log!(
                        target: $target,
                        ::log::Level::$rule_level,
                        "{}: {}",
                        std::panic::Location::caller(),
                        format_args!($d($d arg)+)
                    ));
                }
            };
        }

        pub(crate) use $name;
    };
    ($name:ident is $rule_level:ident to $target:expr) => {
        dev_logger_macro!($name is $rule_level to $target, $);
    };
}

dev_logger_macro!(dev_error is Error to "sysdep::dev");
dev_logger_macro!(dev_warn is Warn to "sysdep::dev");
dev_logger_macro!(dev_info is Info to "sysdep::dev");
dev_logger_macro!(dev_debug is Debug to "sysdep::dev");

/// Routes log records to a sink chosen by the record's target prefix.
#[derive(Default)]
pub struct SysdepLogger(Vec<(String, Box<dyn Log>)>);

impl SysdepLogger {
    pub fn new(prefix: &'static str) -> Self {
        let mut logger: Self = Default::default();

        logger.add_logger("sysdep::user", SimpleLogger::to_stderr(prefix));

        #[cfg(feature = "dev")]
        {
            let path = option_env!("SYSDEP_DEV_LOGS")
                .map(|s| s.into())
                .unwrap_or_else(|| {
                    std::env::temp_dir().join(format!("sysdep-dev-{}.log", std::process::id()))
                });
            if let Ok(file_logger) = SimpleLogger::to_file(path, "") {
                logger.add_logger("sysdep::dev", file_logger);
            }
        }

        logger
    }

    /// Install this logger as the global `log` sink.
    ///
    /// Fails if another logger was installed first.
    pub fn into_global_logger(self) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(self)).map(|()| log::set_max_level(log::LevelFilter::Trace))
    }

    /// Add a logger for a specific prefix to the stack
    fn add_logger(
        &mut self,
        prefix: impl ToString + Deref<Target = str>,
        logger: impl Log + 'static,
    ) {
        let prefix = if prefix.ends_with("::") {
            prefix.to_string()
        } else {
            // given a prefix `my::prefix`, we want to match `my::prefix::somewhere`
            // but not `my::prefix_to_somewhere`
            format!("{}::", prefix.to_string())
        };
        self.0.push((prefix, Box::new(logger)))
    }
}

impl log::Log for SysdepLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level() && metadata.level() <= log::STATIC_MAX_LEVEL
    }

    fn log(&self, record: &log::Record) {
        for (prefix, l) in self.0.iter() {
            if record.target() == &prefix[..prefix.len() - 2] || record.target().starts_with(prefix)
            {
                let level = match record.level() {
                    log::Level::Error => Level::Error,
                    log::Level::Warn => Level::Warn,
                    log::Level::Info => Level::Info,
                    log::Level::Debug => Level::Debug,
                    log::Level::Trace => Level::Trace,
                };
                l.log(level, record.args());
            }
        }
    }

    fn flush(&self) {
        for (_, l) in self.0.iter() {
            l.flush();
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

trait Log: Send + Sync {
    fn log(&self, level: Level, args: &fmt::Arguments<'_>);
    fn flush(&self);
}

#[cfg(test)]
mod tests {
    use super::SysdepLogger;

    #[test]
    fn can_construct_logger() {
        let logger = SysdepLogger::new("sysdep: ");
        let len = if cfg!(feature = "dev") { 2 } else { 1 };
        assert_eq!(logger.0.len(), len);
    }

    #[test]
    fn prefix_matching_is_segment_aware() {
        let mut logger = SysdepLogger::default();
        logger.add_logger("a::b", super::SimpleLogger::to_stderr(""));
        logger.add_logger("c::", super::SimpleLogger::to_stderr(""));
        assert_eq!(logger.0[0].0, "a::b::");
        assert_eq!(logger.0[1].0, "c::");
    }
}
