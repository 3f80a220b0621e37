use crate::common::config::LoggerConfig;
use log::{debug, error, info, trace, warn, LevelFilter};
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};
use std::fs;
use std::path::Path;
use std::str::FromStr;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}\n";

pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or(LevelFilter::Info)
}

/// Probe narration goes to stdout, so log output stays on stderr and, when
/// `path` is set, in a size-rolled log file.
pub fn setup_logger(config: &LoggerConfig) -> Result<log4rs::Handle, Box<dyn std::error::Error>> {
    let level = parse_level(&config.level);

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let mut builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = &config.path {
        let trigger = SizeTrigger::new(config.file_size * 1024 * 1024);
        let roller = FixedWindowRoller::builder()
            .base(0)
            .build(&config.archive_pattern, config.file_count)?;
        let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }

        let logfile = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(path, Box::new(policy))?;

        builder = builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
    }

    let runtime_config = builder.build(root.build(level))?;
    let handle = log4rs::init_config(runtime_config)?;

    match level {
        LevelFilter::Trace => trace!("Logger initialized (trace)"),
        LevelFilter::Debug => debug!("Logger initialized (debug)"),
        LevelFilter::Info => info!("Logger initialized (info)"),
        LevelFilter::Warn => warn!("Logger initialized (warn)"),
        LevelFilter::Error => error!("Logger initialized (error)"),
        LevelFilter::Off => (),
    }

    if let Some(path) = &config.path {
        info!(
            "Log file: '{}', archive: '{}'",
            path, config.archive_pattern
        );
    }

    Ok(handle)
}
