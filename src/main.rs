use crate::common::config::{Config, ConfigError};
use crate::common::logger;
use crate::probe::{run_probe, Endpoint, ProbeOptions, ProbeResult};
use clap::Parser;
use log::LevelFilter;

mod common;
mod net;
mod probe;

/// Fallback logger that writes to stderr when log4rs fails to initialise.
struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= LevelFilter::Info
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Check that a SOCKS5 proxy completes a no-auth CONNECT", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    #[arg(short, long, value_name = "ADDRESS")]
    proxy: Option<String>,

    /// May be given more than once; each target is probed concurrently
    #[arg(short, long, value_name = "ADDRESS")]
    target: Vec<String>,

    #[arg(long, value_name = "SECONDS")]
    connect_timeout: Option<u64>,

    #[arg(long, value_name = "SECONDS")]
    io_timeout: Option<u64>,

    #[arg(long)]
    strict_method: bool,

    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn load_config(args: Args) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(proxy) = args.proxy {
        config.proxy_address = proxy;
    }
    if !args.target.is_empty() {
        config.targets = args.target;
    }
    if let Some(connect_timeout) = args.connect_timeout {
        config.connect_timeout = connect_timeout;
    }
    if let Some(io_timeout) = args.io_timeout {
        config.io_timeout = io_timeout;
    }
    if args.strict_method {
        config.strict_method = true;
    }
    if let Some(log_level) = args.log_level {
        config.log.level = log_level;
    }

    config.validate()?;
    Ok(config)
}

fn probe_plan(config: &Config) -> Result<(Endpoint, Vec<Endpoint>, ProbeOptions), ConfigError> {
    Ok((
        config.proxy()?,
        config.target_endpoints()?,
        config.probe_options()?,
    ))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = logger::setup_logger(&config.log) {
        eprintln!("Failed to initialize logger: {}", e);
        if log::set_boxed_logger(Box::new(SimpleLogger)).is_ok() {
            log::set_max_level(LevelFilter::Info);
        }
    }

    log::debug!("Starting with config: {:?}", config);

    let (proxy, targets, options) = match probe_plan(&config) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    println!("Probing SOCKS5 proxy at {}", proxy);

    let handles: Vec<_> = targets
        .into_iter()
        .map(|target| {
            (
                target,
                tokio::spawn(async move { run_probe(proxy, target, options).await }),
            )
        })
        .collect();

    let mut all_passed = true;
    for (target, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => ProbeResult::ProtocolError {
                message: format!("probe task failed: {}", e),
            },
        };
        all_passed &= result.is_success();
        match result {
            ProbeResult::Success { .. } => println!("PASS {}: {}", target, result),
            _ => println!("FAIL {}: {}", target, result),
        }
    }

    std::process::exit(if all_passed { 0 } else { 1 });
}
