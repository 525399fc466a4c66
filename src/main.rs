//! SetuIO server
//!
//! Loads a device configuration, publishes every device on one connection
//! and ticks them until interrupted.

use setu_io::config::{Config, ConnectionKind};
use setu_io::connection::{LoopbackConnection, SharedConnection, TcpConnection};
use setu_io::core::Aggregator;
use setu_io::devices::create_device;
use setu_io::error::{Error, Result};
use parking_lot::Mutex;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const DEFAULT_CONFIG: &str = "/etc/setu.toml";

/// Config file named by `--config <path>`, `-c <path>` or a bare path
fn config_path(mut args: impl Iterator<Item = String>) -> Result<PathBuf> {
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| Error::InvalidParameter(format!("{} needs a path", arg)))?;
                path = Some(PathBuf::from(value));
            }
            flag if flag.starts_with('-') => {
                return Err(Error::InvalidParameter(format!("unknown option {}", flag)));
            }
            _ if path.is_none() => path = Some(PathBuf::from(&arg)),
            _ => return Err(Error::InvalidParameter(format!("unexpected argument {}", arg))),
        }
    }
    Ok(path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)))
}

fn open_connection(config: &Config) -> Result<SharedConnection> {
    Ok(match config.connection.kind {
        ConnectionKind::Tcp => {
            let tcp = TcpConnection::bind(config.connection.bind.as_str())?;
            if let Some(addr) = tcp.local_addr() {
                log::info!("Serving on {}", addr);
            }
            Arc::new(Mutex::new(tcp))
        }
        ConnectionKind::Loopback => {
            log::info!("Serving on in-process loopback");
            Arc::new(Mutex::new(LoopbackConnection::new().without_sent_log()))
        }
    })
}

fn main() -> Result<()> {
    let config_path = config_path(env::args().skip(1))?;
    let config = Config::load(&config_path)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("SetuIO v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", config_path.display());

    let connection = open_connection(&config)?;
    let mut aggregator = Aggregator::with_connection(connection.clone());
    for device in &config.devices {
        aggregator.add(create_device(device, connection.clone())?);
    }
    if aggregator.is_empty() {
        log::warn!("No devices configured");
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let interval = Duration::from_micros(config.server.tick_interval_us);
    let mut failed = 0;
    while running.load(Ordering::Relaxed) {
        let summary = aggregator.tick();
        if summary.failed > 0 {
            failed += summary.failed;
            log::warn!(
                "{} device(s) failed, {} of {} still live",
                failed,
                aggregator.live_count(),
                aggregator.len()
            );
        }
        thread::sleep(interval);
    }

    for (name, status) in aggregator.statuses() {
        log::info!("{}: {:?}", name, status);
    }
    aggregator.shutdown()?;
    log::info!("SetuIO stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<PathBuf> {
        config_path(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_config_path_forms() {
        assert_eq!(parse(&[]).unwrap(), PathBuf::from(DEFAULT_CONFIG));
        assert_eq!(parse(&["lab.toml"]).unwrap(), PathBuf::from("lab.toml"));
        assert_eq!(parse(&["-c", "a.toml"]).unwrap(), PathBuf::from("a.toml"));
        assert_eq!(parse(&["--config", "b.toml"]).unwrap(), PathBuf::from("b.toml"));
    }

    #[test]
    fn test_config_path_rejects_bad_arguments() {
        assert!(matches!(parse(&["--config"]), Err(Error::InvalidParameter(_))));
        assert!(matches!(parse(&["--verbose"]), Err(Error::InvalidParameter(_))));
        assert!(matches!(parse(&["a.toml", "b.toml"]), Err(Error::InvalidParameter(_))));
    }
}
