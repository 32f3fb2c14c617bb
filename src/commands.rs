//! Command handlers

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use lgx_driver::drivers::{self, EventSender};
use lgx_driver::{Config, ConnectionController, ConnectionMonitor, DriverRegistry};
use lgx_transport::{
    ConnectionInfo, ConnectionSource, HidDiscovery, MonitorConfig, MonitoredConnection,
    TrafficFilter,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Create the traffic monitor config if monitoring is enabled
pub fn create_monitor_config(
    monitor: bool,
    hex: bool,
    filter: Option<&str>,
) -> anyhow::Result<Option<MonitorConfig>> {
    if !monitor {
        return Ok(None);
    }
    let filter = match filter {
        Some(f) => f.parse::<TrafficFilter>().map_err(anyhow::Error::msg)?,
        None => TrafficFilter::All,
    };
    Ok(Some(MonitorConfig::default().with_hex(hex).with_filter(filter)))
}

/// Discovery with every built-in driver registered on it
fn open_registry(
    config: &Config,
    events: &EventSender,
) -> anyhow::Result<(Arc<HidDiscovery>, Arc<DriverRegistry>)> {
    let discovery = Arc::new(HidDiscovery::new(config.queue.max_report_size));
    let registry = DriverRegistry::with_drivers(
        discovery.clone(),
        drivers::builtin(config, events),
    )?;
    Ok((discovery, Arc::new(registry)))
}

pub fn drivers(config: &Config) {
    let events = EventSender::new();
    println!("{:<18} {:<10} IDENTITY", "DRIVER", "TYPE");
    for descriptor in drivers::builtin(config, &events) {
        println!(
            "{:<18} {:<10} {}",
            descriptor.name,
            descriptor.device_type.to_string(),
            descriptor.id
        );
    }
}

#[derive(Serialize)]
struct Listed<'a> {
    #[serde(flatten)]
    info: &'a ConnectionInfo,
    driver: String,
}

pub fn list(config: &Config, json: bool) -> anyhow::Result<()> {
    let events = EventSender::new();
    let (discovery, registry) = open_registry(config, &events)?;
    let connections = discovery.list_connections()?;

    let listed: Vec<Listed> = connections
        .iter()
        .map(|info| Listed {
            info,
            driver: registry
                .resolve(info.id)
                .map(|d| d.name.clone())
                .unwrap_or_default(),
        })
        .collect();
    registry.shutdown();

    if json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    if listed.is_empty() {
        println!("No supported devices found");
        return Ok(());
    }
    for entry in &listed {
        println!(
            "{:<16} {:<24} {:<18} {}",
            entry.info.path,
            entry.info.id.to_string(),
            entry.driver,
            entry.info.product_name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn run(
    config: &Config,
    monitor: Option<MonitorConfig>,
    print_events: bool,
) -> anyhow::Result<()> {
    let events = EventSender::new();
    let (discovery, registry) = open_registry(config, &events)?;
    let controller = Arc::new(ConnectionController::new(
        Arc::clone(&registry),
        config.controller(),
    ));

    let mut connection_monitor = ConnectionMonitor::new(controller, discovery);
    if let Some(monitor) = monitor {
        connection_monitor = connection_monitor.with_traffic_monitor(monitor);
    }

    if print_events {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => println!(
                        "{:<8} {} {}",
                        event.device_type.to_string(),
                        event.device,
                        hex_string(&event.report)
                    ),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event printer lagged, {} events skipped", n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    info!(
        "Watching for devices every {} ms, Ctrl+C to stop",
        config.discovery.poll_interval_ms
    );
    Arc::new(connection_monitor)
        .run_until(config.poll_interval(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    registry.shutdown();
    Ok(())
}

pub fn send(
    config: &Config,
    monitor: Option<MonitorConfig>,
    path: &str,
    hex: &[String],
) -> anyhow::Result<()> {
    let report = parse_hex(hex)?;
    let events = EventSender::new();
    let (discovery, registry) = open_registry(config, &events)?;

    let info = discovery
        .list_connections()?
        .into_iter()
        .find(|c| c.path == path)
        .with_context(|| format!("no supported device at {path}"))?;
    let mut connection = discovery.open(&info)?;
    if let Some(monitor) = monitor {
        connection = MonitoredConnection::wrap(connection, monitor);
    }

    let controller = ConnectionController::new(Arc::clone(&registry), config.controller());
    let device = controller
        .attach(connection)?
        .with_context(|| format!("no driver for {}", info.id))?;

    let queued = device.enqueue_outbound(&report);
    device.output_queue().flush();
    controller.detach(path);
    registry.shutdown();

    queued?;
    println!("Sent {} bytes to {}", report.len(), path);
    Ok(())
}

pub fn config(config_path: &Path, init: bool) -> anyhow::Result<()> {
    if init {
        if config_path.exists() {
            bail!("{} already exists", config_path.display());
        }
        Config::default().save(config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let config = Config::load(config_path)?;
    println!("# {}", config_path.display());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Parse report bytes given as hex, in one or several arguments
fn parse_hex(args: &[String]) -> anyhow::Result<Vec<u8>> {
    let mut digits = String::new();
    for arg in args {
        for token in arg.split(|c: char| c.is_whitespace() || c == ':' || c == ',') {
            let token = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            if token.len() % 2 == 1 {
                digits.push('0');
            }
            digits.push_str(token);
        }
    }
    if digits.is_empty() {
        bail!("empty report");
    }
    if let Some(c) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        bail!("invalid hex digit '{c}'");
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| Ok(u8::from_str_radix(&digits[i..i + 2], 16)?))
        .collect()
}

fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_hex_forms() {
        let expected = vec![0x10, 0xFF, 0x81, 0x00];
        assert_eq!(parse_hex(&args(&["10ff8100"])).unwrap(), expected);
        assert_eq!(parse_hex(&args(&["10", "ff", "81", "00"])).unwrap(), expected);
        assert_eq!(parse_hex(&args(&["0x10 0xFF:81,00"])).unwrap(), expected);
        assert_eq!(parse_hex(&args(&["1", "f"])).unwrap(), vec![0x01, 0x0F]);
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert!(parse_hex(&args(&["zz"])).is_err());
        assert!(parse_hex(&args(&[""])).is_err());
    }

    #[test]
    fn test_monitor_config() {
        assert!(create_monitor_config(false, true, None).unwrap().is_none());
        let config = create_monitor_config(true, true, Some("in")).unwrap().unwrap();
        assert!(config.show_hex);
        assert_eq!(config.filter, TrafficFilter::Inbound);
        assert!(create_monitor_config(true, false, Some("up")).is_err());
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x10, 0xff, 0x01]), "10 ff 01");
    }
}
