//! Connection middleware printing all raw traffic
//!
//! Wraps any [`Connection`] and prints every inbound and outbound report.
//! Printing happens on the delivery thread, so monitoring adds latency to
//! the inbound path; it is a debugging aid.
//!
//! ```ignore
//! let conn = discovery.open(&info)?;
//! let conn = MonitoredConnection::wrap(conn, MonitorConfig::default());
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::error::TransportError;
use crate::types::ConnectionInfo;
use crate::{Connection, RawEventHandler};

/// Which direction of traffic to print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrafficFilter {
    #[default]
    All,
    Inbound,
    Outbound,
}

impl FromStr for TrafficFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" | "" => Ok(Self::All),
            "in" | "inbound" => Ok(Self::Inbound),
            "out" | "outbound" => Ok(Self::Outbound),
            _ => Err(format!("Unknown filter: {}", s)),
        }
    }
}

/// Configuration for the monitor
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    /// Print full hex dumps instead of only the report id and length
    pub show_hex: bool,
    /// Direction filter
    pub filter: TrafficFilter,
}

impl MonitorConfig {
    pub fn with_hex(mut self, show: bool) -> Self {
        self.show_hex = show;
        self
    }

    pub fn with_filter(mut self, filter: TrafficFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Clone)]
struct Printer {
    config: MonitorConfig,
    path: String,
    start: Instant,
}

impl Printer {
    fn print(&self, arrow: &str, data: &[u8]) {
        let ts = self.start.elapsed().as_secs_f64();
        let report_id = data.first().copied().unwrap_or(0);
        if self.config.show_hex {
            let hex: Vec<String> = data.iter().map(|b| format!("{b:02x}")).collect();
            println!(
                "[{ts:9.3}] {arrow} {} id=0x{report_id:02x} len={} {}",
                self.path,
                data.len(),
                hex.join(" ")
            );
        } else {
            println!(
                "[{ts:9.3}] {arrow} {} id=0x{report_id:02x} len={}",
                self.path,
                data.len()
            );
        }
    }

    fn inbound(&self, data: &[u8]) {
        if self.config.filter != TrafficFilter::Outbound {
            self.print("<-", data);
        }
    }

    fn outbound(&self, data: &[u8]) {
        if self.config.filter != TrafficFilter::Inbound {
            self.print("->", data);
        }
    }
}

/// Connection middleware that prints all reports
pub struct MonitoredConnection {
    inner: Arc<dyn Connection>,
    printer: Printer,
}

impl MonitoredConnection {
    /// Wrap a connection with the printing middleware
    pub fn wrap(connection: Arc<dyn Connection>, config: MonitorConfig) -> Arc<dyn Connection> {
        let printer = Printer {
            config,
            path: connection.info().path.clone(),
            start: Instant::now(),
        };
        Arc::new(Self {
            inner: connection,
            printer,
        })
    }
}

impl Connection for MonitoredConnection {
    fn info(&self) -> &ConnectionInfo {
        self.inner.info()
    }

    fn parse_descriptors(&self) -> Result<(), TransportError> {
        self.inner.parse_descriptors()
    }

    fn start_delivery(&self, handler: RawEventHandler) -> Result<(), TransportError> {
        let printer = self.printer.clone();
        let wrapped: RawEventHandler = Arc::new(move |data: &[u8]| {
            printer.inbound(data);
            handler(data);
        });
        self.inner.start_delivery(wrapped)
    }

    fn stop_delivery(&self) {
        self.inner.stop_delivery()
    }

    fn send_raw_report(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.printer.outbound(data);
        self.inner.send_raw_report(data)
    }
}
