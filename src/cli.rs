// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lgx_driver")]
#[command(author, version, about = "Logitech MX5500 userspace driver")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: ~/.config/lgx-driver/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Print all raw reports on attached connections
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Show raw hex dumps with --monitor
    #[arg(long, global = true)]
    pub hex: bool,

    /// Traffic direction shown by --monitor (all, in, out)
    #[arg(long, global = true)]
    pub filter: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List built-in drivers and the identities they claim
    Drivers,

    /// List connected devices a built-in driver can handle
    #[command(visible_alias = "ls")]
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Attach drivers and follow hot-plug until interrupted
    Run {
        /// Print every input event published by the drivers
        #[arg(long)]
        events: bool,
    },

    /// Send one raw output report through a device's output queue
    Send {
        /// hidraw path of the connection (see `list`)
        #[arg(long)]
        path: String,

        /// Report bytes in hex, report id first (e.g. "10 ff 81 00" or 10ff8100)
        #[arg(required = true, num_args = 1..)]
        hex: Vec<String>,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration file if it does not exist
        #[arg(long)]
        init: bool,
    },
}
