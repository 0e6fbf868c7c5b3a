// lxishot command-line tool -- capture screenshots from LXI instruments
// over VXI-11.
//
// Usage:
//   lxishot screenshot --address 192.168.1.50
//   lxishot screenshot --address 192.168.1.50 --plugin lecroy-wp --output scope.png
//   lxishot screenshot --address 192.168.1.50 --port 1024 --timeout 10000
//   lxishot identify --address 192.168.1.50
//   lxishot plugins

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use lxishot::transport::Vxi11Connector;
use lxishot::{Connector, FileDump, PluginRegistry, ScreenshotPlugin};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Capture screenshots from LXI instruments.
#[derive(Parser, Debug)]
#[command(name = "lxishot", version, about)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

/// How to reach the instrument.
#[derive(clap::Args, Debug)]
struct Target {
    /// Instrument IP address or host name.
    #[arg(short, long)]
    address: String,

    /// Timeout for connecting, sending, and receiving, in milliseconds.
    #[arg(short, long, default_value_t = 5000)]
    timeout: u64,

    /// VXI-11 core channel port. Looked up through the portmapper when
    /// omitted.
    #[arg(long)]
    port: Option<u16>,

    /// VXI-11 device name.
    #[arg(long, default_value = "inst0")]
    device: String,
}

impl Target {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    fn connector(&self) -> Vxi11Connector {
        let connector = Vxi11Connector::new().device(&self.device);
        match self.port {
            Some(port) => connector.port(port),
            None => connector,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture a screenshot and save it to a file.
    Screenshot {
        #[command(flatten)]
        target: Target,

        /// Plugin to use (see `lxishot plugins`). Chosen from the
        /// instrument's *IDN? response when omitted.
        #[arg(short, long)]
        plugin: Option<String>,

        /// Output file. Defaults to
        /// screenshot_<address>_<date>_<time>.<extension>.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the instrument's *IDN? response.
    Identify {
        #[command(flatten)]
        target: Target,
    },

    /// List available screenshot plugins.
    Plugins,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_screenshot(target: &Target, plugin: Option<&str>, output: Option<PathBuf>) -> Result<()> {
    let connector = Arc::new(target.connector());
    let mut sink = FileDump::new(&target.address);
    if let Some(path) = output {
        sink = sink.output(path);
    }
    let registry = lxishot::default_registry(connector.clone(), Arc::new(sink));

    let (plugin, id) = match plugin {
        Some(name) => (registry.find(name)?, String::new()),
        None => {
            let id = lxishot::identify(connector.as_ref(), &target.address, target.timeout())
                .await
                .context("failed to identify instrument (use --plugin to skip)")?;
            (select_plugin(&registry, &id)?, id)
        }
    };

    info!(plugin = plugin.info().name, address = %target.address, "Capturing screenshot");
    plugin
        .screenshot(&target.address, &id, target.timeout())
        .await
        .with_context(|| format!("screenshot from {} failed", target.address))
}

fn select_plugin<'a>(registry: &'a PluginRegistry, id: &str) -> Result<&'a dyn ScreenshotPlugin> {
    let plugin = registry.match_id(id)?;
    info!(plugin = plugin.info().name, id, "Selected plugin");
    Ok(plugin)
}

async fn cmd_identify(target: &Target) -> Result<()> {
    let connector = target.connector();
    let id = lxishot::identify(&connector as &dyn Connector, &target.address, target.timeout())
        .await
        .with_context(|| format!("failed to identify {}", target.address))?;
    println!("{id}");
    Ok(())
}

fn cmd_plugins() -> Result<()> {
    let registry = lxishot::default_registry(
        Arc::new(Vxi11Connector::new()),
        Arc::new(FileDump::new("")),
    );
    println!("{:<16}  Description", "Name");
    println!("{:<16}  {}", "-".repeat(16), "-".repeat(40));
    for info in registry.infos() {
        println!("{:<16}  {}", info.name, info.description);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Screenshot {
            target,
            plugin,
            output,
        } => cmd_screenshot(&target, plugin.as_deref(), output).await,
        Command::Identify { target } => cmd_identify(&target).await,
        Command::Plugins => cmd_plugins(),
    }
}
