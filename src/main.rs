use anyhow::{Context, Result, bail};
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use lumin_bridge::app::{BridgeService, Command, read_console};
use lumin_bridge::config::BridgeConfig;
use lumin_bridge::port::{PortProvider, SystemPorts};
use lumin_bridge::probe::{identify, probe_port};

mod cli;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    let mut config = BridgeConfig::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    let provider: Arc<dyn PortProvider> = Arc::new(SystemPorts);

    match args.cmd {
        cli::Cmd::Ports => list_ports(provider.as_ref()),
        cli::Cmd::Probe(opts) => {
            opts.hs.apply(&mut config);
            config.validate()?;
            probe(provider.as_ref(), &config, opts.port)
        }
        cli::Cmd::Run(opts) => {
            opts.apply(&mut config);
            config.validate()?;
            run(provider, &config)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("RUST_LOG")
                .with_default_directive(default.into())
                .from_env_lossy(),
        )
        .init();
}

fn list_ports(provider: &dyn PortProvider) -> Result<()> {
    let ports = provider.available_ports().context("listing serial ports")?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for p in ports {
        println!("{}", p);
    }
    Ok(())
}

fn probe(provider: &dyn PortProvider, config: &BridgeConfig, port: Option<String>) -> Result<()> {
    let hs = config.handshake();
    if let Some(port) = port {
        probe_port(provider, &port, &hs).with_context(|| format!("probing {}", port))?;
        println!("{}", port);
        return Ok(());
    }
    let candidates = provider.available_ports().context("listing serial ports")?;
    match identify(provider, &candidates, &hs, &AtomicBool::new(false)) {
        Some(port) => {
            println!("{}", port);
            Ok(())
        }
        None => bail!("no port answered {:?} with {:?}", hs.message, hs.expected),
    }
}

fn run(provider: Arc<dyn PortProvider>, config: &BridgeConfig) -> Result<()> {
    let mut service = BridgeService::from_config(config, provider)?;
    let cancel = service.cancel_handle();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupted, shutting down");
            cancel.store(true, Ordering::SeqCst);
        })
        .context("installing Ctrl-C handler")?;
    }
    let (tx, rx) = mpsc::channel();
    spawn_console(tx, cancel);
    service.run(rx)
}

fn spawn_console(tx: Sender<Command>, cancel: Arc<AtomicBool>) {
    thread::spawn(move || read_console(std::io::stdin().lock(), &tx, &cancel));
}
