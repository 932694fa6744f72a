use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use lumin_bridge::config::BridgeConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "lumin-bridge", about = "Serial bridge between a Lumin panel and host displays/audio")]
pub struct Cli {
    /// TOML config file (defaults are used if it does not exist)
    #[arg(long, global = true, default_value = "lumin-bridge.toml")]
    pub config: PathBuf,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// List serial ports
    Ports,
    /// Send the handshake to each port and report which one answers
    Probe(ProbeOpts),
    /// Run the bridge
    Run(RunOpts),
}

#[derive(Args, Debug, Clone)]
pub struct HandshakeOpts {
    /// Baud rate
    #[arg(long)]
    pub baud: Option<u32>,
    /// Per-port handshake timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ProbeOpts {
    #[command(flatten)]
    pub hs: HandshakeOpts,
    /// Probe only this port
    #[arg(long)]
    pub port: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunOpts {
    #[command(flatten)]
    pub hs: HandshakeOpts,
    /// Use this port without probing
    #[arg(long)]
    pub port: Option<String>,
    /// Resend all devices every N milliseconds (0 = never)
    #[arg(long)]
    pub resync_ms: Option<u64>,
}

impl HandshakeOpts {
    /// Command-line values win over the config file.
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(baud) = self.baud {
            config.serial.baud = baud;
        }
        if let Some(ms) = self.timeout_ms {
            config.serial.probe_timeout_ms = ms;
        }
    }
}

impl RunOpts {
    pub fn apply(&self, config: &mut BridgeConfig) {
        self.hs.apply(config);
        if let Some(port) = &self.port {
            config.serial.port = Some(port.clone());
        }
        if let Some(ms) = self.resync_ms {
            config.serial.resync_interval_ms = ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_overrides_config() {
        let cli = Cli::try_parse_from([
            "lumin-bridge",
            "run",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "9600",
            "--resync-ms",
            "1000",
        ])
        .unwrap();
        let Cmd::Run(opts) = cli.cmd else {
            panic!("expected run");
        };
        let mut config = BridgeConfig::default();
        opts.apply(&mut config);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.baud, 9600);
        assert_eq!(config.serial.resync_interval_ms, 1000);
        assert_eq!(config.serial.probe_timeout_ms, 100);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["lumin-bridge", "ports", "-v", "--config", "x.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }
}
