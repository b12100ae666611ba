//! Command-line surface of the client binary.
//!
//! Mirrors the classic `synergyc` flags: screen name, restart and daemon
//! toggles, Synergy log levels, an optional log file, the scroll delta, and
//! one positional `[host][:port]` server address.  Values from the config
//! file fill any flag the user did not pass.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use synergy_core::protocol::messages::DEFAULT_PORT;

use crate::client::ClientConfig;
use crate::config::AppConfig;

/// Exit code for invalid arguments.
pub const EXIT_ARGS: i32 = 3;

/// Version string shown by `--version`.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), ", protocol version 1.6");

// ── Log levels ────────────────────────────────────────────────────────────────

/// Synergy's log threshold names, kept for command-line compatibility and
/// mapped onto `tracing` levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    Fatal,
    Error,
    Warning,
    Note,
    Info,
    Debug,
    Debug1,
    Debug2,
}

impl LogLevel {
    /// The `EnvFilter` directive this threshold maps to.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Fatal | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Note | LogLevel::Info => "info",
            LogLevel::Debug | LogLevel::Debug1 => "debug",
            LogLevel::Debug2 => "trace",
        }
    }
}

// ── Address parsing ───────────────────────────────────────────────────────────

/// Errors in the `[host][:port]` server address.
///
/// A bad port is fatal regardless of the restart policy – a port never gets
/// better.  A host that does not resolve is only found out at connect time
/// and is retryable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid port in server address `{0}`")]
    BadPort(String),
}

/// Splits `[host][:port]` into its parts, applying defaults.
pub fn parse_server_address(address: &str) -> Result<(String, u16), AddressError> {
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| AddressError::BadPort(address.to_string()))?;
            (host, port)
        }
        None => (address, DEFAULT_PORT),
    };
    let host = if host.is_empty() {
        "127.0.0.1".to_string()
    } else {
        host.to_string()
    };
    Ok((host, port))
}

// ── CLI definition ────────────────────────────────────────────────────────────

/// Synergy client: shares the server's keyboard and mouse with this screen.
#[derive(Debug, Parser)]
#[command(
    name = "synergyc",
    about = "Connect to a synergy server and synthesize its input on this screen",
    version = VERSION
)]
pub struct Cli {
    /// Screen name announced to the server (default: this host's name).
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Run detached from the controlling terminal.
    #[arg(long, overrides_with = "no_daemon")]
    pub daemon: bool,

    /// Run in the foreground.
    #[arg(short = 'f', long, overrides_with = "daemon")]
    pub no_daemon: bool,

    /// Reconnect automatically when the connection is lost.
    #[arg(long, overrides_with = "no_restart")]
    pub restart: bool,

    /// Give up after the first failure instead of reconnecting.
    #[arg(short = '1', long, overrides_with = "restart")]
    pub no_restart: bool,

    /// Log threshold.
    #[arg(short = 'd', long, value_name = "LEVEL")]
    pub debug: Option<LogLevel>,

    /// Append log messages to this file.
    #[arg(short = 'l', long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Vertical scroll delta per wheel notch.
    #[arg(long, value_name = "DELTA")]
    pub yscroll: Option<i32>,

    /// Connect to the X server at this display (X11 only).
    #[arg(long, value_name = "DISPLAY")]
    pub display: Option<String>,

    /// Read settings from this file instead of the platform config path.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Accepted for backwards compatibility; has no effect.
    #[arg(long, hide = true)]
    pub camp: bool,

    /// Accepted for backwards compatibility; has no effect.
    #[arg(long = "no-camp", hide = true)]
    pub no_camp: bool,

    /// Server address as `[host][:port]`; port defaults to 24800.
    pub server: Option<String>,
}

/// Fully-resolved settings after merging CLI flags over the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub client: ClientConfig,
    pub restart: bool,
    pub daemon: bool,
    pub log_file: Option<PathBuf>,
    pub log_directive: String,
    pub display: Option<String>,
}

impl Cli {
    /// Merges these flags over `config`.  CLI values win; the config file
    /// fills the gaps; built-in defaults fill the rest.
    pub fn into_settings(self, config: &AppConfig) -> Result<Settings, AddressError> {
        let address = self
            .server
            .or_else(|| config.client.server.clone())
            .unwrap_or_default();
        let (host, port) = parse_server_address(&address)?;

        let name = self
            .name
            .or_else(|| config.client.name.clone())
            .unwrap_or_else(default_screen_name);

        let restart = if self.no_restart {
            false
        } else if self.restart {
            true
        } else {
            config.client.restart
        };

        let level = self.debug.unwrap_or(LogLevel::Note);

        Ok(Settings {
            client: ClientConfig {
                name,
                host,
                port,
                yscroll: self.yscroll.unwrap_or(config.client.yscroll),
            },
            restart,
            daemon: self.daemon && !self.no_daemon,
            log_file: self.log,
            log_directive: level.directive().to_string(),
            display: self.display,
        })
    }
}

/// This machine's name, used when `--name` is absent.
fn default_screen_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "synergy".to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(args: &[&str]) -> Settings {
        let mut argv = vec!["synergyc"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
            .into_settings(&AppConfig::default())
            .expect("valid settings")
    }

    #[test]
    fn test_positional_host_with_default_port() {
        let s = settings(&["server.example"]);
        assert_eq!(s.client.host, "server.example");
        assert_eq!(s.client.port, 24800);
    }

    #[test]
    fn test_positional_host_with_explicit_port() {
        let s = settings(&["server.example:2500"]);
        assert_eq!(s.client.port, 2500);
    }

    #[test]
    fn test_bare_port_defaults_host_to_loopback() {
        let s = settings(&[":2500"]);
        assert_eq!(s.client.host, "127.0.0.1");
        assert_eq!(s.client.port, 2500);
    }

    #[test]
    fn test_missing_server_defaults_to_loopback() {
        let s = settings(&[]);
        assert_eq!(s.client.host, "127.0.0.1");
        assert_eq!(s.client.port, 24800);
    }

    #[test]
    fn test_bad_port_is_an_address_error() {
        let cli = Cli::parse_from(["synergyc", "server:notaport"]);
        assert_eq!(
            cli.into_settings(&AppConfig::default()),
            Err(AddressError::BadPort("server:notaport".to_string()))
        );
    }

    #[test]
    fn test_port_zero_is_an_address_error() {
        let cli = Cli::parse_from(["synergyc", "server:0"]);
        assert!(cli.into_settings(&AppConfig::default()).is_err());
    }

    #[test]
    fn test_restart_defaults_on_and_no_restart_disables() {
        assert!(settings(&["server"]).restart);
        assert!(!settings(&["-1", "server"]).restart);
        assert!(!settings(&["--no-restart", "server"]).restart);
    }

    #[test]
    fn test_last_restart_flag_wins() {
        assert!(settings(&["--no-restart", "--restart", "server"]).restart);
        assert!(!settings(&["--restart", "--no-restart", "server"]).restart);
    }

    #[test]
    fn test_name_flag_overrides_default() {
        let s = settings(&["-n", "laptop", "server"]);
        assert_eq!(s.client.name, "laptop");
    }

    #[test]
    fn test_yscroll_default_and_override() {
        assert_eq!(settings(&["server"]).client.yscroll, 120);
        assert_eq!(settings(&["--yscroll", "240", "server"]).client.yscroll, 240);
    }

    #[test]
    fn test_debug_levels_map_to_tracing_directives() {
        assert_eq!(settings(&["server"]).log_directive, "info");
        assert_eq!(settings(&["-d", "ERROR", "server"]).log_directive, "error");
        assert_eq!(settings(&["-d", "DEBUG2", "server"]).log_directive, "trace");
        assert_eq!(settings(&["-d", "WARNING", "server"]).log_directive, "warn");
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["synergyc", "--bogus", "server"]).is_err());
    }

    #[test]
    fn test_arguments_after_double_dash_are_positional() {
        // `--` ends option parsing; what follows is the server address even
        // if it starts with a dash-like name.
        let cli = Cli::parse_from(["synergyc", "--", "server.example"]);
        assert_eq!(cli.server.as_deref(), Some("server.example"));
    }

    #[test]
    fn test_camp_flags_are_accepted_and_ignored() {
        let s = settings(&["--camp", "server"]);
        assert_eq!(s.client.host, "server");
        let s = settings(&["--no-camp", "server"]);
        assert_eq!(s.client.host, "server");
    }

    #[test]
    fn test_config_file_values_fill_unset_flags() {
        let mut config = AppConfig::default();
        config.client.server = Some("cfghost:9999".to_string());
        config.client.name = Some("cfgname".to_string());
        config.client.yscroll = 60;
        config.client.restart = false;

        let s = Cli::parse_from(["synergyc"])
            .into_settings(&config)
            .unwrap();
        assert_eq!(s.client.host, "cfghost");
        assert_eq!(s.client.port, 9999);
        assert_eq!(s.client.name, "cfgname");
        assert_eq!(s.client.yscroll, 60);
        assert!(!s.restart);
    }

    #[test]
    fn test_cli_flags_override_config_file() {
        let mut config = AppConfig::default();
        config.client.server = Some("cfghost:9999".to_string());
        config.client.restart = false;

        let s = Cli::parse_from(["synergyc", "--restart", "clihost"])
            .into_settings(&config)
            .unwrap();
        assert_eq!(s.client.host, "clihost");
        assert_eq!(s.client.port, 24800);
        assert!(s.restart);
    }

    #[test]
    fn test_version_string_names_the_protocol() {
        assert!(VERSION.contains("protocol version 1.6"));
    }
}
