use std::time::Duration;

use clap::Parser;

use crate::{
    client::ClientConfig,
    config::{RelaySettings, DEFAULT_PORT, DEFAULT_WRITE_TIMEOUT},
};

const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0";
const DEFAULT_CLIENT_ADDRESS: &str = "127.0.0.1";

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay chat messages between TCP clients", long_about = None)]
pub struct Cli {
    /// Start the relay server instead of a client.
    #[arg(short = 's', long)]
    pub server: bool,

    /// Address to bind (server, default 0.0.0.0) or connect to (client, default 127.0.0.1).
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// TCP port. Use 0 with --server for an ephemeral port.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Name attached to every message this client sends.
    #[arg(short = 'u', long, default_value = "Wis")]
    pub username: String,

    /// Reject frames whose payload is larger than this many bytes.
    #[arg(long)]
    pub max_frame_len: Option<u64>,

    /// Give up on a slow recipient after this many milliseconds (0 waits forever).
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT.as_millis() as u64)]
    pub write_timeout_ms: u64,
}

/// Which role the process plays, with the settings that role consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Server {
        host: String,
        port: u16,
        settings: RelaySettings,
    },
    Client(ClientConfig),
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.server {
            Mode::Server {
                host: self.host_or(DEFAULT_SERVER_ADDRESS),
                port: self.port,
                settings: self.relay_settings(),
            }
        } else {
            Mode::Client(ClientConfig {
                username: self.username.clone(),
                host: self.host_or(DEFAULT_CLIENT_ADDRESS),
                port: self.port,
                max_frame_len: self.max_frame_len,
            })
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            max_frame_len: self.max_frame_len,
            write_timeout: (self.write_timeout_ms > 0)
                .then(|| Duration::from_millis(self.write_timeout_ms)),
        }
    }

    fn host_or(&self, fallback: &str) -> String {
        self.address
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("chat-relay").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn defaults_to_client_on_loopback() {
        assert_eq!(
            parse(&[]).mode(),
            Mode::Client(ClientConfig {
                username: "Wis".into(),
                host: "127.0.0.1".into(),
                port: DEFAULT_PORT,
                max_frame_len: None,
            })
        );
    }

    #[test]
    fn server_binds_all_interfaces_by_default() {
        assert_eq!(
            parse(&["-s", "-p", "4000"]).mode(),
            Mode::Server {
                host: "0.0.0.0".into(),
                port: 4000,
                settings: RelaySettings::default(),
            }
        );
    }

    #[test]
    fn short_and_long_flags() {
        let cli = parse(&["-u", "alice", "-a", "10.0.0.7", "--port", "5000"]);
        assert_eq!(
            cli.mode(),
            Mode::Client(ClientConfig {
                username: "alice".into(),
                host: "10.0.0.7".into(),
                port: 5000,
                max_frame_len: None,
            })
        );
    }

    #[test]
    fn hardening_flags_map_to_settings() {
        let cli = parse(&[
            "--server",
            "--max-frame-len",
            "1024",
            "--write-timeout-ms",
            "0",
        ]);
        assert_eq!(
            cli.relay_settings(),
            RelaySettings {
                max_frame_len: Some(1024),
                write_timeout: None,
            }
        );
        assert_eq!(
            parse(&[]).relay_settings().write_timeout,
            Some(DEFAULT_WRITE_TIMEOUT)
        );
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Cli::try_parse_from(["chat-relay", "-p", "not-a-port"]).is_err());
        assert!(Cli::try_parse_from(["chat-relay", "-p", "70000"]).is_err());
    }
}
