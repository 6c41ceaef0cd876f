use std::env;

use log::warn;

/// The maximum number of members a room can hold.
pub const ROOM_CAPACITY: usize = 4;

/// Runtime configuration shared by the server and clients.
#[derive(Debug, Clone)]
pub struct Config {
    /// The port the signaling server listens on
    pub port: u16,
    /// STUN/TURN urls handed to the negotiators
    pub ice_servers: Vec<String>,
}

impl Config {
    pub const DEFAULT_PORT: u16 = 9050;
    pub const DEFAULT_ICE_SERVER: &'static str = "stun:stun.l.google.com:19302";

    const PORT_VAR: &'static str = "MESHCALL_SERVER_PORT";
    const ICE_SERVERS_VAR: &'static str = "MESHCALL_ICE_SERVERS";

    /// Reads the configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = match env::var(Self::PORT_VAR) {
            Ok(value) => value.parse::<u16>().unwrap_or_else(|_| {
                warn!(
                    "{} must be a port number, got {:?}. Using {}",
                    Self::PORT_VAR,
                    value,
                    defaults.port
                );
                defaults.port
            }),
            Err(_) => defaults.port,
        };

        let ice_servers = env::var(Self::ICE_SERVERS_VAR)
            .map(|value| parse_list(&value))
            .unwrap_or(defaults.ice_servers);

        Self { port, ice_servers }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            ice_servers: vec![Self::DEFAULT_ICE_SERVER.to_string()],
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
