use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_NOT_FOUND_DELAY, DEFAULT_PORT, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server.
    Serve(ServeArgs),
    /// Connect to a relay from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the listener to.
    #[arg(long, env = "CHAT_RELAY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, env = "CHAT_RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Milliseconds to wait before reporting an unknown invite target. 0 disables the delay.
    #[arg(long, default_value_t = DEFAULT_NOT_FOUND_DELAY.as_millis() as u64)]
    pub not_found_delay_ms: u64,

    /// Maximum number of concurrent sessions. Unlimited when omitted.
    #[arg(long)]
    pub max_connections: Option<NonZeroUsize>,

    /// Per-session outbound queue size; clients that fall this far behind are disconnected.
    /// Unbounded when omitted.
    #[arg(long)]
    pub outbound_capacity: Option<NonZeroUsize>,
}

impl ServeArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            not_found_delay: Duration::from_millis(self.not_found_delay_ms),
            max_connections: self.max_connections.map(NonZeroUsize::get),
            outbound_capacity: self.outbound_capacity.map(NonZeroUsize::get),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Screen name requested when joining.
    #[arg(long)]
    pub name: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:7")]
    pub server: SocketAddr,
}
