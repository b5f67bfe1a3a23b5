use std::net::{IpAddr, Ipv4Addr};

use clap::{Parser, error::ErrorKind};

use crate::{
    frame::MAX_PAYLOAD_LEN,
    server::{DEFAULT_BACKLOG, DEFAULT_PORT, ServerConfig},
};

/// Relay every message a client sends to all other connected clients.
#[derive(Parser, Debug, Clone)]
#[command(name = "relay-server", author, version, about, long_about = None)]
pub struct ServerArgs {
    /// TCP port to listen on. Use 0 for an ephemeral port.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Length of the pending-connection queue.
    #[arg(long, default_value_t = DEFAULT_BACKLOG)]
    pub backlog: u32,

    /// Refuse new clients once this many are connected.
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Drop clients that announce a frame larger than this many bytes.
    #[arg(long, default_value_t = MAX_PAYLOAD_LEN)]
    pub max_frame_len: u32,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            bind: args.bind,
            port: args.port,
            backlog: args.backlog,
            max_connections: args.max_connections,
            max_frame_len: args.max_frame_len,
        }
    }
}

/// Chat through a relay server: typed lines go out, relayed lines are printed.
#[derive(Parser, Debug, Clone)]
#[command(name = "relay-client", author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Host name or IP address of the relay server.
    pub address: String,

    /// Port of the relay server.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,
}

/// Parses the process arguments, exiting with status 1 on a usage error.
///
/// `--help` and `--version` still exit with status 0.
pub fn parse_or_exit<T: Parser>() -> T {
    match T::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}
