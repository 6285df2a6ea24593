//! Command-line configuration for one Chord/DHash node (`spec.md` §6).

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

use clap::Parser;
use corelib::NodeConfig;

/// Runs one Chord ring node with an attached DHash object layer and feeds
/// it commands from a script file or stdin.
#[derive(Parser, Debug, Clone)]
#[command(name = "chordctl", version, about)]
pub struct Cli {
    /// Bootstrap peer's Chord (datagram) address. A node whose own
    /// (local-ip, chord-port) equals this becomes a one-node ring on its
    /// first `InsertVNode`.
    #[arg(long)]
    pub bootstrap: SocketAddrV4,

    #[arg(long, default_value = "127.0.0.1")]
    pub local_ip: Ipv4Addr,

    #[arg(long)]
    pub chord_port: u16,

    #[arg(long)]
    pub app_port: u16,

    #[arg(long)]
    pub object_port: u16,

    /// Key width in bits (default 160, i.e. SHA-1).
    #[arg(long, default_value_t = 160)]
    pub m: usize,

    /// Reads commands from this file instead of stdin.
    #[arg(long)]
    pub script: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            bootstrap: self.bootstrap,
            local_ip: self.local_ip,
            chord_port: self.chord_port,
            app_port: self.app_port,
            object_port: self.object_port,
            m: self.m,
            ..NodeConfig::default()
        }
    }
}
