//! Per-node configuration.
//!
//! Defaults are taken from the original model's compiled-in constants
//! (`DEFAULT_STABILIZE_INTERVAL` and friends in `chord-ipv4.h` /
//! `dhash-ipv4.h`) rather than invented.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Tunables shared by every VNode and the DHash engine hosted on one node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Bootstrap peer's Chord (datagram) address.
    pub bootstrap: SocketAddrV4,
    /// This host's address (the ip component is shared by all three ports).
    pub local_ip: Ipv4Addr,
    pub chord_port: u16,
    pub app_port: u16,
    pub object_port: u16,

    /// Key bits, `m`. Identifier byte width is `m / 8`.
    pub m: usize,
    /// Successor list capacity, `S_max`.
    pub successor_list_max: usize,
    /// Predecessor list capacity, `P_max`.
    pub predecessor_list_max: usize,

    pub stabilize_interval: Duration,
    pub heartbeat_interval: Duration,
    pub fix_finger_interval: Duration,
    pub request_timeout: Duration,
    pub max_request_retries: u8,
    /// `K_miss`: missed intervals before a successor/predecessor is
    /// declared dead.
    pub max_missed_keepalives: u32,

    pub connection_inactivity_timeout: Duration,
    pub audit_objects_timeout: Duration,

    pub object_layer_enabled: bool,
}

impl NodeConfig {
    pub fn id_bytes(&self) -> u8 {
        (self.m / 8) as u8
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bootstrap: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000),
            local_ip: Ipv4Addr::LOCALHOST,
            chord_port: 9000,
            app_port: 9001,
            object_port: 9002,
            m: 160,
            successor_list_max: 8,
            predecessor_list_max: 8,
            stabilize_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(500),
            fix_finger_interval: Duration::from_millis(10_000),
            request_timeout: Duration::from_millis(1_000),
            max_request_retries: 3,
            max_missed_keepalives: 4,
            connection_inactivity_timeout: Duration::from_millis(10_000),
            audit_objects_timeout: Duration::from_millis(600_000),
            object_layer_enabled: true,
        }
    }
}
