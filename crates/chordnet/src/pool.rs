//! DHash connection pool: one cached `Connection` per peer object-layer
//! address, reaped after `connection_inactivity_timeout` of idleness
//! (`spec.md` §4.6).
//!
//! Inbound connections are cached under the ephemeral address `accept()`
//! reports rather than the peer's advertised `object_port`, so an inbound
//! and an outbound connection to the same peer cannot be recognized as the
//! same peer and deduplicated without a handshake the wire protocol
//! doesn't carry; each direction keeps its own connection.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use corelib::NodeConfig;

use crate::connection::Connection;
use crate::error::Result;

type PeerKey = (Ipv4Addr, u16);

struct PooledConnection {
    connection: Connection,
    last_active: Instant,
}

/// Keyed connection cache for one host's DHash object layer.
pub struct ConnectionPool {
    connections: HashMap<PeerKey, PooledConnection>,
    inactivity_timeout: std::time::Duration,
}

impl ConnectionPool {
    pub fn new(config: &NodeConfig) -> Self {
        Self { connections: HashMap::new(), inactivity_timeout: config.connection_inactivity_timeout }
    }

    /// Fetches a live connection to `peer`, dialing one if none is cached.
    pub async fn get_or_connect(&mut self, peer: SocketAddrV4) -> Result<&mut Connection> {
        let key = (*peer.ip(), peer.port());
        if !self.connections.contains_key(&key) {
            let connection = Connection::connect(peer).await?;
            self.connections.insert(key, PooledConnection { connection, last_active: Instant::now() });
        }
        let pooled = self.connections.get_mut(&key).expect("just inserted");
        pooled.last_active = Instant::now();
        Ok(&mut pooled.connection)
    }

    pub fn adopt_inbound(&mut self, peer: SocketAddrV4, connection: Connection) {
        let key = (*peer.ip(), peer.port());
        self.connections.insert(key, PooledConnection { connection, last_active: Instant::now() });
    }

    /// Addresses of every currently pooled peer, for a driver loop that
    /// needs to poll each connection in turn.
    pub fn peers(&self) -> Vec<SocketAddrV4> {
        self.connections.keys().map(|(ip, port)| SocketAddrV4::new(*ip, *port)).collect()
    }

    /// Polls one connection for up to `poll_timeout` and returns whatever
    /// records completed, or `None` if nothing arrived in time. A dynamic
    /// set of sockets with no fixed arity doesn't fit `tokio::select!`'s
    /// static branches, so the driver loop sweeps `peers()` with a short
    /// timeout each tick instead of holding one giant select.
    ///
    /// A connection that errors (reset, i/o failure) is dropped from the
    /// pool; the caller is responsible for failing any transactions that
    /// were in flight on it.
    pub async fn try_pump(&mut self, peer: SocketAddrV4, poll_timeout: Duration) -> Option<Result<Vec<(u32, crate::dhash_message::DHashMessage)>>> {
        let key = (*peer.ip(), peer.port());
        let pooled = self.connections.get_mut(&key)?;
        match tokio::time::timeout(poll_timeout, pooled.connection.pump()).await {
            Ok(Ok(records)) => {
                pooled.last_active = Instant::now();
                Some(Ok(records))
            }
            Ok(Err(err)) => {
                self.connections.remove(&key);
                Some(Err(err))
            }
            Err(_elapsed) => None,
        }
    }

    /// Drops every connection idle past `connection_inactivity_timeout`.
    pub fn reap_idle(&mut self) {
        let timeout = self.inactivity_timeout;
        self.connections.retain(|_, pooled| pooled.last_active.elapsed() < timeout);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshly_bound_pool_has_no_connections() {
        let config = NodeConfig::default();
        let pool = ConnectionPool::new(&config);
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
        assert!(pool.peers().is_empty());
    }
}
