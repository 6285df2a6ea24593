//! UDP transport for the Chord datagram protocol (`spec.md` §4, §6).

use std::net::SocketAddrV4;

use corelib::ChordDatagram;
use tokio::net::UdpSocket;

use crate::error::Result;

const MAX_DATAGRAM_SIZE: usize = 4096;

/// One host's Chord UDP socket, shared by every local VNode.
pub struct ChordSocket {
    socket: UdpSocket,
}

impl ChordSocket {
    pub async fn bind(addr: SocketAddrV4) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub async fn send_to(&self, datagram: &ChordDatagram, dest: SocketAddrV4) -> Result<()> {
        let encoded = datagram.encode();
        self.socket.send_to(&encoded, dest).await?;
        Ok(())
    }

    /// Blocks until a datagram arrives, returning it alongside the sender's
    /// address. Malformed datagrams are logged and skipped rather than
    /// propagated, since one corrupt peer packet should never take down the
    /// engine's event loop.
    pub async fn recv(&self) -> Result<(ChordDatagram, SocketAddrV4)> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            let from = match from {
                std::net::SocketAddr::V4(v4) => v4,
                std::net::SocketAddr::V6(_) => continue,
            };
            match ChordDatagram::decode(&buf[..n]) {
                Ok(datagram) => return Ok((datagram, from)),
                Err(err) => {
                    tracing::warn!(%err, %from, "dropping malformed chord datagram");
                    continue;
                }
            }
        }
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
