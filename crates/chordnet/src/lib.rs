//! Chord protocol engine and DHash stream transport.
//!
//! Wraps the data-only types of `corelib` with the `tokio`-driven runtime a
//! live node needs: the UDP Chord engine (`engine`), routing rules
//! (`routing`), the DHash connection framer and pool (`connection`,
//! `pool`), and the DHash wire message codec (`dhash_message`).

pub mod connection;
pub mod dhash_message;
pub mod engine;
pub mod error;
pub mod events;
pub mod pool;
pub mod routing;
pub mod runtime;
pub mod socket;

pub use connection::Connection;
pub use dhash_message::{DHashMessage, Object, Status};
pub use engine::{ChordEngine, VNodeInfo};
pub use error::{Error, Result};
pub use events::Event;
pub use pool::ConnectionPool;
pub use runtime::VNodeRuntime;
pub use socket::ChordSocket;
