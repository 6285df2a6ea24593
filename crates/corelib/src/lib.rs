//! Core library for the Chord ring protocol.
//!
//! This crate provides the data-only foundations shared by every other
//! crate in the workspace:
//! - Identifier algebra on the circular key space
//! - Node records and node tables
//! - VNode state and its invariants
//! - The Chord wire message format
//! - Transaction retry/timeout bookkeeping
//! - Per-node configuration
//!
//! Nothing here touches a socket or a clock beyond `last_seen` bookkeeping;
//! the Chord engine that drives these types through message exchange lives
//! in the `chordnet` crate.

pub mod config;
pub mod error;
pub mod identifier;
pub mod message;
pub mod node;
pub mod node_table;
pub mod transaction;
pub mod vnode;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use identifier::Identifier;
pub use message::{ChordDatagram, ChordMessage};
pub use node::NodeRecord;
pub use node_table::NodeTable;
pub use transaction::{Originator, Transaction, TransactionIdAllocator};
pub use vnode::{VNodeHost, VNodeState};
