//! User-visible upcalls the Chord engine makes (`spec.md` §7).
//!
//! Delivered over a `tokio::sync::broadcast` channel so both the driver and
//! the DHash engine (which needs `KeyOwnership` to trigger migration) can
//! subscribe independently.

use std::net::Ipv4Addr;

use corelib::{Identifier, NodeRecord};

#[derive(Clone, Debug)]
pub enum Event {
    JoinSuccess { name: String, id: Identifier },
    LookupSuccess { key: Identifier, ip: Ipv4Addr, app_port: u16 },
    LookupFailure { key: Identifier },
    /// The object-layer-tagged counterpart of `LookupSuccess`/`LookupFailure`:
    /// carries the full resolved record (the user-facing upcall strips this
    /// down to `ip`/`app_port`, but the object layer needs `object_port` to
    /// dial the peer's DHash stream).
    ObjectLookupSuccess { key: Identifier, node: NodeRecord },
    ObjectLookupFailure { key: Identifier },
    /// `spec.md` calls this `VNODE-KEY-OWNERSHIP`; carries the new
    /// predecessor's object-layer address too, since the DHash engine needs
    /// it to Store-forward migrating objects (`spec.md` §4.6).
    KeyOwnership {
        name: String,
        self_id: Identifier,
        new_pred_id: Identifier,
        old_pred_id: Identifier,
        pred_ip: Ipv4Addr,
        pred_app_port: u16,
        pred_object_port: u16,
    },
    TraceRing { name: String, id: Identifier },
    VNodeFailure { name: String, id: Identifier },
}
