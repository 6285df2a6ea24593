//! Bookkeeping for a DHash-level operation awaiting a Chord lookup or a
//! stream round-trip (`spec.md` §4.6).

use corelib::{Identifier, Originator};

/// What kind of operation a pending DHash transaction represents.
///
/// `Transfer` is the object layer forwarding an object it already holds to
/// a new owner — on ownership handoff (`KeyOwnership`) or the periodic
/// audit — and never surfaces an upcall to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Insert,
    Retrieve,
    Transfer,
}

#[derive(Clone, Debug)]
pub struct PendingDHash {
    pub kind: Kind,
    pub object_id: Identifier,
    pub originator: Originator,
    /// Object bytes to store, for `Insert`. `Transfer` re-reads the bytes
    /// from the local store at dispatch time instead.
    pub payload: Option<Vec<u8>>,
}
