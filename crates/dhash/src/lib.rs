//! Owner-aware object storage riding on the Chord ring (`spec.md` §4.6).
//!
//! Placement follows whichever VNode the Chord engine says owns a key;
//! migration follows the Chord engine's `KeyOwnership` upcalls and a
//! periodic audit, since stabilization alone can silently shift ownership.

pub mod engine;
pub mod error;
pub mod events;
pub mod store;
pub mod transaction;

pub use engine::{DHashEngine, DHashInfo};
pub use error::{Error, Result};
pub use events::Event;
pub use store::ObjectStore;
pub use transaction::{Kind, PendingDHash};
