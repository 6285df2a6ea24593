//! User-visible upcalls the DHash engine makes (`spec.md` §7).

use corelib::Identifier;

#[derive(Clone, Debug)]
pub enum Event {
    InsertSuccess { key: Identifier },
    InsertFailure { key: Identifier },
    RetrieveSuccess { key: Identifier, object: Vec<u8> },
    RetrieveFailure { key: Identifier },
}
