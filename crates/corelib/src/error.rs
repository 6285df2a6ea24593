//! Error types for the core library.

use crate::identifier::Identifier;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Two identifiers of different byte widths were compared or combined.
    #[error("identifier width mismatch: {0} bytes vs {1} bytes")]
    WidthMismatch(u8, u8),

    /// `add_power_of_two` was called with an out-of-range exponent.
    #[error("power of two {0} is out of range for a {1}-byte identifier")]
    PowerOutOfRange(u16, u8),

    /// A wire message failed to decode.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A node record referenced an identifier this table has no entry for.
    #[error("no such node: {0}")]
    NoSuchNode(Identifier),

    /// Invalid node configuration.
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// The node table holds no routable node to satisfy a query.
    #[error("no routable node available")]
    NoRoutableNode,
}
