//! Transport-facing error types for the Chord engine and DHash connection
//! framer.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] corelib::Error),

    #[error("connection reset")]
    ConnectionReset,

    #[error("no local vnode")]
    NoLocalVNode,

    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
