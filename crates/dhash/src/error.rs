//! Error types for the DHash object layer.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] chordnet::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
