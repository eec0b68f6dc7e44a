//! Errors raised while moving packets across a connection

use thiserror::Error;

/// Failures of the frame codec
///
/// None of these are reported back to the remote party. The side that hits one
/// logs it and drops the connection; the periodic full-state sweep repairs
/// whatever the lost traffic would have carried.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}
