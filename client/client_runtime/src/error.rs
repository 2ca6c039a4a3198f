use thiserror::Error;

use crate::queue::QueueError;
use crate::snapshot::StoreError;
use crate::term::ConversionError;
use crate::transport::TransportError;
use crate::wire::{DecodeError, EncodeError};

/// Any failure surfaced by the client runtime.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
