//! Construction-time error taxonomy for the factory. Transport/session-level errors live in
//! `pcmflash-core` and are reported through `Response<T>` instead of `Result`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FactoryError {
    #[error("block payload must be exactly {expected} bytes, got {actual}")]
    WrongBlockLength { expected: usize, actual: usize },

    #[error("upload payload must not be empty")]
    EmptyPayload,

    #[error("calibration range {start:#08X}..{end:#08X} is not start < end")]
    MalformedRange { start: u32, end: u32 },
}
