use thiserror::Error;

/// Errors returned by the public failure-detector operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DetectorError {
    #[error("detector is not initialized")]
    NotInit,
    #[error("detector is not running")]
    NotRunning,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("failure event already recorded")]
    EntryExists,
    #[error("failure event not recorded")]
    EntryNotExist,
    #[error("internal detector error")]
    Internal,
}
