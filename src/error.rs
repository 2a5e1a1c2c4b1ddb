use std::array::TryFromSliceError;

use thiserror::Error;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Error, Debug)]
pub enum Error {
    /// Unexpected protocol error. The String contains the reason.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Parameter subsystem error. The String contains the reason.
    #[error("parameter error: {0}")]
    ParamError(String),

    /// Log subsystem error. The String contains the reason.
    #[error("log error: {0}")]
    LogError(String),

    /// Scalar conversion error. The String contains the reason.
    #[error("conversion error: {0}")]
    ConversionError(String),

    /// The link failed to open or a transfer errored.
    #[error("link error: {0}")]
    LinkError(String),

    /// No protocol version reply arrived within the boot window.
    #[error("no protocol version reply from the device")]
    ProtocolTimeout,

    /// A named variable is not present in the table of contents.
    #[error("variable {0} not found in the table of contents")]
    VariableNotFound(String),

    /// A block, variable or payload budget would be exceeded.
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    /// The firmware reported a non-zero status for a settings command.
    #[error("device returned error code {0}")]
    DeviceError(u8),

    /// An argument is outside the range the protocol can carry.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection is currently closed.
    #[error("disconnected")]
    Disconnected,
}

impl From<TryFromSliceError> for Error {
    fn from(e: TryFromSliceError) -> Self {
        Self::ConversionError(format!("{:?}", e))
    }
}
