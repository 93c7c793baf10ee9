use crate::protocol::{state_name, status_name};

#[derive(Debug)]
pub enum DfuError {
    Usb(nusb::Error),
    Transfer(nusb::transfer::TransferError),
    /// Endpoint stalled the request. Kept apart from [DfuError::Transfer]
    /// because a stall on GETSTATUS is a recoverable condition during the
    /// runtime-to-DFU transition.
    Stall,
    Io(std::io::Error),
    Format(String),
    InvalidOptions(&'static str),
    NoMatches,
    TooManyMatches,
    OutOfRange,
    /// Device reported a non-OK status or an unexpected state.
    Protocol { state: u8, status: u8 },
    ZeroTransferSize,
    Timeout,
    Misc(String),
}

impl std::error::Error for DfuError {}

impl std::fmt::Display for DfuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DfuError::Usb(err) => write!(f, "USB error: {}", err),
            DfuError::Transfer(err) => write!(f, "Transfer error: {}", err),
            DfuError::Stall => write!(f, "Endpoint stalled"),
            DfuError::Io(err) => write!(f, "File I/O error: {}", err),
            DfuError::Format(msg) => write!(f, "File format error: {}", msg),
            DfuError::InvalidOptions(msg) => {
                write!(f, "Invalid options: {}", msg)
            }
            DfuError::NoMatches => {
                write!(f, "No matching DFU capable USB device found")
            }
            DfuError::TooManyMatches => write!(
                f,
                "More than one matching DFU capable USB device found! \
                 Try disconnecting all but one device"
            ),
            DfuError::OutOfRange => {
                write!(f, "Length of data exceeded")
            }
            DfuError::Protocol { state, status } => write!(
                f,
                "state({}) = {}, status({}) = {}",
                state,
                state_name(*state),
                status,
                status_name(*status)
            ),
            DfuError::ZeroTransferSize => {
                write!(f, "Transfer size must be specified")
            }
            DfuError::Timeout => write!(f, "Timeout"),
            DfuError::Misc(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<nusb::Error> for DfuError {
    fn from(err: nusb::Error) -> Self {
        DfuError::Usb(err)
    }
}

impl From<std::io::Error> for DfuError {
    fn from(err: std::io::Error) -> Self {
        DfuError::Io(err)
    }
}

impl From<nusb::transfer::TransferError> for DfuError {
    fn from(err: nusb::transfer::TransferError) -> Self {
        match err {
            nusb::transfer::TransferError::Stall => DfuError::Stall,
            other => DfuError::Transfer(other),
        }
    }
}
