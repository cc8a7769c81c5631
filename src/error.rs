use std::fmt::{self, Debug, Display};

/// The error type used by this crate.
///
/// Every fallible operation in `ccprobe` returns one of these variants;
/// there is no retry or recovery inside the core, matching the
/// single-outstanding-operation protocol this crate drives.
#[derive(Debug)]
pub enum Error {
    /// No USB device matching the probe's vendor/product ID was found.
    DeviceNotFound,

    /// A `libusb`-layer failure.
    UsbTransfer(rusb::Error),

    /// A control or bulk transfer moved fewer bytes than requested.
    ShortTransfer { expected: usize, actual: usize },

    /// The probe's `GET_STATE` request returned nonzero while entering
    /// debug mode, meaning some other operation is already in flight.
    BadState(u8),

    /// The target's debug status has `DEBUG_LOCKED` set.
    Locked,

    /// A flash write was requested with a length that isn't a multiple
    /// of 4 bytes.
    Alignment { len: usize },

    /// A DMA configuration batch mixed channel 0 with channels 1..4, or
    /// was committed before any channel was configured.
    Config(&'static str),

    /// A line of Intel-HEX input was malformed, used an unsupported
    /// record type, or wrote data past a nonzero extended-linear
    /// address.
    HexFormat(String),

    /// The host-computed CRC-16 didn't match the value the target's RNG
    /// peripheral reported after a verify pass.
    ChecksumMismatch { expected: u16, actual: u16 },

    /// A polling loop (erase-busy, flash-busy, flash-write, DMA-IRQ)
    /// exceeded its deadline.
    Timeout(&'static str),

    /// Allocation failed while assembling a target command buffer.
    OutOfMemory,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeviceNotFound => write!(f, "no CC-Debugger probe found on the USB bus"),
            Error::UsbTransfer(e) => write!(f, "USB transfer failed: {}", e),
            Error::ShortTransfer { expected, actual } => write!(
                f,
                "USB transfer moved {} bytes, expected {}",
                actual, expected
            ),
            Error::BadState(state) => {
                write!(f, "probe is in state {} instead of idle, can't enter debug", state)
            }
            Error::Locked => write!(f, "target is locked (DEBUG_LOCKED set)"),
            Error::Alignment { len } => {
                write!(f, "flash write length {} is not a multiple of 4", len)
            }
            Error::Config(why) => write!(f, "invalid DMA configuration: {}", why),
            Error::HexFormat(why) => write!(f, "malformed Intel-HEX input: {}", why),
            Error::ChecksumMismatch { expected, actual } => write!(
                f,
                "flash verify failed: host CRC 0x{:04x} != target CRC 0x{:04x}",
                expected, actual
            ),
            Error::Timeout(what) => write!(f, "timed out waiting for {}", what),
            Error::OutOfMemory => write!(f, "out of memory while assembling a command buffer"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::UsbTransfer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        Error::UsbTransfer(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
