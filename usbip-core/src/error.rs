//! Per-subsystem error types. Each subsystem gets its own narrow enum; the CLI
//! boundary in the `usbipd` binary composes these into a single user-facing
//! error rather than the library flattening them itself.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported USB/IP version {got:#06x}, expected {expected:#06x}")]
    VersionMismatch { got: u16, expected: u16 },
    #[error("unexpected opcode {0:#06x} for the current session state")]
    UnexpectedOpCode(u16),
    #[error("malformed PDU: {0}")]
    Malformed(String),
    #[error("connection closed before a full PDU could be read")]
    Truncated,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {0} not found")]
    NotFound(String),
    #[error("device disconnected")]
    Disconnected,
    #[error("transfer stalled")]
    Stall,
    #[error("transfer timed out")]
    Timeout,
    #[error("transfer was cancelled")]
    Cancelled,
    #[error("transfer buffer overflow")]
    Overflow,
    #[error("failed to claim interface {0}")]
    ClaimFailed(u8),
    #[error("isochronous transfers are not supported")]
    IsoUnsupported,
    #[error("usb error: {0}")]
    Other(String),
}

impl DeviceError {
    /// Translate a transfer outcome into the negative errno USB/IP expects in
    /// a `RET_SUBMIT`/`RET_UNLINK` status field.
    pub fn to_usbip_errno(&self) -> i32 {
        use crate::proto::errno;
        match self {
            DeviceError::Stall => errno::EPIPE,
            DeviceError::Timeout => errno::ETIMEDOUT,
            DeviceError::Cancelled => errno::ECONNRESET,
            DeviceError::Disconnected | DeviceError::NotFound(_) => errno::ENODEV,
            DeviceError::Overflow => errno::EOVERFLOW,
            DeviceError::ClaimFailed(_) | DeviceError::IsoUnsupported | DeviceError::Other(_) => errno::EPROTO,
        }
    }
}

#[derive(Debug, Error)]
pub enum BindingStoreError {
    #[error("failed to read binding store at {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to write binding store at {path}: {source}")]
    Write { path: String, #[source] source: std::io::Error },
    #[error("binding store at {path} is corrupt: {source}")]
    Corrupt { path: String, #[source] source: serde_json::Error },
    #[error("could not determine the user config directory")]
    NoConfigDir,
}

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("failed to enumerate USB devices: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("device {0} is already attached to another session")]
    AlreadyAttached(String),
    #[error("no such exported device: {0}")]
    NoSuchDevice(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::errno;

    #[test]
    fn stall_maps_to_epipe() {
        assert_eq!(DeviceError::Stall.to_usbip_errno(), errno::EPIPE);
    }

    #[test]
    fn iso_unsupported_maps_to_eproto() {
        assert_eq!(DeviceError::IsoUnsupported.to_usbip_errno(), errno::EPROTO);
    }
}
