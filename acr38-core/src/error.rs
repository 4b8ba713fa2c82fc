//! Error taxonomy shared across the transport, framing, and traversal layers.
//!
//! Every kind here is reportable and carries a human-readable message. The
//! only operation that never returns an error is `close`, which is expected
//! to swallow transport failures at the call site instead of bubbling them
//! up through this enum.

use std::io;

/// A single flat taxonomy covering every failure mode the reader stack can
/// surface, from USB enumeration down to layout validation.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// The USB backend could not be initialized.
    #[error("USB transport failed to initialize: {0}")]
    TransportInit(String),

    /// No device matched the requested VID/PID, or the match had no usable
    /// bulk IN/OUT pair.
    #[error("no ACR38 reader found for vid=0x{vid:04x} pid=0x{pid:04x}")]
    DeviceNotFound { vid: u16, pid: u16 },

    /// Opening or claiming the interface failed, typically because another
    /// process (e.g. a PC/SC daemon) already holds it.
    #[error("USB interface is busy: {0}")]
    InterfaceBusy(String),

    /// The response header was missing or truncated within the timeout
    /// bound.
    #[error("protocol frame header missing or truncated: {0}")]
    ProtocolShortFrame(String),

    /// The response body was shorter than the length declared in its
    /// header.
    #[error("protocol frame body shorter than declared length: {0}")]
    ProtocolIncompleteBody(String),

    /// An ACS frame's magic byte was not `0x01`.
    #[error("ACS frame had bad magic byte: 0x{0:02x}")]
    ProtocolBadMagic(u8),

    /// An ACS call that requires success saw a non-zero status byte.
    #[error("ACS backend rejected the request: status=0x{0:02x}")]
    BackendRejected(u8),

    /// A transfer timed out where a response was expected. Distinct from
    /// the intentional timeout of `waitCardEvent`, which is not an error.
    #[error("transfer timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An operation was attempted before `open` or after `close`.
    #[error("reader is not open")]
    NotOpen,

    /// The layout document violates one of the structural invariants in
    /// the data model (e.g. a non-DF root, a zero-sized Transparent EF).
    #[error("layout document is invalid: {0}")]
    LayoutInvalid(String),

    /// An output file for a dumped EF could not be written. Non-fatal
    /// during `readAll`: the traversal continues after logging this.
    #[error("file I/O failed: {0}")]
    FileIo(#[from] io::Error),
}

impl From<serde_json::Error> for ReaderError {
    fn from(err: serde_json::Error) -> Self {
        ReaderError::LayoutInvalid(err.to_string())
    }
}
