//! The reader-facing API: the operations a dynamic reader module exposes
//! through the FFI boundary, and the backend-dispatch logic shared by every
//! concrete transport.
//!
//! [`CardReader`] is transport-agnostic and is what `acr38-usb` implements
//! over a real USB handle, and what `acr38-cli` drives through
//! [`crate::ffi`]. [`BackendSession`] does the CCID-vs-ACS dispatch once,
//! generic over [`CardTransport`], so `acr38-usb` only has to supply bulk
//! and interrupt I/O, not re-derive the protocol switch.

use std::time::Duration;

use crate::acs::AcsFramer;
use crate::ccid::{self, BulkIo, CcidFramer};
use crate::error::ReaderError;
use crate::presence::CardPresence;
use crate::traversal::Transmit;

/// Card protocol to negotiate at power-on. `Auto` lets the reader decide.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum IsoProtocol {
    #[default]
    Auto,
    T0,
    T1,
}

/// Which legacy frame format an opened interface speaks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Ccid,
    Acs,
}

/// Parameters for [`CardReader::open`].
#[derive(Clone, Debug)]
pub struct OpenParams {
    pub vid: u16,
    pub pid: u16,
    pub protocol: IsoProtocol,
    pub detach_kernel_driver: bool,
    pub interface_hint: Option<u8>,
    pub io_timeout: Duration,
}

impl Default for OpenParams {
    fn default() -> Self {
        OpenParams {
            vid: 0x072F,
            pid: 0x9000,
            protocol: IsoProtocol::Auto,
            detach_kernel_driver: true,
            interface_hint: None,
            io_timeout: Duration::from_millis(2000),
        }
    }
}

/// Descriptive information about an opened reader, surfaced by the `info`
/// CLI subcommand.
#[derive(Clone, Debug)]
pub struct ReaderInfo {
    pub name: String,
    pub vid: u16,
    pub pid: u16,
    pub backend: Backend,
    pub bulk_in: u8,
    pub bulk_out: u8,
    pub intr_in: Option<u8>,
}

/// The full set of operations a dynamically-loaded reader module exposes.
/// Mirrors the vtable that crosses the FFI boundary in [`crate::ffi`].
pub trait CardReader {
    /// Opens and claims the device matching `params`.
    ///
    /// # Errors
    /// Returns [`ReaderError::DeviceNotFound`] or [`ReaderError::InterfaceBusy`].
    fn open(&mut self, params: &OpenParams) -> Result<(), ReaderError>;

    /// Releases the interface and closes the handle. Never fails; any
    /// underlying transport error is logged and swallowed.
    fn close(&mut self);

    /// Returns static information about the currently open device.
    fn info(&self) -> ReaderInfo;

    /// Polls and classifies the current card-presence state.
    ///
    /// # Errors
    /// Returns [`ReaderError::NotOpen`] or a protocol error.
    fn card_status(&mut self) -> Result<CardPresence, ReaderError>;

    /// Powers on (or warm-resets) the card and returns its ATR.
    ///
    /// # Errors
    /// Returns [`ReaderError::NotOpen`] or a protocol error.
    fn power_on(&mut self) -> Result<Vec<u8>, ReaderError>;

    /// Powers off the card.
    ///
    /// # Errors
    /// Returns [`ReaderError::NotOpen`] or a protocol error.
    fn power_off(&mut self) -> Result<(), ReaderError>;

    /// Blocks up to `timeout` for a card-presence change on the interrupt
    /// endpoint, returning `false` on timeout or on a reader with no
    /// interrupt endpoint.
    ///
    /// # Errors
    /// Returns [`ReaderError::NotOpen`] or a transport error other than a
    /// timeout.
    fn wait_card_event(&mut self, timeout: Duration) -> Result<bool, ReaderError>;

    /// Exchanges one C-APDU with the inserted card.
    ///
    /// # Errors
    /// Returns [`ReaderError::NotOpen`] or a protocol error.
    fn transmit(&mut self, capdu: &[u8], timeout: Duration) -> Result<Vec<u8>, ReaderError>;

    /// Reserved vendor extension point. The ACR38 family defines no vendor
    /// commands beyond CCID/ACS, so every implementation returns an empty
    /// payload.
    ///
    /// # Errors
    /// Returns [`ReaderError::NotOpen`].
    fn vendor_control(&mut self, payload: &[u8]) -> Result<Vec<u8>, ReaderError>;
}

/// A bulk pipe plus the (optional) interrupt-IN endpoint `wait_card_event`
/// polls.
pub trait CardTransport: BulkIo {
    /// `true` if the claimed interface exposed an interrupt-IN endpoint.
    fn has_interrupt_endpoint(&self) -> bool;

    /// Reads from the interrupt-IN endpoint. Only called when
    /// [`CardTransport::has_interrupt_endpoint`] is `true`.
    fn read_interrupt_in(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, ReaderError>;
}

/// Shared CCID/ACS dispatch logic, generic over the concrete transport.
/// Holds the framers (and CCID's sequence counter) so a caller only needs
/// to construct one of these once per open device.
pub struct BackendSession<T: CardTransport> {
    transport: T,
    backend: Backend,
    ccid: CcidFramer,
    acs: AcsFramer,
    io_timeout: Duration,
}

impl<T: CardTransport> BackendSession<T> {
    #[must_use]
    pub fn new(transport: T, backend: Backend, io_timeout: Duration) -> Self {
        Self {
            transport,
            backend,
            ccid: CcidFramer::new(),
            acs: AcsFramer::new(),
            io_timeout,
        }
    }

    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// # Errors
    /// Propagates the underlying framer's exchange errors.
    pub fn card_status(&mut self) -> Result<CardPresence, ReaderError> {
        match self.backend {
            Backend::Ccid => {
                let resp = self
                    .ccid
                    .exchange(&mut self.transport, ccid::MSG_GET_SLOT_STATUS, 0, &[], self.io_timeout)?;
                Ok(CardPresence::from_ccid_status(resp.status))
            }
            Backend::Acs => {
                let resp = self.acs.exchange(
                    &mut self.transport,
                    crate::acs::INS_GET_ACR_STAT,
                    &[],
                    self.io_timeout,
                )?;
                let c_stat = *resp.payload.last().ok_or_else(|| {
                    ReaderError::ProtocolIncompleteBody("ACS GET_ACR_STAT reply carried no status byte".to_string())
                })?;
                Ok(CardPresence::from_acs_cstat(c_stat))
            }
        }
    }

    /// # Errors
    /// Returns [`ReaderError::BackendRejected`] on an ACS reset failure,
    /// [`ReaderError::ProtocolIncompleteBody`] if the ATR payload comes
    /// back empty, plus the underlying framer's exchange errors.
    pub fn power_on(&mut self) -> Result<Vec<u8>, ReaderError> {
        let atr = match self.backend {
            Backend::Ccid => {
                let resp = self
                    .ccid
                    .exchange(&mut self.transport, ccid::MSG_ICC_POWER_ON, 0, &[], self.io_timeout)?;
                resp.payload
            }
            Backend::Acs => {
                let resp = self.acs.reset_default(&mut self.transport, self.io_timeout)?;
                resp.payload
            }
        };
        if atr.is_empty() {
            return Err(ReaderError::ProtocolIncompleteBody(
                "power-on reply carried an empty ATR".to_string(),
            ));
        }
        Ok(atr)
    }

    /// # Errors
    /// Returns [`ReaderError::BackendRejected`] on an ACS power-off
    /// failure, plus the underlying framer's exchange errors. The CCID
    /// reply is deliberately ignored, matching the original driver.
    pub fn power_off(&mut self) -> Result<(), ReaderError> {
        match self.backend {
            Backend::Ccid => {
                self.ccid
                    .exchange(&mut self.transport, ccid::MSG_ICC_POWER_OFF, 0, &[], self.io_timeout)?;
                Ok(())
            }
            Backend::Acs => {
                self.acs.power_off(&mut self.transport, self.io_timeout)?;
                Ok(())
            }
        }
    }

    /// # Errors
    /// Returns [`ReaderError::BackendRejected`] on an ACS transmit failure,
    /// plus the underlying framer's exchange errors.
    pub fn transmit(&mut self, capdu: &[u8], timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        match self.backend {
            Backend::Ccid => {
                let resp = self.ccid.exchange(&mut self.transport, ccid::MSG_XFR_BLOCK, 0, capdu, timeout)?;
                Ok(resp.payload)
            }
            Backend::Acs => {
                let resp = self.acs.exchange_t0(&mut self.transport, capdu, timeout)?;
                Ok(resp.payload)
            }
        }
    }

    /// # Errors
    /// Returns any transport error other than a timeout.
    pub fn wait_card_event(&mut self, timeout: Duration) -> Result<bool, ReaderError> {
        if !self.transport.has_interrupt_endpoint() {
            return Ok(false);
        }
        match self.transport.read_interrupt_in(64, timeout) {
            Ok(data) => Ok(!data.is_empty()),
            Err(ReaderError::Timeout(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }
}

impl<T: CardTransport> Transmit for BackendSession<T> {
    fn power_on(&mut self, _timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        BackendSession::power_on(self)
    }

    fn transmit(&mut self, capdu: &[u8], timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        BackendSession::transmit(self, capdu, timeout)
    }
}
