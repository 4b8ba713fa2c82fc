//! [`CardReader`] implementation over a real ACR38 USB device.

use std::time::Duration;

use acr38_core::error::ReaderError;
use acr38_core::facade::{Backend, BackendSession, CardReader, OpenParams, ReaderInfo};
use acr38_core::presence::CardPresence;

use crate::locator::{self, ClaimedDevice};

/// The concrete reader module: owns the claimed device once open, and
/// dispatches every operation through [`BackendSession`].
#[derive(Default)]
pub struct Acr38Reader {
    session: Option<BackendSession<ClaimedDevice>>,
}

impl Acr38Reader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn session_mut(&mut self) -> Result<&mut BackendSession<ClaimedDevice>, ReaderError> {
        self.session.as_mut().ok_or(ReaderError::NotOpen)
    }
}

impl CardReader for Acr38Reader {
    fn open(&mut self, params: &OpenParams) -> Result<(), ReaderError> {
        // T=1 chaining is out of scope; reject it up front rather than
        // silently falling back to T=0.
        if params.protocol == acr38_core::facade::IsoProtocol::T1 {
            return Err(ReaderError::BackendRejected(0xFF));
        }
        let claimed = locator::find_and_claim(params)?;
        let backend = claimed.backend;
        self.session = Some(BackendSession::new(claimed, backend, params.io_timeout));
        log::info!(
            "opened ACR38 reader vid=0x{:04x} pid=0x{:04x} backend={:?}",
            params.vid,
            params.pid,
            backend
        );
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.transport_mut().release();
        }
    }

    fn info(&self) -> ReaderInfo {
        match &self.session {
            Some(session) => {
                let transport = session.transport();
                ReaderInfo {
                    name: "ACR38 USB Reader".to_string(),
                    vid: transport.vid,
                    pid: transport.pid,
                    backend: session.backend(),
                    bulk_in: transport.bulk_in,
                    bulk_out: transport.bulk_out,
                    intr_in: transport.intr_in,
                }
            }
            None => ReaderInfo {
                name: "ACR38 USB Reader".to_string(),
                vid: 0,
                pid: 0,
                backend: Backend::Ccid,
                bulk_in: 0,
                bulk_out: 0,
                intr_in: None,
            },
        }
    }

    fn card_status(&mut self) -> Result<CardPresence, ReaderError> {
        self.session_mut()?.card_status()
    }

    fn power_on(&mut self) -> Result<Vec<u8>, ReaderError> {
        self.session_mut()?.power_on()
    }

    fn power_off(&mut self) -> Result<(), ReaderError> {
        self.session_mut()?.power_off()
    }

    fn wait_card_event(&mut self, timeout: Duration) -> Result<bool, ReaderError> {
        self.session_mut()?.wait_card_event(timeout)
    }

    fn transmit(&mut self, capdu: &[u8], timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        BackendSession::transmit(self.session_mut()?, capdu, timeout)
    }

    fn vendor_control(&mut self, _payload: &[u8]) -> Result<Vec<u8>, ReaderError> {
        self.session_mut()?;
        Ok(Vec::new())
    }
}
