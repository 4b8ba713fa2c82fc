use std::collections::VecDeque;
use std::time::Duration;

use acr38_core::ccid::BulkIo;
use acr38_core::error::ReaderError;
use acr38_core::facade::{Backend, BackendSession, CardTransport};
use acr38_core::presence::CardPresence;

#[derive(Default)]
struct ScriptedPipe {
    reads: VecDeque<Result<Vec<u8>, ReaderError>>,
}

impl ScriptedPipe {
    fn reply(&mut self, frame: Vec<u8>) {
        self.reads.push_back(Ok(frame));
    }
}

impl BulkIo for ScriptedPipe {
    fn write_bulk_out(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, ReaderError> {
        Ok(data.len())
    }

    fn read_bulk_in(&mut self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        self.reads
            .pop_front()
            .unwrap_or_else(|| Err(ReaderError::Timeout(Duration::from_millis(0))))
    }
}

impl CardTransport for ScriptedPipe {
    fn has_interrupt_endpoint(&self) -> bool {
        false
    }

    fn read_interrupt_in(&mut self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        Err(ReaderError::Timeout(Duration::from_millis(0)))
    }
}

/// An ACS-backed reader rejects a failed reset and surfaces the status
/// byte, rather than returning a partial ATR.
#[test]
fn failed_reset_default_is_reported_as_backend_rejected() {
    let mut pipe = ScriptedPipe::default();
    pipe.reply(vec![0x01, 0x05, 0x00, 0x00]); // magic, status=0x05 (failure), len=0
    let mut session = BackendSession::new(pipe, Backend::Acs, Duration::from_millis(500));

    let err = session.power_on().unwrap_err();
    assert!(matches!(err, ReaderError::BackendRejected(0x05)));
}

#[test]
fn card_status_reads_the_trailing_cstat_byte() {
    let mut pipe = ScriptedPipe::default();
    // GET_ACR_STAT reply: magic, status=0x00, len=0x0001, payload=[C_STAT=0x03]
    pipe.reply(vec![0x01, 0x00, 0x00, 0x01, 0x03]);
    let mut session = BackendSession::new(pipe, Backend::Acs, Duration::from_millis(500));

    assert_eq!(session.card_status().unwrap(), CardPresence::PresentActive);
}
