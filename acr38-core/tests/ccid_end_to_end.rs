use std::collections::VecDeque;
use std::time::Duration;

use acr38_core::ccid::BulkIo;
use acr38_core::error::ReaderError;
use acr38_core::facade::{Backend, BackendSession};
use acr38_core::facade::CardTransport;
use acr38_core::presence::CardPresence;
use acr38_core::traversal::{self, Transmit};

#[derive(Default)]
struct ScriptedPipe {
    writes: Vec<Vec<u8>>,
    reads: VecDeque<Result<Vec<u8>, ReaderError>>,
}

impl ScriptedPipe {
    fn reply(&mut self, frame: Vec<u8>) {
        self.reads.push_back(Ok(frame));
    }
}

impl BulkIo for ScriptedPipe {
    fn write_bulk_out(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, ReaderError> {
        self.writes.push(data.to_vec());
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

fn ccid_frame(msg_type: u8, b_status: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![msg_type];
    #[allow(clippy::cast_possible_truncation)]
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&[0, 1, b_status, 0, 0]); // slot 0, seq 1, bStatus, bError, bClockStatus
    frame.extend_from_slice(payload);
    frame
}

/// Power-on, a GET_SLOT_STATUS poll, then a SELECT exchanged as a single
/// XfrBlock, end to end through `BackendSession` and the sequence counter
/// it owns.
#[test]
fn power_on_status_and_select_round_trip_over_ccid() {
    let mut pipe = ScriptedPipe::default();
    let atr = [0x3B, 0x9F, 0x94, 0x40, 0x1E, 0x00, 0x67, 0x11, 0x43, 0x00];
    pipe.reply(ccid_frame(0x80, 0x00, &atr));
    pipe.reply(ccid_frame(0x81, 0x00, &[]));
    pipe.reply(ccid_frame(0x80, 0x00, &[0x90, 0x00]));

    let mut session = BackendSession::new(pipe, Backend::Ccid, Duration::from_millis(500));

    let returned_atr = session.power_on().unwrap();
    assert_eq!(returned_atr, atr);

    assert_eq!(session.card_status().unwrap(), CardPresence::PresentActive);

    let resp = Transmit::transmit(&mut session, &acr38_core::iso7816::select_fid(0x3F00), Duration::from_millis(500)).unwrap();
    assert_eq!(resp, vec![0x90, 0x00]);

    assert_eq!(session.transport().writes.len(), 3);
    let seqs: Vec<u8> = session.transport().writes.iter().map(|w| w[6]).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn select_path_issues_one_apdu_per_fid() {
    let mut pipe = ScriptedPipe::default();
    pipe.reply(ccid_frame(0x80, 0x00, &[0x90, 0x00]));
    pipe.reply(ccid_frame(0x80, 0x00, &[0x90, 0x00]));
    let mut session = BackendSession::new(pipe, Backend::Ccid, Duration::from_millis(500));

    traversal::select_path(&mut session, &[0x3F00, 0x2F01], Duration::from_millis(500)).unwrap();
    assert_eq!(session.transport().writes.len(), 2);
}
