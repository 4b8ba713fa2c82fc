//! [`BulkIo`]/[`CardTransport`] over a claimed [`rusb`] device handle.

use std::time::Duration;

use acr38_core::ccid::BulkIo;
use acr38_core::error::ReaderError;
use acr38_core::facade::CardTransport;

use crate::locator::ClaimedDevice;

/// Largest single bulk-IN read. Matches the chunk size the original
/// driver reads into on every poll.
const READ_CHUNK_LEN: usize = 256;

fn map_rusb_err(err: rusb::Error, timeout: Duration) -> ReaderError {
    match err {
        rusb::Error::Timeout => ReaderError::Timeout(timeout),
        other => ReaderError::ProtocolShortFrame(other.to_string()),
    }
}

impl BulkIo for ClaimedDevice {
    fn write_bulk_out(&mut self, data: &[u8], timeout: Duration) -> Result<usize, ReaderError> {
        self.handle
            .write_bulk(self.bulk_out, data, timeout)
            .map_err(|err| map_rusb_err(err, timeout))
    }

    fn read_bulk_in(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        let mut buf = vec![0u8; max_len.min(READ_CHUNK_LEN).max(1)];
        match self.handle.read_bulk(self.bulk_in, &mut buf, timeout) {
            Ok(got) => {
                buf.truncate(got);
                Ok(buf)
            }
            Err(rusb::Error::Timeout) => Err(ReaderError::Timeout(timeout)),
            Err(other) => Err(map_rusb_err(other, timeout)),
        }
    }
}

impl CardTransport for ClaimedDevice {
    fn has_interrupt_endpoint(&self) -> bool {
        self.intr_in.is_some()
    }

    fn read_interrupt_in(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        let Some(endpoint) = self.intr_in else {
            return Ok(Vec::new());
        };
        let mut buf = vec![0u8; max_len.max(1)];
        match self.handle.read_interrupt(endpoint, &mut buf, timeout) {
            Ok(got) => {
                buf.truncate(got);
                Ok(buf)
            }
            Err(rusb::Error::Timeout) => Err(ReaderError::Timeout(timeout)),
            Err(other) => Err(map_rusb_err(other, timeout)),
        }
    }
}
