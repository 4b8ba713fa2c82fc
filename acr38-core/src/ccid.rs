//! CCID bulk-wire message framing, sequencing, and response reassembly.
//!
//! This module only knows how to build and parse bytes; it never touches a
//! real USB endpoint. Callers supply a [`BulkIo`] implementation — the real
//! one lives in `acr38-usb`, a scripted stub lives in this crate's tests.

use std::time::Duration;

use crate::error::ReaderError;

/// `PC_to_RDR_IccPowerOn`
pub const MSG_ICC_POWER_ON: u8 = 0x62;
/// `PC_to_RDR_IccPowerOff`
pub const MSG_ICC_POWER_OFF: u8 = 0x63;
/// `PC_to_RDR_GetSlotStatus`
pub const MSG_GET_SLOT_STATUS: u8 = 0x65;
/// `PC_to_RDR_XfrBlock`
pub const MSG_XFR_BLOCK: u8 = 0x6F;
/// `RDR_to_PC_DataBlock`
pub const MSG_DATA_BLOCK: u8 = 0x80;
/// `RDR_to_PC_SlotStatus`
pub const MSG_SLOT_STATUS: u8 = 0x81;

/// Length of the fixed CCID header, before the payload.
pub const HEADER_LEN: usize = 10;

const READ_CHUNK_LEN: usize = 256;
const HEADER_READ_ATTEMPTS: usize = 5;
const MAX_BODY_READ_ATTEMPTS: usize = 256;

/// A bulk pipe capable of one CCID/ACS exchange at a time.
///
/// A timed-out transfer must be reported as `Err(ReaderError::Timeout(_))`,
/// never as `Ok` with no bytes — a genuine zero-length packet (ZLP) is
/// `Ok(vec![])` and is a normal, tolerated occurrence mid-reassembly.
pub trait BulkIo {
    /// Writes `data` to the bulk-OUT endpoint, returning the number of bytes
    /// actually written.
    fn write_bulk_out(&mut self, data: &[u8], timeout: Duration) -> Result<usize, ReaderError>;

    /// Reads up to `max_len` bytes from the bulk-IN endpoint.
    fn read_bulk_in(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, ReaderError>;
}

/// A parsed `RDR_to_PC_*` reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CcidResponse {
    pub msg_type: u8,
    pub slot: u8,
    pub status: u8,
    pub error: u8,
    pub chain: u8,
    pub payload: Vec<u8>,
}

/// Builds requests and reassembles replies for one CCID-backed reader
/// handle. Owns the host-side sequence counter.
#[derive(Default)]
pub struct CcidFramer {
    seq: u8,
}

impl CcidFramer {
    /// Creates a framer with a fresh sequence counter.
    #[must_use]
    pub fn new() -> Self {
        Self { seq: 0 }
    }

    /// Returns the next sequence number, wrapping at 256 as the standard
    /// permits.
    fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Encodes a `PC_to_RDR_*` message: the 10-byte header followed by
    /// `payload`.
    #[must_use]
    pub fn build_request(&mut self, msg_type: u8, slot: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.push(msg_type);
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.push(slot);
        out.push(self.next_seq());
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(payload);
        out
    }

    /// Sends one CCID message and returns its fully reassembled reply.
    ///
    /// # Errors
    /// Returns [`ReaderError::ProtocolShortFrame`] on a short bulk-OUT
    /// write, and the reassembly/parse errors documented on
    /// [`reassemble`] and [`parse_response`].
    pub fn exchange(
        &mut self,
        io: &mut impl BulkIo,
        msg_type: u8,
        slot: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<CcidResponse, ReaderError> {
        let request = self.build_request(msg_type, slot, payload);
        let written = io.write_bulk_out(&request, timeout)?;
        if written != request.len() {
            return Err(ReaderError::ProtocolShortFrame(format!(
                "CCID bulk OUT wrote {written} of {} bytes",
                request.len()
            )));
        }
        let buf = reassemble(io, timeout)?;
        parse_response(&buf)
    }
}

/// Reassembles one CCID reply across an arbitrary partition of bulk-IN
/// packets, tolerating interleaved zero-length packets.
///
/// # Errors
/// Returns [`ReaderError::ProtocolShortFrame`] if the header never
/// completes within [`HEADER_READ_ATTEMPTS`] attempts, or
/// [`ReaderError::ProtocolIncompleteBody`] if the declared body never
/// arrives (after one doubled-timeout trailer retry).
pub fn reassemble(io: &mut impl BulkIo, timeout: Duration) -> Result<Vec<u8>, ReaderError> {
    let mut buf = Vec::with_capacity(1024);
    let mut timeouts = 0usize;
    while buf.len() < HEADER_LEN && timeouts < HEADER_READ_ATTEMPTS {
        match io.read_bulk_in(READ_CHUNK_LEN, timeout) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(ReaderError::Timeout(_)) => timeouts += 1,
            Err(other) => return Err(other),
        }
    }
    if buf.len() < HEADER_LEN {
        return Err(ReaderError::ProtocolShortFrame(format!(
            "CCID header incomplete after {HEADER_READ_ATTEMPTS} timeouts: got {} bytes",
            buf.len()
        )));
    }

    let dw_length = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let need = HEADER_LEN + dw_length;
    let mut used_trailer_retry = false;
    let mut attempts = 0usize;
    while buf.len() < need && attempts < MAX_BODY_READ_ATTEMPTS {
        attempts += 1;
        match io.read_bulk_in(READ_CHUNK_LEN, timeout) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(ReaderError::Timeout(_)) => {
                if used_trailer_retry {
                    break;
                }
                used_trailer_retry = true;
                match io.read_bulk_in(READ_CHUNK_LEN, timeout * 2) {
                    Ok(chunk) if chunk.is_empty() => break,
                    Ok(chunk) => buf.extend_from_slice(&chunk),
                    Err(ReaderError::Timeout(_)) => break,
                    Err(other) => return Err(other),
                }
            }
            Err(other) => return Err(other),
        }
    }
    if buf.len() < need {
        return Err(ReaderError::ProtocolIncompleteBody(format!(
            "CCID body: need {need} bytes, got {}",
            buf.len()
        )));
    }
    Ok(buf)
}

/// Parses a fully reassembled CCID reply.
///
/// # Errors
/// Returns [`ReaderError::ProtocolIncompleteBody`] if `buf` is shorter than
/// its own declared length.
pub fn parse_response(buf: &[u8]) -> Result<CcidResponse, ReaderError> {
    if buf.len() < HEADER_LEN {
        return Err(ReaderError::ProtocolShortFrame(format!(
            "CCID reply shorter than the {HEADER_LEN}-byte header"
        )));
    }
    let dw_length = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let end = HEADER_LEN + dw_length;
    if buf.len() < end {
        return Err(ReaderError::ProtocolIncompleteBody(format!(
            "CCID reply declares {dw_length} payload bytes but only {} are present",
            buf.len() - HEADER_LEN
        )));
    }
    Ok(CcidResponse {
        msg_type: buf[0],
        slot: buf[5],
        status: buf[7],
        error: buf[8],
        chain: buf[9],
        payload: buf[HEADER_LEN..end].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Feeds back a scripted sequence of bulk-IN reads, recording every
    /// bulk-OUT write verbatim.
    #[derive(Default)]
    struct StubIo {
        writes: Vec<Vec<u8>>,
        reads: VecDeque<Result<Vec<u8>, ReaderError>>,
    }

    impl BulkIo for StubIo {
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

    #[test]
    fn request_header_is_little_endian_with_stamped_sequence() {
        let mut framer = CcidFramer::new();
        let req = framer.build_request(MSG_XFR_BLOCK, 0, &[0xAA; 5]);
        assert_eq!(req.len(), HEADER_LEN + 5);
        assert_eq!(req[0], MSG_XFR_BLOCK);
        assert_eq!(u32::from_le_bytes([req[1], req[2], req[3], req[4]]), 5);
        assert_eq!(req[5], 0);
        assert_eq!(req[6], 1);
        assert_eq!(&req[7..10], &[0, 0, 0]);
    }

    #[test]
    fn sequence_counter_increases_monotonically() {
        let mut framer = CcidFramer::new();
        let seqs: Vec<u8> = (0..3)
            .map(|_| framer.build_request(MSG_GET_SLOT_STATUS, 0, &[])[6])
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn reassembles_power_on_across_one_packet() {
        let mut io = StubIo::default();
        let atr = [0x3Bu8, 0xBE, 0x11, 0x00, 0x00, 0x41, 0x01, 0x38, 0x00, 0x00, 0x00];
        let mut frame = vec![0x80, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&atr);
        io.reads.push_back(Ok(frame));

        let mut framer = CcidFramer::new();
        let resp = framer
            .exchange(&mut io, MSG_ICC_POWER_ON, 0, &[], Duration::from_millis(500))
            .unwrap();
        assert_eq!(resp.msg_type, MSG_DATA_BLOCK);
        assert_eq!(resp.payload, atr);
        assert_eq!(io.writes[0][6], 1);
    }

    #[test]
    fn reassembles_across_split_header_and_interleaved_zlps() {
        let mut io = StubIo::default();
        let payload = [1u8, 2, 3, 4, 5];
        let mut full = vec![0x80, 0x05, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        full.extend_from_slice(&payload);

        // First packet carries only part of the header; a ZLP is
        // interleaved before the rest of the header and body arrive.
        io.reads.push_back(Ok(full[0..4].to_vec()));
        io.reads.push_back(Ok(vec![]));
        io.reads.push_back(Ok(full[4..10].to_vec()));
        io.reads.push_back(Ok(vec![]));
        io.reads.push_back(Ok(full[10..].to_vec()));

        let buf = reassemble(&mut io, Duration::from_millis(500)).unwrap();
        assert_eq!(buf, full);
    }

    #[test]
    fn header_timeout_budget_is_exhausted_before_failing() {
        let mut io = StubIo::default();
        for _ in 0..HEADER_READ_ATTEMPTS {
            io.reads.push_back(Err(ReaderError::Timeout(Duration::from_millis(100))));
        }
        let err = reassemble(&mut io, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ReaderError::ProtocolShortFrame(_)));
    }

    #[test]
    fn short_body_after_trailer_retry_is_incomplete() {
        let mut io = StubIo::default();
        io.reads.push_back(Ok(vec![0x80, 0x05, 0, 0, 0, 0, 1, 0, 0, 0]));
        io.reads.push_back(Err(ReaderError::Timeout(Duration::from_millis(100))));
        io.reads.push_back(Err(ReaderError::Timeout(Duration::from_millis(200))));
        let err = reassemble(&mut io, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ReaderError::ProtocolIncompleteBody(_)));
    }
}
