//! ACS legacy vendor framing, used by first-generation ACR38 firmware that
//! exposes a single bulk pair instead of a CCID interface.
//!
//! Wire format: a 4-byte header (magic `0x01`, then an instruction byte on
//! the request / a status byte on the reply, then a big-endian `u16`
//! length), followed by that many payload bytes. Shares [`crate::ccid::BulkIo`]
//! with the CCID framer since both ride the same bulk pipe.

use std::time::Duration;

use crate::ccid::BulkIo;
use crate::error::ReaderError;

/// Magic byte that opens every ACS frame, request or reply.
pub const MAGIC: u8 = 0x01;

pub const INS_GET_ACR_STAT: u8 = 0x01;
pub const INS_RESET_DEFAULT: u8 = 0x80;
pub const INS_POWER_OFF: u8 = 0x81;
pub const INS_EXCHANGE_T0: u8 = 0xA0;

const HEADER_LEN: usize = 4;
const READ_CHUNK_LEN: usize = 256;
const HEADER_READ_ATTEMPTS: usize = 5;
const MAX_BODY_READ_ATTEMPTS: usize = 256;

/// A parsed ACS reply: the status byte and the payload that followed it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AcsResponse {
    pub status: u8,
    pub payload: Vec<u8>,
}

impl AcsResponse {
    /// `true` when the status byte indicates success (`0x00`).
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 0x00
    }
}

/// Builds requests and reassembles replies for the ACS legacy frame format.
/// Stateless — unlike CCID, ACS frames carry no sequence counter.
#[derive(Default)]
pub struct AcsFramer;

impl AcsFramer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Encodes one ACS request.
    #[must_use]
    pub fn build_request(&self, ins: u8, payload: &[u8]) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        let len = payload.len() as u16;
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.push(MAGIC);
        out.push(ins);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Sends one ACS request and returns the parsed reply.
    ///
    /// # Errors
    /// Returns [`ReaderError::ProtocolShortFrame`] on a short bulk-OUT write
    /// or an incomplete header, [`ReaderError::ProtocolBadMagic`] if the
    /// reply's magic byte isn't [`MAGIC`], and
    /// [`ReaderError::ProtocolIncompleteBody`] if the declared payload never
    /// fully arrives.
    pub fn exchange(
        &self,
        io: &mut impl BulkIo,
        ins: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<AcsResponse, ReaderError> {
        let request = self.build_request(ins, payload);
        let written = io.write_bulk_out(&request, timeout)?;
        if written != request.len() {
            return Err(ReaderError::ProtocolShortFrame(format!(
                "ACS bulk OUT wrote {written} of {} bytes",
                request.len()
            )));
        }
        let buf = reassemble(io, timeout)?;
        parse_response(&buf)
    }

    /// Issues [`INS_RESET_DEFAULT`] and returns `Err` unless it reports
    /// success, matching the original backend's reset semantics.
    ///
    /// # Errors
    /// Returns [`ReaderError::BackendRejected`] if the reset failed, plus
    /// the exchange errors documented on [`AcsFramer::exchange`].
    pub fn reset_default(&self, io: &mut impl BulkIo, timeout: Duration) -> Result<AcsResponse, ReaderError> {
        let resp = self.exchange(io, INS_RESET_DEFAULT, &[], timeout)?;
        if !resp.is_ok() {
            return Err(ReaderError::BackendRejected(resp.status));
        }
        Ok(resp)
    }

    /// Issues [`INS_POWER_OFF`].
    ///
    /// # Errors
    /// Returns [`ReaderError::BackendRejected`] if power-off failed, plus
    /// the exchange errors documented on [`AcsFramer::exchange`].
    pub fn power_off(&self, io: &mut impl BulkIo, timeout: Duration) -> Result<AcsResponse, ReaderError> {
        let resp = self.exchange(io, INS_POWER_OFF, &[], timeout)?;
        if !resp.is_ok() {
            return Err(ReaderError::BackendRejected(resp.status));
        }
        Ok(resp)
    }

    /// Issues [`INS_EXCHANGE_T0`] with a raw C-APDU.
    ///
    /// # Errors
    /// Returns [`ReaderError::BackendRejected`] if the exchange failed, plus
    /// the exchange errors documented on [`AcsFramer::exchange`].
    pub fn exchange_t0(
        &self,
        io: &mut impl BulkIo,
        capdu: &[u8],
        timeout: Duration,
    ) -> Result<AcsResponse, ReaderError> {
        let resp = self.exchange(io, INS_EXCHANGE_T0, capdu, timeout)?;
        if !resp.is_ok() {
            return Err(ReaderError::BackendRejected(resp.status));
        }
        Ok(resp)
    }
}

/// Reassembles one ACS reply, tolerating interleaved zero-length packets
/// the same way [`crate::ccid::reassemble`] does.
///
/// # Errors
/// See [`AcsFramer::exchange`].
pub fn reassemble(io: &mut impl BulkIo, timeout: Duration) -> Result<Vec<u8>, ReaderError> {
    let mut buf = Vec::with_capacity(256);
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
            "ACS header incomplete after {HEADER_READ_ATTEMPTS} timeouts: got {} bytes",
            buf.len()
        )));
    }
    if buf[0] != MAGIC {
        return Err(ReaderError::ProtocolBadMagic(buf[0]));
    }

    let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let need = HEADER_LEN + len;
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
            "ACS body: need {need} bytes, got {}",
            buf.len()
        )));
    }
    Ok(buf)
}

/// Parses a fully reassembled ACS reply.
///
/// # Errors
/// Returns [`ReaderError::ProtocolBadMagic`] if the magic byte is wrong, or
/// [`ReaderError::ProtocolIncompleteBody`] if `buf` is shorter than its own
/// declared length.
pub fn parse_response(buf: &[u8]) -> Result<AcsResponse, ReaderError> {
    if buf.len() < HEADER_LEN {
        return Err(ReaderError::ProtocolShortFrame(format!(
            "ACS reply shorter than the {HEADER_LEN}-byte header"
        )));
    }
    if buf[0] != MAGIC {
        return Err(ReaderError::ProtocolBadMagic(buf[0]));
    }
    let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let end = HEADER_LEN + len;
    if buf.len() < end {
        return Err(ReaderError::ProtocolIncompleteBody(format!(
            "ACS reply declares {len} payload bytes but only {} are present",
            buf.len() - HEADER_LEN
        )));
    }
    Ok(AcsResponse {
        status: buf[1],
        payload: buf[HEADER_LEN..end].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

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
    fn request_header_uses_big_endian_length() {
        let framer = AcsFramer::new();
        let req = framer.build_request(INS_EXCHANGE_T0, &[0xAA; 260]);
        assert_eq!(req[0], MAGIC);
        assert_eq!(req[1], INS_EXCHANGE_T0);
        assert_eq!(u16::from_be_bytes([req[2], req[3]]), 260);
    }

    #[test]
    fn reset_default_rejects_nonzero_status() {
        let mut io = StubIo::default();
        io.reads.push_back(Ok(vec![MAGIC, 0x01, 0x00, 0x00]));
        let framer = AcsFramer::new();
        let err = framer.reset_default(&mut io, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ReaderError::BackendRejected(0x01)));
    }

    #[test]
    fn exchange_t0_returns_payload_on_success() {
        let mut io = StubIo::default();
        io.reads.push_back(Ok(vec![MAGIC, 0x00, 0x00, 0x02, 0x90, 0x00]));
        let framer = AcsFramer::new();
        let resp = framer
            .exchange_t0(&mut io, &[0x00, 0xA4, 0x00, 0x0C], Duration::from_millis(200))
            .unwrap();
        assert_eq!(resp.payload, vec![0x90, 0x00]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut io = StubIo::default();
        io.reads.push_back(Ok(vec![0x02, 0x00, 0x00, 0x00]));
        let err = reassemble(&mut io, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ReaderError::ProtocolBadMagic(0x02)));
    }
}
