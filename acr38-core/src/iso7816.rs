//! ISO 7816-4 APDU construction for the subset of commands the traversal
//! engine needs: SELECT, READ BINARY, READ RECORD and UPDATE BINARY.
//!
//! Every read/update here is a single short APDU; chunking a buffer larger
//! than [`MAX_SHORT_APDU_LEN`] across several of them is
//! [`traversal`](crate::traversal)'s job, not this module's.

/// The largest `Lc`/`Le` a short APDU can carry.
pub const MAX_SHORT_APDU_LEN: usize = 0xFF;

/// `SELECT` by 2-byte FID, P1=0x00 (select EF/DF under current), P2=0x0C
/// (no response data, first occurrence).
#[must_use]
pub fn select_fid(fid: u16) -> Vec<u8> {
    vec![0x00, 0xA4, 0x00, 0x0C, 0x02, (fid >> 8) as u8, (fid & 0xFF) as u8]
}

/// `READ BINARY` at a 15-bit offset, reading up to [`MAX_SHORT_APDU_LEN`]
/// bytes.
///
/// # Panics
/// Panics if `len` exceeds [`MAX_SHORT_APDU_LEN`] or `offset` doesn't fit
/// in 15 bits.
#[must_use]
pub fn read_binary(offset: u16, len: u8) -> Vec<u8> {
    assert!(usize::from(len) <= MAX_SHORT_APDU_LEN);
    assert!(offset < 0x8000, "READ BINARY offset must fit in 15 bits");
    vec![0x00, 0xB0, (offset >> 8) as u8, (offset & 0xFF) as u8, len]
}

/// `READ RECORD`, P2=0x04 (absolute record number, read one record).
#[must_use]
pub fn read_record(record: u8, record_size: u8) -> Vec<u8> {
    vec![0x00, 0xB2, record, 0x04, record_size]
}

/// `UPDATE BINARY` at a 15-bit offset with `data` appended as the command
/// body (`Lc` equals `data.len()`).
///
/// # Panics
/// Panics if `data` is longer than [`MAX_SHORT_APDU_LEN`] or `offset`
/// doesn't fit in 15 bits.
#[must_use]
pub fn update_binary(offset: u16, data: &[u8]) -> Vec<u8> {
    assert!(data.len() <= MAX_SHORT_APDU_LEN);
    assert!(offset < 0x8000, "UPDATE BINARY offset must fit in 15 bits");
    #[allow(clippy::cast_possible_truncation)]
    let lc = data.len() as u8;
    let mut apdu = vec![0x00, 0xD6, (offset >> 8) as u8, (offset & 0xFF) as u8, lc];
    apdu.extend_from_slice(data);
    apdu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_fid_matches_wire_layout() {
        assert_eq!(select_fid(0x3F00), vec![0x00, 0xA4, 0x00, 0x0C, 0x02, 0x3F, 0x00]);
    }

    #[test]
    fn read_binary_encodes_offset_and_length() {
        assert_eq!(read_binary(0x0100, 0x20), vec![0x00, 0xB0, 0x01, 0x00, 0x20]);
    }

    #[test]
    fn read_record_uses_p2_absolute() {
        assert_eq!(read_record(3, 16), vec![0x00, 0xB2, 0x03, 0x04, 16]);
    }

    #[test]
    fn update_binary_appends_data_after_lc() {
        let apdu = update_binary(0x0010, &[0xDE, 0xAD]);
        assert_eq!(apdu, vec![0x00, 0xD6, 0x00, 0x10, 0x02, 0xDE, 0xAD]);
    }
}
