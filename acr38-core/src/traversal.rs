//! Card-facing traversal: selecting files by FID path, reading transparent
//! and linear-fixed EFs, updating transparent EFs, and walking a whole
//! [`Layout`] to read everything or pre-create its files.
//!
//! Everything here is generic over [`Transmit`] so it can be driven by an
//! in-memory script in tests instead of a real card.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ReaderError;
use crate::hex;
use crate::iso7816::{self, MAX_SHORT_APDU_LEN};
use crate::layout::{EfType, Layout, Node, SerialSpec};

/// One C-APDU exchange with the inserted card. Implemented by the facade
/// in `acr38-usb` over a real reader, and by scripted stubs in tests.
pub trait Transmit {
    /// Cold/warm-resets the card and returns its ATR.
    fn power_on(&mut self, timeout: Duration) -> Result<Vec<u8>, ReaderError>;

    /// Sends one C-APDU and returns the card's raw response bytes.
    fn transmit(&mut self, capdu: &[u8], timeout: Duration) -> Result<Vec<u8>, ReaderError>;
}

/// Selects one FID under whatever is currently selected.
///
/// # Errors
/// Propagates [`Transmit::transmit`]'s errors.
pub fn select_fid(t: &mut impl Transmit, fid: u16, timeout: Duration) -> Result<(), ReaderError> {
    t.transmit(&iso7816::select_fid(fid), timeout)?;
    Ok(())
}

/// Selects a sequence of FIDs from the current position, one SELECT per
/// element. There is no absolute-path SELECT in this command set — reaching
/// a deep EF always means re-walking from wherever selection currently is.
///
/// # Errors
/// Propagates [`Transmit::transmit`]'s errors.
pub fn select_path(t: &mut impl Transmit, path: &[u16], timeout: Duration) -> Result<(), ReaderError> {
    for &fid in path {
        select_fid(t, fid, timeout)?;
    }
    Ok(())
}

/// Reads a transparent EF of `size` bytes, chunked into
/// [`MAX_SHORT_APDU_LEN`]-byte READ BINARY calls.
///
/// # Errors
/// Propagates [`Transmit::transmit`]'s errors.
pub fn read_transparent(t: &mut impl Transmit, size: usize, timeout: Duration) -> Result<Vec<u8>, ReaderError> {
    let mut out = Vec::with_capacity(size);
    let mut offset = 0usize;
    while offset < size {
        let chunk_len = (size - offset).min(MAX_SHORT_APDU_LEN);
        #[allow(clippy::cast_possible_truncation)]
        let apdu = iso7816::read_binary(offset as u16, chunk_len as u8);
        let resp = t.transmit(&apdu, timeout)?;
        out.extend_from_slice(&resp);
        offset += chunk_len;
    }
    Ok(out)
}

/// Reads `record_count` fixed-size records (1-indexed), zero-padding any
/// record that came back short.
///
/// # Errors
/// Propagates [`Transmit::transmit`]'s errors.
pub fn read_linear_fixed(
    t: &mut impl Transmit,
    record_size: usize,
    record_count: usize,
    timeout: Duration,
) -> Result<Vec<u8>, ReaderError> {
    let mut out = Vec::with_capacity(record_size * record_count);
    #[allow(clippy::cast_possible_truncation)]
    let record_size_u8 = record_size as u8;
    for record in 1..=record_count {
        #[allow(clippy::cast_possible_truncation)]
        let apdu = iso7816::read_record(record as u8, record_size_u8);
        let mut resp = t.transmit(&apdu, timeout)?;
        resp.resize(record_size, 0x00);
        out.extend_from_slice(&resp[..record_size]);
    }
    Ok(out)
}

/// Writes `data` into a transparent EF, chunked into
/// [`MAX_SHORT_APDU_LEN`]-byte UPDATE BINARY calls.
///
/// # Errors
/// Propagates [`Transmit::transmit`]'s errors.
pub fn update_transparent(t: &mut impl Transmit, data: &[u8], timeout: Duration) -> Result<(), ReaderError> {
    let mut offset = 0usize;
    while offset < data.len() {
        let chunk_len = (data.len() - offset).min(MAX_SHORT_APDU_LEN);
        #[allow(clippy::cast_possible_truncation)]
        let apdu = iso7816::update_binary(offset as u16, &data[offset..offset + chunk_len]);
        t.transmit(&apdu, timeout)?;
        offset += chunk_len;
    }
    Ok(())
}

/// Resolves the card's serial number per [`SerialSpec`]: a literal APDU
/// takes priority over an EF read, returning its hex-encoded response
/// either way.
///
/// # Errors
/// Returns [`ReaderError::LayoutInvalid`] if neither `apdu` nor `ef_path`
/// is set, plus whatever the underlying transmit/select/read calls return.
pub fn resolve_serial(t: &mut impl Transmit, spec: &SerialSpec, timeout: Duration) -> Result<String, ReaderError> {
    if let Some(apdu_hex) = &spec.apdu {
        let capdu = hex::hex_to_bytes(apdu_hex)?;
        let resp = t.transmit(&capdu, timeout)?;
        return Ok(hex::bytes_to_hex(&resp));
    }
    if !spec.ef_path.is_empty() {
        let path = spec
            .ef_path
            .iter()
            .map(|fid| hex::parse_fid(fid))
            .collect::<Result<Vec<u16>, _>>()?;
        select_path(t, &path, timeout)?;
        let data = match spec.ef_type {
            Some(EfType::LinearFixed | EfType::Cyclic) => read_linear_fixed(t, spec.size, 1, timeout)?,
            _ => read_transparent(t, spec.size, timeout)?,
        };
        return Ok(hex::bytes_to_hex(&data));
    }
    Err(ReaderError::LayoutInvalid(
        "serial spec has neither apdu nor efPath".to_string(),
    ))
}

/// Recursively reads every EF under `layout`'s root, writing each node's
/// `saveAs` target under `out_dir`. A write failure for one node is logged
/// and does not abort the rest of the traversal.
///
/// # Errors
/// Propagates selection/read errors from the card. File I/O failures are
/// reported through `on_log`, not as an `Err`.
pub fn read_all(
    t: &mut impl Transmit,
    layout: &Layout,
    out_dir: &Path,
    timeout: Duration,
    on_log: &mut dyn FnMut(&str),
) -> Result<(), ReaderError> {
    t.power_on(timeout)?;
    let root_fid = layout.root.fid_value()?;
    let mut path = vec![root_fid];
    for child in &layout.root.children {
        read_node(t, child, &mut path, out_dir, timeout, on_log)?;
    }
    on_log("read-all complete");
    Ok(())
}

fn read_node(
    t: &mut impl Transmit,
    node: &Node,
    path: &mut Vec<u16>,
    out_dir: &Path,
    timeout: Duration,
    on_log: &mut dyn FnMut(&str),
) -> Result<(), ReaderError> {
    let fid = node.fid_value()?;
    if node.node_type == EfType::Df {
        path.push(fid);
        for child in &node.children {
            read_node(t, child, path, out_dir, timeout, on_log)?;
        }
        path.pop();
        return Ok(());
    }

    let mut selection = path.clone();
    selection.push(fid);
    select_path(t, &selection, timeout)?;

    let data = match node.node_type {
        EfType::Transparent => read_transparent(t, node.size, timeout)?,
        EfType::LinearFixed | EfType::Cyclic => {
            read_linear_fixed(t, node.record_size, node.record_count, timeout)?
        }
        EfType::Df => unreachable!("handled above"),
    };

    if let Some(save_as) = &node.save_as {
        match save_to(out_dir, save_as, &data) {
            Ok(()) => on_log(&format!("saved {save_as} ({} bytes)", data.len())),
            Err(err) => on_log(&format!("failed to save {save_as}: {err}")),
        }
    }
    Ok(())
}

fn save_to(out_dir: &Path, relative: &str, data: &[u8]) -> Result<(), ReaderError> {
    let full = out_dir.join(relative);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(full, data)?;
    Ok(())
}

/// Walks `layout`, running each node's `createApdus` script against a
/// freshly selected EF and re-selecting it by FID afterward, exactly as
/// the original card-markup tool did.
///
/// # Errors
/// Propagates selection/transmit errors and malformed hex in
/// `createApdus` (already caught by [`Layout::validate`] if the layout was
/// loaded through it).
pub fn markup_card(
    t: &mut impl Transmit,
    layout: &Layout,
    timeout: Duration,
    on_log: &mut dyn FnMut(&str),
) -> Result<(), ReaderError> {
    let root_fid = layout.root.fid_value()?;
    select_fid(t, root_fid, timeout)?;
    let mut path = vec![root_fid];
    for child in &layout.root.children {
        markup_node(t, child, &mut path, timeout, on_log)?;
    }
    on_log("markup complete");
    Ok(())
}

fn markup_node(
    t: &mut impl Transmit,
    node: &Node,
    path: &mut Vec<u16>,
    timeout: Duration,
    on_log: &mut dyn FnMut(&str),
) -> Result<(), ReaderError> {
    let fid = node.fid_value()?;
    if node.node_type == EfType::Df {
        let mut selection = path.clone();
        selection.push(fid);
        select_path(t, &selection, timeout)?;
        path.push(fid);
        for child in &node.children {
            markup_node(t, child, path, timeout, on_log)?;
        }
        path.pop();
        return Ok(());
    }

    select_path(t, path, timeout)?;
    for apdu_hex in &node.create_apdus {
        let capdu = hex::hex_to_bytes(apdu_hex)?;
        t.transmit(&capdu, timeout)?;
    }
    select_fid(t, fid, timeout)?;
    on_log(&format!("prepared EF {} (fid {:04x})", node.name, fid));
    Ok(())
}

/// Resolves a save-as relative path against `out_dir`, for callers that
/// want to know the final path without writing (used by `acr38-cli` to
/// print where a file landed).
#[must_use]
pub fn resolved_save_path(out_dir: &Path, relative: &str) -> PathBuf {
    out_dir.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    struct ScriptedCard {
        responses: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl ScriptedCard {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self {
                responses: responses.into(),
                sent: Vec::new(),
            }
        }
    }

    impl Transmit for ScriptedCard {
        fn power_on(&mut self, _timeout: Duration) -> Result<Vec<u8>, ReaderError> {
            Ok(vec![0x3B, 0x00])
        }

        fn transmit(&mut self, capdu: &[u8], _timeout: Duration) -> Result<Vec<u8>, ReaderError> {
            self.sent.push(capdu.to_vec());
            Ok(self.responses.pop_front().unwrap_or_default())
        }
    }

    #[test]
    fn read_transparent_chunks_at_255_bytes() {
        let mut card = ScriptedCard::new(vec![vec![0xAA; 255], vec![0xBB; 10]]);
        let data = read_transparent(&mut card, 265, Duration::from_millis(200)).unwrap();
        assert_eq!(data.len(), 265);
        assert_eq!(card.sent[0][4], 0xFF);
        assert_eq!(card.sent[1][2..4], [0x00, 0xFF]);
    }

    #[test]
    fn read_linear_fixed_pads_short_records() {
        let mut card = ScriptedCard::new(vec![vec![1, 2, 3]]);
        let data = read_linear_fixed(&mut card, 8, 1, Duration::from_millis(200)).unwrap();
        assert_eq!(data, vec![1, 2, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn read_all_saves_files_under_out_dir() {
        let layout = Layout::from_json(
            r#"{
                "schema": "rik2/1",
                "card": { "name": "test" },
                "root": {
                    "name": "MF", "fid": "3F00", "type": "df",
                    "children": [
                        {
                            "name": "EF.DATA", "fid": "2F01", "type": "transparent",
                            "size": 4, "saveAs": "data/ef2f01.bin"
                        }
                    ]
                }
            }"#,
        )
        .unwrap();
        let mut card = ScriptedCard::new(vec![vec![1, 2, 3, 4]]);
        let dir = tempdir().unwrap();
        let mut logs = Vec::new();
        read_all(&mut card, &layout, dir.path(), Duration::from_millis(200), &mut |m| {
            logs.push(m.to_string());
        })
        .unwrap();
        let saved = fs::read(dir.path().join("data/ef2f01.bin")).unwrap();
        assert_eq!(saved, vec![1, 2, 3, 4]);
        assert!(logs.iter().any(|l| l.contains("saved")));
    }

    #[test]
    fn markup_card_runs_create_apdus_then_reselects() {
        let layout = Layout::from_json(
            r#"{
                "schema": "rik2/1",
                "card": { "name": "test" },
                "root": {
                    "name": "MF", "fid": "3F00", "type": "df",
                    "children": [
                        {
                            "name": "EF.NEW", "fid": "2F02", "type": "transparent",
                            "size": 1, "createApdus": ["00E00000023F00"]
                        }
                    ]
                }
            }"#,
        )
        .unwrap();
        let mut card = ScriptedCard::new(vec![vec![0x90, 0x00], vec![]]);
        let mut logs = Vec::new();
        markup_card(&mut card, &layout, Duration::from_millis(200), &mut |m| {
            logs.push(m.to_string());
        })
        .unwrap();
        assert_eq!(card.sent.len(), 4); // select root, create apdu, reselect EF
        assert!(logs.iter().any(|l| l.contains("prepared EF")));
    }
}
