//! Hex codec for FIDs, APDUs, and ATR strings found in the layout document.
//!
//! Input is whitespace- and `:`-insensitive and case-insensitive; output is
//! always lower-case with a single space between bytes.

use crate::error::ReaderError;

/// Decodes a hex string into bytes, ignoring spaces, tabs, newlines and `:`.
///
/// # Errors
/// Returns [`ReaderError::LayoutInvalid`] for a non-hex character or an odd
/// number of hex digits.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, ReaderError> {
    let mut out = Vec::with_capacity(s.len() / 2);
    let mut hi: Option<u8> = None;
    for c in s.chars() {
        if c == ' ' || c == ':' || c == '\t' || c == '\n' || c == '\r' {
            continue;
        }
        let v = c
            .to_digit(16)
            .ok_or_else(|| ReaderError::LayoutInvalid(format!("invalid hex character '{c}'")))?
            as u8;
        match hi.take() {
            None => hi = Some(v),
            Some(h) => out.push((h << 4) | v),
        }
    }
    if hi.is_some() {
        return Err(ReaderError::LayoutInvalid(
            "hex string has an odd number of digits".to_string(),
        ));
    }
    Ok(out)
}

/// Renders bytes as lower-case hex, space-separated.
#[must_use]
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Re-renders a hex string in canonical form (lower-case, space-separated).
///
/// # Errors
/// Propagates [`hex_to_bytes`]'s errors.
pub fn canonicalize(s: &str) -> Result<String, ReaderError> {
    Ok(bytes_to_hex(&hex_to_bytes(s)?))
}

/// Decodes a 2-byte hex FID into its 16-bit value.
///
/// # Errors
/// Returns [`ReaderError::LayoutInvalid`] if the string does not decode to
/// exactly two bytes.
pub fn parse_fid(s: &str) -> Result<u16, ReaderError> {
    let bytes = hex_to_bytes(s)?;
    match bytes.as_slice() {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(ReaderError::LayoutInvalid(format!(
            "FID '{s}' must decode to exactly 2 bytes, got {}",
            bytes.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_canonical_form() {
        for sample in ["3F:00", "3f 00", "3F00", "00 a4 00 0c 02 3f 00"] {
            let canon = canonicalize(sample).unwrap();
            assert_eq!(canon, canonicalize(&canon).unwrap());
        }
    }

    #[test]
    fn canonicalizes_case_and_whitespace() {
        assert_eq!(canonicalize("3F:00").unwrap(), "3f 00");
        assert_eq!(canonicalize(" 3f\n00\t").unwrap(), "3f 00");
    }

    #[test]
    fn rejects_odd_length() {
        assert!(hex_to_bytes("abc").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        assert!(hex_to_bytes("zz").is_err());
    }

    #[test]
    fn parses_fid() {
        assert_eq!(parse_fid("3F00").unwrap(), 0x3F00);
        assert!(parse_fid("3F").is_err());
    }
}
