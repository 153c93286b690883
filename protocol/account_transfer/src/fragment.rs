//! Scanned payload decoding.
//!
//! A payload is `V PP CONTENT` with no separators: one protocol version
//! character, two hex digits for the page index, then the raw page content.

use crate::types::ScanningFragment;
use crate::{Error, Result};

/// The only protocol version this crate understands.
pub const PROTOCOL_VERSION: char = '1';

const HEADER_LEN: usize = 3;

/// Two hex digits address pages `0x00..=0xff`, so a transfer can span at
/// most this many pages including page 0.
pub const MAX_PAGES: u16 = 0x100;

/// Decode one scanned payload into a [`ScanningFragment`].
pub fn decode_fragment(payload: &str) -> Result<ScanningFragment> {
    // Only leading whitespace can be dropped: trailing bytes belong to the
    // content.
    let payload = payload.trim_start();

    if payload.len() < HEADER_LEN || !payload.is_char_boundary(HEADER_LEN) {
        return Err(Error::MalformedFragment(format!(
            "payload too short ({} bytes)",
            payload.len()
        )));
    }

    let (header, content) = payload.split_at(HEADER_LEN);
    let mut chars = header.chars();

    match chars.next() {
        Some(PROTOCOL_VERSION) => {}
        Some(other) => {
            return Err(Error::MalformedFragment(format!(
                "unsupported protocol version {other:?}"
            )))
        }
        None => return Err(Error::MalformedFragment("empty payload".to_string())),
    }

    let page_digits = chars.as_str();
    // `from_str_radix` alone would accept a leading sign.
    if !page_digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::MalformedFragment(format!(
            "invalid page index {page_digits:?}"
        )));
    }
    let page = u16::from_str_radix(page_digits, 16).map_err(|_| {
        Error::MalformedFragment(format!("invalid page index {page_digits:?}"))
    })?;

    Ok(ScanningFragment {
        page,
        content: content.as_bytes().to_vec(),
    })
}

/// Encode a fragment the way the sending device does. Used by tests and
/// tooling that generate QR sequences. `u8` is exactly the range the two
/// hex digits carry; the last page of a `MAX_PAGES` transfer is `0xff`.
pub fn encode_fragment(page: u8, content: &str) -> String {
    format!("{PROTOCOL_VERSION}{page:02x}{content}")
}
