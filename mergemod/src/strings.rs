use std::convert::TryFrom;
use std::io::Write;

use crate::{MergeError, Result};
use encoding::label::encoding_from_whatwg_label;
use encoding::{DecoderTrap, EncoderTrap};

/// Serializes a string the way merge mods store them:
/// [-(UTF-16 code units + 1) as i32]:[UTF-16LE code units]:[NUL code unit]
///
/// A negative length marks the payload as UTF-16.
pub fn serialize_length_prefixed_str_into<W: Write>(mut writer: W, string: &str) -> Result<()> {
    let mut encoded = serialize_to_utf16le(string)?;
    encoded.extend_from_slice(&[0, 0]); // NUL terminator
    let code_units = i32::try_from(encoded.len() / 2)?;
    bincode::serialize_into(writer.by_ref(), &-code_units)?;
    writer.write_all(encoded.as_slice())?;
    Ok(())
}

/// Number of payload bytes that follow a length prefix.
pub fn payload_size(length_prefix: i32) -> u64 {
    if length_prefix < 0 {
        2 * u64::from(length_prefix.unsigned_abs())
    } else {
        length_prefix as u64
    }
}

/// Decodes the payload of a length-prefixed string.
///
/// Negative prefixes denote UTF-16LE, positive ones windows-1252. Both forms
/// carry a trailing NUL which is not part of the result.
pub fn deserialize_length_prefixed_str(length_prefix: i32, payload: &[u8]) -> Result<String> {
    if payload.len() as u64 != payload_size(length_prefix) {
        return Err(MergeError::malformed_string(
            "payload size does not match its length prefix",
        ));
    }
    let mut string = if length_prefix < 0 {
        string_from_utf16le(payload)?
    } else {
        string_from_win_1252(payload)?
    };
    if string.ends_with('\0') {
        string.pop();
    }
    Ok(string)
}

pub fn serialize_to_utf16le(string: &str) -> Result<Vec<u8>> {
    let encoder = encoding_from_whatwg_label("utf-16le")
        .ok_or_else(|| MergeError::malformed_string("Encoder unavailable"))?;
    encoder
        .encode(string, EncoderTrap::Strict)
        .map_err(|_| MergeError::malformed_string("Encoding failed"))
}

pub fn string_from_utf16le(v: &[u8]) -> Result<String> {
    let decoder = encoding_from_whatwg_label("utf-16le")
        .ok_or_else(|| MergeError::malformed_string("Decoder unavailable"))?;
    decoder
        .decode(v, DecoderTrap::Strict)
        .map_err(MergeError::malformed_string)
}

pub fn string_from_win_1252(v: &[u8]) -> Result<String> {
    let decoder = encoding_from_whatwg_label("windows-1252")
        .ok_or_else(|| MergeError::malformed_string("Decoder unavailable"))?;
    decoder
        .decode(v, DecoderTrap::Strict)
        .map_err(MergeError::malformed_string)
}
