//! ASCII armor framing: `-----BEGIN <type>-----` ... `-----END <type>-----`
//!
//! NGCRYPT reuses the RFC 4880 armor shape but with its own block type
//! string (`NGCRYPT MESSAGE` rather than `PGP MESSAGE`), plus an
//! extra header carrying `Rfc822-Size`. rPGP's own armor writer is
//! scoped to the standard OpenPGP block types, so framing is handled
//! here directly; `pgp::composed::Message` is only asked to serialize
//! to its binary packet form, which this module wraps.
//!
//! Grounded on `ngcrypt/armor2.go` (`armor.Encode`/`armor.Decode` calls
//! with a custom `ngcryptMessageType`) and `ngcrypt/header.go`'s
//! `removeHeaderIfAny` (tolerant skip of leading noise before the
//! armor tag).

use crate::error::{Error, Result};
use base64::Engine as _;

const LINE_WIDTH: usize = 64;
const BEGIN_PREFIX: &str = "-----BEGIN ";
const END_PREFIX: &str = "-----END ";
const TAG_SUFFIX: &str = "-----";

/// A decoded armor block: its type tag, header lines, and raw body.
pub struct ArmorBlock {
    pub block_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Encode `body` as an ASCII-armored block of type `block_type`.
pub fn encode(out: &mut Vec<u8>, block_type: &str, headers: &[(String, String)], body: &[u8]) {
    out.extend_from_slice(BEGIN_PREFIX.as_bytes());
    out.extend_from_slice(block_type.as_bytes());
    out.extend_from_slice(TAG_SUFFIX.as_bytes());
    out.extend_from_slice(b"\r\n");

    for (k, v) in headers {
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(v.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");

    let encoded = base64::engine::general_purpose::STANDARD.encode(body);
    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }

    let crc = crc24(body);
    let crc_bytes = [((crc >> 16) & 0xff) as u8, ((crc >> 8) & 0xff) as u8, (crc & 0xff) as u8];
    out.push(b'=');
    out.extend_from_slice(base64::engine::general_purpose::STANDARD.encode(crc_bytes).as_bytes());
    out.extend_from_slice(b"\r\n");

    out.extend_from_slice(END_PREFIX.as_bytes());
    out.extend_from_slice(block_type.as_bytes());
    out.extend_from_slice(TAG_SUFFIX.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Decode an ASCII-armored block, verifying its CRC24 checksum.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if no `-----BEGIN ...-----` tag is
/// found, the block never closes, a header line has no terminating
/// blank line, the base64 body is invalid, or the checksum mismatches.
pub fn decode(input: &[u8]) -> Result<ArmorBlock> {
    let text = std::str::from_utf8(input)
        .map_err(|e| Error::MalformedInput(format!("armor is not valid utf-8: {e}")))?;

    let begin_line = text
        .lines()
        .find(|l| l.starts_with(BEGIN_PREFIX))
        .ok_or_else(|| Error::MalformedInput("no armor header found".into()))?;
    let block_type = begin_line
        .strip_prefix(BEGIN_PREFIX)
        .and_then(|s| s.strip_suffix(TAG_SUFFIX))
        .ok_or_else(|| Error::MalformedInput("malformed armor header".into()))?
        .to_string();

    let after_begin = &text[text.find(begin_line).unwrap() + begin_line.len()..];

    let mut headers = Vec::new();
    let mut lines = after_begin.lines();
    let mut body_lines: Vec<&str> = Vec::new();
    for line in &mut lines {
        if line.trim().is_empty() {
            break;
        }
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| Error::MalformedInput(format!("malformed armor header line: {line}")))?;
        headers.push((k.trim().to_string(), v.trim().to_string()));
    }

    let mut checksum_line = None;
    for line in lines {
        if line.starts_with(END_PREFIX) {
            break;
        }
        if let Some(c) = line.strip_prefix('=') {
            checksum_line = Some(c.to_string());
            continue;
        }
        body_lines.push(line);
    }

    let body_b64: String = body_lines.concat();
    let body = base64::engine::general_purpose::STANDARD
        .decode(body_b64.trim())
        .map_err(|e| Error::MalformedInput(format!("invalid armor body: {e}")))?;

    if let Some(expected_b64) = checksum_line {
        let expected = base64::engine::general_purpose::STANDARD
            .decode(expected_b64.trim())
            .map_err(|e| Error::MalformedInput(format!("invalid armor checksum: {e}")))?;
        let actual = crc24(&body);
        let actual_bytes = [((actual >> 16) & 0xff) as u8, ((actual >> 8) & 0xff) as u8, (actual & 0xff) as u8];
        if expected != actual_bytes {
            return Err(Error::MalformedInput("armor checksum mismatch".into()));
        }
    }

    Ok(ArmorBlock { block_type, headers, body })
}

/// Whether `input` starts (ignoring leading blank/noise lines) with an
/// armor `BEGIN` tag, without fully decoding it.
///
/// Grounded on `ngcrypt/header.go`'s `removeHeaderIfAny`: the legacy
/// per-leaf codec tolerates leading blank lines (or other noise)
/// before the real armor tag and treats anything else as plain,
/// unencrypted text.
#[must_use]
pub fn skip_leading_noise(input: &[u8]) -> &[u8] {
    let mut rest = input;
    loop {
        if rest.starts_with(b"-----BEGIN") {
            return rest;
        }
        match rest.iter().position(|&b| b == b'\n') {
            Some(i) if i > 0 => rest = &rest[i + 1..],
            _ => return rest,
        }
    }
}

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

fn crc24(data: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}
