//! The NGCRYPT two-part MIME/PGP container
//!
//! An NGCRYPT message is an outer `multipart/mixed` envelope with
//! exactly two parts: part 1 is the encrypted original header block
//! (plus an `Rfc822-Size` armor header recording the original
//! message's total byte length, so `RFC822.SIZE` can be answered
//! without fetching part 2); part 2 is the encrypted original body.
//! Concatenating the two parts' decrypted plaintext reproduces the
//! original message byte-for-byte.
//!
//! Grounded on `ngcrypt/message.go` (`Encrypt`, `DecryptHeader`,
//! `DecryptBody`, `DecryptMessage`, `DecryptWholeMessage`).

use crate::cleaner::Cleaner;
use crate::codec::{self, armor};
use crate::error::{Error, Result};
use crate::headers::Header;
use crate::keyring::Keyring;
use pgp::composed::{SignedPublicKey, SignedSecretKey};

const BLOCK_TYPE: &str = "NGCRYPT MESSAGE";

/// Build the two-part MIME/PGP container for `mail`.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if `mail` has no header/body
/// separator, or [`Error::Crypto`] if signing/encryption fails.
pub fn encrypt(
    mail: &[u8],
    recipients: &[SignedPublicKey],
    signer: Option<&SignedSecretKey>,
    cleaner: &dyn Cleaner,
) -> Result<Vec<u8>> {
    let size = mail.len();
    let (mut header, body) = Header::parse(mail)?;
    let original_header = header.to_bytes();

    header.remove_prefixed("Content-");
    cleaner.clean(&mut header);

    let boundary = format!("b_{:016x}", rand::random::<u64>());
    header.set_content_type("multipart/mixed", &[("boundary", &boundary)]);
    header.set("X-Ngcrypt-Pgp", "enabled");
    header.set("X-Ngcrypt-Size", size.to_string());

    let part1 = codec::encode(
        &original_header,
        recipients,
        signer,
        BLOCK_TYPE,
        &[("Rfc822-Size".to_string(), size.to_string())],
    )?;
    let part2 = codec::encode(body, recipients, signer, BLOCK_TYPE, &[])?;

    let mut out = header.to_bytes();
    write_part(&mut out, &boundary, &part1);
    write_part(&mut out, &boundary, &part2);
    write_closing_boundary(&mut out, &boundary);
    Ok(out)
}

fn write_part(out: &mut Vec<u8>, boundary: &str, armored: &[u8]) {
    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(b"Content-Type: text/plain\r\n");
    out.extend_from_slice(b"Subject: No Subject\r\n");
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(armored);
    out.extend_from_slice(b"\r\n");
}

fn write_closing_boundary(out: &mut Vec<u8>, boundary: &str) {
    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"--\r\n");
}

/// The header half of an NGCRYPT container, decrypted from part 1.
pub struct DecryptedHeader {
    pub header: Header,
    /// The original message's total size, from the `Rfc822-Size`
    /// armor header — answers `RFC822.SIZE` without decrypting part 2.
    pub size: Option<usize>,
    pub signature_error: Option<Error>,
}

/// Decrypt part 1, recovering the original header and its recorded
/// `RFC822.SIZE`.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] for a bad armor/header shape, or
/// [`Error::Crypto`] if decryption fails.
pub fn decrypt_header(part1: &[u8], keyring: &Keyring) -> Result<DecryptedHeader> {
    let decoded = codec::decode(armor::skip_leading_noise(part1), keyring)?;
    let size = decoded
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Rfc822-Size"))
        .and_then(|(_, v)| v.parse().ok());
    let (header, _) = Header::parse(&decoded.plaintext)?;
    Ok(DecryptedHeader { header, size, signature_error: decoded.signature_error })
}

/// Decrypt part 2, recovering the original body bytes.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] for a bad armor shape, or
/// [`Error::Crypto`] if decryption fails.
pub fn decrypt_body(part2: &[u8], keyring: &Keyring) -> Result<(Vec<u8>, Option<Error>)> {
    let decoded = codec::decode(armor::skip_leading_noise(part2), keyring)?;
    Ok((decoded.plaintext, decoded.signature_error))
}

/// Decrypt both parts and concatenate them back into the original
/// message bytes.
///
/// Part 1 decrypts to the original header block; part 2 decrypts to
/// the original body. Concatenation reproduces the message verbatim —
/// there is no re-derivation of the body from part 1.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] or [`Error::Crypto`] as above.
pub fn decrypt_message(part1: &[u8], part2: Option<&[u8]>, keyring: &Keyring) -> Result<(Vec<u8>, Option<Error>)> {
    let d1 = codec::decode(armor::skip_leading_noise(part1), keyring)?;
    let mut out = d1.plaintext;
    let mut signature_error = d1.signature_error;

    let Some(part2) = part2 else {
        return Ok((out, signature_error));
    };
    let part2 = armor::skip_leading_noise(part2);
    if part2.is_empty() {
        return Ok((out, signature_error));
    }

    let d2 = codec::decode(part2, keyring)?;
    out.extend_from_slice(&d2.plaintext);
    if signature_error.is_none() {
        signature_error = d2.signature_error;
    }

    Ok((out, signature_error))
}

/// Decrypt a complete NGCRYPT container (the outer `multipart/mixed`
/// message, not its parts individually), for callers that only have
/// the whole-message literal (e.g. `APPEND`-time round-trip checks).
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if `raw` isn't a two-part
/// multipart/mixed message, or [`Error::Crypto`] on decryption
/// failure.
pub fn decrypt_whole_message(raw: &[u8], keyring: &Keyring) -> Result<(Vec<u8>, Option<Error>)> {
    let message = mail_parser::MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::MalformedInput("not a valid MIME message".into()))?;

    let mut parts = message.parts.iter();
    let part1 = parts
        .next()
        .map(|p| &raw[p.offset_body..p.offset_end])
        .ok_or_else(|| Error::MalformedInput("missing part 1".into()))?;
    let part2 = parts.next().map(|p| &raw[p.offset_body..p.offset_end]);

    decrypt_message(part1, part2, keyring)
}
