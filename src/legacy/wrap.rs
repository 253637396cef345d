//! The legacy "wrap" envelope: an entire message hidden inside a
//! single armored PGP part, rather than per-leaf MIME encryption.
//!
//! Grounded on `epgpmessage/message.go`'s `EncryptWrap`/`DecryptWrap`.
//! Wrap envelopes may nest (a wrapped message can itself be wrapped);
//! unwrapping recurses until a non-wrapped entity is reached, bounded
//! by a depth limit the source does not itself enforce.

use crate::codec;
use crate::error::{Error, Result};
use crate::headers::Header;
use crate::keyring::Keyring;
use pgp::composed::{SignedPublicKey, SignedSecretKey};

const WRAP_SUBJECT: &str = "A Secret message (PGP)";

/// Whether `header` marks a wrap envelope: `Content-Type` carries the
/// `rfc822=pgp` parameter.
///
/// Grounded on `checkIsWrap`.
fn is_wrap_envelope(header: &Header) -> bool {
    let (_, params) = header.content_type();
    params.iter().any(|(k, v)| k == "rfc822" && v == "pgp")
}

/// Wrap `mail` inside a single armored PGP part.
///
/// The outer header keeps only `Sender`/`From`/`To`/`Message-ID`, a
/// fixed subject, `Content-Type: text/plain; rfc822=pgp`, and
/// `X-Epgp-Wrapped` recording the inner message's original
/// `Content-Type` (a supplement over the distilled spec, present in
/// the source's `EncryptWrap`). The body is the inline-armored codec
/// (no compressor) over the original header-plus-body bytes.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if `mail` has no header/body
/// separator, or [`Error::Crypto`] if signing/encryption fails.
pub fn encrypt_wrap(mail: &[u8], recipients: &[SignedPublicKey], signer: &SignedSecretKey) -> Result<Vec<u8>> {
    let (inner_header, _) = Header::parse(mail)?;

    let mut outer = Header::new();
    for value in inner_header.get_all("Sender") {
        outer.add("Sender", value);
    }
    for value in inner_header.get_all("From") {
        outer.add("From", value);
    }
    for value in inner_header.get_all("To") {
        outer.add("To", value);
    }
    for value in inner_header.get_all("Message-Id") {
        outer.add("Message-ID", value);
    }
    outer.set("Subject", WRAP_SUBJECT);
    let inner_content_type = inner_header.get("Content-Type").unwrap_or("text/plain").to_string();
    outer.set_content_type("text/plain", &[("rfc822", "pgp")]);
    outer.set("X-Epgp-Wrapped", inner_content_type);

    let armored = codec::encode_with_compression(mail, recipients, Some(signer), "PGP MESSAGE", &[], false)?;

    let mut out = outer.to_bytes();
    out.extend_from_slice(&armored);
    Ok(out)
}

/// Strip wrap envelopes from `mail`, recursing until a non-wrapped
/// entity is found or `depth_limit` is exhausted.
///
/// Grounded on `DecryptWrap`: a non-wrap entity is passed through
/// header-plus-body verbatim (no per-leaf decryption happens here at
/// all — only envelope removal).
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if the recursion exceeds
/// `depth_limit`, the header block is malformed, or the armor is
/// invalid; [`Error::Crypto`]/[`Error::Signature`] if decryption or
/// verification of a wrap layer fails.
pub fn decrypt_wrap(mail: &[u8], keyring: &Keyring, depth_limit: u32) -> Result<Vec<u8>> {
    decrypt_wrap_inner(mail, keyring, depth_limit)
}

fn decrypt_wrap_inner(mail: &[u8], keyring: &Keyring, remaining_depth: u32) -> Result<Vec<u8>> {
    if remaining_depth == 0 {
        return Err(Error::MalformedInput("wrap envelope recursion exceeded depth limit".into()));
    }

    let (header, body) = Header::parse(mail)?;
    if !is_wrap_envelope(&header) {
        return Ok(mail.to_vec());
    }

    let armored = codec::armor::skip_leading_noise(body);
    let decoded = codec::decode_with_compression(armored, keyring, false)?;
    if let Some(e) = decoded.signature_error {
        return Err(e);
    }

    decrypt_wrap_inner(&decoded.plaintext, keyring, remaining_depth - 1)
}
