//! The armor + compress + encrypt/sign codec stack
//!
//! Encoding order (outside in, matching the nesting of writers in the
//! source this was distilled from): compress the plaintext, sign and
//! encrypt the compressed bytes as a literal PGP message, armor-encode
//! the resulting packets. Decoding reverses it: armor-decode, decrypt
//! (optionally verifying a signature), decompress.
//!
//! Grounded on `ngcrypt/armor2.go`'s `encodeNgcrypt`/`decodeNcrypt`
//! (`armor.Encode` ∘ `encrypt` ∘ `flate.NewWriter(_, 1)`, and its
//! mirror image for decoding) and the `stack []io.Closer` scoped-close
//! pattern in the same file, reimplemented here as [`CloserStack`]
//! since this crate builds the packet stream in memory rather than
//! chaining `io.WriteCloser`s.

use crate::codec::armor;
use crate::error::{Error, Result};
use crate::keyring::Keyring;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use pgp::composed::{Deserializable, Message, SignedPublicKey, SignedSecretKey};
use pgp::types::SecretKeyTrait;
use std::io::{Read, Write};

/// Deflate compression level the source always uses for the body
/// layer (`flate.NewWriter(w, 1)`): fastest, since the ciphertext that
/// follows it is already high entropy and gains little from higher
/// levels.
const COMPRESSION_LEVEL: Compression = Compression::new(1);

/// The result of decoding one armored, encrypted, compressed block.
pub struct Decoded {
    pub plaintext: Vec<u8>,
    /// Extra armor headers (e.g. `Rfc822-Size`), in order.
    pub headers: Vec<(String, String)>,
    /// Set if the embedded signature failed to verify. Per spec §7,
    /// this is observable only after the body has been fully drained,
    /// so it is reported alongside a successful decode rather than as
    /// the decode's own error.
    pub signature_error: Option<Error>,
}

/// A stack of fallible resources closed in reverse acquisition order;
/// the first error encountered while closing is the one returned, but
/// every closer still runs.
///
/// Grounded on `ngcrypt/armor2.go`'s `stack []io.Closer` /
/// `func (s stack) Close()`.
#[derive(Default)]
pub struct CloserStack {
    closers: Vec<Box<dyn FnOnce() -> Result<()>>>,
}

impl CloserStack {
    #[must_use]
    pub fn new() -> Self {
        Self { closers: Vec::new() }
    }

    pub fn push(&mut self, closer: impl FnOnce() -> Result<()> + 'static) {
        self.closers.push(Box::new(closer));
    }

    pub fn close_all(mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(closer) = self.closers.pop() {
            if let Err(e) = closer() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Sign and encrypt `plaintext`, deflating it first iff `compress`.
///
/// `signer` is `None` for the body part of an NGCRYPT container
/// (`ngcrypt/message.go`'s second `encodeNgcrypt` call passes no
/// extra `hdr1` but does still sign — signing is controlled
/// separately from the header map, kept here as an explicit `Option`
/// for callers such as the legacy codec that may not always sign).
/// NGCRYPT compresses (spec §4.1); the legacy `PGP MESSAGE` and raw
/// binary codecs do not.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if signing or encryption fails, or
/// [`Error::Io`] if compression fails.
pub fn encrypt_packets(
    plaintext: &[u8],
    recipients: &[SignedPublicKey],
    signer: Option<&SignedSecretKey>,
    compress: bool,
) -> Result<Vec<u8>> {
    let body = if compress {
        let mut compressor = DeflateEncoder::new(Vec::new(), COMPRESSION_LEVEL);
        compressor.write_all(plaintext)?;
        compressor.finish()?
    } else {
        plaintext.to_vec()
    };

    let literal = Message::new_literal_bytes("", &body);
    let message = match signer {
        Some(key) => literal
            .sign(key, String::new, Default::default())
            .map_err(Error::Crypto)?,
        None => literal,
    };
    let encrypted = message
        .encrypt_to_keys_seipdv1(&mut rand::thread_rng(), Default::default(), recipients)
        .map_err(Error::Crypto)?;

    pgp::ser::Serialize::to_bytes(&encrypted).map_err(Error::Crypto).map_err(Into::into)
}

/// Decrypt and verify a raw PGP packet stream, inflating it first iff
/// `compress`.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if decryption fails, or [`Error::Io`] if
/// decompression fails.
pub fn decrypt_packets(packets: &[u8], keyring: &Keyring, compress: bool) -> Result<(Vec<u8>, Option<Error>)> {
    let (message, _) = Message::from_bytes(packets).map_err(Error::Crypto)?;
    let (decrypted, _key_ids) = message
        .decrypt(String::new, keyring.identities())
        .map_err(Error::Crypto)?;

    let signature_error = decrypted
        .verify_read(&keyring.public_keys())
        .err()
        .map(|e| Error::Signature(e.to_string()));

    let body = decrypted.get_content().map_err(Error::Crypto)?.unwrap_or_default();

    let plaintext = if compress {
        let mut out = Vec::new();
        DeflateDecoder::new(&body[..]).read_to_end(&mut out)?;
        out
    } else {
        body
    };

    Ok((plaintext, signature_error))
}

/// Compress (always), sign, encrypt and armor-encode `plaintext` as an
/// NGCRYPT block. Thin wrapper over [`encrypt_packets`] +
/// [`armor::encode`] for the NGCRYPT container, which always
/// compresses.
///
/// # Errors
///
/// See [`encrypt_packets`].
pub fn encode(
    plaintext: &[u8],
    recipients: &[SignedPublicKey],
    signer: Option<&SignedSecretKey>,
    block_type: &str,
    headers: &[(String, String)],
) -> Result<Vec<u8>> {
    encode_with_compression(plaintext, recipients, signer, block_type, headers, true)
}

/// As [`encode`], but lets the caller choose whether to deflate first.
/// The legacy inline-armored codec (`PGP MESSAGE`) passes `false`
/// (spec §4.1: "legacy `PGP MESSAGE` omits the compressor").
///
/// # Errors
///
/// See [`encrypt_packets`].
pub fn encode_with_compression(
    plaintext: &[u8],
    recipients: &[SignedPublicKey],
    signer: Option<&SignedSecretKey>,
    block_type: &str,
    headers: &[(String, String)],
    compress: bool,
) -> Result<Vec<u8>> {
    let packets = encrypt_packets(plaintext, recipients, signer, compress)?;
    let mut out = Vec::new();
    armor::encode(&mut out, block_type, headers, &packets);
    Ok(out)
}

/// Armor-decode, decrypt and decompress an NGCRYPT armored block
/// (always compressed).
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if the armor is invalid,
/// [`Error::Crypto`] if decryption fails (no matching key, corrupt
/// ciphertext), or [`Error::Io`] if decompression fails.
pub fn decode(armored: &[u8], keyring: &Keyring) -> Result<Decoded> {
    decode_with_compression(armored, keyring, true)
}

/// As [`decode`], but lets the caller choose whether a deflate layer
/// is expected. The legacy inline-armored codec (`PGP MESSAGE`) passes
/// `false`.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_with_compression(armored: &[u8], keyring: &Keyring, compress: bool) -> Result<Decoded> {
    let block = armor::decode(armored)?;
    let (plaintext, signature_error) = decrypt_packets(&block.body, keyring, compress)?;
    Ok(Decoded { plaintext, headers: block.headers, signature_error })
}
