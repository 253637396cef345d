//! Error types for the proxy
//!
//! Mirrors the error taxonomy of the reference design: transport and
//! configuration errors are always fatal to the current command;
//! malformed-input, crypto and signature errors are fatal on APPEND but
//! are caught and turned into a skipped message by the fetch/search
//! pipelines (see `imap::replanner` and `imap::search`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("mail parsing error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    /// RFC822/MIME structure the codec cannot make sense of: missing
    /// armor, too few parts, a wrap recursion past its depth limit.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// PGP decryption/encryption failure: no matching key, corrupt
    /// ciphertext, unsupported algorithm.
    #[error("crypto error: {0}")]
    Crypto(#[from] pgp::errors::Error),

    /// A signature verification failure, observable only after the
    /// decrypt stream has been drained to EOF.
    #[error("signature error: {0}")]
    Signature(String),

    /// A fetch item the proxy cannot project onto the encrypted
    /// structure (partial ranges, nested MIME selectors). The item is
    /// dropped from the response; this variant exists so callers can
    /// log it without treating it as a hard failure.
    #[error("cannot honor fetch item: {0}")]
    ProtocolDegradation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should cause the *whole* fetch/search batch
    /// to fail, as opposed to just the one message being skipped.
    ///
    /// Per the error taxonomy: transport errors propagate (the
    /// upstream connection itself is unusable); everything else is
    /// scoped to the message that triggered it.
    #[must_use]
    pub const fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::Imap(_) | Self::Io(_) | Self::Tls(_))
    }
}
