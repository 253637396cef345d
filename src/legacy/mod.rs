//! Legacy inline/MIME-aware PGP and the "wrap" whole-message envelope.
//!
//! Kept alongside the NGCRYPT container as a decrypt-only/compat path
//! for mail written by the format this proxy superseded: per-leaf
//! encryption of an existing MIME tree (this module), and wrapping an
//! entire message inside a single armored PGP part ([`wrap`]).
//!
//! Grounded on `epgpmessage/{message,armor,header,openpgp}.go`.

pub mod mime;
pub mod wrap;

pub use mime::{DecryptMode, EncryptMode};
