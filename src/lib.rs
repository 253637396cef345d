#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! NGCRYPT — a transparent IMAP encryption proxy
//!
//! Sits between an IMAP client and an upstream IMAP server,
//! PGP-encrypting mail before it reaches the server and decrypting it
//! before it reaches the client, so the server never holds plaintext.
//!
//! The cryptographic core is the two-part [`ngcrypt`] container format
//! plus the [`codec`] stack it's built from; [`imap::replanner`] turns
//! a client's `FETCH` request into the upstream sub-fetches needed to
//! satisfy it, and [`imap::search`] evaluates `SEARCH` criteria
//! locally when the server can't. [`legacy`] reads/writes the
//! per-leaf MIME-aware and whole-message "wrap" formats this proxy's
//! container format supersedes.

pub mod cleaner;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod headers;
pub mod imap;
pub mod keyring;
pub mod legacy;
pub mod ngcrypt;

pub use cleaner::{Cleaner, Radical};
pub use config::{DecryptMode, EncryptMode, ImapConfig, ProxyConfig};
pub use error::{Error, Result};
pub use keyring::Keyring;
