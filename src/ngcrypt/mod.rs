//! The NGCRYPT container format: encoder, decoder, and the default
//! header-cleaning policy used when none is configured.

pub mod container;

pub use container::{decrypt_body, decrypt_header, decrypt_message, decrypt_whole_message, encrypt, DecryptedHeader};
