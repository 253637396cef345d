//! PGP codec stack shared by the NGCRYPT container and legacy codecs.

pub mod armor;
pub mod stack;

pub use stack::{
    decode, decode_with_compression, decrypt_packets, encode, encode_with_compression, encrypt_packets,
    CloserStack, Decoded,
};
