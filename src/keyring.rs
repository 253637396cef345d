//! Per-user keyrings and the unlock collaborator
//!
//! A [`Keyring`] is the decrypted, in-memory key material for one
//! user: an ordered list of secret-key identities. The first is the
//! default signer and self-recipient (the same convention as
//! `openpgp.EntityList` in the source this was distilled from, where
//! `kr[0]` is always used as the signer).
//!
//! Obtaining a [`Keyring`] from a username/password pair is itself out
//! of scope (spec §1: "local key-store access... is out of scope"); it
//! is represented here as the pluggable [`UnlockFn`] collaborator, with
//! two composable wrappers mirroring `legacy/unlock.go`'s
//! `UnlockRemember`/`UnlockSync` higher-order functions.

use crate::error::Result;
use pgp::composed::{SignedPublicKey, SignedSecretKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A user's unlocked key material for the lifetime of one session.
///
/// Never persisted; created on login by invoking [`UnlockFn`] and held
/// only in process memory.
#[derive(Clone)]
pub struct Keyring {
    identities: Vec<SignedSecretKey>,
}

impl Keyring {
    #[must_use]
    pub const fn new(identities: Vec<SignedSecretKey>) -> Self {
        Self { identities }
    }

    /// The default signer: the first identity in the keyring.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Crypto`] if the keyring is empty.
    pub fn default_signer(&self) -> Result<&SignedSecretKey> {
        self.identities
            .first()
            .ok_or_else(|| pgp::errors::Error::Message("keyring has no identities".into()).into())
    }

    /// Public keys of every identity, used as the encryption recipient
    /// set (self-recipient: we always encrypt to our own keyring).
    #[must_use]
    pub fn public_keys(&self) -> Vec<SignedPublicKey> {
        self.identities.iter().map(SignedSecretKey::public_key).collect()
    }

    #[must_use]
    pub fn identities(&self) -> &[SignedSecretKey] {
        &self.identities
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// A collaborator that turns a username/password into an unlocked
/// [`Keyring`] — e.g. by asking a local GPG agent for the user's
/// private key and decrypting it with the supplied passphrase. The
/// proxy never implements this itself; it is wired up by the binary.
pub type UnlockFn = Arc<dyn Fn(&str, &str) -> Result<Keyring> + Send + Sync>;

/// Wrap an [`UnlockFn`] so repeated logins for the same username reuse
/// the first unlocked keyring instead of unlocking again.
///
/// Mirrors `legacy/unlock.go`'s `UnlockRemember`: two racing logins for
/// the same username may both call through to `f`; the second write is
/// idempotent since both calls unlock the same user's keys.
#[must_use]
pub fn remember(f: UnlockFn) -> UnlockFn {
    let cache: Mutex<HashMap<String, Keyring>> = Mutex::new(HashMap::new());
    Arc::new(move |username, password| {
        if let Some(kr) = cache.lock().unwrap().get(username) {
            return Ok(kr.clone());
        }

        let kr = f(username, password)?;
        cache.lock().unwrap().insert(username.to_string(), kr.clone());
        Ok(kr)
    })
}

/// Wrap an [`UnlockFn`] so only one unlock runs at a time.
///
/// Mirrors `legacy/unlock.go`'s `UnlockSync`. Useful when the
/// underlying collaborator is not itself safe for concurrent use (a
/// pinentry prompt, a single-threaded agent connection).
#[must_use]
pub fn synchronized(f: UnlockFn) -> UnlockFn {
    let lock = Mutex::new(());
    Arc::new(move |username, password| {
        let _guard = lock.lock().unwrap();
        f(username, password)
    })
}
