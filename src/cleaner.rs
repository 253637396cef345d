//! Header cleaner policy
//!
//! Applied to the outer (unencrypted) header NGCRYPT derives from the
//! original message, after `Content-*` fields have already been
//! stripped. The goal is to avoid leaking identity/subject metadata to
//! anyone who can see the encrypted mailbox's IMAP structure but holds
//! no key.

use crate::headers::Header;

/// A header-cleaning policy: mutates a header in place.
///
/// Grounded on `ngcrypt/message.go`'s `type Cleaner func(h *message.Header)`.
pub trait Cleaner: Send + Sync {
    fn clean(&self, header: &mut Header);
}

impl<F: Fn(&mut Header) + Send + Sync> Cleaner for F {
    fn clean(&self, header: &mut Header) {
        self(header);
    }
}

/// The default cleaner: deletes every identity-bearing field and
/// replaces `Subject`/`Sender`/`From`/`To` with placeholders.
///
/// Grounded on `ngcrypt/message.go`'s `Radical` function, 1:1.
pub struct Radical;

impl Cleaner for Radical {
    fn clean(&self, header: &mut Header) {
        header.set("Subject", "(Deleted)");
        header.remove("Sender");
        header.remove("From");
        header.remove("To");
        header.remove("CC");
        header.remove("BCC");
        header.remove("Reply-To");

        header.set("Sender", "Unknown <unknown@none>");
        header.set("From", "Unknown <unknown@none>");
        header.set("To", "Unknown <unknown@none>");
    }
}
