//! Search-over-encrypted-mail: when the server can't see plaintext,
//! `SEARCH` can't be evaluated upstream, so this plans a bulk decrypt
//! of the mailbox and evaluates criteria locally.
//!
//! Grounded on `ngcrypt/imap/mailbox.go`'s `searchRequirement`/
//! `SearchMessages`: this is an O(mailbox size) fallback, documented
//! as such rather than optimized — encrypted search is opt-in
//! (`enable_search`) for exactly this reason.

use crate::error::Result;
use crate::headers::Header;
use crate::keyring::Keyring;
use crate::ngcrypt;

/// A client `SEARCH` criterion, reduced to what this proxy evaluates
/// locally after decrypting a candidate message.
///
/// Grounded on `go-imap`'s `SearchCriteria`, scoped to the
/// content-bearing fields that require a decrypted entity (structural
/// criteria like sequence sets are handled by the caller before this
/// module is invoked at all).
#[derive(Debug, Clone)]
pub enum Criteria {
    /// Substring match against the decrypted body (case-insensitive).
    Body(String),
    /// Substring match against the decrypted body OR header (RFC 3501
    /// `TEXT`).
    Text(String),
    /// Substring match against one header field's value.
    Header(String, String),
    Seen,
    Unseen,
    Flagged,
    Not(Box<Criteria>),
    Or(Box<Criteria>, Box<Criteria>),
    And(Vec<Criteria>),
}

/// Whether evaluating `criteria` needs the decrypted body (`BODY`/
/// `TEXT`), not just the header.
///
/// Grounded on `searchRequirement.scan`: recurses into `Not`/`Or`
/// subtrees: any `Body`/`Text` leaf anywhere sets the requirement.
#[must_use]
pub fn needs_body(criteria: &Criteria) -> bool {
    match criteria {
        Criteria::Body(_) | Criteria::Text(_) => true,
        Criteria::Not(inner) => needs_body(inner),
        Criteria::Or(a, b) => needs_body(a) || needs_body(b),
        Criteria::And(items) => items.iter().any(needs_body),
        Criteria::Header(_, _) | Criteria::Seen | Criteria::Unseen | Criteria::Flagged => false,
    }
}

/// A candidate message, already decrypted, ready to be matched.
pub struct Candidate {
    pub header: Header,
    /// Decrypted body text, if fetched (only when [`needs_body`] was
    /// true for the active criteria).
    pub body: Option<Vec<u8>>,
    pub flags: Vec<String>,
}

/// Evaluate `criteria` against an already-decrypted `candidate`.
///
/// Grounded on `backendutil.Match`, reduced to the criteria this
/// module supports.
#[must_use]
pub fn matches(criteria: &Criteria, candidate: &Candidate) -> bool {
    match criteria {
        Criteria::Body(needle) => candidate
            .body
            .as_ref()
            .is_some_and(|b| contains_ignore_case(b, needle)),
        Criteria::Text(needle) => {
            let in_body = candidate.body.as_ref().is_some_and(|b| contains_ignore_case(b, needle));
            let in_header = candidate
                .header
                .fields()
                .iter()
                .any(|f| f.value.to_lowercase().contains(&needle.to_lowercase()));
            in_body || in_header
        }
        Criteria::Header(name, needle) => candidate
            .header
            .get(name)
            .is_some_and(|v| v.to_lowercase().contains(&needle.to_lowercase())),
        Criteria::Seen => candidate.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen")),
        Criteria::Unseen => !candidate.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen")),
        Criteria::Flagged => candidate.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Flagged")),
        Criteria::Not(inner) => !matches(inner, candidate),
        Criteria::Or(a, b) => matches(a, candidate) || matches(b, candidate),
        Criteria::And(items) => items.iter().all(|c| matches(c, candidate)),
    }
}

fn contains_ignore_case(haystack: &[u8], needle: &str) -> bool {
    let haystack = String::from_utf8_lossy(haystack).to_lowercase();
    haystack.contains(&needle.to_lowercase())
}

/// Decrypt one message's upstream literals into a [`Candidate`],
/// fetching only as much as `criteria` needs.
///
/// # Errors
///
/// Returns whatever [`crate::ngcrypt`] returns for a malformed or
/// undecryptable part; callers (the per-message `SearchMessages` loop)
/// are expected to skip the message on error, matching
/// `SearchMessages`'s `continue` on any non-nil error.
pub fn decrypt_candidate(
    criteria: &Criteria,
    flags: Vec<String>,
    part1: &[u8],
    part2: Option<&[u8]>,
    keyring: &Keyring,
) -> Result<Candidate> {
    if needs_body(criteria) {
        let (bytes, signature_error) = ngcrypt::decrypt_message(part1, part2, keyring)?;
        if let Some(e) = signature_error {
            return Err(e);
        }
        let (header, body) = Header::parse(&bytes)?;
        Ok(Candidate { header, body: Some(body.to_vec()), flags })
    } else {
        let decrypted = ngcrypt::decrypt_header(part1, keyring)?;
        if let Some(e) = decrypted.signature_error {
            return Err(e);
        }
        Ok(Candidate { header: decrypted.header, body: None, flags })
    }
}
