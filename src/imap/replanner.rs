//! FETCH re-planning: turn a client's requested data items into the
//! upstream `BODY[1]`/`BODY[2]` fetch the proxy actually needs, then
//! reproject the decrypted result back onto ENVELOPE / BODYSTRUCTURE /
//! RFC822.SIZE / BODY[section].
//!
//! Grounded on `ngcrypt/imap/mailbox.go`'s `filter`, `parts`,
//! `entityPop`/`epParse`/`epHead`, `fetchHeadAndBody`/`fetchHead`/
//! `fetchNone`, and `ListMessages`.

use crate::error::{Error, Result};
use crate::headers::Header;
use crate::keyring::Keyring;
use crate::ngcrypt;
use std::collections::HashMap;

/// A client-requested FETCH data item, as the proxy classifies it.
/// `server.rs` translates to/from the wire (`imap-types`) shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    Envelope,
    Body,
    BodyStructure,
    Flags,
    InternalDate,
    Uid,
    Rfc822Size,
    Rfc822,
    Rfc822Text,
    BodySection { path: Vec<u32>, peek: bool },
    /// Upstream-only marker for `BODY.PEEK[HEADER]` against the outer,
    /// unencrypted envelope — never produced from a client request,
    /// only appended by [`plan`] when a size-only fetch can be
    /// answered without touching part 1 or part 2.
    OuterHeader,
}

/// Which upstream fetch (if any) is needed to satisfy a set of
/// requested items. Computed once per `FETCH`/`SEARCH` command, not
/// per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetcher {
    None,
    /// RFC822.SIZE alone: answered from the plaintext outer header's
    /// `X-Ngcrypt-Size` field, no decryption needed.
    SizeOnly,
    HeadOnly,
    HeadAndBody,
}

/// The re-planned upstream fetch for one client `FETCH` command.
#[derive(Debug, Clone)]
pub struct Plan {
    pub upstream_items: Vec<FetchItem>,
    pub fetcher: Fetcher,
}

/// Classify `items` and build the upstream [`Plan`].
///
/// Grounded on `filter` + the head-of-`ListMessages` logic: items
/// outside `{Envelope, Body, BodyStructure, Rfc822Size, Flags,
/// InternalDate, Uid}` are treated as needing the body (the default
/// case in `filter`'s `switch`), matching the original's conservative
/// "anything unrecognized implies body" fallback.
#[must_use]
pub fn plan(items: &[FetchItem]) -> Plan {
    let mut pass_through = Vec::with_capacity(items.len());
    let mut need_head = false;
    let mut need_body = false;
    let mut need_size = false;
    let mut saw_unpeeked = false;

    for item in items {
        match item {
            FetchItem::Envelope => need_head = true,
            FetchItem::Body | FetchItem::BodyStructure => need_body = true,
            FetchItem::Rfc822Size => need_size = true,
            FetchItem::Flags | FetchItem::InternalDate | FetchItem::Uid => {
                pass_through.push(item.clone());
            }
            _ => need_body = true,
        }

        match item {
            FetchItem::BodySection { peek, .. } if !peek => saw_unpeeked = true,
            FetchItem::Rfc822 | FetchItem::Rfc822Text => saw_unpeeked = true,
            _ => {}
        }
    }

    if !(need_head || need_body || need_size) {
        return Plan { upstream_items: items.to_vec(), fetcher: Fetcher::None };
    }

    if need_size && !(need_head || need_body) {
        let mut upstream_items = pass_through;
        upstream_items.push(FetchItem::OuterHeader);
        return Plan { upstream_items, fetcher: Fetcher::SizeOnly };
    }
    need_head = need_head || need_body;

    let mut upstream_items = pass_through;
    if need_head {
        upstream_items.push(FetchItem::BodySection { path: vec![1], peek: !saw_unpeeked });
    }
    if need_body {
        upstream_items.push(FetchItem::BodySection { path: vec![2], peek: !saw_unpeeked });
    }

    let fetcher = if need_body {
        Fetcher::HeadAndBody
    } else if need_head {
        Fetcher::HeadOnly
    } else {
        Fetcher::None
    };

    Plan { upstream_items, fetcher }
}

/// A decrypted message, in one of two shapes depending on which
/// [`Fetcher`] produced it.
///
/// Grounded on `entityPop`'s two constructors, `epParse` (full entity,
/// reparsed from decrypted bytes) and `epHead` (a synthetic entity
/// with only a header and an empty body).
pub enum Entity {
    HeaderOnly(Header),
    Full(Vec<u8>),
}

impl Entity {
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] if the full entity's header
    /// block cannot be parsed.
    pub fn header(&self) -> Result<Header> {
        match self {
            Self::HeaderOnly(h) => Ok(h.clone()),
            Self::Full(bytes) => Ok(Header::parse(bytes)?.0),
        }
    }
}

/// Decrypt according to `fetcher`, given the raw `BODY[1]`/`BODY[2]`
/// literals fetched from upstream plus, for [`Fetcher::SizeOnly`], the
/// plaintext outer `BODY.PEEK[HEADER]` literal.
///
/// # Errors
///
/// Returns [`Error::ProtocolDegradation`] if `fetcher` requires a part
/// that wasn't supplied, or whatever [`crate::ngcrypt`] returns for a
/// malformed/undecryptable part. A signature error is surfaced as a
/// hard error here — callers that should skip-not-propagate (fetch,
/// search) are expected to catch it, matching `ListMessages`'s
/// `continue msgq` on any non-nil error from the fetcher.
pub fn fetch_entity(
    fetcher: Fetcher,
    outer_header: Option<&[u8]>,
    part1: Option<&[u8]>,
    part2: Option<&[u8]>,
    keyring: &Keyring,
) -> Result<(Option<Entity>, usize)> {
    match fetcher {
        Fetcher::None => Ok((None, 0)),
        Fetcher::SizeOnly => {
            let outer_header =
                outer_header.ok_or_else(|| Error::ProtocolDegradation("missing outer header".into()))?;
            let (header, _) = Header::parse(outer_header)?;
            let size = header
                .get("X-Ngcrypt-Size")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Error::ProtocolDegradation("outer header has no X-Ngcrypt-Size".into()))?;
            Ok((Some(Entity::HeaderOnly(header)), size))
        }
        Fetcher::HeadOnly => {
            let part1 = part1.ok_or_else(|| Error::ProtocolDegradation("missing part 1".into()))?;
            let decrypted = ngcrypt::decrypt_header(part1, keyring)?;
            if let Some(e) = decrypted.signature_error {
                return Err(e);
            }
            Ok((Some(Entity::HeaderOnly(decrypted.header)), decrypted.size.unwrap_or(0)))
        }
        Fetcher::HeadAndBody => {
            let part1 = part1.ok_or_else(|| Error::ProtocolDegradation("missing part 1".into()))?;
            let (bytes, signature_error) = ngcrypt::decrypt_message(part1, part2, keyring)?;
            if let Some(e) = signature_error {
                return Err(e);
            }
            let size = bytes.len();
            Ok((Some(Entity::Full(bytes)), size))
        }
    }
}

/// Per-message metadata the upstream server already reports in plain
/// (flags, dates, identifiers — never encrypted).
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub seq_num: u32,
    pub uid: u32,
    pub flags: Vec<String>,
    pub internal_date: String,
}

/// One resolved FETCH data item, ready for `server.rs` to serialize.
pub enum ResolvedValue {
    Header(Header),
    /// Full decrypted RFC 822 bytes, for BODY/BODYSTRUCTURE/BODY[section]
    /// projection (left to the caller, which has the MIME parser).
    RawEntity(Vec<u8>),
    Flags(Vec<String>),
    InternalDate(String),
    Size(usize),
    Uid(u32),
}

/// Resolve every requested item for one message, given the upstream
/// literals already fetched for it (keyed by body-section path).
///
/// Per `ListMessages`'s `msgq` loop: if any single item fails to
/// resolve, the *whole* message is skipped (`Err` here), not just that
/// item — there is no partial FETCH response.
///
/// # Errors
///
/// See [`fetch_entity`]; additionally returns
/// [`Error::ProtocolDegradation`] if an item needs the entity but none
/// was decrypted for this [`Fetcher`] selection.
pub fn resolve_message(
    meta: &MessageMeta,
    items: &[FetchItem],
    fetcher: Fetcher,
    sections: &HashMap<Vec<u32>, Vec<u8>>,
    keyring: &Keyring,
) -> Result<Vec<(FetchItem, ResolvedValue)>> {
    let outer_header = sections.get(&Vec::new()).map(Vec::as_slice);
    let part1 = sections.get(&vec![1u32]).map(Vec::as_slice);
    let part2 = sections.get(&vec![2u32]).map(Vec::as_slice);
    let (entity, size) = fetch_entity(fetcher, outer_header, part1, part2, keyring)?;

    let need_entity = || entity.as_ref().ok_or_else(|| Error::ProtocolDegradation("no decrypted entity available".into()));

    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
        let value = match item {
            FetchItem::Envelope => ResolvedValue::Header(need_entity()?.header()?),
            FetchItem::Body | FetchItem::BodyStructure => match need_entity()? {
                Entity::Full(bytes) => ResolvedValue::RawEntity(bytes.clone()),
                Entity::HeaderOnly(_) => {
                    return Err(Error::ProtocolDegradation("body requested but only header was fetched".into()))
                }
            },
            FetchItem::Flags => ResolvedValue::Flags(meta.flags.clone()),
            FetchItem::InternalDate => ResolvedValue::InternalDate(meta.internal_date.clone()),
            FetchItem::Rfc822Size => ResolvedValue::Size(size),
            FetchItem::Uid => ResolvedValue::Uid(meta.uid),
            FetchItem::BodySection { .. } | FetchItem::Rfc822 | FetchItem::Rfc822Text => match need_entity()? {
                Entity::Full(bytes) => ResolvedValue::RawEntity(bytes.clone()),
                Entity::HeaderOnly(_) => {
                    return Err(Error::ProtocolDegradation("body section requested but only header was fetched".into()))
                }
            },
        };
        resolved.push((item.clone(), value));
    }

    Ok(resolved)
}
