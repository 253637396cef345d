//! The backend contract this proxy implements for its own clients:
//! `login`, per-user mailbox listing, `list_messages`,
//! `search_messages`, `create_message` (APPEND). Every other mailbox
//! operation (SELECT, STORE, EXPUNGE, COPY, ...) is forwarded
//! verbatim to the upstream connection and has no business logic of
//! its own here.
//!
//! Grounded on `ngcrypt/imap/mailbox.go`'s `mailbox` type (embedding
//! `backend.Mailbox` and overriding only the methods that touch
//! encrypted content) and `ngcrypt/imap/backend.go`'s `user`/`backend`
//! wiring the upstream session and keyring together. The upstream leg
//! itself reuses [`crate::connection`]; fetching specific encrypted
//! sections issues one `UID FETCH` per section. The outer plaintext
//! header (`BODY.PEEK[HEADER]`) reads back through `async_imap`'s
//! `header()` accessor, the same one the teacher's own prefetch code
//! uses; the two numbered NGCRYPT parts (`BODY.PEEK[1]`,
//! `BODY.PEEK[2]`) aren't `HEADER`/`TEXT`/whole-message sections, so
//! they're read back through the lower-level `section()` accessor
//! instead.

use crate::cleaner::Cleaner;
use crate::config::{DecryptMode, EncryptMode, ProxyConfig};
use crate::connection::ImapSession;
use crate::error::{Error, Result};
use crate::imap::replanner::{self, FetchItem, Fetcher, MessageMeta, Plan, ResolvedValue};
use crate::imap::search::{self, Candidate, Criteria};
use crate::keyring::Keyring;
use crate::ngcrypt;
use futures::StreamExt;
use pgp::composed::SignedPublicKey;
use std::collections::HashMap;

/// Fetch the upstream sections a [`Plan`] asked for, for every message
/// in `uid_set`, and resolve each client-requested item.
///
/// # Errors
///
/// Returns [`Error::Imap`] if the upstream `UID FETCH` itself fails
/// (transport-level, fails the whole command per spec §7). Per-message
/// decrypt/parse errors are caught and that message is simply omitted
/// from the result, matching `ListMessages`'s `continue msgq`.
pub async fn list_messages(
    session: &mut ImapSession,
    uid_set: &str,
    items: &[FetchItem],
    keyring: &Keyring,
) -> Result<Vec<(MessageMeta, Vec<(FetchItem, ResolvedValue)>)>> {
    let plan = replanner::plan(items);
    let metas = fetch_meta(session, uid_set).await?;

    let mut out = Vec::with_capacity(metas.len());
    for meta in metas {
        let sections = fetch_sections(session, &meta.uid.to_string(), &plan).await?;
        match replanner::resolve_message(&meta, items, plan.fetcher, &sections, keyring) {
            Ok(resolved) => out.push((meta, resolved)),
            Err(_) => continue,
        }
    }
    Ok(out)
}

/// Evaluate `criteria` against every message in the mailbox, returning
/// matching UIDs (or sequence numbers, per `uid`).
///
/// Grounded on `SearchMessages`: always a full-mailbox scan, fetching
/// only part 1 unless the criteria need the body too.
///
/// # Errors
///
/// Returns [`Error::Imap`] if the upstream `STATUS`/`FETCH` fails.
pub async fn search_messages(
    session: &mut ImapSession,
    mailbox_message_count: u32,
    criteria: &Criteria,
    uid: bool,
    keyring: &Keyring,
) -> Result<Vec<u32>> {
    if mailbox_message_count == 0 {
        return Ok(Vec::new());
    }
    let uid_set = format!("1:{mailbox_message_count}");
    let metas = fetch_meta(session, &uid_set).await?;

    let needs_body = search::needs_body(criteria);
    let mut matched = Vec::new();
    for meta in metas {
        let part1 = fetch_section(session, &meta.uid.to_string(), &[1]).await?;
        let part2 = if needs_body {
            fetch_section(session, &meta.uid.to_string(), &[2]).await?
        } else {
            None
        };
        let Some(part1) = part1 else { continue };

        let candidate: Result<Candidate> =
            search::decrypt_candidate(criteria, meta.flags.clone(), &part1, part2.as_deref(), keyring);
        let Ok(candidate) = candidate else { continue };

        if search::matches(criteria, &candidate) {
            matched.push(if uid { meta.uid } else { meta.seq_num });
        }
    }
    Ok(matched)
}

/// Encrypt and append `mail` to the currently selected mailbox.
///
/// Grounded on `mailbox.CreateMessage`: the whole literal is built in
/// memory, then handed to the upstream `APPEND`.
///
/// # Errors
///
/// Returns [`Error::Crypto`]/[`Error::MalformedInput`] if encryption
/// fails, or [`Error::Imap`] if the upstream `APPEND` fails.
pub async fn create_message(
    session: &mut ImapSession,
    config: &ProxyConfig,
    mail: &[u8],
    recipients: &[SignedPublicKey],
    keyring: &Keyring,
    cleaner: &dyn Cleaner,
    flags: &[&str],
) -> Result<()> {
    let signer = keyring.default_signer()?;
    let encrypted = match config.encrypt_mode {
        EncryptMode::Regular => ngcrypt::encrypt(mail, recipients, Some(signer), cleaner)?,
        EncryptMode::Wrap => crate::legacy::wrap::encrypt_wrap(mail, recipients, signer)?,
    };

    let imap_flags: Vec<async_imap::types::Flag> = flags.iter().map(|f| to_imap_flag(f)).collect();
    session
        .append("INBOX", &encrypted)
        .flags(imap_flags)
        .finish()
        .await
        .map_err(|e| Error::Imap(format!("APPEND failed: {e}")))?;
    Ok(())
}

fn to_imap_flag(flag: &str) -> async_imap::types::Flag<'static> {
    use async_imap::types::Flag;
    match flag {
        "\\Seen" => Flag::Seen,
        "\\Answered" => Flag::Answered,
        "\\Flagged" => Flag::Flagged,
        "\\Deleted" => Flag::Deleted,
        "\\Draft" => Flag::Draft,
        other => Flag::Custom(other.to_string().into()),
    }
}

/// Render an upstream flag to its wire token (`\Seen`, `\Flagged`, a
/// bare keyword), the reverse of [`to_imap_flag`]. `imap::search`
/// compares these against literal `\Seen`-style strings, so this must
/// never fall back to `Debug`.
fn flag_to_wire(flag: &async_imap::types::Flag<'_>) -> String {
    use async_imap::types::Flag;
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Custom(name) => name.to_string(),
        other => format!("{other:?}"),
    }
}

/// Decrypt a legacy-format message already fetched whole from
/// upstream, per the configured [`DecryptMode`].
///
/// # Errors
///
/// See [`crate::legacy::mime::decrypt`].
pub fn decrypt_legacy(config: &ProxyConfig, raw: &[u8], keyring: &Keyring) -> Result<Vec<u8>> {
    let mode = match config.decrypt_mode {
        DecryptMode::Regular => crate::legacy::mime::DecryptMode::Regular,
        DecryptMode::Wrap => crate::legacy::mime::DecryptMode::Wrap,
        DecryptMode::Full => crate::legacy::mime::DecryptMode::Full,
    };
    crate::legacy::mime::decrypt(mode, raw, keyring, config.wrap_depth_limit)
}

async fn fetch_meta(session: &mut ImapSession, uid_set: &str) -> Result<Vec<MessageMeta>> {
    let mut stream = session
        .uid_fetch(uid_set, "(UID FLAGS INTERNALDATE)")
        .await
        .map_err(|e| Error::Imap(format!("UID FETCH failed: {e}")))?;

    let mut metas = Vec::new();
    while let Some(item) = stream.next().await {
        let fetch = item.map_err(|e| Error::Imap(format!("UID FETCH response error: {e}")))?;
        let Some(uid) = fetch.uid else { continue };
        let flags = fetch.flags().map(|f| flag_to_wire(&f)).collect();
        let internal_date = fetch.internal_date().map(|d| d.to_rfc3339()).unwrap_or_default();
        metas.push(MessageMeta { seq_num: fetch.message, uid, flags, internal_date });
    }
    Ok(metas)
}

/// Fetch every upstream section a [`Plan`] asked for, for one
/// message, keyed the way [`replanner::resolve_message`] expects.
async fn fetch_sections(
    session: &mut ImapSession,
    uid: &str,
    plan: &Plan,
) -> Result<HashMap<Vec<u32>, Vec<u8>>> {
    let mut sections = HashMap::new();
    match plan.fetcher {
        Fetcher::None => {}
        Fetcher::SizeOnly => {
            if let Some(bytes) = fetch_header(session, uid).await? {
                sections.insert(Vec::new(), bytes);
            }
        }
        Fetcher::HeadOnly => {
            if let Some(bytes) = fetch_section(session, uid, &[1]).await? {
                sections.insert(vec![1], bytes);
            }
        }
        Fetcher::HeadAndBody => {
            if let Some(bytes) = fetch_section(session, uid, &[1]).await? {
                sections.insert(vec![1], bytes);
            }
            if let Some(bytes) = fetch_section(session, uid, &[2]).await? {
                sections.insert(vec![2], bytes);
            }
        }
    }
    Ok(sections)
}

async fn fetch_header(session: &mut ImapSession, uid: &str) -> Result<Option<Vec<u8>>> {
    let mut stream = session
        .uid_fetch(uid, "(BODY.PEEK[HEADER])")
        .await
        .map_err(|e| Error::Imap(format!("UID FETCH failed: {e}")))?;
    let Some(item) = stream.next().await else { return Ok(None) };
    let fetch = item.map_err(|e| Error::Imap(format!("UID FETCH response error: {e}")))?;
    Ok(fetch.header().map(<[u8]>::to_vec))
}

async fn fetch_section(session: &mut ImapSession, uid: &str, path: &[u32]) -> Result<Option<Vec<u8>>> {
    let joined = path.iter().map(ToString::to_string).collect::<Vec<_>>().join(".");
    let query = format!("(BODY.PEEK[{joined}])");
    let mut stream = session
        .uid_fetch(uid, &query)
        .await
        .map_err(|e| Error::Imap(format!("UID FETCH failed: {e}")))?;
    let Some(item) = stream.next().await else { return Ok(None) };
    let fetch = item.map_err(|e| Error::Imap(format!("UID FETCH response error: {e}")))?;
    let section_path = async_imap::imap_proto::types::SectionPath::Part(path.to_vec(), None);
    Ok(fetch.section(&section_path).map(<[u8]>::to_vec))
}
