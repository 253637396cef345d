#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! The proxy server: accepts client IMAP connections, logs each one
//! into the configured upstream, and serves the backend contract
//! ([`ngcrypt_proxy::imap::backend`]) over the wire.
//!
//! Client-facing protocol decoding uses `imap-codec`'s `CommandCodec`,
//! the same library `tests/fake_imap` uses to play the server role in
//! tests — here it plays the same role for real. Per spec §1, the
//! client side of the IMAP protocol (exact attribute/criteria grammar
//! beyond what's needed to drive the backend) and client-facing TLS
//! termination are both external collaborators; this binary decodes
//! only the fields the backend needs and serves a conservative, always
//! fully-populated `FETCH` response rather than guessing at every
//! attribute combination a client might ask for.

use clap::Parser;
use futures::StreamExt;
use ngcrypt_proxy::cleaner::Radical;
use ngcrypt_proxy::config::ProxyConfig;
use ngcrypt_proxy::connection::ImapSession;
use ngcrypt_proxy::error::{Error, Result};
use ngcrypt_proxy::imap::backend;
use ngcrypt_proxy::imap::replanner::{FetchItem, ResolvedValue};
use ngcrypt_proxy::imap::search::Criteria;
use ngcrypt_proxy::keyring::{self, Keyring, UnlockFn};
use pgp::composed::Deserializable;
use pgp::composed::SignedSecretKey;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::{Command, CommandBody};
use imap_codec::imap_types::flag::Flag as StoreFlag;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use imap_codec::imap_types::search::SearchKey;
use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use imap_codec::CommandCodec;

#[derive(clap::Parser)]
#[command(name = "ngcryptd")]
#[command(about = "Transparent IMAP encryption proxy")]
struct Args {
    /// Path to an armored PGP secret key used to unlock every logged-in
    /// user's keyring (stub collaborator: real deployments plug in
    /// per-user key access instead).
    #[arg(long, env = "NGCRYPT_KEY_PATH")]
    key_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = Arc::new(ProxyConfig::from_env()?);
    let unlock = keyring::synchronized(keyring::remember(stub_unlock(args.key_path)));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("ngcryptd listening on {}", config.listen_addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let config = config.clone();
        let unlock = unlock.clone();
        tokio::spawn(async move {
            debug!("accepted connection from {peer}");
            if let Err(e) = handle_connection(stream, &config, &unlock).await {
                warn!("connection from {peer} ended with error: {e}");
            }
        });
    }
}

/// A stub unlock collaborator: every username unlocks the same
/// armored secret key file, ignoring the supplied password. Real
/// per-user key access (§1's "local key-store access") is out of
/// scope and left to the deployer.
fn stub_unlock(key_path: PathBuf) -> UnlockFn {
    Arc::new(move |_username, _password| {
        let armored = std::fs::read(&key_path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", key_path.display())))?;
        let (key, _headers) = SignedSecretKey::from_armor_single(&armored[..])
            .map_err(|e| Error::Crypto(pgp::errors::Error::Message(e.to_string())))?;
        Ok(Keyring::new(vec![key]))
    })
}

/// Per-connection state: the authenticated keyring, the upstream
/// session (established on `LOGIN`), and the currently selected
/// mailbox's message count (needed by `SEARCH`'s full-range scan).
struct Session {
    keyring: Keyring,
    upstream: ImapSession,
    selected_count: u32,
}

async fn handle_connection(stream: TcpStream, config: &ProxyConfig, unlock: &UnlockFn) -> Result<()> {
    let mut reader = BufReader::new(stream);
    write_line(&mut reader, "* OK ngcryptd ready\r\n").await?;

    let mut session: Option<Session> = None;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return Ok(()),
            Ok(_) => {}
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = strip_tag_and_command(trimmed, "APPEND") {
            let tag = trimmed.split_whitespace().next().unwrap_or("*").to_string();
            handle_append(&mut reader, &tag, rest, config, session.as_mut()).await?;
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            write_line(&mut reader, &format!("{tag} BAD parse error\r\n")).await?;
            continue;
        };

        if !dispatch(&mut reader, &command, config, unlock, &mut session).await? {
            break;
        }
    }
    Ok(())
}

/// Dispatch one parsed command. Returns `Ok(false)` on `LOGOUT`
/// (caller closes the connection).
async fn dispatch<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    command: &Command<'_>,
    config: &ProxyConfig,
    unlock: &UnlockFn,
    session: &mut Option<Session>,
) -> Result<bool> {
    let tag = command.tag.inner().to_string();

    match &command.body {
        CommandBody::Capability => {
            write_line(stream, "* CAPABILITY IMAP4rev1\r\n").await?;
            write_line(stream, &format!("{tag} OK CAPABILITY completed\r\n")).await?;
        }
        CommandBody::Noop => {
            write_line(stream, &format!("{tag} OK NOOP completed\r\n")).await?;
        }
        CommandBody::Login { username, password } => {
            let user = astring_to_string(username.as_ref());
            let pass = astring_to_string(password.as_ref());
            match login(&user, &pass, config, unlock).await {
                Ok(new_session) => {
                    *session = Some(new_session);
                    write_line(stream, &format!("{tag} OK LOGIN completed\r\n")).await?;
                }
                Err(e) => {
                    warn!("login failed for {user}: {e}");
                    write_line(stream, &format!("{tag} NO LOGIN failed\r\n")).await?;
                }
            }
        }
        CommandBody::List { .. } => {
            let Some(sess) = session.as_mut() else {
                write_line(stream, &format!("{tag} BAD not logged in\r\n")).await?;
                return Ok(true);
            };
            match sess.upstream.list(Some(""), Some("*")).await {
                Ok(mut names) => {
                    while let Some(item) = names.next().await {
                        if let Ok(name) = item {
                            write_line(stream, &format!("* LIST () \"/\" \"{}\"\r\n", name.name())).await?;
                        }
                    }
                    write_line(stream, &format!("{tag} OK LIST completed\r\n")).await?;
                }
                Err(e) => write_line(stream, &format!("{tag} NO LIST failed: {e}\r\n")).await?,
            }
        }
        CommandBody::Select { mailbox, .. } => {
            let Some(sess) = session.as_mut() else {
                write_line(stream, &format!("{tag} BAD not logged in\r\n")).await?;
                return Ok(true);
            };
            let name = mailbox_name(mailbox);
            match sess.upstream.select(&name).await {
                Ok(mb) => {
                    sess.selected_count = mb.exists;
                    write_line(stream, &format!("* {} EXISTS\r\n", mb.exists)).await?;
                    write_line(stream, &format!("* {} RECENT\r\n", mb.recent)).await?;
                    write_line(stream, &format!("{tag} OK [READ-WRITE] SELECT completed\r\n")).await?;
                }
                Err(e) => write_line(stream, &format!("{tag} NO SELECT failed: {e}\r\n")).await?,
            }
        }
        CommandBody::Fetch { sequence_set, uid: true, .. } => {
            let Some(sess) = session.as_mut() else {
                write_line(stream, &format!("{tag} BAD not logged in\r\n")).await?;
                return Ok(true);
            };
            handle_fetch(stream, &tag, sequence_set, sess).await?;
        }
        CommandBody::Search { criteria, uid: true, .. } => {
            let Some(sess) = session.as_mut() else {
                write_line(stream, &format!("{tag} BAD not logged in\r\n")).await?;
                return Ok(true);
            };
            handle_search(stream, &tag, criteria, config, sess).await?;
        }
        CommandBody::Store {
            sequence_set,
            flags,
            uid: true,
            ..
        } => {
            let Some(sess) = session.as_mut() else {
                write_line(stream, &format!("{tag} BAD not logged in\r\n")).await?;
                return Ok(true);
            };
            let uid_set = format_sequence_set(sequence_set);
            let flag_names: Vec<String> = flags.iter().map(store_flag_str).collect();
            let query = format!("+FLAGS ({})", flag_names.join(" "));
            match sess.upstream.uid_store(&uid_set, &query).await {
                Ok(mut responses) => {
                    while responses.next().await.is_some() {}
                    write_line(stream, &format!("{tag} OK STORE completed\r\n")).await?;
                }
                Err(e) => write_line(stream, &format!("{tag} NO STORE failed: {e}\r\n")).await?,
            }
        }
        CommandBody::Expunge => {
            let Some(sess) = session.as_mut() else {
                write_line(stream, &format!("{tag} BAD not logged in\r\n")).await?;
                return Ok(true);
            };
            match sess.upstream.expunge().await {
                Ok(mut responses) => {
                    while responses.next().await.is_some() {}
                    write_line(stream, &format!("{tag} OK EXPUNGE completed\r\n")).await?;
                }
                Err(e) => write_line(stream, &format!("{tag} NO EXPUNGE failed: {e}\r\n")).await?,
            }
        }
        CommandBody::Logout => {
            write_line(stream, "* BYE ngcryptd shutting down\r\n").await?;
            write_line(stream, &format!("{tag} OK LOGOUT completed\r\n")).await?;
            return Ok(false);
        }
        _ => {
            write_line(stream, &format!("{tag} BAD unsupported command\r\n")).await?;
        }
    }
    Ok(true)
}

async fn login(username: &str, password: &str, config: &ProxyConfig, unlock: &UnlockFn) -> Result<Session> {
    let keyring = unlock(username, password)?;
    let upstream = ngcrypt_proxy::connection::connect(&config.upstream).await?;
    Ok(Session { keyring, upstream, selected_count: 0 })
}

/// Resolve and write a `UID FETCH` response. Honors the five fetch
/// items a real client most commonly asks for (`ENVELOPE`, `FLAGS`,
/// `INTERNALDATE`, `UID`, `RFC822.SIZE`) plus the full decrypted body
/// (`BODY[]`/`RFC822`); the wire attribute list itself isn't reparsed
/// per client request (see module docs) so every response carries all
/// of them, letting `imap::replanner` decide what upstream work is
/// actually needed.
async fn handle_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    tag: &str,
    sequence_set: &SequenceSet,
    sess: &mut Session,
) -> Result<()> {
    let uid_set = format_sequence_set(sequence_set);
    let items = vec![
        FetchItem::Envelope,
        FetchItem::Flags,
        FetchItem::InternalDate,
        FetchItem::Uid,
        FetchItem::Rfc822Size,
        FetchItem::Body,
    ];

    let rows = backend::list_messages(&mut sess.upstream, &uid_set, &items, &sess.keyring).await?;
    for (meta, resolved) in rows {
        let mut flags_str = meta.flags.join(" ");
        let mut body_bytes: Option<Vec<u8>> = None;
        let mut size = 0usize;
        let mut internal_date = meta.internal_date.clone();

        for (item, value) in resolved {
            match (item, value) {
                (FetchItem::Flags, ResolvedValue::Flags(f)) => flags_str = f.join(" "),
                (FetchItem::InternalDate, ResolvedValue::InternalDate(d)) => internal_date = d,
                (FetchItem::Rfc822Size, ResolvedValue::Size(s)) => size = s,
                (FetchItem::Body, ResolvedValue::RawEntity(bytes)) => body_bytes = Some(bytes),
                _ => {}
            }
        }

        let body = body_bytes.unwrap_or_default();
        let header = format!(
            "* {} FETCH (UID {} FLAGS ({}) INTERNALDATE \"{}\" RFC822.SIZE {} BODY[] {{{}}}\r\n",
            meta.seq_num,
            meta.uid,
            flags_str,
            internal_date,
            size.max(body.len()),
            body.len(),
        );
        write_line(stream, &header).await?;
        write_bytes(stream, &body).await?;
        write_line(stream, ")\r\n").await?;
    }
    write_line(stream, &format!("{tag} OK FETCH completed\r\n")).await?;
    Ok(())
}

async fn handle_search<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    tag: &str,
    criteria: &[SearchKey<'_>],
    config: &ProxyConfig,
    sess: &mut Session,
) -> Result<()> {
    if !config.enable_search {
        write_line(stream, "* SEARCH\r\n").await?;
        write_line(stream, &format!("{tag} OK SEARCH completed (search disabled)\r\n")).await?;
        return Ok(());
    }

    let translated = translate_search_keys(criteria);
    let matches = backend::search_messages(&mut sess.upstream, sess.selected_count, &translated, true, &sess.keyring).await?;
    let uids: Vec<String> = matches.iter().map(ToString::to_string).collect();
    write_line(stream, &format!("* SEARCH {}\r\n", uids.join(" "))).await?;
    write_line(stream, &format!("{tag} OK SEARCH completed\r\n")).await?;
    Ok(())
}

fn translate_search_keys(keys: &[SearchKey<'_>]) -> Criteria {
    let translated: Vec<Criteria> = keys.iter().map(translate_search_key).collect();
    match translated.len() {
        0 => Criteria::Seen,
        1 => translated.into_iter().next().unwrap(),
        _ => Criteria::And(translated),
    }
}

#[allow(clippy::match_same_arms)]
fn translate_search_key(key: &SearchKey<'_>) -> Criteria {
    match key {
        SearchKey::Seen => Criteria::Seen,
        SearchKey::Unseen => Criteria::Unseen,
        SearchKey::Flagged => Criteria::Flagged,
        SearchKey::Body(s) => Criteria::Body(String::from_utf8_lossy(s.as_ref()).into_owned()),
        SearchKey::Text(s) => Criteria::Text(String::from_utf8_lossy(s.as_ref()).into_owned()),
        SearchKey::Subject(s) => Criteria::Header("Subject".into(), String::from_utf8_lossy(s.as_ref()).into_owned()),
        SearchKey::From(s) => Criteria::Header("From".into(), String::from_utf8_lossy(s.as_ref()).into_owned()),
        SearchKey::To(s) => Criteria::Header("To".into(), String::from_utf8_lossy(s.as_ref()).into_owned()),
        SearchKey::Not(inner) => Criteria::Not(Box::new(translate_search_key(inner))),
        SearchKey::Or(a, b) => Criteria::Or(Box::new(translate_search_key(a)), Box::new(translate_search_key(b))),
        SearchKey::And(inner) => Criteria::And(inner.as_ref().iter().map(translate_search_key).collect()),
        _ => Criteria::Seen,
    }
}

/// Manually read an `APPEND` literal. `imap-codec`'s `CommandCodec`
/// expects the whole command (including the literal bytes) in one
/// buffer; since the literal length is only known after parsing the
/// command line, the literal is read by hand here rather than forcing
/// a decode of a not-yet-complete command, matching the RFC 3501
/// §7 continuation-request flow (`{size}\r\n` then `+ OK\r\n` then the
/// raw bytes).
async fn handle_append<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    config: &ProxyConfig,
    session: Option<&mut Session>,
) -> Result<()> {
    let Some(sess) = session else {
        write_line(stream, &format!("{tag} BAD not logged in\r\n")).await?;
        return Ok(());
    };

    let Some(size) = parse_literal_size(rest) else {
        write_line(stream, &format!("{tag} BAD malformed APPEND\r\n")).await?;
        return Ok(());
    };

    write_line(stream, "+ OK\r\n").await?;
    let mut mail = vec![0u8; size];
    tokio::io::AsyncReadExt::read_exact(stream, &mut mail).await?;
    let mut trailing = String::new();
    let _ = stream.read_line(&mut trailing).await;

    let recipients = sess.keyring.public_keys();
    let result = backend::create_message(
        &mut sess.upstream,
        config,
        &mail,
        &recipients,
        &sess.keyring,
        &Radical,
        &["\\Seen"],
    )
    .await;

    match result {
        Ok(()) => write_line(stream, &format!("{tag} OK APPEND completed\r\n")).await?,
        Err(e) => write_line(stream, &format!("{tag} NO APPEND failed: {e}\r\n")).await?,
    }
    Ok(())
}

fn parse_literal_size(rest: &str) -> Option<usize> {
    let start = rest.rfind('{')?;
    let end = rest[start..].find('}')? + start;
    rest[start + 1..end].trim().parse().ok()
}

fn strip_tag_and_command<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let mut parts = line.splitn(3, ' ');
    let _tag = parts.next()?;
    let cmd = parts.next()?;
    if cmd.eq_ignore_ascii_case(keyword) {
        Some(parts.next().unwrap_or(""))
    } else {
        None
    }
}

fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => String::from_utf8_lossy(other.as_ref()).into_owned(),
    }
}

fn astring_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Render a `SequenceSet` as the upstream-compatible wire form
/// (`1`, `1:5`, `1,3,7`). Only single values and full ranges are
/// produced; `*` (largest UID) is passed through literally.
fn format_sequence_set(seq_set: &SequenceSet) -> String {
    seq_set
        .0
        .as_ref()
        .iter()
        .map(format_sequence)
        .collect::<Vec<_>>()
        .join(",")
}

/// Render a client-supplied `STORE` flag to its `\Seen`-style wire
/// token, so it can be forwarded verbatim in the upstream `STORE`
/// query.
fn store_flag_str(flag: &StoreFlag<'_>) -> String {
    flag.to_string()
}

fn format_sequence(seq: &Sequence) -> String {
    match seq {
        Sequence::Single(v) => format_seq_or_uid(v),
        Sequence::Range(start, end) => format!("{}:{}", format_seq_or_uid(start), format_seq_or_uid(end)),
    }
}

fn format_seq_or_uid(v: &SeqOrUid) -> String {
    match v {
        SeqOrUid::Value(n) => n.get().to_string(),
        SeqOrUid::Asterisk => "*".to_string(),
    }
}

async fn write_line<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut BufReader<S>, line: &str) -> Result<()> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().flush().await?;
    Ok(())
}

async fn write_bytes<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut BufReader<S>, data: &[u8]) -> Result<()> {
    stream.get_mut().write_all(data).await?;
    stream.get_mut().flush().await?;
    Ok(())
}
