//! RFC 5322 header block: an ordered, case-preserving list of fields
//!
//! The NGCRYPT format needs byte-exact header round-tripping (the
//! header plaintext of part 1 must reproduce the original header
//! field-block exactly), which rules out normalizing through a
//! "flattened" MIME parser. This is a small ordered multimap over
//! field lines, the same shape as `message.Header`/`textproto.Header`
//! in the source this was distilled from (`epgpmessage/header.go`'s
//! `parseMessageHeader`).

use crate::error::{Error, Result};
use std::fmt::Write as _;

/// One `Name: Value` field line, order and case as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// An ordered header field block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: Vec<Field>,
}

impl Header {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Parse a header block terminated by a blank line (`\r\n\r\n` or
    /// `\n\n`). Returns the parsed header and the remainder of the
    /// input (the body, starting right after the blank line).
    ///
    /// Folded (continuation) lines starting with a space or tab are
    /// appended to the previous field's value, per RFC 5322 §2.2.3.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] if a non-blank, non-folded
    /// line has no `:` separator, or if no blank line terminates the
    /// header block before the input ends.
    pub fn parse(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut fields = Vec::new();
        let mut rest = input;

        loop {
            let line_end = find_line_end(rest)
                .ok_or_else(|| Error::MalformedInput("header block never terminates".into()))?;
            let (line, after) = (&rest[..line_end.line], &rest[line_end.next..]);

            if line.is_empty() {
                rest = after;
                break;
            }

            if (line[0] == b' ' || line[0] == b'\t') && !fields.is_empty() {
                let folded = String::from_utf8_lossy(line);
                let last = fields.last_mut().unwrap();
                let last: &mut Field = last;
                last.value.push(' ');
                last.value.push_str(folded.trim());
            } else {
                let text = String::from_utf8_lossy(line);
                let (name, value) = text
                    .split_once(':')
                    .ok_or_else(|| Error::MalformedInput(format!("invalid header line: {text}")))?;
                fields.push(Field {
                    name: name.trim().to_string(),
                    value: value.trim().to_string(),
                });
            }

            rest = after;
        }

        Ok((Self { fields }, rest))
    }

    /// First value for `name` (case-insensitive), if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// All values for `name` (case-insensitive), in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.fields
            .iter()
            .filter(move |f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Append a field, keeping any existing fields of the same name.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push(Field {
            name: name.to_string(),
            value: value.into(),
        });
    }

    /// Replace all fields named `name` with a single field carrying
    /// `value`, inserted at the position of the first removed field
    /// (or appended if none existed).
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let pos = self.fields.iter().position(|f| f.name.eq_ignore_ascii_case(name));
        self.remove(name);
        let field = Field {
            name: name.to_string(),
            value: value.into(),
        };
        match pos {
            Some(i) if i <= self.fields.len() => self.fields.insert(i, field),
            _ => self.fields.push(field),
        }
    }

    /// Remove every field named `name` (case-insensitive).
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|f| !f.name.eq_ignore_ascii_case(name));
    }

    /// Remove every field whose name starts with `prefix` (used to
    /// strip all `Content-*` fields ahead of deriving an outer header).
    pub fn remove_prefixed(&mut self, prefix: &str) {
        self.fields
            .retain(|f| !f.name.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase()));
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Parse `Content-Type`, returning `(media_type, params)`.
    #[must_use]
    pub fn content_type(&self) -> (String, Vec<(String, String)>) {
        let Some(raw) = self.get("Content-Type") else {
            return ("text/plain".to_string(), Vec::new());
        };
        parse_content_type(raw)
    }

    /// Set `Content-Type` from a media type and parameter list.
    pub fn set_content_type(&mut self, media_type: &str, params: &[(&str, &str)]) {
        let mut value = media_type.to_string();
        for (k, v) in params {
            let _ = write!(value, "; {k}={v}");
        }
        self.set("Content-Type", value);
    }

    /// Serialize as `Name: Value\r\n` pairs followed by a blank line.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for field in &self.fields {
            out.extend_from_slice(field.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(field.value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }
}

struct LineEnd {
    /// End offset of the line content (exclusive of the terminator).
    line: usize,
    /// Offset of the byte right after the terminator.
    next: usize,
}

fn find_line_end(buf: &[u8]) -> Option<LineEnd> {
    for i in 0..buf.len() {
        if buf[i] == b'\n' {
            let line = if i > 0 && buf[i - 1] == b'\r' { i - 1 } else { i };
            return Some(LineEnd { line, next: i + 1 });
        }
    }
    None
}

/// Parse a `Content-Type`-shaped value: `type/subtype; a=b; c="d"`.
#[must_use]
pub fn parse_content_type(raw: &str) -> (String, Vec<(String, String)>) {
    let mut parts = raw.split(';');
    let media_type = parts.next().unwrap_or_default().trim().to_lowercase();
    let mut params = Vec::new();
    for part in parts {
        if let Some((k, v)) = part.split_once('=') {
            let v = v.trim().trim_matches('"').to_string();
            params.push((k.trim().to_lowercase(), v));
        }
    }
    (media_type, params)
}
