//! The line-oriented ASCII header format shared by every CZMIL file.
//!
//! A header is a run of lines of one of four shapes:
//!
//! - `[TAG] = value` — a single-line tag.
//! - `{TAG =` ... body ... `}` — a multi-line tag; the body is every line up
//!   to (but not including) a line whose first character is `}`, with
//!   trailing CR/LF stripped.
//! - `########## section ##########` — a banner, kept only to mark where
//!   the application-defined-fields section begins.
//! - `# comment` — ignored outside a tag body.
//!
//! `[END OF HEADER]` terminates the header region, which is then space-padded
//! out to the file's declared `header_size`.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Magic substring that must appear in the first 128 bytes of every header.
pub const MAGIC: &str = "CZMIL library";

/// Banner marking the start of the section holding unrecognised, preserved tags.
pub const APPLICATION_DEFINED_FIELDS: &str = "APPLICATION DEFINED FIELDS";

const END_OF_HEADER: &str = "[END OF HEADER]";

/// One parsed line of a header, in original order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawLine {
    /// `# ...` outside any tag body.
    Comment(String),
    /// `########## ... ##########`.
    Banner(String),
    /// `[TAG] = value`.
    Tag {
        /// The tag name, without brackets.
        name: String,
        /// The raw right-hand side, not yet typed.
        value: String,
    },
    /// `{TAG = ... }`.
    MultilineTag {
        /// The tag name, without braces.
        name: String,
        /// The captured body, CR/LF-stripped, one `String` per line.
        body: Vec<String>,
    },
}

/// A header, parsed into an ordered line list plus convenience lookups.
///
/// [`RawHeader`] does not know the semantics of any tag; [`crate::header::Header`]
/// builds a typed view on top of it. Unknown tags found after the
/// [`APPLICATION_DEFINED_FIELDS`] banner are kept verbatim in `lines` so that
/// they round-trip byte-for-byte even though this codec never interprets them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawHeader {
    /// Every parsed line, in file order, excluding the final `[END OF HEADER]`
    /// sentinel and the trailing padding.
    pub lines: Vec<RawLine>,
}

impl RawHeader {
    /// Looks up the value of a single-line tag by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            RawLine::Tag { name: n, value } if n == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// Looks up the body of a multi-line tag by name.
    pub fn get_multiline(&self, name: &str) -> Option<&[String]> {
        self.lines.iter().find_map(|line| match line {
            RawLine::MultilineTag { name: n, body } if n == name => Some(body.as_slice()),
            _ => None,
        })
    }

    /// Sets (inserting or overwriting) a single-line tag, preserving its
    /// original position if it already existed, or appending before the
    /// first [`APPLICATION_DEFINED_FIELDS`] banner otherwise.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        for line in &mut self.lines {
            if let RawLine::Tag { name: n, value: v } = line {
                if n == name {
                    *v = value;
                    return;
                }
            }
        }
        let insert_at = self.application_section_start();
        self.lines.insert(
            insert_at,
            RawLine::Tag {
                name: name.to_string(),
                value,
            },
        );
    }

    fn application_section_start(&self) -> usize {
        self.lines
            .iter()
            .position(|l| matches!(l, RawLine::Banner(b) if b.contains(APPLICATION_DEFINED_FIELDS)))
            .unwrap_or(self.lines.len())
    }

    /// Adds a new application-defined tag. Errors if the name collides with
    /// a tag that already exists (known or application-defined).
    pub fn add_application_tag(&mut self, name: &str, value: &str) -> Result<()> {
        if self.get(name).is_some() || self.get_multiline(name).is_some() {
            return Err(Error::ReservedTagName(name.to_string()));
        }
        self.lines.push(RawLine::Tag {
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Updates an existing application-defined tag's value in place.
    pub fn update_application_tag(&mut self, name: &str, value: &str) -> Result<()> {
        for line in &mut self.lines {
            if let RawLine::Tag { name: n, value: v } = line {
                if n == name {
                    *v = value.to_string();
                    return Ok(());
                }
            }
        }
        Err(Error::ReservedTagName(format!("{name} (not found)")))
    }

    /// Removes an application-defined tag, shifting later lines up.
    pub fn delete_application_tag(&mut self, name: &str) -> Result<()> {
        let before = self.lines.len();
        self.lines.retain(|line| match line {
            RawLine::Tag { name: n, .. } => n != name,
            _ => true,
        });
        if self.lines.len() == before {
            return Err(Error::ReservedTagName(format!("{name} (not found)")));
        }
        Ok(())
    }

    /// Reads and parses a header from `read`, leaving the stream positioned
    /// at exactly `header_size` bytes from where it started.
    ///
    /// `header_size` is both read out of the header (the `[HEADER SIZE]` tag,
    /// interpreted by the caller) and used here to know how far to skip past
    /// the padding; this function returns the raw header and the number of
    /// bytes consumed by the textual region (before padding), so the caller
    /// can validate/derive `header_size` and then seek past the rest.
    pub fn read_from<R: Read>(mut read: R, path_for_errors: &std::path::Path) -> Result<RawHeader> {
        let mut sniff = vec![0u8; 128];
        let n = read
            .read(&mut sniff)
            .map_err(|e| Error::io(path_for_errors, e))?;
        sniff.truncate(n);
        let text_sniff = String::from_utf8_lossy(&sniff);
        if !text_sniff.contains(MAGIC) {
            return Err(Error::MissingMagic {
                path: path_for_errors.to_path_buf(),
            });
        }

        let mut rest = Vec::new();
        read.read_to_end(&mut rest)
            .map_err(|e| Error::io(path_for_errors, e))?;
        let mut all = sniff;
        all.extend(rest);
        let text = String::from_utf8_lossy(&all);

        let mut lines = Vec::new();
        let mut iter = text.lines().peekable();
        while let Some(raw_line) = iter.next() {
            let trimmed_end = raw_line.trim_end_matches(['\r', '\n']);
            if trimmed_end.trim() == END_OF_HEADER {
                break;
            }
            if trimmed_end.trim_start().starts_with("##########") {
                lines.push(RawLine::Banner(trimmed_end.trim().to_string()));
                continue;
            }
            if let Some(stripped) = trimmed_end.trim_start().strip_prefix('#') {
                if !trimmed_end.trim_start().starts_with("##########") {
                    lines.push(RawLine::Comment(stripped.trim().to_string()));
                    continue;
                }
            }
            let trimmed = trimmed_end.trim_start();
            if let Some(name_and_rest) = trimmed.strip_prefix('{') {
                let (name, _) = name_and_rest
                    .split_once('=')
                    .unwrap_or((name_and_rest, ""));
                let name = name.trim().to_string();
                let mut body = Vec::new();
                for body_line in iter.by_ref() {
                    let body_trimmed = body_line.trim_end_matches(['\r', '\n']);
                    if body_trimmed.trim_start().starts_with('}') {
                        break;
                    }
                    body.push(body_trimmed.to_string());
                }
                lines.push(RawLine::MultilineTag { name, body });
                continue;
            }
            if let Some(name_and_rest) = trimmed.strip_prefix('[') {
                if let Some((name, after)) = name_and_rest.split_once(']') {
                    let value = after.trim_start().strip_prefix('=').unwrap_or(after).trim();
                    lines.push(RawLine::Tag {
                        name: name.trim().to_string(),
                        value: value.to_string(),
                    });
                    continue;
                }
            }
            if trimmed.is_empty() {
                continue;
            }
            // Unrecognised syntax inside the header: keep as a comment so it
            // still round-trips rather than being silently dropped.
            lines.push(RawLine::Comment(trimmed.to_string()));
        }

        Ok(RawHeader { lines })
    }

    /// Serialises the header's lines, appends the end-of-header sentinel,
    /// and space-pads the region out to exactly `header_size` bytes.
    ///
    /// Returns an error if the canonical serialisation (before padding)
    /// already exceeds `header_size`.
    pub fn write_to<W: Write>(&self, mut write: W, header_size: u32) -> Result<()> {
        let mut text = String::new();
        for line in &self.lines {
            match line {
                RawLine::Comment(c) => {
                    text.push('#');
                    text.push(' ');
                    text.push_str(c);
                    text.push('\n');
                }
                RawLine::Banner(b) => {
                    text.push_str(b);
                    text.push('\n');
                }
                RawLine::Tag { name, value } => {
                    text.push('[');
                    text.push_str(name);
                    text.push_str("] = ");
                    text.push_str(value);
                    text.push('\n');
                }
                RawLine::MultilineTag { name, body } => {
                    text.push('{');
                    text.push_str(name);
                    text.push_str(" = \n");
                    for b in body {
                        text.push_str(b);
                        text.push('\n');
                    }
                    text.push_str("}\n");
                }
            }
        }
        text.push_str(END_OF_HEADER);
        text.push('\n');

        if text.len() > header_size as usize {
            return Err(Error::HeaderSizeExceeded {
                tag: "<header>".to_string(),
                header_size,
            });
        }
        let mut bytes = text.into_bytes();
        bytes.resize(header_size as usize, b' ');
        write
            .write_all(&bytes)
            .map_err(|e| Error::io(std::path::Path::new("<header>"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> RawHeader {
        let mut h = RawHeader::default();
        h.set("VERSION", "V3.1");
        h.set("FILE TYPE", "CPF");
        h.lines.push(RawLine::Banner(format!(
            "########## {APPLICATION_DEFINED_FIELDS} ##########"
        )));
        h
    }

    #[test]
    fn roundtrip_known_tags() {
        let header = sample();
        let mut buf = Vec::new();
        header.write_to(Cursor::new(&mut buf), 4096).unwrap();
        assert_eq!(4096, buf.len());
        let parsed = RawHeader::read_from(Cursor::new(&buf), std::path::Path::new("x")).unwrap();
        assert_eq!(Some("V3.1"), parsed.get("VERSION"));
        assert_eq!(Some("CPF"), parsed.get("FILE TYPE"));
    }

    #[test]
    fn missing_magic_is_rejected() {
        let mut buf = vec![b' '; 4096];
        buf[0..5].copy_from_slice(b"NOPE\n");
        let err = RawHeader::read_from(Cursor::new(&buf), std::path::Path::new("x")).unwrap_err();
        assert!(matches!(err, Error::MissingMagic { .. }));
    }

    #[test]
    fn application_tag_crud_preserves_layout() {
        let mut header = sample();
        header.add_application_tag("MY TAG", "hello").unwrap();
        assert_eq!(Some("hello"), header.get("MY TAG"));
        header.update_application_tag("MY TAG", "world").unwrap();
        assert_eq!(Some("world"), header.get("MY TAG"));
        header.delete_application_tag("MY TAG").unwrap();
        assert_eq!(None, header.get("MY TAG"));
    }

    #[test]
    fn reserved_name_collision_is_rejected() {
        let mut header = sample();
        assert!(header.add_application_tag("VERSION", "x").is_err());
    }

    #[test]
    fn multiline_tag_roundtrip() {
        let mut header = RawHeader::default();
        header.lines.push(RawLine::MultilineTag {
            name: "COMMENTS".to_string(),
            body: vec!["line one".to_string(), "line two".to_string()],
        });
        let mut buf = Vec::new();
        header.write_to(Cursor::new(&mut buf), 4096).unwrap();
        let parsed = RawHeader::read_from(Cursor::new(&buf), std::path::Path::new("x"));
        // No magic present, so this is expected to fail the sniff; build one with magic instead.
        assert!(parsed.is_err());

        let mut header = RawHeader::default();
        header.set("MAGIC", MAGIC);
        header.lines.push(RawLine::MultilineTag {
            name: "COMMENTS".to_string(),
            body: vec!["line one".to_string(), "line two".to_string()],
        });
        let mut buf = Vec::new();
        header.write_to(Cursor::new(&mut buf), 4096).unwrap();
        let parsed = RawHeader::read_from(Cursor::new(&buf), std::path::Path::new("x")).unwrap();
        assert_eq!(
            Some(["line one".to_string(), "line two".to_string()].as_slice()),
            parsed.get_multiline("COMMENTS")
        );
    }
}
