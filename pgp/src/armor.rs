//! Splitting of ASCII-armored blocks.
//!
//! Setup messages and key transfers arrive as armored blocks as defined
//! in [RFC 4880, section 6.2], optionally carrying the Autocrypt armor
//! headers `Passphrase-Begin` and `Autocrypt-Prefer-Encrypt`.  The
//! splitter hands out views into the input; nothing is copied.
//!
//!   [RFC 4880, section 6.2]: https://tools.ietf.org/html/rfc4880#section-6.2

use crate::{Error, Result};

/// The parts of one armored block, borrowed from the input buffer.
#[derive(Debug, PartialEq)]
pub struct SplitArmored<'a> {
    /// The header line, e.g. `-----BEGIN PGP MESSAGE-----`.
    pub header: &'a str,

    /// Value of a `Passphrase-Begin` armor header, if present.
    pub passphrase_begin: Option<&'a str>,

    /// Value of an `Autocrypt-Prefer-Encrypt` armor header, if present.
    pub prefer_encrypt: Option<&'a str>,

    /// The base64 body.  May contain line breaks; decoders must skip
    /// whitespace.
    pub base64: &'a str,
}

impl<'a> SplitArmored<'a> {
    /// Returns the label between `-----BEGIN ` and the trailing dashes,
    /// e.g. `PGP MESSAGE`.
    pub fn label(&self) -> &'a str {
        &self.header["-----BEGIN ".len()..self.header.len() - "-----".len()]
    }
}

/// Splits armored data into header line, armor headers and base64 body.
///
/// Lines before the BEGIN line are skipped.  Armor headers follow until
/// an empty line; as a tolerance for malformed producers, a non-empty
/// line without a colon also starts the body.  The label on the END line
/// must equal the label on the BEGIN line exactly.
pub fn split_armored_data(buf: &str) -> Result<SplitArmored<'_>> {
    let mut header = None;
    let mut passphrase_begin = None;
    let mut prefer_encrypt = None;
    let mut body_start = None;

    let mut pos = 0;
    while pos <= buf.len() {
        let rest = &buf[pos..];
        let (raw_line, next) = match rest.find('\n') {
            Some(i) => (&rest[..i], pos + i + 1),
            None => (rest, buf.len() + 1),
        };
        let line = raw_line.trim();

        if header.is_none() {
            if line.starts_with("-----BEGIN ") && line.ends_with("-----") {
                header = Some(line);
            }
        } else if line.is_empty() {
            // Body starts on the next line.
            body_start = Some(next.min(buf.len()));
            break;
        } else if let Some(colon) = line.find(':') {
            let name = line[..colon].trim();
            let value = line[colon + 1..].trim();
            if name.eq_ignore_ascii_case("Passphrase-Begin") {
                passphrase_begin = Some(value);
            } else if name.eq_ignore_ascii_case("Autocrypt-Prefer-Encrypt") {
                prefer_encrypt = Some(value);
            }
        } else {
            // Non-standard header block without an empty line; the body
            // starts with this line.
            body_start = Some(pos);
            break;
        }

        pos = next;
    }

    let header = header.ok_or(Error::ArmorParse("no BEGIN line"))?;
    let body_start = body_start.ok_or(Error::ArmorParse("no body"))?;

    let tail = &buf[body_start..];
    let end = tail
        // The trailing space makes sure this is not a base64 sequence.
        .find("-----END ")
        .ok_or(Error::ArmorParse("no END line"))?;

    let label = &header["-----BEGIN ".len()..header.len() - "-----".len()];
    let after_end = &tail[end + "-----END ".len()..];
    if !(after_end.starts_with(label) && after_end[label.len()..].starts_with("-----")) {
        return Err(Error::ArmorParse("BEGIN and END labels disagree").into());
    }

    Ok(SplitArmored {
        header,
        passphrase_begin,
        prefer_encrypt,
        base64: tail[..end].trim(),
    })
}
