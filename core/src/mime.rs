//! The parsed-message boundary.
//!
//! MIME parsing itself is delegated to [`mailparse`]; this module
//! flattens the result into the shape the ingest pipeline works with:
//! a header map, a list of displayable parts, report subparts, and the
//! payload of a `multipart/encrypted` container if there is one.

use mailparse::{
    addrparse, dateparse, msgidparse, parse_mail, DispositionType,
    MailAddr as ParsedAddr, ParsedMail,
};

use crate::message::MsgType;
use crate::param::{Param, Params};
use crate::{Error, Result};

/// One address from an address-list header, display name already
/// RFC 2047 decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct MailAddr {
    pub addr: String,
    pub display_name: Option<String>,
}

/// One displayable part of a message.
#[derive(Clone, Debug, Default)]
pub struct MimePart {
    pub kind: MsgType,
    pub text: String,
    pub param: Params,
    pub bytes: usize,
}

/// A `multipart/report` container.
#[derive(Clone, Debug)]
pub struct Report {
    /// The `report-type` content-type parameter.
    pub report_type: Option<String>,
    /// Transfer-decoded bodies of the subparts, in order.
    pub subparts: Vec<Vec<u8>>,
}

/// A parsed message, flattened for the pipeline.
#[derive(Debug, Default)]
pub struct MimeMessage {
    /// `(lowercased name, decoded value)`, in order.  Lookups return the
    /// first match, so prepended protected headers take precedence.
    headers: Vec<(String, String)>,
    pub parts: Vec<MimePart>,
    pub reports: Vec<Report>,
    pub subject: Option<String>,
    /// Sent by a messenger client rather than a plain mail client.
    pub is_send_by_messenger: bool,
    pub(crate) encrypted_payload: Option<Vec<u8>>,
}

impl MimeMessage {
    /// Parses a raw RFC 5322 message.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mail = parse_mail(raw)?;
        if mail.headers.is_empty() {
            return Err(Error::MalformedHeader("message without headers").into());
        }

        let mut msg = MimeMessage::default();
        for header in &mail.headers {
            msg.headers
                .push((header.get_key().to_lowercase(), header.get_value()));
        }
        msg.subject = msg
            .header("subject")
            .map(str::to_string)
            .filter(|s| !s.is_empty());
        msg.is_send_by_messenger = msg.header("chat-version").is_some()
            || msg.header("x-mrversion").is_some()
            || msg.header("x-mrmsg").is_some();

        msg.collect_parts(&mail);
        if msg.parts.is_empty() && msg.reports.is_empty() {
            // Keep at least one (possibly empty) part so that the mail
            // leaves a row and is not re-downloaded forever.
            msg.parts.push(MimePart::default());
        }
        Ok(msg)
    }

    fn collect_parts(&mut self, mail: &ParsedMail) {
        let mimetype = mail.ctype.mimetype.to_lowercase();

        if mimetype == "multipart/report" {
            self.reports.push(Report {
                report_type: mail.ctype.params.get("report-type").cloned(),
                subparts: mail
                    .subparts
                    .iter()
                    .map(|sub| sub.get_body_raw().unwrap_or_default())
                    .collect(),
            });
        } else if mimetype == "multipart/encrypted" {
            // The first subpart only names the protocol; the second one
            // carries the OpenPGP payload.
            if let Some(payload) = mail.subparts.get(1) {
                self.encrypted_payload =
                    Some(payload.get_body_raw().unwrap_or_default());
            }
        } else if mimetype.starts_with("multipart/") {
            for sub in &mail.subparts {
                self.collect_parts(sub);
            }
        } else if mimetype == "text/plain" {
            let disposition = mail.get_content_disposition();
            if disposition.disposition == DispositionType::Attachment {
                self.push_attachment(mail, MsgType::File);
            } else {
                let text = mail.get_body().unwrap_or_default();
                self.parts.push(MimePart {
                    kind: MsgType::Text,
                    text: text.trim().to_string(),
                    param: Params::new(),
                    bytes: text.len(),
                });
            }
        } else if mimetype == "text/html" {
            // The text/plain alternative is used instead.
        } else {
            let kind = if mimetype == "image/gif" {
                MsgType::Gif
            } else if mimetype.starts_with("image/") {
                MsgType::Image
            } else if mimetype.starts_with("audio/") {
                MsgType::Audio
            } else if mimetype.starts_with("video/") {
                MsgType::Video
            } else {
                MsgType::File
            };
            self.push_attachment(mail, kind);
        }
    }

    fn push_attachment(&mut self, mail: &ParsedMail, kind: MsgType) {
        let disposition = mail.get_content_disposition();
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| mail.ctype.params.get("name"))
            .cloned();

        let mut param = Params::new();
        if let Some(filename) = filename {
            param.set(Param::File, filename);
        }
        let bytes = mail.get_body_raw().map(|b| b.len()).unwrap_or(0);
        self.parts.push(MimePart { kind, text: String::new(), param, bytes });
    }

    /// Returns the first value of the header `name` (lowercase).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a chat header under its canonical name, falling back to
    /// the legacy `X-Mr*` name.
    pub fn chat_header(&self, canonical: &str, legacy: &str) -> Option<&str> {
        self.header(canonical).or_else(|| self.header(legacy))
    }

    fn addr_header(&self, name: &str) -> Vec<MailAddr> {
        let value = match self.header(name) {
            Some(value) => value,
            None => return Vec::new(),
        };
        let list = match addrparse(value) {
            Ok(list) => list,
            Err(_) => return Vec::new(),
        };

        let mut addrs = Vec::new();
        for entry in list.iter() {
            match entry {
                ParsedAddr::Single(info) => addrs.push(MailAddr {
                    addr: info.addr.clone(),
                    display_name: info.display_name.clone(),
                }),
                ParsedAddr::Group(group) => {
                    for info in &group.addrs {
                        addrs.push(MailAddr {
                            addr: info.addr.clone(),
                            display_name: info.display_name.clone(),
                        });
                    }
                }
            }
        }
        addrs
    }

    pub fn from_addrs(&self) -> Vec<MailAddr> {
        self.addr_header("from")
    }

    pub fn to_addrs(&self) -> Vec<MailAddr> {
        self.addr_header("to")
    }

    pub fn cc_addrs(&self) -> Vec<MailAddr> {
        self.addr_header("cc")
    }

    pub fn bcc_addrs(&self) -> Vec<MailAddr> {
        self.addr_header("bcc")
    }

    /// The Message-ID, without angle brackets.
    pub fn message_id(&self) -> Option<String> {
        self.header("message-id")
            .and_then(|v| msgidparse(v).ok())
            .and_then(|ids| ids.first().cloned())
    }

    fn msgid_list(&self, name: &str) -> Vec<String> {
        self.header(name)
            .and_then(|v| msgidparse(v).ok())
            .map(|ids| ids.to_vec())
            .unwrap_or_default()
    }

    pub fn in_reply_to(&self) -> Vec<String> {
        self.msgid_list("in-reply-to")
    }

    pub fn references(&self) -> Vec<String> {
        self.msgid_list("references")
    }

    /// The Date: header as a unix timestamp, unchecked against the
    /// clock.
    pub fn timestamp(&self) -> Option<i64> {
        self.header("date").and_then(|d| dateparse(d).ok())
    }

    /// Messages sent by us are assumed to never carry a Return-Path.
    pub fn has_return_path(&self) -> bool {
        self.header("return-path").is_some()
    }

    /// The raw `Autocrypt:` header value, if any.
    pub fn autocrypt_header(&self) -> Option<&str> {
        self.header("autocrypt")
    }

    /// The sender asked for a read receipt.
    pub fn wants_mdn(&self) -> bool {
        self.header("disposition-notification-to").is_some()
    }

    /// Replaces this message's content with the decrypted payload,
    /// giving the protected inner headers precedence over the outer
    /// ones.
    pub(crate) fn merge_decrypted(&mut self, plain: &[u8]) {
        match MimeMessage::parse(plain) {
            Ok(inner) => {
                let mut headers = inner.headers;
                headers.append(&mut self.headers);
                self.headers = headers;
                if inner.subject.is_some() {
                    self.subject = inner.subject;
                }
                self.is_send_by_messenger |= inner.is_send_by_messenger;
                self.parts = inner.parts;
                self.reports.extend(inner.reports);
            }
            Err(_) => {
                // Not a MIME message; show the decrypted text as-is.
                self.parts = vec![MimePart {
                    kind: MsgType::Text,
                    text: String::from_utf8_lossy(plain).trim().to_string(),
                    param: Params::new(),
                    bytes: plain.len(),
                }];
            }
        }
        self.encrypted_payload = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_mail() {
        let msg = MimeMessage::parse(
            b"From: =?utf-8?q?B=C3=B6b?= <bob@example.org>\n\
              To: alice@example.org, carol <carol@example.org>\n\
              Subject: hello\n\
              Message-ID: <Mr.12345@example.org>\n\
              Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
              Return-Path: <bob@example.org>\n\
              \n\
              hi there\n",
        )
        .unwrap();

        assert!(msg.has_return_path());
        assert!(!msg.is_send_by_messenger);
        assert_eq!(msg.subject.as_deref(), Some("hello"));
        assert_eq!(msg.message_id().as_deref(), Some("Mr.12345@example.org"));
        assert_eq!(msg.timestamp(), Some(1508668200));

        let from = msg.from_addrs();
        assert_eq!(from.len(), 1);
        assert_eq!(from[0].addr, "bob@example.org");
        assert_eq!(from[0].display_name.as_deref(), Some("Böb"));
        assert_eq!(msg.to_addrs().len(), 2);

        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.parts[0].kind, MsgType::Text);
        assert_eq!(msg.parts[0].text, "hi there");
    }

    #[test]
    fn messenger_detection_and_legacy_headers() {
        let msg = MimeMessage::parse(
            b"From: bob@example.org\n\
              Chat-Version: 1.0\n\
              X-MrGrpId: abcd1234\n\
              \n\
              m\n",
        )
        .unwrap();
        assert!(msg.is_send_by_messenger);
        assert_eq!(
            msg.chat_header("chat-group-id", "x-mrgrpid"),
            Some("abcd1234")
        );
    }

    #[test]
    fn multipart_mixed_with_attachment() {
        let msg = MimeMessage::parse(
            b"From: bob@example.org\n\
              Content-Type: multipart/mixed; boundary=\"b\"\n\
              \n\
              --b\n\
              Content-Type: text/plain\n\
              \n\
              see attachment\n\
              --b\n\
              Content-Type: application/pdf; name=\"report.pdf\"\n\
              Content-Disposition: attachment; filename=\"report.pdf\"\n\
              \n\
              %PDF-1.4\n\
              --b--\n",
        )
        .unwrap();

        assert_eq!(msg.parts.len(), 2);
        assert_eq!(msg.parts[0].kind, MsgType::Text);
        assert_eq!(msg.parts[0].text, "see attachment");
        assert_eq!(msg.parts[1].kind, MsgType::File);
        assert_eq!(msg.parts[1].param.get(Param::File), Some("report.pdf"));
        assert!(msg.parts[1].bytes > 0);
    }

    #[test]
    fn report_collection() {
        let msg = MimeMessage::parse(
            b"From: bob@example.org\n\
              Content-Type: multipart/report; report-type=disposition-notification; boundary=\"b\"\n\
              \n\
              --b\n\
              Content-Type: text/plain\n\
              \n\
              The message was displayed.\n\
              --b\n\
              Content-Type: message/disposition-notification\n\
              \n\
              Disposition: manual-action/MDN-sent-automatically; displayed\n\
              Original-Message-ID: <Mr.1@example.org>\n\
              --b--\n",
        )
        .unwrap();

        assert_eq!(msg.reports.len(), 1);
        let report = &msg.reports[0];
        assert_eq!(
            report.report_type.as_deref(),
            Some("disposition-notification")
        );
        assert_eq!(report.subparts.len(), 2);
        assert!(msg.parts.is_empty());
    }

    #[test]
    fn encrypted_payload_discovery() {
        let msg = MimeMessage::parse(
            b"From: bob@example.org\n\
              Content-Type: multipart/encrypted; protocol=\"application/pgp-encrypted\"; boundary=\"b\"\n\
              \n\
              --b\n\
              Content-Type: application/pgp-encrypted\n\
              \n\
              Version: 1\n\
              --b\n\
              Content-Type: application/octet-stream\n\
              \n\
              -----BEGIN PGP MESSAGE-----\n\
              \n\
              AAAA\n\
              -----END PGP MESSAGE-----\n\
              --b--\n",
        )
        .unwrap();

        let payload = msg.encrypted_payload.as_ref().unwrap();
        assert!(payload.starts_with(b"-----BEGIN PGP MESSAGE-----"));
    }

    #[test]
    fn mail_without_parts_gets_an_empty_one() {
        let msg = MimeMessage::parse(b"From: bob@example.org\n\n").unwrap();
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.parts[0].text, "");
    }

    #[test]
    fn merge_decrypted_prefers_protected_headers() {
        let mut msg = MimeMessage::parse(
            b"From: bob@example.org\n\
              Subject: ...\n\
              \n\
              placeholder\n",
        )
        .unwrap();
        msg.merge_decrypted(
            b"Subject: the real subject\n\
              Chat-Group-ID: abcd1234\n\
              Chat-Version: 1.0\n\
              \n\
              the real text\n",
        );

        assert_eq!(msg.subject.as_deref(), Some("the real subject"));
        assert_eq!(msg.header("chat-group-id"), Some("abcd1234"));
        assert_eq!(msg.header("from"), Some("bob@example.org"));
        assert!(msg.is_send_by_messenger);
        assert_eq!(msg.parts[0].text, "the real text");
    }
}
