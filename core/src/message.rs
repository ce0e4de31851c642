//! Messages.

use crate::param::Params;

/// Marker inserted by the UI between days; never stored.
pub const MSG_ID_DAYMARKER: u32 = 9;

/// Largest reserved message id.
pub const MSG_ID_LAST_SPECIAL: u32 = 9;

/// Message state, covering both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum MsgState {
    Undefined = 0,
    /// Incoming, not noticed nor seen.
    InFresh = 10,
    /// Incoming, noticed (e.g. chat opened) but not read.
    InNoticed = 13,
    /// Incoming and read.
    InSeen = 16,
    /// Outgoing, queued for sending.
    OutPending = 20,
    /// Outgoing, sending failed.
    OutError = 24,
    /// Outgoing, accepted by the server.
    OutDelivered = 26,
    /// Outgoing, a read receipt arrived.
    OutRead = 28,
}

impl Default for MsgState {
    fn default() -> Self {
        MsgState::Undefined
    }
}

/// What a message row carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    Text = 10,
    Image = 20,
    Gif = 21,
    Audio = 40,
    Voice = 41,
    Video = 50,
    File = 60,
}

impl Default for MsgType {
    fn default() -> Self {
        MsgType::Text
    }
}

/// A message row.
///
/// `id` is assigned by the store on insert; rows are insert-only except
/// for `state` transitions and `server_folder`/`server_uid` updates when
/// mail is moved on the server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Msg {
    pub id: u32,
    /// The Message-ID, without angle brackets.  Unique across rows in
    /// non-special chats.
    pub rfc724_mid: String,
    pub server_folder: String,
    pub server_uid: u32,
    pub chat_id: u32,
    pub from_id: u32,
    pub to_id: u32,
    pub timestamp: i64,
    pub kind: MsgType,
    pub state: MsgState,
    /// Sent by a messenger client (as opposed to a plain mail client).
    pub is_msgr: bool,
    pub text: String,
    /// Subject plus unmodified message text, for full-text search.
    pub text_raw: String,
    pub param: Params,
    pub bytes: usize,
}

/// Creates the single-line summary used for ghost messages and chatlist
/// previews.
pub fn summary_text(kind: MsgType, text: &str, approx_chars: usize) -> String {
    let prefix = match kind {
        MsgType::Text => None,
        MsgType::Image => Some("Image"),
        MsgType::Gif => Some("GIF"),
        MsgType::Audio => Some("Audio"),
        MsgType::Voice => Some("Voice message"),
        MsgType::Video => Some("Video"),
        MsgType::File => Some("File"),
    };

    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text: String = if text.chars().count() > approx_chars {
        let mut t: String = text.chars().take(approx_chars).collect();
        t.push_str("...");
        t
    } else {
        text
    };

    match (prefix, text.is_empty()) {
        (Some(prefix), true) => prefix.to_string(),
        (Some(prefix), false) => format!("{} - {}", prefix, text),
        (None, _) => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_collapses_whitespace_and_truncates() {
        assert_eq!(summary_text(MsgType::Text, "a  b\nc", 100), "a b c");
        assert_eq!(
            summary_text(MsgType::Text, "0123456789", 4),
            "0123..."
        );
        assert_eq!(summary_text(MsgType::Image, "", 10), "Image");
        assert_eq!(
            summary_text(MsgType::File, "report.pdf", 100),
            "File - report.pdf"
        );
    }
}
