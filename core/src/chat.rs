//! Chats.
//!
//! Chat ids below [`CHAT_ID_LAST_SPECIAL`] are reserved for virtual
//! chats; real chats start above.

/// Virtual chat holding unsolicited inbound mail.
pub const CHAT_ID_DEADDROP: u32 = 1;

/// Messages put here are invisible and eventually deleted.
pub const CHAT_ID_TRASH: u32 = 3;

/// Virtual chat for outbound mail without a known chat.
pub const CHAT_ID_TO_DEADDROP: u32 = 7;

/// Largest reserved chat id.
pub const CHAT_ID_LAST_SPECIAL: u32 = 9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ChatKind {
    Single = 100,
    Group = 120,
}

/// A chat record as the store keeps it.
#[derive(Clone, Debug, PartialEq)]
pub struct Chat {
    pub id: u32,
    pub kind: ChatKind,
    pub name: String,
    /// For group chats, the opaque group id carried in the mail headers.
    pub grpid: Option<String>,
}
