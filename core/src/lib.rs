//! The brieftaube messenger core.
//!
//! This crate turns raw RFC 5322 messages handed over by the transport
//! into chats, contacts and messages: it classifies a parsed message as
//! incoming or outgoing, resolves the addresses to contacts, assigns the
//! message to a 1:1 chat, a group chat or the deaddrop, reconciles group
//! membership from chat headers, suppresses duplicates, repairs broken
//! timestamps, processes read receipts, and emits change events after the
//! enclosing store transaction committed.
//!
//! Transport (IMAP/SMTP), the SQL layout and the UI object model are out
//! of scope; the pipeline talks to persistence only through the
//! [`Store`] trait and to OpenPGP only through [`brieftaube_pgp::Engine`].

pub mod aheader;
pub mod chat;
pub mod config;
pub mod contact;
pub mod e2ee;
pub mod event;
pub mod group;
pub mod mailbox;
pub mod mdn;
pub mod message;
pub mod mime;
pub mod param;
pub mod receive;
pub mod store;
mod util;

pub use crate::chat::{Chat, ChatKind};
pub use crate::contact::{Contact, Origin};
pub use crate::event::Event;
pub use crate::mailbox::Mailbox;
pub use crate::message::{Msg, MsgState, MsgType};
pub use crate::mime::MimeMessage;
pub use crate::param::{Param, Params};
pub use crate::store::{MemoryStore, Store};

/// Result specialization used throughout this crate.
pub type Result<T> = anyhow::Result<T>;

/// Errors with a meaning of their own inside the pipeline.
///
/// Most pipeline failures are degraded to a warning log line plus a
/// rolled-back transaction; these variants let callers and tests tell the
/// classes apart where it matters.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Persistence failed; the enclosing transaction is rolled back.
    #[error("Store error: {0}")]
    Store(String),

    /// A MIME field required by a header handler is missing or unusable.
    #[error("Malformed header: {0}")]
    MalformedHeader(&'static str),
}

/// Transport flag: the message was already marked seen on the server.
pub const IMAP_SEEN: u32 = 0x0001;
