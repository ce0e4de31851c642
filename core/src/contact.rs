//! Contacts and address resolution.
//!
//! Every address observed in a mail is upserted as a contact together
//! with the *origin* of the observation.  Origins form a total order; a
//! contact keeps the highest origin ever seen, and display names from a
//! lower origin never overwrite names from a higher one.

use crate::mime::MailAddr;
use crate::store::Store;
use crate::{Error, Result};

/// The contact id of the local user.
pub const CONTACT_ID_SELF: u32 = 1;

/// Largest reserved contact id.
pub const CONTACT_ID_LAST_SPECIAL: u32 = 9;

/// Where an address was observed.  Ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Origin {
    Unknown = 0,
    /// From: of an incoming message from an unknown sender.
    IncomingUnknownFrom = 0x10,
    /// Cc: of an incoming message.
    IncomingCc = 0x20,
    /// To: of an incoming message.
    IncomingTo = 0x40,
    /// The contact replied to a message we know.
    IncomingReplyTo = 0x100,
    /// Bcc: of an outgoing message.
    OutgoingBcc = 0x800,
    /// Cc: of an outgoing message.
    OutgoingCc = 0x1000,
    /// To: of an outgoing message.
    OutgoingTo = 0x2000,
    /// Imported from the address book.
    AddressBook = 0x40000,
    /// Created by the user.
    ManuallyCreated = 0x100000,
}

impl Default for Origin {
    fn default() -> Self {
        Origin::Unknown
    }
}

impl Origin {
    /// True iff a contact of this origin counts as known, so that e.g.
    /// incoming messages open a real chat instead of the deaddrop.
    pub fn is_known(self) -> bool {
        self >= Origin::IncomingReplyTo
    }
}

/// A contact record as the store keeps it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Contact {
    pub id: u32,
    /// Normalized address, see [`normalize_addr`].
    pub addr: String,
    pub name: Option<String>,
    pub origin: Origin,
    pub blocked: bool,
    /// Additional data, e.g. the profile image.
    pub param: crate::param::Params,
}

/// Normalizes an address: trims whitespace and a single pair of angle
/// brackets, and lowercases the whole address.
///
/// Lowercasing the local part is not strictly RFC-conformant, but
/// case-sensitive local parts are never seen in the wild and
/// case-insensitive comparison is what every real mailbox does.
pub fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim();
    let addr = addr
        .strip_prefix('<')
        .and_then(|a| a.strip_suffix('>'))
        .unwrap_or(addr);
    addr.trim().to_lowercase()
}

/// Compares two addresses after normalization.
pub fn addr_cmp(a: &str, b: &str) -> bool {
    normalize_addr(a) == normalize_addr(b)
}

/// Normalizes a display name: collapses runs of whitespace, preserves
/// the user's casing.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The outcome of resolving one address list.
#[derive(Debug, Default)]
pub(crate) struct ResolvedAddrs {
    /// Contact ids, deduplicated, in list order.
    pub ids: Vec<u32>,
    /// One of the addresses was the configured self address.
    pub contains_self: bool,
}

/// Maps an address list to contact ids, upserting as needed.
///
/// The self address is skipped (and flagged); empty addresses are
/// ignored.
pub(crate) fn add_or_lookup_contacts(
    store: &mut dyn Store,
    self_addr: &str,
    addrs: &[MailAddr],
    origin: Origin,
) -> Result<ResolvedAddrs> {
    let mut resolved = ResolvedAddrs::default();
    for mail_addr in addrs {
        if mail_addr.addr.trim().is_empty() {
            continue;
        }
        if addr_cmp(&mail_addr.addr, self_addr) {
            resolved.contains_self = true;
            continue;
        }

        let name = mail_addr
            .display_name
            .as_deref()
            .map(normalize_name)
            .filter(|n| !n.is_empty());
        let id = store.upsert_contact(
            &normalize_addr(&mail_addr.addr),
            name.as_deref(),
            origin,
        )?;
        if id <= CONTACT_ID_LAST_SPECIAL {
            return Err(Error::Store("upsert returned a special id".into()).into());
        }
        if !resolved.ids.contains(&id) {
            resolved.ids.push(id);
        }
    }
    Ok(resolved)
}

/// True iff the contact's stored address equals `addr`.
pub(crate) fn contact_addr_equals(
    store: &dyn Store,
    contact_id: u32,
    addr: &str,
) -> bool {
    store
        .contact_by_id(contact_id)
        .map(|c| addr_cmp(&c.addr, addr))
        .unwrap_or(false)
}
