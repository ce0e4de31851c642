//! The persistence contract.
//!
//! The pipeline talks to storage only through [`Store`]; the SQL layout
//! behind it is out of scope here.  [`MemoryStore`] is a complete
//! implementation used by the tests (and useful for ephemeral accounts):
//! transactions are modeled by snapshotting the whole state on `begin`
//! and restoring it on `rollback`.
//!
//! All access is serialized by one coarse lock owned by the
//! [`Mailbox`](crate::Mailbox); implementations need not be internally
//! synchronized.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::aheader::EncryptPreference;
use crate::chat::{Chat, ChatKind, CHAT_ID_DEADDROP, CHAT_ID_LAST_SPECIAL};
use crate::contact::{Contact, Origin, CONTACT_ID_LAST_SPECIAL, CONTACT_ID_SELF};
use crate::message::{Msg, MsgState, MSG_ID_LAST_SPECIAL};
use crate::{Error, Result};

/// Reset bit: delete stored keypairs and peer keys.
pub const RESET_KEYS: u32 = 0x2;

/// Reset bit: delete contacts, chats, messages and left-group markers.
pub const RESET_CHATS: u32 = 0x8;

/// The operations the ingest pipeline needs from persistence.
pub trait Store: Send {
    // -- transactions ----------------------------------------------------

    fn begin_transaction(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    // -- config ----------------------------------------------------------

    fn get_config(&self, key: &str) -> Option<String>;
    fn set_config(&mut self, key: &str, value: Option<&str>) -> Result<()>;

    // -- contacts --------------------------------------------------------

    fn contact_by_id(&self, id: u32) -> Option<Contact>;
    fn contact_id_by_addr(&self, addr: &str) -> Option<u32>;

    /// Inserts the contact or, if the normalized address is already
    /// known, raises its origin to `max(stored, origin)`; the display
    /// name is updated only if `origin` is at least the stored origin.
    /// Returns the contact id.
    fn upsert_contact(
        &mut self,
        addr: &str,
        name: Option<&str>,
        origin: Origin,
    ) -> Result<u32>;

    /// Raises the contact's origin; never lowers it.
    fn scaleup_contact_origin(&mut self, id: u32, origin: Origin) -> Result<()>;

    fn is_contact_blocked(&self, id: u32) -> bool;
    fn set_contact_blocked(&mut self, id: u32, blocked: bool) -> Result<()>;

    // -- chats -----------------------------------------------------------

    fn chat_by_id(&self, id: u32) -> Option<Chat>;
    fn chat_id_by_grpid(&self, grpid: &str) -> Option<u32>;
    fn create_group_chat(&mut self, name: &str, grpid: &str) -> Result<u32>;
    fn set_chat_name(&mut self, chat_id: u32, name: &str) -> Result<()>;

    /// The 1:1 chat with the given contact, if it exists.
    fn single_chat_by_contact(&self, contact_id: u32) -> Option<u32>;
    fn create_single_chat(&mut self, contact_id: u32) -> Result<u32>;

    fn add_chat_contact(&mut self, chat_id: u32, contact_id: u32) -> Result<()>;
    fn remove_all_chat_contacts(&mut self, chat_id: u32) -> Result<()>;
    fn is_contact_in_chat(&self, chat_id: u32, contact_id: u32) -> bool;
    fn chat_contact_count(&self, chat_id: u32) -> usize;

    // -- left groups -----------------------------------------------------

    fn is_group_left(&self, grpid: &str) -> bool;
    fn mark_group_left(&mut self, grpid: &str) -> Result<()>;
    fn unmark_group_left(&mut self, grpid: &str) -> Result<()>;

    // -- messages --------------------------------------------------------

    /// Inserts a message row, ignoring `msg.id`, and returns the new id.
    fn insert_msg(&mut self, msg: &Msg) -> Result<u32>;
    fn msg_by_id(&self, id: u32) -> Option<Msg>;
    fn msg_by_rfc724_mid(&self, rfc724_mid: &str) -> Option<Msg>;

    /// If a message with this Message-ID exists, returns its
    /// `(server_folder, server_uid)`.
    fn rfc724_mid_exists(&self, rfc724_mid: &str) -> Option<(String, u32)>;
    fn update_server_uid(
        &mut self,
        rfc724_mid: &str,
        server_folder: &str,
        server_uid: u32,
    ) -> Result<()>;

    /// True iff the Message-ID belongs to a message in a real chat or
    /// sent by ourselves; used for reply detection.
    fn is_known_rfc724_mid(&self, rfc724_mid: &str) -> bool;

    /// The newest timestamp `>= min` of a message in `chat_id` from
    /// anyone but `from_id`.
    fn last_timestamp_from_others(
        &self,
        chat_id: u32,
        from_id: u32,
        min: i64,
    ) -> Option<i64>;

    fn set_msg_state(&mut self, msg_id: u32, state: MsgState) -> Result<()>;

    // -- keys ------------------------------------------------------------

    fn save_self_keypair(
        &mut self,
        addr: &str,
        public: &[u8],
        private: &[u8],
    ) -> Result<()>;
    fn self_keypair(&self, addr: &str) -> Option<(Vec<u8>, Vec<u8>)>;

    fn save_peer_key(
        &mut self,
        addr: &str,
        key: &[u8],
        prefer_encrypt: EncryptPreference,
    ) -> Result<()>;
    fn peer_key(&self, addr: &str) -> Option<Vec<u8>>;

    // -- counters & maintenance -----------------------------------------

    fn contact_count(&self) -> usize;
    fn chat_count(&self) -> usize;
    fn msg_count(&self) -> usize;
    fn deaddrop_msg_count(&self) -> usize;
    fn keypair_count(&self) -> usize;
    fn peer_key_count(&self) -> usize;

    /// Clears tables according to the `RESET_*` bits.
    fn reset_tables(&mut self, bits: u32) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
struct State {
    config: HashMap<String, String>,
    contacts: BTreeMap<u32, Contact>,
    chats: BTreeMap<u32, Chat>,
    chat_contacts: BTreeSet<(u32, u32)>,
    single_chats: HashMap<u32, u32>,
    left_groups: BTreeSet<String>,
    msgs: BTreeMap<u32, Msg>,
    keypairs: HashMap<String, (Vec<u8>, Vec<u8>)>,
    peer_keys: HashMap<String, (Vec<u8>, EncryptPreference)>,
    next_contact_id: u32,
    next_chat_id: u32,
    next_msg_id: u32,
}

impl State {
    fn new() -> Self {
        State {
            next_contact_id: CONTACT_ID_LAST_SPECIAL + 1,
            next_chat_id: CHAT_ID_LAST_SPECIAL + 1,
            next_msg_id: MSG_ID_LAST_SPECIAL + 1,
            ..Default::default()
        }
    }
}

/// An in-memory [`Store`] with snapshot-based transactions.
#[derive(Debug)]
pub struct MemoryStore {
    state: State,
    snapshot: Option<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore { state: State::new(), snapshot: None }
    }
}

impl Store for MemoryStore {
    fn begin_transaction(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::Store("transaction already open".into()).into());
        }
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.snapshot.take().is_none() {
            return Err(Error::Store("no open transaction".into()).into());
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        match self.snapshot.take() {
            Some(snapshot) => {
                self.state = snapshot;
                Ok(())
            }
            None => Err(Error::Store("no open transaction".into()).into()),
        }
    }

    fn get_config(&self, key: &str) -> Option<String> {
        self.state.config.get(key).cloned()
    }

    fn set_config(&mut self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => {
                self.state.config.insert(key.to_string(), value.to_string());
            }
            None => {
                self.state.config.remove(key);
            }
        }
        Ok(())
    }

    fn contact_by_id(&self, id: u32) -> Option<Contact> {
        self.state.contacts.get(&id).cloned()
    }

    fn contact_id_by_addr(&self, addr: &str) -> Option<u32> {
        self.state
            .contacts
            .values()
            .find(|c| c.addr == addr)
            .map(|c| c.id)
    }

    fn upsert_contact(
        &mut self,
        addr: &str,
        name: Option<&str>,
        origin: Origin,
    ) -> Result<u32> {
        if addr.is_empty() {
            return Err(Error::Store("contact without address".into()).into());
        }

        if let Some(existing) =
            self.state.contacts.values_mut().find(|c| c.addr == addr)
        {
            if origin > existing.origin {
                existing.origin = origin;
            }
            if let Some(name) = name {
                if origin >= existing.origin {
                    existing.name = Some(name.to_string());
                }
            }
            return Ok(existing.id);
        }

        let id = self.state.next_contact_id;
        self.state.next_contact_id += 1;
        self.state.contacts.insert(
            id,
            Contact {
                id,
                addr: addr.to_string(),
                name: name.map(|n| n.to_string()),
                origin,
                ..Default::default()
            },
        );
        Ok(id)
    }

    fn scaleup_contact_origin(&mut self, id: u32, origin: Origin) -> Result<()> {
        if let Some(contact) = self.state.contacts.get_mut(&id) {
            if origin > contact.origin {
                contact.origin = origin;
            }
        }
        Ok(())
    }

    fn is_contact_blocked(&self, id: u32) -> bool {
        self.state
            .contacts
            .get(&id)
            .map(|c| c.blocked)
            .unwrap_or(false)
    }

    fn set_contact_blocked(&mut self, id: u32, blocked: bool) -> Result<()> {
        if let Some(contact) = self.state.contacts.get_mut(&id) {
            contact.blocked = blocked;
        }
        Ok(())
    }

    fn chat_by_id(&self, id: u32) -> Option<Chat> {
        self.state.chats.get(&id).cloned()
    }

    fn chat_id_by_grpid(&self, grpid: &str) -> Option<u32> {
        self.state
            .chats
            .values()
            .find(|c| c.grpid.as_deref() == Some(grpid))
            .map(|c| c.id)
    }

    fn create_group_chat(&mut self, name: &str, grpid: &str) -> Result<u32> {
        let id = self.state.next_chat_id;
        self.state.next_chat_id += 1;
        self.state.chats.insert(
            id,
            Chat {
                id,
                kind: ChatKind::Group,
                name: name.to_string(),
                grpid: Some(grpid.to_string()),
            },
        );
        Ok(id)
    }

    fn set_chat_name(&mut self, chat_id: u32, name: &str) -> Result<()> {
        match self.state.chats.get_mut(&chat_id) {
            Some(chat) => {
                chat.name = name.to_string();
                Ok(())
            }
            None => Err(Error::Store("no such chat".into()).into()),
        }
    }

    fn single_chat_by_contact(&self, contact_id: u32) -> Option<u32> {
        self.state.single_chats.get(&contact_id).copied()
    }

    fn create_single_chat(&mut self, contact_id: u32) -> Result<u32> {
        if let Some(id) = self.state.single_chats.get(&contact_id) {
            return Ok(*id);
        }
        let name = self
            .contact_by_id(contact_id)
            .map(|c| c.name.unwrap_or(c.addr))
            .unwrap_or_default();

        let id = self.state.next_chat_id;
        self.state.next_chat_id += 1;
        self.state.chats.insert(
            id,
            Chat { id, kind: ChatKind::Single, name, grpid: None },
        );
        self.state.single_chats.insert(contact_id, id);
        self.state.chat_contacts.insert((id, CONTACT_ID_SELF));
        self.state.chat_contacts.insert((id, contact_id));
        Ok(id)
    }

    fn add_chat_contact(&mut self, chat_id: u32, contact_id: u32) -> Result<()> {
        self.state.chat_contacts.insert((chat_id, contact_id));
        Ok(())
    }

    fn remove_all_chat_contacts(&mut self, chat_id: u32) -> Result<()> {
        self.state.chat_contacts.retain(|(c, _)| *c != chat_id);
        Ok(())
    }

    fn is_contact_in_chat(&self, chat_id: u32, contact_id: u32) -> bool {
        self.state.chat_contacts.contains(&(chat_id, contact_id))
    }

    fn chat_contact_count(&self, chat_id: u32) -> usize {
        self.state
            .chat_contacts
            .iter()
            .filter(|(c, _)| *c == chat_id)
            .count()
    }

    fn is_group_left(&self, grpid: &str) -> bool {
        self.state.left_groups.contains(grpid)
    }

    fn mark_group_left(&mut self, grpid: &str) -> Result<()> {
        self.state.left_groups.insert(grpid.to_string());
        Ok(())
    }

    fn unmark_group_left(&mut self, grpid: &str) -> Result<()> {
        self.state.left_groups.remove(grpid);
        Ok(())
    }

    fn insert_msg(&mut self, msg: &Msg) -> Result<u32> {
        let id = self.state.next_msg_id;
        self.state.next_msg_id += 1;
        let mut msg = msg.clone();
        msg.id = id;
        self.state.msgs.insert(id, msg);
        Ok(id)
    }

    fn msg_by_id(&self, id: u32) -> Option<Msg> {
        self.state.msgs.get(&id).cloned()
    }

    fn msg_by_rfc724_mid(&self, rfc724_mid: &str) -> Option<Msg> {
        self.state
            .msgs
            .values()
            .find(|m| m.rfc724_mid == rfc724_mid)
            .cloned()
    }

    fn rfc724_mid_exists(&self, rfc724_mid: &str) -> Option<(String, u32)> {
        self.state
            .msgs
            .values()
            .find(|m| m.rfc724_mid == rfc724_mid)
            .map(|m| (m.server_folder.clone(), m.server_uid))
    }

    fn update_server_uid(
        &mut self,
        rfc724_mid: &str,
        server_folder: &str,
        server_uid: u32,
    ) -> Result<()> {
        for msg in self.state.msgs.values_mut() {
            if msg.rfc724_mid == rfc724_mid {
                msg.server_folder = server_folder.to_string();
                msg.server_uid = server_uid;
            }
        }
        Ok(())
    }

    fn is_known_rfc724_mid(&self, rfc724_mid: &str) -> bool {
        self.state.msgs.values().any(|m| {
            m.rfc724_mid == rfc724_mid
                && (m.chat_id > CHAT_ID_LAST_SPECIAL
                    || m.from_id == CONTACT_ID_SELF)
        })
    }

    fn last_timestamp_from_others(
        &self,
        chat_id: u32,
        from_id: u32,
        min: i64,
    ) -> Option<i64> {
        self.state
            .msgs
            .values()
            .filter(|m| {
                m.chat_id == chat_id
                    && m.from_id != from_id
                    && m.timestamp >= min
            })
            .map(|m| m.timestamp)
            .max()
    }

    fn set_msg_state(&mut self, msg_id: u32, state: MsgState) -> Result<()> {
        match self.state.msgs.get_mut(&msg_id) {
            Some(msg) => {
                msg.state = state;
                Ok(())
            }
            None => Err(Error::Store("no such message".into()).into()),
        }
    }

    fn save_self_keypair(
        &mut self,
        addr: &str,
        public: &[u8],
        private: &[u8],
    ) -> Result<()> {
        self.state
            .keypairs
            .insert(addr.to_string(), (public.to_vec(), private.to_vec()));
        Ok(())
    }

    fn self_keypair(&self, addr: &str) -> Option<(Vec<u8>, Vec<u8>)> {
        self.state.keypairs.get(addr).cloned()
    }

    fn save_peer_key(
        &mut self,
        addr: &str,
        key: &[u8],
        prefer_encrypt: EncryptPreference,
    ) -> Result<()> {
        self.state
            .peer_keys
            .insert(addr.to_string(), (key.to_vec(), prefer_encrypt));
        Ok(())
    }

    fn peer_key(&self, addr: &str) -> Option<Vec<u8>> {
        self.state.peer_keys.get(addr).map(|(key, _)| key.clone())
    }

    fn contact_count(&self) -> usize {
        self.state.contacts.len()
    }

    fn chat_count(&self) -> usize {
        self.state.chats.len()
    }

    fn msg_count(&self) -> usize {
        self.state
            .msgs
            .values()
            .filter(|m| m.chat_id > CHAT_ID_LAST_SPECIAL)
            .count()
    }

    fn deaddrop_msg_count(&self) -> usize {
        self.state
            .msgs
            .values()
            .filter(|m| m.chat_id == CHAT_ID_DEADDROP)
            .count()
    }

    fn keypair_count(&self) -> usize {
        self.state.keypairs.len()
    }

    fn peer_key_count(&self) -> usize {
        self.state.peer_keys.len()
    }

    fn reset_tables(&mut self, bits: u32) -> Result<()> {
        if bits & RESET_KEYS != 0 {
            self.state.keypairs.clear();
            self.state.peer_keys.clear();
        }
        if bits & RESET_CHATS != 0 {
            self.state.contacts.clear();
            self.state.chats.clear();
            self.state.chat_contacts.clear();
            self.state.single_chats.clear();
            self.state.msgs.clear();
            self.state.left_groups.clear();
        }
        Ok(())
    }
}
