//! Group chat resolution.
//!
//! Group membership travels in the mails themselves: an opaque group id
//! in explicit headers or embedded in Message-IDs of the form
//! `Gr.<grpid>.<random>@<host>`, plus commands for adding and removing
//! members and renaming the group.  This module finds the group a
//! message belongs to, creates it if appropriate, and replays the
//! commands against the store.

use crate::chat::CHAT_ID_LAST_SPECIAL;
use crate::contact::{addr_cmp, contact_addr_equals, CONTACT_ID_LAST_SPECIAL, CONTACT_ID_SELF};
use crate::event::{Event, Events};
use crate::mime::MimeMessage;
use crate::store::Store;
use crate::Result;

/// Length of a valid group id.
pub(crate) const VALID_ID_LEN: usize = 8;

/// Longest accepted group name, in bytes.
const MAX_GROUP_NAME_LEN: usize = 200;

/// Where the group resolver puts a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GroupAssignment {
    /// Not a group message; fall back to 1:1 resolution.
    None,
    /// Belongs to this group chat.
    Chat(u32),
    /// Message for a group the user has left; hide it.
    Trash,
}

fn is_valid_grpid(grpid: &str) -> bool {
    grpid.len() == VALID_ID_LEN
        && grpid
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Extracts a group id from a Message-ID like
/// `Gr.12345678.morerandom@domain`.
pub(crate) fn extract_grpid_from_message_id(mid: &str) -> Option<&str> {
    let rest = mid.strip_prefix("Gr.")?;
    let grpid = rest.split('.').next()?;
    if is_valid_grpid(grpid) {
        Some(grpid)
    } else {
        None
    }
}

fn first_grpid_from_list(mids: &[String]) -> Option<String> {
    mids.iter()
        .filter_map(|mid| extract_grpid_from_message_id(mid))
        .next()
        .map(|g| g.to_string())
}

fn grpid_of(mime: &MimeMessage) -> Option<String> {
    if let Some(grpid) = mime
        .chat_header("chat-group-id", "x-mrgrpid")
        .filter(|g| is_valid_grpid(g))
    {
        return Some(grpid.to_string());
    }
    if let Some(grpid) = mime
        .message_id()
        .as_deref()
        .and_then(extract_grpid_from_message_id)
    {
        return Some(grpid.to_string());
    }
    first_grpid_from_list(&mime.in_reply_to())
        .or_else(|| first_grpid_from_list(&mime.references()))
}

/// Resolves the group chat a message belongs to, creating the chat and
/// replaying membership commands as needed.
///
/// `create_as_needed` is false for incoming mail from unknown senders or
/// plain mail clients; such mail never creates groups.
pub(crate) fn lookup_group(
    store: &mut dyn Store,
    events: &Events,
    self_addr: &str,
    mime: &MimeMessage,
    create_as_needed: bool,
    from_id: u32,
    to_ids: &[u32],
) -> Result<GroupAssignment> {
    let grpid = match grpid_of(mime) {
        Some(grpid) => grpid,
        None => return Ok(GroupAssignment::None),
    };

    let grpname = mime.chat_header("chat-group-name", "x-mrgrpname");
    let member_removed =
        mime.chat_header("chat-group-member-removed", "x-mrremovefromgrp");
    let member_added =
        mime.chat_header("chat-group-member-added", "x-mraddtogrp");
    let name_changed = mime
        .chat_header("chat-group-name-changed", "x-mrgrpnamechanged")
        .is_some();

    let re_adds_self = member_added
        .map(|addr| addr_cmp(addr, self_addr))
        .unwrap_or(false);

    // Messages for an explicitly left group are hidden until we are
    // explicitly added back.
    if store.is_group_left(&grpid) && !re_adds_self {
        return Ok(GroupAssignment::Trash);
    }

    let mut chat_id = store.chat_id_by_grpid(&grpid);

    // If the sender is not a member of the existing group, the message
    // does not go to the group chat but to the normal chat with the
    // sender.
    if let Some(id) = chat_id {
        if from_id > CONTACT_ID_LAST_SPECIAL && !store.is_contact_in_chat(id, from_id) {
            return Ok(GroupAssignment::None);
        }
    }

    let mut recreate_member_list = false;
    if chat_id.is_none() {
        // A pending "quit" message must not re-create the group.
        if create_as_needed && grpname.is_some() && member_removed.is_none() {
            let id = store.create_group_chat(grpname.unwrap_or_default(), &grpid)?;
            chat_id = Some(id);
            recreate_member_list = true;
        } else {
            return Ok(GroupAssignment::None);
        }
    }
    let chat_id = chat_id.filter(|id| *id > CHAT_ID_LAST_SPECIAL);
    let chat_id = match chat_id {
        Some(id) => id,
        None => return Ok(GroupAssignment::None),
    };

    // Execute group commands, mutually exclusive.
    if member_added.is_some() || member_removed.is_some() {
        recreate_member_list = true;
    } else if name_changed {
        if let Some(name) = grpname.filter(|n| n.len() < MAX_GROUP_NAME_LEN) {
            store.set_chat_name(chat_id, name)?;
            events.queue(Event::ChatModified { chat_id });
        }
    }

    if recreate_member_list {
        let skip = member_removed;

        store.remove_all_chat_contacts(chat_id)?;
        if skip.map(|s| addr_cmp(s, self_addr)) != Some(true) {
            store.add_chat_contact(chat_id, CONTACT_ID_SELF)?;
        }
        if from_id > CONTACT_ID_LAST_SPECIAL
            && !contact_addr_equals(store, from_id, self_addr)
            && skip.map(|s| contact_addr_equals(store, from_id, s)) != Some(true)
        {
            store.add_chat_contact(chat_id, from_id)?;
        }
        for &to_id in to_ids {
            if !contact_addr_equals(store, to_id, self_addr)
                && skip.map(|s| contact_addr_equals(store, to_id, s)) != Some(true)
            {
                store.add_chat_contact(chat_id, to_id)?;
            }
        }

        if let Some(removed) = member_removed {
            if addr_cmp(removed, self_addr) {
                store.mark_group_left(&grpid)?;
            }
        }
        if re_adds_self {
            store.unmark_group_left(&grpid)?;
        }

        events.queue(Event::ChatModified { chat_id });
    }

    // If the user hits "Reply" instead of "Reply all" in a non-messenger
    // client, the mail is addressed to a single To: recipient although
    // the group is larger; do not pollute the group chat then.  Groups
    // of up to 3 cannot tell a private reply from a group mail, so they
    // are left alone.
    if mime.to_addrs().len() == 1 && !mime.is_send_by_messenger {
        if store.chat_contact_count(chat_id) > 3 {
            return Ok(GroupAssignment::None);
        }
    }

    Ok(GroupAssignment::Chat(chat_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpid_extraction() {
        assert_eq!(
            extract_grpid_from_message_id("Gr.12345678.morerandom@domain.de"),
            Some("12345678")
        );
        assert_eq!(
            extract_grpid_from_message_id("Gr.abcd_12-.x@y"),
            Some("abcd_12-")
        );
        // Wrong length, missing prefix, bad characters.
        assert_eq!(extract_grpid_from_message_id("Gr.1234.x@y"), None);
        assert_eq!(extract_grpid_from_message_id("Mr.12345678.x@y"), None);
        assert_eq!(extract_grpid_from_message_id("Gr.1234567!.x@y"), None);
        assert_eq!(extract_grpid_from_message_id(""), None);
    }

    #[test]
    fn grpid_header_has_priority_over_message_id() {
        let mime = MimeMessage::parse(
            b"From: bob@example.org\n\
              Chat-Group-ID: aaaaaaaa\n\
              Message-ID: <Gr.bbbbbbbb.x@example.org>\n\
              In-Reply-To: <Gr.cccccccc.x@example.org>\n\
              \n\
              m\n",
        )
        .unwrap();
        assert_eq!(grpid_of(&mime).as_deref(), Some("aaaaaaaa"));

        let mime = MimeMessage::parse(
            b"From: bob@example.org\n\
              Message-ID: <Gr.bbbbbbbb.x@example.org>\n\
              References: <Gr.cccccccc.x@example.org>\n\
              \n\
              m\n",
        )
        .unwrap();
        assert_eq!(grpid_of(&mime).as_deref(), Some("bbbbbbbb"));

        let mime = MimeMessage::parse(
            b"From: bob@example.org\n\
              Message-ID: <plain@example.org>\n\
              References: <x@y> <Gr.cccccccc.x@example.org>\n\
              \n\
              m\n",
        )
        .unwrap();
        assert_eq!(grpid_of(&mime).as_deref(), Some("cccccccc"));
    }
}
