//! The mail-ingest pipeline.
//!
//! One call per message fetched from the server.  Within one message all
//! store writes happen in a single transaction; events are queued and
//! fire only after the commit.  Failures roll the transaction back, log
//! a warning and surface as a boolean to the transport.

use log::info;

use brieftaube_pgp::Engine;

use crate::chat::{CHAT_ID_DEADDROP, CHAT_ID_TO_DEADDROP, CHAT_ID_TRASH};
use crate::config;
use crate::contact::{self, Origin, CONTACT_ID_SELF};
use crate::e2ee;
use crate::event::{Event, Events};
use crate::group::{self, GroupAssignment};
use crate::mdn;
use crate::message::{summary_text, Msg, MsgState, MsgType};
use crate::mime::MimeMessage;
use crate::param::{Param, Params};
use crate::store::Store;
use crate::util::{self, SmearedClock};
use crate::{Result, IMAP_SEEN};

/// Character budget of the one-line summary used for ghost messages.
const APPROX_SUBJECT_CHARS: usize = 32;

/// How one ingested message left the store.
pub(crate) enum IngestOutcome {
    /// Rows were written; the caller must commit and fire the events.
    Inserted,
    /// The message was already known; the transaction has been rolled
    /// back (after updating the server location if it changed) and no
    /// events fire.
    Duplicate,
}

fn config_int(store: &dyn Store, key: &str, default: i32) -> i32 {
    store
        .get_config(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Checks whether the message replies to a message we know, via
/// `Chat-Predecessor:` (messenger clients) or `In-Reply-To:` /
/// `References:` (plain clients).
fn is_reply_to_known_message(store: &dyn Store, mime: &MimeMessage) -> bool {
    if let Some(predecessor) =
        mime.chat_header("chat-predecessor", "x-mrpredecessor")
    {
        let mid = predecessor.trim().trim_matches(|c| c == '<' || c == '>');
        if store.is_known_rfc724_mid(mid) {
            return true;
        }
    }
    mime.in_reply_to()
        .iter()
        .chain(mime.references().iter())
        .any(|mid| store.is_known_rfc724_mid(mid))
}

/// Uses the last message from another sender as the minimum (fresh
/// messages only; restored or synchronized mail may pop up anywhere) and
/// the smeared current time as the maximum.
fn correct_bad_timestamp(
    store: &dyn Store,
    clock: &SmearedClock,
    chat_id: u32,
    from_id: u32,
    desired: i64,
    is_fresh: bool,
) -> i64 {
    let mut desired = desired;
    if is_fresh {
        if let Some(last) =
            store.last_timestamp_from_others(chat_id, from_id, desired)
        {
            if desired <= last {
                // Several messages may end up one second after the last
                // other message; ordering by id as the second criterion
                // keeps them stable.
                desired = last + 1;
            }
        }
    }
    if desired >= clock.smeared_now() {
        desired = clock.create();
    }
    desired
}

/// Classifies and stores one raw RFC 5322 message.
///
/// The caller owns the store lock and the transaction: it must have
/// called `begin_transaction` and commits on `Ok(Inserted)`.
pub(crate) fn receive_imf(
    store: &mut dyn Store,
    events: &Events,
    clock: &SmearedClock,
    engine: &dyn Engine,
    raw: &[u8],
    server_folder: &str,
    server_uid: u32,
    flags: u32,
) -> Result<IngestOutcome> {
    let mut mime = MimeMessage::parse(raw)?;

    // Messages sent by us are used to validate other senders and
    // receivers, so direction detection matters.  We assume the
    // Return-Path: header is never present on mail we sent; From: alone
    // is no good as mailboxes may use several addresses over the years.
    let mut incoming = mime.has_return_path();
    let seen = flags & IMAP_SEEN != 0;

    let self_addr = store
        .get_config(config::CONFIGURED_ADDR)
        .unwrap_or_default();

    let mut from_id = 0u32;
    let mut from_id_blocked = false;
    let mut incoming_from_known_sender = false;
    let from_addrs = mime.from_addrs();
    let from_addr = from_addrs
        .first()
        .map(|a| a.addr.clone())
        .unwrap_or_default();

    if incoming {
        let resolved = contact::add_or_lookup_contacts(
            store,
            &self_addr,
            &from_addrs,
            Origin::IncomingUnknownFrom,
        )?;
        if resolved.contains_self {
            // Outgoing messages we also receive carry a Return-Path:
            // although we are the sender; From: corrects these cases.
            incoming = false;
        } else if let Some(&id) = resolved.ids.first() {
            // With no From: at all, from_id stays 0; such messages still
            // get a deaddrop row to prevent a re-download.
            from_id = id;
            from_id_blocked = store.is_contact_blocked(id);
            let origin = store
                .contact_by_id(id)
                .map(|c| c.origin)
                .unwrap_or_default();
            incoming_from_known_sender = !from_id_blocked && origin.is_known();
        }
    }
    let outgoing = !incoming;

    if incoming && from_id > 0 {
        e2ee::save_autocrypt_header(store, &mime, &from_addr);
    }
    if mime.encrypted_payload.is_some() {
        // Decrypt before classification; group headers may be protected.
        e2ee::try_decrypt(engine, store, &mut mime, &from_addr);
    }

    // to_ids starts with the first To: address; Cc: and Bcc: follow.
    let mut to_ids: Vec<u32> = Vec::new();
    if outgoing || incoming_from_known_sender {
        let resolved = contact::add_or_lookup_contacts(
            store,
            &self_addr,
            &mime.to_addrs(),
            if outgoing { Origin::OutgoingTo } else { Origin::IncomingTo },
        )?;
        to_ids.extend(resolved.ids);
    }
    let resolved = contact::add_or_lookup_contacts(
        store,
        &self_addr,
        &mime.cc_addrs(),
        if outgoing { Origin::OutgoingCc } else { Origin::IncomingCc },
    )?;
    for id in resolved.ids {
        if !to_ids.contains(&id) {
            to_ids.push(id);
        }
    }
    if outgoing {
        let resolved = contact::add_or_lookup_contacts(
            store,
            &self_addr,
            &mime.bcc_addrs(),
            Origin::OutgoingBcc,
        )?;
        for id in resolved.ids {
            if !to_ids.contains(&id) {
                to_ids.push(id);
            }
        }
    }

    let mut created: Vec<(u32, u32)> = Vec::new();
    let mut fire_incoming_event = false;
    let mut suppress_events = false;

    if !mime.parts.is_empty() {
        let mut chat_id = 0u32;
        let mut is_group = false;
        let state;
        let to_id;

        if incoming {
            state = if seen { MsgState::InSeen } else { MsgState::InFresh };
            to_id = CONTACT_ID_SELF;

            match group::lookup_group(
                store,
                events,
                &self_addr,
                &mime,
                incoming_from_known_sender && mime.is_send_by_messenger,
                from_id,
                &to_ids,
            )? {
                GroupAssignment::Chat(id) => {
                    chat_id = id;
                    is_group = true;
                }
                GroupAssignment::Trash => chat_id = CHAT_ID_TRASH,
                GroupAssignment::None => (),
            }

            if chat_id == 0 {
                if let Some(id) = store.single_chat_by_contact(from_id) {
                    chat_id = id;
                } else if from_id > 0
                    && incoming_from_known_sender
                    && mime.is_send_by_messenger
                {
                    chat_id = store.create_single_chat(from_id)?;
                } else if from_id > 0 && is_reply_to_known_message(store, &mime)
                {
                    store.scaleup_contact_origin(
                        from_id,
                        Origin::IncomingReplyTo,
                    )?;
                    chat_id = store.create_single_chat(from_id)?;
                }
                if chat_id == 0 {
                    chat_id = CHAT_ID_DEADDROP;
                }
            }
        } else {
            // The mail is on the server, so it is probably delivered;
            // other states (read, error) cannot be recreated.
            state = MsgState::OutDelivered;
            from_id = CONTACT_ID_SELF;
            to_id = to_ids.first().copied().unwrap_or(0);

            if to_id > 0 {
                match group::lookup_group(
                    store,
                    events,
                    &self_addr,
                    &mime,
                    true,
                    CONTACT_ID_SELF,
                    &to_ids,
                )? {
                    GroupAssignment::Chat(id) => {
                        chat_id = id;
                        is_group = true;
                    }
                    GroupAssignment::Trash => chat_id = CHAT_ID_TRASH,
                    GroupAssignment::None => (),
                }
                if chat_id == 0 {
                    if let Some(id) = store.single_chat_by_contact(to_id) {
                        chat_id = id;
                    } else if mime.is_send_by_messenger
                        && !store.is_contact_blocked(to_id)
                    {
                        chat_id = store.create_single_chat(to_id)?;
                    }
                }
            }
            if chat_id == 0 {
                chat_id = CHAT_ID_TO_DEADDROP;
            }
        }

        let timestamp = correct_bad_timestamp(
            store,
            clock,
            chat_id,
            from_id,
            mime.timestamp().unwrap_or(0),
            !seen,
        );

        // Mails without a Message-ID exist (e.g. when the SMTP server
        // assigns one after the fact); synthesize a stable one.
        let rfc724_mid = match mime.message_id() {
            Some(mid) => mid,
            None => util::create_incoming_rfc724_mid(timestamp, from_id, &to_ids),
        };

        // We may get a mail twice, e.g. when it is moved between
        // folders; then only track the new location.
        if let Some((old_folder, old_uid)) =
            store.rfc724_mid_exists(&rfc724_mid)
        {
            store.rollback()?;
            if old_folder != server_folder || old_uid != server_uid {
                store.update_server_uid(&rfc724_mid, server_folder, server_uid)?;
            }
            info!("Message {} already in database.", rfc724_mid);
            return Ok(IngestOutcome::Duplicate);
        }

        // One row per part; messenger clients produce exactly one part,
        // plain clients may produce several (e.g. one per attachment).
        let wants_mdn = incoming && mime.wants_mdn();
        let mut first_msg_id = 0u32;
        for part in &mime.parts {
            let mut param = part.param.clone();
            if wants_mdn {
                param.set(Param::WantsMdn, 1);
            }
            let text_raw = if part.kind == MsgType::Text {
                format!(
                    "{}\n\n{}",
                    mime.subject.as_deref().unwrap_or(""),
                    part.text
                )
            } else {
                String::new()
            };

            let msg_id = store.insert_msg(&Msg {
                id: 0,
                rfc724_mid: rfc724_mid.clone(),
                server_folder: server_folder.to_string(),
                server_uid,
                chat_id,
                from_id,
                to_id,
                timestamp,
                kind: part.kind,
                state,
                is_msgr: mime.is_send_by_messenger,
                text: part.text.clone(),
                text_raw,
                param,
                bytes: part.bytes,
            })?;
            if first_msg_id == 0 {
                first_msg_id = msg_id;
            }
            created.push((chat_id, msg_id));
        }

        // Ghost messages keep plain mail clients usable: each further
        // recipient of a non-group mail gets a copy in their 1:1 chat.
        if outgoing && !is_group && to_ids.len() > 1 && first_msg_id != 0 {
            let summary = summary_text(
                mime.parts[0].kind,
                &mime.parts[0].text,
                APPROX_SUBJECT_CHARS,
            );
            for &ghost_to_id in &to_ids[1..] {
                let ghost_chat_id = store
                    .single_chat_by_contact(ghost_to_id)
                    .unwrap_or(CHAT_ID_TO_DEADDROP);
                let mut ghost_param = Params::new();
                ghost_param.set(Param::GhostId, first_msg_id);

                let ghost_id = store.insert_msg(&Msg {
                    id: 0,
                    rfc724_mid: util::create_ghost_rfc724_mid(
                        first_msg_id,
                        ghost_to_id,
                    ),
                    server_folder: String::new(),
                    server_uid: 0,
                    chat_id: ghost_chat_id,
                    from_id,
                    to_id: ghost_to_id,
                    timestamp,
                    kind: MsgType::Text,
                    state,
                    is_msgr: mime.is_send_by_messenger,
                    text: summary.clone(),
                    text_raw: String::new(),
                    param: ghost_param,
                    bytes: 0,
                })?;
                created.push((ghost_chat_id, ghost_id));
            }
        }

        if incoming && state == MsgState::InFresh {
            if from_id_blocked {
                suppress_events = true;
            } else if chat_id == CHAT_ID_TRASH {
                // Hidden rows change nothing the user can see.
            } else if chat_id == CHAT_ID_DEADDROP {
                fire_incoming_event =
                    config_int(store, config::SHOW_DEADDROP, 0) != 0;
            } else {
                fire_incoming_event = true;
            }
        }
    }

    if !suppress_events {
        for (chat_id, msg_id) in created {
            events.queue(if fire_incoming_event {
                Event::IncomingMsg { chat_id, msg_id }
            } else {
                Event::MsgsChanged { chat_id, msg_id }
            });
        }
    }

    if !mime.reports.is_empty()
        && config_int(store, config::MDNS_ENABLED, config::MDNS_DEFAULT_ENABLED)
            != 0
    {
        for report in &mime.reports {
            mdn::handle_report(store, events, report)?;
        }
    }

    Ok(IngestOutcome::Inserted)
}
