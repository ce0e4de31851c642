//! Ingest pipeline scenarios, driven end-to-end through a memory store.

use std::sync::{Arc, Mutex};

use brieftaube_core::chat::{CHAT_ID_DEADDROP, CHAT_ID_TO_DEADDROP, CHAT_ID_TRASH};
use brieftaube_core::config;
use brieftaube_core::contact::CONTACT_ID_SELF;
use brieftaube_core::{
    Event, Mailbox, MemoryStore, MsgState, Origin, Param, Store,
};

const SELF_ADDR: &str = "self@example.org";

fn new_mailbox() -> (Mailbox<MemoryStore>, Arc<Mutex<Vec<Event>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mailbox = Mailbox::new(MemoryStore::new(), move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    mailbox.set_config(config::CONFIGURED_ADDR, Some(SELF_ADDR));
    mailbox.set_config_int(config::CONFIGURED, 1);
    (mailbox, events)
}

fn make_known(mailbox: &Mailbox<MemoryStore>, addr: &str) -> u32 {
    mailbox.with_store(|store| {
        store.upsert_contact(addr, None, Origin::OutgoingTo).unwrap()
    })
}

fn group_mail(mid_random: &str, extra_headers: &str, body: &str) -> Vec<u8> {
    format!(
        "Return-Path: <bob@example.org>\n\
         From: bob@example.org\n\
         To: {}, carol@example.org\n\
         Chat-Version: 1.0\n\
         Chat-Group-ID: abcd1234\n\
         Chat-Group-Name: Team\n\
         Message-ID: <Gr.abcd1234.{}@example.org>\n\
         Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
         {}\
         \n\
         {}\n",
        SELF_ADDR, mid_random, extra_headers, body
    )
    .into_bytes()
}

#[test]
fn group_creation_from_incoming_mail() {
    let (mailbox, events) = new_mailbox();
    let bob = make_known(&mailbox, "bob@example.org");

    assert!(mailbox.receive_imf(&group_mail("0001", "", "hello group"), "INBOX", 1, 0));

    let chat_id = mailbox.with_store(|store| {
        let chat_id = store.chat_id_by_grpid("abcd1234").expect("group not created");
        let chat = store.chat_by_id(chat_id).unwrap();
        assert_eq!(chat.name, "Team");

        let carol = store.contact_id_by_addr("carol@example.org").unwrap();
        assert!(store.is_contact_in_chat(chat_id, CONTACT_ID_SELF));
        assert!(store.is_contact_in_chat(chat_id, bob));
        assert!(store.is_contact_in_chat(chat_id, carol));
        assert_eq!(store.chat_contact_count(chat_id), 3);

        let msg = store.msg_by_rfc724_mid("Gr.abcd1234.0001@example.org").unwrap();
        assert_eq!(msg.chat_id, chat_id);
        assert_eq!(msg.from_id, bob);
        assert_eq!(msg.state, MsgState::InFresh);
        assert!(msg.is_msgr);
        chat_id
    });

    let events = events.lock().unwrap();
    assert!(events.contains(&Event::ChatModified { chat_id }));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::IncomingMsg { chat_id: c, .. } if *c == chat_id)));
}

#[test]
fn duplicate_only_updates_the_server_location() {
    let (mailbox, events) = new_mailbox();
    make_known(&mailbox, "bob@example.org");

    let raw = b"Return-Path: <bob@example.org>\n\
        From: bob@example.org\n\
        To: self@example.org\n\
        Chat-Version: 1.0\n\
        Message-ID: <Mr.dup@example.org>\n\
        Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
        \n\
        hi\n";

    assert!(mailbox.receive_imf(raw, "INBOX", 7, 0));
    let events_after_first = events.lock().unwrap().len();

    // Same bytes again, moved to another folder.
    assert!(mailbox.receive_imf(raw, "Archive", 13, 0));

    mailbox.with_store(|store| {
        assert_eq!(
            store.rfc724_mid_exists("Mr.dup@example.org"),
            Some(("Archive".to_string(), 13))
        );
        // No new row: exactly one message with this id, and the chat
        // only contains the one message.
        assert_eq!(store.msg_count(), 1);
    });
    assert_eq!(events.lock().unwrap().len(), events_after_first, "no event on dedup");
}

#[test]
fn group_leave_and_rejoin() {
    let (mailbox, _events) = new_mailbox();
    make_known(&mailbox, "bob@example.org");

    assert!(mailbox.receive_imf(&group_mail("0001", "", "hello"), "INBOX", 1, 0));
    let chat_id =
        mailbox.with_store(|store| store.chat_id_by_grpid("abcd1234").unwrap());

    // Bob removes us from the group.
    let removal = group_mail(
        "0002",
        &format!("Chat-Group-Member-Removed: {}\n", SELF_ADDR),
        "you are out",
    );
    assert!(mailbox.receive_imf(&removal, "INBOX", 2, 0));
    mailbox.with_store(|store| {
        assert!(store.is_group_left("abcd1234"));
        assert!(!store.is_contact_in_chat(chat_id, CONTACT_ID_SELF));
        // The removal message itself is still delivered to the group.
        let msg = store.msg_by_rfc724_mid("Gr.abcd1234.0002@example.org").unwrap();
        assert_eq!(msg.chat_id, chat_id);
    });

    // Further group messages are hidden.
    assert!(mailbox.receive_imf(&group_mail("0003", "", "behind your back"), "INBOX", 3, 0));
    mailbox.with_store(|store| {
        let msg = store.msg_by_rfc724_mid("Gr.abcd1234.0003@example.org").unwrap();
        assert_eq!(msg.chat_id, CHAT_ID_TRASH);
    });

    // Until bob explicitly adds us back.
    let re_add = group_mail(
        "0004",
        &format!("Chat-Group-Member-Added: {}\n", SELF_ADDR),
        "welcome back",
    );
    assert!(mailbox.receive_imf(&re_add, "INBOX", 4, 0));
    mailbox.with_store(|store| {
        assert!(!store.is_group_left("abcd1234"));
        assert!(store.is_contact_in_chat(chat_id, CONTACT_ID_SELF));
        let msg = store.msg_by_rfc724_mid("Gr.abcd1234.0004@example.org").unwrap();
        assert_eq!(msg.chat_id, chat_id);
    });
}

#[test]
fn group_rename() {
    let (mailbox, events) = new_mailbox();
    make_known(&mailbox, "bob@example.org");

    assert!(mailbox.receive_imf(&group_mail("0001", "", "hello"), "INBOX", 1, 0));
    let chat_id =
        mailbox.with_store(|store| store.chat_id_by_grpid("abcd1234").unwrap());
    events.lock().unwrap().clear();

    let rename = format!(
        "Return-Path: <bob@example.org>\n\
         From: bob@example.org\n\
         To: {}, carol@example.org\n\
         Chat-Version: 1.0\n\
         Chat-Group-ID: abcd1234\n\
         Chat-Group-Name: The A-Team\n\
         Chat-Group-Name-Changed: 1\n\
         Message-ID: <Gr.abcd1234.0005@example.org>\n\
         Date: Sun, 22 Oct 2017 11:30:00 +0000\n\
         \n\
         renamed\n",
        SELF_ADDR
    );
    assert!(mailbox.receive_imf(rename.as_bytes(), "INBOX", 5, 0));

    mailbox.with_store(|store| {
        assert_eq!(store.chat_by_id(chat_id).unwrap().name, "The A-Team");
    });
    assert!(events
        .lock()
        .unwrap()
        .contains(&Event::ChatModified { chat_id }));
}

#[test]
fn reply_all_leak_is_suppressed() {
    let (mailbox, _events) = new_mailbox();
    make_known(&mailbox, "bob@example.org");

    // A group with four members: self, bob, carol, dave.
    let raw = format!(
        "Return-Path: <bob@example.org>\n\
         From: bob@example.org\n\
         To: {}, carol@example.org, dave@example.org\n\
         Chat-Version: 1.0\n\
         Chat-Group-ID: abcd1234\n\
         Chat-Group-Name: Team\n\
         Message-ID: <Gr.abcd1234.0001@example.org>\n\
         Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
         \n\
         hello\n",
        SELF_ADDR
    );
    assert!(mailbox.receive_imf(raw.as_bytes(), "INBOX", 1, 0));
    let group_chat =
        mailbox.with_store(|store| store.chat_id_by_grpid("abcd1234").unwrap());
    mailbox
        .with_store(|store| assert_eq!(store.chat_contact_count(group_chat), 4));

    // Bob replies from a plain mail client, to us alone ("Reply" instead
    // of "Reply all"): the message must not leak into the group.
    let reply = format!(
        "Return-Path: <bob@example.org>\n\
         From: bob@example.org\n\
         To: {}\n\
         Message-ID: <plain.reply@example.org>\n\
         In-Reply-To: <Gr.abcd1234.0001@example.org>\n\
         Date: Sun, 22 Oct 2017 10:35:00 +0000\n\
         \n\
         just for you\n",
        SELF_ADDR
    );
    assert!(mailbox.receive_imf(reply.as_bytes(), "INBOX", 2, 0));

    mailbox.with_store(|store| {
        let msg = store.msg_by_rfc724_mid("plain.reply@example.org").unwrap();
        assert_ne!(msg.chat_id, group_chat);
        assert!(msg.chat_id > brieftaube_core::chat::CHAT_ID_LAST_SPECIAL);
    });
}

#[test]
fn ghost_messages_for_additional_recipients() {
    let (mailbox, _events) = new_mailbox();

    // An outgoing copy fetched from the sent folder: no Return-Path,
    // From: ourselves, two recipients.
    let raw = format!(
        "From: {}\n\
         To: bob@example.org, carol@example.org\n\
         Chat-Version: 1.0\n\
         Message-ID: <Mr.out@example.org>\n\
         Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
         \n\
         hi folks\n",
        SELF_ADDR
    );
    assert!(mailbox.receive_imf(raw.as_bytes(), "Sent", 17, 0));

    mailbox.with_store(|store| {
        let bob = store.contact_id_by_addr("bob@example.org").unwrap();
        let carol = store.contact_id_by_addr("carol@example.org").unwrap();

        // The original lands in the 1:1 chat with the first recipient.
        let original = store.msg_by_rfc724_mid("Mr.out@example.org").unwrap();
        assert_eq!(original.from_id, CONTACT_ID_SELF);
        assert_eq!(original.to_id, bob);
        assert_eq!(original.state, MsgState::OutDelivered);
        assert_eq!(store.single_chat_by_contact(bob), Some(original.chat_id));

        // Carol gets a ghost row carrying the original's id; without a
        // 1:1 chat it stays in the outgoing deaddrop.
        let ghost = store
            .msg_by_rfc724_mid(&format!("Gh.{}.{}@ghost", original.id, carol))
            .expect("ghost row missing");
        assert_eq!(ghost.chat_id, CHAT_ID_TO_DEADDROP);
        assert_eq!(ghost.to_id, carol);
        assert_eq!(
            ghost.param.get_int(Param::GhostId),
            Some(original.id as i64)
        );
        assert_eq!(ghost.text, "hi folks");
    });
}

#[test]
fn unknown_sender_goes_to_the_deaddrop() {
    let (mailbox, events) = new_mailbox();

    let raw = b"Return-Path: <stranger@example.org>\n\
        From: stranger@example.org\n\
        To: self@example.org\n\
        Message-ID: <stranger.1@example.org>\n\
        Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
        \n\
        you won the lottery\n";
    assert!(mailbox.receive_imf(raw, "INBOX", 1, 0));

    mailbox.with_store(|store| {
        let msg = store.msg_by_rfc724_mid("stranger.1@example.org").unwrap();
        assert_eq!(msg.chat_id, CHAT_ID_DEADDROP);
        assert_eq!(msg.state, MsgState::InFresh);
    });
    // Without show_deaddrop, the deaddrop does not announce incoming
    // messages.
    {
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, Event::MsgsChanged { .. })));
        assert!(!events.iter().any(|e| matches!(e, Event::IncomingMsg { .. })));
    }

    mailbox.set_config_int(config::SHOW_DEADDROP, 1);
    let raw = b"Return-Path: <stranger@example.org>\n\
        From: stranger@example.org\n\
        To: self@example.org\n\
        Message-ID: <stranger.2@example.org>\n\
        Date: Sun, 22 Oct 2017 10:31:00 +0000\n\
        \n\
        second try\n";
    assert!(mailbox.receive_imf(raw, "INBOX", 2, 0));
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, Event::IncomingMsg { chat_id: CHAT_ID_DEADDROP, .. })));
}

#[test]
fn blocked_sender_fires_no_event() {
    let (mailbox, events) = new_mailbox();
    let bob = make_known(&mailbox, "bob@example.org");
    mailbox.with_store(|store| store.set_contact_blocked(bob, true).unwrap());

    let raw = b"Return-Path: <bob@example.org>\n\
        From: bob@example.org\n\
        To: self@example.org\n\
        Chat-Version: 1.0\n\
        Message-ID: <blocked.1@example.org>\n\
        Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
        \n\
        hello?\n";
    assert!(mailbox.receive_imf(raw, "INBOX", 1, 0));

    assert!(events.lock().unwrap().is_empty());
    mailbox.with_store(|store| {
        // The row exists nevertheless, otherwise it would be fetched
        // again and again.
        assert!(store.msg_by_rfc724_mid("blocked.1@example.org").is_some());
    });
}

#[test]
fn read_receipt_marks_the_original_read() {
    let (mailbox, events) = new_mailbox();

    // Our own sent message, fetched back from the server.
    let sent = format!(
        "From: {}\n\
         To: bob@example.org\n\
         Chat-Version: 1.0\n\
         Message-ID: <Mr.sent@example.org>\n\
         Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
         \n\
         please read this\n",
        SELF_ADDR
    );
    assert!(mailbox.receive_imf(sent.as_bytes(), "Sent", 1, 0));
    events.lock().unwrap().clear();

    let mdn = b"Return-Path: <bob@example.org>\n\
        From: bob@example.org\n\
        To: self@example.org\n\
        Message-ID: <mdn.1@example.org>\n\
        Date: Sun, 22 Oct 2017 10:40:00 +0000\n\
        Content-Type: multipart/report; report-type=disposition-notification; boundary=\"b\"\n\
        \n\
        --b\n\
        Content-Type: text/plain\n\
        \n\
        The message was displayed.\n\
        --b\n\
        Content-Type: message/disposition-notification\n\
        \n\
        Reporting-UA: messenger\n\
        Original-Message-ID: <Mr.sent@example.org>\n\
        Disposition: manual-action/MDN-sent-automatically; displayed\n\
        --b--\n";
    assert!(mailbox.receive_imf(mdn, "INBOX", 2, 0));

    let (chat_id, msg_id) = mailbox.with_store(|store| {
        let msg = store.msg_by_rfc724_mid("Mr.sent@example.org").unwrap();
        assert_eq!(msg.state, MsgState::OutRead);
        (msg.chat_id, msg.id)
    });
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::MsgRead { chat_id, msg_id }]
    );
}

#[test]
fn own_group_mail_loops_back_into_the_group() {
    let (mailbox, _events) = new_mailbox();
    make_known(&mailbox, "bob@example.org");

    let chat_id = mailbox.create_group_chat("Locals").unwrap();
    mailbox.with_store(|store| {
        let bob = store.contact_id_by_addr("bob@example.org").unwrap();
        store.add_chat_contact(chat_id, bob).unwrap();
    });

    // The sent copy comes back from the server carrying the generated
    // group Message-ID.
    let mid = mailbox.create_group_message_id(chat_id).unwrap();
    assert!(mid.starts_with("Gr."));
    assert!(mid.ends_with("@example.org"));

    let raw = format!(
        "From: {}\n\
         To: bob@example.org\n\
         Chat-Version: 1.0\n\
         Message-ID: <{}>\n\
         Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
         \n\
         hello group\n",
        SELF_ADDR, mid
    );
    assert!(mailbox.receive_imf(raw.as_bytes(), "Sent", 3, 0));

    mailbox.with_store(|store| {
        let msg = store.msg_by_rfc724_mid(&mid).unwrap();
        assert_eq!(msg.chat_id, chat_id);
        assert_eq!(msg.from_id, CONTACT_ID_SELF);
        assert_eq!(msg.state, MsgState::OutDelivered);
    });
}

#[test]
fn reply_from_unknown_contact_opens_a_chat() {
    let (mailbox, _events) = new_mailbox();

    // Our own message first, so the reply references something we know.
    let sent = format!(
        "From: {}\n\
         To: newcomer@example.org\n\
         Chat-Version: 1.0\n\
         Message-ID: <Mr.first@example.org>\n\
         Date: Sun, 22 Oct 2017 10:30:00 +0000\n\
         \n\
         hi!\n",
        SELF_ADDR
    );
    assert!(mailbox.receive_imf(sent.as_bytes(), "Sent", 1, 0));

    // The newcomer answers from a plain mail client.
    let reply = b"Return-Path: <newcomer@example.org>\n\
        From: newcomer@example.org\n\
        To: self@example.org\n\
        Message-ID: <re.1@example.org>\n\
        In-Reply-To: <Mr.first@example.org>\n\
        Date: Sun, 22 Oct 2017 10:45:00 +0000\n\
        \n\
        hi yourself\n";
    assert!(mailbox.receive_imf(reply, "INBOX", 2, 0));

    mailbox.with_store(|store| {
        let newcomer = store.contact_id_by_addr("newcomer@example.org").unwrap();
        assert!(store.contact_by_id(newcomer).unwrap().origin >= Origin::IncomingReplyTo);
        let msg = store.msg_by_rfc724_mid("re.1@example.org").unwrap();
        assert_eq!(Some(msg.chat_id), store.single_chat_by_contact(newcomer));
    });
}
