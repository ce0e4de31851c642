//! Read receipts (MDN, RFC 3798).
//!
//! A receipt arrives as `multipart/report; report-type=disposition-
//! notification` whose second subpart is a small embedded mail carrying
//! `Disposition:` and `Original-Message-ID:`.  If the referenced message
//! was sent by us, the receipt flips it to [`MsgState::OutRead`] and a
//! `MSG_READ` event is queued.  Missing or malformed receipts are
//! silently ignored.

use mailparse::{msgidparse, parse_mail};

use crate::contact::CONTACT_ID_SELF;
use crate::event::{Event, Events};
use crate::message::MsgState;
use crate::mime::Report;
use crate::store::Store;
use crate::Result;

/// Processes one report container.  Queues `MSG_READ` for every receipt
/// that resolves to an own message.
pub(crate) fn handle_report(
    store: &mut dyn Store,
    events: &Events,
    report: &Report,
) -> Result<()> {
    if report.report_type.as_deref() != Some("disposition-notification") {
        return Ok(());
    }
    // The first subpart is for humans, the second for machines.
    let machine_part = match report.subparts.get(1) {
        Some(part) => part,
        None => return Ok(()),
    };

    // Although the MDN is only a header block, it parses as a complete
    // mail.
    let inner = match parse_mail(machine_part) {
        Ok(inner) => inner,
        Err(_) => return Ok(()),
    };

    let mut disposition = None;
    let mut original_message_id = None;
    for header in &inner.headers {
        let key = header.get_key().to_lowercase();
        if key == "disposition" {
            disposition = Some(header.get_value());
        } else if key == "original-message-id" {
            original_message_id = Some(header.get_value());
        }
    }

    // Without a Disposition: field we do not assume anything; with one,
    // any disposition type counts as "the user has seen it".
    if disposition.is_none() {
        return Ok(());
    }
    let rfc724_mid = match original_message_id
        .as_deref()
        .and_then(|v| msgidparse(v).ok())
        .and_then(|ids| ids.first().cloned())
    {
        Some(mid) => mid,
        None => return Ok(()),
    };

    if let Some(msg) = store.msg_by_rfc724_mid(&rfc724_mid) {
        if msg.from_id == CONTACT_ID_SELF {
            store.set_msg_state(msg.id, MsgState::OutRead)?;
            events.queue(Event::MsgRead { chat_id: msg.chat_id, msg_id: msg.id });
        }
    }
    Ok(())
}
