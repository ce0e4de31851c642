//! Time smearing and id synthesis.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

fn system_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A wall clock adjusted to be strictly monotonic within the process.
///
/// Timestamps created in a tight loop get consecutive values so that
/// message ordering stays stable even when several messages arrive in
/// the same second.
pub(crate) struct SmearedClock {
    last: Mutex<i64>,
}

impl SmearedClock {
    pub fn new() -> Self {
        SmearedClock { last: Mutex::new(0) }
    }

    /// The current time, taking previously created smeared timestamps
    /// into account.
    pub fn smeared_now(&self) -> i64 {
        let last = self.last.lock().map(|l| *l).unwrap_or(0);
        system_time().max(last)
    }

    /// Creates a timestamp that is strictly larger than any timestamp
    /// created before.
    pub fn create(&self) -> i64 {
        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ts = system_time();
        if ts <= *last {
            ts = *last + 1;
        }
        *last = ts;
        ts
    }
}

fn random_alnum(len: usize) -> String {
    thread_rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Creates an opaque group id, 8 characters from `[A-Za-z0-9]`.
pub(crate) fn create_grpid() -> String {
    random_alnum(crate::group::VALID_ID_LEN)
}

/// Creates a Message-ID for a group message: `Gr.<grpid>.<random>@<host>`.
pub(crate) fn create_group_message_id(grpid: &str, self_addr: &str) -> String {
    let host = self_addr.rsplit('@').next().unwrap_or("nohost");
    format!("Gr.{}.{}@{}", grpid, random_alnum(14), host)
}

/// Synthesizes a Message-ID for mails that lack one.
///
/// Deterministic over fields that never change so that re-downloading
/// the mail from another folder dedups correctly.
pub(crate) fn create_incoming_rfc724_mid(
    timestamp: i64,
    from_id: u32,
    to_ids: &[u32],
) -> String {
    let to = to_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("-");
    format!("{}-{}-{}@stub", timestamp, from_id, to)
}

/// Message-ID for the per-recipient ghost copy of an outgoing mail.
/// Carries the original's local id so the ghost can be found when the
/// original is deleted, and the recipient id to keep it unique.
pub(crate) fn create_ghost_rfc724_mid(original_msg_id: u32, to_id: u32) -> String {
    format!("Gh.{}.{}@ghost", original_msg_id, to_id)
}
