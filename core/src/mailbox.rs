//! The mailbox handle.
//!
//! A [`Mailbox`] owns the store behind one coarse lock, the OpenPGP
//! engine, the event queue and the smeared clock.  The ingest pipeline
//! runs on the fetcher thread; the UI and the sender threads go through
//! the same lock.  Events always fire with the lock released, so the
//! callback may re-enter the mailbox.

use std::sync::{Arc, Mutex, MutexGuard};

use log::warn;

use brieftaube_pgp::{Engine, Key, SequoiaEngine};

use crate::config;
use crate::e2ee;
use crate::event::{Event, EventCallback, Events};
use crate::receive::{self, IngestOutcome};
use crate::store::Store;
use crate::util::SmearedClock;
use crate::Result;

/// A single mailbox: one account, one store, one engine.
pub struct Mailbox<S: Store> {
    store: Mutex<S>,
    engine: Arc<dyn Engine>,
    events: Events,
    clock: SmearedClock,
    wake_lock: Mutex<u32>,
}

impl<S: Store> Mailbox<S> {
    /// Creates a mailbox with the default engine.
    pub fn new(
        store: S,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Self {
        Self::with_engine(store, Arc::new(SequoiaEngine::new()), callback)
    }

    /// Creates a mailbox with a custom engine, e.g. a deterministic one
    /// in tests.
    pub fn with_engine(
        store: S,
        engine: Arc<dyn Engine>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Self {
        Mailbox {
            store: Mutex::new(store),
            engine,
            events: Events::new(Box::new(callback) as EventCallback),
            clock: SmearedClock::new(),
            wake_lock: Mutex::new(0),
        }
    }

    fn lock_store(&self) -> MutexGuard<S> {
        match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs `f` under the store lock.  For reads and simple writes; the
    /// ingest pipeline manages its own transaction.
    pub fn with_store<T>(&self, f: impl FnOnce(&mut S) -> T) -> T {
        f(&mut *self.lock_store())
    }

    // -- config ----------------------------------------------------------

    pub fn get_config(&self, key: &str) -> Option<String> {
        self.lock_store().get_config(key)
    }

    pub fn set_config(&self, key: &str, value: Option<&str>) -> bool {
        self.lock_store().set_config(key, value).is_ok()
    }

    pub fn get_config_int(&self, key: &str, default: i32) -> i32 {
        self.get_config(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn set_config_int(&self, key: &str, value: i32) -> bool {
        self.set_config(key, Some(&value.to_string()))
    }

    pub fn is_configured(&self) -> bool {
        self.get_config_int(config::CONFIGURED, 0) != 0
    }

    // -- e2ee ------------------------------------------------------------

    /// Loads the self keypair, generating and persisting one on first
    /// use.  Returns the public half.
    pub fn ensure_self_key(&self) -> Result<Key> {
        let addr = self
            .get_config(config::CONFIGURED_ADDR)
            .ok_or_else(|| anyhow::anyhow!("address not configured"))?;
        let mut store = self.lock_store();
        let (public, _) = e2ee::load_or_generate_self_key(
            self.engine.as_ref(),
            &mut *store,
            &addr,
        )?;
        Ok(public)
    }

    // -- chats -----------------------------------------------------------

    /// Creates a new group chat with a fresh group id; the local user is
    /// the first member.
    pub fn create_group_chat(&self, name: &str) -> Result<u32> {
        let chat_id = {
            let mut store = self.lock_store();
            let grpid = crate::util::create_grpid();
            let chat_id = store.create_group_chat(name, &grpid)?;
            store.add_chat_contact(chat_id, crate::contact::CONTACT_ID_SELF)?;
            chat_id
        };
        self.events.emit(Event::ChatModified { chat_id });
        Ok(chat_id)
    }

    /// The Message-ID to put on the next outgoing message of a group
    /// chat: `Gr.<grpid>.<random>@<host>`.  Plain recipients keep the
    /// header, so replies can be routed back to the group.
    pub fn create_group_message_id(&self, chat_id: u32) -> Result<String> {
        let store = self.lock_store();
        let grpid = store
            .chat_by_id(chat_id)
            .and_then(|chat| chat.grpid)
            .ok_or_else(|| anyhow::anyhow!("chat {} is no group", chat_id))?;
        let self_addr = store
            .get_config(config::CONFIGURED_ADDR)
            .unwrap_or_default();
        Ok(crate::util::create_group_message_id(&grpid, &self_addr))
    }

    // -- ingest ----------------------------------------------------------

    /// Feeds one raw message from the transport into the pipeline.
    ///
    /// Returns false if the message could not be processed; the
    /// transaction is rolled back then and no events fire.
    pub fn receive_imf(
        &self,
        raw: &[u8],
        server_folder: &str,
        server_uid: u32,
        flags: u32,
    ) -> bool {
        let outcome = {
            let mut store = self.lock_store();
            if let Err(err) = store.begin_transaction() {
                warn!("Cannot begin transaction: {:#}.", err);
                return false;
            }
            let outcome = receive::receive_imf(
                &mut *store,
                &self.events,
                &self.clock,
                self.engine.as_ref(),
                raw,
                server_folder,
                server_uid,
                flags,
            );
            match outcome {
                Ok(IngestOutcome::Inserted) => match store.commit() {
                    Ok(()) => Ok(true),
                    Err(err) => {
                        warn!("Commit failed: {:#}.", err);
                        Err(())
                    }
                },
                // Already rolled back by the pipeline.
                Ok(IngestOutcome::Duplicate) => Ok(false),
                Err(err) => {
                    warn!("Cannot process message: {:#}.", err);
                    let _ = store.rollback();
                    Err(())
                }
            }
        };

        // The lock is released here; queued events may fire.
        match outcome {
            Ok(fire) => {
                if fire {
                    self.events.flush();
                } else {
                    self.events.clear();
                }
                true
            }
            Err(()) => {
                self.events.clear();
                false
            }
        }
    }

    // -- wake lock -------------------------------------------------------

    /// Raises the wake-lock counter; the 0 to 1 transition asks the
    /// frontend to keep the process alive.
    pub fn wake_lock(&self) {
        let mut counter = match self.wake_lock.lock() {
            Ok(counter) => counter,
            Err(poisoned) => poisoned.into_inner(),
        };
        *counter += 1;
        if *counter == 1 {
            self.events.emit(Event::WakeLock { on: true });
        }
    }

    /// Lowers the wake-lock counter; the 1 to 0 transition lets the
    /// process sleep again.
    pub fn wake_unlock(&self) {
        let mut counter = match self.wake_lock.lock() {
            Ok(counter) => counter,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *counter == 0 {
            return;
        }
        if *counter == 1 {
            self.events.emit(Event::WakeLock { on: false });
        }
        *counter -= 1;
    }

    // -- maintenance & diagnostics --------------------------------------

    /// Clears tables according to the `store::RESET_*` bits.
    pub fn reset_tables(&self, bits: u32) -> bool {
        let ok = self.lock_store().reset_tables(bits).is_ok();
        if ok {
            self.events.emit(Event::MsgsChanged { chat_id: 0, msg_id: 0 });
        }
        ok
    }

    /// A multi-line diagnostics string.  Use neutral speech; the core is
    /// not tied to any frontend.
    pub fn get_info(&self) -> String {
        let store = self.lock_store();

        let addr = store
            .get_config(config::CONFIGURED_ADDR)
            .unwrap_or_else(|| "unset".to_string());
        let fingerprint = store
            .self_keypair(&addr)
            .and_then(|(public, _)| {
                Key::from_binary(&public, brieftaube_pgp::KeyKind::Public).ok()
            })
            .map(|k| k.fingerprint_hex())
            .unwrap_or_else(|| "<not yet calculated>".to_string());

        format!(
            "Chats: {}\n\
             Chat messages: {}\n\
             Messages in mailbox: {}\n\
             Contacts: {}\n\
             \n\
             displayname={}\n\
             configured={}\n\
             configured_addr={}\n\
             dbversion={}\n\
             e2ee_enabled={}\n\
             mdns_enabled={}\n\
             Private keys={}, public keys={}, fingerprint={}\n",
            store.chat_count(),
            store.msg_count(),
            store.deaddrop_msg_count(),
            store.contact_count(),
            store
                .get_config(config::DISPLAYNAME)
                .unwrap_or_else(|| "unset".to_string()),
            store
                .get_config(config::CONFIGURED)
                .unwrap_or_else(|| "0".to_string()),
            addr,
            store
                .get_config(config::DBVERSION)
                .unwrap_or_else(|| "0".to_string()),
            store
                .get_config(config::E2EE_ENABLED)
                .unwrap_or_else(|| config::E2EE_DEFAULT_ENABLED.to_string()),
            store
                .get_config(config::MDNS_ENABLED)
                .unwrap_or_else(|| config::MDNS_DEFAULT_ENABLED.to_string()),
            store.keypair_count(),
            store.peer_key_count(),
            fingerprint,
        )
    }
}
