//! End-to-end encryption glue.
//!
//! Connects the OpenPGP engine to the ingest pipeline: loading or
//! generating the self keypair, remembering peer keys from `Autocrypt:`
//! headers, and decrypting inbound `multipart/encrypted` payloads.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{info, warn};

use brieftaube_pgp::{Engine, Key, KeyKind, Keyring};

use crate::aheader::Aheader;
use crate::config;
use crate::contact::{addr_cmp, normalize_addr};
use crate::mime::MimeMessage;
use crate::param::Param;
use crate::store::Store;
use crate::Result;

/// `Param::ErroneousE2ee` bit: the payload could not be decrypted.
pub const E2EE_DECRYPTION_FAILED: u32 = 0x1;

/// `Param::ErroneousE2ee` bit: decrypted, but without a valid signature.
pub const E2EE_NO_VALID_SIGNATURE: u32 = 0x2;

/// Mixes volatile process state into the engine's entropy pool.
///
/// The values cannot be recovered from the CSPRNG output, so seeding
/// with even mildly sensitive data is fine.
fn seed_engine(engine: &dyn Engine, store: &dyn Store) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let mut seed = Vec::with_capacity(64);
    // Time, a stack address, the heap address of the core handle, the
    // thread id and the process id, as opaque bytes.
    seed.extend_from_slice(&now.to_le_bytes());
    seed.extend_from_slice(&(&now as *const _ as usize).to_le_bytes());
    seed.extend_from_slice(
        &(store as *const dyn Store as *const () as usize).to_le_bytes(),
    );
    seed.extend_from_slice(format!("{:?}", std::thread::current().id()).as_bytes());
    seed.extend_from_slice(&std::process::id().to_le_bytes());

    engine.rand_seed(&seed);
}

/// Loads the keypair for `self_addr`, generating and persisting one on
/// first use.
pub(crate) fn load_or_generate_self_key(
    engine: &dyn Engine,
    store: &mut dyn Store,
    self_addr: &str,
) -> Result<(Key, Key)> {
    if let Some((public, private)) = store.self_keypair(self_addr) {
        return Ok((
            Key::from_binary(&public, KeyKind::Public)?,
            Key::from_binary(&private, KeyKind::Private)?,
        ));
    }

    seed_engine(engine, store);
    info!("Generating keypair for <{}>, this may take a moment...", self_addr);
    let start = Instant::now();
    let (public, private) = engine.create_keypair(self_addr)?;
    store.save_self_keypair(
        self_addr,
        &public.to_bytes()?,
        &private.to_bytes()?,
    )?;
    info!(
        "Keypair generated in {:.1} s.",
        start.elapsed().as_secs_f64()
    );
    Ok((public, private))
}

/// Remembers the key from the message's `Autocrypt:` header, if the
/// header is well-formed and belongs to the sender.
pub(crate) fn save_autocrypt_header(
    store: &mut dyn Store,
    mime: &MimeMessage,
    from_addr: &str,
) {
    let value = match mime.autocrypt_header() {
        Some(value) => value,
        None => return,
    };
    match Aheader::parse(value) {
        Ok(header) if addr_cmp(&header.addr, from_addr) => {
            if let Ok(bytes) = header.public_key.to_bytes() {
                let _ = store.save_peer_key(
                    &header.addr,
                    &bytes,
                    header.prefer_encrypt,
                );
            }
        }
        Ok(_) => warn!("Autocrypt header addr does not match From:."),
        Err(err) => warn!("Cannot parse Autocrypt header: {:#}.", err),
    }
}

/// Decrypts the message's `multipart/encrypted` payload in place.
///
/// On success the decrypted content replaces the message's parts and the
/// parts are marked as end-to-end encrypted; signature problems and
/// decryption failures are recorded in the parts' parameters instead of
/// failing the ingest.  Returns true iff the payload was decrypted.
pub(crate) fn try_decrypt(
    engine: &dyn Engine,
    store: &mut dyn Store,
    mime: &mut MimeMessage,
    from_addr: &str,
) -> bool {
    let payload = match mime.encrypted_payload.take() {
        Some(payload) => payload,
        None => return false,
    };

    let self_addr = store
        .get_config(config::CONFIGURED_ADDR)
        .unwrap_or_default();
    let private = match store
        .self_keypair(&self_addr)
        .and_then(|(_, private)| Key::from_binary(&private, KeyKind::Private).ok())
    {
        Some(private) => private,
        None => {
            warn!("Cannot decrypt; no private key for <{}>.", self_addr);
            mark_erroneous(mime, E2EE_DECRYPTION_FAILED);
            return false;
        }
    };

    let validators = store
        .peer_key(&normalize_addr(from_addr))
        .and_then(|bytes| Key::from_binary(&bytes, KeyKind::Public).ok())
        .map(Keyring::from_key);

    match engine.pk_decrypt(&payload, &Keyring::from_key(private), validators.as_ref())
    {
        Ok((plain, fingerprints)) => {
            mime.merge_decrypted(&plain);
            if fingerprints.is_empty() {
                mark_erroneous(mime, E2EE_NO_VALID_SIGNATURE);
            } else {
                for part in &mut mime.parts {
                    part.param.set(Param::GuaranteedE2ee, 1);
                }
            }
            true
        }
        Err(err) => {
            warn!("Decryption failed: {:#}.", err);
            mark_erroneous(mime, E2EE_DECRYPTION_FAILED);
            false
        }
    }
}

fn mark_erroneous(mime: &mut MimeMessage, error_bits: u32) {
    for part in &mut mime.parts {
        part.param.set(Param::ErroneousE2ee, error_bits);
    }
}
