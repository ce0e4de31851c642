//! The OpenPGP engine.
//!
//! All cryptographic operations of the messenger go through the
//! [`Engine`] trait; [`SequoiaEngine`] is the production implementation.
//! Keeping the operations behind a trait keeps the backend pluggable and
//! lets tests substitute deterministic variants.
//!
//! The artifacts are Autocrypt Level 1 compatible: RSA 2048 keys with an
//! encryption subkey, AES-encrypted SEIP (Tag 18) payloads with MDC, and
//! passphrase-protected setup messages using an SK-ESK (Tag 3) packet
//! with iterated+salted S2K.

use std::collections::HashSet;
use std::convert::TryFrom;
use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::{Instant, SystemTime};

use log::info;

use sequoia_openpgp as openpgp;
use openpgp::armor;
use openpgp::cert::prelude::*;
use openpgp::crypto::{KeyPair, Password, SessionKey, S2K};
use openpgp::packet::key::{Key4, PrimaryRole, SecretParts, SubordinateRole, UnspecifiedRole};
use openpgp::packet::signature::SignatureBuilder;
use openpgp::packet::skesk::SKESK4;
use openpgp::packet::{Key as PacketKey, UserID, PKESK, SKESK};
use openpgp::parse::stream::{
    DecryptionHelper, DecryptorBuilder, GoodChecksum, MessageLayer,
    MessageStructure, VerificationHelper,
};
use openpgp::parse::Parse;
use openpgp::policy::{Policy, StandardPolicy};
use openpgp::serialize::stream::{
    Armorer, Encryptor, LiteralWriter, Message, Recipient, Signer,
};
use openpgp::serialize::Serialize;
use openpgp::types::{
    CompressionAlgorithm, DataFormat, Features, HashAlgorithm, KeyFlags,
    SignatureType, SymmetricAlgorithm,
};
use openpgp::{Cert, Fingerprint, KeyHandle, Packet};

use crate::{Error, Key, KeyKind, Keyring, Result, KEYGEN_BITS};

/// Cipher for payload encryption.
const CIPHER: SymmetricAlgorithm = SymmetricAlgorithm::AES128;

/// S2K iteration count octet for setup messages; decodes to 65,536
/// iterations (RFC 4880, section 3.7.1.3).
const SETUP_S2K_COUNT: u8 = 96;

/// Decodes an RFC 4880 section 3.7.1.3 S2K coded count octet into the
/// number of bytes to hash. Equivalent to `S2K::decode_count`, which is
/// crate-private in this version of `sequoia-openpgp`.
fn decode_s2k_count(coded: u8) -> u32 {
    use std::cmp;

    let mantissa = 16 + (coded as u32 & 15);
    let exp = (coded as u32 >> 4) + 6;

    mantissa << cmp::min(32 - 5, exp)
}

/// The typed operations the messenger needs from an OpenPGP backend.
///
/// Implementations are process-wide and internally thread-safe.
pub trait Engine: Send + Sync {
    /// Generates a keypair for `addr`.
    ///
    /// The primary key signs and certifies, an encryption subkey covers
    /// storage and transport; both are RSA with [`KEYGEN_BITS`] bits.
    /// The user id is literally `<addr>`, without a display name.
    /// Returns `(public, private)`.
    ///
    ///   [`KEYGEN_BITS`]: crate::KEYGEN_BITS
    fn create_keypair(&self, addr: &str) -> Result<(Key, Key)>;

    /// Encrypts `plain` to all `recipients`, optionally signing with the
    /// private key `signer` first.
    ///
    /// With a signer, the innermost payload is a signed literal-data
    /// packet.  Only armored output is supported; `use_armor == false`
    /// fails.
    fn pk_encrypt(
        &self,
        plain: &[u8],
        recipients: &Keyring,
        signer: Option<&Key>,
        use_armor: bool,
    ) -> Result<Vec<u8>>;

    /// Decrypts `ctext`, trying each private key in `keys` in order.
    ///
    /// If the payload is signed, every signature that verifies against a
    /// key found in `validators` contributes the signer's fingerprint to
    /// the returned set.  Signatures by unknown signers and bad
    /// signatures are not errors; the plaintext is returned either way.
    fn pk_decrypt(
        &self,
        ctext: &[u8],
        keys: &Keyring,
        validators: Option<&Keyring>,
    ) -> Result<(Vec<u8>, HashSet<Fingerprint>)>;

    /// Encrypts `plain` under `passphrase` into an armored setup-message
    /// payload: an SK-ESK packet (AES-128, iterated+salted S2K with
    /// SHA-256, 8-byte salt, count octet 96) followed by a SEIP packet
    /// around a binary literal-data packet.
    fn symm_encrypt(&self, passphrase: &str, plain: &[u8]) -> Result<String>;

    /// Inverse of [`symm_encrypt`], tolerating armored or binary input.
    ///
    ///   [`symm_encrypt`]: Engine::symm_encrypt
    fn symm_decrypt(&self, passphrase: &str, ctext: &[u8]) -> Result<Vec<u8>>;

    /// Mixes additional entropy into the engine.
    ///
    /// Additive only: the pool is folded into locally generated salts on
    /// top of the operating system's CSPRNG and never replaces it.
    fn rand_seed(&self, bytes: &[u8]);
}

/// The production engine, backed by `sequoia-openpgp`.
pub struct SequoiaEngine {
    policy: StandardPolicy<'static>,
    seed_pool: Mutex<[u8; 32]>,
}

impl Default for SequoiaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SequoiaEngine {
    /// Creates an engine with the standard policy.
    pub fn new() -> Self {
        SequoiaEngine {
            policy: StandardPolicy::new(),
            seed_pool: Mutex::new([0; 32]),
        }
    }

    fn signing_keypair(&self, key: &Key) -> Result<KeyPair> {
        if key.kind() != KeyKind::Private {
            return Err(
                Error::InvalidKey("signing key is no private key".into()).into()
            );
        }
        let ka = key
            .cert()
            .keys()
            .secret()
            .with_policy(&self.policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_signing()
            .next()
            .ok_or_else(|| {
                Error::CryptoFailure("no signing-capable secret key".into())
            })?;
        Ok(ka.key().clone().into_keypair()?)
    }

    fn salt(&self) -> [u8; 8] {
        let mut salt = [0u8; 8];
        openpgp::crypto::random(&mut salt);
        // Fold in caller-provided entropy; XOR with CSPRNG output cannot
        // reduce it.
        if let Ok(pool) = self.seed_pool.lock() {
            for (s, p) in salt.iter_mut().zip(pool.iter()) {
                *s ^= p;
            }
        }
        salt
    }
}

impl Engine for SequoiaEngine {
    fn create_keypair(&self, addr: &str) -> Result<(Key, Key)> {
        let primary: PacketKey<SecretParts, PrimaryRole> =
            Key4::generate_rsa(KEYGEN_BITS)?.into();
        let subkey: PacketKey<SecretParts, SubordinateRole> =
            Key4::generate_rsa(KEYGEN_BITS)?.into();
        let now = SystemTime::now();

        let mut signer = primary.clone().into_keypair()?;
        let cert = Cert::try_from(vec![Packet::SecretKey(primary)])?;

        // The user id is only decorative in Autocrypt, but other clients
        // display it, so it carries the address.
        let uid = UserID::from(format!("<{}>", addr));
        let uid_sig = SignatureBuilder::new(SignatureType::PositiveCertification)
            .set_hash_algo(HashAlgorithm::SHA256)
            .set_signature_creation_time(now)?
            .set_primary_userid(true)?
            .set_key_flags(KeyFlags::empty().set_signing().set_certification())?
            .set_preferred_symmetric_algorithms(vec![
                SymmetricAlgorithm::AES256,
                SymmetricAlgorithm::AES128,
                SymmetricAlgorithm::CAST5,
                SymmetricAlgorithm::TripleDES,
                SymmetricAlgorithm::IDEA,
            ])?
            // SHA-1 stays listed for interoperability, but last.
            .set_preferred_hash_algorithms(vec![
                HashAlgorithm::SHA256,
                HashAlgorithm::SHA384,
                HashAlgorithm::SHA512,
                HashAlgorithm::SHA224,
                HashAlgorithm::SHA1,
            ])?
            .set_preferred_compression_algorithms(vec![
                CompressionAlgorithm::Zlib,
            ])?
            .set_features(Features::empty().set_mdc())?;
        let uid_binding = uid.bind(&mut signer, &cert, uid_sig)?;

        // No preference subpackets on the subkey binding.
        let subkey_sig = SignatureBuilder::new(SignatureType::SubkeyBinding)
            .set_hash_algo(HashAlgorithm::SHA256)
            .set_signature_creation_time(now)?
            .set_key_flags(
                KeyFlags::empty()
                    .set_storage_encryption()
                    .set_transport_encryption(),
            )?;
        let subkey_binding = subkey.bind(&mut signer, &cert, subkey_sig)?;

        let cert = cert.insert_packets(vec![
            Packet::from(uid),
            Packet::from(uid_binding),
            Packet::SecretSubkey(subkey),
            Packet::from(subkey_binding),
        ])?;

        let public = Key::from_cert(
            cert.clone().strip_secret_key_material(),
            KeyKind::Public,
        )?;
        let private = Key::from_cert(cert, KeyKind::Private)?;
        Ok((public, private))
    }

    fn pk_encrypt(
        &self,
        plain: &[u8],
        recipients: &Keyring,
        signer: Option<&Key>,
        use_armor: bool,
    ) -> Result<Vec<u8>> {
        if !use_armor {
            return Err(Error::Unsupported("binary ciphertext output").into());
        }
        if recipients.kind() != KeyKind::Public || recipients.is_empty() {
            return Err(Error::InvalidKey(
                "encryption needs at least one public key".into(),
            )
            .into());
        }

        let start = Instant::now();

        let mut recipient_keys: Vec<Recipient> = Vec::new();
        for key in recipients {
            let mut any = false;
            for ka in key
                .cert()
                .keys()
                .with_policy(&self.policy, None)
                .supported()
                .alive()
                .revoked(false)
                .for_transport_encryption()
                .for_storage_encryption()
            {
                recipient_keys.push(ka.key().into());
                any = true;
            }
            if !any {
                return Err(Error::CryptoFailure(format!(
                    "key {} is not capable of encryption",
                    key.fingerprint()
                ))
                .into());
            }
        }

        let mut sink = Vec::new();
        {
            let message = Message::new(&mut sink);
            let message =
                Armorer::new(message).kind(armor::Kind::Message).build()?;
            let message = Encryptor::for_recipients(message, recipient_keys)
                .symmetric_algo(CIPHER)
                .build()
                .map_err(|e| Error::CryptoFailure(e.to_string()))?;
            let message = match signer {
                Some(key) => {
                    let keypair = self.signing_keypair(key)?;
                    Signer::new(message, keypair)
                        .hash_algo(HashAlgorithm::SHA256)?
                        .build()
                        .map_err(|e| Error::CryptoFailure(e.to_string()))?
                }
                None => message,
            };
            let mut message = LiteralWriter::new(message).build()?;
            message.write_all(plain)?;
            message.finalize()?;
        }

        let ms = start.elapsed().as_secs_f64() * 1000.0;
        if signer.is_some() {
            info!("Message signed and encrypted in {:.3} ms.", ms);
        } else {
            info!("Message encrypted in {:.3} ms.", ms);
        }
        Ok(sink)
    }

    fn pk_decrypt(
        &self,
        ctext: &[u8],
        keys: &Keyring,
        validators: Option<&Keyring>,
    ) -> Result<(Vec<u8>, HashSet<Fingerprint>)> {
        let start = Instant::now();

        let helper = DecryptHelper::new(&self.policy, keys, validators)?;
        let mut decryptor = DecryptorBuilder::from_bytes(ctext)?
            .with_policy(&self.policy, None, helper)
            .map_err(|e| Error::CryptoFailure(e.to_string()))?;

        let mut plain = Vec::new();
        decryptor
            .read_to_end(&mut plain)
            .map_err(|e| Error::CryptoFailure(e.to_string()))?;
        let helper = decryptor.into_helper();

        info!(
            "Message decrypted in {:.3} ms.",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok((plain, helper.valid_fingerprints))
    }

    fn symm_encrypt(&self, passphrase: &str, plain: &[u8]) -> Result<String> {
        let password = Password::from(passphrase);
        let s2k = S2K::Iterated {
            hash: HashAlgorithm::SHA256,
            salt: self.salt(),
            hash_bytes: decode_s2k_count(SETUP_S2K_COUNT),
        };
        let key = s2k.derive_key(&password, CIPHER.key_size()?)?;
        let skesk = SKESK4::new(CIPHER, s2k, None)?;

        let mut sink = Vec::new();
        {
            let message = Message::new(&mut sink);
            let mut message =
                Armorer::new(message).kind(armor::Kind::Message).build()?;
            Packet::SKESK(SKESK::V4(skesk)).serialize(&mut message)?;
            let message = Encryptor::with_session_key(message, CIPHER, key)?
                .build()
                .map_err(|e| Error::CryptoFailure(e.to_string()))?;
            let mut message = LiteralWriter::new(message)
                .format(DataFormat::Binary)
                .build()?;
            message.write_all(plain)?;
            message.finalize()?;
        }

        Ok(String::from_utf8(sink)?)
    }

    fn symm_decrypt(&self, passphrase: &str, ctext: &[u8]) -> Result<Vec<u8>> {
        let helper = PassphraseHelper {
            password: Password::from(passphrase),
        };
        let mut decryptor = DecryptorBuilder::from_bytes(ctext)?
            .with_policy(&self.policy, None, helper)
            .map_err(|e| Error::CryptoFailure(e.to_string()))?;

        let mut plain = Vec::new();
        decryptor
            .read_to_end(&mut plain)
            .map_err(|e| Error::CryptoFailure(e.to_string()))?;
        Ok(plain)
    }

    fn rand_seed(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Ok(mut pool) = self.seed_pool.lock() {
            for (i, b) in bytes.iter().enumerate() {
                pool[i % 32] ^= b.rotate_left((i % 7) as u32);
            }
        }
    }
}

struct DecryptHelper {
    secret_keys: Vec<(Fingerprint, PacketKey<SecretParts, UnspecifiedRole>)>,
    validators: Vec<Cert>,
    valid_fingerprints: HashSet<Fingerprint>,
}

impl DecryptHelper {
    fn new(
        policy: &dyn Policy,
        keys: &Keyring,
        validators: Option<&Keyring>,
    ) -> Result<Self> {
        if keys.kind() != KeyKind::Private || keys.is_empty() {
            return Err(Error::InvalidKey(
                "decryption needs at least one private key".into(),
            )
            .into());
        }

        let mut secret_keys = Vec::new();
        for key in keys {
            for ka in key
                .cert()
                .keys()
                .secret()
                .with_policy(policy, None)
                .supported()
                .for_transport_encryption()
                .for_storage_encryption()
            {
                secret_keys.push((key.fingerprint(), ka.key().clone()));
            }
        }

        Ok(DecryptHelper {
            secret_keys,
            validators: validators
                .map(|ring| {
                    ring.keys().iter().map(|k| k.cert().clone()).collect()
                })
                .unwrap_or_default(),
            valid_fingerprints: HashSet::new(),
        })
    }
}

impl VerificationHelper for DecryptHelper {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(self.validators.clone())
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results } = layer {
                for result in results {
                    // Signatures that do not check out are simply not
                    // counted; the message is still returned.
                    if let Ok(GoodChecksum { ka, .. }) = result {
                        self.valid_fingerprints
                            .insert(ka.cert().fingerprint());
                    }
                }
            }
        }
        Ok(())
    }
}

impl DecryptionHelper for DecryptHelper {
    fn decrypt<D>(
        &mut self,
        pkesks: &[PKESK],
        _skesks: &[SKESK],
        sym_algo: Option<SymmetricAlgorithm>,
        mut decrypt: D,
    ) -> openpgp::Result<Option<Fingerprint>>
    where
        D: FnMut(SymmetricAlgorithm, &SessionKey) -> bool,
    {
        for pkesk in pkesks {
            for (fpr, secret) in &self.secret_keys {
                let mut keypair = match secret.clone().into_keypair() {
                    Ok(keypair) => keypair,
                    Err(_) => continue,
                };
                if let Some((algo, sk)) = pkesk.decrypt(&mut keypair, sym_algo)
                {
                    if decrypt(algo, &sk) {
                        return Ok(Some(fpr.clone()));
                    }
                }
            }
        }
        Err(anyhow::anyhow!("no key to decrypt message"))
    }
}

struct PassphraseHelper {
    password: Password,
}

impl VerificationHelper for PassphraseHelper {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(Vec::new())
    }

    fn check(&mut self, _structure: MessageStructure) -> openpgp::Result<()> {
        Ok(())
    }
}

impl DecryptionHelper for PassphraseHelper {
    fn decrypt<D>(
        &mut self,
        _pkesks: &[PKESK],
        skesks: &[SKESK],
        _sym_algo: Option<SymmetricAlgorithm>,
        mut decrypt: D,
    ) -> openpgp::Result<Option<Fingerprint>>
    where
        D: FnMut(SymmetricAlgorithm, &SessionKey) -> bool,
    {
        for skesk in skesks {
            if let Ok((algo, sk)) = skesk.decrypt(&self.password) {
                if decrypt(algo, &sk) {
                    return Ok(None);
                }
            }
        }
        Err(anyhow::anyhow!("wrong passphrase or no SK-ESK packet"))
    }
}
