//! Key handling.
//!
//! A [`Key`] is a parsed OpenPGP certificate together with a declared
//! kind.  Construction validates the blob; once a `Key` exists, it is
//! known to parse and to match its kind.  The binary transferable-key
//! form is produced only when a key crosses the persistence boundary.

use std::fmt;

use sequoia_openpgp as openpgp;
use openpgp::cert::prelude::*;
use openpgp::parse::Parse;
use openpgp::serialize::Serialize;
use openpgp::{Fingerprint, KeyID};

use crate::{Error, Result};

/// Whether a key blob carries public or secret key material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// A transferable public key.
    Public,
    /// A transferable secret key.
    Private,
}

/// A validated OpenPGP key of a declared kind.
#[derive(Clone, Debug)]
pub struct Key {
    kind: KeyKind,
    cert: Cert,
}

impl Key {
    /// Parses `bytes` as a key of the given kind.
    ///
    /// Fails if the blob does not parse as a single certificate, or if
    /// the parsed kind does not match `kind` (a blob without secret key
    /// material declared `Private`, or vice versa).
    pub fn from_binary(bytes: &[u8], kind: KeyKind) -> Result<Self> {
        let cert = Cert::from_bytes(bytes)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Self::from_cert(cert, kind)
    }

    /// Wraps an already parsed certificate, checking the kind.
    pub fn from_cert(cert: Cert, kind: KeyKind) -> Result<Self> {
        let matches = match kind {
            KeyKind::Public => !cert.is_tsk(),
            KeyKind::Private => cert.is_tsk(),
        };
        if !matches {
            return Err(Error::InvalidKey(format!(
                "key {} is not a {} key",
                cert.fingerprint(),
                match kind {
                    KeyKind::Public => "public",
                    KeyKind::Private => "private",
                }
            ))
            .into());
        }
        Ok(Key { kind, cert })
    }

    /// Returns true iff `bytes` parses as a key of the given kind.
    ///
    /// Never panics, whatever the input.
    pub fn is_valid(bytes: &[u8], kind: KeyKind) -> bool {
        Self::from_binary(bytes, kind).is_ok()
    }

    /// The declared kind.
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// The parsed certificate.
    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    /// Serializes into the binary transferable-key form matching the
    /// kind (not armored).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self.kind {
            KeyKind::Public => self.cert.serialize(&mut buf)?,
            KeyKind::Private => self.cert.as_tsk().serialize(&mut buf)?,
        }
        Ok(buf)
    }

    /// The V4 fingerprint of the primary key (SHA-1 over the canonical
    /// public-key packet, RFC 4880 section 12.2).
    pub fn fingerprint(&self) -> Fingerprint {
        self.cert.fingerprint()
    }

    /// The fingerprint rendered as uppercase hex for display.
    pub fn fingerprint_hex(&self) -> String {
        self.cert.fingerprint().to_hex()
    }

    /// The key id, i.e. the lower 8 bytes of the fingerprint.
    pub fn keyid(&self) -> KeyID {
        self.cert.keyid()
    }

    /// Extracts the public half of a private key.
    ///
    /// Fails if this key is not private.
    pub fn split_public(&self) -> Result<Key> {
        if self.kind != KeyKind::Private {
            return Err(
                Error::InvalidKey("given key is no private key".into()).into()
            );
        }
        Ok(Key {
            kind: KeyKind::Public,
            cert: self.cert.clone().strip_secret_key_material(),
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.fingerprint_hex())
    }
}
