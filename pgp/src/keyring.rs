//! Ordered collections of keys.

use sequoia_openpgp as openpgp;
use openpgp::{Fingerprint, KeyID};

use crate::{Error, Key, KeyKind, Result};

/// An ordered collection of keys, all of the same kind.
///
/// Duplicates by fingerprint are permitted but discouraged; lookup
/// helpers return the first match.
#[derive(Clone, Debug)]
pub struct Keyring {
    kind: KeyKind,
    keys: Vec<Key>,
}

impl Keyring {
    /// Creates an empty keyring for keys of the given kind.
    pub fn new(kind: KeyKind) -> Self {
        Keyring { kind, keys: Vec::new() }
    }

    /// Creates a keyring holding a single key.
    pub fn from_key(key: Key) -> Self {
        Keyring { kind: key.kind(), keys: vec![key] }
    }

    /// The kind of the contained keys.
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Appends `key`, failing on a kind mismatch.
    pub fn add(&mut self, key: Key) -> Result<()> {
        if key.kind() != self.kind {
            return Err(Error::InvalidKey(format!(
                "cannot add a {:?} key to a {:?} keyring",
                key.kind(),
                self.kind
            ))
            .into());
        }
        self.keys.push(key);
        Ok(())
    }

    /// The contained keys, in insertion order.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Number of contained keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True iff the keyring contains no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Looks up a key by its fingerprint.
    pub fn key_by_fingerprint(&self, fpr: &Fingerprint) -> Option<&Key> {
        self.keys.iter().find(|k| &k.fingerprint() == fpr)
    }

    /// Looks up a key by its key id (the lower 8 bytes of the
    /// fingerprint).
    pub fn key_by_keyid(&self, keyid: &KeyID) -> Option<&Key> {
        self.keys.iter().find(|k| &k.keyid() == keyid)
    }
}

impl<'a> IntoIterator for &'a Keyring {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}
