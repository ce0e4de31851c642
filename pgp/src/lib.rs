//! OpenPGP machinery for the brieftaube messenger core.
//!
//! This crate wraps [`sequoia-openpgp`] in the small, opinionated engine
//! the messenger needs: RSA key generation with Autocrypt Level 1
//! preferences, hybrid encryption with optional signing, passphrase-based
//! encryption for setup messages, and a byte-faithful splitter for
//! ASCII-armored blocks carrying Autocrypt headers.
//!
//!   [`sequoia-openpgp`]: https://docs.rs/sequoia-openpgp
//!
//! # Scope
//!
//! Only the OpenPGP profile the messenger produces and consumes is
//! supported: RSA keys, SHA-256 as the primary hash, AES, ZLIB, and
//! SK-ESK (Tag 3) plus SEIP (Tag 18) packets.  Keys are handled as parsed,
//! validated certificates in memory; serialized blobs exist at the
//! persistence boundary only.

#![warn(missing_docs)]

pub mod armor;
pub mod engine;
pub mod key;
pub mod keyring;

pub use crate::armor::{split_armored_data, SplitArmored};
pub use crate::engine::{Engine, SequoiaEngine};
pub use crate::key::{Key, KeyKind};
pub use crate::keyring::Keyring;

/// Result specialization used throughout this crate.
pub type Result<T> = anyhow::Result<T>;

/// RSA modulus size for generated primary keys and subkeys.
pub const KEYGEN_BITS: usize = 2048;

/// Errors returned by this crate.
///
/// Callers in the ingest pipeline usually degrade these to a logged
/// warning; the variants exist so that tests and diagnostics can tell the
/// failure classes apart.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A key blob does not parse, or the parsed kind does not match the
    /// declared kind.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// An encrypt, decrypt, sign or verify operation failed internally.
    #[error("Cryptographic operation failed: {0}")]
    CryptoFailure(String),

    /// An armored block misses its BEGIN or END line, or the labels
    /// disagree.
    #[error("Malformed armored block: {0}")]
    ArmorParse(&'static str),

    /// The operation is not supported by this engine.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}
