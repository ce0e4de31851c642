//! The `Autocrypt:` header.
//!
//! Peers advertise their key with every mail; the newest key seen per
//! address is remembered and used to verify signatures on decryption.
//! See the Autocrypt Level 1 specification for the attribute grammar:
//! attributes whose name starts with `_` are non-critical, unknown
//! critical attributes make the whole header invalid.

use std::fmt;
use std::str::FromStr;

use brieftaube_pgp::{Key, KeyKind};

use crate::contact::normalize_addr;
use crate::{Error, Result};

/// The `prefer-encrypt` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptPreference {
    NoPreference,
    Mutual,
}

impl Default for EncryptPreference {
    fn default() -> Self {
        EncryptPreference::NoPreference
    }
}

impl fmt::Display for EncryptPreference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EncryptPreference::NoPreference => write!(f, "nopreference"),
            EncryptPreference::Mutual => write!(f, "mutual"),
        }
    }
}

impl FromStr for EncryptPreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mutual" => Ok(EncryptPreference::Mutual),
            "nopreference" => Ok(EncryptPreference::NoPreference),
            _ => Err(Error::MalformedHeader("unknown prefer-encrypt value").into()),
        }
    }
}

/// A parsed `Autocrypt:` header.
#[derive(Debug)]
pub struct Aheader {
    /// Normalized address the key belongs to.
    pub addr: String,
    pub prefer_encrypt: EncryptPreference,
    pub public_key: Key,
}

impl Aheader {
    /// Parses a raw header value of the form
    /// `addr=a@b; prefer-encrypt=mutual; keydata=<base64>`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut addr = None;
        let mut prefer_encrypt = EncryptPreference::default();
        let mut keydata = None;

        for attribute in value.split(';') {
            let attribute = attribute.trim();
            if attribute.is_empty() {
                continue;
            }
            let mut parts = attribute.splitn(2, '=');
            let name = parts.next().unwrap_or_default().trim();
            let attr_value = parts.next().unwrap_or_default().trim();

            match name {
                "addr" => addr = Some(normalize_addr(attr_value)),
                "prefer-encrypt" => {
                    prefer_encrypt = attr_value.parse().unwrap_or_default()
                }
                "keydata" => keydata = Some(attr_value.to_string()),
                name if name.starts_with('_') => {
                    // Non-critical attribute, ignore.
                }
                _ => {
                    return Err(Error::MalformedHeader(
                        "unknown critical Autocrypt attribute",
                    )
                    .into())
                }
            }
        }

        let addr =
            addr.ok_or(Error::MalformedHeader("Autocrypt header without addr"))?;
        let keydata = keydata
            .ok_or(Error::MalformedHeader("Autocrypt header without keydata"))?;
        let keydata = base64::decode(
            &keydata.replace(|c: char| c.is_whitespace(), ""),
        )
        .map_err(|_| Error::MalformedHeader("keydata is not valid base64"))?;
        let public_key = Key::from_binary(&keydata, KeyKind::Public)?;

        Ok(Aheader { addr, prefer_encrypt, public_key })
    }

    /// Renders the header value (without the `Autocrypt: ` prefix).
    pub fn to_header_value(&self) -> Result<String> {
        let keydata = base64::encode(&self.public_key.to_bytes()?);
        Ok(format!(
            "addr={}; prefer-encrypt={}; keydata={}",
            self.addr, self.prefer_encrypt, keydata
        ))
    }
}
