//! Packed key-value parameters.
//!
//! Messages and contacts carry a small parameter blob stored as lines of
//! `k=v` where `k` is a single ASCII character.  Values cannot contain
//! newlines; unknown keys survive a parse/pack round trip unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Well-known parameter keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Param {
    /// File attached to the message.
    File = b'f',
    /// Width of an attached image or video.
    Width = b'w',
    /// Height of an attached image or video.
    Height = b'h',
    /// Duration of attached audio or video, in milliseconds.
    Duration = b'd',
    /// The message was end-to-end encrypted and verified.
    GuaranteedE2ee = b'c',
    /// The message was end-to-end encrypted, but with problems.
    ErroneousE2ee = b'e',
    /// The sender asked for a read receipt.
    WantsMdn = b'r',
    /// Server folder the message lives in.
    ServerFolder = b'Z',
    /// Server uid of the message.
    ServerUid = b'z',
    /// Profile image.
    ProfileImage = b'i',
    /// For ghost messages, the local id of the original message.
    GhostId = b'G',
    /// System command.
    Cmd = b'S',
    /// Parameter of the system command.
    CmdArg = b'E',
}

/// A parameter collection, packable into the `k=v\n` wire form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<u8, String>);

impl Params {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, key: Param) -> Option<&str> {
        self.0.get(&(key as u8)).map(|s| s.as_str())
    }

    pub fn exists(&self, key: Param) -> bool {
        self.0.contains_key(&(key as u8))
    }

    pub fn set(&mut self, key: Param, value: impl ToString) -> &mut Self {
        let value = value.to_string();
        debug_assert!(!value.contains('\n'));
        self.0.insert(key as u8, value);
        self
    }

    pub fn remove(&mut self, key: Param) -> &mut Self {
        self.0.remove(&(key as u8));
        self
    }

    pub fn get_int(&self, key: Param) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}={}", *k as char, v)?;
        }
        Ok(())
    }
}

impl FromStr for Params {
    type Err = std::convert::Infallible;

    /// Parses the packed form.  Malformed lines are skipped; values are
    /// trimmed of trailing whitespace.
    fn from_str(packed: &str) -> Result<Self, Self::Err> {
        let mut map = BTreeMap::new();
        for line in packed.lines() {
            let mut bytes = line.bytes();
            match (bytes.next(), bytes.next()) {
                (Some(key), Some(b'=')) if key.is_ascii() => {
                    map.insert(key, line[2..].trim_end().to_string());
                }
                _ => (),
            }
        }
        Ok(Params(map))
    }
}
