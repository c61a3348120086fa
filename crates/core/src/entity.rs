//! Permission bits, entry kinds and the shared catalogue-entity view.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix-style permission bits, stored as a 3-octal string in the catalogue.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions(u16);

impl Permissions {
    /// Default permissions for new entries.
    pub const DEFAULT: Permissions = Permissions(0o755);

    /// Parse a 3-octal string such as `"644"`.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 3 || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(Error::InvalidPermissions(s.to_string()));
        }
        let bits = u16::from_str_radix(s, 8).map_err(|_| Error::InvalidPermissions(s.to_string()))?;
        Ok(Self(bits))
    }

    pub fn owner_can_read(&self) -> bool {
        self.0 & 0o400 != 0
    }

    pub fn owner_can_write(&self) -> bool {
        self.0 & 0o200 != 0
    }

    pub fn group_can_read(&self) -> bool {
        self.0 & 0o040 != 0
    }

    pub fn group_can_write(&self) -> bool {
        self.0 & 0o020 != 0
    }

    pub fn other_can_read(&self) -> bool {
        self.0 & 0o004 != 0
    }

    pub fn other_can_write(&self) -> bool {
        self.0 & 0o002 != 0
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03o}", self.0)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({:03o})", self.0)
    }
}

impl TryFrom<String> for Permissions {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Permissions> for String {
    fn from(p: Permissions) -> Self {
        p.to_string()
    }
}

/// What a namespace entry (or identity) represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A plain file backed by an identity.
    File,
    /// A directory.
    Directory,
    /// A collection (a named set of other entries).
    Collection,
    /// A member of a container archive, stored inside another identity.
    ArchiveMember,
}

impl EntryKind {
    /// Single-character database encoding.
    pub fn as_char(&self) -> char {
        match self {
            Self::File => 'f',
            Self::Directory => 'd',
            Self::Collection => 'c',
            Self::ArchiveMember => 'm',
        }
    }

    /// Decode the single-character database form.
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            'f' => Ok(Self::File),
            'd' => Ok(Self::Directory),
            'c' => Ok(Self::Collection),
            'm' => Ok(Self::ArchiveMember),
            other => Err(Error::InvalidPath(format!("unknown entry kind: {other:?}"))),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// The view shared by namespace entries and identities for authorization
/// decisions: who owns it, which group it belongs to, and its permission bits.
pub trait CatalogEntity {
    fn owner(&self) -> &str;
    fn group(&self) -> &str;
    fn permissions(&self) -> Permissions;
}
