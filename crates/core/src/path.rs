//! Logical file names: absolute paths in the catalogue namespace.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An absolute path in the catalogue namespace.
///
/// Canonical form: starts with `/`, no `.`/`..` segments, no doubled or
/// trailing slashes (the root itself is the single exception). Directory
/// semantics are carried by the entry, not by the path string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalPath(String);

impl LogicalPath {
    /// The namespace root, `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and canonicalize an absolute path.
    pub fn parse(s: &str) -> Result<Self> {
        if !s.starts_with('/') {
            return Err(Error::InvalidPath(format!("not absolute: {s}")));
        }

        let mut segments = Vec::new();
        for segment in s.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(Error::InvalidPath(format!("escapes the root: {s}")));
                    }
                }
                _ => {
                    if segment.contains('\0') {
                        return Err(Error::InvalidPath(format!("NUL in segment: {s}")));
                    }
                    segments.push(segment);
                }
            }
        }

        if segments.is_empty() {
            return Ok(Self::root());
        }

        Ok(Self(format!("/{}", segments.join("/"))))
    }

    /// The canonical string form, without a trailing slash (except the root).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The directory form: canonical path with a trailing `/`.
    ///
    /// Mount-table prefixes are stored and compared in this form.
    pub fn dir_form(&self) -> String {
        if self.0 == "/" {
            self.0.clone()
        } else {
            format!("{}/", self.0)
        }
    }

    /// Whether this is the namespace root.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The last path segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// The parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Append one segment to this path.
    pub fn join(&self, segment: &str) -> Result<Self> {
        if segment.is_empty() || segment.contains('/') {
            return Err(Error::InvalidPath(format!("bad segment: {segment:?}")));
        }
        Self::parse(&format!("{}/{}", self.0, segment))
    }

    /// All ancestors from the root down to (and including) this path.
    pub fn ancestry(&self) -> Vec<Self> {
        let mut chain = vec![self.clone()];
        let mut cursor = self.clone();
        while let Some(parent) = cursor.parent() {
            chain.push(parent.clone());
            cursor = parent;
        }
        chain.reverse();
        chain
    }

    /// Whether `self` lies under `prefix` (or equals it).
    pub fn starts_with(&self, prefix: &LogicalPath) -> bool {
        self.dir_form().starts_with(&prefix.dir_form())
    }

    /// The path relative to a `/`-terminated mount prefix, in the catalogue's
    /// relative-row form (no leading slash, directories keep a trailing one
    /// at the caller's discretion).
    pub fn strip_mount_prefix<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        let d = &self.0;
        if prefix == "/" {
            return Some(&d[1..]);
        }
        let bare = prefix.strip_suffix('/').unwrap_or(prefix);
        if d == bare {
            Some("")
        } else {
            d.strip_prefix(bare)
                .and_then(|rest| rest.strip_prefix('/'))
        }
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalPath({})", self.0)
    }
}

impl std::str::FromStr for LogicalPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonicalizes() {
        assert_eq!(LogicalPath::parse("/a//b/./c/").unwrap().as_str(), "/a/b/c");
        assert_eq!(LogicalPath::parse("/a/b/../c").unwrap().as_str(), "/a/c");
        assert_eq!(LogicalPath::parse("/").unwrap().as_str(), "/");
        assert_eq!(LogicalPath::parse("//").unwrap().as_str(), "/");
    }

    #[test]
    fn parse_rejects_relative_and_escaping() {
        assert!(LogicalPath::parse("a/b").is_err());
        assert!(LogicalPath::parse("/../x").is_err());
    }

    #[test]
    fn parent_and_name() {
        let p = LogicalPath::parse("/grid/data/file.root").unwrap();
        assert_eq!(p.name(), Some("file.root"));
        assert_eq!(p.parent().unwrap().as_str(), "/grid/data");
        assert_eq!(
            LogicalPath::parse("/grid").unwrap().parent().unwrap(),
            LogicalPath::root()
        );
        assert!(LogicalPath::root().parent().is_none());
    }

    #[test]
    fn ancestry_runs_root_first() {
        let p = LogicalPath::parse("/a/b/c").unwrap();
        let chain: Vec<String> = p.ancestry().iter().map(|p| p.to_string()).collect();
        assert_eq!(chain, vec!["/", "/a", "/a/b", "/a/b/c"]);
    }

    #[test]
    fn strip_mount_prefix_forms() {
        let p = LogicalPath::parse("/grid/data/run1/file").unwrap();
        assert_eq!(p.strip_mount_prefix("/grid/data/"), Some("run1/file"));
        assert_eq!(p.strip_mount_prefix("/"), Some("grid/data/run1/file"));
        assert_eq!(p.strip_mount_prefix("/grid/other/"), None);
        let d = LogicalPath::parse("/grid/data").unwrap();
        assert_eq!(d.strip_mount_prefix("/grid/data/"), Some(""));
    }
}
