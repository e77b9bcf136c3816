//! Provider-scoped file identifiers
//!
//! Yandex Disk addresses entries by path inside the `app:/` namespace;
//! Google Drive hands out opaque object ids. Both travel through the rest
//! of the crate as one sum type that only the issuing adapter ever
//! inspects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a remote file or folder, scoped to the provider that
/// issued it. Ids from different providers are never interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "provider", content = "value", rename_all = "snake_case")]
pub enum RemoteFileId {
    /// Slash-delimited path under the application sandbox (`app:/…`).
    Path(String),
    /// Opaque Google Drive object id.
    Drive(String),
}

impl RemoteFileId {
    /// Display name of the entry, when the identifier encodes one.
    ///
    /// Opaque Drive ids carry no name; callers get it from metadata.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Path(path) => {
                let tail = path.strip_prefix("app:/")?;
                if tail.is_empty() {
                    None
                } else {
                    tail.rsplit('/').next()
                }
            }
            Self::Drive(_) => None,
        }
    }

    /// Parent of a path-addressed entry. `app:/` has no parent.
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::Path(path) => {
                let tail = path.strip_prefix("app:/")?;
                if tail.is_empty() {
                    return None;
                }
                match tail.rsplit_once('/') {
                    Some((head, _)) => Some(Self::Path(format!("app:/{head}"))),
                    None => Some(Self::Path("app:/".to_string())),
                }
            }
            Self::Drive(_) => None,
        }
    }

    /// Join a child name onto a path-addressed folder.
    pub fn child(&self, name: &str) -> Option<Self> {
        match self {
            Self::Path(path) => {
                let base = path.trim_end_matches('/');
                Some(Self::Path(format!("{base}/{name}")))
            }
            Self::Drive(_) => None,
        }
    }

    /// Whether `self` identifies the same entry as `other` or one of its
    /// ancestors. Segment-aware for paths (`app:/ab` is not an ancestor of
    /// `app:/abc`); plain equality for opaque Drive ids, which encode no
    /// hierarchy.
    pub fn is_same_or_ancestor_of(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Path(a), Self::Path(b)) => {
                if a == b {
                    return true;
                }
                let a = a.trim_end_matches('/');
                b.strip_prefix(a)
                    .is_some_and(|rest| rest.starts_with('/'))
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for RemoteFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{path}"),
            Self::Drive(id) => write!(f, "drive:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_name_and_parent() {
        let id = RemoteFileId::Path("app:/docs/report.txt".to_string());
        assert_eq!(id.name(), Some("report.txt"));
        assert_eq!(
            id.parent(),
            Some(RemoteFileId::Path("app:/docs".to_string()))
        );

        let top = RemoteFileId::Path("app:/report.txt".to_string());
        assert_eq!(top.parent(), Some(RemoteFileId::Path("app:/".to_string())));

        let root = RemoteFileId::Path("app:/".to_string());
        assert_eq!(root.name(), None);
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn ancestry_respects_segment_boundaries() {
        let a = RemoteFileId::Path("app:/ab".to_string());
        let abc = RemoteFileId::Path("app:/abc".to_string());
        let ab_c = RemoteFileId::Path("app:/ab/c".to_string());

        assert!(a.is_same_or_ancestor_of(&ab_c));
        assert!(!a.is_same_or_ancestor_of(&abc));
        assert!(a.is_same_or_ancestor_of(&a));
    }

    #[test]
    fn root_is_ancestor_of_everything_under_it() {
        let root = RemoteFileId::Path("app:/".to_string());
        let nested = RemoteFileId::Path("app:/a/b/c.txt".to_string());
        assert!(root.is_same_or_ancestor_of(&nested));
    }

    #[test]
    fn drive_ids_compare_by_equality_only() {
        let a = RemoteFileId::Drive("abc123".to_string());
        let b = RemoteFileId::Drive("abc123def".to_string());
        assert!(!a.is_same_or_ancestor_of(&b));
        assert!(a.is_same_or_ancestor_of(&a));
    }
}
