//! Path resolution
//!
//! Translates a virtual path into the backing-store location that holds its
//! object. The namespace root is the one path that cannot live under its own
//! hash: the backing directory *is* the root, so resolving "/" (or anything
//! that fingerprints to the root key) short-circuits to the backing root
//! itself. Resolution is pure with respect to existence: it never consults
//! the index or the disk, and nonexistence surfaces later from the backing
//! store's own error path.

use crate::fingerprint::{fingerprint, Fingerprint};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Resolver {
    backing_root: PathBuf,
}

impl Resolver {
    pub fn new(backing_root: PathBuf) -> Self {
        Resolver { backing_root }
    }

    pub fn backing_root(&self) -> &Path {
        &self.backing_root
    }

    /// Resolve a virtual path to its backing location.
    pub fn resolve(&self, virtual_path: &str) -> PathBuf {
        self.resolve_key(fingerprint(virtual_path.as_bytes()))
    }

    /// Resolve an already-computed key to its backing location.
    pub fn resolve_key(&self, key: Fingerprint) -> PathBuf {
        if key.is_root() {
            self.backing_root.clone()
        } else {
            self.backing_root.join(key.to_hex())
        }
    }
}

/// Join a child name onto a virtual directory path.
///
/// The root is spelled "/" so joining under it must not double the
/// separator: `join_virtual("/", "a")` is "/a", `join_virtual("/a", "b")`
/// is "/a/b".
pub fn join_virtual(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Split a virtual path into its parent directory and final name.
/// Returns `None` for the root, which has neither.
pub fn split_virtual(path: &str) -> Option<(&str, &str)> {
    if path == "/" {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver::new(PathBuf::from("/data"))
    }

    #[test]
    fn root_resolves_to_backing_root_itself() {
        assert_eq!(resolver().resolve("/"), PathBuf::from("/data"));
    }

    #[test]
    fn non_root_resolves_under_hashed_name() {
        let expected = PathBuf::from("/data").join(fingerprint(b"/a/b.txt").to_hex());
        assert_eq!(resolver().resolve("/a/b.txt"), expected);
    }

    #[test]
    fn resolution_is_deterministic_and_existence_free() {
        // Same location whether or not anything lives there.
        let r = resolver();
        assert_eq!(r.resolve("/ghost"), r.resolve("/ghost"));
    }

    #[test]
    fn resolve_key_matches_resolve() {
        let r = resolver();
        let key = fingerprint(b"/a");
        assert_eq!(r.resolve_key(key), r.resolve("/a"));
        assert_eq!(r.resolve_key(Fingerprint::root()), PathBuf::from("/data"));
    }

    #[test]
    fn join_handles_root_without_doubling_separator() {
        assert_eq!(join_virtual("/", "a"), "/a");
        assert_eq!(join_virtual("/a", "b"), "/a/b");
    }

    #[test]
    fn split_inverts_join() {
        assert_eq!(split_virtual("/a"), Some(("/", "a")));
        assert_eq!(split_virtual("/a/b/c"), Some(("/a/b", "c")));
        assert_eq!(split_virtual("/"), None);
    }
}
