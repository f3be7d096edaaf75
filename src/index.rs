//! Directory Index
//!
//! The flat, hash-addressed layout discards hierarchy: the backing store
//! only knows opaque keys. This module owns the durable reverse mapping from
//! key to (original name, parent key) so readdir can produce human-readable
//! listings and rmdir can tell whether a directory is empty.
//!
//! Persistence is a sled database stored beside the hashed objects. Two
//! trees: `entries` maps key bytes to a bincode-encoded [`DirectoryEntry`];
//! `children` maps `parent bytes ++ child bytes` to the child's name, so one
//! prefix scan yields a directory listing. A `parking_lot::RwLock`
//! serializes mutations; listings take the read side.

use crate::error::{FsError, FsResult};
use crate::fingerprint::{Fingerprint, KEY_LEN};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Directory name of the index database inside the backing root.
pub const INDEX_DIR_NAME: &str = ".kvfs.index";

const ENTRIES_TREE: &str = "entries";
const CHILDREN_TREE: &str = "children";

/// One live namespace entry: a key, the name it was created under, and the
/// key of its parent directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub key: Fingerprint,
    pub name: String,
    pub parent: Fingerprint,
}

#[derive(Debug)]
pub struct DirectoryIndex {
    db: sled::Db,
    entries: sled::Tree,
    children: sled::Tree,
    lock: RwLock<()>,
}

fn child_row_key(parent: &Fingerprint, child: &Fingerprint) -> [u8; KEY_LEN * 2] {
    let mut row = [0u8; KEY_LEN * 2];
    row[..KEY_LEN].copy_from_slice(parent.as_bytes());
    row[KEY_LEN..].copy_from_slice(child.as_bytes());
    row
}

fn decode_entry(bytes: &[u8]) -> FsResult<DirectoryEntry> {
    bincode::deserialize(bytes)
        .map_err(|e| FsError::Internal(format!("corrupt index entry: {}", e)))
}

fn encode_entry(entry: &DirectoryEntry) -> FsResult<Vec<u8>> {
    bincode::serialize(entry)
        .map_err(|e| FsError::Internal(format!("unencodable index entry: {}", e)))
}

impl DirectoryIndex {
    /// Open (or create) the index database at `path` and install the root
    /// marker if it is not already present. The marker is written exactly
    /// once, here, before any operation is served; normal insert/remove
    /// traffic never touches it.
    pub fn open(path: &Path) -> FsResult<Self> {
        let db = sled::open(path)?;
        let entries = db.open_tree(ENTRIES_TREE)?;
        let children = db.open_tree(CHILDREN_TREE)?;

        let root = Fingerprint::root();
        if entries.get(root.as_bytes())?.is_none() {
            let marker = DirectoryEntry {
                key: root,
                name: "/".to_string(),
                parent: root,
            };
            entries.insert(root.as_bytes(), encode_entry(&marker)?)?;
        }

        Ok(DirectoryIndex {
            db,
            entries,
            children,
            lock: RwLock::new(()),
        })
    }

    /// Refuse to serve an empty index over a backing store that already
    /// holds hashed objects: that combination means the index was lost, and
    /// silently starting fresh would strand every existing object behind an
    /// unlistable key.
    pub fn verify_backing(&self, backing_root: &Path) -> FsResult<()> {
        if !self.is_empty() {
            return Ok(());
        }
        for entry in std::fs::read_dir(backing_root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.len() == KEY_LEN * 2 && name.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(FsError::Internal(format!(
                    "backing store {} holds hashed objects but the index is empty; \
                     refusing to mount over a lost index",
                    backing_root.display()
                )));
            }
        }
        Ok(())
    }

    /// Record a new entry under `parent`. Fails with `AlreadyExists` if the
    /// key is already live, and `NotFound` if the parent is not.
    pub fn insert(&self, parent: Fingerprint, name: &str, key: Fingerprint) -> FsResult<()> {
        let _guard = self.lock.write();
        if key.is_root() {
            return Err(FsError::InvalidArgument("cannot insert the root".into()));
        }
        if self.entries.get(parent.as_bytes())?.is_none() {
            return Err(FsError::NotFound);
        }
        if self.entries.get(key.as_bytes())?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let entry = DirectoryEntry {
            key,
            name: name.to_string(),
            parent,
        };
        self.entries.insert(key.as_bytes(), encode_entry(&entry)?)?;
        self.children
            .insert(child_row_key(&parent, &key), name.as_bytes())?;
        Ok(())
    }

    /// Drop a live entry. The root marker is not removable.
    pub fn remove(&self, key: Fingerprint) -> FsResult<()> {
        let _guard = self.lock.write();
        if key.is_root() {
            return Err(FsError::InvalidArgument("cannot remove the root".into()));
        }
        let raw = self.entries.get(key.as_bytes())?.ok_or(FsError::NotFound)?;
        let entry = decode_entry(&raw)?;
        self.entries.remove(key.as_bytes())?;
        self.children.remove(child_row_key(&entry.parent, &key))?;
        Ok(())
    }

    /// Move an entry to a new parent and name under a single write lock, so
    /// no reader ever observes it under neither name or both. A live entry
    /// at the destination key is replaced, matching POSIX rename.
    pub fn rename(
        &self,
        old_key: Fingerprint,
        new_parent: Fingerprint,
        new_name: &str,
        new_key: Fingerprint,
    ) -> FsResult<()> {
        let _guard = self.lock.write();
        if old_key.is_root() || new_key.is_root() {
            return Err(FsError::InvalidArgument("cannot rename the root".into()));
        }
        let raw = self
            .entries
            .get(old_key.as_bytes())?
            .ok_or(FsError::NotFound)?;
        let old_entry = decode_entry(&raw)?;
        if self.entries.get(new_parent.as_bytes())?.is_none() {
            return Err(FsError::NotFound);
        }
        if new_key != old_key {
            if let Some(raw) = self.entries.get(new_key.as_bytes())? {
                let target = decode_entry(&raw)?;
                self.entries.remove(new_key.as_bytes())?;
                self.children
                    .remove(child_row_key(&target.parent, &new_key))?;
            }
        }
        self.entries.remove(old_key.as_bytes())?;
        self.children
            .remove(child_row_key(&old_entry.parent, &old_key))?;
        let entry = DirectoryEntry {
            key: new_key,
            name: new_name.to_string(),
            parent: new_parent,
        };
        self.entries.insert(new_key.as_bytes(), encode_entry(&entry)?)?;
        self.children
            .insert(child_row_key(&new_parent, &new_key), new_name.as_bytes())?;
        Ok(())
    }

    /// List the live entries under `parent`. Order is the key order of the
    /// children tree: stable within a call, unrelated to insertion order.
    pub fn list_children(&self, parent: Fingerprint) -> FsResult<Vec<(Fingerprint, String)>> {
        let _guard = self.lock.read();
        if self.entries.get(parent.as_bytes())?.is_none() {
            return Err(FsError::NotFound);
        }
        let mut out = Vec::new();
        for row in self.children.scan_prefix(parent.as_bytes()) {
            let (row_key, name) = row?;
            let child = Fingerprint::from_bytes(&row_key[KEY_LEN..])
                .ok_or_else(|| FsError::Internal("malformed children row".into()))?;
            let name = String::from_utf8(name.to_vec())
                .map_err(|_| FsError::Internal("non-utf8 name in index".into()))?;
            out.push((child, name));
        }
        Ok(out)
    }

    pub fn get(&self, key: Fingerprint) -> FsResult<Option<DirectoryEntry>> {
        let _guard = self.lock.read();
        match self.entries.get(key.as_bytes())? {
            Some(raw) => Ok(Some(decode_entry(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: Fingerprint) -> FsResult<bool> {
        let _guard = self.lock.read();
        Ok(self.entries.get(key.as_bytes())?.is_some())
    }

    /// True when no entry beyond the root marker is live.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn flush(&self) -> FsResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
