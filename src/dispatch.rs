//! Operation dispatcher
//!
//! One method per filesystem operation, all routed through the shared
//! resolver and directory index. Data-plane calls (attributes, I/O, statfs,
//! xattrs) only resolve; namespace-shape-changing calls (mknod, mkdir,
//! unlink, rmdir, symlink, rename, link) also keep the index in step with
//! the backing store: creates insert first and roll back if the backing call
//! fails, deletes remove after the backing call succeeds, renames apply the
//! index move atomically after the backing rename.
//!
//! Open handles live in a table keyed by a monotonically increasing id; an
//! entry is dropped on release/releasedir no matter how the call path exits,
//! so descriptors cannot leak past their release.

use crate::backing::{self, TimeRef};
use crate::error::{FsError, FsResult};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::index::{DirectoryIndex, INDEX_DIR_NAME};
use crate::resolver::{split_virtual, Resolver};
use nix::sys::statvfs::Statvfs;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::{File, Metadata};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_PATH: usize = 4096;
const MAX_NAME: usize = 255;

/// One row of a directory listing snapshot.
#[derive(Debug, Clone)]
pub struct DirListEntry {
    pub key: Fingerprint,
    pub name: String,
}

#[derive(Debug)]
enum Handle {
    File(Arc<File>),
    Dir(Arc<Vec<DirListEntry>>),
}

#[derive(Debug)]
pub struct Dispatcher {
    resolver: Resolver,
    index: DirectoryIndex,
    handles: RwLock<HashMap<u64, Handle>>,
    next_handle: AtomicU64,
}

impl Dispatcher {
    /// Open the driver over a backing directory: resolver, index (root
    /// marker included), and the lost-index mount check, all before any
    /// operation is served.
    pub fn new(backing_root: PathBuf) -> FsResult<Self> {
        let resolver = Resolver::new(backing_root);
        let index = DirectoryIndex::open(&resolver.backing_root().join(INDEX_DIR_NAME))?;
        index.verify_backing(resolver.backing_root())?;
        Ok(Dispatcher {
            resolver,
            index,
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn index(&self) -> &DirectoryIndex {
        &self.index
    }

    fn finish<T>(&self, op: &'static str, path: &str, result: FsResult<T>) -> FsResult<T> {
        match &result {
            Ok(_) => debug!(op, path, result = 0),
            Err(err) => debug!(op, path, errno = err.errno(), error = %err),
        }
        result
    }

    fn check_path(path: &str) -> FsResult<()> {
        if !path.starts_with('/') {
            return Err(FsError::InvalidArgument("path must be absolute".into()));
        }
        if path.len() > MAX_PATH {
            return Err(FsError::InvalidArgument("path too long".into()));
        }
        Ok(())
    }

    /// Parent key and final name of a path that must not be the root.
    fn split(path: &str) -> FsResult<(Fingerprint, &str)> {
        Self::check_path(path)?;
        let (parent, name) = split_virtual(path)
            .ok_or_else(|| FsError::InvalidArgument("operation not valid on the root".into()))?;
        if name.is_empty() || name.len() > MAX_NAME {
            return Err(FsError::InvalidArgument("bad entry name".into()));
        }
        Ok((fingerprint(parent.as_bytes()), name))
    }

    fn store_handle(&self, handle: Handle) -> u64 {
        let fh = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handles.write().insert(fh, handle);
        fh
    }

    fn file_handle(&self, fh: u64) -> FsResult<Arc<File>> {
        match self.handles.read().get(&fh) {
            Some(Handle::File(file)) => Ok(Arc::clone(file)),
            _ => Err(FsError::from_errno(libc::EBADF)),
        }
    }

    fn dir_handle(&self, fh: u64) -> FsResult<Arc<Vec<DirListEntry>>> {
        match self.handles.read().get(&fh) {
            Some(Handle::Dir(listing)) => Ok(Arc::clone(listing)),
            _ => Err(FsError::from_errno(libc::EBADF)),
        }
    }

    // -- attribute operations ------------------------------------------------

    pub fn getattr(&self, path: &str) -> FsResult<Metadata> {
        self.finish("getattr", path, self.getattr_impl(path))
    }

    fn getattr_impl(&self, path: &str) -> FsResult<Metadata> {
        Self::check_path(path)?;
        backing::lstat(&self.resolver.resolve(path))
    }

    pub fn fgetattr(&self, path: &str, fh: u64) -> FsResult<Metadata> {
        self.finish("fgetattr", path, self.fgetattr_impl(path, fh))
    }

    fn fgetattr_impl(&self, path: &str, fh: u64) -> FsResult<Metadata> {
        if path == "/" {
            return self.getattr_impl(path);
        }
        Ok(self.file_handle(fh)?.metadata()?)
    }

    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.finish("chmod", path, self.data_plane(path, |loc| backing::chmod(&loc, mode)))
    }

    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.finish(
            "chown",
            path,
            self.data_plane(path, |loc| backing::chown_path(&loc, uid, gid)),
        )
    }

    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        self.finish(
            "truncate",
            path,
            self.data_plane(path, |loc| backing::truncate_path(&loc, size)),
        )
    }

    pub fn ftruncate(&self, path: &str, fh: u64, size: u64) -> FsResult<()> {
        let result = self
            .file_handle(fh)
            .and_then(|file| Ok(file.set_len(size)?));
        self.finish("ftruncate", path, result)
    }

    pub fn utimens(&self, path: &str, atime: TimeRef, mtime: TimeRef) -> FsResult<()> {
        self.finish(
            "utimens",
            path,
            self.data_plane(path, |loc| backing::utimens(&loc, atime, mtime)),
        )
    }

    fn data_plane<T>(&self, path: &str, op: impl FnOnce(PathBuf) -> FsResult<T>) -> FsResult<T> {
        Self::check_path(path)?;
        op(self.resolver.resolve(path))
    }

    // -- link management -----------------------------------------------------

    pub fn readlink(&self, path: &str) -> FsResult<OsString> {
        self.finish(
            "readlink",
            path,
            self.data_plane(path, |loc| backing::read_link(&loc)),
        )
    }

    pub fn mknod(&self, path: &str, mode: u32, rdev: u64) -> FsResult<()> {
        self.finish(
            "mknod",
            path,
            self.create_entry(path, |loc| backing::create_node(&loc, mode, rdev)),
        )
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.finish(
            "mkdir",
            path,
            self.create_entry(path, |loc| backing::mkdir(&loc, mode)),
        )
    }

    pub fn symlink(&self, target: &str, link_path: &str) -> FsResult<()> {
        self.finish(
            "symlink",
            link_path,
            self.create_entry(link_path, |loc| backing::symlink(target, &loc)),
        )
    }

    pub fn link(&self, existing: &str, new_path: &str) -> FsResult<()> {
        let result = (|| {
            Self::check_path(existing)?;
            let source = self.resolver.resolve(existing);
            self.create_entry(new_path, |loc| backing::hard_link(&source, &loc))
        })();
        self.finish("link", new_path, result)
    }

    /// Shared create path: index insert first (catching key collisions
    /// before disk is touched), backing call second, index rollback if the
    /// backing call fails.
    fn create_entry(&self, path: &str, op: impl FnOnce(PathBuf) -> FsResult<()>) -> FsResult<()> {
        let (parent, name) = Self::split(path)?;
        let key = fingerprint(path.as_bytes());
        self.index.insert(parent, name, key)?;
        if let Err(err) = op(self.resolver.resolve_key(key)) {
            if let Err(rollback) = self.index.remove(key) {
                warn!(path, error = %rollback, "index rollback failed after create error");
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        self.finish("unlink", path, self.unlink_impl(path))
    }

    fn unlink_impl(&self, path: &str) -> FsResult<()> {
        let (_parent, _name) = Self::split(path)?;
        let key = fingerprint(path.as_bytes());
        backing::unlink(&self.resolver.resolve_key(key))?;
        if let Err(err) = self.index.remove(key) {
            // The object is gone either way; a missing entry is an index
            // invariant break worth a record, not a failed unlink.
            warn!(path, error = %err, "unlinked object had no index entry");
        }
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        self.finish("rmdir", path, self.rmdir_impl(path))
    }

    fn rmdir_impl(&self, path: &str) -> FsResult<()> {
        let (_parent, _name) = Self::split(path)?;
        let key = fingerprint(path.as_bytes());
        // Hierarchy lives in the index, not in the hashed directory object,
        // so emptiness is an index question.
        if !self.index.list_children(key)?.is_empty() {
            return Err(FsError::NotEmpty);
        }
        backing::rmdir(&self.resolver.resolve_key(key))?;
        if let Err(err) = self.index.remove(key) {
            warn!(path, error = %err, "removed directory had no index entry");
        }
        Ok(())
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        self.finish("rename", old_path, self.rename_impl(old_path, new_path))
    }

    fn rename_impl(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        Self::split(old_path)?;
        Self::split(new_path)?;
        // A live target may be replaced, but never a directory that still
        // has children; the backing store cannot see those, so the check is
        // ours to make.
        if let Ok(children) = self.index.list_children(fingerprint(new_path.as_bytes())) {
            if !children.is_empty() {
                return Err(FsError::NotEmpty);
            }
        }
        self.rename_tree(old_path, new_path)
    }

    /// Keys are whole-path fingerprints, so renaming a directory re-keys
    /// everything beneath it: every descendant's virtual path changed, and
    /// with it the hashed location of its object. Children are captured
    /// before the parent entry moves, then renamed depth-first under their
    /// new paths.
    fn rename_tree(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        let (new_parent, new_name) = Self::split(new_path)?;
        let old_key = fingerprint(old_path.as_bytes());
        let new_key = fingerprint(new_path.as_bytes());
        let children = self.index.list_children(old_key).unwrap_or_default();
        backing::rename(
            &self.resolver.resolve_key(old_key),
            &self.resolver.resolve_key(new_key),
        )?;
        self.index.rename(old_key, new_parent, new_name, new_key)?;
        for (_child_key, name) in children {
            let old_child = crate::resolver::join_virtual(old_path, &name);
            let new_child = crate::resolver::join_virtual(new_path, &name);
            self.rename_tree(&old_child, &new_child)?;
        }
        Ok(())
    }

    // -- file I/O ------------------------------------------------------------

    pub fn open(&self, path: &str, flags: i32) -> FsResult<u64> {
        self.finish("open", path, self.open_impl(path, flags))
    }

    fn open_impl(&self, path: &str, flags: i32) -> FsResult<u64> {
        Self::check_path(path)?;
        let file = backing::open(&self.resolver.resolve(path), flags)?;
        Ok(self.store_handle(Handle::File(Arc::new(file))))
    }

    pub fn read(&self, fh: u64, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let file = self.file_handle(fh)?;
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        let file = self.file_handle(fh)?;
        file.write_all_at(data, offset)?;
        Ok(data.len())
    }

    pub fn flush(&self, fh: u64) -> FsResult<()> {
        // Nothing buffered on our side; just validate the handle.
        self.file_handle(fh).map(|_| ())
    }

    pub fn release(&self, fh: u64) -> FsResult<()> {
        self.handles.write().remove(&fh);
        Ok(())
    }

    pub fn fsync(&self, fh: u64, datasync: bool) -> FsResult<()> {
        let file = self.file_handle(fh)?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    // -- directory operations ------------------------------------------------

    pub fn opendir(&self, path: &str) -> FsResult<u64> {
        self.finish("opendir", path, self.opendir_impl(path))
    }

    fn opendir_impl(&self, path: &str) -> FsResult<u64> {
        Self::check_path(path)?;
        let meta = backing::lstat(&self.resolver.resolve(path))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let key = fingerprint(path.as_bytes());
        let listing: Vec<DirListEntry> = self
            .index
            .list_children(key)?
            .into_iter()
            .map(|(key, name)| DirListEntry { key, name })
            .collect();
        Ok(self.store_handle(Handle::Dir(Arc::new(listing))))
    }

    /// The snapshot taken at opendir; one stream stays internally
    /// consistent no matter what mutates underneath it.
    pub fn readdir(&self, fh: u64) -> FsResult<Arc<Vec<DirListEntry>>> {
        self.dir_handle(fh)
    }

    pub fn releasedir(&self, fh: u64) -> FsResult<()> {
        self.handles.write().remove(&fh);
        Ok(())
    }

    pub fn fsyncdir(&self, fh: u64, _datasync: bool) -> FsResult<()> {
        self.dir_handle(fh).map(|_| ())
    }

    // -- filesystem-level queries -------------------------------------------

    pub fn statfs(&self, path: &str) -> FsResult<Statvfs> {
        self.finish(
            "statfs",
            path,
            self.data_plane(path, |loc| backing::statfs(&loc)),
        )
    }

    pub fn access(&self, path: &str, mask: i32) -> FsResult<()> {
        self.finish(
            "access",
            path,
            self.data_plane(path, |loc| backing::check_access(&loc, mask)),
        )
    }

    // -- extended attributes -------------------------------------------------
    //
    // Addressed like every other data-plane call: through the fingerprint of
    // the primary path.

    pub fn setxattr(&self, path: &str, name: &OsStr, value: &[u8], flags: i32) -> FsResult<()> {
        self.finish(
            "setxattr",
            path,
            self.data_plane(path, |loc| backing::set_xattr(&loc, name, value, flags)),
        )
    }

    pub fn getxattr(&self, path: &str, name: &OsStr) -> FsResult<Vec<u8>> {
        self.finish(
            "getxattr",
            path,
            self.data_plane(path, |loc| backing::get_xattr(&loc, name)),
        )
    }

    pub fn listxattr(&self, path: &str) -> FsResult<Vec<u8>> {
        self.finish(
            "listxattr",
            path,
            self.data_plane(path, |loc| backing::list_xattr(&loc)),
        )
    }

    pub fn removexattr(&self, path: &str, name: &OsStr) -> FsResult<()> {
        self.finish(
            "removexattr",
            path,
            self.data_plane(path, |loc| backing::remove_xattr(&loc, name)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dispatcher() -> (TempDir, Dispatcher) {
        let dir = TempDir::new().unwrap();
        let dispatcher = Dispatcher::new(dir.path().to_path_buf()).unwrap();
        (dir, dispatcher)
    }

    fn names(listing: &[DirListEntry]) -> Vec<&str> {
        listing.iter().map(|e| e.name.as_str()).collect()
    }

    fn read_dir_names(fs: &Dispatcher, path: &str) -> Vec<String> {
        let fh = fs.opendir(path).unwrap();
        let listing = fs.readdir(fh).unwrap();
        let out = listing.iter().map(|e| e.name.clone()).collect();
        fs.releasedir(fh).unwrap();
        out
    }

    #[test]
    fn root_getattr_uses_backing_root() {
        let (dir, fs) = dispatcher();
        let meta = fs.getattr("/").unwrap();
        assert!(meta.is_dir());
        // The hashed location for "/" must not exist; only the root
        // short-circuit makes "/" resolvable.
        assert!(!dir.path().join(Fingerprint::root().to_hex()).exists());
    }

    #[test]
    fn mkdir_mknod_readdir_unlink_rmdir_scenario() {
        let (_dir, fs) = dispatcher();

        fs.mkdir("/a", 0o755).unwrap();
        fs.mknod("/a/b.txt", libc::S_IFREG | 0o644, 0).unwrap();
        assert_eq!(read_dir_names(&fs, "/a"), vec!["b.txt".to_string()]);

        fs.unlink("/a/b.txt").unwrap();
        assert!(read_dir_names(&fs, "/a").is_empty());

        fs.rmdir("/a").unwrap();
        assert!(read_dir_names(&fs, "/").is_empty());
        assert_eq!(fs.getattr("/a").unwrap_err().errno(), libc::ENOENT);
    }

    #[test]
    fn create_collision_reports_already_exists() {
        let (_dir, fs) = dispatcher();
        fs.mknod("/f", libc::S_IFREG | 0o644, 0).unwrap();
        let err = fs.mknod("/f", libc::S_IFREG | 0o644, 0).unwrap_err();
        assert_eq!(err.errno(), libc::EEXIST);
    }

    #[test]
    fn create_under_missing_parent_fails_and_leaves_no_entry() {
        let (_dir, fs) = dispatcher();
        let err = fs.mknod("/no-dir/f", libc::S_IFREG | 0o644, 0).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
        assert!(!fs.index().contains(fingerprint(b"/no-dir/f")).unwrap());
    }

    #[test]
    fn open_write_read_round_trip() {
        let (_dir, fs) = dispatcher();
        fs.mknod("/data.bin", libc::S_IFREG | 0o644, 0).unwrap();

        let fh = fs.open("/data.bin", libc::O_RDWR).unwrap();
        assert_eq!(fs.write(fh, 0, b"hello kvfs").unwrap(), 10);
        assert_eq!(fs.read(fh, 6, 16).unwrap(), b"kvfs");
        fs.fsync(fh, false).unwrap();
        fs.flush(fh).unwrap();
        fs.release(fh).unwrap();

        // Handle is gone after release, on every path.
        assert_eq!(fs.read(fh, 0, 1).unwrap_err().errno(), libc::EBADF);
    }

    #[test]
    fn fgetattr_tracks_handle_and_root_falls_back() {
        let (_dir, fs) = dispatcher();
        fs.mknod("/f", libc::S_IFREG | 0o644, 0).unwrap();
        let fh = fs.open("/f", libc::O_RDWR).unwrap();
        fs.write(fh, 0, b"xyz").unwrap();
        assert_eq!(fs.fgetattr("/f", fh).unwrap().len(), 3);
        assert!(fs.fgetattr("/", 0).unwrap().is_dir());
        fs.release(fh).unwrap();
    }

    #[test]
    fn rename_moves_listing_entry_atomically() {
        let (_dir, fs) = dispatcher();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mknod("/a/foo", libc::S_IFREG | 0o644, 0).unwrap();
        fs.rename("/a/foo", "/a/bar").unwrap();

        assert_eq!(read_dir_names(&fs, "/a"), vec!["bar".to_string()]);
        assert_eq!(fs.getattr("/a/foo").unwrap_err().errno(), libc::ENOENT);
        assert!(fs.getattr("/a/bar").unwrap().is_file());
        assert!(!fs.index().contains(fingerprint(b"/a/foo")).unwrap());
    }

    #[test]
    fn rename_across_directories_moves_entry() {
        let (_dir, fs) = dispatcher();
        fs.mkdir("/src", 0o755).unwrap();
        fs.mkdir("/dst", 0o755).unwrap();
        fs.mknod("/src/f", libc::S_IFREG | 0o644, 0).unwrap();
        fs.rename("/src/f", "/dst/f").unwrap();
        assert!(read_dir_names(&fs, "/src").is_empty());
        assert_eq!(read_dir_names(&fs, "/dst"), vec!["f".to_string()]);
    }

    #[test]
    fn renaming_a_directory_rekeys_its_subtree() {
        let (_dir, fs) = dispatcher();
        fs.mkdir("/old", 0o755).unwrap();
        fs.mkdir("/old/sub", 0o755).unwrap();
        fs.mknod("/old/sub/f", libc::S_IFREG | 0o644, 0).unwrap();
        let fh = fs.open("/old/sub/f", libc::O_WRONLY).unwrap();
        fs.write(fh, 0, b"moved").unwrap();
        fs.release(fh).unwrap();

        fs.rename("/old", "/new").unwrap();

        assert_eq!(read_dir_names(&fs, "/new"), vec!["sub".to_string()]);
        assert_eq!(read_dir_names(&fs, "/new/sub"), vec!["f".to_string()]);
        let fh = fs.open("/new/sub/f", libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(fh, 0, 16).unwrap(), b"moved");
        fs.release(fh).unwrap();

        assert_eq!(fs.getattr("/old").unwrap_err().errno(), libc::ENOENT);
        assert_eq!(fs.getattr("/old/sub/f").unwrap_err().errno(), libc::ENOENT);
        assert!(!fs.index().contains(fingerprint(b"/old/sub")).unwrap());
    }

    #[test]
    fn rmdir_refuses_non_empty_directory() {
        let (_dir, fs) = dispatcher();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mknod("/a/f", libc::S_IFREG | 0o644, 0).unwrap();
        assert_eq!(fs.rmdir("/a").unwrap_err().errno(), libc::ENOTEMPTY);
        fs.unlink("/a/f").unwrap();
        fs.rmdir("/a").unwrap();
    }

    #[test]
    fn symlink_readlink_round_trip() {
        let (_dir, fs) = dispatcher();
        fs.mkdir("/a", 0o755).unwrap();
        fs.symlink("/a", "/link-to-a").unwrap();
        assert_eq!(fs.readlink("/link-to-a").unwrap(), OsString::from("/a"));
        let listing = read_dir_names(&fs, "/");
        assert!(listing.contains(&"a".to_string()));
        assert!(listing.contains(&"link-to-a".to_string()));
    }

    #[test]
    fn link_creates_second_name_for_same_object() {
        let (_dir, fs) = dispatcher();
        fs.mknod("/orig", libc::S_IFREG | 0o644, 0).unwrap();
        let fh = fs.open("/orig", libc::O_WRONLY).unwrap();
        fs.write(fh, 0, b"shared").unwrap();
        fs.release(fh).unwrap();

        fs.link("/orig", "/alias").unwrap();
        let fh = fs.open("/alias", libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(fh, 0, 16).unwrap(), b"shared");
        fs.release(fh).unwrap();
        assert_eq!(fs.getattr("/orig").unwrap().len(), 6);
    }

    #[test]
    fn opendir_on_file_is_enotdir() {
        let (_dir, fs) = dispatcher();
        fs.mknod("/f", libc::S_IFREG | 0o644, 0).unwrap();
        assert_eq!(fs.opendir("/f").unwrap_err().errno(), libc::ENOTDIR);
    }

    #[test]
    fn readdir_snapshot_is_stable_within_one_listing() {
        let (_dir, fs) = dispatcher();
        fs.mknod("/one", libc::S_IFREG | 0o644, 0).unwrap();
        let fh = fs.opendir("/").unwrap();
        fs.mknod("/two", libc::S_IFREG | 0o644, 0).unwrap();
        assert_eq!(names(&fs.readdir(fh).unwrap()), vec!["one"]);
        fs.releasedir(fh).unwrap();
        assert_eq!(read_dir_names(&fs, "/").len(), 2);
    }

    #[test]
    fn statfs_and_access_resolve_root_directly() {
        let (_dir, fs) = dispatcher();
        let stat = fs.statfs("/").unwrap();
        assert!(stat.blocks() > 0);
        fs.access("/", libc::R_OK | libc::X_OK).unwrap();
    }

    #[test]
    fn xattrs_follow_the_hashed_object() {
        let (dir, fs) = dispatcher();
        fs.mknod("/f", libc::S_IFREG | 0o644, 0).unwrap();
        let name = OsStr::new("user.kvfs.test");
        match fs.setxattr("/f", name, b"v1", 0) {
            Ok(()) => {
                assert_eq!(fs.getxattr("/f", name).unwrap(), b"v1");
                let listed = fs.listxattr("/f").unwrap();
                assert!(listed
                    .split(|b| *b == 0)
                    .any(|n| n == name.as_encoded_bytes()));
                fs.removexattr("/f", name).unwrap();
                assert_ne!(fs.getxattr("/f", name).unwrap_err().errno(), 0);
                // The attribute lived on the hashed object, not a literal path.
                assert!(!dir.path().join("f").exists());
            }
            // Some test filesystems (tmpfs without user_xattr) refuse
            // user.* attributes; pass-through of that refusal is the
            // contract, so nothing more to assert.
            Err(err) => assert_ne!(err.errno(), 0),
        }
    }

    #[test]
    fn truncate_and_chmod_reach_the_object() {
        let (_dir, fs) = dispatcher();
        fs.mknod("/f", libc::S_IFREG | 0o644, 0).unwrap();
        let fh = fs.open("/f", libc::O_WRONLY).unwrap();
        fs.write(fh, 0, b"0123456789").unwrap();
        fs.release(fh).unwrap();

        fs.truncate("/f", 4).unwrap();
        assert_eq!(fs.getattr("/f").unwrap().len(), 4);

        fs.chmod("/f", 0o600).unwrap();
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(fs.getattr("/f").unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn utimens_sets_mtime() {
        let (_dir, fs) = dispatcher();
        fs.mknod("/f", libc::S_IFREG | 0o644, 0).unwrap();
        let stamp = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        fs.utimens("/f", TimeRef::Omit, TimeRef::Stamp(stamp)).unwrap();
        assert_eq!(fs.getattr("/f").unwrap().modified().unwrap(), stamp);
    }

    #[test]
    fn relative_path_is_invalid_argument() {
        let (_dir, fs) = dispatcher();
        assert_eq!(fs.getattr("oops").unwrap_err().errno(), libc::EINVAL);
        assert_eq!(fs.mkdir("oops", 0o755).unwrap_err().errno(), libc::EINVAL);
    }

    #[test]
    fn concurrent_creates_under_one_parent() {
        use std::sync::Arc as StdArc;
        let (_dir, fs) = dispatcher();
        let fs = StdArc::new(fs);
        let mut handles = vec![];
        for i in 0..8 {
            let fs = StdArc::clone(&fs);
            handles.push(std::thread::spawn(move || {
                fs.mknod(&format!("/file{}", i), libc::S_IFREG | 0o644, 0).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(read_dir_names(&fs, "/").len(), 8);
    }

    #[test]
    fn remount_sees_previous_namespace() {
        let dir = TempDir::new().unwrap();
        {
            let fs = Dispatcher::new(dir.path().to_path_buf()).unwrap();
            fs.mkdir("/kept", 0o755).unwrap();
            fs.index().flush().unwrap();
        }
        let fs = Dispatcher::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(read_dir_names(&fs, "/"), vec!["kept".to_string()]);
    }
}
