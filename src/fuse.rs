//! FUSE adapter
//!
//! Bridges the inode-oriented `fuser` callback surface onto the path-based
//! [`Dispatcher`]. The kernel speaks inodes, the driver speaks virtual
//! paths, so the adapter keeps a bidirectional ino <-> path table (root is
//! always ino 1) and translates each callback into the matching dispatcher
//! call, replying with the dispatcher's errno on failure.

use crate::dispatch::Dispatcher;
use crate::error::FsResult;
use crate::resolver::{join_virtual, split_virtual};
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::Metadata;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

pub struct KvfsFuse {
    fs: Dispatcher,
    paths: Mutex<HashMap<u64, String>>,
    inos: Mutex<HashMap<String, u64>>,
    next_ino: AtomicU64,
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

fn kind_of(meta: &Metadata) -> FileType {
    match meta.mode() & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn file_attr(ino: u64, meta: &Metadata) -> FileAttr {
    FileAttr {
        ino,
        size: meta.size(),
        blocks: meta.blocks(),
        atime: system_time(meta.atime(), meta.atime_nsec()),
        mtime: system_time(meta.mtime(), meta.mtime_nsec()),
        ctime: system_time(meta.ctime(), meta.ctime_nsec()),
        crtime: UNIX_EPOCH,
        kind: kind_of(meta),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

fn time_ref(t: Option<TimeOrNow>) -> crate::backing::TimeRef {
    match t {
        None => crate::backing::TimeRef::Omit,
        Some(TimeOrNow::Now) => crate::backing::TimeRef::Now,
        Some(TimeOrNow::SpecificTime(at)) => crate::backing::TimeRef::Stamp(at),
    }
}

impl KvfsFuse {
    pub fn new(fs: Dispatcher) -> Self {
        let mut paths = HashMap::new();
        let mut inos = HashMap::new();
        paths.insert(ROOT_INO, "/".to_string());
        inos.insert("/".to_string(), ROOT_INO);
        KvfsFuse {
            fs,
            paths: Mutex::new(paths),
            inos: Mutex::new(inos),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    fn path_for(&self, ino: u64) -> Option<String> {
        self.paths.lock().get(&ino).cloned()
    }

    fn ino_for(&self, path: &str) -> u64 {
        if let Some(ino) = self.inos.lock().get(path).copied() {
            return ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().insert(ino, path.to_string());
        self.inos.lock().insert(path.to_string(), ino);
        ino
    }

    fn drop_path(&self, path: &str) {
        if let Some(ino) = self.inos.lock().remove(path) {
            self.paths.lock().remove(&ino);
        }
    }

    fn move_path(&self, from: &str, to: &str) {
        self.drop_path(to);
        let mut inos = self.inos.lock();
        if let Some(ino) = inos.remove(from) {
            self.paths.lock().insert(ino, to.to_string());
            inos.insert(to.to_string(), ino);
        }
    }

    /// Virtual path of `name` under the directory `parent` refers to.
    /// Names are required to be UTF-8; anything else cannot be keyed by the
    /// index and is rejected as invalid.
    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, i32> {
        let parent_path = self.path_for(parent).ok_or(libc::ENOENT)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(join_virtual(&parent_path, name))
    }

    fn attr_of(&self, path: &str) -> FsResult<FileAttr> {
        let meta = self.fs.getattr(path)?;
        Ok(file_attr(self.ino_for(path), &meta))
    }
}

macro_rules! try_reply {
    ($expr:expr, $reply:expr) => {
        match $expr {
            Ok(value) => value,
            Err(errno) => {
                $reply.error(errno);
                return;
            }
        }
    };
}

// Maps an FsResult into a reply error, yielding the Ok value.
macro_rules! try_fs {
    ($expr:expr, $reply:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => {
                $reply.error(err.errno());
                return;
            }
        }
    };
}

impl Filesystem for KvfsFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = try_reply!(self.child_path(parent, name), reply);
        let attr = try_fs!(self.attr_of(&path), reply);
        reply.entry(&TTL, &attr, 0);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        let meta = try_fs!(self.fs.getattr(&path), reply);
        reply.attr(&TTL, &file_attr(ino, &meta));
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        if let Some(mode) = mode {
            try_fs!(self.fs.chmod(&path, mode), reply);
        }
        if uid.is_some() || gid.is_some() {
            try_fs!(self.fs.chown(&path, uid, gid), reply);
        }
        if let Some(size) = size {
            match fh {
                Some(fh) => try_fs!(self.fs.ftruncate(&path, fh, size), reply),
                None => try_fs!(self.fs.truncate(&path, size), reply),
            }
        }
        if atime.is_some() || mtime.is_some() {
            try_fs!(self.fs.utimens(&path, time_ref(atime), time_ref(mtime)), reply);
        }
        let meta = match fh {
            Some(fh) => try_fs!(self.fs.fgetattr(&path, fh), reply),
            None => try_fs!(self.fs.getattr(&path), reply),
        };
        reply.attr(&TTL, &file_attr(ino, &meta));
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        let target = try_fs!(self.fs.readlink(&path), reply);
        reply.data(target.as_bytes());
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = try_reply!(self.child_path(parent, name), reply);
        try_fs!(self.fs.mknod(&path, mode, rdev as u64), reply);
        let attr = try_fs!(self.attr_of(&path), reply);
        reply.entry(&TTL, &attr, 0);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = try_reply!(self.child_path(parent, name), reply);
        try_fs!(self.fs.mkdir(&path, mode), reply);
        let attr = try_fs!(self.attr_of(&path), reply);
        reply.entry(&TTL, &attr, 0);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(self.child_path(parent, name), reply);
        try_fs!(self.fs.unlink(&path), reply);
        self.drop_path(&path);
        reply.ok();
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(self.child_path(parent, name), reply);
        try_fs!(self.fs.rmdir(&path), reply);
        self.drop_path(&path);
        reply.ok();
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = try_reply!(self.child_path(parent, link_name), reply);
        let target = try_reply!(target.to_str().ok_or(libc::EINVAL), reply);
        try_fs!(self.fs.symlink(target, &path), reply);
        let attr = try_fs!(self.attr_of(&path), reply);
        reply.entry(&TTL, &attr, 0);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let old_path = try_reply!(self.child_path(parent, name), reply);
        let new_path = try_reply!(self.child_path(newparent, newname), reply);
        try_fs!(self.fs.rename(&old_path, &new_path), reply);
        self.move_path(&old_path, &new_path);
        reply.ok();
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let existing = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        let path = try_reply!(self.child_path(newparent, newname), reply);
        try_fs!(self.fs.link(&existing, &path), reply);
        let attr = try_fs!(self.attr_of(&path), reply);
        reply.entry(&TTL, &attr, 0);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        let fh = try_fs!(self.fs.open(&path, flags), reply);
        reply.opened(fh, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let data = try_fs!(self.fs.read(fh, offset.max(0) as u64, size as usize), reply);
        reply.data(&data);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let written = try_fs!(self.fs.write(fh, offset.max(0) as u64, data), reply);
        reply.written(written as u32);
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        try_fs!(self.fs.flush(fh), reply);
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let _ = self.fs.release(fh);
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        try_fs!(self.fs.fsync(fh, datasync), reply);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        let fh = try_fs!(self.fs.opendir(&path), reply);
        reply.opened(fh, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        let listing = try_fs!(self.fs.readdir(fh), reply);

        let parent_ino = match split_virtual(&path) {
            Some((parent, _)) => self.ino_for(parent),
            None => ROOT_INO,
        };
        let mut entries: Vec<(u64, FileType, String)> = Vec::with_capacity(listing.len() + 2);
        entries.push((ino, FileType::Directory, ".".to_string()));
        entries.push((parent_ino, FileType::Directory, "..".to_string()));
        for entry in listing.iter() {
            let child_path = join_virtual(&path, &entry.name);
            let kind = self
                .fs
                .getattr(&child_path)
                .map(|meta| kind_of(&meta))
                .unwrap_or(FileType::RegularFile);
            entries.push((self.ino_for(&child_path), kind, entry.name.clone()));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        let _ = self.fs.releasedir(fh);
        reply.ok();
    }

    fn fsyncdir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        try_fs!(self.fs.fsyncdir(fh, datasync), reply);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        let stat = try_fs!(self.fs.statfs(&path), reply);
        reply.statfs(
            stat.blocks(),
            stat.blocks_free(),
            stat.blocks_available(),
            stat.files(),
            stat.files_free(),
            stat.block_size() as u32,
            stat.name_max() as u32,
            stat.fragment_size() as u32,
        );
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        try_fs!(self.fs.setxattr(&path, name, value, flags), reply);
        reply.ok();
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        let value = try_fs!(self.fs.getxattr(&path, name), reply);
        if size == 0 {
            reply.size(value.len() as u32);
        } else if value.len() <= size as usize {
            reply.data(&value);
        } else {
            reply.error(libc::ERANGE);
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        let names = try_fs!(self.fs.listxattr(&path), reply);
        if size == 0 {
            reply.size(names.len() as u32);
        } else if names.len() <= size as usize {
            reply.data(&names);
        } else {
            reply.error(libc::ERANGE);
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        try_fs!(self.fs.removexattr(&path, name), reply);
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = try_reply!(self.path_for(ino).ok_or(libc::ENOENT), reply);
        try_fs!(self.fs.access(&path, mask), reply);
        reply.ok();
    }
}

/// Mount the driver and block until unmount.
pub fn mount(
    dispatcher: Dispatcher,
    mountpoint: &Path,
    options: &[MountOption],
) -> std::io::Result<()> {
    fuser::mount2(KvfsFuse::new(dispatcher), mountpoint, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn adapter() -> (TempDir, KvfsFuse) {
        let dir = TempDir::new().unwrap();
        let fs = Dispatcher::new(dir.path().to_path_buf()).unwrap();
        (dir, KvfsFuse::new(fs))
    }

    #[test]
    fn root_ino_is_pinned_to_slash() {
        let (_dir, fuse) = adapter();
        assert_eq!(fuse.path_for(ROOT_INO), Some("/".to_string()));
        assert_eq!(fuse.ino_for("/"), ROOT_INO);
    }

    #[test]
    fn inos_are_stable_per_path() {
        let (_dir, fuse) = adapter();
        let a = fuse.ino_for("/a");
        assert_eq!(fuse.ino_for("/a"), a);
        assert_ne!(fuse.ino_for("/b"), a);
    }

    #[test]
    fn move_path_keeps_the_ino() {
        let (_dir, fuse) = adapter();
        let ino = fuse.ino_for("/old");
        fuse.move_path("/old", "/new");
        assert_eq!(fuse.path_for(ino), Some("/new".to_string()));
        assert_eq!(fuse.ino_for("/new"), ino);
    }

    #[test]
    fn non_utf8_names_are_rejected() {
        let (_dir, fuse) = adapter();
        let bad = OsStr::from_bytes(&[0x66, 0xff, 0x6f]);
        assert_eq!(fuse.child_path(ROOT_INO, bad), Err(libc::EINVAL));
    }

    #[test]
    fn file_attr_mirrors_metadata() {
        let (dir, fuse) = adapter();
        fuse.fs.mkdir("/d", 0o750).unwrap();
        let attr = fuse.attr_of("/d").unwrap();
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o750);
        assert_ne!(attr.ino, ROOT_INO);
        drop(dir);
    }
}
