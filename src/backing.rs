//! Backing store accessor
//!
//! Thin wrappers over the POSIX primitives the dispatcher consumes, rooted
//! at the backing directory. Everything here takes an already-resolved
//! backing location; virtual-path translation happens one layer up. Errors
//! carry the original errno so callers see exactly what the host filesystem
//! reported.

use crate::error::{FsError, FsResult};
use nix::sys::stat::{mknod, Mode, SFlag};
use nix::sys::statvfs::{statvfs, Statvfs};
use nix::unistd::{access, chown, mkfifo, truncate, AccessFlags, Gid, Uid};
use std::ffi::{CString, OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::time::SystemTime;

/// A timestamp argument for [`utimens`], covering the three POSIX spellings.
#[derive(Debug, Clone, Copy)]
pub enum TimeRef {
    Omit,
    Now,
    Stamp(SystemTime),
}

fn cpath(path: &Path) -> FsResult<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| FsError::InvalidArgument("path contains a NUL byte".into()))
}

fn cstr(name: &OsStr) -> FsResult<CString> {
    CString::new(name.as_bytes())
        .map_err(|_| FsError::InvalidArgument("name contains a NUL byte".into()))
}

pub fn lstat(path: &Path) -> FsResult<fs::Metadata> {
    Ok(fs::symlink_metadata(path)?)
}

/// Open an existing object with the caller's flags. Creation is not part of
/// open: mknod runs first, so O_CREAT never reaches this point.
pub fn open(path: &Path, flags: i32) -> FsResult<File> {
    let acc = flags & libc::O_ACCMODE;
    let mut opts = OpenOptions::new();
    opts.read(acc == libc::O_RDONLY || acc == libc::O_RDWR)
        .write(acc == libc::O_WRONLY || acc == libc::O_RDWR)
        .custom_flags(flags & !libc::O_ACCMODE);
    Ok(opts.open(path)?)
}

/// Create a node: a regular file via exclusive create-and-close, a FIFO via
/// mkfifo, anything else via mknod.
pub fn create_node(path: &Path, mode: u32, rdev: u64) -> FsResult<()> {
    let perm = Mode::from_bits_truncate(mode & !libc::S_IFMT);
    match mode & libc::S_IFMT {
        0 | libc::S_IFREG => {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(mode & !libc::S_IFMT)
                .open(path)?;
            drop(file);
        }
        libc::S_IFIFO => mkfifo(path, perm)?,
        kind => mknod(
            path,
            SFlag::from_bits_truncate(kind),
            perm,
            rdev as libc::dev_t,
        )?,
    }
    Ok(())
}

pub fn mkdir(path: &Path, mode: u32) -> FsResult<()> {
    fs::DirBuilder::new().mode(mode).create(path)?;
    Ok(())
}

pub fn unlink(path: &Path) -> FsResult<()> {
    Ok(fs::remove_file(path)?)
}

pub fn rmdir(path: &Path) -> FsResult<()> {
    Ok(fs::remove_dir(path)?)
}

pub fn rename(from: &Path, to: &Path) -> FsResult<()> {
    Ok(fs::rename(from, to)?)
}

pub fn hard_link(original: &Path, link: &Path) -> FsResult<()> {
    Ok(fs::hard_link(original, link)?)
}

/// `target` is stored verbatim; it is a virtual path the kernel resolves
/// back through the mount, not a backing location.
pub fn symlink(target: &str, link: &Path) -> FsResult<()> {
    Ok(std::os::unix::fs::symlink(target, link)?)
}

pub fn read_link(path: &Path) -> FsResult<OsString> {
    Ok(fs::read_link(path)?.into_os_string())
}

pub fn chmod(path: &Path, mode: u32) -> FsResult<()> {
    Ok(fs::set_permissions(path, fs::Permissions::from_mode(mode))?)
}

pub fn chown_path(path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
    chown(path, uid.map(Uid::from_raw), gid.map(Gid::from_raw))?;
    Ok(())
}

pub fn truncate_path(path: &Path, size: u64) -> FsResult<()> {
    truncate(path, size as libc::off_t)?;
    Ok(())
}

fn timespec(spec: TimeRef) -> libc::timespec {
    match spec {
        TimeRef::Omit => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        TimeRef::Now => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
        TimeRef::Stamp(at) => {
            let since_epoch = at
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default();
            libc::timespec {
                tv_sec: since_epoch.as_secs() as libc::time_t,
                tv_nsec: since_epoch.subsec_nanos() as libc::c_long,
            }
        }
    }
}

pub fn utimens(path: &Path, atime: TimeRef, mtime: TimeRef) -> FsResult<()> {
    let path = cpath(path)?;
    let times = [timespec(atime), timespec(mtime)];
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, path.as_ptr(), times.as_ptr(), 0) };
    if rc < 0 {
        return Err(FsError::from_errno(last_errno()));
    }
    Ok(())
}

pub fn statfs(path: &Path) -> FsResult<Statvfs> {
    Ok(statvfs(path)?)
}

pub fn check_access(path: &Path, mask: i32) -> FsResult<()> {
    access(path, AccessFlags::from_bits_truncate(mask))?;
    Ok(())
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

// Extended attributes pass straight through to the hashed object; there is
// no persistence of our own. The l* variants are used so attributes land on
// symlink objects themselves, matching lstat above.

pub fn set_xattr(path: &Path, name: &OsStr, value: &[u8], flags: i32) -> FsResult<()> {
    let path = cpath(path)?;
    let name = cstr(name)?;
    let rc = unsafe {
        libc::lsetxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            flags,
        )
    };
    if rc < 0 {
        return Err(FsError::from_errno(last_errno()));
    }
    Ok(())
}

pub fn get_xattr(path: &Path, name: &OsStr) -> FsResult<Vec<u8>> {
    let path = cpath(path)?;
    let name = cstr(name)?;
    let len = unsafe { libc::lgetxattr(path.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0) };
    if len < 0 {
        return Err(FsError::from_errno(last_errno()));
    }
    let mut buf = vec![0u8; len as usize];
    let len = unsafe {
        libc::lgetxattr(
            path.as_ptr(),
            name.as_ptr(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    if len < 0 {
        return Err(FsError::from_errno(last_errno()));
    }
    buf.truncate(len as usize);
    Ok(buf)
}

pub fn list_xattr(path: &Path) -> FsResult<Vec<u8>> {
    let path = cpath(path)?;
    let len = unsafe { libc::llistxattr(path.as_ptr(), std::ptr::null_mut(), 0) };
    if len < 0 {
        return Err(FsError::from_errno(last_errno()));
    }
    let mut buf = vec![0u8; len as usize];
    let len = unsafe { libc::llistxattr(path.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) };
    if len < 0 {
        return Err(FsError::from_errno(last_errno()));
    }
    buf.truncate(len as usize);
    Ok(buf)
}

pub fn remove_xattr(path: &Path, name: &OsStr) -> FsResult<()> {
    let path = cpath(path)?;
    let name = cstr(name)?;
    let rc = unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) };
    if rc < 0 {
        return Err(FsError::from_errno(last_errno()));
    }
    Ok(())
}
