//! KVFS: Key-Value Filesystem
//!
//! A user-space filesystem driver that presents a hierarchical virtual
//! namespace backed by a flat, hash-addressed directory on the host
//! filesystem. Every virtual path is fingerprinted deterministically before
//! being resolved to a storage location; a durable directory index maps the
//! hashed keys back to human-readable names so listings survive the flat
//! layout.

pub mod backing;
pub mod cli;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod fuse;
pub mod index;
pub mod logging;
pub mod resolver;

pub use dispatch::Dispatcher;
pub use error::{FsError, FsResult};
pub use fingerprint::{fingerprint, Fingerprint};
pub use index::{DirectoryEntry, DirectoryIndex};
pub use resolver::Resolver;
