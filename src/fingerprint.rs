//! Path fingerprinting
//!
//! Maps a virtual path to the fixed-width key under which its object is
//! stored. The digest covers the full path, separators included, so any
//! change anywhere in the path (a rename, a reparent) yields a different key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a fingerprint in bytes.
pub const KEY_LEN: usize = 32;

/// Deterministic digest of a virtual path, used as the backing-store locator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; KEY_LEN]);

/// Compute the fingerprint of a virtual path.
///
/// Pure and total: the same input produces the same key on every call and
/// every process run, and the empty path hashes like any other byte string.
pub fn fingerprint(path: &[u8]) -> Fingerprint {
    Fingerprint(*blake3::hash(path).as_bytes())
}

impl Fingerprint {
    /// The key of the namespace root, `fingerprint("/")`.
    pub fn root() -> Self {
        fingerprint(b"/")
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Fingerprint(arr))
    }

    /// Hexadecimal rendering, used as the on-disk object name.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_root(&self) -> bool {
        *self == Self::root()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}
