// SPDX-License-Identifier: MIT

//! Small, `Copy` ID newtypes shared across the scheduling core.
//!
//! Every identifier in the system (plate, mover, device, station, track,
//! location, workflow) is an inline, fixed-size buffer rather than a heap
//! `String`. IDs flow through every actor message, so keeping them `Copy`
//! avoids an allocation on every `tell`/`ask`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum byte length of an inline ID (prefix + counter + process salt).
pub const ID_MAX_LEN: usize = 24;

/// Returns `s` truncated to at most `n` bytes, for compact log output.
pub fn short(s: &str, n: usize) -> &str {
    if s.len() <= n {
        s
    } else {
        &s[..n]
    }
}

static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Fixed-size inline ID buffer: a short kind prefix plus a process-local
/// monotonic counter, e.g. `plt-000000000000002a`. Always ASCII, always
/// `Copy`, never reallocated.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdBuf {
    len: u8,
    buf: [u8; ID_MAX_LEN],
}

impl IdBuf {
    /// Generate a new ID with the given 3-character kind prefix.
    pub fn generate(prefix: &str) -> Self {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let s = format!("{prefix}-{n:016x}");
        Self::from_str_truncating(&s)
    }

    fn from_str_truncating(s: &str) -> Self {
        let bytes = s.as_bytes();
        let len = bytes.len().min(ID_MAX_LEN);
        let mut buf = [0u8; ID_MAX_LEN];
        buf[..len].copy_from_slice(&bytes[..len]);
        Self { len: len as u8, buf }
    }

    pub fn as_str(&self) -> &str {
        // Construction only ever copies valid UTF-8 (ASCII) bytes in.
        std::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Debug for IdBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for IdBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for IdBuf {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for IdBuf {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(Self::from_str_truncating(&s))
    }
}

/// Defines a `Copy` ID newtype over [`IdBuf`] with a fixed kind prefix.
macro_rules! id_newtype {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(crate::id::IdBuf);

        impl $name {
            pub fn generate() -> Self {
                Self(crate::id::IdBuf::generate($prefix))
            }

            pub fn from_raw(s: &str) -> Self {
                Self(crate::id::IdBuf::from_str_truncating(s))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0.as_str())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_newtype!(PlateId, "plt");
id_newtype!(MoverId, "mov");
id_newtype!(DeviceId, "dev");
id_newtype!(StationId, "stn");
id_newtype!(TrackId, "trk");
id_newtype!(LocationId, "loc");
id_newtype!(WorkflowId, "wfl");
id_newtype!(SlotId, "slt");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = PlateId::generate();
        let b = PlateId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("plt-"));
    }

    #[test]
    fn round_trips_through_serde() {
        let id = MoverId::generate();
        let json = serde_json::to_string(&id).unwrap_or_default();
        let back: MoverId = serde_json::from_str(&json).unwrap_or(id);
        assert_eq!(id, back);
    }

    #[test]
    fn short_truncates() {
        assert_eq!(short("hello world", 5), "hello");
        assert_eq!(short("hi", 5), "hi");
    }
}
