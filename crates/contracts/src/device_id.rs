//! DeviceId - Cheap-to-clone tracker identifier
//!
//! Keeps the 8 raw id bytes from the wire next to their lowercase hex form.
//! The hex form is an `Arc<str>` so cloning is a refcount bump.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Width of the device id field on the wire
pub const DEVICE_ID_LEN: usize = 8;

/// Device identifier with cheap cloning.
///
/// # Examples
/// ```
/// use contracts::DeviceId;
///
/// let id = DeviceId::from_raw([0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
/// assert_eq!(id.as_str(), "0123456789abcdef");
/// assert_eq!(DeviceId::parse_hex("0123456789abcdef"), Some(id));
/// ```
#[derive(Clone)]
pub struct DeviceId {
    raw: [u8; DEVICE_ID_LEN],
    hex: Arc<str>,
}

impl DeviceId {
    /// Build from the raw wire bytes.
    pub fn from_raw(raw: [u8; DEVICE_ID_LEN]) -> Self {
        let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
        Self {
            raw,
            hex: Arc::from(hex),
        }
    }

    /// Parse a 16-char hex string (either case).
    pub fn parse_hex(s: &str) -> Option<Self> {
        if s.len() != DEVICE_ID_LEN * 2 || !s.is_ascii() {
            return None;
        }
        let mut raw = [0u8; DEVICE_ID_LEN];
        for (i, slot) in raw.iter_mut().enumerate() {
            *slot = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self::from_raw(raw))
    }

    /// Raw id bytes as received.
    #[inline]
    pub fn raw(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.raw
    }

    /// Lowercase hex form.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.hex
    }
}

impl AsRef<str> for DeviceId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.hex
    }
}

impl Borrow<str> for DeviceId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.hex)
    }
}

impl PartialEq for DeviceId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for DeviceId {}

impl PartialEq<str> for DeviceId {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.hex.as_ref() == other
    }
}

impl PartialEq<&str> for DeviceId {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.hex.as_ref() == *other
    }
}

// Hash - same as str hash so maps can be queried with &str
impl Hash for DeviceId {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hex.hash(state)
    }
}

impl Serialize for DeviceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.hex)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid device id '{s}'")))
    }
}
