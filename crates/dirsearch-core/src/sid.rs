//! Security identifier (SID) values as returned by Active Directory.
//!
//! A SID travels as an opaque byte blob:
//!
//! | offset | size  | meaning                                  |
//! |--------|-------|------------------------------------------|
//! | 0      | 1     | revision                                 |
//! | 1      | 1     | sub-authority count                      |
//! | 2      | 6     | identifier authority (big-endian)        |
//! | 8      | 4 * n | sub-authorities (little-endian `u32`)    |
//!
//! Only the raw bytes are stored; the `S-R-A-S1-S2...` text is derived on demand.

use std::fmt;

const HEADER_LEN: usize = 8;
const AUTHORITY_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Security identifier of a user, group or other security principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Sid(Vec<u8>);

impl Sid {
    /// Wraps raw SID bytes without validating them.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrows the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true when no bytes were received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the canonical textual form, or an empty string for malformed input.
    #[must_use]
    pub fn to_text(&self) -> String {
        decode(&self.0)
    }
}

impl From<Vec<u8>> for Sid {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Sid {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Sid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&decode(&self.0))
    }
}

/// Decodes raw SID bytes into `S-<revision>-<authority>-<sub1>-...`.
///
/// Input that is empty, shorter than eight bytes or not a multiple of four bytes long
/// decodes to an empty string. The revision is rendered in hexadecimal, every other
/// segment in decimal. When the declared sub-authority count runs past the end of the
/// buffer, each missing sub-authority is rendered as `0`.
#[must_use]
pub fn decode(bytes: &[u8]) -> String {
    if bytes.len() < HEADER_LEN || bytes.len() % 4 != 0 {
        return String::new();
    }

    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&bytes[..HEADER_LEN]);
    let authority = u64::from_be_bytes(header) & AUTHORITY_MASK;
    let count = usize::from(bytes[1]);

    let mut text = format!("S-{:x}-{authority}", bytes[0]);
    for index in 0..count {
        let offset = HEADER_LEN + index * 4;
        let sub_authority = bytes
            .get(offset..offset + 4)
            .map_or(0, |chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        text.push_str(&format!("-{sub_authority}"));
    }
    text
}
