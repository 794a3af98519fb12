use std::ffi::CStr;
use std::fmt;

use endian_codec::{DecodeBE, EncodeBE, PackedSize};

/// A fixed-size, NUL-padded ASCII buffer used for the `path`/`busid` wire fields.
///
/// USB/IP leaves these as raw C-style char arrays on the wire; `N` is the exact
/// on-wire size (`256` for `path`, `32` for `busid`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharBuf<const N: usize> {
    buffer: [u8; N],
}

#[derive(Debug, thiserror::Error)]
pub enum CharBufError {
    #[error("value of {len} bytes does not fit in a {cap}-byte fixed buffer")]
    TooLong { len: usize, cap: usize },
    #[error("value contains an interior NUL byte")]
    InteriorNul,
}

impl<const N: usize> CharBuf<N> {
    pub const fn empty() -> Self {
        Self { buffer: [0u8; N] }
    }

    /// Build from a string, erroring if it (plus the implicit terminator) would
    /// overflow the buffer or contains an embedded NUL.
    pub fn new(value: &str) -> Result<Self, CharBufError> {
        if value.as_bytes().contains(&0) {
            return Err(CharBufError::InteriorNul);
        }
        if value.len() >= N {
            return Err(CharBufError::TooLong { len: value.len(), cap: N });
        }
        let mut buffer = [0u8; N];
        buffer[..value.len()].copy_from_slice(value.as_bytes());
        Ok(Self { buffer })
    }

    /// Build from a string, silently truncating to fit instead of erroring.
    pub fn new_truncated(value: &str) -> Self {
        let mut buffer = [0u8; N];
        let bytes = value.as_bytes();
        let take = bytes.len().min(N.saturating_sub(1));
        buffer[..take].copy_from_slice(&bytes[..take]);
        Self { buffer }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.buffer
    }

    pub fn as_c_str(&self) -> Option<&CStr> {
        let nul = self.buffer.iter().position(|&b| b == 0)?;
        CStr::from_bytes_with_nul(&self.buffer[..=nul]).ok()
    }

    pub fn as_str(&self) -> &str {
        self.as_c_str().and_then(|s| s.to_str().ok()).unwrap_or("")
    }
}

impl<const N: usize> TryFrom<&str> for CharBuf<N> {
    type Error = CharBufError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<const N: usize> fmt::Debug for CharBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CharBuf({:?})", self.as_str())
    }
}

impl<const N: usize> Default for CharBuf<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> PackedSize for CharBuf<N> {
    const PACKED_LEN: usize = N;
}

impl<const N: usize> EncodeBE for CharBuf<N> {
    fn encode(&self, bytes: &mut [u8]) {
        bytes[..N].copy_from_slice(&self.buffer);
    }
}

impl<const N: usize> DecodeBE for CharBuf<N> {
    fn decode(bytes: &[u8]) -> Self {
        let mut buffer = [0u8; N];
        buffer.copy_from_slice(&bytes[..N]);
        Self { buffer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_short_value() {
        let buf: CharBuf<32> = CharBuf::new("1-3").unwrap();
        assert_eq!(buf.as_str(), "1-3");
        assert_eq!(buf.as_bytes()[3], 0);
    }

    #[test]
    fn rejects_overflow() {
        let too_long = "x".repeat(32);
        assert!(matches!(CharBuf::<32>::new(&too_long), Err(CharBufError::TooLong { .. })));
    }

    #[test]
    fn truncates_when_asked() {
        let buf: CharBuf<4> = CharBuf::new_truncated("hello");
        assert_eq!(buf.as_str(), "hel");
    }
}
