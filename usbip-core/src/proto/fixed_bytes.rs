use std::fmt;

use endian_codec::{DecodeBE, EncodeBE, PackedSize};

/// An opaque, fixed-size byte array wire field (setup packets, padding) — unlike
/// [`super::char_buf::CharBuf`], no NUL-termination or string semantics apply.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedBytes<const N: usize>([u8; N]);

impl<const N: usize> FixedBytes<N> {
    pub const fn zeroed() -> Self {
        Self([0u8; N])
    }

    pub const fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> fmt::Debug for FixedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedBytes<{N}>({:02x?})", self.0)
    }
}

impl<const N: usize> From<[u8; N]> for FixedBytes<N> {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes)
    }
}

impl<const N: usize> PackedSize for FixedBytes<N> {
    const PACKED_LEN: usize = N;
}

impl<const N: usize> EncodeBE for FixedBytes<N> {
    fn encode(&self, bytes: &mut [u8]) {
        bytes[..N].copy_from_slice(&self.0);
    }
}

impl<const N: usize> DecodeBE for FixedBytes<N> {
    fn decode(bytes: &[u8]) -> Self {
        let mut buffer = [0u8; N];
        buffer.copy_from_slice(&bytes[..N]);
        Self(buffer)
    }
}
