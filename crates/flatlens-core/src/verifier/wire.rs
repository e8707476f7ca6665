//! Wire-level primitives of the FlatBuffers binary format.
//!
//! ## Wire Format Overview
//!
//! Every multi-byte value is little-endian. Three offset kinds tie a buffer
//! together:
//!
//! - `uoffset`: 4-byte unsigned forward pointer, relative to its own position
//!   (8 bytes for the 64-bit variant)
//! - `soffset`: 4-byte signed back-pointer from a table to its vtable
//! - `voffset`: 2-byte unsigned vtable slot value, relative to the table start
//!
//! A vtable is `[u16 vtable_size][u16 table_size][u16 slot]*N`, one slot per
//! field id. Strings and vectors carry a u32 length prefix; strings also carry
//! a NUL terminator that the length excludes.

/// Unsigned forward offset
pub type UOffset = u32;
/// Unsigned forward offset of the 64-bit variant
pub type UOffset64 = u64;
/// Signed table-to-vtable offset
pub type SOffset = i32;
/// Vtable slot value
pub type VOffset = u16;

/// Size of a [`UOffset`] in bytes
pub const SIZE_UOFFSET: usize = 4;
/// Size of a [`UOffset64`] in bytes
pub const SIZE_UOFFSET64: usize = 8;
/// Size of a [`SOffset`] in bytes
pub const SIZE_SOFFSET: usize = 4;
/// Size of a [`VOffset`] in bytes
pub const SIZE_VOFFSET: usize = 2;
/// Size of the optional length prefix of size-prefixed buffers
pub const SIZE_PREFIX: usize = 4;

/// Length of the optional file identifier following the root offset
pub const FILE_IDENTIFIER_LENGTH: usize = 4;

/// Bytes taken by the two u16 header fields of every vtable
pub const VTABLE_HEADER_SIZE: usize = 2 * SIZE_VOFFSET;

/// Largest buffer addressable with 32-bit offsets (2^31 - 1)
pub const MAX_BUFFER_SIZE: usize = i32::MAX as usize;

/// Largest buffer addressable with 64-bit offsets (2^63 - 1 on 64-bit targets)
pub const MAX_BUFFER_SIZE_64: usize = usize::MAX >> 1;

/// Smallest buffer that can hold a root offset, a table and an empty vtable
pub const MIN_BUFFER_SIZE: usize = SIZE_UOFFSET + SIZE_SOFFSET + 2 * SIZE_VOFFSET;

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width little-endian value that can be read straight from the wire.
///
/// Alignment on the wire equals the value's size, which is how FlatBuffers
/// writers place scalars regardless of the host's `align_of`.
pub trait Scalar: Copy + sealed::Sealed {
    /// Size (and wire alignment) in bytes
    const SIZE: usize;

    /// Decode from exactly [`Self::SIZE`] bytes; `None` on a length mismatch
    fn from_le_slice(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}

            impl Scalar for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline]
                fn from_le_slice(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(<$t>::from_le_bytes)
                }
            }
        )*
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl sealed::Sealed for bool {}

impl Scalar for bool {
    const SIZE: usize = 1;

    #[inline]
    fn from_le_slice(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b] => Some(*b != 0),
            _ => None,
        }
    }
}

/// Number of zero bytes needed after `size` bytes to reach a multiple of `align`.
///
/// `align` must be a power of two.
#[inline]
pub fn padding_bytes(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    size.wrapping_neg() & (align - 1)
}

/// Rounds `size` up to the next multiple of `align` (a power of two)
#[inline]
pub fn align_up(size: usize, align: usize) -> usize {
    size + padding_bytes(size, align)
}

/// Byte offset of the vtable slot that holds field `id`
#[inline]
pub fn vtable_slot(id: u16) -> usize {
    VTABLE_HEADER_SIZE + SIZE_VOFFSET * id as usize
}

/// Number of field slots a vtable of `vtable_size` bytes declares
#[inline]
pub fn slot_count(vtable_size: usize) -> usize {
    vtable_size.saturating_sub(VTABLE_HEADER_SIZE) / SIZE_VOFFSET
}
