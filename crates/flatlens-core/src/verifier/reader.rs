//! Bounds- and alignment-checked access to an untrusted byte buffer.

use super::wire::Scalar;

/// Read-only view over a buffer that never reads outside its bounds.
///
/// Every read in the crate goes through this type. Range checks follow the
/// FlatBuffers verifier rule `length < size && offset <= size - length`, which
/// cannot overflow for any `offset`/`length` pair.
#[derive(Debug, Clone, Copy)]
pub struct BufferReader<'b> {
    buf: &'b [u8],
    check_alignment: bool,
}

impl<'b> BufferReader<'b> {
    /// Create a reader that enforces alignment
    pub fn new(buf: &'b [u8]) -> Self {
        Self {
            buf,
            check_alignment: true,
        }
    }

    /// Enable or disable alignment checks
    pub fn with_alignment(mut self, check: bool) -> Self {
        self.check_alignment = check;
        self
    }

    /// Buffer length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether alignment checks are enforced
    #[inline]
    pub fn checks_alignment(&self) -> bool {
        self.check_alignment
    }

    /// The underlying bytes
    pub fn as_bytes(&self) -> &'b [u8] {
        self.buf
    }

    /// Whether `[offset, offset + length)` lies inside the buffer.
    ///
    /// Note the strict `length < size`: a range never spans the whole buffer.
    #[inline]
    pub fn verify_range(&self, offset: usize, length: usize) -> bool {
        length < self.buf.len() && offset <= self.buf.len() - length
    }

    /// Whether `offset` is a multiple of `align`, or alignment is not checked
    #[inline]
    pub fn verify_aligned_to(&self, offset: usize, align: usize) -> bool {
        !self.check_alignment || align <= 1 || offset % align == 0
    }

    /// Whether `offset` is suitably aligned for a `T`
    #[inline]
    pub fn verify_aligned<T: Scalar>(&self, offset: usize) -> bool {
        self.verify_aligned_to(offset, T::SIZE)
    }

    /// Whether `offset` addresses a byte of the buffer
    #[inline]
    pub fn is_valid_offset(&self, offset: usize) -> bool {
        offset < self.buf.len()
    }

    /// Bytes from `offset` to the end of the buffer (zero past the end)
    #[inline]
    pub fn remaining(&self, offset: usize) -> usize {
        self.buf.len().saturating_sub(offset)
    }

    /// Range-checked slice of `length` bytes at `offset`
    pub fn bytes(&self, offset: usize, length: usize) -> Option<&'b [u8]> {
        if self.verify_range(offset, length) {
            self.buf.get(offset..offset + length)
        } else {
            None
        }
    }

    /// Slice of `length` bytes at `offset`, allowed to reach the buffer end.
    ///
    /// Unlike [`Self::bytes`] this accepts a range covering the whole buffer,
    /// which only display code needs.
    pub fn slice(&self, offset: usize, length: usize) -> Option<&'b [u8]> {
        self.buf.get(offset..offset.checked_add(length)?)
    }

    /// Range-checked scalar read. Alignment is the caller's concern.
    #[inline]
    pub fn read_scalar<T: Scalar>(&self, offset: usize) -> Option<T> {
        self.bytes(offset, T::SIZE).and_then(T::from_le_slice)
    }

    /// Whether every byte of the range is zero; `false` if out of range
    pub fn is_zero(&self, offset: usize, length: usize) -> bool {
        self.slice(offset, length)
            .map_or(false, |bytes| bytes.iter().all(|&b| b == 0))
    }

    /// Whether every byte of the range is printable ASCII; `false` if out of range
    pub fn is_printable(&self, offset: usize, length: usize) -> bool {
        self.slice(offset, length)
            .map_or(false, |bytes| bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' '))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_range() {
        let data = [0u8; 8];
        let reader = BufferReader::new(&data);

        assert!(reader.verify_range(0, 4));
        assert!(reader.verify_range(4, 4));
        assert!(reader.verify_range(7, 1));
        assert!(!reader.verify_range(8, 1));
        // The whole buffer is never a valid range
        assert!(!reader.verify_range(0, 8));
        // No overflow on huge inputs
        assert!(!reader.verify_range(usize::MAX, 4));
        assert!(!reader.verify_range(2, usize::MAX));
    }

    #[test]
    fn test_alignment() {
        let data = [0u8; 16];
        let reader = BufferReader::new(&data);
        assert!(reader.verify_aligned::<u32>(8));
        assert!(!reader.verify_aligned::<u32>(6));
        assert!(reader.verify_aligned::<u8>(3));

        let lenient = reader.with_alignment(false);
        assert!(lenient.verify_aligned::<u64>(3));
    }

    #[test]
    fn test_read_scalar() {
        let data = [0x2A, 0, 0, 0, 0xFF, 0xFF, 0, 0];
        let reader = BufferReader::new(&data);
        assert_eq!(reader.read_scalar::<u32>(0), Some(42));
        assert_eq!(reader.read_scalar::<i16>(4), Some(-1));
        assert_eq!(reader.read_scalar::<u32>(6), None);
    }

    #[test]
    fn test_slice_reaches_end() {
        let data = [1u8, 2, 3];
        let reader = BufferReader::new(&data);
        assert_eq!(reader.bytes(0, 3), None);
        assert_eq!(reader.slice(0, 3), Some(&data[..]));
        assert_eq!(reader.slice(2, usize::MAX), None);
    }

    #[test]
    fn test_content_predicates() {
        let data = *b"BFBS\0\0\0\x01";
        let reader = BufferReader::new(&data);
        assert!(reader.is_printable(0, 4));
        assert!(!reader.is_printable(2, 4));
        assert!(reader.is_zero(4, 3));
        assert!(!reader.is_zero(4, 4));
        assert!(!reader.is_zero(6, 10));
        assert_eq!(reader.remaining(6), 2);
        assert_eq!(reader.remaining(20), 0);
    }
}
