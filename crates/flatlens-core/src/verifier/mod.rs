//! Structural verification of untrusted FlatBuffers buffers.
//!
//! The [`Verifier`] holds the buffer, the resource limits and the running
//! depth/table counters. Its primitives each check one wire-level rule and
//! return a [`VerifyError`] naming the first violation; they are the building
//! blocks the schema walker drives.
//!
//! ## Checks
//!
//! 1. Every read lies in bounds (`length < size && offset <= size - length`)
//! 2. Scalars are aligned to their size (unless disabled)
//! 3. uoffsets are nonzero, have a clear sign bit and land inside the buffer
//! 4. vtables have an even size of at least 4 and fit in the buffer
//! 5. Vector and string lengths cannot overflow the maximum buffer size
//! 6. Strings end with a NUL byte
//! 7. Table nesting depth and total table count stay under their limits
//!
//! ## Example
//!
//! ```no_run
//! use flatlens_core::{BufferOptions, Schema, Verifier};
//!
//! # fn example(schema: &Schema, bytes: &[u8]) {
//! let mut verifier = Verifier::new(bytes);
//! match verifier.verify_buffer(schema, &BufferOptions::default()) {
//!     Ok(()) => println!("valid"),
//!     Err(err) => println!("rejected: {err}"),
//! }
//! # }
//! ```

mod reader;
pub mod wire;

use crate::error::{VerifyError, VerifyResult};
use crate::schema::Schema;
use crate::walker::{Discard, Walker};
use std::ops::Range;
use tracing::{debug, trace};

pub use reader::BufferReader;
pub use wire::{Scalar, MAX_BUFFER_SIZE, MAX_BUFFER_SIZE_64, MIN_BUFFER_SIZE};

use wire::{
    FILE_IDENTIFIER_LENGTH, SIZE_PREFIX, SIZE_UOFFSET, SIZE_UOFFSET64, SIZE_VOFFSET,
    VTABLE_HEADER_SIZE,
};

/// Resource limits and checks applied while verifying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierOptions {
    /// Maximum table nesting depth
    pub max_depth: usize,
    /// Maximum number of tables visited per verification
    pub max_tables: usize,
    /// Whether scalars must be aligned to their size
    pub check_alignment: bool,
    /// Largest accepted buffer; also bounds vector and string lengths
    pub max_buffer_size: usize,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_tables: 1_000_000,
            check_alignment: true,
            max_buffer_size: MAX_BUFFER_SIZE,
        }
    }
}

impl VerifierOptions {
    /// Creates options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Default options sized for `schema`, raising the buffer limit when it
    /// declares 64-bit offsets
    pub fn for_schema(schema: &Schema) -> Self {
        Self::default().large_buffers(schema.uses_64bit_offsets())
    }

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the maximum number of tables
    pub fn max_tables(mut self, tables: usize) -> Self {
        self.max_tables = tables;
        self
    }

    /// Enables or disables alignment checks
    pub fn check_alignment(mut self, check: bool) -> Self {
        self.check_alignment = check;
        self
    }

    /// Sets the maximum buffer size
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Selects the 64-bit buffer limit when `enabled`
    pub fn large_buffers(self, enabled: bool) -> Self {
        self.max_buffer_size(if enabled {
            MAX_BUFFER_SIZE_64
        } else {
            MAX_BUFFER_SIZE
        })
    }
}

/// How the root of a buffer is framed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferOptions {
    /// Buffer starts with a u32 length prefix
    pub size_prefixed: bool,
    /// Expected 4-byte file identifier after the root offset
    pub identifier: Option<[u8; FILE_IDENTIFIER_LENGTH]>,
}

impl BufferOptions {
    /// Creates options for a plain buffer without identifier check
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the buffer as size-prefixed
    pub fn size_prefixed(mut self, prefixed: bool) -> Self {
        self.size_prefixed = prefixed;
        self
    }

    /// Requires the given file identifier
    pub fn identifier(mut self, identifier: [u8; FILE_IDENTIFIER_LENGTH]) -> Self {
        self.identifier = Some(identifier);
        self
    }
}

/// Header of a verified vtable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VTableHeader {
    /// Position of the vtable
    pub offset: usize,
    /// Size of the vtable in bytes, header included
    pub vtable_size: u16,
    /// Size of the referring table's inline data
    pub table_size: u16,
}

impl VTableHeader {
    /// Number of field slots in the vtable
    pub fn slot_count(&self) -> usize {
        wire::slot_count(self.vtable_size as usize)
    }
}

/// Stateful verifier over a single buffer.
///
/// Counters accumulate across calls; [`Verifier::verify_buffer`] resets them
/// before it starts so one instance can check a buffer repeatedly.
#[derive(Debug)]
pub struct Verifier<'b> {
    reader: BufferReader<'b>,
    opts: VerifierOptions,
    depth: usize,
    num_tables: usize,
}

impl<'b> Verifier<'b> {
    /// Creates a verifier with default options
    pub fn new(buf: &'b [u8]) -> Self {
        Self::with_options(buf, VerifierOptions::default())
    }

    /// Creates a verifier with custom options
    pub fn with_options(buf: &'b [u8], opts: VerifierOptions) -> Self {
        Self {
            reader: BufferReader::new(buf).with_alignment(opts.check_alignment),
            opts,
            depth: 0,
            num_tables: 0,
        }
    }

    /// The bounds-checked reader over the buffer
    pub fn reader(&self) -> &BufferReader<'b> {
        &self.reader
    }

    /// The options in effect
    pub fn options(&self) -> &VerifierOptions {
        &self.opts
    }

    /// Current table nesting depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Tables visited since the last reset
    pub fn table_count(&self) -> usize {
        self.num_tables
    }

    /// Clears the depth and table counters
    pub fn reset(&mut self) {
        self.depth = 0;
        self.num_tables = 0;
    }

    /// Checks that `[offset, offset + length)` is inside the buffer
    #[inline]
    pub fn verify_range(&self, offset: usize, length: usize) -> VerifyResult<()> {
        if self.reader.verify_range(offset, length) {
            Ok(())
        } else {
            Err(VerifyError::OutOfBounds { offset, length })
        }
    }

    /// Checks that `offset` is aligned to `align` bytes
    #[inline]
    pub fn verify_alignment_to(&self, offset: usize, align: usize) -> VerifyResult<()> {
        if self.reader.verify_aligned_to(offset, align) {
            Ok(())
        } else {
            Err(VerifyError::Misaligned { offset, align })
        }
    }

    /// Checks that `offset` is aligned for a `T`
    #[inline]
    pub fn verify_alignment<T: Scalar>(&self, offset: usize) -> VerifyResult<()> {
        self.verify_alignment_to(offset, T::SIZE)
    }

    /// Reads a `T` after checking alignment and bounds
    #[inline]
    pub fn read<T: Scalar>(&self, offset: usize) -> VerifyResult<T> {
        self.verify_alignment::<T>(offset)?;
        self.reader
            .read_scalar::<T>(offset)
            .ok_or(VerifyError::OutOfBounds {
                offset,
                length: T::SIZE,
            })
    }

    /// Follows the 32-bit uoffset stored at `pos` and returns its target
    pub fn verify_offset(&self, pos: usize) -> VerifyResult<usize> {
        let offset = self.read::<u32>(pos)?;
        if offset == 0 {
            return Err(VerifyError::ZeroOrSelfOffset { offset: pos });
        }
        if (offset as i32) < 0 {
            return Err(VerifyError::OffsetSignWrap { offset: pos });
        }
        self.resolve(pos, offset as usize)
    }

    /// Follows the 64-bit uoffset stored at `pos` and returns its target
    pub fn verify_offset64(&self, pos: usize) -> VerifyResult<usize> {
        let offset = self.read::<u64>(pos)?;
        if offset == 0 {
            return Err(VerifyError::ZeroOrSelfOffset { offset: pos });
        }
        if (offset as i64) < 0 {
            return Err(VerifyError::OffsetSignWrap { offset: pos });
        }
        let offset = usize::try_from(offset).map_err(|_| VerifyError::OutOfBounds {
            offset: pos,
            length: SIZE_UOFFSET64,
        })?;
        self.resolve(pos, offset)
    }

    fn resolve(&self, pos: usize, offset: usize) -> VerifyResult<usize> {
        let target = pos.checked_add(offset).ok_or(VerifyError::OutOfBounds {
            offset: pos,
            length: offset,
        })?;
        self.verify_range(target, 1)?;
        Ok(target)
    }

    /// Enters a table: bumps depth and table count, then checks both limits.
    ///
    /// Must be paired with [`Verifier::exit_table`] even when it fails.
    pub fn enter_table(&mut self) -> VerifyResult<()> {
        self.depth += 1;
        self.num_tables += 1;
        if self.depth > self.opts.max_depth {
            return Err(VerifyError::RecursionLimitExceeded {
                max_depth: self.opts.max_depth,
            });
        }
        if self.num_tables > self.opts.max_tables {
            return Err(VerifyError::TableCountExceeded {
                max_tables: self.opts.max_tables,
            });
        }
        Ok(())
    }

    /// Leaves a table entered with [`Verifier::enter_table`]
    pub fn exit_table(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Position of the vtable for the table at `table`.
    ///
    /// The result may lie outside the buffer; [`Verifier::verify_vtable`]
    /// rejects that.
    pub fn vtable_of(&self, table: usize) -> VerifyResult<usize> {
        let soffset = self.read::<i32>(table)?;
        Ok(table.wrapping_sub(soffset as isize as usize))
    }

    /// Checks the vtable at `vtable`: its size is even, at least 4 and fully
    /// inside the buffer
    pub fn verify_vtable(&self, vtable: usize) -> VerifyResult<VTableHeader> {
        let vtable_size = self.read::<u16>(vtable)?;
        if (vtable_size as usize) < VTABLE_HEADER_SIZE || vtable_size % 2 != 0 {
            return Err(VerifyError::CorruptVTable { offset: vtable });
        }
        self.verify_range(vtable, vtable_size as usize)?;
        let table_size = self.read::<u16>(vtable + SIZE_VOFFSET)?;
        Ok(VTableHeader {
            offset: vtable,
            vtable_size,
            table_size,
        })
    }

    /// Enters the table at `table` and verifies its vtable and inline size
    pub fn verify_table_start(&mut self, table: usize) -> VerifyResult<VTableHeader> {
        self.enter_table()?;
        let vtable = self.vtable_of(table)?;
        let header = self.verify_vtable(vtable)?;
        self.verify_range(table, header.table_size as usize)?;
        Ok(header)
    }

    /// Verifies the u32 length prefix at `pos` and the `length * elem_size`
    /// bytes after it, returning the element byte range
    pub fn verify_vector_or_string(
        &self,
        pos: usize,
        elem_size: usize,
    ) -> VerifyResult<Range<usize>> {
        let length = self.read::<u32>(pos)?;
        self.verify_elements(pos, u64::from(length), elem_size, SIZE_UOFFSET)
    }

    /// Like [`Verifier::verify_vector_or_string`] for a u64 length prefix
    pub fn verify_vector64(&self, pos: usize, elem_size: usize) -> VerifyResult<Range<usize>> {
        let length = self.read::<u64>(pos)?;
        self.verify_elements(pos, length, elem_size, SIZE_UOFFSET64)
    }

    fn verify_elements(
        &self,
        pos: usize,
        length: u64,
        elem_size: usize,
        prefix: usize,
    ) -> VerifyResult<Range<usize>> {
        let max_elements = self.opts.max_buffer_size / elem_size.max(1);
        let byte_size = usize::try_from(length)
            .ok()
            .filter(|&count| count < max_elements)
            .and_then(|count| count.checked_mul(elem_size))
            .and_then(|bytes| bytes.checked_add(prefix))
            .ok_or(VerifyError::LengthOverflow {
                offset: pos,
                length,
            })?;
        self.verify_range(pos, byte_size)?;
        Ok(pos + prefix..pos + byte_size)
    }

    /// Verifies the string at `pos`, terminator included, returning the
    /// character byte range
    pub fn verify_string(&self, pos: usize) -> VerifyResult<Range<usize>> {
        let chars = self.verify_vector_or_string(pos, 1)?;
        self.verify_terminator(chars.end)?;
        Ok(chars)
    }

    /// Checks that the byte at `pos` exists and is NUL
    pub fn verify_terminator(&self, pos: usize) -> VerifyResult<()> {
        match self.reader.read_scalar::<u8>(pos) {
            Some(0) => Ok(()),
            _ => Err(VerifyError::MissingTerminator { offset: pos }),
        }
    }

    /// Checks the buffer framing and returns the root table position
    pub fn verify_buffer_root(&self, opts: &BufferOptions) -> VerifyResult<usize> {
        let size = self.reader.len();
        if size >= self.opts.max_buffer_size {
            return Err(VerifyError::BufferTooLarge {
                size,
                max: self.opts.max_buffer_size,
            });
        }

        let mut start = 0;
        if opts.size_prefixed {
            let prefix = self.read::<u32>(0)? as usize;
            let length = size - SIZE_PREFIX;
            if prefix != length {
                return Err(VerifyError::SizePrefixMismatch { prefix, length });
            }
            start = SIZE_PREFIX;
        }

        if let Some(expected) = opts.identifier {
            let offset = start + SIZE_UOFFSET;
            match self.reader.bytes(offset, FILE_IDENTIFIER_LENGTH) {
                Some(found) if found == expected => {}
                _ => return Err(VerifyError::IdentifierMismatch { offset }),
            }
        }

        self.verify_offset(start)
    }

    /// Verifies the whole buffer against `schema`, starting at its root table
    pub fn verify_buffer(&mut self, schema: &Schema, opts: &BufferOptions) -> VerifyResult<()> {
        self.reset();
        debug!("Verifying {} byte buffer", self.reader.len());

        let result = Walker::new(schema, self, Discard).walk_buffer(opts);
        match &result {
            Ok(()) => trace!(tables = self.num_tables, "Buffer verified"),
            Err(err) => debug!(%err, "Buffer rejected"),
        }
        result
    }
}
