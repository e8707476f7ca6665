//! Regions and sections produced by the annotator.

use crate::error::VerifyError;
use crate::schema::BaseType;

/// How the bytes of a region are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionType {
    /// Bytes with no known meaning
    Unknown,
    /// 32-bit forward offset
    UOffset,
    /// Table-to-vtable offset
    SOffset,
    /// Vtable slot value
    VOffset,
    /// Boolean
    Bool,
    /// Signed byte
    Byte,
    /// Character data
    Char,
    /// Unsigned 8-bit integer
    Uint8,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 16-bit integer
    Uint16,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 32-bit integer
    Uint32,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 64-bit integer
    Uint64,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Union discriminant
    UType,
    /// 64-bit forward offset
    UOffset64,
}

impl RegionType {
    /// Label used in text output
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "?",
            Self::UOffset => "UOffset32",
            Self::SOffset => "SOffset32",
            Self::VOffset => "VOffset16",
            Self::Bool => "bool",
            Self::Byte => "int8_t",
            Self::Char => "char",
            Self::Uint8 => "uint8_t",
            Self::Int8 => "int8_t",
            Self::Uint16 => "uint16_t",
            Self::Int16 => "int16_t",
            Self::Uint32 => "uint32_t",
            Self::Int32 => "int32_t",
            Self::Uint64 => "uint64_t",
            Self::Int64 => "int64_t",
            Self::Float => "float",
            Self::Double => "double",
            Self::UType => "UType8",
            Self::UOffset64 => "UOffset64",
        }
    }

    /// Whether the region holds an offset to another part of the buffer
    pub const fn is_offset(self) -> bool {
        matches!(self, Self::UOffset | Self::SOffset | Self::UOffset64)
    }
}

impl From<BaseType> for RegionType {
    fn from(base: BaseType) -> Self {
        match base {
            BaseType::UType => Self::UType,
            BaseType::Bool => Self::Bool,
            BaseType::Byte => Self::Int8,
            BaseType::UByte => Self::Uint8,
            BaseType::Short => Self::Int16,
            BaseType::UShort => Self::Uint16,
            BaseType::Int => Self::Int32,
            BaseType::UInt => Self::Uint32,
            BaseType::Long => Self::Int64,
            BaseType::ULong => Self::Uint64,
            BaseType::Float => Self::Float,
            BaseType::Double => Self::Double,
            _ => Self::Unknown,
        }
    }
}

/// What a section of the buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// Bytes nothing refers to
    Unknown,
    /// Root offset, size prefix and identifier
    Header,
    /// A table
    Table,
    /// The root table
    RootTable,
    /// A vtable
    VTable,
    /// A struct
    Struct,
    /// A string
    String,
    /// A vector with a 32-bit length
    Vector,
    /// A vector with a 64-bit length
    Vector64,
    /// A struct reached through a union
    Union,
    /// Zero bytes between sections
    Padding,
}

impl SectionKind {
    /// Label used in text output
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Header => "header",
            Self::Table => "table",
            Self::RootTable => "root_table",
            Self::VTable => "vtable",
            Self::Struct => "struct",
            Self::String => "string",
            Self::Vector => "vector",
            Self::Vector64 => "vector64",
            Self::Union => "union",
            Self::Padding => "padding",
        }
    }
}

/// Role of a region within its section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CommentKind {
    #[default]
    Unknown,
    SizePrefix,
    RootTableOffset,
    FileIdentifier,
    Padding,
    VTableSize,
    VTableReferringTableLength,
    VTableFieldOffset,
    VTableUnknownFieldOffset,
    TableVTableOffset,
    TableField,
    TableUnknownField,
    TableOffsetField,
    StructField,
    ArrayField,
    StringLength,
    StringValue,
    StringTerminator,
    VectorLength,
    VectorValue,
    VectorTableValue,
    VectorStringValue,
    VectorUnionValue,
}

/// Outcome of checking a region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RegionStatus {
    /// Nothing wrong
    #[default]
    Ok,
    /// Unreferenced bytes
    WarnNoReferences,
    /// A long run of padding
    WarnPaddingLength,
    /// Padding that is not zero
    WarnCorruptedPadding,
    /// A generic structural error
    Error,
    /// An offset points outside the buffer
    ErrorOffsetOutOfBinary,
    /// A zero offset
    ErrorZeroOffset,
    /// The buffer ends before the region does
    ErrorIncompleteBinary {
        /// Bytes the region needed
        expected: usize,
    },
    /// A length is smaller than allowed
    ErrorLengthTooShort {
        /// Smallest allowed length
        minimum: usize,
    },
    /// A length runs past the buffer
    ErrorLengthTooLong,
    /// A value is not aligned to its size
    ErrorMisaligned,
    /// A required field is absent
    ErrorRequiredFieldNotPresent,
    /// A union discriminant is unknown or inconsistent
    ErrorInvalidUnionType,
    /// A string lacks its NUL terminator
    ErrorMissingTerminator,
    /// Table nesting exceeds the depth limit
    ErrorDepthLimit,
    /// Too many tables were visited
    ErrorTooManyTables,
}

impl RegionStatus {
    /// Whether the status is an error
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            Self::Ok | Self::WarnNoReferences | Self::WarnPaddingLength | Self::WarnCorruptedPadding
        )
    }

    /// Whether the status is a warning
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::WarnNoReferences | Self::WarnPaddingLength | Self::WarnCorruptedPadding
        )
    }

    /// Human-readable explanation, empty for [`RegionStatus::Ok`]
    pub fn message(&self) -> String {
        match self {
            Self::Ok => String::new(),
            Self::WarnNoReferences => "nothing refers to this section.".to_owned(),
            Self::WarnPaddingLength => "padding is longer than needed.".to_owned(),
            Self::WarnCorruptedPadding => "could be corrupted padding region.".to_owned(),
            Self::Error => "structural error.".to_owned(),
            Self::ErrorOffsetOutOfBinary => "points to outside the binary.".to_owned(),
            Self::ErrorZeroOffset => "offset is zero.".to_owned(),
            Self::ErrorIncompleteBinary { expected } => {
                format!("incomplete binary, expected to read {expected} bytes.")
            }
            Self::ErrorLengthTooShort { minimum } => {
                format!("length too short, must be at least {minimum}.")
            }
            Self::ErrorLengthTooLong => "length runs past the end of the binary.".to_owned(),
            Self::ErrorMisaligned => "value is misaligned.".to_owned(),
            Self::ErrorRequiredFieldNotPresent => "required field is not present.".to_owned(),
            Self::ErrorInvalidUnionType => "invalid union type value.".to_owned(),
            Self::ErrorMissingTerminator => "string is not NUL terminated.".to_owned(),
            Self::ErrorDepthLimit => "table nesting exceeds the depth limit.".to_owned(),
            Self::ErrorTooManyTables => "too many tables in the binary.".to_owned(),
        }
    }
}

impl From<VerifyError> for RegionStatus {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::OutOfBounds { .. } | VerifyError::OffsetSignWrap { .. } => {
                Self::ErrorOffsetOutOfBinary
            }
            VerifyError::Misaligned { .. } => Self::ErrorMisaligned,
            VerifyError::RecursionLimitExceeded { .. } => Self::ErrorDepthLimit,
            VerifyError::TableCountExceeded { .. } => Self::ErrorTooManyTables,
            VerifyError::ZeroOrSelfOffset { .. } => Self::ErrorZeroOffset,
            VerifyError::CorruptVTable { .. } => Self::ErrorLengthTooShort {
                minimum: crate::verifier::wire::VTABLE_HEADER_SIZE,
            },
            VerifyError::LengthOverflow { .. } => Self::ErrorLengthTooLong,
            VerifyError::MissingTerminator { .. } => Self::ErrorMissingTerminator,
            VerifyError::InvalidUnionDiscriminant { .. } => Self::ErrorInvalidUnionType,
            VerifyError::MissingRequiredField { .. } => Self::ErrorRequiredFieldNotPresent,
            _ => Self::Error,
        }
    }
}

/// Explanation attached to a region
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionComment {
    /// Role of the region
    pub kind: CommentKind,
    /// Field, object or identifier name
    pub name: String,
    /// Extra text such as the field type or a default value
    pub detail: String,
    /// Element index or field id
    pub index: usize,
    /// Check outcome
    pub status: RegionStatus,
}

impl RegionComment {
    /// A comment of the given kind
    pub fn new(kind: CommentKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Sets the name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the detail text
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Sets the index
    pub fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Sets the status
    pub fn with_status(mut self, status: RegionStatus) -> Self {
        self.status = status;
        self
    }
}

/// A contiguous run of bytes with one interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryRegion {
    /// Start position
    pub offset: usize,
    /// Length in bytes
    pub length: usize,
    /// Interpretation of the bytes
    pub region_type: RegionType,
    /// Element count when the region is an array of `region_type`
    pub array_length: Option<usize>,
    /// Target of an offset region
    pub points_to: Option<usize>,
    /// Explanation
    pub comment: RegionComment,
}

impl BinaryRegion {
    /// A region without array length or target
    pub fn new(offset: usize, length: usize, region_type: RegionType, comment: RegionComment) -> Self {
        Self {
            offset,
            length,
            region_type,
            array_length: None,
            points_to: None,
            comment,
        }
    }

    /// Marks the region as an array of `count` elements
    pub fn with_array_length(mut self, count: usize) -> Self {
        self.array_length = Some(count);
        self
    }

    /// Records the target of an offset
    pub fn with_points_to(mut self, target: usize) -> Self {
        self.points_to = Some(target);
        self
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    /// Check outcome
    pub fn status(&self) -> RegionStatus {
        self.comment.status
    }
}

/// A group of regions forming one logical structure
#[derive(Debug, Clone, PartialEq)]
pub struct BinarySection {
    /// Object or field name
    pub name: String,
    /// What the section holds
    pub kind: SectionKind,
    /// Regions, ordered by offset once annotation finishes
    pub regions: Vec<BinaryRegion>,
}

impl BinarySection {
    /// A section with the given regions
    pub fn new(name: impl Into<String>, kind: SectionKind, regions: Vec<BinaryRegion>) -> Self {
        Self {
            name: name.into(),
            kind,
            regions,
        }
    }

    /// Lowest region offset
    pub fn start(&self) -> Option<usize> {
        self.regions.iter().map(|r| r.offset).min()
    }

    /// One past the highest byte covered by any region
    pub fn end(&self) -> Option<usize> {
        self.regions.iter().map(BinaryRegion::end).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_type_from_base() {
        assert_eq!(RegionType::from(BaseType::UByte), RegionType::Uint8);
        assert_eq!(RegionType::from(BaseType::Long), RegionType::Int64);
        assert_eq!(RegionType::from(BaseType::String), RegionType::Unknown);
        assert!(RegionType::UOffset64.is_offset());
        assert!(!RegionType::VOffset.is_offset());
    }

    #[test]
    fn test_status_classification() {
        assert!(!RegionStatus::Ok.is_error());
        assert!(RegionStatus::WarnNoReferences.is_warning());
        assert!(RegionStatus::ErrorLengthTooLong.is_error());
        assert_eq!(
            RegionStatus::ErrorIncompleteBinary { expected: 4 }.message(),
            "incomplete binary, expected to read 4 bytes."
        );
    }

    #[test]
    fn test_status_from_verify_error() {
        assert_eq!(
            RegionStatus::from(VerifyError::LengthOverflow { offset: 0, length: 9 }),
            RegionStatus::ErrorLengthTooLong
        );
        assert_eq!(
            RegionStatus::from(VerifyError::CorruptVTable { offset: 0 }),
            RegionStatus::ErrorLengthTooShort { minimum: 4 }
        );
        assert_eq!(
            RegionStatus::from(VerifyError::IdentifierMismatch { offset: 4 }),
            RegionStatus::Error
        );
    }

    #[test]
    fn test_section_bounds() {
        let section = BinarySection::new(
            "T",
            SectionKind::Table,
            vec![
                BinaryRegion::new(12, 4, RegionType::SOffset, RegionComment::default()),
                BinaryRegion::new(16, 2, RegionType::Int16, RegionComment::default()),
            ],
        );
        assert_eq!(section.start(), Some(12));
        assert_eq!(section.end(), Some(18));
        assert_eq!(BinarySection::new("", SectionKind::Padding, vec![]).end(), None);
    }
}
