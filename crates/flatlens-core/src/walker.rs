//! Schema-driven traversal shared by verification and annotation.
//!
//! One walk visits the header, tables, vtables, strings, vectors, structs
//! and unions reachable from the root. The [`Sink`] decides what happens at
//! each step:
//!
//! - [`Discard`] is strict: the first violation aborts the walk with a
//!   [`VerifyError`] and no regions are ever built
//! - The annotator's section map is lenient: violations become regions with
//!   an error status, and the walk continues wherever it safely can
//!
//! Each table's vtable is parsed once and cached by position, so tables
//! sharing a vtable reuse its slots. Strings are visited once per position.

use crate::annotate::{
    BinaryRegion, BinarySection, CommentKind, RegionComment, RegionStatus, RegionType, SectionKind,
};
use crate::error::{VerifyError, VerifyResult};
use crate::schema::{BaseType, Enum, EnumVal, Field, Object, Schema, Type};
use crate::verifier::wire::{
    FILE_IDENTIFIER_LENGTH, SIZE_PREFIX, SIZE_SOFFSET, SIZE_UOFFSET, SIZE_UOFFSET64, SIZE_VOFFSET,
    VTABLE_HEADER_SIZE,
};
use crate::verifier::{BufferOptions, BufferReader, Verifier};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::rc::Rc;
use tracing::trace;

/// Receives the sections a walk produces
pub(crate) trait Sink {
    /// Abort on the first violation instead of recording it
    const STRICT: bool;

    /// Stores a finished section; the first section at an offset wins
    fn add_section(&mut self, offset: usize, section: BinarySection);

    /// Whether `offset` falls inside a stored section
    fn contains(&self, offset: usize) -> bool;

    /// Appends another referrer's name to the section at `offset`
    fn append_name(&mut self, offset: usize, name: &str);
}

/// Strict sink that keeps nothing
pub(crate) struct Discard;

impl Sink for Discard {
    const STRICT: bool = true;

    fn add_section(&mut self, _offset: usize, _section: BinarySection) {}

    fn contains(&self, _offset: usize) -> bool {
        false
    }

    fn append_name(&mut self, _offset: usize, _name: &str) {}
}

/// A parsed vtable, independent of the object that first referred to it
#[derive(Debug)]
struct VTable {
    table_size: u16,
    slots: Vec<u16>,
}

impl VTable {
    /// Table-relative position of field `id`, if present
    fn field_offset(&self, id: u16) -> Option<usize> {
        match self.slots.get(id as usize) {
            Some(&slot) if slot != 0 => Some(slot as usize),
            _ => None,
        }
    }
}

/// The table owning the field being walked
#[derive(Debug, Clone)]
struct Parent {
    offset: usize,
    vtable: Rc<VTable>,
}

/// What an offset points at
#[derive(Debug, Clone)]
enum Node<'s> {
    Table {
        object: &'s Object,
        kind: SectionKind,
    },
    String {
        owner: &'s str,
        field: &'s str,
    },
    Vector {
        owner: &'s Object,
        field: &'s Field,
        parent: Parent,
    },
    Union {
        field: &'s Field,
        variant: &'s EnumVal,
    },
}

pub(crate) struct Walker<'s, 'b, 'v, S: Sink> {
    schema: &'s Schema,
    verifier: &'v mut Verifier<'b>,
    sink: S,
    vtables: HashMap<usize, (Rc<VTable>, Vec<&'s str>)>,
    strings: HashSet<usize>,
}

impl<'s, 'b, 'v, S: Sink> Walker<'s, 'b, 'v, S> {
    pub(crate) fn new(schema: &'s Schema, verifier: &'v mut Verifier<'b>, sink: S) -> Self {
        Self {
            schema,
            verifier,
            sink,
            vtables: HashMap::new(),
            strings: HashSet::new(),
        }
    }

    pub(crate) fn into_sink(self) -> S {
        self.sink
    }

    /// Walks the header and everything reachable from the root table
    pub(crate) fn walk_buffer(&mut self, opts: &BufferOptions) -> VerifyResult<()> {
        let root = self.schema.root().ok_or(VerifyError::MissingRootType)?;
        match self.header(opts, root)? {
            Some(table) => self.walk_table(table, root, SectionKind::RootTable),
            None => Ok(()),
        }
    }

    fn reader(&self) -> BufferReader<'b> {
        *self.verifier.reader()
    }

    fn object_of(&self, ty: &Type) -> Option<&'s Object> {
        self.schema.object_of(ty)
    }

    fn enum_of(&self, ty: &Type) -> Option<&'s Enum> {
        self.schema.enum_of(ty)
    }

    /// Strict: returns `err`. Lenient: records the region built from the
    /// matching status, if any, and carries on.
    fn fail(
        &self,
        regions: &mut Vec<BinaryRegion>,
        err: VerifyError,
        region: impl FnOnce(RegionStatus) -> Option<BinaryRegion>,
    ) -> VerifyResult<()> {
        if S::STRICT {
            trace!(%err, "Verification failed");
            return Err(err);
        }
        regions.extend(region(RegionStatus::from(err)));
        Ok(())
    }

    fn record(&self, regions: &mut Vec<BinaryRegion>, region: impl FnOnce() -> BinaryRegion) {
        if !S::STRICT {
            regions.push(region());
        }
    }

    fn add_section(
        &mut self,
        offset: usize,
        name: impl FnOnce() -> String,
        kind: SectionKind,
        regions: Vec<BinaryRegion>,
    ) {
        if !S::STRICT && !regions.is_empty() {
            self.sink
                .add_section(offset, BinarySection::new(name(), kind, regions));
        }
    }

    /// The bytes left at `offset`, marked as a truncated region of
    /// `expected` bytes; `None` past the end of the buffer
    fn incomplete(
        &self,
        offset: usize,
        expected: usize,
        comment: RegionComment,
    ) -> Option<BinaryRegion> {
        let length = self.reader().remaining(offset).min(expected);
        (length > 0).then(|| {
            BinaryRegion::new(
                offset,
                length,
                RegionType::Unknown,
                comment.with_status(RegionStatus::ErrorIncompleteBinary { expected }),
            )
            .with_array_length(length)
        })
    }

    /// A region carrying `status`, or a truncated region when the bytes are
    /// not all there
    fn flagged(
        &self,
        offset: usize,
        length: usize,
        region_type: RegionType,
        comment: RegionComment,
        status: RegionStatus,
    ) -> Option<BinaryRegion> {
        if self.reader().slice(offset, length).is_some() {
            Some(BinaryRegion::new(
                offset,
                length,
                region_type,
                comment.with_status(status),
            ))
        } else {
            self.incomplete(offset, length, comment)
        }
    }

    fn header(&mut self, opts: &BufferOptions, root: &Object) -> VerifyResult<Option<usize>> {
        if S::STRICT {
            return self.verifier.verify_buffer_root(opts).map(Some);
        }

        let reader = self.reader();
        let mut regions = Vec::new();
        let mut pos = 0;

        if opts.size_prefixed {
            let expected = reader.len().saturating_sub(SIZE_PREFIX);
            let status = match reader.read_scalar::<u32>(0) {
                Some(prefix) if prefix as usize == expected => RegionStatus::Ok,
                _ => RegionStatus::Error,
            };
            regions.push(BinaryRegion::new(
                0,
                SIZE_PREFIX,
                RegionType::Uint32,
                RegionComment::new(CommentKind::SizePrefix).with_status(status),
            ));
            pos = SIZE_PREFIX;
        }

        let target = self.offset_region(&mut regions, pos, false, || {
            RegionComment::new(CommentKind::RootTableOffset).named(&root.name)
        })?;

        let ident = pos + SIZE_UOFFSET;
        if reader.is_printable(ident, FILE_IDENTIFIER_LENGTH) {
            let status = match opts.identifier {
                Some(expected) if reader.slice(ident, FILE_IDENTIFIER_LENGTH) != Some(&expected[..]) => {
                    RegionStatus::Error
                }
                _ => RegionStatus::Ok,
            };
            regions.push(
                BinaryRegion::new(
                    ident,
                    FILE_IDENTIFIER_LENGTH,
                    RegionType::Char,
                    RegionComment::new(CommentKind::FileIdentifier).with_status(status),
                )
                .with_array_length(FILE_IDENTIFIER_LENGTH),
            );
        }

        self.add_section(0, String::new, SectionKind::Header, regions);
        Ok(target)
    }

    /// Records the uoffset at `pos` and returns its verified target
    fn offset_region(
        &self,
        regions: &mut Vec<BinaryRegion>,
        pos: usize,
        wide: bool,
        comment: impl FnOnce() -> RegionComment,
    ) -> VerifyResult<Option<usize>> {
        let (width, region_type) = if wide {
            (SIZE_UOFFSET64, RegionType::UOffset64)
        } else {
            (SIZE_UOFFSET, RegionType::UOffset)
        };
        let resolved = if wide {
            self.verifier.verify_offset64(pos)
        } else {
            self.verifier.verify_offset(pos)
        };

        match resolved {
            Ok(target) => {
                self.record(regions, || {
                    BinaryRegion::new(pos, width, region_type, comment()).with_points_to(target)
                });
                Ok(Some(target))
            }
            Err(err) => {
                let reader = self.reader();
                let raw = if wide {
                    reader
                        .read_scalar::<u64>(pos)
                        .and_then(|o| usize::try_from(o).ok())
                } else {
                    reader.read_scalar::<u32>(pos).map(|o| o as usize)
                };
                self.fail(regions, err, |status| match raw {
                    Some(raw) => Some(
                        BinaryRegion::new(pos, width, region_type, comment().with_status(status))
                            .with_points_to(pos.saturating_add(raw)),
                    ),
                    None => self.incomplete(pos, width, comment()),
                })?;
                Ok(None)
            }
        }
    }

    fn walk(&mut self, offset: usize, node: Node<'s>) -> VerifyResult<()> {
        match node {
            Node::Table { object, kind } => self.walk_table(offset, object, kind),
            Node::String { owner, field } => self.walk_string(offset, owner, field),
            Node::Vector {
                owner,
                field,
                parent,
            } => self.walk_vector(offset, owner, field, &parent),
            Node::Union { field, variant } => self.walk_union(offset, field, variant),
        }
    }

    fn walk_table(&mut self, table: usize, object: &'s Object, kind: SectionKind) -> VerifyResult<()> {
        if self.sink.contains(table) {
            return Ok(());
        }
        let result = self.table(table, object, kind);
        self.verifier.exit_table();
        result
    }

    fn table(&mut self, table: usize, object: &'s Object, kind: SectionKind) -> VerifyResult<()> {
        let mut regions = Vec::new();
        let name = || object.name.clone();
        let vtable_comment = || RegionComment::new(CommentKind::TableVTableOffset);

        let started = if S::STRICT {
            self.verifier
                .verify_table_start(table)
                .map(|header| header.offset)
        } else {
            self.verifier
                .enter_table()
                .and_then(|()| self.verifier.vtable_of(table))
        };
        let vtable_pos = match started {
            Ok(pos) => pos,
            Err(err) => {
                self.fail(&mut regions, err, |status| {
                    self.flagged(table, SIZE_SOFFSET, RegionType::SOffset, vtable_comment(), status)
                })?;
                self.add_section(table, name, kind, regions);
                return Ok(());
            }
        };

        if let Err(err) = self.verifier.verify_range(vtable_pos, SIZE_VOFFSET) {
            self.fail(&mut regions, err, |status| {
                self.flagged(table, SIZE_SOFFSET, RegionType::SOffset, vtable_comment(), status)
                    .map(|r| r.with_points_to(vtable_pos))
            })?;
            self.add_section(table, name, kind, regions);
            return Ok(());
        }
        self.record(&mut regions, || {
            BinaryRegion::new(table, SIZE_SOFFSET, RegionType::SOffset, vtable_comment())
                .with_points_to(vtable_pos)
        });

        let Some(vtable) = self.vtable(vtable_pos, object, table)? else {
            self.add_section(table, name, kind, regions);
            return Ok(());
        };
        if let Err(err) = self.verifier.verify_range(table, vtable.table_size as usize) {
            // The vtable section flags the referring table size
            self.fail(&mut regions, err, |_| None)?;
        }
        let parent = Parent {
            offset: table,
            vtable: Rc::clone(&vtable),
        };

        for field in object.fields() {
            self.table_field(&mut regions, object, field, &parent)?;
        }

        if !S::STRICT {
            let reader = self.reader();
            let table_end = table
                .saturating_add(vtable.table_size as usize)
                .min(reader.len());
            self.unknown_fields(&mut regions, object, &parent, table_end);

            let last = regions.iter().map(BinaryRegion::end).max().unwrap_or(table);
            if last < table_end {
                regions.push(padding_region(&reader, last, table_end - last));
            }
        }

        self.add_section(table, name, kind, regions);
        Ok(())
    }

    /// Parses the vtable at `offset` or returns the cached one
    fn vtable(
        &mut self,
        offset: usize,
        object: &'s Object,
        table: usize,
    ) -> VerifyResult<Option<Rc<VTable>>> {
        if let Some((vtable, referrers)) = self.vtables.get_mut(&offset) {
            if !referrers.contains(&object.name.as_str()) {
                referrers.push(&object.name);
                self.sink.append_name(offset, &object.name);
            }
            return Ok(Some(Rc::clone(vtable)));
        }
        if self.sink.contains(offset) {
            return Ok(None);
        }

        let mut regions = Vec::new();
        let name = || object.name.clone();
        let size_comment = || RegionComment::new(CommentKind::VTableSize);

        let header = match self.verifier.verify_vtable(offset) {
            Ok(header) => header,
            Err(err) => {
                self.fail(&mut regions, err, |_| {
                    self.flagged(
                        offset,
                        SIZE_VOFFSET,
                        RegionType::Uint16,
                        size_comment(),
                        length_status(err),
                    )
                })?;
                self.add_section(offset, name, SectionKind::VTable, regions);
                return Ok(None);
            }
        };
        self.record(&mut regions, || {
            BinaryRegion::new(offset, SIZE_VOFFSET, RegionType::Uint16, size_comment())
        });

        let reader = self.reader();
        if !S::STRICT {
            let table_size = header.table_size as usize;
            let status = if table_size < SIZE_SOFFSET {
                RegionStatus::ErrorLengthTooShort {
                    minimum: SIZE_SOFFSET,
                }
            } else if table.saturating_add(table_size) > reader.len() {
                RegionStatus::ErrorLengthTooLong
            } else {
                RegionStatus::Ok
            };
            regions.push(BinaryRegion::new(
                offset + SIZE_VOFFSET,
                SIZE_VOFFSET,
                RegionType::Uint16,
                RegionComment::new(CommentKind::VTableReferringTableLength).with_status(status),
            ));
        }

        // The whole vtable was range checked above
        let slots: Vec<u16> = (0..header.slot_count())
            .map(|i| {
                reader
                    .read_scalar::<u16>(offset + VTABLE_HEADER_SIZE + SIZE_VOFFSET * i)
                    .unwrap_or_default()
            })
            .collect();

        if !S::STRICT {
            for (id, &slot) in slots.iter().enumerate() {
                let pos = offset + VTABLE_HEADER_SIZE + SIZE_VOFFSET * id;
                regions.push(self.slot_region(pos, id, slot, object, table));
            }
        }

        let vtable = Rc::new(VTable {
            table_size: header.table_size,
            slots,
        });
        self.vtables
            .insert(offset, (Rc::clone(&vtable), vec![object.name.as_str()]));
        self.add_section(offset, name, SectionKind::VTable, regions);
        Ok(Some(vtable))
    }

    fn slot_region(
        &self,
        pos: usize,
        id: usize,
        slot: u16,
        object: &Object,
        table: usize,
    ) -> BinaryRegion {
        let Some(field) = u16::try_from(id).ok().and_then(|id| object.field_by_id(id)) else {
            return BinaryRegion::new(
                pos,
                SIZE_VOFFSET,
                RegionType::VOffset,
                RegionComment::new(CommentKind::VTableUnknownFieldOffset).index(id),
            );
        };

        let mut comment = RegionComment::new(CommentKind::VTableFieldOffset)
            .named(&field.name)
            .index(id);
        if slot == 0 {
            comment = if field.required {
                comment.with_status(RegionStatus::ErrorRequiredFieldNotPresent)
            } else {
                comment.detail(default_label(field))
            };
        } else if table.saturating_add(slot as usize) >= self.reader().len() {
            comment = comment.with_status(RegionStatus::ErrorOffsetOutOfBinary);
        }
        BinaryRegion::new(pos, SIZE_VOFFSET, RegionType::VOffset, comment)
    }

    fn table_field(
        &mut self,
        regions: &mut Vec<BinaryRegion>,
        object: &'s Object,
        field: &'s Field,
        parent: &Parent,
    ) -> VerifyResult<()> {
        let Some(slot) = parent.vtable.field_offset(field.id) else {
            if field.required {
                let err = VerifyError::MissingRequiredField {
                    offset: parent.offset,
                    id: field.id,
                };
                // The vtable slot region already carries the error
                return self.fail(regions, err, |_| None);
            }
            return Ok(());
        };
        let pos = parent.offset.saturating_add(slot);
        let ty = &field.ty;

        let target = match ty.base_type {
            base if base.is_scalar() => return self.scalar_field(regions, pos, object, field, parent),
            BaseType::Union => return self.union_field(regions, pos, field, parent),
            BaseType::Obj => {
                let Some(target) = self.object_of(ty) else {
                    return Ok(());
                };
                if target.is_struct {
                    return self.inline_struct(regions, pos, field, target);
                }
                Node::Table {
                    object: target,
                    kind: SectionKind::Table,
                }
            }
            BaseType::String => Node::String {
                owner: &object.name,
                field: &field.name,
            },
            BaseType::Vector | BaseType::Vector64 => Node::Vector {
                owner: object,
                field,
                parent: parent.clone(),
            },
            _ => return Ok(()),
        };

        let detail = match &target {
            Node::Table { .. } => "(table)",
            Node::String { .. } => "(string)",
            _ if ty.base_type == BaseType::Vector64 => "(vector64)",
            _ => "(vector)",
        };
        let offset = self.offset_region(regions, pos, field.offset64, || {
            field_comment(CommentKind::TableOffsetField, field).detail(detail)
        })?;
        match offset {
            Some(offset) => self.walk(offset, target),
            None => Ok(()),
        }
    }

    fn scalar_field(
        &self,
        regions: &mut Vec<BinaryRegion>,
        pos: usize,
        object: &Object,
        field: &Field,
        parent: &Parent,
    ) -> VerifyResult<()> {
        let base = field.ty.base_type;
        let size = base.size();
        let region_type = RegionType::from(base);
        let comment = || field_comment(CommentKind::TableField, field).detail(type_detail(base));

        if let Err(err) = self
            .verifier
            .verify_alignment_to(pos, size)
            .and_then(|()| self.verifier.verify_range(pos, size))
        {
            return self.fail(regions, err, |status| {
                self.flagged(pos, size, region_type, comment(), status)
            });
        }

        let mut status = RegionStatus::Ok;
        if base == BaseType::UType {
            let value = self.reader().read_scalar::<u8>(pos).unwrap_or_default();
            let value_missing = field
                .id
                .checked_add(1)
                .and_then(|id| object.field_by_id(id))
                .filter(|f| f.ty.base_type == BaseType::Union)
                .map_or(false, |f| parent.vtable.field_offset(f.id).is_none());
            if value != 0 && value_missing {
                let err = VerifyError::InvalidUnionDiscriminant { offset: pos };
                return self.fail(regions, err, |status| {
                    Some(BinaryRegion::new(pos, size, region_type, comment().with_status(status)))
                });
            }
            if !S::STRICT && !self.is_union_value(&field.ty, value) {
                status = RegionStatus::ErrorInvalidUnionType;
            }
        }

        self.record(regions, || {
            BinaryRegion::new(pos, size, region_type, comment().with_status(status))
        });
        Ok(())
    }

    fn is_union_value(&self, ty: &Type, value: u8) -> bool {
        value == 0
            || self
                .enum_of(ty)
                .map_or(false, |e| e.value_of(value.into()).is_some())
    }

    fn inline_struct(
        &self,
        regions: &mut Vec<BinaryRegion>,
        pos: usize,
        field: &Field,
        object: &Object,
    ) -> VerifyResult<()> {
        if let Err(err) = self
            .verifier
            .verify_alignment_to(pos, object.minalign)
            .and_then(|()| self.verifier.verify_range(pos, object.bytesize))
        {
            return self.fail(regions, err, |status| {
                self.flagged(
                    pos,
                    object.bytesize,
                    RegionType::Unknown,
                    field_comment(CommentKind::StructField, field)
                        .detail(format!("({})", object.name)),
                    status,
                )
            });
        }
        if !S::STRICT {
            self.struct_regions(regions, pos, &field.name, object);
        }
        Ok(())
    }

    fn union_field(
        &mut self,
        regions: &mut Vec<BinaryRegion>,
        pos: usize,
        field: &'s Field,
        parent: &Parent,
    ) -> VerifyResult<()> {
        let reader = self.reader();
        let discriminant = field
            .id
            .checked_sub(1)
            .and_then(|id| parent.vtable.field_offset(id))
            .and_then(|slot| reader.read_scalar::<u8>(parent.offset + slot));
        let comment = || field_comment(CommentKind::TableOffsetField, field);

        let discriminant = match discriminant {
            Some(d) if d != 0 => d,
            _ => {
                let err = VerifyError::InvalidUnionDiscriminant { offset: pos };
                return self.fail(regions, err, |status| {
                    self.flagged(pos, SIZE_UOFFSET, RegionType::UOffset, comment(), status)
                });
            }
        };

        // Unknown discriminants come from newer schemas and are skipped
        let variant = self
            .enum_of(&field.ty)
            .and_then(|e| e.value_of(discriminant.into()));
        let target = self.offset_region(regions, pos, field.offset64, || {
            comment().detail(union_detail(variant))
        })?;
        match (target, variant) {
            (Some(target), Some(variant)) => self.walk(target, Node::Union { field, variant }),
            _ => Ok(()),
        }
    }

    fn walk_union(
        &mut self,
        offset: usize,
        field: &'s Field,
        variant: &'s EnumVal,
    ) -> VerifyResult<()> {
        let Some(ty) = &variant.union_type else {
            return Ok(());
        };
        match ty.base_type {
            BaseType::Obj => match self.object_of(ty) {
                Some(object) if object.is_struct => {
                    self.walk_struct(offset, object, SectionKind::Union)
                }
                Some(object) => self.walk_table(offset, object, SectionKind::Table),
                None => Ok(()),
            },
            BaseType::String => self.walk_string(offset, &variant.name, &field.name),
            _ => Ok(()),
        }
    }

    fn walk_struct(&mut self, offset: usize, object: &'s Object, kind: SectionKind) -> VerifyResult<()> {
        if self.sink.contains(offset) {
            return Ok(());
        }
        let mut regions = Vec::new();
        if let Err(err) = self
            .verifier
            .verify_alignment_to(offset, object.minalign)
            .and_then(|()| self.verifier.verify_range(offset, object.bytesize))
        {
            self.fail(&mut regions, err, |status| {
                self.flagged(
                    offset,
                    object.bytesize,
                    RegionType::Unknown,
                    RegionComment::new(CommentKind::StructField).named(&object.name),
                    status,
                )
            })?;
        } else if !S::STRICT {
            self.struct_regions(&mut regions, offset, &object.name, object);
        }
        self.add_section(offset, || object.name.clone(), kind, regions);
        Ok(())
    }

    /// Regions for the members of the struct at `offset`; annotation only
    fn struct_regions(
        &self,
        regions: &mut Vec<BinaryRegion>,
        offset: usize,
        path: &str,
        object: &Object,
    ) {
        for field in object.fields() {
            let ty = &field.ty;
            let name = format!("{path}.{}", field.name);
            let mut cursor = offset + field.offset as usize;

            match ty.base_type {
                base if base.is_scalar() => {
                    self.struct_scalar(
                        regions,
                        cursor,
                        base,
                        RegionComment::new(CommentKind::StructField)
                            .named(name)
                            .detail(format!("of '{}' ({})", object.name, base.name())),
                    );
                    cursor += base.size();
                }
                BaseType::Obj => {
                    if let Some(inner) = self.object_of(ty) {
                        self.struct_regions(regions, cursor, &name, inner);
                        cursor += inner.bytesize;
                    }
                }
                BaseType::Array => {
                    for i in 0..ty.fixed_length as usize {
                        if ty.element.is_scalar() {
                            self.struct_scalar(
                                regions,
                                cursor,
                                ty.element,
                                RegionComment::new(CommentKind::ArrayField)
                                    .named(&name)
                                    .index(i)
                                    .detail(format!("of '{}' ({})", object.name, ty.element.name())),
                            );
                            cursor += ty.element.size();
                        } else if let Some(inner) = self.object_of(ty) {
                            self.struct_regions(regions, cursor, &format!("{name}[{i}]"), inner);
                            cursor += inner.bytesize;
                        }
                    }
                }
                _ => {}
            }

            let padding = field.padding as usize;
            if padding > 0 && self.reader().slice(cursor, padding).is_some() {
                regions.push(padding_region(&self.reader(), cursor, padding));
            }
        }
    }

    fn struct_scalar(
        &self,
        regions: &mut Vec<BinaryRegion>,
        offset: usize,
        base: BaseType,
        comment: RegionComment,
    ) {
        let size = base.size();
        let region = if self.reader().slice(offset, size).is_some() {
            Some(BinaryRegion::new(offset, size, RegionType::from(base), comment))
        } else {
            self.incomplete(offset, size, comment)
        };
        regions.extend(region);
    }

    /// Regions for vtable slots the schema does not know, sized up to the
    /// next present field or the table end
    fn unknown_fields(
        &self,
        regions: &mut Vec<BinaryRegion>,
        object: &Object,
        parent: &Parent,
        table_end: usize,
    ) {
        let mut present: Vec<(usize, bool)> = parent
            .vtable
            .slots
            .iter()
            .enumerate()
            .filter(|(_, &slot)| slot != 0)
            .map(|(id, &slot)| {
                let known = u16::try_from(id)
                    .ok()
                    .and_then(|id| object.field_by_id(id))
                    .is_some();
                (slot as usize, known)
            })
            .collect();
        present.sort_unstable();

        let reader = self.reader();
        for (i, &(slot, known)) in present.iter().enumerate() {
            if known {
                continue;
            }
            let pos = parent.offset.saturating_add(slot);
            let next = present[i + 1..]
                .iter()
                .map(|&(s, _)| parent.offset.saturating_add(s))
                .find(|&p| p > pos)
                .unwrap_or(table_end);
            let length = next.saturating_sub(pos);
            if length == 0 || !reader.is_valid_offset(pos) {
                continue;
            }

            let mut comment = RegionComment::new(CommentKind::TableUnknownField);
            if length == SIZE_UOFFSET {
                let target = reader
                    .read_scalar::<u32>(pos)
                    .map(|o| pos.saturating_add(o as usize))
                    .filter(|&t| reader.is_valid_offset(t));
                if let Some(target) = target {
                    comment = comment.detail(format!("<possibly an offset? Check Loc: +0x{target:08X}>"));
                }
            }

            let region = if reader.slice(pos, length).is_some() {
                Some(
                    BinaryRegion::new(pos, length, RegionType::Unknown, comment)
                        .with_array_length(length),
                )
            } else {
                self.incomplete(pos, length, comment)
            };
            regions.extend(region);
        }
    }

    fn walk_vector(
        &mut self,
        offset: usize,
        owner: &'s Object,
        field: &'s Field,
        parent: &Parent,
    ) -> VerifyResult<()> {
        if self.sink.contains(offset) {
            return Ok(());
        }
        let ty = &field.ty;
        let (prefix, length_type, kind) = if ty.base_type == BaseType::Vector64 {
            (SIZE_UOFFSET64, RegionType::Uint64, SectionKind::Vector64)
        } else {
            (SIZE_UOFFSET, RegionType::Uint32, SectionKind::Vector)
        };
        let name = || format!("{}.{}", owner.name, field.name);
        let length_comment = || RegionComment::new(CommentKind::VectorLength);
        let mut regions = Vec::new();

        let element = self.object_of(ty).filter(|_| ty.element == BaseType::Obj);
        let elem_size = match element {
            Some(object) if object.is_struct => object.bytesize,
            _ => ty.element.size(),
        };

        let elements = if kind == SectionKind::Vector64 {
            self.verifier.verify_vector64(offset, elem_size)
        } else {
            self.verifier.verify_vector_or_string(offset, elem_size)
        };
        let elements = match elements {
            Ok(range) => range,
            Err(err) => {
                self.fail(&mut regions, err, |_| {
                    self.flagged(offset, prefix, length_type, length_comment(), length_status(err))
                })?;
                self.add_section(offset, name, kind, regions);
                return Ok(());
            }
        };
        self.record(&mut regions, || {
            BinaryRegion::new(offset, prefix, length_type, length_comment())
        });
        let count = elements.len() / elem_size.max(1);

        match ty.element {
            BaseType::Obj => match element {
                Some(object) if object.is_struct => {
                    if !S::STRICT {
                        for i in 0..count {
                            let path = format!("{}[{i}]", field.name);
                            self.struct_regions(&mut regions, elements.start + i * elem_size, &path, object);
                        }
                    }
                }
                Some(object) => {
                    for i in 0..count {
                        let pos = elements.start + SIZE_UOFFSET * i;
                        let target = self.offset_region(&mut regions, pos, false, || {
                            RegionComment::new(CommentKind::VectorTableValue).index(i)
                        })?;
                        if let Some(target) = target {
                            self.walk_table(target, object, SectionKind::Table)?;
                        }
                    }
                }
                None => {}
            },
            BaseType::String => {
                for i in 0..count {
                    let pos = elements.start + SIZE_UOFFSET * i;
                    let target = self.offset_region(&mut regions, pos, false, || {
                        RegionComment::new(CommentKind::VectorStringValue).index(i)
                    })?;
                    if let Some(target) = target {
                        self.walk_string(target, &owner.name, &field.name)?;
                    }
                }
            }
            BaseType::Union => {
                self.union_vector(&mut regions, elements.clone(), count, field, parent)?;
            }
            base if base.is_scalar() => {
                if !S::STRICT {
                    let reader = self.reader();
                    let size = base.size();
                    for i in 0..count {
                        let pos = elements.start + i * size;
                        let mut comment = RegionComment::new(CommentKind::VectorValue).index(i);
                        if base == BaseType::UType {
                            let value = reader.read_scalar::<u8>(pos).unwrap_or_default();
                            if !self.is_union_value(ty, value) {
                                comment = comment.with_status(RegionStatus::ErrorInvalidUnionType);
                            }
                        }
                        regions.push(BinaryRegion::new(pos, size, RegionType::from(base), comment));
                    }
                }
            }
            _ => {}
        }

        self.add_section(offset, name, kind, regions);
        Ok(())
    }

    fn union_vector(
        &mut self,
        regions: &mut Vec<BinaryRegion>,
        elements: Range<usize>,
        count: usize,
        field: &'s Field,
        parent: &Parent,
    ) -> VerifyResult<()> {
        let types = self
            .union_types(field, parent)
            .filter(|types| types.len() == count);
        if types.is_none() {
            let err = VerifyError::InvalidUnionDiscriminant {
                offset: elements.start.saturating_sub(SIZE_UOFFSET),
            };
            self.fail(regions, err, |_| None)?;
        }

        let reader = self.reader();
        let union_enum = self.enum_of(&field.ty);
        for i in 0..count {
            let pos = elements.start + SIZE_UOFFSET * i;
            let comment = || RegionComment::new(CommentKind::VectorUnionValue).index(i);
            let discriminant = types
                .as_ref()
                .and_then(|types| reader.read_scalar::<u8>(types.start + i));

            match discriminant {
                None => {
                    let status = RegionStatus::ErrorInvalidUnionType;
                    if !S::STRICT {
                        regions.extend(self.flagged(pos, SIZE_UOFFSET, RegionType::UOffset, comment(), status));
                    }
                }
                Some(0) => {
                    if !S::STRICT {
                        regions.extend(self.flagged(pos, SIZE_UOFFSET, RegionType::UOffset, comment(), RegionStatus::Ok));
                    }
                }
                Some(d) => {
                    let variant = union_enum.and_then(|e| e.value_of(d.into()));
                    let target = self.offset_region(regions, pos, false, || {
                        comment().detail(union_detail(variant))
                    })?;
                    if let (Some(target), Some(variant)) = (target, variant) {
                        self.walk(target, Node::Union { field, variant })?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Byte range of the discriminant vector paired with a union vector
    fn union_types(&self, field: &Field, parent: &Parent) -> Option<Range<usize>> {
        let slot = parent.vtable.field_offset(field.id.checked_sub(1)?)?;
        let target = self.verifier.verify_offset(parent.offset + slot).ok()?;
        self.verifier.verify_vector_or_string(target, 1).ok()
    }

    fn walk_string(&mut self, offset: usize, owner: &str, field: &str) -> VerifyResult<()> {
        if !self.strings.insert(offset) || self.sink.contains(offset) {
            return Ok(());
        }
        let name = || format!("{owner}.{field}");
        let mut regions = Vec::new();

        let chars = match self.verifier.verify_vector_or_string(offset, 1) {
            Ok(chars) => chars,
            Err(err) => {
                self.fail(&mut regions, err, |_| {
                    self.flagged(
                        offset,
                        SIZE_UOFFSET,
                        RegionType::Uint32,
                        RegionComment::new(CommentKind::StringLength),
                        length_status(err),
                    )
                })?;
                self.add_section(offset, name, SectionKind::String, regions);
                return Ok(());
            }
        };

        self.record(&mut regions, || {
            BinaryRegion::new(
                offset,
                SIZE_UOFFSET,
                RegionType::Uint32,
                RegionComment::new(CommentKind::StringLength),
            )
        });
        if !chars.is_empty() {
            self.record(&mut regions, || {
                BinaryRegion::new(
                    chars.start,
                    chars.len(),
                    RegionType::Char,
                    RegionComment::new(CommentKind::StringValue),
                )
                .with_array_length(chars.len())
            });
        }
        match self.verifier.verify_terminator(chars.end) {
            Ok(()) => self.record(&mut regions, || {
                BinaryRegion::new(
                    chars.end,
                    1,
                    RegionType::Char,
                    RegionComment::new(CommentKind::StringTerminator),
                )
            }),
            Err(err) => self.fail(&mut regions, err, |status| {
                self.flagged(
                    chars.end,
                    1,
                    RegionType::Char,
                    RegionComment::new(CommentKind::StringTerminator),
                    status,
                )
            })?,
        }

        self.add_section(offset, name, SectionKind::String, regions);
        Ok(())
    }
}

/// A run of padding: zero bytes are plain padding, anything else is suspect
pub(crate) fn padding_region(reader: &BufferReader<'_>, offset: usize, length: usize) -> BinaryRegion {
    let comment = RegionComment::new(CommentKind::Padding);
    if reader.is_zero(offset, length) {
        BinaryRegion::new(offset, length, RegionType::Uint8, comment).with_array_length(length)
    } else {
        BinaryRegion::new(
            offset,
            length,
            RegionType::Unknown,
            comment.with_status(RegionStatus::WarnCorruptedPadding),
        )
        .with_array_length(length)
    }
}

fn field_comment(kind: CommentKind, field: &Field) -> RegionComment {
    RegionComment::new(kind).named(&field.name)
}

fn type_detail(base: BaseType) -> String {
    format!("({})", base.name())
}

fn union_detail(variant: Option<&EnumVal>) -> String {
    match variant {
        Some(variant) => format!("(union of type `{}`)", variant.name),
        None => "(union)".to_owned(),
    }
}

/// Status for a length prefix that could not be verified
fn length_status(err: VerifyError) -> RegionStatus {
    match err {
        VerifyError::OutOfBounds { .. } | VerifyError::LengthOverflow { .. } => {
            RegionStatus::ErrorLengthTooLong
        }
        other => other.into(),
    }
}

/// Label for a field absent from its table
fn default_label(field: &Field) -> String {
    let base = field.ty.base_type;
    if base.is_scalar() && !field.optional {
        if base.is_float() {
            format!("<defaults to {}> ({})", field.default_real, base.name())
        } else {
            format!("<defaults to {}> ({})", field.default_integer, base.name())
        }
    } else {
        format!("<null> ({})", base.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_label() {
        let hp = Field::scalar("hp", 0, BaseType::Short).with_default_integer(100);
        assert_eq!(default_label(&hp), "<defaults to 100> (Short)");

        let speed = Field::scalar("speed", 1, BaseType::Float).with_default_real(1.5);
        assert_eq!(default_label(&speed), "<defaults to 1.5> (Float)");

        let name = Field::string("name", 2);
        assert_eq!(default_label(&name), "<null> (String)");

        let maybe = Field::scalar("maybe", 3, BaseType::Int).optional();
        assert_eq!(default_label(&maybe), "<null> (Int)");
    }

    #[test]
    fn test_padding_region() {
        let data = [0u8, 0, 0, 7, 0, 0];
        let reader = BufferReader::new(&data);
        let clean = padding_region(&reader, 0, 3);
        assert_eq!(clean.region_type, RegionType::Uint8);
        assert_eq!(clean.status(), RegionStatus::Ok);

        let dirty = padding_region(&reader, 2, 3);
        assert_eq!(dirty.region_type, RegionType::Unknown);
        assert_eq!(dirty.status(), RegionStatus::WarnCorruptedPadding);
    }

    #[test]
    fn test_vtable_field_offset() {
        let vtable = VTable {
            table_size: 12,
            slots: vec![4, 0, 8],
        };
        assert_eq!(vtable.field_offset(0), Some(4));
        assert_eq!(vtable.field_offset(1), None);
        assert_eq!(vtable.field_offset(2), Some(8));
        assert_eq!(vtable.field_offset(3), None);
    }

    #[test]
    fn test_length_status() {
        assert_eq!(
            length_status(VerifyError::OutOfBounds { offset: 0, length: 9 }),
            RegionStatus::ErrorLengthTooLong
        );
        assert_eq!(
            length_status(VerifyError::Misaligned { offset: 1, align: 4 }),
            RegionStatus::ErrorMisaligned
        );
    }

    #[test]
    fn test_strict_walk_without_root() {
        let schema = Schema::new(vec![Object::table("T", vec![])], vec![], None)
            .expect("valid schema");
        let data = [0u8; 16];
        let mut verifier = Verifier::new(&data);
        let result = Walker::new(&schema, &mut verifier, Discard).walk_buffer(&BufferOptions::new());
        assert_eq!(result, Err(VerifyError::MissingRootType));
    }
}
