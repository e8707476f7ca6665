//! Decoding of compiled binary schemas (`.bfbs`).
//!
//! The buffer is verified against the reflection meta-schema first, so the
//! decoding below may assume every offset it follows is in bounds. It still
//! reads through the [`BufferReader`] and turns any surprise into an error.

use super::meta::{self, BFBS_IDENTIFIER};
use super::{BaseType, Enum, EnumVal, Field, Object, Schema, Type};
use crate::error::{Error, Result};
use crate::verifier::wire::{vtable_slot, Scalar, SIZE_UOFFSET};
use crate::verifier::{BufferOptions, BufferReader, Verifier, VerifierOptions};
use tracing::debug;

pub(super) fn decode(bytes: &[u8]) -> Result<Schema> {
    let mut verifier = Verifier::with_options(bytes, VerifierOptions::default());
    verifier.verify_buffer(
        meta::reflection_schema(),
        &BufferOptions::new().identifier(BFBS_IDENTIFIER),
    )?;

    let reader = *verifier.reader();
    let root = TableView::at(reader, follow(reader, 0)?)?;

    let object_views = root.tables(0)?;
    let objects = object_views
        .iter()
        .map(decode_object)
        .collect::<Result<Vec<_>>>()?;
    let enums = root
        .tables(1)?
        .iter()
        .map(decode_enum)
        .collect::<Result<Vec<_>>>()?;

    // The root table field points at one of the entries of `objects`
    let root_table = match root.table(4)? {
        Some(view) => Some(
            object_views
                .iter()
                .position(|o| o.pos == view.pos)
                .ok_or_else(|| Error::invalid_schema("root table is not among the schema objects"))?,
        ),
        None => None,
    };

    let mut schema = Schema::new(objects, enums, root_table)?;
    schema.file_ident = root.string(2)?.map(str::to_owned);
    schema.file_ext = root.string(3)?.map(str::to_owned);

    debug!(
        objects = schema.objects().len(),
        enums = schema.enums().len(),
        root = schema.root().map(|o| o.name.as_str()).unwrap_or("<none>"),
        "Decoded binary schema"
    );
    Ok(schema)
}

fn malformed(pos: usize) -> Error {
    Error::invalid_schema(format!("malformed reflection data at offset {pos}"))
}

fn read<T: Scalar>(reader: BufferReader<'_>, pos: usize) -> Result<T> {
    reader.read_scalar(pos).ok_or_else(|| malformed(pos))
}

fn follow(reader: BufferReader<'_>, pos: usize) -> Result<usize> {
    let offset = read::<u32>(reader, pos)? as usize;
    pos.checked_add(offset).ok_or_else(|| malformed(pos))
}

/// Field access on one reflection table
struct TableView<'b> {
    reader: BufferReader<'b>,
    pos: usize,
    vtable: usize,
    vtable_size: usize,
}

impl<'b> TableView<'b> {
    fn at(reader: BufferReader<'b>, pos: usize) -> Result<Self> {
        let soffset = read::<i32>(reader, pos)?;
        let vtable = pos.wrapping_sub(soffset as isize as usize);
        let vtable_size = read::<u16>(reader, vtable)? as usize;
        Ok(Self {
            reader,
            pos,
            vtable,
            vtable_size,
        })
    }

    /// Position of field `id`, if present
    fn field(&self, id: u16) -> Result<Option<usize>> {
        let slot = vtable_slot(id);
        if slot + 2 > self.vtable_size {
            return Ok(None);
        }
        match read::<u16>(self.reader, self.vtable + slot)? {
            0 => Ok(None),
            offset => Ok(Some(self.pos + offset as usize)),
        }
    }

    fn scalar<T: Scalar>(&self, id: u16, default: T) -> Result<T> {
        match self.field(id)? {
            Some(pos) => read(self.reader, pos),
            None => Ok(default),
        }
    }

    fn string(&self, id: u16) -> Result<Option<&'b str>> {
        let Some(pos) = self.field(id)? else {
            return Ok(None);
        };
        let start = follow(self.reader, pos)?;
        let length = read::<u32>(self.reader, start)? as usize;
        let bytes = self
            .reader
            .bytes(start + SIZE_UOFFSET, length)
            .ok_or_else(|| malformed(start))?;
        std::str::from_utf8(bytes)
            .map(Some)
            .map_err(|_| Error::invalid_schema(format!("string at offset {start} is not UTF-8")))
    }

    fn required_string(&self, id: u16) -> Result<&'b str> {
        self.string(id)?.ok_or_else(|| malformed(self.pos))
    }

    fn table(&self, id: u16) -> Result<Option<TableView<'b>>> {
        match self.field(id)? {
            Some(pos) => Ok(Some(TableView::at(self.reader, follow(self.reader, pos)?)?)),
            None => Ok(None),
        }
    }

    fn tables(&self, id: u16) -> Result<Vec<TableView<'b>>> {
        let Some(pos) = self.field(id)? else {
            return Ok(Vec::new());
        };
        let start = follow(self.reader, pos)?;
        let count = read::<u32>(self.reader, start)? as usize;
        (0..count)
            .map(|i| {
                let element = start + SIZE_UOFFSET * (i + 1);
                TableView::at(self.reader, follow(self.reader, element)?)
            })
            .collect()
    }
}

fn decode_type(view: &TableView<'_>) -> Result<Type> {
    Ok(Type {
        base_type: BaseType::try_from(view.scalar::<u8>(0, 0)?)?,
        element: BaseType::try_from(view.scalar::<u8>(1, 0)?)?,
        index: view.scalar::<i32>(2, -1)?,
        fixed_length: view.scalar::<u16>(3, 0)?,
        base_size: view.scalar::<u32>(4, 4)?,
        element_size: view.scalar::<u32>(5, 0)?,
    })
}

fn decode_field(view: &TableView<'_>) -> Result<Field> {
    let ty = view
        .table(1)?
        .ok_or_else(|| malformed(view.pos))
        .and_then(|t| decode_type(&t))?;
    let mut field = Field::new(view.required_string(0)?, view.scalar::<u16>(2, 0)?, ty);
    field.offset = view.scalar::<u16>(3, 0)?;
    field.default_integer = view.scalar::<i64>(4, 0)?;
    field.default_real = view.scalar::<f64>(5, 0.0)?;
    field.deprecated = view.scalar::<bool>(6, false)?;
    field.required = view.scalar::<bool>(7, false)?;
    field.optional = view.scalar::<bool>(11, false)?;
    field.padding = view.scalar::<u16>(12, 0)?;
    field.offset64 = view.scalar::<bool>(13, false)?;
    Ok(field)
}

fn decode_object(view: &TableView<'_>) -> Result<Object> {
    let fields = view
        .tables(1)?
        .iter()
        .map(decode_field)
        .collect::<Result<Vec<_>>>()?;
    let minalign = view.scalar::<i32>(3, 0)?;
    let bytesize = view.scalar::<i32>(4, 0)?;
    Ok(Object::from_parts(
        view.required_string(0)?,
        fields,
        view.scalar::<bool>(2, false)?,
        usize::try_from(minalign).map_err(|_| malformed(view.pos))?,
        usize::try_from(bytesize).map_err(|_| malformed(view.pos))?,
    ))
}

fn decode_enum(view: &TableView<'_>) -> Result<Enum> {
    let values = view
        .tables(1)?
        .iter()
        .map(|v| {
            Ok(EnumVal {
                name: v.required_string(0)?.to_owned(),
                value: v.scalar::<i64>(1, 0)?,
                union_type: v.table(3)?.map(|t| decode_type(&t)).transpose()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let underlying = view
        .table(3)?
        .ok_or_else(|| malformed(view.pos))
        .and_then(|t| decode_type(&t))?;
    Ok(Enum::from_parts(
        view.required_string(0)?,
        values,
        view.scalar::<bool>(2, false)?,
        underlying,
    ))
}
