//! Resolved schema model driving verification and annotation.
//!
//! A [`Schema`] lists objects (tables and structs) and enums (plain enums and
//! unions). Types refer to them by index. Schemas come from two places:
//!
//! - [`Schema::from_bfbs`] / [`Schema::load`], decoding a compiled binary
//!   schema (`.bfbs`)
//! - The constructors on [`Object`], [`Field`] and [`Enum`], for building a
//!   schema in code
//!
//! Both paths end in [`Schema::new`], which validates cross references so the
//! walker can trust every index it follows.
//!
//! ## Example
//!
//! ```
//! use flatlens_core::schema::{BaseType, Field, Object, Schema};
//!
//! let monster = Object::table(
//!     "Monster",
//!     vec![
//!         Field::scalar("hp", 0, BaseType::Short),
//!         Field::string("name", 1),
//!     ],
//! );
//! let schema = Schema::new(vec![monster], vec![], Some(0)).unwrap();
//! assert_eq!(schema.root().map(|o| o.name.as_str()), Some("Monster"));
//! ```

mod bfbs;
pub(crate) mod meta;

use crate::error::{Error, Result};
use crate::verifier::wire::{align_up, vtable_slot};
use std::path::Path;
use tracing::debug;

/// Base type of a field, vector element or union variant.
///
/// Discriminants match the reflection schema's `BaseType` enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BaseType {
    /// No type
    #[default]
    None = 0,
    /// Union discriminant
    UType = 1,
    /// Boolean
    Bool = 2,
    /// Signed 8-bit integer
    Byte = 3,
    /// Unsigned 8-bit integer
    UByte = 4,
    /// Signed 16-bit integer
    Short = 5,
    /// Unsigned 16-bit integer
    UShort = 6,
    /// Signed 32-bit integer
    Int = 7,
    /// Unsigned 32-bit integer
    UInt = 8,
    /// Signed 64-bit integer
    Long = 9,
    /// Unsigned 64-bit integer
    ULong = 10,
    /// 32-bit float
    Float = 11,
    /// 64-bit float
    Double = 12,
    /// String
    String = 13,
    /// Vector with a 32-bit length
    Vector = 14,
    /// Table or struct
    Obj = 15,
    /// Union value
    Union = 16,
    /// Fixed-length array inside a struct
    Array = 17,
    /// Vector with a 64-bit length
    Vector64 = 18,
}

impl TryFrom<u8> for BaseType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::None,
            1 => Self::UType,
            2 => Self::Bool,
            3 => Self::Byte,
            4 => Self::UByte,
            5 => Self::Short,
            6 => Self::UShort,
            7 => Self::Int,
            8 => Self::UInt,
            9 => Self::Long,
            10 => Self::ULong,
            11 => Self::Float,
            12 => Self::Double,
            13 => Self::String,
            14 => Self::Vector,
            15 => Self::Obj,
            16 => Self::Union,
            17 => Self::Array,
            18 => Self::Vector64,
            _ => return Err(Error::invalid_schema(format!("unknown base type {value}"))),
        })
    }
}

impl BaseType {
    /// Inline size in bytes: the scalar width, or the width of the offset
    /// that refers to out-of-line data
    pub const fn size(self) -> usize {
        match self {
            Self::None | Self::Array => 0,
            Self::UType | Self::Bool | Self::Byte | Self::UByte => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt | Self::Float => 4,
            Self::Long | Self::ULong | Self::Double => 8,
            Self::String | Self::Vector | Self::Obj | Self::Union => 4,
            Self::Vector64 => 8,
        }
    }

    /// Whether values are stored inline as a number
    pub const fn is_scalar(self) -> bool {
        matches!(
            self,
            Self::UType
                | Self::Bool
                | Self::Byte
                | Self::UByte
                | Self::Short
                | Self::UShort
                | Self::Int
                | Self::UInt
                | Self::Long
                | Self::ULong
                | Self::Float
                | Self::Double
        )
    }

    /// Whether the type is an integer (booleans and discriminants included)
    pub const fn is_integer(self) -> bool {
        self.is_scalar() && !self.is_float()
    }

    /// Whether the type is a float
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Whether the type is a vector of either width
    pub const fn is_vector(self) -> bool {
        matches!(self, Self::Vector | Self::Vector64)
    }

    /// Name as written in the reflection schema
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::UType => "UType",
            Self::Bool => "Bool",
            Self::Byte => "Byte",
            Self::UByte => "UByte",
            Self::Short => "Short",
            Self::UShort => "UShort",
            Self::Int => "Int",
            Self::UInt => "UInt",
            Self::Long => "Long",
            Self::ULong => "ULong",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::String => "String",
            Self::Vector => "Vector",
            Self::Obj => "Obj",
            Self::Union => "Union",
            Self::Array => "Array",
            Self::Vector64 => "Vector64",
        }
    }
}

/// A resolved type.
///
/// `index` refers into [`Schema::objects`] for `Obj` (and vectors or arrays of
/// `Obj`), and into [`Schema::enums`] for unions, discriminants and enum
/// typed scalars. It is `-1` when unused.
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    /// Base type
    pub base_type: BaseType,
    /// Element type of vectors and arrays
    pub element: BaseType,
    /// Object or enum index, or -1
    pub index: i32,
    /// Element count of arrays
    pub fixed_length: u16,
    /// Inline size of the base type
    pub base_size: u32,
    /// Size of one element of a vector or array
    pub element_size: u32,
}

impl Type {
    /// A type with no index or element
    pub fn new(base_type: BaseType) -> Self {
        Self {
            base_type,
            element: BaseType::None,
            index: -1,
            fixed_length: 0,
            base_size: base_type.size() as u32,
            element_size: 0,
        }
    }

    /// Sets the object or enum index
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = i32::try_from(index).unwrap_or(-1);
        self
    }

    /// Sets the element type of a vector or array
    pub fn with_element(mut self, element: BaseType) -> Self {
        self.element = element;
        self.element_size = element.size() as u32;
        self
    }

    /// The index as a usable position, if set
    pub fn index(&self) -> Option<usize> {
        usize::try_from(self.index).ok()
    }
}

/// A table or struct field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: Type,
    /// Field id; for tables, selects the vtable slot
    pub id: u16,
    /// Vtable slot offset for tables, byte offset for struct members
    pub offset: u16,
    /// Default for integer scalars
    pub default_integer: i64,
    /// Default for float scalars
    pub default_real: f64,
    /// Deprecated fields are still walked if present
    pub deprecated: bool,
    /// Required fields must be present
    pub required: bool,
    /// Optional scalars have no default
    pub optional: bool,
    /// Padding bytes after a struct member
    pub padding: u16,
    /// Refers to its data with a 64-bit offset
    pub offset64: bool,
}

impl Field {
    /// A field of the given type
    pub fn new(name: impl Into<String>, id: u16, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            id,
            offset: u16::try_from(vtable_slot(id)).unwrap_or(u16::MAX),
            default_integer: 0,
            default_real: 0.0,
            deprecated: false,
            required: false,
            optional: false,
            padding: 0,
            offset64: false,
        }
    }

    /// A scalar field
    pub fn scalar(name: impl Into<String>, id: u16, base_type: BaseType) -> Self {
        Self::new(name, id, Type::new(base_type))
    }

    /// A scalar field typed by the enum at `enum_index`
    pub fn enumeration(
        name: impl Into<String>,
        id: u16,
        underlying: BaseType,
        enum_index: usize,
    ) -> Self {
        Self::new(name, id, Type::new(underlying).with_index(enum_index))
    }

    /// A string field
    pub fn string(name: impl Into<String>, id: u16) -> Self {
        Self::new(name, id, Type::new(BaseType::String))
    }

    /// A table or struct field referring to the object at `object`
    pub fn object(name: impl Into<String>, id: u16, object: usize) -> Self {
        Self::new(name, id, Type::new(BaseType::Obj).with_index(object))
    }

    /// A vector of scalars or strings
    pub fn vector(name: impl Into<String>, id: u16, element: BaseType) -> Self {
        Self::new(name, id, Type::new(BaseType::Vector).with_element(element))
    }

    /// A vector of objects (`element` = `Obj`) or unions (`element` = `Union`)
    pub fn vector_of(name: impl Into<String>, id: u16, element: BaseType, index: usize) -> Self {
        Self::new(
            name,
            id,
            Type::new(BaseType::Vector)
                .with_element(element)
                .with_index(index),
        )
    }

    /// A vector of scalars with a 64-bit length, reached by a 64-bit offset
    pub fn vector64(name: impl Into<String>, id: u16, element: BaseType) -> Self {
        let mut field = Self::new(name, id, Type::new(BaseType::Vector64).with_element(element));
        field.offset64 = true;
        field
    }

    /// The discriminant field of a union
    pub fn union_type(name: impl Into<String>, id: u16, enum_index: usize) -> Self {
        Self::new(name, id, Type::new(BaseType::UType).with_index(enum_index))
    }

    /// The value field of a union; its discriminant must have id `id - 1`
    pub fn union(name: impl Into<String>, id: u16, enum_index: usize) -> Self {
        Self::new(name, id, Type::new(BaseType::Union).with_index(enum_index))
    }

    /// A fixed-length array member of a struct
    pub fn array(name: impl Into<String>, element: BaseType, length: u16) -> Self {
        let mut ty = Type::new(BaseType::Array).with_element(element);
        ty.fixed_length = length;
        Self::new(name, 0, ty)
    }

    /// A fixed-length array of the struct at `object`
    pub fn struct_array(name: impl Into<String>, object: usize, length: u16) -> Self {
        let mut ty = Type::new(BaseType::Array)
            .with_element(BaseType::Obj)
            .with_index(object);
        ty.fixed_length = length;
        Self::new(name, 0, ty)
    }

    /// Marks the field required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field deprecated
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Marks the field optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Sets the integer default
    pub fn with_default_integer(mut self, value: i64) -> Self {
        self.default_integer = value;
        self
    }

    /// Sets the float default
    pub fn with_default_real(mut self, value: f64) -> Self {
        self.default_real = value;
        self
    }
}

/// A table or struct
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// Fully qualified name
    pub name: String,
    /// Whether the object is an inline struct
    pub is_struct: bool,
    /// Alignment of a struct
    pub minalign: usize,
    /// Size of a struct in bytes
    pub bytesize: usize,
    fields: Vec<Field>,
}

impl Object {
    /// Assembles an object from decoded parts, ordering fields by id
    pub fn from_parts(
        name: impl Into<String>,
        mut fields: Vec<Field>,
        is_struct: bool,
        minalign: usize,
        bytesize: usize,
    ) -> Self {
        fields.sort_by_key(|f| f.id);
        Self {
            name: name.into(),
            is_struct,
            minalign,
            bytesize,
            fields,
        }
    }

    /// A table; field ids come from the fields themselves
    pub fn table(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::from_parts(name, fields, false, 1, 0)
    }

    /// A struct laid out from `members` in declaration order.
    ///
    /// Member ids and offsets are assigned here. Nested structs must already
    /// be in `known`, the schema's objects defined so far.
    pub fn structure(
        name: impl Into<String>,
        mut members: Vec<Field>,
        known: &[Object],
    ) -> Result<Self> {
        let name = name.into();
        let mut cursor = 0usize;
        let mut minalign = 1usize;

        for i in 0..members.len() {
            let (size, align) = member_layout(&members[i], known).ok_or_else(|| {
                Error::invalid_schema(format!(
                    "struct {name} member {} is not a scalar, struct or array",
                    members[i].name
                ))
            })?;
            let offset = align_up(cursor, align);
            if i > 0 {
                members[i - 1].padding = to_u16(offset - cursor)?;
            }
            let member = &mut members[i];
            member.id = to_u16(i)?;
            member.offset = to_u16(offset)?;
            cursor = offset + size;
            minalign = minalign.max(align);
        }

        let bytesize = align_up(cursor, minalign);
        if let Some(last) = members.last_mut() {
            last.padding = to_u16(bytesize - cursor)?;
        }

        Ok(Self::from_parts(name, members, true, minalign, bytesize))
    }

    /// Fields in id order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by id
    pub fn field_by_id(&self, id: u16) -> Option<&Field> {
        match self.fields.get(id as usize) {
            Some(field) if field.id == id => Some(field),
            _ => self
                .fields
                .binary_search_by_key(&id, |f| f.id)
                .ok()
                .map(|i| &self.fields[i]),
        }
    }

    /// Looks up a field by name
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

fn to_u16(value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::invalid_schema(format!("struct too large ({value})")))
}

/// Size and alignment of a struct member
fn member_layout(field: &Field, known: &[Object]) -> Option<(usize, usize)> {
    let ty = &field.ty;
    let nested = |index: Option<usize>| {
        known
            .get(index?)
            .filter(|o| o.is_struct)
            .map(|o| (o.bytesize, o.minalign))
    };
    match ty.base_type {
        b if b.is_scalar() => Some((b.size(), b.size())),
        BaseType::Obj => nested(ty.index()),
        BaseType::Array => {
            let (size, align) = if ty.element.is_scalar() {
                (ty.element.size(), ty.element.size())
            } else if ty.element == BaseType::Obj {
                nested(ty.index())?
            } else {
                return None;
            };
            Some((size * ty.fixed_length as usize, align))
        }
        _ => None,
    }
}

/// A value of an enum or a variant of a union
#[derive(Debug, Clone, PartialEq)]
pub struct EnumVal {
    /// Value name
    pub name: String,
    /// Numeric value or discriminant
    pub value: i64,
    /// Payload type of a union variant
    pub union_type: Option<Type>,
}

impl EnumVal {
    /// A plain enum value
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
            union_type: None,
        }
    }

    /// A union variant carrying `ty`
    pub fn variant(name: impl Into<String>, value: i64, ty: Type) -> Self {
        Self {
            name: name.into(),
            value,
            union_type: Some(ty),
        }
    }

    /// A union variant referring to the table or struct at `object`
    pub fn object_variant(name: impl Into<String>, value: i64, object: usize) -> Self {
        Self::variant(name, value, Type::new(BaseType::Obj).with_index(object))
    }
}

/// An enum or union
#[derive(Debug, Clone, PartialEq)]
pub struct Enum {
    /// Fully qualified name
    pub name: String,
    /// Whether this is a union
    pub is_union: bool,
    /// Underlying integer type
    pub underlying_type: Type,
    values: Vec<EnumVal>,
}

impl Enum {
    /// A plain enum over `underlying`
    pub fn new(name: impl Into<String>, underlying: BaseType, values: Vec<EnumVal>) -> Self {
        Self::from_parts(name, values, false, Type::new(underlying))
    }

    /// A union; include the `NONE = 0` variant in `variants`
    pub fn union(name: impl Into<String>, variants: Vec<EnumVal>) -> Self {
        Self::from_parts(name, variants, true, Type::new(BaseType::UType))
    }

    /// Assembles an enum from decoded parts, ordering values numerically
    pub fn from_parts(
        name: impl Into<String>,
        mut values: Vec<EnumVal>,
        is_union: bool,
        underlying_type: Type,
    ) -> Self {
        values.sort_by_key(|v| v.value);
        Self {
            name: name.into(),
            is_union,
            underlying_type,
            values,
        }
    }

    /// Values in ascending numeric order
    pub fn values(&self) -> &[EnumVal] {
        &self.values
    }

    /// Looks up a value by number
    pub fn value_of(&self, value: i64) -> Option<&EnumVal> {
        self.values
            .binary_search_by_key(&value, |v| v.value)
            .ok()
            .map(|i| &self.values[i])
    }
}

/// A validated schema
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    objects: Vec<Object>,
    enums: Vec<Enum>,
    root_table: Option<usize>,
    /// File identifier declared by the schema
    pub file_ident: Option<String>,
    /// File extension declared by the schema
    pub file_ext: Option<String>,
}

impl Schema {
    /// Builds a schema and validates its cross references
    pub fn new(objects: Vec<Object>, enums: Vec<Enum>, root_table: Option<usize>) -> Result<Self> {
        let schema = Self {
            objects,
            enums,
            root_table,
            file_ident: None,
            file_ext: None,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Decodes and validates a binary schema (`.bfbs`)
    pub fn from_bfbs(bytes: &[u8]) -> Result<Self> {
        bfbs::decode(bytes)
    }

    /// Reads and decodes a binary schema file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading binary schema {}", path.display());
        let bytes = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        Self::from_bfbs(&bytes)
    }

    /// Sets the declared file identifier
    pub fn with_file_identifier(mut self, ident: impl Into<String>) -> Self {
        self.file_ident = Some(ident.into());
        self
    }

    /// All objects
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// All enums
    pub fn enums(&self) -> &[Enum] {
        &self.enums
    }

    /// Object at `index`
    pub fn object(&self, index: usize) -> Option<&Object> {
        self.objects.get(index)
    }

    /// Enum at `index`
    pub fn enumeration(&self, index: usize) -> Option<&Enum> {
        self.enums.get(index)
    }

    /// The object a type refers to
    pub fn object_of(&self, ty: &Type) -> Option<&Object> {
        self.object(ty.index()?)
    }

    /// The enum a type refers to
    pub fn enum_of(&self, ty: &Type) -> Option<&Enum> {
        self.enumeration(ty.index()?)
    }

    /// Finds an object by name
    pub fn find_object(&self, name: &str) -> Option<usize> {
        self.objects.iter().position(|o| o.name == name)
    }

    /// The root table
    pub fn root(&self) -> Option<&Object> {
        self.object(self.root_table?)
    }

    /// Index of the root table
    pub fn root_index(&self) -> Option<usize> {
        self.root_table
    }

    /// The declared identifier as the 4 bytes a buffer carries
    pub fn file_identifier(&self) -> Option<[u8; 4]> {
        self.file_ident
            .as_deref()
            .and_then(|s| s.as_bytes().try_into().ok())
    }

    /// Whether any field uses 64-bit offsets or lengths
    pub fn uses_64bit_offsets(&self) -> bool {
        self.objects
            .iter()
            .flat_map(|o| o.fields())
            .any(|f| f.offset64 || f.ty.base_type == BaseType::Vector64)
    }

    fn validate(&self) -> Result<()> {
        if let Some(root) = self.root_table {
            match self.objects.get(root) {
                Some(object) if !object.is_struct => {}
                Some(object) => {
                    return Err(Error::invalid_schema(format!(
                        "root type {} is a struct",
                        object.name
                    )))
                }
                None => return Err(Error::invalid_schema(format!("root index {root} out of range"))),
            }
        }

        for object in &self.objects {
            for field in object.fields() {
                self.validate_field(object, field)?;
            }
        }
        for e in &self.enums {
            for value in e.values() {
                if let Some(ty) = &value.union_type {
                    if ty.base_type == BaseType::Obj && self.object_of(ty).is_none() {
                        return Err(Error::invalid_schema(format!(
                            "union {} variant {} refers to a missing object",
                            e.name, value.name
                        )));
                    }
                }
            }
        }

        self.check_struct_nesting()
    }

    fn validate_field(&self, object: &Object, field: &Field) -> Result<()> {
        let ty = &field.ty;
        let invalid = |what: &str| {
            Error::invalid_schema(format!("{}.{}: {what}", object.name, field.name))
        };

        let needs_object = ty.base_type == BaseType::Obj
            || (matches!(ty.base_type, BaseType::Vector | BaseType::Vector64 | BaseType::Array)
                && ty.element == BaseType::Obj);
        if needs_object && self.object_of(ty).is_none() {
            return Err(invalid("refers to a missing object"));
        }

        let needs_enum = matches!(ty.base_type, BaseType::Union)
            || (ty.base_type.is_vector() && ty.element == BaseType::Union);
        if needs_enum && self.enum_of(ty).is_none() {
            return Err(invalid("refers to a missing union"));
        }
        if ty.index().is_some() && ty.base_type.is_scalar() && self.enum_of(ty).is_none() {
            return Err(invalid("refers to a missing enum"));
        }

        if needs_enum && !object.is_struct {
            let discriminant = field
                .id
                .checked_sub(1)
                .and_then(|id| object.field_by_id(id))
                .map(|f| (f.ty.base_type, f.ty.element));
            let expected = match ty.base_type {
                BaseType::Union => (BaseType::UType, BaseType::None),
                _ => (ty.base_type, BaseType::UType),
            };
            if discriminant != Some(expected) {
                return Err(invalid("union has no discriminant field with the preceding id"));
            }
        }

        if object.is_struct {
            let ok = ty.base_type.is_scalar()
                || (ty.base_type == BaseType::Obj
                    && self.object_of(ty).map_or(false, |o| o.is_struct))
                || (ty.base_type == BaseType::Array
                    && (ty.element.is_scalar()
                        || self.object_of(ty).map_or(false, |o| o.is_struct)));
            if !ok {
                return Err(invalid("struct members must be scalars, structs or arrays"));
            }
        }
        Ok(())
    }

    /// Rejects structs that contain themselves
    fn check_struct_nesting(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(schema: &Schema, index: usize, marks: &mut [Mark]) -> Result<()> {
            match marks[index] {
                Mark::Done => return Ok(()),
                Mark::Active => {
                    return Err(Error::invalid_schema(format!(
                        "struct {} contains itself",
                        schema.objects[index].name
                    )))
                }
                Mark::New => {}
            }
            marks[index] = Mark::Active;
            for field in schema.objects[index].fields() {
                if let Some(nested) = field.ty.index() {
                    if field.ty.base_type == BaseType::Obj
                        || (field.ty.base_type == BaseType::Array
                            && field.ty.element == BaseType::Obj)
                    {
                        visit(schema, nested, marks)?;
                    }
                }
            }
            marks[index] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; self.objects.len()];
        for (index, object) in self.objects.iter().enumerate() {
            if object.is_struct {
                visit(self, index, &mut marks)?;
            }
        }
        Ok(())
    }
}
