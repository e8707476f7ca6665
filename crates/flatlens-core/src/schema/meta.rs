//! The reflection schema (`reflection.fbs`) expressed as a [`Schema`].
//!
//! Binary schemas are themselves FlatBuffers with the identifier `BFBS`; this
//! model lets the ordinary verifier check one before it is decoded.

use super::{BaseType, Enum, EnumVal, Field, Object, Schema};
use std::sync::OnceLock;

/// File identifier of binary schemas
pub(crate) const BFBS_IDENTIFIER: [u8; 4] = *b"BFBS";

pub(crate) const TYPE: usize = 0;
pub(crate) const KEY_VALUE: usize = 1;
pub(crate) const ENUM_VAL: usize = 2;
pub(crate) const ENUM: usize = 3;
pub(crate) const FIELD: usize = 4;
pub(crate) const OBJECT: usize = 5;
pub(crate) const RPC_CALL: usize = 6;
pub(crate) const SERVICE: usize = 7;
pub(crate) const SCHEMA_FILE: usize = 8;
pub(crate) const SCHEMA: usize = 9;

const BASE_TYPE_ENUM: usize = 0;
const ADVANCED_FEATURES_ENUM: usize = 1;

/// The shared reflection meta-schema
pub(crate) fn reflection_schema() -> &'static Schema {
    static META: OnceLock<Schema> = OnceLock::new();
    META.get_or_init(build)
}

fn attributes(id: u16) -> Field {
    Field::vector_of("attributes", id, BaseType::Obj, KEY_VALUE)
}

fn documentation(id: u16) -> Field {
    Field::vector("documentation", id, BaseType::String)
}

fn name() -> Field {
    Field::string("name", 0).required()
}

fn build() -> Schema {
    let objects = vec![
        Object::table(
            "reflection.Type",
            vec![
                Field::enumeration("base_type", 0, BaseType::Byte, BASE_TYPE_ENUM),
                Field::enumeration("element", 1, BaseType::Byte, BASE_TYPE_ENUM),
                Field::scalar("index", 2, BaseType::Int).with_default_integer(-1),
                Field::scalar("fixed_length", 3, BaseType::UShort),
                Field::scalar("base_size", 4, BaseType::UInt).with_default_integer(4),
                Field::scalar("element_size", 5, BaseType::UInt),
            ],
        ),
        Object::table(
            "reflection.KeyValue",
            vec![
                Field::string("key", 0).required(),
                Field::string("value", 1),
            ],
        ),
        Object::table(
            "reflection.EnumVal",
            vec![
                name(),
                Field::scalar("value", 1, BaseType::Long),
                Field::object("object", 2, OBJECT).deprecated(),
                Field::object("union_type", 3, TYPE),
                documentation(4),
                attributes(5),
            ],
        ),
        Object::table(
            "reflection.Enum",
            vec![
                name(),
                Field::vector_of("values", 1, BaseType::Obj, ENUM_VAL).required(),
                Field::scalar("is_union", 2, BaseType::Bool),
                Field::object("underlying_type", 3, TYPE).required(),
                attributes(4),
                documentation(5),
                Field::string("declaration_file", 6),
            ],
        ),
        Object::table(
            "reflection.Field",
            vec![
                name(),
                Field::object("type", 1, TYPE).required(),
                Field::scalar("id", 2, BaseType::UShort),
                Field::scalar("offset", 3, BaseType::UShort),
                Field::scalar("default_integer", 4, BaseType::Long),
                Field::scalar("default_real", 5, BaseType::Double),
                Field::scalar("deprecated", 6, BaseType::Bool),
                Field::scalar("required", 7, BaseType::Bool),
                Field::scalar("key", 8, BaseType::Bool),
                attributes(9),
                documentation(10),
                Field::scalar("optional", 11, BaseType::Bool),
                Field::scalar("padding", 12, BaseType::UShort),
                Field::scalar("offset64", 13, BaseType::Bool),
            ],
        ),
        Object::table(
            "reflection.Object",
            vec![
                name(),
                Field::vector_of("fields", 1, BaseType::Obj, FIELD).required(),
                Field::scalar("is_struct", 2, BaseType::Bool),
                Field::scalar("minalign", 3, BaseType::Int),
                Field::scalar("bytesize", 4, BaseType::Int),
                attributes(5),
                documentation(6),
                Field::string("declaration_file", 7),
            ],
        ),
        Object::table(
            "reflection.RPCCall",
            vec![
                name(),
                Field::object("request", 1, OBJECT).required(),
                Field::object("response", 2, OBJECT).required(),
                attributes(3),
                documentation(4),
            ],
        ),
        Object::table(
            "reflection.Service",
            vec![
                name(),
                Field::vector_of("calls", 1, BaseType::Obj, RPC_CALL),
                attributes(2),
                documentation(3),
                Field::string("declaration_file", 4),
            ],
        ),
        Object::table(
            "reflection.SchemaFile",
            vec![
                Field::string("filename", 0).required(),
                Field::vector("included_filenames", 1, BaseType::String),
            ],
        ),
        Object::table(
            "reflection.Schema",
            vec![
                Field::vector_of("objects", 0, BaseType::Obj, OBJECT).required(),
                Field::vector_of("enums", 1, BaseType::Obj, ENUM).required(),
                Field::string("file_ident", 2),
                Field::string("file_ext", 3),
                Field::object("root_table", 4, OBJECT),
                Field::vector_of("services", 5, BaseType::Obj, SERVICE),
                Field::enumeration("advanced_features", 6, BaseType::ULong, ADVANCED_FEATURES_ENUM),
                Field::vector_of("fbs_files", 7, BaseType::Obj, SCHEMA_FILE),
            ],
        ),
    ];

    let base_types = (0u8..=18)
        .filter_map(|v| BaseType::try_from(v).ok())
        .map(|b| EnumVal::new(b.name(), b as i64))
        .collect();
    let enums = vec![
        Enum::new("reflection.BaseType", BaseType::Byte, base_types),
        Enum::new(
            "reflection.AdvancedFeatures",
            BaseType::ULong,
            vec![
                EnumVal::new("AdvancedArrayFeatures", 1),
                EnumVal::new("AdvancedUnionFeatures", 2),
                EnumVal::new("OptionalScalars", 4),
                EnumVal::new("DefaultVectorsAndStrings", 8),
            ],
        ),
    ];

    let schema = Schema {
        objects,
        enums,
        root_table: Some(SCHEMA),
        file_ident: Some("BFBS".to_owned()),
        file_ext: Some("bfbs".to_owned()),
    };
    debug_assert!(schema.validate().is_ok());
    schema
}
