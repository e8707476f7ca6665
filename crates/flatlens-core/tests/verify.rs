mod common;

use common::*;
use flatlens_core::{
    try_verify, verify, verify_with_options, BaseType, BufferOptions, Enum, EnumVal, Field,
    Object, Schema, Verifier, VerifierOptions, VerifyError,
};

fn check(schema: &Schema, data: &[u8]) -> Result<(), VerifyError> {
    try_verify(schema, data, &BufferOptions::new(), VerifierOptions::for_schema(schema))
}

/// Root Monster whose `enemy` chain nests `levels` tables below it
fn enemy_chain(levels: usize) -> Vec<u8> {
    let mut b = Builder::new();
    let name = b.create_string("m");
    let mut inner = None;
    for _ in 0..=levels {
        b.start_table();
        b.add_offset(monster::NAME, name);
        if let Some(enemy) = inner {
            b.add_offset(monster::ENEMY, enemy);
        }
        inner = Some(b.end_table());
    }
    b.finish(inner.expect("at least one table"), None)
}

#[test]
fn test_conforming_buffers_verify() {
    let schema = monster_schema();
    assert!(verify(&schema, &full_monster()));

    let mut b = Builder::new();
    let root = minimal_monster(&mut b, "Lonely");
    assert!(verify(&schema, &b.finish(root, None)));
}

#[test]
fn test_scenario_a_verifies() {
    let schema = simple_schema();
    let mut b = Builder::new();
    let name = b.create_string("hi");
    b.start_table();
    b.add_offset(1, name);
    b.add_scalar(0, 10u32);
    let root = b.end_table();
    let data = b.finish(root, None);

    assert_eq!(data.len(), 32);
    assert_eq!(check(&schema, &data), Ok(()));

    // String length overwritten with 0xFFFFFFFF
    let mut corrupt = data.clone();
    corrupt[24..28].copy_from_slice(&[0xFF; 4]);
    assert!(!verify(&schema, &corrupt));
    assert!(matches!(
        check(&schema, &corrupt),
        Err(VerifyError::LengthOverflow { offset: 24, .. })
    ));
}

#[test]
fn test_corrupt_lengths_fail() {
    let schema = simple_schema();
    let mut b = Builder::new();
    let name = b.create_string("hi");
    b.start_table();
    b.add_offset(1, name);
    b.add_scalar(0, 10u32);
    let root = b.end_table();
    let data = b.finish(root, None);

    // String length just past the end of the buffer
    let mut long_string = data.clone();
    long_string[24] = 8;
    assert!(matches!(
        check(&schema, &long_string),
        Err(VerifyError::OutOfBounds { .. })
    ));

    // VTable size running off the end
    let mut long_vtable = data.clone();
    long_vtable[4..6].copy_from_slice(&0xFFFEu16.to_le_bytes());
    assert!(!verify(&schema, &long_vtable));

    // Odd vtable size
    let mut odd_vtable = data.clone();
    odd_vtable[4] = 7;
    assert_eq!(
        check(&schema, &odd_vtable),
        Err(VerifyError::CorruptVTable { offset: 4 })
    );

    // Missing terminator
    let mut unterminated = data;
    unterminated[30] = b'!';
    assert_eq!(
        check(&schema, &unterminated),
        Err(VerifyError::MissingTerminator { offset: 30 })
    );
}

#[test]
fn test_table_start_errors_surface_from_the_walk() {
    let schema = simple_schema();
    let mut b = Builder::new();
    let name = b.create_string("hi");
    b.start_table();
    b.add_offset(1, name);
    b.add_scalar(0, 10u32);
    let root = b.end_table();
    let data = b.finish(root, None);
    let root = data.len() - root;
    assert_eq!(root, 12);

    let mut odd_vtable = data.clone();
    odd_vtable[4] = 7;
    let mut long_table = data;
    long_table[6..8].copy_from_slice(&0x100u16.to_le_bytes());

    for corrupt in [odd_vtable, long_table] {
        let direct = Verifier::new(&corrupt).verify_table_start(root);
        assert!(direct.is_err());
        assert_eq!(check(&schema, &corrupt), direct.map(|_| ()));
    }
}

#[test]
fn test_corrupt_vector_length_fails() {
    let schema = monster_schema();
    let mut b = Builder::new();
    let inventory = b.create_vector(&[1u8, 2, 3]);
    let name = b.create_string("Bag");
    b.start_table();
    b.add_offset(monster::NAME, name);
    b.add_offset(monster::INVENTORY, inventory);
    let root = b.end_table();
    let mut data = b.finish(root, None);
    assert!(verify(&schema, &data));

    let len = data.len() as u32;
    let vector = data.len() - inventory;
    data[vector..vector + 4].copy_from_slice(&len.to_le_bytes());
    assert!(!verify(&schema, &data));
}

#[test]
fn test_bad_offsets_fail() {
    let schema = simple_schema();
    let mut data = vec![0u8; 16];
    assert_eq!(
        check(&schema, &data),
        Err(VerifyError::ZeroOrSelfOffset { offset: 0 })
    );

    data[0..4].copy_from_slice(&0x8000_0000u32.to_le_bytes());
    assert_eq!(
        check(&schema, &data),
        Err(VerifyError::OffsetSignWrap { offset: 0 })
    );

    data[0..4].copy_from_slice(&64u32.to_le_bytes());
    assert!(matches!(
        check(&schema, &data),
        Err(VerifyError::OutOfBounds { .. })
    ));
}

#[test]
fn test_depth_boundary() {
    let schema = monster_schema();
    let levels = 5;
    let data = enemy_chain(levels);
    let opts = BufferOptions::new();

    let deep_enough = VerifierOptions::new().max_depth(levels + 1);
    assert!(verify_with_options(&schema, &data, &opts, deep_enough));

    let too_shallow = VerifierOptions::new().max_depth(levels);
    assert_eq!(
        try_verify(&schema, &data, &opts, too_shallow),
        Err(VerifyError::RecursionLimitExceeded { max_depth: levels })
    );
}

#[test]
fn test_table_count_bounds_fan_out() {
    let schema = monster_schema();
    let mut b = Builder::new();
    let name = b.create_string("minion");
    let minions: Vec<usize> = (0..10)
        .map(|_| {
            b.start_table();
            b.add_offset(monster::NAME, name);
            b.end_table()
        })
        .collect();
    let friends = b.create_offset_vector(&minions);
    b.start_table();
    b.add_offset(monster::NAME, name);
    b.add_offset(monster::FRIENDS, friends);
    let root = b.end_table();
    let data = b.finish(root, None);
    let opts = BufferOptions::new();

    assert!(verify_with_options(&schema, &data, &opts, VerifierOptions::new().max_tables(11)));
    assert_eq!(
        try_verify(&schema, &data, &opts, VerifierOptions::new().max_tables(10)),
        Err(VerifyError::TableCountExceeded { max_tables: 10 })
    );
}

#[test]
fn test_file_identifier() {
    let schema = monster_schema();
    let mut b = Builder::new();
    let root = minimal_monster(&mut b, "Ident");
    let data = b.finish(root, Some(b"MONS"));
    let limits = VerifierOptions::new();

    let expected = BufferOptions::new().identifier(*b"MONS");
    assert!(verify_with_options(&schema, &data, &expected, limits));

    let wrong = BufferOptions::new().identifier(*b"XXXX");
    assert_eq!(
        try_verify(&schema, &data, &wrong, limits),
        Err(VerifyError::IdentifierMismatch { offset: 4 })
    );

    // A schema declaring an identifier makes `verify` check it
    assert!(verify(&schema.clone().with_file_identifier("MONS"), &data));
    assert!(!verify(&schema.with_file_identifier("ABCD"), &data));
}

#[test]
fn test_size_prefix() {
    let schema = monster_schema();
    let mut b = Builder::new();
    let root = minimal_monster(&mut b, "Prefixed");
    let mut data = b.finish_size_prefixed(root, None);
    let prefixed = BufferOptions::new().size_prefixed(true);
    let limits = VerifierOptions::new();

    assert_eq!(try_verify(&schema, &data, &prefixed, limits), Ok(()));

    let length = data.len() - 4;
    data[0] = data[0].wrapping_add(4);
    assert_eq!(
        try_verify(&schema, &data, &prefixed, limits),
        Err(VerifyError::SizePrefixMismatch {
            prefix: length + 4,
            length
        })
    );
}

#[test]
fn test_missing_required_field() {
    let schema = monster_schema();
    let mut b = Builder::new();
    b.start_table();
    b.add_scalar(monster::HP, 10i16);
    let root = b.end_table();
    let data = b.finish(root, None);

    assert!(matches!(
        check(&schema, &data),
        Err(VerifyError::MissingRequiredField { id: monster::NAME, .. })
    ));
}

#[test]
fn test_union_consistency() {
    let schema = monster_schema();

    // Discriminant without a value
    let mut b = Builder::new();
    let name = b.create_string("Unarmed");
    b.start_table();
    b.add_offset(monster::NAME, name);
    b.add_scalar(monster::EQUIPPED_TYPE, 1u8);
    let root = b.end_table();
    assert!(matches!(
        check(&schema, &b.finish(root, None)),
        Err(VerifyError::InvalidUnionDiscriminant { .. })
    ));

    // Value without a discriminant
    let mut b = Builder::new();
    b.start_table();
    b.add_scalar(weapon::DAMAGE, 1i16);
    let weapon = b.end_table();
    let name = b.create_string("Confused");
    b.start_table();
    b.add_offset(monster::NAME, name);
    b.add_offset(monster::EQUIPPED, weapon);
    let root = b.end_table();
    assert!(matches!(
        check(&schema, &b.finish(root, None)),
        Err(VerifyError::InvalidUnionDiscriminant { .. })
    ));
}

#[test]
fn test_unknown_union_variant_is_accepted() {
    let schema = monster_schema();
    let mut b = Builder::new();
    b.start_table();
    b.add_scalar(0, 1u32);
    let future = b.end_table();
    let name = b.create_string("FromTheFuture");
    b.start_table();
    b.add_offset(monster::NAME, name);
    b.add_offset(monster::EQUIPPED, future);
    b.add_scalar(monster::EQUIPPED_TYPE, 9u8);
    let root = b.end_table();

    assert!(verify(&schema, &b.finish(root, None)));
}

#[test]
fn test_union_variants_struct_and_string() {
    let vec3 = Object::structure(
        "Vec3",
        vec![
            Field::scalar("x", 0, BaseType::Float),
            Field::scalar("y", 0, BaseType::Float),
            Field::scalar("z", 0, BaseType::Float),
        ],
        &[],
    )
    .expect("Vec3 layout");
    let holder = Object::table(
        "Holder",
        vec![
            Field::union_type("thing_type", 0, 0),
            Field::union("thing", 1, 0),
        ],
    );
    let thing = Enum::union(
        "Thing",
        vec![
            EnumVal::new("NONE", 0),
            EnumVal::object_variant("Point", 1, 0),
            string_variant("Label", 2),
        ],
    );
    let schema = Schema::new(vec![vec3, holder], vec![thing], Some(1)).expect("holder schema");

    let mut b = Builder::new();
    b.prep(4, 12);
    b.push_bytes(&common::vec3(1.0, 2.0, 3.0));
    let point = b.offset();
    b.start_table();
    b.add_offset(1, point);
    b.add_scalar(0, 1u8);
    let root = b.end_table();
    assert_eq!(check(&schema, &b.finish(root, None)), Ok(()));

    let mut b = Builder::new();
    let label = b.create_string("label");
    b.start_table();
    b.add_offset(1, label);
    b.add_scalar(0, 2u8);
    let root = b.end_table();
    assert_eq!(check(&schema, &b.finish(root, None)), Ok(()));
}

#[test]
fn test_union_vector_lengths_must_match() {
    let weapon_table = Object::table("Weapon", vec![Field::scalar("damage", 0, BaseType::Short)]);
    let arsenal = Object::table(
        "Arsenal",
        vec![
            Field::vector_of("items_type", 0, BaseType::UType, 0),
            Field::vector_of("items", 1, BaseType::Union, 0),
        ],
    );
    let item = Enum::union(
        "Item",
        vec![EnumVal::new("NONE", 0), EnumVal::object_variant("Weapon", 1, 0)],
    );
    let schema = Schema::new(vec![weapon_table, arsenal], vec![item], Some(1)).expect("arsenal schema");

    let build = |types: &[u8]| {
        let mut b = Builder::new();
        b.start_table();
        b.add_scalar(0, 5i16);
        let weapon = b.end_table();
        let items = b.create_offset_vector(&[weapon, weapon]);
        let kinds = b.create_vector(types);
        b.start_table();
        b.add_offset(0, kinds);
        b.add_offset(1, items);
        let root = b.end_table();
        b.finish(root, None)
    };

    assert_eq!(check(&schema, &build(&[1, 1])), Ok(()));
    assert!(matches!(
        check(&schema, &build(&[1])),
        Err(VerifyError::InvalidUnionDiscriminant { .. })
    ));
}

#[test]
fn test_shared_vtable_and_string() {
    let schema = monster_schema();
    let (data, [first, second]) = twin_friends();
    assert_eq!(vtable_position(&data, first), vtable_position(&data, second));
    assert_eq!(check(&schema, &data), Ok(()));
}

#[test]
fn test_vector64() {
    let schema = blob_schema();
    assert!(schema.uses_64bit_offsets());

    let mut b = Builder::new();
    let data = b.create_vector64(&[1u8, 2, 3, 4, 5]);
    b.start_table();
    b.add_offset64(0, data);
    let root = b.end_table();
    let buffer = b.finish(root, None);

    assert_eq!(check(&schema, &buffer), Ok(()));

    // Cut into the element bytes
    let mut truncated = buffer.clone();
    truncated.truncate(buffer.len() - 4);
    assert!(!verify(&schema, &truncated));

    // Length running past the end of the buffer
    let length_at = buffer.len() - data;
    let mut overlong = buffer;
    overlong[length_at..length_at + 8].copy_from_slice(&9u64.to_le_bytes());
    assert!(matches!(
        check(&schema, &overlong),
        Err(VerifyError::OutOfBounds { .. })
    ));
}

#[test]
fn test_forward_and_backward_compatibility() {
    let schema = simple_schema();

    // Written by a newer schema with an extra field id 5
    let mut b = Builder::new();
    let name = b.create_string("new");
    b.start_table();
    b.add_scalar(5, 0xDEADu32);
    b.add_offset(1, name);
    b.add_scalar(0, 1u32);
    let root = b.end_table();
    assert_eq!(check(&schema, &b.finish(root, None)), Ok(()));

    // Written by an older schema that only knew field 0
    let mut b = Builder::new();
    b.start_table();
    b.add_scalar(0, 1u32);
    let root = b.end_table();
    assert_eq!(check(&schema, &b.finish(root, None)), Ok(()));
}

#[test]
fn test_misaligned_scalar() {
    let schema = simple_schema();
    // vtable@4 [6, 8, 5]; table@12 with the uint field at 17
    let mut data = vec![0u8; 24];
    data[0..4].copy_from_slice(&12u32.to_le_bytes());
    data[4..6].copy_from_slice(&6u16.to_le_bytes());
    data[6..8].copy_from_slice(&8u16.to_le_bytes());
    data[8..10].copy_from_slice(&5u16.to_le_bytes());
    data[12..16].copy_from_slice(&8i32.to_le_bytes());

    assert_eq!(
        check(&schema, &data),
        Err(VerifyError::Misaligned { offset: 17, align: 4 })
    );

    let lenient = VerifierOptions::new().check_alignment(false);
    assert!(verify_with_options(&schema, &data, &BufferOptions::new(), lenient));
}

#[test]
fn test_buffer_too_small_or_missing_root() {
    let schema = simple_schema();
    assert!(!verify(&schema, &[]));
    assert!(!verify(&schema, &[4, 0, 0]));

    let rootless = Schema::new(vec![Object::table("T", vec![])], vec![], None).expect("schema");
    assert_eq!(check(&rootless, &full_monster()), Err(VerifyError::MissingRootType));
}

#[test]
fn test_truncated_buffers_are_rejected() {
    let schema = monster_schema();
    let data = full_monster();
    // The first string written ("Sidekick") ends the buffer, followed by
    // 3 bytes of alignment padding nothing refers to
    let shortest = (0..=data.len()).find(|&len| verify(&schema, &data[..len]));
    assert_eq!(shortest, Some(data.len() - 3));
    for len in data.len() - 3..=data.len() {
        assert!(verify(&schema, &data[..len]));
    }
}
