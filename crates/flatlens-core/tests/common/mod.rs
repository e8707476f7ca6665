//! Test-only FlatBuffers writer and the schemas the integration tests share.
//!
//! [`Builder`] lays buffers out back to front the way conforming writers do:
//! children before parents, vtables just before their tables (or shared
//! with an identical earlier one), every scalar aligned to its size. Offsets
//! it hands out are distances from the end of the buffer, so they stay valid
//! while the front keeps growing.

#![allow(dead_code)]

use flatlens_core::{BaseType, Enum, EnumVal, Field, Object, Schema, Type};

/// Little-endian scalars the builder can write
pub trait Le: Copy {
    const SIZE: usize;
    fn le(self) -> Vec<u8>;
}

macro_rules! impl_le {
    ($($t:ty),*) => {
        $(
            impl Le for $t {
                const SIZE: usize = std::mem::size_of::<$t>();
                fn le(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_le!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

#[derive(Debug, Default)]
pub struct Builder {
    data: Vec<u8>,
    min_align: usize,
    table_start: usize,
    fields: Vec<(u16, usize)>,
    vtables: Vec<(usize, Vec<u8>)>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            min_align: 1,
            ..Self::default()
        }
    }

    /// Distance from the end of the buffer to the current front
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.splice(0..0, bytes.iter().copied());
    }

    pub fn pad(&mut self, n: usize) {
        self.push_bytes(&vec![0; n]);
    }

    /// Pads so that after `additional` more bytes the front is aligned to `size`
    pub fn prep(&mut self, size: usize, additional: usize) {
        self.min_align = self.min_align.max(size);
        let used = self.offset() + additional;
        let pad = (size - used % size) % size;
        self.pad(pad);
    }

    pub fn push<T: Le>(&mut self, value: T) {
        self.prep(T::SIZE, 0);
        self.push_bytes(&value.le());
    }

    pub fn push_uoffset(&mut self, target: usize) {
        self.prep(4, 0);
        let value = (self.offset() + 4 - target) as u32;
        self.push_bytes(&value.to_le_bytes());
    }

    pub fn push_uoffset64(&mut self, target: usize) {
        self.prep(8, 0);
        let value = (self.offset() + 8 - target) as u64;
        self.push_bytes(&value.to_le_bytes());
    }

    pub fn create_string(&mut self, s: &str) -> usize {
        self.create_raw_string(s.as_bytes(), s.len() as u32)
    }

    /// A string whose length prefix says `length` regardless of `bytes`
    pub fn create_raw_string(&mut self, bytes: &[u8], length: u32) -> usize {
        self.prep(4, bytes.len() + 1);
        self.push_bytes(&[0]);
        self.push_bytes(bytes);
        self.push_bytes(&length.to_le_bytes());
        self.offset()
    }

    pub fn create_vector<T: Le>(&mut self, items: &[T]) -> usize {
        let bytes: Vec<u8> = items.iter().flat_map(|v| v.le()).collect();
        self.prep(4, bytes.len());
        self.prep(T::SIZE, bytes.len());
        self.push_bytes(&bytes);
        self.push_bytes(&(items.len() as u32).to_le_bytes());
        self.offset()
    }

    pub fn create_vector64<T: Le>(&mut self, items: &[T]) -> usize {
        let bytes: Vec<u8> = items.iter().flat_map(|v| v.le()).collect();
        self.prep(8, bytes.len());
        self.push_bytes(&bytes);
        self.push_bytes(&(items.len() as u64).to_le_bytes());
        self.offset()
    }

    /// A vector of inline structs, each `bytes.len() / count` long
    pub fn create_struct_vector(&mut self, bytes: &[u8], count: u32, align: usize) -> usize {
        self.prep(4, bytes.len());
        self.prep(align, bytes.len());
        self.push_bytes(bytes);
        self.push_bytes(&count.to_le_bytes());
        self.offset()
    }

    pub fn create_offset_vector(&mut self, targets: &[usize]) -> usize {
        self.prep(4, 4 * targets.len());
        for &target in targets.iter().rev() {
            self.push_uoffset(target);
        }
        self.push_bytes(&(targets.len() as u32).to_le_bytes());
        self.offset()
    }

    pub fn start_table(&mut self) {
        self.fields.clear();
        self.table_start = self.offset();
    }

    pub fn add_scalar<T: Le>(&mut self, id: u16, value: T) {
        self.push(value);
        self.fields.push((id, self.offset()));
    }

    pub fn add_offset(&mut self, id: u16, target: usize) {
        self.push_uoffset(target);
        self.fields.push((id, self.offset()));
    }

    pub fn add_offset64(&mut self, id: u16, target: usize) {
        self.push_uoffset64(target);
        self.fields.push((id, self.offset()));
    }

    pub fn add_struct(&mut self, id: u16, bytes: &[u8], align: usize) {
        self.prep(align, bytes.len());
        self.push_bytes(bytes);
        self.fields.push((id, self.offset()));
    }

    pub fn end_table(&mut self) -> usize {
        self.push(0i32);
        let table = self.offset();
        let table_size = (table - self.table_start) as u16;

        let slots = self.fields.iter().map(|&(id, _)| id as usize + 1).max().unwrap_or(0);
        let mut vtable = vec![0u16; slots + 2];
        vtable[0] = (4 + 2 * slots) as u16;
        vtable[1] = table_size;
        for &(id, at) in &self.fields {
            vtable[id as usize + 2] = (table - at) as u16;
        }
        let vtable_bytes: Vec<u8> = vtable.iter().flat_map(|v| v.to_le_bytes()).collect();

        let existing = self
            .vtables
            .iter()
            .find(|(_, bytes)| *bytes == vtable_bytes)
            .map(|&(at, _)| at);
        let vtable_at = match existing {
            Some(at) => at,
            None => {
                self.push_bytes(&vtable_bytes);
                let at = self.offset();
                self.vtables.push((at, vtable_bytes));
                at
            }
        };

        // Table position minus vtable position
        let soffset = vtable_at as i64 - table as i64;
        self.patch(table, &(soffset as i32).to_le_bytes());
        self.fields.clear();
        table
    }

    /// Overwrites bytes starting at the item whose distance from the end is `at`
    pub fn patch(&mut self, at: usize, bytes: &[u8]) {
        let pos = self.data.len() - at;
        self.data[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    fn finish_with(&mut self, root: usize, ident: Option<&[u8; 4]>, prefixed: bool) -> Vec<u8> {
        let header = 4 + if ident.is_some() { 4 } else { 0 } + if prefixed { 4 } else { 0 };
        let align = self.min_align.max(4);
        self.prep(align, header);
        if let Some(ident) = ident {
            self.push_bytes(ident);
        }
        self.push_uoffset(root);
        if prefixed {
            let size = self.offset() as u32;
            self.push_bytes(&size.to_le_bytes());
        }
        self.data.clone()
    }

    pub fn finish(&mut self, root: usize, ident: Option<&[u8; 4]>) -> Vec<u8> {
        self.finish_with(root, ident, false)
    }

    pub fn finish_size_prefixed(&mut self, root: usize, ident: Option<&[u8; 4]>) -> Vec<u8> {
        self.finish_with(root, ident, true)
    }
}

pub const VEC3: usize = 0;
pub const MONSTER: usize = 1;
pub const WEAPON: usize = 2;
pub const EQUIPMENT: usize = 0;

pub mod monster {
    pub const POS: u16 = 0;
    pub const HP: u16 = 1;
    pub const NAME: u16 = 2;
    pub const INVENTORY: u16 = 3;
    pub const FRIENDS: u16 = 4;
    pub const EQUIPPED_TYPE: u16 = 5;
    pub const EQUIPPED: u16 = 6;
    pub const TAGS: u16 = 7;
    pub const ENEMY: u16 = 8;
}

pub mod weapon {
    pub const NAME: u16 = 0;
    pub const DAMAGE: u16 = 1;
}

/// Vec3 { x, y, z: float } as little-endian bytes
pub fn vec3(x: f32, y: f32, z: f32) -> Vec<u8> {
    [x, y, z].iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// ```text
/// struct Vec3 { x: float; y: float; z: float; }
/// table Weapon { name: string; damage: short; }
/// union Equipment { Weapon }
/// table Monster {
///   pos: Vec3; hp: short = 100; name: string (required);
///   inventory: [ubyte]; friends: [Monster]; equipped: Equipment;
///   tags: [string]; enemy: Monster;
/// }
/// root_type Monster;
/// ```
pub fn monster_schema() -> Schema {
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

    let monster = Object::table(
        "Monster",
        vec![
            Field::object("pos", monster::POS, VEC3),
            Field::scalar("hp", monster::HP, BaseType::Short).with_default_integer(100),
            Field::string("name", monster::NAME).required(),
            Field::vector("inventory", monster::INVENTORY, BaseType::UByte),
            Field::vector_of("friends", monster::FRIENDS, BaseType::Obj, MONSTER),
            Field::union_type("equipped_type", monster::EQUIPPED_TYPE, EQUIPMENT),
            Field::union("equipped", monster::EQUIPPED, EQUIPMENT),
            Field::vector("tags", monster::TAGS, BaseType::String),
            Field::object("enemy", monster::ENEMY, MONSTER),
        ],
    );

    let weapon = Object::table(
        "Weapon",
        vec![
            Field::string("name", weapon::NAME),
            Field::scalar("damage", weapon::DAMAGE, BaseType::Short),
        ],
    );

    let equipment = Enum::union(
        "Equipment",
        vec![
            EnumVal::new("NONE", 0),
            EnumVal::object_variant("Weapon", 1, WEAPON),
        ],
    );

    Schema::new(vec![vec3, monster, weapon], vec![equipment], Some(MONSTER))
        .expect("monster schema")
}

/// `table Monster { a: uint; name: string; }`
pub fn simple_schema() -> Schema {
    let monster = Object::table(
        "Monster",
        vec![
            Field::scalar("a", 0, BaseType::UInt),
            Field::string("name", 1),
        ],
    );
    Schema::new(vec![monster], vec![], Some(0)).expect("simple schema")
}

/// `table Blob { data: [ubyte] (vector64); }`
pub fn blob_schema() -> Schema {
    let blob = Object::table("Blob", vec![Field::vector64("data", 0, BaseType::UByte)]);
    Schema::new(vec![blob], vec![], Some(0)).expect("blob schema")
}

/// Union value type used when a test needs a string variant
pub fn string_variant(name: &str, value: i64) -> EnumVal {
    EnumVal::variant(name, value, Type::new(BaseType::String))
}

/// A Monster with only the required name
pub fn minimal_monster(b: &mut Builder, name: &str) -> usize {
    let name = b.create_string(name);
    b.start_table();
    b.add_offset(monster::NAME, name);
    b.end_table()
}

/// A Monster whose two friends share one vtable and one name string,
/// returned with the friends' table positions
pub fn twin_friends() -> (Vec<u8>, [usize; 2]) {
    let mut b = Builder::new();
    let name = b.create_string("Twin");
    let twins = [(); 2].map(|_| {
        // Same inline size, so the second table reuses the first vtable
        b.prep(4, 0);
        b.start_table();
        b.add_offset(monster::NAME, name);
        b.end_table()
    });
    let friends = b.create_offset_vector(&twins);
    b.start_table();
    b.add_offset(monster::NAME, name);
    b.add_offset(monster::FRIENDS, friends);
    let root = b.end_table();
    let data = b.finish(root, None);
    let positions = twins.map(|at| data.len() - at);
    (data, positions)
}

/// Where the vtable of the table at `table` starts
pub fn vtable_position(data: &[u8], table: usize) -> usize {
    let soffset = i32::from_le_bytes(data[table..table + 4].try_into().expect("soffset"));
    (table as i64 - i64::from(soffset)) as usize
}

/// A Monster using every field
pub fn full_monster() -> Vec<u8> {
    let mut b = Builder::new();

    let friend = minimal_monster(&mut b, "Sidekick");
    let friends = b.create_offset_vector(&[friend]);
    let sword = b.create_string("Sword");
    b.start_table();
    b.add_scalar(weapon::DAMAGE, 7i16);
    b.add_offset(weapon::NAME, sword);
    let weapon = b.end_table();

    let orc = b.create_string("orc");
    let big = b.create_string("big");
    let tags = b.create_offset_vector(&[orc, big]);
    let inventory = b.create_vector(&[1u8, 2, 3, 4, 5]);
    let name = b.create_string("MyMonster");

    b.start_table();
    b.add_offset(monster::TAGS, tags);
    b.add_offset(monster::EQUIPPED, weapon);
    b.add_offset(monster::FRIENDS, friends);
    b.add_offset(monster::INVENTORY, inventory);
    b.add_offset(monster::NAME, name);
    b.add_struct(monster::POS, &vec3(1.0, 2.0, 3.0), 4);
    b.add_scalar(monster::HP, 300i16);
    b.add_scalar(monster::EQUIPPED_TYPE, 1u8);
    let root = b.end_table();
    b.finish(root, None)
}
