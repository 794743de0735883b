//! Tests for runtime overlays over a synthetic heap
//!
//! The structures are laid out by hand in a [`BufferMemory`] using the
//! default 64-bit layout, with the engine globals resolved through a prepared
//! symbol table.

use std::sync::Arc;

use hostlens_core::error::LensError;
use hostlens_core::image::ModuleImage;
use hostlens_core::imports::{ImportBinder, NativeImage, SymbolStrategy};
use hostlens_core::memory::{BufferMemory, MemoryExt};
use hostlens_core::overlay::runtime::{
    CanonicalInfo, CorElementType, FieldAccess, MethodClassification, PackedField, TypeCategory,
};
use hostlens_core::overlay::{Overlay, PackedBitVector, RuntimeLayout};
use hostlens_core::runtime::Runtime;
use hostlens_core::symbols::{MapSymbolStore, SymbolResolver};
use hostlens_core::types::{Address, Rva};

const BASE: Address = Address::new(0x10_0000);
const STRING_MT: Address = Address::new(0x10_0100);
const GENERIC_MT: Address = Address::new(0x10_0180);
const EE_CLASS: Address = Address::new(0x10_0200);
const FIELDS: Address = Address::new(0x10_0300);
const INDIRECT_MT: Address = Address::new(0x10_0400);
const CELL: Address = Address::new(0x10_0480);
const BAD_MT: Address = Address::new(0x10_0500);
const OBJECT_MT: Address = Address::new(0x10_0540);
const STRING: Address = Address::new(0x10_0600);
const CHUNK: Address = Address::new(0x10_0800);
const PLAIN_EE_CLASS: Address = Address::new(0x10_0900);
const OBJECT_EE_CLASS: Address = Address::new(0x10_0a00);
const DERIVED_MT: Address = Address::new(0x10_0b00);
const DERIVED_EE_CLASS: Address = Address::new(0x10_0c00);

const STRING_CLASS_RVA: u64 = 0x700;
const OBJECT_CLASS_RVA: u64 = 0x708;

/// NumInstanceFields, NumMethods, NumStaticFields, ..., NonGCStaticFieldBytes, ..., NumNonVirtualSlots
const PACKED: [u32; PackedField::COUNT] = [2, 5, 1, 0, 0, 24, 0, 0, 0, 0, 3];

fn put<T: bytemuck::Pod>(memory: &BufferMemory, address: Address, value: T)
{
    memory.write_pod(address, value).unwrap();
}

fn method_table(memory: &BufferMemory, at: Address, flags: u32, parent: Address, canonical: u64)
{
    put(memory, at, flags);
    put(memory, at + 0x04, 0x18_u32);
    put(memory, at + 0x0a, 0x1234_u16);
    put(memory, at + 0x0c, 4_u16);
    put(memory, at + 0x10, parent);
    put(memory, at + 0x28, canonical);
}

fn class(memory: &BufferMemory, at: Address, table: Address, packed: bool, words: &[u32])
{
    put(memory, at + 0x10, table);
    put(memory, at + 0x18, FIELDS);
    put(memory, at + 0x41, u8::from(packed));
    put(memory, at + 0x42, 0x48_u8);
    for (index, word) in words.iter().enumerate() {
        put(memory, at + 0x48 + 4 * index as u64, *word);
    }
}

fn heap() -> Arc<BufferMemory>
{
    let memory = BufferMemory::zeroed(BASE, 0x1000);

    // System.String: component size 2, parent System.Object
    method_table(&memory, STRING_MT, 0x8000_0000 | 2, OBJECT_MT, EE_CLASS.value());
    method_table(&memory, OBJECT_MT, 0, Address::ZERO, OBJECT_EE_CLASS.value());
    method_table(&memory, GENERIC_MT, 0, OBJECT_MT, STRING_MT.value() | 2);
    method_table(&memory, INDIRECT_MT, 0, OBJECT_MT, CELL.value() | 3);
    put(&memory, CELL, GENERIC_MT);
    method_table(&memory, BAD_MT, 0, OBJECT_MT, EE_CLASS.value() | 1);

    class(&memory, EE_CLASS, STRING_MT, true, &PackedBitVector::pack(&PACKED).unwrap());
    class(&memory, PLAIN_EE_CLASS, STRING_MT, false, &[4, 9, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    class(&memory, OBJECT_EE_CLASS, OBJECT_MT, false, &[0; PackedField::COUNT]);

    // Derives from System.String: three instance fields, one of them its own
    method_table(&memory, DERIVED_MT, 0, STRING_MT, DERIVED_EE_CLASS.value());
    class(&memory, DERIVED_EE_CLASS, DERIVED_MT, false, &[3, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

    // rid 7, public; offset 8, I4
    put(&memory, FIELDS, STRING_MT);
    put(&memory, FIELDS + 0x08, 7_u32 | (6 << 27));
    put(&memory, FIELDS + 0x0c, 8_u32 | (0x08 << 27));
    // needs the full token; offset 16, class reference
    put(&memory, FIELDS + 0x18, 9_u32 | (1 << 30));
    put(&memory, FIELDS + 0x1c, 16_u32 | (0x12 << 27));
    // static string
    put(&memory, FIELDS + 0x28, 11_u32 | (1 << 24));
    put(&memory, FIELDS + 0x2c, 0x0e_u32 << 27);

    // "hello", with a GC mark bit in the method table pointer
    put(&memory, STRING, STRING_MT.value() | 1);
    put(&memory, STRING + 0x08, 5_u32);
    for (index, unit) in "hello".encode_utf16().enumerate() {
        put(&memory, STRING + 0x0c + 2 * index as u64, unit);
    }

    put(&memory, BASE + STRING_CLASS_RVA, STRING_MT);
    put(&memory, BASE + OBJECT_CLASS_RVA, OBJECT_MT);

    // Two descs, token range 2, remainders 5 and 6
    put(&memory, CHUNK, STRING_MT);
    put(&memory, CHUNK + 0x10, 3_u8);
    put(&memory, CHUNK + 0x11, 1_u8);
    put(&memory, CHUNK + 0x12, 2_u16);
    put(&memory, CHUNK + 0x18, 0x8005_u16);
    put(&memory, CHUNK + 0x1c, 7_u16);
    put(&memory, CHUNK + 0x1e, 0x0002_u16);
    put(&memory, CHUNK + 0x20, 0x0006_u16);
    put(&memory, CHUNK + 0x22, 1_u8);

    Arc::new(memory)
}

fn runtime() -> Runtime
{
    let image = ModuleImage::from_parts("libcoreclr.so", BASE, 0x1000, Vec::new());
    let store = MapSymbolStore::from_pairs([
        ("g_pStringClass", Rva::new(STRING_CLASS_RVA)),
        ("g_pObjectClass", Rva::new(OBJECT_CLASS_RVA)),
    ]);
    let symbols = SymbolResolver::with_store(store, &image);
    let native = Arc::new(NativeImage::preloaded(image, Some(symbols)));
    let binder = ImportBinder::new().with_strategy(SymbolStrategy::new(native));
    Runtime::new(heap(), binder, RuntimeLayout::default())
}

#[test]
fn test_method_table_fields()
{
    let runtime = runtime();
    let table = runtime.method_table(STRING_MT);

    assert_eq!(table.base_size().unwrap(), 0x18);
    assert_eq!(table.component_size().unwrap(), Some(2));
    assert_eq!(table.category().unwrap(), TypeCategory::Class);
    assert_eq!(table.type_def_token().unwrap(), 0x0200_1234);
    assert_eq!(table.num_virtuals().unwrap(), 4);
    assert_eq!(table.parent().unwrap(), Some(runtime.method_table(OBJECT_MT)));
    assert_eq!(runtime.method_table(OBJECT_MT).parent().unwrap(), None);
    assert_eq!(runtime.method_table(OBJECT_MT).component_size().unwrap(), None);
}

#[test]
fn test_union_dispatch_for_every_tag()
{
    let runtime = runtime();

    let info = runtime.method_table(STRING_MT).canonical_info().unwrap();
    assert_eq!(info, CanonicalInfo::EEClass(runtime.ee_class(EE_CLASS)));

    let info = runtime.method_table(GENERIC_MT).canonical_info().unwrap();
    assert_eq!(info, CanonicalInfo::Canonical(runtime.method_table(STRING_MT)));

    let info = runtime.method_table(INDIRECT_MT).canonical_info().unwrap();
    assert_eq!(info, CanonicalInfo::Indirection(CELL));

    let result = runtime.method_table(BAD_MT).canonical_info();
    assert!(matches!(
        result,
        Err(LensError::UnionTagUnsupported { tag: 1, address, .. }) if address == BAD_MT + 0x28
    ));
}

#[test]
fn test_canonical_chain()
{
    let runtime = runtime();
    let string = runtime.method_table(STRING_MT);

    assert_eq!(string.canonical().unwrap(), string);
    assert_eq!(runtime.method_table(GENERIC_MT).canonical().unwrap(), string);
    // indirection -> generic instantiation -> canonical
    assert_eq!(runtime.method_table(INDIRECT_MT).canonical().unwrap(), string);
    assert_eq!(runtime.method_table(INDIRECT_MT).ee_class().unwrap().base(), EE_CLASS);
    assert!(runtime.method_table(BAD_MT).ee_class().is_err());
}

#[test]
fn test_packed_class_counts()
{
    let runtime = runtime();
    let class = runtime.ee_class(EE_CLASS);

    assert!(class.fields_are_packed().unwrap());
    assert_eq!(class.packed_fields_address().unwrap(), EE_CLASS + 0x48);
    for field in PackedField::ALL {
        assert_eq!(class.packed_field(field).unwrap(), PACKED[field.index()], "{field:?}");
    }
    assert_eq!(class.num_methods().unwrap(), 5);
    assert_eq!(class.num_non_virtual_slots().unwrap(), 3);
    assert_eq!(class.method_table().unwrap(), Some(runtime.method_table(STRING_MT)));
}

#[test]
fn test_unpacked_class_counts()
{
    let runtime = runtime();
    let class = runtime.ee_class(PLAIN_EE_CLASS);

    assert!(!class.fields_are_packed().unwrap());
    assert_eq!(class.num_instance_fields().unwrap(), 4);
    assert_eq!(class.num_methods().unwrap(), 9);
    assert_eq!(class.num_non_virtual_slots().unwrap(), 1);
}

#[test]
fn test_packed_index_out_of_range()
{
    let words = PackedBitVector::pack(&PACKED).unwrap();
    let vector = PackedBitVector::new(&words, PackedField::COUNT, true);
    assert!(matches!(
        vector.get(PackedField::COUNT),
        Err(LensError::FieldIndexOutOfRange { index: 11, count: 11 })
    ));

    // Lengths that claim more bits than the words hold
    let truncated = PackedBitVector::new(&[u32::MAX], 3, true);
    assert!(matches!(truncated.get(2), Err(LensError::FieldIndexOutOfRange { .. })));
}

#[test]
fn test_field_descs()
{
    let runtime = runtime();
    let fields = runtime.ee_class(EE_CLASS).field_descs().unwrap();
    assert_eq!(fields.len(), 3);

    let first = fields[0];
    assert_eq!(first.enclosing_method_table().unwrap(), Some(runtime.method_table(STRING_MT)));
    assert_eq!(first.token().unwrap(), Some(0x0400_0007));
    assert_eq!(first.protection().unwrap(), FieldAccess::Public);
    assert_eq!(first.offset().unwrap(), 8);
    assert_eq!(first.element_type().unwrap(), CorElementType::I4);
    assert!(!first.is_static().unwrap());

    assert_eq!(fields[1].token().unwrap(), None);
    assert!(fields[1].element_type().unwrap().is_reference());

    assert!(fields[2].is_static().unwrap());
    assert_eq!(fields[2].element_type().unwrap(), CorElementType::String);
}

#[test]
fn test_field_descs_skip_inherited()
{
    let runtime = runtime();
    let derived = runtime.ee_class(DERIVED_EE_CLASS);
    assert_eq!(derived.num_instance_fields().unwrap(), 3);
    assert_eq!(derived.num_introduced_instance_fields().unwrap(), 1);
    assert_eq!(derived.field_descs().unwrap().len(), 1);

    // No parent: every instance field is its own
    let object = runtime.ee_class(OBJECT_EE_CLASS);
    assert_eq!(object.num_introduced_instance_fields().unwrap(), 0);
    assert!(object.field_descs().unwrap().is_empty());
    assert_eq!(runtime.ee_class(EE_CLASS).num_introduced_instance_fields().unwrap(), 2);
}

#[test]
fn test_set_offset_preserves_type_bits()
{
    let runtime = runtime();
    let field = runtime.field_desc(FIELDS);

    field.set_offset(0x123).unwrap();
    assert_eq!(field.offset().unwrap(), 0x123);
    assert_eq!(field.element_type().unwrap(), CorElementType::I4);

    field.set_offset(u32::MAX).unwrap();
    assert_eq!(field.offset().unwrap(), (1 << 27) - 1);
    assert_eq!(field.element_type().unwrap(), CorElementType::I4);
    assert_eq!(runtime.memory().read_pod::<u32>(FIELDS + 0x08).unwrap(), 7 | (6 << 27));
}

#[test]
fn test_string_object()
{
    let runtime = runtime();
    let string = runtime.object(STRING);

    assert_eq!(string.method_table().unwrap().base(), STRING_MT);
    assert!(string.is_string().unwrap());
    assert_eq!(string.component_count().unwrap(), 5);
    assert_eq!(string.string_value().unwrap(), "hello");
    assert_eq!(string.array_element_address(1).unwrap(), STRING + 0x10 + 2);
    assert!(matches!(
        string.array_element_address(5),
        Err(LensError::FieldIndexOutOfRange { index: 5, count: 5 })
    ));
}

#[test]
fn test_null_object_header()
{
    let runtime = runtime();
    assert!(matches!(
        runtime.object(BASE + 0xf00).method_table(),
        Err(LensError::NullPointer(_))
    ));
}

#[test]
fn test_globals_read_through_slots()
{
    let runtime = runtime();
    assert_eq!(runtime.globals().string_class().unwrap().base(), STRING_MT);
    assert_eq!(runtime.globals().object_class().unwrap().base(), OBJECT_MT);
    assert!(!runtime.method_table(OBJECT_MT).is_string().unwrap());
}

#[test]
fn test_method_desc_chunk_and_token()
{
    let runtime = runtime();
    let chunk = runtime.method_desc_chunk(CHUNK);
    assert_eq!(chunk.count().unwrap(), 2);
    assert_eq!(chunk.size().unwrap(), 4);
    assert_eq!(chunk.next().unwrap(), None);

    let first = chunk.first();
    assert_eq!(first.base(), CHUNK + 0x18);
    assert_eq!(first.chunk().unwrap(), chunk);
    assert_eq!(first.token().unwrap(), 0x0600_2005);
    assert_eq!(first.slot().unwrap(), 7);
    assert_eq!(first.classification().unwrap(), MethodClassification::NDirect);

    let second = runtime.method_desc(CHUNK + 0x20);
    assert_eq!(second.chunk().unwrap(), chunk);
    assert_eq!(second.token().unwrap(), 0x0600_2006);
    assert_eq!(second.chunk_method_table().unwrap(), Some(runtime.method_table(STRING_MT)));
}

#[test]
fn test_native_call_without_symbol_fails_before_calling()
{
    let runtime = runtime();
    let result = runtime.method_table(STRING_MT).num_instance_field_bytes();
    assert!(matches!(
        result,
        Err(LensError::SymbolNotFound(name)) if name == "MethodTable::GetNumInstanceFieldBytes"
    ));
    assert!(!runtime.binder().is_bound::<hostlens_core::overlay::runtime::MethodTable<'static>>());
}

#[test]
fn test_custom_layout_moves_reads()
{
    let mut layout = RuntimeLayout::default();
    layout.method_table.base_size = hostlens_core::overlay::Field::new(0x0c);
    let runtime = Runtime::new(heap(), ImportBinder::new(), layout);
    // num_virtuals now answers as base_size
    assert_eq!(runtime.method_table(STRING_MT).base_size().unwrap(), 4);
}

#[test]
fn test_unshiftable_layout_fails_reads()
{
    let mut layout = RuntimeLayout::default();
    layout.method_desc.token_remainder_bits = 32;
    layout.field_desc.offset = hostlens_core::overlay::Bits::new(32, 1);
    let runtime = Runtime::new(heap(), ImportBinder::new(), layout);

    let desc = runtime.method_desc(CHUNK + 0x18);
    assert!(matches!(desc.token_remainder(), Err(LensError::InvalidLayout { .. })));
    assert!(matches!(desc.token(), Err(LensError::InvalidLayout { .. })));
    assert!(matches!(runtime.field_desc(FIELDS).offset(), Err(LensError::InvalidLayout { .. })));
    assert!(matches!(runtime.field_desc(FIELDS).set_offset(4), Err(LensError::InvalidLayout { .. })));
}
